pub mod delay;
pub mod negotiation;
pub mod sync_buffer;
