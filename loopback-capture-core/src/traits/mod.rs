pub mod backend;
pub mod frame_sink;
