pub(crate) mod capture_thread;
pub mod loopback;
pub mod signals;
