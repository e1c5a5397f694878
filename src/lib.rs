//! Application glue for the hindsight binary.

pub mod app;
pub mod ipc;
pub mod observer;

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
