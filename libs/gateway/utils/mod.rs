//! Shared helpers

mod shutdown;

pub use shutdown::{sleep_or_cancel, ShutdownManager};
