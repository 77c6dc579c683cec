//! System layer: setup, logging, locking, progress, metrics, and the
//! external collaborators (HTTP API, git).

use std::sync::atomic::{AtomicBool, Ordering};

pub mod api_client;
pub mod file;
pub mod git;
pub mod lock;
pub mod log;
pub mod metrics;
pub mod progress;
pub mod setup;

/// Global halt flag, set by the progress monitor or a shutdown signal. All
/// long-running loops check it cooperatively.
pub static HALT: AtomicBool = AtomicBool::new(false);

pub fn halt_requested() -> bool {
    HALT.load(Ordering::Relaxed)
}

pub fn request_halt() {
    HALT.store(true, Ordering::Relaxed);
}
