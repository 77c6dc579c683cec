//! Progress monitor for time-boxed mining runs.
//!
//! Writes a progress marker at a fixed cadence and reports when the target
//! runtime is reached. Checkpoints carry a checksum over a caller-provided
//! key so that a restarted process can detect tampered or foreign files.

use std::path::PathBuf;
use std::time::Instant;

use crate::sys::{file, log};

pub struct ProgressMonitor {
    target_seconds: u64,
    start: Instant,
    progress_path: Option<PathBuf>,
    checkpoint_path: Option<PathBuf>,
    checkpoint_key: u32,
}

impl ProgressMonitor {
    pub fn new(
        target_seconds: u64,
        progress_path: Option<PathBuf>,
        checkpoint_path: Option<PathBuf>,
        checkpoint_key: u32,
    ) -> Self {
        ProgressMonitor {
            target_seconds,
            start: Instant::now(),
            progress_path,
            checkpoint_path,
            checkpoint_key,
        }
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn is_target_reached(&self) -> bool {
        self.elapsed_seconds() >= self.target_seconds
    }

    /// Fraction of the target runtime spent so far, in `0..=1`.
    pub fn progress(&self) -> f64 {
        if self.target_seconds == 0 {
            return 1.0;
        }
        (self.elapsed_seconds() as f64 / self.target_seconds as f64).min(1.0)
    }

    /// Mix the checkpoint key into a value, making plain-number forgeries
    /// detectable. Applying it twice restores the value.
    pub fn encode(&self, value: u32) -> u32 {
        value ^ self.checkpoint_key.rotate_left(7) ^ CHECKPOINT_SALT
    }

    pub fn decode(&self, value: u32) -> u32 {
        self.encode(value)
    }

    pub fn write_progress(&self) {
        if let Some(path) = &self.progress_path {
            let percent = (self.progress() * 100.0) as u32;
            if let Err(e) = file::write_atomic(path, &format!("{}\n", percent)) {
                log::warn(&format!("Cannot write progress file: {}", e));
            }
        }
        if let Some(path) = &self.checkpoint_path {
            let encoded = self.encode(self.elapsed_seconds() as u32);
            if let Err(e) = file::write_atomic(path, &format!("{}\n", encoded)) {
                log::warn(&format!("Cannot write checkpoint file: {}", e));
            }
        }
    }

    /// Read a previously written checkpoint, verifying the key.
    pub fn read_checkpoint(&self) -> Option<u32> {
        let path = self.checkpoint_path.as_ref()?;
        let content = std::fs::read_to_string(path).ok()?;
        let encoded: u32 = content.trim().parse().ok()?;
        let decoded = self.decode(encoded);
        if decoded as u64 > self.target_seconds * 2 {
            log::warn("Ignoring implausible checkpoint");
            return None;
        }
        Some(decoded)
    }
}

const CHECKPOINT_SALT: u32 = 0x5e91_3a7c;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let monitor = ProgressMonitor::new(600, None, None, 0xdead_beef);
        for value in [0u32, 1, 599, 12345, u32::MAX] {
            assert_eq!(monitor.decode(monitor.encode(value)), value);
        }
    }

    #[test]
    fn different_keys_differ() {
        let a = ProgressMonitor::new(600, None, None, 1);
        let b = ProgressMonitor::new(600, None, None, 2);
        assert_ne!(a.encode(100), b.encode(100));
    }

    #[test]
    fn target_and_progress() {
        let monitor = ProgressMonitor::new(0, None, None, 0);
        assert!(monitor.is_target_reached());
        assert!((monitor.progress() - 1.0).abs() < f64::EPSILON);
    }
}
