//! Process setup: home directories, evaluation settings, memory probe.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sysinfo::System;

use crate::core::uid::Uid;

/// Environment variable overriding the engine home directory.
pub const HOME_ENV: &str = "SEQMINE_HOME";
pub const MINING_MODE_ENV: &str = "SEQMINE_MINING_MODE";

/// Evaluation limits and defaults, threaded through the whole engine.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Number of sequence terms used for matching.
    pub num_terms: usize,
    /// Maximum number of executed operations per evaluation; negative
    /// disables the limit.
    pub max_cycles: i64,
    /// Largest writable memory cell index; negative disables the limit.
    pub max_memory: i64,
    /// Wall-clock budget per evaluation in seconds; non-positive disables
    /// the deadline.
    pub max_eval_seconds: i64,
    /// Miner profile name or index from the configuration.
    pub miner_profile: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            num_terms: 10,
            max_cycles: 10_000_000,
            max_memory: 100_000,
            max_eval_seconds: -1,
            miner_profile: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningMode {
    Local,
    Client,
    Server,
}

pub fn mining_mode() -> MiningMode {
    match std::env::var(MINING_MODE_ENV).as_deref() {
        Ok("client") => MiningMode::Client,
        Ok("server") => MiningMode::Server,
        _ => MiningMode::Local,
    }
}

pub fn home_dir() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".seqmine")
}

pub fn seqs_home() -> PathBuf {
    home_dir().join("seqs")
}

pub fn programs_home() -> PathBuf {
    home_dir().join("programs")
}

pub fn stats_home() -> PathBuf {
    home_dir().join("stats")
}

pub fn lists_home() -> PathBuf {
    home_dir().join("lists")
}

pub fn debug_home() -> PathBuf {
    home_dir().join("debug")
}

pub fn config_path() -> PathBuf {
    home_dir().join("miners.json")
}

/// Folder name of a sequence/program domain.
pub fn domain_folder(domain: char) -> &'static str {
    match domain {
        'A' => "canon",
        'U' => "user",
        'V' => "virt",
        'T' => "tmp",
        _ => "other",
    }
}

/// Thousand-bucket of an identifier, e.g. `A123456` lands in `123`.
pub fn bucket(uid: Uid) -> String {
    format!("{:03}", uid.number() / 1000)
}

/// Path of a stored program: `<programs>/<domain>/<bucket>/<uid>.asm`, or
/// the per-host directory for local results.
pub fn program_path(uid: Uid, local: bool) -> PathBuf {
    if local {
        programs_home().join("local").join(format!("{}.asm", uid))
    } else {
        programs_home()
            .join(domain_folder(uid.domain()))
            .join(bucket(uid))
            .join(format!("{}.asm", uid))
    }
}

/// Path of a b-file: `<seqs>/<domain>/b/<bucket>/b<number>.txt`.
pub fn b_file_path(uid: Uid) -> PathBuf {
    seqs_home()
        .join(domain_folder(uid.domain()))
        .join("b")
        .join(bucket(uid))
        .join(format!("b{:06}.txt", uid.number()))
}

const MIN_AVAILABLE_BYTES: u64 = 512 * 1024 * 1024;

static SYSTEM: Lazy<Mutex<System>> = Lazy::new(|| Mutex::new(System::new()));

/// Whether the process should keep growing its caches and indexes.
pub fn has_memory() -> bool {
    let mut sys = SYSTEM.lock();
    sys.refresh_memory();
    sys.available_memory() > MIN_AVAILABLE_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_domain_layout() {
        let uid: Uid = "A123456".parse().expect("valid uid");
        let p = program_path(uid, false);
        assert!(p.ends_with("programs/canon/123/A123456.asm"));
        let b = b_file_path(uid);
        assert!(b.ends_with("seqs/canon/b/123/b123456.txt"));
        let local = program_path(uid, true);
        assert!(local.ends_with("programs/local/A123456.asm"));
    }
}
