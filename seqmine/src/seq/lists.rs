//! List files: identifier sets and per-identifier counters kept on disk.
//!
//! Formats:
//!   - set files (`protect.txt`, `deny.txt`, ...): one identifier per line;
//!   - map files (`invalid_matches.txt`, `offsets`): `A000045: 17` with
//!     optional `#` comment lines.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::uid::{Uid, UidSet};
use crate::errors::SetupError;
use crate::sys::file;

pub const INVALID_MATCHES_FILE: &str = "invalid_matches.txt";
pub const FULL_CHECK_FILE: &str = "full_check.txt";
pub const OVERWRITE_FILE: &str = "overwrite.txt";
pub const PROTECT_FILE: &str = "protect.txt";
pub const DENY_FILE: &str = "deny.txt";

static MAP_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][0-9]{1,6})\s*:\s*(-?[0-9]+)\s*$").expect("valid pattern"));

/// Load a set file; a missing file yields an empty set.
pub fn load_list(path: &Path) -> Result<UidSet, SetupError> {
    let mut set = UidSet::new();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(set),
        Err(e) => return Err(e.into()),
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let uid: Uid = line
            .parse()
            .map_err(|_| SetupError::InvalidConfig(format!("bad list entry '{}'", line)))?;
        set.insert(uid);
    }
    Ok(set)
}

pub fn save_list(path: &Path, set: &UidSet) -> Result<(), SetupError> {
    let mut content = String::new();
    for uid in set.iter() {
        content.push_str(&uid.to_string());
        content.push('\n');
    }
    file::write_atomic(path, &content)?;
    Ok(())
}

/// Load a `uid: count` map file; a missing file yields an empty map.
pub fn load_map(path: &Path) -> Result<BTreeMap<Uid, i64>, SetupError> {
    let mut map = BTreeMap::new();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(map),
        Err(e) => return Err(e.into()),
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let caps = MAP_LINE_RE
            .captures(line)
            .ok_or_else(|| SetupError::InvalidConfig(format!("bad map entry '{}'", line)))?;
        let uid: Uid = caps[1]
            .parse()
            .map_err(|_| SetupError::InvalidConfig(format!("bad map entry '{}'", line)))?;
        let count: i64 = caps[2]
            .parse()
            .map_err(|_| SetupError::InvalidConfig(format!("bad map entry '{}'", line)))?;
        map.insert(uid, count);
    }
    Ok(map)
}

pub fn save_map(path: &Path, map: &BTreeMap<Uid, i64>) -> Result<(), SetupError> {
    let mut content = String::new();
    for (uid, count) in map {
        content.push_str(&format!("{}: {}\n", uid, count));
    }
    file::write_atomic(path, &content)?;
    Ok(())
}

/// Merge in-memory counters into the on-disk map by adding counts.
pub fn merge_map(path: &Path, updates: &BTreeMap<Uid, i64>) -> Result<(), SetupError> {
    let mut merged = load_map(path)?;
    for (uid, count) in updates {
        *merged.entry(*uid).or_insert(0) += count;
    }
    save_map(path, &merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("seqmine-tests");
        std::fs::create_dir_all(&dir).expect("temp dir");
        dir.join(format!("{}-{}", name, std::process::id()))
    }

    #[test]
    fn list_roundtrip() {
        let path = temp_path("list");
        let mut set = UidSet::new();
        set.insert("A000045".parse().expect("valid"));
        set.insert("U000001".parse().expect("valid"));
        save_list(&path, &set).expect("saves");
        let loaded = load_list(&path).expect("loads");
        assert!(loaded.contains("A000045".parse().expect("valid")));
        assert_eq!(loaded.len(), 2);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn map_merge_adds_counts() {
        let path = temp_path("map");
        let mut first = BTreeMap::new();
        first.insert("A000001".parse().expect("valid"), 2);
        save_map(&path, &first).expect("saves");
        let mut updates = BTreeMap::new();
        updates.insert("A000001".parse().expect("valid"), 3);
        updates.insert("A000002".parse().expect("valid"), 1);
        merge_map(&path, &updates).expect("merges");
        let merged = load_map(&path).expect("loads");
        assert_eq!(merged[&"A000001".parse::<Uid>().expect("valid")], 5);
        assert_eq!(merged[&"A000002".parse::<Uid>().expect("valid")], 1);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn missing_files_are_empty() {
        let path = temp_path("missing-never-created");
        let _ = std::fs::remove_file(&path);
        assert!(load_list(&path).expect("loads").is_empty());
        assert!(load_map(&path).expect("loads").is_empty());
    }
}
