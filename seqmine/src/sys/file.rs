//! Filesystem helpers: atomic writes and file-age checks.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Write via a temporary file in the same directory and rename into place,
/// so readers never observe partial content.
pub fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(&format!(".tmp-{}", std::process::id()));
    path.with_file_name(name)
}

/// Age of a file in days; a missing file is infinitely old.
pub fn file_age_days(path: &Path) -> f64 {
    let modified = std::fs::metadata(path).and_then(|m| m.modified());
    match modified {
        Ok(modified) => match SystemTime::now().duration_since(modified) {
            Ok(age) => age.as_secs_f64() / 86_400.0,
            Err(_) => 0.0,
        },
        Err(_) => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_roundtrip() {
        let dir = std::env::temp_dir().join("seqmine-tests");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join(format!("atomic-{}", std::process::id()));
        write_atomic(&path, "hello\n").expect("writes");
        assert_eq!(std::fs::read_to_string(&path).expect("reads"), "hello\n");
        assert!(file_age_days(&path) < 1.0);
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn missing_file_is_old() {
        assert!(file_age_days(Path::new("/nonexistent/seqmine")).is_infinite());
    }
}
