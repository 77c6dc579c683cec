//! A sequence managed by the on-disk index, with lazy b-file loading.

use std::fmt;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::core::big_number::BigNumber;
use crate::core::number::Number;
use crate::core::sequence::Sequence;
use crate::core::uid::Uid;
use crate::sys::{log, setup};

/// Callback fetching a missing b-file from the remote index; returns
/// whether the file exists afterwards.
pub type BFileFetcher<'a> = &'a dyn Fn(Uid, &std::path::Path) -> bool;

// hook notifying the external collaborator about corrupt b-files
type BrokenReporter = Box<dyn Fn(Uid) + Send>;

static BROKEN_BFILE_REPORTER: Lazy<Mutex<Option<BrokenReporter>>> =
    Lazy::new(|| Mutex::new(None));

/// Install the handler for broken-b-file events (e.g. an API report).
pub fn set_broken_bfile_reporter(reporter: BrokenReporter) {
    *BROKEN_BFILE_REPORTER.lock() = Some(reporter);
}

fn report_broken_bfile(uid: Uid) {
    if let Some(reporter) = BROKEN_BFILE_REPORTER.lock().as_ref() {
        reporter(uid);
    }
}

// process-wide downloader for missing curated b-files
type GlobalFetcher = Box<dyn Fn(Uid, &std::path::Path) -> bool + Send>;

static BFILE_FETCHER: Lazy<Mutex<Option<GlobalFetcher>>> = Lazy::new(|| Mutex::new(None));

/// Install the downloader used when a curated b-file is missing and no
/// explicit fetcher is passed.
pub fn set_bfile_fetcher(fetcher: GlobalFetcher) {
    *BFILE_FETCHER.lock() = Some(fetcher);
}

fn fetch_with_global(uid: Uid, path: &std::path::Path) -> bool {
    match BFILE_FETCHER.lock().as_ref() {
        Some(fetcher) => fetcher(uid, path),
        None => false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagedSequence {
    pub id: Uid,
    pub name: String,
    pub offset: i64,
    terms: Sequence,
    num_bfile_terms: usize,
}

/// Values beyond this size break off term loading: a quarter of the big
/// number width, or a thousandth of the native range.
pub fn is_too_big(n: &Number) -> bool {
    match n {
        Number::Inf => true,
        Number::Big(b) => b.num_used_words() > BigNumber::NUM_WORDS / 4,
        Number::Small(v) => *v > i64::MAX / 1000 || *v < i64::MIN / 1000,
    }
}

impl ManagedSequence {
    pub fn new(id: Uid, name: &str, terms: Sequence) -> Self {
        ManagedSequence {
            id,
            name: name.to_string(),
            offset: 0,
            terms,
            num_bfile_terms: 0,
        }
    }

    pub fn b_file_path(&self) -> PathBuf {
        setup::b_file_path(self.id)
    }

    pub fn existing_num_terms(&self) -> usize {
        self.terms.len()
    }

    /// The first `max_num_terms` terms (all cached terms for a negative
    /// count), loading the b-file when more terms are needed than cached.
    pub fn get_terms(&mut self, max_num_terms: i64) -> Sequence {
        self.get_terms_with_fetch(max_num_terms, None)
    }

    pub fn get_terms_with_fetch(
        &mut self,
        max_num_terms: i64,
        fetch: Option<BFileFetcher>,
    ) -> Sequence {
        let real_max = if max_num_terms >= 0 {
            max_num_terms as usize
        } else {
            super::EXTENDED_SEQ_LENGTH
        };
        if real_max <= self.terms.len() {
            return self.terms.subsequence(0, real_max);
        }

        // load or reload the b-file when it may contain new terms
        if self.num_bfile_terms == 0 || self.num_bfile_terms > self.terms.len() {
            let path = self.b_file_path();
            let mut big = self.load_b_file();
            if big.is_empty() && self.id.domain() == 'A' {
                // curated sequences can be fetched from the remote index
                let _ = std::fs::remove_file(&path);
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                let fetched = match fetch {
                    Some(fetch) => fetch(self.id, &path),
                    None => fetch_with_global(self.id, &path),
                };
                if fetched {
                    big = self.load_b_file();
                }
            }
            if !big.is_empty() {
                self.num_bfile_terms = big.len();
                let mut big = big;
                if big.len() > real_max {
                    big = big.subsequence(0, real_max);
                }
                self.terms = big;
            }
        }
        self.terms.subsequence(0, real_max.min(self.terms.len()))
    }

    fn remove_invalid_b_file(&self, error: &str) {
        let path = self.b_file_path();
        if path.is_file() {
            log::warn(&format!("Removing {} b-file {}", error, path.display()));
            let _ = std::fs::remove_file(&path);
            report_broken_bfile(self.id);
        }
    }

    // read and validate the b-file; an empty result means missing/invalid
    fn load_b_file(&self) -> Sequence {
        let path = self.b_file_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Sequence::new(),
        };
        let mut result = Sequence::new();
        let mut expected_index: Option<i64> = None;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let index = parts.next().and_then(|s| s.parse::<i64>().ok());
            let value = parts.next().and_then(|s| s.parse::<Number>().ok());
            let (Some(index), Some(value)) = (index, value) else {
                log::error(&format!("Malformed line in b-file {}", path.display()));
                self.remove_invalid_b_file("invalid");
                return Sequence::new();
            };
            match expected_index {
                None => expected_index = Some(index),
                Some(expected) if expected == index => {}
                Some(expected) => {
                    log::error(&format!(
                        "Unexpected index {} (expected {}) in b-file {}",
                        index,
                        expected,
                        path.display()
                    ));
                    self.remove_invalid_b_file("invalid");
                    return Sequence::new();
                }
            }
            if is_too_big(&value) {
                break;
            }
            result.push(value);
            expected_index = expected_index.map(|i| i + 1);
        }

        if result.is_empty() {
            self.remove_invalid_b_file("empty");
            return result;
        }

        // line up with the cached terms and verify the common prefix
        let mut aligned = result;
        if !aligned.align(&self.terms, 5) && !self.terms.is_empty() {
            self.remove_invalid_b_file("misaligned");
            return Sequence::new();
        }
        if aligned.len() < self.terms.len() {
            // shorter than the index data; keep the known terms
            return self.terms.clone();
        }
        let prefix = aligned.subsequence(0, self.terms.len());
        if prefix != self.terms {
            log::warn(&format!("Unexpected terms in b-file for {}", self.id));
            log::warn(&format!("- expected: {}", self.terms));
            log::warn(&format!("- found:    {}", prefix));
            self.remove_invalid_b_file("invalid");
            return Sequence::new();
        }
        aligned
    }
}

impl fmt::Display for ManagedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_big_thresholds() {
        assert!(is_too_big(&Number::Inf));
        assert!(!is_too_big(&Number::Small(1_000_000)));
        assert!(is_too_big(&Number::Small(i64::MAX / 999)));
        let big: Number = "9".repeat(250).parse().expect("valid number");
        assert!(is_too_big(&big));
    }

    #[test]
    fn cached_terms_are_served_without_io() {
        let mut seq = ManagedSequence::new(
            "T000001".parse().expect("valid uid"),
            "test",
            Sequence::from_i64(&[1, 2, 3, 4, 5]),
        );
        assert_eq!(seq.get_terms(3), Sequence::from_i64(&[1, 2, 3]));
        assert_eq!(seq.get_terms(5), Sequence::from_i64(&[1, 2, 3, 4, 5]));
        assert_eq!(seq.existing_num_terms(), 5);
    }
}
