//! Loader for the on-disk sequence index.
//!
//! Each domain folder carries three files: `stripped` with the term
//! prefixes, `names` with free-text names, and `offsets` with signed
//! offsets. Lines start with the domain letter followed by the six-digit
//! number.

use std::path::Path;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

use crate::core::number::Number;
use crate::core::sequence::Sequence;
use crate::core::uid::Uid;
use crate::errors::SetupError;
use crate::seq::index::SequenceIndex;
use crate::seq::managed::{is_too_big, ManagedSequence};
use crate::sys::log;

pub struct SequenceLoader<'a> {
    index: &'a mut SequenceIndex,
    min_num_terms: usize,
    num_loaded: usize,
    num_total: usize,
}

impl<'a> SequenceLoader<'a> {
    pub fn new(index: &'a mut SequenceIndex, min_num_terms: usize) -> Self {
        SequenceLoader {
            index,
            min_num_terms,
            num_loaded: 0,
            num_total: 0,
        }
    }

    pub fn num_loaded(&self) -> usize {
        self.num_loaded
    }

    /// Load one domain folder into the index.
    pub fn load(&mut self, folder: &Path, domain: char) -> Result<(), SetupError> {
        if !domain.is_ascii_uppercase() {
            return Err(SetupError::InvalidConfig(format!(
                "invalid sequence domain '{}'",
                domain
            )));
        }
        if !folder.is_dir() {
            return Err(SetupError::MissingFile(folder.to_path_buf()));
        }
        log::debug(&format!(
            "Loading sequences from {} with domain '{}'",
            folder.display(),
            domain
        ));
        let start_time = Instant::now();
        self.load_data(&folder.join("stripped"), domain)?;
        self.load_names(&folder.join("names"), domain)?;
        self.load_offsets(&folder.join("offsets"), domain)?;
        log::info(&format!(
            "Loaded {}/{} \"{}\"-sequences in {:.2}s",
            self.num_loaded,
            self.num_total,
            domain,
            start_time.elapsed().as_secs_f64()
        ));
        Ok(())
    }

    // parse a line prefix "X123456 " and return the id and the rest
    fn parse_prefix<'l>(line: &'l str, domain: char, path: &Path) -> Result<(i64, &'l str), SetupError> {
        let parse_error = || {
            SetupError::InvalidConfig(format!("cannot parse line '{}' in {}", line, path.display()))
        };
        let mut chars = line.char_indices();
        match chars.next() {
            Some((_, d)) if d == domain => {}
            _ => return Err(parse_error()),
        }
        let mut number: i64 = 0;
        let mut end = 1;
        for (pos, ch) in chars {
            if let Some(digit) = ch.to_digit(10) {
                number = number * 10 + digit as i64;
                end = pos + ch.len_utf8();
            } else {
                break;
            }
        }
        if end == 1 || number == 0 {
            return Err(parse_error());
        }
        Ok((number, &line[end..]))
    }

    fn load_data(&mut self, path: &Path, domain: char) -> Result<(), SetupError> {
        log::debug(&format!("Loading sequence data from {}", path.display()));
        let content =
            std::fs::read_to_string(path).map_err(|_| SetupError::MissingFile(path.to_path_buf()))?;
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::default_spinner());
        bar.set_message(format!("loading {}", path.display()));
        for (count, line) in content.lines().enumerate() {
            if count % 10_000 == 0 {
                bar.tick();
            }
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.num_total += 1;
            let (number, rest) = Self::parse_prefix(line, domain, path)?;
            let rest = rest.trim_start();
            let mut terms = Sequence::new();
            for part in rest.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let value: Number = match part.parse() {
                    Ok(value) => value,
                    Err(_) => {
                        return Err(SetupError::InvalidConfig(format!(
                            "cannot parse term '{}' in {}",
                            part,
                            path.display()
                        )))
                    }
                };
                if is_too_big(&value) {
                    break;
                }
                terms.push(value);
            }
            if terms.len() < self.min_num_terms {
                continue;
            }
            let uid = Uid::new(domain, number)
                .map_err(|_| SetupError::InvalidConfig(format!("bad id in '{}'", line)))?;
            self.index.add(ManagedSequence::new(uid, "", terms));
            self.num_loaded += 1;
        }
        bar.finish_and_clear();
        Ok(())
    }

    fn load_names(&mut self, path: &Path, domain: char) -> Result<(), SetupError> {
        log::debug(&format!("Loading sequence names from {}", path.display()));
        let content =
            std::fs::read_to_string(path).map_err(|_| SetupError::MissingFile(path.to_path_buf()))?;
        for line in content.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (number, rest) = Self::parse_prefix(line, domain, path)?;
            if let Ok(uid) = Uid::new(domain, number) {
                if let Some(seq) = self.index.get_mut(uid) {
                    seq.name = rest.trim().to_string();
                }
            }
        }
        Ok(())
    }

    fn load_offsets(&mut self, path: &Path, domain: char) -> Result<(), SetupError> {
        log::debug(&format!("Loading sequence offsets from {}", path.display()));
        let entries = crate::seq::lists::load_map(path)?;
        for (uid, offset) in entries {
            if uid.domain() != domain {
                continue;
            }
            if let Some(seq) = self.index.get_mut(uid) {
                seq.offset = offset;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).expect("writes");
    }

    #[test]
    fn loads_domain_folder() {
        let dir = std::env::temp_dir().join(format!("seqmine-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        write(
            &dir,
            "stripped",
            "# comment\nA000001 ,1,1,1,1,1,\nA000002 ,1,2,\nA000003 ,2,4,6,8,10,\n",
        );
        write(&dir, "names", "A000001 First group order\nA000003 Even numbers\n");
        write(&dir, "offsets", "A000003: 1\n");
        let mut index = SequenceIndex::new();
        let mut loader = SequenceLoader::new(&mut index, 3);
        loader.load(&dir, 'A').expect("loads");
        assert_eq!(loader.num_loaded(), 2); // A000002 is too short
        let a3 = index.get("A000003".parse().expect("valid")).expect("loaded");
        assert_eq!(a3.name, "Even numbers");
        assert_eq!(a3.offset, 1);
        assert!(!index.exists("A000002".parse().expect("valid")));
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn rejects_wrong_domain_lines() {
        let dir = std::env::temp_dir().join(format!("seqmine-loader-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        write(&dir, "stripped", "B000001 ,1,2,3,\n");
        let mut index = SequenceIndex::new();
        let mut loader = SequenceLoader::new(&mut index, 1);
        assert!(loader.load_data(&dir.join("stripped"), 'A').is_err());
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
