//! Frequency collector for common operation windows ("blocks").
//!
//! Blocks feed the stats-driven generators: frequently recurring operation
//! windows from the corpus are replayed as building bricks for new
//! programs. The on-disk form is a program listing where each block is
//! preceded by a comment with its count.

use std::collections::BTreeMap;
use std::path::Path;

use rand::prelude::*;

use crate::lang::parser;
use crate::lang::printer;
use crate::lang::program::{OpType, Operation, Program};

const MIN_BLOCK_LEN: usize = 2;
const MAX_BLOCK_LEN: usize = 4;

type BlockKey = Vec<Operation>;

#[derive(Debug, Clone, Default)]
pub struct Blocks {
    frequencies: BTreeMap<String, (BlockKey, i64)>,
}

impl Blocks {
    pub fn new() -> Self {
        Blocks::default()
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    fn key_string(ops: &[Operation]) -> String {
        ops.iter()
            .map(|op| op.to_string())
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Collect all loop-balanced operation windows of a program.
    pub fn collect(&mut self, p: &Program) {
        let ops: Vec<Operation> = p
            .ops
            .iter()
            .filter(|op| op.typ != OpType::Nop)
            .map(|op| {
                let mut o = (*op).clone();
                o.comment.clear();
                o
            })
            .collect();
        for len in MIN_BLOCK_LEN..=MAX_BLOCK_LEN {
            if ops.len() < len {
                break;
            }
            for window in ops.windows(len) {
                let mut depth = 0i64;
                let mut balanced = true;
                for op in window {
                    match op.typ {
                        OpType::Lpb => depth += 1,
                        OpType::Lpe => {
                            depth -= 1;
                            if depth < 0 {
                                balanced = false;
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                if balanced && depth == 0 {
                    let entry = self
                        .frequencies
                        .entry(Self::key_string(window))
                        .or_insert_with(|| (window.to_vec(), 0));
                    entry.1 += 1;
                }
            }
        }
    }

    /// Drop blocks below the frequency floor.
    pub fn finalize(&mut self, min_count: i64) {
        self.frequencies.retain(|_, (_, count)| *count >= min_count);
    }

    /// Draw a random block, weighted by frequency.
    pub fn sample(&self, rng: &mut StdRng) -> Option<&[Operation]> {
        if self.frequencies.is_empty() {
            return None;
        }
        let total: i64 = self.frequencies.values().map(|(_, c)| *c).sum();
        let mut pick = rng.gen_range(0..total.max(1));
        for (ops, count) in self.frequencies.values() {
            pick -= count;
            if pick < 0 {
                return Some(ops);
            }
        }
        None
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut out = String::new();
        for (ops, count) in self.frequencies.values() {
            out.push_str(&format!("; {}\n", count));
            let mut block = Program::new();
            block.ops = ops.clone();
            out.push_str(&printer::print_program(&block));
            out.push('\n');
        }
        crate::sys::file::write_atomic(path, &out)
    }

    pub fn load(path: &Path) -> std::io::Result<Blocks> {
        let content = std::fs::read_to_string(path)?;
        let mut blocks = Blocks::new();
        let mut count: i64 = 0;
        let mut current: Vec<Operation> = Vec::new();
        let mut flush = |count: i64, current: &mut Vec<Operation>, blocks: &mut Blocks| {
            if !current.is_empty() && count > 0 {
                blocks.frequencies.insert(
                    Blocks::key_string(current),
                    (std::mem::take(current), count),
                );
            } else {
                current.clear();
            }
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                flush(count, &mut current, &mut blocks);
                count = 0;
                continue;
            }
            if let Some(comment) = line.strip_prefix(';') {
                flush(count, &mut current, &mut blocks);
                count = comment.trim().parse().unwrap_or(0);
                continue;
            }
            let mut single = Program::new();
            if parser::parse_program(line).map(|p| single = p).is_ok() {
                current.extend(single.ops);
            }
        }
        flush(count, &mut current, &mut blocks);
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;
    use rand::SeedableRng;

    #[test]
    fn collects_balanced_windows() {
        let p = parse_program("mov $1,1\nadd $1,2\nmul $0,$1\n").expect("valid");
        let mut blocks = Blocks::new();
        blocks.collect(&p);
        assert!(!blocks.is_empty());
        // windows crossing loop boundaries are skipped
        let q = parse_program("lpb $0\n  sub $0,1\nlpe\n").expect("valid");
        let mut loop_blocks = Blocks::new();
        loop_blocks.collect(&q);
        for (ops, _) in loop_blocks.frequencies.values() {
            let depth: i64 = ops
                .iter()
                .map(|op| match op.typ {
                    OpType::Lpb => 1,
                    OpType::Lpe => -1,
                    _ => 0,
                })
                .sum();
            assert_eq!(depth, 0);
        }
    }

    #[test]
    fn save_load_roundtrip() {
        let p = parse_program("mov $1,1\nadd $1,2\nmul $0,$1\n").expect("valid");
        let mut blocks = Blocks::new();
        blocks.collect(&p);
        blocks.collect(&p);
        let dir = std::env::temp_dir().join("seqmine-tests");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join(format!("blocks-{}.asm", std::process::id()));
        blocks.save(&path).expect("saves");
        let loaded = Blocks::load(&path).expect("loads");
        assert_eq!(loaded.len(), blocks.len());
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn sampling_returns_known_blocks() {
        let p = parse_program("add $0,1\nmul $0,2\n").expect("valid");
        let mut blocks = Blocks::new();
        blocks.collect(&p);
        let mut rng = StdRng::seed_from_u64(42);
        let sampled = blocks.sample(&mut rng).expect("non-empty");
        assert_eq!(sampled.len(), 2);
    }
}
