//! Corpus-wide program statistics.
//!
//! Aggregated over all stored programs and persisted as a set of CSV files
//! under the stats directory. The counts drive the probability
//! distributions of the stats-based generators; the call graph backs the
//! transitive-length lookup of the overwrite policy.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use petgraph::graphmap::DiGraphMap;

use crate::core::number::Number;
use crate::core::uid::{Uid, UidSet};
use crate::errors::SetupError;
use crate::eval::evaluator::Steps;
use crate::lang::parser;
use crate::lang::program::{OpType, Operand, Operation, Program, OP_TYPES};
use crate::lang::util;
use crate::mine::blocks::Blocks;
use crate::sys::{file, log};

pub const PROGRAMS_HEADER: &str = "id,length,usages,inc_eval,log_eval";
pub const CALL_GRAPH_HEADER: &str = "caller,callee";
pub const SUMMARY_HEADER: &str = "num_sequences,num_programs,num_formulas";
pub const STEPS_HEADER: &str = "total,min,max,runs";

/// Operation identity without comments, usable as a map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OpKey {
    pub typ: OpType,
    pub target: Operand,
    pub source: Operand,
}

impl From<&Operation> for OpKey {
    fn from(op: &Operation) -> Self {
        OpKey {
            typ: op.typ,
            target: op.target.clone(),
            source: op.source.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OpPosKey {
    pub pos: u64,
    pub len: u64,
    pub op: OpKey,
}

#[derive(Debug, Default)]
pub struct Stats {
    pub num_programs: i64,
    pub num_sequences: i64,
    pub num_formulas: i64,
    pub num_constants: BTreeMap<Number, i64>,
    pub num_operations: BTreeMap<OpKey, i64>,
    pub num_operation_positions: BTreeMap<OpPosKey, i64>,
    pub num_ops_per_type: Vec<i64>,
    pub num_programs_per_length: Vec<i64>,
    pub program_lengths: BTreeMap<Uid, i64>,
    pub program_usages: BTreeMap<Uid, i64>,
    pub call_graph: DiGraphMap<i64, ()>,
    pub supports_inceval: UidSet,
    pub supports_logeval: UidSet,
    pub all_program_ids: UidSet,
    pub latest_program_ids: UidSet,
    pub blocks: Blocks,
    pub steps: Steps,
    logged_cycles: HashSet<Uid>,
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            num_ops_per_type: vec![0; OP_TYPES.len()],
            ..Stats::default()
        }
    }

    /// Record one stored program.
    pub fn update_program_stats(
        &mut self,
        id: Uid,
        program: &Program,
        inc_eval: bool,
        log_eval: bool,
    ) {
        self.num_programs += 1;
        self.all_program_ids.insert(id);
        if inc_eval {
            self.supports_inceval.insert(id);
        }
        if log_eval {
            self.supports_logeval.insert(id);
        }
        let length = util::num_ops(program, false) as i64;
        self.program_lengths.insert(id, length);
        if length as usize >= self.num_programs_per_length.len() {
            self.num_programs_per_length.resize(length as usize + 1, 0);
        }
        self.num_programs_per_length[length as usize] += 1;

        let real_ops: Vec<&Operation> = program
            .ops
            .iter()
            .filter(|op| op.typ != OpType::Nop)
            .collect();
        for (pos, op) in real_ops.iter().enumerate() {
            self.num_ops_per_type[op.typ as usize] += 1;
            if let Operand::Constant(c) = &op.source {
                // call ids are not constants
                if op.typ.metadata().num_operands >= 2
                    && op.typ != OpType::Seq
                    && op.typ != OpType::Prg
                {
                    *self.num_constants.entry(c.clone()).or_insert(0) += 1;
                }
            }
            let key = OpKey::from(*op);
            *self.num_operations.entry(key.clone()).or_insert(0) += 1;
            *self
                .num_operation_positions
                .entry(OpPosKey {
                    pos: pos as u64,
                    len: real_ops.len() as u64,
                    op: key,
                })
                .or_insert(0) += 1;
            if op.typ == OpType::Seq {
                if let Some(callee) = op.source.as_constant().and_then(|n| n.to_i64()) {
                    self.call_graph.add_edge(id.to_int(), callee, ());
                    if let Ok(callee_uid) = Uid::from_int(callee) {
                        *self.program_usages.entry(callee_uid).or_insert(0) += 1;
                    }
                }
            }
        }
        self.blocks.collect(program);
    }

    pub fn update_sequence_stats(&mut self, _id: Uid, has_program: bool, has_formula: bool) {
        self.num_sequences += 1;
        if has_formula && has_program {
            self.num_formulas += 1;
        }
    }

    pub fn finalize(&mut self) {
        self.blocks.finalize(2);
    }

    /// Sum of the program lengths in the call-graph closure of `uid`.
    /// Cycles are broken and logged once per offending identifier.
    pub fn get_transitive_length(&mut self, uid: Uid) -> i64 {
        let mut visited = HashSet::new();
        self.transitive_length_visit(uid, uid, &mut visited)
    }

    fn transitive_length_visit(
        &mut self,
        root: Uid,
        current: Uid,
        visited: &mut HashSet<i64>,
    ) -> i64 {
        if !visited.insert(current.to_int()) {
            if self.logged_cycles.insert(root) {
                log::warn(&format!("Recursion in call graph of {}", root));
            }
            return 0;
        }
        let mut length = self.program_lengths.get(&current).copied().unwrap_or(0);
        let callees: Vec<i64> = self
            .call_graph
            .neighbors_directed(current.to_int(), petgraph::Direction::Outgoing)
            .collect();
        for callee in callees {
            if let Ok(callee_uid) = Uid::from_int(callee) {
                length += self.transitive_length_visit(root, callee_uid, visited);
            }
        }
        length
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn write_csv(path: &Path, content: String) -> Result<(), SetupError> {
        file::write_atomic(path, &content)?;
        Ok(())
    }

    /// Write all stats files. The caller holds the stats folder lock.
    pub fn save(&self, dir: &Path) -> Result<(), SetupError> {
        std::fs::create_dir_all(dir)?;

        let mut constants = String::new();
        for (n, count) in &self.num_constants {
            constants.push_str(&format!("{},{}\n", n, count));
        }
        Self::write_csv(&dir.join("constant_counts.csv"), constants)?;

        let mut lengths = String::new();
        for (len, count) in self.num_programs_per_length.iter().enumerate() {
            if *count > 0 {
                lengths.push_str(&format!("{},{}\n", len, count));
            }
        }
        Self::write_csv(&dir.join("program_lengths.csv"), lengths)?;

        let mut type_counts = String::new();
        for t in OP_TYPES {
            let count = self.num_ops_per_type[*t as usize];
            if count > 0 {
                type_counts.push_str(&format!("{},{}\n", t.name(), count));
            }
        }
        Self::write_csv(&dir.join("operation_type_counts.csv"), type_counts)?;

        let mut op_counts = String::new();
        for (key, count) in &self.num_operations {
            op_counts.push_str(&format!(
                "{},{},{},{}\n",
                key.typ.name(),
                key.target,
                key.source,
                count
            ));
        }
        Self::write_csv(&dir.join("operation_counts.csv"), op_counts)?;

        let mut pos_counts = String::new();
        for (key, count) in &self.num_operation_positions {
            pos_counts.push_str(&format!(
                "{},{},{},{},{},{}\n",
                key.pos,
                key.len,
                key.op.typ.name(),
                key.op.target,
                key.op.source,
                count
            ));
        }
        Self::write_csv(&dir.join("operation_pos_counts.csv"), pos_counts)?;

        let mut programs = format!("{}\n", PROGRAMS_HEADER);
        for uid in self.all_program_ids.iter() {
            programs.push_str(&format!(
                "{},{},{},{},{}\n",
                uid,
                self.program_lengths.get(&uid).copied().unwrap_or(0),
                self.program_usages.get(&uid).copied().unwrap_or(0),
                self.supports_inceval.contains(uid) as u8,
                self.supports_logeval.contains(uid) as u8
            ));
        }
        Self::write_csv(&dir.join("programs.csv"), programs)?;

        let mut latest = String::new();
        for uid in self.latest_program_ids.iter() {
            latest.push_str(&format!("{}\n", uid));
        }
        Self::write_csv(&dir.join("latest_programs.csv"), latest)?;

        let mut call_graph = format!("{}\n", CALL_GRAPH_HEADER);
        for (caller, callee, _) in self.call_graph.all_edges() {
            let caller = Uid::from_int(caller).map(|u| u.to_string()).unwrap_or_default();
            let callee = Uid::from_int(callee).map(|u| u.to_string()).unwrap_or_default();
            call_graph.push_str(&format!("{},{}\n", caller, callee));
        }
        Self::write_csv(&dir.join("call_graph.csv"), call_graph)?;

        let summary = format!(
            "{}\n{},{},{}\n",
            SUMMARY_HEADER, self.num_sequences, self.num_programs, self.num_formulas
        );
        Self::write_csv(&dir.join("summary.csv"), summary)?;

        if self.steps.runs > 0 {
            let steps = format!(
                "{}\n{},{},{},{}\n",
                STEPS_HEADER, self.steps.total, self.steps.min, self.steps.max, self.steps.runs
            );
            Self::write_csv(&dir.join("steps.csv"), steps)?;
        }

        self.blocks
            .save(&dir.join("blocks.asm"))
            .map_err(SetupError::from)?;
        Ok(())
    }

    fn read_lines(path: &Path) -> Result<Vec<String>, SetupError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SetupError::MissingFile(path.to_path_buf()))?;
        Ok(content.lines().map(str::to_string).collect())
    }

    fn check_header(lines: &[String], header: &str, path: &Path) -> Result<(), SetupError> {
        match lines.first() {
            Some(first) if first.as_str() == header => Ok(()),
            _ => Err(SetupError::InvalidConfig(format!(
                "unexpected header in {}",
                path.display()
            ))),
        }
    }

    pub fn load(dir: &Path) -> Result<Stats, SetupError> {
        let mut stats = Stats::new();
        let bad = |path: &Path, line: &str| {
            SetupError::InvalidConfig(format!("bad line '{}' in {}", line, path.display()))
        };

        let path = dir.join("constant_counts.csv");
        for line in Self::read_lines(&path)? {
            let (k, v) = line.split_once(',').ok_or_else(|| bad(&path, &line))?;
            let n: Number = k.parse().map_err(|_| bad(&path, &line))?;
            stats
                .num_constants
                .insert(n, v.parse().map_err(|_| bad(&path, &line))?);
        }

        let path = dir.join("program_lengths.csv");
        for line in Self::read_lines(&path)? {
            let (k, v) = line.split_once(',').ok_or_else(|| bad(&path, &line))?;
            let len: usize = k.parse().map_err(|_| bad(&path, &line))?;
            if len >= stats.num_programs_per_length.len() {
                stats.num_programs_per_length.resize(len + 1, 0);
            }
            stats.num_programs_per_length[len] = v.parse().map_err(|_| bad(&path, &line))?;
        }

        let path = dir.join("operation_type_counts.csv");
        for line in Self::read_lines(&path)? {
            let (k, v) = line.split_once(',').ok_or_else(|| bad(&path, &line))?;
            let typ = OpType::from_name(k).ok_or_else(|| bad(&path, &line))?;
            stats.num_ops_per_type[typ as usize] = v.parse().map_err(|_| bad(&path, &line))?;
        }

        let path = dir.join("operation_counts.csv");
        for line in Self::read_lines(&path)? {
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() != 4 {
                return Err(bad(&path, &line));
            }
            let key = OpKey {
                typ: OpType::from_name(parts[0]).ok_or_else(|| bad(&path, &line))?,
                target: parser::parse_operand(parts[1]).map_err(|_| bad(&path, &line))?,
                source: parser::parse_operand(parts[2]).map_err(|_| bad(&path, &line))?,
            };
            stats
                .num_operations
                .insert(key, parts[3].parse().map_err(|_| bad(&path, &line))?);
        }

        let path = dir.join("operation_pos_counts.csv");
        for line in Self::read_lines(&path)? {
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() != 6 {
                return Err(bad(&path, &line));
            }
            let key = OpPosKey {
                pos: parts[0].parse().map_err(|_| bad(&path, &line))?,
                len: parts[1].parse().map_err(|_| bad(&path, &line))?,
                op: OpKey {
                    typ: OpType::from_name(parts[2]).ok_or_else(|| bad(&path, &line))?,
                    target: parser::parse_operand(parts[3]).map_err(|_| bad(&path, &line))?,
                    source: parser::parse_operand(parts[4]).map_err(|_| bad(&path, &line))?,
                },
            };
            stats
                .num_operation_positions
                .insert(key, parts[5].parse().map_err(|_| bad(&path, &line))?);
        }

        let path = dir.join("programs.csv");
        let lines = Self::read_lines(&path)?;
        Self::check_header(&lines, PROGRAMS_HEADER, &path)?;
        for line in &lines[1..] {
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() != 5 {
                return Err(bad(&path, line));
            }
            let uid: Uid = parts[0].parse().map_err(|_| bad(&path, line))?;
            stats.all_program_ids.insert(uid);
            stats
                .program_lengths
                .insert(uid, parts[1].parse().map_err(|_| bad(&path, line))?);
            let usages: i64 = parts[2].parse().map_err(|_| bad(&path, line))?;
            if usages > 0 {
                stats.program_usages.insert(uid, usages);
            }
            if parts[3] == "1" {
                stats.supports_inceval.insert(uid);
            }
            if parts[4] == "1" {
                stats.supports_logeval.insert(uid);
            }
            stats.num_programs += 1;
        }

        let path = dir.join("latest_programs.csv");
        if path.is_file() {
            for line in Self::read_lines(&path)? {
                if let Ok(uid) = line.trim().parse::<Uid>() {
                    stats.latest_program_ids.insert(uid);
                }
            }
        }

        let path = dir.join("call_graph.csv");
        let lines = Self::read_lines(&path)?;
        Self::check_header(&lines, CALL_GRAPH_HEADER, &path)?;
        for line in &lines[1..] {
            let (caller, callee) = line.split_once(',').ok_or_else(|| bad(&path, line))?;
            let caller: Uid = caller.parse().map_err(|_| bad(&path, line))?;
            let callee: Uid = callee.parse().map_err(|_| bad(&path, line))?;
            stats
                .call_graph
                .add_edge(caller.to_int(), callee.to_int(), ());
        }

        let path = dir.join("summary.csv");
        let lines = Self::read_lines(&path)?;
        Self::check_header(&lines, SUMMARY_HEADER, &path)?;
        if let Some(line) = lines.get(1) {
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() == 3 {
                stats.num_sequences = parts[0].parse().map_err(|_| bad(&path, line))?;
                stats.num_formulas = parts[2].parse().map_err(|_| bad(&path, line))?;
            }
        }

        let path = dir.join("steps.csv");
        if path.is_file() {
            let lines = Self::read_lines(&path)?;
            Self::check_header(&lines, STEPS_HEADER, &path)?;
            if let Some(line) = lines.get(1) {
                let parts: Vec<&str> = line.split(',').collect();
                if parts.len() == 4 {
                    stats.steps = Steps {
                        total: parts[0].parse().map_err(|_| bad(&path, line))?,
                        min: parts[1].parse().map_err(|_| bad(&path, line))?,
                        max: parts[2].parse().map_err(|_| bad(&path, line))?,
                        runs: parts[3].parse().map_err(|_| bad(&path, line))?,
                    };
                }
            }
        }

        let blocks_path = dir.join("blocks.asm");
        if blocks_path.is_file() {
            stats.blocks = Blocks::load(&blocks_path)?;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;

    fn sample_stats() -> Stats {
        let mut stats = Stats::new();
        let p1 = parse_program("mov $1,1\nlpb $0\n  sub $0,1\n  add $1,2\nlpe\nmov $0,$1\n")
            .expect("valid");
        let p2 = parse_program("seq $0,45\nadd $0,10\n").expect("valid");
        stats.update_program_stats("A000005".parse().expect("valid"), &p1, true, false);
        stats.update_program_stats("A000010".parse().expect("valid"), &p2, false, false);
        stats.update_sequence_stats("A000005".parse().expect("valid"), true, true);
        stats.update_sequence_stats("A000010".parse().expect("valid"), true, false);
        stats.finalize();
        stats
    }

    #[test]
    fn aggregates_counts() {
        let stats = sample_stats();
        assert_eq!(stats.num_programs, 2);
        assert_eq!(stats.num_sequences, 2);
        assert_eq!(stats.num_formulas, 1);
        assert_eq!(stats.num_ops_per_type[OpType::Sub as usize], 1);
        assert_eq!(
            stats.num_constants.get(&Number::Small(2)).copied(),
            Some(1)
        );
        // the seq id is a call, not a constant operand
        assert!(stats.num_constants.get(&Number::Small(45)).is_none());
        assert_eq!(stats.num_programs_per_length[6], 1);
        assert_eq!(stats.num_programs_per_length[2], 1);
        assert!(stats.supports_inceval.contains("A000005".parse().expect("valid")));
    }

    #[test]
    fn call_graph_and_usages() {
        let mut stats = sample_stats();
        let caller: Uid = "A000010".parse().expect("valid");
        let callee: Uid = "A000045".parse().expect("valid");
        assert_eq!(stats.program_usages.get(&callee).copied(), Some(1));
        // transitive length: caller(2) + callee(0, no program known)
        assert_eq!(stats.get_transitive_length(caller), 2);
    }

    #[test]
    fn transitive_length_detects_cycles() {
        let mut stats = Stats::new();
        let a: Uid = "A000001".parse().expect("valid");
        let b: Uid = "A000002".parse().expect("valid");
        stats.program_lengths.insert(a, 3);
        stats.program_lengths.insert(b, 4);
        stats.call_graph.add_edge(a.to_int(), b.to_int(), ());
        stats.call_graph.add_edge(b.to_int(), a.to_int(), ());
        assert_eq!(stats.get_transitive_length(a), 7);
        assert_eq!(stats.get_transitive_length(b), 7);
    }

    #[test]
    fn save_load_roundtrip() {
        let stats = sample_stats();
        let dir = std::env::temp_dir().join(format!("seqmine-stats-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        stats.save(&dir).expect("saves");
        let loaded = Stats::load(&dir).expect("loads");
        assert_eq!(loaded.num_programs, stats.num_programs);
        assert_eq!(loaded.num_sequences, stats.num_sequences);
        assert_eq!(loaded.num_constants, stats.num_constants);
        assert_eq!(loaded.num_operations, stats.num_operations);
        assert_eq!(
            loaded.num_operation_positions,
            stats.num_operation_positions
        );
        assert_eq!(loaded.num_ops_per_type, stats.num_ops_per_type);
        assert_eq!(loaded.num_programs_per_length, stats.num_programs_per_length);
        assert_eq!(loaded.blocks.len(), stats.blocks.len());
        // saving the loaded stats must reproduce identical files
        let dir2 = std::env::temp_dir().join(format!("seqmine-stats2-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir2);
        loaded.save(&dir2).expect("saves");
        for name in ["constant_counts.csv", "programs.csv", "call_graph.csv", "summary.csv"] {
            let a = std::fs::read_to_string(dir.join(name)).expect("reads");
            let b = std::fs::read_to_string(dir2.join(name)).expect("reads");
            assert_eq!(a, b, "{} differs", name);
        }
        std::fs::remove_dir_all(&dir).expect("cleanup");
        std::fs::remove_dir_all(&dir2).expect("cleanup");
    }
}
