//! Sequence manager: ties together the on-disk sequence index, the program
//! store, the finder, the list files, and the corpus statistics.

use std::collections::HashSet;

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::core::uid::{Uid, UidSet};
use crate::errors::SetupError;
use crate::eval::incremental::IncrementalEvaluator;
use crate::lang::program::Program;
use crate::lang::{analyzer, comments, embedded, parser, printer, util};
use crate::mine::config::{MinerProfile, OverwriteMode, ValidationMode};
use crate::mine::finder::Finder;
use crate::mine::stats::Stats;
use crate::opt::minimizer::Minimizer;
use crate::opt::optimizer::Optimizer;
use crate::seq::index::SequenceIndex;
use crate::seq::lists;
use crate::seq::loader::SequenceLoader;
use crate::sys::lock::FolderLock;
use crate::sys::setup::{self, MiningMode, Settings};
use crate::sys::{file, log};

/// Stats files older than this are regenerated.
const STATS_MAX_AGE_DAYS: f64 = 3.0;

/// Existing programs above this transitive length are worth replacing even
/// without an explicit overwrite entry.
const COMPLEX_PROGRAM_LENGTH: i64 = 10;

#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    pub updated: bool,
    pub is_new: bool,
    pub previous_hash: u64,
    pub change_type: String,
    pub program: Program,
}

pub struct SequenceManager {
    settings: Settings,
    profile: MinerProfile,
    pub index: SequenceIndex,
    finder: Finder,
    stats: Option<Stats>,
    full_check_list: UidSet,
    overwrite_list: UidSet,
    protect_list: UidSet,
    deny_list: UidSet,
    ignore_set: UidSet,
    loaded: bool,
}

impl SequenceManager {
    pub fn new(settings: Settings, profile: MinerProfile) -> Self {
        let finder = Finder::new(settings.clone(), &profile.matchers);
        SequenceManager {
            settings,
            profile,
            index: SequenceIndex::new(),
            finder,
            stats: None,
            full_check_list: UidSet::new(),
            overwrite_list: UidSet::new(),
            protect_list: UidSet::new(),
            deny_list: UidSet::new(),
            ignore_set: UidSet::new(),
            loaded: false,
        }
    }

    pub fn profile(&self) -> &MinerProfile {
        &self.profile
    }

    pub fn finder(&mut self) -> &mut Finder {
        &mut self.finder
    }

    /// Match a candidate against the indexed sequences.
    pub fn find_sequence(
        &mut self,
        p: &Program,
    ) -> (
        crate::core::sequence::Sequence,
        crate::mine::matcher::SeqPrograms,
    ) {
        self.finder.find_sequence(p, &mut self.index)
    }

    /// Load the sequence index, the list files, and the matcher indexes.
    pub fn load(&mut self) -> Result<(), SetupError> {
        if self.loaded {
            return Ok(());
        }
        let domains: Vec<char> = self.profile.domains.chars().collect();
        for domain in &domains {
            let folder = setup::seqs_home().join(setup::domain_folder(*domain));
            let mut loader = SequenceLoader::new(&mut self.index, self.settings.num_terms);
            loader.load(&folder, *domain)?;
        }
        self.load_lists()?;
        self.update_stats_if_stale()?;
        self.fill_matchers();
        self.loaded = true;
        Ok(())
    }

    fn load_lists(&mut self) -> Result<(), SetupError> {
        let lists_home = setup::lists_home();
        self.full_check_list = lists::load_list(&lists_home.join(lists::FULL_CHECK_FILE))?;
        self.overwrite_list = lists::load_list(&lists_home.join(lists::OVERWRITE_FILE))?;
        self.protect_list = lists::load_list(&lists_home.join(lists::PROTECT_FILE))?;
        self.deny_list = lists::load_list(&lists_home.join(lists::DENY_FILE))?;
        Ok(())
    }

    /// Whether a sequence should be indexed for matching under the current
    /// overwrite policy.
    pub fn should_match(&mut self, id: Uid) -> bool {
        if self.deny_list.contains(id) {
            return false;
        }
        let prog_exists = setup::program_path(id, false).is_file();
        if prog_exists && self.protect_list.contains(id) {
            return false;
        }
        match self.profile.overwrite {
            OverwriteMode::None => !prog_exists,
            OverwriteMode::All => true,
            OverwriteMode::Auto => {
                if !prog_exists {
                    return true;
                }
                let should_overwrite = self.overwrite_list.contains(id);
                let is_complex = self
                    .stats
                    .as_mut()
                    .map(|s| s.get_transitive_length(id) > COMPLEX_PROGRAM_LENGTH)
                    .unwrap_or(false);
                is_complex || should_overwrite
            }
        }
    }

    fn fill_matchers(&mut self) {
        let num_terms = self.settings.num_terms as i64;
        let ids: Vec<Uid> = self.index.iter().map(|s| s.id).collect();
        let mut inserted = 0usize;
        for id in ids {
            if !self.should_match(id) {
                continue;
            }
            let Some(seq) = self.index.get_mut(id) else {
                continue;
            };
            let terms = seq.get_terms(num_terms.min(seq.existing_num_terms() as i64));
            if terms.len() < self.settings.num_terms {
                continue;
            }
            self.finder.insert(&terms, id);
            inserted += 1;
        }
        log::info(&format!("Indexed {} sequences for matching", inserted));
        self.finder.log_summary();
    }

    // ------------------------------------------------------------------
    // Program store
    // ------------------------------------------------------------------

    pub fn get_existing_program(&self, id: Uid) -> Program {
        let path = setup::program_path(id, false);
        parser::parse_file(&path).unwrap_or_default()
    }

    /// Hash of a program combined with the programs it calls,
    /// transitively. Detects a stale `previous hash` in update metadata.
    pub fn transitive_program_hash(&self, p: &Program) -> u64 {
        let mut visited = HashSet::new();
        self.transitive_hash_visit(p, &mut visited)
    }

    fn transitive_hash_visit(&self, p: &Program, visited: &mut HashSet<i64>) -> u64 {
        let mut hash = util::program_hash(p);
        for op in &p.ops {
            if op.typ != crate::lang::program::OpType::Seq {
                continue;
            }
            let Some(callee) = op.source.as_constant().and_then(|n| n.to_i64()) else {
                continue;
            };
            if !visited.insert(callee) {
                continue;
            }
            if let Ok(uid) = Uid::from_int(callee) {
                let callee_program = self.get_existing_program(uid);
                if !callee_program.ops.is_empty() {
                    hash = hash
                        .wrapping_mul(31)
                        .wrapping_add(self.transitive_hash_visit(&callee_program, visited));
                }
            }
        }
        hash
    }

    /// Validate a candidate for a target sequence and store it when it is
    /// new or better than the existing program.
    pub fn update_program(
        &mut self,
        id: Uid,
        p: &Program,
        validation: ValidationMode,
    ) -> UpdateResult {
        let mut result = UpdateResult::default();
        if !self.index.exists(id) || self.deny_list.contains(id) || self.ignore_set.contains(id) {
            return result;
        }

        let submitted_by = comments::get_comment_field(p, comments::PREFIX_SUBMITTED_BY);
        let change_type =
            comments::get_comment_field(p, comments::PREFIX_CHANGE_TYPE).unwrap_or_default();
        let previous_hash: u64 = comments::get_comment_field(p, comments::PREFIX_PREVIOUS_HASH)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let mut program = p.clone();
        comments::remove_comments(&mut program);

        let mut existing = self.get_existing_program(id);
        let is_new = existing.ops.is_empty();
        if !is_new {
            if self.protect_list.contains(id) {
                return result;
            }
            util::remove_nops(&mut existing);
            util::remove_nops(&mut program);
            if program == existing {
                return result;
            }
        }

        let full_check = self.full_check_list.contains(id);
        let num_usages = self
            .stats
            .as_ref()
            .and_then(|s| s.program_usages.get(&id).copied())
            .unwrap_or(0);
        let expected_hash = if is_new {
            0
        } else {
            self.transitive_program_hash(&existing)
        };

        let seq = self
            .index
            .get_mut(id)
            .expect("sequence existence checked above");
        let checked = match validation {
            ValidationMode::Basic => self.finder.check_program_basic(
                &program,
                &existing,
                is_new,
                seq,
                &change_type,
                previous_hash,
                expected_hash,
                full_check,
                num_usages,
            ),
            ValidationMode::Extended => self
                .finder
                .check_program_extended(&program, &existing, is_new, seq, full_check, num_usages),
        };
        if !checked.is_accepted() || (!is_new && checked.program == existing) {
            return result;
        }

        result.updated = true;
        result.is_new = is_new;
        result.change_type = checked.status.clone();
        result.program = checked.program.clone();
        if !is_new {
            result.previous_hash = expected_hash;
        }

        // write the new program version
        let is_server = setup::mining_mode() == MiningMode::Server;
        let mut stored = checked.program;
        let offset = self.index.get(id).map(|s| s.offset).unwrap_or(0);
        util::set_offset(&mut stored, offset);
        Optimizer::new(self.settings.max_memory).optimize(&mut stored);
        if let Err(e) = self.dump_program(id, &stored, submitted_by.as_deref(), !is_server) {
            log::error(&format!("Cannot write program for {}: {}", id, e));
            result.updated = false;
            return result;
        }

        // a no-overwrite profile is done with this sequence for good
        if is_new && self.profile.overwrite == OverwriteMode::None {
            let num_terms = self.settings.num_terms as i64;
            if let Some(seq) = self.index.get_mut(id) {
                let norm_seq = seq.get_terms(num_terms);
                self.finder.remove(&norm_seq, id);
            }
            self.ignore_set.insert(id);
        }
        result
    }

    /// Write a program with its metadata header.
    pub fn dump_program(
        &self,
        id: Uid,
        p: &Program,
        submitted_by: Option<&str>,
        local: bool,
    ) -> Result<(), SetupError> {
        let mut out = String::new();
        let name = self.index.get(id).map(|s| s.name.clone()).unwrap_or_default();
        if name.is_empty() {
            out.push_str(&format!("; {}\n", id));
        } else {
            out.push_str(&format!("; {}: {}\n", id, name));
        }
        if let Some(user) = submitted_by {
            out.push_str(&format!("; {}{}\n", comments::PREFIX_SUBMITTED_BY, user));
        }
        if let Some(seq) = self.index.get(id) {
            let preview = seq
                .clone()
                .get_terms(seq.existing_num_terms().min(16) as i64);
            out.push_str(&format!("; {}\n", preview));
        }
        out.push('\n');
        out.push_str(&printer::print_program(p));
        let path = setup::program_path(id, local);
        file::write_atomic(&path, &out)?;
        Ok(())
    }

    /// One maintenance step: re-validate and re-minimize a stored program.
    pub fn maintain_program(&mut self, id: Uid) -> bool {
        let program = self.get_existing_program(id);
        if program.ops.is_empty() || !self.index.exists(id) {
            return false;
        }
        if self.protect_list.contains(id) || comments::is_coded_manually(&program) {
            return false;
        }
        let submitted_by = comments::get_comment_field(&program, comments::PREFIX_SUBMITTED_BY);
        let num_required = crate::mine::finder::num_required_terms(&program);
        let seq = self.index.get_mut(id).expect("existence checked above");
        let terms = seq.get_terms(num_required);
        let (status, _) = self
            .finder
            .evaluator()
            .check(&program, &terms, num_required, id);
        if status == crate::eval::evaluator::Status::Error {
            log::warn(&format!("Stored program for {} is invalid", id));
            return false;
        }
        let mut updated = program.clone();
        comments::remove_comments(&mut updated);
        embedded::auto_unfold(&mut updated);
        let mut minimizer = Minimizer::new(self.settings.clone());
        minimizer.optimize_and_minimize(&mut updated, num_required as usize);
        let seq = self.index.get_mut(id).expect("existence checked above");
        let terms = seq.get_terms(num_required);
        let (status, _) = self
            .finder
            .evaluator()
            .check(&updated, &terms, num_required, id);
        if status == crate::eval::evaluator::Status::Error {
            return false;
        }
        let mut stored = updated;
        let offset = self.index.get(id).map(|s| s.offset).unwrap_or(0);
        util::set_offset(&mut stored, offset);
        if self
            .dump_program(id, &stored, submitted_by.as_deref(), false)
            .is_err()
        {
            return false;
        }
        true
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    pub fn stats(&mut self) -> Result<&mut Stats, SetupError> {
        if self.stats.is_none() {
            self.update_stats_if_stale()?;
        }
        self.stats
            .as_mut()
            .ok_or_else(|| SetupError::InvalidConfig("stats unavailable".to_string()))
    }

    pub fn release_stats(&mut self) {
        self.stats = None;
    }

    fn update_stats_if_stale(&mut self) -> Result<(), SetupError> {
        let stats_home = setup::stats_home();
        let age = file::file_age_days(&stats_home.join("constant_counts.csv"));
        if age > STATS_MAX_AGE_DAYS {
            self.regenerate_stats()?;
        }
        if self.stats.is_none() {
            match Stats::load(&stats_home) {
                Ok(stats) => self.stats = Some(stats),
                Err(e) => {
                    log::warn(&format!("Cannot load stats: {}", e));
                    self.regenerate_stats()?;
                    self.stats = Some(Stats::load(&stats_home)?);
                }
            }
        }
        Ok(())
    }

    /// Scan the program directory and rebuild the stats files.
    pub fn regenerate_stats(&mut self) -> Result<(), SetupError> {
        log::info("Regenerating program stats");
        let programs_home = setup::programs_home();
        let mut paths: Vec<std::path::PathBuf> = Vec::new();
        if programs_home.is_dir() {
            for entry in WalkDir::new(&programs_home).into_iter().flatten() {
                let path = entry.path();
                if path.extension().map(|e| e == "asm").unwrap_or(false)
                    && !path.starts_with(programs_home.join("local"))
                {
                    paths.push(path.to_path_buf());
                }
            }
        }

        // parse and analyze in parallel, aggregate sequentially
        let settings = self.settings.clone();
        let parsed: Vec<(Uid, Program, bool, bool)> = paths
            .par_iter()
            .map_init(
                || IncrementalEvaluator::new(settings.clone()),
                |ie, path| {
                    let uid: Uid = path.file_stem()?.to_str()?.parse().ok()?;
                    let program = parser::parse_file(path).ok()?;
                    let inc_eval = ie.init(&program);
                    let log_eval = analyzer::has_logarithmic_complexity(&program);
                    Some((uid, program, inc_eval, log_eval))
                },
            )
            .flatten()
            .collect();

        let mut stats = Stats::new();
        let mut with_programs = UidSet::new();
        for (uid, program, inc_eval, log_eval) in &parsed {
            stats.update_program_stats(*uid, program, *inc_eval, *log_eval);
            with_programs.insert(*uid);
        }
        for seq in self.index.iter() {
            stats.update_sequence_stats(seq.id, with_programs.contains(seq.id), false);
        }
        stats.finalize();

        let stats_home = setup::stats_home();
        let _lock = FolderLock::acquire(&stats_home)?;
        stats.save(&stats_home)?;
        log::info(&format!(
            "Finished stats generation for {} programs",
            parsed.len()
        ));
        self.stats = Some(stats);
        Ok(())
    }

    /// Path of the program directory for external callers.
    pub fn programs_home(&self) -> std::path::PathBuf {
        setup::programs_home()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the loaded stats, e.g. after an external regeneration.
    pub fn set_stats(&mut self, stats: Stats) {
        self.stats = Some(stats);
    }

    pub fn set_protect_list(&mut self, list: UidSet) {
        self.protect_list = list;
    }

    pub fn set_overwrite_list(&mut self, list: UidSet) {
        self.overwrite_list = list;
    }
}
