//! Finder and checker: run the matchers, validate proposals, and decide
//! whether a candidate is better than an existing program.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::core::number::Number;
use crate::core::sequence::Sequence;
use crate::core::uid::Uid;
use crate::eval::evaluator::{Evaluator, Status};
use crate::eval::range::{Range, RangeGenerator};
use crate::lang::analyzer;
use crate::lang::embedded;
use crate::lang::program::{OpType, Operand, Program};
use crate::lang::util;
use crate::mine::config::MatcherConfig;
use crate::mine::matcher::{self, Matcher, SeqPrograms};
use crate::opt::minimizer::Minimizer;
use crate::opt::optimizer::Optimizer;
use crate::seq;
use crate::seq::index::SequenceIndex;
use crate::seq::lists;
use crate::seq::managed::ManagedSequence;
use crate::sys::lock::FolderLock;
use crate::sys::setup::Settings;
use crate::sys::{self, log, setup};

/// Multiplicative slack a candidate must clear to count as better/faster;
/// suppresses churn from near-equal programs.
const THRESHOLD_BETTER: f64 = 1.1;
const THRESHOLD_FASTER: f64 = 1.1;

/// Largest memory cell considered when sweeping per-cell sequences.
const MAX_SWEEP_CELL: i64 = 100;

const INVALID_MATCH_FLUSH: Duration = Duration::from_secs(30 * 60);

/// Result of a program check; an empty status means rejection.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    pub status: String,
    pub program: Program,
}

impl CheckResult {
    pub fn is_accepted(&self) -> bool {
        !self.status.is_empty()
    }
}

pub struct Finder {
    settings: Settings,
    evaluator: Evaluator,
    minimizer: Minimizer,
    optimizer: Optimizer,
    matchers: Vec<Box<dyn Matcher>>,
    invalid_matches: BTreeMap<Uid, i64>,
    num_find_attempts: usize,
    last_flush: Instant,
}

/// Number of matching terms a stored program must reproduce.
pub fn num_required_terms(_p: &Program) -> i64 {
    seq::DEFAULT_SEQ_LENGTH as i64
}

pub fn num_check_terms(full_check: bool) -> usize {
    if full_check {
        seq::FULL_SEQ_LENGTH
    } else {
        seq::EXTENDED_SEQ_LENGTH
    }
}

impl Finder {
    pub fn new(settings: Settings, matcher_configs: &[MatcherConfig]) -> Self {
        let mut matchers = Vec::new();
        for config in matcher_configs {
            match matcher::create_matcher(
                &config.matcher_type,
                config.backoff,
                settings.max_memory,
            ) {
                Some(m) => matchers.push(m),
                None => log::warn(&format!(
                    "Ignoring unknown matcher type '{}'",
                    config.matcher_type
                )),
            }
        }
        if matchers.is_empty() {
            log::warn("No matchers configured");
        }
        Finder {
            evaluator: Evaluator::with_modes(settings.clone(), true, true),
            minimizer: Minimizer::new(settings.clone()),
            optimizer: Optimizer::new(settings.max_memory),
            settings,
            matchers,
            invalid_matches: BTreeMap::new(),
            num_find_attempts: 0,
            last_flush: Instant::now(),
        }
    }

    pub fn evaluator(&mut self) -> &mut Evaluator {
        &mut self.evaluator
    }

    pub fn insert(&mut self, norm_seq: &Sequence, id: Uid) {
        for m in &mut self.matchers {
            m.insert(norm_seq, id);
        }
    }

    pub fn remove(&mut self, norm_seq: &Sequence, id: Uid) {
        for m in &mut self.matchers {
            m.remove(norm_seq, id);
        }
    }

    /// Evaluate the candidate and propose matched target programs. Every
    /// proposal has been validated against the target's known terms.
    pub fn find_sequence(
        &mut self,
        p: &Program,
        index: &mut SequenceIndex,
    ) -> (Sequence, SeqPrograms) {
        // refresh the memory probe for the matchers now and then
        if self.num_find_attempts % 1000 == 0 {
            let has_memory = setup::has_memory();
            for m in &mut self.matchers {
                m.set_has_memory(has_memory);
            }
        }
        self.num_find_attempts += 1;

        // determine how many cells to sweep
        let mut max_index = 20i64;
        if let Some((_, largest)) = util::used_memory_cells(p, self.settings.max_memory) {
            if largest <= MAX_SWEEP_CELL {
                max_index = largest;
            }
        }

        let num_cells = (max_index + 1).max(2) as usize;
        let seqs = match self
            .evaluator
            .eval_all_cells(p, num_cells, self.settings.num_terms)
        {
            Ok(seqs) => seqs,
            Err(_) => return (Sequence::new(), SeqPrograms::new()),
        };
        let norm_seq = seqs[Program::OUTPUT_CELL as usize].clone();

        let mut result = SeqPrograms::new();
        let mut with_mov = p.clone();
        with_mov.push(
            OpType::Mov,
            Operand::Direct(Program::OUTPUT_CELL),
            Operand::Direct(0),
        );
        for (cell, cell_seq) in seqs.iter().enumerate() {
            if cell as i64 == Program::OUTPUT_CELL {
                self.find_all(p, cell_seq, index, &mut result);
            } else {
                if let Some(last) = with_mov.ops.last_mut() {
                    last.source = Operand::Direct(cell as i64);
                }
                self.find_all(&with_mov, cell_seq, index, &mut result);
            }
        }
        (norm_seq, result)
    }

    fn find_all(
        &mut self,
        p: &Program,
        norm_seq: &Sequence,
        index: &mut SequenceIndex,
        result: &mut SeqPrograms,
    ) {
        let mut last: Option<(Uid, Program)> = None;
        for i in 0..self.matchers.len() {
            let mut proposals = SeqPrograms::new();
            self.matchers[i].match_candidate(p, norm_seq, &mut proposals);
            for (id, candidate) in proposals {
                if sys::halt_requested() {
                    return;
                }
                if last.as_ref() == Some(&(id, candidate.clone())) {
                    continue;
                }
                last = Some((id, candidate.clone()));
                let Some(target) = index.get_mut(id) else {
                    continue;
                };
                let expected = target.get_terms(target.existing_num_terms() as i64);
                let num_required = num_required_terms(&candidate);
                let (status, _) = self.evaluator.check(&candidate, &expected, num_required, id);
                if status == Status::Error {
                    self.notify_invalid_match(id);
                } else {
                    result.push((id, candidate));
                }
            }
        }
    }

    /// Record a failed proposal; drives the matcher backoff and the
    /// on-disk invalid-match counters.
    pub fn notify_invalid_match(&mut self, id: Uid) {
        *self.invalid_matches.entry(id).or_insert(0) += 1;
        for m in &mut self.matchers {
            m.notify_invalid_match(id);
        }
        if self.last_flush.elapsed() >= INVALID_MATCH_FLUSH {
            self.last_flush = Instant::now();
            self.flush_invalid_matches();
        }
    }

    pub fn flush_invalid_matches(&mut self) {
        if self.invalid_matches.is_empty() {
            return;
        }
        log::debug(&format!(
            "Saving {} invalid match counters",
            self.invalid_matches.len()
        ));
        let lists_home = setup::lists_home();
        match FolderLock::acquire(&lists_home) {
            Ok(_lock) => {
                let path = lists_home.join(lists::INVALID_MATCHES_FILE);
                if let Err(e) = lists::merge_map(&path, &self.invalid_matches) {
                    log::warn(&format!("Cannot save invalid matches: {}", e));
                } else {
                    self.invalid_matches.clear();
                }
            }
            Err(e) => log::warn(&format!("Cannot lock lists directory: {}", e)),
        }
    }

    pub fn log_summary(&self) {
        let ratios: Vec<String> = self
            .matchers
            .iter()
            .map(|m| format!("{}: {:.1}%", m.name(), m.compaction_ratio() * 100.0))
            .collect();
        log::debug(&format!("Matcher compaction ratios: {}", ratios.join(", ")));
    }

    // ------------------------------------------------------------------
    // Program checks
    // ------------------------------------------------------------------

    /// Fast validation: metadata checks plus evaluation on the required
    /// prefix. Used by trusted (server-side) updates.
    #[allow(clippy::too_many_arguments)]
    pub fn check_program_basic(
        &mut self,
        program: &Program,
        existing: &Program,
        is_new: bool,
        seq: &mut ManagedSequence,
        change_type: &str,
        previous_hash: u64,
        expected_hash: u64,
        full_check: bool,
        num_usages: i64,
    ) -> CheckResult {
        const FIRST: &str = "Found";
        if !is_new {
            if change_type == FIRST {
                log::debug(&format!(
                    "Skipping update of {} because the program is not new",
                    seq.id
                ));
                return CheckResult::default();
            }
            if change_type.is_empty() || previous_hash == 0 {
                log::debug("Falling back to extended validation due to missing metadata");
                return self.check_program_extended(
                    program, existing, is_new, seq, full_check, num_usages,
                );
            }
            if previous_hash != expected_hash {
                log::debug(&format!(
                    "Skipping update of {} because of a hash mismatch",
                    seq.id
                ));
                return CheckResult::default();
            }
        }
        let num_required = num_required_terms(program);
        let terms = seq.get_terms(num_required);
        let (status, _) = self.evaluator.check(program, &terms, num_required, seq.id);
        if status == Status::Error {
            self.notify_invalid_match(seq.id);
            return CheckResult::default();
        }
        CheckResult {
            status: if is_new {
                FIRST.to_string()
            } else {
                change_type.to_string()
            },
            program: program.clone(),
        }
    }

    /// Full validation: extended prefix check, unfolding, minimization,
    /// re-validation, and the better-than-existing comparison.
    pub fn check_program_extended(
        &mut self,
        program: &Program,
        existing: &Program,
        is_new: bool,
        seq: &mut ManagedSequence,
        full_check: bool,
        num_usages: i64,
    ) -> CheckResult {
        let num_check = num_check_terms(full_check);
        let mut num_required = num_required_terms(program);
        let extended_seq = seq.get_terms(num_check as i64);

        // a sound output range that excludes known terms rules the
        // candidate out without running it
        let input_range = Range::new(
            Some(Number::Small(program.offset())),
            Some(Number::Small(
                program.offset().saturating_add(extended_seq.len() as i64),
            )),
        );
        let output_range = RangeGenerator::output_range(program, &input_range);
        if output_range.check_sequence(&extended_seq) < extended_seq.len() {
            self.notify_invalid_match(seq.id);
            return CheckResult::default();
        }

        let (check_vanilla, _) = self
            .evaluator
            .check(program, &extended_seq, num_required, seq.id);
        if check_vanilla == Status::Error {
            self.notify_invalid_match(seq.id);
            return CheckResult::default();
        }

        let mut result = CheckResult {
            status: String::new(),
            program: program.clone(),
        };

        // simplify: inline calls, then minimize on the required prefix
        let mut minimized = program.clone();
        embedded::auto_unfold(&mut minimized);
        self.minimizer
            .optimize_and_minimize(&mut minimized, num_required as usize);
        if minimized != result.program {
            num_required = num_required_terms(&minimized);
            let (check_minimized, _) =
                self.evaluator
                    .check(&minimized, &extended_seq, num_required, seq.id);
            if check_minimized == Status::Error {
                if check_vanilla == Status::Ok {
                    self.notify_unfold_or_minimize_problem(&result.program, seq.id);
                }
                return CheckResult::default();
            }
        }
        result.program = minimized;

        if is_new {
            result.status = "Found".to_string();
        } else {
            result.status =
                self.is_optimized_better(existing, &result.program, seq, full_check, num_usages);
        }
        if result.status.is_empty() {
            result.program.ops.clear();
        }
        result
    }

    fn notify_unfold_or_minimize_problem(&self, p: &Program, id: Uid) {
        log::warn(&format!(
            "Program for {} generates wrong result after unfold/minimize",
            id
        ));
        let dir = setup::debug_home().join("minimizer");
        if std::fs::create_dir_all(&dir).is_ok() {
            let path = dir.join(format!("{}.asm", id));
            let _ = std::fs::write(path, crate::lang::printer::print_program(p));
        }
    }

    /// Decide whether the optimized candidate should replace the existing
    /// program. Returns the change label, or an empty string for "no".
    pub fn is_optimized_better(
        &mut self,
        existing: &Program,
        optimized: &Program,
        seq: &mut ManagedSequence,
        full_check: bool,
        num_usages: i64,
    ) -> String {
        const NOT_BETTER: &str = "";

        // reject illegal recursions outright
        for op in &optimized.ops {
            if op.typ == OpType::Seq {
                match op.source.as_constant() {
                    Some(n) if *n != Number::Small(seq.id.to_int()) => {}
                    _ => return NOT_BETTER.to_string(),
                }
            }
        }

        let mut existing = existing.clone();
        let mut optimized = optimized.clone();
        self.optimizer.remove_nops(&mut existing);
        self.optimizer.remove_nops(&mut optimized);

        if optimized.ops.is_empty() {
            return NOT_BETTER.to_string();
        }
        if optimized == existing {
            return NOT_BETTER.to_string();
        }

        if is_simpler(&existing, &optimized) {
            return "Simpler".to_string();
        } else if is_simpler(&optimized, &existing) {
            return NOT_BETTER.to_string();
        }

        if is_better_log_eval(&existing, &optimized) {
            return "Faster (log)".to_string();
        } else if is_better_log_eval(&optimized, &existing) {
            return NOT_BETTER.to_string();
        }

        // incremental evaluation only matters for rarely used targets
        if !full_check && num_usages < 5 {
            if self.is_better_inc_eval(&existing, &optimized) {
                return "Faster (IE)".to_string();
            } else if self.is_better_inc_eval(&optimized, &existing) {
                return NOT_BETTER.to_string();
            }
        }

        // evaluation comparison on an extended prefix
        let num_check = num_check_terms(full_check);
        let terms = seq.get_terms(num_check as i64);
        if terms.is_empty() {
            log::error(&format!("Cannot fetch terms for {}", seq.id));
            return NOT_BETTER.to_string();
        }
        // evaluate beyond the known terms to expose cheating tails
        let num_check = num_check.min(terms.len()).max(seq::EXTENDED_SEQ_LENGTH);

        self.evaluator.clear_caches();
        let (produced, optimized_steps) = self.evaluator.eval_partial(&optimized, num_check);
        if sys::halt_requested() {
            return NOT_BETTER.to_string();
        }

        // a sequence that starts decreasing or goes flat only past the
        // known terms is a fake
        let known = terms.len();
        let first_decreasing = produced.first_delta_lt(&Number::ZERO);
        let first_non_increasing = produced.first_delta_lt(&Number::ONE);
        if (first_decreasing < produced.len() && first_decreasing >= known)
            || (first_non_increasing < produced.len() && first_non_increasing >= known)
        {
            return NOT_BETTER.to_string();
        }

        self.evaluator.clear_caches();
        let (_, existing_steps) = self.evaluator.eval_partial(&existing, num_check);
        if sys::halt_requested() {
            return NOT_BETTER.to_string();
        }

        // more correct terms wins
        if optimized_steps.runs as f64 > existing_steps.runs as f64 * THRESHOLD_BETTER {
            return "Better".to_string();
        } else if existing_steps.runs > optimized_steps.runs {
            return NOT_BETTER.to_string();
        }

        // fewer execution steps wins
        if existing_steps.total as f64 > optimized_steps.total as f64 * THRESHOLD_FASTER {
            return "Faster".to_string();
        } else if optimized_steps.total > existing_steps.total {
            return NOT_BETTER.to_string();
        }

        NOT_BETTER.to_string()
    }

    fn is_better_inc_eval(&mut self, existing: &Program, optimized: &Program) -> bool {
        // programs without loops or calls are fast enough already
        if !util::has_op(existing, OpType::Lpb) && !util::has_op(existing, OpType::Seq) {
            return false;
        }
        if util::has_op(optimized, OpType::Seq) {
            return false;
        }
        !self.evaluator.supports_inc_eval(existing) && self.evaluator.supports_inc_eval(optimized)
    }
}

fn has_bad_constant(p: &Program) -> bool {
    util::all_constants(p).iter().any(|c| {
        Minimizer::power_base(c) != 0 || *c > Number::Small(100_000)
    })
}

fn has_bad_loop(p: &Program) -> bool {
    p.ops.iter().any(|op| {
        op.typ == OpType::Lpb && op.source != Operand::constant(1)
    })
}

fn has_constant_loop(p: &Program) -> bool {
    // a loop whose counter is initialized with a constant right before
    let mut previous: Option<&crate::lang::program::Operation> = None;
    for op in &p.ops {
        if op.typ == OpType::Lpb {
            if let Some(prev) = previous {
                if prev.typ == OpType::Mov
                    && prev.target == op.target
                    && prev.source.is_constant()
                {
                    return true;
                }
            }
        }
        previous = Some(op);
    }
    false
}

fn is_simpler(existing: &Program, optimized: &Program) -> bool {
    let optimized_has_seq = util::has_op(optimized, OpType::Seq);
    if optimized_has_seq {
        return false;
    }
    if has_bad_constant(existing) && !has_bad_constant(optimized) {
        return true;
    }
    if has_bad_loop(existing) && !has_bad_loop(optimized) {
        return true;
    }
    if has_constant_loop(existing) && !has_constant_loop(optimized) {
        return true;
    }
    if util::has_indirect(existing) && !util::has_indirect(optimized) {
        return true;
    }
    false
}

fn is_better_log_eval(existing: &Program, optimized: &Program) -> bool {
    util::has_op(existing, OpType::Lpb)
        && !analyzer::has_logarithmic_complexity(existing)
        && analyzer::has_logarithmic_complexity(optimized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;

    fn managed(id: &str, terms: &[i64]) -> ManagedSequence {
        ManagedSequence::new(
            id.parse().expect("valid uid"),
            "test",
            Sequence::from_i64(terms),
        )
    }

    fn finder() -> Finder {
        let configs = vec![
            MatcherConfig {
                matcher_type: "direct".to_string(),
                backoff: false,
            },
            MatcherConfig {
                matcher_type: "linear1".to_string(),
                backoff: false,
            },
        ];
        let mut settings = Settings::default();
        settings.num_terms = 8;
        Finder::new(settings, &configs)
    }

    #[test]
    fn finds_linear_match() {
        let mut f = finder();
        let mut index = SequenceIndex::new();
        // target: 2n+2
        let target = managed("T000001", &[2, 4, 6, 8, 10, 12, 14, 16]);
        let norm = Sequence::from_i64(&[2, 4, 6, 8, 10, 12, 14, 16]);
        index.add(target);
        f.insert(&norm, "T000001".parse().expect("valid"));
        let candidate = parse_program("mov $0,$0\n").expect("valid");
        let (norm_seq, matches) = f.find_sequence(&candidate, &mut index);
        assert_eq!(norm_seq.len(), 8);
        assert!(!matches.is_empty());
        let (id, program) = &matches[0];
        assert_eq!(id.to_string(), "T000001");
        let mut evaluator = Evaluator::new(Settings::default());
        let (seq, _) = evaluator.eval(program, 8).expect("evaluates");
        assert_eq!(seq, Sequence::from_i64(&[2, 4, 6, 8, 10, 12, 14, 16]));
    }

    #[test]
    fn simpler_prefers_small_constants() {
        let with_big = parse_program("gcd $0,1024\n").expect("valid");
        let without = parse_program("mod $0,7\n").expect("valid");
        assert!(is_simpler(&with_big, &without));
        assert!(!is_simpler(&without, &with_big));
    }

    #[test]
    fn simpler_prefers_plain_loops() {
        let bad_loop = parse_program("lpb $0,2\n  sub $0,1\nlpe\n").expect("valid");
        let good_loop = parse_program("lpb $0\n  sub $0,1\nlpe\n").expect("valid");
        assert!(is_simpler(&bad_loop, &good_loop));
    }

    #[test]
    fn log_complexity_wins() {
        let linear = parse_program("lpb $0\n  sub $0,1\n  add $1,1\nlpe\nmov $0,$1\n")
            .expect("valid");
        let logarithmic =
            parse_program("lpb $0\n  div $0,2\n  add $1,1\nlpe\nmov $0,$1\n").expect("valid");
        assert!(is_better_log_eval(&linear, &logarithmic));
        assert!(!is_better_log_eval(&logarithmic, &linear));
    }

    #[test]
    fn equal_programs_are_not_better() {
        let mut f = finder();
        let p = parse_program("add $0,1\n").expect("valid");
        let mut seq = managed("T000009", &[1, 2, 3, 4, 5, 6, 7, 8]);
        let label = f.is_optimized_better(&p, &p, &mut seq, false, 0);
        assert!(label.is_empty());
    }

    #[test]
    fn self_referencing_candidates_are_rejected() {
        let mut f = finder();
        let existing = parse_program("add $0,1\n").expect("valid");
        let candidate = parse_program("seq $0,79\n").expect("valid");
        // T000079 packed id equals the seq operand
        let id: Uid = "T000079".parse().expect("valid");
        let mut seq = ManagedSequence::new(id, "t", Sequence::from_i64(&[1, 2, 3]));
        let candidate = {
            let mut c = candidate;
            c.ops[0].source = Operand::Constant(Number::Small(id.to_int()));
            c
        };
        let label = f.is_optimized_better(&existing, &candidate, &mut seq, false, 0);
        assert!(label.is_empty());
    }
}
