//! Incremental evaluator for simple-loop programs.
//!
//! For an eligible program the loop body is executed only for the
//! iterations the new term adds on top of the previous one, instead of
//! recomputing the whole loop from scratch. Eligibility is decided by
//! static analysis; the computed terms and reported step counts are
//! identical to regular interpretation.

use std::collections::BTreeSet;

use crate::core::memory::Memory;
use crate::core::number::Number;
use crate::errors::EvalError;
use crate::eval::interpreter::Interpreter;
use crate::lang::analyzer::{self, SimpleLoop};
use crate::lang::program::{OpType, Operand, Program};
use crate::sys::setup::Settings;

#[derive(Debug, Clone)]
struct Plan {
    simple_loop: SimpleLoop,
    offset: i64,
    output_cells: BTreeSet<i64>,
    stateful_cells: BTreeSet<i64>,
    input_dependent_cells: BTreeSet<i64>,
    loop_counter_dependent_cells: BTreeSet<i64>,
    loop_counter_decrement: i64,
}

pub struct IncrementalEvaluator {
    interpreter: Interpreter,
    plan: Option<Plan>,
    // runtime state
    argument: i64,
    previous_count: i64,
    total_body_steps: i64,
    loop_state: Memory,
    first_call: bool,
}

impl IncrementalEvaluator {
    pub fn new(settings: Settings) -> Self {
        IncrementalEvaluator {
            interpreter: Interpreter::new(settings),
            plan: None,
            argument: 0,
            previous_count: 0,
            total_body_steps: 0,
            loop_state: Memory::new(),
            first_call: true,
        }
    }

    pub fn reset(&mut self) {
        self.plan = None;
        self.argument = 0;
        self.previous_count = 0;
        self.total_body_steps = 0;
        self.loop_state.clear();
        self.first_call = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.plan.is_some()
    }

    pub fn output_cells(&self) -> Option<&BTreeSet<i64>> {
        self.plan.as_ref().map(|p| &p.output_cells)
    }

    pub fn stateful_cells(&self) -> Option<&BTreeSet<i64>> {
        self.plan.as_ref().map(|p| &p.stateful_cells)
    }

    pub fn input_dependent_cells(&self) -> Option<&BTreeSet<i64>> {
        self.plan.as_ref().map(|p| &p.input_dependent_cells)
    }

    pub fn loop_counter_dependent_cells(&self) -> Option<&BTreeSet<i64>> {
        self.plan.as_ref().map(|p| &p.loop_counter_dependent_cells)
    }

    /// Analyze the program. Incremental evaluation is available only when
    /// this returns true.
    pub fn init(&mut self, program: &Program) -> bool {
        self.reset();
        let Some(simple_loop) = analyzer::extract_simple_loop(program) else {
            return false;
        };
        if simple_loop.counter != Program::INPUT_CELL {
            return false;
        }
        if !check_pre_loop(&simple_loop.pre_loop) {
            return false;
        }
        let Some(body_facts) = check_loop_body(&simple_loop) else {
            return false;
        };
        let Some(output_cells) = check_post_loop(&simple_loop.post_loop) else {
            return false;
        };
        let input_dependent_cells = compute_input_dependent_cells(&simple_loop.pre_loop);
        self.plan = Some(Plan {
            offset: program.offset(),
            output_cells,
            stateful_cells: body_facts.stateful_cells,
            input_dependent_cells,
            loop_counter_dependent_cells: body_facts.counter_dependent_cells,
            loop_counter_decrement: body_facts.decrement,
            simple_loop,
        });
        true
    }

    /// Compute the next term together with the exact step count a regular
    /// interpretation of this term would have used.
    pub fn next(&mut self) -> Result<(Number, i64), EvalError> {
        let plan = self
            .plan
            .clone()
            .ok_or_else(|| EvalError::Internal("incremental evaluator not initialized".into()))?;
        let counter = plan.simple_loop.counter;

        // run the pre-loop for the current argument
        let input = self
            .argument
            .checked_add(plan.offset)
            .ok_or_else(|| EvalError::Internal("argument overflow".into()))?;
        let mut tmp_state = Memory::new();
        tmp_state.set(Program::INPUT_CELL, Number::Small(input));
        let pre_steps = self
            .interpreter
            .run(&plan.simple_loop.pre_loop, &mut tmp_state)?;

        // determine how many loop iterations the new term adds
        let max_cycles = self.interpreter.settings().max_cycles;
        let new_count = tmp_state
            .get(counter)
            .to_i64()
            .ok_or(EvalError::CycleLimit(max_cycles))?;
        if new_count < self.previous_count {
            return Err(EvalError::Internal("loop count decreased".into()));
        }
        let additional = (new_count - self.previous_count) / plan.loop_counter_decrement;

        if self.first_call {
            self.loop_state = tmp_state.clone();
        } else {
            self.loop_state.set(counter, Number::Small(new_count));
        }

        // catch up on the added iterations; the accumulated body cost is
        // part of this term's from-scratch cost, so the budget applies
        for _ in 0..additional {
            self.total_body_steps += self
                .interpreter
                .run(&plan.simple_loop.body, &mut self.loop_state)?;
            if max_cycles >= 0 && self.total_body_steps > max_cycles {
                return Err(EvalError::CycleLimit(max_cycles));
            }
        }
        self.previous_count = new_count;

        // the regular interpreter executes one extra iteration and then
        // rolls it back; replay it on a scratch copy for its exact cost
        let final_count = new_count.min(0);
        let mut scratch = self.loop_state.clone();
        scratch.set(counter, Number::Small(final_count));
        let rollback_steps = self.interpreter.run(&plan.simple_loop.body, &mut scratch)?;

        // run the post-loop on a copy of the accumulated state
        tmp_state = self.loop_state.clone();
        tmp_state.set(counter, Number::Small(final_count));
        let post_steps = self
            .interpreter
            .run(&plan.simple_loop.post_loop, &mut tmp_state)?;

        let kept_iterations = new_count.max(0) / plan.loop_counter_decrement;
        let steps = pre_steps
            + 1 // loop begin
            + self.total_body_steps
            + kept_iterations // one loop-end check per kept iteration
            + rollback_steps
            + 1 // loop-end check of the undone iteration
            + post_steps;
        if max_cycles >= 0 && steps > max_cycles {
            return Err(EvalError::CycleLimit(max_cycles));
        }

        self.argument += 1;
        self.first_call = false;
        Ok((tmp_state.get(Program::OUTPUT_CELL), steps))
    }
}

// ---------------------------------------------------------------------------
// Eligibility predicates
// ---------------------------------------------------------------------------

// The pre-loop may only move/shift/scale by constants; scaling must not flip
// signs. Together with the argument growing by one per term, this keeps the
// loop count monotonically non-decreasing across terms.
fn check_pre_loop(pre_loop: &Program) -> bool {
    for op in &pre_loop.ops {
        if !matches!(op.target, Operand::Direct(_)) {
            return false;
        }
        match op.typ {
            OpType::Mov | OpType::Add | OpType::Sub | OpType::Trn => {
                if !op.source.is_constant() {
                    return false;
                }
            }
            OpType::Mul | OpType::Div => match op.source.as_constant() {
                Some(n) if !n.is_negative() => {}
                _ => return false,
            },
            _ => return false,
        }
    }
    true
}

struct BodyFacts {
    stateful_cells: BTreeSet<i64>,
    counter_dependent_cells: BTreeSet<i64>,
    decrement: i64,
}

fn is_supported_loop_op(typ: OpType) -> bool {
    typ == OpType::Mov || typ == OpType::Seq || typ == OpType::Dbg || typ.metadata().is_arithmetic
}

fn check_loop_body(simple_loop: &SimpleLoop) -> Option<BodyFacts> {
    let body = &simple_loop.body;
    let counter = simple_loop.counter;

    // the counter must be decremented exactly once, by one
    let mut decrements = 0;
    for op in &body.ops {
        if !is_supported_loop_op(op.typ) {
            return None;
        }
        if op.target.as_direct() == Some(counter) {
            if (op.typ == OpType::Sub || op.typ == OpType::Trn)
                && op.source == Operand::constant(1)
            {
                decrements += 1;
            } else {
                return None;
            }
        }
    }
    if decrements != 1 {
        return None;
    }

    let stateful_cells = compute_stateful_cells(body, counter);
    let counter_dependent_cells = compute_counter_dependent_cells(body, counter);

    // updates of stateful cells must be interchangeable between iterations
    let mut all_commutative = true;
    for &cell in &stateful_cells {
        let mut update_type: Option<OpType> = None;
        for op in &body.ops {
            if op.target.as_direct() != Some(cell) {
                continue;
            }
            if !op.typ.metadata().is_commutative {
                all_commutative = false;
            }
            match update_type {
                None => update_type = Some(op.typ),
                Some(t) if t == op.typ => {}
                Some(_) => all_commutative = false,
            }
        }
    }
    // any order-sensitive write makes the incremental iteration order
    // observable, so such bodies must not touch counter-derived state
    let any_non_commutative = body.ops.iter().any(|op| {
        let meta = op.typ.metadata();
        meta.writes_target
            && op.target.as_direct() != Some(counter)
            && !meta.is_commutative
    });
    if stateful_cells.len() > 1 && !all_commutative {
        return None;
    }
    if stateful_cells.len() > 1 || any_non_commutative {
        if body.ops.iter().any(|op| op.typ == OpType::Seq) {
            return None;
        }
        if !counter_dependent_cells.is_empty() {
            return None;
        }
    }

    Some(BodyFacts {
        stateful_cells,
        counter_dependent_cells,
        decrement: 1,
    })
}

// cells read before they are written in the body, the counter excluded
fn compute_stateful_cells(body: &Program, counter: i64) -> BTreeSet<i64> {
    let mut written: BTreeSet<i64> = BTreeSet::new();
    let mut stateful = BTreeSet::new();
    for op in &body.ops {
        let meta = op.typ.metadata();
        if let Some(c) = op.source.as_direct() {
            if c != counter && !written.contains(&c) {
                stateful.insert(c);
            }
        }
        if let Some(c) = op.target.as_direct() {
            if meta.reads_target && c != counter && !written.contains(&c) {
                stateful.insert(c);
            }
            if meta.writes_target {
                written.insert(c);
            }
        }
    }
    stateful
}

// fixed point of "written from something that depends on the counter";
// the counter itself is not part of the result
fn compute_counter_dependent_cells(body: &Program, counter: i64) -> BTreeSet<i64> {
    let mut dependent: BTreeSet<i64> = BTreeSet::new();
    loop {
        let mut changed = false;
        for op in &body.ops {
            let meta = op.typ.metadata();
            if !meta.writes_target {
                continue;
            }
            let Some(target) = op.target.as_direct() else {
                continue;
            };
            if target == counter || dependent.contains(&target) {
                continue;
            }
            let source_dep = match op.source.as_direct() {
                Some(c) => c == counter || dependent.contains(&c),
                None => false,
            };
            let target_dep = meta.reads_target && dependent.contains(&target);
            if source_dep || target_dep {
                dependent.insert(target);
                changed = true;
            }
        }
        if !changed {
            return dependent;
        }
    }
}

// pre-loop sources are constants, so dependence on the input can only be
// kept or erased, never introduced
fn compute_input_dependent_cells(pre_loop: &Program) -> BTreeSet<i64> {
    let mut dependent: BTreeSet<i64> = BTreeSet::new();
    dependent.insert(Program::INPUT_CELL);
    for op in &pre_loop.ops {
        if let Some(target) = op.target.as_direct() {
            if op.typ == OpType::Mov {
                dependent.remove(&target);
            }
        }
    }
    dependent
}

// the post-loop may not contain loops (guaranteed) or region writes; its
// result cells are everything it reads plus the untouched output cell
fn check_post_loop(post_loop: &Program) -> Option<BTreeSet<i64>> {
    let mut output_cells = BTreeSet::new();
    let mut writes_output = false;
    for op in &post_loop.ops {
        if !is_supported_loop_op(op.typ) {
            return None;
        }
        let meta = op.typ.metadata();
        if let Some(c) = op.source.as_direct() {
            output_cells.insert(c);
        }
        if let Some(c) = op.target.as_direct() {
            if meta.reads_target {
                output_cells.insert(c);
            }
            if meta.writes_target && c == Program::OUTPUT_CELL {
                writes_output = true;
            }
        }
    }
    if !writes_output {
        output_cells.insert(Program::OUTPUT_CELL);
    }
    Some(output_cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::interpreter::Interpreter;
    use crate::lang::parser::parse_program;

    fn regular_term(p: &Program, n: i64) -> (Number, i64) {
        let mut interpreter = Interpreter::new(Settings::default());
        let mut mem = Memory::new();
        mem.set(0, Number::Small(n + p.offset()));
        let steps = interpreter.run(p, &mut mem).expect("program runs");
        (mem.get(0), steps)
    }

    fn assert_incremental_matches(src: &str, num_terms: i64) {
        let p = parse_program(src).expect("valid program");
        let mut ie = IncrementalEvaluator::new(Settings::default());
        assert!(ie.init(&p), "program should support incremental evaluation");
        for n in 0..num_terms {
            let (value, steps) = ie.next().expect("incremental term");
            let (expected_value, expected_steps) = regular_term(&p, n);
            assert_eq!(value, expected_value, "term {}", n);
            assert_eq!(steps, expected_steps, "steps for term {}", n);
        }
    }

    #[test]
    fn counting_loop_matches_regular_evaluation() {
        assert_incremental_matches("lpb $0\n  sub $0,1\n  add $1,1\nlpe\nmov $0,$1\n", 12);
    }

    #[test]
    fn factorial_with_shifted_argument() {
        let src = "mov $1,1\nadd $0,1\nlpb $0\n  mul $1,$0\n  sub $0,1\nlpe\nmov $0,$1\n";
        assert_incremental_matches(src, 7);
    }

    #[test]
    fn summation_with_counter_dependent_update() {
        assert_incremental_matches("lpb $0\n  add $1,$0\n  sub $0,1\nlpe\nmov $0,$1\n", 10);
    }

    #[test]
    fn respects_offset_directive() {
        assert_incremental_matches("#offset 3\nlpb $0\n  sub $0,1\n  add $1,2\nlpe\nmov $0,$1\n", 6);
    }

    #[test]
    fn rejects_non_simple_programs() {
        let mut ie = IncrementalEvaluator::new(Settings::default());
        let no_loop = parse_program("add $0,1\n").expect("valid");
        assert!(!ie.init(&no_loop));
        let two_counters = parse_program("lpb $1\n  sub $1,1\nlpe\n").expect("valid");
        assert!(!ie.init(&two_counters));
        let non_constant_pre = parse_program("mov $1,$0\nlpb $0\n  sub $0,1\nlpe\n").expect("valid");
        assert!(!ie.init(&non_constant_pre));
        let double_decrement =
            parse_program("lpb $0\n  sub $0,1\n  sub $0,1\nlpe\n").expect("valid");
        assert!(!ie.init(&double_decrement));
    }

    #[test]
    fn rejects_non_commutative_counter_dependence() {
        // $1 accumulates with a non-commutative update that reads the counter
        let mut ie = IncrementalEvaluator::new(Settings::default());
        let p = parse_program("lpb $0\n  sub $1,$0\n  sub $0,1\nlpe\nmov $0,$1\n").expect("valid");
        assert!(!ie.init(&p));
    }

    #[test]
    fn rejects_seq_with_multiple_stateful_cells() {
        let mut ie = IncrementalEvaluator::new(Settings::default());
        let p = parse_program(
            "lpb $0\n  sub $0,1\n  sub $1,3\n  sub $2,4\n  seq $3,45\nlpe\nmov $0,$1\n",
        )
        .expect("valid");
        assert!(!ie.init(&p));
    }

    #[test]
    fn rejects_order_sensitive_scratch_writes() {
        // $2 snapshots the counter, so the last executed iteration differs
        // between incremental and regular evaluation
        let mut ie = IncrementalEvaluator::new(Settings::default());
        let p = parse_program("lpb $0\n  mov $2,$0\n  sub $0,1\nlpe\nmov $0,$2\n").expect("valid");
        assert!(!ie.init(&p));
    }

    #[test]
    fn computed_cell_sets() {
        let p = parse_program("lpb $0\n  sub $0,1\n  add $1,$0\nlpe\nmov $2,$1\nmov $0,$2\n")
            .expect("valid");
        let mut ie = IncrementalEvaluator::new(Settings::default());
        assert!(ie.init(&p));
        let stateful = ie.stateful_cells().expect("initialized");
        assert!(stateful.contains(&1));
        let dependent = ie.loop_counter_dependent_cells().expect("initialized");
        assert!(dependent.contains(&1));
        let outputs = ie.output_cells().expect("initialized");
        assert!(outputs.contains(&1) && outputs.contains(&2));
        let inputs = ie.input_dependent_cells().expect("initialized");
        assert!(inputs.contains(&0));
    }
}
