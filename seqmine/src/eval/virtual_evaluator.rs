//! Virtual evaluator: refactors embedded sequence programs into cached
//! calls before delegating to the interpreter.
//!
//! Extracted programs are registered in the interpreter's program cache
//! under fresh ids in the `V` domain, with a step-count overhead that
//! compensates for the operations removed from or added to the host
//! program, so that evaluation cost stays comparable.

use crate::core::memory::Memory;
use crate::core::number::Number;
use crate::core::uid::Uid;
use crate::errors::EvalError;
use crate::eval::interpreter::Interpreter;
use crate::lang::embedded::{self, EmbeddedSeq};
use crate::lang::program::{OpType, Operand, Operation, Program};
use crate::lang::util;
use crate::sys::log;
use crate::sys::setup::Settings;

const MAX_EMBEDDED_PROGRAMS: usize = 10;

pub struct VirtualEvaluator {
    interpreter: Interpreter,
    refactored: Option<Program>,
}

impl VirtualEvaluator {
    pub fn new(settings: Settings) -> Self {
        VirtualEvaluator {
            interpreter: Interpreter::new(settings),
            refactored: None,
        }
    }

    pub fn reset(&mut self) {
        self.refactored = None;
        self.interpreter.clear_caches();
    }

    pub fn is_initialized(&self) -> bool {
        self.refactored.is_some()
    }

    pub fn refactored(&self) -> Option<&Program> {
        self.refactored.as_ref()
    }

    /// Extract embedded sequence programs into cache entries. Returns true
    /// if at least one program was extracted.
    pub fn init(&mut self, p: &Program) -> bool {
        self.interpreter.clear_caches();
        let mut refactored = p.clone();
        let mut next_id = Uid::new('V', Uid::MAX_NUMBER).expect("valid id");
        let mut num_extracted = 0;
        for _ in 0..MAX_EMBEDDED_PROGRAMS {
            let found = embedded::find_embedded_seq_programs(&refactored, 3, 1, 1);
            let Some(info) = found.first().copied() else {
                break;
            };
            let overhead = extract_embedded(&mut refactored, next_id, &info);
            let extracted = overhead.1;
            self.interpreter.cache.insert(next_id.to_int(), extracted);
            self.interpreter
                .cache
                .set_overhead(next_id.to_int(), overhead.0);
            next_id = Uid::new('V', next_id.number() - 1).expect("valid id");
            num_extracted += 1;
        }
        if num_extracted > 0 {
            if log::get_level() == log::Level::Debug {
                log::debug(&format!(
                    "Initialized virtual evaluator with {} embedded program(s)",
                    num_extracted
                ));
            }
            self.refactored = Some(refactored);
            true
        } else {
            self.refactored = None;
            false
        }
    }

    /// Evaluate the refactored program for one input.
    pub fn eval(&mut self, input: &Number) -> Result<(Number, i64), EvalError> {
        let program = self
            .refactored
            .clone()
            .ok_or_else(|| EvalError::Internal("virtual evaluator not initialized".into()))?;
        let mut mem = Memory::new();
        mem.set(Program::INPUT_CELL, input.clone());
        let steps = self.interpreter.run(&program, &mut mem)?;
        Ok((mem.get(Program::OUTPUT_CELL), steps))
    }
}

// replace the embedded range with a seq call; returns the step overhead and
// the extracted program
fn extract_embedded(host: &mut Program, id: Uid, info: &EmbeddedSeq) -> (i64, Program) {
    let mut overhead = 0i64;
    let mut extracted = Program::new();
    extracted.ops = host.ops[info.start..=info.end].to_vec();

    // the extracted program must read its input from the canonical input
    // cell and leave its result in the canonical output cell; the swap can
    // relocate the output when it collides with a swapped cell
    util::swap_direct_cells(&mut extracted, info.input_cell, Program::INPUT_CELL);
    let output_cell = if info.output_cell == info.input_cell {
        Program::INPUT_CELL
    } else if info.output_cell == Program::INPUT_CELL {
        info.input_cell
    } else {
        info.output_cell
    };
    if output_cell != Program::OUTPUT_CELL {
        extracted.push(
            OpType::Mov,
            Operand::Direct(Program::OUTPUT_CELL),
            Operand::Direct(output_cell),
        );
        overhead -= 1;
    }

    // replace the range in the host with (mov +) seq
    let mut replacement = Vec::new();
    if info.input_cell != info.output_cell {
        replacement.push(Operation::new(
            OpType::Mov,
            Operand::Direct(info.output_cell),
            Operand::Direct(info.input_cell),
        ));
        overhead -= 1;
    }
    replacement.push(Operation::new(
        OpType::Seq,
        Operand::Direct(info.output_cell),
        Operand::Constant(Number::Small(id.to_int())),
    ));
    overhead -= 1;
    host.ops.splice(info.start..=info.end, replacement);
    (overhead, extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluator::Evaluator;
    use crate::lang::parser::parse_program;

    const HOST: &str = "lpb $0\n  sub $0,1\n  mov $2,$1\n  mov $3,0\n  lpb $2\n    sub $2,1\n    add $3,2\n  lpe\n  add $3,1\n  mov $1,$3\nlpe\nmov $0,$1\n";

    #[test]
    fn extracts_and_matches_regular_evaluation() {
        let p = parse_program(HOST).expect("valid program");
        let mut ve = VirtualEvaluator::new(Settings::default());
        assert!(ve.init(&p));
        let refactored = ve.refactored().expect("initialized").clone();
        assert!(util::has_op(&refactored, OpType::Seq));
        let mut regular = Evaluator::with_inc_eval(Settings::default(), false);
        let (expected, _) = regular.eval(&p, 8).expect("evaluates");
        for (n, want) in expected.iter().enumerate() {
            let (got, _) = ve.eval(&Number::Small(n as i64)).expect("evaluates");
            assert_eq!(&got, want, "term {}", n);
        }
    }

    #[test]
    fn flat_programs_are_not_refactored() {
        let p = parse_program("add $0,3\nmul $0,2\n").expect("valid program");
        let mut ve = VirtualEvaluator::new(Settings::default());
        assert!(!ve.init(&p));
    }
}
