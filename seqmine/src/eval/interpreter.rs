//! Program interpreter.
//!
//! Executes a program against a memory, bounded by a cycle budget, a
//! memory-cell budget, and an optional wall-clock deadline.
//!
//! Loops keep an explicit frame stack. Entering a loop snapshots the memory
//! and the fragment `memory.fragment(counter_cell, region_length)`. At the
//! loop end the fragment is recomputed: the loop continues only while the
//! fragment strictly decreases (values below zero compare as zero). The
//! iteration that fails to decrease is undone by restoring the snapshot
//! taken before it, and an infinite counter value terminates the loop the
//! same way.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::core::memory::Memory;
use crate::core::number::Number;
use crate::core::uid::Uid;
use crate::errors::EvalError;
use crate::lang::program::{OpType, Operand, Operation, Program};
use crate::lang::{parser, semantics};
use crate::sys::{log, setup};
use crate::sys::setup::Settings;

// ---------------------------------------------------------------------------
// Program cache for seq/prg calls
// ---------------------------------------------------------------------------

/// Process-local cache of callable programs, keyed by the integer form of
/// their identifier. Entries are either registered directly (virtual
/// programs) or loaded from the programs directory on first use. A per-id
/// step overhead adjusts the reported cost of calls, e.g. to account for
/// operations saved by extracting an embedded program.
#[derive(Default)]
pub struct ProgramCache {
    programs: HashMap<i64, Program>,
    overheads: HashMap<i64, i64>,
    missing: HashSet<i64>,
}

impl ProgramCache {
    pub fn new() -> Self {
        ProgramCache::default()
    }

    pub fn insert(&mut self, id: i64, program: Program) {
        self.missing.remove(&id);
        self.programs.insert(id, program);
    }

    pub fn set_overhead(&mut self, id: i64, overhead: i64) {
        self.overheads.insert(id, overhead);
    }

    pub fn overhead(&self, id: i64) -> i64 {
        self.overheads.get(&id).copied().unwrap_or(0)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.programs.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.programs.clear();
        self.overheads.clear();
        self.missing.clear();
    }

    fn id_string(id: i64) -> String {
        Uid::from_int(id)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| id.to_string())
    }

    /// Look up a program, loading it from the programs directory on a miss.
    pub fn get(&mut self, id: i64) -> Result<Program, EvalError> {
        if let Some(p) = self.programs.get(&id) {
            return Ok(p.clone());
        }
        if self.missing.contains(&id) {
            return Err(EvalError::UnknownProgram(Self::id_string(id)));
        }
        let uid =
            Uid::from_int(id).map_err(|_| EvalError::UnknownProgram(Self::id_string(id)))?;
        let path = setup::program_path(uid, false);
        match parser::parse_file(&path) {
            Ok(program) => {
                self.programs.insert(id, program.clone());
                Ok(program)
            }
            Err(_) => {
                self.missing.insert(id);
                Err(EvalError::UnknownProgram(Self::id_string(id)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

struct LoopFrame {
    begin_pc: usize,
    prev_memory: Memory,
    prev_fragment: Memory,
}

pub struct Interpreter {
    settings: Settings,
    pub cache: ProgramCache,
    running: HashSet<i64>,
    deadline: Option<Instant>,
}

impl Interpreter {
    const DEADLINE_CHECK_INTERVAL: i64 = 1024;

    pub fn new(settings: Settings) -> Self {
        Interpreter {
            settings,
            cache: ProgramCache::new(),
            running: HashSet::new(),
            deadline: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn clear_caches(&mut self) {
        self.cache.clear();
    }

    /// Execute the program on the given memory; returns the number of
    /// executed operations (including the cost of called sub-programs).
    pub fn run(&mut self, p: &Program, mem: &mut Memory) -> Result<i64, EvalError> {
        let mut steps: i64 = 0;
        let mut processed: i64 = 0;
        let mut pc = 0usize;
        let mut frames: Vec<LoopFrame> = Vec::new();
        while pc < p.ops.len() {
            let op = &p.ops[pc];
            let mut next_pc = pc + 1;
            match op.typ {
                OpType::Nop => {}
                OpType::Dbg => {
                    log::debug(&format!("{}", mem));
                    steps += 1;
                }
                OpType::Lpb => {
                    let counter = self.resolve_address(&op.target, mem)?;
                    let length = self.resolve_value(&op.source, mem)?;
                    frames.push(LoopFrame {
                        begin_pc: pc,
                        prev_memory: mem.clone(),
                        prev_fragment: mem.fragment(counter, length),
                    });
                    steps += 1;
                }
                OpType::Lpe => {
                    let begin_pc = frames
                        .last()
                        .map(|f| f.begin_pc)
                        .ok_or_else(|| EvalError::InvalidProgram("unmatched lpe".into()))?;
                    let lpb = &p.ops[begin_pc];
                    let counter = self.resolve_address(&lpb.target, mem)?;
                    let length = self.resolve_value(&lpb.source, mem)?;
                    steps += 1;
                    if mem.get(counter).is_inf() {
                        let frame = frames.pop().expect("frame checked above");
                        *mem = frame.prev_memory;
                    } else {
                        let fragment = mem.fragment(counter, length);
                        let frame = frames.last_mut().expect("frame checked above");
                        if fragment.is_less_loop(&frame.prev_fragment, length) {
                            next_pc = begin_pc + 1;
                            frame.prev_memory = mem.clone();
                            frame.prev_fragment = fragment;
                        } else {
                            let frame = frames.pop().expect("frame checked above");
                            *mem = frame.prev_memory;
                        }
                    }
                }
                OpType::Seq => {
                    steps += 1 + self.call_seq(op, mem)?;
                }
                OpType::Prg => {
                    steps += 1 + self.call_prg(op, mem)?;
                }
                OpType::Clr | OpType::Fil | OpType::Rol | OpType::Ror => {
                    self.region_op(op, mem)?;
                    steps += 1;
                }
                _ => {
                    let meta = op.typ.metadata();
                    let source = self.get(&op.source, mem)?;
                    let target = if meta.reads_target {
                        self.get(&op.target, mem)?
                    } else {
                        Number::ZERO
                    };
                    let value = semantics::calc(op.typ, &target, &source);
                    self.set(&op.target, value, mem)?;
                    steps += 1;
                }
            }
            if self.settings.max_cycles >= 0 && steps > self.settings.max_cycles {
                return Err(EvalError::CycleLimit(self.settings.max_cycles));
            }
            processed += 1;
            if processed % Self::DEADLINE_CHECK_INTERVAL == 0 {
                if let Some(deadline) = self.deadline {
                    if Instant::now() >= deadline {
                        return Err(EvalError::DeadlineExceeded);
                    }
                }
            }
            pc = next_pc;
        }
        Ok(steps)
    }

    fn resolve_address(&self, operand: &Operand, mem: &Memory) -> Result<i64, EvalError> {
        let cell = match operand {
            Operand::Direct(c) => *c,
            Operand::Indirect(c) => {
                if *c < 0 {
                    return Err(EvalError::NegativeCellIndex(*c));
                }
                mem.get(*c)
                    .to_i64()
                    .ok_or(EvalError::InfiniteCellIndex)?
            }
            Operand::Constant(_) => {
                return Err(EvalError::InvalidProgram(
                    "constant used as memory address".into(),
                ))
            }
        };
        if cell < 0 {
            return Err(EvalError::NegativeCellIndex(cell));
        }
        Ok(cell)
    }

    // value of an operand, where a constant stands for itself
    fn resolve_value(&self, operand: &Operand, mem: &Memory) -> Result<i64, EvalError> {
        let value = self.get(operand, mem)?;
        value.to_i64().ok_or(EvalError::InfiniteCellIndex)
    }

    pub fn get(&self, operand: &Operand, mem: &Memory) -> Result<Number, EvalError> {
        match operand {
            Operand::Constant(n) => Ok(n.clone()),
            Operand::Direct(_) | Operand::Indirect(_) => {
                let cell = self.resolve_address(operand, mem)?;
                Ok(mem.get(cell))
            }
        }
    }

    pub fn set(&self, operand: &Operand, value: Number, mem: &mut Memory) -> Result<(), EvalError> {
        match operand {
            Operand::Constant(_) => Err(EvalError::ConstantWrite),
            Operand::Direct(_) | Operand::Indirect(_) => {
                let cell = self.resolve_address(operand, mem)?;
                self.check_memory(cell)?;
                mem.set(cell, value);
                Ok(())
            }
        }
    }

    fn check_memory(&self, cell: i64) -> Result<(), EvalError> {
        if self.settings.max_memory >= 0 && cell > self.settings.max_memory {
            return Err(EvalError::MemoryLimit(self.settings.max_memory));
        }
        Ok(())
    }

    fn region_op(&self, op: &Operation, mem: &mut Memory) -> Result<(), EvalError> {
        let start = self.resolve_address(&op.target, mem)?;
        let length = self.resolve_value(&op.source, mem)?;
        if length <= 0 {
            return Ok(());
        }
        let end = start
            .checked_add(length - 1)
            .ok_or(EvalError::InfiniteCellIndex)?;
        self.check_memory(end)?;
        match op.typ {
            OpType::Clr => {
                for i in start..=end {
                    mem.set(i, Number::ZERO);
                }
            }
            OpType::Fil => {
                let value = mem.get(start);
                for i in start..=end {
                    mem.set(i, value.clone());
                }
            }
            OpType::Rol => {
                let first = mem.get(start);
                for i in start..end {
                    let v = mem.get(i + 1);
                    mem.set(i, v);
                }
                mem.set(end, first);
            }
            OpType::Ror => {
                let last = mem.get(end);
                for i in (start..end).rev() {
                    let v = mem.get(i);
                    mem.set(i + 1, v);
                }
                mem.set(start, last);
            }
            _ => unreachable!("not a region operation"),
        }
        Ok(())
    }

    fn call_seq(&mut self, op: &Operation, mem: &mut Memory) -> Result<i64, EvalError> {
        let id = op
            .source
            .as_constant()
            .and_then(|n| n.to_i64())
            .ok_or_else(|| EvalError::InvalidProgram("seq needs a constant id".into()))?;
        let program = self.cache.get(id)?;
        if !self.running.insert(id) {
            return Err(EvalError::RecursiveCall(ProgramCache::id_string(id)));
        }
        let input = self.get(&op.target, mem)?;
        let mut tmp = Memory::new();
        tmp.set(Program::INPUT_CELL, input);
        let result = self.run(&program, &mut tmp);
        self.running.remove(&id);
        let sub_steps = result?;
        self.set(&op.target, tmp.get(Program::OUTPUT_CELL), mem)?;
        Ok(sub_steps + self.cache.overhead(id))
    }

    fn call_prg(&mut self, op: &Operation, mem: &mut Memory) -> Result<i64, EvalError> {
        let id = op
            .source
            .as_constant()
            .and_then(|n| n.to_i64())
            .ok_or_else(|| EvalError::InvalidProgram("prg needs a constant id".into()))?;
        let program = self.cache.get(id)?;
        if !self.running.insert(id) {
            return Err(EvalError::RecursiveCall(ProgramCache::id_string(id)));
        }
        let start = self.resolve_address(&op.target, mem);
        let result = start.and_then(|start| {
            let num_inputs = program.directive(Program::DIRECTIVE_INPUTS, 1).max(0);
            let num_outputs = program.directive(Program::DIRECTIVE_OUTPUTS, 1).max(0);
            let mut tmp = Memory::new();
            for i in 0..num_inputs {
                tmp.set(i, mem.get(start + i));
            }
            let sub_steps = self.run(&program, &mut tmp)?;
            for i in 0..num_outputs {
                self.check_memory(start + i)?;
                mem.set(start + i, tmp.get(i));
            }
            Ok(sub_steps)
        });
        self.running.remove(&id);
        Ok(result? + self.cache.overhead(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;

    fn run_input(src: &str, input: i64) -> Result<(Number, i64), EvalError> {
        let p = parse_program(src).expect("valid program");
        let mut interpreter = Interpreter::new(Settings::default());
        let mut mem = Memory::new();
        mem.set(0, Number::Small(input));
        let steps = interpreter.run(&p, &mut mem)?;
        Ok((mem.get(0), steps))
    }

    const FIB: &str =
        "mov $1,1\nlpb $0\n  sub $0,1\n  mov $2,$1\n  add $1,$3\n  mov $3,$2\nlpe\nmov $0,$3\n";

    #[test]
    fn fibonacci_terms() {
        let expected = [0, 1, 1, 2, 3, 5, 8, 13, 21, 34];
        for (i, e) in expected.iter().enumerate() {
            let (value, _) = run_input(FIB, i as i64).expect("fib evaluates");
            assert_eq!(value, Number::Small(*e), "fib({})", i);
        }
    }

    #[test]
    fn factorial_terms() {
        let src = "mov $1,$0\nmov $2,1\nlpb $1\n  mul $2,$1\n  sub $1,1\nlpe\nmov $0,$2\n";
        let expected = [1, 1, 2, 6, 24, 120, 720];
        for (i, e) in expected.iter().enumerate() {
            let (value, _) = run_input(src, i as i64).expect("factorial evaluates");
            assert_eq!(value, Number::Small(*e), "{}!", i);
        }
    }

    #[test]
    fn loop_rollback_restores_state() {
        // the body makes no progress, so the single iteration is undone
        let src = "mov $1,5\nlpb $0\n  mov $1,99\n  add $0,1\nlpe\nmov $0,$1\n";
        let (value, _) = run_input(src, 3).expect("terminates");
        assert_eq!(value, Number::Small(5));
    }

    #[test]
    fn long_loop_hits_cycle_limit() {
        let p = parse_program("mov $0,1000000\nlpb $0\n  sub $0,1\nlpe\n").expect("valid");
        let mut settings = Settings::default();
        settings.max_cycles = 1000;
        let mut interpreter = Interpreter::new(settings);
        let mut mem = Memory::new();
        assert_eq!(
            interpreter.run(&p, &mut mem),
            Err(EvalError::CycleLimit(1000))
        );
    }

    #[test]
    fn nonprogressing_loop_exits_after_one_iteration() {
        // the body never decreases the counter, so the single executed
        // iteration is rolled back and execution stays within the budget
        let (value, steps) = run_input("lpb $0\n  add $0,1\nlpe\nadd $0,7\n", 5).expect("runs");
        assert_eq!(value, Number::Small(12));
        assert!(steps <= 5);
    }

    #[test]
    fn memory_limit_is_enforced() {
        let mut settings = Settings::default();
        settings.max_memory = 10;
        let mut interpreter = Interpreter::new(settings);
        let p = parse_program("mov $11,1\n").expect("valid program");
        let mut mem = Memory::new();
        assert_eq!(
            interpreter.run(&p, &mut mem),
            Err(EvalError::MemoryLimit(10))
        );
    }

    #[test]
    fn seq_calls_use_the_cache() {
        let mut interpreter = Interpreter::new(Settings::default());
        let double = parse_program("mul $0,2\n").expect("valid program");
        interpreter.cache.insert(77, double);
        let p = parse_program("add $0,1\nseq $0,77\n").expect("valid program");
        let mut mem = Memory::new();
        mem.set(0, Number::Small(4));
        let steps = interpreter.run(&p, &mut mem).expect("runs");
        assert_eq!(mem.get(0), Number::Small(10));
        assert_eq!(steps, 3); // add + seq + called program
    }

    #[test]
    fn recursive_seq_is_an_error() {
        let mut interpreter = Interpreter::new(Settings::default());
        let selfcall = parse_program("seq $0,5\n").expect("valid program");
        interpreter.cache.insert(5, selfcall.clone());
        let mut mem = Memory::new();
        assert!(matches!(
            interpreter.run(&selfcall, &mut mem),
            Err(EvalError::RecursiveCall(_))
        ));
    }

    #[test]
    fn region_operations() {
        let src = "mov $1,3\nmov $2,5\nmov $3,7\nror $1,3\nmov $0,$1\n";
        let (value, _) = run_input(src, 0).expect("runs");
        assert_eq!(value, Number::Small(7));
        let src = "mov $1,3\nmov $2,5\nclr $1,2\nmov $0,$2\n";
        let (value, _) = run_input(src, 0).expect("runs");
        assert_eq!(value, Number::ZERO);
        let src = "mov $1,9\nfil $1,3\nmov $0,$3\n";
        let (value, _) = run_input(src, 0).expect("runs");
        assert_eq!(value, Number::Small(9));
    }

    #[test]
    fn indirect_operands_resolve_through_cells() {
        let src = "mov $1,4\nmov $4,33\nmov $0,$$1\n";
        let (value, _) = run_input(src, 0).expect("runs");
        assert_eq!(value, Number::Small(33));
    }

    #[test]
    fn determinism() {
        for _ in 0..3 {
            let (v1, s1) = run_input(FIB, 7).expect("runs");
            let (v2, s2) = run_input(FIB, 7).expect("runs");
            assert_eq!(v1, v2);
            assert_eq!(s1, s2);
        }
    }
}
