//! Program mutation for the mining loop.

use std::collections::VecDeque;

use rand::prelude::*;

use crate::core::number::Number;
use crate::core::uid::Uid;
use crate::lang::program::{OpType, Operand, Operation, Program, OP_METADATA};
use crate::lang::util;
use crate::mine::stats::Stats;

pub struct Mutator {
    rng: StdRng,
    constants: Vec<Number>,
    program_ids: Vec<Uid>,
    pub mutation_rate: f64,
}

impl Mutator {
    pub fn new(stats: &Stats, seed: u64, mutation_rate: f64) -> Self {
        let mut constants: Vec<Number> = stats.num_constants.keys().cloned().collect();
        if constants.is_empty() {
            constants = (0..5).map(Number::Small).collect();
        }
        let program_ids: Vec<Uid> = stats.all_program_ids.iter().collect();
        Mutator {
            rng: StdRng::seed_from_u64(seed),
            constants,
            program_ids,
            mutation_rate,
        }
    }

    pub fn random_program_id(&mut self) -> Option<Uid> {
        if self.program_ids.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.program_ids.len());
        Some(self.program_ids[index])
    }

    fn random_constant(&mut self) -> Number {
        let index = self.rng.gen_range(0..self.constants.len());
        self.constants[index].clone()
    }

    fn random_arithmetic_type(&mut self) -> OpType {
        let candidates: Vec<OpType> = OP_METADATA
            .iter()
            .filter(|m| m.is_arithmetic && m.is_public)
            .map(|m| m.typ)
            .collect();
        candidates[self.rng.gen_range(0..candidates.len())]
    }

    /// Perturb constant operands, each with the configured probability.
    pub fn mutate_constants(&mut self, p: &mut Program) -> bool {
        let mut changed = false;
        for i in 0..p.ops.len() {
            let meta = p.ops[i].typ.metadata();
            if meta.num_operands < 2
                || p.ops[i].typ == OpType::Seq
                || p.ops[i].typ == OpType::Prg
                || p.ops[i].typ == OpType::Lpb
            {
                continue;
            }
            if !p.ops[i].source.is_constant() {
                continue;
            }
            if self.rng.gen_bool(self.mutation_rate.clamp(0.0, 1.0)) {
                p.ops[i].source = Operand::Constant(self.random_constant());
                changed = true;
            }
        }
        changed
    }

    /// Apply one random operation-level edit.
    pub fn mutate_random(&mut self, p: &mut Program) {
        if p.ops.is_empty() {
            return;
        }
        // positions inside loops are fair game, loop structure is not
        let mutable: Vec<usize> = p
            .ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.typ != OpType::Lpb && op.typ != OpType::Lpe)
            .map(|(i, _)| i)
            .collect();
        let kind = self.rng.gen_range(0..4);
        match kind {
            0 if !mutable.is_empty() => {
                // change the operation type
                let i = mutable[self.rng.gen_range(0..mutable.len())];
                if p.ops[i].typ != OpType::Seq {
                    p.ops[i].typ = self.random_arithmetic_type();
                }
            }
            1 if !mutable.is_empty() => {
                // change the source operand
                let i = mutable[self.rng.gen_range(0..mutable.len())];
                if p.ops[i].typ.metadata().num_operands >= 2 && p.ops[i].typ != OpType::Seq {
                    p.ops[i].source = if self.rng.gen_bool(0.5) {
                        Operand::Constant(self.random_constant())
                    } else {
                        Operand::Direct(self.rng.gen_range(0..4))
                    };
                }
            }
            2 => {
                // insert a fresh operation
                let typ = self.random_arithmetic_type();
                let op = Operation::new(
                    typ,
                    Operand::Direct(self.rng.gen_range(0..4)),
                    if self.rng.gen_bool(0.5) {
                        Operand::Constant(self.random_constant())
                    } else {
                        Operand::Direct(self.rng.gen_range(0..4))
                    },
                );
                let pos = self.rng.gen_range(0..=p.ops.len());
                p.ops.insert(pos, op);
            }
            _ if mutable.len() > 1 => {
                // delete an operation
                let i = mutable[self.rng.gen_range(0..mutable.len())];
                p.ops.remove(i);
            }
            _ => {}
        }
    }

    /// Push `count` mutated copies of the program onto the queue.
    pub fn mutate_copies(&mut self, p: &Program, count: usize, queue: &mut VecDeque<Program>) {
        for _ in 0..count {
            let mut copy = p.clone();
            crate::lang::comments::remove_comments(&mut copy);
            if !self.mutate_constants(&mut copy) {
                self.mutate_random(&mut copy);
            }
            if util::validate(&copy).is_ok() {
                queue.push_back(copy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;

    fn mutator() -> Mutator {
        Mutator::new(&Stats::new(), 7, 0.5)
    }

    #[test]
    fn mutated_copies_stay_valid() {
        let p = parse_program("mov $1,1\nlpb $0\n  sub $0,1\n  add $1,2\nlpe\nmov $0,$1\n")
            .expect("valid");
        let mut m = mutator();
        let mut queue = VecDeque::new();
        m.mutate_copies(&p, 50, &mut queue);
        assert!(!queue.is_empty());
        for copy in &queue {
            assert!(util::validate(copy).is_ok());
        }
    }

    #[test]
    fn constant_mutation_changes_constants_only() {
        let p = parse_program("add $0,3\nmov $1,$0\n").expect("valid");
        let mut m = mutator();
        let mut changed = false;
        for _ in 0..20 {
            let mut copy = p.clone();
            if m.mutate_constants(&mut copy) {
                changed = true;
                assert_eq!(copy.ops[1], p.ops[1]); // non-constant op untouched
            }
        }
        assert!(changed);
    }

    #[test]
    fn deterministic_under_fixed_seed() {
        let p = parse_program("add $0,1\nmul $0,2\n").expect("valid");
        let run = || {
            let mut m = Mutator::new(&Stats::new(), 99, 0.5);
            let mut queue = VecDeque::new();
            m.mutate_copies(&p, 10, &mut queue);
            queue
        };
        let a = run();
        let b = run();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x, y);
        }
    }
}
