//! Program minimizer.
//!
//! Removes or weakens operations while preserving the produced sequence on
//! a required prefix, and alternates with the optimizer until neither makes
//! progress. Every trial change is validated by re-evaluation; failed
//! trials are reverted.

use crate::core::number::Number;
use crate::core::sequence::Sequence;
use crate::core::uid::Uid;
use crate::errors::EvalError;
use crate::eval::evaluator::{Evaluator, Status};
use crate::lang::program::{OpType, Operand, Operation, Program};
use crate::lang::{printer, util};
use crate::opt::optimizer::Optimizer;
use crate::sys::{log, setup};
use crate::sys::setup::Settings;

pub struct Minimizer {
    settings: Settings,
    evaluator: Evaluator,
    optimizer: Optimizer,
}

impl Minimizer {
    /// Region clears up to this length are unrolled into plain stores.
    const MAX_CLR_UNROLL: i64 = 100;

    pub fn new(settings: Settings) -> Self {
        Minimizer {
            evaluator: Evaluator::new(settings.clone()),
            optimizer: Optimizer::new(settings.max_memory),
            settings,
        }
    }

    /// Smallest base in {2,3,5,7,10} of which `v` is a large pure power;
    /// `0` if there is none.
    pub fn power_base(v: &Number) -> i64 {
        let checks: [(i64, i64); 5] = [(2, 9), (3, 5), (5, 4), (7, 3), (10, 2)];
        for (base, min_exp) in checks {
            let exp = crate::lang::semantics::power_of(v, &Number::Small(base));
            if exp > Number::Small(min_exp) {
                return base;
            }
        }
        0
    }

    fn check(&mut self, p: &Program, target: &Sequence, max_total: i64) -> bool {
        let (status, steps) = self.evaluator.check(p, target, -1, Uid::default());
        if status != Status::Ok {
            return false;
        }
        max_total <= 0 || steps.total <= max_total
    }

    /// Remove or weaken operations; returns whether the program changed.
    pub fn minimize(&mut self, p: &mut Program, num_terms: usize) -> Result<bool, EvalError> {
        log::debug("Minimizing program");
        let (target_sequence, target_steps) = self.evaluator.eval(p, num_terms)?;
        if target_sequence.len() < num_terms {
            log::error(&format!(
                "Cannot minimize program with only {} terms",
                target_sequence.len()
            ));
            return Ok(false);
        }

        let mut global_change = self.remove_clr(p);
        let mut i: i64 = 0;
        while i < p.ops.len() as i64 {
            let index = i as usize;
            let mut local_change = false;
            let op = p.ops[index].clone();
            match op.typ {
                OpType::Lpe => {
                    i += 1;
                    continue;
                }
                OpType::Trn => {
                    p.ops[index].typ = OpType::Sub;
                    if self.check(p, &target_sequence, target_steps.total) {
                        local_change = true;
                    } else {
                        p.ops[index] = op.clone();
                    }
                }
                OpType::Lpb => {
                    if op.source != Operand::constant(1) {
                        p.ops[index].source = Operand::constant(1);
                        if self.check(p, &target_sequence, target_steps.total) {
                            local_change = true;
                        } else {
                            p.ops[index] = op.clone();
                        }
                    }
                }
                _ => {
                    // keep at least one operation (the all-zeros sequence
                    // still needs a program)
                    if p.ops.len() > 1 {
                        p.ops.remove(index);
                        if self.check(p, &target_sequence, target_steps.total) {
                            local_change = true;
                            i -= 1;
                        } else {
                            p.ops.insert(index, op.clone());
                        }
                    }
                }
            }

            if !local_change {
                local_change = self.try_gcd_replacement(p, index, &target_sequence);
            }
            global_change = global_change || local_change;
            i += 1;
        }
        Ok(global_change)
    }

    // replace `gcd $t,<large power of b>` with a loop peeling off factors
    // of b, which avoids the conspicuous big constant
    fn try_gcd_replacement(&mut self, p: &mut Program, index: usize, target: &Sequence) -> bool {
        let op = p.ops[index].clone();
        if op.typ != OpType::Gcd || !matches!(op.target, Operand::Direct(_)) {
            return false;
        }
        let Some(constant) = op.source.as_constant().cloned() else {
            return false;
        };
        if constant.is_zero() {
            return false;
        }
        let base = Self::power_base(&constant);
        if base == 0 {
            return false;
        }
        let Some((_, largest_used)) = util::used_memory_cells(p, self.settings.max_memory) else {
            return false;
        };
        let tmp = Operand::Direct(largest_used + 1);
        p.ops[index] = Operation::new(OpType::Mov, tmp.clone(), Operand::constant(1));
        let tail = [
            Operation::new(OpType::Lpb, op.target.clone(), Operand::constant(1)),
            Operation::new(OpType::Mul, tmp.clone(), Operand::constant(base)),
            Operation::new(OpType::Dif, op.target.clone(), Operand::constant(base)),
            Operation::new(OpType::Lpe, Operand::constant(0), Operand::constant(0)),
            Operation::new(OpType::Mov, op.target.clone(), tmp),
        ];
        for (k, t) in tail.iter().enumerate() {
            p.ops.insert(index + 1 + k, t.clone());
        }
        // the loop form trades steps for simplicity, so no step budget here
        if self.check(p, target, 0) {
            true
        } else {
            p.ops[index] = op;
            p.ops.drain(index + 1..index + 6);
            false
        }
    }

    // unroll short region clears into plain stores and drop empty ones
    fn remove_clr(&self, p: &mut Program) -> bool {
        let mut changed = false;
        let mut i = 0;
        while i < p.ops.len() {
            let op = &p.ops[i];
            let clr_region = (op.typ == OpType::Clr && matches!(op.target, Operand::Direct(_)))
                .then(|| op.source.as_constant().and_then(|n| n.to_i64()))
                .flatten();
            match clr_region {
                Some(length) if length <= 0 => {
                    p.ops.remove(i);
                    changed = true;
                }
                Some(length) if length <= Self::MAX_CLR_UNROLL => {
                    let start = p.ops[i].target.as_direct().expect("direct target");
                    p.ops[i] = Operation::new(
                        OpType::Mov,
                        Operand::Direct(start),
                        Operand::constant(0),
                    );
                    for j in 1..length {
                        p.ops.insert(
                            i + j as usize,
                            Operation::new(
                                OpType::Mov,
                                Operand::Direct(start + j),
                                Operand::constant(0),
                            ),
                        );
                    }
                    changed = true;
                    i += length as usize;
                }
                _ => i += 1,
            }
        }
        changed
    }

    /// Alternate optimization and minimization until a fixed point. On an
    /// evaluation error the program is reverted and dumped for analysis.
    pub fn optimize_and_minimize(&mut self, p: &mut Program, num_terms: usize) -> bool {
        let backup = p.clone();
        let mut result = false;
        loop {
            let optimized = self.optimizer.optimize(p);
            let minimized = match self.minimize(p, num_terms) {
                Ok(m) => m,
                Err(e) => {
                    *p = backup;
                    log::error(&format!("Error during minimization: {}", e));
                    self.dump_program(p);
                    return false;
                }
            };
            result = result || optimized || minimized;
            if !optimized && !minimized {
                return result;
            }
        }
    }

    fn dump_program(&self, p: &Program) {
        let dir = setup::debug_home().join("minimizer");
        if std::fs::create_dir_all(&dir).is_err() {
            return;
        }
        let path = dir.join(format!("{}.asm", util::program_hash(p) % 100_000));
        if let Err(e) = std::fs::write(&path, printer::print_program(p)) {
            log::warn(&format!("Cannot write {}: {}", path.display(), e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;

    #[test]
    fn removes_redundant_operations() {
        let mut p =
            parse_program("mov $1,0\nadd $1,1\nadd $1,1\nadd $1,1\nmov $0,$1\n").expect("valid");
        let mut minimizer = Minimizer::new(Settings::default());
        assert!(minimizer.optimize_and_minimize(&mut p, 5));
        assert!(p.ops.len() <= 2);
        let mut evaluator = Evaluator::new(Settings::default());
        let (seq, _) = evaluator.eval(&p, 5).expect("evaluates");
        assert_eq!(seq, Sequence::from_i64(&[3, 3, 3, 3, 3]));
    }

    #[test]
    fn weakens_truncation_to_subtraction() {
        // trn and sub agree on the evaluated prefix here
        let mut p = parse_program("add $0,5\ntrn $0,1\n").expect("valid");
        let mut minimizer = Minimizer::new(Settings::default());
        minimizer.minimize(&mut p, 8).expect("minimizes");
        assert!(p.ops.iter().all(|op| op.typ != OpType::Trn));
    }

    #[test]
    fn keeps_needed_truncation() {
        let mut p = parse_program("trn $0,3\n").expect("valid");
        let mut minimizer = Minimizer::new(Settings::default());
        minimizer.minimize(&mut p, 8).expect("minimizes");
        assert_eq!(p.ops[0].typ, OpType::Trn);
    }

    #[test]
    fn unrolls_short_region_clears() {
        let mut p = parse_program("mov $1,7\nclr $1,2\nmov $0,$1\n").expect("valid");
        let mut minimizer = Minimizer::new(Settings::default());
        minimizer.minimize(&mut p, 4).expect("minimizes");
        assert!(p.ops.iter().all(|op| op.typ != OpType::Clr));
    }

    #[test]
    fn gcd_power_detection() {
        assert_eq!(Minimizer::power_base(&Number::Small(1024)), 2);
        assert_eq!(Minimizer::power_base(&Number::Small(729)), 3);
        assert_eq!(Minimizer::power_base(&Number::Small(1000)), 10);
        assert_eq!(Minimizer::power_base(&Number::Small(1023)), 0);
        assert_eq!(Minimizer::power_base(&Number::Small(100)), 0);
    }

    #[test]
    fn minimization_is_idempotent() {
        let mut p =
            parse_program("mov $1,1\nlpb $0\n  sub $0,1\n  add $1,2\nlpe\nmov $0,$1\n")
                .expect("valid");
        let mut minimizer = Minimizer::new(Settings::default());
        minimizer.optimize_and_minimize(&mut p, 8);
        let first = crate::lang::printer::print_program(&p);
        assert!(!minimizer.optimize_and_minimize(&mut p, 8));
        assert_eq!(first, crate::lang::printer::print_program(&p));
    }
}
