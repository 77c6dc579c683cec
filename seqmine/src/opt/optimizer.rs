//! Static Optimization Pipeline
//!
//! Semantics-preserving rewrites on programs, run to a fixed point:
//!
//!   1. Nop removal
//!   2. Empty-loop removal
//!   3. Constant folding / operand resolution (partial evaluator)
//!   4. Identity-operation removal
//!   5. Dead-store elimination

use crate::core::number::Number;
use crate::lang::program::{OpType, Operand, Program};
use crate::lang::util;
use crate::opt::partial_eval::PartialEvaluator;

#[derive(Debug, Clone)]
pub struct Optimizer {
    max_memory: i64,
}

impl Optimizer {
    pub fn new(max_memory: i64) -> Self {
        Optimizer { max_memory }
    }

    /// Run all passes until none of them changes the program.
    pub fn optimize(&self, p: &mut Program) -> bool {
        let mut changed = false;
        loop {
            let mut round = false;
            round |= self.remove_nops(p);
            round |= self.remove_empty_loops(p);
            round |= self.partial_eval(p);
            round |= self.remove_identities(p);
            round |= self.remove_dead_stores(p);
            if !round {
                return changed;
            }
            changed = true;
        }
    }

    pub fn remove_nops(&self, p: &mut Program) -> bool {
        let before = p.ops.len();
        util::remove_nops(p);
        p.ops.len() != before
    }

    fn remove_empty_loops(&self, p: &mut Program) -> bool {
        let mut changed = false;
        let mut i = 0;
        while i + 1 < p.ops.len() {
            if p.ops[i].typ == OpType::Lpb && p.ops[i + 1].typ == OpType::Lpe {
                p.ops.drain(i..i + 2);
                changed = true;
                i = i.saturating_sub(1);
            } else {
                i += 1;
            }
        }
        changed
    }

    // fold constants and resolve operands through known cell contents
    fn partial_eval(&self, p: &mut Program) -> bool {
        let mut pe = PartialEvaluator::new();
        let mut changed = false;
        for i in 0..p.ops.len() {
            let op = p.ops[i].clone();
            let meta = op.typ.metadata();
            if meta.num_operands == 2
                && !meta.writes_region
                && op.typ != OpType::Seq
                && op.typ != OpType::Lpb
            {
                // substitute a known constant source
                if let Operand::Direct(_) = op.source {
                    if let Operand::Constant(value) = pe.resolve(&op.source) {
                        p.ops[i].source = Operand::Constant(value);
                        changed = true;
                    }
                }
                // fold a fully known update into a plain store
                if op.typ != OpType::Mov && meta.is_arithmetic {
                    if let Operand::Direct(target) = &op.target {
                        let known_target = pe.resolve(&op.target);
                        let source = pe.resolve(&p.ops[i].source);
                        if let (Operand::Constant(t), Operand::Constant(s)) =
                            (&known_target, &source)
                        {
                            let result = crate::lang::semantics::calc(op.typ, t, s);
                            if !result.is_inf() {
                                p.ops[i] = crate::lang::program::Operation::new(
                                    OpType::Mov,
                                    Operand::Direct(*target),
                                    Operand::Constant(result),
                                );
                                p.ops[i].comment = op.comment.clone();
                                changed = true;
                            }
                        }
                    }
                }
            }
            pe.step(p, i);
        }
        changed
    }

    // operations that provably do not change their target
    fn remove_identities(&self, p: &mut Program) -> bool {
        let before = p.ops.len();
        p.ops.retain(|op| {
            let zero = Number::ZERO;
            let one = Number::ONE;
            let identity = match (op.typ, op.source.as_constant()) {
                (OpType::Add, Some(n)) | (OpType::Sub, Some(n)) => *n == zero,
                (OpType::Mul, Some(n)) | (OpType::Div, Some(n)) | (OpType::Pow, Some(n)) => {
                    *n == one
                }
                (OpType::Mov, _) => {
                    matches!(op.target, Operand::Direct(_)) && op.source == op.target
                }
                _ => false,
            };
            !identity
        });
        p.ops.len() != before
    }

    // remove stores whose value is never observed; conservative about loops
    // and indirect addressing
    fn remove_dead_stores(&self, p: &mut Program) -> bool {
        if util::has_indirect(p) {
            return false;
        }
        let mut remove: Vec<usize> = Vec::new();
        for i in 0..p.ops.len() {
            let op = &p.ops[i];
            let meta = op.typ.metadata();
            if !meta.writes_target || meta.writes_region || op.typ == OpType::Lpb {
                continue;
            }
            // inside a loop, earlier body operations can observe the store
            // on the next iteration
            if util::loop_depth(p, i) > 0 {
                continue;
            }
            let Some(target) = op.target.as_direct() else {
                continue;
            };
            if target == Program::OUTPUT_CELL {
                continue;
            }
            if self.max_memory >= 0 && target > self.max_memory {
                continue;
            }
            let mut observed = false;
            for j in i + 1..p.ops.len() {
                let later = &p.ops[j];
                if util::is_reading_cell(later, target) {
                    observed = true;
                    break;
                }
                if util::is_writing_cell(later, target) {
                    // a store inside a loop may be undone by the loop
                    // rollback, so only a top-level mov is a definite kill
                    if later.typ == OpType::Mov && util::loop_depth(p, j) == 0 {
                        break;
                    }
                    observed = true;
                    break;
                }
            }
            if !observed {
                remove.push(i);
            }
        }
        for &i in remove.iter().rev() {
            p.ops.remove(i);
        }
        !remove.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;
    use crate::lang::printer::print_program;

    fn optimize(src: &str) -> String {
        let mut p = parse_program(src).expect("valid program");
        Optimizer::new(100_000).optimize(&mut p);
        print_program(&p)
    }

    #[test]
    fn folds_constant_chains() {
        let out = optimize("mov $1,0\nadd $1,1\nadd $1,1\nadd $1,1\nmov $0,$1\n");
        assert_eq!(out, "mov $0,3\n");
    }

    #[test]
    fn removes_empty_loops() {
        let out = optimize("lpb $0\nlpe\nadd $0,1\n");
        assert_eq!(out, "add $0,1\n");
    }

    #[test]
    fn removes_identity_operations() {
        let out = optimize("add $0,0\nmul $0,1\nmov $1,$1\nadd $0,2\n");
        assert_eq!(out, "add $0,2\n");
    }

    #[test]
    fn keeps_loop_semantics() {
        let src = "lpb $0\n  sub $0,1\n  add $1,1\nlpe\nmov $0,$1\n";
        let out = optimize(src);
        assert_eq!(out, src);
    }

    #[test]
    fn removes_dead_stores() {
        let out = optimize("mov $3,7\nadd $0,1\n");
        assert_eq!(out, "add $0,1\n");
    }

    #[test]
    fn keeps_observed_stores() {
        let out = optimize("mov $3,$0\nadd $3,5\nmov $0,$3\n");
        assert!(out.contains("mov $3,$0"));
    }

    #[test]
    fn optimization_is_idempotent() {
        let src = "mov $1,0\nadd $1,2\nlpb $0\n  sub $0,1\n  add $1,3\nlpe\nmov $0,$1\n";
        let mut p = parse_program(src).expect("valid program");
        let optimizer = Optimizer::new(100_000);
        optimizer.optimize(&mut p);
        let first = print_program(&p);
        assert!(!optimizer.optimize(&mut p));
        assert_eq!(first, print_program(&p));
    }
}
