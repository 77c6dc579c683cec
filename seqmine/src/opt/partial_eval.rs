//! Partial evaluator: a small forward dataflow pass tracking known cell
//! contents (constants and aliases) through a program.

use std::collections::HashMap;

use crate::core::number::Number;
use crate::lang::program::{OpType, Operand, Program};
use crate::lang::semantics;
use crate::lang::util;

#[derive(Debug, Clone, Default)]
pub struct PartialEvaluator {
    // cell -> known content; a Direct entry is an alias to another cell
    values: HashMap<i64, Operand>,
}

impl PartialEvaluator {
    pub fn new() -> Self {
        PartialEvaluator::default()
    }

    /// Assume the cells `from..=to` hold zero (fresh memory).
    pub fn init_zeros(&mut self, from: i64, to: i64) {
        for cell in from..=to {
            self.values.insert(cell, Operand::constant(0));
        }
    }

    pub fn get(&self, cell: i64) -> Option<&Operand> {
        self.values.get(&cell)
    }

    pub fn has_value(&self, cell: i64, value: &Number) -> bool {
        matches!(self.values.get(&cell), Some(Operand::Constant(n)) if n == value)
    }

    /// Resolve an operand through the known values: aliases are followed one
    /// step, constants substituted.
    pub fn resolve(&self, operand: &Operand) -> Operand {
        if let Operand::Direct(cell) = operand {
            if let Some(known) = self.values.get(cell) {
                return known.clone();
            }
        }
        operand.clone()
    }

    fn forget(&mut self, cell: i64) {
        self.values.remove(&cell);
        // entries aliasing the overwritten cell are stale now
        self.values
            .retain(|_, v| !matches!(v, Operand::Direct(c) if *c == cell));
    }

    fn forget_all(&mut self) {
        self.values.clear();
    }

    /// Advance the state over the operation at position `i`.
    pub fn step(&mut self, p: &Program, i: usize) {
        let op = &p.ops[i];
        let meta = op.typ.metadata();
        match op.typ {
            OpType::Nop | OpType::Dbg | OpType::Lpe => {}
            OpType::Lpb => {
                // forget everything the loop body can write
                match util::matching_loop_end(p, i) {
                    Some(end) => {
                        for j in i + 1..end {
                            match op_written_cells(p, j) {
                                Some(cells) => {
                                    for cell in cells {
                                        self.forget(cell);
                                    }
                                }
                                None => {
                                    self.forget_all();
                                    return;
                                }
                            }
                        }
                    }
                    None => self.forget_all(),
                }
            }
            _ => match op_written_cells(p, i) {
                Some(cells) => {
                    let single_target = matches!(op.target, Operand::Direct(_))
                        && !meta.writes_region
                        && cells.len() == 1;
                    for cell in &cells {
                        self.forget(*cell);
                    }
                    if single_target && meta.writes_target {
                        let target = cells[0];
                        let source = self.resolve(&op.source);
                        if op.typ == OpType::Mov {
                            match &source {
                                Operand::Constant(_) => {
                                    self.values.insert(target, source.clone());
                                }
                                Operand::Direct(alias) if *alias != target => {
                                    self.values.insert(target, source.clone());
                                }
                                _ => {}
                            }
                        } else if meta.is_arithmetic {
                            let known_target = self.resolve(&Operand::Direct(target));
                            if let (Operand::Constant(t), Operand::Constant(s)) =
                                (&known_target, &source)
                            {
                                let result = semantics::calc(op.typ, t, s);
                                if !result.is_inf() {
                                    self.values.insert(target, Operand::Constant(result));
                                }
                            }
                        }
                    }
                }
                None => self.forget_all(),
            },
        }
    }
}

// cells written by the operation at position `i`, or `None` when they
// cannot be determined statically
fn op_written_cells(p: &Program, i: usize) -> Option<Vec<i64>> {
    let op = &p.ops[i];
    let meta = op.typ.metadata();
    if !meta.writes_target {
        return Some(Vec::new());
    }
    if op.typ == OpType::Prg {
        // the written region depends on the callee's directives
        return None;
    }
    match &op.target {
        Operand::Direct(c) => {
            if meta.writes_region {
                let len = op.source.as_constant()?.to_i64()?;
                Some((0..len.max(0)).map(|k| c + k).collect())
            } else {
                Some(vec![*c])
            }
        }
        Operand::Indirect(_) => None,
        Operand::Constant(_) => Some(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;

    #[test]
    fn tracks_constants_through_arithmetic() {
        let p = parse_program("mov $1,3\nadd $1,4\nmov $2,$1\n").expect("valid");
        let mut pe = PartialEvaluator::new();
        for i in 0..p.ops.len() {
            pe.step(&p, i);
        }
        assert!(pe.has_value(1, &Number::Small(7)));
        assert!(pe.has_value(2, &Number::Small(7)));
    }

    #[test]
    fn loops_erase_written_cells() {
        let p = parse_program("mov $1,3\nmov $2,4\nlpb $0\n  sub $0,1\n  add $1,1\nlpe\n")
            .expect("valid");
        let mut pe = PartialEvaluator::new();
        for i in 0..p.ops.len() {
            pe.step(&p, i);
        }
        assert!(pe.get(1).is_none());
        assert!(pe.has_value(2, &Number::Small(4)));
    }

    #[test]
    fn aliases_are_invalidated_on_write() {
        let p = parse_program("mov $2,$1\nmov $1,5\n").expect("valid");
        let mut pe = PartialEvaluator::new();
        for i in 0..p.ops.len() {
            pe.step(&p, i);
        }
        // $2 aliased $1 before the overwrite, so it is unknown now
        assert!(pe.get(2).is_none());
        assert!(pe.has_value(1, &Number::Small(5)));
    }

    #[test]
    fn indirect_writes_clear_everything() {
        let p = parse_program("mov $1,3\nmov $$0,7\n").expect("valid");
        let mut pe = PartialEvaluator::new();
        for i in 0..p.ops.len() {
            pe.step(&p, i);
        }
        assert!(pe.get(1).is_none());
    }
}
