//! Range generator: forward abstract interpretation over per-cell value
//! intervals.
//!
//! Ranges are conservative: a transfer function may widen but never
//! tighten beyond what the concrete semantics permits. Unknown effects
//! (loops, calls, indirect writes) erase knowledge instead of guessing.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::number::Number;
use crate::core::sequence::Sequence;
use crate::lang::program::{OpType, Operand, Program};
use crate::lang::util;

/// Interval with optional bounds; `None` is an open (infinite) bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub lower: Option<Number>,
    pub upper: Option<Number>,
}

impl Range {
    pub fn unbounded() -> Self {
        Range {
            lower: None,
            upper: None,
        }
    }

    pub fn constant(n: Number) -> Self {
        Range {
            lower: Some(n.clone()),
            upper: Some(n),
        }
    }

    pub fn new(lower: Option<Number>, upper: Option<Number>) -> Self {
        Range { lower, upper }
    }

    pub fn is_finite(&self) -> bool {
        matches!((&self.lower, &self.upper), (Some(l), Some(u))
            if !l.is_inf() && !u.is_inf())
    }

    pub fn is_constant(&self) -> bool {
        self.is_finite() && self.lower == self.upper
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// Whether the value lies inside the range.
    pub fn contains(&self, n: &Number) -> bool {
        if n.is_inf() {
            return self.upper.is_none();
        }
        if let Some(lower) = &self.lower {
            if n < lower {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            if n > upper {
                return false;
            }
        }
        true
    }

    /// Number of leading terms inside the range.
    pub fn check_sequence(&self, seq: &Sequence) -> usize {
        seq.iter().take_while(|t| self.contains(t)).count()
    }

    fn add(&self, other: &Range) -> Range {
        let lower = match (&self.lower, &other.lower) {
            (Some(a), Some(b)) => Some(a.add(b)),
            _ => None,
        };
        let upper = match (&self.upper, &other.upper) {
            (Some(a), Some(b)) => Some(a.add(b)),
            _ => None,
        };
        Range::new(lower, upper)
    }

    fn negate(&self) -> Range {
        Range::new(
            self.upper.as_ref().map(Number::negated),
            self.lower.as_ref().map(Number::negated),
        )
    }

    fn sub(&self, other: &Range) -> Range {
        self.add(&other.negate())
    }

    fn trn(&self, other: &Range) -> Range {
        let diff = self.sub(other);
        let zero = Number::ZERO;
        let lower = match diff.lower {
            Some(l) => Some(if l < zero { zero.clone() } else { l }),
            None => Some(zero.clone()),
        };
        let upper = diff.upper.map(|u| if u < zero { Number::ZERO } else { u });
        Range::new(lower, upper)
    }

    fn mul(&self, other: &Range) -> Range {
        match (&self.lower, &self.upper, &other.lower, &other.upper) {
            (Some(al), Some(au), Some(bl), Some(bu)) => {
                let products = [al.mul(bl), al.mul(bu), au.mul(bl), au.mul(bu)];
                if products.iter().any(Number::is_inf) {
                    return Range::unbounded();
                }
                let lower = products.iter().min().cloned();
                let upper = products.iter().max().cloned();
                Range::new(lower, upper)
            }
            _ => Range::unbounded(),
        }
    }

    fn min(&self, other: &Range) -> Range {
        let lower = match (&self.lower, &other.lower) {
            (Some(a), Some(b)) => Some(if a < b { a.clone() } else { b.clone() }),
            _ => None,
        };
        let upper = match (&self.upper, &other.upper) {
            (Some(a), Some(b)) => Some(if a < b { a.clone() } else { b.clone() }),
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            _ => None,
        };
        Range::new(lower, upper)
    }

    fn max(&self, other: &Range) -> Range {
        let lower = match (&self.lower, &other.lower) {
            (Some(a), Some(b)) => Some(if a < b { b.clone() } else { a.clone() }),
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            _ => None,
        };
        let upper = match (&self.upper, &other.upper) {
            (Some(a), Some(b)) => Some(if a < b { b.clone() } else { a.clone() }),
            _ => None,
        };
        Range::new(lower, upper)
    }

    fn modulo(&self, other: &Range) -> Range {
        // the remainder is bounded by the divisor magnitude and keeps the
        // dividend sign
        match (&other.lower, &other.upper) {
            (Some(bl), Some(bu)) => {
                let m = if bl.abs() < bu.abs() { bu.abs() } else { bl.abs() };
                if m.is_inf() {
                    return Range::unbounded();
                }
                let bound = m.sub(&Number::ONE);
                let mut lower = bound.negated();
                let mut upper = bound;
                if let Some(al) = &self.lower {
                    if !al.is_negative() {
                        lower = Number::ZERO;
                    }
                }
                if let Some(au) = &self.upper {
                    if au.is_negative() || au.is_zero() {
                        upper = Number::ZERO;
                    }
                }
                Range::new(Some(lower), Some(upper))
            }
            _ => Range::unbounded(),
        }
    }

    fn comparison() -> Range {
        Range::new(Some(Number::ZERO), Some(Number::ONE))
    }

    fn apply(&self, typ: OpType, source: &Range) -> Range {
        match typ {
            OpType::Mov => source.clone(),
            OpType::Add => self.add(source),
            OpType::Sub => self.sub(source),
            OpType::Trn => self.trn(source),
            OpType::Mul => self.mul(source),
            OpType::Min => self.min(source),
            OpType::Max => self.max(source),
            OpType::Mod => self.modulo(source),
            OpType::Equ | OpType::Neq | OpType::Leq | OpType::Geq | OpType::Cmp => {
                Range::comparison()
            }
            OpType::Gcd => {
                // nonnegative, bounded by the larger magnitude bound
                let upper = match (&self.upper, &source.upper) {
                    (Some(a), Some(b)) => {
                        let m = if a.abs() < b.abs() { b.abs() } else { a.abs() };
                        if m.is_inf() {
                            None
                        } else {
                            Some(m)
                        }
                    }
                    _ => None,
                };
                Range::new(Some(Number::ZERO), upper)
            }
            OpType::Dgs | OpType::Dgr | OpType::Lex | OpType::Log | OpType::Nrt => {
                Range::unbounded()
            }
            _ => Range::unbounded(),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lower = self
            .lower
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-inf".to_string());
        let upper = self
            .upper
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "inf".to_string());
        write!(f, "[{},{}]", lower, upper)
    }
}

/// Per-cell ranges; absent cells are known to hold zero before the program
/// writes them.
#[derive(Debug, Clone, Default)]
pub struct RangeMap {
    ranges: BTreeMap<i64, Range>,
}

impl RangeMap {
    pub fn get(&self, cell: i64) -> Range {
        self.ranges
            .get(&cell)
            .cloned()
            .unwrap_or_else(|| Range::constant(Number::ZERO))
    }

    pub fn set(&mut self, cell: i64, range: Range) {
        self.ranges.insert(cell, range);
    }
}

pub struct RangeGenerator;

impl RangeGenerator {
    /// Abstractly execute the program for inputs within `input_range`.
    pub fn generate(p: &Program, input_range: &Range) -> RangeMap {
        let mut map = RangeMap::default();
        map.set(Program::INPUT_CELL, input_range.clone());
        let mut i = 0;
        while i < p.ops.len() {
            let op = &p.ops[i];
            let meta = op.typ.metadata();
            match op.typ {
                OpType::Nop | OpType::Dbg | OpType::Lpe => {}
                OpType::Lpb => {
                    // skip the body; everything it can write is unknown
                    let end = util::matching_loop_end(p, i).unwrap_or(p.ops.len() - 1);
                    for j in i + 1..end {
                        match static_written_cells(&p.ops[j]) {
                            Some(cells) => {
                                for cell in cells {
                                    map.set(cell, Range::unbounded());
                                }
                            }
                            None => {
                                map.ranges.clear();
                                return map;
                            }
                        }
                    }
                    i = end;
                }
                _ if meta.writes_target => match static_written_cells(op) {
                    Some(cells) => {
                        if cells.len() == 1 && !meta.writes_region {
                            let target = cells[0];
                            let source_range = match &op.source {
                                Operand::Constant(n) => Range::constant(n.clone()),
                                Operand::Direct(c) => map.get(*c),
                                Operand::Indirect(_) => Range::unbounded(),
                            };
                            let target_range = map.get(target);
                            map.set(target, target_range.apply(op.typ, &source_range));
                        } else {
                            for cell in cells {
                                map.set(cell, Range::unbounded());
                            }
                        }
                    }
                    None => {
                        map.ranges.clear();
                        return map;
                    }
                },
                _ => {}
            }
            i += 1;
        }
        map
    }

    /// Range of the output cell for the given inputs.
    pub fn output_range(p: &Program, input_range: &Range) -> Range {
        Self::generate(p, input_range).get(Program::OUTPUT_CELL)
    }
}

fn static_written_cells(op: &crate::lang::program::Operation) -> Option<Vec<i64>> {
    let meta = op.typ.metadata();
    if !meta.writes_target {
        return Some(Vec::new());
    }
    if op.typ == OpType::Prg {
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

    fn nonneg(upper: i64) -> Range {
        Range::new(Some(Number::ZERO), Some(Number::Small(upper)))
    }

    #[test]
    fn straight_line_ranges() {
        let p = parse_program("add $0,5\nmul $0,2\n").expect("valid");
        let out = RangeGenerator::output_range(&p, &nonneg(10));
        assert_eq!(out.lower, Some(Number::Small(10)));
        assert_eq!(out.upper, Some(Number::Small(30)));
        assert!(out.is_finite());
    }

    #[test]
    fn truncated_subtraction_clamps_at_zero() {
        let p = parse_program("trn $0,7\n").expect("valid");
        let out = RangeGenerator::output_range(&p, &nonneg(5));
        assert_eq!(out.lower, Some(Number::ZERO));
        assert_eq!(out.upper, Some(Number::ZERO));
        assert!(out.is_constant());
    }

    #[test]
    fn loops_widen_written_cells() {
        let p = parse_program("mov $1,3\nlpb $0\n  sub $0,1\n  add $1,1\nlpe\nmov $0,$1\n")
            .expect("valid");
        let ranges = RangeGenerator::generate(&p, &nonneg(5));
        assert!(ranges.get(0).is_unbounded());
    }

    #[test]
    fn modulo_is_bounded_by_divisor() {
        let p = parse_program("mod $0,10\n").expect("valid");
        let out = RangeGenerator::output_range(&p, &nonneg(1000));
        assert_eq!(out.lower, Some(Number::ZERO));
        assert_eq!(out.upper, Some(Number::Small(9)));
    }

    #[test]
    fn range_validates_known_terms() {
        let r = nonneg(100);
        let seq = Sequence::from_i64(&[0, 5, 99, 100, 101, 2]);
        assert_eq!(r.check_sequence(&seq), 4);
        assert!(!r.contains(&Number::Inf));
        assert!(Range::unbounded().contains(&Number::Inf));
    }

    #[test]
    fn comparison_results_are_bits() {
        let p = parse_program("equ $0,5\n").expect("valid");
        let out = RangeGenerator::output_range(&p, &Range::unbounded());
        assert_eq!(out.lower, Some(Number::ZERO));
        assert_eq!(out.upper, Some(Number::ONE));
    }
}
