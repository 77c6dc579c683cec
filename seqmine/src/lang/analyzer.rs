//! Static program analysis: simple-loop extraction and complexity classes.

use crate::core::number::Number;
use crate::lang::program::{OpType, Operand, Program};
use crate::lang::util;

/// A program of the shape `pre-loop; lpb $c,1; body; lpe; post-loop` with
/// direct operands only.
#[derive(Debug, Clone, Default)]
pub struct SimpleLoop {
    pub counter: i64,
    pub pre_loop: Program,
    pub body: Program,
    pub post_loop: Program,
}

/// Split a program into its simple-loop form, if it has one. `nop`s are
/// dropped; indirect operands or any deviation from the single-loop shape
/// make the extraction fail.
pub fn extract_simple_loop(program: &Program) -> Option<SimpleLoop> {
    let mut result = SimpleLoop::default();
    let mut phase = 0;
    for op in &program.ops {
        if op.typ == OpType::Nop {
            continue;
        }
        if util::has_indirect_operand(op) {
            return None;
        }
        if op.typ == OpType::Lpb {
            if phase != 0
                || op.source != Operand::constant(1)
                || !matches!(op.target, Operand::Direct(_))
            {
                return None;
            }
            result.counter = op.target.as_direct()?;
            phase = 1;
            continue;
        }
        if op.typ == OpType::Lpe {
            if phase != 1 {
                return None;
            }
            phase = 2;
            continue;
        }
        match phase {
            0 => result.pre_loop.ops.push(op.clone()),
            1 => result.body.ops.push(op.clone()),
            _ => result.post_loop.ops.push(op.clone()),
        }
    }
    // the loop must have been closed
    if phase == 2 {
        Some(result)
    } else {
        None
    }
}

/// Whether the program runs in logarithmic time: a simple loop whose
/// counter shrinks by division every iteration.
pub fn has_logarithmic_complexity(program: &Program) -> bool {
    if util::count_ops(program, OpType::Seq) > 0 {
        return false;
    }
    let Some(simple_loop) = extract_simple_loop(program) else {
        return false;
    };
    // exponential growth before the loop would defeat the point
    if simple_loop
        .pre_loop
        .ops
        .iter()
        .any(|op| op.typ == OpType::Pow && !op.source.is_constant())
    {
        return false;
    }
    let mut counter_updated = false;
    for op in &simple_loop.body.ops {
        if op.target.as_direct() == Some(simple_loop.counter) {
            if op.typ == OpType::Div || op.typ == OpType::Dif {
                counter_updated = true;
            } else {
                return false;
            }
            if !op.source.is_constant() {
                return false;
            }
        }
    }
    counter_updated
}

fn is_constant_greater_one(operand: &Operand) -> bool {
    matches!(operand.as_constant(), Some(n) if *n > Number::ONE)
}

// The pre-loop must initialize the counter with a constant >1 and then raise
// it to the power of the input cell; argument updates may only scale up.
//
//   mov $1,2  ; init loop counter
//   add $0,1  ; optional argument update
//   pow $1,$0 ; exponential growth
fn is_exponential_pre_loop(pre_loop: &Program, counter: i64) -> bool {
    if counter == Program::INPUT_CELL {
        return false;
    }
    let mut phase = 0;
    for op in &pre_loop.ops {
        let target = op.target.as_direct();
        if target == Some(counter) {
            if phase == 0 && op.typ == OpType::Mov && is_constant_greater_one(&op.source) {
                phase = 1;
            } else if phase == 1
                && op.typ == OpType::Pow
                && op.source == Operand::Direct(Program::INPUT_CELL)
            {
                phase = 2;
            } else {
                return false;
            }
        } else if target == Some(Program::INPUT_CELL) {
            if op.typ != OpType::Add && op.typ != OpType::Mul {
                return false;
            }
            if !is_constant_greater_one(&op.source) {
                return false;
            }
        }
        // updates to other cells are fine
    }
    phase == 2
}

fn is_linear_body(body: &Program, counter: i64) -> bool {
    let mut counter_updated = false;
    for op in &body.ops {
        if op.target.as_direct() == Some(counter) {
            counter_updated = true;
            if op.typ != OpType::Sub && op.typ != OpType::Trn {
                return false;
            }
            if !is_constant_greater_one(&op.source) {
                return false;
            }
        }
    }
    counter_updated
}

/// Whether the program needs time exponential in its argument: the counter
/// starts at `c^input` and shrinks linearly.
pub fn has_exponential_complexity(program: &Program) -> bool {
    let Some(simple_loop) = extract_simple_loop(program) else {
        return false;
    };
    is_exponential_pre_loop(&simple_loop.pre_loop, simple_loop.counter)
        && is_linear_body(&simple_loop.body, simple_loop.counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;

    #[test]
    fn extracts_three_sections() {
        let p = parse_program("mov $1,1\nlpb $0\nsub $0,1\nadd $1,$1\nlpe\nmov $0,$1\n")
            .expect("valid program");
        let sl = extract_simple_loop(&p).expect("simple loop");
        assert_eq!(sl.counter, 0);
        assert_eq!(sl.pre_loop.ops.len(), 1);
        assert_eq!(sl.body.ops.len(), 2);
        assert_eq!(sl.post_loop.ops.len(), 1);
    }

    #[test]
    fn rejects_nested_and_unclosed_loops() {
        let nested =
            parse_program("lpb $0\nlpb $1\nsub $1,1\nlpe\nsub $0,1\nlpe\n").expect("valid");
        assert!(extract_simple_loop(&nested).is_none());
        let no_loop = parse_program("mov $0,1\n").expect("valid");
        assert!(extract_simple_loop(&no_loop).is_none());
    }

    #[test]
    fn rejects_loop_with_region_source() {
        let p = parse_program("lpb $0,2\nsub $0,1\nlpe\n").expect("valid");
        assert!(extract_simple_loop(&p).is_none());
    }

    #[test]
    fn logarithmic_loop() {
        let p = parse_program("lpb $0\ndiv $0,2\nadd $1,1\nlpe\nmov $0,$1\n").expect("valid");
        assert!(has_logarithmic_complexity(&p));
        let q = parse_program("lpb $0\nsub $0,1\nlpe\n").expect("valid");
        assert!(!has_logarithmic_complexity(&q));
    }

    #[test]
    fn exponential_loop() {
        let p = parse_program("mov $1,2\npow $1,$0\nlpb $1\nsub $1,2\nadd $2,1\nlpe\nmov $0,$2\n")
            .expect("valid");
        assert!(has_exponential_complexity(&p));
        let q = parse_program("lpb $0\nsub $0,1\nlpe\n").expect("valid");
        assert!(!has_exponential_complexity(&q));
    }
}
