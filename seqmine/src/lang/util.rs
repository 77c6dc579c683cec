//! Static program analysis helpers: validation, cell usage, hashing.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::core::number::Number;
use crate::errors::EvalError;
use crate::lang::program::{OpType, Operand, Operation, Program};

pub fn remove_ops(p: &mut Program, typ: OpType) {
    p.ops.retain(|op| op.typ != typ);
}

pub fn remove_nops(p: &mut Program) {
    remove_ops(p, OpType::Nop);
}

pub fn num_ops(p: &Program, with_nops: bool) -> usize {
    if with_nops {
        p.ops.len()
    } else {
        p.ops.iter().filter(|op| op.typ != OpType::Nop).count()
    }
}

pub fn count_ops(p: &Program, typ: OpType) -> usize {
    p.ops.iter().filter(|op| op.typ == typ).count()
}

pub fn has_op(p: &Program, typ: OpType) -> bool {
    p.ops.iter().any(|op| op.typ == typ)
}

pub fn has_indirect_operand(op: &Operation) -> bool {
    matches!(op.target, Operand::Indirect(_)) || matches!(op.source, Operand::Indirect(_))
}

pub fn has_indirect(p: &Program) -> bool {
    p.ops.iter().any(has_indirect_operand)
}

/// Whether the program is statically valid: balanced loops, plausible
/// operands, nonnegative cell indices, and loop sources that are either a
/// positive constant or a direct cell.
pub fn validate(p: &Program) -> Result<(), EvalError> {
    let mut open_loops = 0i64;
    for op in &p.ops {
        let meta = op.typ.metadata();
        if meta.num_operands >= 1 && meta.writes_target && op.target.is_constant() {
            return Err(EvalError::InvalidProgram(format!(
                "constant target in '{}'",
                op
            )));
        }
        for operand in [&op.target, &op.source] {
            match operand {
                Operand::Direct(c) | Operand::Indirect(c) if *c < 0 => {
                    return Err(EvalError::InvalidProgram(format!(
                        "negative cell index in '{}'",
                        op
                    )));
                }
                _ => {}
            }
        }
        match op.typ {
            OpType::Lpb => {
                open_loops += 1;
                let source_ok = match &op.source {
                    Operand::Constant(n) => *n > Number::ZERO,
                    Operand::Direct(_) => true,
                    Operand::Indirect(_) => false,
                };
                if !source_ok || !matches!(op.target, Operand::Direct(_)) {
                    return Err(EvalError::InvalidProgram(format!(
                        "invalid loop begin '{}'",
                        op
                    )));
                }
            }
            OpType::Lpe => {
                open_loops -= 1;
                if open_loops < 0 {
                    return Err(EvalError::InvalidProgram("unmatched loop end".to_string()));
                }
            }
            _ => {}
        }
    }
    if open_loops != 0 {
        return Err(EvalError::InvalidProgram("unbalanced loops".to_string()));
    }
    Ok(())
}

/// Collect all memory cells the program can touch. Fails (returns `None`)
/// when the cells cannot be determined statically: indirect operands,
/// non-constant region lengths, or cells beyond `max_memory` (a negative
/// limit disables the bound).
pub fn used_memory_cells(p: &Program, max_memory: i64) -> Option<(HashSet<i64>, i64)> {
    let mut cells = HashSet::new();
    let mut largest = 0i64;
    for op in &p.ops {
        let meta = op.typ.metadata();
        let mut touch = |cell: i64| -> bool {
            if max_memory >= 0 && cell > max_memory {
                return false;
            }
            largest = largest.max(cell);
            cells.insert(cell);
            true
        };
        if op.typ == OpType::Prg {
            // the touched region depends on the callee's directives
            return None;
        }
        if meta.num_operands >= 1 {
            match &op.target {
                Operand::Direct(c) => {
                    if meta.writes_region {
                        let len = op.source.as_constant()?.to_i64()?;
                        for i in 0..len.max(0) {
                            if !touch(c + i) {
                                return None;
                            }
                        }
                    }
                    if !touch(*c) {
                        return None;
                    }
                }
                Operand::Indirect(_) => return None,
                Operand::Constant(_) => {}
            }
        }
        if meta.num_operands >= 2 && !meta.writes_region {
            match &op.source {
                Operand::Direct(c) => {
                    if !touch(*c) {
                        return None;
                    }
                }
                Operand::Indirect(_) => return None,
                Operand::Constant(_) => {}
            }
        }
    }
    Some((cells, largest))
}

/// Whether the operation may read the given cell.
pub fn is_reading_cell(op: &Operation, cell: i64) -> bool {
    let meta = op.typ.metadata();
    if meta.num_operands >= 2 && op.source == Operand::Direct(cell) {
        return true;
    }
    if meta.reads_target && op.target == Operand::Direct(cell) {
        return true;
    }
    if op.typ == OpType::Prg {
        return true; // read region depends on the callee
    }
    // region rotations and fills read their whole region
    if meta.writes_region && op.typ != OpType::Clr {
        if let Operand::Direct(c) = op.target {
            if let Some(len) = op.source.as_constant().and_then(|n| n.to_i64()) {
                return cell >= c && cell < c + len.max(0);
            }
            return true;
        }
    }
    matches!(op.target, Operand::Indirect(_)) || matches!(op.source, Operand::Indirect(_))
}

/// Whether the operation writes the given cell (region writes count).
pub fn is_writing_cell(op: &Operation, cell: i64) -> bool {
    let meta = op.typ.metadata();
    if !meta.writes_target {
        return false;
    }
    if op.typ == OpType::Prg {
        return true; // written region depends on the callee
    }
    match &op.target {
        Operand::Direct(c) => {
            if *c == cell {
                return true;
            }
            if meta.writes_region {
                if let Some(len) = op.source.as_constant().and_then(|n| n.to_i64()) {
                    return cell >= *c && cell < c + len.max(0);
                }
                return true; // unknown length, assume it may hit the cell
            }
            false
        }
        Operand::Indirect(_) => true, // target cell unknown
        Operand::Constant(_) => false,
    }
}

/// Cells that are read before ever being written, starting from the given
/// set of externally initialized cells.
pub fn used_uninitialized_cells(p: &Program, initialized: &HashSet<i64>) -> HashSet<i64> {
    let mut written: HashSet<i64> = initialized.clone();
    let mut uninitialized = HashSet::new();
    for op in &p.ops {
        let meta = op.typ.metadata();
        if meta.num_operands >= 2 && !meta.writes_region {
            if let Operand::Direct(c) = op.source {
                if !written.contains(&c) {
                    uninitialized.insert(c);
                }
            }
        }
        if let Operand::Direct(c) = op.target {
            if (meta.reads_target || op.typ == OpType::Lpb) && !written.contains(&c) {
                uninitialized.insert(c);
            }
            if meta.writes_target {
                if meta.writes_region {
                    if let Some(len) = op.source.as_constant().and_then(|n| n.to_i64()) {
                        for i in 0..len.max(0) {
                            written.insert(c + i);
                        }
                    }
                } else {
                    written.insert(c);
                }
            }
        }
    }
    uninitialized
}

/// Positions of the loop enclosing position `i`, if any.
pub fn enclosing_loop(p: &Program, i: usize) -> Option<(usize, usize)> {
    let mut stack = Vec::new();
    for (pos, op) in p.ops.iter().enumerate() {
        match op.typ {
            OpType::Lpb => stack.push(pos),
            OpType::Lpe => {
                let begin = stack.pop()?;
                if begin <= i && i <= pos {
                    return Some((begin, pos));
                }
            }
            _ => {}
        }
    }
    None
}

/// Loop nesting depth at position `i`.
pub fn loop_depth(p: &Program, i: usize) -> usize {
    let mut depth = 0usize;
    for op in p.ops.iter().take(i) {
        match op.typ {
            OpType::Lpb => depth += 1,
            OpType::Lpe => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

/// Position of the loop end matching the loop begin at `begin`.
pub fn matching_loop_end(p: &Program, begin: usize) -> Option<usize> {
    let mut depth = 0i64;
    for (pos, op) in p.ops.iter().enumerate().skip(begin) {
        match op.typ {
            OpType::Lpb => depth += 1,
            OpType::Lpe => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn all_constants(p: &Program) -> Vec<Number> {
    let mut result = Vec::new();
    for op in &p.ops {
        let meta = op.typ.metadata();
        if meta.num_operands >= 2 {
            if let Operand::Constant(n) = &op.source {
                result.push(n.clone());
            }
        }
    }
    result
}

/// Swap all direct references to two cells.
pub fn swap_direct_cells(p: &mut Program, a: i64, b: i64) {
    let swap = |operand: &mut Operand| {
        if let Operand::Direct(c) = operand {
            if *c == a {
                *c = b;
            } else if *c == b {
                *c = a;
            }
        }
    };
    for op in &mut p.ops {
        swap(&mut op.target);
        swap(&mut op.source);
    }
}

/// Hash over the operations (comments and `nop`s excluded) and directives.
pub fn program_hash(p: &Program) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for op in &p.ops {
        if op.typ == OpType::Nop {
            continue;
        }
        op.hash(&mut hasher);
    }
    p.directives.hash(&mut hasher);
    hasher.finish()
}

/// Update the offset directive; returns the change relative to the previous
/// value.
pub fn set_offset(p: &mut Program, offset: i64) -> i64 {
    let old = p.offset();
    p.set_directive(Program::DIRECTIVE_OFFSET, offset);
    offset - old
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        let mut p = Program::new();
        p.push(OpType::Mov, Operand::Direct(1), Operand::constant(1));
        p.push(OpType::Lpb, Operand::Direct(0), Operand::constant(1));
        p.push(OpType::Sub, Operand::Direct(0), Operand::constant(1));
        p.push(OpType::Mul, Operand::Direct(1), Operand::Direct(2));
        p.push(OpType::Lpe, Operand::constant(0), Operand::constant(0));
        p
    }

    #[test]
    fn validation_accepts_balanced_loops() {
        assert!(validate(&sample()).is_ok());
    }

    #[test]
    fn validation_rejects_unbalanced_loops() {
        let mut p = sample();
        p.ops.pop();
        assert!(validate(&p).is_err());
        let mut q = Program::new();
        q.push(OpType::Lpe, Operand::constant(0), Operand::constant(0));
        assert!(validate(&q).is_err());
    }

    #[test]
    fn validation_rejects_bad_loop_source() {
        let mut p = Program::new();
        p.push(OpType::Lpb, Operand::Direct(0), Operand::constant(0));
        p.push(OpType::Lpe, Operand::constant(0), Operand::constant(0));
        assert!(validate(&p).is_err());
    }

    #[test]
    fn validation_rejects_constant_target() {
        let mut p = Program::new();
        p.push(OpType::Mov, Operand::constant(3), Operand::constant(1));
        assert!(validate(&p).is_err());
    }

    #[test]
    fn used_cells_are_collected() {
        let (cells, largest) = used_memory_cells(&sample(), -1).expect("static cells");
        assert!(cells.contains(&0) && cells.contains(&1) && cells.contains(&2));
        assert_eq!(largest, 2);
    }

    #[test]
    fn used_cells_fail_on_indirect() {
        let mut p = Program::new();
        p.push(OpType::Mov, Operand::Indirect(1), Operand::constant(1));
        assert!(used_memory_cells(&p, -1).is_none());
    }

    #[test]
    fn region_ops_cover_their_region() {
        let mut p = Program::new();
        p.push(OpType::Clr, Operand::Direct(2), Operand::constant(3));
        let (cells, largest) = used_memory_cells(&p, -1).expect("static cells");
        assert_eq!(largest, 4);
        assert!(cells.contains(&2) && cells.contains(&3) && cells.contains(&4));
        assert!(is_writing_cell(&p.ops[0], 4));
        assert!(!is_writing_cell(&p.ops[0], 5));
    }

    #[test]
    fn hash_ignores_nops_and_comments() {
        let mut a = sample();
        let mut b = sample();
        b.ops.insert(0, Operation::nop());
        b.ops[1].comment = "setup".to_string();
        assert_eq!(program_hash(&a), program_hash(&b));
        a.ops[0].source = Operand::constant(2);
        assert_ne!(program_hash(&a), program_hash(&b));
    }

    #[test]
    fn uninitialized_cells() {
        let p = sample();
        let init: HashSet<i64> = [0].into_iter().collect();
        let uninit = used_uninitialized_cells(&p, &init);
        assert!(uninit.contains(&2));
        assert!(!uninit.contains(&1));
    }
}
