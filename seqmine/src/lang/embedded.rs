//! Embedded sequence programs, folding and unfolding.
//!
//! An *embedded sequence program* is a contiguous operation range that acts
//! as a pure function from one input cell to one output cell: its scratch
//! cells are not read by the rest of the program (including along loop-back
//! paths). Such ranges can be extracted into separate programs and replaced
//! by a `seq` call (folding); the inverse operation inlines a called
//! program back into its caller (unfolding).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::core::number::Number;
use crate::core::uid::Uid;
use crate::lang::program::{OpType, Operand, Operation, Program};
use crate::lang::{parser, util};
use crate::sys::setup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedSeq {
    pub start: usize,
    pub end: usize,
    pub input_cell: i64,
    pub output_cell: i64,
}

// ---------------------------------------------------------------------------
// Cell usage tracking
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CellTracker {
    input_cell: Option<i64>,
    output_cell: Option<i64>,
    loops: i64,
    open_loops: i64,
    written_cells: BTreeSet<i64>,
    // written by a plain mov outside of any loop; the counter tracks how
    // many loops have opened since the write
    safely_written_cells: BTreeMap<i64, i64>,
    overridden_cells: BTreeSet<i64>,
}

impl CellTracker {
    fn reset(&mut self) {
        *self = CellTracker::default();
    }

    // `after` switches from scanning the candidate range to scanning the
    // rest of the program for offending reads
    fn read(&mut self, cell: i64, after: bool) -> bool {
        if after {
            if self.written_cells.contains(&cell) && !self.overridden_cells.contains(&cell) {
                if self.output_cell.is_none() && self.safely_written_cells.contains_key(&cell) {
                    self.output_cell = Some(cell);
                } else if self.output_cell != Some(cell) {
                    return false; // second output cell or unsafe write
                }
            }
        } else if self.input_cell.is_none() {
            self.input_cell = Some(cell);
        } else if self.input_cell != Some(cell) && !self.safely_written_cells.contains_key(&cell) {
            return false; // second input cell
        }
        true
    }

    fn update(&mut self, op: &Operation, after: bool) -> bool {
        if !after {
            if op.typ == OpType::Lpb {
                self.loops += 1;
                self.open_loops += 1;
                for counter in self.safely_written_cells.values_mut() {
                    *counter += 1;
                }
            } else if op.typ == OpType::Lpe {
                self.open_loops -= 1;
                self.safely_written_cells.retain(|_, counter| {
                    if *counter > 0 {
                        *counter -= 1;
                        true
                    } else {
                        false
                    }
                });
            }
        }
        let meta = op.typ.metadata();
        if meta.num_operands > 1 {
            if let Some(cell) = op.source.as_direct() {
                if !self.read(cell, after) {
                    return false;
                }
            }
        }
        if meta.num_operands > 0 {
            if let Some(cell) = op.target.as_direct() {
                if meta.reads_target && !self.read(cell, after) {
                    return false;
                }
                if meta.writes_target {
                    if after {
                        self.overridden_cells.insert(cell);
                    } else {
                        self.written_cells.insert(cell);
                        if !meta.reads_target {
                            self.safely_written_cells.entry(cell).or_insert(0);
                        }
                    }
                }
            }
        }
        self.open_loops >= 0 || after
    }
}

// the operations the rest of the program may execute after the candidate
// range: the plain continuation, plus one thread per loop-back edge that
// re-enters code before the range
fn collect_affected_operations(p: &Program, start: usize, end: usize) -> Vec<Vec<Operation>> {
    let num_ops = p.ops.len();
    let mut result: Vec<Vec<Operation>> = Vec::new();
    if end + 1 >= num_ops {
        return result;
    }
    result.push(Vec::new());
    for i in end + 1..num_ops {
        let op = p.ops[i].clone();
        result[0].push(op.clone());
        if op.typ == OpType::Lpe {
            if let Some((loop_start, _)) = util::enclosing_loop(p, i) {
                let mut thread = result[0].clone();
                for j in loop_start..start {
                    thread.push(p.ops[j].clone());
                }
                result.push(thread);
            }
        }
    }
    result
}

/// Find embedded sequence programs of at least `min_length` operations,
/// nested inside at least `min_loops_outside` loops and containing at least
/// `min_loops_inside` loops themselves.
pub fn find_embedded_seq_programs(
    p: &Program,
    min_length: usize,
    min_loops_outside: usize,
    min_loops_inside: i64,
) -> Vec<EmbeddedSeq> {
    let mut result: Vec<EmbeddedSeq> = Vec::new();
    let num_ops = p.ops.len();
    if num_ops == 0 || util::has_indirect(p) {
        return result;
    }
    let mut tracker = CellTracker::default();
    for start in 0..num_ops.saturating_sub(1) {
        if util::loop_depth(p, start) < min_loops_outside {
            continue;
        }
        tracker.reset();
        let mut best_end: Option<usize> = None;
        let mut best_output: Option<i64> = None;
        for i in start..num_ops {
            if !tracker.update(&p.ops[i], false) {
                break;
            }
            let mut ok = tracker.loops >= min_loops_inside && tracker.open_loops == 0;
            if ok {
                let affected = collect_affected_operations(p, start, i);
                tracker.output_cell = None;
                for (t, thread) in affected.iter().enumerate() {
                    tracker.overridden_cells.clear();
                    for op in thread {
                        if !tracker.update(op, true) {
                            ok = false;
                            break;
                        }
                    }
                    // a loop-back thread must not feed a clobbered input
                    // cell back into the range
                    let is_loop_thread = t > 0;
                    if is_loop_thread {
                        if let Some(input) = tracker.input_cell {
                            if tracker.written_cells.contains(&input)
                                && !tracker.overridden_cells.contains(&input)
                            {
                                ok = false;
                            }
                        }
                    }
                    if !ok {
                        break;
                    }
                }
            }
            if ok {
                best_end = Some(i);
                best_output = tracker.output_cell;
            }
        }
        if let (Some(end), Some(output_cell), Some(input_cell)) =
            (best_end, best_output, tracker.input_cell)
        {
            if start + min_length <= end + 1 && result.last().map(|r| r.end) != Some(end) {
                result.push(EmbeddedSeq {
                    start,
                    end,
                    input_cell,
                    output_cell,
                });
            }
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Unfolding
// ---------------------------------------------------------------------------

fn can_unfold(typ: OpType) -> bool {
    typ == OpType::Seq || typ == OpType::Prg
}

// prepare a called program for inlining: strip nops and comments, and
// zero-initialize every cell it reads without writing first
fn prepare_embedding(sub: &mut Program, embedding_type: OpType) -> bool {
    if util::has_indirect(sub) {
        return false;
    }
    util::remove_nops(sub);
    for op in &mut sub.ops {
        if op.typ != OpType::Seq {
            op.comment.clear();
        }
    }
    let mut initialized = BTreeSet::new();
    if embedding_type == OpType::Seq {
        initialized.insert(Program::INPUT_CELL);
    } else {
        for i in 0..sub.directive(Program::DIRECTIVE_INPUTS, 1) {
            initialized.insert(i);
        }
    }
    let initialized: std::collections::HashSet<i64> = initialized.into_iter().collect();
    let uninitialized = util::used_uninitialized_cells(sub, &initialized);
    for cell in uninitialized {
        sub.push_front(OpType::Mov, Operand::Direct(cell), Operand::constant(0));
    }
    true
}

fn shift_operand(operand: &mut Operand, start: i64, shared_region: i64, largest_used: i64) {
    if let Operand::Direct(cell) = operand {
        if *cell < shared_region {
            *cell += start;
        } else {
            *cell += largest_used;
        }
    }
}

/// Inline the `seq`/`prg` call at `pos` (or the first one if `pos` is
/// `None`), loading the called program through `load`.
pub fn unfold_with(
    main: &mut Program,
    pos: Option<usize>,
    load: &dyn Fn(Uid) -> Option<Program>,
) -> bool {
    if util::has_indirect(main) {
        return false;
    }
    let pos = match pos {
        Some(pos) => pos,
        None => match main.ops.iter().position(|op| can_unfold(op.typ)) {
            Some(pos) => pos,
            None => return false,
        },
    };
    if pos >= main.ops.len() || !can_unfold(main.ops[pos].typ) {
        return false;
    }
    let emb_op = main.ops[pos].clone();
    let Some(id) = emb_op.source.as_constant().and_then(|n| n.to_i64()) else {
        return false;
    };
    let Ok(uid) = Uid::from_int(id) else {
        return false;
    };
    let Some(mut sub) = load(uid) else {
        return false;
    };
    if !prepare_embedding(&mut sub, emb_op.typ) {
        return false;
    }
    let Some(start) = emb_op.target.as_direct() else {
        return false;
    };
    let shared_region = if emb_op.typ == OpType::Prg {
        sub.directive(Program::DIRECTIVE_INPUTS, 1)
            .max(sub.directive(Program::DIRECTIVE_OUTPUTS, 1))
    } else {
        1
    };
    let Some((_, largest_used)) = util::used_memory_cells(main, -1) else {
        return false;
    };
    for op in &mut sub.ops {
        shift_operand(&mut op.target, start, shared_region, largest_used);
        shift_operand(&mut op.source, start, shared_region, largest_used);
    }
    main.ops.splice(pos..pos + 1, sub.ops);
    true
}

/// Inline a call, loading the called program from the programs directory.
pub fn unfold(main: &mut Program, pos: Option<usize>) -> bool {
    unfold_with(main, pos, &load_from_disk)
}

fn load_from_disk(uid: Uid) -> Option<Program> {
    let path = setup::program_path(uid, false);
    load_from_path(&path)
}

fn load_from_path(path: &Path) -> Option<Program> {
    parser::parse_file(path).ok()
}

/// Unfolded programs above this complexity are better kept folded: more
/// than one loop, or a call at the root level next to a loop.
pub fn should_fold(main: &Program) -> bool {
    let mut level = 0i64;
    let mut num_loops = 0i64;
    let mut has_root_ref = false;
    for op in &main.ops {
        match op.typ {
            OpType::Lpb => {
                level += 1;
                num_loops += 1;
            }
            OpType::Lpe => level -= 1,
            OpType::Seq | OpType::Prg => {
                if level == 0 {
                    has_root_ref = true;
                }
            }
            _ => {}
        }
    }
    num_loops > 1 || (num_loops > 0 && has_root_ref)
}

/// Repeatedly inline calls while the result stays simple.
pub fn auto_unfold_with(main: &mut Program, load: &dyn Fn(Uid) -> Option<Program>) -> bool {
    let mut changed = false;
    loop {
        let mut unfolded = false;
        for i in 0..main.ops.len() {
            if !can_unfold(main.ops[i].typ) {
                continue;
            }
            let mut copy = main.clone();
            if !unfold_with(&mut copy, Some(i), load) {
                continue;
            }
            if !should_fold(&copy) {
                *main = copy;
                unfolded = true;
                break;
            }
        }
        if unfolded {
            changed = true;
        } else {
            return changed;
        }
    }
}

pub fn auto_unfold(main: &mut Program) -> bool {
    auto_unfold_with(main, &load_from_disk)
}

// ---------------------------------------------------------------------------
// Folding
// ---------------------------------------------------------------------------

// match one operand against another under a growing cell renaming
fn match_operand(
    sub: &Operand,
    main: &Operand,
    cell_map: &mut BTreeMap<i64, i64>,
) -> bool {
    match (sub, main) {
        (Operand::Constant(a), Operand::Constant(b)) => a == b,
        (Operand::Direct(a), Operand::Direct(b)) => match cell_map.get(a) {
            Some(mapped) => mapped == b,
            None => {
                if cell_map.values().any(|v| v == b) {
                    return false; // mapping must stay injective
                }
                cell_map.insert(*a, *b);
                true
            }
        },
        _ => false,
    }
}

/// Search for an occurrence of `sub` inside `main` modulo a renaming of
/// cells; returns the position and extends `cell_map` with the renaming.
pub fn search_subprogram(
    main: &Program,
    sub: &Program,
    cell_map: &mut BTreeMap<i64, i64>,
) -> Option<usize> {
    if sub.ops.is_empty() || main.ops.len() < sub.ops.len() {
        return None;
    }
    for start in 0..=(main.ops.len() - sub.ops.len()) {
        let mut candidate = cell_map.clone();
        let mut matched = true;
        for (i, sub_op) in sub.ops.iter().enumerate() {
            let main_op = &main.ops[start + i];
            if sub_op.typ != main_op.typ
                || !match_operand(&sub_op.target, &main_op.target, &mut candidate)
                || !(sub_op.typ.metadata().num_operands < 2
                    || match_operand(&sub_op.source, &main_op.source, &mut candidate))
            {
                matched = false;
                break;
            }
        }
        if matched {
            *cell_map = candidate;
            return Some(start);
        }
    }
    None
}

/// Replace an occurrence of `sub` in `main` with a `seq` call to `sub_id`.
/// The occurrence's scratch cells must be zero-initialized at the match
/// position and unused by the rest of the program.
pub fn fold(
    main: &mut Program,
    mut sub: Program,
    sub_id: Uid,
    max_memory: i64,
) -> bool {
    if util::has_indirect(main) || util::has_indirect(&sub) {
        return false;
    }
    util::remove_nops(&mut sub);
    if sub.ops.is_empty() {
        return false;
    }
    let mut cell_map = BTreeMap::new();
    let Some(main_pos) = search_subprogram(main, &sub, &mut cell_map) else {
        return false;
    };
    let Some((used_sub_cells, _)) = util::used_memory_cells(&sub, max_memory) else {
        return false;
    };
    let Some((_, largest_used_main)) = util::used_memory_cells(main, max_memory) else {
        return false;
    };

    // walk the main program with the partial evaluator: the mapped scratch
    // cells must hold zero when the subprogram starts, and must not be read
    // outside of it
    let mut partial = crate::opt::partial_eval::PartialEvaluator::new();
    partial.init_zeros(Program::INPUT_CELL + 1, largest_used_main);
    let end = main_pos + sub.ops.len();
    for i in 0..main.ops.len() {
        let op = &main.ops[i];
        for &cell in &used_sub_cells {
            if cell == Program::OUTPUT_CELL {
                continue;
            }
            let Some(&mapped) = cell_map.get(&cell) else {
                continue;
            };
            if (i < main_pos || i >= end) && util::is_reading_cell(op, mapped) {
                return false;
            }
            if i == main_pos && !partial.has_value(mapped, &Number::ZERO) {
                return false;
            }
        }
        partial.step(main, i);
    }

    let Some(&mapped_input) = cell_map.get(&Program::INPUT_CELL) else {
        return false;
    };
    main.ops.splice(
        main_pos..end,
        [Operation::new(
            OpType::Seq,
            Operand::Direct(mapped_input),
            Operand::Constant(Number::Small(sub_id.to_int())),
        )],
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;
    use crate::lang::printer::print_program;

    #[test]
    fn finds_pure_loop_range() {
        // the outer loop re-runs a self-contained doubling computation with
        // input $1 and output $3
        let src = "lpb $0\n  sub $0,1\n  mov $2,$1\n  mov $3,0\n  lpb $2\n    sub $2,1\n    add $3,2\n  lpe\n  mov $1,$3\nlpe\n";
        let p = parse_program(src).expect("valid program");
        let found = find_embedded_seq_programs(&p, 3, 1, 1);
        assert!(!found.is_empty());
        let e = &found[0];
        assert_eq!(e.input_cell, 1);
        assert_eq!(e.output_cell, 3);
        assert!(e.end - e.start + 1 >= 3);
    }

    #[test]
    fn no_embedded_programs_in_flat_code() {
        let p = parse_program("add $0,1\nmul $0,2\n").expect("valid program");
        assert!(find_embedded_seq_programs(&p, 3, 1, 1).is_empty());
    }

    #[test]
    fn unfold_inlines_a_call() {
        let mut main = parse_program("add $0,1\nseq $0,45\nmul $0,2\n").expect("valid");
        let sub = parse_program("add $0,$0\n").expect("valid");
        let loader = move |uid: Uid| {
            if uid.to_int() == 45 {
                Some(sub.clone())
            } else {
                None
            }
        };
        assert!(unfold_with(&mut main, None, &loader));
        let printed = print_program(&main);
        assert_eq!(printed, "add $0,1\nadd $0,$0\nmul $0,2\n");
    }

    #[test]
    fn fold_recovers_a_seq_call() {
        let sub = parse_program("mov $1,$0\nlpb $1\n  sub $1,1\n  add $0,3\nlpe\n").expect("valid");
        let mut main =
            parse_program("mov $3,$0\nlpb $3\n  sub $3,1\n  add $0,3\nlpe\nmul $0,2\n")
                .expect("valid");
        // sub's scratch $1 maps to $3, which holds zero at the match
        let folded = fold(
            &mut main,
            sub.clone(),
            "A000244".parse().expect("valid uid"),
            100_000,
        );
        assert!(folded);
        assert_eq!(util::count_ops(&main, OpType::Seq), 1);
        assert_eq!(main.ops.len(), 2);
    }

    #[test]
    fn fold_then_unfold_preserves_behavior() {
        use crate::eval::evaluator::Evaluator;
        use crate::sys::setup::Settings;
        let sub = parse_program("lpb $0\n  sub $0,1\n  add $1,2\nlpe\nmov $0,$1\n").expect("valid");
        let original = sub.clone();
        let mut main = original.clone();
        let uid: Uid = "A005843".parse().expect("valid uid");
        assert!(fold(&mut main, sub.clone(), uid, 100_000));
        assert_eq!(util::count_ops(&main, OpType::Seq), 1);
        let loader = move |u: Uid| {
            if u == uid {
                Some(sub.clone())
            } else {
                None
            }
        };
        assert!(unfold_with(&mut main, None, &loader));
        assert!(!util::has_op(&main, OpType::Seq));
        let mut evaluator = Evaluator::new(Settings::default());
        let (s1, _) = evaluator.eval(&original, 8).expect("evaluates");
        let (s2, _) = evaluator.eval(&main, 8).expect("evaluates");
        assert_eq!(s1, s2);
    }

    #[test]
    fn folding_heuristic() {
        let two_loops =
            parse_program("lpb $0\n  sub $0,1\nlpe\nlpb $1\n  sub $1,1\nlpe\n").expect("valid");
        assert!(should_fold(&two_loops));
        let one_loop = parse_program("lpb $0\n  sub $0,1\nlpe\n").expect("valid");
        assert!(!should_fold(&one_loop));
        let loop_and_call =
            parse_program("lpb $0\n  sub $0,1\nlpe\nseq $0,45\n").expect("valid");
        assert!(should_fold(&loop_and_call));
    }
}
