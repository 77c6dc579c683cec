//! Printer for the textual program form.

use std::fmt::Write;

use crate::lang::program::{OpType, Operation, Program};

fn print_operation(op: &Operation, indent: usize, out: &mut String) {
    let meta = op.typ.metadata();
    if op.typ == OpType::Nop {
        // nops only carry comments
        if !op.comment.is_empty() {
            let _ = writeln!(out, "; {}", op.comment);
        }
        return;
    }
    let _ = write!(out, "{}", " ".repeat(indent));
    match meta.num_operands {
        0 => {
            let _ = write!(out, "{}", meta.name);
        }
        1 => {
            let _ = write!(out, "{} {}", meta.name, op.target);
        }
        _ => {
            let _ = write!(out, "{} {},{}", meta.name, op.target, op.source);
        }
    }
    if !op.comment.is_empty() {
        let _ = write!(out, " ; {}", op.comment);
    }
    let _ = writeln!(out);
}

pub fn print_program(p: &Program) -> String {
    let mut out = String::new();
    for (key, value) in &p.directives {
        let _ = writeln!(out, "#{} {}", key, value);
    }
    let mut indent = 0usize;
    for op in &p.ops {
        if op.typ == OpType::Lpe {
            indent = indent.saturating_sub(2);
        }
        print_operation(op, indent, &mut out);
        if op.typ == OpType::Lpb {
            indent += 2;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::program::{Operand, Program};

    #[test]
    fn loops_are_indented() {
        let mut p = Program::new();
        p.push(OpType::Lpb, Operand::Direct(0), Operand::constant(1));
        p.push(OpType::Sub, Operand::Direct(0), Operand::constant(1));
        p.push(OpType::Lpe, Operand::constant(0), Operand::constant(0));
        assert_eq!(print_program(&p), "lpb $0,1\n  sub $0,1\nlpe\n");
    }

    #[test]
    fn comments_and_directives() {
        let mut p = Program::new();
        p.set_directive(Program::DIRECTIVE_OFFSET, 1);
        let mut header = Operation::nop();
        header.comment = "A000001".to_string();
        p.ops.push(header);
        p.push(OpType::Mov, Operand::Direct(0), Operand::constant(7));
        p.ops[1].comment = "answer".to_string();
        assert_eq!(print_program(&p), "#offset 1\n; A000001\nmov $0,7 ; answer\n");
    }
}
