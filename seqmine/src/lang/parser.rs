//! Parser for the textual program form.
//!
//! The format is line based:
//!   - `; comment` lines attach to the following operation (or stand alone
//!     as `nop` carriers when the program starts with a header block);
//!   - `#key value` lines set integer directives;
//!   - everything else is `mnemonic [target[,source]] [; comment]`.

use std::path::Path;

use crate::core::number::Number;
use crate::errors::ParseError;
use crate::lang::program::{OpType, Operand, Operation, Program};

pub fn parse_file(path: &Path) -> Result<Program, ParseError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ParseError::AtLine {
            line: 0,
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
    parse_program(&content)
}

pub fn parse_program(content: &str) -> Result<Program, ParseError> {
    let mut program = Program::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        parse_line(line, &mut program).map_err(|e| ParseError::AtLine {
            line: index + 1,
            message: e.to_string(),
        })?;
    }
    Ok(program)
}

fn parse_line(line: &str, program: &mut Program) -> Result<(), ParseError> {
    // standalone comment lines become nops carrying the comment, so that
    // header comments survive a parse/print round trip
    if let Some(comment) = line.strip_prefix(';') {
        let mut nop = Operation::nop();
        nop.comment = comment.trim().to_string();
        program.ops.push(nop);
        return Ok(());
    }
    if let Some(directive) = line.strip_prefix('#') {
        let mut parts = directive.split_whitespace();
        let key = parts
            .next()
            .ok_or_else(|| ParseError::InvalidDirective(line.to_string()))?;
        let value = parts
            .next()
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| ParseError::InvalidDirective(line.to_string()))?;
        if parts.next().is_some() {
            return Err(ParseError::InvalidDirective(line.to_string()));
        }
        program.directives.insert(key.to_string(), value);
        return Ok(());
    }

    // split off a trailing comment
    let (code, comment) = match line.find(';') {
        Some(pos) => (line[..pos].trim(), line[pos + 1..].trim()),
        None => (line, ""),
    };

    let (mnemonic, rest) = match code.find(char::is_whitespace) {
        Some(pos) => (&code[..pos], code[pos..].trim()),
        None => (code, ""),
    };
    let typ = OpType::from_name(mnemonic)
        .ok_or_else(|| ParseError::UnknownOperation(mnemonic.to_string()))?;
    let meta = typ.metadata();

    let mut op = Operation::new(typ, Operand::constant(0), Operand::constant(0));
    op.comment = comment.to_string();

    if meta.num_operands == 0 {
        if !rest.is_empty() {
            return Err(ParseError::InvalidOperand(rest.to_string()));
        }
    } else {
        let mut parts = rest.split(',').map(str::trim);
        let target = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::InvalidOperand(code.to_string()))?;
        op.target = parse_operand(target)?;
        match parts.next() {
            Some(source) => op.source = parse_operand(source)?,
            None => {
                // single operand form defaults the source; loops over one
                // cell are written as plain `lpb $n`
                if typ == OpType::Lpb {
                    op.source = Operand::constant(1);
                } else if meta.num_operands == 2 {
                    return Err(ParseError::InvalidOperand(code.to_string()));
                }
            }
        }
        if parts.next().is_some() {
            return Err(ParseError::InvalidOperand(code.to_string()));
        }
    }
    program.ops.push(op);
    Ok(())
}

pub fn parse_operand(s: &str) -> Result<Operand, ParseError> {
    if let Some(cell) = s.strip_prefix("$$") {
        let index = cell
            .parse::<i64>()
            .map_err(|_| ParseError::InvalidOperand(s.to_string()))?;
        return Ok(Operand::Indirect(index));
    }
    if let Some(cell) = s.strip_prefix('$') {
        let index = cell
            .parse::<i64>()
            .map_err(|_| ParseError::InvalidOperand(s.to_string()))?;
        return Ok(Operand::Direct(index));
    }
    let value: Number = s
        .parse()
        .map_err(|_| ParseError::InvalidOperand(s.to_string()))?;
    Ok(Operand::Constant(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::printer::print_program;

    #[test]
    fn parses_operations_and_directives() {
        let src = "#offset 1\nmov $1,5\nlpb $0\n  sub $0,1\n  add $1,$2\nlpe\nmov $0,$1\n";
        let p = parse_program(src).expect("valid program");
        assert_eq!(p.ops.len(), 6);
        assert_eq!(p.offset(), 1);
        assert_eq!(p.ops[0].typ, OpType::Mov);
        assert_eq!(p.ops[1].typ, OpType::Lpb);
        assert_eq!(p.ops[1].source, Operand::constant(1));
        assert_eq!(p.ops[3].source, Operand::Direct(2));
    }

    #[test]
    fn parses_comments() {
        let src = "; A000045: Fibonacci\nmov $1,1 ; seed\n";
        let p = parse_program(src).expect("valid program");
        assert_eq!(p.ops[0].typ, OpType::Nop);
        assert_eq!(p.ops[0].comment, "A000045: Fibonacci");
        assert_eq!(p.ops[1].comment, "seed");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_program("frobnicate $0,1\n").is_err());
        assert!(parse_program("mov $0\n").is_err());
        assert!(parse_program("mov $0,1,2\n").is_err());
        assert!(parse_program("mov $x,1\n").is_err());
        assert!(parse_program("#offset\n").is_err());
    }

    #[test]
    fn indirect_operands() {
        let p = parse_program("mov $$3,$2\n").expect("valid program");
        assert_eq!(p.ops[0].target, Operand::Indirect(3));
    }

    #[test]
    fn print_parse_roundtrip() {
        let src = "#offset 2\nmov $1,10\nlpb $0\n  sub $0,1\n  mul $1,2\nlpe\nmov $0,$1\n";
        let p = parse_program(src).expect("valid program");
        let printed = print_program(&p);
        let q = parse_program(&printed).expect("printed form parses");
        assert_eq!(p, q);
        assert_eq!(printed, print_program(&q));
    }
}
