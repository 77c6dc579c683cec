//! Program model: operands, operations, and the operation metadata table.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::core::number::Number;

// ---------------------------------------------------------------------------
// Operands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operand {
    /// A literal number.
    Constant(Number),
    /// The value of the cell with the given index.
    Direct(i64),
    /// The value of the cell whose index is the value of the given cell.
    Indirect(i64),
}

impl Operand {
    pub fn constant(value: i64) -> Operand {
        Operand::Constant(Number::Small(value))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Operand::Constant(_))
    }

    /// The constant value, if this is a constant operand.
    pub fn as_constant(&self) -> Option<&Number> {
        match self {
            Operand::Constant(n) => Some(n),
            _ => None,
        }
    }

    /// The referenced cell index for direct operands.
    pub fn as_direct(&self) -> Option<i64> {
        match self {
            Operand::Direct(c) => Some(*c),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Constant(n) => write!(f, "{}", n),
            Operand::Direct(c) => write!(f, "${}", c),
            Operand::Indirect(c) => write!(f, "$${}", c),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation types and metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpType {
    Nop,
    Mov,
    Add,
    Sub,
    Trn,
    Mul,
    Div,
    Dif,
    Mod,
    Pow,
    Bin,
    Gcd,
    Lex,
    Min,
    Max,
    Equ,
    Neq,
    Leq,
    Geq,
    Log,
    Nrt,
    Dgs,
    Dgr,
    Clr,
    Fil,
    Rol,
    Ror,
    Cmp,
    Lpb,
    Lpe,
    Seq,
    Prg,
    Dbg,
}

/// Static facts about an operation type. There is exactly one table; every
/// component that needs arity, read/write behavior or commutativity looks it
/// up here.
pub struct OpMetadata {
    pub typ: OpType,
    pub name: &'static str,
    pub short: char,
    pub num_operands: usize,
    pub reads_target: bool,
    pub writes_target: bool,
    pub writes_region: bool,
    pub is_commutative: bool,
    pub is_arithmetic: bool,
    pub is_public: bool,
}

macro_rules! op_table {
    ($($typ:ident, $name:literal, $short:literal, $ops:literal,
       $rt:literal, $wt:literal, $wr:literal, $comm:literal, $arith:literal, $pub:literal;)*) => {
        pub const OP_TYPES: &[OpType] = &[$(OpType::$typ),*];

        pub const OP_METADATA: &[OpMetadata] = &[$(
            OpMetadata {
                typ: OpType::$typ,
                name: $name,
                short: $short,
                num_operands: $ops,
                reads_target: $rt,
                writes_target: $wt,
                writes_region: $wr,
                is_commutative: $comm,
                is_arithmetic: $arith,
                is_public: $pub,
            },
        )*];
    };
}

// typ, name, short, operands, reads_t, writes_t, region, commutative, arithmetic, public
op_table! {
    Nop, "nop", '0', 0, false, false, false, false, false, false;
    Mov, "mov", 'm', 2, false, true,  false, false, false, true;
    Add, "add", 'a', 2, true,  true,  false, true,  true,  true;
    Sub, "sub", 's', 2, true,  true,  false, false, true,  true;
    Trn, "trn", 't', 2, true,  true,  false, false, true,  true;
    Mul, "mul", 'u', 2, true,  true,  false, true,  true,  true;
    Div, "div", 'd', 2, true,  true,  false, false, true,  true;
    Dif, "dif", 'f', 2, true,  true,  false, false, true,  true;
    Mod, "mod", 'o', 2, true,  true,  false, false, true,  true;
    Pow, "pow", 'p', 2, true,  true,  false, false, true,  true;
    Bin, "bin", 'b', 2, true,  true,  false, false, true,  true;
    Gcd, "gcd", 'g', 2, true,  true,  false, true,  true,  true;
    Lex, "lex", 'x', 2, true,  true,  false, false, true,  true;
    Min, "min", 'i', 2, true,  true,  false, true,  true,  true;
    Max, "max", 'j', 2, true,  true,  false, true,  true,  true;
    Equ, "equ", 'e', 2, true,  true,  false, true,  true,  true;
    Neq, "neq", 'w', 2, true,  true,  false, true,  true,  true;
    Leq, "leq", 'k', 2, true,  true,  false, false, true,  true;
    Geq, "geq", 'y', 2, true,  true,  false, false, true,  true;
    Log, "log", 'r', 2, true,  true,  false, false, true,  true;
    Nrt, "nrt", 'v', 2, true,  true,  false, false, true,  true;
    Dgs, "dgs", 'c', 2, true,  true,  false, false, true,  true;
    Dgr, "dgr", 'z', 2, true,  true,  false, false, true,  true;
    Clr, "clr", 'C', 2, false, true,  true,  false, false, false;
    Fil, "fil", 'F', 2, true,  true,  true,  false, false, false;
    Rol, "rol", 'R', 2, false, true,  true,  false, false, false;
    Ror, "ror", 'O', 2, false, true,  true,  false, false, false;
    Cmp, "cmp", 'E', 2, true,  true,  false, true,  true,  false;
    Lpb, "lpb", 'l', 2, true,  false, false, false, false, true;
    Lpe, "lpe", 'L', 0, false, false, false, false, false, true;
    Seq, "seq", 'q', 2, true,  true,  false, false, false, true;
    Prg, "prg", 'P', 2, false, true,  true,  false, false, false;
    Dbg, "dbg", 'D', 0, false, false, false, false, false, false;
}

impl OpType {
    pub fn metadata(&self) -> &'static OpMetadata {
        // OP_METADATA is generated in declaration order
        &OP_METADATA[*self as usize]
    }

    pub fn name(&self) -> &'static str {
        self.metadata().name
    }

    pub fn from_name(name: &str) -> Option<OpType> {
        let lower = name.to_ascii_lowercase();
        OP_METADATA
            .iter()
            .find(|m| m.name == lower)
            .map(|m| m.typ)
    }

    pub fn from_short(short: char) -> Option<OpType> {
        OP_METADATA.iter().find(|m| m.short == short).map(|m| m.typ)
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Operation {
    pub typ: OpType,
    pub target: Operand,
    pub source: Operand,
    pub comment: String,
}

impl Operation {
    pub fn new(typ: OpType, target: Operand, source: Operand) -> Self {
        Operation {
            typ,
            target,
            source,
            comment: String::new(),
        }
    }

    pub fn nop() -> Self {
        Operation::new(OpType::Nop, Operand::constant(0), Operand::constant(0))
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }
}

// comments never influence program identity
impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ && self.target == other.target && self.source == other.source
    }
}

impl Eq for Operation {}

impl Hash for Operation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.typ.hash(state);
        self.target.hash(state);
        self.source.hash(state);
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.typ.metadata();
        match meta.num_operands {
            0 => write!(f, "{}", meta.name),
            1 => write!(f, "{} {}", meta.name, self.target),
            _ => write!(f, "{} {},{}", meta.name, self.target, self.source),
        }
    }
}

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub ops: Vec<Operation>,
    pub directives: BTreeMap<String, i64>,
}

impl Program {
    pub const INPUT_CELL: i64 = 0;
    pub const OUTPUT_CELL: i64 = 0;

    pub const DIRECTIVE_INPUTS: &'static str = "inputs";
    pub const DIRECTIVE_OUTPUTS: &'static str = "outputs";
    pub const DIRECTIVE_OFFSET: &'static str = "offset";

    pub fn new() -> Self {
        Program::default()
    }

    pub fn push(&mut self, typ: OpType, target: Operand, source: Operand) {
        self.ops.push(Operation::new(typ, target, source));
    }

    pub fn push_front(&mut self, typ: OpType, target: Operand, source: Operand) {
        self.ops.insert(0, Operation::new(typ, target, source));
    }

    pub fn directive(&self, name: &str, default: i64) -> i64 {
        self.directives.get(name).copied().unwrap_or(default)
    }

    pub fn set_directive(&mut self, name: &str, value: i64) {
        if value == 0 && name == Self::DIRECTIVE_OFFSET {
            self.directives.remove(name);
        } else {
            self.directives.insert(name.to_string(), value);
        }
    }

    pub fn offset(&self) -> i64 {
        self.directive(Self::DIRECTIVE_OFFSET, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_table_is_aligned_with_enum() {
        for (i, t) in OP_TYPES.iter().enumerate() {
            assert_eq!(*t as usize, i);
            assert_eq!(t.metadata().typ, *t);
        }
    }

    #[test]
    fn short_names_are_unique() {
        for a in OP_METADATA {
            let count = OP_METADATA.iter().filter(|b| b.short == a.short).count();
            assert_eq!(count, 1, "duplicate short name {:?}", a.short);
        }
    }

    #[test]
    fn lookup_by_name_is_case_insensitive() {
        assert_eq!(OpType::from_name("MOV"), Some(OpType::Mov));
        assert_eq!(OpType::from_name("lpb"), Some(OpType::Lpb));
        assert_eq!(OpType::from_name("frobnicate"), None);
    }

    #[test]
    fn comments_do_not_affect_identity() {
        let a = Operation::new(OpType::Add, Operand::Direct(0), Operand::constant(1));
        let b = a.clone().with_comment("increment");
        assert_eq!(a, b);
    }
}
