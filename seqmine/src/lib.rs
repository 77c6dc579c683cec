//! seqmine: a mining and program-synthesis engine for an assembly-like
//! mini-language whose semantics are integer sequences.
//!
//! Given a corpus of target integer sequences, the engine generates,
//! mutates, evaluates, matches, optimizes, minimizes, and persists small
//! programs that reproduce each target. Programs are stored keyed by
//! sequence identifier; a new program replaces an existing one only when
//! it is demonstrably better under an explicit comparison policy.

pub mod core;
pub mod errors;
pub mod eval;
pub mod lang;
pub mod mine;
pub mod opt;
pub mod seq;
pub mod sys;

pub use crate::core::memory::Memory;
pub use crate::core::number::Number;
pub use crate::core::sequence::Sequence;
pub use crate::core::uid::{Uid, UidSet};
pub use crate::errors::{EvalError, MineError, ParseError, SetupError};
pub use crate::eval::evaluator::{Evaluator, Status, Steps};
pub use crate::eval::incremental::IncrementalEvaluator;
pub use crate::eval::interpreter::Interpreter;
pub use crate::lang::program::{OpType, Operand, Operation, Program};
pub use crate::mine::miner::Miner;
pub use crate::sys::setup::Settings;
