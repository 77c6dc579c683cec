//! Error taxonomy.
//!
//! Arithmetic never fails (it saturates to `Inf`); everything else that can
//! go wrong falls into one of the families below. Runtime limits are
//! recoverable at the mining-loop boundary and are converted into evaluation
//! failures there; parse and validation errors discard the offending
//! candidate.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Runtime / evaluation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("exceeded maximum number of cycles ({0})")]
    CycleLimit(i64),

    #[error("exceeded maximum memory cell ({0})")]
    MemoryLimit(i64),

    #[error("exceeded evaluation deadline")]
    DeadlineExceeded,

    #[error("cannot write to a constant operand")]
    ConstantWrite,

    #[error("negative memory cell index {0}")]
    NegativeCellIndex(i64),

    #[error("infinite value used as memory cell index")]
    InfiniteCellIndex,

    #[error("unknown program {0}")]
    UnknownProgram(String),

    #[error("recursive call of program {0}")]
    RecursiveCall(String),

    #[error("invalid program: {0}")]
    InvalidProgram(String),

    #[error("internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("invalid identifier '{0}'")]
    InvalidUid(String),

    #[error("invalid operand '{0}'")]
    InvalidOperand(String),

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("invalid directive line '{0}'")]
    InvalidDirective(String),

    #[error("line {line}: {message}")]
    AtLine { line: usize, message: String },
}

// ---------------------------------------------------------------------------
// System-level errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("required file not found: {0}")]
    MissingFile(PathBuf),

    #[error("cannot write to {0}")]
    Unwritable(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error for engine operations that touch evaluation, parsing,
/// and the filesystem at once.
#[derive(Debug, Error)]
pub enum MineError {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl EvalError {
    /// Runtime-limit errors are recoverable: the candidate simply failed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EvalError::CycleLimit(_)
                | EvalError::MemoryLimit(_)
                | EvalError::DeadlineExceeded
        )
    }
}
