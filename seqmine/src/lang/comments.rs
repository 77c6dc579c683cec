//! Program header comments carrying metadata.
//!
//! Stored programs start with a comment block of the form
//!
//! ```text
//! ; A000045: Fibonacci numbers
//! ; Submitted by alice
//! ; 0,1,1,2,3,5,8,13
//! ```
//!
//! and updates carry `Change type:` and `Previous hash:` fields used by the
//! update policy for collision detection.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::uid::Uid;
use crate::lang::program::{OpType, Program};

pub const PREFIX_SUBMITTED_BY: &str = "Submitted by ";
pub const PREFIX_CHANGE_TYPE: &str = "Change type: ";
pub const PREFIX_PREVIOUS_HASH: &str = "Previous hash: ";
pub const PREFIX_FORMULA: &str = "Formula: ";
pub const PREFIX_MINER_PROFILE: &str = "Miner Profile: ";
pub const CODED_MANUALLY: &str = "Coded manually";

static SEQ_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][0-9]{1,6})(\b.*)?$").expect("valid pattern"));

/// The value of a `; <prefix><value>` header field, if present.
pub fn get_comment_field(p: &Program, prefix: &str) -> Option<String> {
    for op in &p.ops {
        if op.typ != OpType::Nop {
            break; // header block ends at the first real operation
        }
        if let Some(value) = op.comment.strip_prefix(prefix) {
            return Some(value.trim().to_string());
        }
    }
    None
}

/// Remove a header field, keeping the remaining comments intact.
pub fn remove_comment_field(p: &mut Program, prefix: &str) {
    let header_len = p
        .ops
        .iter()
        .take_while(|op| op.typ == OpType::Nop)
        .count();
    p.ops.retain({
        let mut index = 0;
        move |op| {
            let keep = index >= header_len || !op.comment.starts_with(prefix);
            index += 1;
            keep
        }
    });
}

/// The sequence identifier named in the first header comment, if any
/// (`; A000045: ...`).
pub fn extract_sequence_id(p: &Program) -> Option<Uid> {
    let first = p.ops.first()?;
    if first.typ != OpType::Nop {
        return None;
    }
    let caps = SEQ_ID_RE.captures(first.comment.trim())?;
    caps.get(1)?.as_str().parse().ok()
}

pub fn is_coded_manually(p: &Program) -> bool {
    p.ops
        .iter()
        .take_while(|op| op.typ == OpType::Nop)
        .any(|op| op.comment.starts_with(CODED_MANUALLY))
}

/// Drop all comments; nops that only carried comments are removed.
pub fn remove_comments(p: &mut Program) {
    p.ops.retain(|op| op.typ != OpType::Nop);
    for op in &mut p.ops {
        op.comment.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;

    #[test]
    fn header_fields() {
        let src = "; A000045: Fibonacci numbers\n; Submitted by alice\n; Change type: Faster\nmov $0,1\n";
        let p = parse_program(src).expect("valid program");
        assert_eq!(
            get_comment_field(&p, PREFIX_SUBMITTED_BY),
            Some("alice".to_string())
        );
        assert_eq!(
            get_comment_field(&p, PREFIX_CHANGE_TYPE),
            Some("Faster".to_string())
        );
        assert_eq!(get_comment_field(&p, PREFIX_PREVIOUS_HASH), None);
        assert_eq!(
            extract_sequence_id(&p),
            Some("A000045".parse().expect("valid uid"))
        );
    }

    #[test]
    fn id_extraction_requires_leading_comment() {
        let p = parse_program("mov $0,1 ; A000045\n").expect("valid program");
        assert_eq!(extract_sequence_id(&p), None);
    }

    #[test]
    fn comment_removal() {
        let src = "; header\nmov $0,1 ; inline\n";
        let mut p = parse_program(src).expect("valid program");
        remove_comments(&mut p);
        assert_eq!(p.ops.len(), 1);
        assert!(p.ops[0].comment.is_empty());
    }
}
