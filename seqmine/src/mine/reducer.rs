//! Sequence reductions shared by the matchers.

use crate::core::number::Number;
use crate::core::sequence::Sequence;
use crate::lang::semantics;

/// Subtract the minimum from all terms. Only defined for sequences without
/// negative terms; those are returned unchanged with offset zero.
pub fn truncate(seq: &mut Sequence) -> Number {
    if seq.is_empty() || seq.iter().any(Number::is_negative) {
        return Number::ZERO;
    }
    let min = seq.iter().min().cloned().unwrap_or(Number::ZERO);
    if !min.is_zero() {
        for term in seq.iter_mut() {
            *term = term.sub(&min);
        }
    }
    min
}

/// Divide all terms by their greatest common divisor; returns the factor
/// (at least one).
pub fn shrink(seq: &mut Sequence) -> Number {
    let mut factor: Option<Number> = None;
    for term in seq.iter() {
        if !term.is_zero() {
            factor = Some(match factor {
                Some(f) => semantics::gcd(&f, &term.abs()),
                None => term.abs(),
            });
        }
    }
    let factor = match factor {
        Some(f) if !f.is_zero() && !f.is_inf() => f,
        _ => Number::ONE,
    };
    if factor != Number::ONE {
        for term in seq.iter_mut() {
            *term = term.div(&factor);
        }
    }
    factor
}

/// Apply pairwise differences while the sequence stays strictly increasing,
/// up to `max_delta` rounds; returns the number of applied rounds.
pub fn delta_reduce(seq: &mut Sequence, max_delta: usize) -> usize {
    let mut count = 0;
    for _ in 0..max_delta {
        if seq.len() < 2 {
            break;
        }
        let mut next = Vec::with_capacity(seq.len() - 1);
        let mut ok = true;
        for j in 0..seq.len() - 1 {
            if seq[j] < seq[j + 1] {
                next.push(seq[j + 1].sub(&seq[j]));
            } else {
                ok = false;
                break;
            }
        }
        if !ok {
            break;
        }
        seq.0 = next;
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_subtracts_minimum() {
        let mut s = Sequence::from_i64(&[5, 7, 9]);
        assert_eq!(truncate(&mut s), Number::Small(5));
        assert_eq!(s, Sequence::from_i64(&[0, 2, 4]));
        let mut neg = Sequence::from_i64(&[-1, 3]);
        assert_eq!(truncate(&mut neg), Number::ZERO);
        assert_eq!(neg, Sequence::from_i64(&[-1, 3]));
    }

    #[test]
    fn shrink_divides_by_gcd() {
        let mut s = Sequence::from_i64(&[4, 6, 8]);
        assert_eq!(shrink(&mut s), Number::Small(2));
        assert_eq!(s, Sequence::from_i64(&[2, 3, 4]));
        let mut zeros = Sequence::from_i64(&[0, 0]);
        assert_eq!(shrink(&mut zeros), Number::ONE);
    }

    #[test]
    fn delta_counts_strictly_increasing_rounds() {
        // squares: one delta round gives the odd numbers, still increasing
        let mut s = Sequence::from_i64(&[0, 1, 4, 9, 16, 25, 36]);
        let count = delta_reduce(&mut s, 5);
        assert_eq!(count, 2);
        assert_eq!(s, Sequence::from_i64(&[2, 2, 2, 2, 2]));
        let mut flat = Sequence::from_i64(&[7, 7, 7]);
        assert_eq!(delta_reduce(&mut flat, 5), 0);
    }
}
