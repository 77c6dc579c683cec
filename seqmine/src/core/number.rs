//! Arbitrary-precision signed integer with an explicit infinity element.
//!
//! `Number` keeps common values in a plain `i64` and transparently promotes
//! to a heap-allocated [`BigNumber`] on overflow. Overflowing the big
//! representation saturates to `Inf`, which absorbs all further arithmetic.
//! Division or modulus by zero also yields `Inf`; there is no arithmetic
//! error channel anywhere in the engine.
//!
//! A promoted value that fits back into `i64` is normalized to the small
//! representation, so equal values always compare and hash identically no
//! matter how they were produced.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use super::big_number::BigNumber;

#[derive(Debug, Clone)]
pub enum Number {
    Small(i64),
    Big(Box<BigNumber>),
    Inf,
}

impl Number {
    pub const ZERO: Number = Number::Small(0);
    pub const ONE: Number = Number::Small(1);
    pub const TWO: Number = Number::Small(2);
    pub const MINUS_ONE: Number = Number::Small(-1);

    pub fn min_value() -> Number {
        Number::Big(Box::new(BigNumber::min_max(false)))
    }

    pub fn max_value() -> Number {
        Number::Big(Box::new(BigNumber::min_max(true)))
    }

    pub fn is_inf(&self) -> bool {
        matches!(self, Number::Inf)
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Number::Small(v) => *v == 0,
            Number::Big(b) => b.is_zero(),
            Number::Inf => false,
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Number::Small(v) => *v < 0,
            Number::Big(b) => b.is_negative(),
            Number::Inf => false,
        }
    }

    /// The value as `i64` if it is finite and fits.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Number::Small(v) => Some(*v),
            Number::Big(b) => b.to_i64(),
            Number::Inf => None,
        }
    }

    pub fn odd(&self) -> bool {
        match self {
            Number::Small(v) => v & 1 != 0,
            Number::Big(b) => b.odd(),
            Number::Inf => false, // by convention
        }
    }

    /// Words used by the underlying representation (1 for small values).
    pub fn num_used_words(&self) -> usize {
        match self {
            Number::Big(b) => b.num_used_words(),
            _ => 1,
        }
    }

    pub fn negate(&mut self) {
        match self {
            Number::Small(v) => {
                if let Some(n) = v.checked_neg() {
                    *v = n;
                } else {
                    let mut b = BigNumber::from_i64(*v);
                    b.negate();
                    *self = Number::Big(Box::new(b));
                }
            }
            Number::Big(b) => b.negate(),
            Number::Inf => {}
        }
    }

    pub fn negated(&self) -> Number {
        let mut n = self.clone();
        n.negate();
        n
    }

    pub fn abs(&self) -> Number {
        if self.is_negative() {
            self.negated()
        } else {
            self.clone()
        }
    }

    fn to_big(&self) -> BigNumber {
        match self {
            Number::Small(v) => BigNumber::from_i64(*v),
            Number::Big(b) => **b,
            Number::Inf => {
                let mut b = BigNumber::zero();
                b.make_infinite();
                b
            }
        }
    }

    // Re-establish the representation invariant after a big-number operation.
    fn normalize(big: BigNumber) -> Number {
        if big.is_infinite() {
            Number::Inf
        } else if let Some(v) = big.to_i64() {
            Number::Small(v)
        } else {
            Number::Big(Box::new(big))
        }
    }

    fn binary_op(
        &self,
        other: &Number,
        small: impl Fn(i64, i64) -> Option<i64>,
        big: impl Fn(&mut BigNumber, &BigNumber),
    ) -> Number {
        if self.is_inf() || other.is_inf() {
            return Number::Inf;
        }
        if let (Number::Small(a), Number::Small(b)) = (self, other) {
            if let Some(r) = small(*a, *b) {
                return Number::Small(r);
            }
        }
        let mut a = self.to_big();
        let b = other.to_big();
        big(&mut a, &b);
        Number::normalize(a)
    }

    pub fn add(&self, other: &Number) -> Number {
        self.binary_op(other, i64::checked_add, BigNumber::add_assign)
    }

    pub fn sub(&self, other: &Number) -> Number {
        self.add(&other.negated())
    }

    pub fn mul(&self, other: &Number) -> Number {
        self.binary_op(other, i64::checked_mul, BigNumber::mul_assign)
    }

    /// Truncated division. Division by zero yields `Inf`.
    pub fn div(&self, other: &Number) -> Number {
        if other.is_zero() {
            return Number::Inf;
        }
        self.binary_op(other, i64::checked_div, BigNumber::div_assign)
    }

    /// Remainder satisfying `a == (a / b) * b + (a % b)`. Modulus by zero
    /// yields `Inf`.
    pub fn rem(&self, other: &Number) -> Number {
        if other.is_zero() {
            return Number::Inf;
        }
        self.binary_op(other, i64::checked_rem, BigNumber::rem_assign)
    }

    fn bitwise(
        &self,
        other: &Number,
        small: impl Fn(i64, i64) -> i64,
        sign: impl Fn(bool, bool) -> bool,
        big: impl Fn(&mut BigNumber, &BigNumber),
    ) -> Number {
        if self.is_inf() || other.is_inf() {
            return Number::Inf;
        }
        if let (Number::Small(a), Number::Small(b)) = (self, other) {
            if let (Some(aa), Some(bb)) = (a.checked_abs(), b.checked_abs()) {
                let v = small(aa, bb);
                let v = if sign(*a < 0, *b < 0) { -v } else { v };
                return Number::Small(v);
            }
        }
        let mut a = self.to_big();
        let b = other.to_big();
        big(&mut a, &b);
        Number::normalize(a)
    }

    /// Bitwise AND on absolute values; negative iff both operands are.
    pub fn bitand(&self, other: &Number) -> Number {
        self.bitwise(other, |a, b| a & b, |s, t| s && t, BigNumber::bitand_assign)
    }

    /// Bitwise OR on absolute values; negative iff either operand is.
    pub fn bitor(&self, other: &Number) -> Number {
        self.bitwise(other, |a, b| a | b, |s, t| s || t, BigNumber::bitor_assign)
    }

    /// Bitwise XOR on absolute values; negative iff the signs differ.
    pub fn bitxor(&self, other: &Number) -> Number {
        self.bitwise(other, |a, b| a ^ b, |s, t| s != t, BigNumber::bitxor_assign)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Small(value)
    }
}

impl FromStr for Number {
    type Err = crate::errors::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t == "inf" {
            return Ok(Number::Inf);
        }
        // short decimal strings always fit into i64
        if t.len() <= 18 {
            return t
                .parse::<i64>()
                .map(Number::Small)
                .map_err(|_| crate::errors::ParseError::InvalidNumber(s.to_string()));
        }
        BigNumber::parse(t)
            .map(Number::normalize)
            .ok_or_else(|| crate::errors::ParseError::InvalidNumber(s.to_string()))
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Inf, Number::Inf) => true,
            (Number::Inf, _) | (_, Number::Inf) => false,
            (Number::Small(a), Number::Small(b)) => a == b,
            _ => self.to_big() == other.to_big(),
        }
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Number::Inf, Number::Inf) => Ordering::Equal,
            (Number::Inf, _) => Ordering::Greater,
            (_, Number::Inf) => Ordering::Less,
            (Number::Small(a), Number::Small(b)) => a.cmp(b),
            _ => self.to_big().cmp(&other.to_big()),
        }
    }
}

impl Hash for Number {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // must agree between the small and big representations
        match self {
            Number::Inf => {
                true.hash(state);
            }
            _ => {
                false.hash(state);
                self.to_big().hash(state);
            }
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Small(v) => write!(f, "{}", v),
            Number::Big(b) => write!(f, "{}", b),
            Number::Inf => write!(f, "inf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> Number {
        s.parse().expect("valid number")
    }

    #[test]
    fn small_overflow_promotes_to_big() {
        let a = Number::Small(i64::MAX);
        let b = a.add(&Number::ONE);
        assert!(matches!(b, Number::Big(_)));
        assert_eq!(b.to_string(), "9223372036854775808");
    }

    #[test]
    fn big_overflow_saturates_to_inf() {
        let max = Number::max_value();
        assert_eq!(max.mul(&Number::TWO), Number::Inf);
        assert_eq!(max.add(&Number::ONE), Number::Inf);
    }

    #[test]
    fn min_divided_by_minus_one_is_big() {
        let a = Number::Small(i64::MIN);
        let b = a.div(&Number::MINUS_ONE);
        assert_eq!(b.to_string(), "9223372036854775808");
    }

    #[test]
    fn negating_min_promotes() {
        let mut a = Number::Small(i64::MIN);
        a.negate();
        assert_eq!(a.to_string(), "9223372036854775808");
    }

    #[test]
    fn division_by_zero_is_inf() {
        assert_eq!(Number::ONE.div(&Number::ZERO), Number::Inf);
        assert_eq!(Number::ONE.rem(&Number::ZERO), Number::Inf);
    }

    #[test]
    fn inf_absorbs() {
        assert_eq!(Number::Inf.add(&Number::ONE), Number::Inf);
        assert_eq!(Number::ONE.mul(&Number::Inf), Number::Inf);
        assert!(Number::Inf > num("99999999999999999999999999"));
        assert!(!Number::Inf.odd());
    }

    #[test]
    fn additive_inverse() {
        for v in [0i64, 1, -1, 12345, i64::MAX, i64::MIN + 1] {
            let a = Number::Small(v);
            assert_eq!(a.add(&a.negated()), Number::ZERO);
        }
    }

    #[test]
    fn small_and_promoted_values_agree() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let small = Number::Small(42);
        let via_big = num("9223372036854775808").add(&num("-9223372036854775766"));
        assert_eq!(small, via_big);
        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        small.hash(&mut h1);
        via_big.hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn truncated_division_and_remainder() {
        let cases = [(7, 2, 3, 1), (-7, 2, -3, -1), (7, -2, -3, 1), (-7, -2, 3, -1)];
        for (a, b, q, r) in cases {
            let a = Number::Small(a);
            let b = Number::Small(b);
            assert_eq!(a.div(&b), Number::Small(q));
            assert_eq!(a.rem(&b), Number::Small(r));
        }
    }

    #[test]
    fn bitwise_sign_rules() {
        let a = Number::Small(-6);
        let b = Number::Small(3);
        assert_eq!(a.bitand(&b), Number::Small(2));
        assert_eq!(a.bitor(&b), Number::Small(-7));
        assert_eq!(a.bitxor(&b), Number::Small(-5));
        let c = Number::Small(-6);
        assert_eq!(a.bitand(&c), Number::Small(-6));
    }
}
