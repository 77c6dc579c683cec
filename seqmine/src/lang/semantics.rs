//! Pure per-operation arithmetic on numbers.
//!
//! [`calc`] is the single kernel shared by the interpreter, the partial
//! evaluator, and the minimizer. All operations are total: there are no
//! arithmetic errors, only saturation to `Inf`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::core::number::Number;
use crate::lang::program::OpType;
use crate::sys::setup;

/// Evaluate a binary operation. `a` is the target value, `b` the source
/// value. For operation types that do not produce a value (loops, calls,
/// region writes) the result is `Inf`.
pub fn calc(typ: OpType, a: &Number, b: &Number) -> Number {
    match typ {
        OpType::Mov => b.clone(),
        OpType::Add => a.add(b),
        OpType::Sub => a.sub(b),
        OpType::Trn => max(&a.sub(b), &Number::ZERO),
        OpType::Mul => a.mul(b),
        OpType::Div => a.div(b),
        OpType::Dif => dif(a, b),
        OpType::Mod => a.rem(b),
        OpType::Pow => pow(a, b),
        OpType::Bin => bin(a, b),
        OpType::Gcd => gcd(a, b),
        OpType::Lex => lex(a, b),
        OpType::Min => min(a, b),
        OpType::Max => max(a, b),
        OpType::Equ | OpType::Cmp => cmp(a, b),
        OpType::Neq => invert01(&cmp(a, b)),
        OpType::Leq => bool_num(a, b, |x, y| x <= y),
        OpType::Geq => bool_num(a, b, |x, y| x >= y),
        OpType::Log => log(a, b),
        OpType::Nrt => nrt(a, b),
        OpType::Dgs => dgs(a, b),
        OpType::Dgr => dgr(a, b),
        _ => Number::Inf,
    }
}

fn invert01(n: &Number) -> Number {
    if n.is_inf() {
        Number::Inf
    } else if n.is_zero() {
        Number::ONE
    } else {
        Number::ZERO
    }
}

fn bool_num(a: &Number, b: &Number, pred: impl Fn(&Number, &Number) -> bool) -> Number {
    if a.is_inf() || b.is_inf() {
        return Number::Inf;
    }
    if pred(a, b) {
        Number::ONE
    } else {
        Number::ZERO
    }
}

/// `1` if the operands are equal, `0` otherwise.
pub fn cmp(a: &Number, b: &Number) -> Number {
    bool_num(a, b, |x, y| x == y)
}

pub fn min(a: &Number, b: &Number) -> Number {
    if a.is_inf() || b.is_inf() {
        return Number::Inf;
    }
    if a < b {
        a.clone()
    } else {
        b.clone()
    }
}

pub fn max(a: &Number, b: &Number) -> Number {
    if a.is_inf() || b.is_inf() {
        return Number::Inf;
    }
    if a < b {
        b.clone()
    } else {
        a.clone()
    }
}

/// Exact division test: `a / b` if `b` divides `a` exactly, otherwise `a`.
/// A zero divisor also yields `a`.
pub fn dif(a: &Number, b: &Number) -> Number {
    if a.is_inf() || b.is_inf() {
        return Number::Inf;
    }
    if b.is_zero() {
        return a.clone();
    }
    let d = a.div(b);
    if b.mul(&d) == *a {
        d
    } else {
        a.clone()
    }
}

pub fn pow(base: &Number, exp: &Number) -> Number {
    if base.is_inf() || exp.is_inf() {
        return Number::Inf;
    }
    if base.is_zero() {
        return if exp.is_negative() {
            Number::Inf // 0^(negative)
        } else if exp.is_zero() {
            Number::ONE // 0^0
        } else {
            Number::ZERO
        };
    }
    if *base == Number::ONE {
        return Number::ONE;
    }
    if *base == Number::MINUS_ONE {
        return if exp.odd() {
            Number::MINUS_ONE
        } else {
            Number::ONE
        };
    }
    if exp.is_negative() {
        return Number::ZERO; // |base| >= 2
    }
    let Some(mut e) = exp.to_i64() else {
        return Number::Inf;
    };
    let mut result = Number::ONE;
    let mut b = base.clone();
    while e > 0 {
        if e & 1 == 1 {
            result = result.mul(&b);
            if result.is_inf() {
                return Number::Inf;
            }
        }
        e >>= 1;
        if e > 0 {
            b = b.mul(&b);
            if b.is_inf() {
                return Number::Inf;
            }
        }
    }
    result
}

pub fn gcd(a: &Number, b: &Number) -> Number {
    if a.is_zero() && b.is_zero() {
        return Number::ZERO;
    }
    if a.is_inf() || b.is_inf() {
        return Number::Inf;
    }
    let mut aa = a.abs();
    let mut bb = b.abs();
    while !bb.is_zero() {
        let r = aa.rem(&bb);
        if r.is_inf() {
            return Number::Inf;
        }
        aa = bb;
        bb = r;
    }
    aa
}

// bounded cache for binomial coefficients, grown only while memory lasts
static BIN_CACHE: Lazy<Mutex<BinCache>> = Lazy::new(|| Mutex::new(BinCache::new()));

struct BinCache {
    entries: HashMap<(Number, Number), Number>,
    num_checks: usize,
    has_memory: bool,
}

impl BinCache {
    const CHECK_INTERVAL: usize = 10_000;
    const UNCHECKED_CAPACITY: usize = 10_000;

    fn new() -> Self {
        BinCache {
            entries: HashMap::new(),
            num_checks: 0,
            has_memory: true,
        }
    }

    fn get(&self, key: &(Number, Number)) -> Option<Number> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: (Number, Number), value: Number) {
        self.num_checks += 1;
        if self.num_checks % Self::CHECK_INTERVAL == 0 {
            self.has_memory = setup::has_memory();
        }
        if self.has_memory || self.entries.len() < Self::UNCHECKED_CAPACITY {
            self.entries.insert(key, value);
        }
    }
}

#[cfg(test)]
pub fn clear_bin_cache() {
    BIN_CACHE.lock().entries.clear();
}

/// Binomial coefficient, extended to negative arguments by the reflection
/// identities for generalized binomials (Loeb): for `n < 0, k >= 0` the
/// result is `(-1)^k * bin(k-n-1, k)`; for `n < 0, k < 0, k <= n` the
/// reflection swaps into the nonnegative range; otherwise zero.
pub fn bin(nn: &Number, kk: &Number) -> Number {
    if nn.is_inf() || kk.is_inf() {
        return Number::Inf;
    }
    let mut n = nn.clone();
    let mut k = kk.clone();
    let mut sign = Number::ONE;
    if n.is_negative() {
        if !k.is_negative() {
            sign = if k.odd() { Number::MINUS_ONE } else { Number::ONE };
            n = k.sub(&n.add(&Number::ONE));
        } else if !(n < k) {
            let diff = n.sub(&k);
            sign = if diff.odd() { Number::MINUS_ONE } else { Number::ONE };
            let n_old = n.clone();
            n = Number::ZERO.sub(&k.add(&Number::ONE));
            k = n_old.sub(&k);
        } else {
            return Number::ZERO;
        }
    }
    if k.is_negative() || n < k {
        return Number::ZERO;
    }
    if n < k.mul(&Number::TWO) {
        k = n.sub(&k);
    }
    if k.num_used_words() > 1 {
        return Number::Inf;
    }

    let key = (n.clone(), k.clone());
    if let Some(cached) = BIN_CACHE.lock().get(&key) {
        return sign.mul(&cached);
    }

    let mut r = Number::ONE;
    let l = match k.to_i64() {
        Some(l) => l,
        None => return Number::Inf,
    };
    for i in 0..l {
        r = r.mul(&n.sub(&Number::Small(i)));
        r = r.div(&Number::Small(i + 1));
        if r.is_inf() {
            break;
        }
    }
    BIN_CACHE.lock().insert(key, r.clone());
    sign.mul(&r)
}

/// Largest exponent `e` such that `b^e` divides `a`. Undefined (infinite)
/// for `a == 0` or `|b| < 2`.
pub fn lex(a: &Number, b: &Number) -> Number {
    if a.is_inf() || b.is_inf() || a.is_zero() {
        return Number::Inf;
    }
    let base = b.abs();
    if base < Number::TWO {
        return Number::Inf;
    }
    let mut v = a.abs();
    let mut e = 0i64;
    while v.rem(&base).is_zero() {
        v = v.div(&base);
        e += 1;
    }
    Number::Small(e)
}

/// Integer logarithm: the largest `e` with `b^e <= a`. Requires `a >= 1`
/// and `b >= 2`.
pub fn log(a: &Number, b: &Number) -> Number {
    if a.is_inf() || b.is_inf() || *a < Number::ONE || *b < Number::TWO {
        return Number::Inf;
    }
    let mut e = 0i64;
    let mut p = b.clone();
    while p <= *a {
        p = p.mul(b);
        e += 1;
        if p.is_inf() {
            break;
        }
    }
    Number::Small(e)
}

/// Integer `b`-th root: the largest `r >= 0` with `r^b <= a`. Requires
/// `a >= 0` and `b >= 1`.
pub fn nrt(a: &Number, b: &Number) -> Number {
    if a.is_inf() || b.is_inf() || a.is_negative() || *b < Number::ONE {
        return Number::Inf;
    }
    if a.is_zero() || *a == Number::ONE || *b == Number::ONE {
        return a.clone();
    }
    // exponential probe, then bisection
    let mut low = Number::ONE;
    let mut high = Number::TWO;
    loop {
        let p = pow(&high, b);
        if p.is_inf() || p > *a {
            break;
        }
        low = high.clone();
        high = high.mul(&Number::TWO);
    }
    while low.add(&Number::ONE) < high {
        let mid = low.add(&high).div(&Number::TWO);
        let p = pow(&mid, b);
        if !p.is_inf() && p <= *a {
            low = mid;
        } else {
            high = mid;
        }
    }
    low
}

/// Digit sum of `a` in base `b` (`b >= 2`). Negative inputs yield the
/// negated digit sum of their absolute value.
pub fn dgs(a: &Number, b: &Number) -> Number {
    if a.is_inf() || b.is_inf() || *b < Number::TWO {
        return Number::Inf;
    }
    let negative = a.is_negative();
    let mut v = a.abs();
    let mut sum = Number::ZERO;
    while !v.is_zero() {
        sum = sum.add(&v.rem(b));
        v = v.div(b);
    }
    if negative {
        sum.negate();
    }
    sum
}

/// Digital root of `a` in base `b` (`b >= 2`): iterated digit sum until a
/// single digit remains. Sign handling as in [`dgs`].
pub fn dgr(a: &Number, b: &Number) -> Number {
    if a.is_inf() || b.is_inf() || *b < Number::TWO {
        return Number::Inf;
    }
    let negative = a.is_negative();
    let mut v = a.abs();
    while v >= *b {
        v = dgs(&v, b);
    }
    if negative {
        v.negate();
    }
    v
}

/// Largest `e` such that `base^e == v` exactly, i.e. the exponent when `v`
/// is a pure power of `base`; `0` otherwise.
pub fn power_of(v: &Number, base: &Number) -> Number {
    if v.is_inf() || base.is_inf() || base.is_zero() {
        return Number::Inf;
    }
    let mut value = v.clone();
    let mut result = 0i64;
    while value.rem(base).is_zero() {
        result += 1;
        value = value.div(base);
    }
    if value == Number::ONE {
        Number::Small(result)
    } else {
        Number::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: i64) -> Number {
        Number::Small(v)
    }

    #[test]
    fn pow_table() {
        assert_eq!(pow(&n(0), &n(0)), n(1));
        assert_eq!(pow(&n(0), &n(3)), n(0));
        assert_eq!(pow(&n(0), &n(-1)), Number::Inf);
        assert_eq!(pow(&n(1), &n(-5)), n(1));
        assert_eq!(pow(&n(-1), &n(3)), n(-1));
        assert_eq!(pow(&n(-1), &n(4)), n(1));
        assert_eq!(pow(&n(-1), &Number::Inf), Number::Inf);
        assert_eq!(pow(&n(2), &n(-1)), n(0));
        assert_eq!(pow(&n(3), &n(4)), n(81));
        assert_eq!(pow(&n(-2), &n(3)), n(-8));
    }

    #[test]
    fn binomial_values() {
        clear_bin_cache();
        assert_eq!(bin(&n(5), &n(2)), n(10));
        assert_eq!(bin(&n(5), &n(10)), n(0));
        assert_eq!(bin(&n(-3), &n(2)), n(6));
        assert_eq!(bin(&n(5), &n(-1)), n(0));
        assert_eq!(bin(&n(-2), &n(-3)), n(-2));
        // repeat to exercise the cache path
        assert_eq!(bin(&n(5), &n(2)), n(10));
        assert_eq!(bin(&Number::Inf, &n(1)), Number::Inf);
    }

    #[test]
    fn gcd_values() {
        assert_eq!(gcd(&n(0), &n(0)), n(0));
        assert_eq!(gcd(&n(12), &n(-18)), n(6));
        assert_eq!(gcd(&Number::Inf, &n(4)), Number::Inf);
        assert_eq!(gcd(&n(0), &n(5)), n(5));
    }

    #[test]
    fn exact_division() {
        assert_eq!(dif(&n(12), &n(4)), n(3));
        assert_eq!(dif(&n(12), &n(5)), n(12));
        assert_eq!(dif(&n(12), &n(0)), n(12));
    }

    #[test]
    fn truncation() {
        assert_eq!(calc(OpType::Trn, &n(5), &n(7)), n(0));
        assert_eq!(calc(OpType::Trn, &n(7), &n(5)), n(2));
    }

    #[test]
    fn integer_log_and_root() {
        assert_eq!(log(&n(100), &n(10)), n(2));
        assert_eq!(log(&n(99), &n(10)), n(1));
        assert_eq!(log(&n(0), &n(10)), Number::Inf);
        assert_eq!(nrt(&n(27), &n(3)), n(3));
        assert_eq!(nrt(&n(26), &n(3)), n(2));
        assert_eq!(nrt(&n(-1), &n(2)), Number::Inf);
    }

    #[test]
    fn digit_operations() {
        assert_eq!(dgs(&n(1234), &n(10)), n(10));
        assert_eq!(dgs(&n(-1234), &n(10)), n(-10));
        assert_eq!(dgr(&n(1234), &n(10)), n(1));
        assert_eq!(dgs(&n(5), &n(1)), Number::Inf);
    }

    #[test]
    fn largest_exponent() {
        assert_eq!(lex(&n(24), &n(2)), n(3));
        assert_eq!(lex(&n(7), &n(2)), n(0));
        assert_eq!(lex(&n(0), &n(2)), Number::Inf);
    }

    #[test]
    fn pure_powers() {
        assert_eq!(power_of(&n(1024), &n(2)), n(10));
        assert_eq!(power_of(&n(1536), &n(2)), n(0));
        assert_eq!(power_of(&n(1000), &n(10)), n(3));
    }

    #[test]
    fn comparisons() {
        assert_eq!(calc(OpType::Equ, &n(3), &n(3)), n(1));
        assert_eq!(calc(OpType::Neq, &n(3), &n(3)), n(0));
        assert_eq!(calc(OpType::Leq, &n(3), &n(4)), n(1));
        assert_eq!(calc(OpType::Geq, &n(3), &n(4)), n(0));
        assert_eq!(calc(OpType::Cmp, &Number::Inf, &n(1)), Number::Inf);
    }
}
