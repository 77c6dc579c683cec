//! Matchers: map target sequences to candidate programs.
//!
//! A matcher reduces every sequence to a canonical key plus a parameter.
//! Targets are indexed by key; a candidate whose produced sequence reduces
//! to the same key is *extended* with operations that transform its output
//! into the target, derived from the two parameters. Extended candidates
//! are validated downstream; wrong proposals are pruned there and reported
//! back, which drives the per-target backoff.

use std::collections::HashMap;

use crate::core::number::Number;
use crate::core::sequence::Sequence;
use crate::core::uid::Uid;
use crate::lang::program::{OpType, Operand, Operation, Program};
use crate::lang::util;
use crate::mine::reducer;

pub type SeqPrograms = Vec<(Uid, Program)>;

pub trait Matcher {
    fn name(&self) -> &'static str;
    fn insert(&mut self, norm_seq: &Sequence, id: Uid);
    fn remove(&mut self, norm_seq: &Sequence, id: Uid);
    fn match_candidate(&mut self, p: &Program, norm_seq: &Sequence, result: &mut SeqPrograms);
    fn set_has_memory(&mut self, has_memory: bool);
    fn notify_invalid_match(&mut self, id: Uid);
    /// Distinct reduced keys per inserted target, in `0..=1`.
    fn compaction_ratio(&self) -> f64;
}

// ---------------------------------------------------------------------------
// Reduction abstraction and the generic matcher backend
// ---------------------------------------------------------------------------

pub trait Reduction {
    type Param: Clone;

    const NAME: &'static str;

    fn reduce(&self, seq: &Sequence) -> (Sequence, Self::Param);

    /// Append operations turning the candidate's output into the target;
    /// `target` and `candidate` are the stored and the freshly reduced
    /// parameters. Returns false when no extension exists.
    fn extend(&self, p: &mut Program, target: &Self::Param, candidate: &Self::Param) -> bool;
}

struct Backoff {
    failures: u32,
    skip_until: u64,
}

pub struct GenericMatcher<R: Reduction> {
    reduction: R,
    ids: HashMap<Sequence, Vec<Uid>>,
    params: HashMap<Uid, R::Param>,
    backoff: Option<HashMap<Uid, Backoff>>,
    attempts: u64,
    has_memory: bool,
}

impl<R: Reduction> GenericMatcher<R> {
    pub fn new(reduction: R, with_backoff: bool) -> Self {
        GenericMatcher {
            reduction,
            ids: HashMap::new(),
            params: HashMap::new(),
            backoff: with_backoff.then(HashMap::new),
            attempts: 0,
            has_memory: true,
        }
    }

    fn is_backed_off(&self, id: Uid) -> bool {
        match &self.backoff {
            Some(map) => map
                .get(&id)
                .map(|b| self.attempts < b.skip_until)
                .unwrap_or(false),
            None => false,
        }
    }
}

impl<R: Reduction> Matcher for GenericMatcher<R> {
    fn name(&self) -> &'static str {
        R::NAME
    }

    fn insert(&mut self, norm_seq: &Sequence, id: Uid) {
        if !self.has_memory {
            return; // keep the index from growing when memory is scarce
        }
        let (key, param) = self.reduction.reduce(norm_seq);
        self.params.insert(id, param);
        self.ids.entry(key).or_default().push(id);
    }

    fn remove(&mut self, norm_seq: &Sequence, id: Uid) {
        let (key, _) = self.reduction.reduce(norm_seq);
        if let Some(bucket) = self.ids.get_mut(&key) {
            bucket.retain(|&other| other != id);
            if bucket.is_empty() {
                self.ids.remove(&key);
            }
        }
        self.params.remove(&id);
    }

    fn match_candidate(&mut self, p: &Program, norm_seq: &Sequence, result: &mut SeqPrograms) {
        self.attempts += 1;
        let (key, candidate_param) = self.reduction.reduce(norm_seq);
        let Some(bucket) = self.ids.get(&key) else {
            return;
        };
        for &id in bucket {
            if self.is_backed_off(id) {
                continue;
            }
            let Some(target_param) = self.params.get(&id) else {
                continue;
            };
            let mut copy = p.clone();
            if self.reduction.extend(&mut copy, target_param, &candidate_param) {
                result.push((id, copy));
            }
        }
    }

    fn set_has_memory(&mut self, has_memory: bool) {
        self.has_memory = has_memory;
    }

    fn notify_invalid_match(&mut self, id: Uid) {
        let attempts = self.attempts;
        if let Some(map) = &mut self.backoff {
            let entry = map.entry(id).or_insert(Backoff {
                failures: 0,
                skip_until: 0,
            });
            entry.failures = entry.failures.saturating_add(1);
            let wait = 1u64 << entry.failures.min(16);
            entry.skip_until = attempts + wait;
        }
    }

    fn compaction_ratio(&self) -> f64 {
        if self.params.is_empty() {
            return 1.0;
        }
        self.ids.len() as f64 / self.params.len() as f64
    }
}

// output cell plus helpers shared by the extension emitters
const OUT: Operand = Operand::Direct(Program::OUTPUT_CELL);

fn scratch_base(p: &Program, max_memory: i64) -> Option<i64> {
    let (_, largest) = util::used_memory_cells(p, max_memory)?;
    Some(largest.max(1) + 1)
}

// ---------------------------------------------------------------------------
// Direct matcher
// ---------------------------------------------------------------------------

pub struct DirectReduction;

impl Reduction for DirectReduction {
    type Param = ();

    const NAME: &'static str = "direct";

    fn reduce(&self, seq: &Sequence) -> (Sequence, ()) {
        (seq.clone(), ())
    }

    fn extend(&self, _p: &mut Program, _target: &(), _candidate: &()) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Linear matchers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearParam {
    pub offset: Number,
    pub factor: Number,
}

/// Reduce by subtracting the minimum, then dividing by the gcd.
pub struct LinearReduction;

impl Reduction for LinearReduction {
    type Param = LinearParam;

    const NAME: &'static str = "linear1";

    fn reduce(&self, seq: &Sequence) -> (Sequence, LinearParam) {
        let mut key = seq.clone();
        let offset = reducer::truncate(&mut key);
        let factor = reducer::shrink(&mut key);
        (key, LinearParam { offset, factor })
    }

    fn extend(&self, p: &mut Program, target: &LinearParam, candidate: &LinearParam) -> bool {
        if candidate.offset > Number::ZERO {
            p.push(OpType::Sub, OUT, Operand::Constant(candidate.offset.clone()));
        }
        if candidate.factor > Number::ONE {
            p.push(OpType::Div, OUT, Operand::Constant(candidate.factor.clone()));
        }
        if target.factor > Number::ONE {
            p.push(OpType::Mul, OUT, Operand::Constant(target.factor.clone()));
        }
        if target.offset > Number::ZERO {
            p.push(OpType::Add, OUT, Operand::Constant(target.offset.clone()));
        }
        true
    }
}

/// Reduce by dividing by the gcd, then subtracting the minimum.
pub struct Linear2Reduction;

impl Reduction for Linear2Reduction {
    type Param = LinearParam;

    const NAME: &'static str = "linear2";

    fn reduce(&self, seq: &Sequence) -> (Sequence, LinearParam) {
        let mut key = seq.clone();
        let factor = reducer::shrink(&mut key);
        let offset = reducer::truncate(&mut key);
        (key, LinearParam { offset, factor })
    }

    fn extend(&self, p: &mut Program, target: &LinearParam, candidate: &LinearParam) -> bool {
        if candidate.factor > Number::ONE {
            p.push(OpType::Div, OUT, Operand::Constant(candidate.factor.clone()));
        }
        if candidate.offset > Number::ZERO {
            p.push(OpType::Sub, OUT, Operand::Constant(candidate.offset.clone()));
        }
        if target.offset > Number::ZERO {
            p.push(OpType::Add, OUT, Operand::Constant(target.offset.clone()));
        }
        if target.factor > Number::ONE {
            p.push(OpType::Mul, OUT, Operand::Constant(target.factor.clone()));
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Polynomial matcher
// ---------------------------------------------------------------------------

/// Coefficients indexed by exponent.
pub type Polynomial = Vec<i64>;

pub struct PolynomialReduction {
    pub degree: i64,
    pub max_memory: i64,
}

impl PolynomialReduction {
    pub fn new(max_memory: i64) -> Self {
        PolynomialReduction {
            degree: 3,
            max_memory,
        }
    }

    // subtract factor * x^exp from every term
    fn sub_poly(seq: &Sequence, factor: i64, exp: i64) -> Sequence {
        let mut result = seq.clone();
        for (x, term) in result.iter_mut().enumerate() {
            let x_exp = crate::lang::semantics::pow(&Number::Small(x as i64), &Number::Small(exp));
            *term = term.sub(&x_exp.mul(&Number::Small(factor)));
        }
        result
    }

    // greedily pick the largest factor per degree that keeps all terms
    // nonnegative, refining a few steps while the residual sum improves
    fn reduce_degree(&self, seq: &mut Sequence, degree: i64) -> Polynomial {
        if degree < 0 {
            return Polynomial::new();
        }
        let mut max_factor: Option<i64> = None;
        for (x, term) in seq.iter().enumerate() {
            let x_exp = crate::lang::semantics::pow(&Number::Small(x as i64), &Number::Small(degree));
            if x_exp.is_zero() {
                continue;
            }
            let f = term.div(&x_exp).to_i64().unwrap_or(0).max(0);
            max_factor = Some(match max_factor {
                Some(m) => m.min(f),
                None => f,
            });
            if max_factor == Some(0) {
                break;
            }
        }
        let mut factor = max_factor.unwrap_or(0);
        let mut reduced = Self::sub_poly(seq, factor, degree);
        let mut poly = self.reduce_degree(&mut reduced, degree - 1);
        let mut cost = reduced.sum();
        let min_factor = (factor - 8).max(0);
        while factor > min_factor {
            let mut reduced_new = Self::sub_poly(seq, factor - 1, degree);
            let poly_new = self.reduce_degree(&mut reduced_new, degree - 1);
            let cost_new = reduced_new.sum();
            if cost_new < cost {
                factor -= 1;
                reduced = reduced_new;
                poly = poly_new;
                cost = cost_new;
            } else {
                break;
            }
        }
        poly.push(factor);
        *seq = reduced;
        poly
    }
}

impl Reduction for PolynomialReduction {
    type Param = Polynomial;

    const NAME: &'static str = "polynomial";

    fn reduce(&self, seq: &Sequence) -> (Sequence, Polynomial) {
        // negative or oversized terms leave nothing to subtract
        if seq.iter().any(|t| t.is_negative() || t.to_i64().is_none()) {
            return (seq.clone(), vec![0; (self.degree + 1) as usize]);
        }
        let mut key = seq.clone();
        let poly = self.reduce_degree(&mut key, self.degree);
        (key, poly)
    }

    fn extend(&self, p: &mut Program, target: &Polynomial, candidate: &Polynomial) -> bool {
        let len = target.len().max(candidate.len());
        let mut diff: Polynomial = Vec::with_capacity(len);
        for i in 0..len {
            diff.push(target.get(i).copied().unwrap_or(0) - candidate.get(i).copied().unwrap_or(0));
        }
        // constant term
        if let Some(&constant) = diff.first() {
            if constant > 0 {
                p.push(OpType::Add, OUT, Operand::constant(constant));
            } else if constant < 0 {
                p.push(OpType::Sub, OUT, Operand::constant(-constant));
            }
        }
        if diff.len() <= 1 || diff[1..].iter().all(|&f| f == 0) {
            return true;
        }
        let Some(base) = scratch_base(p, self.max_memory) else {
            return false;
        };
        let saved_arg = Operand::Direct(base);
        let x = Operand::Direct(base + 1);
        let term = Operand::Direct(base + 2);
        p.push_front(OpType::Mov, saved_arg.clone(), OUT);
        for (exp, &factor) in diff.iter().enumerate().skip(1) {
            if exp == 1 {
                p.push(OpType::Mov, x.clone(), saved_arg.clone());
            } else {
                p.push(OpType::Mul, x.clone(), saved_arg.clone());
            }
            if factor > 0 {
                p.push(OpType::Mov, term.clone(), x.clone());
                p.push(OpType::Mul, term.clone(), Operand::constant(factor));
                p.push(OpType::Add, OUT, term.clone());
            } else if factor < 0 {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Delta matcher
// ---------------------------------------------------------------------------

pub struct DeltaReduction {
    pub max_delta: usize,
    pub max_memory: i64,
}

impl DeltaReduction {
    pub fn new(max_memory: i64) -> Self {
        DeltaReduction {
            max_delta: 5,
            max_memory,
        }
    }

    // wrap the program in a summation loop: b(n) = sum of a(0..=n)
    fn wrap_sum(&self, p: &mut Program) -> bool {
        let Some((cells, largest)) = util::used_memory_cells(p, self.max_memory) else {
            return false;
        };
        let base = largest.max(1) + 1;
        let n = Operand::Direct(base);
        let acc = Operand::Direct(base + 1);
        let i = Operand::Direct(base + 2);
        let mut wrapped = Program::new();
        wrapped.push(OpType::Mov, n.clone(), OUT);
        wrapped.push(OpType::Add, n.clone(), Operand::constant(1));
        wrapped.push(OpType::Lpb, n.clone(), Operand::constant(1));
        wrapped.push(OpType::Sub, n.clone(), Operand::constant(1));
        let mut sorted: Vec<i64> = cells.into_iter().filter(|&c| c != 0).collect();
        sorted.sort_unstable();
        for cell in sorted {
            wrapped.push(OpType::Mov, Operand::Direct(cell), Operand::constant(0));
        }
        wrapped.push(OpType::Mov, OUT, i.clone());
        wrapped.ops.extend(p.ops.iter().cloned());
        wrapped.push(OpType::Add, acc.clone(), OUT);
        wrapped.push(OpType::Add, i.clone(), Operand::constant(1));
        wrapped.push(OpType::Lpe, Operand::constant(0), Operand::constant(0));
        wrapped.push(OpType::Mov, OUT, acc);
        wrapped.directives = p.directives.clone();
        *p = wrapped;
        true
    }

    // wrap the program in a forward difference: b(n) = a(n+1) - a(n)
    fn wrap_delta(&self, p: &mut Program) -> bool {
        let Some((cells, largest)) = util::used_memory_cells(p, self.max_memory) else {
            return false;
        };
        let base = largest.max(1) + 1;
        let saved = Operand::Direct(base);
        let high = Operand::Direct(base + 1);
        let mut wrapped = Program::new();
        wrapped.push(OpType::Mov, saved.clone(), OUT);
        wrapped.push(OpType::Add, OUT, Operand::constant(1));
        wrapped.ops.extend(p.ops.iter().cloned());
        wrapped.push(OpType::Mov, high.clone(), OUT);
        let mut sorted: Vec<i64> = cells.into_iter().filter(|&c| c != 0).collect();
        sorted.sort_unstable();
        for cell in sorted {
            wrapped.push(OpType::Mov, Operand::Direct(cell), Operand::constant(0));
        }
        wrapped.push(OpType::Mov, OUT, saved);
        wrapped.ops.extend(p.ops.iter().cloned());
        wrapped.push(OpType::Sub, high.clone(), OUT);
        wrapped.push(OpType::Mov, OUT, high);
        wrapped.directives = p.directives.clone();
        *p = wrapped;
        true
    }
}

impl Reduction for DeltaReduction {
    type Param = i64;

    const NAME: &'static str = "delta";

    fn reduce(&self, seq: &Sequence) -> (Sequence, i64) {
        let mut key = seq.clone();
        let count = reducer::delta_reduce(&mut key, self.max_delta) as i64;
        // keys must have a fixed length regardless of the applied rounds
        let target_len = seq.len().saturating_sub(self.max_delta);
        key.0.truncate(target_len);
        (key, count)
    }

    fn extend(&self, p: &mut Program, target: &i64, candidate: &i64) -> bool {
        // a target that loses more delta rounds than the candidate is a
        // repeated partial sum of it, and vice versa
        let mut delta = target - candidate;
        while delta > 0 {
            if !self.wrap_sum(p) {
                return false;
            }
            delta -= 1;
        }
        while delta < 0 {
            if !self.wrap_delta(p) {
                return false;
            }
            delta += 1;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Digit matcher
// ---------------------------------------------------------------------------

/// Matches sequences that are transliterations of each other: the terms of
/// one are the base-`b` digit strings of the other, read in base ten.
pub struct DigitReduction {
    pub max_memory: i64,
}

impl DigitReduction {
    pub fn new(max_memory: i64) -> Self {
        DigitReduction { max_memory }
    }

    const IDENTITY_BASE: i64 = 10;

    fn max_decimal_digit(n: &Number) -> Option<i64> {
        let mut v = n.to_i64()?;
        if v < 0 {
            return None;
        }
        let mut max_digit = 0;
        loop {
            max_digit = max_digit.max(v % 10);
            v /= 10;
            if v == 0 {
                return Some(max_digit);
            }
        }
    }

    // read the decimal digit string of `n` as a base-`b` number
    fn transliterate(n: i64, base: i64) -> Number {
        let mut v = n;
        let mut result = Number::ZERO;
        let mut place = Number::ONE;
        while v > 0 {
            let digit = v % 10;
            result = result.add(&place.mul(&Number::Small(digit)));
            place = place.mul(&Number::Small(base));
            v /= 10;
        }
        result
    }

    // $0 := digits of $0 in base `from`, reassembled in base `to`
    fn push_rebase(&self, p: &mut Program, from: i64, to: i64) -> bool {
        let Some(base) = scratch_base(p, self.max_memory) else {
            return false;
        };
        let value = Operand::Direct(base);
        let place = Operand::Direct(base + 1);
        let digit = Operand::Direct(base + 2);
        p.push(OpType::Mov, value.clone(), Operand::constant(0));
        p.push(OpType::Mov, place.clone(), Operand::constant(1));
        p.push(OpType::Lpb, OUT, Operand::constant(1));
        p.push(OpType::Mov, digit.clone(), OUT);
        p.push(OpType::Mod, digit.clone(), Operand::constant(from));
        p.push(OpType::Mul, digit.clone(), place.clone());
        p.push(OpType::Add, value.clone(), digit.clone());
        p.push(OpType::Div, OUT, Operand::constant(from));
        p.push(OpType::Mul, place.clone(), Operand::constant(to));
        p.push(OpType::Lpe, Operand::constant(0), Operand::constant(0));
        p.push(OpType::Mov, OUT, value);
        true
    }
}

impl Reduction for DigitReduction {
    type Param = i64;

    const NAME: &'static str = "digit";

    fn reduce(&self, seq: &Sequence) -> (Sequence, i64) {
        let max_digit = seq
            .iter()
            .map(Self::max_decimal_digit)
            .collect::<Option<Vec<i64>>>()
            .map(|digits| digits.into_iter().max().unwrap_or(0));
        match max_digit {
            Some(d) if d + 1 < Self::IDENTITY_BASE => {
                let base = (d + 1).max(2);
                let key = Sequence(
                    seq.iter()
                        .map(|t| Self::transliterate(t.to_i64().unwrap_or(0), base))
                        .collect(),
                );
                (key, base)
            }
            _ => (seq.clone(), Self::IDENTITY_BASE),
        }
    }

    fn extend(&self, p: &mut Program, target: &i64, candidate: &i64) -> bool {
        if target == candidate {
            return true;
        }
        if *candidate != Self::IDENTITY_BASE {
            // undo the candidate's transliteration: decimal digits -> value
            if !self.push_rebase(p, 10, *candidate) {
                return false;
            }
        }
        if *target != Self::IDENTITY_BASE {
            // write the value in base `target`, read in base ten
            if !self.push_rebase(p, *target, 10) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub fn create_matcher(
    matcher_type: &str,
    with_backoff: bool,
    max_memory: i64,
) -> Option<Box<dyn Matcher>> {
    match matcher_type {
        "direct" => Some(Box::new(GenericMatcher::new(DirectReduction, with_backoff))),
        "linear1" => Some(Box::new(GenericMatcher::new(LinearReduction, with_backoff))),
        "linear2" => Some(Box::new(GenericMatcher::new(Linear2Reduction, with_backoff))),
        "delta" => Some(Box::new(GenericMatcher::new(
            DeltaReduction::new(max_memory),
            with_backoff,
        ))),
        "polynomial" => Some(Box::new(GenericMatcher::new(
            PolynomialReduction::new(max_memory),
            with_backoff,
        ))),
        "digit" => Some(Box::new(GenericMatcher::new(
            DigitReduction::new(max_memory),
            with_backoff,
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluator::Evaluator;
    use crate::lang::parser::parse_program;
    use crate::sys::setup::Settings;

    fn eval(p: &Program, n: usize) -> Sequence {
        let mut evaluator = Evaluator::new(Settings::default());
        evaluator.eval(p, n).expect("program evaluates").0
    }

    fn uid(s: &str) -> Uid {
        s.parse().expect("valid uid")
    }

    #[test]
    fn linear_match_scales_and_shifts() {
        let mut matcher = GenericMatcher::new(LinearReduction, false);
        let target = Sequence::from_i64(&[2, 4, 6, 8, 10]);
        matcher.insert(&target, uid("A000001"));
        let candidate = parse_program("mov $0,$0\n").expect("valid");
        let produced = Sequence::from_i64(&[0, 1, 2, 3, 4]);
        let mut result = SeqPrograms::new();
        matcher.match_candidate(&candidate, &produced, &mut result);
        assert_eq!(result.len(), 1);
        assert_eq!(eval(&result[0].1, 5), target);
    }

    #[test]
    fn linear2_match() {
        let mut matcher = GenericMatcher::new(Linear2Reduction, false);
        let target = Sequence::from_i64(&[5, 8, 11, 14]);
        matcher.insert(&target, uid("A000002"));
        let candidate = parse_program("mul $0,3\nadd $0,2\n").expect("valid");
        let produced = eval(&candidate, 4); // 2,5,8,11
        let mut result = SeqPrograms::new();
        matcher.match_candidate(&candidate, &produced, &mut result);
        assert!(!result.is_empty());
        assert_eq!(eval(&result[0].1, 4), target);
    }

    #[test]
    fn polynomial_match_adds_difference_polynomial() {
        let mut matcher = GenericMatcher::new(PolynomialReduction::new(100_000), false);
        // target = n + n^2 + n + 3 on top of the candidate's identity
        let target = Sequence::from_i64(&[3, 6, 11, 18, 27, 38]);
        matcher.insert(&target, uid("A000003"));
        let candidate = parse_program("mov $0,$0\n").expect("valid");
        let produced = Sequence::from_i64(&[0, 1, 2, 3, 4, 5]);
        let mut result = SeqPrograms::new();
        matcher.match_candidate(&candidate, &produced, &mut result);
        assert!(!result.is_empty());
        assert_eq!(eval(&result[0].1, 6), target);
    }

    #[test]
    fn delta_match_sums_candidate() {
        let mut matcher = GenericMatcher::new(DeltaReduction::new(100_000), false);
        // target: partial sums of 2n+1, i.e. squares of n+1
        let target = Sequence::from_i64(&[1, 4, 9, 16, 25, 36, 49, 64]);
        matcher.insert(&target, uid("A000290"));
        let candidate = parse_program("mul $0,2\nadd $0,1\n").expect("valid");
        let produced = eval(&candidate, 8); // odd numbers
        let mut result = SeqPrograms::new();
        matcher.match_candidate(&candidate, &produced, &mut result);
        assert!(!result.is_empty());
        let extended = eval(&result[0].1, 8);
        assert_eq!(extended, target);
    }

    #[test]
    fn digit_match_transliterates() {
        let mut matcher = GenericMatcher::new(DigitReduction::new(100_000), false);
        // target terms are the binary digit strings of n, read as decimals
        let target = Sequence::from_i64(&[0, 1, 10, 11, 100, 101, 110, 111]);
        matcher.insert(&target, uid("A000004"));
        let candidate = parse_program("mov $0,$0\n").expect("valid");
        let produced = Sequence::from_i64(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let mut result = SeqPrograms::new();
        matcher.match_candidate(&candidate, &produced, &mut result);
        assert!(!result.is_empty());
        assert_eq!(eval(&result[0].1, 8), target);
    }

    #[test]
    fn direct_match_requires_equality() {
        let mut matcher = GenericMatcher::new(DirectReduction, false);
        let target = Sequence::from_i64(&[1, 2, 3]);
        matcher.insert(&target, uid("A000005"));
        let candidate = parse_program("add $0,1\n").expect("valid");
        let mut result = SeqPrograms::new();
        matcher.match_candidate(&candidate, &Sequence::from_i64(&[1, 2, 3]), &mut result);
        assert_eq!(result.len(), 1);
        result.clear();
        matcher.match_candidate(&candidate, &Sequence::from_i64(&[1, 2, 4]), &mut result);
        assert!(result.is_empty());
    }

    #[test]
    fn backoff_postpones_failing_targets() {
        let mut matcher = GenericMatcher::new(DirectReduction, true);
        let target = Sequence::from_i64(&[1, 2, 3]);
        let id = uid("A000006");
        matcher.insert(&target, id);
        let candidate = parse_program("add $0,1\n").expect("valid");
        let mut result = SeqPrograms::new();
        matcher.match_candidate(&candidate, &target, &mut result);
        assert_eq!(result.len(), 1);
        matcher.notify_invalid_match(id);
        result.clear();
        matcher.match_candidate(&candidate, &target, &mut result);
        assert!(result.is_empty(), "backed-off target must be skipped");
        // after enough attempts the target becomes visible again
        for _ in 0..4 {
            result.clear();
            matcher.match_candidate(&candidate, &target, &mut result);
        }
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn removal_unindexes_target() {
        let mut matcher = GenericMatcher::new(DirectReduction, false);
        let target = Sequence::from_i64(&[4, 5, 6]);
        let id = uid("A000007");
        matcher.insert(&target, id);
        matcher.remove(&target, id);
        let candidate = parse_program("add $0,4\n").expect("valid");
        let mut result = SeqPrograms::new();
        matcher.match_candidate(&candidate, &target, &mut result);
        assert!(result.is_empty());
        assert!((matcher.compaction_ratio() - 1.0).abs() < f64::EPSILON);
    }
}
