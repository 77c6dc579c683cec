//! End-to-end scenarios: evaluation, incremental evaluation, matching,
//! and minimization on concrete programs.

use seqmine::eval::incremental::IncrementalEvaluator;
use seqmine::lang::parser::parse_program;
use seqmine::lang::printer::print_program;
use seqmine::mine::matcher::{
    GenericMatcher, LinearReduction, Matcher, PolynomialReduction, SeqPrograms,
};
use seqmine::opt::minimizer::Minimizer;
use seqmine::{Evaluator, Memory, Number, Sequence, Settings, Uid};

const FIB: &str =
    "mov $1,1\nlpb $0\n  sub $0,1\n  mov $2,$1\n  add $1,$3\n  mov $3,$2\nlpe\nmov $0,$3\n";

#[test]
fn fibonacci_program_reproduces_target() {
    let program = parse_program(FIB).expect("valid program");
    let mut evaluator = Evaluator::new(Settings::default());
    let (seq, _) = evaluator.eval(&program, 10).expect("evaluates");
    assert_eq!(seq, Sequence::from_i64(&[0, 1, 1, 2, 3, 5, 8, 13, 21, 34]));
}

#[test]
fn factorial_loop_supports_incremental_evaluation() {
    let src = "mov $1,1\nadd $0,1\nlpb $0\n  mul $1,$0\n  sub $0,1\nlpe\nmov $0,$1\n";
    let program = parse_program(src).expect("valid program");
    let mut ie = IncrementalEvaluator::new(Settings::default());
    assert!(ie.init(&program), "factorial loop must be IE-compatible");
    let mut regular = Evaluator::with_inc_eval(Settings::default(), false);
    let (expected, expected_steps) = regular.eval(&program, 7).expect("evaluates");
    let mut total = 0i64;
    for n in 0..7 {
        let (value, steps) = ie.next().expect("incremental term");
        assert_eq!(value, expected[n], "term {}", n);
        total += steps;
    }
    assert_eq!(total, expected_steps.total);
}

#[test]
fn linear_matcher_scales_candidate_to_target() {
    let mut matcher = GenericMatcher::new(LinearReduction, false);
    let target = Sequence::from_i64(&[2, 4, 6, 8, 10]);
    let id: Uid = "A000010".parse().expect("valid uid");
    matcher.insert(&target, id);

    let candidate = parse_program("mov $0,$0\n").expect("valid program");
    let produced = Sequence::from_i64(&[0, 1, 2, 3, 4]);
    let mut result = SeqPrograms::new();
    matcher.match_candidate(&candidate, &produced, &mut result);
    assert_eq!(result.len(), 1);

    let mut evaluator = Evaluator::new(Settings::default());
    let (seq, _) = evaluator.eval(&result[0].1, 5).expect("evaluates");
    assert_eq!(seq, target);
}

#[test]
fn polynomial_matcher_adds_difference_polynomial() {
    let mut matcher = GenericMatcher::new(PolynomialReduction::new(100_000), false);
    // target = candidate + (n^2 + n + 3)
    let target = Sequence::from_i64(&[3, 6, 11, 18, 27, 38]);
    let id: Uid = "A000011".parse().expect("valid uid");
    matcher.insert(&target, id);

    let candidate = parse_program("mov $0,$0\n").expect("valid program");
    let produced = Sequence::from_i64(&[0, 1, 2, 3, 4, 5]);
    let mut result = SeqPrograms::new();
    matcher.match_candidate(&candidate, &produced, &mut result);
    assert!(!result.is_empty());

    let mut evaluator = Evaluator::new(Settings::default());
    let (seq, _) = evaluator.eval(&result[0].1, 6).expect("evaluates");
    assert_eq!(seq, target);
}

#[test]
fn minimization_collapses_constant_chain() {
    let src = "mov $1,0\nadd $1,1\nadd $1,1\nadd $1,1\nmov $0,$1\n";
    let mut program = parse_program(src).expect("valid program");
    let mut minimizer = Minimizer::new(Settings::default());
    minimizer.optimize_and_minimize(&mut program, 5);
    assert!(program.ops.len() <= 2, "got: {}", print_program(&program));
    let mut evaluator = Evaluator::new(Settings::default());
    let (seq, _) = evaluator.eval(&program, 5).expect("evaluates");
    assert_eq!(seq, Sequence::from_i64(&[3, 3, 3, 3, 3]));
}

#[test]
fn optimize_and_minimize_is_idempotent() {
    let src = "mov $1,1\nlpb $0\n  sub $0,1\n  add $1,3\nlpe\nmov $0,$1\n";
    let mut program = parse_program(src).expect("valid program");
    let mut minimizer = Minimizer::new(Settings::default());
    minimizer.optimize_and_minimize(&mut program, 8);
    let first = print_program(&program);
    assert!(!minimizer.optimize_and_minimize(&mut program, 8));
    assert_eq!(first, print_program(&program));
}

#[test]
fn interpreter_is_deterministic() {
    let program = parse_program(FIB).expect("valid program");
    let mut results = Vec::new();
    for _ in 0..3 {
        let mut interpreter = seqmine::Interpreter::new(Settings::default());
        let mut mem = Memory::new();
        mem.set(0, Number::Small(15));
        let steps = interpreter.run(&program, &mut mem).expect("runs");
        results.push((mem.get(0), steps));
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
}

#[test]
fn parser_printer_roundtrip() {
    let src = "#offset 1\n; A000045: Fibonacci numbers\nmov $1,1 ; seed\nlpb $0\n  sub $0,1\n  mov $2,$1\n  add $1,$3\n  mov $3,$2\nlpe\nmov $0,$3\n";
    let program = parse_program(src).expect("valid program");
    let printed = print_program(&program);
    let reparsed = parse_program(&printed).expect("printed form parses");
    assert_eq!(program, reparsed);
    assert_eq!(printed, print_program(&reparsed));
}

#[test]
fn pow_boundary_values() {
    use seqmine::lang::semantics;
    let n = Number::Small;
    assert_eq!(semantics::pow(&n(0), &n(0)), n(1));
    assert_eq!(semantics::pow(&n(0), &n(-1)), Number::Inf);
    assert_eq!(semantics::pow(&n(-1), &Number::Inf), Number::Inf);
    assert_eq!(semantics::bin(&n(-3), &n(2)), n(6));
    assert_eq!(semantics::bin(&n(5), &n(10)), n(0));
    assert_eq!(semantics::bin(&n(5), &n(2)), n(10));
}

#[test]
fn number_boundaries() {
    let max = Number::max_value();
    assert_eq!(max.mul(&Number::TWO), Number::Inf);
    let min_small = Number::Small(i64::MIN);
    let divided = min_small.div(&Number::MINUS_ONE);
    assert_eq!(divided.to_string(), "9223372036854775808");
}
