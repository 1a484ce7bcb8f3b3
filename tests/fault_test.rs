//! Functions the compiler has to reject, and how the rejection is reported.

mod common;

use bumpalo::Bump;
use common::load;
use inkwell::context::Context;
use stackjit::{
    parse_listing, run_function, CompilationSession, CompileError, CompileOptions, Compiler,
    Error, RuntimeError, Scalar,
};

fn compile_error(file: &str, function: &str, args: &[Scalar]) -> CompileError {
    let listing = load(file);
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let context = Context::create();
    let compiler = Compiler::new(&context, &session, CompileOptions::default());
    match compiler.compile(&listing, function, args) {
        Ok(_) => panic!("{function} compiled but should have been rejected"),
        Err(e) => e,
    }
}

fn location(err: &CompileError) -> String {
    err.location().map(ToString::to_string).unwrap_or_default()
}

#[test]
fn test_read_before_assignment() {
    let err = compile_error("faults.lst", "maybe", &[Scalar::Bool(true)]);
    assert!(matches!(err, CompileError::UndefinedVariable { ref name, .. } if name == "r"));
    assert_eq!(location(&err), "faults.py:4");
}

#[test]
fn test_calls_of_unknown_names_are_not_implemented() {
    let err = compile_error("faults.lst", "greet", &[Scalar::Int(1)]);
    assert!(matches!(err, CompileError::Unimplemented { .. }));
    assert_eq!(location(&err), "faults.py:7");
}

#[test]
fn test_bit_operations_are_unsupported() {
    let err = compile_error("faults.lst", "shift", &[Scalar::Int(1), Scalar::Int(2)]);
    match &err {
        CompileError::UnsupportedOperation { opcode, .. } => assert_eq!(opcode, "BINARY_LSHIFT"),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(location(&err), "faults.py:10");
}

#[test]
fn test_comparison_needs_matching_types() {
    let err = compile_error(
        "faults.lst",
        "mixed_compare",
        &[Scalar::Int(1), Scalar::Float(1.0)],
    );
    assert!(matches!(err, CompileError::TypingFault { .. }));
    assert_eq!(
        err.to_string(),
        "Comparing different types (int with float) at faults.py:13"
    );

    let err = compile_error("loops.lst", "halve", &[Scalar::Int(10)]);
    assert!(matches!(err, CompileError::TypingFault { .. }));
    assert_eq!(location(&err), "loops.py:21");
}

#[test]
fn test_returning_int_or_none_cannot_be_typed() {
    let err = compile_error("faults.lst", "sometimes", &[Scalar::Int(1)]);
    assert_eq!(
        err.to_string(),
        "Unifying of types int and void not yet implemented at faults.py:18"
    );
}

#[test]
fn test_bool_is_not_numeric() {
    let err = compile_error("basicmath.lst", "add", &[Scalar::Bool(true), Scalar::Int(1)]);
    assert!(matches!(err, CompileError::TypingFault { .. }));
    assert_eq!(location(&err), "basicmath.py:2");
}

#[test]
fn test_none_arguments_are_rejected() {
    let err = compile_error("basicmath.lst", "invert", &[Scalar::None]);
    assert!(matches!(err, CompileError::Unimplemented { .. }));
    assert!(err.to_string().contains("'a'"));
}

#[test]
fn test_wrong_argument_count() {
    let err = compile_error("basicmath.lst", "add", &[Scalar::Int(1)]);
    assert!(matches!(
        err,
        CompileError::ArgumentCount { expected: 2, found: 1, .. }
    ));
    assert_eq!(err.location(), None);
}

#[test]
fn test_run_function_reports_compile_side() {
    let listing = load("faults.lst");
    let err = run_function(&listing, "maybe", &[Scalar::Int(0)], CompileOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Compile(CompileError::UndefinedVariable { .. })
    ));
    assert!(err.to_string().starts_with("compilation failed: "));
}

fn runtime_error(file: &str, function: &str, args: &[Scalar]) -> RuntimeError {
    let listing = load(file);
    match run_function(&listing, function, args, CompileOptions::default()) {
        Ok(value) => panic!("{function}{args:?} returned {value} but should have faulted"),
        Err(Error::Runtime(e)) => e,
        Err(e) => panic!("{function}{args:?} failed to compile: {e}"),
    }
}

#[test]
fn test_integer_division_by_zero() {
    use Scalar::Int;
    let err = runtime_error("basicmath.lst", "modulo", &[Int(7), Int(0)]);
    assert!(matches!(err, RuntimeError::ZeroDivision));
    let err = runtime_error("basicmath.lst", "floor_div", &[Int(7), Int(0)]);
    assert!(matches!(err, RuntimeError::ZeroDivision));
    let err = runtime_error("basicmath.lst", "divide", &[Int(1), Int(0)]);
    assert!(matches!(err, RuntimeError::ZeroDivision));
}

#[test]
fn test_float_division_by_zero() {
    use Scalar::{Float, Int};
    let err = runtime_error("basicmath.lst", "modulo", &[Float(7.5), Float(0.0)]);
    assert!(matches!(err, RuntimeError::ZeroDivision));
    let err = runtime_error("basicmath.lst", "floor_div", &[Float(7.5), Int(0)]);
    assert!(matches!(err, RuntimeError::ZeroDivision));
}

#[test]
fn test_integer_overflow() {
    use Scalar::Int;
    let err = runtime_error("basicmath.lst", "floor_div", &[Int(i64::MIN), Int(-1)]);
    assert!(matches!(err, RuntimeError::Overflow));
    let err = runtime_error("basicmath.lst", "power", &[Int(2), Int(70)]);
    assert!(matches!(err, RuntimeError::Overflow));

    let math = load("basicmath.lst");
    let options = CompileOptions::default();
    let rem = run_function(&math, "modulo", &[Int(i64::MIN), Int(-1)], options).unwrap();
    assert_eq!(rem, Int(0));
    let quotient = run_function(&math, "floor_div", &[Int(i64::MIN), Int(1)], options).unwrap();
    assert_eq!(quotient, Int(i64::MIN));
}

#[test]
fn test_int_of_a_non_finite_float() {
    use Scalar::{Float, Int};
    let err = runtime_error("calls.lst", "convert", &[Float(f64::INFINITY), Int(0)]);
    assert!(matches!(err, RuntimeError::Overflow));
    let err = runtime_error("calls.lst", "convert", &[Float(f64::NAN), Int(0)]);
    assert!(matches!(err, RuntimeError::Overflow));
}

#[test]
fn test_index_out_of_range() {
    use Scalar::Int;
    for k in [3, -4, i64::MAX] {
        let err = runtime_error("arrays.lst", "bump", &[Int(k)]);
        assert!(matches!(err, RuntimeError::IndexOutOfRange), "bump({k})");
    }
}

#[test]
fn test_range_with_zero_step() {
    use Scalar::Int;
    let err = runtime_error("loops.lst", "stepped", &[Int(5), Int(0)]);
    assert!(matches!(err, RuntimeError::ZeroStep));
}

#[test]
fn test_zeros_needs_a_dtype() {
    let err = compile_error("arrays.lst", "untyped", &[]);
    assert!(matches!(err, CompileError::Unimplemented { .. }));
    assert_eq!(location(&err), "arrays.py:31");
}

#[test]
fn test_calls_check_their_arguments() {
    let err = compile_error("calls.lst", "convert", &[Scalar::None, Scalar::Int(1)]);
    assert!(matches!(err, CompileError::Unimplemented { .. }));
    let err = compile_error("calls.lst", "outer", &[Scalar::Int(1)]);
    assert!(matches!(err, CompileError::ArgumentCount { expected: 2, found: 1, .. }));
}

#[test]
fn test_malformed_listings_name_the_line() {
    let err = parse_listing("def f(a):\n  1      0 LOAD_FAST a\n         2 FROBNICATE\n")
        .unwrap_err();
    assert_eq!(err.line, 3);
    assert!(err.message.contains("FROBNICATE"));

    let err = parse_listing("  1      0 LOAD_FAST a\n").unwrap_err();
    assert_eq!(err.line, 1);

    let err = parse_listing("def f(a, a):\n  1      0 LOAD_FAST a\n").unwrap_err();
    assert_eq!(err.line, 1);
    assert!(err.to_string().starts_with("listing line 1: "));
}
