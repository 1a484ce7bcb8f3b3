//! End-to-end tests: compile listings and run them through the JIT.
//!
//! Each test loads a listing from `tests/listings`, compiles one entry
//! function and everything it calls for concrete arguments, and checks the
//! boxed result.

mod common;

use common::load;
use stackjit::{run_function, CompileOptions, Error, Listing, RuntimeError, Scalar, Value};

fn run(listing: &Listing, function: &str, args: &[Scalar]) -> Value {
    run_with(listing, function, args, CompileOptions::default())
}

fn run_with(
    listing: &Listing,
    function: &str,
    args: &[Scalar],
    options: CompileOptions,
) -> Value {
    match run_function(listing, function, args, options) {
        Ok(value) => value,
        Err(e) => panic!("{function}{args:?} failed: {e}"),
    }
}

use Scalar::{Bool, Float, Int};

#[test]
fn test_add() {
    let math = load("basicmath.lst");
    assert_eq!(run(&math, "add", &[Int(3), Int(4)]), Int(7));
    assert_eq!(run(&math, "add", &[Int(3), Float(4.0)]), Float(7.0));
    assert_eq!(run(&math, "add", &[Float(0.5), Float(0.25)]), Float(0.75));
}

#[test]
fn test_true_division_is_float() {
    let math = load("basicmath.lst");
    assert_eq!(run(&math, "divide", &[Int(4), Int(2)]), Float(2.0));
    assert_eq!(run(&math, "divide", &[Int(7), Int(2)]), Float(3.5));
    assert_eq!(run(&math, "divide", &[Float(1.0), Int(4)]), Float(0.25));
}

#[test]
fn test_floor_division() {
    let math = load("basicmath.lst");
    assert_eq!(run(&math, "floor_div", &[Int(7), Int(2)]), Int(3));
    assert_eq!(run(&math, "floor_div", &[Int(-7), Int(2)]), Int(-4));
    assert_eq!(run(&math, "floor_div", &[Float(7.0), Int(2)]), Float(3.0));
}

#[test]
fn test_modulo_takes_sign_of_divisor() {
    let math = load("basicmath.lst");
    assert_eq!(run(&math, "modulo", &[Int(7), Int(3)]), Int(1));
    assert_eq!(run(&math, "modulo", &[Int(-7), Int(3)]), Int(2));
    assert_eq!(run(&math, "modulo", &[Int(7), Int(-3)]), Int(-2));
    assert_eq!(run(&math, "modulo", &[Int(6), Int(-3)]), Int(0));
    assert_eq!(run(&math, "modulo", &[Float(7.5), Int(2)]), Float(1.5));
    assert_eq!(run(&math, "modulo", &[Float(-7.5), Int(2)]), Float(0.5));
}

#[test]
fn test_power() {
    let math = load("basicmath.lst");
    assert_eq!(run(&math, "power", &[Int(2), Int(10)]), Int(1024));
    assert_eq!(run(&math, "power", &[Float(1.5), Int(2)]), Float(2.25));
    assert_eq!(run(&math, "power", &[Float(4.0), Float(0.5)]), Float(2.0));
}

#[test]
fn test_unary_operators() {
    let math = load("basicmath.lst");
    assert_eq!(run(&math, "negate", &[Int(5)]), Int(-5));
    assert_eq!(run(&math, "negate", &[Float(-2.5)]), Float(2.5));
    assert_eq!(run(&math, "invert", &[Int(0)]), Bool(true));
    assert_eq!(run(&math, "invert", &[Float(0.5)]), Bool(false));
    assert_eq!(run(&math, "invert", &[Bool(false)]), Bool(true));
}

#[test]
fn test_store_and_reload() {
    let math = load("basicmath.lst");
    assert_eq!(run(&math, "decrement", &[Int(10)]), Int(9));
    assert_eq!(run(&math, "decrement", &[Float(0.5)]), Float(-0.5));
    assert_eq!(run(&math, "twice_double", &[Float(1.5)]), Float(6.0));
}

#[test]
fn test_bool_and_void_returns() {
    let math = load("basicmath.lst");
    assert_eq!(run(&math, "less", &[Int(1), Int(2)]), Bool(true));
    assert_eq!(run(&math, "less", &[Float(2.0), Float(1.0)]), Bool(false));
    assert_eq!(run(&math, "nothing", &[Int(1)]), Scalar::None);
}

#[test]
fn test_if_else_widens_on_both_branches() {
    let control = load("control.lst");
    assert_eq!(run(&control, "widen", &[Bool(true)]), Float(1.0));
    assert_eq!(run(&control, "widen", &[Bool(false)]), Float(2.5));
    assert_eq!(run(&control, "widen", &[Int(0)]), Float(2.5));
}

#[test]
fn test_branches_with_separate_returns() {
    let control = load("control.lst");
    assert_eq!(run(&control, "maximum", &[Int(3), Int(7)]), Int(7));
    assert_eq!(run(&control, "maximum", &[Int(9), Int(7)]), Int(9));
    assert_eq!(run(&control, "default_ten", &[Int(0)]), Int(10));
    assert_eq!(run(&control, "default_ten", &[Int(4)]), Int(4));
    assert_eq!(run(&control, "default_ten", &[Float(0.5)]), Float(0.5));
}

#[test]
fn test_short_circuit_operators() {
    let control = load("control.lst");
    assert_eq!(run(&control, "both", &[Bool(true), Bool(false)]), Bool(false));
    assert_eq!(run(&control, "both", &[Bool(false), Bool(true)]), Bool(false));
    assert_eq!(run(&control, "both", &[Bool(true), Bool(true)]), Bool(true));
    assert_eq!(run(&control, "either", &[Int(0), Int(5)]), Int(5));
    assert_eq!(run(&control, "either", &[Int(3), Int(5)]), Int(3));
    assert_eq!(run(&control, "either", &[Int(0), Float(1.5)]), Float(1.5));
    assert_eq!(run(&control, "either", &[Int(2), Float(1.5)]), Float(2.0));

    let ordered = [Int(1), Int(2), Int(3)];
    assert_eq!(run(&control, "ordered", &ordered), Bool(true));
    assert_eq!(run(&control, "ordered", &[Int(1), Int(3), Int(2)]), Bool(false));
    assert_eq!(run(&control, "ordered", &[Int(2), Int(1), Int(3)]), Bool(false));
}

#[test]
fn test_while_loops() {
    let loops = load("loops.lst");
    assert_eq!(run(&loops, "sum", &[Int(10)]), Int(45));
    assert_eq!(run(&loops, "sum", &[Int(0)]), Int(0));
    assert_eq!(run(&loops, "fib", &[Int(10)]), Int(55));
    assert_eq!(run(&loops, "fib", &[Int(1)]), Int(1));
    assert_eq!(run(&loops, "halve", &[Float(10.0)]), Float(0.625));
}

#[test]
fn test_optimised_pipeline_agrees() {
    let loops = load("loops.lst");
    let options = CompileOptions::new().with_opt_level(2);
    assert_eq!(run_with(&loops, "sum", &[Int(100)], options), Int(4950));
    assert_eq!(run_with(&loops, "fib", &[Int(20)], options), Int(6765));

    let math = load("basicmath.lst");
    assert_eq!(run_with(&math, "modulo", &[Int(-7), Int(3)], options), Int(2));

    let calls = load("calls.lst");
    assert_eq!(run_with(&calls, "fib", &[Int(20)], options), Int(6765));
    let arrays = load("arrays.lst");
    assert_eq!(run_with(&arrays, "array_alloc_use2", &[], options), Int(30));
}

#[test]
fn test_for_loops_over_ranges() {
    let loops = load("loops.lst");
    for (n, expected) in [(0, 0), (1, 0), (2, 1), (42, 861), (-1, 0)] {
        assert_eq!(run(&loops, "for1", &[Int(n)]), Int(expected));
    }
    assert_eq!(run(&loops, "for2", &[Int(0)]), Int(1));
    assert_eq!(run(&loops, "for2", &[Int(2)]), Int(5));
    assert_eq!(run(&loops, "for2", &[Int(42)]), Int(4398046511965));
    assert_eq!(run(&loops, "for_loop_var", &[Int(5)]), Int(4));
    assert_eq!(run(&loops, "for_loop_var", &[Int(-1)]), Int(-1));
}

#[test]
fn test_loop_with_start_and_reassigned_locals() {
    let loops = load("loops.lst");
    let cases = [(0, 1), (1, 3), (2, 0), (5, 55), (8, 987), (-1, 0), (-3, 0)];
    for (n, expected) in cases {
        assert_eq!(run(&loops, "fib_nonrecursive", &[Int(n)]), Int(expected));
    }
}

#[test]
fn test_range_steps() {
    let loops = load("loops.lst");
    assert_eq!(run(&loops, "stepped", &[Int(10), Int(3)]), Int(4));
    assert_eq!(run(&loops, "stepped", &[Int(-10), Int(-4)]), Int(3));
    assert_eq!(run(&loops, "stepped", &[Int(5), Int(-1)]), Int(0));
}

#[test]
fn test_recursive_calls() {
    let calls = load("calls.lst");
    for (x, expected) in [(0, 1), (1, 2), (2, 4), (42, 904), (-1, 1)] {
        assert_eq!(run(&calls, "recursive", &[Int(x)]), Int(expected));
    }
    for (x, expected) in [(0, 1), (1, 1), (2, 1), (5, 5), (8, 21), (-1, 1)] {
        assert_eq!(run(&calls, "fib", &[Int(x)]), Int(expected));
    }
}

#[test]
fn test_mutual_recursion() {
    let calls = load("calls.lst");
    for (n, expected) in [(0, 1), (1, 1), (2, 2), (5, 3), (8, 5), (12, 8)] {
        assert_eq!(run(&calls, "hof_f", &[Int(n)]), Int(expected));
    }
}

#[test]
fn test_calls_without_arguments() {
    let calls = load("calls.lst");
    assert_eq!(run(&calls, "call_void", &[]), Int(1));
    assert_eq!(run(&calls, "if_func_call", &[]), Bool(true));
    assert_eq!(run(&calls, "void", &[]), Scalar::None);
}

#[test]
fn test_conversion_builtins() {
    let calls = load("calls.lst");
    assert_eq!(run(&calls, "convert", &[Float(2.7), Int(1)]), Float(3.0));
    assert_eq!(run(&calls, "convert", &[Float(-2.7), Float(0.5)]), Float(-1.5));
    assert_eq!(run(&calls, "convert", &[Bool(true), Int(2)]), Float(3.0));
}

#[test]
fn test_faults_in_callees_reach_the_caller() {
    let calls = load("calls.lst");
    assert_eq!(run(&calls, "outer", &[Int(7), Int(2)]), Int(4));
    let err = run_function(&calls, "outer", &[Int(1), Int(0)], CompileOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Runtime(RuntimeError::ZeroDivision)));
}

#[test]
fn test_globals() {
    let globals = load("globals.lst");
    assert_eq!(run(&globals, "use_global", &[]), Int(-2));
    assert_eq!(run(&globals, "new_global_var", &[Int(7)]), Int(7));
    assert_eq!(run(&globals, "new_global_var", &[Float(2.5)]), Float(2.5));
    assert_eq!(run(&globals, "scaled", &[Int(2)]), Int(6));
    assert_eq!(run(&globals, "scaled", &[Float(0.5)]), Float(1.5));
}

#[test]
fn test_arrays() {
    let arrays = load("arrays.lst");
    assert_eq!(run(&arrays, "array_alloc_use", &[]), Int(1));
    assert_eq!(run(&arrays, "array_alloc_use2", &[]), Int(30));
    assert_eq!(run(&arrays, "array_len", &[]), Int(5));
}

#[test]
fn test_arrays_are_returned_by_pointer() {
    let arrays = load("arrays.lst");
    assert_eq!(
        run(&arrays, "scaled_range", &[Float(0.5)]),
        Value::FloatArray(vec![0.0, 0.5, 1.0, 1.5])
    );
    assert_eq!(
        run(&arrays, "scaled_range", &[Int(2)]),
        Value::FloatArray(vec![0.0, 2.0, 4.0, 6.0])
    );
    assert_eq!(run(&arrays, "bump", &[Int(1)]), Value::IntArray(vec![0, 5, 0]));
    assert_eq!(run(&arrays, "bump", &[Int(-1)]), Value::IntArray(vec![0, 0, 5]));
}
