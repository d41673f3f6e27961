//! Closure semantics: capture-at-definition, parameter binding, recursion,
//! and the three binding classes

mod common;

use common::{output, runtime_error};
use luma_runtime::{RuntimeError, Value};
use pretty_assertions::assert_eq;

/// Captures are bound when the function is made, not when it is called.
#[test]
fn test_capture_by_value_at_definition() {
    let source = "
        x = 1;
        f = fn()[x] x;
        x = 2;
        print(f());
    ";
    assert_eq!(output(source), "1 \n");
}

#[test]
fn test_multiple_captures_keep_declaration_order() {
    let source = "
        a = 10;
        b = 20;
        f = fn()[a, b] a - b;
        print(f());
    ";
    assert_eq!(output(source), "-10 \n");
}

#[test]
fn test_parameters_bind_left_to_right() {
    let source = "
        fn sub(a, b) a - b;
        print(sub(10, 4));
    ";
    assert_eq!(output(source), "6 \n");
}

#[test]
fn test_recursion_via_global_name() {
    let source = "fn fib(n) if (n < 2) n else fib(n - 1) + fib(n - 2); print(fib(10));";
    assert_eq!(output(source), "55 \n");
}

#[test]
fn test_function_value_in_global() {
    let (_, mut vm) = common::eval("fn f() 1;");
    match vm.global("f") {
        Some(Value::Obj(_)) => {}
        other => panic!("expected a function object, got {:?}", other),
    }
}

/// A named function nested in another function lives in a local slot and
/// reads enclosing locals through the frame chain.
#[test]
fn test_nested_function_reads_enclosing_local() {
    let source = "
        fn outer() begin
            a = 5;
            fn inner() a + 1;
            return inner();
        end
        print(outer());
    ";
    assert_eq!(output(source), "6 \n");
}

#[test]
fn test_closure_passed_as_value() {
    let source = "
        fn apply(f, x) f(x);
        print(apply(fn(n) n * 2, 21));
    ";
    assert_eq!(output(source), "42 \n");
}

#[test]
fn test_capture_of_object_survives_reassignment() {
    let source = "
        t = { n = 7 };
        f = fn()[t] t.n;
        t = nil;
        collect_garbage();
        print(f());
    ";
    assert_eq!(output(source), "7 \n");
}

#[test]
fn test_closure_resolution_after_inner_call() {
    // The right operand is a call, so the capture load runs after that call
    // returns; the executing-function pointer must have been restored.
    let source = "
        fn bump(n) n + 1;
        x = 40;
        f = fn()[x] x + bump(1);
        print(f());
    ";
    assert_eq!(output(source), "42 \n");
}

#[test]
fn test_unbounded_recursion_exhausts_frame_pool() {
    let source = "
        fn f(n) f(n + 1);
        f(0);
    ";
    assert!(matches!(
        runtime_error(source),
        RuntimeError::FramePoolExhausted { .. }
    ));
}

#[test]
fn test_self_outside_function_errors() {
    assert!(matches!(
        runtime_error("x = self;"),
        RuntimeError::Type { .. }
    ));
}
