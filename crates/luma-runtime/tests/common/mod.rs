//! Shared helpers: evaluate source and capture `print` output

#![allow(dead_code)]

use luma_runtime::{Luma, LumaError, Vm};
use std::cell::RefCell;
use std::rc::Rc;

/// Evaluate a program, returning captured output and the finished VM
///
/// Panics on any compile or runtime error.
pub fn eval(source: &str) -> (String, Vm) {
    match try_eval(source) {
        (output, Ok(vm)) => (output, vm),
        (output, Err(error)) => {
            panic!("eval failed: {:?}\noutput so far: {:?}", error, output)
        }
    }
}

/// Evaluate a program, returning captured output and the run result
pub fn try_eval(source: &str) -> (String, Result<Vm, LumaError>) {
    let buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let runtime = Luma::with_writer(buffer.clone());
    let result = runtime.eval(source);
    let output = String::from_utf8(buffer.borrow().clone()).expect("print output is UTF-8");
    (output, result)
}

/// Captured output of a program that must succeed
pub fn output(source: &str) -> String {
    eval(source).0
}

/// The runtime error a program must hit
pub fn runtime_error(source: &str) -> luma_runtime::RuntimeError {
    match try_eval(source).1 {
        Err(LumaError::Runtime(error)) => error,
        Err(LumaError::Compile(diags)) => panic!("expected runtime error, got {:?}", diags),
        Ok(_) => panic!("expected runtime error, program succeeded"),
    }
}
