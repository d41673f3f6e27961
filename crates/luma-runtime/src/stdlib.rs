//! Host function prelude
//!
//! The callables every embedding installs before running a program. Each
//! follows the host ABI: read arguments through the VM, leave at most one
//! result on the stack, report how many results were left. The VM pops the
//! arguments afterwards.

use crate::object::ObjData;
use crate::value::{RuntimeError, Value};
use crate::vm::Vm;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Shared destination for `print` output
pub type OutputWriter = Rc<RefCell<dyn Write>>;

/// Writer backed by process stdout
pub fn stdout_writer() -> OutputWriter {
    Rc::new(RefCell::new(std::io::stdout()))
}

/// Install the whole prelude on a VM
pub fn install(vm: &mut Vm) {
    vm.register_host("print", host_print);
    vm.register_host("input", host_input);
    vm.register_host("sin", host_sin);
    vm.register_host("pow", host_pow);
    vm.register_host("now", host_now);
    vm.register_host("string", host_string);
    vm.register_host("int", host_int);
    vm.register_host("number", host_number);
    vm.register_host("collect_garbage", host_collect_garbage);
}

/// `print(…)` - each argument stringified and followed by a space, then a
/// newline
fn host_print(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let mut line = String::new();
    for index in 0..vm.parameters_count() {
        let value = vm.parameter(index);
        line.push_str(&vm.stringify(value)?);
        line.push(' ');
    }
    line.push('\n');
    vm.write_output(&line);
    Ok(0)
}

/// `input()` - one line from stdin as a fresh string
fn host_input(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    let id = vm.alloc_string(&line);
    vm.push_result(Value::Obj(id))?;
    Ok(1)
}

fn host_sin(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let x = numeric_argument(vm, 0, "sin")?;
    vm.push_result(Value::Num(x.sin()))?;
    Ok(1)
}

fn host_pow(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let base = numeric_argument(vm, 0, "pow")?;
    let exponent = numeric_argument(vm, 1, "pow")?;
    vm.push_result(Value::Num(base.powf(exponent)))?;
    Ok(1)
}

/// `now()` - nanoseconds since the Unix epoch
fn host_now(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    vm.push_result(Value::Num(nanos as f64))?;
    Ok(1)
}

/// `string(…)` - concatenated stringification of every argument
fn host_string(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let mut text = String::new();
    for index in 0..vm.parameters_count() {
        let value = vm.parameter(index);
        text.push_str(&vm.stringify(value)?);
    }
    let id = vm.alloc(ObjData::Str(text.into_bytes()));
    vm.push_result(Value::Obj(id))?;
    Ok(1)
}

/// `int(x)` - round the argument's numeric rendering to a small int
fn host_int(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let n = parsed_argument(vm, "int")?;
    vm.push_result(Value::Int(n.round() as i32))?;
    Ok(1)
}

/// `number(x)` - parse the argument's rendering as a number
fn host_number(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let n = parsed_argument(vm, "number")?;
    vm.push_result(Value::Num(n))?;
    Ok(1)
}

fn host_collect_garbage(vm: &mut Vm) -> Result<usize, RuntimeError> {
    vm.collect_garbage();
    Ok(0)
}

fn numeric_argument(vm: &Vm, index: usize, name: &str) -> Result<f64, RuntimeError> {
    let value = vm.parameter(index);
    value.as_number().ok_or_else(|| RuntimeError::Type {
        msg: format!(
            "{}() expects a number argument, found {}",
            name,
            value.kind_name()
        ),
        at: vm.current_index(),
    })
}

/// Stringify argument 0 and parse it as a number
fn parsed_argument(vm: &mut Vm, name: &str) -> Result<f64, RuntimeError> {
    let value = vm.parameter(0);
    let text = vm.stringify(value)?;
    text.trim().parse().map_err(|_| RuntimeError::Type {
        msg: format!("{}() cannot parse '{}' as a number", name, text),
        at: vm.current_index(),
    })
}
