//! Stack-based virtual machine
//!
//! Executes an [`Assembly`] against the managed heap:
//! - a fixed-capacity value stack and a LIFO frame pool hold all transient
//!   state;
//! - the executing function (`callee`) resolves `LOAD_CLOSURE` and
//!   `GET_SELF`, and is saved/restored across calls;
//! - attribute access is uniform over tables (named, with meta fallback)
//!   and arrays/strings (indexed);
//! - collection triggers on an allocation threshold and is precisely rooted
//!   from globals, the value stack, every live frame's used locals, and the
//!   callee chain.

mod frame;

pub use frame::{Frame, FramePool, FRAME_LOCALS, FRAME_POOL_CAPACITY};

use crate::bytecode::{Assembly, OpCode, NEW_ARRAY, NEW_STRING, NEW_TABLE};
use crate::heap::{Heap, HeapStats, ObjId};
use crate::intern::{Interns, NameId};
use crate::object::{Function, HostFn, ObjData, Table};
use crate::stdlib::{stdout_writer, OutputWriter};
use crate::value::{format_number, RuntimeError, Value};
use std::collections::HashMap;
use std::io::Write;

/// Value stack capacity
pub const STACK_CAPACITY: usize = 1024 * 1024 / std::mem::size_of::<Value>();
/// Longest meta chain a lookup will traverse
pub const META_CHAIN_LIMIT: usize = 64;
/// Deepest nesting stringification will follow
pub const STRINGIFY_DEPTH_LIMIT: usize = 64;

/// Virtual machine state
pub struct Vm {
    /// Instructions under execution
    assembly: Assembly,
    /// Intern table shared by operands, globals, and table keys
    interns: Interns,
    /// The managed heap
    heap: Heap,
    /// Value stack
    stack: Vec<Value>,
    /// Activation frames
    frames: FramePool,
    /// Global bindings
    globals: HashMap<NameId, Value>,
    /// Instruction cursor
    pc: usize,
    /// Argument count visible to the host function currently running
    parameters_count: usize,
    /// The function currently executing, if any
    callee: Option<ObjId>,
    /// Saved callees, one per call in flight
    callee_stack: Vec<Option<ObjId>>,
    /// Destination for `print`
    output: OutputWriter,
    /// Interned `__add`, looked up by table addition
    name_add: NameId,
    /// Interned `__to_string`, looked up by table stringification
    name_to_string: NameId,
}

impl Vm {
    /// Create a VM for an assembly
    ///
    /// The intern table must be the one the assembly's operands reference.
    pub fn new(assembly: Assembly, mut interns: Interns) -> Self {
        let name_add = interns.intern("__add");
        let name_to_string = interns.intern("__to_string");
        Self {
            assembly,
            interns,
            heap: Heap::new(),
            stack: Vec::with_capacity(1024),
            frames: FramePool::new(),
            globals: HashMap::new(),
            pc: 0,
            parameters_count: 0,
            callee: None,
            callee_stack: Vec::new(),
            output: stdout_writer(),
            name_add,
            name_to_string,
        }
    }

    /// Redirect `print` output (tests, embedders)
    pub fn set_output_writer(&mut self, writer: OutputWriter) {
        self.output = writer;
    }

    /// Install a global binding
    pub fn add_global(&mut self, name: &str, value: Value) {
        let id = self.interns.intern(name);
        self.globals.insert(id, value);
    }

    /// Allocate a host function object and bind it to a global name
    pub fn register_host(&mut self, name: &str, function: HostFn) {
        let id = self.alloc(ObjData::Host(function));
        self.add_global(name, Value::Obj(id));
    }

    /// Read a global by source name
    pub fn global(&mut self, name: &str) -> Option<Value> {
        let id = self.interns.intern(name);
        self.globals.get(&id).copied()
    }

    /// The intern table
    pub fn interns(&self) -> &Interns {
        &self.interns
    }

    /// The heap (stats, test inspection)
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Borrow a heap object's payload
    pub fn heap_get(&self, id: ObjId) -> &ObjData {
        self.heap.get(id)
    }

    /// Index of the instruction currently executing
    pub fn current_index(&self) -> usize {
        self.pc.saturating_sub(1)
    }

    // === Host function ABI ===

    /// Number of arguments the running host call received
    pub fn parameters_count(&self) -> usize {
        self.parameters_count
    }

    /// Argument `index`, with 0 the leftmost source argument
    ///
    /// Reads past the argument count yield `Nil`.
    pub fn parameter(&self, index: usize) -> Value {
        if index >= self.parameters_count {
            return Value::Nil;
        }
        self.stack
            .len()
            .checked_sub(self.parameters_count - index)
            .and_then(|slot| self.stack.get(slot))
            .copied()
            .unwrap_or(Value::Nil)
    }

    /// Leave a host result on the stack
    pub fn push_result(&mut self, value: Value) -> Result<(), RuntimeError> {
        let at = self.current_index();
        self.push(value, at)
    }

    /// Allocate a heap object, collecting first when past the threshold
    pub fn alloc(&mut self, data: ObjData) -> ObjId {
        if self.heap.wants_collection() {
            self.collect_garbage();
        }
        self.heap.alloc(data)
    }

    /// Allocate a string object from host bytes
    pub fn alloc_string(&mut self, text: &str) -> ObjId {
        self.alloc(ObjData::Str(text.as_bytes().to_vec()))
    }

    /// Write to the `print` destination
    pub fn write_output(&mut self, text: &str) {
        let _ = self.output.borrow_mut().write_all(text.as_bytes());
    }

    #[cfg(test)]
    pub(crate) fn set_parameters_count(&mut self, count: usize) {
        self.parameters_count = count;
    }

    #[cfg(test)]
    pub(crate) fn stack_contents(&self) -> &[Value] {
        &self.stack
    }

    // === Execution ===

    /// Run the assembly from the current cursor to completion
    ///
    /// A final collection runs after the last instruction.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let result = self.run_until(None);
        self.collect_garbage();
        result
    }

    /// The dispatch loop
    ///
    /// When `floor` is set the loop exits as soon as a `RETURN` brings the
    /// call depth back down to it - the host-initiated re-entry path.
    fn run_until(&mut self, floor: Option<usize>) -> Result<(), RuntimeError> {
        while self.pc < self.assembly.len() {
            let op = self.assembly.ops[self.pc];
            let at = self.pc;
            self.pc += 1;

            match op.code {
                OpCode::Push => self.push(op.operand, at)?,
                OpCode::Pop => {
                    let count = operand_int(op.operand);
                    for _ in 0..count {
                        self.pop(at)?;
                    }
                }
                OpCode::Dup => {
                    let top = self.peek(0, at)?;
                    self.push(top, at)?;
                }

                OpCode::Add
                | OpCode::Subtract
                | OpCode::Multiply
                | OpCode::Divide
                | OpCode::Modulo
                | OpCode::FloorDivide
                | OpCode::Equal
                | OpCode::NotEqual
                | OpCode::Greater
                | OpCode::GreaterEqual
                | OpCode::Less
                | OpCode::LessEqual => self.binary_op(op.code, at)?,

                OpCode::Not => {
                    let value = self.pop(at)?;
                    self.push(Value::Bool(!value.is_truthy()), at)?;
                }
                OpCode::Negate => {
                    let value = self.pop(at)?;
                    let n = value.as_number().ok_or_else(|| RuntimeError::Type {
                        msg: format!("cannot negate a {} value", value.kind_name()),
                        at,
                    })?;
                    self.push(Value::Num(-n), at)?;
                }

                OpCode::LoadName => {
                    let name = operand_name(op.operand);
                    let value = self.globals.get(&name).copied().unwrap_or(Value::Nil);
                    self.push(value, at)?;
                }
                OpCode::StoreName => {
                    let name = operand_name(op.operand);
                    let value = self.pop(at)?;
                    self.globals.insert(name, value);
                }
                OpCode::LoadFast => {
                    let (index, depth) = operand_slot(op.operand);
                    let frame =
                        self.frames
                            .ancestor(depth as usize)
                            .ok_or(RuntimeError::BadFrameDepth { depth, at })?;
                    let slot = index as usize;
                    // Slots above the used count are stale leftovers; they
                    // must never resurface (they are not GC roots).
                    let value = if slot < frame.locals_count {
                        frame.locals[slot]
                    } else {
                        Value::Nil
                    };
                    self.push(value, at)?;
                }
                OpCode::StoreFast => {
                    let (index, depth) = operand_slot(op.operand);
                    let value = self.pop(at)?;
                    self.store_local(index, depth, value, at)?;
                }

                OpCode::LoadAttr => self.load_attr(op.operand, at)?,
                OpCode::StoreAttr => self.store_attr(op.operand, at)?,

                OpCode::Jump => self.pc = operand_int(op.operand) as usize,
                OpCode::JumpNotTest => {
                    let value = self.pop(at)?;
                    if !value.is_truthy() {
                        self.pc = operand_int(op.operand) as usize;
                    }
                }

                OpCode::Call => {
                    let argc = operand_int(op.operand) as usize;
                    self.call(argc, at)?;
                }
                OpCode::MakeFunction => {
                    let entry = operand_int(op.operand) as usize;
                    let id = self.alloc(ObjData::Function(Function::new(entry)));
                    self.push(Value::Obj(id), at)?;
                }
                OpCode::StoreClosure => {
                    let value = self.pop(at)?;
                    let target = self.peek(0, at)?;
                    match target {
                        Value::Obj(id) => match self.heap.get_mut(id) {
                            ObjData::Function(f) => f.captures.push(value),
                            other => {
                                return Err(RuntimeError::Type {
                                    msg: format!(
                                        "cannot store a capture into a {}",
                                        other.kind_name()
                                    ),
                                    at,
                                })
                            }
                        },
                        other => {
                            return Err(RuntimeError::Type {
                                msg: format!("cannot store a capture into a {}", other.kind_name()),
                                at,
                            })
                        }
                    }
                }
                OpCode::LoadClosure => {
                    let k = operand_int(op.operand) as usize;
                    let callee = self.require_callee(at)?;
                    let value = match self.heap.get(callee) {
                        ObjData::Function(f) => {
                            f.captures.get(k).copied().ok_or(RuntimeError::Type {
                                msg: format!("no capture at index {}", k),
                                at,
                            })?
                        }
                        _ => unreachable!("callee is always a function"),
                    };
                    self.push(value, at)?;
                }
                OpCode::GetSelf => {
                    let callee = self.require_callee(at)?;
                    let value = match self.heap.get(callee) {
                        ObjData::Function(f) => {
                            f.self_table.map(Value::Obj).unwrap_or(Value::Nil)
                        }
                        _ => unreachable!("callee is always a function"),
                    };
                    self.push(value, at)?;
                }

                OpCode::AddFrame => {
                    self.frames
                        .pull()
                        .ok_or(RuntimeError::FramePoolExhausted { at })?;
                }
                OpCode::PopFrame => {
                    // The return_table operand is reserved and always false.
                    self.frames.release();
                }
                OpCode::Return => {
                    // Unwind transparent frames down to the caller's.
                    while self.frames.current().return_address.is_none()
                        && self.frames.active() > 1
                    {
                        self.frames.release();
                    }
                    match self.frames.current_mut().return_address.take() {
                        Some(address) => {
                            self.pc = address;
                            self.callee = self
                                .callee_stack
                                .pop()
                                .ok_or(RuntimeError::ReturnOutsideCall { at })?;
                            if let Some(floor) = floor {
                                if self.callee_stack.len() == floor {
                                    return Ok(());
                                }
                            }
                        }
                        None => return Err(RuntimeError::ReturnOutsideCall { at }),
                    }
                }

                OpCode::NewObj => {
                    let kind = operand_int(op.operand);
                    let value = match kind {
                        NEW_ARRAY => Value::Obj(self.alloc(ObjData::Array(Vec::new()))),
                        NEW_TABLE => Value::Obj(self.alloc(ObjData::Table(Table::default()))),
                        NEW_STRING => {
                            let payload = self.pop(at)?;
                            let name = match payload {
                                Value::Name(id) => id,
                                other => {
                                    return Err(RuntimeError::Type {
                                        msg: format!(
                                            "string constructor expects interned bytes, found {}",
                                            other.kind_name()
                                        ),
                                        at,
                                    })
                                }
                            };
                            let bytes = self.interns.resolve(name).as_bytes().to_vec();
                            Value::Obj(self.alloc(ObjData::Str(bytes)))
                        }
                        other => {
                            return Err(RuntimeError::Type {
                                msg: format!("unknown object kind {}", other),
                                at,
                            })
                        }
                    };
                    self.push(value, at)?;
                }
                OpCode::SetMeta => {
                    let meta = self.pop(at)?;
                    let meta_id = match meta {
                        Value::Obj(id) if matches!(self.heap.get(id), ObjData::Table(_)) => id,
                        other => {
                            return Err(RuntimeError::Type {
                                msg: format!("meta must be a table, found {}", other.kind_name()),
                                at,
                            })
                        }
                    };
                    let target = self.peek(0, at)?;
                    match target {
                        Value::Obj(id) => match self.heap.get_mut(id) {
                            ObjData::Table(t) => t.meta = Some(meta_id),
                            other => {
                                return Err(RuntimeError::Type {
                                    msg: format!(
                                        "cannot set meta on a {}",
                                        other.kind_name()
                                    ),
                                    at,
                                })
                            }
                        },
                        other => {
                            return Err(RuntimeError::Type {
                                msg: format!("cannot set meta on a {}", other.kind_name()),
                                at,
                            })
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// `CALL argc` dispatch on the popped callee's kind
    fn call(&mut self, argc: usize, at: usize) -> Result<(), RuntimeError> {
        enum Callee {
            Function(usize),
            Host(HostFn),
            Other(&'static str),
        }

        let callee = self.pop(at)?;
        let id = match callee {
            Value::Obj(id) => id,
            other => {
                return Err(RuntimeError::NotCallable {
                    kind: other.kind_name(),
                    at,
                })
            }
        };
        let dispatch = match self.heap.get(id) {
            ObjData::Function(f) => Callee::Function(f.entry),
            ObjData::Host(function) => Callee::Host(*function),
            other => Callee::Other(other.kind_name()),
        };
        match dispatch {
            Callee::Function(entry) => {
                self.callee_stack.push(self.callee);
                self.callee = Some(id);
                self.frames.current_mut().return_address = Some(self.pc);
                self.pc = entry;
                Ok(())
            }
            Callee::Host(function) => {
                let saved = self.parameters_count;
                self.parameters_count = argc;
                let results = function(self)?;
                let held = if results > 0 { Some(self.pop(at)?) } else { None };
                for _ in 0..argc {
                    self.pop(at)?;
                }
                if let Some(value) = held {
                    self.push(value, at)?;
                }
                self.parameters_count = saved;
                Ok(())
            }
            Callee::Other(kind) => Err(RuntimeError::NotCallable { kind, at }),
        }
    }

    /// Run a function to its matching return (host-initiated re-entry,
    /// `__add`, `__to_string`)
    fn invoke(&mut self, func: ObjId, at: usize) -> Result<(), RuntimeError> {
        let entry = match self.heap.get(func) {
            ObjData::Function(f) => f.entry,
            other => {
                return Err(RuntimeError::NotCallable {
                    kind: other.kind_name(),
                    at,
                })
            }
        };
        let floor = self.callee_stack.len();
        self.callee_stack.push(self.callee);
        self.callee = Some(func);
        self.frames.current_mut().return_address = Some(self.pc);
        self.pc = entry;
        self.run_until(Some(floor))
    }

    // === Operators ===

    /// Binary operators dispatch on the left operand's kind; operands are
    /// peeked and only popped on completion so a collection triggered by
    /// re-entrant stringification cannot free them
    fn binary_op(&mut self, code: OpCode, at: usize) -> Result<(), RuntimeError> {
        let left = self.peek(0, at)?;
        let right = self.peek(1, at)?;

        if let Some(l) = left.as_number() {
            return self.numeric_op(code, l, right, at);
        }
        if let Value::Obj(id) = left {
            return self.object_op(id, code, at);
        }
        match code {
            OpCode::Equal => {
                let result = primitive_equal(left, right);
                self.pop_operands_push(Value::Bool(result), at)
            }
            OpCode::NotEqual => {
                let result = !primitive_equal(left, right);
                self.pop_operands_push(Value::Bool(result), at)
            }
            _ => Err(RuntimeError::Type {
                msg: format!("cannot apply {} to a {} value", code, left.kind_name()),
                at,
            }),
        }
    }

    fn numeric_op(
        &mut self,
        code: OpCode,
        l: f64,
        right: Value,
        at: usize,
    ) -> Result<(), RuntimeError> {
        // Equality across kinds is total; everything else needs a number.
        let r = match right.as_number() {
            Some(r) => r,
            None => {
                return match code {
                    OpCode::Equal => self.pop_operands_push(Value::Bool(false), at),
                    OpCode::NotEqual => self.pop_operands_push(Value::Bool(true), at),
                    _ => Err(RuntimeError::Type {
                        msg: format!(
                            "cannot apply {} to number and {}",
                            code,
                            right.kind_name()
                        ),
                        at,
                    }),
                }
            }
        };
        let result = match code {
            OpCode::Add => Value::Num(l + r),
            OpCode::Subtract => Value::Num(l - r),
            OpCode::Multiply => Value::Num(l * r),
            OpCode::Divide => Value::Num(l / r),
            OpCode::Modulo | OpCode::FloorDivide => {
                let (li, ri) = (l as i64, r as i64);
                if ri == 0 {
                    return Err(RuntimeError::DivisionByZero { at });
                }
                let v = if code == OpCode::Modulo {
                    li % ri
                } else {
                    li / ri
                };
                Value::Num(v as f64)
            }
            OpCode::Equal => Value::Bool(l == r),
            OpCode::NotEqual => Value::Bool(l != r),
            OpCode::Greater => Value::Bool(l > r),
            OpCode::GreaterEqual => Value::Bool(l >= r),
            OpCode::Less => Value::Bool(l < r),
            OpCode::LessEqual => Value::Bool(l <= r),
            _ => unreachable!("non-binary opcode in numeric_op"),
        };
        self.pop_operands_push(result, at)
    }

    /// Operator on an object left operand
    fn object_op(&mut self, id: ObjId, code: OpCode, at: usize) -> Result<(), RuntimeError> {
        let right = self.peek(1, at)?;
        match code {
            OpCode::Equal | OpCode::NotEqual => {
                let same = matches!(right, Value::Obj(rid) if rid == id);
                let result = if code == OpCode::Equal { same } else { !same };
                self.pop_operands_push(Value::Bool(result), at)
            }
            OpCode::Add if matches!(self.heap.get(id), ObjData::Str(_)) => {
                // Mutating concatenation: append and return the same handle,
                // preserving identity.
                let text = self.stringify(right)?;
                if let ObjData::Str(bytes) = self.heap.get_mut(id) {
                    bytes.extend_from_slice(text.as_bytes());
                }
                self.pop_operands_push(Value::Obj(id), at)
            }
            OpCode::Add if matches!(self.heap.get(id), ObjData::Array(_)) => {
                if let ObjData::Array(values) = self.heap.get_mut(id) {
                    values.push(right);
                }
                self.pop_operands_push(Value::Obj(id), at)
            }
            OpCode::Add if matches!(self.heap.get(id), ObjData::Table(_)) => {
                let target = self.table_lookup(id, self.name_add, at)?;
                let func = match target {
                    Value::Obj(fid) if matches!(self.heap.get(fid), ObjData::Function(_)) => fid,
                    _ => {
                        return Err(RuntimeError::Type {
                            msg: "table has no callable __add member".to_string(),
                            at,
                        })
                    }
                };
                // Drop the table; the right operand stays on the stack where
                // the handler's parameter store consumes it.
                self.pop(at)?;
                if let ObjData::Function(f) = self.heap.get_mut(func) {
                    f.self_table = Some(id);
                }
                self.invoke(func, at)
            }
            _ => Err(RuntimeError::Type {
                msg: format!(
                    "cannot apply {} to a {} value",
                    code,
                    self.heap.get(id).kind_name()
                ),
                at,
            }),
        }
    }

    /// Drop both operands, push the result
    fn pop_operands_push(&mut self, result: Value, at: usize) -> Result<(), RuntimeError> {
        self.pop(at)?;
        self.pop(at)?;
        self.push(result, at)
    }

    // === Attribute I/O ===

    fn load_attr(&mut self, operand: Value, at: usize) -> Result<(), RuntimeError> {
        if let Value::Name(name) = operand {
            let receiver = self.pop(at)?;
            let id = match receiver {
                Value::Obj(id) if matches!(self.heap.get(id), ObjData::Table(_)) => id,
                other => {
                    return Err(RuntimeError::Type {
                        msg: format!(
                            "attribute '{}' read on a {} value",
                            self.interns.resolve(name),
                            other.kind_name()
                        ),
                        at,
                    })
                }
            };
            let result = self.table_lookup(id, name, at)?;
            // A function found through a table binds the receiver; the
            // binding is per-lookup and overwrites any previous one.
            if let Value::Obj(fid) = result {
                if let ObjData::Function(f) = self.heap.get_mut(fid) {
                    f.self_table = Some(id);
                }
            }
            self.push(result, at)
        } else {
            // Indexed form: the receiver is on top, the index beneath it.
            let receiver = self.pop(at)?;
            let index_value = self.pop(at)?;
            let index = index_value.as_number().ok_or_else(|| RuntimeError::Type {
                msg: format!("index must be a number, found {}", index_value.kind_name()),
                at,
            })? as i64;
            let id = match receiver {
                Value::Obj(id) => id,
                other => {
                    return Err(RuntimeError::Type {
                        msg: format!("indexed read on a {} value", other.kind_name()),
                        at,
                    })
                }
            };
            let result = match self.heap.get(id) {
                ObjData::Array(values) => *usize::try_from(index)
                    .ok()
                    .and_then(|i| values.get(i))
                    .ok_or(RuntimeError::IndexOutOfRange {
                        index,
                        len: values.len(),
                        at,
                    })?,
                ObjData::Str(bytes) => {
                    let byte = usize::try_from(index)
                        .ok()
                        .and_then(|i| bytes.get(i))
                        .copied()
                        .ok_or(RuntimeError::IndexOutOfRange {
                            index,
                            len: bytes.len(),
                            at,
                        })?;
                    Value::Int(i32::from(byte))
                }
                other => {
                    return Err(RuntimeError::Type {
                        msg: format!("indexed read on a {} value", other.kind_name()),
                        at,
                    })
                }
            };
            self.push(result, at)
        }
    }

    fn store_attr(&mut self, operand: Value, at: usize) -> Result<(), RuntimeError> {
        match operand {
            // Named store: pop the value, leave the table.
            Value::Name(name) => {
                let value = self.pop(at)?;
                let target = self.peek(0, at)?;
                match target {
                    Value::Obj(id) => match self.heap.get_mut(id) {
                        ObjData::Table(t) => {
                            t.members.insert(name, value);
                            Ok(())
                        }
                        other => Err(RuntimeError::Type {
                            msg: format!(
                                "attribute '{}' write on a {} value",
                                self.interns.resolve(name),
                                other.kind_name()
                            ),
                            at,
                        }),
                    },
                    other => Err(RuntimeError::Type {
                        msg: format!(
                            "attribute '{}' write on a {} value",
                            self.interns.resolve(name),
                            other.kind_name()
                        ),
                        at,
                    }),
                }
            }
            // Indexed store: pop the index and the value, leave the array.
            Value::Num(_) | Value::Int(_) => {
                let index_value = self.pop(at)?;
                let value = self.pop(at)?;
                let index = index_value.as_number().ok_or_else(|| RuntimeError::Type {
                    msg: format!("index must be a number, found {}", index_value.kind_name()),
                    at,
                })? as i64;
                let target = self.peek(0, at)?;
                let id = match target {
                    Value::Obj(id) => id,
                    other => {
                        return Err(RuntimeError::Type {
                            msg: format!("indexed write on a {} value", other.kind_name()),
                            at,
                        })
                    }
                };
                match self.heap.get_mut(id) {
                    ObjData::Array(values) => {
                        let len = values.len();
                        let slot = usize::try_from(index)
                            .ok()
                            .filter(|&i| i < len)
                            .ok_or(RuntimeError::IndexOutOfRange { index, len, at })?;
                        values[slot] = value;
                        Ok(())
                    }
                    ObjData::Str(bytes) => {
                        let len = bytes.len();
                        let slot = usize::try_from(index)
                            .ok()
                            .filter(|&i| i < len)
                            .ok_or(RuntimeError::IndexOutOfRange { index, len, at })?;
                        let byte = value.as_number().ok_or_else(|| RuntimeError::Type {
                            msg: format!(
                                "string elements are bytes, found {}",
                                value.kind_name()
                            ),
                            at,
                        })?;
                        bytes[slot] = byte as i64 as u8;
                        Ok(())
                    }
                    other => Err(RuntimeError::Type {
                        msg: format!("indexed write on a {} value", other.kind_name()),
                        at,
                    }),
                }
            }
            // Append: pop the value, leave the array (array-literal path).
            _ => {
                let value = self.pop(at)?;
                let target = self.peek(0, at)?;
                match target {
                    Value::Obj(id) => match self.heap.get_mut(id) {
                        ObjData::Array(values) => {
                            values.push(value);
                            Ok(())
                        }
                        other => Err(RuntimeError::Type {
                            msg: format!("cannot append to a {} value", other.kind_name()),
                            at,
                        }),
                    },
                    other => Err(RuntimeError::Type {
                        msg: format!("cannot append to a {} value", other.kind_name()),
                        at,
                    }),
                }
            }
        }
    }

    /// Member lookup through the meta chain, bounded against cycles
    fn table_lookup(
        &self,
        start: ObjId,
        name: NameId,
        at: usize,
    ) -> Result<Value, RuntimeError> {
        let mut id = start;
        for _ in 0..=META_CHAIN_LIMIT {
            let table = match self.heap.get(id) {
                ObjData::Table(t) => t,
                _ => unreachable!("meta links are checked at SET_META"),
            };
            if let Some(&value) = table.members.get(&name) {
                return Ok(value);
            }
            match table.meta {
                Some(meta) => id = meta,
                None => return Ok(Value::Nil),
            }
        }
        Err(RuntimeError::MetaChainTooLong {
            limit: META_CHAIN_LIMIT,
            at,
        })
    }

    // === Locals ===

    fn store_local(
        &mut self,
        index: i16,
        depth: i16,
        value: Value,
        at: usize,
    ) -> Result<(), RuntimeError> {
        let frame = self
            .frames
            .ancestor_mut(depth as usize)
            .ok_or(RuntimeError::BadFrameDepth { depth, at })?;
        let slot = index as usize;
        if index < 0 || slot >= FRAME_LOCALS {
            return Err(RuntimeError::BadLocalSlot {
                slot: index,
                count: frame.locals_count,
                at,
            });
        }
        if slot < frame.locals_count {
            frame.locals[slot] = value;
        } else if slot == frame.locals_count {
            frame.locals[slot] = value;
            frame.locals_count += 1;
        } else {
            return Err(RuntimeError::BadLocalSlot {
                slot: index,
                count: frame.locals_count,
                at,
            });
        }
        Ok(())
    }

    fn require_callee(&self, at: usize) -> Result<ObjId, RuntimeError> {
        self.callee.ok_or(RuntimeError::Type {
            msg: "no function is executing".to_string(),
            at,
        })
    }

    // === Stack ===

    fn push(&mut self, value: Value, at: usize) -> Result<(), RuntimeError> {
        if self.stack.len() >= STACK_CAPACITY {
            return Err(RuntimeError::StackOverflow { at });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self, at: usize) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow { at })
    }

    fn peek(&self, depth: usize, at: usize) -> Result<Value, RuntimeError> {
        self.stack
            .len()
            .checked_sub(1 + depth)
            .map(|slot| self.stack[slot])
            .ok_or(RuntimeError::StackUnderflow { at })
    }

    // === Stringification ===

    /// Render a value the way the language prints it
    ///
    /// Lives on the VM because a table with a `__to_string` member re-enters
    /// user code.
    pub fn stringify(&mut self, value: Value) -> Result<String, RuntimeError> {
        self.stringify_depth(value, 0)
    }

    fn stringify_depth(&mut self, value: Value, depth: usize) -> Result<String, RuntimeError> {
        let at = self.current_index();
        if depth > STRINGIFY_DEPTH_LIMIT {
            return Err(RuntimeError::TooDeeplyNested {
                limit: STRINGIFY_DEPTH_LIMIT,
                at,
            });
        }
        match value {
            Value::Nil => Ok("nil".to_string()),
            Value::Bool(b) => Ok(if b { "true" } else { "false" }.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Num(n) => Ok(format_number(n)),
            Value::Name(id) => Ok(self.interns.resolve(id).to_string()),
            Value::Slot(a, b) => Ok(format!("{} {}", a, b)),
            Value::Obj(id) => {
                // Snapshot enough to render without holding the heap borrow
                // across the recursive calls below.
                enum Render {
                    Done(String),
                    Array(Vec<Value>),
                    Table,
                }
                let step = match self.heap.get(id) {
                    ObjData::Str(bytes) => {
                        Render::Done(String::from_utf8_lossy(bytes).into_owned())
                    }
                    ObjData::Array(values) => Render::Array(values.clone()),
                    ObjData::Function(f) => Render::Done(format!("<function at {}>", f.entry)),
                    ObjData::Host(_) => Render::Done("<host function>".to_string()),
                    ObjData::Table(_) => Render::Table,
                };
                match step {
                    Render::Done(text) => Ok(text),
                    Render::Array(values) => {
                        let mut parts = Vec::with_capacity(values.len());
                        for element in values {
                            parts.push(self.stringify_depth(element, depth + 1)?);
                        }
                        Ok(format!("[{}]", parts.join(", ")))
                    }
                    Render::Table => self.stringify_table(id, depth, at),
                }
            }
        }
    }

    /// Render a table: through its `__to_string` hook when one exists, else
    /// the default member listing ordered by name bytes
    fn stringify_table(
        &mut self,
        id: ObjId,
        depth: usize,
        at: usize,
    ) -> Result<String, RuntimeError> {
        let target = self.table_lookup(id, self.name_to_string, at)?;
        if let Value::Obj(fid) = target {
            if matches!(self.heap.get(fid), ObjData::Function(_)) {
                if let ObjData::Function(f) = self.heap.get_mut(fid) {
                    f.self_table = Some(id);
                }
                let base = self.stack.len();
                self.invoke(fid, at)?;
                if self.stack.len() <= base {
                    return Err(RuntimeError::Type {
                        msg: "__to_string returned no value".to_string(),
                        at,
                    });
                }
                let result = self.pop(at)?;
                return self.stringify_depth(result, depth + 1);
            }
        }
        let mut entries: Vec<(String, Value)> = match self.heap.get(id) {
            ObjData::Table(t) => t
                .members
                .iter()
                .map(|(&k, &v)| (self.interns.resolve(k).to_string(), v))
                .collect(),
            _ => unreachable!("caller checked the kind"),
        };
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut parts = Vec::with_capacity(entries.len());
        for (name, member) in entries {
            let rendered = self.stringify_depth(member, depth + 1)?;
            parts.push(format!("'{}': {}", name, rendered));
        }
        Ok(format!("{{ {} }}", parts.join(", ")))
    }

    // === Garbage collection ===

    /// Mark from every root, then sweep; returns the number freed
    pub fn collect_garbage(&mut self) -> usize {
        self.heap.clear_marks();
        let globals: Vec<Value> = self.globals.values().copied().collect();
        for value in globals {
            self.heap.mark_value(value);
        }
        for index in 0..self.stack.len() {
            self.heap.mark_value(self.stack[index]);
        }
        // Every rented frame's used locals are roots; stale slots above the
        // count are not scanned.
        let mut frame_roots = Vec::new();
        for frame in self.frames.live() {
            frame_roots.extend_from_slice(&frame.locals[..frame.locals_count]);
        }
        for value in frame_roots {
            self.heap.mark_value(value);
        }
        if let Some(callee) = self.callee {
            self.heap.mark_value(Value::Obj(callee));
        }
        let saved: Vec<ObjId> = self.callee_stack.iter().flatten().copied().collect();
        for callee in saved {
            self.heap.mark_value(Value::Obj(callee));
        }
        self.heap.sweep()
    }
}

// === Operand accessors ===
//
// Operand shapes are fixed by the compiler; a mismatch is a compiler bug,
// not a runtime condition.

fn operand_int(operand: Value) -> i32 {
    match operand {
        Value::Int(i) => i,
        other => unreachable!("expected an int operand, found {:?}", other),
    }
}

fn operand_name(operand: Value) -> NameId {
    match operand {
        Value::Name(id) => id,
        other => unreachable!("expected a name operand, found {:?}", other),
    }
}

fn operand_slot(operand: Value) -> (i16, i16) {
    match operand {
        Value::Slot(index, depth) => (index, depth),
        other => unreachable!("expected a slot operand, found {:?}", other),
    }
}

/// Equality for non-numeric primitives; cross-kind comparisons are false
fn primitive_equal(left: Value, right: Value) -> bool {
    match (left, right) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Name(a), Value::Name(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Op;

    fn empty_vm() -> Vm {
        Vm::new(Assembly::new(), Interns::new())
    }

    #[test]
    fn test_push_pop_discipline() {
        let mut vm = empty_vm();
        vm.push(Value::Num(1.0), 0).unwrap();
        assert_eq!(vm.pop(0).unwrap(), Value::Num(1.0));
        assert_eq!(vm.pop(0), Err(RuntimeError::StackUnderflow { at: 0 }));
    }

    #[test]
    fn test_run_simple_push() {
        let mut asm = Assembly::new();
        asm.put(Op::with(OpCode::Push, Value::Num(2.0)));
        asm.put(Op::with(OpCode::Push, Value::Num(3.0)));
        asm.put(Op::new(OpCode::Add));
        let mut vm = Vm::new(asm, Interns::new());
        vm.run_until(None).unwrap();
        assert_eq!(vm.stack, vec![Value::Num(5.0)]);
    }

    #[test]
    fn test_collect_garbage_roots_stack() {
        let mut vm = empty_vm();
        let id = vm.alloc(ObjData::Array(Vec::new()));
        vm.push(Value::Obj(id), 0).unwrap();
        let _garbage = vm.alloc(ObjData::Array(Vec::new()));
        let freed = vm.collect_garbage();
        assert_eq!(freed, 1);
        assert_eq!(vm.heap_stats().live_objects, 1);
    }

    #[test]
    fn test_stringify_primitives() {
        let mut vm = empty_vm();
        assert_eq!(vm.stringify(Value::Nil).unwrap(), "nil");
        assert_eq!(vm.stringify(Value::Bool(true)).unwrap(), "true");
        assert_eq!(vm.stringify(Value::Num(7.0)).unwrap(), "7");
        assert_eq!(vm.stringify(Value::Int(-3)).unwrap(), "-3");
        assert_eq!(vm.stringify(Value::Slot(2, 1)).unwrap(), "2 1");
    }

    #[test]
    fn test_stringify_depth_bound() {
        let mut vm = empty_vm();
        let id = vm.alloc(ObjData::Array(Vec::new()));
        if let ObjData::Array(values) = vm.heap.get_mut(id) {
            values.push(Value::Obj(id));
        }
        match vm.stringify(Value::Obj(id)) {
            Err(RuntimeError::TooDeeplyNested { .. }) => {}
            other => panic!("expected nesting error, got {:?}", other),
        }
    }
}
