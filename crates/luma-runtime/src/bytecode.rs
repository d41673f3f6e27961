//! Bytecode instruction set
//!
//! A flat sequence of `(opcode, operand)` pairs. The operand reuses the
//! runtime [`Value`] union, so a jump carries `Int(target)`, a name access
//! carries `Name(id)`, a fast local access carries `Slot(index, depth)`, and
//! a literal push carries the literal itself. Forward jump targets are
//! back-patched once the emitter knows them.

use crate::intern::Interns;
use crate::value::{format_number, Value};
use std::fmt;

/// Operation code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Push the operand
    Push,
    /// Drop `Int(n)` values
    Pop,
    /// Duplicate the top of the stack
    Dup,

    // Arithmetic and logic
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,
    Modulo,
    FloorDivide,

    // Comparison
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Name and slot access
    /// Push `globals[Name]` (nil if absent)
    LoadName,
    /// Push `frame.ancestor(depth).locals[index]`
    LoadFast,
    /// `globals[Name] = pop`
    StoreName,
    /// `frame.ancestor(depth).locals[index] = pop`
    StoreFast,
    /// Attribute/index read; operand `Name` or `Nil`
    LoadAttr,
    /// Attribute write; operand `Name`, `Num` (indexed) or `Nil` (append)
    StoreAttr,

    // Control flow
    Jump,
    /// Pop; jump when falsey
    JumpNotTest,

    // Functions
    /// Pop callee, dispatch on its kind; operand is the argument count
    Call,
    /// Push a fresh function whose body starts at `Int(entry)`
    MakeFunction,
    /// Pop a value and append it to the function at the top of the stack
    StoreClosure,
    /// Push the executing function's capture `Int(k)`
    LoadClosure,
    /// Push the executing function's bound receiver (or nil)
    GetSelf,

    // Frames
    AddFrame,
    /// Operand `Bool(return_table)` is reserved and always false
    PopFrame,
    Return,

    // Objects
    /// Operand `Int(kind)`: 0 array, 1 table, 2 string (pops its bytes)
    NewObj,
    /// Pop a table, install it as the meta of the table now on top
    SetMeta,
}

/// `NewObj` kind operands
pub const NEW_ARRAY: i32 = 0;
/// `NewObj` kind operands
pub const NEW_TABLE: i32 = 1;
/// `NewObj` kind operands
pub const NEW_STRING: i32 = 2;

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Push => "PUSH",
            OpCode::Pop => "POP",
            OpCode::Dup => "DUP",
            OpCode::Add => "ADD",
            OpCode::Subtract => "SUBTRACT",
            OpCode::Multiply => "MULTIPLY",
            OpCode::Divide => "DIVIDE",
            OpCode::Not => "NOT",
            OpCode::Negate => "NEGATE",
            OpCode::Modulo => "MOD",
            OpCode::FloorDivide => "DIV",
            OpCode::Equal => "EQUAL",
            OpCode::NotEqual => "NOT_EQUAL",
            OpCode::Greater => "GREATER",
            OpCode::GreaterEqual => "GREATER_EQUAL",
            OpCode::Less => "LESS",
            OpCode::LessEqual => "LESS_EQUAL",
            OpCode::LoadName => "LOAD_NAME",
            OpCode::LoadFast => "LOAD_FAST",
            OpCode::StoreName => "STORE_NAME",
            OpCode::StoreFast => "STORE_FAST",
            OpCode::LoadAttr => "LOAD_ATTR",
            OpCode::StoreAttr => "STORE_ATTR",
            OpCode::Jump => "JUMP",
            OpCode::JumpNotTest => "JUMP_NOT_TEST",
            OpCode::Call => "CALL",
            OpCode::MakeFunction => "MAKE_FUNCTION",
            OpCode::StoreClosure => "STORE_CLOSURE",
            OpCode::LoadClosure => "LOAD_CLOSURE",
            OpCode::GetSelf => "GET_SELF",
            OpCode::AddFrame => "ADD_FRAME",
            OpCode::PopFrame => "POP_FRAME",
            OpCode::Return => "RETURN",
            OpCode::NewObj => "NEW_OBJ",
            OpCode::SetMeta => "SET_META",
        };
        f.write_str(name)
    }
}

/// One instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Op {
    /// Operation code
    pub code: OpCode,
    /// Operand value (`Nil` when the operation takes none)
    pub operand: Value,
}

impl Op {
    /// An instruction with no operand
    pub fn new(code: OpCode) -> Self {
        Self {
            code,
            operand: Value::Nil,
        }
    }

    /// An instruction with an operand
    pub fn with(code: OpCode, operand: Value) -> Self {
        Self { code, operand }
    }
}

/// The flat instruction sequence produced by the compiler
#[derive(Debug, Default)]
pub struct Assembly {
    /// Instructions in execution order
    pub ops: Vec<Op>,
}

impl Assembly {
    /// Create an empty assembly
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction, returning its index
    pub fn put(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    /// Rewrite the operand at `index` (jump back-patching)
    pub fn set_operand(&mut self, index: usize, operand: Value) {
        self.ops[index].operand = operand;
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the assembly is empty
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Render an assembly as a human-readable listing
pub fn disassemble(assembly: &Assembly, interns: &Interns) -> String {
    let mut out = String::new();
    let mut indent = 0usize;
    for (index, op) in assembly.ops.iter().enumerate() {
        if op.code == OpCode::PopFrame {
            indent = indent.saturating_sub(1);
        }
        out.push_str(&format!(
            "{:4}  {}{}{}\n",
            index,
            "  ".repeat(indent),
            op.code,
            render_operand(op, interns)
        ));
        if op.code == OpCode::AddFrame {
            indent += 1;
        }
    }
    out
}

fn render_operand(op: &Op, interns: &Interns) -> String {
    match op.operand {
        Value::Nil => String::new(),
        Value::Bool(b) => format!(" {}", b),
        Value::Int(i) => format!(" {}", i),
        Value::Num(n) => format!(" {}", format_number(n)),
        Value::Name(id) => format!(" '{}'", interns.resolve(id)),
        Value::Slot(index, depth) => format!(" {} {}", index, depth),
        Value::Obj(_) => " <object>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_patch() {
        let mut asm = Assembly::new();
        let jump = asm.put(Op::with(OpCode::Jump, Value::Int(0)));
        asm.put(Op::with(OpCode::Push, Value::Num(1.0)));
        asm.set_operand(jump, Value::Int(asm.len() as i32));
        assert_eq!(asm.ops[jump].operand, Value::Int(2));
    }

    #[test]
    fn test_disassemble() {
        let mut interns = Interns::new();
        let name = interns.intern("x");
        let mut asm = Assembly::new();
        asm.put(Op::with(OpCode::Push, Value::Num(7.0)));
        asm.put(Op::with(OpCode::StoreName, Value::Name(name)));
        let listing = disassemble(&asm, &interns);
        assert!(listing.contains("PUSH 7"));
        assert!(listing.contains("STORE_NAME 'x'"));
    }
}
