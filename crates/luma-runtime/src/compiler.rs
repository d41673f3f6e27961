//! AST to bytecode compiler
//!
//! Lowers the tree to a flat instruction stream while resolving every name
//! into one of three binding classes: a fast local slot `(index, depth)`
//! found on the lexical scope chain, a capture index in the current
//! function's capture list, or a global accessed by interned name. Forward
//! jumps are emitted with a placeholder operand and back-patched.
//!
//! Conventions the VM depends on:
//! - binary operators emit the right operand first, then the left, then the
//!   op, so the interpreter pops left before right;
//! - function bodies are emitted inline behind a skip jump and end with
//!   `POP_FRAME; RETURN`;
//! - parameters are stored in reverse so the leftmost parameter receives
//!   the deepest argument on the stack.

use crate::ast::{BinaryOp, Expr, Program, UnaryOp};
use crate::bytecode::{Assembly, Op, OpCode, NEW_ARRAY, NEW_STRING, NEW_TABLE};
use crate::intern::NameId;
use crate::value::Value;

/// One open lexical scope
#[derive(Debug)]
struct Scope {
    /// Only the root scope is global; its assignments lower to `STORE_NAME`
    is_global: bool,
    /// Local names in slot order
    locals: Vec<NameId>,
    /// Names closed over by this function's capture list
    captures: Vec<NameId>,
}

impl Scope {
    fn new(is_global: bool) -> Self {
        Self {
            is_global,
            locals: Vec::new(),
            captures: Vec::new(),
        }
    }
}

/// Compiler state
pub struct Compiler {
    scopes: Vec<Scope>,
    asm: Assembly,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    /// Create a new compiler with the root (global) scope open
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(true)],
            asm: Assembly::new(),
        }
    }

    /// Compile a program to an assembly
    pub fn compile(mut self, program: &Program) -> Assembly {
        for expr in &program.body {
            self.compile_expr(expr);
        }
        self.asm
    }

    fn compile_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Nil => self.emit_with(OpCode::Push, Value::Nil),
            Expr::Bool(b) => self.emit_with(OpCode::Push, Value::Bool(*b)),
            Expr::Number(n) => self.emit_with(OpCode::Push, Value::Num(*n)),
            Expr::Str(id) => {
                self.emit_with(OpCode::Push, Value::Name(*id));
                self.emit_with(OpCode::NewObj, Value::Int(NEW_STRING));
            }
            Expr::Ident(name) => self.compile_ident(*name),
            Expr::SelfRef => self.emit(OpCode::GetSelf),
            Expr::Unary { op, expr } => {
                self.compile_expr(expr);
                self.emit(match op {
                    UnaryOp::Not => OpCode::Not,
                    UnaryOp::Negate => OpCode::Negate,
                });
            }
            Expr::Binary { op, lhs, rhs } => self.compile_binary(*op, lhs, rhs),
            Expr::Assign { name, value } => {
                self.compile_expr(value);
                self.compile_store(*name);
            }
            Expr::Block(body) => {
                self.scopes.push(Scope::new(false));
                self.emit(OpCode::AddFrame);
                for stmt in body {
                    self.compile_expr(stmt);
                }
                self.emit_with(OpCode::PopFrame, Value::Bool(false));
                self.scopes.pop();
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(condition);
                let to_else = self.emit_jump(OpCode::JumpNotTest);
                self.compile_expr(then_branch);
                let to_end = self.emit_jump(OpCode::Jump);
                self.patch_jump(to_else);
                if let Some(else_branch) = else_branch {
                    self.compile_expr(else_branch);
                }
                self.patch_jump(to_end);
            }
            Expr::While { condition, body } => {
                let loop_start = self.asm.len();
                self.compile_expr(condition);
                let to_end = self.emit_jump(OpCode::JumpNotTest);
                self.compile_expr(body);
                self.emit_with(OpCode::Jump, Value::Int(loop_start as i32));
                self.patch_jump(to_end);
            }
            Expr::For {
                init,
                condition,
                step,
                body,
            } => {
                self.compile_expr(init);
                let loop_start = self.asm.len();
                self.compile_expr(condition);
                let to_end = self.emit_jump(OpCode::JumpNotTest);
                // The step runs before the body each iteration.
                self.compile_expr(step);
                self.compile_expr(body);
                self.emit_with(OpCode::Jump, Value::Int(loop_start as i32));
                self.patch_jump(to_end);
            }
            Expr::Call { callee, args } => {
                for arg in args {
                    self.compile_expr(arg);
                }
                self.compile_expr(callee);
                self.emit_with(OpCode::Call, Value::Int(args.len() as i32));
            }
            Expr::FnDef {
                name,
                params,
                captures,
                body,
            } => self.compile_fn_def(name.as_ref().copied(), params, captures, body),
            Expr::Return(value) => {
                if let Some(value) = value {
                    self.compile_expr(value);
                }
                self.emit_with(OpCode::Return, Value::Bool(value.is_some()));
            }
            Expr::GetAttr { object, name } => {
                self.compile_expr(object);
                self.emit_with(OpCode::LoadAttr, Value::Name(*name));
            }
            Expr::Index { object, index } => {
                self.compile_expr(index);
                self.compile_expr(object);
                self.emit_with(OpCode::LoadAttr, Value::Nil);
            }
            Expr::SetAttr {
                object,
                name,
                value,
            } => {
                self.compile_expr(object);
                self.compile_expr(value);
                self.emit_with(OpCode::StoreAttr, Value::Name(*name));
            }
            Expr::SetIndex {
                object,
                index,
                value,
            } => {
                self.compile_expr(object);
                self.compile_expr(value);
                self.compile_expr(index);
                // The Num operand tags the indexed form; the index itself is
                // on the stack.
                self.emit_with(OpCode::StoreAttr, Value::Num(0.0));
            }
            Expr::TableLit { entries, meta } => {
                self.emit_with(OpCode::NewObj, Value::Int(NEW_TABLE));
                if let Some(meta) = meta {
                    self.compile_expr(meta);
                    self.emit(OpCode::SetMeta);
                }
                for (name, value) in entries {
                    self.compile_expr(value);
                    self.emit_with(OpCode::StoreAttr, Value::Name(*name));
                }
            }
            Expr::ArrayLit(values) => {
                self.emit_with(OpCode::NewObj, Value::Int(NEW_ARRAY));
                for value in values {
                    self.compile_expr(value);
                    self.emit_with(OpCode::StoreAttr, Value::Nil);
                }
            }
        }
    }

    /// Binary operators evaluate right-to-left at the value level
    fn compile_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) {
        match op {
            BinaryOp::And => {
                // lhs; DUP; JUMP_NOT_TEST end; POP 1; rhs
                // A falsy left operand short-circuits and is the result.
                self.compile_expr(lhs);
                self.emit(OpCode::Dup);
                let to_end = self.emit_jump(OpCode::JumpNotTest);
                self.emit_with(OpCode::Pop, Value::Int(1));
                self.compile_expr(rhs);
                self.patch_jump(to_end);
            }
            BinaryOp::Or => {
                // lhs; DUP; JUMP_NOT_TEST else; JUMP end; else: POP 1; rhs
                // A truthy left operand short-circuits and is the result.
                self.compile_expr(lhs);
                self.emit(OpCode::Dup);
                let to_else = self.emit_jump(OpCode::JumpNotTest);
                let to_end = self.emit_jump(OpCode::Jump);
                self.patch_jump(to_else);
                self.emit_with(OpCode::Pop, Value::Int(1));
                self.compile_expr(rhs);
                self.patch_jump(to_end);
            }
            _ => {
                self.compile_expr(rhs);
                self.compile_expr(lhs);
                self.emit(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Subtract,
                    BinaryOp::Mul => OpCode::Multiply,
                    BinaryOp::Div => OpCode::Divide,
                    BinaryOp::FloorDiv => OpCode::FloorDivide,
                    BinaryOp::Mod => OpCode::Modulo,
                    BinaryOp::Equal => OpCode::Equal,
                    BinaryOp::NotEqual => OpCode::NotEqual,
                    BinaryOp::Greater => OpCode::Greater,
                    BinaryOp::GreaterEqual => OpCode::GreaterEqual,
                    BinaryOp::Less => OpCode::Less,
                    BinaryOp::LessEqual => OpCode::LessEqual,
                    BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
                });
            }
        }
    }

    fn compile_fn_def(
        &mut self,
        name: Option<NameId>,
        params: &[NameId],
        captures: &[NameId],
        body: &Expr,
    ) {
        let make_index = self.emit_jump(OpCode::MakeFunction);

        // Capture expressions compile in the enclosing scope: each one is a
        // plain identifier lookup whose value is appended to the fresh
        // function object.
        for &capture in captures {
            self.compile_ident(capture);
            self.emit(OpCode::StoreClosure);
        }

        // A named definition stores the function where an assignment of that
        // name would; the anonymous form leaves it on the stack.
        if let Some(name) = name {
            self.compile_store(name);
        }

        let skip_index = self.emit_jump(OpCode::Jump);
        self.patch_jump(make_index);

        self.scopes.push(Scope::new(false));
        if let Some(scope) = self.scopes.last_mut() {
            scope.captures.extend_from_slice(captures);
        }
        self.emit(OpCode::AddFrame);

        // Arguments are popped into slots in reverse so the leftmost
        // parameter receives the deepest argument.
        for (slot, &param) in params.iter().rev().enumerate() {
            if let Some(scope) = self.scopes.last_mut() {
                scope.locals.push(param);
            }
            self.emit_with(OpCode::StoreFast, Value::Slot(slot as i16, 0));
        }

        self.compile_expr(body);
        self.emit_with(OpCode::PopFrame, Value::Bool(false));
        self.emit_with(OpCode::Return, Value::Bool(false));

        self.patch_jump(skip_index);
        self.scopes.pop();
    }

    /// Load a name through the binding-resolution order: lexical local,
    /// then capture, then global
    fn compile_ident(&mut self, name: NameId) {
        if let Some((index, depth)) = self.resolve_local(name) {
            self.emit_with(OpCode::LoadFast, Value::Slot(index, depth));
        } else if let Some(k) = self.resolve_capture(name) {
            self.emit_with(OpCode::LoadClosure, Value::Int(k));
        } else {
            self.emit_with(OpCode::LoadName, Value::Name(name));
        }
    }

    /// Store a name: global scope writes the global table, any other scope
    /// reuses a local found on the chain or appends a fresh slot
    fn compile_store(&mut self, name: NameId) {
        let scope = self.scopes.last().expect("scope stack never empty");
        if scope.is_global {
            self.emit_with(OpCode::StoreName, Value::Name(name));
            return;
        }
        let (index, depth) = match self.resolve_local(name) {
            Some(found) => found,
            None => {
                let scope = self.scopes.last_mut().expect("scope stack never empty");
                scope.locals.push(name);
                ((scope.locals.len() - 1) as i16, 0)
            }
        };
        self.emit_with(OpCode::StoreFast, Value::Slot(index, depth));
    }

    /// Walk the scope chain outward looking for a local, counting depth
    fn resolve_local(&self, name: NameId) -> Option<(i16, i16)> {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if let Some(index) = scope.locals.iter().position(|&local| local == name) {
                return Some((index as i16, depth as i16));
            }
        }
        None
    }

    /// Captures are only visible in the scope that declared them
    fn resolve_capture(&self, name: NameId) -> Option<i32> {
        let scope = self.scopes.last()?;
        scope
            .captures
            .iter()
            .position(|&capture| capture == name)
            .map(|k| k as i32)
    }

    // === Emission ===

    fn emit(&mut self, code: OpCode) {
        self.asm.put(Op::new(code));
    }

    fn emit_with(&mut self, code: OpCode, operand: Value) {
        self.asm.put(Op::with(code, operand));
    }

    /// Emit an instruction whose target is patched later; returns its index
    fn emit_jump(&mut self, code: OpCode) -> usize {
        self.asm.put(Op::with(code, Value::Int(0)))
    }

    /// Point a previously emitted jump at the current end of the assembly
    fn patch_jump(&mut self, index: usize) {
        self.asm.set_operand(index, Value::Int(self.asm.len() as i32));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interns;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn compile(source: &str) -> (Assembly, Interns) {
        let mut interns = Interns::new();
        let (tokens, diags) = Lexer::new(source, &mut interns).tokenize();
        assert!(diags.is_empty(), "lexer diagnostics: {:?}", diags);
        let program = Parser::new(tokens).parse().expect("parse failed");
        (Compiler::new().compile(&program), interns)
    }

    fn codes(asm: &Assembly) -> Vec<OpCode> {
        asm.ops.iter().map(|op| op.code).collect()
    }

    #[test]
    fn test_binary_emits_right_then_left() {
        let (asm, _) = compile("a + b;");
        assert_eq!(
            codes(&asm),
            vec![OpCode::LoadName, OpCode::LoadName, OpCode::Add]
        );
        // Right operand first
        let (asm, interns) = compile("a - b;");
        match asm.ops[0].operand {
            Value::Name(id) => assert_eq!(interns.resolve(id), "b"),
            other => panic!("unexpected operand {:?}", other),
        }
    }

    #[test]
    fn test_global_assignment_stores_by_name() {
        let (asm, interns) = compile("x = 1;");
        assert_eq!(codes(&asm), vec![OpCode::Push, OpCode::StoreName]);
        match asm.ops[1].operand {
            Value::Name(id) => assert_eq!(interns.resolve(id), "x"),
            other => panic!("unexpected operand {:?}", other),
        }
    }

    #[test]
    fn test_block_assignment_uses_fast_slots() {
        let (asm, _) = compile("begin a = 1; b = 2; a = 3; end");
        let stores: Vec<Value> = asm
            .ops
            .iter()
            .filter(|op| op.code == OpCode::StoreFast)
            .map(|op| op.operand)
            .collect();
        assert_eq!(
            stores,
            vec![Value::Slot(0, 0), Value::Slot(1, 0), Value::Slot(0, 0)]
        );
    }

    #[test]
    fn test_nested_block_reuses_outer_slot() {
        let (asm, _) = compile("begin a = 1; begin a = 2; end end");
        let stores: Vec<Value> = asm
            .ops
            .iter()
            .filter(|op| op.code == OpCode::StoreFast)
            .map(|op| op.operand)
            .collect();
        assert_eq!(stores, vec![Value::Slot(0, 0), Value::Slot(0, 1)]);
    }

    #[test]
    fn test_if_jumps_are_patched() {
        let (asm, _) = compile("if (true) 1 else 2;");
        for op in &asm.ops {
            if matches!(op.code, OpCode::Jump | OpCode::JumpNotTest) {
                match op.operand {
                    Value::Int(target) => {
                        assert!(target > 0 && target as usize <= asm.len());
                    }
                    other => panic!("jump operand {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_function_body_is_skipped() {
        let (asm, _) = compile("fn f() 1;");
        // MAKE_FUNCTION, STORE_NAME, JUMP, ADD_FRAME, PUSH, POP_FRAME, RETURN
        assert_eq!(
            codes(&asm),
            vec![
                OpCode::MakeFunction,
                OpCode::StoreName,
                OpCode::Jump,
                OpCode::AddFrame,
                OpCode::Push,
                OpCode::PopFrame,
                OpCode::Return,
            ]
        );
        // The definition-site jump skips the inline body
        assert_eq!(asm.ops[2].operand, Value::Int(7));
        // MAKE_FUNCTION points at the body entry
        assert_eq!(asm.ops[0].operand, Value::Int(3));
    }

    #[test]
    fn test_parameters_stored_in_reverse() {
        let (asm, _) = compile("fn f(a, b) a;");
        let stores: Vec<Value> = asm
            .ops
            .iter()
            .filter(|op| op.code == OpCode::StoreFast)
            .map(|op| op.operand)
            .collect();
        assert_eq!(stores, vec![Value::Slot(0, 0), Value::Slot(1, 0)]);
        // `a` is the leftmost parameter and resolves to the last-stored slot
        let loads: Vec<Value> = asm
            .ops
            .iter()
            .filter(|op| op.code == OpCode::LoadFast)
            .map(|op| op.operand)
            .collect();
        assert_eq!(loads, vec![Value::Slot(1, 0)]);
    }

    #[test]
    fn test_capture_resolution() {
        let (asm, _) = compile("x = 1; f = fn()[x] x;");
        // Inside the body, x resolves to the capture list
        let load_closures: Vec<&Op> = asm
            .ops
            .iter()
            .filter(|op| op.code == OpCode::LoadClosure)
            .collect();
        assert_eq!(load_closures.len(), 1);
        assert_eq!(load_closures[0].operand, Value::Int(0));
        // The capture expression itself is a global load at the definition site
        assert!(codes(&asm).contains(&OpCode::StoreClosure));
    }

    #[test]
    fn test_and_or_are_short_circuiting() {
        let (asm, _) = compile("a or b;");
        let ops = codes(&asm);
        assert!(ops.contains(&OpCode::Dup));
        assert!(ops.contains(&OpCode::JumpNotTest));
        assert!(!ops.contains(&OpCode::Add));

        let (asm, _) = compile("a and b;");
        let ops = codes(&asm);
        assert!(ops.contains(&OpCode::Dup));
        assert!(!ops.contains(&OpCode::Multiply));
    }

    #[test]
    fn test_array_literal_appends() {
        let (asm, _) = compile("[1, 2];");
        assert_eq!(
            codes(&asm),
            vec![
                OpCode::NewObj,
                OpCode::Push,
                OpCode::StoreAttr,
                OpCode::Push,
                OpCode::StoreAttr,
            ]
        );
        assert_eq!(asm.ops[0].operand, Value::Int(NEW_ARRAY));
        assert_eq!(asm.ops[2].operand, Value::Nil);
    }

    #[test]
    fn test_indexed_store_is_tagged_with_num() {
        let (asm, _) = compile("a[0] = 1;");
        let store = asm
            .ops
            .iter()
            .find(|op| op.code == OpCode::StoreAttr)
            .unwrap();
        assert!(matches!(store.operand, Value::Num(_)));
    }
}
