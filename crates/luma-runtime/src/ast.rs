//! Abstract syntax tree
//!
//! Luma is expression-oriented: blocks, `if`, `while`, `for`, and function
//! definitions all occur in expression position, so the tree has a single
//! `Expr` node kind and a program is a list of expressions.

use crate::intern::NameId;

/// Top-level program
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level expressions in source order
    pub body: Vec<Expr>,
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Negate,
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `and` (short-circuiting)
    And,
    /// `or` (short-circuiting)
    Or,
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `nil`
    Nil,
    /// `true` / `false`
    Bool(bool),
    /// Number literal
    Number(f64),
    /// String literal (interned bytes)
    Str(NameId),
    /// Name reference
    Ident(NameId),
    /// `self`
    SelfRef,
    /// Unary operation
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `name = value`
    Assign { name: NameId, value: Box<Expr> },
    /// `begin … end`
    Block(Vec<Expr>),
    /// `if (condition) then [else other]`
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    /// `while (condition) body`
    While { condition: Box<Expr>, body: Box<Expr> },
    /// `for (init; condition; step) body`
    For {
        init: Box<Expr>,
        condition: Box<Expr>,
        step: Box<Expr>,
        body: Box<Expr>,
    },
    /// `callee(args…)`
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// `fn name(params) body` or `fn(params)[captures] body`
    FnDef {
        /// `None` for the anonymous (closure) form
        name: Option<NameId>,
        params: Vec<NameId>,
        /// Capture names listed in square brackets after the parameter list
        captures: Vec<NameId>,
        body: Box<Expr>,
    },
    /// `return [value];`
    Return(Option<Box<Expr>>),
    /// `object.name`
    GetAttr { object: Box<Expr>, name: NameId },
    /// `object[index]`
    Index { object: Box<Expr>, index: Box<Expr> },
    /// `object.name = value`
    SetAttr {
        object: Box<Expr>,
        name: NameId,
        value: Box<Expr>,
    },
    /// `object[index] = value`
    SetIndex {
        object: Box<Expr>,
        index: Box<Expr>,
        value: Box<Expr>,
    },
    /// `{ k = v, … } [meta expr]`
    TableLit {
        entries: Vec<(NameId, Expr)>,
        meta: Option<Box<Expr>>,
    },
    /// `[ v, … ]`
    ArrayLit(Vec<Expr>),
}

impl Expr {
    /// Forms that close themselves and therefore don't require a trailing
    /// `;` in statement position
    pub fn is_block_like(&self) -> bool {
        matches!(
            self,
            Expr::Block(_)
                | Expr::If { .. }
                | Expr::While { .. }
                | Expr::For { .. }
                | Expr::FnDef { .. }
        )
    }
}
