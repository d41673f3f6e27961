//! Parsing (tokens to AST)
//!
//! Recursive descent with the precedence ladder
//! assignment < or < and < equality < comparison < term < factor < unary <
//! call < primary. The parser aborts at the first syntactic error and
//! returns a single structured diagnostic.

use crate::ast::{BinaryOp, Expr, Program, UnaryOp};
use crate::diagnostic::Diagnostic;
use crate::intern::NameId;
use crate::token::{Token, TokenKind};

/// Parser state for building an AST from tokens
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

type ParseResult<T> = Result<T, Diagnostic>;

impl Parser {
    /// Create a new parser for the given tokens
    ///
    /// The token vector must end with an `Eof` token (the lexer guarantees
    /// this).
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    /// Parse the whole token stream into a program
    pub fn parse(mut self) -> ParseResult<Program> {
        let mut body = Vec::new();
        while !self.is_at_end() {
            body.push(self.statement()?);
        }
        Ok(Program { body })
    }

    // === Statements ===

    fn statement(&mut self) -> ParseResult<Expr> {
        match self.peek().kind {
            TokenKind::Fn => {
                self.advance();
                let def = self.fn_def(false)?;
                self.match_kind(TokenKind::Semicolon);
                Ok(def)
            }
            TokenKind::Load => Err(self.error_at(
                "LM2002",
                "module loading is not supported".to_string(),
                Some("remove the 'load' statement"),
            )),
            _ => {
                let expr = self.expression()?;
                if self.match_kind(TokenKind::Semicolon) || expr.is_block_like() {
                    Ok(expr)
                } else {
                    Err(self.expected("';' after expression statement"))
                }
            }
        }
    }

    /// Parse a function definition; the `fn` keyword is already consumed
    ///
    /// The named (statement) form binds a name and takes no capture list;
    /// the anonymous form may list captured names in square brackets after
    /// the parameters.
    fn fn_def(&mut self, closure: bool) -> ParseResult<Expr> {
        let name = if closure {
            None
        } else {
            Some(self.consume_ident("function name after 'fn'")?)
        };

        self.consume(TokenKind::LeftParen, "'(' after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                params.push(self.consume_ident("parameter name")?);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "')' after parameters")?;

        let mut captures = Vec::new();
        if closure && self.match_kind(TokenKind::LeftBracket) {
            if !self.check(TokenKind::RightBracket) {
                loop {
                    captures.push(self.consume_ident("captured name")?);
                    if !self.match_kind(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RightBracket, "']' after captures")?;
        }

        let body = Box::new(self.expression()?);
        Ok(Expr::FnDef {
            name,
            params,
            captures,
            body,
        })
    }

    fn if_expr(&mut self) -> ParseResult<Expr> {
        self.consume(TokenKind::LeftParen, "'(' before condition")?;
        let condition = Box::new(self.or_expr()?);
        self.consume(TokenKind::RightParen, "')' after condition")?;
        let then_branch = Box::new(self.expression()?);
        self.match_kind(TokenKind::Semicolon);
        let else_branch = if self.match_kind(TokenKind::Else) {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        Ok(Expr::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_expr(&mut self) -> ParseResult<Expr> {
        self.consume(TokenKind::LeftParen, "'(' before condition")?;
        let condition = Box::new(self.or_expr()?);
        self.consume(TokenKind::RightParen, "')' after condition")?;
        let body = Box::new(self.expression()?);
        Ok(Expr::While { condition, body })
    }

    fn for_expr(&mut self) -> ParseResult<Expr> {
        self.consume(TokenKind::LeftParen, "'(' after 'for'")?;
        let init = Box::new(self.expression()?);
        self.consume(TokenKind::Semicolon, "';' after for initializer")?;
        let condition = Box::new(self.or_expr()?);
        self.consume(TokenKind::Semicolon, "';' after for condition")?;
        let step = Box::new(self.expression()?);
        self.consume(TokenKind::RightParen, "')' after for step")?;
        let body = Box::new(self.expression()?);
        Ok(Expr::For {
            init,
            condition,
            step,
            body,
        })
    }

    // === Expressions ===

    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let node = self.or_expr()?;

        if self.match_kind(TokenKind::Equal) {
            let value = Box::new(self.or_expr()?);
            return match node {
                Expr::Ident(name) => Ok(Expr::Assign { name, value }),
                Expr::GetAttr { object, name } => Ok(Expr::SetAttr {
                    object,
                    name,
                    value,
                }),
                Expr::Index { object, index } => Ok(Expr::SetIndex {
                    object,
                    index,
                    value,
                }),
                _ => Err(self.error_at(
                    "LM2003",
                    "invalid assignment target".to_string(),
                    Some("only names, attributes, and indexed elements can be assigned"),
                )),
            };
        }

        Ok(node)
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        let mut node = self.and_expr()?;
        while self.match_kind(TokenKind::Or) {
            let rhs = self.and_expr()?;
            node = binary(BinaryOp::Or, node, rhs);
        }
        Ok(node)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        let mut node = self.equality()?;
        while self.match_kind(TokenKind::And) {
            let rhs = self.equality()?;
            node = binary(BinaryOp::And, node, rhs);
        }
        Ok(node)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut node = self.comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::Equal,
                TokenKind::BangEqual => BinaryOp::NotEqual,
                _ => break,
            };
            self.advance();
            let rhs = self.comparison()?;
            node = binary(op, node, rhs);
        }
        Ok(node)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut node = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            node = binary(op, node, rhs);
        }
        Ok(node)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut node = self.factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.factor()?;
            node = binary(op, node, rhs);
        }
        Ok(node)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let mut node = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                TokenKind::SlashSlash => BinaryOp::FloorDiv,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            node = binary(op, node, rhs);
        }
        Ok(node)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Negate),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = Box::new(self.unary()?);
            return Ok(Expr::Unary { op, expr });
        }
        self.call()
    }

    /// Postfix chain: calls, `.name` attribute reads, `[index]` reads
    fn call(&mut self) -> ParseResult<Expr> {
        let mut node = self.primary()?;
        loop {
            if self.match_kind(TokenKind::LeftParen) {
                node = self.finish_call(node)?;
            } else if self.match_kind(TokenKind::Dot) {
                let name = self.consume_ident("attribute name after '.'")?;
                node = Expr::GetAttr {
                    object: Box::new(node),
                    name,
                };
            } else if self.match_kind(TokenKind::LeftBracket) {
                let index = Box::new(self.term()?);
                self.consume(TokenKind::RightBracket, "']' after index")?;
                node = Expr::Index {
                    object: Box::new(node),
                    index,
                };
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn finish_call(&mut self, callee: Expr) -> ParseResult<Expr> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                args.push(self.or_expr()?);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "')' after arguments")?;
        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
        })
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek();
        match token.kind {
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil)
            }
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr::Number(value))
            }
            TokenKind::Str(id) => {
                self.advance();
                Ok(Expr::Str(id))
            }
            TokenKind::Ident(id) => {
                self.advance();
                Ok(Expr::Ident(id))
            }
            TokenKind::SelfKw => {
                self.advance();
                Ok(Expr::SelfRef)
            }
            TokenKind::LeftParen => {
                self.advance();
                let node = self.expression()?;
                self.consume(TokenKind::RightParen, "')' after group")?;
                Ok(node)
            }
            TokenKind::Begin => {
                self.advance();
                let mut body = Vec::new();
                while !self.check(TokenKind::End) && !self.is_at_end() {
                    body.push(self.statement()?);
                }
                self.consume(TokenKind::End, "'end' closing the block")?;
                Ok(Expr::Block(body))
            }
            TokenKind::LeftBrace => {
                self.advance();
                self.table_literal()
            }
            TokenKind::LeftBracket => {
                self.advance();
                self.array_literal()
            }
            TokenKind::Fn => {
                self.advance();
                self.fn_def(true)
            }
            TokenKind::If => {
                self.advance();
                self.if_expr()
            }
            TokenKind::While => {
                self.advance();
                self.while_expr()
            }
            TokenKind::For => {
                self.advance();
                self.for_expr()
            }
            // `return` is valid wherever an expression is, so `if (c)
            // return x;` works inside function bodies.
            TokenKind::Return => {
                self.advance();
                let value = if self.return_value_follows() {
                    Some(Box::new(self.or_expr()?))
                } else {
                    None
                };
                Ok(Expr::Return(value))
            }
            _ => Err(self.expected("an expression")),
        }
    }

    /// Table literal body; the opening `{` is already consumed
    ///
    /// Entries are `name = value` pairs separated by `,` (a `;` is tolerated
    /// so a function-valued entry can end the way a statement would). An
    /// optional `meta expr` clause follows the closing brace.
    fn table_literal(&mut self) -> ParseResult<Expr> {
        let mut entries = Vec::new();
        while !self.check(TokenKind::RightBrace) {
            let name = self.consume_ident("member name in table literal")?;
            self.consume(TokenKind::Equal, "'=' after member name")?;
            let value = self.or_expr()?;
            entries.push((name, value));
            if !self.match_kind(TokenKind::Comma) && !self.match_kind(TokenKind::Semicolon) {
                break;
            }
        }
        self.consume(TokenKind::RightBrace, "'}' closing the table literal")?;

        let meta = if self.match_kind(TokenKind::Meta) {
            Some(Box::new(self.primary()?))
        } else {
            None
        };
        Ok(Expr::TableLit { entries, meta })
    }

    /// Array literal body; the opening `[` is already consumed
    fn array_literal(&mut self) -> ParseResult<Expr> {
        let mut values = Vec::new();
        if !self.check(TokenKind::RightBracket) {
            loop {
                values.push(self.or_expr()?);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "']' closing the array literal")?;
        Ok(Expr::ArrayLit(values))
    }

    /// Whether the token after `return` starts a value expression
    fn return_value_follows(&self) -> bool {
        !matches!(
            self.peek().kind,
            TokenKind::Semicolon
                | TokenKind::Else
                | TokenKind::End
                | TokenKind::RightParen
                | TokenKind::RightBrace
                | TokenKind::RightBracket
                | TokenKind::Comma
                | TokenKind::Eof
        )
    }

    // === Token navigation ===

    fn peek(&self) -> Token {
        self.tokens[self.current]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.current];
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.expected(what))
        }
    }

    fn consume_ident(&mut self, what: &str) -> ParseResult<NameId> {
        match self.peek().kind {
            TokenKind::Ident(id) => {
                self.advance();
                Ok(id)
            }
            _ => Err(self.expected(what)),
        }
    }

    // === Diagnostics ===

    fn expected(&self, what: &str) -> Diagnostic {
        let found = self.peek();
        self.error_at(
            "LM2001",
            format!("Expected {}, found {}", what, found.kind.describe()),
            None,
        )
    }

    fn error_at(&self, code: &str, message: String, help: Option<&str>) -> Diagnostic {
        let token = self.peek();
        let mut diag =
            Diagnostic::error(code, message, token.span).with_line(token.line as usize);
        if let Some(help) = help {
            diag = diag.with_help(help);
        }
        diag
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
