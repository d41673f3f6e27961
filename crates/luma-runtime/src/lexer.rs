//! Lexical analysis (tokenization)
//!
//! The lexer converts Luma source code into a stream of tokens. Identifier
//! and string payloads are interned up front so their ids outlive the
//! Assembly and VM that reference them.
//!
//! Note that `//` is the floor-division operator, so Luma has no comment
//! syntax at all.

use crate::diagnostic::Diagnostic;
use crate::intern::Interns;
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Lexer state for tokenizing source code
pub struct Lexer<'a> {
    /// Characters of source code
    chars: Vec<char>,
    /// Original source, kept for line snippets in diagnostics
    source: String,
    /// Intern table receiving identifier and string payloads
    interns: &'a mut Interns,
    /// Current position in chars
    current: usize,
    /// Start position of current token
    start: usize,
    /// Current line number (1-indexed)
    line: u32,
    /// Collected diagnostics
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source code
    pub fn new(source: impl Into<String>, interns: &'a mut Interns) -> Self {
        let source = source.into();
        let chars: Vec<char> = source.chars().collect();
        Self {
            chars,
            source,
            interns,
            current: 0,
            start: 0,
            line: 1,
            diagnostics: Vec::new(),
        }
    }

    /// Tokenize the source code, returning tokens and any diagnostics
    ///
    /// The token vector always ends with an `Eof` token. If diagnostics are
    /// non-empty the tokens must not be fed to the parser.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            self.start = self.current;
            if let Some(token) = self.next_token() {
                tokens.push(token);
            }
        }

        tokens.push(Token::new(
            TokenKind::Eof,
            Span::new(self.current, self.current),
            self.line,
        ));
        (tokens, self.diagnostics)
    }

    /// Scan the next token; `None` for skipped whitespace
    fn next_token(&mut self) -> Option<Token> {
        let c = self.advance();
        match c {
            '(' => Some(self.make_token(TokenKind::LeftParen)),
            ')' => Some(self.make_token(TokenKind::RightParen)),
            '[' => Some(self.make_token(TokenKind::LeftBracket)),
            ']' => Some(self.make_token(TokenKind::RightBracket)),
            '{' => Some(self.make_token(TokenKind::LeftBrace)),
            '}' => Some(self.make_token(TokenKind::RightBrace)),
            ',' => Some(self.make_token(TokenKind::Comma)),
            '.' => Some(self.make_token(TokenKind::Dot)),
            ';' => Some(self.make_token(TokenKind::Semicolon)),
            '+' => Some(self.make_token(TokenKind::Plus)),
            '-' => Some(self.make_token(TokenKind::Minus)),
            '*' => Some(self.make_token(TokenKind::Star)),
            '%' => Some(self.make_token(TokenKind::Percent)),
            '/' => {
                let kind = if self.match_char('/') {
                    TokenKind::SlashSlash
                } else {
                    TokenKind::Slash
                };
                Some(self.make_token(kind))
            }
            '!' => {
                let kind = if self.match_char('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                Some(self.make_token(kind))
            }
            '=' => {
                let kind = if self.match_char('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                Some(self.make_token(kind))
            }
            '<' => {
                let kind = if self.match_char('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                Some(self.make_token(kind))
            }
            '>' => {
                let kind = if self.match_char('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                Some(self.make_token(kind))
            }
            ' ' | '\r' | '\t' => None,
            '\n' => {
                self.line += 1;
                None
            }
            '"' => self.string(),
            c if c.is_ascii_digit() => Some(self.number()),
            c if c.is_alphabetic() || c == '_' => Some(self.identifier()),
            _ => {
                self.error("LM1001", format!("Unexpected character '{}'", c));
                None
            }
        }
    }

    /// Scan a string literal (no escape sequences; bytes are taken verbatim)
    fn string(&mut self) -> Option<Token> {
        let start_line = self.line;
        while !self.is_at_end() && self.peek() != '"' {
            if self.peek() == '\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            self.diagnostics.push(
                Diagnostic::error(
                    "LM1002",
                    "Unterminated string literal",
                    Span::new(self.start, self.current),
                )
                .with_line(start_line as usize)
                .with_snippet(self.line_snippet(start_line))
                .with_help("add a closing '\"'"),
            );
            return None;
        }
        self.advance(); // closing quote

        let text: String = self.chars[self.start + 1..self.current - 1].iter().collect();
        let id = self.interns.intern(&text);
        Some(self.make_token(TokenKind::Str(id)))
    }

    /// Scan a number literal: digits with an optional fractional part
    fn number(&mut self) -> Token {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let text: String = self.chars[self.start..self.current].iter().collect();
        let value: f64 = text.parse().unwrap_or(0.0);
        self.make_token(TokenKind::Number(value))
    }

    /// Scan an identifier or keyword
    fn identifier(&mut self) -> Token {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let text: String = self.chars[self.start..self.current].iter().collect();
        let kind = match text.as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "begin" => TokenKind::Begin,
            "end" => TokenKind::End,
            "meta" => TokenKind::Meta,
            "self" => TokenKind::SelfKw,
            "global" => TokenKind::Global,
            "else" => TokenKind::Else,
            "false" => TokenKind::False,
            "true" => TokenKind::True,
            "for" => TokenKind::For,
            "fn" => TokenKind::Fn,
            "if" => TokenKind::If,
            "nil" => TokenKind::Nil,
            "return" => TokenKind::Return,
            "while" => TokenKind::While,
            "from" => TokenKind::From,
            "load" => TokenKind::Load,
            "as" => TokenKind::As,
            _ => TokenKind::Ident(self.interns.intern(&text)),
        };
        self.make_token(kind)
    }

    // === Character navigation ===

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.current]
        }
    }

    fn peek_next(&self) -> char {
        if self.current + 1 >= self.chars.len() {
            '\0'
        } else {
            self.chars[self.current + 1]
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.chars[self.current] != expected {
            false
        } else {
            self.current += 1;
            true
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    // === Token creation ===

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, Span::new(self.start, self.current), self.line)
    }

    fn error(&mut self, code: &str, message: String) {
        let line = self.line;
        let snippet = self.line_snippet(line);
        self.diagnostics.push(
            Diagnostic::error(code, message, Span::new(self.start, self.current))
                .with_line(line as usize)
                .with_snippet(snippet),
        );
    }

    /// Get the source line for a given line number
    fn line_snippet(&self, line: u32) -> String {
        self.source
            .lines()
            .nth((line - 1) as usize)
            .unwrap_or("")
            .to_string()
    }
}
