//! Parser behavior: tree shapes, error codes, first-error abort

mod common;

use luma_runtime::ast::{BinaryOp, Expr, Program};
use luma_runtime::{Diagnostic, Interns, Lexer, Parser};
use pretty_assertions::assert_eq;

fn parse_source(source: &str) -> Result<Program, Diagnostic> {
    let mut interns = Interns::new();
    let (tokens, diags) = Lexer::new(source, &mut interns).tokenize();
    assert!(diags.is_empty(), "lexer diagnostics: {:?}", diags);
    Parser::new(tokens).parse()
}

#[test]
fn test_precedence_chain() {
    let program = parse_source("1 + 2 * 3 - 4;").unwrap();
    // ((1 + (2 * 3)) - 4)
    match &program.body[0] {
        Expr::Binary { op, lhs, .. } => {
            assert_eq!(*op, BinaryOp::Sub);
            match &**lhs {
                Expr::Binary { op, rhs, .. } => {
                    assert_eq!(*op, BinaryOp::Add);
                    assert!(matches!(
                        &**rhs,
                        Expr::Binary {
                            op: BinaryOp::Mul,
                            ..
                        }
                    ));
                }
                other => panic!("expected addition on the left, got {:?}", other),
            }
        }
        other => panic!("expected binary expression, got {:?}", other),
    }
}

#[test]
fn test_comparison_binds_looser_than_term() {
    let program = parse_source("n < 2 + 3;").unwrap();
    match &program.body[0] {
        Expr::Binary { op, rhs, .. } => {
            assert_eq!(*op, BinaryOp::Less);
            assert!(matches!(
                &**rhs,
                Expr::Binary {
                    op: BinaryOp::Add,
                    ..
                }
            ));
        }
        other => panic!("expected comparison, got {:?}", other),
    }
}

#[test]
fn test_postfix_chain() {
    let program = parse_source("a.b[0].c(1);").unwrap();
    match &program.body[0] {
        Expr::Call { callee, args } => {
            assert_eq!(args.len(), 1);
            assert!(matches!(&**callee, Expr::GetAttr { .. }));
        }
        other => panic!("expected call, got {:?}", other),
    }
}

#[test]
fn test_assignment_targets() {
    assert!(matches!(
        parse_source("x = 1;").unwrap().body[0],
        Expr::Assign { .. }
    ));
    assert!(matches!(
        parse_source("t.a = 1;").unwrap().body[0],
        Expr::SetAttr { .. }
    ));
    assert!(matches!(
        parse_source("t[0] = 1;").unwrap().body[0],
        Expr::SetIndex { .. }
    ));
}

#[test]
fn test_else_attaches_to_if() {
    let program = parse_source("if (a) 1 else 2;").unwrap();
    match &program.body[0] {
        Expr::If { else_branch, .. } => assert!(else_branch.is_some()),
        other => panic!("expected if, got {:?}", other),
    }
}

#[test]
fn test_anonymous_fn_with_captures() {
    let program = parse_source("f = fn(a)[x] a;").unwrap();
    match &program.body[0] {
        Expr::Assign { value, .. } => match &**value {
            Expr::FnDef {
                name,
                params,
                captures,
                ..
            } => {
                assert!(name.is_none());
                assert_eq!(params.len(), 1);
                assert_eq!(captures.len(), 1);
            }
            other => panic!("expected closure, got {:?}", other),
        },
        other => panic!("expected assignment, got {:?}", other),
    }
}

#[test]
fn test_named_fn_takes_no_captures() {
    // The capture list is the anonymous form's syntax; after a named
    // parameter list the brackets parse as an array-literal body.
    let program = parse_source("fn f()[x] 1;").unwrap();
    match &program.body[0] {
        Expr::FnDef { captures, body, .. } => {
            assert!(captures.is_empty());
            assert!(matches!(&**body, Expr::ArrayLit(_)));
        }
        other => panic!("expected fn definition, got {:?}", other),
    }
}

#[test]
fn test_return_in_branch_position() {
    let program = parse_source("fn f(n) begin if (n) return 1; return 2; end").unwrap();
    assert!(matches!(program.body[0], Expr::FnDef { .. }));
}

#[test]
fn test_table_entries_tolerate_semicolons() {
    let program = parse_source("t = { a = 1; b = 2 };").unwrap();
    match &program.body[0] {
        Expr::Assign { value, .. } => match &**value {
            Expr::TableLit { entries, meta } => {
                assert_eq!(entries.len(), 2);
                assert!(meta.is_none());
            }
            other => panic!("expected table literal, got {:?}", other),
        },
        other => panic!("expected assignment, got {:?}", other),
    }
}

#[test]
fn test_load_statement_is_a_structured_error() {
    let err = parse_source("load math from \"m\" as m;").unwrap_err();
    assert_eq!(err.code, "LM2002");
}

#[test]
fn test_first_error_aborts() {
    // Both statements are bad; only the first is reported.
    let err = parse_source("x = ;\ny = ;").unwrap_err();
    assert_eq!(err.code, "LM2001");
    assert_eq!(err.line, 1);
}

#[test]
fn test_missing_paren_reports_expected_token() {
    let err = parse_source("if (true 1 else 2;").unwrap_err();
    assert_eq!(err.code, "LM2001");
    assert!(err.message.contains("')'"), "message: {}", err.message);
}

#[test]
fn test_empty_program_parses() {
    assert!(parse_source("").unwrap().body.is_empty());
}
