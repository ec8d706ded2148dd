//! Parsing
//!
//! This module is responsible for turning the source code from its string form into an AST.
//! The main interface is [parse] which takes a string and builds an [Ast] arena plus the list
//! of top-level nodes.
//!
//! Internally, parsing works in two layers:
//! - the [scanner] produces tokens on demand, lookahead works on copies of it
//! - the parser ([parser] for statements and declarations, [expr] for expressions)
//!   builds the AST and recovers from errors in panic mode
//!
//! Parsing never stops at the first error. Erroneous constructs become error nodes and the
//! parser resynchronises at the next statement.

use miette::Diagnostic;
use thiserror::Error;

use crate::ast::{Ast, NodeId};
use crate::Span;

mod expr;
mod parser;
pub mod scanner;
mod token;

pub use scanner::{Scanner, ScannerState};
pub use token::{LexError, Literal, Token, TokenKind};

#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum ParsingError {
    #[error("Invalid token: {error}")]
    Lexical {
        error: LexError,

        #[label("here")]
        span: Span,
    },

    #[error("Found an unclosed delimiter: {delimiter}")]
    #[diagnostic(help("Must be closed before: {must_close_before}"))]
    UnclosedDelimiter {
        delimiter: String,
        must_close_before: String,

        #[label("unclosed delimiter")]
        span: Span,
    },

    #[error("Encountered unexpected input: {token}")]
    UnexpectedInput {
        token: String,

        #[help]
        expected: Option<String>,

        #[label("here")]
        span: Span,
    },

    #[error("{msg}")]
    Custom {
        msg: String,

        #[label("here")]
        span: Span,
    },
}

/// Everything the parser produced for one source file
#[derive(Debug, Clone)]
pub struct ParseOutcome<'src> {
    pub ast: Ast<'src>,
    /// Top-level items in source order
    pub roots: Vec<NodeId>,
    pub errors: Vec<ParsingError>,
}

impl ParseOutcome<'_> {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.roots.iter().any(|&root| self.ast.is_error(root))
    }
}

/// Parse solum source code into an AST
#[tracing::instrument(level = "debug", skip_all)]
pub fn parse(source: &str) -> ParseOutcome<'_> {
    let outcome = parser::Parser::new(source).parse_unit();
    tracing::debug!(
        nodes = outcome.ast.len(),
        roots = outcome.roots.len(),
        errors = outcome.errors.len(),
        "parsed source"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::{BinaryOp, NodeKind, UnaryOp};

    fn parse_ok(source: &str) -> ParseOutcome<'_> {
        let outcome = parse(source);
        assert_eq!(outcome.errors, vec![]);
        outcome
    }

    /// Render an expression tree in prefix notation
    fn sexpr(ast: &Ast, id: NodeId) -> String {
        let node = &ast[id];
        match node.kind {
            NodeKind::Primary => node.token.text.to_string(),
            NodeKind::Unary(op) => format!("({op} {})", sexpr(ast, node.left.unwrap())),
            NodeKind::Binary(op) => format!(
                "({op} {} {})",
                sexpr(ast, node.left.unwrap()),
                sexpr(ast, node.right.unwrap())
            ),
            NodeKind::Call | NodeKind::Index => {
                let args: Vec<_> = node.list.iter().map(|&arg| sexpr(ast, arg)).collect();
                let tag = if node.kind == NodeKind::Call { "call" } else { "index" };
                format!("({tag} {} [{}])", sexpr(ast, node.left.unwrap()), args.join(" "))
            }
            NodeKind::Cast => format!("(cast {})", sexpr(ast, node.right.unwrap())),
            NodeKind::ExprList => {
                let items: Vec<_> = node.list.iter().map(|&item| sexpr(ast, item)).collect();
                format!("[{}]", items.join(" "))
            }
            kind => format!("{kind:?}"),
        }
    }

    /// Parse `source` as the initializer of a global and render it
    fn expression(source: &str) -> String {
        let program = format!("x : u64 = {source};");
        let outcome = parse(&program);
        assert_eq!(outcome.errors, vec![]);
        let decl = &outcome.ast[outcome.roots[0]];
        sexpr(&outcome.ast, decl.right.unwrap())
    }

    #[test]
    fn precedence() {
        assert_eq!(expression("2 + 3 * 4"), "(+ 2 (* 3 4))");
        assert_eq!(expression("(2 + 3) * 4"), "(* (+ 2 3) 4)");
        assert_eq!(expression("1 - 2 - 3"), "(- (- 1 2) 3)");
        assert_eq!(expression("a || b && c"), "(|| a (&& b c))");
        assert_eq!(expression("a == b + 1"), "(== a (+ b 1))");
        assert_eq!(expression("1 << 2 + 3"), "(+ (<< 1 2) 3)");
        assert_eq!(expression("a & b | c ^ d"), "(^ (| (& a b) c) d)");
    }

    #[test]
    fn assignment_is_right_associative() {
        assert_eq!(expression("a = b = 3"), "(= a (= b 3))");
    }

    #[test]
    fn prefix_and_postfix() {
        assert_eq!(expression("-a * b"), "(* (- a) b)");
        assert_eq!(expression("^p + 1"), "(+ (^ p) 1)");
        assert_eq!(expression("@a[2]"), "(@ (index a [2]))");
        assert_eq!(expression("!f(1, 2)"), "(! (call f [1 2]))");
        assert_eq!(expression("f()(3)"), "(call (call f []) [3])");
        assert_eq!(expression("~~x"), "(~ (~ x))");
    }

    #[test]
    fn member_access_is_right_associative() {
        assert_eq!(expression("a.b.c"), "(. a (. b c))");
    }

    #[test]
    fn cast_binds_loosely() {
        assert_eq!(expression("cast(u8) a + b"), "(cast (+ a b))");
        let outcome = parse_ok("x : u64 = cast(^u8) y;");
        let decl = &outcome.ast[outcome.roots[0]];
        let cast = &outcome.ast[decl.right.unwrap()];
        let ty = &outcome.ast[cast.left.unwrap()];
        assert_eq!(ty.kind, NodeKind::PointerType);
    }

    #[test]
    fn literals() {
        let outcome = parse_ok(r#"s : ^u8 = "hi"; t : bool = true;"#);
        let string = &outcome.ast[outcome.ast[outcome.roots[0]].right.unwrap()];
        assert_eq!(string.token.literal, Literal::Text("hi"));
        let boolean = &outcome.ast[outcome.ast[outcome.roots[1]].right.unwrap()];
        assert_eq!(boolean.token.literal, Literal::Unsigned(1));
    }

    #[test]
    fn function_declarations() {
        let outcome = parse_ok(
            "add : (a: u64, b: u64) -> u64 = { return a + b; }
             proto : () -> u64;
             write : extern (c: u8);",
        );
        let ast = &outcome.ast;
        assert_eq!(outcome.roots.len(), 3);

        let add = &ast[outcome.roots[0]];
        assert_eq!(add.kind, NodeKind::Declaration);
        assert_eq!(add.name(), "add");
        let fn_type = &ast[add.center.unwrap()];
        assert_eq!(fn_type.kind, NodeKind::FunctionType);
        assert_eq!(ast[fn_type.left.unwrap()].list.len(), 2);
        assert_eq!(ast[fn_type.right.unwrap()].list.len(), 1);
        assert_eq!(ast[add.right.unwrap()].kind, NodeKind::Block);

        let proto = &ast[outcome.roots[1]];
        assert_eq!(proto.kind, NodeKind::Declaration);
        assert_eq!(proto.right, None);

        let write = &ast[outcome.roots[2]];
        assert_eq!(write.kind, NodeKind::ExternDeclaration);
    }

    #[test]
    fn aggregates_and_imports() {
        let outcome = parse_ok(
            "use std.io as io;
             Point : struct = { x : u64; y : u64; }
             Color : enum = { Red, Green, Blue, };
             Word : union = { b : [8]u8; q : u64; }",
        );
        let ast = &outcome.ast;
        let kinds: Vec<_> = outcome.roots.iter().map(|&r| ast[r].kind).collect();
        assert_eq!(
            kinds,
            vec![NodeKind::Use, NodeKind::Struct, NodeKind::Enum, NodeKind::Union]
        );
        assert_eq!(ast[outcome.roots[0]].list.len(), 2);
        assert_eq!(ast[ast[outcome.roots[0]].right.unwrap()].name(), "io");
        assert_eq!(ast[outcome.roots[1]].list.len(), 2);
        assert_eq!(ast[outcome.roots[2]].list.len(), 3);
    }

    #[test]
    fn multi_names() {
        let outcome = parse_ok("a, b : u64 = 1, 2; a, b = b, a;");
        let ast = &outcome.ast;
        let decl = &ast[outcome.roots[0]];
        assert_eq!(decl.kind, NodeKind::MultiDeclaration);
        assert_eq!(decl.list.len(), 2);
        let swap = &ast[outcome.roots[1]];
        assert_eq!(swap.kind, NodeKind::Swap);
        assert_eq!(sexpr(ast, swap.left.unwrap()), "[a b]");
        assert_eq!(sexpr(ast, swap.right.unwrap()), "[b a]");
    }

    #[test]
    fn statements() {
        let outcome = parse_ok(
            "main : () = {
                 i : u64 = 0;
                 while i < 10 {
                     if i == 5 { break; } else { i = i + 1; }
                     continue;
                 }
                 p[0], p[1] = p[1], p[0];
                 return;
             }",
        );
        let ast = &outcome.ast;
        let body = &ast[ast[outcome.roots[0]].right.unwrap()];
        let kinds: Vec<_> = body.list.iter().map(|&s| ast[s].kind).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Declaration,
                NodeKind::While,
                NodeKind::Swap,
                NodeKind::Return
            ]
        );
        let condition = ast[body.list[1]].left.unwrap();
        assert_eq!(ast[condition].kind, NodeKind::Binary(BinaryOp::Less));
    }

    #[test]
    fn types() {
        let outcome = parse_ok("grid : [4][4]^u8; f : ^(x: u64) -> u64;");
        let ast = &outcome.ast;
        let grid = &ast[ast[outcome.roots[0]].center.unwrap()];
        assert_eq!(grid.kind, NodeKind::ArrayType);
        assert_eq!(ast[grid.right.unwrap()].kind, NodeKind::ArrayType);
        let f = &ast[ast[outcome.roots[1]].center.unwrap()];
        assert_eq!(f.kind, NodeKind::PointerType);
        assert_eq!(ast[f.left.unwrap()].kind, NodeKind::FunctionType);
    }

    #[test]
    fn unterminated_string_reports_twice() {
        let outcome = parse("x : u64 = \"abc");
        assert_eq!(outcome.errors.len(), 2);
        assert!(matches!(
            outcome.errors[0],
            ParsingError::Lexical {
                error: LexError::UnterminatedString,
                ..
            }
        ));
        assert!(matches!(
            outcome.errors[1],
            ParsingError::UnexpectedInput { .. }
        ));
        assert!(!outcome.is_success());
    }

    #[test]
    fn recovers_at_statement_boundaries() {
        let outcome = parse(
            "a : u64 = 1 +;
             b : u64 = 2;
             c : u64 = ) 3;
             d : u64 = 4;",
        );
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.roots.len(), 4);
        let ast = &outcome.ast;
        assert!(ast.is_error(outcome.roots[0]));
        assert!(!ast.is_error(outcome.roots[1]));
        assert!(ast.is_error(outcome.roots[2]));
        assert!(!ast.is_error(outcome.roots[3]));
    }

    #[test]
    fn errors_inside_blocks_stay_local() {
        let outcome = parse(
            "main : () = {
                 x : u64 = ;
                 y : u64 = 2;
                 z = = 3;
             }
             after : u64 = 1;",
        );
        assert_eq!(outcome.errors.len(), 2);
        let ast = &outcome.ast;
        let body = &ast[ast[outcome.roots[0]].right.unwrap()];
        assert_eq!(body.list.len(), 3);
        assert!(!ast.is_error(body.list[1]));
        assert!(ast.is_error(outcome.roots[0]));
        assert!(!ast.is_error(outcome.roots[1]));
    }

    #[test]
    fn unclosed_block() {
        let outcome = parse("main : () = { x : u64 = 1;");
        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(
            outcome.errors[0],
            ParsingError::UnclosedDelimiter { .. }
        ));
    }

    #[test]
    fn stray_tokens_at_top_level() {
        let outcome = parse("} ) ; x : u64 = 1;");
        assert!(!outcome.errors.is_empty());
        let last = *outcome.roots.last().unwrap();
        assert_eq!(outcome.ast[last].kind, NodeKind::Declaration);
        assert!(!outcome.ast.is_error(last));
    }

    #[test]
    fn unary_operators() {
        let outcome = parse_ok("x : u64 = @y;");
        let decl = &outcome.ast[outcome.roots[0]];
        assert_eq!(
            outcome.ast[decl.right.unwrap()].kind,
            NodeKind::Unary(UnaryOp::AddressOf)
        );
    }
}
