//! Expression parsing by precedence climbing
//!
//! Every infix operator has a left and a right binding power. An operator is
//! folded into the expression being built while its left power is at least the
//! minimum power of the current call; the right power becomes the minimum for
//! its right operand. Higher binds tighter, left < right makes the operator left
//! associative.

use super::parser::Parser;
use super::token::TokenKind;
use super::ParsingError;
use crate::ast::{BinaryOp, Node, NodeId, NodeKind, UnaryOp};

/// Right binding power of prefix operators
const PREFIX_BP: u8 = 23;

/// Left binding power of calls and indexing
const POSTFIX_BP: u8 = 25;

/// Right binding power of `cast(T)`
const CAST_BP: u8 = 3;

fn infix_binding_power(kind: TokenKind) -> Option<(u8, u8, BinaryOp)> {
    let powers = match kind {
        TokenKind::Assign => (2, 1, BinaryOp::Assign),
        TokenKind::OrOr => (5, 6, BinaryOp::Or),
        TokenKind::AndAnd => (7, 8, BinaryOp::And),
        TokenKind::Greater => (9, 10, BinaryOp::Greater),
        TokenKind::Less => (9, 10, BinaryOp::Less),
        TokenKind::GreaterEq => (9, 10, BinaryOp::GreaterEq),
        TokenKind::LessEq => (9, 10, BinaryOp::LessEq),
        TokenKind::Equals => (9, 10, BinaryOp::Equals),
        TokenKind::NotEquals => (9, 10, BinaryOp::NotEquals),
        TokenKind::Plus => (11, 12, BinaryOp::Add),
        TokenKind::Minus => (11, 12, BinaryOp::Sub),
        TokenKind::Star => (13, 14, BinaryOp::Mul),
        TokenKind::Slash => (13, 14, BinaryOp::Div),
        TokenKind::Percent => (13, 14, BinaryOp::Mod),
        TokenKind::ShiftLeft => (15, 16, BinaryOp::ShiftLeft),
        TokenKind::ShiftRight => (15, 16, BinaryOp::ShiftRight),
        TokenKind::Caret => (17, 18, BinaryOp::BitXor),
        TokenKind::Pipe => (19, 20, BinaryOp::BitOr),
        TokenKind::Ampersand => (21, 22, BinaryOp::BitAnd),
        TokenKind::Dot => (28, 27, BinaryOp::Member),
        _ => return None,
    };
    Some(powers)
}

fn prefix_operator(kind: TokenKind) -> Option<UnaryOp> {
    match kind {
        TokenKind::Minus => Some(UnaryOp::Neg),
        TokenKind::Bang => Some(UnaryOp::Not),
        TokenKind::Tilde => Some(UnaryOp::BitNot),
        TokenKind::Caret => Some(UnaryOp::Deref),
        TokenKind::At => Some(UnaryOp::AddressOf),
        _ => None,
    }
}

impl<'src> Parser<'src> {
    pub(super) fn parse_expr(&mut self, min_bp: u8) -> NodeId {
        let mut lhs = self.parse_prefix();

        while !self.is_recovering() {
            let op = self.peek();

            if matches!(op.kind, TokenKind::ParenOpen | TokenKind::BracketOpen) {
                if POSTFIX_BP < min_bp {
                    break;
                }
                lhs = self.parse_postfix(lhs);
                continue;
            }

            let Some((left_bp, right_bp, binary)) = infix_binding_power(op.kind) else {
                break;
            };
            if left_bp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_expr(right_bp);
            lhs = self.ast.add(Node {
                left: Some(lhs),
                right: Some(rhs),
                ..Node::new(NodeKind::Binary(binary), op)
            });
        }

        lhs
    }

    fn parse_prefix(&mut self) -> NodeId {
        let token = self.peek();
        match token.kind {
            TokenKind::Integer
            | TokenKind::Float
            | TokenKind::Str
            | TokenKind::Ident
            | TokenKind::True
            | TokenKind::False => {
                self.bump();
                self.ast.add(Node::new(NodeKind::Primary, token))
            }
            TokenKind::ParenOpen => {
                self.bump();
                let inner = self.parse_expr(0);
                if self.is_recovering() {
                    self.skip_until(TokenKind::ParenClose);
                } else if self.expect(TokenKind::ParenClose).is_none() {
                    self.ast.poison(inner);
                    self.skip_until(TokenKind::ParenClose);
                }
                inner
            }
            TokenKind::Cast => {
                self.bump();
                if self.expect(TokenKind::ParenOpen).is_none() {
                    return self.ast.error(token);
                }
                let ty = self.parse_type();
                if self.expect(TokenKind::ParenClose).is_none() {
                    self.skip_until(TokenKind::ParenClose);
                    return self.ast.add(Node {
                        left: Some(ty),
                        ..Node::new(NodeKind::Cast, token)
                    });
                }
                let operand = self.parse_expr(CAST_BP);
                self.ast.add(Node {
                    left: Some(ty),
                    right: Some(operand),
                    ..Node::new(NodeKind::Cast, token)
                })
            }
            TokenKind::Error(_) => {
                self.bump();
                self.unexpected_token(token, "an expression");
                self.ast.error(token)
            }
            kind => match prefix_operator(kind) {
                Some(op) => {
                    self.bump();
                    let operand = self.parse_expr(PREFIX_BP);
                    self.ast.add(Node {
                        left: Some(operand),
                        ..Node::new(NodeKind::Unary(op), token)
                    })
                }
                None => self.unexpected("an expression"),
            },
        }
    }

    /// Calls `f(a, b)` and indexing `a[i]`
    fn parse_postfix(&mut self, base: NodeId) -> NodeId {
        let open = self.bump();
        let (kind, close) = if open.is(TokenKind::ParenOpen) {
            (NodeKind::Call, TokenKind::ParenClose)
        } else {
            (NodeKind::Index, TokenKind::BracketClose)
        };
        let node = self.ast.add(Node {
            left: Some(base),
            ..Node::new(kind, open)
        });

        if self.eat(close).is_some() {
            if kind == NodeKind::Index {
                self.report(ParsingError::Custom {
                    msg: String::from("Index expression is missing"),
                    span: open.span,
                });
                let error = self.ast.error(open);
                self.ast.push_child(node, error);
            }
            return node;
        }

        loop {
            let arg = self.parse_expr(0);
            self.ast.push_child(node, arg);
            if self.is_recovering() {
                self.skip_until(close);
                return node;
            }
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        if self.expect(close).is_none() {
            let error = self.ast.error(open);
            self.ast.push_child(node, error);
            self.skip_until(close);
        }
        node
    }
}
