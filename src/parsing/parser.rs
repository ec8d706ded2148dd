//! Statements, declarations and types
//!
//! The parser is a single context struct threaded through every rule. Each rule returns the
//! id of the node it built; a rule that fails reports once, returns an error node and leaves
//! the parser in recovery mode until a statement loop resynchronises.

use super::token::{Token, TokenKind};
use super::{ParseOutcome, ParsingError, Scanner};
use crate::ast::{Ast, Node, NodeId, NodeKind};

/// Binding power for the elements of comma separated expression lists
///
/// Keeps `=` out of the elements so that `a, b = b, a` splits at the `=`.
pub(super) const LIST_ELEMENT_BP: u8 = 3;

pub(super) struct Parser<'src> {
    pub(super) scanner: Scanner<'src>,
    pub(super) ast: Ast<'src>,
    errors: Vec<ParsingError>,
    /// Set after a reported error, suppresses diagnostics until the next resync
    recovering: bool,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            scanner: Scanner::new(source),
            ast: Ast::new(),
            errors: Vec::new(),
            recovering: false,
        }
    }

    pub fn parse_unit(mut self) -> ParseOutcome<'src> {
        let mut roots = Vec::new();
        while !self.peek().is_eof() {
            let before = self.scanner.snapshot();
            let item = self.parse_item();
            roots.push(item);
            if self.recovering {
                self.skip_statement();
            }
            if self.scanner.snapshot() == before {
                self.bump();
            }
        }

        ParseOutcome {
            ast: self.ast,
            roots,
            errors: self.errors,
        }
    }

    // ---- token helpers ----

    pub(super) fn peek(&self) -> Token<'src> {
        self.scanner.peek()
    }

    pub(super) fn check(&self, kind: TokenKind) -> bool {
        self.peek().is(kind)
    }

    /// Consume the next token, reporting it if the scanner flagged it
    pub(super) fn bump(&mut self) -> Token<'src> {
        let token = self.scanner.advance();
        if let TokenKind::Error(error) = token.kind {
            self.errors.push(ParsingError::Lexical {
                error,
                span: token.span,
            });
        }
        token
    }

    pub(super) fn eat(&mut self, kind: TokenKind) -> Option<Token<'src>> {
        self.check(kind).then(|| self.bump())
    }

    /// Consume a token of the given kind or report what was found instead
    ///
    /// Nothing is consumed while recovering, the resync owns the rest of the statement.
    pub(super) fn expect(&mut self, kind: TokenKind) -> Option<Token<'src>> {
        if self.recovering {
            return None;
        }
        if let Some(token) = self.eat(kind) {
            return Some(token);
        }
        let found = self.peek();
        self.unexpected_token(found, &format!("`{kind}`"));
        None
    }

    pub(super) fn is_recovering(&self) -> bool {
        self.recovering
    }

    pub(super) fn report(&mut self, error: ParsingError) {
        if !self.recovering {
            tracing::trace!(?error, "syntax error");
            self.errors.push(error);
        }
        self.recovering = true;
    }

    pub(super) fn unexpected_token(&mut self, found: Token<'src>, expected: &str) {
        let token = match found.kind {
            TokenKind::Eof => String::from("end of file"),
            TokenKind::Error(_) => String::from("invalid token"),
            _ => format!("`{}`", found.text),
        };
        self.report(ParsingError::UnexpectedInput {
            token,
            expected: Some(format!("Expected {expected}")),
            span: found.span,
        });
    }

    /// Report the upcoming token and return an error node for it
    pub(super) fn unexpected(&mut self, expected: &str) -> NodeId {
        let found = self.peek();
        self.unexpected_token(found, expected);
        self.ast.error(found)
    }

    // ---- recovery ----

    /// Skip to the end of the current statement
    ///
    /// Stops after a `;` at brace depth zero, after a brace block that returns to depth zero,
    /// or before an unmatched `}`.
    pub(super) fn skip_statement(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                TokenKind::Eof => break,
                TokenKind::Semicolon if depth == 0 => {
                    self.bump();
                    break;
                }
                TokenKind::CurlyOpen => depth += 1,
                TokenKind::CurlyClose => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    if depth == 0 {
                        self.bump();
                        self.eat(TokenKind::Semicolon);
                        break;
                    }
                }
                _ => {}
            }
            self.bump();
        }
        self.recovering = false;
    }

    /// Skip to `terminator` and consume it, without leaving the current statement
    ///
    /// Returns whether the terminator was found.
    pub(super) fn skip_until(&mut self, terminator: TokenKind) -> bool {
        loop {
            let kind = self.peek().kind;
            if kind == terminator {
                self.bump();
                return true;
            }
            match kind {
                TokenKind::Eof
                | TokenKind::Semicolon
                | TokenKind::CurlyOpen
                | TokenKind::CurlyClose => return false,
                _ => {
                    self.bump();
                }
            }
        }
    }

    // ---- items and statements ----

    fn parse_item(&mut self) -> NodeId {
        let token = self.peek();
        match token.kind {
            TokenKind::Use => self.parse_use(),
            TokenKind::Ident => match self.scanner.peek_second().kind {
                TokenKind::Colon => self.parse_declaration(),
                TokenKind::Comma if self.is_multi_declaration() => self.parse_multi_declaration(),
                TokenKind::Comma => {
                    let stmt = self.parse_expression_statement();
                    if self.ast[stmt].kind == NodeKind::Swap {
                        return stmt;
                    }
                    self.report(ParsingError::Custom {
                        msg: String::from("Only declarations and swap assignments are allowed at the top level"),
                        span: self.ast.span(stmt),
                    });
                    let error = self.ast.error(token);
                    self.ast.add(Node {
                        left: Some(stmt),
                        right: Some(error),
                        ..Node::new(NodeKind::ExprStmt, token)
                    })
                }
                _ => self.unexpected("a declaration"),
            },
            _ => self.unexpected("a declaration"),
        }
    }

    /// Parse one statement and resynchronise if it failed
    pub(super) fn parse_statement(&mut self) -> NodeId {
        let stmt = self.parse_statement_inner();
        if self.recovering {
            self.skip_statement();
        }
        stmt
    }

    fn parse_statement_inner(&mut self) -> NodeId {
        let token = self.peek();
        match token.kind {
            TokenKind::CurlyOpen => self.parse_block(),
            TokenKind::Use => self.parse_use(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break | TokenKind::Continue => {
                self.bump();
                let kind = if token.is(TokenKind::Break) {
                    NodeKind::Break
                } else {
                    NodeKind::Continue
                };
                self.expect(TokenKind::Semicolon);
                self.ast.add(Node::new(kind, token))
            }
            TokenKind::Semicolon => {
                self.bump();
                self.ast.add(Node::new(NodeKind::Block, token))
            }
            TokenKind::Ident => match self.scanner.peek_second().kind {
                TokenKind::Colon => self.parse_declaration(),
                TokenKind::Comma if self.is_multi_declaration() => self.parse_multi_declaration(),
                _ => self.parse_expression_statement(),
            },
            _ => self.parse_expression_statement(),
        }
    }

    pub(super) fn parse_block(&mut self) -> NodeId {
        let open = self.bump();
        let block = self.ast.add(Node::new(NodeKind::Block, open));
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::CurlyClose => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => {
                    self.report(ParsingError::UnclosedDelimiter {
                        delimiter: String::from("{"),
                        must_close_before: String::from("end of file"),
                        span: open.span,
                    });
                    let error = self.ast.error(token);
                    self.ast.push_child(block, error);
                    break;
                }
                _ => {
                    let before = self.scanner.snapshot();
                    let stmt = self.parse_statement();
                    self.ast.push_child(block, stmt);
                    if self.scanner.snapshot() == before {
                        self.bump();
                    }
                }
            }
        }
        block
    }

    fn parse_use(&mut self) -> NodeId {
        let keyword = self.bump();
        let mut segments = Vec::new();
        loop {
            match self.expect(TokenKind::Ident) {
                Some(segment) => segments.push(self.ast.add(Node::new(NodeKind::Primary, segment))),
                None => {
                    let error = self.ast.error(keyword);
                    segments.push(error);
                    break;
                }
            }
            if self.eat(TokenKind::Dot).is_none() {
                break;
            }
        }

        let alias = match self.eat(TokenKind::As) {
            Some(_) => Some(match self.expect(TokenKind::Ident) {
                Some(alias) => self.ast.add(Node::new(NodeKind::Primary, alias)),
                None => self.ast.error(keyword),
            }),
            None => None,
        };
        self.expect(TokenKind::Semicolon);

        self.ast.add(Node {
            right: alias,
            list: segments,
            ..Node::new(NodeKind::Use, keyword)
        })
    }

    fn parse_if(&mut self) -> NodeId {
        let keyword = self.bump();
        let condition = self.parse_expr(0);
        if self.recovering {
            return self.ast.add(Node {
                left: Some(condition),
                ..Node::new(NodeKind::If, keyword)
            });
        }

        let then_branch = self.parse_statement();
        let else_branch = self.eat(TokenKind::Else).map(|_| self.parse_statement());

        self.ast.add(Node {
            left: Some(condition),
            center: Some(then_branch),
            right: else_branch,
            ..Node::new(NodeKind::If, keyword)
        })
    }

    fn parse_while(&mut self) -> NodeId {
        let keyword = self.bump();
        let condition = self.parse_expr(0);
        if self.recovering {
            return self.ast.add(Node {
                left: Some(condition),
                ..Node::new(NodeKind::While, keyword)
            });
        }

        let body = self.parse_statement();
        self.ast.add(Node {
            left: Some(condition),
            right: Some(body),
            ..Node::new(NodeKind::While, keyword)
        })
    }

    fn parse_return(&mut self) -> NodeId {
        let keyword = self.bump();
        let values = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr_list(0))
        };
        self.expect(TokenKind::Semicolon);
        self.ast.add(Node {
            left: values,
            ..Node::new(NodeKind::Return, keyword)
        })
    }

    /// `expr (',' expr)* ('=' expr (',' expr)*)? ';'`
    fn parse_expression_statement(&mut self) -> NodeId {
        let start = self.peek();
        let first = self.parse_expr(0);

        let stmt = if self.check(TokenKind::Comma) && !self.recovering {
            let targets = self.ast.add(Node {
                list: vec![first],
                ..Node::new(NodeKind::ExprList, start)
            });
            while self.eat(TokenKind::Comma).is_some() {
                let item = self.parse_expr(LIST_ELEMENT_BP);
                self.ast.push_child(targets, item);
            }

            match self.eat(TokenKind::Assign) {
                Some(assign) => {
                    let values = self.parse_expr_list(LIST_ELEMENT_BP);
                    self.ast.add(Node {
                        left: Some(targets),
                        right: Some(values),
                        ..Node::new(NodeKind::Swap, assign)
                    })
                }
                None => self.ast.add(Node {
                    left: Some(targets),
                    ..Node::new(NodeKind::ExprStmt, start)
                }),
            }
        } else {
            self.ast.add(Node {
                left: Some(first),
                ..Node::new(NodeKind::ExprStmt, start)
            })
        };

        self.expect(TokenKind::Semicolon);
        stmt
    }

    /// Comma separated expressions wrapped in an `ExprList` node
    pub(super) fn parse_expr_list(&mut self, min_bp: u8) -> NodeId {
        let start = self.peek();
        let list = self.ast.add(Node::new(NodeKind::ExprList, start));
        loop {
            let item = self.parse_expr(min_bp);
            self.ast.push_child(list, item);
            if self.recovering || self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        list
    }

    // ---- declarations ----

    /// Whether the upcoming `a, b, ...` list is followed by `:`
    fn is_multi_declaration(&self) -> bool {
        let mut probe = self.scanner;
        loop {
            if !probe.advance().is(TokenKind::Ident) {
                return false;
            }
            match probe.advance().kind {
                TokenKind::Comma => continue,
                TokenKind::Colon => return true,
                _ => return false,
            }
        }
    }

    /// `name : ...` in any of its forms
    pub(super) fn parse_declaration(&mut self) -> NodeId {
        let name = self.bump();
        self.bump();

        match self.peek().kind {
            TokenKind::Struct => self.parse_aggregate(name, NodeKind::Struct),
            TokenKind::Union => self.parse_aggregate(name, NodeKind::Union),
            TokenKind::Enum => self.parse_enum(name),
            TokenKind::Extern => {
                self.bump();
                let ty = self.parse_type();
                if !self.recovering {
                    self.expect(TokenKind::Semicolon);
                }
                self.ast.add(Node {
                    center: Some(ty),
                    ..Node::new(NodeKind::ExternDeclaration, name)
                })
            }
            _ => {
                let ty = self.parse_type();
                if self.recovering {
                    return self.ast.add(Node {
                        center: Some(ty),
                        ..Node::new(NodeKind::Declaration, name)
                    });
                }

                let init = if self.eat(TokenKind::Assign).is_some() {
                    if self.check(TokenKind::CurlyOpen) {
                        let block = self.parse_block();
                        self.eat(TokenKind::Semicolon);
                        Some(block)
                    } else {
                        let value = self.parse_expr(0);
                        self.expect(TokenKind::Semicolon);
                        Some(value)
                    }
                } else {
                    self.expect(TokenKind::Semicolon);
                    None
                };

                self.ast.add(Node {
                    center: Some(ty),
                    right: init,
                    ..Node::new(NodeKind::Declaration, name)
                })
            }
        }
    }

    /// `a, b : T (, T)* (= values)? ;`
    fn parse_multi_declaration(&mut self) -> NodeId {
        let start = self.peek();
        let mut names = Vec::new();
        loop {
            let name = self.bump();
            names.push(self.ast.add(Node::new(NodeKind::Primary, name)));
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.bump();

        let types = self.parse_type_list();
        let values = if !self.recovering && self.eat(TokenKind::Assign).is_some() {
            Some(self.parse_expr_list(LIST_ELEMENT_BP))
        } else {
            None
        };
        self.expect(TokenKind::Semicolon);

        self.ast.add(Node {
            center: Some(types),
            right: values,
            list: names,
            ..Node::new(NodeKind::MultiDeclaration, start)
        })
    }

    fn parse_aggregate(&mut self, name: Token<'src>, kind: NodeKind) -> NodeId {
        self.bump();
        let node = self.ast.add(Node::new(kind, name));
        if self.expect(TokenKind::Assign).is_none() || self.expect(TokenKind::CurlyOpen).is_none() {
            let error = self.ast.error(name);
            self.ast.push_child(node, error);
            return node;
        }

        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::CurlyClose => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => {
                    self.report(ParsingError::UnclosedDelimiter {
                        delimiter: String::from("{"),
                        must_close_before: String::from("end of file"),
                        span: name.span,
                    });
                    let error = self.ast.error(token);
                    self.ast.push_child(node, error);
                    break;
                }
                TokenKind::Ident if self.scanner.peek_second().is(TokenKind::Colon) => {
                    let field = self.parse_declaration();
                    self.ast.push_child(node, field);
                    if self.recovering {
                        self.skip_statement();
                    }
                }
                _ => {
                    let error = self.unexpected("a field declaration");
                    self.ast.push_child(node, error);
                    let before = self.scanner.snapshot();
                    self.skip_statement();
                    if self.scanner.snapshot() == before {
                        self.bump();
                    }
                }
            }
        }
        self.eat(TokenKind::Semicolon);
        node
    }

    fn parse_enum(&mut self, name: Token<'src>) -> NodeId {
        self.bump();
        let node = self.ast.add(Node::new(NodeKind::Enum, name));
        if self.expect(TokenKind::Assign).is_none() || self.expect(TokenKind::CurlyOpen).is_none() {
            let error = self.ast.error(name);
            self.ast.push_child(node, error);
            return node;
        }

        while self.eat(TokenKind::CurlyClose).is_none() {
            let Some(variant) = self.expect(TokenKind::Ident) else {
                let error = self.ast.error(name);
                self.ast.push_child(node, error);
                self.skip_until(TokenKind::CurlyClose);
                break;
            };
            let variant = self.ast.add(Node::new(NodeKind::Primary, variant));
            self.ast.push_child(node, variant);

            if self.eat(TokenKind::Comma).is_none() {
                if self.expect(TokenKind::CurlyClose).is_none() {
                    let error = self.ast.error(name);
                    self.ast.push_child(node, error);
                    self.skip_until(TokenKind::CurlyClose);
                }
                break;
            }
        }
        self.eat(TokenKind::Semicolon);
        node
    }

    // ---- types ----

    pub(super) fn parse_type(&mut self) -> NodeId {
        let token = self.peek();
        match token.kind {
            TokenKind::Caret => {
                self.bump();
                let pointee = self.parse_type();
                self.ast.add(Node {
                    left: Some(pointee),
                    ..Node::new(NodeKind::PointerType, token)
                })
            }
            TokenKind::BracketOpen => {
                self.bump();
                let length = if self.check(TokenKind::BracketClose) {
                    None
                } else {
                    Some(self.parse_expr(0))
                };
                if self.expect(TokenKind::BracketClose).is_none() {
                    let error = self.ast.error(token);
                    return self.ast.add(Node {
                        left: length,
                        right: Some(error),
                        ..Node::new(NodeKind::ArrayType, token)
                    });
                }
                let element = self.parse_type();
                self.ast.add(Node {
                    left: length,
                    right: Some(element),
                    ..Node::new(NodeKind::ArrayType, token)
                })
            }
            TokenKind::Primitive(_) | TokenKind::Ident => {
                self.bump();
                self.ast.add(Node::new(NodeKind::TypeName, token))
            }
            TokenKind::ParenOpen => self.parse_function_type(),
            _ => self.unexpected("a type"),
        }
    }

    fn parse_function_type(&mut self) -> NodeId {
        let open = self.bump();
        let params = self.ast.add(Node::new(NodeKind::ParamList, open));

        if !self.check(TokenKind::ParenClose) {
            loop {
                let param = self.parse_param();
                self.ast.push_child(params, param);
                if self.recovering || self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        if self.recovering {
            self.skip_until(TokenKind::ParenClose);
        } else if self.expect(TokenKind::ParenClose).is_none() {
            let error = self.ast.error(open);
            self.ast.push_child(params, error);
            self.skip_until(TokenKind::ParenClose);
        }

        let returns = if !self.recovering && self.eat(TokenKind::Arrow).is_some() {
            Some(self.parse_type_list())
        } else {
            None
        };

        self.ast.add(Node {
            left: Some(params),
            right: returns,
            ..Node::new(NodeKind::FunctionType, open)
        })
    }

    fn parse_param(&mut self) -> NodeId {
        let Some(name) = self.expect(TokenKind::Ident) else {
            return self.ast.error(self.peek());
        };
        if self.expect(TokenKind::Colon).is_none() {
            let error = self.ast.error(name);
            return self.ast.add(Node {
                left: Some(error),
                ..Node::new(NodeKind::Param, name)
            });
        }
        let ty = self.parse_type();
        self.ast.add(Node {
            left: Some(ty),
            ..Node::new(NodeKind::Param, name)
        })
    }

    pub(super) fn parse_type_list(&mut self) -> NodeId {
        let start = self.peek();
        let list = self.ast.add(Node::new(NodeKind::TypeList, start));
        loop {
            let ty = self.parse_type();
            self.ast.push_child(list, ty);
            if self.recovering || self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        list
    }
}
