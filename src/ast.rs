//! Abstract syntax tree
//!
//! All nodes of a compilation unit live in one [`Ast`] arena and refer to
//! each other through [`NodeId`] handles. Every node keeps the token it was
//! created from, up to three positional children and an ordered child list.

use std::borrow::Cow;
use std::{fmt, io, ops::Index};

use ptree::{Style, TreeItem};

use crate::parsing::Token;
use crate::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    Deref,
    AddressOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Assign,
    Or,
    And,
    Equals,
    NotEquals,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    ShiftLeft,
    ShiftRight,
    BitXor,
    BitOr,
    BitAnd,
    Member,
}

/// Node type tag
///
/// The slot layout depends on the kind:
/// - `Primary`: literal or identifier, payload in the token
/// - `Unary`: `left` operand
/// - `Binary`: `left` and `right` operands
/// - `Call`: `left` callee, `list` arguments
/// - `Index`: `left` base, `list` index expressions
/// - `Cast`: `left` type, `right` operand
/// - `ExprList`: `list` members
/// - `Swap`: `left` target list, `right` value list
/// - `Block`: `list` statements
/// - `If`: `left` condition, `center` then branch, `right` optional else branch
/// - `While`: `left` condition, `right` body
/// - `Return`: `left` optional value list
/// - `ExprStmt`: `left` expression
/// - `Declaration`: token is the name, `center` type, `right` optional initializer
/// - `ExternDeclaration`: token is the name, `center` type
/// - `MultiDeclaration`: `list` names, `center` type list, `right` optional value list
/// - `Struct`/`Union`: token is the name, `list` field declarations
/// - `Enum`: token is the name, `list` variant names
/// - `TypeName`: primitive keyword or identifier token
/// - `PointerType`: `left` pointee
/// - `ArrayType`: `left` optional length, `right` element type
/// - `FunctionType`: `left` parameter list, `right` optional return type list
/// - `ParamList`: `list` parameters; `Param`: token is the name, `left` type
/// - `TypeList`: `list` types
/// - `Use`: `list` path segments, `right` optional alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Primary,
    Unary(UnaryOp),
    Binary(BinaryOp),
    Call,
    Index,
    Cast,
    ExprList,
    Swap,

    Block,
    If,
    While,
    Return,
    Break,
    Continue,
    ExprStmt,

    Declaration,
    ExternDeclaration,
    MultiDeclaration,
    Struct,
    Union,
    Enum,

    TypeName,
    PointerType,
    ArrayType,
    FunctionType,
    ParamList,
    Param,
    TypeList,

    Use,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node<'src> {
    pub kind: NodeKind,
    pub token: Token<'src>,
    pub left: Option<NodeId>,
    pub center: Option<NodeId>,
    pub right: Option<NodeId>,
    pub list: Vec<NodeId>,
    /// Set when any descendant is an error node
    pub poisoned: bool,
}

impl<'src> Node<'src> {
    pub fn new(kind: NodeKind, token: Token<'src>) -> Self {
        Self {
            kind,
            token,
            left: None,
            center: None,
            right: None,
            list: Vec::new(),
            poisoned: false,
        }
    }

    /// Identifier or name carried by the node's token
    pub fn name(&self) -> &'src str {
        self.token.text
    }

    /// All children in source order
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.left
            .into_iter()
            .chain(self.center)
            .chain(self.right)
            .chain(self.list.iter().copied())
    }
}

/// Arena owning every node of one compilation unit
#[derive(Debug, Default, Clone)]
pub struct Ast<'src> {
    nodes: Vec<Node<'src>>,
}

impl<'src> Ast<'src> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Move a node into the arena
    ///
    /// Attaching an erroneous child poisons the new node.
    pub fn add(&mut self, mut node: Node<'src>) -> NodeId {
        let poisoned = node.children().any(|child| self.is_error(child));
        node.poisoned |= poisoned;
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn error(&mut self, token: Token<'src>) -> NodeId {
        self.add(Node::new(NodeKind::Error, token))
    }

    /// Append to a node's child list, propagating errors upwards
    pub fn push_child(&mut self, parent: NodeId, child: NodeId) {
        let poisoned = self.is_error(child);
        let node = &mut self.nodes[parent.index()];
        node.list.push(child);
        node.poisoned |= poisoned;
    }

    pub fn poison(&mut self, id: NodeId) {
        self.nodes[id.index()].poisoned = true;
    }

    pub fn is_error(&self, id: NodeId) -> bool {
        let node = &self[id];
        node.kind == NodeKind::Error || node.poisoned
    }

    /// Source region covered by a node and its descendants
    pub fn span(&self, id: NodeId) -> Span {
        let node = &self[id];
        let mut span = node.token.span;
        for child in node.children() {
            let child_span = self.span(child);
            if child_span.start < span.start {
                span = child_span.to(span);
            } else {
                span = span.to(child_span);
            }
        }
        span
    }

    /// Whether two subtrees spell out the same code, positions aside
    pub fn same_tree(&self, a: NodeId, b: NodeId) -> bool {
        let (x, y) = (&self[a], &self[b]);
        let same_child = |p: Option<NodeId>, q: Option<NodeId>| match (p, q) {
            (Some(p), Some(q)) => self.same_tree(p, q),
            (None, None) => true,
            _ => false,
        };
        x.kind == y.kind
            && x.token.kind == y.token.kind
            && x.token.text == y.token.text
            && same_child(x.left, y.left)
            && same_child(x.center, y.center)
            && same_child(x.right, y.right)
            && x.list.len() == y.list.len()
            && x.list.iter().zip(&y.list).all(|(&p, &q)| self.same_tree(p, q))
    }

    pub fn tree(&self, id: NodeId) -> TreeView<'_, 'src> {
        TreeView { ast: self, id }
    }
}

impl<'src> Index<NodeId> for Ast<'src> {
    type Output = Node<'src>;

    fn index(&self, id: NodeId) -> &Self::Output {
        &self.nodes[id.index()]
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::BitNot => write!(f, "~"),
            UnaryOp::Deref => write!(f, "^"),
            UnaryOp::AddressOf => write!(f, "@"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Assign => "=",
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEq => "<=",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::BitAnd => "&",
            BinaryOp::Member => ".",
        };
        f.write_str(s)
    }
}

/// Borrowed view of one subtree, used for tree printing
#[derive(Clone)]
pub struct TreeView<'a, 'src> {
    ast: &'a Ast<'src>,
    id: NodeId,
}

impl TreeView<'_, '_> {
    fn label(&self) -> String {
        let node = &self.ast[self.id];
        let label = match node.kind {
            NodeKind::Primary | NodeKind::TypeName => node.token.text.to_string(),
            NodeKind::Unary(op) => op.to_string(),
            NodeKind::Binary(op) => op.to_string(),
            NodeKind::Call => String::from("CALL"),
            NodeKind::Index => String::from("INDEX"),
            NodeKind::Cast => String::from("CAST"),
            NodeKind::ExprList => String::from("LIST"),
            NodeKind::Swap => String::from("SWAP"),
            NodeKind::Block => String::from("BLOCK"),
            NodeKind::If => String::from("IF"),
            NodeKind::While => String::from("WHILE"),
            NodeKind::Return => String::from("RETURN"),
            NodeKind::Break => String::from("BREAK"),
            NodeKind::Continue => String::from("CONTINUE"),
            NodeKind::ExprStmt => String::from("EXPR"),
            NodeKind::Declaration => format!("DECL {}", node.name()),
            NodeKind::ExternDeclaration => format!("EXTERN {}", node.name()),
            NodeKind::MultiDeclaration => String::from("DECL*"),
            NodeKind::Struct => format!("STRUCT {}", node.name()),
            NodeKind::Union => format!("UNION {}", node.name()),
            NodeKind::Enum => format!("ENUM {}", node.name()),
            NodeKind::PointerType => String::from("^"),
            NodeKind::ArrayType => String::from("[]"),
            NodeKind::FunctionType => String::from("FN"),
            NodeKind::ParamList => String::from("PARAMS"),
            NodeKind::Param => format!("PARAM {}", node.name()),
            NodeKind::TypeList => String::from("TYPES"),
            NodeKind::Use => String::from("USE"),
            NodeKind::Error => String::from("<error>"),
        };
        if node.poisoned {
            format!("{label} (!)")
        } else {
            label
        }
    }
}

impl TreeItem for TreeView<'_, '_> {
    type Child = Self;

    fn write_self<W: io::Write>(&self, f: &mut W, style: &Style) -> io::Result<()> {
        write!(f, "{}", style.paint(self.label()))
    }

    fn children(&self) -> Cow<[Self::Child]> {
        let children = self.ast[self.id]
            .children()
            .map(|id| TreeView { ast: self.ast, id })
            .collect::<Vec<_>>();
        Cow::from(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::TokenKind;

    fn token() -> Token<'static> {
        Token::synthetic(TokenKind::Eof, Span::default())
    }

    #[test]
    fn errors_are_contagious() {
        let mut ast = Ast::new();
        let ok = ast.add(Node::new(NodeKind::Primary, token()));
        let bad = ast.error(token());
        let parent = ast.add(Node {
            left: Some(ok),
            right: Some(bad),
            ..Node::new(NodeKind::Binary(BinaryOp::Add), token())
        });
        let block = ast.add(Node::new(NodeKind::Block, token()));

        assert!(ast.is_error(parent));
        assert!(!ast.is_error(block));
        ast.push_child(block, parent);
        assert!(ast.is_error(block));
        assert_eq!(ast[parent].right, Some(bad));
    }

    #[test]
    fn tree_rendering() {
        let mut ast = Ast::new();
        let lhs = ast.add(Node::new(NodeKind::Primary, token()));
        let rhs = ast.error(token());
        let sum = ast.add(Node {
            left: Some(lhs),
            right: Some(rhs),
            ..Node::new(NodeKind::Binary(BinaryOp::Add), token())
        });

        let mut out = Vec::new();
        ptree::write_tree(&ast.tree(sum), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("+ (!)"));
        assert!(out.contains("<error>"));
    }

    #[test]
    fn trees_compare_by_code() {
        let parsed = crate::parsing::parse("x : u64 = 1 + 2; x : u64 =\n 1 + 2; x : u64 = 2 + 1;");
        let ast = &parsed.ast;
        let &[a, b, c] = &parsed.roots[..] else {
            panic!("expected three roots");
        };
        assert!(ast.same_tree(a, b));
        assert!(!ast.same_tree(a, c));
    }
}
