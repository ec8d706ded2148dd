//! Global symbol analysis
//!
//! Builds the global scope of a compilation unit from the top-level AST nodes. The main
//! interface is [build_global_scope].
//!
//! The analysis runs in two passes. The first pass declares every top-level name. Types may be
//! used before they are declared, so a declaration that mentions a yet unknown type name is
//! entered with its `not_resolved_type` flag set. The deferred pass then reclassifies each of
//! those entries once against the complete table.

use std::collections::HashMap;

use miette::Diagnostic;
use thiserror::Error;

use crate::ast::{Ast, NodeId, NodeKind};
use crate::parsing::{Literal, TokenKind};
use crate::{Ident, PrimitiveType, Span};

#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("`{name}` is already declared")]
    Redefinition {
        name: String,

        #[label("declared again here")]
        span: Span,

        #[label("first declared here")]
        original: Span,
    },

    #[error("The prototype `{name}` cannot be used as a type")]
    PrototypeAsType {
        name: String,

        #[label("used as a type here")]
        span: Span,

        #[label("prototype declared here")]
        prototype: Span,
    },

    #[error("The function `{name}` cannot be used as a type")]
    FunctionAsType {
        name: String,

        #[label("used as a type here")]
        span: Span,

        #[label("function declared here")]
        function: Span,
    },

    #[error("`{name}` is not a type")]
    NotAType {
        name: String,

        #[label("used as a type here")]
        span: Span,

        #[label("declared here")]
        declaration: Span,
    },

    #[error("The variable `{name}` cannot be initialised with a block")]
    #[diagnostic(help("Only declarations with a function type take a block body"))]
    BlockInitializer {
        name: String,

        #[label("block initializer")]
        span: Span,
    },

    #[error("The function `{name}` needs a block as its body")]
    FunctionBody {
        name: String,

        #[label("expected a block here")]
        span: Span,
    },

    #[error("The external declaration `{name}` must have a function type")]
    ExternNotFunction {
        name: String,

        #[label("this type")]
        span: Span,
    },

    #[error("Unknown type `{name}`")]
    UnknownType {
        name: String,

        #[label("not declared anywhere")]
        span: Span,
    },

    #[error("Array lengths must be positive integer literals")]
    ArrayLength {
        #[label("this length")]
        span: Span,
    },

    #[error("Found {types} types for {names} names")]
    #[diagnostic(help("Give either one type for all names or one type per name"))]
    TypeCount {
        names: usize,
        types: usize,

        #[label("these types")]
        span: Span,
    },

    #[error("Malformed type")]
    InvalidType {
        #[label("here")]
        span: Span,
    },

    #[error("The prototype `{name}` never receives a body")]
    #[diagnostic(severity(Warning))]
    UnusedPrototype {
        name: String,

        #[label("declared here")]
        span: Span,
    },
}

type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Error,
    Var,
    Type,
    Prototype,
    Func,
    Namespace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseType<'src> {
    Primitive(PrimitiveType),
    Named(Ident<'src>),
    Function(Box<Signature<'src>>),
}

/// Description of a declared type
///
/// Every scalar occupies one 8-byte slot; `array_len` counts slots for (possibly nested)
/// arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDesc<'src> {
    pub base: BaseType<'src>,
    pub pointer_depth: u32,
    pub array_len: Option<u64>,
}

impl TypeDesc<'_> {
    pub const SLOT_SIZE: u64 = 8;

    pub fn size(&self) -> u64 {
        Self::SLOT_SIZE * self.array_len.unwrap_or(1)
    }

    pub fn is_array(&self) -> bool {
        self.array_len.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature<'src> {
    pub params: Vec<(Ident<'src>, TypeDesc<'src>)>,
    pub returns: Vec<TypeDesc<'src>>,
    pub external: bool,
}

impl<'src> Signature<'src> {
    /// Same parameter and return types, parameter names aside
    pub fn matches(&self, other: &Signature<'src>) -> bool {
        self.returns == other.returns
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|((_, a), (_, b))| a == b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolData<'src> {
    None,
    Var(TypeDesc<'src>),
    Func(Signature<'src>),
    Namespace(Vec<Ident<'src>>),
}

/// Where a variable lives at runtime, as a byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Below the frame base of the enclosing function
    Stack { offset: u64 },
    /// Inside the globals area
    Static { offset: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEntry<'src> {
    pub kind: SymbolKind,
    /// The declaring node
    pub node: NodeId,
    pub name_span: Span,
    pub data: SymbolData<'src>,
    /// Filled in during lowering
    pub storage: Option<Storage>,
    pub not_resolved_type: bool,
}

impl<'src> ScopeEntry<'src> {
    pub fn new(kind: SymbolKind, node: NodeId, name_span: Span, data: SymbolData<'src>) -> Self {
        Self {
            kind,
            node,
            name_span,
            data,
            storage: None,
            not_resolved_type: false,
        }
    }

    pub fn error(node: NodeId, name_span: Span) -> Self {
        Self::new(SymbolKind::Error, node, name_span, SymbolData::None)
    }

    /// Same kind and data, the declaring node is not compared
    pub fn same_declaration(&self, other: &ScopeEntry<'src>) -> bool {
        self.kind == other.kind && self.data == other.data
    }

    pub fn signature(&self) -> Option<&Signature<'src>> {
        match &self.data {
            SymbolData::Func(signature) => Some(signature),
            _ => None,
        }
    }

    pub fn var_type(&self) -> Option<&TypeDesc<'src>> {
        match &self.data {
            SymbolData::Var(desc) => Some(desc),
            _ => None,
        }
    }
}

/// One table of names
#[derive(Debug, Clone, Default)]
pub struct Scope<'src> {
    entries: HashMap<Ident<'src>, ScopeEntry<'src>>,
}

impl<'src> Scope<'src> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &Ident<'src>) -> Option<&ScopeEntry<'src>> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &Ident<'src>) -> Option<&mut ScopeEntry<'src>> {
        self.entries.get_mut(name)
    }

    pub fn insert(&mut self, name: Ident<'src>, entry: ScopeEntry<'src>) -> Option<ScopeEntry<'src>> {
        self.entries.insert(name, entry)
    }

    pub fn remove(&mut self, name: &Ident<'src>) -> Option<ScopeEntry<'src>> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Ident<'src>, &ScopeEntry<'src>)> {
        self.entries.iter()
    }
}

/// Result of the global analysis
#[derive(Debug, Clone)]
pub struct Analysis<'src> {
    pub scope: Scope<'src>,
    pub errors: Vec<AnalysisError>,
}

/// Type names a type expression refers to
pub type TypeRefs<'src> = Vec<(Ident<'src>, Span)>;

/// Structural description of a type node
///
/// Named types are not looked up here, they are collected into `refs`.
pub fn describe_type<'src>(
    ast: &Ast<'src>,
    id: NodeId,
    refs: &mut TypeRefs<'src>,
) -> Result<TypeDesc<'src>> {
    let node = &ast[id];
    match node.kind {
        NodeKind::TypeName => {
            let base = match node.token.kind {
                TokenKind::Primitive(primitive) => BaseType::Primitive(primitive),
                _ => {
                    let name = Ident::new(node.token.text);
                    refs.push((name, node.token.span));
                    BaseType::Named(name)
                }
            };
            Ok(TypeDesc {
                base,
                pointer_depth: 0,
                array_len: None,
            })
        }
        NodeKind::PointerType => {
            let pointee = describe_type(ast, child(node.left, node.token.span)?, refs)?;
            Ok(TypeDesc {
                base: pointee.base,
                pointer_depth: pointee.pointer_depth + 1,
                array_len: None,
            })
        }
        NodeKind::ArrayType => {
            let element = describe_type(ast, child(node.right, node.token.span)?, refs)?;
            let Some(length) = node.left else {
                // unsized arrays decay to pointers
                return Ok(TypeDesc {
                    base: element.base,
                    pointer_depth: element.pointer_depth + 1,
                    array_len: None,
                });
            };

            let length_node = &ast[length];
            let count = match (length_node.kind, length_node.token.kind, length_node.token.literal) {
                (NodeKind::Primary, TokenKind::Integer, Literal::Unsigned(n)) if n > 0 => n,
                _ => return Err(AnalysisError::ArrayLength { span: ast.span(length) }),
            };
            let array_len = count
                .checked_mul(element.array_len.unwrap_or(1))
                .ok_or(AnalysisError::ArrayLength { span: ast.span(length) })?;

            Ok(TypeDesc {
                array_len: Some(array_len),
                ..element
            })
        }
        NodeKind::FunctionType => {
            let signature = describe_signature(ast, id, refs)?;
            Ok(TypeDesc {
                base: BaseType::Function(Box::new(signature)),
                pointer_depth: 0,
                array_len: None,
            })
        }
        _ => Err(AnalysisError::InvalidType { span: ast.span(id) }),
    }
}

/// Parameter and return types of a function type node
pub fn describe_signature<'src>(
    ast: &Ast<'src>,
    id: NodeId,
    refs: &mut TypeRefs<'src>,
) -> Result<Signature<'src>> {
    let node = &ast[id];
    if node.kind != NodeKind::FunctionType {
        return Err(AnalysisError::InvalidType { span: ast.span(id) });
    }

    let mut signature = Signature::default();
    if let Some(params) = node.left {
        for &param in &ast[params].list {
            let param = &ast[param];
            let ty = describe_type(ast, child(param.left, param.token.span)?, refs)?;
            signature.params.push((Ident::new(param.name()), ty));
        }
    }
    if let Some(returns) = node.right {
        for &ty in &ast[returns].list {
            signature.returns.push(describe_type(ast, ty, refs)?);
        }
    }
    Ok(signature)
}

fn child(slot: Option<NodeId>, span: Span) -> Result<NodeId> {
    slot.ok_or(AnalysisError::InvalidType { span })
}

/// Build the global scope from the top-level nodes
#[tracing::instrument(level = "debug", skip_all)]
pub fn build_global_scope<'src>(ast: &Ast<'src>, roots: &[NodeId]) -> Analysis<'src> {
    let mut builder = ScopeBuilder {
        ast,
        scope: Scope::new(),
        errors: Vec::new(),
        deferred: Vec::new(),
    };

    for &root in roots {
        builder.declare_root(root);
    }
    builder.resolve_deferred();
    builder.warn_unused_prototypes();

    tracing::debug!(
        symbols = builder.scope.len(),
        errors = builder.errors.len(),
        "built global scope"
    );

    Analysis {
        scope: builder.scope,
        errors: builder.errors,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Resolved,
    Deferred,
    Failed,
}

struct ScopeBuilder<'a, 'src> {
    ast: &'a Ast<'src>,
    scope: Scope<'src>,
    errors: Vec<AnalysisError>,
    /// Entries declared with unknown type names, in declaration order
    deferred: Vec<(Ident<'src>, TypeRefs<'src>)>,
}

impl<'src> ScopeBuilder<'_, 'src> {
    fn declare_root(&mut self, root: NodeId) {
        let ast = self.ast;
        let node = &ast[root];
        match node.kind {
            NodeKind::Struct | NodeKind::Union | NodeKind::Enum => {
                let entry = ScopeEntry::new(SymbolKind::Type, root, node.token.span, SymbolData::None);
                self.declare(Ident::new(node.name()), entry);
            }
            NodeKind::Use => self.declare_use(root),
            NodeKind::Declaration => self.declare_single(root, root),
            NodeKind::ExternDeclaration => self.declare_extern(root),
            NodeKind::MultiDeclaration => self.declare_multi(root),
            _ => {}
        }
    }

    /// Insert honouring the redeclaration rules, returns whether the entry was stored
    fn declare(&mut self, name: Ident<'src>, entry: ScopeEntry<'src>) -> bool {
        let Some(existing) = self.scope.get(&name) else {
            tracing::trace!(%name, kind = ?entry.kind, "declared");
            self.scope.insert(name, entry);
            return true;
        };

        if existing.same_declaration(&entry) {
            match (self.is_definition(existing), self.is_definition(&entry)) {
                (_, false) => return false,
                // a tentative variable takes the initializer of its later definition
                (false, true) if entry.kind == SymbolKind::Var => {
                    tracing::trace!(%name, "tentative declaration defined");
                    self.scope.insert(name, entry);
                    return true;
                }
                (true, true) if self.ast.same_tree(existing.node, entry.node) => return false,
                _ => {
                    self.errors.push(AnalysisError::Redefinition {
                        name: name.to_string(),
                        span: entry.name_span,
                        original: existing.name_span,
                    });
                    return false;
                }
            }
        }

        let signatures_match = match (existing.signature(), entry.signature()) {
            (Some(a), Some(b)) => a.matches(b),
            _ => false,
        };
        match (existing.kind, entry.kind) {
            (SymbolKind::Prototype, SymbolKind::Func) if signatures_match => {
                tracing::trace!(%name, "prototype fulfilled");
                self.scope.insert(name, entry);
                true
            }
            (SymbolKind::Func, SymbolKind::Prototype) if signatures_match => false,
            _ => {
                self.errors.push(AnalysisError::Redefinition {
                    name: name.to_string(),
                    span: entry.name_span,
                    original: existing.name_span,
                });
                false
            }
        }
    }

    /// Whether the entry carries a body, an initializer or a member list
    fn is_definition(&self, entry: &ScopeEntry<'src>) -> bool {
        match entry.kind {
            SymbolKind::Type => true,
            SymbolKind::Func => entry.signature().is_some_and(|signature| !signature.external),
            SymbolKind::Var => self.ast[entry.node].right.is_some(),
            SymbolKind::Prototype | SymbolKind::Namespace | SymbolKind::Error => false,
        }
    }

    fn declare_use(&mut self, root: NodeId) {
        let ast = self.ast;
        let node = &ast[root];
        if ast.is_error(root) {
            return;
        }

        let path: Vec<_> = node.list.iter().map(|&seg| Ident::new(ast[seg].name())).collect();
        let name_node = node.right.or(node.list.last().copied());
        let Some(name_node) = name_node else {
            return;
        };

        let name_token = ast[name_node].token;
        let entry = ScopeEntry::new(
            SymbolKind::Namespace,
            root,
            name_token.span,
            SymbolData::Namespace(path),
        );
        self.declare(Ident::new(name_token.text), entry);
    }

    /// `name : type (= init)?`, where `decl` is the declaration node
    fn declare_single(&mut self, root: NodeId, decl: NodeId) {
        let ast = self.ast;
        let node = &ast[decl];
        let name = Ident::new(node.name());
        let span = node.token.span;

        let Some(ty) = node.center.filter(|&ty| !ast.is_error(ty)) else {
            self.declare(name, ScopeEntry::error(root, span));
            return;
        };

        let mut refs = Vec::new();
        if ast[ty].kind == NodeKind::FunctionType {
            let signature = match describe_signature(ast, ty, &mut refs) {
                Ok(signature) => signature,
                Err(error) => {
                    self.errors.push(error);
                    self.declare(name, ScopeEntry::error(root, span));
                    return;
                }
            };

            let kind = match node.right {
                None => SymbolKind::Prototype,
                Some(body) if ast[body].kind == NodeKind::Block => SymbolKind::Func,
                Some(init) => {
                    self.errors.push(AnalysisError::FunctionBody {
                        name: name.to_string(),
                        span: ast.span(init),
                    });
                    SymbolKind::Error
                }
            };
            let entry = ScopeEntry::new(kind, root, span, SymbolData::Func(signature));
            self.declare_resolving(name, entry, refs);
            return;
        }

        if let Some(init) = node.right.filter(|&init| ast[init].kind == NodeKind::Block) {
            self.errors.push(AnalysisError::BlockInitializer {
                name: name.to_string(),
                span: ast.span(init),
            });
        }

        match describe_type(ast, ty, &mut refs) {
            Ok(desc) => {
                let entry = ScopeEntry::new(SymbolKind::Var, root, span, SymbolData::Var(desc));
                self.declare_resolving(name, entry, refs);
            }
            Err(error) => {
                self.errors.push(error);
                self.declare(name, ScopeEntry::error(root, span));
            }
        }
    }

    fn declare_extern(&mut self, root: NodeId) {
        let ast = self.ast;
        let node = &ast[root];
        let name = Ident::new(node.name());
        let span = node.token.span;

        let Some(ty) = node.center.filter(|&ty| !ast.is_error(ty)) else {
            self.declare(name, ScopeEntry::error(root, span));
            return;
        };

        let mut refs = Vec::new();
        let signature = if ast[ty].kind == NodeKind::FunctionType {
            describe_signature(ast, ty, &mut refs)
        } else {
            Err(AnalysisError::ExternNotFunction {
                name: name.to_string(),
                span: ast.span(ty),
            })
        };

        match signature {
            Ok(signature) => {
                let signature = Signature {
                    external: true,
                    ..signature
                };
                let entry = ScopeEntry::new(SymbolKind::Func, root, span, SymbolData::Func(signature));
                self.declare_resolving(name, entry, refs);
            }
            Err(error) => {
                self.errors.push(error);
                self.declare(name, ScopeEntry::error(root, span));
            }
        }
    }

    fn declare_multi(&mut self, root: NodeId) {
        let ast = self.ast;
        let node = &ast[root];
        let types: &[NodeId] = match node.center {
            Some(types) if !ast.is_error(types) => &ast[types].list,
            _ => &[],
        };

        let shared = types.len() == 1;
        if !shared && types.len() != node.list.len() {
            if let Some(types_node) = node.center.filter(|&t| !ast.is_error(t)) {
                self.errors.push(AnalysisError::TypeCount {
                    names: node.list.len(),
                    types: types.len(),
                    span: ast.span(types_node),
                });
            }
            for &name in &node.list {
                let token = ast[name].token;
                self.declare(Ident::new(token.text), ScopeEntry::error(root, token.span));
            }
            return;
        }

        for (i, &name) in node.list.iter().enumerate() {
            let token = ast[name].token;
            let name = Ident::new(token.text);
            let ty = if shared { types[0] } else { types[i] };

            let mut refs = Vec::new();
            match describe_type(ast, ty, &mut refs) {
                Ok(desc) => {
                    let entry = ScopeEntry::new(SymbolKind::Var, root, token.span, SymbolData::Var(desc));
                    self.declare_resolving(name, entry, refs);
                }
                Err(error) => {
                    // a shared type reports its problem once
                    if !shared || i == 0 {
                        self.errors.push(error);
                    }
                    self.declare(name, ScopeEntry::error(root, token.span));
                }
            }
        }
    }

    /// Declare an entry whose type mentions the names in `refs`
    fn declare_resolving(&mut self, name: Ident<'src>, mut entry: ScopeEntry<'src>, refs: TypeRefs<'src>) {
        match self.resolve(&refs, false) {
            Resolution::Resolved => {
                self.declare(name, entry);
            }
            Resolution::Deferred => {
                entry.not_resolved_type = true;
                let queued = self.deferred.iter().any(|(deferred, _)| *deferred == name);
                if self.declare(name, entry) && !queued {
                    self.deferred.push((name, refs));
                }
            }
            Resolution::Failed => {
                entry.kind = SymbolKind::Error;
                self.declare(name, entry);
            }
        }
    }

    /// Check that every referenced name is a type
    ///
    /// Unknown names defer the entry, unless this is the final pass.
    fn resolve(&mut self, refs: &TypeRefs<'src>, final_pass: bool) -> Resolution {
        let mut resolution = Resolution::Resolved;
        for &(name, span) in refs {
            let Some(entry) = self.scope.get(&name) else {
                if final_pass {
                    self.errors.push(AnalysisError::UnknownType {
                        name: name.to_string(),
                        span,
                    });
                    resolution = Resolution::Failed;
                } else if resolution == Resolution::Resolved {
                    resolution = Resolution::Deferred;
                }
                continue;
            };

            let error = match entry.kind {
                SymbolKind::Type => continue,
                SymbolKind::Error => None,
                SymbolKind::Prototype => Some(AnalysisError::PrototypeAsType {
                    name: name.to_string(),
                    span,
                    prototype: entry.name_span,
                }),
                SymbolKind::Func => Some(AnalysisError::FunctionAsType {
                    name: name.to_string(),
                    span,
                    function: entry.name_span,
                }),
                SymbolKind::Var | SymbolKind::Namespace => Some(AnalysisError::NotAType {
                    name: name.to_string(),
                    span,
                    declaration: entry.name_span,
                }),
            };
            self.errors.extend(error);
            resolution = Resolution::Failed;
        }
        resolution
    }

    /// Reclassify every deferred entry exactly once
    fn resolve_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        tracing::debug!(count = deferred.len(), "resolving deferred entries");

        for (name, refs) in deferred {
            let Some(mut entry) = self.scope.remove(&name) else {
                continue;
            };
            if self.resolve(&refs, true) != Resolution::Resolved {
                entry.kind = SymbolKind::Error;
            }
            entry.not_resolved_type = false;
            self.scope.insert(name, entry);
        }
    }

    fn warn_unused_prototypes(&mut self) {
        let mut unused: Vec<_> = self
            .scope
            .iter()
            .filter(|(_, entry)| entry.kind == SymbolKind::Prototype)
            .map(|(name, entry)| (entry.name_span, name.to_string()))
            .collect();
        unused.sort_by_key(|(span, _)| span.start);

        for (span, name) in unused {
            self.errors.push(AnalysisError::UnusedPrototype { name, span });
        }
    }
}
