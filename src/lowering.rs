//! Lowering
//!
//! This module is responsible for lowering the AST (together with the global scope built by
//! [analysis](crate::analysis)) down to our stack machine IR ([ir]). The main interface is the
//! [lower] function.
//!
//! Expressions are generated value first: an assignment target or the operand of `@` is
//! compiled like any other value and the instruction that produced it is then rewritten into
//! its lvalue form. Forward jumps are emitted with a placeholder and patched once the target
//! is known.

use miette::Diagnostic;
use thiserror::Error;

use crate::analysis::{
    describe_type, AnalysisError, BaseType, Scope, ScopeEntry, Signature, Storage, SymbolData,
    SymbolKind, TypeDesc,
};
use crate::ast::{Ast, BinaryOp, NodeId, NodeKind, UnaryOp};
use crate::builtin::Builtin;
use crate::ir::{self, InstrRef, IrFunction, IrProgram, LvalueMode, Opcode, Operand};
use crate::parsing::{Literal, TokenKind};
use crate::{Ident, Span};

#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum LoweringError {
    #[error("Cannot find `{name}` in this scope")]
    UnresolvedName {
        name: String,

        #[label("not found")]
        span: Span,
    },

    #[error("`{name}` is not a value")]
    NotAValue {
        name: String,

        #[label("used as a value here")]
        span: Span,

        #[label("declared here")]
        declaration: Span,
    },

    #[error("Cannot assign to or take the address of this expression")]
    NotAnLvalue {
        #[label("not an lvalue")]
        span: Span,
    },

    #[error("Expected an expression that produces a value")]
    ExpectedValue {
        #[label("produces no value")]
        span: Span,
    },

    #[error("Only functions can be called by name")]
    #[diagnostic(help("Indirect calls through pointers are not supported"))]
    NotCallable {
        #[label("not a function")]
        span: Span,
    },

    #[error("The prototype `{name}` is called but never defined")]
    PrototypeWithoutBody {
        name: String,

        #[label("called here")]
        span: Span,

        #[label("prototype declared here")]
        prototype: Span,
    },

    #[error("`{name}` takes {expected} arguments but {found} were given")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,

        #[label("this call")]
        span: Span,
    },

    #[error("The function `{name}` declares more than one return value")]
    #[diagnostic(help("Multiple return values are not supported yet"))]
    MultipleReturns {
        name: String,

        #[label("declared here")]
        span: Span,
    },

    #[error("Expected {expected} return values, found {found}")]
    ReturnCount {
        expected: usize,
        found: usize,

        #[label("this return")]
        span: Span,
    },

    #[error("Expected {expected} values, found {found}")]
    ValueCount {
        expected: usize,
        found: usize,

        #[label("these values")]
        span: Span,
    },

    #[error("`{keyword}` outside of a loop")]
    OutsideLoop {
        keyword: String,

        #[label("not inside a loop")]
        span: Span,
    },

    #[error("Member access is not supported")]
    MemberAccess {
        #[label("here")]
        span: Span,
    },

    #[error("Functions can only be declared at the top level")]
    NestedFunction {
        name: String,

        #[label("nested function")]
        span: Span,
    },

    #[error("The array `{name}` cannot be initialised with a single value")]
    ArrayInitializer {
        name: String,

        #[label("this initializer")]
        span: Span,
    },

    #[error("Expected a single index")]
    IndexCount {
        #[label("here")]
        span: Span,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Analysis(#[from] AnalysisError),
}

/// The generated program together with every diagnostic found on the way
#[derive(Debug, Clone)]
pub struct Lowered {
    pub program: IrProgram,
    pub errors: Vec<LoweringError>,
}

impl Lowered {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Turn the AST and its global scope into IR
#[tracing::instrument(level = "debug", skip_all)]
pub fn lower<'src>(ast: &Ast<'src>, roots: &[NodeId], scope: Scope<'src>) -> Lowered {
    let mut lowerer = Lowerer {
        ast,
        globals: scope,
        locals: Vec::new(),
        program: IrProgram::default(),
        errors: Vec::new(),
        function: IrFunction::default(),
        loops: Vec::new(),
        excluded: None,
        returns: 0,
    };

    lowerer.allocate_globals(roots);
    lowerer.lower_init(roots);
    lowerer.lower_functions(roots);

    tracing::debug!(
        functions = lowerer.program.functions.len(),
        globals = lowerer.program.globals.len(),
        strings = lowerer.program.strings.len(),
        errors = lowerer.errors.len(),
        "lowered program"
    );

    Lowered {
        program: lowerer.program,
        errors: lowerer.errors,
    }
}

/// Bookkeeping for the innermost enclosing loop
#[derive(Debug)]
struct LoopContext {
    start: usize,
    /// `stack_index` when the loop was entered
    stack_base: u64,
    breaks: Vec<InstrRef>,
    continues: Vec<InstrRef>,
}

/// What a name resolved to, detached from the scope tables
#[derive(Debug, Clone, Copy)]
struct Symbol {
    kind: SymbolKind,
    storage: Option<Storage>,
    is_array: bool,
    name_span: Span,
    params: usize,
    returns: usize,
}

impl Symbol {
    fn from_entry(entry: &ScopeEntry) -> Self {
        let (params, returns) = entry
            .signature()
            .map_or((0, 0), |sig| (sig.params.len(), sig.returns.len()));
        Self {
            kind: entry.kind,
            storage: entry.storage,
            is_array: entry.var_type().is_some_and(TypeDesc::is_array),
            name_span: entry.name_span,
            params,
            returns,
        }
    }
}

/// The main state during lowering
struct Lowerer<'a, 'src> {
    ast: &'a Ast<'src>,
    globals: Scope<'src>,
    /// Block scopes, innermost last
    locals: Vec<Scope<'src>>,
    program: IrProgram,
    errors: Vec<LoweringError>,
    /// The function currently being generated
    function: IrFunction,
    loops: Vec<LoopContext>,
    /// Name whose nearest declaration is skipped by lookups
    excluded: Option<Ident<'src>>,
    /// Declared return count of the current function
    returns: usize,
}

impl<'a, 'src> Lowerer<'a, 'src> {
    fn error(&mut self, error: LoweringError) {
        tracing::trace!(?error, "lowering error");
        self.errors.push(error);
    }

    fn emit(&mut self, op: Opcode, operand: Operand, span: Span) -> InstrRef {
        self.function.emit(op, operand, span)
    }

    fn emit_op(&mut self, op: Opcode, span: Span) -> InstrRef {
        self.function.emit_op(op, span)
    }

    fn here(&self) -> usize {
        self.function.len()
    }

    // ---- names ----

    /// Walk the visible scopes from the innermost outwards
    fn lookup(&self, name: Ident<'src>) -> Option<Symbol> {
        let mut skip = self.excluded == Some(name);
        let scopes = self.locals.iter().rev().chain(std::iter::once(&self.globals));
        for scope in scopes {
            if let Some(entry) = scope.get(&name) {
                if skip {
                    skip = false;
                    continue;
                }
                return Some(Symbol::from_entry(entry));
            }
        }
        None
    }

    fn declare_local(&mut self, name: Ident<'src>, entry: ScopeEntry<'src>) {
        let Some(scope) = self.locals.last_mut() else {
            return;
        };
        if let Some(previous) = scope.get(&name) {
            let error = AnalysisError::Redefinition {
                name: name.to_string(),
                span: entry.name_span,
                original: previous.name_span,
            };
            self.errors.push(error.into());
        }
        if let Some(scope) = self.locals.last_mut() {
            scope.insert(name, entry);
        }
    }

    // ---- globals ----

    /// Give every global variable its slot range, in declaration order
    fn allocate_globals(&mut self, roots: &[NodeId]) {
        let ast = self.ast;
        let mut offset = 0;
        for &root in roots {
            for name in declared_names(ast, root) {
                let Some(entry) = self.globals.get_mut(&name) else {
                    continue;
                };
                if entry.kind != SymbolKind::Var || entry.node != root {
                    continue;
                }

                let size = entry.var_type().map_or(TypeDesc::SLOT_SIZE, TypeDesc::size);
                entry.storage = Some(Storage::Static { offset });
                offset += size;
                let slots = (size / TypeDesc::SLOT_SIZE) as usize;
                self.program.globals.extend(std::iter::repeat(0).take(slots));
                tracing::trace!(%name, offset, size, "allocated global");
            }
        }
    }

    fn global_offset(&self, name: Ident<'src>, root: NodeId) -> Option<u64> {
        let entry = self.globals.get(&name)?;
        match (entry.kind, entry.storage) {
            (SymbolKind::Var, Some(Storage::Static { offset })) if entry.node == root => Some(offset),
            _ => None,
        }
    }

    /// Global initializers and top-level swaps go into the init function
    fn lower_init(&mut self, roots: &[NodeId]) {
        let ast = self.ast;
        self.function = IrFunction::new(IrProgram::INIT_NAME, 0, 0);
        let slots = self.program.globals.len() as u64;
        self.emit(Opcode::SetupGlobal, Operand::Unsigned(slots), Span::default());

        for &root in roots {
            let node = &ast[root];
            match node.kind {
                NodeKind::Declaration => {
                    let name = Ident::new(node.name());
                    let (Some(offset), Some(init)) = (self.global_offset(name, root), node.right) else {
                        continue;
                    };
                    if ast[init].kind == NodeKind::Block {
                        continue;
                    }
                    let is_array = self
                        .globals
                        .get(&name)
                        .and_then(ScopeEntry::var_type)
                        .is_some_and(TypeDesc::is_array);
                    if is_array {
                        self.error(LoweringError::ArrayInitializer {
                            name: name.to_string(),
                            span: ast.span(init),
                        });
                        continue;
                    }
                    if let Some(value) = integer_literal(ast, init) {
                        let slot = (offset / TypeDesc::SLOT_SIZE) as usize;
                        self.program.globals[slot] = value;
                        continue;
                    }

                    self.excluded = Some(name);
                    self.lower_value(init);
                    self.excluded = None;
                    let span = node.token.span;
                    self.emit(Opcode::PushGea, Operand::Unsigned(offset), span);
                    self.emit_op(Opcode::Store, span);
                }
                NodeKind::MultiDeclaration => {
                    let Some(values) = node.right else {
                        continue;
                    };
                    let found = self.lower_expr(values);
                    self.check_count(node.list.len(), found, values);
                    for &name in &node.list {
                        let token = ast[name].token;
                        match self.global_offset(Ident::new(token.text), root) {
                            Some(offset) => {
                                self.emit(Opcode::PushGea, Operand::Unsigned(offset), token.span);
                                self.emit_op(Opcode::Store, token.span);
                            }
                            None => {
                                self.emit_op(Opcode::Pop, token.span);
                            }
                        }
                    }
                }
                NodeKind::Swap => self.lower_swap(root),
                _ => {}
            }
        }

        self.emit_op(Opcode::Ret, Span::default());
        self.program.init = std::mem::take(&mut self.function);
    }

    // ---- functions ----

    fn lower_functions(&mut self, roots: &[NodeId]) {
        let ast = self.ast;
        for &root in roots {
            let node = &ast[root];
            if !matches!(node.kind, NodeKind::Declaration | NodeKind::ExternDeclaration) {
                continue;
            }
            let name = Ident::new(node.name());
            let Some(entry) = self.globals.get(&name) else {
                continue;
            };
            if entry.kind != SymbolKind::Func || entry.node != root {
                continue;
            }
            let Some(signature) = entry.signature().cloned() else {
                continue;
            };

            if signature.external {
                let function = IrFunction::external(
                    name.as_str(),
                    signature.params.len(),
                    signature.returns.len(),
                );
                self.program.functions.insert(name.to_string(), function);
            } else {
                self.lower_function(root, name, signature);
            }
        }
    }

    fn lower_function(&mut self, root: NodeId, name: Ident<'src>, signature: Signature<'src>) {
        let ast = self.ast;
        let node = &ast[root];
        let span = node.token.span;
        let Some(body) = node.right else {
            return;
        };

        tracing::debug!(%name, params = signature.params.len(), "lowering function");
        self.function = IrFunction::new(name.as_str(), signature.params.len(), signature.returns.len());
        self.returns = signature.returns.len();
        if self.returns > 1 {
            self.error(LoweringError::MultipleReturns {
                name: name.to_string(),
                span,
            });
        }

        self.emit_op(Opcode::StackFramePush, span);
        self.locals.push(Scope::new());

        let param_nodes = node
            .center
            .and_then(|ty| ast[ty].left)
            .map(|params| ast[params].list.as_slice())
            .unwrap_or_default();
        for (i, (param_name, desc)) in signature.params.into_iter().enumerate() {
            let param = param_nodes.get(i).copied().unwrap_or(root);
            let param_span = ast[param].token.span;

            let offset = self.function.alloc(TypeDesc::SLOT_SIZE, param_span);
            self.emit(Opcode::PushSea, Operand::Unsigned(offset), param_span);
            self.emit_op(Opcode::Store, param_span);

            // array parameters arrive as pointers
            let desc = match desc.array_len {
                Some(_) => TypeDesc {
                    pointer_depth: desc.pointer_depth + 1,
                    array_len: None,
                    ..desc
                },
                None => desc,
            };
            let mut entry = ScopeEntry::new(SymbolKind::Var, param, param_span, SymbolData::Var(desc));
            entry.storage = Some(Storage::Stack { offset });
            self.declare_local(param_name, entry);
        }

        self.lower_block(body);

        let end = ast.span(body);
        if self.returns == 0 {
            self.emit_op(Opcode::StackFramePop, end);
            self.emit_op(Opcode::Ret, end);
        } else {
            // falling off the end of a function with a result is a bug in the program
            self.emit_op(Opcode::Brk, end);
        }

        self.locals.clear();
        self.loops.clear();
        let function = std::mem::take(&mut self.function);
        self.program.functions.insert(name.to_string(), function);
    }

    // ---- statements ----

    fn lower_statement(&mut self, id: NodeId) {
        let ast = self.ast;
        let node = &ast[id];
        let span = node.token.span;
        match node.kind {
            NodeKind::Error => {
                self.emit_op(Opcode::Invalid, span);
            }
            NodeKind::Block => self.lower_block(id),
            NodeKind::If => self.lower_if(id),
            NodeKind::While => self.lower_while(id),
            NodeKind::Return => self.lower_return(id),
            NodeKind::Break | NodeKind::Continue => self.lower_loop_jump(id),
            NodeKind::ExprStmt => {
                let Some(expr) = node.left else {
                    return;
                };
                let count = self.lower_expr(expr);
                for _ in 0..count {
                    self.emit_op(Opcode::Pop, span);
                }
            }
            NodeKind::Swap => self.lower_swap(id),
            NodeKind::Declaration => self.lower_local_declaration(id),
            NodeKind::MultiDeclaration => self.lower_local_multi_declaration(id),
            NodeKind::ExternDeclaration => self.error(LoweringError::NestedFunction {
                name: node.name().to_string(),
                span,
            }),
            NodeKind::Struct | NodeKind::Union | NodeKind::Enum => {
                let entry = ScopeEntry::new(SymbolKind::Type, id, span, SymbolData::None);
                self.declare_local(Ident::new(node.name()), entry);
            }
            NodeKind::Use => {
                let path: Vec<_> = node.list.iter().map(|&seg| Ident::new(ast[seg].name())).collect();
                if let Some(name_node) = node.right.or(node.list.last().copied()) {
                    let token = ast[name_node].token;
                    let entry = ScopeEntry::new(
                        SymbolKind::Namespace,
                        id,
                        token.span,
                        SymbolData::Namespace(path),
                    );
                    self.declare_local(Ident::new(token.text), entry);
                }
            }
            _ => {
                let count = self.lower_expr(id);
                for _ in 0..count {
                    self.emit_op(Opcode::Pop, span);
                }
            }
        }
    }

    fn lower_block(&mut self, id: NodeId) {
        let ast = self.ast;
        self.lower_scoped(&ast[id].list, ast.span(id));
    }

    /// The body of an `if`, `else` or `while`, a block or a single statement
    fn lower_branch(&mut self, id: NodeId) {
        let ast = self.ast;
        if ast[id].kind == NodeKind::Block {
            self.lower_block(id);
        } else {
            self.lower_scoped(std::slice::from_ref(&id), ast.span(id));
        }
    }

    /// Lower statements in a scope of their own and release what they allocated
    fn lower_scoped(&mut self, statements: &[NodeId], end: Span) {
        let before = self.function.stack_index;
        self.locals.push(Scope::new());

        for &stmt in statements {
            self.lower_statement(stmt);
        }

        self.locals.pop();
        let allocated = self.function.stack_index - before;
        if allocated > 0 {
            self.emit(Opcode::Free, Operand::Unsigned(allocated), end);
        }
        self.function.stack_index = before;
    }

    fn lower_if(&mut self, id: NodeId) {
        let ast = self.ast;
        let node = &ast[id];
        let span = node.token.span;
        let (Some(condition), Some(then_branch)) = (node.left, node.center) else {
            self.emit_op(Opcode::Invalid, span);
            return;
        };

        self.lower_value(condition);
        let skip_then = self.function.emit_jump(Opcode::JumpIfNot, span);
        self.lower_branch(then_branch);

        match node.right {
            Some(else_branch) => {
                let skip_else = self.function.emit_jump(Opcode::Jump, span);
                let else_start = self.here();
                self.function.patch_jump(skip_then, else_start);
                self.lower_branch(else_branch);
                let end = self.here();
                self.function.patch_jump(skip_else, end);
            }
            None => {
                let end = self.here();
                self.function.patch_jump(skip_then, end);
            }
        }
    }

    fn lower_while(&mut self, id: NodeId) {
        let ast = self.ast;
        let node = &ast[id];
        let span = node.token.span;
        let (Some(condition), Some(body)) = (node.left, node.right) else {
            self.emit_op(Opcode::Invalid, span);
            return;
        };

        let start = self.here();
        self.lower_value(condition);
        let exit = self.function.emit_jump(Opcode::JumpIfNot, span);

        self.loops.push(LoopContext {
            start,
            stack_base: self.function.stack_index,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
        self.lower_branch(body);
        let Some(context) = self.loops.pop() else {
            return;
        };

        self.function.emit_jump_to(Opcode::Jump, start, span);
        let end = self.here();
        self.function.patch_jump(exit, end);
        for jump in context.breaks {
            self.function.patch_jump(jump, end);
        }
        for jump in context.continues {
            self.function.patch_jump(jump, context.start);
        }
    }

    fn lower_loop_jump(&mut self, id: NodeId) {
        let ast = self.ast;
        let node = &ast[id];
        let span = node.token.span;
        let is_break = node.kind == NodeKind::Break;

        let Some(stack_base) = self.loops.last().map(|context| context.stack_base) else {
            self.error(LoweringError::OutsideLoop {
                keyword: node.token.text.to_string(),
                span,
            });
            return;
        };

        let allocated = self.function.stack_index - stack_base;
        if allocated > 0 {
            self.emit(Opcode::Free, Operand::Unsigned(allocated), span);
        }
        let jump = self.function.emit_jump(Opcode::Jump, span);
        if let Some(context) = self.loops.last_mut() {
            if is_break {
                context.breaks.push(jump);
            } else {
                context.continues.push(jump);
            }
        }
    }

    fn lower_return(&mut self, id: NodeId) {
        let ast = self.ast;
        let node = &ast[id];
        let span = node.token.span;

        let found = match node.left {
            Some(values) => self.lower_expr(values),
            None => 0,
        };
        if found > 1 {
            self.error(LoweringError::MultipleReturns {
                name: self.function.name.clone(),
                span,
            });
        } else if found != self.returns && !ast.is_error(id) {
            self.error(LoweringError::ReturnCount {
                expected: self.returns,
                found,
                span,
            });
        }

        if self.function.stack_index > 0 {
            let allocated = self.function.stack_index;
            self.emit(Opcode::Free, Operand::Unsigned(allocated), span);
        }
        self.emit_op(Opcode::StackFramePop, span);
        self.emit_op(Opcode::Ret, span);
    }

    fn lower_local_declaration(&mut self, id: NodeId) {
        let ast = self.ast;
        let node = &ast[id];
        let name = Ident::new(node.name());
        let span = node.token.span;

        let Some(ty) = node.center.filter(|&ty| !ast.is_error(ty)) else {
            self.declare_local(name, ScopeEntry::error(id, span));
            return;
        };
        if ast[ty].kind == NodeKind::FunctionType {
            self.error(LoweringError::NestedFunction {
                name: name.to_string(),
                span,
            });
            self.declare_local(name, ScopeEntry::error(id, span));
            return;
        }
        let Some(desc) = self.local_type(ty) else {
            self.declare_local(name, ScopeEntry::error(id, span));
            return;
        };

        let offset = self.function.alloc(desc.size(), span);
        let is_array = desc.is_array();
        let mut entry = ScopeEntry::new(SymbolKind::Var, id, span, SymbolData::Var(desc));
        entry.storage = Some(Storage::Stack { offset });
        self.declare_local(name, entry);

        let Some(init) = node.right else {
            return;
        };
        if ast[init].kind == NodeKind::Block {
            self.error(
                AnalysisError::BlockInitializer {
                    name: name.to_string(),
                    span: ast.span(init),
                }
                .into(),
            );
            return;
        }
        if is_array {
            self.error(LoweringError::ArrayInitializer {
                name: name.to_string(),
                span: ast.span(init),
            });
            return;
        }

        self.excluded = Some(name);
        self.lower_value(init);
        self.excluded = None;
        self.emit(Opcode::PushSea, Operand::Unsigned(offset), span);
        self.emit_op(Opcode::Store, span);
    }

    fn lower_local_multi_declaration(&mut self, id: NodeId) {
        let ast = self.ast;
        let node = &ast[id];
        let types: &[NodeId] = match node.center {
            Some(types) if !ast.is_error(types) => &ast[types].list,
            _ => &[],
        };
        let shared = types.len() == 1;
        if !shared && types.len() != node.list.len() {
            if let Some(types_node) = node.center.filter(|&t| !ast.is_error(t)) {
                let error = AnalysisError::TypeCount {
                    names: node.list.len(),
                    types: types.len(),
                    span: ast.span(types_node),
                };
                self.error(error.into());
            }
            return;
        }

        let mut offsets = Vec::with_capacity(node.list.len());
        for (i, &name_node) in node.list.iter().enumerate() {
            let token = ast[name_node].token;
            let ty = if shared { types[0] } else { types[i] };
            let desc = self.local_type(ty).unwrap_or(TypeDesc {
                base: BaseType::Named(Ident::new(token.text)),
                pointer_depth: 0,
                array_len: None,
            });

            let offset = self.function.alloc(desc.size(), token.span);
            let mut entry = ScopeEntry::new(SymbolKind::Var, id, token.span, SymbolData::Var(desc));
            entry.storage = Some(Storage::Stack { offset });
            self.declare_local(Ident::new(token.text), entry);
            offsets.push((offset, token.span));
        }

        let Some(values) = node.right else {
            return;
        };
        let found = self.lower_expr(values);
        self.check_count(offsets.len(), found, values);
        for (offset, span) in offsets {
            self.emit(Opcode::PushSea, Operand::Unsigned(offset), span);
            self.emit_op(Opcode::Store, span);
        }
    }

    /// Describe a local type and check the names it mentions
    fn local_type(&mut self, ty: NodeId) -> Option<TypeDesc<'src>> {
        let mut refs = Vec::new();
        let desc = match describe_type(self.ast, ty, &mut refs) {
            Ok(desc) => desc,
            Err(error) => {
                self.error(error.into());
                return None;
            }
        };

        let mut resolved = true;
        for (name, span) in refs {
            let error = match self.lookup(name) {
                Some(symbol) if matches!(symbol.kind, SymbolKind::Type | SymbolKind::Error) => continue,
                Some(symbol) => AnalysisError::NotAType {
                    name: name.to_string(),
                    span,
                    declaration: symbol.name_span,
                },
                None => AnalysisError::UnknownType {
                    name: name.to_string(),
                    span,
                },
            };
            self.error(error.into());
            resolved = false;
        }
        resolved.then_some(desc)
    }

    fn check_count(&mut self, expected: usize, found: usize, values: NodeId) {
        if expected != found && !self.ast.is_error(values) {
            self.error(LoweringError::ValueCount {
                expected,
                found,
                span: self.ast.span(values),
            });
        }
    }

    /// `a, b = c, d`: all values first, then each target from left to right
    fn lower_swap(&mut self, id: NodeId) {
        let ast = self.ast;
        let node = &ast[id];
        let (Some(targets), Some(values)) = (node.left, node.right) else {
            self.emit_op(Opcode::Invalid, node.token.span);
            return;
        };

        let found = self.lower_expr(values);
        let targets = &ast[targets].list;
        self.check_count(targets.len(), found, values);
        for &target in targets {
            self.lower_store(target);
        }
    }

    // ---- expressions ----

    /// Generate code for an expression, returns how many values it leaves on the stack
    fn lower_expr(&mut self, id: NodeId) -> usize {
        let ast = self.ast;
        let node = &ast[id];
        let span = node.token.span;

        match node.kind {
            NodeKind::Error => {
                self.emit_op(Opcode::Invalid, span);
                1
            }
            NodeKind::Primary => {
                self.lower_primary(id);
                1
            }
            NodeKind::Unary(op) => {
                self.lower_unary(id, op);
                1
            }
            NodeKind::Binary(BinaryOp::Assign) => {
                let (Some(target), Some(value)) = (node.left, node.right) else {
                    return 0;
                };
                self.lower_value(value);
                self.lower_store(target);
                0
            }
            NodeKind::Binary(op @ (BinaryOp::And | BinaryOp::Or)) => {
                let (Some(left), Some(right)) = (node.left, node.right) else {
                    return 0;
                };
                self.lower_value(left);
                self.emit_op(Opcode::Clone, span);
                let jump = if op == BinaryOp::And {
                    Opcode::JumpIfNot
                } else {
                    Opcode::JumpIf
                };
                let short_circuit = self.function.emit_jump(jump, span);
                self.emit_op(Opcode::Pop, span);
                self.lower_value(right);
                let end = self.here();
                self.function.patch_jump(short_circuit, end);
                1
            }
            NodeKind::Binary(BinaryOp::Member) => {
                self.error(LoweringError::MemberAccess { span });
                self.emit_op(Opcode::Invalid, span);
                1
            }
            NodeKind::Binary(op) => {
                let (Some(left), Some(right)) = (node.left, node.right) else {
                    return 0;
                };
                self.lower_value(right);
                self.lower_value(left);
                self.emit_op(binary_opcode(op), span);
                1
            }
            NodeKind::Call => self.lower_call(id),
            NodeKind::Index => {
                self.lower_index(id);
                1
            }
            NodeKind::Cast => match node.right {
                Some(operand) => self.lower_expr(operand),
                None => {
                    self.emit_op(Opcode::Invalid, span);
                    1
                }
            },
            NodeKind::ExprList => node.list.iter().rev().map(|&item| self.lower_expr(item)).sum(),
            NodeKind::Swap => {
                self.lower_swap(id);
                0
            }
            _ => {
                self.emit_op(Opcode::Invalid, span);
                1
            }
        }
    }

    /// Generate code for an expression that must leave exactly one value
    fn lower_value(&mut self, id: NodeId) {
        let count = self.lower_expr(id);
        if count == 1 || self.ast.is_error(id) {
            return;
        }
        self.error(LoweringError::ExpectedValue {
            span: self.ast.span(id),
        });
        if count == 0 {
            self.emit_op(Opcode::Invalid, self.ast[id].token.span);
        }
    }

    fn lower_primary(&mut self, id: NodeId) {
        let token = self.ast[id].token;
        let span = token.span;
        match (token.kind, token.literal) {
            (TokenKind::Ident, _) => self.lower_identifier(id),
            (TokenKind::Str, Literal::Text(text)) => {
                let label = self.program.strings.intern(text);
                self.emit(Opcode::PushGea, Operand::Str(label), span);
            }
            (_, Literal::Unsigned(value)) => {
                self.emit(Opcode::PushUnsign, Operand::Unsigned(value), span);
            }
            (_, Literal::Float(value)) => {
                self.emit(Opcode::PushUnsign, Operand::Unsigned(value.to_bits()), span);
            }
            _ => {
                self.emit_op(Opcode::Invalid, span);
            }
        }
    }

    fn lower_identifier(&mut self, id: NodeId) {
        let token = self.ast[id].token;
        let name = Ident::new(token.text);
        let span = token.span;

        let Some(symbol) = self.lookup(name) else {
            if let Some(builtin) = Builtin::from_name(token.text) {
                self.emit(Opcode::PushGea, Operand::Str(builtin.name().to_string()), span);
                return;
            }
            self.error(LoweringError::UnresolvedName {
                name: name.to_string(),
                span,
            });
            self.emit_op(Opcode::Invalid, span);
            return;
        };

        match symbol.kind {
            SymbolKind::Var => {
                let (op, offset) = match (symbol.storage, symbol.is_array) {
                    (Some(Storage::Stack { offset }), false) => (Opcode::PushStack, offset),
                    (Some(Storage::Stack { offset }), true) => (Opcode::PushSea, offset),
                    (Some(Storage::Static { offset }), false) => (Opcode::PushGlobal, offset),
                    (Some(Storage::Static { offset }), true) => (Opcode::PushGea, offset),
                    (None, _) => {
                        self.error(LoweringError::UnresolvedName {
                            name: name.to_string(),
                            span,
                        });
                        self.emit_op(Opcode::Invalid, span);
                        return;
                    }
                };
                self.emit(op, Operand::Unsigned(offset), span);
            }
            SymbolKind::Func | SymbolKind::Prototype => {
                self.emit(Opcode::PushGea, Operand::Str(name.to_string()), span);
            }
            SymbolKind::Type | SymbolKind::Namespace => {
                self.error(LoweringError::NotAValue {
                    name: name.to_string(),
                    span,
                    declaration: symbol.name_span,
                });
                self.emit_op(Opcode::Invalid, span);
            }
            SymbolKind::Error => {
                self.emit_op(Opcode::Invalid, span);
            }
        }
    }

    fn lower_unary(&mut self, id: NodeId, op: UnaryOp) {
        let ast = self.ast;
        let node = &ast[id];
        let span = node.token.span;
        let Some(operand) = node.left else {
            self.emit_op(Opcode::Invalid, span);
            return;
        };

        match op {
            UnaryOp::Neg => {
                self.lower_value(operand);
                self.emit_op(Opcode::Neg, span);
            }
            UnaryOp::Not => {
                self.lower_value(operand);
                self.emit_op(Opcode::LogNot, span);
            }
            UnaryOp::BitNot => {
                self.lower_value(operand);
                self.emit_op(Opcode::BitNot, span);
            }
            UnaryOp::Deref => {
                self.lower_value(operand);
                self.emit_op(Opcode::Load, span);
            }
            UnaryOp::AddressOf => {
                self.lower_value(operand);
                self.convert_lvalue(operand, LvalueMode::Address);
            }
        }
    }

    /// Compile `target` and turn it into a store of the value below it
    fn lower_store(&mut self, target: NodeId) {
        self.lower_value(target);
        self.convert_lvalue(target, LvalueMode::Store);
    }

    /// Rewrite the instruction that produced `expr`
    fn convert_lvalue(&mut self, expr: NodeId, mode: LvalueMode) {
        if self.ast.is_error(expr) {
            return;
        }
        // already reported
        let last_op = self.function.last().map(|last| self.function.get(last).op);
        if last_op == Some(Opcode::Invalid) {
            return;
        }
        let converted = match self.function.last() {
            Some(last) if is_place(self.ast, expr) => self.function.to_lvalue(last, mode).ok(),
            _ => None,
        };
        if converted.is_none() {
            let span = self.ast.span(expr);
            self.error(LoweringError::NotAnLvalue { span });
            self.emit_op(Opcode::Invalid, span);
        }
    }

    fn lower_call(&mut self, id: NodeId) -> usize {
        let ast = self.ast;
        let node = &ast[id];
        let span = ast.span(id);
        let Some(callee) = node.left else {
            self.emit_op(Opcode::Invalid, span);
            return 1;
        };

        // first argument ends up on top
        for &arg in node.list.iter().rev() {
            self.lower_value(arg);
        }
        self.lower_value(callee);
        if ast.is_error(callee) {
            return 1;
        }

        let Some(last) = self.function.last() else {
            return 1;
        };
        let callee_token = ast[callee].token;
        let instr = self.function.get(last);
        let callee_name = match (instr.op, &instr.operand) {
            (Opcode::Invalid, _) => return 1,
            (Opcode::PushGea, Operand::Str(name)) if callee_token.is(TokenKind::Ident) => Some(name.clone()),
            _ => None,
        };
        let Some(name) = callee_name else {
            self.error(LoweringError::NotCallable {
                span: ast.span(callee),
            });
            self.emit_op(Opcode::Invalid, span);
            return 1;
        };

        let (params, returns) = match self.lookup(Ident::new(callee_token.text)) {
            Some(symbol) if symbol.kind == SymbolKind::Prototype => {
                self.error(LoweringError::PrototypeWithoutBody {
                    name: name.clone(),
                    span,
                    prototype: symbol.name_span,
                });
                (symbol.params, symbol.returns)
            }
            Some(symbol) => (symbol.params, symbol.returns),
            None => match Builtin::from_name(&name) {
                Some(builtin) => (builtin.param_count(), builtin.return_count()),
                None => (node.list.len(), 1),
            },
        };

        if params != node.list.len() {
            self.error(LoweringError::ArgumentCount {
                name: name.clone(),
                expected: params,
                found: node.list.len(),
                span,
            });
        }

        let call = self.function.get_mut(last);
        call.op = Opcode::Call;
        call.operand = Operand::Str(name);
        returns
    }

    /// `a[i]` reads the slot at `a + 8 * i`
    fn lower_index(&mut self, id: NodeId) {
        let ast = self.ast;
        let node = &ast[id];
        let span = node.token.span;
        let (Some(base), Some(&index)) = (node.left, node.list.first()) else {
            self.emit_op(Opcode::Invalid, span);
            return;
        };
        if node.list.len() > 1 {
            self.error(LoweringError::IndexCount { span: ast.span(id) });
        }

        self.lower_value(index);
        self.emit(Opcode::PushUnsign, Operand::Unsigned(TypeDesc::SLOT_SIZE), span);
        self.emit_op(Opcode::Mul, span);
        self.lower_value(base);
        self.emit_op(Opcode::Add, span);
        self.emit_op(Opcode::Load, span);
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::ShiftLeft => Opcode::ShiftLeft,
        BinaryOp::ShiftRight => Opcode::ShiftRight,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::BitXor => Opcode::BitXor,
        BinaryOp::Equals => Opcode::CmpEq,
        BinaryOp::NotEquals => Opcode::CmpNeq,
        BinaryOp::Less => Opcode::CmpLt,
        BinaryOp::Greater => Opcode::CmpGt,
        BinaryOp::LessEq => Opcode::CmpLte,
        BinaryOp::GreaterEq => Opcode::CmpGte,
        BinaryOp::Assign | BinaryOp::And | BinaryOp::Or | BinaryOp::Member => Opcode::Invalid,
    }
}

/// Whether `id` names a storage location: a variable, a dereference or an element
fn is_place(ast: &Ast, id: NodeId) -> bool {
    let node = &ast[id];
    match node.kind {
        NodeKind::Primary => node.token.is(TokenKind::Ident),
        NodeKind::Unary(UnaryOp::Deref) | NodeKind::Index => true,
        NodeKind::Cast => node.right.is_some_and(|operand| is_place(ast, operand)),
        _ => false,
    }
}

/// Value of an integer (or boolean) literal node
fn integer_literal(ast: &Ast, id: NodeId) -> Option<u64> {
    let node = &ast[id];
    match (node.kind, node.token.kind, node.token.literal) {
        (
            NodeKind::Primary,
            TokenKind::Integer | TokenKind::True | TokenKind::False,
            Literal::Unsigned(value),
        ) => Some(value),
        _ => None,
    }
}

/// Names a top-level declaration introduces as variables
fn declared_names<'src>(ast: &Ast<'src>, root: NodeId) -> Vec<Ident<'src>> {
    let node = &ast[root];
    match node.kind {
        NodeKind::Declaration => vec![Ident::new(node.name())],
        NodeKind::MultiDeclaration => node.list.iter().map(|&name| Ident::new(ast[name].name())).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::analysis::build_global_scope;
    use crate::parsing::parse;

    fn lower_source(source: &str) -> Lowered {
        let parsed = parse(source);
        assert_eq!(parsed.errors, vec![]);
        let analysis = build_global_scope(&parsed.ast, &parsed.roots);
        lower(&parsed.ast, &parsed.roots, analysis.scope)
    }

    fn ops(function: &IrFunction) -> Vec<Opcode> {
        function.code.iter().map(|instr| instr.op).collect()
    }

    #[test]
    fn literal_global_goes_into_slot() {
        let lowered = lower_source("x : u64 = 5;");
        assert_eq!(lowered.errors, vec![]);
        assert_eq!(lowered.program.globals, vec![5]);
        assert_eq!(ops(&lowered.program.init), vec![Opcode::SetupGlobal, Opcode::Ret]);
        assert_eq!(lowered.program.init.code[0].operand, Operand::Unsigned(1));
    }

    #[test]
    fn computed_global_goes_into_init() {
        let lowered = lower_source("x : u64 = 5; y : u64 = x * 2;");
        assert_eq!(lowered.errors, vec![]);
        assert_eq!(lowered.program.globals, vec![5, 0]);
        assert_eq!(
            ops(&lowered.program.init),
            vec![
                Opcode::SetupGlobal,
                Opcode::PushUnsign,
                Opcode::PushGlobal,
                Opcode::Mul,
                Opcode::PushGea,
                Opcode::Store,
                Opcode::Ret
            ]
        );
        assert_eq!(lowered.program.init.code[4].operand, Operand::Unsigned(8));
    }

    #[test]
    fn function_shape() {
        let lowered = lower_source("main : () -> u64 = { return 1 + 2; }");
        assert_eq!(lowered.errors, vec![]);
        let main = &lowered.program.functions["main"];
        assert_eq!(
            ops(main),
            vec![
                Opcode::StackFramePush,
                Opcode::PushUnsign,
                Opcode::PushUnsign,
                Opcode::Add,
                Opcode::StackFramePop,
                Opcode::Ret,
                Opcode::Brk
            ]
        );
        // right operand first
        assert_eq!(main.code[1].operand, Operand::Unsigned(2));
        assert_eq!(main.code[2].operand, Operand::Unsigned(1));
    }

    #[test]
    fn parameters_are_spilled() {
        let lowered = lower_source("add : (a: u64, b: u64) -> u64 = { return a - b; }");
        assert_eq!(lowered.errors, vec![]);
        let add = &lowered.program.functions["add"];
        assert_eq!(
            ops(add)[..7],
            [
                Opcode::StackFramePush,
                Opcode::Alloc,
                Opcode::PushSea,
                Opcode::Store,
                Opcode::Alloc,
                Opcode::PushSea,
                Opcode::Store
            ]
        );
        assert_eq!(add.frame_size, 16);
        assert_eq!(add.params, 2);
    }

    #[test]
    fn if_else_jumps() {
        let lowered = lower_source(
            "a, b : u64;
             f : () = { if (a > 0) { b = 1; } else { b = 2; } }",
        );
        assert_eq!(lowered.errors, vec![]);
        let f = &lowered.program.functions["f"];

        let conditional: Vec<_> = f.code.iter().filter(|i| i.op == Opcode::JumpIfNot).collect();
        let unconditional: Vec<_> = f.code.iter().filter(|i| i.op == Opcode::Jump).collect();
        assert_eq!(conditional.len(), 1);
        assert_eq!(unconditional.len(), 1);

        // the else branch starts right after the unconditional jump
        let else_start = unconditional[0].index + 1;
        assert_eq!(f.jump_target(conditional[0].index), Some(else_start));
        assert_eq!(f.code[else_start].op, Opcode::PushUnsign);
        assert_eq!(f.code[else_start].operand, Operand::Unsigned(2));

        let after_else = f.jump_target(unconditional[0].index).unwrap();
        assert_eq!(f.code[after_else - 1].op, Opcode::Store);
        assert_eq!(f.code[after_else].op, Opcode::StackFramePop);
    }

    #[test]
    fn patched_jumps_stay_in_bounds() {
        let lowered = lower_source(
            "f : (n: u64) -> u64 = {
                 i : u64 = 0;
                 while i < n {
                     j : u64 = i;
                     if j == 3 { break; }
                     if j == 1 { i = i + 2; continue; }
                     i = i + 1;
                 }
                 return i && n || 0;
             }",
        );
        assert_eq!(lowered.errors, vec![]);
        let f = &lowered.program.functions["f"];
        for instr in f.code.iter().filter(|instr| instr.op.is_jump()) {
            let Operand::Signed(offset) = instr.operand else {
                panic!("jump without offset");
            };
            let target = instr.index as i64 + 1 + offset;
            assert!(target >= 0 && target <= f.code.len() as i64);
        }
    }

    #[test]
    fn break_frees_loop_locals() {
        let lowered = lower_source(
            "f : () = {
                 while 1 {
                     x : u64 = 1;
                     break;
                 }
             }",
        );
        assert_eq!(lowered.errors, vec![]);
        let f = &lowered.program.functions["f"];
        let brk = f
            .code
            .windows(2)
            .find(|pair| pair[0].op == Opcode::Free && pair[1].op == Opcode::Jump)
            .unwrap();
        assert_eq!(brk[0].operand, Operand::Unsigned(8));
    }

    #[test]
    fn swap_compiles_values_first() {
        let lowered = lower_source("a, b : u64 = 1, 2; a, b = b, a;");
        assert_eq!(lowered.errors, vec![]);
        let init = ops(&lowered.program.init);
        assert_eq!(
            init[init.len() - 7..],
            [
                Opcode::PushGlobal,
                Opcode::PushGlobal,
                Opcode::PushGea,
                Opcode::Store,
                Opcode::PushGea,
                Opcode::Store,
                Opcode::Ret
            ]
        );
    }

    #[test]
    fn assignments_rewrite_targets() {
        let lowered = lower_source(
            "g : u64;
             f : (p: ^u64) = {
                 arr : [4]u64;
                 g = 1;
                 ^p = 2;
                 arr[1] = 3;
             }",
        );
        assert_eq!(lowered.errors, vec![]);
        let f = ops(&lowered.program.functions["f"]);
        let stores = f.iter().filter(|&&op| op == Opcode::Store).count();
        // one for the parameter, three assignments
        assert_eq!(stores, 4);
        assert!(!f.contains(&Opcode::Load));
    }

    #[test]
    fn calls_are_resolved() {
        let lowered = lower_source(
            "twice : (x: u64) -> u64 = { return x * 2; }
             main : () -> u64 = { putchar(65); return twice(4); }",
        );
        assert_eq!(lowered.errors, vec![]);
        let main = &lowered.program.functions["main"];
        let calls: Vec<_> = main
            .code
            .iter()
            .filter(|instr| instr.op == Opcode::Call)
            .map(|instr| instr.operand.clone())
            .collect();
        assert_eq!(
            calls,
            vec![
                Operand::Str(String::from("putchar")),
                Operand::Str(String::from("twice"))
            ]
        );
        // putchar returns nothing, so nothing is popped after it
        assert!(!ops(main).contains(&Opcode::Pop));
    }

    #[test]
    fn strings_are_interned() {
        let lowered = lower_source(r#"a : ^u8 = "hey"; b : ^u8 = "hey";"#);
        assert_eq!(lowered.program.strings.len(), 1);
        let labels: Vec<_> = lowered
            .program
            .init
            .code
            .iter()
            .filter(|instr| matches!(&instr.operand, Operand::Str(_)))
            .collect();
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn negation_follows_its_operand() {
        let lowered = lower_source("main : () -> u64 = { return -5; }");
        let main = &lowered.program.functions["main"];
        assert_eq!(ops(main)[1..3], [Opcode::PushUnsign, Opcode::Neg]);
        assert_eq!(main.code[1].operand, Operand::Unsigned(5));
    }

    #[test]
    fn only_places_are_assignable() {
        for target in ["a && b", "a || b", "a + b", "f()", "(a || b)"] {
            let lowered = lower_source(&format!(
                "f : () -> u64 = {{ return 1; }}
                 main : () = {{ a : u64 = 0; b : u64 = 1; {target} = 5; }}"
            ));
            assert!(
                matches!(lowered.errors[..], [LoweringError::NotAnLvalue { .. }]),
                "{target}: {:?}",
                lowered.errors
            );
        }

        let lowered = lower_source("main : () = { a : u64 = 0; b : ^u64 = @(a || a); }");
        assert!(matches!(lowered.errors[..], [LoweringError::NotAnLvalue { .. }]));
    }

    #[test]
    fn places_through_casts_and_pointers() {
        let lowered = lower_source(
            "main : () = {
                 a : u64 = 0;
                 p : ^u64 = @a;
                 ^p = 2;
                 cast(u64) a = 3;
             }",
        );
        assert_eq!(lowered.errors, vec![]);
    }

    #[test]
    fn branch_declarations_release_their_slot() {
        let lowered = lower_source(
            "main : () = {
                 i : u64 = 0;
                 while i < 5 {
                     if i == 100 x : u64 = 1;
                     i = i + 1;
                 }
             }",
        );
        assert_eq!(lowered.errors, vec![]);
        let main = &lowered.program.functions["main"];
        let branch = main
            .code
            .windows(4)
            .rev()
            .find(|window| window[0].op == Opcode::Alloc && window[3].op == Opcode::Store)
            .map(|window| window[0].index)
            .unwrap();
        let skip = main
            .code
            .iter()
            .find(|instr| instr.op == Opcode::JumpIfNot && instr.index + 1 == branch)
            .unwrap();
        // the conditional jump lands right after the branch's own FREE
        let target = main.jump_target(skip.index).unwrap();
        assert_eq!(main.code[target - 1].op, Opcode::Free);
        assert_eq!(main.code[target - 1].operand, Operand::Unsigned(8));
    }

    #[test]
    fn global_arrays_reject_scalar_initializers() {
        let lowered = lower_source("arr : [4]u64 = 5;");
        assert!(matches!(
            &lowered.errors[..],
            [LoweringError::ArrayInitializer { name, .. }] if name == "arr"
        ));
        assert_eq!(lowered.program.globals, vec![0; 4]);
    }

    #[test]
    fn semantic_errors() {
        let lowered = lower_source(
            "proto : (x: u64) -> u64;
             Point : struct = { x : u64; }
             main : () -> u64 = {
                 missing = 1;
                 3 = 4;
                 y : u64 = Point;
                 break;
                 return proto(1, 2);
             }",
        );
        let errors = lowered.errors;
        assert!(matches!(&errors[0], LoweringError::UnresolvedName { name, .. } if name == "missing"));
        assert!(matches!(errors[1], LoweringError::NotAnLvalue { .. }));
        assert!(matches!(errors[2], LoweringError::NotAValue { .. }));
        assert!(matches!(errors[3], LoweringError::OutsideLoop { .. }));
        assert!(matches!(errors[4], LoweringError::PrototypeWithoutBody { .. }));
        assert!(matches!(
            errors[5],
            LoweringError::ArgumentCount {
                expected: 1,
                found: 2,
                ..
            }
        ));
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn member_access_is_rejected() {
        let lowered = lower_source("p : u64; main : () -> u64 = { return p.x; }");
        assert!(matches!(lowered.errors[0], LoweringError::MemberAccess { .. }));
    }

    #[test]
    fn shadow_exclusion_reads_outer_variable() {
        let lowered = lower_source(
            "x : u64 = 7;
             main : () -> u64 = { x : u64 = x + 1; return x; }",
        );
        assert_eq!(lowered.errors, vec![]);
        let main = &lowered.program.functions["main"];
        // the initializer reads the global, the return reads the local
        assert!(main.code.iter().any(|instr| instr.op == Opcode::PushGlobal));
        assert!(main.code.iter().any(|instr| instr.op == Opcode::PushStack));
    }

    #[test]
    fn extern_functions_are_empty() {
        let lowered = lower_source("write : extern (c: u64) -> u64;");
        let write = &lowered.program.functions["write"];
        assert!(write.is_external);
        assert!(write.code.is_empty());
        assert_eq!(write.returns, 1);
    }

    #[test]
    fn listing_is_readable() {
        let lowered = lower_source("main : () -> u64 = { return 3; }");
        let listing = lowered.program.to_string();
        assert!(listing.contains("fn main (params 0, returns 1, frame 0):"));
        assert!(listing.contains("PUSH_UNSIGN 3"));
        assert!(listing.contains(ir::IrProgram::INIT_NAME));
    }
}
