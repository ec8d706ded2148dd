mod common;
use common::{compile, errors};
use pretty_assertions::assert_eq;
use solum::analysis::{BaseType, SymbolKind};
use solum::parsing::parse;
use solum::{build_global_scope, AnalysisError, Ident, PrimitiveType, SolumError};

#[test]
fn single_global() {
    let parsed = parse("x : u64 = 5;");
    let analysis = build_global_scope(&parsed.ast, &parsed.roots);
    assert_eq!(analysis.errors, vec![]);
    assert_eq!(analysis.scope.len(), 1);
    assert_eq!(analysis.scope.get(&Ident::new("x")).unwrap().kind, SymbolKind::Var);

    let program = compile("x : u64 = 5;").program;
    assert_eq!(program.globals, vec![5]);
}

#[test]
fn identical_redeclaration_is_accepted() {
    let compilation = compile("x : u64; x : u64; main : () -> u64 = { return x; }");
    assert_eq!(compilation.warnings, vec![]);
    assert_eq!(compilation.program.globals.len(), 1);
}

#[test]
fn conflicting_redeclaration() {
    let parsed = parse(include_str!("fails/redefinition.slm"));
    let analysis = build_global_scope(&parsed.ast, &parsed.roots);
    assert_eq!(analysis.errors.len(), 1);
    assert!(matches!(&analysis.errors[0], AnalysisError::Redefinition { name, .. } if name == "x"));

    // the first declaration wins
    let entry = analysis.scope.get(&Ident::new("x")).unwrap();
    let ty = entry.var_type().unwrap();
    assert_eq!(ty.base, BaseType::Primitive(PrimitiveType::U64));
}

#[test]
fn unknown_types_become_errors() {
    let parsed = parse(include_str!("fails/unknown-type.slm"));
    let analysis = build_global_scope(&parsed.ast, &parsed.roots);
    assert!(matches!(&analysis.errors[..], [AnalysisError::UnknownType { name, .. }] if name == "Missing"));
    assert_eq!(analysis.scope.get(&Ident::new("v")).unwrap().kind, SymbolKind::Error);
}

#[test]
fn aggregates_and_imports() {
    let parsed = parse(include_str!("testfiles/aggregates.slm"));
    let analysis = build_global_scope(&parsed.ast, &parsed.roots);
    assert_eq!(analysis.errors, vec![]);

    let kind = |name| analysis.scope.get(&Ident::new(name)).unwrap().kind;
    assert_eq!(kind("Point"), SymbolKind::Type);
    assert_eq!(kind("Color"), SymbolKind::Type);
    assert_eq!(kind("Vector"), SymbolKind::Type);
    assert_eq!(kind("io"), SymbolKind::Namespace);
    assert_eq!(kind("origin"), SymbolKind::Var);
    // declared before its type
    assert_eq!(kind("later"), SymbolKind::Var);
    assert_eq!(kind("main"), SymbolKind::Func);
}

#[test]
fn unused_prototype_is_a_warning() {
    let compilation = compile("helper : (x: u64) -> u64; main : () -> u64 = { return 0; }");
    assert_eq!(compilation.warnings.len(), 1);
    assert!(!compilation.warnings[0].is_fatal());
    assert!(matches!(
        compilation.warnings[0],
        SolumError::Analysis(AnalysisError::UnusedPrototype { .. })
    ));
}

#[test]
fn function_as_type() {
    let errs = errors("f : () = { } x : f;");
    assert!(errs
        .iter()
        .any(|err| matches!(err, SolumError::Analysis(AnalysisError::FunctionAsType { .. }))));
}
