mod common;
use common::errors;
use solum::{AnalysisError, LoweringError, ParsingError, SolumError};

#[test]
fn unterminated_string() {
    let errs = errors(include_str!("fails/unterminated.slm"));
    assert!(matches!(errs[0], SolumError::Parsing(ParsingError::Lexical { .. })));
}

#[test]
fn syntax_errors() {
    let errs = errors(include_str!("fails/syntax.slm"));
    let syntax = errs
        .iter()
        .filter(|err| matches!(err, SolumError::Parsing(_)))
        .count();
    assert!(syntax >= 3);
}

#[test]
fn redefinition() {
    let errs = errors(include_str!("fails/redefinition.slm"));
    assert!(matches!(
        errs[..],
        [SolumError::Analysis(AnalysisError::Redefinition { .. })]
    ));
}

#[test]
fn unknown_type() {
    let errs = errors(include_str!("fails/unknown-type.slm"));
    assert!(matches!(
        errs[..],
        [SolumError::Analysis(AnalysisError::UnknownType { .. })]
    ));
}

#[test]
fn not_an_lvalue() {
    let errs = errors(include_str!("fails/not-an-lvalue.slm"));
    assert!(matches!(
        errs[..],
        [SolumError::Lowering(LoweringError::NotAnLvalue { .. })]
    ));
}

#[test]
fn conditions_are_not_assignable() {
    let errs = errors(include_str!("fails/assign-to-condition.slm"));
    assert!(matches!(
        errs[..],
        [
            SolumError::Lowering(LoweringError::NotAnLvalue { .. }),
            SolumError::Lowering(LoweringError::NotAnLvalue { .. })
        ]
    ));
}

#[test]
fn address_of_a_condition() {
    let errs = errors("main : () -> u64 = { a : u64 = 1; p : ^u64 = @(a || a); return ^p; }");
    assert!(matches!(
        errs[..],
        [SolumError::Lowering(LoweringError::NotAnLvalue { .. })]
    ));
}

#[test]
fn second_definitions() {
    let errs = errors(include_str!("fails/second-body.slm"));
    let names: Vec<_> = errs
        .iter()
        .map(|err| match err {
            SolumError::Analysis(AnalysisError::Redefinition { name, .. }) => name.as_str(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(names, ["f", "x"]);
}

#[test]
fn global_array_with_scalar_initializer() {
    let errs = errors("arr : [4]u64 = 5;");
    assert!(matches!(
        &errs[..],
        [SolumError::Lowering(LoweringError::ArrayInitializer { name, .. })] if name == "arr"
    ));
}

#[test]
fn unresolved_name() {
    let errs = errors(include_str!("fails/unresolved.slm"));
    assert!(matches!(
        &errs[..],
        [SolumError::Lowering(LoweringError::UnresolvedName { name, .. })] if name == "y"
    ));
}

#[test]
fn prototype_without_body() {
    let errs = errors(include_str!("fails/prototype.slm"));
    assert!(errs
        .iter()
        .any(|err| matches!(err, SolumError::Lowering(LoweringError::PrototypeWithoutBody { .. }))));
    // the unused prototype warning comes along
    assert!(errs.iter().any(|err| !err.is_fatal()));
}

#[test]
fn break_outside_loop() {
    let errs = errors(include_str!("fails/outside-loop.slm"));
    assert!(matches!(
        errs[..],
        [SolumError::Lowering(LoweringError::OutsideLoop { .. })]
    ));
}

#[test]
fn multiple_returns() {
    let errs = errors("pair : () -> u64, u64 = { return 1; }");
    assert!(errs
        .iter()
        .any(|err| matches!(err, SolumError::Lowering(LoweringError::MultipleReturns { .. }))));
}

#[test]
fn errors_render_with_source() {
    let failure = solum::compile("broken.slm", "main : () -> u64 = { return y; }").unwrap_err();
    let report = format!("{:?}", miette::Report::new(failure));
    assert!(report.contains("broken.slm"));
    assert!(report.contains("Cannot find `y` in this scope"));
}
