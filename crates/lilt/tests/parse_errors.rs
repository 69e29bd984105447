use lilt::{Engine, EngineError, Severity};

/// Helper to collect the parse diagnostics of a failing source.
fn parse_diagnostics(source: &str) -> Vec<String> {
    let mut engine = Engine::new();
    match engine.run(source, "test.lt") {
        Err(EngineError::Parse(diagnostics)) => diagnostics.iter().map(ToString::to_string).collect(),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn lexer_errors_surface_with_positions() {
    let messages = parse_diagnostics("var x = 3.25Lf");
    assert!(
        messages.iter().any(|m| m.contains("not supported")),
        "got: {messages:?}"
    );
    assert!(messages.iter().any(|m| m.contains("test.lt:1")), "got: {messages:?}");
}

#[test]
fn parser_recovers_and_reports_several_errors() {
    // Two independent problems in one source; recovery must reach both.
    let source = "var = 1\nvar y = 99999999999999999999999\n";
    let messages = parse_diagnostics(source);
    assert!(messages.len() >= 2, "expected two diagnostics, got: {messages:?}");
}

#[test]
fn assigning_to_a_const_is_rejected() {
    let messages = parse_diagnostics("const pi = 3\npi = 4\n");
    assert!(
        messages.iter().any(|m| m.contains("cannot be assigned")),
        "got: {messages:?}"
    );
}

#[test]
fn redeclaring_a_const_is_rejected() {
    let messages = parse_diagnostics("const pi = 3\nvar pi = 4\n");
    assert!(
        messages.iter().any(|m| m.contains("already declared")),
        "got: {messages:?}"
    );
}

#[test]
fn duplicate_till_flags_are_rejected() {
    let messages = parse_diagnostics("till done, done do 1\n");
    assert!(
        messages.iter().any(|m| m.contains("Duplicate till flag")),
        "got: {messages:?}"
    );
}

#[test]
fn unknown_when_flag_is_a_compile_error() {
    let mut engine = Engine::new();
    let error = engine
        .run("till done do done\nwhen done 1\nwhen other 2\n", "test.lt")
        .expect_err("must fail");
    let rendered = format!("{error}");
    assert!(rendered.contains("unknown flag"), "got: {rendered}");
}

#[test]
fn runtime_errors_render_kind_and_message() {
    let mut engine = Engine::new();
    let error = engine.run("1 / 0", "test.lt").expect_err("must fail");
    let EngineError::Runtime(runtime) = error else {
        panic!("expected a runtime error");
    };
    let rendered = engine.render_error(&runtime);
    assert!(
        rendered.contains("native-method-error: Division by zero"),
        "got: {rendered}"
    );
}

#[test]
fn severity_ordering_is_meaningful() {
    assert!(Severity::Error > Severity::Warn);
    assert!(Severity::Fatal > Severity::Error);
}
