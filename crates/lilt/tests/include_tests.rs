use std::fs;
use std::path::PathBuf;

use lilt::Engine;

/// Creates a scratch directory unique to one test.
fn scratch_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lilt-include-{}-{test}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("scratch dir creates");
    dir
}

#[test]
fn include_binds_a_named_export() {
    let dir = scratch_dir("named");
    fs::write(dir.join("lib.lt"), "const pi = 3.14159\n").expect("lib writes");
    fs::write(dir.join("main.lt"), "#include \"./lib.lt\" : pi\npi\n").expect("main writes");

    let mut engine = Engine::new();
    let value = engine.run_file(&dir.join("main.lt")).expect("runs");
    assert_eq!(engine.render(value), "3.14159");
}

#[test]
fn include_can_rename_with_as() {
    let dir = scratch_dir("rename");
    fs::write(dir.join("lib.lt"), "const pi = 3.14159\n").expect("lib writes");
    fs::write(dir.join("main.lt"), "#include \"./lib.lt\" : pi as tau\ntau\n").expect("main writes");

    let mut engine = Engine::new();
    let value = engine.run_file(&dir.join("main.lt")).expect("runs");
    assert_eq!(engine.render(value), "3.14159");
}

#[test]
fn repeated_include_reuses_the_cached_module() {
    let dir = scratch_dir("memo");
    // The export is a fresh list; re-running the module body would build a
    // different object, so reference identity proves the cache hit.
    fs::write(dir.join("lib.lt"), "var marker = [1 2]\n").expect("lib writes");
    fs::write(
        dir.join("main.lt"),
        "#include \"./lib.lt\" : marker\nvar first = marker\n#include \"./lib.lt\" : marker\nfirst === marker\n",
    )
    .expect("main writes");

    let mut engine = Engine::new();
    let value = engine.run_file(&dir.join("main.lt")).expect("runs");
    assert_eq!(engine.render(value), "true", "second include must reuse the memoised module");
}

#[test]
fn include_without_a_binding_clause_binds_all_exports() {
    let dir = scratch_dir("all");
    fs::write(dir.join("lib.lt"), "const a = 1\nconst b = 2\n").expect("lib writes");
    fs::write(dir.join("main.lt"), "#include \"./lib.lt\"\na + b\n").expect("main writes");

    let mut engine = Engine::new();
    let value = engine.run_file(&dir.join("main.lt")).expect("runs");
    assert_eq!(engine.render(value), "3");
}

#[test]
fn include_form_evaluates_to_the_bound_name_list() {
    let dir = scratch_dir("names");
    fs::write(dir.join("lib.lt"), "const a = 1\nconst b = 2\n").expect("lib writes");
    fs::write(dir.join("main.lt"), "#include \"./lib.lt\" : a, b\n").expect("main writes");

    let mut engine = Engine::new();
    let value = engine.run_file(&dir.join("main.lt")).expect("runs");
    assert_eq!(engine.render(value), "[a b]");
}

#[test]
fn syntax_only_include_copies_grammar_rules() {
    let dir = scratch_dir("syntax");
    fs::write(dir.join("lib.lt"), "#syntax EXPR: [twice [TERM e]] => e + e\n").expect("lib writes");
    fs::write(dir.join("main.lt"), "#include \"./lib.lt\" : syntax\ntwice 4\n").expect("main writes");

    let mut engine = Engine::new();
    let value = engine.run_file(&dir.join("main.lt")).expect("runs");
    assert_eq!(engine.render(value), "8");
}

#[test]
fn stdio_package_resolves() {
    let mut engine = Engine::new();
    let value = engine.run("#include <stdio>\ntypeof print-line", "test.lt").expect("runs");
    assert_eq!(engine.render(value), "fn");
}

#[test]
fn unknown_package_fails_with_a_diagnostic() {
    let mut engine = Engine::new();
    let error = engine.run("#include <no-such-pkg>", "test.lt").expect_err("must fail");
    let rendered = format!("{error}");
    assert!(rendered.contains("no-such-pkg") || rendered.contains("failed to load"), "got: {rendered}");
}

#[test]
fn including_a_missing_export_is_a_parse_error() {
    let dir = scratch_dir("missing");
    fs::write(dir.join("lib.lt"), "const a = 1\n").expect("lib writes");
    fs::write(dir.join("main.lt"), "#include \"./lib.lt\" : zeppelin\n").expect("main writes");

    let mut engine = Engine::new();
    let error = engine.run_file(&dir.join("main.lt")).expect_err("must fail");
    let rendered = format!("{error}");
    assert!(rendered.contains("zeppelin"), "got: {rendered}");
}
