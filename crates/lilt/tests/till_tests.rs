use lilt::{Engine, Opcode};

/// The demotion law, local side: a till whose flags are only referenced in
/// the owning function compiles to plain jumps, with no continuation
/// management left in the bytecode.
#[test]
fn till_with_local_escapes_demotes_to_jumps() {
    let source = "till done do {\n  var i = 0\n  while i < 3 do { i += 1 }\n  done\n}\nwhen done 42\n";
    let mut engine = Engine::new();

    let program = engine.compile(source, "till_local.lt").expect("compiles");
    assert_eq!(program.count_opcode(Opcode::NewTill), 0, "demoted till must not allocate");
    assert_eq!(program.count_opcode(Opcode::EndTill), 0);
    assert_eq!(program.count_opcode(Opcode::TillEsc), 0);
    assert!(!program.tills[0].real_continuation_needed);

    let value = engine.run(source, "till_local_run.lt").expect("runs");
    assert_eq!(engine.render(value), "42");
}

/// The demotion law, captured side: a flag referenced from a nested
/// function forces the real continuation into the bytecode.
#[test]
fn till_with_nested_escape_keeps_the_real_continuation() {
    let source = "till done do {\n  var f = |n| if n >= 3 then done else f (n + 1)\n  f 0\n}\nwhen done `ok\n";
    let mut engine = Engine::new();

    let program = engine.compile(source, "till_nested.lt").expect("compiles");
    assert_eq!(program.count_opcode(Opcode::NewTill), 1);
    assert_eq!(program.count_opcode(Opcode::EndTill), 1);
    assert_eq!(program.count_opcode(Opcode::TillEsc), 1);
    assert!(program.tills[0].real_continuation_needed);
    assert_eq!(program.tills[0].branch_targets.len(), 1);

    let value = engine.run(source, "till_nested_run.lt").expect("runs");
    assert_eq!(engine.render(value), "ok");
}

#[test]
fn till_with_several_flags_routes_to_the_right_when() {
    let source = "var n = 7\ntill even, odd do {\n  if n mod 2 == 0 then even else odd\n}\nwhen even `was-even\nwhen odd `was-odd\n";
    let mut engine = Engine::new();
    let value = engine.run(source, "till_flags.lt").expect("runs");
    assert_eq!(engine.render(value), "was-odd");
}

#[test]
fn till_flag_without_a_when_falls_through_to_null() {
    let source = "till stop do stop\n";
    let mut engine = Engine::new();
    let value = engine.run(source, "till_null.lt").expect("runs");
    assert_eq!(engine.render(value), "null");
}

#[test]
fn escaping_a_dead_till_extent_is_a_runtime_error() {
    // The inner function escapes after the till's frame has returned: the
    // continuation must refuse.
    let source = "var leak = null\ntill done do {\n  leak = |x| done\n  done\n}\nwhen done null\nleak 1\n";
    let mut engine = Engine::new();
    let error = engine.run(source, "till_dead.lt").expect_err("escape must fail");
    let rendered = format!("{error}");
    assert!(rendered.contains("dynamic extent"), "got: {rendered}");
}

#[test]
fn disassembly_names_the_till_opcodes() {
    let source = "till done do {\n  var f = |n| if n >= 0 then done else f n\n  f 0\n}\nwhen done 1\n";
    let mut engine = Engine::new();
    let program = engine.compile(source, "till_disasm.lt").expect("compiles");
    let listing = program.disassemble_all();
    assert!(listing.contains("NewTill"), "listing:\n{listing}");
    assert!(listing.contains("TillEsc"), "listing:\n{listing}");
}
