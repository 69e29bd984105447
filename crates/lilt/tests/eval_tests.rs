use lilt::{Engine, Value};

/// Runs source and renders the final value.
fn eval(source: &str) -> String {
    let mut engine = Engine::new();
    let value = engine.run(source, "test.lt").expect("program runs");
    engine.render(value)
}

#[test]
fn arithmetic_precedence_and_dispatch() {
    let mut engine = Engine::new();
    let value = engine.run("1 + 2 * 3", "test.lt").expect("program runs");
    assert!(matches!(value, Value::Int64(7)), "got {value:?}");
    assert_eq!(engine.render(value), "7");
}

#[test]
fn variables_and_while_loop() {
    let source = "var x = 0\nwhile x < 5 do x += 1\nx";
    assert_eq!(eval(source), "5");
}

#[test]
fn quote_template_evaluates_only_parenthesised_items() {
    assert_eq!(eval("`[a (1 + 2) c]"), "[a 3 c]");
}

#[test]
fn plain_raw_list_is_fully_quoted() {
    assert_eq!(eval("[a b c]"), "[a b c]");
    assert_eq!(eval("[1 2 3]"), "[1 2 3]");
}

#[test]
fn splicing_combines_segments() {
    assert_eq!(eval("var mid = [x y]\n`[a @(mid) b]"), "[a x y b]");
}

#[test]
fn function_literals_apply_by_juxtaposition() {
    assert_eq!(eval("var double = |n| n * 2\ndouble 21"), "42");
}

#[test]
fn closures_capture_their_environment() {
    let source = "var make = |n| |m| n + m\nvar add3 = make 3\nadd3 4";
    assert_eq!(eval(source), "7");
}

#[test]
fn if_is_an_expression() {
    assert_eq!(eval("var x = if 1 < 2 then `yes else `no\nx"), "yes");
    assert_eq!(eval("unless 1 < 2 then `yes else `no"), "no");
}

#[test]
fn until_inverts_the_condition() {
    assert_eq!(eval("var n = 0\nuntil n >= 4 do n += 1\nn"), "4");
}

#[test]
fn do_while_runs_the_body_first() {
    assert_eq!(eval("var n = 10\ndo n += 1 while false\nn"), "11");
}

#[test]
fn and_or_short_circuit_and_keep_values() {
    assert_eq!(eval("false or 5"), "5");
    assert_eq!(eval("3 and 7"), "7");
    assert_eq!(eval("false and 7"), "false");
    // The right side of a short-circuited `or` must not run.
    assert_eq!(eval("var hits = 0\nvar bump = |x| { hits += 1\nx }\ntrue or bump true\nhits"), "0");
}

#[test]
fn string_literals_and_concatenation() {
    assert_eq!(eval("\"ab\" + \"cd\""), "abcd");
    assert_eq!(eval("'raw string'"), "raw string");
}

#[test]
fn string_interpolation_reads_variables() {
    assert_eq!(eval("var who = \"world\"\n\"hello {who}\""), "hello world");
}

#[test]
fn objects_hold_properties_and_inherit_through_base() {
    let source = "var point = new { x: 3, y: 4 }\npoint.x + point.y";
    assert_eq!(eval(source), "7");

    let derived = "var base-obj = new { kind: `base }\nvar child = new base-obj { extra: 1 }\nchild.kind";
    assert_eq!(eval(derived), "base");
}

#[test]
fn typeof_reports_kind_symbols() {
    assert_eq!(eval("typeof 1"), "integer64");
    assert_eq!(eval("typeof \"s\""), "string");
    assert_eq!(eval("typeof `sym"), "symbol");
    assert_eq!(eval("typeof [1]"), "list");
}

#[test]
fn ranges_iterate_through_state_machines() {
    assert_eq!(eval("var total = 0\n1 .. 4 each |n| total += n\ntotal"), "10");
    assert_eq!(eval("1 .. 3 map |n| n * n"), "[1 4 9]");
    assert_eq!(eval("1 .. 10 where |n| n mod 2 == 0"), "[2 4 6 8 10]");
    assert_eq!(eval("1 .. 10 count |n| n > 7"), "3");
    assert_eq!(eval("1 .. 10 any? |n| n > 9"), "true");
}

#[test]
fn list_iteration_matches_range_iteration() {
    assert_eq!(eval("[1 2 3] map |n| n + 10"), "[11 12 13]");
}

#[test]
fn try_catch_delivers_the_thrown_payload() {
    // A runtime error inside the body reaches the handler as a value.
    let source = "try missing-thing catch |e| `caught";
    assert_eq!(eval(source), "caught");
}

#[test]
fn user_thrown_values_arrive_at_the_handler_intact() {
    assert_eq!(eval("try throw `boom catch |e| e"), "boom");
}

#[test]
fn uncaught_user_throw_surfaces_as_a_runtime_error() {
    let mut engine = Engine::new();
    let error = engine.run("throw `kaboom", "test.lt").expect_err("must fail");
    assert!(format!("{error}").contains("kaboom"), "got: {error}");
}

#[test]
fn numeric_kind_suffixes_survive_to_runtime() {
    assert_eq!(eval("100s + 1s"), "101s");
    assert_eq!(eval("200t + 1t"), "201t");
    assert_eq!(eval("7x + 1x"), "8x");
}

#[test]
fn deep_tail_recursion_runs_in_constant_frame_depth() {
    // Far deeper than the call-depth limit; only tail calls survive this.
    let source = "var down = |n| if n == 0 then `done else down (n - 1)\ndown 100000";
    assert_eq!(eval(source), "done");
}

#[test]
fn fn_call_and_apply_reenter_the_vm() {
    assert_eq!(eval("var add = |a b| a + b\nadd.call 2 3"), "5");
    assert_eq!(eval("var add = |a b| a + b\nadd.apply [2 3]"), "5");
}

#[test]
fn member_access_with_colon_indexes_lists() {
    assert_eq!(eval("var xs = [10 20 30]\nxs:1"), "20");
}

#[test]
fn undefined_variable_is_a_runtime_error() {
    let mut engine = Engine::new();
    let error = engine.run("nowhere-bound", "test.lt").expect_err("must fail");
    let rendered = format!("{error}");
    assert!(rendered.contains("not defined"), "got: {rendered}");
}
