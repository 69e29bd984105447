use lilt::Engine;

fn eval(source: &str) -> String {
    let mut engine = Engine::new();
    let value = engine.run(source, "test.lt").expect("program runs");
    engine.render(value)
}

#[test]
fn expr_rule_rewrites_through_substitution() {
    let source = "#syntax EXPR: [twice [TERM e]] => e + e\ntwice 4";
    assert_eq!(eval(source), "8");
}

#[test]
fn reused_capture_variables_clone_the_substituted_tree() {
    // `e` appears twice in the replacement; the output must be a tree, so
    // a structural capture is duplicated rather than shared.
    let source = "#syntax EXPR: [both [TERM e]] => `[(e) (e)]\nboth 3";
    assert_eq!(eval(source), "[3 3]");
}

#[test]
fn stmt_rules_take_nonterminals_from_other_classes() {
    let source = "#syntax STMT: [emit [EXPR e] done-now] => e * 10\nemit 4 + 1 done-now";
    assert_eq!(eval(source), "50");
}

#[test]
fn rules_with_several_terminals_thread_through_the_node_tree() {
    // A TERM-class rule produces a term; the surrounding expression still
    // gets to apply its binary operators to the result.
    let source = "#syntax TERM: [from [TERM a] upto [TERM b]] => a .. b\nfrom 1 upto 3 map |n| n";
    assert_eq!(eval(source), "[1 2 3]");
}

#[test]
fn rule_keywords_are_scoped() {
    // The rule is declared inside a brace scope; outside it the keyword is
    // an ordinary (undefined) name again.
    let source = "var inner = {\n  #syntax EXPR: [thrice [TERM e]] => e * 3\n  thrice 2\n}\ninner";
    assert_eq!(eval(source), "6");

    let mut engine = Engine::new();
    let outside = "var inner = {\n  #syntax EXPR: [thrice [TERM e]] => e * 3\n  thrice 2\n}\nthrice 2";
    assert!(engine.run(outside, "test.lt").is_err(), "the rule must not leak out of its scope");
}

#[test]
fn user_defined_nonterminal_classes_work() {
    let source = "#syntax GREETING: [hello [TERM name]] => name\n#syntax EXPR: [greet [GREETING g]] => g\ngreet hello 7";
    assert_eq!(eval(source), "7");
}

#[test]
fn incomplete_rule_use_is_reported() {
    let mut engine = Engine::new();
    let source = "#syntax EXPR: [pair-of [TERM a] with [TERM b]] => a + b\npair-of 1";
    assert!(engine.run(source, "test.lt").is_err());
}
