//! User-extensible syntax tables.
//!
//! A syntax table maps a nonterminal class symbol to a tree of syntax nodes.
//! Each path through the tree alternates terminal matches (keywords or
//! punctuation) and nonterminal descents; a node carrying a replacement
//! accepts, substituting the nonterminal captures collected along the path
//! into the replacement expression.
//!
//! Tables are shared copy-on-write between scopes: a child scope holds its
//! parent's table behind an `Arc` and clones it only when a rule lands in
//! the child.

use std::sync::Arc;

use crate::{
    diagnostics::Position,
    heap::{Heap, HeapData},
    intern::{KnownSymbol, SymbolId},
    types::list,
    value::Value,
};

/// One element of a rule's pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternElem {
    /// A keyword or punctuation that must appear literally.
    Terminal(SymbolId),
    /// A nonterminal descent, binding its result to `var`.
    Nonterminal { class: SymbolId, var: SymbolId },
}

/// A user grammar rule, as declared by `#syntax`.
#[derive(Debug, Clone)]
pub struct SyntaxRule {
    /// The class this rule extends.
    pub class: SymbolId,
    pub pattern: Vec<PatternElem>,
    /// The expression produced on acceptance.
    pub replacement: Value,
    /// The nonterminal binding names, in pattern order.
    pub variables: Vec<SymbolId>,
    pub position: Position,
}

/// One node of a class's match tree.
#[derive(Debug, Clone, Default)]
pub struct SyntaxNode {
    /// Terminal transitions: matched symbol to child node.
    pub next_terminals: Vec<(SymbolId, SyntaxNode)>,
    /// Nonterminal transitions: `(class, variable, child)`.
    pub next_nonterminals: Vec<(SymbolId, SymbolId, SyntaxNode)>,
    /// Set on accepting nodes: the replacement and its variables in capture
    /// order.
    pub replacement: Option<(Value, Vec<SymbolId>)>,
}

/// A syntax table: class symbol to match tree.
#[derive(Debug, Clone, Default)]
pub struct SyntaxTable {
    classes: Vec<(SymbolId, SyntaxNode)>,
}

/// Why a rule failed to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxTableError {
    /// The pattern is empty.
    EmptyPattern,
    /// Another rule already accepts on the same path.
    AmbiguousRule,
    /// The first element of a rule for a built-in class must be a terminal,
    /// or matching could never make progress.
    LeftRecursive,
}

impl SyntaxTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The match tree for `class`, when any rule extends it.
    #[must_use]
    pub fn class_root(&self, class: SymbolId) -> Option<&SyntaxNode> {
        self.classes.iter().find(|(c, _)| *c == class).map(|(_, n)| n)
    }

    /// True when no rules are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Installs a rule, threading its pattern into the class's tree.
    pub fn add_rule(&mut self, rule: &SyntaxRule) -> Result<(), SyntaxTableError> {
        if rule.pattern.is_empty() {
            return Err(SyntaxTableError::EmptyPattern);
        }
        if is_builtin_class(rule.class) && matches!(rule.pattern[0], PatternElem::Nonterminal { .. }) {
            return Err(SyntaxTableError::LeftRecursive);
        }
        let root = match self.classes.iter_mut().find(|(c, _)| *c == rule.class) {
            Some((_, node)) => node,
            None => {
                self.classes.push((rule.class, SyntaxNode::default()));
                let last = self.classes.len() - 1;
                &mut self.classes[last].1
            }
        };

        let mut node = root;
        let mut variables = Vec::new();
        for elem in &rule.pattern {
            match *elem {
                PatternElem::Terminal(symbol) => {
                    let position = node.next_terminals.iter().position(|(s, _)| *s == symbol);
                    let index = match position {
                        Some(i) => i,
                        None => {
                            node.next_terminals.push((symbol, SyntaxNode::default()));
                            node.next_terminals.len() - 1
                        }
                    };
                    node = &mut node.next_terminals[index].1;
                }
                PatternElem::Nonterminal { class, var } => {
                    variables.push(var);
                    let position = node.next_nonterminals.iter().position(|(c, _, _)| *c == class);
                    let index = match position {
                        Some(i) => i,
                        None => {
                            node.next_nonterminals.push((class, var, SyntaxNode::default()));
                            node.next_nonterminals.len() - 1
                        }
                    };
                    node = &mut node.next_nonterminals[index].2;
                }
            }
        }
        if node.replacement.is_some() {
            return Err(SyntaxTableError::AmbiguousRule);
        }
        node.replacement = Some((rule.replacement, variables));
        Ok(())
    }
}

/// True for the nine classes with hardcoded identities.
#[must_use]
pub fn is_builtin_class(class: SymbolId) -> bool {
    class == KnownSymbol::ClassStmt.id()
        || class == KnownSymbol::ClassExpr.id()
        || class == KnownSymbol::ClassCmpExpr.id()
        || class == KnownSymbol::ClassAddExpr.id()
        || class == KnownSymbol::ClassMulExpr.id()
        || class == KnownSymbol::ClassBinaryExpr.id()
        || class == KnownSymbol::ClassPrefixExpr.id()
        || class == KnownSymbol::ClassPostfixExpr.id()
        || class == KnownSymbol::ClassTerm.id()
}

/// Substitutes captured expressions into a replacement tree.
///
/// Symbols naming a captured variable are replaced by the captured
/// expression; the first use takes the capture directly, and every later use
/// deep-clones it so the output stays a tree rather than a DAG.
pub fn substitute(
    replacement: Value,
    captures: &[(SymbolId, Value)],
    used: &mut Vec<SymbolId>,
    heap: &mut Heap,
) -> Value {
    match replacement {
        Value::Symbol(sym) => {
            if let Some((_, captured)) = captures.iter().find(|(var, _)| *var == sym) {
                if used.contains(&sym) {
                    deep_clone(*captured, heap)
                } else {
                    used.push(sym);
                    *captured
                }
            } else {
                replacement
            }
        }
        Value::Ref(id) => match heap.get(id) {
            HeapData::Cons(cell) => {
                let (a, d, loc) = (cell.a, cell.d, cell.loc.clone());
                let new_a = substitute(a, captures, used, heap);
                let new_d = substitute(d, captures, used, heap);
                match loc {
                    Some(loc) => list::cons_at(heap, new_a, new_d, loc),
                    None => list::cons(heap, new_a, new_d),
                }
            }
            _ => replacement,
        },
        other => other,
    }
}

/// Structure-deep clone of list trees; leaves share.
pub(crate) fn deep_clone(value: Value, heap: &mut Heap) -> Value {
    match value {
        Value::Ref(id) => match heap.get(id) {
            HeapData::Cons(cell) => {
                let (a, d, loc) = (cell.a, cell.d, cell.loc.clone());
                let new_a = deep_clone(a, heap);
                let new_d = deep_clone(d, heap);
                match loc {
                    Some(loc) => list::cons_at(heap, new_a, new_d, loc),
                    None => list::cons(heap, new_a, new_d),
                }
            }
            _ => value,
        },
        other => other,
    }
}

/// Copies a table behind an `Arc`, cloning only when shared.
pub fn make_mut(table: &mut Arc<SyntaxTable>) -> &mut SyntaxTable {
    Arc::make_mut(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::SymbolTable;

    fn pos() -> Position {
        Position::new("test.lt".into(), 1, 1)
    }

    #[test]
    fn add_and_find_a_rule() {
        let mut symbols = SymbolTable::new();
        let kw = symbols.get_symbol("print");
        let var = symbols.get_symbol("x");
        let mut table = SyntaxTable::new();
        table
            .add_rule(&SyntaxRule {
                class: KnownSymbol::ClassStmt.id(),
                pattern: vec![
                    PatternElem::Terminal(kw),
                    PatternElem::Nonterminal {
                        class: KnownSymbol::ClassExpr.id(),
                        var,
                    },
                ],
                replacement: Value::Null,
                variables: vec![var],
                position: pos(),
            })
            .expect("rule installs");

        let root = table.class_root(KnownSymbol::ClassStmt.id()).expect("class exists");
        assert_eq!(root.next_terminals.len(), 1);
        let after_kw = &root.next_terminals[0].1;
        assert_eq!(after_kw.next_nonterminals.len(), 1);
        assert!(after_kw.next_nonterminals[0].2.replacement.is_some());
    }

    #[test]
    fn duplicate_path_is_ambiguous() {
        let mut symbols = SymbolTable::new();
        let kw = symbols.get_symbol("once");
        let rule = SyntaxRule {
            class: KnownSymbol::ClassStmt.id(),
            pattern: vec![PatternElem::Terminal(kw)],
            replacement: Value::Null,
            variables: vec![],
            position: pos(),
        };
        let mut table = SyntaxTable::new();
        table.add_rule(&rule).expect("first install");
        assert_eq!(table.add_rule(&rule), Err(SyntaxTableError::AmbiguousRule));
    }

    #[test]
    fn builtin_class_rules_must_start_with_a_terminal() {
        let mut symbols = SymbolTable::new();
        let var = symbols.get_symbol("x");
        let mut table = SyntaxTable::new();
        assert_eq!(
            table.add_rule(&SyntaxRule {
                class: KnownSymbol::ClassExpr.id(),
                pattern: vec![PatternElem::Nonterminal {
                    class: KnownSymbol::ClassExpr.id(),
                    var,
                }],
                replacement: Value::Null,
                variables: vec![var],
                position: pos(),
            }),
            Err(SyntaxTableError::LeftRecursive)
        );
    }

    #[test]
    fn substitution_clones_on_reuse() {
        let mut symbols = SymbolTable::new();
        let mut heap = Heap::new();
        let var = symbols.get_symbol("x");
        let captured = list::from_values(&mut heap, &[Value::Int64(1)]);
        // Replacement [x x]: second use must be a distinct tree.
        let var_value = Value::Symbol(var);
        let replacement = list::from_values(&mut heap, &[var_value, var_value]);
        let mut used = Vec::new();
        let result = substitute(replacement, &[(var, captured)], &mut used, &mut heap);
        let items = list::items(result, &heap).expect("proper list");
        assert_eq!(items.len(), 2);
        let (Value::Ref(first), Value::Ref(second)) = (items[0], items[1]) else {
            panic!("captures should be refs");
        };
        assert_ne!(first, second, "reused capture must be cloned");
        assert!(items[0].deep_equal(items[1], &heap));
    }
}
