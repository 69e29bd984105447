//! Parse scopes and declarations.
//!
//! Scopes nest during parsing; each records the symbols declared in it, with
//! a declaration kind, and carries the syntax table in effect (inherited
//! copy-on-write from its parent). Redeclaration follows three rules: the
//! same kind is idempotent, `const`/`auto` never change kind within their
//! scope, and an `explicit` scope rejects new declarations once sealed.

use std::sync::Arc;

use crate::{
    dict::Dict,
    diagnostics::Position,
    intern::SymbolId,
    parser::syntax::SyntaxTable,
};

/// What a scope is for; some kinds change declaration behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The program or module top level. Declarations here become globals.
    Outermost,
    /// A function body.
    FunctionBody,
    /// The scope of a till's flag list.
    TillDo,
    /// A scope introduced by a declaration construct.
    ScopeDecl,
    /// A `{ ... }` scope; its declaration list seals at the closing brace.
    Explicit,
}

/// The declaration kinds a symbol can have in a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// A built-in primitive name.
    Primitive,
    /// A global binding.
    Global,
    /// A function argument.
    Argument,
    /// An ordinary variable.
    Variable,
    /// A single-assignment binding; cannot be redeclared or reassigned.
    Const,
    /// An inferred single-assignment binding.
    Auto,
    /// A user-declared keyword (reserved by a syntax rule).
    Keyword,
    /// A do-while post-condition variable.
    PostCondition,
    /// A till flag; referencing it escapes the till.
    Till,
    /// A name bound by an include.
    Include,
}

impl DeclKind {
    /// Single-assignment kinds can never be redeclared differently.
    #[must_use]
    pub fn is_immutable(self) -> bool {
        matches!(self, Self::Const | Self::Auto)
    }

    /// True when assignment to this declaration is an error.
    #[must_use]
    pub fn rejects_assignment(self) -> bool {
        matches!(self, Self::Const | Self::Auto | Self::Keyword | Self::Include | Self::Till)
    }
}

/// One named declaration in a scope.
#[derive(Debug, Clone)]
pub struct ParseDecl {
    pub symbol: SymbolId,
    pub kind: DeclKind,
    pub position: Position,
    /// Index in the owning scope's dense declaration array.
    pub scope_index: usize,
}

/// Why a declaration was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclareError {
    /// Redeclaration with a conflicting kind.
    DuplicateDeclaration { previous: DeclKind },
    /// The scope is sealed (explicit scope after its closing brace).
    ScopeSealed,
}

/// One nesting level.
#[derive(Debug)]
pub struct ParseScope {
    pub kind: ScopeKind,
    /// Symbol to index into `decls`.
    index: Dict<SymbolId, usize>,
    /// Dense declaration array, in declaration order.
    pub decls: Vec<ParseDecl>,
    /// The syntax table in effect inside this scope.
    pub syntax: Arc<SyntaxTable>,
    /// Rules declared directly in this scope.
    pub declared_rules: Vec<SymbolId>,
    /// Rules copied in from included modules.
    pub included_rules: Vec<SymbolId>,
    /// Set once an explicit scope's variable list is complete.
    pub sealed: bool,
}

impl ParseScope {
    #[must_use]
    pub fn new(kind: ScopeKind, syntax: Arc<SyntaxTable>) -> Self {
        Self {
            kind,
            index: Dict::new(),
            decls: Vec::new(),
            syntax,
            declared_rules: Vec::new(),
            included_rules: Vec::new(),
            sealed: false,
        }
    }

    /// Declares `symbol` here.
    ///
    /// The same kind is idempotent (the existing declaration is kept);
    /// conflicting kinds fail when either side is immutable; a sealed
    /// explicit scope rejects any new name.
    pub fn declare(
        &mut self,
        symbol: SymbolId,
        kind: DeclKind,
        position: Position,
    ) -> Result<usize, DeclareError> {
        if let Some(&existing) = self.index.try_get(&symbol) {
            let previous = self.decls[existing].kind;
            if previous == kind {
                return Ok(existing);
            }
            if previous.is_immutable() || kind.is_immutable() {
                return Err(DeclareError::DuplicateDeclaration { previous });
            }
            // A mutable kind may be re-declared as another mutable kind;
            // the newer kind wins (e.g. a variable shadowing a keyword).
            self.decls[existing].kind = kind;
            self.decls[existing].position = position;
            return Ok(existing);
        }
        if self.sealed {
            return Err(DeclareError::ScopeSealed);
        }
        let scope_index = self.decls.len();
        self.decls.push(ParseDecl {
            symbol,
            kind,
            position,
            scope_index,
        });
        self.index.append(symbol, scope_index);
        Ok(scope_index)
    }

    /// Looks a symbol up in this scope only.
    #[must_use]
    pub fn get(&self, symbol: SymbolId) -> Option<&ParseDecl> {
        self.index.try_get(&symbol).map(|&i| &self.decls[i])
    }

    /// Removes a declaration (used when a till's flags leave scope).
    pub fn remove(&mut self, symbol: SymbolId) {
        if let Some(index) = self.index.remove(&symbol) {
            // Leave a tombstone in the dense array so other indices hold.
            self.decls[index].symbol = SymbolId::NONE;
        }
    }

    /// The variables this scope declares, in declaration order, filtered to
    /// the kinds that need local slots.
    #[must_use]
    pub fn local_variables(&self) -> Vec<SymbolId> {
        self.decls
            .iter()
            .filter(|d| {
                d.symbol.is_some() && matches!(d.kind, DeclKind::Variable | DeclKind::Const | DeclKind::Auto)
            })
            .map(|d| d.symbol)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Position;

    fn pos() -> Position {
        Position::new("test.lt".into(), 1, 1)
    }

    fn scope(kind: ScopeKind) -> ParseScope {
        ParseScope::new(kind, Arc::new(SyntaxTable::new()))
    }

    #[test]
    fn same_kind_redeclaration_is_idempotent() {
        let mut s = scope(ScopeKind::FunctionBody);
        let sym = SymbolId::from_index(50);
        let first = s.declare(sym, DeclKind::Variable, pos()).expect("fresh declare");
        let second = s.declare(sym, DeclKind::Variable, pos()).expect("idempotent");
        assert_eq!(first, second);
    }

    #[test]
    fn const_cannot_change_kind() {
        let mut s = scope(ScopeKind::FunctionBody);
        let sym = SymbolId::from_index(51);
        s.declare(sym, DeclKind::Const, pos()).expect("fresh declare");
        assert!(matches!(
            s.declare(sym, DeclKind::Variable, pos()),
            Err(DeclareError::DuplicateDeclaration {
                previous: DeclKind::Const
            })
        ));
    }

    #[test]
    fn sealed_explicit_scope_rejects_new_names() {
        let mut s = scope(ScopeKind::Explicit);
        let before = SymbolId::from_index(52);
        s.declare(before, DeclKind::Variable, pos()).expect("open scope");
        s.sealed = true;
        let after = SymbolId::from_index(53);
        assert_eq!(s.declare(after, DeclKind::Variable, pos()), Err(DeclareError::ScopeSealed));
        // The already-declared name is still idempotent.
        assert!(s.declare(before, DeclKind::Variable, pos()).is_ok());
    }

    #[test]
    fn local_variables_follow_declaration_order() {
        let mut s = scope(ScopeKind::Explicit);
        let a = SymbolId::from_index(60);
        let b = SymbolId::from_index(61);
        let c = SymbolId::from_index(62);
        s.declare(a, DeclKind::Variable, pos()).expect("declare");
        s.declare(b, DeclKind::Keyword, pos()).expect("declare");
        s.declare(c, DeclKind::Const, pos()).expect("declare");
        assert_eq!(s.local_variables(), vec![a, c]);
    }
}
