//! `#include` parsing and expansion.
//!
//! `#include "path"` loads a source file relative to the including file;
//! `#include <pkg>` loads a built-in package. The optional bound form names
//! what to bind: `: a, b as c` binds listed exports (with renames),
//! `: all` binds every export (the default), `: syntax` copies the module's
//! syntax rules into the current scope and binds nothing.
//!
//! The generated expression is
//! `[$progn [$include id old new]… [$quote (bound-names…)]]`: the compiler
//! resolves each `[$include …]` against the loaded module's namespace, and
//! the whole form evaluates to the list of bound names.

use std::path::Path;

use crate::{
    intern::{KnownSymbol, SymbolId},
    lexer::TokenKind,
    modules::loader::{self, IncludeTarget},
    parser::{
        scope::DeclKind,
        syntax, Modes, ParseResult, Parser,
    },
    value::Value,
};

/// What the bound form asked for.
enum Binding {
    All,
    SyntaxOnly,
    Names(Vec<(SymbolId, SymbolId)>),
}

impl Parser<'_, '_> {
    /// One `#include` statement; the loanword token is still pending.
    pub(super) fn parse_include(&mut self, modes: Modes) -> ParseResult {
        let loanword = self.next();
        let pos = loanword.position.clone();

        // The target: a quoted path, or <pkg>.
        let target = {
            let token = self.peek();
            match token.kind {
                TokenKind::DynString | TokenKind::RawString => {
                    let token = self.next();
                    loader::classify_path(&token.text)
                }
                k if k.is_punct_name() && token.text == "<" => {
                    let _ = self.next();
                    let name = self.peek();
                    if !name.kind.is_alpha_name() {
                        self.error_at(name.position.clone(), "Expected a package name after \"<\"");
                        self.recover();
                        return ParseResult::recovered();
                    }
                    let name = self.next();
                    let close = self.peek();
                    if close.kind.is_punct_name() && close.text == ">" {
                        let _ = self.next();
                    } else {
                        self.error_at(close.position.clone(), "Expected \">\" closing the package name");
                    }
                    IncludeTarget::Package(name.text.clone())
                }
                _ => {
                    self.error_at(token.position.clone(), "Expected a path or <package> after #include");
                    self.recover();
                    return ParseResult::recovered();
                }
            }
        };

        // The bound form.
        let binding = if self.peek().kind == TokenKind::Colon {
            let _ = self.next();
            self.parse_include_binding(modes)
        } else {
            Binding::All
        };

        // Load (or fetch the memoised) module.
        let base_dir = self.base_dir.clone();
        let module_id = match loader::load(self.ctx, &target, Path::new(&base_dir)) {
            Ok(id) => id,
            Err(message) => {
                self.error_at(pos.clone(), message);
                return ParseResult::recovered();
            }
        };
        let info = self.ctx.modules.get(module_id);
        if !info.loaded_ok {
            let nested: Vec<_> = info.diagnostics.clone();
            let name = info.name.clone();
            self.error_at(pos.clone(), format!("Included module \"{name}\" failed to load"));
            self.diagnostics.extend(nested);
            return ParseResult::recovered();
        }
        let exports = info.exports.clone();
        let module_rules = info.syntax_rules.clone();

        // Resolve the requested bindings against the export list.
        let pairs: Vec<(SymbolId, SymbolId)> = match binding {
            Binding::All => exports.iter().map(|&s| (s, s)).collect(),
            Binding::SyntaxOnly => {
                let table = syntax::make_mut(&mut self.current_scope().syntax);
                for rule in &module_rules {
                    let _ = table.add_rule(rule);
                }
                let classes: Vec<_> = module_rules.iter().map(|r| r.class).collect();
                self.current_scope().included_rules.extend(classes);
                Vec::new()
            }
            Binding::Names(pairs) => {
                for (old, _) in &pairs {
                    if !exports.contains(old) {
                        let name = self.ctx.symbols.name(*old).to_owned();
                        self.error_at(pos.clone(), format!("Module does not export \"{name}\""));
                    }
                }
                pairs
            }
        };

        // Declare the bound names and build the expansion.
        let mut forms = Vec::with_capacity(pairs.len() + 1);
        let mut bound_names = Vec::with_capacity(pairs.len());
        for (old, new) in &pairs {
            self.declare_variable(*new, DeclKind::Include, pos.clone());
            let form = self.form(
                KnownSymbol::Include,
                &[
                    Value::Int64(i64::from(module_id)),
                    Value::Symbol(*old),
                    Value::Symbol(*new),
                ],
                Some(pos.clone()),
            );
            forms.push(form);
            bound_names.push(Value::Symbol(*new));
        }
        let name_list = self.make_list(&bound_names, Some(pos.clone()));
        let quoted = self.form(KnownSymbol::Quote, &[name_list], Some(pos.clone()));
        forms.push(quoted);
        ParseResult::ok(self.form(KnownSymbol::Progn, &forms, Some(pos)))
    }

    /// The clause after `:` — `all`, `syntax`, or a rename list.
    fn parse_include_binding(&mut self, _modes: Modes) -> Binding {
        let token = self.peek();
        if token.kind.is_alpha_name() {
            match token.text.as_str() {
                "all" => {
                    let _ = self.next();
                    return Binding::All;
                }
                "syntax" => {
                    let _ = self.next();
                    return Binding::SyntaxOnly;
                }
                _ => {}
            }
        }
        let mut pairs = Vec::new();
        loop {
            let name = self.peek();
            if !name.kind.is_alpha_name() {
                self.error_at(name.position.clone(), "Expected an exported name to bind");
                break;
            }
            let name = self.next();
            let old = self.intern(&name.text.clone());
            let mut new = old;
            let next = self.peek();
            if next.kind.is_alpha_name() && next.text == "as" {
                let _ = self.next();
                let alias = self.peek();
                if alias.kind.is_alpha_name() {
                    let alias = self.next();
                    new = self.intern(&alias.text.clone());
                } else {
                    self.error_at(alias.position.clone(), "Expected a name after \"as\"");
                }
            }
            pairs.push((old, new));
            if self.peek().kind == TokenKind::Comma {
                let _ = self.next();
            } else {
                break;
            }
        }
        Binding::Names(pairs)
    }
}
