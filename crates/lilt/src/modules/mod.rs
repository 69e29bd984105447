//! Modules: the cache of loaded source units and built-in packages.
//!
//! Every loaded unit — the main program, an included file, a built-in
//! package — gets a [`ModuleInfo`] and a stable module id. File modules are
//! interned by canonical absolute path, packages by name; a repeat include
//! returns the cached entry without re-running the module body.

pub mod loader;
pub mod stdio;

use std::sync::Arc;

use crate::{
    compiler::Program,
    diagnostics::Diagnostic,
    dict::Dict,
    intern::SymbolId,
    parser::SyntaxRule,
    value::Value,
};

/// A module id: index into the cache.
pub type ModuleId = u32;

/// Cached parse/compile/run result for one source unit.
#[derive(Debug)]
pub struct ModuleInfo {
    /// Display name: the path or package name.
    pub name: String,
    /// False when parsing, compiling, or running failed.
    pub loaded_ok: bool,
    /// The compiled program; absent on failure.
    pub program: Option<Arc<Program>>,
    /// The module's global namespace.
    pub globals: Dict<SymbolId, Value>,
    /// Diagnostics collected while loading.
    pub diagnostics: Vec<Diagnostic>,
    /// Names the module exposes to includers, in declaration order.
    pub exports: Vec<SymbolId>,
    /// Syntax rules the module declares, copied to includers on `:syntax`.
    pub syntax_rules: Vec<Arc<SyntaxRule>>,
    /// The value of the module body's last expression.
    pub result: Value,
}

impl ModuleInfo {
    #[must_use]
    pub fn new(name: String) -> Self {
        Self {
            name,
            loaded_ok: false,
            program: None,
            globals: Dict::new(),
            diagnostics: Vec::new(),
            exports: Vec::new(),
            syntax_rules: Vec::new(),
            result: Value::Null,
        }
    }
}

/// The cache: modules by id, with path/package interning.
#[derive(Debug, Default)]
pub struct ModuleCache {
    modules: Vec<ModuleInfo>,
    by_key: Dict<String, usize>,
}

impl ModuleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The module already interned under `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<ModuleId> {
        self.by_key.try_get(&key.to_owned()).map(|&i| i as ModuleId)
    }

    /// Reserves a slot under `key` and returns its id. The slot starts
    /// unloaded; the loader fills it in, so a recursive include of a
    /// module mid-load sees the reserved (not-yet-ok) entry rather than
    /// looping.
    pub fn reserve(&mut self, key: &str, name: String) -> ModuleId {
        let id = self.modules.len();
        self.modules.push(ModuleInfo::new(name));
        self.by_key.append(key.to_owned(), id);
        id as ModuleId
    }

    /// Adds an anonymous module (the main program of a run).
    pub fn add_anonymous(&mut self, name: String) -> ModuleId {
        let id = self.modules.len();
        self.modules.push(ModuleInfo::new(name));
        id as ModuleId
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> &ModuleInfo {
        &self.modules[id as usize]
    }

    pub fn get_mut(&mut self, id: ModuleId) -> &mut ModuleInfo {
        &mut self.modules[id as usize]
    }

    /// Shared access to one module's globals.
    #[must_use]
    pub fn globals(&self, id: ModuleId) -> &Dict<SymbolId, Value> {
        &self.modules[id as usize].globals
    }

    /// Exclusive access to one module's globals.
    pub fn globals_mut(&mut self, id: ModuleId) -> &mut Dict<SymbolId, Value> {
        &mut self.modules[id as usize].globals
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
