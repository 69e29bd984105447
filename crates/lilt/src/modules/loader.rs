//! Module loading and memoisation.
//!
//! Loading a file module runs the full pipeline — read, parse, compile,
//! execute — and caches the result under the file's canonical absolute
//! path, so a second include of the same file returns the cached entry
//! without re-running its body. Package includes consult the built-in
//! package registry instead; `stdio` is the only packaged module.

use std::path::{Path, PathBuf};

use crate::{
    bases,
    compiler,
    diagnostics::{Diagnostic, Position, Severity},
    modules::{stdio, ModuleId},
    parser::Parser,
    runtime::RuntimeContext,
    tracer::NoopTracer,
    vm::Vm,
};

/// What an include names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeTarget {
    File(PathBuf),
    Package(String),
}

/// Classifies an include string: a leading `.` or `/`, or an alphabetic
/// extension, means a filesystem path; anything else is a package name.
#[must_use]
pub fn classify_path(text: &str) -> IncludeTarget {
    let looks_like_path = text.starts_with('.')
        || text.starts_with('/')
        || Path::new(text)
            .extension()
            .is_some_and(|ext| ext.to_str().is_some_and(|e| e.chars().all(char::is_alphabetic)));
    if looks_like_path {
        IncludeTarget::File(PathBuf::from(text))
    } else {
        IncludeTarget::Package(text.to_owned())
    }
}

/// Loads (or fetches the memoised) module for `target`.
///
/// Returns the module id even when loading failed; the caller checks
/// `loaded_ok` and surfaces the module's diagnostics. A hard resolution
/// failure (unreadable path) is an `Err`.
pub fn load(ctx: &mut RuntimeContext, target: &IncludeTarget, base_dir: &Path) -> Result<ModuleId, String> {
    match target {
        IncludeTarget::File(path) => load_file(ctx, path, base_dir),
        IncludeTarget::Package(name) => load_package(ctx, name),
    }
}

fn load_file(ctx: &mut RuntimeContext, path: &Path, base_dir: &Path) -> Result<ModuleId, String> {
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    let canonical = resolved
        .canonicalize()
        .map_err(|e| format!("Cannot resolve \"{}\": {e}", resolved.display()))?;
    let key = canonical.to_string_lossy().into_owned();
    if let Some(existing) = ctx.modules.lookup(&key) {
        return Ok(existing);
    }

    let source = std::fs::read_to_string(&canonical)
        .map_err(|e| format!("Cannot read \"{}\": {e}", canonical.display()))?;
    let module_id = ctx.modules.reserve(&key, key.clone());
    bases::seed_globals(ctx, module_id);

    let module_dir = canonical
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    run_module(ctx, module_id, &source, &key, module_dir);
    Ok(module_id)
}

fn load_package(ctx: &mut RuntimeContext, name: &str) -> Result<ModuleId, String> {
    let key = format!("pkg:{name}");
    if let Some(existing) = ctx.modules.lookup(&key) {
        return Ok(existing);
    }
    let module_id = ctx.modules.reserve(&key, name.to_owned());
    match name {
        "stdio" => {
            stdio::install(ctx, module_id);
            ctx.modules.get_mut(module_id).loaded_ok = true;
        }
        other => {
            // Unknown packages fail with a typed error on the ModuleInfo.
            let info = ctx.modules.get_mut(module_id);
            info.loaded_ok = false;
            info.diagnostics.push(Diagnostic::error(
                Position::new("<include>".into(), 0, 0),
                format!("There is no installed package named \"{other}\""),
            ));
        }
    }
    Ok(module_id)
}

/// Parses, compiles, and executes one module body, recording everything on
/// its [`crate::modules::ModuleInfo`].
pub(crate) fn run_module(
    ctx: &mut RuntimeContext,
    module_id: ModuleId,
    source: &str,
    filename: &str,
    base_dir: PathBuf,
) {
    let filename: std::sync::Arc<str> = filename.into();
    let parser = Parser::new(source, filename.clone(), base_dir, ctx);
    let output = parser.parse_program();
    let parse_failed = output.diagnostics.iter().any(|d| d.severity >= Severity::Error);
    {
        let info = ctx.modules.get_mut(module_id);
        info.diagnostics.extend(output.diagnostics.clone());
        info.exports = output.exports.clone();
        info.syntax_rules = output.syntax_rules.clone();
    }
    if parse_failed {
        return;
    }

    let program = match compiler::compile_global(ctx, module_id, filename, output.program) {
        Ok(program) => program,
        Err(diagnostics) => {
            ctx.modules.get_mut(module_id).diagnostics.extend(diagnostics);
            return;
        }
    };
    ctx.modules.get_mut(module_id).program = Some(program.clone());

    let mut tracer = NoopTracer;
    let result = Vm::new(ctx, &mut tracer).run(program);
    let info = ctx.modules.get_mut(module_id);
    match result {
        Ok(value) => {
            info.result = value;
            info.loaded_ok = true;
        }
        Err(error) => {
            info.diagnostics.push(Diagnostic::error(
                Position::new(info.name.clone().into(), 0, 0),
                error.to_string(),
            ));
        }
    }
}
