//! The embedding surface: parse, compile, and run Lilt source.
//!
//! An [`Engine`] owns one runtime context — arena, symbols, registry,
//! module cache, base objects — and turns source text into values. Each
//! `run`/`compile` call creates a module entry, so later includes and
//! diagnostics attribute correctly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{
    bases,
    compiler::{self, Program},
    diagnostics::{Diagnostic, Severity},
    limits::Limits,
    modules::ModuleId,
    parser::Parser,
    runtime::RuntimeContext,
    tracer::{NoopTracer, VmTracer},
    value::Value,
    vm::{EvalError, Vm},
};

/// Why a run failed.
#[derive(Debug)]
pub enum EngineError {
    /// The parser reported errors; no program was produced.
    Parse(Vec<Diagnostic>),
    /// The compiler reported errors; no program was produced.
    Compile(Vec<Diagnostic>),
    /// The program ran and threw an uncaught error.
    Runtime(EvalError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(diagnostics) | Self::Compile(diagnostics) => {
                for (index, d) in diagnostics.iter().enumerate() {
                    if index > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{d}")?;
                }
                Ok(())
            }
            Self::Runtime(error) => write!(f, "{error}"),
        }
    }
}

/// One engine instance: a language runtime ready to execute source.
pub struct Engine {
    ctx: RuntimeContext,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// A fresh engine with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    /// A fresh engine with explicit limits.
    #[must_use]
    pub fn with_limits(limits: Limits) -> Self {
        let mut ctx = RuntimeContext::new(limits);
        bases::install(&mut ctx);
        Self { ctx }
    }

    /// Compiles `source` into a program without running it.
    pub fn compile(&mut self, source: &str, filename: &str) -> Result<Arc<Program>, EngineError> {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.compile_in_dir(source, filename, base_dir).map(|(program, _)| program)
    }

    fn compile_in_dir(
        &mut self,
        source: &str,
        filename: &str,
        base_dir: PathBuf,
    ) -> Result<(Arc<Program>, ModuleId), EngineError> {
        let module_id = self.ctx.modules.add_anonymous(filename.to_owned());
        bases::seed_globals(&mut self.ctx, module_id);

        let filename: Arc<str> = filename.into();
        let parser = Parser::new(source, filename.clone(), base_dir, &mut self.ctx);
        let output = parser.parse_program();
        if output.diagnostics.iter().any(|d| d.severity >= Severity::Error) {
            return Err(EngineError::Parse(output.diagnostics));
        }

        let program = compiler::compile_global(&mut self.ctx, module_id, filename, output.program)
            .map_err(EngineError::Compile)?;
        self.ctx.modules.get_mut(module_id).program = Some(program.clone());
        self.ctx.modules.get_mut(module_id).exports = output.exports;
        Ok((program, module_id))
    }

    /// Compiles and runs `source`, returning its final value.
    pub fn run(&mut self, source: &str, filename: &str) -> Result<Value, EngineError> {
        let mut tracer = NoopTracer;
        self.run_traced(source, filename, &mut tracer)
    }

    /// Like [`Engine::run`], with a tracer receiving VM events.
    pub fn run_traced(
        &mut self,
        source: &str,
        filename: &str,
        tracer: &mut dyn VmTracer,
    ) -> Result<Value, EngineError> {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let (program, _) = self.compile_in_dir(source, filename, base_dir)?;
        Vm::new(&mut self.ctx, tracer).run(program).map_err(EngineError::Runtime)
    }

    /// Runs a source file; includes resolve relative to its directory.
    pub fn run_file(&mut self, path: &Path) -> Result<Value, EngineError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Parse(vec![Diagnostic::error(
                crate::diagnostics::Position::new(path.to_string_lossy().into_owned().into(), 0, 0),
                format!("cannot read file: {e}"),
            )])
        })?;
        let base_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let filename = path.to_string_lossy().into_owned();
        let (program, _) = self.compile_in_dir(&source, &filename, base_dir)?;
        let mut tracer = NoopTracer;
        Vm::new(&mut self.ctx, &mut tracer).run(program).map_err(EngineError::Runtime)
    }

    /// Renders a value the way the REPL would print it.
    #[must_use]
    pub fn render(&self, value: Value) -> String {
        value.stringify(&self.ctx.heap, &self.ctx.symbols)
    }

    /// Renders an uncaught runtime error with its traceback,
    /// most recent call last.
    #[must_use]
    pub fn render_error(&self, error: &EvalError) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        if !error.trace.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
            for entry in error.trace.iter().rev() {
                let name = if entry.function.is_some() {
                    self.ctx.symbols.name(entry.function)
                } else {
                    "<anonymous>"
                };
                let _ = writeln!(out, "  File \"{}\", line {}, in {}", entry.filename, entry.line, name);
            }
        }
        let _ = write!(out, "{error}");
        out
    }
}
