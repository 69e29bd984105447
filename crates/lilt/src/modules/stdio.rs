//! The `stdio` built-in package.
//!
//! Exposes `print` and `print-line` plus the `Stdout`/`Stderr` handles.
//! The write functions register in raw mode: no argument reshaping, any
//! number of values, each stringified and written in order.

use std::io::Write;

use crate::{
    heap::HeapData,
    intern::KnownSymbol,
    modules::ModuleId,
    registry::{ArgFlags, NativeBody},
    runtime::RuntimeContext,
    types::handle::{FileHandle, Handle},
    value::Value,
    vm::EvalError,
};

/// Installs the package's bindings into `module_id`'s namespace.
pub fn install(ctx: &mut RuntimeContext, module_id: ModuleId) {
    let mut exports = Vec::new();
    for (name, body) in [("print", print as crate::registry::NativeFn), ("print-line", print_line)] {
        let symbol = ctx.symbols.get_symbol(name);
        let id = ctx
            .registry
            .setup_function(symbol, NativeBody::Raw(body), "values...", ArgFlags { raw: true, ..ArgFlags::default() }, 0, 0, &[]);
        let value = Value::Ref(
            ctx.heap
                .alloc(HeapData::Function(crate::function::FunctionValue::External(id))),
        );
        ctx.modules.globals_mut(module_id).set(symbol, value);
        exports.push(symbol);
    }

    let stdout = Value::Ref(ctx.heap.alloc(HeapData::Handle(Handle::File(FileHandle::Stdout))));
    let stdout_symbol = KnownSymbol::Stdout.id();
    ctx.modules.globals_mut(module_id).set(stdout_symbol, stdout);
    exports.push(stdout_symbol);

    ctx.modules.get_mut(module_id).exports = exports;
}

fn write_values(ctx: &mut RuntimeContext, args: &[Value], newline: bool) -> Result<Value, EvalError> {
    let mut out = String::new();
    for value in args {
        out.push_str(&value.stringify(&ctx.heap, &ctx.symbols));
    }
    if newline {
        out.push('\n');
    }
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(out.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|e| EvalError::native(format!("cannot write to stdout: {e}")))?;
    Ok(Value::Null)
}

fn print(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    write_values(ctx, args, false)
}

fn print_line(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    write_values(ctx, args, true)
}
