//! Built-in method setup on the known base objects.
//!
//! Runs once at engine init: registers the external functions, hangs them
//! off the per-kind base objects, then freezes every base into
//! extended-but-not-mutated posture. The collection iterators (`each`,
//! `map`, `where`, `count`, `any?`) are state-machine externals, re-entered
//! by the VM once per element so iteration never recurses natively;
//! `Fn.call`/`Fn.apply` use the same machinery to re-enter user functions.

use crate::{
    heap::{HeapData, HeapId},
    intern::SymbolId,
    registry::{ArgFlags, ArgVec, NativeBody, SmStep, TypeClass},
    runtime::RuntimeContext,
    types::{
        handle::{Handle, RegexHandle},
        list,
        range::RangeValue,
        timestamp::{DurationUnit, Timestamp},
    },
    value::{Kind, Value},
    vm::EvalError,
};

/// Installs every built-in and freezes the bases.
pub fn install(ctx: &mut RuntimeContext) {
    let list_base = ctx.bases.list;
    let range_base = ctx.bases.range;
    let fn_base = ctx.bases.function;
    let handle_base = ctx.bases.handle;
    let ts_base = ctx.bases.timestamp;
    let string_base = ctx.bases.string;

    // List construction.
    register(ctx, list_base, "of", NativeBody::Simple(list_of), "items...", min(1), 1, 0, &[]);
    register(ctx, list_base, "combine", NativeBody::Simple(list_combine), "lists...", min(1), 1, 0, &[]);
    register(ctx, list_base, "join", NativeBody::Simple(join_with), "list sep", exact(2), 2, 2, &[]);
    register(ctx, string_base, "join", NativeBody::Simple(join_with), "list sep", exact(2), 2, 2, &[]);

    // Collection iterators, on lists and ranges alike.
    for base in [list_base, range_base] {
        register_sm(ctx, base, "each", iter_each_start, "collection fn", 2);
        register_sm(ctx, base, "map", iter_map_start, "collection fn", 2);
        register_sm(ctx, base, "where", iter_where_start, "collection fn", 2);
        register_sm(ctx, base, "count", iter_count_start, "collection fn", 2);
        register_sm(ctx, base, "any?", iter_any_start, "collection fn", 2);
        register_sm(ctx, base, "first", iter_first_start, "collection fn", 2);
    }

    // Function plumbing.
    register_sm_unchecked(ctx, fn_base, "call", call_start, "fn args...");
    register_sm_unchecked(ctx, fn_base, "apply", apply_start, "fn arg-list");

    // User-thrown errors: every value inherits `throw` from the root.
    let primitive_base = ctx.bases.primitive;
    register(ctx, primitive_base, "throw", NativeBody::Simple(throw_value), "value", exact(1), 1, 1, &[]);

    // Regex handles. `of` compiles; the others operate on handles.
    register(
        ctx,
        handle_base,
        "of",
        NativeBody::Simple(regex_of),
        "base pattern",
        exact(2),
        2,
        2,
        &[TypeClass::Any, TypeClass::Str],
    );
    register(ctx, handle_base, "matches?", NativeBody::Simple(regex_matches), "regex input", exact(2), 2, 2, &[]);
    register(ctx, handle_base, "match", NativeBody::Simple(regex_match), "regex input", exact(2), 2, 2, &[]);
    register(ctx, handle_base, "split", NativeBody::Simple(regex_split), "regex input", exact(2), 2, 2, &[]);
    register(
        ctx,
        handle_base,
        "replace",
        NativeBody::Simple(regex_replace),
        "regex input replacement",
        exact(3),
        3,
        3,
        &[],
    );
    register(ctx, handle_base, "before", NativeBody::Simple(match_before), "match", exact(1), 1, 1, &[]);
    register(ctx, handle_base, "after", NativeBody::Simple(match_after), "match", exact(1), 1, 1, &[]);
    register(ctx, handle_base, "range", NativeBody::Simple(match_range), "match", exact(1), 1, 1, &[]);
    register(ctx, handle_base, "capture", NativeBody::Simple(match_capture), "match name", exact(2), 2, 2, &[]);

    // Timestamps. `now` takes no checks at all (a zero minimum collapses
    // the count check away), so it works however it is reached.
    register(ctx, ts_base, "now", NativeBody::Simple(ts_now), "", min(0), 0, 0, &[]);
    register(ctx, ts_base, "from-unix", NativeBody::Simple(ts_from_unix), "base seconds", exact(2), 2, 2, &[]);
    register(ctx, ts_base, "to-unix", NativeBody::Simple(ts_to_unix), "timestamp", exact(1), 1, 1, &[]);
    register(
        ctx,
        ts_base,
        "from-windows-ticks",
        NativeBody::Simple(ts_from_ticks),
        "base ticks",
        exact(2),
        2,
        2,
        &[],
    );
    register(
        ctx,
        ts_base,
        "to-windows-ticks",
        NativeBody::Simple(ts_to_ticks),
        "timestamp",
        exact(1),
        1,
        1,
        &[],
    );
    register(ctx, ts_base, "diff", NativeBody::Simple(ts_diff), "timestamp other", exact(2), 2, 2, &[]);
    for (name, unit) in [
        ("add-days", DurationUnit::Days),
        ("add-hours", DurationUnit::Hours),
        ("add-minutes", DurationUnit::Minutes),
        ("add-seconds", DurationUnit::Seconds),
        ("add-ms", DurationUnit::Milliseconds),
        ("add-us", DurationUnit::Microseconds),
        ("add-ns", DurationUnit::Nanoseconds),
    ] {
        register_ts_add(ctx, ts_base, name, unit);
    }

    ctx.bases.freeze(&mut ctx.heap);
}

/// Seeds a fresh module namespace with the standard global bindings.
pub fn seed_globals(ctx: &mut RuntimeContext, module_id: crate::modules::ModuleId) {
    let pairs = [
        ("List", ctx.bases.list),
        ("String", ctx.bases.string),
        ("Object", ctx.bases.object),
        ("Fn", ctx.bases.function),
        ("Regex", ctx.bases.handle),
        ("Timestamp", ctx.bases.timestamp),
        ("Primitive", ctx.bases.primitive),
    ];
    for (name, id) in pairs {
        let symbol = ctx.symbols.get_symbol(name);
        ctx.modules.globals_mut(module_id).set(symbol, Value::Ref(id));
    }
    // `throw value` works as a plain global as well as a method.
    let throw_symbol = ctx.symbols.get_symbol("throw");
    if let Some(value) = ctx.get_property(Value::Ref(ctx.bases.primitive), throw_symbol) {
        ctx.modules.globals_mut(module_id).set(throw_symbol, value);
    }
}

// ----------------------------------------------------------------------
// Registration helpers.

fn min(_at_least: u8) -> ArgFlags {
    ArgFlags {
        min_check: true,
        ..ArgFlags::default()
    }
}

fn exact(_count: u8) -> ArgFlags {
    ArgFlags {
        exact_check: true,
        ..ArgFlags::default()
    }
}

#[expect(clippy::too_many_arguments, reason = "mirrors the registration ABI")]
fn register(
    ctx: &mut RuntimeContext,
    base: HeapId,
    name: &str,
    body: NativeBody,
    arg_names: &str,
    flags: ArgFlags,
    minimum: u8,
    maximum: u8,
    types: &[TypeClass],
) {
    let symbol = ctx.symbols.get_symbol(name);
    let flags = ArgFlags {
        types_check: !types.is_empty(),
        ..flags
    };
    let id = ctx.registry.setup_function(symbol, body, arg_names, flags, minimum, maximum, types);
    attach(ctx, base, symbol, id);
}

fn register_sm(
    ctx: &mut RuntimeContext,
    base: HeapId,
    name: &str,
    start: crate::registry::SmStartFn,
    arg_names: &str,
    arity: u8,
) {
    let symbol = ctx.symbols.get_symbol(name);
    let flags = ArgFlags {
        exact_check: true,
        state_machine: true,
        ..ArgFlags::default()
    };
    let id = ctx.registry.setup_function(
        symbol,
        NativeBody::StateMachine {
            start,
            body: iter_sm_body,
        },
        arg_names,
        flags,
        arity,
        arity,
        &[],
    );
    attach(ctx, base, symbol, id);
}

/// `Fn.call`/`Fn.apply`: no argument reshaping at all.
fn register_sm_unchecked(
    ctx: &mut RuntimeContext,
    base: HeapId,
    name: &str,
    start: crate::registry::SmStartFn,
    arg_names: &str,
) {
    let symbol = ctx.symbols.get_symbol(name);
    let flags = ArgFlags {
        state_machine: true,
        ..ArgFlags::default()
    };
    let id = ctx.registry.setup_function(
        symbol,
        NativeBody::StateMachine {
            start,
            body: call_sm_body,
        },
        arg_names,
        flags,
        0,
        0,
        &[],
    );
    attach(ctx, base, symbol, id);
}

fn attach(ctx: &mut RuntimeContext, base: HeapId, name: SymbolId, external: u32) {
    let value = Value::Ref(
        ctx.heap
            .alloc(HeapData::Function(crate::function::FunctionValue::External(external))),
    );
    if let HeapData::Object(object) = ctx.heap.get_mut(base) {
        let _ = object.set_property(name, value);
    }
}

fn register_ts_add(ctx: &mut RuntimeContext, base: HeapId, name: &str, unit: DurationUnit) {
    // One thin external per unit; the unit is recovered from the name at
    // call time since registration takes plain function pointers.
    let body: crate::registry::NativeFn = match unit {
        DurationUnit::Days => |ctx, args| ts_add(ctx, args, DurationUnit::Days),
        DurationUnit::Hours => |ctx, args| ts_add(ctx, args, DurationUnit::Hours),
        DurationUnit::Minutes => |ctx, args| ts_add(ctx, args, DurationUnit::Minutes),
        DurationUnit::Seconds => |ctx, args| ts_add(ctx, args, DurationUnit::Seconds),
        DurationUnit::Milliseconds => |ctx, args| ts_add(ctx, args, DurationUnit::Milliseconds),
        DurationUnit::Microseconds => |ctx, args| ts_add(ctx, args, DurationUnit::Microseconds),
        DurationUnit::Nanoseconds => |ctx, args| ts_add(ctx, args, DurationUnit::Nanoseconds),
    };
    register(ctx, base, name, NativeBody::Simple(body), "timestamp amount", exact(2), 2, 2, &[]);
}

/// Raises its argument as a user-thrown error.
fn throw_value(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let rendered = args[0].stringify(&ctx.heap, &ctx.symbols);
    Err(EvalError::thrown(args[0], rendered))
}

// ----------------------------------------------------------------------
// Lists.

fn list_of(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    Ok(list::from_values(&mut ctx.heap, &args[1..]))
}

fn list_combine(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    list::combine(&mut ctx.heap, &args[1..])
        .ok_or_else(|| EvalError::native("'combine' requires well-formed lists"))
}

fn join_with(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let items = list::items(args[0], &ctx.heap)
        .ok_or_else(|| EvalError::native("'join' requires a well-formed list"))?;
    let separator = args[1].stringify(&ctx.heap, &ctx.symbols);
    let rendered: Vec<String> = items
        .iter()
        .map(|item| item.stringify(&ctx.heap, &ctx.symbols))
        .collect();
    let id = ctx.heap.alloc_str(rendered.join(&separator));
    Ok(Value::Ref(id))
}

// ----------------------------------------------------------------------
// The shared collection iterator state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterKind {
    Each,
    Map,
    Where,
    CountBy,
    AnyBy,
    First,
}

enum IterSource {
    Items(Vec<Value>),
    Range(RangeValue),
}

impl IterSource {
    fn len(&self) -> usize {
        match self {
            Self::Items(items) => items.len(),
            Self::Range(range) => range.len(),
        }
    }

    fn get(&self, index: usize) -> Value {
        match self {
            Self::Items(items) => items[index],
            Self::Range(range) => range.element(index).unwrap_or(Value::Null),
        }
    }
}

struct IterSm {
    kind: IterKind,
    source: IterSource,
    f: Value,
    index: usize,
    started: bool,
    pending: Value,
    out: Vec<Value>,
    count: i64,
}

fn iter_start(ctx: &mut RuntimeContext, args: &[Value], kind: IterKind) -> Result<Box<dyn std::any::Any>, EvalError> {
    let receiver = args[0];
    let source = match receiver.kind(&ctx.heap) {
        Kind::Null => IterSource::Items(Vec::new()),
        Kind::List => IterSource::Items(
            list::items(receiver, &ctx.heap)
                .ok_or_else(|| EvalError::native("cannot iterate an improper list"))?,
        ),
        Kind::Range => {
            let Value::Ref(id) = receiver else { unreachable!("kind said range") };
            let HeapData::Range(range) = ctx.heap.get(id) else {
                unreachable!("kind said range")
            };
            IterSource::Range(*range)
        }
        _ => return Err(EvalError::native("this value cannot be iterated")),
    };
    Ok(Box::new(IterSm {
        kind,
        source,
        f: args[1],
        index: 0,
        started: false,
        pending: Value::Null,
        out: Vec::new(),
        count: 0,
    }))
}

fn iter_each_start(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Box<dyn std::any::Any>, EvalError> {
    iter_start(ctx, args, IterKind::Each)
}
fn iter_map_start(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Box<dyn std::any::Any>, EvalError> {
    iter_start(ctx, args, IterKind::Map)
}
fn iter_where_start(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Box<dyn std::any::Any>, EvalError> {
    iter_start(ctx, args, IterKind::Where)
}
fn iter_count_start(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Box<dyn std::any::Any>, EvalError> {
    iter_start(ctx, args, IterKind::CountBy)
}
fn iter_any_start(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Box<dyn std::any::Any>, EvalError> {
    iter_start(ctx, args, IterKind::AnyBy)
}
fn iter_first_start(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Box<dyn std::any::Any>, EvalError> {
    iter_start(ctx, args, IterKind::First)
}

/// One iteration step: fold in the previous call's result, then either
/// request the next call or finish.
fn iter_sm_body(
    ctx: &mut RuntimeContext,
    state: &mut dyn std::any::Any,
    previous: Value,
) -> Result<SmStep, EvalError> {
    let sm = state
        .downcast_mut::<IterSm>()
        .ok_or_else(|| EvalError::eval("iterator state machine lost its state"))?;

    if sm.started {
        match sm.kind {
            IterKind::Each => {}
            IterKind::Map => sm.out.push(previous),
            IterKind::Where => {
                if previous.to_bool(&ctx.heap) {
                    sm.out.push(sm.pending);
                }
            }
            IterKind::CountBy => {
                if previous.to_bool(&ctx.heap) {
                    sm.count += 1;
                }
            }
            IterKind::AnyBy => {
                if previous.to_bool(&ctx.heap) {
                    return Ok(SmStep::Done(Value::Bool(true)));
                }
            }
            IterKind::First => {
                if previous.to_bool(&ctx.heap) {
                    return Ok(SmStep::Done(sm.pending));
                }
            }
        }
    }

    if sm.index < sm.source.len() {
        let item = sm.source.get(sm.index);
        sm.index += 1;
        sm.pending = item;
        sm.started = true;
        let mut call_args = ArgVec::new();
        call_args.push(item);
        return Ok(SmStep::Call(sm.f, call_args));
    }

    let result = match sm.kind {
        IterKind::Each => Value::Null,
        IterKind::Map | IterKind::Where => list::from_values(&mut ctx.heap, &sm.out),
        IterKind::CountBy => Value::Int64(sm.count),
        IterKind::AnyBy => Value::Bool(false),
        IterKind::First => Value::Null,
    };
    Ok(SmStep::Done(result))
}

// ----------------------------------------------------------------------
// Fn.call / Fn.apply.

struct CallSm {
    f: Value,
    args: ArgVec,
    dispatched: bool,
}

fn call_start(_ctx: &mut RuntimeContext, args: &[Value]) -> Result<Box<dyn std::any::Any>, EvalError> {
    let [f, rest @ ..] = args else {
        return Err(EvalError::native("'call' requires a function"));
    };
    Ok(Box::new(CallSm {
        f: *f,
        args: rest.iter().copied().collect(),
        dispatched: false,
    }))
}

fn apply_start(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Box<dyn std::any::Any>, EvalError> {
    let [f, arg_list] = args else {
        return Err(EvalError::native("'apply' requires a function and an argument list"));
    };
    let items = list::items(*arg_list, &ctx.heap)
        .ok_or_else(|| EvalError::native("'apply' requires a well-formed argument list"))?;
    Ok(Box::new(CallSm {
        f: *f,
        args: items.into_iter().collect(),
        dispatched: false,
    }))
}

fn call_sm_body(
    _ctx: &mut RuntimeContext,
    state: &mut dyn std::any::Any,
    previous: Value,
) -> Result<SmStep, EvalError> {
    let sm = state
        .downcast_mut::<CallSm>()
        .ok_or_else(|| EvalError::eval("call state machine lost its state"))?;
    if sm.dispatched {
        Ok(SmStep::Done(previous))
    } else {
        sm.dispatched = true;
        Ok(SmStep::Call(sm.f, sm.args.clone()))
    }
}

// ----------------------------------------------------------------------
// Regex.

fn regex_of(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let Value::Ref(id) = args[1] else {
        return Err(EvalError::native("'of' requires a pattern string"));
    };
    let pattern = ctx.heap.str(id).to_owned();
    let handle = RegexHandle::compile(&pattern).map_err(EvalError::native)?;
    let id = ctx.heap.alloc(HeapData::Handle(Handle::Regex(handle)));
    Ok(Value::Ref(id))
}

fn with_regex<'h>(ctx: &'h RuntimeContext, value: Value) -> Result<&'h RegexHandle, EvalError> {
    if let Value::Ref(id) = value
        && let HeapData::Handle(Handle::Regex(handle)) = ctx.heap.get(id)
    {
        Ok(handle)
    } else {
        Err(EvalError::native("this operation requires a regex handle"))
    }
}

fn string_arg(ctx: &RuntimeContext, value: Value) -> Result<String, EvalError> {
    if let Value::Ref(id) = value
        && let HeapData::Str(s) = ctx.heap.get(id)
    {
        Ok(s.to_string())
    } else {
        Err(EvalError::native("this operation requires a string"))
    }
}

fn regex_matches(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let input = string_arg(ctx, args[1])?;
    let matched = with_regex(ctx, args[0])?.is_match(&input).map_err(EvalError::native)?;
    Ok(Value::Bool(matched))
}

fn regex_match(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let input = string_arg(ctx, args[1])?;
    let found = with_regex(ctx, args[0])?.find(&input).map_err(EvalError::native)?;
    match found {
        Some(handle) => {
            let id = ctx.heap.alloc(HeapData::Handle(Handle::RegexMatch(handle)));
            Ok(Value::Ref(id))
        }
        None => Ok(Value::Null),
    }
}

fn regex_split(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let input = string_arg(ctx, args[1])?;
    let pieces = with_regex(ctx, args[0])?.split(&input).map_err(EvalError::native)?;
    let values: Vec<Value> = pieces
        .into_iter()
        .map(|piece| Value::Ref(ctx.heap.alloc_str(piece)))
        .collect();
    Ok(list::from_values(&mut ctx.heap, &values))
}

fn regex_replace(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let input = string_arg(ctx, args[1])?;
    let replacement = string_arg(ctx, args[2])?;
    let replaced = with_regex(ctx, args[0])?
        .replace_all(&input, &replacement)
        .map_err(EvalError::native)?;
    Ok(Value::Ref(ctx.heap.alloc_str(replaced)))
}

fn with_match(ctx: &RuntimeContext, value: Value) -> Result<&crate::types::handle::RegexMatchHandle, EvalError> {
    if let Value::Ref(id) = value
        && let HeapData::Handle(Handle::RegexMatch(handle)) = ctx.heap.get(id)
    {
        Ok(handle)
    } else {
        Err(EvalError::native("this operation requires a regex match"))
    }
}

fn match_before(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let text = with_match(ctx, args[0])?.before().to_owned();
    Ok(Value::Ref(ctx.heap.alloc_str(text)))
}

fn match_after(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let text = with_match(ctx, args[0])?.after().to_owned();
    Ok(Value::Ref(ctx.heap.alloc_str(text)))
}

fn match_range(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let range = with_match(ctx, args[0])?.range.clone();
    let value = RangeValue::int(Kind::Int64, range.start as i64, range.end as i64, None)
        .map_err(|_| EvalError::native("match range is degenerate"))?;
    Ok(Value::Ref(ctx.heap.alloc(HeapData::Range(value))))
}

fn match_capture(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let name = match args[1] {
        Value::Symbol(symbol) => ctx.symbols.name(symbol).to_owned(),
        other => string_arg(ctx, other)?,
    };
    let captured = with_match(ctx, args[0])?.named_capture(&name).map(ToOwned::to_owned);
    match captured {
        Some(text) => Ok(Value::Ref(ctx.heap.alloc_str(text))),
        None => Ok(Value::Null),
    }
}

// ----------------------------------------------------------------------
// Timestamps.

fn alloc_ts(ctx: &mut RuntimeContext, ts: Timestamp) -> Value {
    Value::Ref(ctx.heap.alloc(HeapData::Timestamp(ts)))
}

fn with_ts(ctx: &RuntimeContext, value: Value) -> Result<Timestamp, EvalError> {
    if let Value::Ref(id) = value
        && let HeapData::Timestamp(ts) = ctx.heap.get(id)
    {
        Ok(*ts)
    } else {
        Err(EvalError::native("this operation requires a timestamp"))
    }
}

fn ts_now(ctx: &mut RuntimeContext, _args: &[Value]) -> Result<Value, EvalError> {
    let now = chrono::Utc::now();
    let ts = Timestamp::new(now.timestamp(), i64::from(now.timestamp_subsec_nanos()));
    Ok(alloc_ts(ctx, ts))
}

fn ts_from_unix(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let seconds = args[1]
        .as_int()
        .ok_or_else(|| EvalError::native("'from-unix' requires an integer"))?;
    Ok(alloc_ts(ctx, Timestamp::from_unix(seconds)))
}

fn ts_to_unix(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Int64(with_ts(ctx, args[0])?.to_unix()))
}

fn ts_from_ticks(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let ticks = args[1]
        .as_int()
        .ok_or_else(|| EvalError::native("'from-windows-ticks' requires an integer"))?;
    Ok(alloc_ts(ctx, Timestamp::from_windows_ticks(ticks)))
}

fn ts_to_ticks(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Int64(with_ts(ctx, args[0])?.to_windows_ticks()))
}

fn ts_diff(ctx: &mut RuntimeContext, args: &[Value]) -> Result<Value, EvalError> {
    let a = with_ts(ctx, args[0])?;
    let b = with_ts(ctx, args[1])?;
    Ok(Value::Real64(a.diff_seconds(b)))
}

fn ts_add(ctx: &mut RuntimeContext, args: &[Value], unit: DurationUnit) -> Result<Value, EvalError> {
    let ts = with_ts(ctx, args[0])?;
    let amount = args[1]
        .as_float(&ctx.heap)
        .or_else(|| args[1].as_int().map(|v| v as f64))
        .ok_or_else(|| EvalError::native("duration amounts must be numeric"))?;
    Ok(alloc_ts(ctx, ts.add_units(amount, unit)))
}
