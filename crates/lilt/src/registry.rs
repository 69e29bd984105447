//! The built-in function registry.
//!
//! External functions register with a name, a body, and argument-checking
//! metadata. Registration collapses degenerate flag combinations so the call
//! path dispatches on one of a small closed set of prologue variants:
//! `{no check, min, max, min+max, exact}`, each with or without per-argument
//! type checks, plus the state-machine and raw flavours.

use smallvec::SmallVec;

use crate::{
    intern::SymbolId,
    runtime::RuntimeContext,
    value::{Kind, Value},
    vm::EvalError,
};

/// Arguments windows are nearly always tiny.
pub type ArgVec = SmallVec<[Value; 8]>;

/// An ordinary external body: receives the evaluated argument window.
pub type NativeFn = fn(&mut RuntimeContext, &[Value]) -> Result<Value, EvalError>;

/// A state-machine start body: consumes the call's arguments, produces the
/// per-call state.
pub type SmStartFn = fn(&mut RuntimeContext, &[Value]) -> Result<Box<SmState>, EvalError>;

/// A state-machine step body: re-entered once per iteration with the result
/// of the previous requested call.
pub type SmBodyFn = fn(&mut RuntimeContext, &mut SmState, Value) -> Result<SmStep, EvalError>;

/// Registration flags, before collapsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgFlags {
    pub min_check: bool,
    pub max_check: bool,
    pub exact_check: bool,
    pub types_check: bool,
    pub state_machine: bool,
    pub raw: bool,
}

/// The collapsed count-check variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountCheck {
    None,
    Min,
    Max,
    MinMax,
    Exact,
}

/// The per-argument type classes a checked external may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeClass {
    Any = 0,
    Integer = 1,
    Real = 2,
    Str = 3,
    List = 4,
    Fn = 5,
    Symbol = 6,
    Bool = 7,
    Object = 8,
    Range = 9,
}

impl TypeClass {
    /// True when a value of `kind` satisfies this class.
    #[must_use]
    pub fn admits(self, kind: Kind) -> bool {
        match self {
            Self::Any => true,
            Self::Integer => matches!(kind, Kind::Byte | Kind::Int16 | Kind::Int32 | Kind::Int64),
            Self::Real => matches!(
                kind,
                Kind::Real32 | Kind::Real64 | Kind::Real128 | Kind::Float32 | Kind::Float64
            ),
            Self::Str => kind == Kind::String,
            Self::List => matches!(kind, Kind::List | Kind::Null),
            Self::Fn => kind == Kind::Function,
            Self::Symbol => kind == Kind::Symbol,
            Self::Bool => kind == Kind::Bool,
            Self::Object => kind == Kind::Object,
            Self::Range => kind == Kind::Range,
        }
    }
}

/// Opaque per-call state for state-machine externals.
pub type SmState = dyn std::any::Any;

/// What a state-machine step wants next.
pub enum SmStep {
    /// Call `function` with `args`; the VM re-enters the step body with the
    /// result.
    Call(Value, ArgVec),
    /// The machine is finished; its result is the given value.
    Done(Value),
}

/// The body of an external function.
pub enum NativeBody {
    /// Standard calling convention: checked argument window.
    Simple(NativeFn),
    /// Raw mode: no argument reshaping or checks; used by `Fn.call`/`Fn.apply`.
    Raw(NativeFn),
    /// State machine: one VM-mediated call per iteration, no native stack
    /// growth.
    StateMachine { start: SmStartFn, body: SmBodyFn },
}

impl std::fmt::Debug for NativeBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple(_) => f.write_str("Simple"),
            Self::Raw(_) => f.write_str("Raw"),
            Self::StateMachine { .. } => f.write_str("StateMachine"),
        }
    }
}

/// One registered external function.
#[derive(Debug)]
pub struct ExternalFunction {
    pub name: SymbolId,
    /// Space-separated argument names, for error messages.
    pub arg_names: Box<str>,
    pub body: NativeBody,
    pub count_check: CountCheck,
    pub min: u8,
    pub max: u8,
    /// Per-position type requirements; empty when unchecked.
    pub types: Box<[TypeClass]>,
}

impl ExternalFunction {
    /// Validates an argument window against this function's checks.
    pub fn check_args(&self, args: &[Value], ctx: &RuntimeContext) -> Result<(), EvalError> {
        let n = args.len();
        let name = ctx.symbols.name(self.name).to_owned();
        match self.count_check {
            CountCheck::None => {}
            CountCheck::Min => {
                if n < self.min as usize {
                    return Err(EvalError::native(format!(
                        "'{name}' requires at least {} arguments, but was called with {n}",
                        self.min
                    )));
                }
            }
            CountCheck::Max => {
                if n > self.max as usize {
                    return Err(EvalError::native(format!(
                        "'{name}' allows at most {} arguments, but was called with {n}",
                        self.max
                    )));
                }
            }
            CountCheck::MinMax => {
                if n < self.min as usize || n > self.max as usize {
                    return Err(EvalError::native(format!(
                        "'{name}' requires {} to {} arguments, but was called with {n}",
                        self.min, self.max
                    )));
                }
            }
            CountCheck::Exact => {
                if n != self.min as usize {
                    return Err(EvalError::native(format!(
                        "'{name}' requires exactly {} arguments, but was called with {n}",
                        self.min
                    )));
                }
            }
        }
        for (index, class) in self.types.iter().enumerate() {
            if let Some(arg) = args.get(index)
                && !class.admits(arg.kind(&ctx.heap))
            {
                return Err(EvalError::native(format!(
                    "Argument {} to '{name}' is of the wrong type",
                    index + 1
                )));
            }
        }
        Ok(())
    }
}

/// The registry of all external functions in one runtime.
#[derive(Debug, Default)]
pub struct Registry {
    functions: Vec<ExternalFunction>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function, collapsing degenerate check combinations:
    /// `min == max` with both bounds becomes an exact check, a zero minimum
    /// with only the minimum flag drops the check entirely, and an empty
    /// type list drops the types flag.
    pub fn setup_function(
        &mut self,
        name: SymbolId,
        body: NativeBody,
        arg_names: &str,
        flags: ArgFlags,
        min: u8,
        max: u8,
        types: &[TypeClass],
    ) -> u32 {
        let mut count_check = match (flags.exact_check, flags.min_check, flags.max_check) {
            (true, _, _) => CountCheck::Exact,
            (false, true, true) => CountCheck::MinMax,
            (false, true, false) => CountCheck::Min,
            (false, false, true) => CountCheck::Max,
            (false, false, false) => CountCheck::None,
        };
        // Collapse the degenerate shapes.
        if count_check == CountCheck::MinMax && min == max {
            count_check = CountCheck::Exact;
        }
        if count_check == CountCheck::Min && min == 0 {
            count_check = CountCheck::None;
        }
        let types: Box<[TypeClass]> = if flags.types_check && !types.is_empty() {
            types.into()
        } else {
            Box::new([])
        };

        let id = self.functions.len() as u32;
        self.functions.push(ExternalFunction {
            name,
            arg_names: arg_names.into(),
            body,
            count_check,
            min,
            max,
            types,
        });
        id
    }

    /// Registers `new_name` as an alias sharing the existing function's id.
    ///
    /// External values carry the id, so the alias is just another property
    /// naming the same id; this re-registers the metadata under the new name
    /// for error messages.
    pub fn setup_synonym(&mut self, existing: u32, new_name: SymbolId) -> u32 {
        let source = &self.functions[existing as usize];
        let body = match &source.body {
            NativeBody::Simple(f) => NativeBody::Simple(*f),
            NativeBody::Raw(f) => NativeBody::Raw(*f),
            NativeBody::StateMachine { start, body } => NativeBody::StateMachine {
                start: *start,
                body: *body,
            },
        };
        let id = self.functions.len() as u32;
        self.functions.push(ExternalFunction {
            name: new_name,
            arg_names: source.arg_names.clone(),
            body,
            count_check: source.count_check,
            min: source.min,
            max: source.max,
            types: source.types.clone(),
        });
        id
    }

    /// Looks up a registered function.
    #[must_use]
    pub fn get(&self, id: u32) -> &ExternalFunction {
        &self.functions[id as usize]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut RuntimeContext, _: &[Value]) -> Result<Value, EvalError> {
        Ok(Value::Null)
    }

    #[test]
    fn min_equals_max_collapses_to_exact() {
        let mut registry = Registry::new();
        let id = registry.setup_function(
            SymbolId::from_index(1),
            NativeBody::Simple(noop),
            "a b",
            ArgFlags {
                min_check: true,
                max_check: true,
                ..ArgFlags::default()
            },
            2,
            2,
            &[],
        );
        assert_eq!(registry.get(id).count_check, CountCheck::Exact);
    }

    #[test]
    fn zero_min_alone_drops_the_check() {
        let mut registry = Registry::new();
        let id = registry.setup_function(
            SymbolId::from_index(1),
            NativeBody::Simple(noop),
            "",
            ArgFlags {
                min_check: true,
                ..ArgFlags::default()
            },
            0,
            0,
            &[],
        );
        assert_eq!(registry.get(id).count_check, CountCheck::None);
    }

    #[test]
    fn empty_type_list_drops_the_types_check() {
        let mut registry = Registry::new();
        let id = registry.setup_function(
            SymbolId::from_index(1),
            NativeBody::Simple(noop),
            "",
            ArgFlags {
                types_check: true,
                ..ArgFlags::default()
            },
            0,
            0,
            &[],
        );
        assert!(registry.get(id).types.is_empty());
    }

    #[test]
    fn synonym_shares_metadata() {
        let mut registry = Registry::new();
        let id = registry.setup_function(
            SymbolId::from_index(1),
            NativeBody::Simple(noop),
            "x",
            ArgFlags {
                exact_check: true,
                ..ArgFlags::default()
            },
            1,
            1,
            &[],
        );
        let alias = registry.setup_synonym(id, SymbolId::from_index(2));
        assert_eq!(registry.get(alias).count_check, CountCheck::Exact);
        assert_eq!(registry.get(alias).min, 1);
    }
}
