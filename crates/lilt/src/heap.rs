//! The boxed-value arena.
//!
//! Boxed runtime values live in one arena per engine, addressed by
//! [`HeapId`]. Values on the VM stack are small copyable tags
//! ([`crate::value::Value`]); anything bigger than a 64-bit payload boxes
//! into a [`HeapData`] slot here. The arena is append-only and freed
//! wholesale when its engine drops, which is the ownership model the
//! language assumes (no observable finalisation, no mid-run collection).

use std::sync::Arc;

use crate::{
    compiler::Program,
    function::FunctionValue,
    parser::SyntaxRule,
    types::{
        handle::Handle,
        list::Cons,
        object::UserObject,
        pair::PairCell,
        range::RangeValue,
        timestamp::Timestamp,
    },
    value::Value,
};

/// Index of a boxed value in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

impl HeapId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One boxed value.
#[derive(Debug)]
pub enum HeapData {
    /// Immutable UTF-8 string. Compares by content.
    Str(Box<str>),
    /// Mutable byte buffer.
    ByteArray(Vec<u8>),
    /// A cons cell; `d` chains to further cells or `Null`.
    Cons(Cons),
    /// A left/right pair.
    Pair(PairCell),
    /// 128-bit real literal, carried at 64-bit precision.
    Real128(f64),
    /// A property bag with a prototype.
    Object(UserObject),
    /// A callable: user closure or registered external.
    Function(FunctionValue),
    /// A captured lexical environment (one function activation's variables).
    Closure(Closure),
    /// A numeric range.
    Range(RangeValue),
    /// Seconds/nanos timestamp.
    Timestamp(Timestamp),
    /// Opaque host resource with a kind symbol and operation table.
    Handle(Handle),
    /// A user-declared grammar rule (parse-time value).
    Syntax(Arc<SyntaxRule>),
    /// One-shot escape continuation created by a till form.
    Till(TillContinuation),
}

impl HeapData {
    /// Static name of this payload's variant, for diagnostics.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "String",
            Self::ByteArray(_) => "ByteArray",
            Self::Cons(_) => "List",
            Self::Pair(_) => "Pair",
            Self::Real128(_) => "Real128",
            Self::Object(_) => "Object",
            Self::Function(_) => "Function",
            Self::Closure(_) => "Closure",
            Self::Range(_) => "Range",
            Self::Timestamp(_) => "Timestamp",
            Self::Handle(_) => "Handle",
            Self::Syntax(_) => "Syntax",
            Self::Till(_) => "TillContinuation",
        }
    }
}

/// A runtime activation environment: the variable slots of one function
/// call, linked to the environment it was created in.
///
/// Slots `0..num_args` hold arguments; the rest hold locals. The VM keeps
/// its working stack separately and records only the environment here, so a
/// closure captured by a nested function stays valid after the activation
/// returns.
#[derive(Debug)]
pub struct Closure {
    /// Index of the owning function in its program's function table.
    pub function: u32,
    /// The program the function belongs to.
    pub program: Arc<Program>,
    /// Lexically enclosing environment, if any.
    pub parent: Option<HeapId>,
    /// Argument and local slots.
    pub vars: Vec<Value>,
}

/// Runtime till escape continuation.
///
/// `activation` identifies the frame that created it; the continuation is
/// dead once that frame returns or an `EndTill` runs. `stack_floor` is the
/// operand-stack height when the till was entered: an escape restores the
/// stack to exactly that height, so a till nested inside a larger
/// expression leaves the surrounding partial state intact.
#[derive(Debug)]
pub struct TillContinuation {
    /// Index into the program's till-continuation table.
    pub till_index: u32,
    /// Activation id of the frame that executed `NewTill`.
    pub activation: u64,
    /// Operand-stack height at till entry.
    pub stack_floor: usize,
    /// False once the till's dynamic extent has ended.
    pub alive: bool,
}

/// The arena.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<HeapData>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Boxes a payload, returning its id.
    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        let id = HeapId(self.slots.len() as u32);
        self.slots.push(data);
        id
    }

    /// Boxes a string.
    pub fn alloc_str(&mut self, s: impl Into<Box<str>>) -> HeapId {
        self.alloc(HeapData::Str(s.into()))
    }

    /// Shared read access.
    ///
    /// # Panics
    /// Panics on a foreign id; ids are only minted by this arena.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.slots[id.index()]
    }

    /// Exclusive access.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slots[id.index()]
    }

    /// The string at `id`.
    ///
    /// # Panics
    /// Panics if `id` is not a string; callers check kinds first.
    #[must_use]
    pub fn str(&self, id: HeapId) -> &str {
        match self.get(id) {
            HeapData::Str(s) => s,
            other => panic!("expected string on heap, found {}", other.variant_name()),
        }
    }

    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
