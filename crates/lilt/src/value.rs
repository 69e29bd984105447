//! The runtime value model.
//!
//! Every runtime value is one [`Value`]: small kinds carry their payload
//! inline and copy freely through the VM stack; everything else boxes into
//! the arena and travels as `Ref(HeapId)`. The kind of a value never changes
//! after construction.
//!
//! Equality comes in two strengths. [`Value::compare_equal`] is the
//! constant-time primitive: payload equality for unboxed kinds, content
//! equality for strings, reference identity for other boxed values.
//! [`Value::deep_equal`] recurses through lists, pairs, and objects, guarded
//! by a visited set so cyclic data terminates. [`Value::hash_value`] agrees
//! with `compare_equal`.

use ahash::AHashSet;

use crate::{
    heap::{Heap, HeapData, HeapId},
    intern::{KnownSymbol, SymbolId, SymbolTable},
    limits::DEFAULT_MAX_DATA_DEPTH,
    types::object::UserObject,
};

/// A runtime value.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    /// 32-bit decimal-presentation real.
    Real32(f32),
    /// 64-bit decimal-presentation real.
    Real64(f64),
    Float32(f32),
    Float64(f64),
    /// A single byte-sized character.
    Char(u8),
    /// A Unicode code point.
    Uni(char),
    Symbol(SymbolId),
    /// A boxed value in the arena.
    Ref(HeapId),
}

/// The closed set of value kinds, used for dispatch and `typeof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Byte,
    Int16,
    Int32,
    Int64,
    Real32,
    Real64,
    Real128,
    Float32,
    Float64,
    Char,
    Uni,
    Symbol,
    String,
    ByteArray,
    List,
    Pair,
    Range,
    Object,
    Function,
    Closure,
    Timestamp,
    Handle,
    Syntax,
    Till,
}

impl Kind {
    /// The formal type symbol `typeof` pushes for this kind.
    #[must_use]
    pub fn type_symbol(self) -> SymbolId {
        let known = match self {
            Self::Null => KnownSymbol::NullName,
            Self::Bool => KnownSymbol::Bool,
            Self::Byte => KnownSymbol::ByteName,
            Self::Int16 => KnownSymbol::Integer16Name,
            Self::Int32 => KnownSymbol::Integer32Name,
            Self::Int64 => KnownSymbol::Integer64Name,
            Self::Real32 => KnownSymbol::Real32Name,
            Self::Real64 => KnownSymbol::Real64Name,
            Self::Real128 => KnownSymbol::Real128Name,
            Self::Float32 => KnownSymbol::Float32Name,
            Self::Float64 => KnownSymbol::Float64Name,
            Self::Char => KnownSymbol::CharName,
            Self::Uni => KnownSymbol::UniName,
            Self::Symbol => KnownSymbol::SymbolName,
            Self::String => KnownSymbol::StringOp,
            Self::ByteArray => KnownSymbol::ByteArrayName,
            Self::List => KnownSymbol::ListName,
            Self::Pair => KnownSymbol::PairName,
            Self::Range => KnownSymbol::RangeName,
            Self::Object => KnownSymbol::ObjectName,
            Self::Function | Self::Closure => KnownSymbol::FnName,
            Self::Timestamp => KnownSymbol::Timestamp,
            Self::Handle => KnownSymbol::HandleName,
            Self::Syntax => KnownSymbol::SyntaxName,
            Self::Till => KnownSymbol::TillContinuationName,
        };
        known.id()
    }
}

impl Value {
    /// The kind tag of this value.
    #[must_use]
    pub fn kind(self, heap: &Heap) -> Kind {
        match self {
            Self::Null => Kind::Null,
            Self::Bool(_) => Kind::Bool,
            Self::Byte(_) => Kind::Byte,
            Self::Int16(_) => Kind::Int16,
            Self::Int32(_) => Kind::Int32,
            Self::Int64(_) => Kind::Int64,
            Self::Real32(_) => Kind::Real32,
            Self::Real64(_) => Kind::Real64,
            Self::Float32(_) => Kind::Float32,
            Self::Float64(_) => Kind::Float64,
            Self::Char(_) => Kind::Char,
            Self::Uni(_) => Kind::Uni,
            Self::Symbol(_) => Kind::Symbol,
            Self::Ref(id) => match heap.get(id) {
                HeapData::Str(_) => Kind::String,
                HeapData::ByteArray(_) => Kind::ByteArray,
                HeapData::Cons(_) => Kind::List,
                HeapData::Pair(_) => Kind::Pair,
                HeapData::Real128(_) => Kind::Real128,
                HeapData::Object(_) => Kind::Object,
                HeapData::Function(_) => Kind::Function,
                HeapData::Closure(_) => Kind::Closure,
                HeapData::Range(_) => Kind::Range,
                HeapData::Timestamp(_) => Kind::Timestamp,
                HeapData::Handle(_) => Kind::Handle,
                HeapData::Syntax(_) => Kind::Syntax,
                HeapData::Till(_) => Kind::Till,
            },
        }
    }

    /// True when this is the null singleton.
    #[must_use]
    pub fn is_null(self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness: null and false are falsy; the zero of every numeric kind
    /// is falsy; everything else is truthy.
    #[must_use]
    pub fn to_bool(self, heap: &Heap) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => b,
            Self::Byte(v) => v != 0,
            Self::Int16(v) => v != 0,
            Self::Int32(v) => v != 0,
            Self::Int64(v) => v != 0,
            Self::Real32(v) | Self::Float32(v) => v != 0.0,
            Self::Real64(v) | Self::Float64(v) => v != 0.0,
            Self::Char(c) => c != 0,
            Self::Uni(c) => c != '\0',
            Self::Symbol(_) => true,
            Self::Ref(id) => match heap.get(id) {
                HeapData::Str(s) => !s.is_empty(),
                HeapData::Real128(v) => *v != 0.0,
                _ => true,
            },
        }
    }

    /// Constant-time equality.
    ///
    /// Unboxed kinds compare by payload (across sibling numeric kinds of the
    /// same family), strings compare by content, every other boxed value
    /// compares by reference identity.
    #[must_use]
    pub fn compare_equal(self, other: Self, heap: &Heap) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Uni(a), Self::Uni(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => {
                if a == b {
                    return true;
                }
                match (heap.get(a), heap.get(b)) {
                    (HeapData::Str(x), HeapData::Str(y)) => x == y,
                    (HeapData::Real128(x), HeapData::Real128(y)) => x == y,
                    _ => false,
                }
            }
            _ => match (self.as_int(), other.as_int()) {
                (Some(a), Some(b)) => a == b,
                _ => match (self.as_float(heap), other.as_float(heap)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                },
            },
        }
    }

    /// Integer payload when this is an integer kind.
    #[must_use]
    pub fn as_int(self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(v)),
            Self::Int16(v) => Some(i64::from(v)),
            Self::Int32(v) => Some(i64::from(v)),
            Self::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// Floating payload when this is a real/float kind.
    #[must_use]
    pub fn as_float(self, heap: &Heap) -> Option<f64> {
        match self {
            Self::Real32(v) | Self::Float32(v) => Some(f64::from(v)),
            Self::Real64(v) | Self::Float64(v) => Some(v),
            Self::Ref(id) => match heap.get(id) {
                HeapData::Real128(v) => Some(*v),
                _ => None,
            },
            _ => None,
        }
    }

    /// Structural equality, recursing through lists, pairs, and objects.
    ///
    /// A visited set of boxed-id pairs terminates cyclic comparisons: a pair
    /// already under comparison is assumed equal, which makes two isomorphic
    /// cycles compare equal instead of diverging.
    #[must_use]
    pub fn deep_equal(self, other: Self, heap: &Heap) -> bool {
        let mut visited: AHashSet<(HeapId, HeapId)> = AHashSet::new();
        self.deep_equal_inner(other, heap, &mut visited, 0)
    }

    fn deep_equal_inner(
        self,
        other: Self,
        heap: &Heap,
        visited: &mut AHashSet<(HeapId, HeapId)>,
        depth: usize,
    ) -> bool {
        if depth > DEFAULT_MAX_DATA_DEPTH {
            return false;
        }
        if let (Self::Ref(a), Self::Ref(b)) = (self, other) {
            if a == b {
                return true;
            }
            match (heap.get(a), heap.get(b)) {
                (HeapData::Cons(x), HeapData::Cons(y)) => {
                    if !visited.insert((a, b)) {
                        return true;
                    }
                    x.a.deep_equal_inner(y.a, heap, visited, depth + 1)
                        && x.d.deep_equal_inner(y.d, heap, visited, depth + 1)
                }
                (HeapData::Pair(x), HeapData::Pair(y)) => {
                    if !visited.insert((a, b)) {
                        return true;
                    }
                    x.left.deep_equal_inner(y.left, heap, visited, depth + 1)
                        && x.right.deep_equal_inner(y.right, heap, visited, depth + 1)
                }
                (HeapData::Object(x), HeapData::Object(y)) => {
                    if !visited.insert((a, b)) {
                        return true;
                    }
                    if x.props.len() != y.props.len() {
                        return false;
                    }
                    let mut equal = true;
                    x.props.for_each(|key, value| {
                        if equal {
                            match y.props.try_get(key) {
                                Some(other_value) => {
                                    if !value.deep_equal_inner(*other_value, heap, visited, depth + 1) {
                                        equal = false;
                                    }
                                }
                                None => equal = false,
                            }
                        }
                    });
                    equal
                }
                _ => self.compare_equal(other, heap),
            }
        } else {
            self.compare_equal(other, heap)
        }
    }

    /// A hash consistent with [`Value::compare_equal`].
    #[must_use]
    pub fn hash_value(self, heap: &Heap) -> u32 {
        match self {
            Self::Null => 0,
            Self::Bool(b) => u32::from(b) + 1,
            Self::Symbol(id) => crate::hash_oracle::mix_int32(id.index() as i32),
            Self::Char(c) => crate::hash_oracle::mix_int32(i32::from(c)),
            Self::Uni(c) => crate::hash_oracle::mix_int32(c as i32),
            Self::Ref(id) => match heap.get(id) {
                HeapData::Str(s) => crate::hash_oracle::hash_str(s),
                HeapData::Real128(v) => hash_f64(*v),
                _ => crate::hash_oracle::mix_int32(id.index() as i32),
            },
            _ => {
                if let Some(i) = self.as_int() {
                    // Integral floats hash like their integer value so the
                    // numeric families agree with compare_equal.
                    crate::hash_oracle::mix_int32((i ^ (i >> 32)) as i32)
                } else if let Some(f) = self.as_float(heap) {
                    hash_f64(f)
                } else {
                    0
                }
            }
        }
    }

    /// Renders this value the way the REPL and error messages do.
    ///
    /// Lists are walked with a tortoise-and-hare so cyclic structure prints
    /// as `[...]` instead of looping; objects render their name.
    #[must_use]
    pub fn stringify(self, heap: &Heap, symbols: &SymbolTable) -> String {
        let mut out = String::new();
        self.stringify_into(&mut out, heap, symbols, 0);
        out
    }

    fn stringify_into(self, out: &mut String, heap: &Heap, symbols: &SymbolTable, depth: usize) {
        use std::fmt::Write;
        if depth > DEFAULT_MAX_DATA_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(b) => out.push_str(if b { "true" } else { "false" }),
            Self::Byte(v) => {
                let _ = write!(out, "{v}x");
            }
            Self::Int16(v) => {
                let _ = write!(out, "{v}s");
            }
            Self::Int32(v) => {
                let _ = write!(out, "{v}t");
            }
            Self::Int64(v) => {
                let _ = write!(out, "{v}");
            }
            Self::Real32(v) | Self::Float32(v) => {
                let mut buffer = ryu::Buffer::new();
                out.push_str(buffer.format(v));
            }
            Self::Real64(v) | Self::Float64(v) => {
                let mut buffer = ryu::Buffer::new();
                out.push_str(buffer.format(v));
            }
            Self::Char(c) => {
                let _ = write!(out, "'{}'", char::from(c));
            }
            Self::Uni(c) => {
                let _ = write!(out, "'{c}'");
            }
            Self::Symbol(id) => out.push_str(symbols.name(id)),
            Self::Ref(id) => match heap.get(id) {
                HeapData::Str(s) => out.push_str(s),
                HeapData::ByteArray(bytes) => {
                    let _ = write!(out, "<byte-array of {} bytes>", bytes.len());
                }
                HeapData::Real128(v) => {
                    let mut buffer = ryu::Buffer::new();
                    out.push_str(buffer.format(*v));
                    out.push('L');
                }
                HeapData::Cons(_) => self.stringify_list(out, heap, symbols, depth),
                HeapData::Pair(p) => {
                    out.push('(');
                    p.left.stringify_into(out, heap, symbols, depth + 1);
                    out.push_str(" . ");
                    p.right.stringify_into(out, heap, symbols, depth + 1);
                    out.push(')');
                }
                HeapData::Object(obj) => {
                    if obj.name.is_some() {
                        let _ = write!(out, "<{}>", symbols.name(obj.name));
                    } else {
                        out.push_str("<object>");
                    }
                }
                HeapData::Function(_) | HeapData::Closure(_) => out.push_str("<fn>"),
                HeapData::Range(range) => range.stringify_into(out),
                HeapData::Timestamp(ts) => {
                    let _ = write!(out, "{ts}");
                }
                HeapData::Handle(handle) => {
                    let _ = write!(out, "<{}>", symbols.name(handle.kind_symbol()));
                }
                HeapData::Syntax(_) => out.push_str("<syntax>"),
                HeapData::Till(_) => out.push_str("<till-continuation>"),
            },
        }
    }

    /// Prints a list, detecting cycles with Floyd's tortoise and hare.
    fn stringify_list(self, out: &mut String, heap: &Heap, symbols: &SymbolTable, depth: usize) {
        out.push('[');
        let mut slow = self;
        let mut fast = self;
        let mut first = true;
        let mut step = 0_usize;
        loop {
            let Value::Ref(id) = fast else { break };
            let HeapData::Cons(cell) = heap.get(id) else {
                // Improper tail: print dot notation.
                out.push_str(" . ");
                fast.stringify_into(out, heap, symbols, depth + 1);
                break;
            };
            if !first {
                out.push(' ');
            }
            first = false;
            cell.a.stringify_into(out, heap, symbols, depth + 1);
            fast = cell.d;

            // Advance the tortoise every other step; meeting it means a cycle.
            step += 1;
            if step % 2 == 0 {
                if let Value::Ref(slow_id) = slow
                    && let HeapData::Cons(slow_cell) = heap.get(slow_id)
                {
                    slow = slow_cell.d;
                }
                if let (Value::Ref(a), Value::Ref(b)) = (slow, fast)
                    && a == b
                {
                    out.push_str(" ...");
                    break;
                }
            }
        }
        out.push(']');
    }

    /// True when this list is well-formed: following `d` reaches `Null`
    /// without cycles. Non-list values are not well-formed lists; `Null` is
    /// the empty well-formed list.
    #[must_use]
    pub fn is_well_formed_list(self, heap: &Heap) -> bool {
        let mut slow = self;
        let mut fast = self;
        loop {
            match fast {
                Value::Null => return true,
                Value::Ref(id) => match heap.get(id) {
                    HeapData::Cons(cell) => fast = cell.d,
                    _ => return false,
                },
                _ => return false,
            }
            match fast {
                Value::Null => return true,
                Value::Ref(id) => match heap.get(id) {
                    HeapData::Cons(cell) => fast = cell.d,
                    _ => return false,
                },
                _ => return false,
            }
            if let Value::Ref(id) = slow
                && let HeapData::Cons(cell) = heap.get(id)
            {
                slow = cell.d;
            }
            if let (Value::Ref(a), Value::Ref(b)) = (slow, fast)
                && a == b
            {
                return false;
            }
        }
    }

    /// Reads a structural property that exists on the value itself, before
    /// any prototype lookup: object properties, cons `a`/`d`, pair
    /// `left`/`right`, range fields, string/list `length`.
    #[must_use]
    pub fn get_own_property(self, name: SymbolId, heap: &Heap) -> Option<Value> {
        let Self::Ref(id) = self else { return None };
        match heap.get(id) {
            HeapData::Object(obj) => obj.props.try_get(&name).copied(),
            HeapData::Cons(cell) => {
                if name == KnownSymbol::A.id() {
                    Some(cell.a)
                } else if name == KnownSymbol::D.id() {
                    Some(cell.d)
                } else {
                    None
                }
            }
            HeapData::Pair(pair) => {
                if name == KnownSymbol::Left.id() {
                    Some(pair.left)
                } else if name == KnownSymbol::Right.id() {
                    Some(pair.right)
                } else {
                    None
                }
            }
            HeapData::Range(range) => range.get_property(name),
            HeapData::Str(s) => {
                if name == KnownSymbol::Length.id() {
                    Some(Self::Int64(s.chars().count() as i64))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// The object payload, when this is a user object.
    #[must_use]
    pub fn as_object(self, heap: &Heap) -> Option<&UserObject> {
        if let Self::Ref(id) = self
            && let HeapData::Object(obj) = heap.get(id)
        {
            Some(obj)
        } else {
            None
        }
    }
}

fn hash_f64(f: f64) -> u32 {
    // Integral floats hash like integers for family agreement.
    if f.trunc() == f && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        let i = f as i64;
        crate::hash_oracle::mix_int32((i ^ (i >> 32)) as i32)
    } else {
        let bits = f.to_bits();
        crate::hash_oracle::mix_int32((bits ^ (bits >> 32)) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::list;

    #[test]
    fn null_is_falsy_and_equal_to_itself() {
        let heap = Heap::new();
        assert!(!Value::Null.to_bool(&heap));
        assert!(Value::Null.compare_equal(Value::Null, &heap));
    }

    #[test]
    fn numeric_family_members_compare_equal() {
        let heap = Heap::new();
        assert!(Value::Int16(5).compare_equal(Value::Int64(5), &heap));
        assert!(Value::Byte(0).compare_equal(Value::Int32(0), &heap));
        assert!(!Value::Int64(5).compare_equal(Value::Int64(6), &heap));
    }

    #[test]
    fn strings_compare_by_content_and_hash_agrees() {
        let mut heap = Heap::new();
        let a = Value::Ref(heap.alloc_str("tide"));
        let b = Value::Ref(heap.alloc_str("tide"));
        assert!(a.compare_equal(b, &heap));
        assert_eq!(a.hash_value(&heap), b.hash_value(&heap));
    }

    #[test]
    fn distinct_conses_are_not_reference_equal_but_deep_equal() {
        let mut heap = Heap::new();
        let symbols = SymbolTable::new();
        let a = list::from_values(&mut heap, &[Value::Int64(1), Value::Int64(2)]);
        let b = list::from_values(&mut heap, &[Value::Int64(1), Value::Int64(2)]);
        assert!(!a.compare_equal(b, &heap));
        assert!(a.deep_equal(b, &heap));
        assert_eq!(a.stringify(&heap, &symbols), "[1 2]");
    }

    #[test]
    fn cyclic_list_stringifies_finitely() {
        let mut heap = Heap::new();
        let symbols = SymbolTable::new();
        let cell = heap.alloc(HeapData::Cons(crate::types::list::Cons {
            a: Value::Int64(1),
            d: Value::Null,
            loc: None,
        }));
        // Tie the knot.
        if let HeapData::Cons(c) = heap.get_mut(cell) {
            c.d = Value::Ref(cell);
        }
        let rendered = Value::Ref(cell).stringify(&heap, &symbols);
        assert!(rendered.ends_with("...]"), "got: {rendered}");
        assert!(!Value::Ref(cell).is_well_formed_list(&heap));
    }

    #[test]
    fn well_formed_list_detection() {
        let mut heap = Heap::new();
        let proper = list::from_values(&mut heap, &[Value::Int64(1)]);
        assert!(proper.is_well_formed_list(&heap));
        assert!(Value::Null.is_well_formed_list(&heap));
        assert!(!Value::Int64(3).is_well_formed_list(&heap));
    }
}
