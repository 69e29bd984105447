//! The runtime context: everything one engine instance owns.
//!
//! The original design kept the symbol table, hash oracle, module cache, and
//! known base objects in process-wide singletons; here they all hang off one
//! [`RuntimeContext`] passed explicitly through the parser, compiler, and
//! VM. One context per engine, one engine per thread.

use crate::{
    heap::{Heap, HeapData, HeapId},
    intern::{KnownSymbol, SymbolId, SymbolTable},
    limits::Limits,
    modules::ModuleCache,
    registry::Registry,
    types::object::{Security, UserObject},
    value::{Kind, Value},
};

/// The per-kind base objects, created once at init and frozen
/// (extended-but-not-mutated) afterwards.
#[derive(Debug, Clone, Copy)]
pub struct KnownBases {
    /// The distinguished root every `base` chain reaches.
    pub primitive: HeapId,
    /// Base of anonymous user objects.
    pub object: HeapId,
    pub number: HeapId,
    pub list: HeapId,
    pub string: HeapId,
    pub symbol: HeapId,
    pub pair: HeapId,
    pub range: HeapId,
    pub function: HeapId,
    pub handle: HeapId,
    pub timestamp: HeapId,
}

impl KnownBases {
    /// Allocates the base-object tree. Properties are installed by the
    /// built-in setup pass, after which every object here is frozen.
    pub fn create(heap: &mut Heap) -> Self {
        let primitive = heap.alloc(HeapData::Object(UserObject::named(
            Value::Null,
            KnownSymbol::Primitive.id(),
        )));
        let root = Value::Ref(primitive);
        let mut named = |heap: &mut Heap, name: KnownSymbol| {
            heap.alloc(HeapData::Object(UserObject::named(root, name.id())))
        };
        Self {
            primitive,
            object: named(heap, KnownSymbol::ObjectName),
            number: named(heap, KnownSymbol::Integer64Name),
            list: named(heap, KnownSymbol::ListName),
            string: named(heap, KnownSymbol::StringOp),
            symbol: named(heap, KnownSymbol::SymbolName),
            pair: named(heap, KnownSymbol::PairName),
            range: named(heap, KnownSymbol::RangeName),
            function: named(heap, KnownSymbol::FnName),
            handle: named(heap, KnownSymbol::HandleName),
            timestamp: named(heap, KnownSymbol::Timestamp),
        }
    }

    /// The base object for a primitive value of `kind`.
    #[must_use]
    pub fn base_for_kind(&self, kind: Kind) -> HeapId {
        match kind {
            Kind::List => self.list,
            Kind::String | Kind::ByteArray | Kind::Char | Kind::Uni => self.string,
            Kind::Symbol => self.symbol,
            Kind::Pair => self.pair,
            Kind::Range => self.range,
            Kind::Function | Kind::Closure => self.function,
            Kind::Handle | Kind::Syntax | Kind::Till => self.handle,
            Kind::Timestamp => self.timestamp,
            Kind::Object => self.object,
            Kind::Null => self.primitive,
            _ => self.number,
        }
    }

    /// Freezes every base object into extended-but-not-mutated posture.
    pub fn freeze(&self, heap: &mut Heap) {
        for id in [
            self.primitive,
            self.object,
            self.number,
            self.list,
            self.string,
            self.symbol,
            self.pair,
            self.range,
            self.function,
            self.handle,
            self.timestamp,
        ] {
            if let HeapData::Object(obj) = heap.get_mut(id) {
                obj.security = Security::frozen_base();
            }
        }
    }
}

/// Everything one engine owns: the arena, interned symbols, the external
/// function registry, the module cache, the known bases, and the limits.
#[derive(Debug)]
pub struct RuntimeContext {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub registry: Registry,
    pub modules: ModuleCache,
    pub bases: KnownBases,
    pub limits: Limits,
}

impl RuntimeContext {
    /// Initialises a fresh context: arena, symbols, empty registry and
    /// module cache, unfrozen bases. The engine's built-in setup pass
    /// populates and freezes the bases.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        let mut heap = Heap::new();
        let bases = KnownBases::create(&mut heap);
        Self {
            heap,
            symbols: SymbolTable::new(),
            registry: Registry::new(),
            modules: ModuleCache::new(),
            bases,
            limits,
        }
    }

    /// The prototype of a value: its own `base` for objects, the known base
    /// for its kind otherwise.
    #[must_use]
    pub fn base_of(&self, value: Value) -> Value {
        if let Some(obj) = value.as_object(&self.heap) {
            obj.base
        } else {
            Value::Ref(self.bases.base_for_kind(value.kind(&self.heap)))
        }
    }

    /// Looks a property up on a value, walking the `base` chain to the
    /// primitive root.
    #[must_use]
    pub fn get_property(&self, value: Value, name: SymbolId) -> Option<Value> {
        if let Some(own) = value.get_own_property(name, &self.heap) {
            return Some(own);
        }
        let mut cursor = self.base_of(value);
        loop {
            if let Some(found) = cursor.get_own_property(name, &self.heap) {
                return Some(found);
            }
            let Some(obj) = cursor.as_object(&self.heap) else {
                return None;
            };
            if obj.base.is_null() {
                return None;
            }
            cursor = obj.base;
        }
    }

    /// True when `value` derives from `ancestor` through its base chain.
    #[must_use]
    pub fn value_is(&self, value: Value, ancestor: Value) -> bool {
        let mut cursor = value;
        loop {
            if cursor.compare_equal(ancestor, &self.heap) {
                return true;
            }
            let next = self.base_of(cursor);
            if next.is_null() || next.compare_equal(cursor, &self.heap) {
                return false;
            }
            cursor = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_reaches_the_primitive_root() {
        let ctx = RuntimeContext::new(Limits::default());
        for value in [Value::Int64(1), Value::Bool(true), Value::Null] {
            assert!(ctx.value_is(value, Value::Ref(ctx.bases.primitive)));
        }
    }

    #[test]
    fn property_lookup_walks_the_base_chain() {
        let mut ctx = RuntimeContext::new(Limits::default());
        let name = ctx.symbols.get_symbol("greeting");
        let marker = Value::Int64(7);
        if let HeapData::Object(obj) = ctx.heap.get_mut(ctx.bases.primitive) {
            obj.set_property(name, marker).expect("unfrozen");
        }
        // An Int64 has no own properties; the walk ends at the root.
        let found = ctx.get_property(Value::Int64(0), name).expect("inherited");
        assert!(found.compare_equal(marker, &ctx.heap));
    }
}
