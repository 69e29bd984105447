//! Left/right pairs.

use crate::{
    diagnostics::Position,
    heap::{Heap, HeapData},
    value::Value,
};

/// A two-slot product value, distinct from a two-element list.
#[derive(Debug)]
pub struct PairCell {
    pub left: Value,
    pub right: Value,
    /// Source attribution, set on parser-built pairs.
    pub loc: Option<Position>,
}

/// Allocates a pair.
pub fn pair(heap: &mut Heap, left: Value, right: Value) -> Value {
    Value::Ref(heap.alloc(HeapData::Pair(PairCell { left, right, loc: None })))
}
