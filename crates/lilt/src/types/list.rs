//! Cons cells and list plumbing.
//!
//! A list is `Null` or a chain of cons cells ending (when well-formed) in
//! `Null`. Cells built by the parser carry their source position so runtime
//! errors and macro output can be attributed back to source text.

use crate::{
    diagnostics::Position,
    heap::{Heap, HeapData, HeapId},
    value::Value,
};

/// One cons cell.
#[derive(Debug)]
pub struct Cons {
    pub a: Value,
    pub d: Value,
    /// Source attribution, set on parser-built cells.
    pub loc: Option<Position>,
}

/// Allocates one cons cell.
pub fn cons(heap: &mut Heap, a: Value, d: Value) -> Value {
    Value::Ref(heap.alloc(HeapData::Cons(Cons { a, d, loc: None })))
}

/// Allocates one cons cell with source attribution.
pub fn cons_at(heap: &mut Heap, a: Value, d: Value, loc: Position) -> Value {
    Value::Ref(heap.alloc(HeapData::Cons(Cons { a, d, loc: Some(loc) })))
}

/// Builds a proper list from a slice of values.
pub fn from_values(heap: &mut Heap, values: &[Value]) -> Value {
    let mut list = Value::Null;
    for value in values.iter().rev() {
        list = cons(heap, *value, list);
    }
    list
}

/// Collects the items of a proper list; `None` when the value is not a
/// well-formed list (improper tail or cycle).
#[must_use]
pub fn items(value: Value, heap: &Heap) -> Option<Vec<Value>> {
    if !value.is_well_formed_list(heap) {
        return None;
    }
    let mut out = Vec::new();
    let mut cursor = value;
    while let Value::Ref(id) = cursor {
        let HeapData::Cons(cell) = heap.get(id) else {
            return None;
        };
        out.push(cell.a);
        cursor = cell.d;
    }
    Some(out)
}

/// Length of a proper list; `None` for improper or cyclic chains
/// (the "safe length" walk).
#[must_use]
pub fn safe_length(value: Value, heap: &Heap) -> Option<usize> {
    if !value.is_well_formed_list(heap) {
        return None;
    }
    let mut len = 0;
    let mut cursor = value;
    while let Value::Ref(id) = cursor {
        let HeapData::Cons(cell) = heap.get(id) else {
            return None;
        };
        len += 1;
        cursor = cell.d;
    }
    Some(len)
}

/// The head of a cons, or `Null` for anything else.
#[must_use]
pub fn car(value: Value, heap: &Heap) -> Value {
    if let Value::Ref(id) = value
        && let HeapData::Cons(cell) = heap.get(id)
    {
        cell.a
    } else {
        Value::Null
    }
}

/// The tail of a cons, or `Null` for anything else.
#[must_use]
pub fn cdr(value: Value, heap: &Heap) -> Value {
    if let Value::Ref(id) = value
        && let HeapData::Cons(cell) = heap.get(id)
    {
        cell.d
    } else {
        Value::Null
    }
}

/// The source attribution of a parser-built cell.
#[must_use]
pub fn source_location(value: Value, heap: &Heap) -> Option<Position> {
    if let Value::Ref(id) = value
        && let HeapData::Cons(cell) = heap.get(id)
    {
        cell.loc.clone()
    } else {
        None
    }
}

/// Concatenates proper lists into one new proper list.
pub fn combine(heap: &mut Heap, lists: &[Value]) -> Option<Value> {
    let mut all = Vec::new();
    for list in lists {
        match *list {
            Value::Null => {}
            other => all.extend(items(other, heap)?),
        }
    }
    Some(from_values(heap, &all))
}

/// The heap id of a cons-cell value, when it is one.
#[must_use]
pub fn cell_id(value: Value, heap: &Heap) -> Option<HeapId> {
    if let Value::Ref(id) = value
        && matches!(heap.get(id), HeapData::Cons(_))
    {
        Some(id)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_values_round_trips_through_items() {
        let mut heap = Heap::new();
        let list = from_values(&mut heap, &[Value::Int64(1), Value::Int64(2), Value::Int64(3)]);
        let collected = items(list, &heap).expect("proper list");
        assert_eq!(collected.len(), 3);
        assert!(matches!(collected[0], Value::Int64(1)));
        assert!(matches!(collected[2], Value::Int64(3)));
        assert_eq!(safe_length(list, &heap), Some(3));
    }

    #[test]
    fn empty_list_is_null() {
        let mut heap = Heap::new();
        let list = from_values(&mut heap, &[]);
        assert!(list.is_null());
        assert_eq!(safe_length(list, &heap), Some(0));
    }

    #[test]
    fn combine_concatenates() {
        let mut heap = Heap::new();
        let a = from_values(&mut heap, &[Value::Int64(1)]);
        let b = from_values(&mut heap, &[Value::Int64(2), Value::Int64(3)]);
        let both = combine(&mut heap, &[a, b]).expect("proper lists");
        assert_eq!(safe_length(both, &heap), Some(3));
    }

    #[test]
    fn improper_list_has_no_safe_length() {
        let mut heap = Heap::new();
        let improper = cons(&mut heap, Value::Int64(1), Value::Int64(2));
        assert_eq!(safe_length(improper, &heap), None);
        assert!(items(improper, &heap).is_none());
    }
}
