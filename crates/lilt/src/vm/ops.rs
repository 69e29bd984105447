//! Fast-path implementations of the well-known operator opcodes.
//!
//! The operator rows dispatch on the receiver: numeric pairs and strings
//! are handled here without a method lookup; anything else falls back to
//! prototype dispatch in the VM. Integer arithmetic promotes to the wider
//! of the two operand kinds and wraps at that width; mixing an integer with
//! a real/float promotes to the 64-bit member of the float side's family.

use std::cmp::Ordering;

use crate::{
    heap::{Heap, HeapData},
    value::{Kind, Value},
    vm::error::EvalError,
};

/// The arithmetic operator set with shared dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Rem,
}

/// Integer-kind width ranking for promotion.
fn int_rank(kind: Kind) -> Option<u8> {
    match kind {
        Kind::Byte => Some(0),
        Kind::Int16 => Some(1),
        Kind::Int32 => Some(2),
        Kind::Int64 => Some(3),
        _ => None,
    }
}

fn is_real_kind(kind: Kind) -> bool {
    matches!(kind, Kind::Real32 | Kind::Real64 | Kind::Real128)
}

fn is_float_kind(kind: Kind) -> bool {
    matches!(kind, Kind::Float32 | Kind::Float64)
}

fn narrow_int(kind_rank: u8, value: i64) -> Value {
    match kind_rank {
        0 => Value::Byte(value as u8),
        1 => Value::Int16(value as i16),
        2 => Value::Int32(value as i32),
        _ => Value::Int64(value),
    }
}

/// Tries the numeric/string fast path for a binary operator.
///
/// Returns `None` when neither operand family applies and the VM should
/// fall back to method dispatch on the receiver.
pub fn binary_arith(
    heap: &mut Heap,
    op: ArithOp,
    a: Value,
    b: Value,
) -> Result<Option<Value>, EvalError> {
    let ka = a.kind(heap);
    let kb = b.kind(heap);

    // Integer ⊕ integer.
    if let (Some(ra), Some(rb)) = (int_rank(ka), int_rank(kb)) {
        let (x, y) = (a.as_int().expect("ranked int"), b.as_int().expect("ranked int"));
        let rank = ra.max(rb);
        let value = match op {
            ArithOp::Add => x.wrapping_add(y),
            ArithOp::Sub => x.wrapping_sub(y),
            ArithOp::Mul => x.wrapping_mul(y),
            ArithOp::Div => {
                if y == 0 {
                    return Err(EvalError::native("Division by zero"));
                }
                x.wrapping_div(y)
            }
            ArithOp::Mod => {
                if y == 0 {
                    return Err(EvalError::native("Division by zero"));
                }
                x.rem_euclid(y)
            }
            ArithOp::Rem => {
                if y == 0 {
                    return Err(EvalError::native("Division by zero"));
                }
                x.wrapping_rem(y)
            }
        };
        return Ok(Some(narrow_int(rank, value)));
    }

    // Anything numeric involving a real or float computes at 64 bits.
    let a_float = a.as_float(heap);
    let b_float = b.as_float(heap);
    let numeric_pair = (a_float.is_some() || a.as_int().is_some()) && (b_float.is_some() || b.as_int().is_some());
    if numeric_pair && (a_float.is_some() || b_float.is_some()) {
        let x = a_float.unwrap_or_else(|| a.as_int().expect("numeric") as f64);
        let y = b_float.unwrap_or_else(|| b.as_int().expect("numeric") as f64);
        let value = match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => {
                if y == 0.0 {
                    return Err(EvalError::native("Division by zero"));
                }
                x / y
            }
            ArithOp::Mod => {
                if y == 0.0 {
                    return Err(EvalError::native("Division by zero"));
                }
                x.rem_euclid(y)
            }
            ArithOp::Rem => {
                if y == 0.0 {
                    return Err(EvalError::native("Division by zero"));
                }
                x % y
            }
        };
        // The result stays in the receiver family: real beats float.
        let result = if is_real_kind(ka) || is_real_kind(kb) {
            Value::Real64(value)
        } else if is_float_kind(ka) || is_float_kind(kb) {
            Value::Float64(value)
        } else {
            Value::Real64(value)
        };
        return Ok(Some(result));
    }

    // String concatenation.
    if op == ArithOp::Add
        && ka == Kind::String
        && kb == Kind::String
        && let (Value::Ref(ia), Value::Ref(ib)) = (a, b)
    {
        let joined = {
            let (HeapData::Str(sa), HeapData::Str(sb)) = (heap.get(ia), heap.get(ib)) else {
                unreachable!("kind said both are strings");
            };
            let mut joined = String::with_capacity(sa.len() + sb.len());
            joined.push_str(sa);
            joined.push_str(sb);
            joined
        };
        return Ok(Some(Value::Ref(heap.alloc_str(joined))));
    }

    Ok(None)
}

/// Orders two values when they are comparable: numeric pairs numerically,
/// strings bytewise, chars and symbols by code.
pub fn compare_values(heap: &Heap, a: Value, b: Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return Some(x.cmp(&y));
    }
    let a_num = a.as_float(heap).or_else(|| a.as_int().map(|v| v as f64));
    let b_num = b.as_float(heap).or_else(|| b.as_int().map(|v| v as f64));
    if let (Some(x), Some(y)) = (a_num, b_num) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::Char(x), Value::Char(y)) => Some(x.cmp(&y)),
        (Value::Uni(x), Value::Uni(y)) => Some(x.cmp(&y)),
        (Value::Ref(x), Value::Ref(y)) => match (heap.get(x), heap.get(y)) {
            (HeapData::Str(sx), HeapData::Str(sy)) => Some(sx.as_bytes().cmp(sy.as_bytes())),
            _ => None,
        },
        _ => None,
    }
}

/// Reference/identity equality: payload equality for unboxed values, slot
/// identity for boxed ones (two equal-content strings in different slots
/// are not identical).
pub fn identical(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Byte(x), Value::Byte(y)) => x == y,
        (Value::Int16(x), Value::Int16(y)) => x == y,
        (Value::Int32(x), Value::Int32(y)) => x == y,
        (Value::Int64(x), Value::Int64(y)) => x == y,
        (Value::Real32(x), Value::Real32(y)) => x == y,
        (Value::Real64(x), Value::Real64(y)) => x == y,
        (Value::Float32(x), Value::Float32(y)) => x == y,
        (Value::Float64(x), Value::Float64(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Uni(x), Value::Uni(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::Ref(x), Value::Ref(y)) => x == y,
        _ => false,
    }
}

/// Integer coercion for the `int` conversion operator.
pub fn to_int(heap: &Heap, value: Value) -> Option<i64> {
    value
        .as_int()
        .or_else(|| value.as_float(heap).map(|f| f.trunc() as i64))
        .or(match value {
            Value::Bool(b) => Some(i64::from(b)),
            Value::Char(c) => Some(i64::from(c)),
            Value::Uni(c) => Some(i64::from(c as u32)),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_addition_promotes_to_wider_kind() {
        let mut heap = Heap::new();
        let result = binary_arith(&mut heap, ArithOp::Add, Value::Int16(1), Value::Int64(2))
            .expect("no error")
            .expect("fast path");
        assert!(matches!(result, Value::Int64(3)));

        let narrow = binary_arith(&mut heap, ArithOp::Add, Value::Byte(250), Value::Byte(10))
            .expect("no error")
            .expect("fast path");
        // Byte arithmetic wraps at its own width.
        assert!(matches!(narrow, Value::Byte(4)));
    }

    #[test]
    fn division_by_zero_is_a_native_error() {
        let mut heap = Heap::new();
        assert!(binary_arith(&mut heap, ArithOp::Div, Value::Int64(1), Value::Int64(0)).is_err());
    }

    #[test]
    fn mixing_int_and_float_widens() {
        let mut heap = Heap::new();
        let result = binary_arith(&mut heap, ArithOp::Mul, Value::Int64(2), Value::Float64(1.5))
            .expect("no error")
            .expect("fast path");
        assert!(matches!(result, Value::Float64(v) if v == 3.0));
    }

    #[test]
    fn string_concatenation() {
        let mut heap = Heap::new();
        let a = Value::Ref(heap.alloc_str("ab"));
        let b = Value::Ref(heap.alloc_str("cd"));
        let joined = binary_arith(&mut heap, ArithOp::Add, a, b)
            .expect("no error")
            .expect("fast path");
        let Value::Ref(id) = joined else { panic!("expected string") };
        assert_eq!(heap.str(id), "abcd");
    }

    #[test]
    fn non_numeric_pairs_fall_back() {
        let mut heap = Heap::new();
        let list = crate::types::list::from_values(&mut heap, &[Value::Int64(1)]);
        let result = binary_arith(&mut heap, ArithOp::Add, list, Value::Int64(1)).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn identity_is_not_content_equality_for_strings() {
        let mut heap = Heap::new();
        let a = Value::Ref(heap.alloc_str("same"));
        let b = Value::Ref(heap.alloc_str("same"));
        assert!(!identical(a, b));
        assert!(identical(a, a));
    }
}
