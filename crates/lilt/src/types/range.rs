//! Numeric ranges: `start`, `end`, `stepping`, one flavor per numeric kind.
//!
//! Direction derives from endpoint order unless the stepping was given
//! explicitly; a zero stepping is a caller error, rejected at construction.
//! Iteration happens through the state-machine external protocol in the VM,
//! one element per re-entry.

use std::fmt::Write;

use crate::{
    intern::{KnownSymbol, SymbolId},
    value::{Kind, Value},
};

/// A range over one of the integer kinds or one of the real/float kinds.
#[derive(Debug, Clone, Copy)]
pub enum RangeValue {
    Int {
        kind: Kind,
        start: i64,
        end: i64,
        stepping: i64,
    },
    Float {
        kind: Kind,
        start: f64,
        end: f64,
        stepping: f64,
    },
}

/// Error from constructing a range with zero stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroStepping;

impl RangeValue {
    /// Builds an integer-kind range. Stepping defaults to ±1 by endpoint
    /// order when absent.
    pub fn int(kind: Kind, start: i64, end: i64, stepping: Option<i64>) -> Result<Self, ZeroStepping> {
        let stepping = match stepping {
            Some(0) => return Err(ZeroStepping),
            Some(s) => s,
            None => {
                if end >= start {
                    1
                } else {
                    -1
                }
            }
        };
        Ok(Self::Int {
            kind,
            start,
            end,
            stepping,
        })
    }

    /// Builds a real/float-kind range.
    pub fn float(kind: Kind, start: f64, end: f64, stepping: Option<f64>) -> Result<Self, ZeroStepping> {
        let stepping = match stepping {
            Some(s) if s == 0.0 => return Err(ZeroStepping),
            Some(s) => s,
            None => {
                if end >= start {
                    1.0
                } else {
                    -1.0
                }
            }
        };
        Ok(Self::Float {
            kind,
            start,
            end,
            stepping,
        })
    }

    /// The element kind of this range.
    #[must_use]
    pub fn element_kind(&self) -> Kind {
        match self {
            Self::Int { kind, .. } | Self::Float { kind, .. } => *kind,
        }
    }

    /// Reads `start` / `end` / `stepping` / `length` as values.
    #[must_use]
    pub fn get_property(&self, name: SymbolId) -> Option<Value> {
        match self {
            Self::Int {
                kind,
                start,
                end,
                stepping,
            } => {
                if name == KnownSymbol::Start.id() {
                    Some(make_int(*kind, *start))
                } else if name == KnownSymbol::End.id() {
                    Some(make_int(*kind, *end))
                } else if name == KnownSymbol::Stepping.id() {
                    Some(make_int(*kind, *stepping))
                } else if name == KnownSymbol::Length.id() {
                    Some(Value::Int64(self.len() as i64))
                } else {
                    None
                }
            }
            Self::Float {
                kind,
                start,
                end,
                stepping,
            } => {
                if name == KnownSymbol::Start.id() {
                    Some(make_float(*kind, *start))
                } else if name == KnownSymbol::End.id() {
                    Some(make_float(*kind, *end))
                } else if name == KnownSymbol::Stepping.id() {
                    Some(make_float(*kind, *stepping))
                } else if name == KnownSymbol::Length.id() {
                    Some(Value::Int64(self.len() as i64))
                } else {
                    None
                }
            }
        }
    }

    /// Number of elements the range will yield. Ranges are inclusive of the
    /// endpoint when the stepping lands on it.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int {
                start, end, stepping, ..
            } => {
                let span = if *stepping > 0 { end - start } else { start - end };
                if span < 0 {
                    0
                } else {
                    (span / stepping.abs()) as usize + 1
                }
            }
            Self::Float {
                start, end, stepping, ..
            } => {
                let span = if *stepping > 0.0 { end - start } else { start - end };
                if span < 0.0 {
                    0
                } else {
                    (span / stepping.abs()) as usize + 1
                }
            }
        }
    }

    /// True when the range yields nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `index`th element, if the range is that long.
    #[must_use]
    pub fn element(&self, index: usize) -> Option<Value> {
        if index >= self.len() {
            return None;
        }
        match self {
            Self::Int {
                kind, start, stepping, ..
            } => Some(make_int(*kind, start + stepping * index as i64)),
            Self::Float {
                kind, start, stepping, ..
            } => Some(make_float(*kind, start + stepping * index as f64)),
        }
    }

    pub(crate) fn stringify_into(&self, out: &mut String) {
        match self {
            Self::Int {
                start, end, stepping, ..
            } => {
                let _ = write!(out, "{start}..{end}");
                if stepping.abs() != 1 {
                    let _ = write!(out, " step {stepping}");
                }
            }
            Self::Float {
                start, end, stepping, ..
            } => {
                let _ = write!(out, "{start}..{end}");
                if stepping.abs() != 1.0 {
                    let _ = write!(out, " step {stepping}");
                }
            }
        }
    }
}

fn make_int(kind: Kind, v: i64) -> Value {
    match kind {
        Kind::Byte => Value::Byte(v as u8),
        Kind::Int16 => Value::Int16(v as i16),
        Kind::Int32 => Value::Int32(v as i32),
        _ => Value::Int64(v),
    }
}

fn make_float(kind: Kind, v: f64) -> Value {
    match kind {
        Kind::Real32 => Value::Real32(v as f32),
        Kind::Float32 => Value::Float32(v as f32),
        Kind::Float64 => Value::Float64(v),
        _ => Value::Real64(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_stepping_is_rejected() {
        assert!(RangeValue::int(Kind::Int64, 1, 5, Some(0)).is_err());
        assert!(RangeValue::float(Kind::Real64, 1.0, 5.0, Some(0.0)).is_err());
    }

    #[test]
    fn direction_derives_from_endpoints() {
        let up = RangeValue::int(Kind::Int64, 1, 5, None).expect("valid");
        assert_eq!(up.len(), 5);
        let down = RangeValue::int(Kind::Int64, 5, 1, None).expect("valid");
        assert_eq!(down.len(), 5);
        assert!(matches!(down.element(1), Some(Value::Int64(4))));
    }

    #[test]
    fn stepped_range_lands_inclusively() {
        let range = RangeValue::int(Kind::Int64, 0, 10, Some(5)).expect("valid");
        assert_eq!(range.len(), 3);
        assert!(matches!(range.element(2), Some(Value::Int64(10))));
    }
}
