//! User objects: symbol-keyed property bags with a prototype link.
//!
//! Every object reaches the distinguished `primitive` root by walking its
//! `base` chain; the chain is acyclic by construction (an object's base is
//! fixed at creation). Security flags gate writes: the known base objects
//! are frozen after engine init so they can be extended by user code (new
//! properties) but their existing entries never change.

use crate::{
    dict::Dict,
    intern::SymbolId,
    value::Value,
};

/// Write permissions for one object.
#[derive(Debug, Clone, Copy)]
pub struct Security {
    /// Existing properties may be overwritten.
    pub writable: bool,
    /// New properties may be appended.
    pub extendable: bool,
}

impl Default for Security {
    fn default() -> Self {
        Self {
            writable: true,
            extendable: true,
        }
    }
}

impl Security {
    /// Extended-but-not-mutated: the posture of the known base objects.
    #[must_use]
    pub fn frozen_base() -> Self {
        Self {
            writable: false,
            extendable: true,
        }
    }
}

/// A property bag.
#[derive(Debug)]
pub struct UserObject {
    /// Prototype; `Null` only on the primitive root.
    pub base: Value,
    /// Declared name, for display. The sentinel when anonymous.
    pub name: SymbolId,
    pub props: Dict<SymbolId, Value>,
    pub security: Security,
}

/// Why a property write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyWriteError {
    /// Existing property on a non-writable object.
    NotWritable,
    /// New property on a non-extendable object.
    NotExtendable,
}

impl UserObject {
    /// Creates an anonymous, fully writable object.
    #[must_use]
    pub fn new(base: Value) -> Self {
        Self {
            base,
            name: SymbolId::NONE,
            props: Dict::new(),
            security: Security::default(),
        }
    }

    /// Creates a named object (used for the known bases).
    #[must_use]
    pub fn named(base: Value, name: SymbolId) -> Self {
        Self {
            name,
            ..Self::new(base)
        }
    }

    /// Writes a property, honoring the security flags.
    pub fn set_property(&mut self, name: SymbolId, value: Value) -> Result<(), PropertyWriteError> {
        if self.props.contains(&name) {
            if !self.security.writable {
                return Err(PropertyWriteError::NotWritable);
            }
            self.props.set(name, value);
        } else {
            if !self.security.extendable {
                return Err(PropertyWriteError::NotExtendable);
            }
            self.props.append(name, value);
        }
        Ok(())
    }

    /// True when the object itself defines `name` (prototype not consulted).
    #[must_use]
    pub fn has_own_property(&self, name: SymbolId) -> bool {
        self.props.contains(&name)
    }

    /// The object's own property names, unordered.
    #[must_use]
    pub fn property_names(&self) -> Vec<SymbolId> {
        self.props.get_keys().into_iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut obj = UserObject::new(Value::Null);
        let name = SymbolId::from_index(100);
        obj.set_property(name, Value::Int64(9)).expect("writable");
        assert!(obj.has_own_property(name));
        assert!(matches!(obj.props.try_get(&name), Some(Value::Int64(9))));
    }

    #[test]
    fn frozen_base_rejects_overwrite_but_accepts_extension() {
        let mut obj = UserObject::new(Value::Null);
        let existing = SymbolId::from_index(7);
        obj.set_property(existing, Value::Int64(1)).expect("writable");
        obj.security = Security::frozen_base();

        let fresh = SymbolId::from_index(8);
        assert_eq!(obj.set_property(fresh, Value::Int64(2)), Ok(()));
        assert_eq!(
            obj.set_property(existing, Value::Int64(3)),
            Err(PropertyWriteError::NotWritable)
        );
    }
}
