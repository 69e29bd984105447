//! Callable values.

use std::sync::Arc;

use crate::{compiler::Program, heap::HeapId};

/// A callable: either a compiled user function bound to the environment it
/// was created in, or a registered external function.
#[derive(Debug)]
pub enum FunctionValue {
    /// A user function: an index into `program`'s function table plus the
    /// captured declaring environment (absent for the top level).
    User {
        function: u32,
        program: Arc<Program>,
        closure: Option<HeapId>,
    },
    /// An external function by registry id.
    External(u32),
}
