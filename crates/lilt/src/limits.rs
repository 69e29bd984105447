//! Execution limits.
//!
//! The VM checks these at well-defined points: frame pushes (call depth) and
//! recursive data walks (stringify, deep-equal). A limit of `None` means
//! unbounded, which is what the CLI uses; embedders hosting untrusted source
//! should set both.

/// Depth used for data-structure recursion when the embedder does not say
/// otherwise. Deep enough for real programs, shallow enough to fail before
/// the native stack does.
pub const DEFAULT_MAX_DATA_DEPTH: usize = 2_000;

/// Default VM call depth.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 10_000;

/// Limits applied to one VM.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum simultaneous call frames.
    pub max_call_depth: usize,
    /// Maximum recursion while walking data structures.
    pub max_data_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_data_depth: DEFAULT_MAX_DATA_DEPTH,
        }
    }
}
