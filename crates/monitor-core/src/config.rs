//! Monitor-wide configuration with reference-system defaults.

use crate::{Word, DEFAULT_MAX_TOKENS};

/// Default number of watchpoint slots.
pub const DEFAULT_WATCHPOINT_CAPACITY: usize = 32;
/// Longest accepted watchpoint expression, in bytes.
pub const MAX_EXPRESSION_LEN: usize = 127;
/// Byte width of a call instruction; a call at `pc` returns to `pc + width`.
pub const DEFAULT_INSTRUCTION_WIDTH: Word = 4;
/// Function considered current before the first traced call.
pub const DEFAULT_ENTRY_FUNCTION: &str = "_start";

/// How a watchpoint refresh batches changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RefreshPolicy {
    /// Stop at the first changed watchpoint. Later watchpoints keep their
    /// stale baseline and report on a subsequent refresh.
    #[default]
    FirstChange,
    /// Re-evaluate every active watchpoint and report all changes.
    AllChanges,
}

/// Top-level configuration for a [`crate::Monitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MonitorConfig {
    /// Number of preallocated watchpoint slots.
    pub watchpoint_capacity: usize,
    /// Maximum watchpoint expression length in bytes.
    pub max_expression_len: usize,
    /// Maximum number of tokens per expression.
    pub max_tokens: usize,
    /// Refresh batching policy.
    pub refresh_policy: RefreshPolicy,
    /// Call instruction width used to derive return sites.
    pub instruction_width: Word,
    /// Name of the function active before any traced call.
    pub entry_function: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            watchpoint_capacity: DEFAULT_WATCHPOINT_CAPACITY,
            max_expression_len: MAX_EXPRESSION_LEN,
            max_tokens: DEFAULT_MAX_TOKENS,
            refresh_policy: RefreshPolicy::FirstChange,
            instruction_width: DEFAULT_INSTRUCTION_WIDTH,
            entry_function: DEFAULT_ENTRY_FUNCTION.to_owned(),
        }
    }
}
