//! Fixed-capacity pool of value-change watchpoints.
//!
//! Every slot is allocated up front and keeps its index as identity for the
//! lifetime of the pool. Slots move between an ordered active list (most
//! recent first) and a LIFO free stack; the two always partition the pool.

use std::fmt;

use log::{info, warn};
use thiserror::Error;

use crate::{
    evaluate_expression, ExprError, Lexer, MachineView, MonitorConfig, RefreshPolicy, Word,
    DEFAULT_WATCHPOINT_CAPACITY, MAX_EXPRESSION_LEN,
};

/// Stable identity of a watchpoint slot.
pub type WatchpointId = usize;

/// An active watchpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Watchpoint {
    /// Slot index.
    pub id: WatchpointId,
    /// Source expression.
    pub expression: String,
    /// Value observed at creation or at the last detected change.
    pub last_value: Word,
}

/// A detected value change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct WatchpointChange {
    /// Slot index of the watchpoint that fired.
    pub id: WatchpointId,
    /// Expression of the watchpoint that fired.
    pub expression: String,
    /// Baseline before this refresh.
    pub old_value: Word,
    /// Freshly evaluated value, now the baseline.
    pub new_value: Word,
}

impl fmt::Display for WatchpointChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Watchpoint {}: {}", self.id, self.expression)?;
        writeln!(f, "Old value = 0x{:x}", self.old_value)?;
        write!(f, "New value = 0x{:x}", self.new_value)
    }
}

/// Outcome of one refresh pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshReport {
    /// Changes in active-list order.
    pub changes: Vec<WatchpointChange>,
    /// Watchpoints whose expression no longer evaluates. Their baseline is
    /// left untouched.
    pub failures: Vec<(WatchpointId, ExprError)>,
}

impl RefreshReport {
    /// Returns `true` when at least one watchpoint changed value.
    #[must_use]
    pub fn triggered(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Watchpoint pool failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchpointError {
    /// Expression is longer than the configured bound.
    #[error("expression is {len} bytes, the limit is {max}")]
    ExpressionTooLong {
        /// Length of the rejected expression.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Expression failed to tokenize or evaluate.
    #[error(transparent)]
    InvalidExpression(#[from] ExprError),
    /// Every slot is active.
    #[error("no free watchpoint slot (capacity {capacity})")]
    PoolExhausted {
        /// Pool capacity.
        capacity: usize,
    },
    /// No active watchpoint has the requested id.
    #[error("no watchpoint number {id}")]
    NotFound {
        /// Requested id.
        id: WatchpointId,
    },
}

/// Preallocated watchpoint slots with active and free bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchpointPool {
    slots: Vec<Option<Watchpoint>>,
    active: Vec<WatchpointId>,
    // Top of the stack is the last element.
    free: Vec<WatchpointId>,
    max_expression_len: usize,
    policy: RefreshPolicy,
}

impl Default for WatchpointPool {
    fn default() -> Self {
        Self::new(DEFAULT_WATCHPOINT_CAPACITY)
    }
}

impl WatchpointPool {
    /// Creates a pool of `capacity` free slots with the default expression
    /// bound and refresh policy.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            active: Vec::with_capacity(capacity),
            free: (0..capacity).rev().collect(),
            max_expression_len: MAX_EXPRESSION_LEN,
            policy: RefreshPolicy::default(),
        }
    }

    /// Creates a pool sized and tuned from `config`.
    #[must_use]
    pub fn with_config(config: &MonitorConfig) -> Self {
        Self {
            max_expression_len: config.max_expression_len,
            policy: config.refresh_policy,
            ..Self::new(config.watchpoint_capacity)
        }
    }

    /// Registers a watchpoint on `expression`, baselined at its current value.
    ///
    /// # Errors
    ///
    /// Checked in order: [`WatchpointError::ExpressionTooLong`],
    /// [`WatchpointError::InvalidExpression`], [`WatchpointError::PoolExhausted`].
    pub fn create<M: MachineView + ?Sized>(
        &mut self,
        lexer: &Lexer,
        expression: &str,
        machine: &M,
    ) -> Result<WatchpointId, WatchpointError> {
        if expression.len() > self.max_expression_len {
            return Err(WatchpointError::ExpressionTooLong {
                len: expression.len(),
                max: self.max_expression_len,
            });
        }
        let value = evaluate_expression(lexer, expression, machine)?;
        let Some(id) = self.free.pop() else {
            warn!(
                "watchpoint on {expression:?} refused: all {} slots in use",
                self.capacity()
            );
            return Err(WatchpointError::PoolExhausted {
                capacity: self.capacity(),
            });
        };

        self.slots[id] = Some(Watchpoint {
            id,
            expression: expression.to_owned(),
            last_value: value,
        });
        self.active.insert(0, id);
        info!("watchpoint {id}: {expression} = 0x{value:x}");
        Ok(id)
    }

    /// Re-evaluates active watchpoints in order and updates baselines.
    ///
    /// Under [`RefreshPolicy::FirstChange`] the scan stops after the first
    /// change. Evaluation failures never stop the scan.
    pub fn refresh<M: MachineView + ?Sized>(&mut self, lexer: &Lexer, machine: &M) -> RefreshReport {
        let mut report = RefreshReport::default();

        for &id in &self.active {
            let Some(watchpoint) = self.slots[id].as_mut() else {
                continue;
            };
            match evaluate_expression(lexer, &watchpoint.expression, machine) {
                Ok(value) if value != watchpoint.last_value => {
                    report.changes.push(WatchpointChange {
                        id,
                        expression: watchpoint.expression.clone(),
                        old_value: watchpoint.last_value,
                        new_value: value,
                    });
                    watchpoint.last_value = value;
                    if self.policy == RefreshPolicy::FirstChange {
                        break;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(
                        "watchpoint {id} ({}) failed to evaluate: {error}",
                        watchpoint.expression
                    );
                    report.failures.push((id, error));
                }
            }
        }

        report
    }

    /// Deactivates watchpoint `id`, making its slot the next one handed out.
    ///
    /// # Errors
    ///
    /// Returns [`WatchpointError::NotFound`] when `id` is not active.
    pub fn delete(&mut self, id: WatchpointId) -> Result<Watchpoint, WatchpointError> {
        let position = self
            .active
            .iter()
            .position(|&active| active == id)
            .ok_or(WatchpointError::NotFound { id })?;
        let watchpoint = self.slots[id]
            .take()
            .ok_or(WatchpointError::NotFound { id })?;
        self.active.remove(position);
        self.free.push(id);
        info!("deleted watchpoint {id}: {}", watchpoint.expression);
        Ok(watchpoint)
    }

    /// Active watchpoints, most recently created first.
    pub fn list(&self) -> impl Iterator<Item = &Watchpoint> + '_ {
        self.active.iter().filter_map(|&id| self.slots[id].as_ref())
    }

    /// Looks up an active watchpoint.
    #[must_use]
    pub fn get(&self, id: WatchpointId) -> Option<&Watchpoint> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    /// Number of active watchpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns `true` when no watchpoint is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots available to [`Self::create`].
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// Refresh policy in effect.
    #[must_use]
    pub const fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Renders the active list as a `Num / Value / Expr` table.
    #[must_use]
    pub fn format_listing(&self) -> String {
        let mut out = String::from("Num\tValue\t\tExpr\n");
        for watchpoint in self.list() {
            out.push_str(&format!(
                "{}\t0x{:x}\t{}\n",
                watchpoint.id, watchpoint.last_value, watchpoint.expression
            ));
        }
        out
    }
}
