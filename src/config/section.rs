//! Configuration sections.
//!
//! ```toml
//! [clock]
//! bucket_width = 25          # Expiration quantization width (ticks)
//!
//! [clock.window]             # Ticks until work of each class must show something
//! user_blocking = 250
//! normal = 5000
//! deferred = 10000
//! idle = 1073741823
//!
//! [boundary]
//! debounce = 0               # Grace before a fallback may replace content
//! # timeout = 3000           # Omit to derive from the task's expiration
//!
//! [executor]
//! slice_budget = 64          # Render steps per cooperative slice
//! ```

use serde::{Deserialize, Serialize};

use super::FieldPath;
use super::error::ConfigDiagnostics;
use crate::core::Priority;

// ============================================================================
// [clock]
// ============================================================================

/// Virtual clock settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClockConfig {
    /// Expiration bucket width. Requests inside one bucket share a deadline.
    pub bucket_width: u64,

    /// Per-priority expiration windows.
    pub window: WindowConfig,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            bucket_width: 25,
            window: WindowConfig::default(),
        }
    }
}

impl ClockConfig {
    pub const BUCKET_WIDTH: FieldPath = FieldPath::new("clock.bucket_width");

    /// Expiration window for a priority class. Sync has none.
    pub fn window(&self, priority: Priority) -> u64 {
        match priority {
            Priority::Sync => 0,
            Priority::UserBlocking => self.window.user_blocking,
            Priority::Normal => self.window.normal,
            Priority::Deferred => self.window.deferred,
            Priority::Idle => self.window.idle,
        }
    }

    pub(super) fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.bucket_width == 0 {
            diag.error_with_hint(
                Self::BUCKET_WIDTH,
                "bucket width must be positive",
                "use 1 to disable quantization",
            );
        }
        self.window.validate(diag);
    }
}

/// `[clock.window]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WindowConfig {
    pub user_blocking: u64,
    pub normal: u64,
    pub deferred: u64,
    pub idle: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            user_blocking: 250,
            normal: 5_000,
            deferred: 10_000,
            // Effectively never; still finite so quantization stays exact.
            idle: 1_073_741_823,
        }
    }
}

impl WindowConfig {
    pub const FIELD: FieldPath = FieldPath::new("clock.window");

    fn validate(&self, diag: &mut ConfigDiagnostics) {
        let ordered = self.user_blocking <= self.normal
            && self.normal <= self.deferred
            && self.deferred <= self.idle;
        if !ordered {
            diag.error_with_hint(
                Self::FIELD,
                format!(
                    "windows must not shrink as priority drops (got user_blocking={}, normal={}, deferred={}, idle={})",
                    self.user_blocking, self.normal, self.deferred, self.idle
                ),
                "a lower priority class must never expire before a higher one",
            );
        }
    }
}

// ============================================================================
// [boundary]
// ============================================================================

/// Defaults for suspense boundaries that do not set their own policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BoundaryConfig {
    /// Grace interval before a captured boundary may show its fallback.
    pub debounce: u64,

    /// Explicit timeout after capture. `None` derives it from the task's
    /// expiration time.
    pub timeout: Option<u64>,
}

// ============================================================================
// [executor]
// ============================================================================

/// Cooperative execution settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Render steps per slice for [`Scheduler::tick`](crate::Scheduler::tick).
    pub slice_budget: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { slice_budget: 64 }
    }
}

impl ExecutorConfig {
    pub const SLICE_BUDGET: FieldPath = FieldPath::new("executor.slice_budget");

    pub(super) fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.slice_budget == 0 {
            diag.error(Self::SLICE_BUDGET, "slice budget must be at least one render step");
        }
    }
}
