//! Boundary capture protocol.
//!
//! A suspense boundary moves through three states:
//!
//! ```text
//!            capture                 fallback ok + grace over
//!   Idle ─────────────▶ Capturing ──────────────────────────▶ ShowingFallback
//!    ▲                     │            or deadline passed           │
//!    └─────────────────────┴──────── primary renders cleanly ◀───────┘
//! ```
//!
//! Per pass the executor tells the boundary whether it captured a
//! suspension and whether its fallback content rendered cleanly; [`decide`]
//! turns that into "show primary", "show fallback" or "keep waiting". The
//! resulting [`BoundaryUpdate`]s are applied by the scheduler once the pass
//! finishes, so a discarded pass leaves no trace.

use crate::clock::Time;
use crate::config::BoundaryConfig;
use crate::core::{NodeId, Priority, TaskId};

// =============================================================================
// Policy
// =============================================================================

/// How long a captured boundary may wait before its fallback is forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Use the expiration time of the task that is rendering.
    #[default]
    Default,
    /// Fixed interval measured from the moment the boundary captured,
    /// capped at the task's expiration.
    After(u64),
}

/// Per-boundary settings. Unset fields fall back to `[boundary]` config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundaryProps {
    /// Grace interval before the fallback may replace content.
    pub debounce: Option<u64>,
    pub timeout: Option<TimeoutPolicy>,
}

impl BoundaryProps {
    pub fn debounce(mut self, ticks: u64) -> Self {
        self.debounce = Some(ticks);
        self
    }

    pub fn timeout(mut self, ticks: u64) -> Self {
        self.timeout = Some(TimeoutPolicy::After(ticks));
        self
    }

    fn resolve(&self, defaults: &BoundaryConfig) -> (u64, TimeoutPolicy) {
        let debounce = self.debounce.unwrap_or(defaults.debounce);
        let timeout = self.timeout.unwrap_or(match defaults.timeout {
            Some(ticks) => TimeoutPolicy::After(ticks),
            None => TimeoutPolicy::Default,
        });
        (debounce, timeout)
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BoundaryMode {
    /// Primary content is what the boundary shows.
    #[default]
    Idle,
    /// A suspension below is unresolved and this boundary shields it, but the
    /// fallback is not visible yet.
    Capturing,
    /// The fallback is committed and visible.
    ShowingFallback,
}

/// Persistent state of one suspense boundary.
#[derive(Debug, Clone)]
pub struct Boundary {
    node: NodeId,
    props: BoundaryProps,
    mode: BoundaryMode,
    captured_by: Option<TaskId>,
    captured_at: Option<Time>,
    did_expire: bool,
}

impl Boundary {
    pub(crate) fn new(node: NodeId, props: BoundaryProps) -> Self {
        Self {
            node,
            props,
            mode: BoundaryMode::Idle,
            captured_by: None,
            captured_at: None,
            did_expire: false,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn props(&self) -> BoundaryProps {
        self.props
    }

    pub fn mode(&self) -> BoundaryMode {
        self.mode
    }

    /// Task whose suspension this boundary is currently shielding.
    pub fn captured_by(&self) -> Option<TaskId> {
        self.captured_by
    }

    pub fn captured_at(&self) -> Option<Time> {
        self.captured_at
    }

    /// The visible fallback was forced by a deadline.
    pub fn did_expire(&self) -> bool {
        self.did_expire
    }

    /// Start of the current capture: the recorded one, or `now` for a fresh one.
    pub(crate) fn capture_start(&self, now: Time) -> Time {
        match self.mode {
            BoundaryMode::Idle => now,
            _ => self.captured_at.unwrap_or(now),
        }
    }

    pub(crate) fn apply(&mut self, update: &BoundaryUpdate) {
        match update.next {
            BoundaryMode::Idle => {
                self.captured_by = None;
                self.captured_at = None;
                self.did_expire = false;
            }
            BoundaryMode::Capturing => {
                self.captured_by = Some(update.task);
                self.captured_at = Some(update.captured_at);
            }
            BoundaryMode::ShowingFallback => {
                self.captured_by = Some(update.task);
                self.captured_at = Some(update.captured_at);
                self.did_expire = update.did_expire;
            }
        }
        self.mode = update.next;
    }
}

/// A state change produced by a pass, applied after the pass completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryUpdate {
    pub node: NodeId,
    pub task: TaskId,
    pub next: BoundaryMode,
    pub captured_at: Time,
    pub did_expire: bool,
}

impl BoundaryUpdate {
    /// Form of this update that is safe to apply when the pass did not
    /// commit. Only moves between `Idle` and `Capturing` are recorded; what
    /// is visible stays as it is.
    pub fn uncommitted(self, current: BoundaryMode) -> Option<Self> {
        match (current, self.next) {
            (BoundaryMode::Idle, BoundaryMode::Capturing | BoundaryMode::ShowingFallback) => {
                Some(Self {
                    next: BoundaryMode::Capturing,
                    did_expire: false,
                    ..self
                })
            }
            (BoundaryMode::Capturing, BoundaryMode::Idle) => Some(self),
            _ => None,
        }
    }
}

// =============================================================================
// Decision
// =============================================================================

/// What one pass learned about a boundary that captured a suspension.
#[derive(Debug, Clone, Copy)]
pub struct CaptureFacts {
    pub priority: Priority,
    /// Expiration of the task rendering the boundary.
    pub expiration: Time,
    pub now: Time,
    /// Some fallback content suspended.
    pub fallback_blocked: bool,
}

/// Resolution of a captured boundary for the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Show the fallback; `forced` when a deadline made the decision.
    ShowFallback { forced: bool },
    /// Not showable yet; re-examine at `wake_at`.
    Wait { wake_at: Time },
    /// Sync work cannot show this fallback within its pass.
    SyncBlocked,
}

/// Deadlines of one capture, derived from policy and config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub captured_at: Time,
    pub grace_end: Time,
    pub timeout: Time,
}

impl Deadlines {
    pub fn compute(
        boundary: &Boundary,
        defaults: &BoundaryConfig,
        priority: Priority,
        expiration: Time,
        now: Time,
    ) -> Self {
        let captured_at = boundary.capture_start(now);
        let (debounce, policy) = boundary.props.resolve(defaults);
        // Sync passes resolve inside one atomic pass: no grace, no timeout.
        if priority.is_sync() {
            return Self {
                captured_at,
                grace_end: captured_at,
                timeout: Time::NEVER,
            };
        }
        let timeout = match policy {
            TimeoutPolicy::Default => expiration,
            TimeoutPolicy::After(ticks) => (captured_at + ticks).min(expiration),
        };
        Self {
            captured_at,
            grace_end: captured_at + debounce,
            timeout,
        }
    }

    #[inline]
    pub fn expired(&self, now: Time) -> bool {
        now >= self.timeout
    }
}

/// Decide whether a boundary that captured in this pass may show its fallback.
pub fn decide(boundary: &Boundary, deadlines: &Deadlines, facts: &CaptureFacts) -> Resolution {
    // Already visible: keep showing the fallback, nothing to debounce.
    if boundary.mode == BoundaryMode::ShowingFallback {
        return Resolution::ShowFallback {
            forced: boundary.did_expire || deadlines.expired(facts.now),
        };
    }

    if facts.priority.is_sync() {
        return if facts.fallback_blocked {
            Resolution::SyncBlocked
        } else {
            Resolution::ShowFallback { forced: false }
        };
    }

    if deadlines.expired(facts.now) {
        return Resolution::ShowFallback { forced: true };
    }

    if !facts.fallback_blocked && facts.now >= deadlines.grace_end {
        return Resolution::ShowFallback { forced: false };
    }

    let wake_at = if facts.fallback_blocked {
        deadlines.timeout
    } else {
        deadlines.grace_end.min(deadlines.timeout)
    };
    Resolution::Wait { wake_at }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary(props: BoundaryProps) -> Boundary {
        Boundary::new(NodeId(1), props)
    }

    fn facts(priority: Priority, now: u64, fallback_blocked: bool) -> CaptureFacts {
        CaptureFacts {
            priority,
            expiration: Time(1000),
            now: Time(now),
            fallback_blocked,
        }
    }

    fn resolve(b: &Boundary, f: &CaptureFacts) -> Resolution {
        let d = Deadlines::compute(b, &BoundaryConfig::default(), f.priority, f.expiration, f.now);
        decide(b, &d, f)
    }

    #[test]
    fn test_clean_fallback_shows_immediately() {
        let b = boundary(BoundaryProps::default());
        assert_eq!(
            resolve(&b, &facts(Priority::Normal, 10, false)),
            Resolution::ShowFallback { forced: false }
        );
    }

    #[test]
    fn test_debounce_delays_fallback() {
        let b = boundary(BoundaryProps::default().debounce(100));
        assert_eq!(
            resolve(&b, &facts(Priority::Normal, 10, false)),
            Resolution::Wait {
                wake_at: Time(110)
            }
        );
    }

    #[test]
    fn test_grace_measured_from_first_capture() {
        let mut b = boundary(BoundaryProps::default().debounce(100));
        b.apply(&BoundaryUpdate {
            node: NodeId(1),
            task: TaskId(1),
            next: BoundaryMode::Capturing,
            captured_at: Time(10),
            did_expire: false,
        });
        assert_eq!(
            resolve(&b, &facts(Priority::Normal, 110, false)),
            Resolution::ShowFallback { forced: false }
        );
    }

    #[test]
    fn test_blocked_fallback_waits_for_expiration() {
        let b = boundary(BoundaryProps::default());
        assert_eq!(
            resolve(&b, &facts(Priority::Normal, 10, true)),
            Resolution::Wait {
                wake_at: Time(1000)
            }
        );
        assert_eq!(
            resolve(&b, &facts(Priority::Normal, 1000, true)),
            Resolution::ShowFallback { forced: true }
        );
    }

    #[test]
    fn test_explicit_timeout_overrides_expiration() {
        let b = boundary(BoundaryProps::default().timeout(50));
        assert_eq!(
            resolve(&b, &facts(Priority::Normal, 10, true)),
            Resolution::Wait { wake_at: Time(60) }
        );
    }

    #[test]
    fn test_long_timeout_capped_by_expiration() {
        let b = boundary(BoundaryProps::default().timeout(1_000_000));
        assert_eq!(
            resolve(&b, &facts(Priority::Normal, 10, true)),
            Resolution::Wait {
                wake_at: Time(1000)
            }
        );
        assert_eq!(
            resolve(&b, &facts(Priority::Normal, 1000, true)),
            Resolution::ShowFallback { forced: true }
        );
    }

    #[test]
    fn test_sync_ignores_grace_and_cannot_wait() {
        let b = boundary(BoundaryProps::default().debounce(100));
        assert_eq!(
            resolve(&b, &facts(Priority::Sync, 10, false)),
            Resolution::ShowFallback { forced: false }
        );
        assert_eq!(
            resolve(&b, &facts(Priority::Sync, 10, true)),
            Resolution::SyncBlocked
        );
    }

    #[test]
    fn test_config_defaults_apply_when_props_unset() {
        let b = boundary(BoundaryProps::default());
        let defaults = BoundaryConfig {
            debounce: 30,
            timeout: Some(70),
        };
        let d = Deadlines::compute(&b, &defaults, Priority::Normal, Time(1000), Time(5));
        assert_eq!(d.grace_end, Time(35));
        assert_eq!(d.timeout, Time(75));
    }

    #[test]
    fn test_uncommitted_update_only_enters_capturing() {
        let update = BoundaryUpdate {
            node: NodeId(1),
            task: TaskId(2),
            next: BoundaryMode::ShowingFallback,
            captured_at: Time(3),
            did_expire: true,
        };
        let downgraded = update.uncommitted(BoundaryMode::Idle).unwrap();
        assert_eq!(downgraded.next, BoundaryMode::Capturing);
        assert!(!downgraded.did_expire);
        assert_eq!(update.uncommitted(BoundaryMode::ShowingFallback), None);

        let reset = BoundaryUpdate {
            next: BoundaryMode::Idle,
            ..update
        };
        assert_eq!(reset.uncommitted(BoundaryMode::Capturing), Some(reset));
        assert_eq!(reset.uncommitted(BoundaryMode::ShowingFallback), None);
    }
}
