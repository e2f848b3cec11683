//! Priority levels for render task ordering.

use serde::{Deserialize, Serialize};

/// Priority class of a render request.
///
/// Higher value = higher priority. `Sync` always preempts and runs to
/// completion inside a single atomic pass; every other class is ordered by
/// its expiration time in the work queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Work nobody is waiting for - lowest priority
    Idle = 0,
    /// Deferred updates (prefetch, offscreen content)
    Deferred = 1,
    /// Regular updates
    Normal = 2,
    /// Updates triggered by direct user input
    UserBlocking = 3,
    /// Synchronous work, never interleaved - highest priority
    Sync = 4,
}

impl Priority {
    pub const ALL: [Self; 5] = [
        Self::Sync,
        Self::UserBlocking,
        Self::Normal,
        Self::Deferred,
        Self::Idle,
    ];

    #[inline]
    pub const fn is_sync(self) -> bool {
        matches!(self, Self::Sync)
    }

    /// Priority a settlement-triggered retry runs at.
    ///
    /// Sync work only runs inside `flush_sync`, so a sync task woken by an
    /// out-of-band settlement continues at `Normal`. Every other class keeps
    /// its original priority.
    #[inline]
    pub const fn retry(self) -> Self {
        match self {
            Self::Sync => Self::Normal,
            other => other,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::UserBlocking => "user-blocking",
            Self::Normal => "normal",
            Self::Deferred => "deferred",
            Self::Idle => "idle",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Sync > Priority::UserBlocking);
        assert!(Priority::UserBlocking > Priority::Normal);
        assert!(Priority::Normal > Priority::Deferred);
        assert!(Priority::Deferred > Priority::Idle);
    }

    #[test]
    fn test_retry_never_escalates() {
        for p in Priority::ALL {
            assert!(p.retry() <= p);
        }
        assert_eq!(Priority::Sync.retry(), Priority::Normal);
        assert_eq!(Priority::Deferred.retry(), Priority::Deferred);
    }
}
