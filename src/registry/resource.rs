//! Keyed data cache render steps suspend on.
//!
//! A miss mints a token, stores it as pending and suspends; the same key keeps
//! returning that token until [`ResourceCache::resolve`] or
//! [`ResourceCache::reject`] stores a value and settles it.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::Settler;
use crate::core::{RenderError, Token};
use crate::tree::{RenderContext, RenderOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Pending(Token),
    Resolved(String),
    Rejected { token: Token, message: String },
}

/// Shared, cloneable cache. Clones see the same entries.
#[derive(Debug, Clone)]
pub struct ResourceCache {
    entries: Arc<Mutex<FxHashMap<String, Entry>>>,
    settler: Settler,
}

impl ResourceCache {
    pub fn new(settler: Settler) -> Self {
        Self {
            entries: Arc::default(),
            settler,
        }
    }

    /// Read `key` from a render step.
    pub fn read(&self, ctx: &mut RenderContext<'_>, key: &str) -> RenderOutcome {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(Entry::Resolved(value)) => RenderOutcome::Ready(value.clone()),
            Some(Entry::Pending(token)) => RenderOutcome::Suspended(*token),
            Some(Entry::Rejected { token, message }) => {
                RenderOutcome::Failed(RenderError::rejected(*token, message.clone()))
            }
            None => {
                let token = ctx.new_token();
                entries.insert(key.to_string(), Entry::Pending(token));
                RenderOutcome::Suspended(token)
            }
        }
    }

    /// Store a value without going through a suspension first.
    pub fn preload(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .lock()
            .insert(key.into(), Entry::Resolved(value.into()));
    }

    /// Store `value` and settle the pending token, if any.
    pub fn resolve(&self, key: &str, value: impl Into<String>) -> Option<Token> {
        let previous = self
            .entries
            .lock()
            .insert(key.to_string(), Entry::Resolved(value.into()));
        let Some(Entry::Pending(token)) = previous else {
            return None;
        };
        self.settler.resolve(token);
        Some(token)
    }

    /// Mark `key` as failed and reject its pending token, if any.
    pub fn reject(&self, key: &str, message: impl Into<String>) -> Option<Token> {
        let message = message.into();
        let mut entries = self.entries.lock();
        let Some(Entry::Pending(token)) = entries.get(key).cloned() else {
            return None;
        };
        entries.insert(
            key.to_string(),
            Entry::Rejected {
                token,
                message: message.clone(),
            },
        );
        drop(entries);
        self.settler.reject(token, message);
        Some(token)
    }

    /// Drop `key` so the next read misses again.
    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Token of a pending key.
    pub fn pending(&self, key: &str) -> Option<Token> {
        match self.entries.lock().get(key) {
            Some(Entry::Pending(token)) => Some(*token),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Time;
    use crate::core::{NodeId, Priority, TaskId};
    use crate::registry::{DependencyRegistry, Wake};
    use crate::tree::DisplayMode;

    const T1: TaskId = TaskId(1);

    fn read(cache: &ResourceCache, reg: &mut DependencyRegistry, key: &str) -> RenderOutcome {
        let mut ctx = RenderContext {
            node: NodeId(0),
            name: "reader",
            now: Time::ZERO,
            priority: Priority::Normal,
            mode: DisplayMode::Primary,
            error: None,
            mint: reg.mint_mut(),
        };
        cache.read(&mut ctx, key)
    }

    #[test]
    fn test_miss_suspends_on_stable_token() {
        let mut reg = DependencyRegistry::new();
        let cache = ResourceCache::new(reg.settler());

        let RenderOutcome::Suspended(first) = read(&cache, &mut reg, "user") else {
            panic!("expected suspension");
        };
        assert_eq!(read(&cache, &mut reg, "user"), RenderOutcome::Suspended(first));
        assert_eq!(cache.pending("user"), Some(first));
    }

    #[test]
    fn test_resolve_settles_and_serves_value() {
        let mut reg = DependencyRegistry::new();
        let cache = ResourceCache::new(reg.settler());
        let RenderOutcome::Suspended(token) = read(&cache, &mut reg, "user") else {
            panic!("expected suspension");
        };
        reg.wait(T1, token);

        assert_eq!(cache.resolve("user", "Ada"), Some(token));
        assert_eq!(reg.drain(Time::ZERO), vec![Wake::Retry(T1)]);
        assert_eq!(read(&cache, &mut reg, "user"), RenderOutcome::ready("Ada"));
    }

    #[test]
    fn test_reject_fails_reads() {
        let mut reg = DependencyRegistry::new();
        let cache = ResourceCache::new(reg.settler());
        let RenderOutcome::Suspended(token) = read(&cache, &mut reg, "feed") else {
            panic!("expected suspension");
        };
        reg.wait(T1, token);
        assert_eq!(cache.reject("feed", "offline"), Some(token));
        assert_eq!(
            reg.drain(Time::ZERO),
            vec![Wake::Fail(T1, RenderError::rejected(token, "offline"))]
        );
        assert!(reg.is_settled(token));
        // The cache keeps the rejection after the registry forgot the token
        assert_eq!(
            read(&cache, &mut reg, "feed"),
            RenderOutcome::Failed(RenderError::rejected(token, "offline"))
        );
    }

    #[test]
    fn test_preload_and_invalidate() {
        let mut reg = DependencyRegistry::new();
        let cache = ResourceCache::new(reg.settler());
        cache.preload("cfg", "on");
        assert_eq!(read(&cache, &mut reg, "cfg"), RenderOutcome::ready("on"));
        assert_eq!(cache.resolve("cfg", "off"), None);

        cache.invalidate("cfg");
        assert!(matches!(
            read(&cache, &mut reg, "cfg"),
            RenderOutcome::Suspended(_)
        ));
    }
}
