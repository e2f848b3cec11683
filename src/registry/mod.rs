//! Dependency registry: which task waits on which token.
//!
//! Tokens settle out of band through a [`Settler`] (any thread, any time).
//! Settlements only land in a channel; the scheduler drains that channel
//! between passes, so a pass never observes a token changing under it.
//!
//! A blocked task becomes eligible again only once every token it waits on
//! has settled. A rejected token wakes its waiters at once so the failure
//! can propagate. Settled tokens are forgotten; the mint only remembers
//! which of its tokens are still outstanding.
//!
//! Timer tokens are registered for boundary deadlines and settle when the
//! clock reaches them. A due timer always wakes its task.

mod resource;

pub use resource::ResourceCache;

use std::collections::BTreeSet;

use crossbeam::channel::{Receiver, Sender, unbounded};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::clock::Time;
use crate::core::{RenderError, TaskId, Token};

// =============================================================================
// Tokens and settlements
// =============================================================================

/// Source of fresh tokens. Tokens are never reused.
#[derive(Debug)]
pub struct TokenMint {
    next: u64,
    /// Data tokens minted and not yet settled.
    outstanding: FxHashSet<Token>,
}

impl Default for TokenMint {
    fn default() -> Self {
        Self {
            next: 1,
            outstanding: FxHashSet::default(),
        }
    }
}

impl TokenMint {
    /// Fresh data token, outstanding until it settles.
    pub fn mint(&mut self) -> Token {
        let token = self.fresh();
        self.outstanding.insert(token);
        token
    }

    fn fresh(&mut self) -> Token {
        let token = Token(self.next);
        self.next += 1;
        token
    }

    /// Minted here and settled since.
    fn is_settled(&self, token: Token) -> bool {
        token.raw() < self.next && !self.outstanding.contains(&token)
    }
}

/// How a token settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub token: Token,
    pub outcome: Outcome,
}

/// Cloneable handle that settles tokens from outside the scheduler.
#[derive(Debug, Clone)]
pub struct Settler {
    tx: Sender<Settlement>,
}

impl Settler {
    pub fn settle(&self, token: Token, outcome: Outcome) {
        // Receiver gone means the scheduler was dropped; nobody is waiting.
        self.tx.send(Settlement { token, outcome }).ok();
    }

    pub fn resolve(&self, token: Token) {
        self.settle(token, Outcome::Ready);
    }

    pub fn reject(&self, token: Token, message: impl Into<String>) {
        self.settle(token, Outcome::Failed(message.into()));
    }
}

// =============================================================================
// Waits
// =============================================================================

/// A task the registry wants re-enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    /// Everything the task waited on is ready, or one of its timers fired.
    Retry(TaskId),
    /// A dependency was rejected. The error carries the token.
    Fail(TaskId, RenderError),
}

#[derive(Debug)]
pub struct DependencyRegistry {
    mint: TokenMint,
    waiters: FxHashMap<Token, SmallVec<[TaskId; 2]>>,
    waits: FxHashMap<TaskId, FxHashSet<Token>>,
    timers: BTreeSet<(Time, Token)>,
    timer_owner: FxHashMap<Token, TaskId>,
    tx: Sender<Settlement>,
    rx: Receiver<Settlement>,
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyRegistry {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            mint: TokenMint::default(),
            waiters: FxHashMap::default(),
            waits: FxHashMap::default(),
            timers: BTreeSet::new(),
            timer_owner: FxHashMap::default(),
            tx,
            rx,
        }
    }

    pub fn settler(&self) -> Settler {
        Settler {
            tx: self.tx.clone(),
        }
    }

    pub(crate) fn mint_mut(&mut self) -> &mut TokenMint {
        &mut self.mint
    }

    /// Whether `token` was minted by this registry and has settled since.
    pub fn is_settled(&self, token: Token) -> bool {
        self.mint.is_settled(token)
    }

    /// Record that `task` waits on `token`. Returns `false` when the token
    /// already settled and there is nothing to wait for.
    pub fn wait(&mut self, task: TaskId, token: Token) -> bool {
        if self.mint.is_settled(token) {
            return false;
        }
        let waiters = self.waiters.entry(token).or_default();
        if !waiters.contains(&task) {
            waiters.push(task);
        }
        self.waits.entry(task).or_default().insert(token);
        true
    }

    /// Register a timer that wakes `task` once the clock reaches `deadline`.
    pub fn timer(&mut self, task: TaskId, deadline: Time) -> Token {
        let token = self.mint.fresh();
        self.timers.insert((deadline, token));
        self.timer_owner.insert(token, task);
        token
    }

    /// Forget every wait and timer of `task`.
    pub fn release(&mut self, task: TaskId) {
        if let Some(tokens) = self.waits.remove(&task) {
            for token in tokens {
                if let Some(waiters) = self.waiters.get_mut(&token) {
                    waiters.retain(|t| *t != task);
                    if waiters.is_empty() {
                        self.waiters.remove(&token);
                    }
                }
            }
        }

        let owned: Vec<Token> = self
            .timer_owner
            .iter()
            .filter(|(_, owner)| **owner == task)
            .map(|(token, _)| *token)
            .collect();
        if !owned.is_empty() {
            for token in &owned {
                self.timer_owner.remove(token);
            }
            self.timers.retain(|(_, token)| !owned.contains(token));
        }
    }

    /// Data tokens `task` still waits on, in mint order.
    pub fn blocked_on(&self, task: TaskId) -> Vec<Token> {
        let mut tokens: Vec<Token> = self
            .waits
            .get(&task)
            .map(|tokens| tokens.iter().copied().collect())
            .unwrap_or_default();
        tokens.sort_unstable();
        tokens
    }

    /// Earliest pending timer of `task`.
    pub fn next_timer(&self, task: TaskId) -> Option<Time> {
        self.timers
            .iter()
            .find(|(_, token)| self.timer_owner.get(token) == Some(&task))
            .map(|(deadline, _)| *deadline)
    }

    /// Whether `task` has anything left to wait for.
    pub fn is_waiting(&self, task: TaskId) -> bool {
        self.waits.contains_key(&task) || self.timer_owner.values().any(|t| *t == task)
    }

    /// Settle `token` directly. First settlement wins; repeats and tokens
    /// this registry never minted are no-ops.
    pub fn settle(&mut self, token: Token, outcome: Outcome) -> Vec<Wake> {
        if let Some(task) = self.timer_owner.remove(&token) {
            self.timers.retain(|(_, t)| *t != token);
            return vec![Wake::Retry(task)];
        }
        if !self.mint.outstanding.remove(&token) {
            return Vec::new();
        }

        let Some(waiters) = self.waiters.remove(&token) else {
            return Vec::new();
        };

        let mut wakes = Vec::with_capacity(waiters.len());
        for task in waiters {
            let Some(tokens) = self.waits.get_mut(&task) else {
                continue;
            };
            tokens.remove(&token);
            let cleared = tokens.is_empty();
            if cleared {
                self.waits.remove(&task);
            }
            match &outcome {
                Outcome::Failed(message) => {
                    wakes.push(Wake::Fail(task, RenderError::rejected(token, message.clone())));
                }
                Outcome::Ready if cleared => wakes.push(Wake::Retry(task)),
                Outcome::Ready => {}
            }
        }
        wakes
    }

    /// Apply queued settlements, then fire timers due at `now`.
    pub fn drain(&mut self, now: Time) -> Vec<Wake> {
        let mut wakes = Vec::new();
        while let Ok(Settlement { token, outcome }) = self.rx.try_recv() {
            wakes.extend(self.settle(token, outcome));
        }

        let due: Vec<Token> = self
            .timers
            .iter()
            .take_while(|(deadline, _)| *deadline <= now)
            .map(|(_, token)| *token)
            .collect();
        for token in due {
            wakes.extend(self.settle(token, Outcome::Ready));
        }
        wakes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TaskId = TaskId(1);
    const T2: TaskId = TaskId(2);

    #[test]
    fn test_tokens_are_fresh() {
        let mut mint = TokenMint::default();
        let a = mint.mint();
        let b = mint.mint();
        assert_ne!(a, b);
        assert!(!mint.is_settled(a));
    }

    #[test]
    fn test_task_wakes_once_every_token_settles() {
        let mut reg = DependencyRegistry::new();
        let a = reg.mint_mut().mint();
        let b = reg.mint_mut().mint();
        reg.wait(T1, a);
        reg.wait(T1, b);

        assert!(reg.settle(a, Outcome::Ready).is_empty());
        assert_eq!(reg.blocked_on(T1), vec![b]);
        assert_eq!(reg.settle(b, Outcome::Ready), vec![Wake::Retry(T1)]);
        assert!(!reg.is_waiting(T1));
    }

    #[test]
    fn test_shared_token_wakes_every_waiter() {
        let mut reg = DependencyRegistry::new();
        let a = reg.mint_mut().mint();
        reg.wait(T1, a);
        reg.wait(T2, a);
        let wakes = reg.settle(a, Outcome::Ready);
        assert_eq!(wakes, vec![Wake::Retry(T1), Wake::Retry(T2)]);
    }

    #[test]
    fn test_rejection_fails_waiters_at_once() {
        let mut reg = DependencyRegistry::new();
        let a = reg.mint_mut().mint();
        let b = reg.mint_mut().mint();
        reg.wait(T1, a);
        reg.wait(T1, b);
        let wakes = reg.settle(a, Outcome::Failed("boom".into()));
        assert_eq!(wakes, vec![Wake::Fail(T1, RenderError::rejected(a, "boom"))]);
        assert_eq!(reg.blocked_on(T1), vec![b]);
    }

    #[test]
    fn test_settled_tokens_are_forgotten() {
        let mut reg = DependencyRegistry::new();
        let a = reg.mint_mut().mint();
        reg.wait(T1, a);
        assert_eq!(reg.settle(a, Outcome::Ready), vec![Wake::Retry(T1)]);

        assert!(reg.mint.outstanding.is_empty());
        assert!(reg.waiters.is_empty());
        assert!(reg.waits.is_empty());
        assert!(reg.is_settled(a));
        // First settlement wins
        assert!(reg.settle(a, Outcome::Failed("late".into())).is_empty());
        // Nothing left to wait for
        assert!(!reg.wait(T2, a));
        assert!(!reg.is_waiting(T2));
    }

    #[test]
    fn test_unknown_tokens_are_ignored() {
        let mut reg = DependencyRegistry::new();
        let stray = Token(999);
        assert!(!reg.is_settled(stray));
        assert!(reg.settle(stray, Outcome::Ready).is_empty());
    }

    #[test]
    fn test_released_task_is_not_woken() {
        let mut reg = DependencyRegistry::new();
        let a = reg.mint_mut().mint();
        reg.wait(T1, a);
        reg.timer(T1, Time(10));
        reg.release(T1);
        assert!(!reg.is_waiting(T1));
        assert!(reg.settle(a, Outcome::Ready).is_empty());
        assert!(reg.drain(Time(10)).is_empty());
    }

    #[test]
    fn test_settler_goes_through_drain() {
        let mut reg = DependencyRegistry::new();
        let a = reg.mint_mut().mint();
        reg.wait(T1, a);

        let settler = reg.settler();
        std::thread::spawn(move || settler.resolve(a)).join().unwrap();

        // Nothing changes until the scheduler drains
        assert_eq!(reg.blocked_on(T1), vec![a]);
        assert_eq!(reg.drain(Time::ZERO), vec![Wake::Retry(T1)]);
    }

    #[test]
    fn test_timers_fire_when_due() {
        let mut reg = DependencyRegistry::new();
        let a = reg.mint_mut().mint();
        reg.wait(T1, a);
        reg.timer(T1, Time(50));
        reg.timer(T2, Time(80));
        assert_eq!(reg.next_timer(T1), Some(Time(50)));
        assert!(reg.drain(Time(49)).is_empty());
        // A due timer wakes its task even with data still outstanding
        assert_eq!(reg.drain(Time(60)), vec![Wake::Retry(T1)]);
        assert_eq!(reg.drain(Time(100)), vec![Wake::Retry(T2)]);
        assert_eq!(reg.next_timer(T2), None);
    }
}
