//! Work queue ordered by urgency.
//!
//! Order: Sync work first, then earliest expiration, then submission order.
//! Removal is lazy: every push gets a ticket and a popped entry whose ticket
//! is no longer current is skipped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use crate::clock::Time;
use crate::core::{Priority, TaskId};

// =============================================================================
// Entry
// =============================================================================

#[derive(Debug)]
struct Entry {
    task: TaskId,
    sync: bool,
    expiration: Time,
    /// Submission order of the task; survives re-queues.
    seq: u64,
    ticket: u64,
}

// BinaryHeap is a max-heap: "greater" means "runs first".
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sync
            .cmp(&other.sync)
            .then_with(|| other.expiration.cmp(&self.expiration))
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| other.ticket.cmp(&self.ticket))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

// =============================================================================
// Queue
// =============================================================================

#[derive(Debug, Default)]
pub struct WorkQueue {
    heap: BinaryHeap<Entry>,
    /// Current ticket of every queued task.
    live: FxHashMap<TaskId, u64>,
    next_ticket: u64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task`. Re-pushing a queued task replaces its entry.
    pub fn push(&mut self, task: TaskId, priority: Priority, expiration: Time, seq: u64) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.live.insert(task, ticket);
        self.heap.push(Entry {
            task,
            sync: priority.is_sync(),
            expiration,
            seq,
            ticket,
        });
    }

    /// Drop `task` from the queue. Returns whether it was queued.
    pub fn remove(&mut self, task: TaskId) -> bool {
        self.live.remove(&task).is_some()
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.live.contains_key(&task)
    }

    /// Most urgent task.
    pub fn pop(&mut self) -> Option<TaskId> {
        self.discard_stale();
        let entry = self.heap.pop()?;
        self.live.remove(&entry.task);
        Some(entry.task)
    }

    /// Most urgent task, only if it is Sync work.
    pub fn pop_sync(&mut self) -> Option<TaskId> {
        self.discard_stale();
        if self.heap.peek().is_some_and(|e| e.sync) {
            self.pop()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn discard_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.live.get(&top.task) == Some(&top.ticket) {
                return;
            }
            self.heap.pop();
        }
    }
}
