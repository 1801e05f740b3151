use std::cmp;
use std::collections::HashSet;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::common::types::Collection;

/// Capped exponential backoff for resubscription rounds.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): `min(base * 2^(n-1), cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        cmp::min(self.base.saturating_mul(1u32 << exponent), self.cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Subscribing,
    Live,
    Backoff,
    /// Retry ceiling exhausted. Only a resync leaves this phase.
    GivenUp,
}

/// One logical feed session: the three collection subscriptions plus the
/// retry state that supervises them. The whole value is reset, not patched,
/// whenever a new session starts; the generation token is what lets stale
/// timers and half-dead feed tasks be recognized and ignored.
#[derive(Debug)]
pub struct FeedSession {
    generation: u64,
    pub phase: SessionPhase,
    pub attempt: u32,
    /// Set while re-establishing after a failure of a previously-live
    /// session; cleared once live again (after a catch-up snapshot).
    pub recovering: bool,
    live: HashSet<Collection>,
    tasks: Vec<JoinHandle<()>>,
}

impl Default for FeedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedSession {
    pub fn new() -> Self {
        Self {
            generation: 0,
            phase: SessionPhase::Idle,
            attempt: 0,
            recovering: false,
            live: HashSet::new(),
            tasks: Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Tear down the previous round and start a new one: abort feed tasks,
    /// invalidate all deferred callbacks by bumping the generation, clear
    /// the live set. Returns the new generation for tagging spawned work.
    pub fn begin_round(&mut self) -> u64 {
        self.abort_tasks();
        self.generation += 1;
        self.live.clear();
        self.phase = SessionPhase::Subscribing;
        self.generation
    }

    pub fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Record one collection going live. Returns true when all three are.
    pub fn mark_live(&mut self, collection: Collection) -> bool {
        self.live.insert(collection);
        self.live.len() == Collection::ALL.len()
    }

    pub fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
