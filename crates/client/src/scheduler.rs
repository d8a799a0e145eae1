//! Reliable delivery over an ack-less channel.
//!
//! Values wait in a pending set keyed by [`SchedulePolicy::key`] until the
//! owner observes the server echoing them back and calls
//! [`Scheduler::confirm`]. Each [`Scheduler::tick`] drains the entries due
//! for (re)sending into batches; an entry is sent at most once per retry
//! window and retried until confirmed, cancelled or cleared.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

use crate::config::SchedulerConfig;

/// Errors surfaced synchronously by [`Scheduler::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The policy rejected the value before it entered the pending set.
    #[error("invalid enqueue: {0}")]
    InvalidEnqueue(String),
}

/// What a [`Scheduler`] schedules, and how.
pub trait SchedulePolicy {
    /// Deduplication and confirmation key.
    type Key: Clone + Eq + Hash + Debug;
    /// Payload handed back in batches.
    type Value: Clone + PartialEq + Debug;

    /// Key for a value. Enqueueing a value whose key is pending replaces it.
    fn key(&self, value: &Self::Value) -> Self::Key;

    /// Reject malformed values up front.
    fn verify(&self, _value: &Self::Value) -> Result<(), ScheduleError> {
        Ok(())
    }

    /// Whether two values can travel in one outgoing message.
    fn can_coalesce(&self, _a: &Self::Value, _b: &Self::Value) -> bool {
        false
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    seq: u64,
    last_attempt_at: Option<Instant>,
    attempts: u32,
}

/// Pending-set engine driven by an external clock.
#[derive(Debug)]
pub struct Scheduler<P: SchedulePolicy> {
    policy: P,
    entries: HashMap<P::Key, Entry<P::Value>>,
    order: BTreeMap<u64, P::Key>,
    next_seq: u64,
    retry_window: Duration,
    max_entries_per_tick: usize,
    max_batch_size: usize,
    coalesce: bool,
}

impl<P: SchedulePolicy> Scheduler<P> {
    /// Empty scheduler.
    pub fn new(policy: P, config: &SchedulerConfig) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            retry_window: config.retry_window(),
            max_entries_per_tick: config.max_entries_per_tick.max(1),
            max_batch_size: config.max_batch_size.max(1),
            coalesce: config.coalesce,
        }
    }

    /// The policy in use.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Run the policy's admission check without enqueueing.
    pub fn verify(&self, value: &P::Value) -> Result<(), ScheduleError> {
        self.policy.verify(value)
    }

    /// Key a value would be stored under.
    pub fn key_of(&self, value: &P::Value) -> P::Key {
        self.policy.key(value)
    }

    /// Admit a value, replacing any pending value with the same key.
    ///
    /// The entry is due immediately. A replaced entry keeps its place in
    /// line unless its value changed, in which case it moves to the back.
    pub fn enqueue(&mut self, value: P::Value) -> Result<(), ScheduleError> {
        self.policy.verify(&value)?;
        let key = self.policy.key(&value);

        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.value != value {
                self.order.remove(&entry.seq);
                entry.seq = self.next_seq;
                self.order.insert(self.next_seq, key.clone());
                self.next_seq += 1;
                entry.value = value;
            }
            entry.attempts = 0;
            entry.last_attempt_at = None;
            trace!(?key, "replaced pending entry");
            return Ok(());
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                seq,
                last_attempt_at: None,
                attempts: 0,
            },
        );
        Ok(())
    }

    /// Retire the entry for `key`. Unknown keys are ignored.
    pub fn confirm(&mut self, key: &P::Key) -> bool {
        self.remove(key).is_some()
    }

    /// Drop the entry for `key` without it being confirmed.
    pub fn cancel(&mut self, key: &P::Key) -> Option<P::Value> {
        self.remove(key)
    }

    /// Drop every entry whose value matches `predicate`; returns how many.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&P::Value) -> bool) -> usize {
        let doomed: Vec<P::Key> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(&entry.value))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn remove(&mut self, key: &P::Key) -> Option<P::Value> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry.value)
    }

    /// Collect the batches due at `now`.
    ///
    /// Entries go out oldest first, at most `max_entries_per_tick` of them.
    /// With coalescing on, an entry joins the earliest open batch it can
    /// share a message with; batches are returned in the insertion order of
    /// their first entry.
    pub fn tick(&mut self, now: Instant) -> Vec<Vec<P::Value>> {
        let retry_window = self.retry_window;
        let due: Vec<P::Key> = self
            .order
            .values()
            .filter(|key| {
                self.entries[*key]
                    .last_attempt_at
                    .map_or(true, |at| now.saturating_duration_since(at) >= retry_window)
            })
            .take(self.max_entries_per_tick)
            .cloned()
            .collect();

        let mut batches: Vec<Vec<P::Value>> = Vec::new();
        for key in due {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            entry.attempts += 1;
            entry.last_attempt_at = Some(now);
            let value = entry.value.clone();

            let open = if self.coalesce {
                batches.iter_mut().find(|batch| {
                    batch.len() < self.max_batch_size && self.policy.can_coalesce(&batch[0], &value)
                })
            } else {
                None
            };
            match open {
                Some(batch) => batch.push(value),
                None => batches.push(vec![value]),
            }
        }

        if !batches.is_empty() {
            trace!(
                batches = batches.len(),
                pending = self.entries.len(),
                "scheduler tick"
            );
        }
        batches
    }

    /// Number of pending entries.
    pub fn pending_len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is pending.
    pub fn is_idle(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is pending.
    pub fn contains(&self, key: &P::Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Pending value for `key`.
    pub fn get(&self, key: &P::Key) -> Option<&P::Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Send attempts made for `key` since it was last enqueued.
    pub fn attempts(&self, key: &P::Key) -> Option<u32> {
        self.entries.get(key).map(|entry| entry.attempts)
    }

    /// Pending values, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &P::Value> + '_ {
        self.order.values().map(move |key| &self.entries[key].value)
    }
}
