//! Outgoing operation queue.
//!
//! The outbox is the pending layer between local edits and the server. It is
//! a synchronous state machine with no I/O; [`OutboxPump`](crate::OutboxPump)
//! drives it.
//!
//! # Rules
//!
//! - Structural mutations are due at once and leave in issue order. A newer
//!   intent for a relationship pair that is still pending replaces the older
//!   one in place.
//! - Property patches coalesce per person (newer fields win) and become due
//!   one debounce window after the last edit to that person. They only go
//!   out once no structural entry is pending, so a patch never overtakes the
//!   ADD_NODE that creates its person.
//! - DELETE_NODE drops any pending patch for the person.
//! - One batch is in flight at a time. Delivery stops at the first failure;
//!   the failed entry and everything after it return to the front of the
//!   queue, and further background attempts back off exponentially.
//!
//! ```text
//!   enqueue ──▶ pending (structural FIFO + props by person) ──take_batch──▶ in flight
//!                  ▲                                                        │
//!                  └──────────── finish: failed + unsent requeued ◀─────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rootline_graph::{FamilyGraph, summarize};
use rootline_types::{Mutation, OpKind, PersonId, RelationshipRow};
use tracing::{debug, trace};

use crate::config::SyncConfig;
use crate::schedule::DelayQueue;

/// The unit an entry coalesces on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKey {
    Person(PersonId),
    Link(RelationshipRow),
}

impl EntryKey {
    fn of(mutation: &Mutation) -> Self {
        match mutation.relationship() {
            Some(row) if matches!(mutation.kind(), OpKind::AddRelation | OpKind::DeleteRelation) => {
                EntryKey::Link(row)
            }
            _ => EntryKey::Person(mutation.person_id()),
        }
    }
}

/// One queued mutation.
#[derive(Clone, Debug)]
pub struct OutboxEntry {
    /// Enqueue order.
    pub seq: u64,
    pub key: EntryKey,
    pub mutation: Mutation,
    /// Activity summary, computed when the edit was made.
    pub summary: String,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    pub enqueued_at: u64,
}

impl OutboxEntry {
    pub fn kind(&self) -> OpKind {
        self.mutation.kind()
    }

    fn merge_patch_from(&mut self, newer: OutboxEntry) {
        if let (Mutation::UpdateProp(ours), Mutation::UpdateProp(theirs)) = (&mut self.mutation, newer.mutation) {
            ours.patch.merge(theirs.patch);
        }
        self.summary = newer.summary;
        self.attempts = self.attempts.max(newer.attempts);
    }
}

/// Entries handed to the pump. Must be returned through [`Outbox::finish`].
#[derive(Debug)]
pub struct Batch {
    pub generation: u64,
    pub entries: Vec<OutboxEntry>,
}

/// What happened to a batch.
#[derive(Debug, Default)]
pub struct Completion {
    pub delivered: Vec<OutboxEntry>,
    pub failed: Option<OutboxEntry>,
    pub unsent: Vec<OutboxEntry>,
}

/// Pending outgoing operations for one tree.
#[derive(Debug)]
pub struct Outbox {
    structural: VecDeque<OutboxEntry>,
    props: BTreeMap<PersonId, OutboxEntry>,
    prop_due: DelayQueue<PersonId>,
    in_flight: bool,
    /// Persons with a DELETE_NODE pending or in flight.
    deleted: BTreeSet<PersonId>,
    generation: u64,
    next_seq: u64,
    failures: u32,
    retry_at: Option<u64>,
    prop_debounce_ms: u64,
    retry_base_ms: u64,
    retry_max_ms: u64,
    max_batch: usize,
}

impl Outbox {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            structural: VecDeque::new(),
            props: BTreeMap::new(),
            prop_due: DelayQueue::new(),
            in_flight: false,
            deleted: BTreeSet::new(),
            generation: 0,
            next_seq: 0,
            failures: 0,
            retry_at: None,
            prop_debounce_ms: config.prop_debounce_ms,
            retry_base_ms: config.retry_base_ms,
            retry_max_ms: config.retry_max_ms,
            max_batch: config.max_batch.max(1),
        }
    }

    /// Queue a mutation produced by an edit from `before` to `after`.
    pub fn enqueue(&mut self, mutation: Mutation, before: &FamilyGraph, after: &FamilyGraph, now: u64) {
        let summary = summarize(&mutation, before, after);
        let key = EntryKey::of(&mutation);
        let entry = OutboxEntry {
            seq: self.next_seq,
            key,
            mutation,
            summary,
            attempts: 0,
            enqueued_at: now,
        };
        self.next_seq += 1;

        let id = entry.mutation.person_id();
        match entry.kind() {
            OpKind::UpdateProp => {
                if self.deleted.contains(&id) {
                    debug!(person = %id, "dropping property update for deleted person");
                    return;
                }
                match self.props.get_mut(&id) {
                    Some(pending) => {
                        pending.merge_patch_from(entry);
                        pending.summary = summarize(&pending.mutation, before, after);
                        trace!(person = %id, "coalesced property update");
                    }
                    None => {
                        self.props.insert(id, entry);
                    }
                }
                self.prop_due.schedule(id, now + self.prop_debounce_ms);
            }
            OpKind::AddNode => {
                self.deleted.remove(&id);
                self.structural.push_back(entry);
            }
            OpKind::DeleteNode => {
                if self.props.remove(&id).is_some() {
                    debug!(person = %id, "dropped pending property update for deleted person");
                }
                self.prop_due.cancel(&id);
                self.deleted.insert(id);
                self.structural.push_back(entry);
            }
            OpKind::AddRelation | OpKind::DeleteRelation => {
                // The newer intent goes behind anything queued since the old
                // one, so it is never sent ahead of an endpoint's delete or add.
                if let Some(index) = self.structural.iter().position(|pending| pending.key == entry.key) {
                    trace!(key = ?entry.key, "superseding pending relationship intent");
                    self.structural.remove(index);
                }
                self.structural.push_back(entry);
            }
        }
    }

    /// Take the next batch, or `None` if nothing is due, a batch is already
    /// in flight, or a retry backoff is running. `force` ignores backoff and
    /// debounce windows.
    pub fn take_batch(&mut self, now: u64, force: bool) -> Option<Batch> {
        if self.in_flight {
            return None;
        }
        if !force && self.retry_at.is_some_and(|at| now < at) {
            return None;
        }

        let mut entries = Vec::new();
        while entries.len() < self.max_batch {
            match self.structural.pop_front() {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }

        if self.structural.is_empty() {
            let due: Vec<PersonId> = if force {
                self.props.keys().copied().collect()
            } else {
                self.prop_due.pop_due(now)
            };
            for id in due {
                if entries.len() >= self.max_batch {
                    if !force {
                        self.prop_due.schedule(id, now);
                    }
                    continue;
                }
                self.prop_due.cancel(&id);
                if let Some(entry) = self.props.remove(&id) {
                    entries.push(entry);
                }
            }
        }

        if entries.is_empty() {
            return None;
        }
        self.in_flight = true;
        trace!(entries = entries.len(), force, "batch taken");
        Some(Batch { generation: self.generation, entries })
    }

    /// Return a batch. Failed and unsent entries go back to the front.
    pub fn finish(&mut self, generation: u64, completion: Completion, now: u64) {
        self.in_flight = false;
        for entry in &completion.delivered {
            if let Mutation::DeleteNode(p) = &entry.mutation {
                self.deleted.remove(&p.person_id);
            }
        }
        if generation != self.generation {
            debug!(
                dropped = completion.unsent.len() + usize::from(completion.failed.is_some()),
                "queue cleared while batch was in flight"
            );
            return;
        }

        let failed = completion.failed.map(|mut entry| {
            entry.attempts += 1;
            entry
        });
        if failed.is_some() {
            self.failures += 1;
            let delay = self.backoff_ms(self.failures);
            self.retry_at = Some(now + delay);
            debug!(failures = self.failures, delay_ms = delay, "push failed, backing off");
        } else {
            self.failures = 0;
            self.retry_at = None;
        }

        let (structural, props): (Vec<_>, Vec<_>) = failed
            .into_iter()
            .chain(completion.unsent)
            .partition(|entry| entry.kind().is_structural());

        for entry in structural.into_iter().rev() {
            if matches!(entry.key, EntryKey::Link(_)) && self.structural.iter().any(|p| p.key == entry.key) {
                trace!(key = ?entry.key, "returned entry superseded by newer intent");
                continue;
            }
            self.structural.push_front(entry);
        }
        for entry in props {
            self.requeue_prop(entry, now);
        }
    }

    fn requeue_prop(&mut self, mut entry: OutboxEntry, now: u64) {
        let id = entry.mutation.person_id();
        if self.deleted.contains(&id) {
            debug!(person = %id, "dropping returned property update for deleted person");
            return;
        }
        match self.props.remove(&id) {
            Some(newer) => {
                // The returned patch sits under anything edited since.
                entry.merge_patch_from(newer);
                self.props.insert(id, entry);
            }
            None => {
                self.props.insert(id, entry);
                self.prop_due.schedule(id, now);
            }
        }
    }

    /// Exponential backoff for the n-th consecutive failure.
    pub fn backoff_ms(&self, failures: u32) -> u64 {
        let exp = failures.saturating_sub(1).min(32);
        self.retry_base_ms.saturating_mul(1u64 << exp).min(self.retry_max_ms)
    }

    /// When the pump should next try, if ever.
    pub fn next_wake(&self, now: u64) -> Option<u64> {
        if self.in_flight {
            return None;
        }
        let due = if self.structural.is_empty() { self.prop_due.next_deadline() } else { Some(now) };
        due.map(|at| self.retry_at.map_or(at, |retry| retry.max(at)))
    }

    /// Drop everything pending. A batch in flight is discarded when it
    /// returns. Returns the number of pending entries dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending_len();
        self.structural.clear();
        self.props.clear();
        self.prop_due.clear();
        self.deleted.clear();
        self.generation += 1;
        self.failures = 0;
        self.retry_at = None;
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.structural.len() + self.props.len()
    }

    /// Pending entries: structural in order, then properties by person.
    pub fn pending(&self) -> impl Iterator<Item = &OutboxEntry> {
        self.structural.iter().chain(self.props.values())
    }

    pub fn is_idle(&self) -> bool {
        !self.in_flight && self.pending_len() == 0
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn retry_at(&self) -> Option<u64> {
        self.retry_at
    }
}
