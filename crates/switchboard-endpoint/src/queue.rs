//! Bounded, time-bounded buffer for messages that cannot be sent.
//!
//! Held only on the endpoint side, only while disconnected. Two hard limits
//! bound memory under prolonged disconnection: a capacity (oldest entry
//! dropped on overflow) and a maximum age (stale entries dropped on every
//! scan, never delivered). Both are documented capacity policy, not errors.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use switchboard_core::Envelope;

/// One queued (message, target) pair. The target travels inside the
/// envelope; the timestamp is the enqueue instant and survives re-queueing.
#[derive(Debug)]
pub struct QueueEntry {
    pub envelope: Envelope,
    pub queued_at: Instant,
}

/// FIFO queue of not-yet-sent envelopes.
pub struct MessageQueue {
    entries: VecDeque<QueueEntry>,
    cap: usize,
    max_age: Duration,
}

impl MessageQueue {
    pub fn new(cap: usize, max_age: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            cap,
            max_age,
        }
    }

    /// Enqueue a fresh envelope, evicting expired entries first and the
    /// oldest entry if the queue is still full.
    pub fn push(&mut self, envelope: Envelope) {
        self.enqueue(QueueEntry {
            envelope,
            queued_at: Instant::now(),
        });
    }

    /// Put back an entry whose resend failed, keeping its original
    /// timestamp so aging counts from first enqueue.
    pub fn requeue(&mut self, entry: QueueEntry) {
        self.enqueue(entry);
    }

    fn enqueue(&mut self, entry: QueueEntry) {
        self.expire();
        if self.entries.len() >= self.cap {
            if let Some(dropped) = self.entries.pop_front() {
                debug!("queue full, dropping oldest {:?}", dropped.envelope.action);
            }
        }
        self.entries.push_back(entry);
    }

    /// Take every still-fresh entry in enqueue order; expired entries are
    /// dropped here and never delivered, regardless of position.
    pub fn drain_fresh(&mut self) -> Vec<QueueEntry> {
        let max_age = self.max_age;
        self.entries
            .drain(..)
            .filter(|entry| {
                let fresh = entry.queued_at.elapsed() <= max_age;
                if !fresh {
                    debug!("dropping expired queued {:?}", entry.envelope.action);
                }
                fresh
            })
            .collect()
    }

    fn expire(&mut self) {
        let max_age = self.max_age;
        self.entries.retain(|entry| {
            let fresh = entry.queued_at.elapsed() <= max_age;
            if !fresh {
                debug!("dropping expired queued {:?}", entry.envelope.action);
            }
            fresh
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
