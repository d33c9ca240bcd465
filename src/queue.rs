// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded outbound queue for messages published while disconnected.
//!
//! The queue never blocks: when it is full the oldest entry is evicted to
//! make room. The client drains it in FIFO order after every successful
//! (re)connection.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::transport::PublishOptions;

/// Settings for the offline queue and its flush.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use smartclock_lib::QueueConfig;
///
/// let config = QueueConfig::new()
///     .with_capacity(20)
///     .with_flush_delay(Duration::ZERO);
/// assert_eq!(config.capacity, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of queued messages.
    pub capacity: usize,
    /// Pause between two flushed messages.
    pub flush_delay: Duration,
    /// Delivery attempts per entry before it is dropped.
    pub max_delivery_attempts: u32,
}

impl QueueConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the capacity (at least 1).
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Sets the pause between flushed messages.
    #[must_use]
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    /// Sets the delivery attempts per entry (at least 1).
    #[must_use]
    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts.max(1);
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            flush_delay: Duration::from_millis(100),
            max_delivery_attempts: 3,
        }
    }
}

/// A message waiting for the session to come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Destination topic.
    pub topic: String,
    /// Encoded payload.
    pub payload: Vec<u8>,
    /// Publish options.
    pub options: PublishOptions,
    /// When the message was queued.
    pub enqueued_at: DateTime<Utc>,
    /// Active device at the time, if any.
    pub device_id: Option<String>,
}

impl QueueEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        payload: Vec<u8>,
        options: PublishOptions,
        device_id: Option<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload,
            options,
            enqueued_at: Utc::now(),
            device_id,
        }
    }
}

/// Bounded drop-oldest FIFO.
#[derive(Debug, Clone)]
pub struct OfflineQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
}

impl OfflineQueue {
    /// Creates an empty queue holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Appends an entry, returning the evicted oldest entry if the queue was
    /// full.
    pub fn enqueue(&mut self, entry: QueueEntry) -> Option<QueueEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };

        if let Some(dropped) = &evicted {
            tracing::warn!(
                topic = %dropped.topic,
                capacity = self.capacity,
                "Offline queue full, dropping oldest message"
            );
        }

        self.entries.push_back(entry);
        evicted
    }

    /// Removes and returns the oldest entry.
    pub fn dequeue(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Puts an entry back at the head of the queue.
    ///
    /// Used when a flush is interrupted; the entry keeps its position ahead
    /// of anything queued in the meantime. If that overflows the queue the
    /// newest entry is dropped.
    pub fn requeue_front(&mut self, entry: QueueEntry) {
        self.entries.push_front(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Removes and returns every entry, oldest first.
    pub fn drain(&mut self) -> Vec<QueueEntry> {
        self.entries.drain(..).collect()
    }

    /// Returns the queued entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discards every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default().capacity)
    }
}
