//! In-process FIFO queue with message groups and a dead-letter list.
//!
//! # Invariants
//! - A partition has at most one message in flight.
//! - A released message goes back to the head of its partition.
//! - A dedup id seen within the dedup window is accepted but not enqueued.
//! - A message received `max_receive_count` times without an ack is
//!   dead-lettered on release.

use crate::transport::publisher::{
    Delivery, EventPublisher, EventSource, OutboundEvent, TransportError, MAX_PUBLISH_BATCH,
};
use log::{info, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_receive_count: u32,
    pub dedup_window: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_receive_count: 5,
            dedup_window: Duration::from_secs(5 * 60),
        }
    }
}

/// A message that will not be delivered again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: Uuid,
    pub partition_key: String,
    pub body: String,
    pub receive_count: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    message_id: Uuid,
    partition_key: String,
    body: String,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    partitions: HashMap<String, VecDeque<QueuedMessage>>,
    /// Partitions in first-publish order; receive rotates through it.
    partition_order: VecDeque<String>,
    busy: HashSet<String>,
    in_flight: HashMap<u64, QueuedMessage>,
    seen: HashMap<Uuid, Instant>,
    dead_letters: Vec<DeadLetter>,
    next_receipt: u64,
}

pub struct InMemoryQueue {
    settings: QueueSettings,
    state: Mutex<QueueState>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

impl InMemoryQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Messages waiting or in flight.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|state| {
                state.partitions.values().map(VecDeque::len).sum::<usize>() + state.in_flight.len()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock()
            .map(|state| state.dead_letters.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Unavailable("queue state lock poisoned".to_string()))
    }

    fn take_in_flight(
        state: &mut QueueState,
        receipt: u64,
    ) -> Result<QueuedMessage, TransportError> {
        let message = state
            .in_flight
            .remove(&receipt)
            .ok_or(TransportError::UnknownReceipt(receipt))?;
        state.busy.remove(&message.partition_key);
        Ok(message)
    }

    fn push_dead_letter(state: &mut QueueState, message: QueuedMessage, reason: &str) {
        warn!(
            "event=dead_letter module=transport status=error message_id={} partition={} receive_count={} reason={}",
            message.message_id, message.partition_key, message.receive_count, reason
        );
        state.dead_letters.push(DeadLetter {
            message_id: message.message_id,
            partition_key: message.partition_key,
            body: message.body,
            receive_count: message.receive_count,
            reason: reason.to_string(),
        });
    }
}

impl EventPublisher for InMemoryQueue {
    fn publish_batch(&self, events: &[OutboundEvent]) -> Result<(), TransportError> {
        if events.len() > MAX_PUBLISH_BATCH {
            return Err(TransportError::BatchTooLarge {
                len: events.len(),
                max: MAX_PUBLISH_BATCH,
            });
        }

        let now = Instant::now();
        let window = self.settings.dedup_window;
        let mut state = self.lock()?;
        state
            .seen
            .retain(|_, first_seen| now.duration_since(*first_seen) < window);

        for event in events {
            if state.seen.contains_key(&event.dedup_id) {
                info!(
                    "event=publish_dedup module=transport status=skip message_id={} partition={}",
                    event.dedup_id, event.partition_key
                );
                continue;
            }
            state.seen.insert(event.dedup_id, now);

            if !state.partitions.contains_key(&event.partition_key) {
                state.partition_order.push_back(event.partition_key.clone());
            }
            state
                .partitions
                .entry(event.partition_key.clone())
                .or_default()
                .push_back(QueuedMessage {
                    message_id: event.dedup_id,
                    partition_key: event.partition_key.clone(),
                    body: event.body.clone(),
                    receive_count: 0,
                });
        }

        Ok(())
    }
}

impl EventSource for InMemoryQueue {
    fn receive(&self, max: usize) -> Result<Vec<Delivery>, TransportError> {
        let mut state = self.lock()?;
        let mut deliveries = Vec::new();
        let rounds = state.partition_order.len();

        for _ in 0..rounds {
            if deliveries.len() >= max {
                break;
            }
            let Some(partition_key) = state.partition_order.pop_front() else {
                break;
            };

            let idle = !state.busy.contains(&partition_key);
            let next = if idle {
                state
                    .partitions
                    .get_mut(&partition_key)
                    .and_then(VecDeque::pop_front)
            } else {
                None
            };

            if let Some(mut message) = next {
                message.receive_count += 1;
                state.next_receipt += 1;
                let receipt = state.next_receipt;
                deliveries.push(Delivery {
                    receipt,
                    message_id: message.message_id,
                    partition_key: message.partition_key.clone(),
                    body: message.body.clone(),
                    receive_count: message.receive_count,
                });
                state.busy.insert(partition_key.clone());
                state.in_flight.insert(receipt, message);
            }

            let drained = state
                .partitions
                .get(&partition_key)
                .map_or(true, VecDeque::is_empty);
            if drained && !state.busy.contains(&partition_key) {
                state.partitions.remove(&partition_key);
            } else {
                state.partition_order.push_back(partition_key);
            }
        }

        Ok(deliveries)
    }

    fn ack(&self, receipt: u64) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        Self::take_in_flight(&mut state, receipt)?;
        Ok(())
    }

    fn release(&self, receipt: u64) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        let message = Self::take_in_flight(&mut state, receipt)?;

        if message.receive_count >= self.settings.max_receive_count {
            Self::push_dead_letter(&mut state, message, "max receive count reached");
            return Ok(());
        }

        let partition_key = message.partition_key.clone();
        if !state.partitions.contains_key(&partition_key)
            && !state.partition_order.contains(&partition_key)
        {
            state.partition_order.push_back(partition_key.clone());
        }
        state
            .partitions
            .entry(partition_key)
            .or_default()
            .push_front(message);
        Ok(())
    }

    fn dead_letter(&self, receipt: u64, reason: &str) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        let message = Self::take_in_flight(&mut state, receipt)?;
        Self::push_dead_letter(&mut state, message, reason);
        Ok(())
    }
}
