//! Transport contracts and batched publishing.

use crate::diff::DetectedChange;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Per-call limit of the publish API.
pub const MAX_PUBLISH_BATCH: usize = 10;

const RAW_BODY_NAMESPACE: Uuid = Uuid::from_u128(0x2f8e_51c7_03ab_4d96_b1e4_7a0c_95d3_6e18);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    BatchTooLarge { len: usize, max: usize },
    UnknownReceipt(u64),
    Unavailable(String),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BatchTooLarge { len, max } => {
                write!(f, "publish batch of {len} events exceeds the limit of {max}")
            }
            Self::UnknownReceipt(receipt) => write!(f, "unknown delivery receipt {receipt}"),
            Self::Unavailable(message) => write!(f, "transport unavailable: {message}"),
        }
    }
}

impl Error for TransportError {}

/// One message ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEvent {
    pub dedup_id: Uuid,
    pub partition_key: String,
    pub body: String,
}

impl OutboundEvent {
    /// Wraps a detected change produced by the write `write_id`.
    pub fn from_change(change: &DetectedChange, write_id: &Uuid) -> Self {
        Self {
            dedup_id: change.dedup_id(write_id),
            partition_key: change.event.partition_key().to_string(),
            body: change.event.to_wire(),
        }
    }

    /// Wraps a body received from outside that has not been validated yet.
    ///
    /// Malformed bodies still travel through the queue so the consumer can
    /// dead-letter them.
    pub fn from_raw(body: impl Into<String>, partition_key: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            dedup_id: Uuid::new_v5(&RAW_BODY_NAMESPACE, body.as_bytes()),
            partition_key: partition_key.into(),
            body,
        }
    }
}

/// Publish side of the transport.
pub trait EventPublisher {
    /// Publishes at most `MAX_PUBLISH_BATCH` events in one call.
    fn publish_batch(&self, events: &[OutboundEvent]) -> Result<(), TransportError>;
}

impl<P: EventPublisher + ?Sized> EventPublisher for &P {
    fn publish_batch(&self, events: &[OutboundEvent]) -> Result<(), TransportError> {
        (**self).publish_batch(events)
    }
}

/// Publishes any number of events in order, `MAX_PUBLISH_BATCH` per call.
///
/// Stops at the first failing call and returns how many events were
/// published before it.
pub fn publish_all<P: EventPublisher + ?Sized>(
    publisher: &P,
    events: &[OutboundEvent],
) -> Result<usize, (usize, TransportError)> {
    let mut published = 0;
    for batch in events.chunks(MAX_PUBLISH_BATCH) {
        publisher
            .publish_batch(batch)
            .map_err(|err| (published, err))?;
        published += batch.len();
    }
    if published > 0 {
        info!("event=publish module=transport status=ok count={published}");
    }
    Ok(published)
}

/// One received, not yet acknowledged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receipt: u64,
    pub message_id: Uuid,
    pub partition_key: String,
    pub body: String,
    /// How many times this message has been received, including this one.
    pub receive_count: u32,
}

/// Consume side of the transport.
pub trait EventSource {
    /// Receives up to `max` messages, at most one per partition.
    fn receive(&self, max: usize) -> Result<Vec<Delivery>, TransportError>;

    /// Removes a processed message.
    fn ack(&self, receipt: u64) -> Result<(), TransportError>;

    /// Hands a message back for redelivery.
    fn release(&self, receipt: u64) -> Result<(), TransportError>;

    /// Parks a message that must not be retried.
    fn dead_letter(&self, receipt: u64, reason: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::{publish_all, EventPublisher, OutboundEvent, TransportError, MAX_PUBLISH_BATCH};
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingPublisher {
        batches: RefCell<Vec<usize>>,
        fail_on_call: Option<usize>,
    }

    impl EventPublisher for RecordingPublisher {
        fn publish_batch(&self, events: &[OutboundEvent]) -> Result<(), TransportError> {
            if events.len() > MAX_PUBLISH_BATCH {
                return Err(TransportError::BatchTooLarge {
                    len: events.len(),
                    max: MAX_PUBLISH_BATCH,
                });
            }
            let mut batches = self.batches.borrow_mut();
            if self.fail_on_call == Some(batches.len()) {
                return Err(TransportError::Unavailable("throttled".to_string()));
            }
            batches.push(events.len());
            Ok(())
        }
    }

    fn events(count: usize) -> Vec<OutboundEvent> {
        (0..count)
            .map(|index| OutboundEvent::from_raw(format!("{{\"n\":{index}}}"), "p"))
            .collect()
    }

    #[test]
    fn publish_all_chunks_by_ten() {
        let publisher = RecordingPublisher::default();

        let published = publish_all(&publisher, &events(23)).unwrap();

        assert_eq!(published, 23);
        assert_eq!(*publisher.batches.borrow(), vec![10, 10, 3]);
    }

    #[test]
    fn publish_all_reports_progress_on_failure() {
        let publisher = RecordingPublisher {
            fail_on_call: Some(1),
            ..RecordingPublisher::default()
        };

        let (published, err) = publish_all(&publisher, &events(15)).unwrap_err();

        assert_eq!(published, 10);
        assert!(matches!(err, TransportError::Unavailable(_)));
    }

    #[test]
    fn raw_dedup_id_depends_on_body_only() {
        let first = OutboundEvent::from_raw("{}", "a");
        let second = OutboundEvent::from_raw("{}", "b");
        assert_eq!(first.dedup_id, second.dedup_id);
    }
}
