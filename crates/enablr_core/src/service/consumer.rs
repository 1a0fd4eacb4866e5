//! Queue consumer driving the reconciler.
//!
//! # Invariants
//! - Every received message ends in exactly one of ack, release, or
//!   dead-letter.
//! - Messages are processed one at a time in receive order.
//! - A failed settle call does not stop the batch. The remaining messages
//!   are still settled and the first transport error is returned after.

use crate::model::event::ChangeEvent;
use crate::repo::store::ReminderStore;
use crate::service::reconciler::Reconciler;
use crate::transport::{Delivery, EventSource, TransportError};
use chrono::{DateTime, Utc};
use log::{error, info, warn};

/// Messages requested per receive call.
pub const RECEIVE_BATCH: usize = 10;

/// Outcome counts of one or more receive rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub received: usize,
    pub acked: usize,
    pub released: usize,
    pub dead_lettered: usize,
}

impl ConsumerReport {
    fn absorb(&mut self, other: ConsumerReport) {
        self.received += other.received;
        self.acked += other.acked;
        self.released += other.released;
        self.dead_lettered += other.dead_lettered;
    }
}

enum Disposition {
    Ack,
    Release,
    DeadLetter(String),
}

pub struct EventConsumer<'a, Q: EventSource, S: ReminderStore> {
    source: &'a Q,
    reconciler: &'a Reconciler<S>,
}

impl<'a, Q: EventSource, S: ReminderStore> EventConsumer<'a, Q, S> {
    pub fn new(source: &'a Q, reconciler: &'a Reconciler<S>) -> Self {
        Self { source, reconciler }
    }

    /// Receives one batch and settles every message in it.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<ConsumerReport, TransportError> {
        let deliveries = self.source.receive(RECEIVE_BATCH)?;
        let mut report = ConsumerReport {
            received: deliveries.len(),
            ..ConsumerReport::default()
        };

        let mut first_error = None;
        for delivery in &deliveries {
            let disposition = self.handle(delivery, now);
            if let Err(err) = self.settle(delivery, disposition, &mut report) {
                error!(
                    "event=settle_message module=consumer status=error message_id={} error={}",
                    delivery.message_id, err
                );
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    fn settle(
        &self,
        delivery: &Delivery,
        disposition: Disposition,
        report: &mut ConsumerReport,
    ) -> Result<(), TransportError> {
        match disposition {
            Disposition::Ack => {
                self.source.ack(delivery.receipt)?;
                report.acked += 1;
            }
            Disposition::Release => {
                self.source.release(delivery.receipt)?;
                report.released += 1;
            }
            Disposition::DeadLetter(reason) => {
                self.source.dead_letter(delivery.receipt, &reason)?;
                report.dead_lettered += 1;
            }
        }
        Ok(())
    }

    /// Runs receive rounds until one comes back empty.
    ///
    /// `max_rounds` bounds the loop so a message that keeps failing cannot
    /// spin forever on a queue without a receive limit.
    pub fn drain(
        &self,
        now: DateTime<Utc>,
        max_rounds: usize,
    ) -> Result<ConsumerReport, TransportError> {
        let mut total = ConsumerReport::default();
        for _ in 0..max_rounds {
            let round = self.run_once(now)?;
            if round.received == 0 {
                break;
            }
            total.absorb(round);
        }
        info!(
            "event=consume module=consumer status=ok received={} acked={} released={} dead_lettered={}",
            total.received, total.acked, total.released, total.dead_lettered
        );
        Ok(total)
    }

    fn handle(&self, delivery: &Delivery, now: DateTime<Utc>) -> Disposition {
        let event = match ChangeEvent::from_wire(&delivery.body) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    "event=consume_message module=consumer status=error message_id={} error={}",
                    delivery.message_id, err
                );
                return Disposition::DeadLetter(err.to_string());
            }
        };

        match self.reconciler.reconcile(&event, now) {
            Ok(_) => Disposition::Ack,
            Err(err) if err.is_retryable() => {
                warn!(
                    "event=consume_message module=consumer status=retry message_id={} receive_count={} error={}",
                    delivery.message_id, delivery.receive_count, err
                );
                Disposition::Release
            }
            Err(err) => {
                error!(
                    "event=consume_message module=consumer status=error message_id={} error={}",
                    delivery.message_id, err
                );
                Disposition::DeadLetter(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EventConsumer;
    use crate::db::open_db_in_memory;
    use crate::repo::sqlite_store::SqliteReminderStore;
    use crate::service::reconciler::Reconciler;
    use crate::transport::{
        Delivery, EventPublisher, EventSource, InMemoryQueue, OutboundEvent, TransportError,
    };
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;
    use std::time::Duration;

    /// Fails the first dead-letter call, forwards everything else.
    struct StickySource<'q> {
        inner: &'q InMemoryQueue,
        failed: Cell<bool>,
    }

    impl EventSource for StickySource<'_> {
        fn receive(&self, max: usize) -> Result<Vec<Delivery>, TransportError> {
            self.inner.receive(max)
        }

        fn ack(&self, receipt: u64) -> Result<(), TransportError> {
            self.inner.ack(receipt)
        }

        fn release(&self, receipt: u64) -> Result<(), TransportError> {
            self.inner.release(receipt)
        }

        fn dead_letter(&self, receipt: u64, reason: &str) -> Result<(), TransportError> {
            if self.failed.replace(true) {
                self.inner.dead_letter(receipt, reason)
            } else {
                Err(TransportError::Unavailable("dead-letter queue offline".to_string()))
            }
        }
    }

    fn no_sleep(_: Duration) {}

    #[test]
    fn failed_settle_does_not_strand_the_rest_of_the_batch() {
        let conn = open_db_in_memory().unwrap();
        let queue = InMemoryQueue::default();
        queue
            .publish_batch(&[
                OutboundEvent::from_raw("not json", "a"),
                OutboundEvent::from_raw("[]", "b"),
                OutboundEvent::from_raw("{}", "c"),
            ])
            .unwrap();
        let source = StickySource {
            inner: &queue,
            failed: Cell::new(false),
        };
        let reconciler = Reconciler::new(SqliteReminderStore::new(&conn)).with_sleep(no_sleep);
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 5, 0, 0).unwrap();

        let err = EventConsumer::new(&source, &reconciler)
            .run_once(now)
            .unwrap_err();

        assert!(matches!(err, TransportError::Unavailable(_)));
        assert_eq!(queue.dead_letters().len(), 2);
    }
}
