//! Operation tracker.
//!
//! Correlates transport-assigned operation ids with what was asked of the
//! broker and reconciles acknowledgments against them. Acknowledgments are
//! delivered on the transport's event path and may overtake the issuer: the
//! transport can report a QoS 0 publish as done before the issuing call has
//! handed its id back. Each id therefore moves through an explicit state:
//!
//! - absent: not yet recorded and not yet acknowledged
//! - `Pending`: recorded by the issuer, waiting for the broker
//! - `AckedEarly`: acknowledged while a QoS 0 issue was in flight, waiting
//!   for the issuer to record it
//!
//! Recording an `AckedEarly` id completes it immediately. Any other
//! unexplained acknowledgment is an [`SessionError::UnknownAcknowledgment`].
//!
//! [`OperationTracker::reset`] starts a new generation. Tickets opened
//! before it belong to a dead connection and are discarded when they come
//! back, so ids reused by the next connection never collide with them.

use crate::session::drain::SeedCounters;
use crate::session::error::{OperationKind, SessionError};
use crate::transport::{OperationId, Qos};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishIntent {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeIntent {
    pub topic: String,
    pub qos: Qos,
}

/// What an in-flight operation asked the broker to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Publish(PublishIntent),
    Subscribe(SubscribeIntent),
}

impl Intent {
    pub fn kind(&self) -> OperationKind {
        match self {
            Intent::Publish(_) => OperationKind::Publish,
            Intent::Subscribe(_) => OperationKind::Subscribe,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            Intent::Publish(p) => &p.topic,
            Intent::Subscribe(s) => &s.topic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Pending(Intent),
    AckedEarly,
}

// ---------------------------------------------------------------------------
// Tickets and outcomes
// ---------------------------------------------------------------------------

/// Marks an issue in flight between the transport call and
/// [`OperationTracker::record_issued`].
#[derive(Debug)]
#[must_use = "an issue ticket must be recorded or abandoned"]
pub struct IssueTicket {
    kind: OperationKind,
    qos: Qos,
    generation: u64,
}

impl IssueTicket {
    fn is_publish(&self) -> bool {
        self.kind == OperationKind::Publish
    }

    /// QoS 0 publishes open the early-acknowledgment window.
    fn forgiving(&self) -> bool {
        self.is_publish() && !self.qos.is_acknowledged()
    }

    /// Publishes that hold back the drain condition.
    fn counted(&self) -> bool {
        self.is_publish() && self.qos.is_acknowledged()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// Waiting for the broker.
    Pending,
    /// The acknowledgment already arrived; the operation is complete.
    AlreadySatisfied(SeedCounters),
    /// The connection it was issued on is gone; nothing was recorded.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishAckOutcome {
    Completed {
        intent: PublishIntent,
        counters: SeedCounters,
    },
    /// Arrived ahead of its issuer; parked until it is recorded.
    Forgiven,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Ledger {
    slots: HashMap<OperationId, Slot>,
    /// Ids that already used their one early acknowledgment.
    forgiven: HashSet<OperationId>,
    counters: SeedCounters,
    /// Publishes between `begin_issue` and `record_issued`/`abandon`.
    issuing: usize,
    /// The QoS 0 subset of `issuing`.
    forgiving: usize,
    /// Bumped by every reset.
    generation: u64,
}

impl Ledger {
    fn is_stale(&self, ticket: &IssueTicket) -> bool {
        ticket.generation != self.generation
    }

    fn open(&mut self, ticket: &IssueTicket) {
        if ticket.is_publish() {
            self.issuing += 1;
        }
        if ticket.forgiving() {
            self.forgiving += 1;
        }
        if ticket.counted() {
            self.counters.outstanding_publishes += 1;
        }
    }

    fn close(&mut self, ticket: &IssueTicket) {
        if ticket.is_publish() {
            self.issuing = self.issuing.saturating_sub(1);
        }
        if ticket.forgiving() {
            self.forgiving = self.forgiving.saturating_sub(1);
        }
    }

    fn settle_counted(&mut self) {
        self.counters.outstanding_publishes = self.counters.outstanding_publishes.saturating_sub(1);
    }

    /// With no issuer in flight, a parked early ack can never be claimed.
    fn take_orphan(&mut self) -> Option<OperationId> {
        if self.issuing > 0 {
            return None;
        }
        let mut orphans: Vec<OperationId> = self
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::AckedEarly))
            .map(|(id, _)| *id)
            .collect();
        orphans.sort();
        for id in &orphans {
            self.slots.remove(id);
        }
        orphans.first().copied()
    }
}

/// Ledger of in-flight operations plus the seeding counters, guarded by one
/// lock so issue and acknowledgment paths see each other atomically.
#[derive(Debug, Default)]
pub struct OperationTracker {
    ledger: Mutex<Ledger>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call before handing the request to the transport.
    pub fn begin_issue(&self, kind: OperationKind, qos: Qos) -> IssueTicket {
        let mut ledger = self.ledger.lock();
        let ticket = IssueTicket {
            kind,
            qos,
            generation: ledger.generation,
        };
        ledger.open(&ticket);
        ticket
    }

    /// The transport refused the request; undo [`Self::begin_issue`].
    pub fn abandon(&self, ticket: IssueTicket) -> SeedCounters {
        let mut ledger = self.ledger.lock();
        if ledger.is_stale(&ticket) {
            return ledger.counters;
        }
        ledger.close(&ticket);
        if ticket.counted() {
            ledger.settle_counted();
        }
        ledger.counters
    }

    /// Record the id the transport returned for an issued request.
    pub fn record_issued(
        &self,
        ticket: IssueTicket,
        operation_id: OperationId,
        intent: Intent,
    ) -> Result<Recorded, SessionError> {
        debug_assert_eq!(ticket.kind, intent.kind());
        let mut ledger = self.ledger.lock();
        if ledger.is_stale(&ticket) {
            return Ok(Recorded::Superseded);
        }
        ledger.close(&ticket);

        let recorded = match ledger.slots.remove(&operation_id) {
            Some(Slot::AckedEarly) if ticket.is_publish() => {
                if ticket.counted() {
                    ledger.settle_counted();
                }
                Recorded::AlreadySatisfied(ledger.counters)
            }
            Some(Slot::AckedEarly) => {
                return Err(SessionError::UnknownAcknowledgment {
                    kind: OperationKind::Publish,
                    operation_id,
                });
            }
            Some(existing @ Slot::Pending(_)) => {
                ledger.slots.insert(operation_id, existing);
                return Err(SessionError::DuplicateOperation { operation_id });
            }
            None => {
                ledger.slots.insert(operation_id, Slot::Pending(intent));
                Recorded::Pending
            }
        };

        if let Some(orphan) = ledger.take_orphan() {
            return Err(SessionError::UnknownAcknowledgment {
                kind: OperationKind::Publish,
                operation_id: orphan,
            });
        }
        Ok(recorded)
    }

    /// Reconcile a publish acknowledgment.
    pub fn on_publish_ack(
        &self,
        operation_id: OperationId,
    ) -> Result<PublishAckOutcome, SessionError> {
        let unknown = SessionError::UnknownAcknowledgment {
            kind: OperationKind::Publish,
            operation_id,
        };
        let mut ledger = self.ledger.lock();
        match ledger.slots.remove(&operation_id) {
            Some(Slot::Pending(Intent::Publish(intent))) => {
                if intent.qos.is_acknowledged() {
                    ledger.settle_counted();
                }
                Ok(PublishAckOutcome::Completed {
                    intent,
                    counters: ledger.counters,
                })
            }
            Some(other @ Slot::Pending(Intent::Subscribe(_))) => {
                ledger.slots.insert(operation_id, other);
                Err(unknown)
            }
            // second unexplained ack; the parked one is dropped with it
            Some(Slot::AckedEarly) => Err(unknown),
            None if ledger.forgiving > 0 && !ledger.forgiven.contains(&operation_id) => {
                ledger.forgiven.insert(operation_id);
                ledger.slots.insert(operation_id, Slot::AckedEarly);
                Ok(PublishAckOutcome::Forgiven)
            }
            None => Err(unknown),
        }
    }

    /// Reconcile a subscribe acknowledgment. Subscriptions are always recorded
    /// before their SUBACK can arrive, so absence is never forgiven.
    pub fn on_subscribe_ack(
        &self,
        operation_id: OperationId,
    ) -> Result<SubscribeIntent, SessionError> {
        let mut ledger = self.ledger.lock();
        match ledger.slots.remove(&operation_id) {
            Some(Slot::Pending(Intent::Subscribe(intent))) => Ok(intent),
            Some(other) => {
                ledger.slots.insert(operation_id, other);
                Err(SessionError::UnknownAcknowledgment {
                    kind: OperationKind::Subscribe,
                    operation_id,
                })
            }
            None => Err(SessionError::UnknownAcknowledgment {
                kind: OperationKind::Subscribe,
                operation_id,
            }),
        }
    }

    /// Monotonic within a connection.
    pub fn mark_seeding_complete(&self) -> SeedCounters {
        let mut ledger = self.ledger.lock();
        ledger.counters.seeding_complete = true;
        ledger.counters
    }

    pub fn counters(&self) -> SeedCounters {
        self.ledger.lock().counters
    }

    pub fn is_pending(&self, operation_id: OperationId) -> bool {
        matches!(
            self.ledger.lock().slots.get(&operation_id),
            Some(Slot::Pending(_))
        )
    }

    /// Ids with any ledger entry, pending or parked.
    pub fn len(&self) -> usize {
        self.ledger.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending operations ordered by id.
    pub fn pending(&self) -> Vec<(OperationId, Intent)> {
        let ledger = self.ledger.lock();
        let mut pending: Vec<_> = ledger
            .slots
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Pending(intent) => Some((*id, intent.clone())),
                Slot::AckedEarly => None,
            })
            .collect();
        pending.sort_by_key(|(id, _)| *id);
        pending
    }

    /// Forget everything. Ids from a dead connection mean nothing on the next.
    pub fn reset(&self) {
        let mut ledger = self.ledger.lock();
        let generation = ledger.generation.wrapping_add(1);
        *ledger = Ledger {
            generation,
            ..Ledger::default()
        };
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(topic: &str, qos: Qos) -> Intent {
        Intent::Publish(PublishIntent {
            topic: topic.to_string(),
            payload: Bytes::from_static(b"{}"),
            qos,
            retain: true,
        })
    }

    fn subscribe(topic: &str) -> Intent {
        Intent::Subscribe(SubscribeIntent {
            topic: topic.to_string(),
            qos: Qos::AtLeastOnce,
        })
    }

    fn unknown(kind: OperationKind, id: u64) -> SessionError {
        SessionError::UnknownAcknowledgment {
            kind,
            operation_id: OperationId(id),
        }
    }

    #[test]
    fn test_publish_then_ack() {
        let tracker = OperationTracker::new();
        let ticket = tracker.begin_issue(OperationKind::Publish, Qos::ExactlyOnce);
        assert_eq!(tracker.counters().outstanding_publishes, 1);
        let recorded = tracker
            .record_issued(ticket, OperationId(1), publish("vehicle/1/status", Qos::ExactlyOnce))
            .unwrap();
        assert_eq!(recorded, Recorded::Pending);
        assert!(tracker.is_pending(OperationId(1)));

        let outcome = tracker.on_publish_ack(OperationId(1)).unwrap();
        match outcome {
            PublishAckOutcome::Completed { intent, counters } => {
                assert_eq!(intent.topic, "vehicle/1/status");
                assert_eq!(counters.outstanding_publishes, 0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_qos0_ack_before_record_is_forgiven() {
        let tracker = OperationTracker::new();
        let ticket = tracker.begin_issue(OperationKind::Publish, Qos::AtMostOnce);

        // transport reports the write before the issuer gets its id back
        assert_eq!(
            tracker.on_publish_ack(OperationId(7)).unwrap(),
            PublishAckOutcome::Forgiven
        );
        assert!(!tracker.is_pending(OperationId(7)));

        let recorded = tracker
            .record_issued(ticket, OperationId(7), publish("vehicle/7/location", Qos::AtMostOnce))
            .unwrap();
        assert!(matches!(recorded, Recorded::AlreadySatisfied(_)));
        assert!(tracker.is_empty());
        assert_eq!(tracker.counters().outstanding_publishes, 0);
    }

    #[test]
    fn test_second_ack_after_forgiveness_is_unknown() {
        let tracker = OperationTracker::new();
        let ticket = tracker.begin_issue(OperationKind::Publish, Qos::AtMostOnce);
        tracker.on_publish_ack(OperationId(3)).unwrap();
        tracker
            .record_issued(ticket, OperationId(3), publish("a", Qos::AtMostOnce))
            .unwrap();

        assert_eq!(
            tracker.on_publish_ack(OperationId(3)).unwrap_err(),
            unknown(OperationKind::Publish, 3)
        );
    }

    #[test]
    fn test_forgiveness_is_once_per_id_even_with_issues_in_flight() {
        let tracker = OperationTracker::new();
        let first = tracker.begin_issue(OperationKind::Publish, Qos::AtMostOnce);
        tracker.on_publish_ack(OperationId(3)).unwrap();
        tracker
            .record_issued(first, OperationId(3), publish("a", Qos::AtMostOnce))
            .unwrap();

        // another QoS 0 issue keeps the window open
        let _second = tracker.begin_issue(OperationKind::Publish, Qos::AtMostOnce);
        assert_eq!(
            tracker.on_publish_ack(OperationId(3)).unwrap_err(),
            unknown(OperationKind::Publish, 3)
        );
    }

    #[test]
    fn test_double_early_ack_is_unknown() {
        let tracker = OperationTracker::new();
        let _ticket = tracker.begin_issue(OperationKind::Publish, Qos::AtMostOnce);
        tracker.on_publish_ack(OperationId(9)).unwrap();
        assert_eq!(
            tracker.on_publish_ack(OperationId(9)).unwrap_err(),
            unknown(OperationKind::Publish, 9)
        );
    }

    #[test]
    fn test_unknown_qos2_ack_without_window() {
        let tracker = OperationTracker::new();
        let _ticket = tracker.begin_issue(OperationKind::Publish, Qos::ExactlyOnce);
        assert_eq!(
            tracker.on_publish_ack(OperationId(4)).unwrap_err(),
            unknown(OperationKind::Publish, 4)
        );
    }

    #[test]
    fn test_early_ack_never_claimed_is_orphaned() {
        let tracker = OperationTracker::new();
        let ticket = tracker.begin_issue(OperationKind::Publish, Qos::AtMostOnce);
        tracker.on_publish_ack(OperationId(50)).unwrap();

        // the issuer got a different id; nobody will ever claim 50
        let err = tracker
            .record_issued(ticket, OperationId(2), publish("a", Qos::AtMostOnce))
            .unwrap_err();
        assert_eq!(err, unknown(OperationKind::Publish, 50));
        assert!(!tracker.pending().iter().any(|(id, _)| *id == OperationId(50)));
    }

    #[test]
    fn test_duplicate_pending_id_is_rejected() {
        let tracker = OperationTracker::new();
        let first = tracker.begin_issue(OperationKind::Publish, Qos::AtLeastOnce);
        tracker
            .record_issued(first, OperationId(1), publish("a", Qos::AtLeastOnce))
            .unwrap();
        let second = tracker.begin_issue(OperationKind::Publish, Qos::AtLeastOnce);
        assert_eq!(
            tracker
                .record_issued(second, OperationId(1), publish("b", Qos::AtLeastOnce))
                .unwrap_err(),
            SessionError::DuplicateOperation {
                operation_id: OperationId(1)
            }
        );
    }

    #[test]
    fn test_subscribe_ack_round() {
        let tracker = OperationTracker::new();
        let ticket = tracker.begin_issue(OperationKind::Subscribe, Qos::AtLeastOnce);
        tracker
            .record_issued(ticket, OperationId(11), subscribe("vehicle/+/status"))
            .unwrap();
        assert_eq!(tracker.counters().outstanding_publishes, 0);

        let intent = tracker.on_subscribe_ack(OperationId(11)).unwrap();
        assert_eq!(intent.topic, "vehicle/+/status");
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_subscribe_ack_is_never_forgiven() {
        let tracker = OperationTracker::new();
        let _open = tracker.begin_issue(OperationKind::Publish, Qos::AtMostOnce);
        assert_eq!(
            tracker.on_subscribe_ack(OperationId(1)).unwrap_err(),
            unknown(OperationKind::Subscribe, 1)
        );
    }

    #[test]
    fn test_ack_of_wrong_kind_is_unknown() {
        let tracker = OperationTracker::new();
        let ticket = tracker.begin_issue(OperationKind::Subscribe, Qos::AtLeastOnce);
        tracker
            .record_issued(ticket, OperationId(5), subscribe("x"))
            .unwrap();
        assert_eq!(
            tracker.on_publish_ack(OperationId(5)).unwrap_err(),
            unknown(OperationKind::Publish, 5)
        );
        assert!(tracker.is_pending(OperationId(5)));
    }

    #[test]
    fn test_abandon_restores_counters() {
        let tracker = OperationTracker::new();
        let ticket = tracker.begin_issue(OperationKind::Publish, Qos::ExactlyOnce);
        assert_eq!(tracker.counters().outstanding_publishes, 1);
        let counters = tracker.abandon(ticket);
        assert_eq!(counters.outstanding_publishes, 0);
        // window closed again
        assert!(tracker.on_publish_ack(OperationId(1)).is_err());
    }

    #[test]
    fn test_reset_clears_ledger_and_counters() {
        let tracker = OperationTracker::new();
        let ticket = tracker.begin_issue(OperationKind::Publish, Qos::ExactlyOnce);
        tracker
            .record_issued(ticket, OperationId(1), publish("a", Qos::ExactlyOnce))
            .unwrap();
        tracker.mark_seeding_complete();
        tracker.reset();
        assert!(tracker.is_empty());
        assert_eq!(tracker.counters(), SeedCounters::default());
    }

    #[test]
    fn test_issue_spanning_a_reset_is_superseded() {
        let tracker = OperationTracker::new();
        let stale = tracker.begin_issue(OperationKind::Publish, Qos::ExactlyOnce);
        let stale_qos0 = tracker.begin_issue(OperationKind::Publish, Qos::AtMostOnce);
        tracker.reset();

        assert_eq!(
            tracker
                .record_issued(stale, OperationId(1), publish("a", Qos::ExactlyOnce))
                .unwrap(),
            Recorded::Superseded
        );
        assert_eq!(tracker.abandon(stale_qos0), SeedCounters::default());
        assert!(tracker.is_empty());
        assert_eq!(tracker.counters(), SeedCounters::default());

        // the next connection hands out the same id again
        let fresh = tracker.begin_issue(OperationKind::Publish, Qos::ExactlyOnce);
        assert_eq!(tracker.counters().outstanding_publishes, 1);
        assert_eq!(
            tracker
                .record_issued(fresh, OperationId(1), publish("b", Qos::ExactlyOnce))
                .unwrap(),
            Recorded::Pending
        );
        assert_eq!(tracker.pending().len(), 1);
    }

    #[test]
    fn test_stale_issuer_does_not_open_the_forgiveness_window() {
        let tracker = OperationTracker::new();
        let _stale = tracker.begin_issue(OperationKind::Publish, Qos::AtMostOnce);
        tracker.reset();
        assert_eq!(
            tracker.on_publish_ack(OperationId(2)).unwrap_err(),
            unknown(OperationKind::Publish, 2)
        );
    }

    // -----------------------------------------------------------------------
    // Interleavings
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Begin(usize),
        Record(usize),
        Ack(usize),
    }

    /// Every ordering of begin/record/ack for the given publishes that a
    /// transport could produce: QoS 0 acks may overtake the record, acked
    /// QoS acks may not.
    fn interleavings(qos: &[Qos]) -> Vec<Vec<Step>> {
        fn walk(
            qos: &[Qos],
            progress: &mut Vec<u8>,
            acked: &mut Vec<bool>,
            current: &mut Vec<Step>,
            out: &mut Vec<Vec<Step>>,
        ) {
            if current.len() == qos.len() * 3 {
                out.push(current.clone());
                return;
            }
            for op in 0..qos.len() {
                let mut candidates = Vec::new();
                match progress[op] {
                    0 => candidates.push(Step::Begin(op)),
                    1 => {
                        candidates.push(Step::Record(op));
                        if !qos[op].is_acknowledged() && !acked[op] {
                            candidates.push(Step::Ack(op));
                        }
                    }
                    2 if !acked[op] => candidates.push(Step::Ack(op)),
                    _ => {}
                }
                for step in candidates {
                    let (saved_progress, saved_acked) = (progress[op], acked[op]);
                    match step {
                        Step::Ack(_) => acked[op] = true,
                        _ => progress[op] += 1,
                    }
                    current.push(step);
                    walk(qos, progress, acked, current, out);
                    current.pop();
                    progress[op] = saved_progress;
                    acked[op] = saved_acked;
                }
            }
        }

        let mut out = Vec::new();
        walk(
            qos,
            &mut vec![0; qos.len()],
            &mut vec![false; qos.len()],
            &mut Vec::new(),
            &mut out,
        );
        out
    }

    #[test]
    fn test_counters_track_pending_acknowledged_publishes_in_every_order() {
        let qos = [Qos::AtMostOnce, Qos::ExactlyOnce, Qos::AtLeastOnce];
        let orders = interleavings(&qos);
        assert!(orders.len() > 100);

        for order in orders {
            let tracker = OperationTracker::new();
            let mut tickets: Vec<Option<IssueTicket>> = (0..qos.len()).map(|_| None).collect();
            let mut begun = vec![false; qos.len()];
            let mut acked = vec![false; qos.len()];

            for step in &order {
                match *step {
                    Step::Begin(op) => {
                        tickets[op] = Some(tracker.begin_issue(OperationKind::Publish, qos[op]));
                        begun[op] = true;
                    }
                    Step::Record(op) => {
                        let ticket = tickets[op].take().unwrap();
                        tracker
                            .record_issued(ticket, OperationId(op as u64), publish("t", qos[op]))
                            .unwrap_or_else(|e| panic!("{order:?}: {e}"));
                    }
                    Step::Ack(op) => {
                        tracker
                            .on_publish_ack(OperationId(op as u64))
                            .unwrap_or_else(|e| panic!("{order:?}: {e}"));
                        acked[op] = true;
                    }
                }

                let expected = (0..qos.len())
                    .filter(|&op| qos[op].is_acknowledged() && begun[op] && !acked[op])
                    .count();
                assert_eq!(
                    tracker.counters().outstanding_publishes,
                    expected,
                    "after {step:?} in {order:?}"
                );
            }
            assert!(tracker.is_empty(), "stale entries after {order:?}");
        }
    }
}
