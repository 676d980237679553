//! Broker session: one connection, its in-flight operations and the drain
//! condition that ends it.
//!
//! A [`Session`] is shared (behind an `Arc`) between the issuing side (the
//! seeder or a live-update publisher) and the event side, which feeds every
//! [`TransportEvent`] into [`Session::handle_event`]. Both sides go through
//! the same [`OperationTracker`], so acknowledgments that overtake their
//! issuer are reconciled rather than lost.

pub mod drain;
pub mod error;
pub mod state;
pub mod tracker;

pub use drain::{DrainCoordinator, SeedCounters};
pub use error::{OperationKind, SessionError};
pub use state::{DisconnectKind, SessionState, StateMachine};
pub use tracker::{
    Intent, IssueTicket, OperationTracker, PublishAckOutcome, PublishIntent, Recorded,
    SubscribeIntent,
};

use crate::transport::{
    ConnectOptions, OperationId, Qos, Transport, TransportEvent, SUBACK_FAILURE,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the event side should react to after an event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Connected,
    Subscribed {
        operation_id: OperationId,
        topic: String,
        granted: u8,
    },
    Message {
        topic: String,
        payload: Bytes,
    },
    /// The drain condition held and the disconnect was requested.
    Draining,
    Disconnected(DisconnectKind),
    Nothing,
}

pub struct Session<T> {
    transport: T,
    tracker: OperationTracker,
    drain: DrainCoordinator,
    machine: Mutex<StateMachine>,
    fatal: Mutex<Option<SessionError>>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            tracker: OperationTracker::new(),
            drain: DrainCoordinator::new(),
            machine: Mutex::new(StateMachine::new()),
            fatal: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    pub fn state(&self) -> SessionState {
        self.machine.lock().state()
    }

    pub fn is_connected(&self) -> bool {
        self.machine.lock().is_connected()
    }

    pub fn counters(&self) -> SeedCounters {
        self.tracker.counters()
    }

    /// Operations still waiting for an acknowledgment, in id order.
    pub fn pending(&self) -> Vec<(OperationId, Intent)> {
        self.tracker.pending()
    }

    /// The fatal error that tore this session down, if any.
    pub fn failure(&self) -> Option<SessionError> {
        self.fatal.lock().clone()
    }

    // -----------------------------------------------------------------------
    // Issuing side
    // -----------------------------------------------------------------------

    /// Start connecting. The outcome arrives later as a
    /// [`TransportEvent::ConnectResult`].
    pub async fn connect(&self, options: &ConnectOptions) -> Result<(), SessionError> {
        self.machine.lock().begin_connect()?;
        if let Err(err) = self.transport.connect(options).await {
            self.machine.lock().abort_connect();
            return Err(err.into());
        }
        info!(
            host = %options.host,
            port = options.port,
            client_id = %options.client_id,
            "connecting to broker"
        );
        Ok(())
    }

    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<OperationId, SessionError> {
        let topic = topic.into();
        self.ensure_connected("publish")?;

        let ticket = self.tracker.begin_issue(OperationKind::Publish, qos);
        let operation_id = match self
            .transport
            .publish(&topic, payload.clone(), qos, retain)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                self.tracker.abandon(ticket);
                return Err(self.abort(err.into()).await);
            }
        };
        debug!(topic = %topic, mid = %operation_id, qos = %qos, retain, bytes = payload.len(), "publish issued");

        let intent = Intent::Publish(PublishIntent {
            topic,
            payload,
            qos,
            retain,
        });
        match self.tracker.record_issued(ticket, operation_id, intent) {
            Ok(Recorded::Pending) => {}
            Ok(Recorded::AlreadySatisfied(counters)) => {
                debug!(mid = %operation_id, "publish acknowledged before it was recorded");
                self.disconnect_if_drained(counters).await?;
            }
            Ok(Recorded::Superseded) => return Err(superseded("publish", operation_id)),
            Err(err) => return Err(self.abort(err).await),
        }
        Ok(operation_id)
    }

    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
        qos: Qos,
    ) -> Result<OperationId, SessionError> {
        let topic = topic.into();
        self.ensure_connected("subscribe")?;

        let ticket = self.tracker.begin_issue(OperationKind::Subscribe, qos);
        let operation_id = match self.transport.subscribe(&topic, qos).await {
            Ok(id) => id,
            Err(err) => {
                self.tracker.abandon(ticket);
                return Err(self.abort(err.into()).await);
            }
        };
        debug!(topic = %topic, mid = %operation_id, qos = %qos, "subscribe issued");

        let intent = Intent::Subscribe(SubscribeIntent { topic, qos });
        match self.tracker.record_issued(ticket, operation_id, intent) {
            Ok(Recorded::Superseded) => Err(superseded("subscribe", operation_id)),
            Ok(_) => Ok(operation_id),
            Err(err) => Err(self.abort(err).await),
        }
    }

    /// The seeding walk issued its last publish.
    pub async fn complete_seeding(&self) -> Result<bool, SessionError> {
        self.ensure_alive()?;
        let counters = self.tracker.mark_seeding_complete();
        info!(
            outstanding = counters.outstanding_publishes,
            "seeding walk complete"
        );
        self.disconnect_if_drained(counters).await
    }

    /// Disconnect if nothing is outstanding and seeding is complete. Safe to
    /// call any number of times; the disconnect is requested at most once.
    pub async fn maybe_disconnect(&self) -> Result<bool, SessionError> {
        let counters = self.tracker.counters();
        self.disconnect_if_drained(counters).await
    }

    async fn disconnect_if_drained(&self, counters: SeedCounters) -> Result<bool, SessionError> {
        if !self.drain.should_disconnect(counters) {
            return Ok(false);
        }
        info!("every publish acknowledged; disconnecting");
        self.request_disconnect().await?;
        Ok(true)
    }

    /// Ask the transport to close. A no-op unless connected.
    pub async fn request_disconnect(&self) -> Result<(), SessionError> {
        if !self.machine.lock().begin_disconnect() {
            return Ok(());
        }
        self.transport.disconnect().await?;
        Ok(())
    }

    /// Poll until the connection reports closed, up to `max_wait`.
    pub async fn wait_disconnected(
        &self,
        max_wait: Duration,
        poll: Duration,
    ) -> Result<(), SessionError> {
        let started = Instant::now();
        loop {
            if self.state() == SessionState::Disconnected {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= max_wait {
                for (id, intent) in self.pending() {
                    warn!(mid = %id, kind = %intent.kind(), topic = intent.topic(), "still unacknowledged");
                }
                return Err(SessionError::DisconnectTimeout { waited });
            }
            tokio::time::sleep(poll.min(max_wait - waited)).await;
        }
    }

    /// Request a disconnect and wait for it to complete.
    pub async fn shutdown(&self, max_wait: Duration, poll: Duration) -> Result<(), SessionError> {
        self.request_disconnect().await?;
        self.wait_disconnected(max_wait, poll).await
    }

    fn ensure_alive(&self) -> Result<(), SessionError> {
        match self.fatal.lock().as_ref() {
            Some(err) => Err(SessionError::Aborted {
                reason: err.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn ensure_connected(&self, operation: &'static str) -> Result<(), SessionError> {
        self.ensure_alive()?;
        let state = self.state();
        if state != SessionState::Connected {
            return Err(SessionError::InvalidState { operation, state });
        }
        Ok(())
    }

    /// Record a fatal error and tear the connection down.
    async fn abort(&self, err: SessionError) -> SessionError {
        warn!(error = %err, "aborting session");
        self.fatal.lock().get_or_insert_with(|| err.clone());
        if let Err(close_err) = self.request_disconnect().await {
            warn!(error = %close_err, "disconnect after abort failed");
        }
        err
    }

    // -----------------------------------------------------------------------
    // Event side
    // -----------------------------------------------------------------------

    /// Apply one transport event. Errors are fatal and also recorded, so the
    /// issuing side observes them as [`SessionError::Aborted`].
    pub async fn handle_event(&self, event: TransportEvent) -> Result<SessionSignal, SessionError> {
        match event {
            TransportEvent::ConnectResult { code } => {
                let connected = self.machine.lock().on_connect_result(code);
                match connected {
                    Ok(true) => {
                        info!("connected to broker");
                        Ok(SessionSignal::Connected)
                    }
                    Ok(false) => {
                        debug!(code, "ignoring connect result outside of a connect attempt");
                        Ok(SessionSignal::Nothing)
                    }
                    Err(err) => {
                        self.fatal.lock().get_or_insert_with(|| err.clone());
                        Err(err)
                    }
                }
            }
            TransportEvent::PublishAck { operation_id } => {
                match self.tracker.on_publish_ack(operation_id) {
                    Ok(PublishAckOutcome::Completed { intent, counters }) => {
                        debug!(mid = %operation_id, topic = %intent.topic, outstanding = counters.outstanding_publishes, "publish acknowledged");
                        if self.disconnect_if_drained(counters).await? {
                            return Ok(SessionSignal::Draining);
                        }
                        Ok(SessionSignal::Nothing)
                    }
                    Ok(PublishAckOutcome::Forgiven) => {
                        debug!(mid = %operation_id, "acknowledgment arrived before its publish was recorded");
                        Ok(SessionSignal::Nothing)
                    }
                    Err(err) => Err(self.abort(err).await),
                }
            }
            TransportEvent::SubscribeAck {
                operation_id,
                granted,
            } => match self.tracker.on_subscribe_ack(operation_id) {
                Ok(intent) => {
                    if granted == SUBACK_FAILURE {
                        warn!(topic = %intent.topic, "broker refused subscription");
                    } else if granted < intent.qos.as_u8() {
                        warn!(topic = %intent.topic, requested = %intent.qos, granted, "subscription downgraded");
                    } else {
                        debug!(mid = %operation_id, topic = %intent.topic, granted, "subscribed");
                    }
                    Ok(SessionSignal::Subscribed {
                        operation_id,
                        topic: intent.topic,
                        granted,
                    })
                }
                Err(err) => Err(self.abort(err).await),
            },
            TransportEvent::Disconnected { code } => {
                let kind = self.machine.lock().on_disconnect();
                match kind {
                    DisconnectKind::Unsolicited => {
                        warn!(code, pending = self.tracker.len(), "connection lost; discarding in-flight accounting");
                        self.tracker.reset();
                        self.drain.reset();
                    }
                    DisconnectKind::Requested => info!(code, "disconnected"),
                    DisconnectKind::Ignored => {}
                }
                Ok(SessionSignal::Disconnected(kind))
            }
            TransportEvent::Message { topic, payload } => {
                Ok(SessionSignal::Message { topic, payload })
            }
        }
    }
}

/// The connection dropped while the request was with the transport. The
/// ledger has already been reset, so nothing is left to abort.
fn superseded(operation: &'static str, operation_id: OperationId) -> SessionError {
    warn!(mid = %operation_id, operation, "connection lost while the request was in flight");
    SessionError::Aborted {
        reason: format!("connection lost while {operation} {operation_id} was in flight"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
