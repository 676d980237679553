//! Scripted in-process transport.
//!
//! Behaves like a broker that accepts everything: QoS 0 publishes are
//! reported done the moment they are sent (before `publish` returns, the
//! same way the MQTT adapter reports them), everything else waits until the
//! owner calls [`MemoryTransport::acknowledge_all`] or
//! [`MemoryTransport::acknowledge`]. Useful wherever acknowledgment timing
//! has to be deterministic.

use super::{
    ConnectOptions, OperationId, Qos, Transport, TransportError, TransportEvent, RC_NO_CONNECTION,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// A publish as the broker received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPublish {
    pub operation_id: OperationId,
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

#[derive(Debug, Clone, Copy)]
enum Outstanding {
    Publish(OperationId),
    Subscribe(OperationId, Qos),
}

impl Outstanding {
    fn id(&self) -> OperationId {
        match self {
            Outstanding::Publish(id) | Outstanding::Subscribe(id, _) => *id,
        }
    }

    fn event(self) -> TransportEvent {
        match self {
            Outstanding::Publish(operation_id) => TransportEvent::PublishAck { operation_id },
            Outstanding::Subscribe(operation_id, qos) => TransportEvent::SubscribeAck {
                operation_id,
                granted: qos.as_u8(),
            },
        }
    }
}

pub struct MemoryTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    next_id: AtomicU64,
    connack: AtomicU8,
    reject_code: AtomicU8,
    connected: AtomicBool,
    disconnects: AtomicUsize,
    sent: Mutex<Vec<SentPublish>>,
    outstanding: Mutex<VecDeque<Outstanding>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            events,
            next_id: AtomicU64::new(0),
            connack: AtomicU8::new(0),
            reject_code: AtomicU8::new(0),
            connected: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            outstanding: Mutex::new(VecDeque::new()),
        };
        (transport, rx)
    }

    /// Answer the next connect attempt with `code`.
    pub fn refuse_connect(&self, code: u8) {
        self.connack.store(code, Ordering::SeqCst);
    }

    /// Reject every later publish and subscribe at send time with `code`.
    pub fn reject_requests(&self, code: u8) {
        self.reject_code.store(code, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<SentPublish> {
        self.sent.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    /// Acknowledge one outstanding request. Returns false if `id` is not
    /// outstanding.
    pub fn acknowledge(&self, id: OperationId) -> bool {
        let found = {
            let mut outstanding = self.outstanding.lock();
            outstanding
                .iter()
                .position(|entry| entry.id() == id)
                .and_then(|index| outstanding.remove(index))
        };
        match found {
            Some(entry) => {
                self.emit(entry.event());
                true
            }
            None => false,
        }
    }

    /// Acknowledge every outstanding request in issue order.
    pub fn acknowledge_all(&self) -> usize {
        let drained: Vec<Outstanding> = self.outstanding.lock().drain(..).collect();
        let count = drained.len();
        for entry in drained {
            self.emit(entry.event());
        }
        count
    }

    /// Deliver an arbitrary event, e.g. a duplicate ack or a network drop.
    pub fn inject(&self, event: TransportEvent) {
        if let TransportEvent::Disconnected { .. } = event {
            self.connected.store(false, Ordering::SeqCst);
        }
        self.emit(event);
    }

    fn emit(&self, event: TransportEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.events.send(event);
    }

    fn admit(&self, operation: &'static str) -> Result<OperationId, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::new(operation, RC_NO_CONNECTION, "not connected"));
        }
        let code = self.reject_code.load(Ordering::SeqCst);
        if code != 0 {
            return Err(TransportError::new(operation, code, "rejected by script"));
        }
        Ok(OperationId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

impl Transport for MemoryTransport {
    async fn connect(&self, _options: &ConnectOptions) -> Result<(), TransportError> {
        let code = self.connack.load(Ordering::SeqCst);
        self.connected.store(code == 0, Ordering::SeqCst);
        self.next_id.store(0, Ordering::SeqCst);
        self.emit(TransportEvent::ConnectResult { code });
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<OperationId, TransportError> {
        let operation_id = self.admit("publish")?;
        self.sent.lock().push(SentPublish {
            operation_id,
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        if qos.is_acknowledged() {
            self.outstanding
                .lock()
                .push_back(Outstanding::Publish(operation_id));
        } else {
            self.emit(TransportEvent::PublishAck { operation_id });
            tokio::task::yield_now().await;
        }
        Ok(operation_id)
    }

    async fn subscribe(&self, _topic: &str, qos: Qos) -> Result<OperationId, TransportError> {
        let operation_id = self.admit("subscribe")?;
        self.outstanding
            .lock()
            .push_back(Outstanding::Subscribe(operation_id, qos));
        Ok(operation_id)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(TransportEvent::Disconnected { code: 0 });
        }
        Ok(())
    }
}
