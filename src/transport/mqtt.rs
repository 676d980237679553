//! `rumqttc`-backed transport.
//!
//! `rumqttc` does not hand packet ids back to the caller of `publish`; they
//! are assigned inside the event loop and surface as `Outgoing::Publish(pkid)`
//! events in request order. This adapter therefore numbers every request
//! itself and keeps a FIFO of issued-but-unwritten requests. The driver task
//! pops that FIFO as packets are written, maps packet ids to operation ids,
//! and turns PUBACK / PUBCOMP / SUBACK into [`TransportEvent`]s. QoS 0
//! publishes are reported done as soon as they are written, which can happen
//! before the issuing `publish` call has returned.

use super::tls::build_tls_config;
use super::{
    ConnectOptions, OperationId, Qos, Transport, TransportError, TransportEvent,
    RC_CONNECTION_LOST, RC_INVALID, RC_NO_CONNECTION, SUBACK_FAILURE,
};
use crate::topics::{is_valid_topic_filter, is_valid_topic_name};
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions,
    Outgoing, QoS, SubscribeReasonCode, TlsConfiguration,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

/// Maps rumqttc packet ids to operation ids for one connection.
#[derive(Debug, Default)]
struct Correlator {
    next_id: u64,
    unwritten_publishes: VecDeque<(OperationId, Qos)>,
    unwritten_subscribes: VecDeque<OperationId>,
    inflight_publishes: HashMap<u16, OperationId>,
    inflight_subscribes: HashMap<u16, OperationId>,
}

impl Correlator {
    fn allocate(&mut self) -> OperationId {
        self.next_id += 1;
        OperationId(self.next_id)
    }

    fn enqueue_publish(&mut self, qos: Qos) -> OperationId {
        let id = self.allocate();
        self.unwritten_publishes.push_back((id, qos));
        id
    }

    fn enqueue_subscribe(&mut self) -> OperationId {
        let id = self.allocate();
        self.unwritten_subscribes.push_back(id);
        id
    }

    /// The request was never accepted by the client; it is the newest entry.
    fn retract_publish(&mut self, id: OperationId) {
        if self.unwritten_publishes.back().map(|(last, _)| *last) == Some(id) {
            self.unwritten_publishes.pop_back();
        }
    }

    fn retract_subscribe(&mut self, id: OperationId) {
        if self.unwritten_subscribes.back() == Some(&id) {
            self.unwritten_subscribes.pop_back();
        }
    }

    fn publish_written(&mut self, pkid: u16) -> Option<TransportEvent> {
        let (id, qos) = self.unwritten_publishes.pop_front()?;
        if qos.is_acknowledged() {
            self.inflight_publishes.insert(pkid, id);
            None
        } else {
            Some(TransportEvent::PublishAck { operation_id: id })
        }
    }

    fn publish_completed(&mut self, pkid: u16) -> Option<TransportEvent> {
        self.inflight_publishes
            .remove(&pkid)
            .map(|operation_id| TransportEvent::PublishAck { operation_id })
    }

    fn subscribe_written(&mut self, pkid: u16) {
        if let Some(id) = self.unwritten_subscribes.pop_front() {
            self.inflight_subscribes.insert(pkid, id);
        }
    }

    fn subscribe_acked(&mut self, pkid: u16, granted: u8) -> Option<TransportEvent> {
        self.inflight_subscribes
            .remove(&pkid)
            .map(|operation_id| TransportEvent::SubscribeAck {
                operation_id,
                granted,
            })
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Link {
    client: AsyncClient,
    correlator: Arc<Mutex<Correlator>>,
    closing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

/// MQTT 3.1.1 transport over `rumqttc`.
pub struct MqttTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Mutex<Option<Link>>,
    /// Keeps correlator order identical to the client's request order.
    issue_order: tokio::sync::Mutex<()>,
}

impl MqttTransport {
    /// Create a transport and the receiver its events are delivered on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            events,
            link: Mutex::new(None),
            issue_order: tokio::sync::Mutex::new(()),
        };
        (transport, rx)
    }

    fn live_link(&self, operation: &'static str) -> Result<Link, TransportError> {
        match self.link.lock().as_ref() {
            Some(link) if !link.closed.load(Ordering::Acquire) => Ok(link.clone()),
            _ => Err(TransportError::new(operation, RC_NO_CONNECTION, "not connected")),
        }
    }
}

fn mqtt_options(options: &ConnectOptions) -> Result<MqttOptions, TransportError> {
    let mut mqtt = MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port);
    mqtt.set_keep_alive(options.keepalive);
    mqtt.set_clean_session(options.clean_session);
    if let Some(credentials) = &options.credentials {
        mqtt.set_credentials(credentials.username.clone(), credentials.password.clone());
    }
    if let Some(tls) = &options.tls {
        let config = build_tls_config(tls)
            .map_err(|err| TransportError::new("connect", RC_INVALID, format!("{err:#}")))?;
        mqtt.set_transport(rumqttc::Transport::tls_with_config(
            TlsConfiguration::Rustls(Arc::new(config)),
        ));
    }
    Ok(mqtt)
}

fn to_rumqttc(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn connack_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

fn granted_code(code: &SubscribeReasonCode) -> u8 {
    match code {
        SubscribeReasonCode::Success(qos) => *qos as u8,
        SubscribeReasonCode::Failure => SUBACK_FAILURE,
    }
}

impl Transport for MqttTransport {
    async fn connect(&self, options: &ConnectOptions) -> Result<(), TransportError> {
        if self.live_link("connect").is_ok() {
            return Err(TransportError::new("connect", RC_INVALID, "already connected"));
        }
        let mqtt = mqtt_options(options)?;
        let (client, eventloop) = AsyncClient::new(mqtt, options.request_capacity);
        let link = Link {
            client,
            correlator: Arc::new(Mutex::new(Correlator::default())),
            closing: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        *self.link.lock() = Some(link.clone());
        tokio::spawn(drive(eventloop, link, self.events.clone()));
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<OperationId, TransportError> {
        if !is_valid_topic_name(topic) {
            return Err(TransportError::new(
                "publish",
                RC_INVALID,
                format!("invalid topic name '{topic}'"),
            ));
        }
        let link = self.live_link("publish")?;
        let _order = self.issue_order.lock().await;
        let id = link.correlator.lock().enqueue_publish(qos);
        if let Err(err) = link
            .client
            .publish_bytes(topic, to_rumqttc(qos), retain, payload)
            .await
        {
            link.correlator.lock().retract_publish(id);
            return Err(TransportError::new("publish", RC_NO_CONNECTION, err.to_string()));
        }
        Ok(id)
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<OperationId, TransportError> {
        if !is_valid_topic_filter(topic) {
            return Err(TransportError::new(
                "subscribe",
                RC_INVALID,
                format!("invalid topic filter '{topic}'"),
            ));
        }
        let link = self.live_link("subscribe")?;
        let _order = self.issue_order.lock().await;
        let id = link.correlator.lock().enqueue_subscribe();
        if let Err(err) = link.client.subscribe(topic, to_rumqttc(qos)).await {
            link.correlator.lock().retract_subscribe(id);
            return Err(TransportError::new("subscribe", RC_NO_CONNECTION, err.to_string()));
        }
        Ok(id)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let link = self.live_link("disconnect")?;
        link.closing.store(true, Ordering::Release);
        link.client
            .disconnect()
            .await
            .map_err(|err| TransportError::new("disconnect", RC_NO_CONNECTION, err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Polls the event loop until the connection ends. Never reconnects: retry
/// policy belongs to whoever owns the session.
async fn drive(
    mut eventloop: EventLoop,
    link: Link,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut acknowledged_connect = false;
    let emit = |event: TransportEvent| {
        if events.send(event).is_err() {
            trace!("transport event receiver dropped");
        }
    };

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                let code = connack_code(ack.code);
                acknowledged_connect = code == 0;
                emit(TransportEvent::ConnectResult { code });
                if code != 0 {
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                if let Some(event) = link.correlator.lock().publish_completed(ack.pkid) {
                    emit(event);
                }
            }
            Ok(Event::Incoming(Incoming::PubComp(comp))) => {
                if let Some(event) = link.correlator.lock().publish_completed(comp.pkid) {
                    emit(event);
                }
            }
            Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                let granted = ack
                    .return_codes
                    .first()
                    .map(granted_code)
                    .unwrap_or(SUBACK_FAILURE);
                if let Some(event) = link.correlator.lock().subscribe_acked(ack.pkid, granted) {
                    emit(event);
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                emit(TransportEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                });
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                if let Some(event) = link.correlator.lock().publish_written(pkid) {
                    emit(event);
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                link.correlator.lock().subscribe_written(pkid);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect written");
                emit(TransportEvent::Disconnected { code: 0 });
                break;
            }
            Ok(event) => trace!(?event, "mqtt event"),
            Err(ConnectionError::ConnectionRefused(code)) => {
                emit(TransportEvent::ConnectResult {
                    code: connack_code(code),
                });
                break;
            }
            Err(err) => {
                if !acknowledged_connect {
                    warn!(error = %err, "broker unreachable");
                    emit(TransportEvent::ConnectResult {
                        code: RC_CONNECTION_LOST,
                    });
                } else if link.closing.load(Ordering::Acquire) {
                    emit(TransportEvent::Disconnected { code: 0 });
                } else {
                    warn!(error = %err, "connection lost");
                    emit(TransportEvent::Disconnected {
                        code: RC_CONNECTION_LOST,
                    });
                }
                break;
            }
        }
    }

    link.closed.store(true, Ordering::Release);
    *link.correlator.lock() = Correlator::default();
}
