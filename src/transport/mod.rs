//! Broker transport boundary.
//!
//! The session layer only needs a handful of capabilities from the wire:
//! connect, publish, subscribe, disconnect, and an asynchronous stream of
//! [`TransportEvent`]s reporting connect results, acknowledgments, inbound
//! messages and disconnects. [`MqttTransport`] provides them on top of
//! `rumqttc`; tests drive the session with scripted transports instead.

mod mqtt;
pub mod memory;
pub mod tls;

pub use memory::MemoryTransport;
pub use mqtt::MqttTransport;

use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

/// Connection refused or lost before the broker answered the CONNECT.
pub const RC_CONNECTION_LOST: u8 = 7;
/// The request could not be queued because no connection is open.
pub const RC_NO_CONNECTION: u8 = 4;
/// The request was malformed (for example a wildcard in a publish topic).
pub const RC_INVALID: u8 = 3;
/// Subscribe return code signalling that the broker refused the filter.
pub const SUBACK_FAILURE: u8 = 0x80;

// ---------------------------------------------------------------------------
// Identifiers and QoS
// ---------------------------------------------------------------------------

/// Transport-assigned correlation token for one publish or subscribe.
///
/// Unique only while the connection that issued it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Qos {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// QoS 0 publishes carry no broker acknowledgment.
    pub fn is_acknowledged(self) -> bool {
        self != Qos::AtMostOnce
    }
}

impl TryFrom<u8> for Qos {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(other),
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ---------------------------------------------------------------------------
// Connect options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// PEM material for a TLS connection to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub ca: PathBuf,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
    pub client_id: String,
    pub clean_session: bool,
    pub credentials: Option<Credentials>,
    pub tls: Option<TlsSettings>,
    /// Depth of the request queue between issuers and the network task.
    pub request_capacity: usize,
}

// ---------------------------------------------------------------------------
// Events and errors
// ---------------------------------------------------------------------------

/// Asynchronous notifications delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// CONNACK (or a failure to ever receive one). Zero means accepted.
    ConnectResult { code: u8 },
    /// The broker has taken responsibility for a publish. For QoS 0 this is
    /// reported once the packet is written.
    PublishAck { operation_id: OperationId },
    /// SUBACK; `granted` is the granted QoS or [`SUBACK_FAILURE`].
    SubscribeAck { operation_id: OperationId, granted: u8 },
    /// The connection closed. Zero means the close was requested locally.
    Disconnected { code: u8 },
    Message { topic: String, payload: Bytes },
}

/// A publish/subscribe/connect call rejected at send time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} rejected by transport (rc = {code}): {detail}")]
pub struct TransportError {
    pub operation: &'static str,
    pub code: u8,
    pub detail: String,
}

impl TransportError {
    pub fn new(operation: &'static str, code: u8, detail: impl Into<String>) -> Self {
        Self {
            operation,
            code,
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Capabilities the session needs from a broker connection.
///
/// `publish` and `subscribe` return as soon as the request is accepted for
/// sending. The matching acknowledgment is reported later as a
/// [`TransportEvent`], possibly before the returned future has been polled to
/// completion by the issuer.
pub trait Transport: Send + Sync {
    fn connect(
        &self,
        options: &ConnectOptions,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> impl Future<Output = Result<OperationId, TransportError>> + Send;

    fn subscribe(
        &self,
        topic: &str,
        qos: Qos,
    ) -> impl Future<Output = Result<OperationId, TransportError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
