use crate::session::state::SessionState;
use crate::transport::{OperationId, TransportError};
use std::fmt;
use std::time::Duration;

/// Which kind of request an operation id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Publish,
    Subscribe,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Publish => f.write_str("publish"),
            OperationKind::Subscribe => f.write_str("subscribe"),
        }
    }
}

/// Errors surfaced by the session layer.
///
/// Everything except [`SessionError::DisconnectTimeout`] is fatal to the
/// current connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("could not connect to broker (rc = {code})")]
    BrokerConnect { code: u8 },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unknown {kind} acknowledgment (mid = {operation_id})")]
    UnknownAcknowledgment {
        kind: OperationKind,
        operation_id: OperationId,
    },
    #[error("operation id {operation_id} issued twice while still pending")]
    DuplicateOperation { operation_id: OperationId },
    #[error("broker did not close the connection within {waited:?}")]
    DisconnectTimeout { waited: Duration },
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("session aborted: {reason}")]
    Aborted { reason: String },
}

impl SessionError {
    /// Whether the session must be torn down after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::DisconnectTimeout { .. })
    }
}
