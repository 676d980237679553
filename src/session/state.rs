//! Connection lifecycle.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//!                     |             |
//!                     +-------------+--> Disconnected (refused / lost)
//! ```

use crate::session::error::SessionError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// How a transport-level disconnect relates to the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// We asked for it.
    Requested,
    /// Network loss or broker-initiated close while connected.
    Unsolicited,
    /// Already disconnected; nothing changed.
    Ignored,
}

/// The single authoritative view of whether the session is connected.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: SessionState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::InvalidState {
                operation: "connect",
                state: self.state,
            });
        }
        self.state = SessionState::Connecting;
        Ok(())
    }

    /// Connect attempt could not be started at all.
    pub fn abort_connect(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Disconnected;
        }
    }

    /// Apply a CONNACK result code.
    ///
    /// Returns `Ok(true)` when the session became connected and `Ok(false)` for
    /// a result that arrived outside of a connect attempt. A nonzero code
    /// while connecting is a [`SessionError::BrokerConnect`].
    pub fn on_connect_result(&mut self, code: u8) -> Result<bool, SessionError> {
        if self.state != SessionState::Connecting {
            return Ok(false);
        }
        if code != 0 {
            self.state = SessionState::Disconnected;
            return Err(SessionError::BrokerConnect { code });
        }
        self.state = SessionState::Connected;
        Ok(true)
    }

    /// Move to `Disconnecting`. Returns `false` if not connected.
    pub fn begin_disconnect(&mut self) -> bool {
        if self.state != SessionState::Connected {
            return false;
        }
        self.state = SessionState::Disconnecting;
        true
    }

    pub fn on_disconnect(&mut self) -> DisconnectKind {
        let kind = match self.state {
            SessionState::Disconnecting => DisconnectKind::Requested,
            SessionState::Connected | SessionState::Connecting => DisconnectKind::Unsolicited,
            SessionState::Disconnected => DisconnectKind::Ignored,
        };
        self.state = SessionState::Disconnected;
        kind
    }
}
