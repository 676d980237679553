//! CLI command implementations.

mod plan;
mod seed;
mod watch;

pub use plan::run_plan;
pub use seed::run_seed;
pub use watch::run_watch;

use crate::session::{Session, SessionError, SessionSignal};
use crate::transport::{Transport, TransportEvent};
use anyhow::{Context, Result};
use base64::Engine;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

type SignalResult = Result<SessionSignal, SessionError>;

/// Feed transport events into the session until the connection closes,
/// forwarding what each event meant to the command's own task.
async fn pump_events<T: Transport>(
    session: Arc<Session<T>>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    signals: mpsc::UnboundedSender<SignalResult>,
) {
    while let Some(event) = events.recv().await {
        let outcome = session.handle_event(event).await;
        let closed = matches!(outcome, Ok(SessionSignal::Disconnected(_)));
        if signals.send(outcome).is_err() || closed {
            break;
        }
    }
}

/// Spawn the event pump and return the receiving end of its signals.
fn spawn_pump<T: Transport + 'static>(
    session: &Arc<Session<T>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
) -> (
    tokio::task::JoinHandle<()>,
    mpsc::UnboundedReceiver<SignalResult>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(pump_events(Arc::clone(session), events, tx));
    (handle, rx)
}

/// Wait for the broker's verdict on the connect attempt.
async fn await_connected(signals: &mut mpsc::UnboundedReceiver<SignalResult>) -> Result<()> {
    loop {
        match signals.recv().await {
            Some(Ok(SessionSignal::Connected)) => return Ok(()),
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err).context("broker refused the connection"),
            None => anyhow::bail!("connection closed before the broker answered"),
        }
    }
}

async fn shutdown_signal() -> Result<&'static str> {
    let mut sigint = signal(SignalKind::interrupt()).context("register SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("register SIGTERM handler")?;

    Ok(tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    })
}

/// UTF-8 payloads as text, anything else base64-encoded.
fn text_or_base64(payload: &[u8]) -> (Option<&str>, Option<String>) {
    match std::str::from_utf8(payload) {
        Ok(s) => (Some(s), None),
        Err(_) => (
            None,
            Some(base64::engine::general_purpose::STANDARD.encode(payload)),
        ),
    }
}
