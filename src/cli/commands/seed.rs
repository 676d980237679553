//! Seed command: one full seeding pass, then drain and disconnect.

use super::{await_connected, shutdown_signal, spawn_pump, SignalResult};
use crate::cli::args::SeedArgs;
use crate::core::config::{Config, SeedingConfig};
use crate::entities::{JsonPayloads, SnapshotFile};
use crate::seeding::{SeedReport, Seeder};
use crate::session::{DisconnectKind, Session, SessionError, SessionSignal};
use crate::transport::{MqttTransport, Transport};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn run_seed(args: SeedArgs, mut config: Config) -> Result<()> {
    config.apply_overrides(&args.broker.overrides());
    config.validate()?;

    let snapshot = SnapshotFile::load(&args.snapshot)
        .with_context(|| format!("load snapshot {}", args.snapshot.display()))?;
    let seeder = Seeder::new(snapshot, JsonPayloads);

    let options = config.connect_options();
    let (transport, events) = MqttTransport::new();
    let session = Arc::new(Session::new(transport));
    let (pump, mut signals) = spawn_pump(&session, events);

    session
        .connect(&options)
        .await
        .with_context(|| format!("connect to {}:{}", options.host, options.port))?;
    await_connected(&mut signals).await?;
    eprintln!("connected to {}:{}", options.host, options.port);

    // no cancellation mid-walk: once started, the pass runs to the end
    let report = match seeder.seed(&session).await {
        Ok(report) => report,
        Err(err) => {
            if let Err(close_err) = settle_disconnect(&session, &config.seeding).await {
                warn!(error = %close_err, "closing after a failed pass");
            }
            pump.abort();
            return Err(err).context("seeding pass failed");
        }
    };

    if !report.drained_on_completion {
        await_drain(&session, &mut signals).await?;
    }

    let closed = settle_disconnect(&session, &config.seeding).await;
    if matches!(closed, Ok(true)) {
        let _ = pump.await;
    } else {
        pump.abort();
    }
    closed?;

    print_summary(&report);
    Ok(())
}

/// Wait for the connection to close. Returns `false` when the broker kept it
/// open past the timeout; the caller drops it by stopping the event pump.
async fn settle_disconnect<T: Transport>(
    session: &Session<T>,
    seeding: &SeedingConfig,
) -> Result<bool, SessionError> {
    match session
        .wait_disconnected(seeding.disconnect_timeout(), seeding.disconnect_poll())
        .await
    {
        Ok(()) => Ok(true),
        Err(SessionError::DisconnectTimeout { waited }) => {
            warn!(?waited, "broker did not close the connection; dropping it");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Wait until the last acknowledgment triggers the disconnect.
async fn await_drain<T: Transport>(
    session: &Session<T>,
    signals: &mut mpsc::UnboundedReceiver<SignalResult>,
) -> Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            sig = &mut shutdown => {
                let sig = sig?;
                let outstanding = session.counters().outstanding_publishes;
                warn!(outstanding, "received {sig} while draining");
                session.request_disconnect().await?;
                bail!("interrupted by {sig} with {outstanding} publish(es) unacknowledged");
            }
            signal = signals.recv() => match signal {
                Some(Ok(SessionSignal::Draining)) => return Ok(()),
                Some(Ok(SessionSignal::Disconnected(DisconnectKind::Unsolicited))) => {
                    bail!("connection lost before every publish was acknowledged");
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err).context("acknowledgment accounting failed"),
                None => bail!("event stream ended while draining"),
            },
        }
    }
}

fn print_summary(report: &SeedReport) {
    let sections: Vec<String> = report
        .by_section
        .iter()
        .map(|(section, count)| format!("{section}: {count}"))
        .collect();
    info!(published = report.published, "seeding complete");
    if sections.is_empty() {
        println!("seeded {} retained message(s)", report.published);
    } else {
        println!(
            "seeded {} retained message(s) ({})",
            report.published,
            sections.join(", ")
        );
    }
}
