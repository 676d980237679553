//! Watch command: subscribe through a tracked session and stream messages.

use super::{await_connected, shutdown_signal, spawn_pump, text_or_base64};
use crate::cli::args::{OutputFormat, WatchArgs};
use crate::core::config::Config;
use crate::session::{DisconnectKind, Session, SessionSignal};
use crate::transport::{MqttTransport, SUBACK_FAILURE};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tracing::warn;

#[derive(Serialize)]
struct MessageOutput<'a> {
    ts: String,
    topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_b64: Option<String>,
}

pub async fn run_watch(args: WatchArgs, mut config: Config) -> Result<()> {
    config.apply_overrides(&args.broker.overrides());
    config.validate()?;

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

    let qos = args.qos.to_qos();
    for topic in &args.topic {
        session
            .subscribe(topic.as_str(), qos)
            .await
            .with_context(|| format!("subscribe to topic '{topic}'"))?;
    }

    let mut pending = args.topic.len();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            sig = &mut shutdown => {
                eprintln!("received {}, shutting down...", sig?);
                break;
            }
            signal = signals.recv() => match signal {
                Some(Ok(SessionSignal::Subscribed { topic, granted, .. })) => {
                    pending = pending.saturating_sub(1);
                    if granted == SUBACK_FAILURE {
                        warn!(topic = %topic, "subscription refused");
                    }
                    if pending == 0 {
                        eprintln!(
                            "subscribed to {} topic(s): {}",
                            args.topic.len(),
                            args.topic.join(", ")
                        );
                    }
                }
                Some(Ok(SessionSignal::Message { topic, payload })) => {
                    output_message(args.format, &topic, &payload);
                }
                Some(Ok(SessionSignal::Disconnected(DisconnectKind::Unsolicited))) => {
                    bail!("connection lost");
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err).context("session failed"),
                None => bail!("event stream ended"),
            },
        }
    }

    if let Err(err) = session
        .shutdown(
            config.seeding.disconnect_timeout(),
            config.seeding.disconnect_poll(),
        )
        .await
    {
        warn!(error = %err, "disconnect did not complete");
        pump.abort();
        return Ok(());
    }
    let _ = pump.await;
    Ok(())
}

fn output_message(format: OutputFormat, topic: &str, payload: &[u8]) {
    match format {
        OutputFormat::Json => {
            let (payload, payload_b64) = text_or_base64(payload);
            let msg = MessageOutput {
                ts: Utc::now().to_rfc3339(),
                topic,
                payload,
                payload_b64,
            };
            if let Ok(json) = serde_json::to_string(&msg) {
                println!("{json}");
            }
        }
        OutputFormat::Raw => {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(payload);
            let _ = stdout.write_all(b"\n");
        }
    }
}
