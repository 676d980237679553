//! Plan command: print a seeding pass without connecting.

use super::text_or_base64;
use crate::cli::args::{OutputFormat, PlanArgs};
use crate::entities::{JsonPayloads, Section, SnapshotFile};
use crate::seeding::{PlannedPublish, Seeder};
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PlanLine<'a> {
    seq: usize,
    section: Section,
    topic: &'a str,
    qos: u8,
    retain: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_b64: Option<String>,
}

pub fn run_plan(args: PlanArgs) -> Result<()> {
    let snapshot = SnapshotFile::load(&args.snapshot)
        .with_context(|| format!("load snapshot {}", args.snapshot.display()))?;
    let plan = Seeder::new(snapshot, JsonPayloads)
        .plan()
        .context("build seeding plan")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (seq, publish) in plan.iter().enumerate() {
        write_line(&mut out, args.format, seq, publish)?;
    }
    out.flush()?;
    Ok(())
}

fn write_line(
    out: &mut impl Write,
    format: OutputFormat,
    seq: usize,
    publish: &PlannedPublish,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let (payload, payload_b64) = text_or_base64(&publish.payload);
            let line = PlanLine {
                seq,
                section: publish.section,
                topic: &publish.topic,
                qos: publish.qos.as_u8(),
                retain: publish.retain,
                payload,
                payload_b64,
            };
            serde_json::to_writer(&mut *out, &line)?;
            writeln!(out)?;
        }
        OutputFormat::Raw => {
            write!(out, "{} ", publish.topic)?;
            out.write_all(&publish.payload)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Qos;
    use bytes::Bytes;

    fn planned() -> PlannedPublish {
        PlannedPublish {
            section: Section::Vehicles,
            topic: "vehicle/7/status".into(),
            payload: Bytes::from_static(b"AV"),
            qos: Qos::ExactlyOnce,
            retain: true,
        }
    }

    #[test]
    fn test_json_lines_carry_delivery_flags() {
        let mut buf = Vec::new();
        write_line(&mut buf, OutputFormat::Json, 3, &planned()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["seq"], 3);
        assert_eq!(value["section"], "vehicles");
        assert_eq!(value["qos"], 2);
        assert_eq!(value["retain"], true);
        assert_eq!(value["payload"], "AV");
    }

    #[test]
    fn test_raw_lines_are_topic_then_payload() {
        let mut buf = Vec::new();
        write_line(&mut buf, OutputFormat::Raw, 0, &planned()).unwrap();
        assert_eq!(buf, b"vehicle/7/status AV\n");
    }
}
