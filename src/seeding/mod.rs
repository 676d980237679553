//! Snapshot seeding.
//!
//! One pass walks the entity store in a fixed order and publishes every
//! (entity, aspect) pair as a retained QoS 2 message:
//!
//! 1. facilities: each equipment item count, then the facility metadata
//! 2. vehicles: location, then status
//! 3. accounts: accessible facilities, then accessible vehicles
//! 4. active dispatches, keyed by the assigned vehicle
//!
//! The walk only marks seeding complete; the session disconnects once the
//! last acknowledgment arrives, whichever of the two finishes first.

pub mod live;

pub use live::LivePublisher;

use crate::entities::{
    EntitySource, PayloadError, PayloadSerializer, Section, SnapshotRecord, SourceError,
};
use crate::session::{Session, SessionError};
use crate::transport::{Qos, Transport};
use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Every seeded publish is exactly-once and retained.
pub const SEED_QOS: Qos = Qos::ExactlyOnce;
pub const SEED_RETAIN: bool = true;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("entity source failed: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPublish {
    pub section: Section,
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub published: usize,
    pub by_section: BTreeMap<Section, usize>,
    /// The drain condition already held when the walk finished.
    pub drained_on_completion: bool,
}

pub struct Seeder<S, P> {
    source: S,
    payloads: P,
}

impl<S: EntitySource, P: PayloadSerializer> Seeder<S, P> {
    pub fn new(source: S, payloads: P) -> Self {
        Self { source, payloads }
    }

    /// The ordered publishes one pass would issue. Pure: depends only on
    /// the current contents of the source.
    pub fn plan(&self) -> Result<Vec<PlannedPublish>, SeedError> {
        let facilities = self.source.facilities()?;
        let vehicles = self.source.vehicles()?;
        let accounts = self.source.accounts()?;
        let dispatches = self.source.dispatches()?;

        let mut records = Vec::new();
        for facility in &facilities {
            for item in &facility.equipment {
                records.push(SnapshotRecord::EquipmentCount { facility, item });
            }
            records.push(SnapshotRecord::FacilityMetadata(facility));
        }
        for vehicle in &vehicles {
            records.push(SnapshotRecord::VehicleLocation(vehicle));
            records.push(SnapshotRecord::VehicleStatus(vehicle));
        }
        for account in &accounts {
            records.push(SnapshotRecord::AccountFacilities(account));
            records.push(SnapshotRecord::AccountVehicles(account));
        }
        // closed dispatches are cleared elsewhere, never republished
        for dispatch in dispatches.iter().filter(|dispatch| dispatch.active) {
            records.push(SnapshotRecord::Dispatch(dispatch));
        }

        records
            .iter()
            .map(|record| -> Result<PlannedPublish, SeedError> {
                Ok(PlannedPublish {
                    section: record.section(),
                    topic: record.topic(),
                    payload: self.payloads.encode(record)?,
                    qos: SEED_QOS,
                    retain: SEED_RETAIN,
                })
            })
            .collect()
    }

    /// Run one seeding pass over a connected session. The whole plan is built
    /// before the first publish so a source failure never leaves a half-issued
    /// pass behind.
    pub async fn seed<T: Transport>(&self, session: &Session<T>) -> Result<SeedReport, SeedError> {
        let plan = self.plan()?;
        let mut report = SeedReport::default();
        let mut section = None;

        for publish in plan {
            if section != Some(publish.section) {
                info!(section = %publish.section, "seeding");
                section = Some(publish.section);
            }
            let mid = session
                .publish(publish.topic.as_str(), publish.payload, publish.qos, publish.retain)
                .await?;
            debug!(topic = %publish.topic, mid = %mid, "seeded");
            report.published += 1;
            *report.by_section.entry(publish.section).or_default() += 1;
        }

        report.drained_on_completion = session.complete_seeding().await?;
        info!(published = report.published, "seeding pass issued");
        Ok(report)
    }
}
