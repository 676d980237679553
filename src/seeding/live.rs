//! Per-mutation publishing.
//!
//! The counterpart of a seeding pass for single entity changes: saving an
//! entity republishes its retained topics, deleting it clears them with an
//! empty retained payload. Live updates and seeding passes may write the
//! same topics concurrently; the broker keeps whichever arrives last.

use super::{SeedError, SEED_QOS, SEED_RETAIN};
use crate::entities::{
    Account, Dispatch, EquipmentItem, Facility, PayloadSerializer, SnapshotRecord, Vehicle,
};
use crate::session::Session;
use crate::topics;
use crate::transport::{OperationId, Transport};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

pub struct LivePublisher<T, P> {
    session: Arc<Session<T>>,
    payloads: P,
}

impl<T: Transport, P: PayloadSerializer> LivePublisher<T, P> {
    pub fn new(session: Arc<Session<T>>, payloads: P) -> Self {
        Self { session, payloads }
    }

    pub fn session(&self) -> &Arc<Session<T>> {
        &self.session
    }

    pub async fn publish_vehicle(&self, vehicle: &Vehicle) -> Result<Vec<OperationId>, SeedError> {
        Ok(vec![
            self.send(SnapshotRecord::VehicleLocation(vehicle)).await?,
            self.send(SnapshotRecord::VehicleStatus(vehicle)).await?,
        ])
    }

    pub async fn remove_vehicle(&self, vehicle_id: u64) -> Result<Vec<OperationId>, SeedError> {
        Ok(vec![
            self.clear(topics::vehicle_location(vehicle_id)).await?,
            self.clear(topics::vehicle_status(vehicle_id)).await?,
            self.clear(topics::vehicle_dispatch(vehicle_id)).await?,
        ])
    }

    /// An item changed: republish its count and the facility metadata.
    pub async fn publish_equipment(
        &self,
        facility: &Facility,
        item: &EquipmentItem,
    ) -> Result<Vec<OperationId>, SeedError> {
        Ok(vec![
            self.send(SnapshotRecord::EquipmentCount { facility, item })
                .await?,
            self.send(SnapshotRecord::FacilityMetadata(facility)).await?,
        ])
    }

    /// `facility` is the state after the item was removed.
    pub async fn remove_equipment(
        &self,
        facility: &Facility,
        name: &str,
    ) -> Result<Vec<OperationId>, SeedError> {
        Ok(vec![
            self.clear(topics::facility_equipment(facility.id, name))
                .await?,
            self.send(SnapshotRecord::FacilityMetadata(facility)).await?,
        ])
    }

    pub async fn publish_facility(&self, facility: &Facility) -> Result<Vec<OperationId>, SeedError> {
        Ok(vec![
            self.send(SnapshotRecord::FacilityMetadata(facility)).await?,
        ])
    }

    pub async fn remove_facility(&self, facility: &Facility) -> Result<Vec<OperationId>, SeedError> {
        let mut issued = Vec::with_capacity(facility.equipment.len() + 1);
        issued.push(self.clear(topics::facility_metadata(facility.id)).await?);
        for item in &facility.equipment {
            issued.push(
                self.clear(topics::facility_equipment(facility.id, &item.name))
                    .await?,
            );
        }
        Ok(issued)
    }

    pub async fn publish_account(&self, account: &Account) -> Result<Vec<OperationId>, SeedError> {
        Ok(vec![
            self.send(SnapshotRecord::AccountFacilities(account)).await?,
            self.send(SnapshotRecord::AccountVehicles(account)).await?,
        ])
    }

    /// Active dispatches are published; closing one clears the vehicle's
    /// retained dispatch topic.
    pub async fn publish_dispatch(&self, dispatch: &Dispatch) -> Result<Vec<OperationId>, SeedError> {
        let id = if dispatch.active {
            self.send(SnapshotRecord::Dispatch(dispatch)).await?
        } else {
            self.clear(topics::vehicle_dispatch(dispatch.vehicle_id))
                .await?
        };
        Ok(vec![id])
    }

    async fn send(&self, record: SnapshotRecord<'_>) -> Result<OperationId, SeedError> {
        let payload = self.payloads.encode(&record)?;
        let topic = record.topic();
        let mid = self
            .session
            .publish(topic.as_str(), payload, SEED_QOS, SEED_RETAIN)
            .await?;
        debug!(topic = %topic, mid = %mid, "live update published");
        Ok(mid)
    }

    async fn clear(&self, topic: String) -> Result<OperationId, SeedError> {
        let mid = self
            .session
            .publish(topic.as_str(), Bytes::new(), SEED_QOS, SEED_RETAIN)
            .await?;
        debug!(topic = %topic, mid = %mid, "retained topic cleared");
        Ok(mid)
    }
}
