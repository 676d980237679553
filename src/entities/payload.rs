use super::{EquipmentKind, GeoPoint, SnapshotRecord};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to encode payload for {topic}: {source}")]
pub struct PayloadError {
    pub topic: String,
    #[source]
    pub source: serde_json::Error,
}

/// Entity aspect to canonical wire bytes. Must be deterministic: the same
/// record always encodes to the same payload.
pub trait PayloadSerializer {
    fn encode(&self, record: &SnapshotRecord<'_>) -> Result<Bytes, PayloadError>;
}

/// The canonical encoding.
///
/// * equipment count: decimal quantity text
/// * facility metadata: JSON array of `{name, kind, toggleable}`
/// * vehicle location: JSON `{location, orientation, timestamp}`
/// * vehicle status: bare status code
/// * account lists: JSON arrays of ids
/// * dispatch: the full record as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloads;

#[derive(Serialize)]
struct EquipmentMetadata<'a> {
    name: &'a str,
    kind: EquipmentKind,
    toggleable: bool,
}

#[derive(Serialize)]
struct LocationPayload {
    location: Option<GeoPoint>,
    orientation: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
}

impl PayloadSerializer for JsonPayloads {
    fn encode(&self, record: &SnapshotRecord<'_>) -> Result<Bytes, PayloadError> {
        let json = match *record {
            SnapshotRecord::EquipmentCount { item, .. } => {
                return Ok(Bytes::from(item.quantity.to_string()));
            }
            SnapshotRecord::VehicleStatus(vehicle) => {
                return Ok(Bytes::from_static(vehicle.status.code().as_bytes()));
            }
            SnapshotRecord::FacilityMetadata(facility) => {
                let items: Vec<EquipmentMetadata<'_>> = facility
                    .equipment
                    .iter()
                    .map(|item| EquipmentMetadata {
                        name: &item.name,
                        kind: item.kind,
                        toggleable: item.toggleable,
                    })
                    .collect();
                serde_json::to_vec(&items)
            }
            SnapshotRecord::VehicleLocation(vehicle) => serde_json::to_vec(&LocationPayload {
                location: vehicle.location,
                orientation: vehicle.orientation,
                timestamp: vehicle.location_timestamp,
            }),
            SnapshotRecord::AccountFacilities(account) => serde_json::to_vec(&account.facilities),
            SnapshotRecord::AccountVehicles(account) => serde_json::to_vec(&account.vehicles),
            SnapshotRecord::Dispatch(dispatch) => serde_json::to_vec(dispatch),
        };
        json.map(Bytes::from).map_err(|source| PayloadError {
            topic: record.topic(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixtures::*;

    fn encode(record: SnapshotRecord<'_>) -> String {
        let bytes = JsonPayloads.encode(&record).unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_equipment_count_is_plain_text() {
        let facility = facility();
        let payload = encode(SnapshotRecord::EquipmentCount {
            facility: &facility,
            item: &facility.equipment[0],
        });
        assert_eq!(payload, "12");
    }

    #[test]
    fn test_metadata_lists_every_item() {
        let facility = facility();
        let payload = encode(SnapshotRecord::FacilityMetadata(&facility));
        assert_eq!(
            payload,
            r#"[{"name":"beds","kind":"I","toggleable":false},{"name":"x-ray","kind":"B","toggleable":true}]"#
        );
    }

    #[test]
    fn test_location_carries_orientation_and_timestamp() {
        let vehicle = vehicle();
        let value: serde_json::Value =
            serde_json::from_str(&encode(SnapshotRecord::VehicleLocation(&vehicle))).unwrap();
        assert_eq!(value["location"]["latitude"], 32.5);
        assert_eq!(value["orientation"], 90.0);
        assert_eq!(value["timestamp"], "2024-01-02T03:04:05Z");
    }

    #[test]
    fn test_status_is_bare_code() {
        let vehicle = vehicle();
        assert_eq!(encode(SnapshotRecord::VehicleStatus(&vehicle)), "AV");
    }

    #[test]
    fn test_account_lists_are_id_arrays() {
        let account = account();
        assert_eq!(encode(SnapshotRecord::AccountFacilities(&account)), "[4]");
        assert_eq!(encode(SnapshotRecord::AccountVehicles(&account)), "[7]");
    }

    #[test]
    fn test_dispatch_encodes_whole_record() {
        let dispatch = dispatch(true);
        let value: serde_json::Value =
            serde_json::from_str(&encode(SnapshotRecord::Dispatch(&dispatch))).unwrap();
        assert_eq!(value["vehicle_id"], 7);
        assert_eq!(value["priority"], "B");
        assert_eq!(value["active"], true);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let facility = facility();
        let record = SnapshotRecord::FacilityMetadata(&facility);
        assert_eq!(
            JsonPayloads.encode(&record).unwrap(),
            JsonPayloads.encode(&record).unwrap()
        );
    }
}
