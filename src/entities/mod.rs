//! Entity model consumed by the seeder.
//!
//! The relational store is read-only from here: an [`EntitySource`] hands
//! out ordered collections and a [`PayloadSerializer`] turns each
//! (entity, aspect) pair into its canonical wire payload.

pub mod payload;
pub mod snapshot;

pub use payload::{JsonPayloads, PayloadError, PayloadSerializer};
pub use snapshot::SnapshotFile;

use crate::topics::TopicKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleStatus {
    #[default]
    #[serde(rename = "UK")]
    Unknown,
    #[serde(rename = "AV")]
    Available,
    #[serde(rename = "OS")]
    OutOfService,
    #[serde(rename = "PB")]
    PatientBound,
    #[serde(rename = "AP")]
    AtPatient,
    #[serde(rename = "HB")]
    HospitalBound,
    #[serde(rename = "AH")]
    AtHospital,
}

impl VehicleStatus {
    /// Short code published on the status topic.
    pub fn code(&self) -> &'static str {
        match self {
            VehicleStatus::Unknown => "UK",
            VehicleStatus::Available => "AV",
            VehicleStatus::OutOfService => "OS",
            VehicleStatus::PatientBound => "PB",
            VehicleStatus::AtPatient => "AP",
            VehicleStatus::HospitalBound => "HB",
            VehicleStatus::AtHospital => "AH",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VehicleStatus::Unknown => "Unknown",
            VehicleStatus::Available => "Available",
            VehicleStatus::OutOfService => "Out of service",
            VehicleStatus::PatientBound => "Patient bound",
            VehicleStatus::AtPatient => "At patient",
            VehicleStatus::HospitalBound => "Hospital bound",
            VehicleStatus::AtHospital => "At hospital",
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    #[default]
    #[serde(rename = "B")]
    Basic,
    #[serde(rename = "A")]
    Advanced,
    #[serde(rename = "R")]
    Rescue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipmentKind {
    #[serde(rename = "B")]
    Boolean,
    #[serde(rename = "I")]
    Integer,
    #[serde(rename = "S")]
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: u64,
    pub identifier: String,
    #[serde(default)]
    pub status: VehicleStatus,
    #[serde(default)]
    pub capability: Capability,
    #[serde(default)]
    pub orientation: Option<f64>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub location_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentItem {
    pub name: String,
    pub kind: EquipmentKind,
    #[serde(default)]
    pub toggleable: bool,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// Inventory in store order; one retained topic per item.
    #[serde(default)]
    pub equipment: Vec<EquipmentItem>,
}

/// A user's entitlements: the facilities and vehicles it may read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    #[serde(default)]
    pub facilities: Vec<u64>,
    #[serde(default)]
    pub vehicles: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: u64,
    pub vehicle_id: u64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
}

fn default_priority() -> String {
    "A".to_string()
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse snapshot: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {entity} {key}: {reason}")]
    Invalid {
        entity: &'static str,
        key: String,
        reason: &'static str,
    },
}

/// Read-only access to the entity store. Every collection comes back in a
/// stable order so repeated passes enumerate identically.
pub trait EntitySource {
    fn facilities(&self) -> Result<Vec<Facility>, SourceError>;
    fn vehicles(&self) -> Result<Vec<Vehicle>, SourceError>;
    fn accounts(&self) -> Result<Vec<Account>, SourceError>;
    /// All dispatch records, active or not.
    fn dispatches(&self) -> Result<Vec<Dispatch>, SourceError>;
}

/// Groups of publishes within a seeding pass, in walk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Facilities,
    Vehicles,
    Accounts,
    Dispatches,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Facilities => "facilities",
            Section::Vehicles => "vehicles",
            Section::Accounts => "accounts",
            Section::Dispatches => "dispatches",
        };
        f.write_str(name)
    }
}

/// One (entity, aspect) pair that maps to exactly one retained topic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SnapshotRecord<'a> {
    EquipmentCount {
        facility: &'a Facility,
        item: &'a EquipmentItem,
    },
    FacilityMetadata(&'a Facility),
    VehicleLocation(&'a Vehicle),
    VehicleStatus(&'a Vehicle),
    AccountFacilities(&'a Account),
    AccountVehicles(&'a Account),
    Dispatch(&'a Dispatch),
}

impl<'a> SnapshotRecord<'a> {
    pub fn key(&self) -> TopicKey<'a> {
        match *self {
            SnapshotRecord::EquipmentCount { facility, item } => TopicKey::FacilityEquipment {
                facility_id: facility.id,
                equipment: &item.name,
            },
            SnapshotRecord::FacilityMetadata(facility) => TopicKey::FacilityMetadata {
                facility_id: facility.id,
            },
            SnapshotRecord::VehicleLocation(vehicle) => TopicKey::VehicleLocation {
                vehicle_id: vehicle.id,
            },
            SnapshotRecord::VehicleStatus(vehicle) => TopicKey::VehicleStatus {
                vehicle_id: vehicle.id,
            },
            SnapshotRecord::AccountFacilities(account) => TopicKey::AccountFacilities {
                account: &account.username,
            },
            SnapshotRecord::AccountVehicles(account) => TopicKey::AccountVehicles {
                account: &account.username,
            },
            SnapshotRecord::Dispatch(dispatch) => TopicKey::VehicleDispatch {
                vehicle_id: dispatch.vehicle_id,
            },
        }
    }

    pub fn topic(&self) -> String {
        self.key().topic()
    }

    pub fn section(&self) -> Section {
        match self {
            SnapshotRecord::EquipmentCount { .. } | SnapshotRecord::FacilityMetadata(_) => {
                Section::Facilities
            }
            SnapshotRecord::VehicleLocation(_) | SnapshotRecord::VehicleStatus(_) => {
                Section::Vehicles
            }
            SnapshotRecord::AccountFacilities(_) | SnapshotRecord::AccountVehicles(_) => {
                Section::Accounts
            }
            SnapshotRecord::Dispatch(_) => Section::Dispatches,
        }
    }
}
