//! JSON snapshot of the entity store.
//!
//! Stands in for the relational database when seeding from a dump:
//!
//! ```json
//! {
//!   "facilities": [{"id": 1, "name": "General", "equipment": [...]}],
//!   "vehicles":   [{"id": 7, "identifier": "BUS-7", "status": "AV"}],
//!   "accounts":   [{"username": "dispatcher", "facilities": [1], "vehicles": [7]}],
//!   "dispatches": [{"id": 30, "vehicle_id": 7, "active": true, "created_at": "..."}]
//! }
//! ```

use super::{Account, Dispatch, EntitySource, Facility, SourceError, Vehicle};
use crate::topics::is_valid_topic_level;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    #[serde(default)]
    pub facilities: Vec<Facility>,
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub dispatches: Vec<Dispatch>,
}

impl SnapshotFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, SourceError> {
        let snapshot: SnapshotFile = serde_json::from_str(contents)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Reject snapshots that would produce ambiguous or unpublishable
    /// topics: duplicate keys and names that are not a single topic level.
    pub fn validate(&self) -> Result<(), SourceError> {
        let mut facility_ids = HashSet::new();
        for facility in &self.facilities {
            if !facility_ids.insert(facility.id) {
                return Err(invalid("facility", facility.id, "duplicate id"));
            }
            let mut names = HashSet::new();
            for item in &facility.equipment {
                if !is_valid_topic_level(&item.name) {
                    return Err(invalid("equipment", &item.name, "not a valid topic level"));
                }
                if !names.insert(item.name.as_str()) {
                    return Err(invalid("equipment", &item.name, "listed twice for one facility"));
                }
            }
        }

        let mut vehicle_ids = HashSet::new();
        for vehicle in &self.vehicles {
            if !vehicle_ids.insert(vehicle.id) {
                return Err(invalid("vehicle", vehicle.id, "duplicate id"));
            }
        }

        let mut usernames = HashSet::new();
        for account in &self.accounts {
            if !is_valid_topic_level(&account.username) {
                return Err(invalid("account", &account.username, "not a valid topic level"));
            }
            if !usernames.insert(account.username.as_str()) {
                return Err(invalid("account", &account.username, "duplicate username"));
            }
        }

        let mut dispatch_ids = HashSet::new();
        let mut dispatched = HashSet::new();
        for dispatch in &self.dispatches {
            if !dispatch_ids.insert(dispatch.id) {
                return Err(invalid("dispatch", dispatch.id, "duplicate id"));
            }
            if !dispatch.active {
                continue;
            }
            if !vehicle_ids.contains(&dispatch.vehicle_id) {
                return Err(invalid("dispatch", dispatch.id, "assigned to an unknown vehicle"));
            }
            if !dispatched.insert(dispatch.vehicle_id) {
                return Err(invalid(
                    "dispatch",
                    dispatch.id,
                    "vehicle already has an active dispatch",
                ));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
            && self.vehicles.is_empty()
            && self.accounts.is_empty()
            && self.dispatches.is_empty()
    }
}

fn invalid(entity: &'static str, key: impl ToString, reason: &'static str) -> SourceError {
    SourceError::Invalid {
        entity,
        key: key.to_string(),
        reason,
    }
}

impl EntitySource for SnapshotFile {
    fn facilities(&self) -> Result<Vec<Facility>, SourceError> {
        Ok(self.facilities.clone())
    }

    fn vehicles(&self) -> Result<Vec<Vehicle>, SourceError> {
        Ok(self.vehicles.clone())
    }

    fn accounts(&self) -> Result<Vec<Account>, SourceError> {
        Ok(self.accounts.clone())
    }

    fn dispatches(&self) -> Result<Vec<Dispatch>, SourceError> {
        Ok(self.dispatches.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixtures;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_empty_snapshot() {
        let snapshot = SnapshotFile::from_json("{}").unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "facilities": [{{"id": 1, "name": "General",
                    "equipment": [{{"name": "beds", "kind": "I", "quantity": 3}}]}}],
                "vehicles": [{{"id": 7, "identifier": "BUS-7", "status": "AV"}}],
                "accounts": [{{"username": "ops", "facilities": [1], "vehicles": [7]}}],
                "dispatches": [{{"id": 2, "vehicle_id": 7, "active": true,
                    "created_at": "2024-01-02T03:00:00Z"}}]
            }}"#
        )
        .unwrap();

        let snapshot = SnapshotFile::load(file.path()).unwrap();
        assert_eq!(snapshot.facilities[0].equipment[0].quantity, 3);
        assert_eq!(snapshot.vehicles().unwrap().len(), 1);
        assert_eq!(snapshot.dispatches[0].priority, "A");
        assert_eq!(snapshot.accounts().unwrap()[0].username, "ops");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = SnapshotFile::load("/nonexistent/snapshot.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/snapshot.json"));
    }

    #[test]
    fn test_rejects_wildcard_equipment_name() {
        let mut snapshot = SnapshotFile {
            facilities: vec![fixtures::facility()],
            ..Default::default()
        };
        snapshot.facilities[0].equipment[0].name = "beds/#".into();
        assert!(matches!(
            snapshot.validate(),
            Err(SourceError::Invalid {
                entity: "equipment",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_duplicate_vehicle() {
        let snapshot = SnapshotFile {
            vehicles: vec![fixtures::vehicle(), fixtures::vehicle()],
            ..Default::default()
        };
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_active_dispatch_needs_known_vehicle() {
        let snapshot = SnapshotFile {
            dispatches: vec![fixtures::dispatch(true)],
            ..Default::default()
        };
        assert!(snapshot.validate().is_err());

        let closed = SnapshotFile {
            dispatches: vec![fixtures::dispatch(false)],
            ..Default::default()
        };
        assert!(closed.validate().is_ok());
    }
}
