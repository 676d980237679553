//! Topic naming scheme.
//!
//! Pure and stable across processes: every publisher (the seeder, live
//! updates, peers in other processes) derives the same topic for the same
//! entity aspect.
//!
//! | aspect                     | topic                                  |
//! |----------------------------|----------------------------------------|
//! | vehicle location           | `vehicle/<id>/location`                |
//! | vehicle status             | `vehicle/<id>/status`                  |
//! | vehicle dispatch           | `vehicle/<id>/dispatch`                |
//! | facility equipment item    | `facility/<id>/equipment/<name>`       |
//! | facility metadata          | `facility/<id>/metadata`               |
//! | account facility list      | `account/<name>/facilities`            |
//! | account vehicle list       | `account/<name>/vehicles`              |

use std::fmt;

/// One addressable aspect of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKey<'a> {
    VehicleLocation { vehicle_id: u64 },
    VehicleStatus { vehicle_id: u64 },
    VehicleDispatch { vehicle_id: u64 },
    FacilityEquipment { facility_id: u64, equipment: &'a str },
    FacilityMetadata { facility_id: u64 },
    AccountFacilities { account: &'a str },
    AccountVehicles { account: &'a str },
}

impl fmt::Display for TopicKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKey::VehicleLocation { vehicle_id } => write!(f, "vehicle/{vehicle_id}/location"),
            TopicKey::VehicleStatus { vehicle_id } => write!(f, "vehicle/{vehicle_id}/status"),
            TopicKey::VehicleDispatch { vehicle_id } => write!(f, "vehicle/{vehicle_id}/dispatch"),
            TopicKey::FacilityEquipment {
                facility_id,
                equipment,
            } => write!(f, "facility/{facility_id}/equipment/{equipment}"),
            TopicKey::FacilityMetadata { facility_id } => {
                write!(f, "facility/{facility_id}/metadata")
            }
            TopicKey::AccountFacilities { account } => write!(f, "account/{account}/facilities"),
            TopicKey::AccountVehicles { account } => write!(f, "account/{account}/vehicles"),
        }
    }
}

impl TopicKey<'_> {
    pub fn topic(&self) -> String {
        self.to_string()
    }
}

pub fn vehicle_location(vehicle_id: u64) -> String {
    TopicKey::VehicleLocation { vehicle_id }.topic()
}

pub fn vehicle_status(vehicle_id: u64) -> String {
    TopicKey::VehicleStatus { vehicle_id }.topic()
}

pub fn vehicle_dispatch(vehicle_id: u64) -> String {
    TopicKey::VehicleDispatch { vehicle_id }.topic()
}

pub fn facility_equipment(facility_id: u64, equipment: &str) -> String {
    TopicKey::FacilityEquipment {
        facility_id,
        equipment,
    }
    .topic()
}

pub fn facility_metadata(facility_id: u64) -> String {
    TopicKey::FacilityMetadata { facility_id }.topic()
}

pub fn account_facilities(account: &str) -> String {
    TopicKey::AccountFacilities { account }.topic()
}

pub fn account_vehicles(account: &str) -> String {
    TopicKey::AccountVehicles { account }.topic()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A concrete topic a message can be published to: non-empty, no wildcards,
/// no NUL.
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#', '\0'])
}

/// A single level of a topic name, such as an equipment name or account
/// handle that is embedded in a topic.
pub fn is_valid_topic_level(level: &str) -> bool {
    !level.is_empty() && !level.contains(['/', '+', '#', '\0'])
}

/// A subscription filter. `+` must fill a whole level; `#` must be the whole
/// last level.
pub fn is_valid_topic_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    levels.iter().enumerate().all(|(i, level)| {
        if level.contains('#') {
            *level == "#" && i == last
        } else if level.contains('+') {
            *level == "+"
        } else {
            true
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_match_naming_scheme() {
        assert_eq!(vehicle_location(12), "vehicle/12/location");
        assert_eq!(vehicle_status(12), "vehicle/12/status");
        assert_eq!(vehicle_dispatch(3), "vehicle/3/dispatch");
        assert_eq!(facility_equipment(4, "beds"), "facility/4/equipment/beds");
        assert_eq!(facility_metadata(4), "facility/4/metadata");
        assert_eq!(account_facilities("dispatcher"), "account/dispatcher/facilities");
        assert_eq!(account_vehicles("dispatcher"), "account/dispatcher/vehicles");
    }

    #[test]
    fn test_topic_keys_are_stable() {
        let key = TopicKey::FacilityEquipment {
            facility_id: 9,
            equipment: "x-ray",
        };
        assert_eq!(key.topic(), key.topic());
        assert_eq!(key.topic(), "facility/9/equipment/x-ray");
    }

    #[test]
    fn test_topic_name_validation() {
        assert!(is_valid_topic_name("vehicle/1/status"));
        assert!(!is_valid_topic_name(""));
        assert!(!is_valid_topic_name("vehicle/+/status"));
        assert!(!is_valid_topic_name("vehicle/#"));
    }

    #[test]
    fn test_topic_level_validation() {
        assert!(is_valid_topic_level("oxygen tanks"));
        assert!(!is_valid_topic_level("beds/icu"));
        assert!(!is_valid_topic_level("+"));
        assert!(!is_valid_topic_level(""));
    }

    #[test]
    fn test_topic_filter_validation() {
        assert!(is_valid_topic_filter("vehicle/+/status"));
        assert!(is_valid_topic_filter("facility/#"));
        assert!(is_valid_topic_filter("#"));
        assert!(!is_valid_topic_filter("facility/#/metadata"));
        assert!(!is_valid_topic_filter("vehicle/1+/status"));
        assert!(!is_valid_topic_filter(""));
    }
}
