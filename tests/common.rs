//! Common test harness utilities for integration tests.
//!
//! This module provides helpers for:
//! - Building entity snapshots
//! - Connecting sessions over the scripted in-memory transport
//! - Generating ephemeral TLS materials

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use fleetseed::entities::{
    Account, Capability, Dispatch, EquipmentItem, EquipmentKind, Facility, GeoPoint,
    SnapshotFile, Vehicle, VehicleStatus,
};
use fleetseed::session::{Session, SessionSignal};
use fleetseed::transport::{ConnectOptions, MemoryTransport, TransportEvent};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

// -----------------------------------------------------------------------------
// Entities
// -----------------------------------------------------------------------------

pub fn equipment(name: &str, quantity: i64) -> EquipmentItem {
    EquipmentItem {
        name: name.to_string(),
        kind: EquipmentKind::Integer,
        toggleable: false,
        quantity,
        value: String::new(),
    }
}

pub fn facility(id: u64, items: &[(&str, i64)]) -> Facility {
    Facility {
        id,
        name: format!("Facility {id}"),
        address: String::new(),
        location: None,
        equipment: items
            .iter()
            .map(|(name, quantity)| equipment(name, *quantity))
            .collect(),
    }
}

pub fn vehicle(id: u64, status: VehicleStatus) -> Vehicle {
    Vehicle {
        id,
        identifier: format!("UNIT-{id}"),
        status,
        capability: Capability::Basic,
        orientation: Some(0.0),
        location: Some(GeoPoint {
            latitude: 32.51,
            longitude: -117.04,
        }),
        location_timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single(),
    }
}

pub fn account(username: &str, facilities: &[u64], vehicles: &[u64]) -> Account {
    Account {
        username: username.to_string(),
        facilities: facilities.to_vec(),
        vehicles: vehicles.to_vec(),
    }
}

pub fn dispatch(id: u64, vehicle_id: u64, active: bool) -> Dispatch {
    Dispatch {
        id,
        vehicle_id,
        active,
        status: String::new(),
        priority: "A".to_string(),
        name: String::new(),
        address: String::new(),
        description: String::new(),
        location: None,
        created_at: Utc
            .with_ymd_and_hms(2024, 5, 1, 11, 30, 0)
            .single()
            .expect("valid timestamp"),
    }
}

/// One facility with two equipment items and one vehicle.
pub fn small_fleet() -> SnapshotFile {
    SnapshotFile {
        facilities: vec![facility(1, &[("beds", 10), ("ventilators", 2)])],
        vehicles: vec![vehicle(5, VehicleStatus::Available)],
        ..Default::default()
    }
}

/// Every section populated, including a closed dispatch.
pub fn full_fleet() -> SnapshotFile {
    SnapshotFile {
        facilities: vec![
            facility(1, &[("beds", 10), ("ventilators", 2)]),
            facility(2, &[("beds", 4)]),
        ],
        vehicles: vec![
            vehicle(5, VehicleStatus::Available),
            vehicle(6, VehicleStatus::PatientBound),
        ],
        accounts: vec![
            account("admin", &[1, 2], &[5, 6]),
            account("north", &[1], &[5]),
        ],
        dispatches: vec![dispatch(90, 6, true), dispatch(91, 5, false)],
    }
}

// -----------------------------------------------------------------------------
// Sessions
// -----------------------------------------------------------------------------

pub fn connect_options() -> ConnectOptions {
    ConnectOptions {
        host: "memory".into(),
        port: 1883,
        keepalive: Duration::from_secs(60),
        client_id: "fleetseed-test".into(),
        clean_session: true,
        credentials: None,
        tls: None,
        request_capacity: 64,
    }
}

/// A session connected over a fresh in-memory transport.
pub async fn connected_session() -> (
    Session<MemoryTransport>,
    UnboundedReceiver<TransportEvent>,
) {
    let (transport, mut events) = MemoryTransport::new();
    let session = Session::new(transport);
    session
        .connect(&connect_options())
        .await
        .expect("connect");
    let event = events.recv().await.expect("connect result");
    assert_eq!(
        session.handle_event(event).await.expect("connect accepted"),
        SessionSignal::Connected
    );
    (session, events)
}

/// Apply every queued event, returning the signals in order.
pub async fn pump(
    session: &Session<MemoryTransport>,
    events: &mut UnboundedReceiver<TransportEvent>,
) -> Vec<SessionSignal> {
    let mut signals = Vec::new();
    while let Ok(event) = events.try_recv() {
        signals.push(session.handle_event(event).await.expect("event accepted"));
    }
    signals
}

// -----------------------------------------------------------------------------
// TLS
// -----------------------------------------------------------------------------

/// TLS material paths returned by [`write_tls_materials`].
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Generate a self-signed CA and a client certificate it signed, and write
/// them as PEM files into `dir`.
pub fn write_tls_materials(dir: &Path) -> TlsPaths {
    let ca_key = KeyPair::generate().expect("generate CA key");
    let mut ca_params = CertificateParams::default();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "fleetseed-test-ca");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).expect("self-sign CA");

    let client_key = KeyPair::generate().expect("generate client key");
    let mut client_params =
        CertificateParams::new(vec!["fleetseed".into()]).expect("client cert params");
    client_params
        .distinguished_name
        .push(DnType::CommonName, "fleetseed");
    let client_cert = client_params
        .signed_by(&client_key, &ca_cert, &ca_key)
        .expect("sign client cert");

    let paths = TlsPaths {
        ca: dir.join("ca.pem"),
        cert: dir.join("client.pem"),
        key: dir.join("client-key.pem"),
    };
    fs::write(&paths.ca, ca_cert.pem()).expect("write CA");
    fs::write(&paths.cert, client_cert.pem()).expect("write client cert");
    fs::write(&paths.key, client_key.serialize_pem()).expect("write client key");
    paths
}
