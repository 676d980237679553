//! TLS client configuration from generated PEM material.

mod common;

use fleetseed::transport::tls::build_tls_config;
use fleetseed::transport::TlsSettings;
use tempfile::tempdir;

#[test]
fn server_auth_only() {
    let dir = tempdir().unwrap();
    let paths = common::write_tls_materials(dir.path());
    let config = build_tls_config(&TlsSettings {
        ca: paths.ca,
        client_cert: None,
        client_key: None,
    })
    .unwrap();
    assert_eq!(config.alpn_protocols, vec![b"mqtt".to_vec()]);
}

#[test]
fn mutual_tls_with_client_certificate() {
    let dir = tempdir().unwrap();
    let paths = common::write_tls_materials(dir.path());
    let config = build_tls_config(&TlsSettings {
        ca: paths.ca,
        client_cert: Some(paths.cert),
        client_key: Some(paths.key),
    });
    assert!(config.is_ok(), "{:?}", config.err());
}

#[test]
fn key_without_certificate_is_rejected() {
    let dir = tempdir().unwrap();
    let paths = common::write_tls_materials(dir.path());
    let err = build_tls_config(&TlsSettings {
        ca: paths.ca,
        client_cert: None,
        client_key: Some(paths.key),
    })
    .unwrap_err();
    assert!(err.to_string().contains("together"));
}

#[test]
fn certificate_file_as_key_is_rejected() {
    let dir = tempdir().unwrap();
    let paths = common::write_tls_materials(dir.path());
    let err = build_tls_config(&TlsSettings {
        ca: paths.ca,
        client_cert: Some(paths.cert.clone()),
        client_key: Some(paths.cert),
    })
    .unwrap_err();
    assert!(err.to_string().contains("no supported private key"));
}
