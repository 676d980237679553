//! rustls client configuration for broker connections.

use super::TlsSettings;
use anyhow::{bail, Context, Result};
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use rustls_pemfile::{certs, ec_private_keys, pkcs8_private_keys, rsa_private_keys};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

/// Build a client config trusting `settings.ca`, presenting a client
/// certificate when both `client_cert` and `client_key` are set.
pub fn build_tls_config(settings: &TlsSettings) -> Result<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    let ca_certs = load_certs(&settings.ca).context("load broker CA")?;
    let (added, _) = root_store.add_parsable_certificates(&ca_certs);
    if added == 0 {
        bail!("no CA certificates loaded from {}", settings.ca.display());
    }

    let builder = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store);

    let mut config = match (&settings.client_cert, &settings.client_key) {
        (Some(cert), Some(key)) => {
            let chain: Vec<Certificate> = load_certs(cert)?.into_iter().map(Certificate).collect();
            if chain.is_empty() {
                bail!("no certificates found in {}", cert.display());
            }
            builder
                .with_client_auth_cert(chain, load_private_key(key)?)
                .context("build TLS client config")?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => bail!("client certificate and key must be configured together"),
    };
    config.alpn_protocols.push(b"mqtt".to_vec());
    Ok(config)
}

fn load_certs(path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("open certificate {}", path.display()))?,
    );
    certs(&mut reader).with_context(|| format!("parse certificates in {}", path.display()))
}

fn load_private_key(path: &Path) -> Result<PrivateKey> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read key file: {}", path.display()))?;
    let mut cursor = Cursor::new(&bytes);

    if let Some(key) = pkcs8_private_keys(&mut cursor)
        .context("parse PKCS#8 private key")?
        .into_iter()
        .next()
    {
        return Ok(PrivateKey(key));
    }

    cursor.set_position(0);
    if let Some(key) = rsa_private_keys(&mut cursor)
        .context("parse RSA private key")?
        .into_iter()
        .next()
    {
        return Ok(PrivateKey(key));
    }

    cursor.set_position(0);
    if let Some(key) = ec_private_keys(&mut cursor)
        .context("parse EC private key")?
        .into_iter()
        .next()
    {
        return Ok(PrivateKey(key));
    }

    bail!("no supported private key found in {}", path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_ca_is_reported() {
        let dir = tempdir().unwrap();
        let settings = TlsSettings {
            ca: dir.path().join("absent.pem"),
            client_cert: None,
            client_key: None,
        };
        let err = build_tls_config(&settings).unwrap_err();
        assert!(format!("{err:#}").contains("open certificate"));
    }

    #[test]
    fn test_empty_ca_bundle_is_rejected() {
        let dir = tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        fs::write(&ca, "").unwrap();
        let settings = TlsSettings {
            ca,
            client_cert: None,
            client_key: None,
        };
        let err = build_tls_config(&settings).unwrap_err();
        assert!(err.to_string().contains("no CA certificates"));
    }
}
