//! TLS for the clearnet listener
//!
//! TLS 1.3 only, restricted to AES-256-GCM and ChaCha20-Poly1305 with
//! P-384 key exchange. Identity loading parses the leaf certificate
//! eagerly so renewal checks never trip over a lazily parsed chain.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, crypto::ring as provider, crypto::CryptoProvider, ServerConfig};

use crate::error::{Error, Result};

/// Remaining validity below which the certificate should be reissued.
pub const RENEWAL_WINDOW: Duration = Duration::from_secs(48 * 3600);

/// A loaded TLS server identity with its leaf certificate parsed.
pub struct TlsIdentity {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    not_after: i64,
}

impl TlsIdentity {
    /// Load a PEM certificate chain and private key from disk.
    pub fn load(cert_file: &Path, key_file: &Path) -> Result<Self> {
        let certs = load_certs(cert_file)?;
        let key = load_private_key(key_file)?;

        let leaf = certs
            .first()
            .ok_or_else(|| Error::Config(format!("no certificate in {}", cert_file.display())))?;
        let (_, parsed) = x509_parser::parse_x509_certificate(leaf)
            .map_err(|e| Error::Parse(format!("bad TLS leaf certificate: {}", e)))?;
        let not_after = parsed.validity().not_after.timestamp();

        Ok(TlsIdentity {
            certs,
            key,
            not_after,
        })
    }

    /// True when the leaf expires within [`RENEWAL_WINDOW`].
    pub fn needs_renewal(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        self.not_after - now < RENEWAL_WINDOW.as_secs() as i64
    }

    /// Build the hardened server configuration for this identity.
    pub fn into_server_config(self) -> Result<Arc<ServerConfig>> {
        reseed_server_config(self.certs, self.key)
    }
}

/// TLS 1.3 server configuration with the reseed cipher and group policy.
pub fn reseed_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>> {
    let crypto = CryptoProvider {
        cipher_suites: vec![
            provider::cipher_suite::TLS13_AES_256_GCM_SHA384,
            provider::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
        ],
        // the provider offers no P-521 group; P-384 is the strongest
        // NIST group available here
        kx_groups: vec![provider::kx_group::SECP384R1],
        ..provider::default_provider()
    };

    let config = ServerConfig::builder_with_provider(Arc::new(crypto))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::Config(format!("TLS configuration rejected: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("bad TLS identity: {}", e)))?;

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("failed to open certificate file {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse certificates: {}", e)))?;
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("failed to open key file {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    let keys = rustls_pemfile::read_all(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse private key: {}", e)))?;

    for item in keys {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }

    Err(Error::Config(format!(
        "no valid private key found in {}",
        path.display()
    )))
}
