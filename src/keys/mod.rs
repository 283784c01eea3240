//! Keystore and certificate material
//!
//! Signer certificates live under `<base>/<purpose>/<signer>.crt`, with
//! `@` in the signer id replaced by `_at_`. TLS serving certificates can
//! be generated here for self-hosted deployments; production setups
//! normally obtain theirs from an ACME collaborator instead.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

use crate::error::{Error, Result};
use crate::su3::SignerCert;

/// Certificate store rooted at a base directory.
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        KeyStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the reseed certificate for a signer.
    pub fn reseeder_certificate(&self, signer: &[u8]) -> Result<SignerCert> {
        self.certificate("reseed", signer)
    }

    /// Load a signer certificate from a specific purpose directory.
    pub fn dir_certificate(&self, dir: &str, signer: &[u8]) -> Result<SignerCert> {
        self.certificate(dir, signer)
    }

    fn certificate(&self, dir: &str, signer: &[u8]) -> Result<SignerCert> {
        let signer = String::from_utf8_lossy(signer);
        let cert_path = self.path.join(dir).join(signer_filename(&signer));
        debug!(path = %cert_path.display(), "loading signer certificate");

        let pem = fs::read(&cert_path)?;
        SignerCert::from_pem(&pem)
    }
}

/// Certificate filename for a signer id: `@` becomes `_at_`.
pub fn signer_filename(signer: &str) -> String {
    format!("{}.crt", signer.replacen('@', "_at_", 1))
}

/// PEM-armor a DER certificate.
pub fn certificate_pem(der: &[u8]) -> String {
    let encoded = BASE64.encode(der);
    let mut pem = String::with_capacity(encoded.len() + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(64));
        pem.push_str(line);
        pem.push('\n');
        rest = tail;
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Self-signed TLS certificate (ECDSA P-384, five years) for the given
/// hosts; names parseable as IPs become IP subject-alternative names.
/// Returns the certificate and private key as PEM.
pub fn new_tls_certificate(hosts: &[&str]) -> Result<(String, String)> {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P384_SHA384};

    if hosts.is_empty() {
        return Err(Error::InvalidArgument("no host for TLS certificate".into()));
    }

    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)
        .map_err(|e| Error::Crypto(format!("TLS key generation failed: {}", e)))?;

    let mut params =
        CertificateParams::new(hosts.iter().map(|h| h.to_string()).collect::<Vec<_>>())
            .map_err(|e| Error::InvalidArgument(format!("bad TLS host list: {}", e)))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "I2P Anonymous Network");
    dn.push(DnType::OrganizationalUnitName, "I2P");
    dn.push(DnType::CommonName, hosts[0]);
    params.distinguished_name = dn;
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(5 * 365);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Crypto(format!("TLS certificate generation failed: {}", e)))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}
