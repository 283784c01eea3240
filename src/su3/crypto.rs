//! SU3 signing and verification
//!
//! Signing is RSA-only (PKCS#1 v1.5 over a pre-hashed digest, no
//! DigestInfo prefix). Verification additionally supports DSA and ECDSA
//! over the NIST curves, dispatched on the certificate's public key.

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::hazmat::PrehashVerifier;

use crate::error::{Error, Result};

use super::{SigType, Su3File};

/// A DER-encoded X.509 certificate holding a signer's public key.
#[derive(Debug, Clone)]
pub struct SignerCert {
    der: Vec<u8>,
}

impl SignerCert {
    /// Wrap a DER certificate, checking that it parses.
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        x509_parser::parse_x509_certificate(&der)
            .map_err(|e| Error::Parse(format!("bad X.509 certificate: {}", e)))?;
        Ok(SignerCert { der })
    }

    /// Load from a PEM document.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let (_, doc) = x509_parser::pem::parse_x509_pem(pem)
            .map_err(|e| Error::Parse(format!("bad PEM document: {}", e)))?;
        Self::from_der(doc.contents)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Decode the certificate's subject public key.
    pub fn public_key(&self) -> Result<SignerPublicKey> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| Error::Parse(format!("bad X.509 certificate: {}", e)))?;
        SignerPublicKey::from_spki_der(cert.public_key().raw)
    }
}

/// A signer's public key, one variant per supported algorithm family.
pub enum SignerPublicKey {
    Rsa(RsaPublicKey),
    Dsa(dsa::VerifyingKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
    EcdsaP384(p384::ecdsa::VerifyingKey),
    EcdsaP521(p521::ecdsa::VerifyingKey),
}

impl SignerPublicKey {
    /// Decode a SubjectPublicKeyInfo document. Each decoder checks its own
    /// algorithm identifier, so the first success wins.
    pub fn from_spki_der(spki: &[u8]) -> Result<Self> {
        if let Ok(key) = RsaPublicKey::from_public_key_der(spki) {
            return Ok(SignerPublicKey::Rsa(key));
        }
        if let Ok(key) = dsa::VerifyingKey::from_public_key_der(spki) {
            return Ok(SignerPublicKey::Dsa(key));
        }
        if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(spki) {
            return Ok(SignerPublicKey::EcdsaP256(key));
        }
        if let Ok(key) = p384::ecdsa::VerifyingKey::from_public_key_der(spki) {
            return Ok(SignerPublicKey::EcdsaP384(key));
        }
        if let Ok(key) = p521::ecdsa::VerifyingKey::from_public_key_der(spki) {
            return Ok(SignerPublicKey::EcdsaP521(key));
        }
        Err(Error::UnsupportedAlgorithm)
    }
}

impl Su3File {
    /// Sign the file with an RSA private key.
    ///
    /// The signature buffer is pre-sized to the key length so the header
    /// emitted by [`Su3File::signed_bytes`] carries the correct `sigLen`.
    pub fn sign(&mut self, key: &RsaPrivateKey) -> Result<()> {
        if !self.sig_type.is_rsa() {
            return Err(Error::UnknownSigType(self.sig_type.code()));
        }

        self.signature = vec![0u8; key.size()];
        let digest = digest_for(self.sig_type, &self.signed_bytes()?);

        self.signature = key
            .sign(Pkcs1v15Sign::new_unprefixed(), &digest)
            .map_err(|e| Error::Crypto(format!("RSA signing failed: {}", e)))?;

        Ok(())
    }

    /// Verify the signature against a signer certificate.
    pub fn verify_signature(&self, cert: &SignerCert) -> Result<()> {
        let key = cert.public_key()?;
        check_signature(&key, self.sig_type, &self.signed_bytes()?, &self.signature)
    }
}

/// Verify `signature` over `signed` with the given key and algorithm.
///
/// The key variant must match the algorithm family of `sig_type`.
pub fn check_signature(
    key: &SignerPublicKey,
    sig_type: SigType,
    signed: &[u8],
    signature: &[u8],
) -> Result<()> {
    if signature.is_empty() {
        return Err(Error::SignatureInvalid);
    }

    let digest = digest_for(sig_type, signed);

    match (sig_type, key) {
        (SigType::RsaSha256 | SigType::RsaSha384 | SigType::RsaSha512, SignerPublicKey::Rsa(pk)) => {
            pk.verify(Pkcs1v15Sign::new_unprefixed(), &digest, signature)
                .map_err(|_| Error::SignatureInvalid)
        }
        (SigType::DsaSha1, SignerPublicKey::Dsa(vk)) => {
            let sig = dsa::Signature::try_from(signature).map_err(|_| Error::SignatureInvalid)?;
            // {R,S} must both be positive
            if sig.r().bits() == 0 || sig.s().bits() == 0 {
                return Err(Error::SignatureInvalid);
            }
            vk.verify_prehash(&digest, &sig)
                .map_err(|_| Error::SignatureInvalid)
        }
        (
            SigType::EcdsaSha256 | SigType::EcdsaSha384 | SigType::EcdsaSha512,
            SignerPublicKey::EcdsaP256(vk),
        ) => {
            let sig =
                p256::ecdsa::Signature::from_der(signature).map_err(|_| Error::SignatureInvalid)?;
            vk.verify_prehash(&digest, &sig)
                .map_err(|_| Error::SignatureInvalid)
        }
        (
            SigType::EcdsaSha256 | SigType::EcdsaSha384 | SigType::EcdsaSha512,
            SignerPublicKey::EcdsaP384(vk),
        ) => {
            let sig =
                p384::ecdsa::Signature::from_der(signature).map_err(|_| Error::SignatureInvalid)?;
            vk.verify_prehash(&digest, &sig)
                .map_err(|_| Error::SignatureInvalid)
        }
        (
            SigType::EcdsaSha256 | SigType::EcdsaSha384 | SigType::EcdsaSha512,
            SignerPublicKey::EcdsaP521(vk),
        ) => {
            let sig =
                p521::ecdsa::Signature::from_der(signature).map_err(|_| Error::SignatureInvalid)?;
            vk.verify_prehash(&digest, &sig)
                .map_err(|_| Error::SignatureInvalid)
        }
        _ => Err(Error::UnsupportedAlgorithm),
    }
}

fn digest_for(sig_type: SigType, data: &[u8]) -> Vec<u8> {
    match sig_type {
        SigType::DsaSha1 => Sha1::digest(data).to_vec(),
        SigType::EcdsaSha256 | SigType::RsaSha256 => Sha256::digest(data).to_vec(),
        SigType::EcdsaSha384 | SigType::RsaSha384 => Sha384::digest(data).to_vec(),
        SigType::EcdsaSha512 | SigType::RsaSha512 => Sha512::digest(data).to_vec(),
    }
}

/// Create a self-signed certificate for SU3 signing, valid for ten years.
///
/// An empty signer id yields a non-CA certificate, which keeps rcgen from
/// auto-generating a subject key identifier. Returns the DER encoding.
pub fn new_signing_certificate(signer_id: &str, key: &RsaPrivateKey) -> Result<Vec<u8>> {
    use rcgen::{
        BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
        IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, SerialNumber,
    };

    let pkcs8 = key
        .to_pkcs8_der()
        .map_err(|e| Error::Crypto(format!("failed to encode signing key: {}", e)))?;
    let key_pair = KeyPair::try_from(pkcs8.as_bytes())
        .map_err(|e| Error::Crypto(format!("unusable signing key: {}", e)))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "I2P Anonymous Network");
    dn.push(DnType::OrganizationalUnitName, "I2P");
    dn.push(DnType::LocalityName, "XX");
    dn.push(DnType::CountryName, "XX");
    dn.push(DnType::CommonName, signer_id);

    let mut serial = [0u8; 16];
    OsRng.fill_bytes(&mut serial);

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from(serial.to_vec()));
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(10 * 365);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];
    if signer_id.is_empty() {
        params.is_ca = IsCa::ExplicitNoCa;
    } else {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_identifier_method = KeyIdMethod::PreSpecified(signer_id.as_bytes().to_vec());
    }

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Crypto(format!("certificate generation failed: {}", e)))?;

    Ok(cert.der().as_ref().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::su3::{ContentType, FileType};
    use signature::hazmat::PrehashSigner;
    use signature::SignatureEncoding;

    fn test_rsa_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut OsRng, 2048).unwrap()
    }

    fn reseed_file(sig_type: SigType) -> Su3File {
        let mut file = Su3File::new();
        file.sig_type = sig_type;
        file.file_type = FileType::Zip;
        file.content_type = ContentType::Reseed;
        file.signer_id = b"test@example.org".to_vec();
        file.content = b"some reseed content".to_vec();
        file
    }

    #[test]
    fn test_rsa_sign_and_verify() {
        let key = test_rsa_key();
        let mut file = reseed_file(SigType::RsaSha512);
        file.sign(&key).unwrap();
        assert_eq!(file.signature.len(), 256);

        let cert_der = new_signing_certificate("test@example.org", &key).unwrap();
        let cert = SignerCert::from_der(cert_der).unwrap();
        file.verify_signature(&cert).unwrap();
    }

    #[test]
    fn test_verify_rejects_tampered_content() {
        let key = test_rsa_key();
        let mut file = reseed_file(SigType::RsaSha512);
        file.sign(&key).unwrap();

        let cert = SignerCert::from_der(new_signing_certificate("t@e.org", &key).unwrap()).unwrap();
        file.content[3] ^= 0x01;
        assert!(matches!(
            file.verify_signature(&cert),
            Err(Error::SignatureInvalid)
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let key = test_rsa_key();
        let other = test_rsa_key();
        let mut file = reseed_file(SigType::RsaSha512);
        file.sign(&key).unwrap();

        let cert =
            SignerCert::from_der(new_signing_certificate("other@e.org", &other).unwrap()).unwrap();
        assert!(matches!(
            file.verify_signature(&cert),
            Err(Error::SignatureInvalid)
        ));
    }

    #[test]
    fn test_sign_rejects_non_rsa_type() {
        let key = test_rsa_key();
        let mut file = reseed_file(SigType::DsaSha1);
        assert!(matches!(file.sign(&key), Err(Error::UnknownSigType(0))));
    }

    #[test]
    fn test_family_mismatch_is_unsupported() {
        let key = test_rsa_key();
        let mut file = reseed_file(SigType::RsaSha256);
        file.sign(&key).unwrap();

        // an ECDSA sig type against an RSA public key
        let pk = SignerPublicKey::Rsa(RsaPublicKey::from(&key));
        let signed = file.signed_bytes().unwrap();
        assert!(matches!(
            check_signature(&pk, SigType::EcdsaSha256, &signed, &file.signature),
            Err(Error::UnsupportedAlgorithm)
        ));
    }

    #[test]
    fn test_dsa_verify() {
        let components = dsa::Components::generate(&mut OsRng, dsa::KeySize::DSA_1024_160);
        let signing_key = dsa::SigningKey::generate(&mut OsRng, components);

        let mut file = reseed_file(SigType::DsaSha1);
        let digest = digest_for(SigType::DsaSha1, &file.signed_bytes().unwrap());
        let sig: dsa::Signature = signing_key.sign_prehash(&digest).unwrap();
        file.signature = sig.to_vec();

        // DSA header sigLen is fixed at 40
        let signed = file.signed_bytes().unwrap();
        assert_eq!(u16::from_be_bytes(signed[10..12].try_into().unwrap()), 40);

        let pk = SignerPublicKey::Dsa(signing_key.verifying_key().clone());
        check_signature(&pk, SigType::DsaSha1, &signed, &file.signature).unwrap();

        let mut tampered = signed.clone();
        tampered[crate::su3::HEADER_LEN + 2] ^= 0x01;
        assert!(matches!(
            check_signature(&pk, SigType::DsaSha1, &tampered, &file.signature),
            Err(Error::SignatureInvalid)
        ));
    }

    #[test]
    fn test_ecdsa_p256_verify() {
        let signing_key = p256::ecdsa::SigningKey::random(&mut OsRng);

        let mut file = reseed_file(SigType::EcdsaSha256);
        let digest = digest_for(SigType::EcdsaSha256, &file.signed_bytes().unwrap());
        let sig: p256::ecdsa::Signature = signing_key.sign_prehash(&digest).unwrap();
        file.signature = sig.to_der().as_bytes().to_vec();

        let pk = SignerPublicKey::EcdsaP256(*signing_key.verifying_key());
        let signed = file.signed_bytes().unwrap();
        check_signature(&pk, SigType::EcdsaSha256, &signed, &file.signature).unwrap();

        let mut garbled = file.signature.clone();
        let last = garbled.len() - 1;
        garbled[last] ^= 0xff;
        assert!(check_signature(&pk, SigType::EcdsaSha256, &signed, &garbled).is_err());
    }

    #[test]
    fn test_empty_signer_id_certificate_is_not_ca() {
        let key = test_rsa_key();
        let der = new_signing_certificate("", &key).unwrap();
        let (_, cert) = x509_parser::parse_x509_certificate(&der).unwrap();
        let is_ca = cert
            .basic_constraints()
            .ok()
            .flatten()
            .map(|bc| bc.value.ca)
            .unwrap_or(false);
        assert!(!is_ca);
    }
}
