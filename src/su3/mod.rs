//! SU3 signed container codec
//!
//! SU3 files are cryptographically signed containers used to distribute
//! router updates, plugins, reseed bundles and other network components.
//! The layout is a fixed 40-byte big-endian header followed by four
//! variable trailers: version, signer id, content, signature.
//!
//! Encoding and decoding perform no cryptographic validation; signing and
//! verification live in [`crypto`].

mod crypto;

pub use crypto::{new_signing_certificate, SignerCert, SignerPublicKey};

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Magic bytes every SU3 file starts with.
pub const MAGIC: &[u8; 6] = b"I2Psu3";

/// Fixed header length up to the first variable trailer.
pub const HEADER_LEN: usize = 40;

/// Version fields shorter than this are zero-padded on encode.
pub const MIN_VERSION_LEN: usize = 16;

/// Signature algorithm and hash combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigType {
    DsaSha1,
    EcdsaSha256,
    EcdsaSha384,
    EcdsaSha512,
    RsaSha256,
    RsaSha384,
    RsaSha512,
}

impl SigType {
    pub fn code(self) -> u16 {
        match self {
            SigType::DsaSha1 => 0,
            SigType::EcdsaSha256 => 1,
            SigType::EcdsaSha384 => 2,
            SigType::EcdsaSha512 => 3,
            SigType::RsaSha256 => 4,
            SigType::RsaSha384 => 5,
            SigType::RsaSha512 => 6,
        }
    }

    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            0 => Ok(SigType::DsaSha1),
            1 => Ok(SigType::EcdsaSha256),
            2 => Ok(SigType::EcdsaSha384),
            3 => Ok(SigType::EcdsaSha512),
            4 => Ok(SigType::RsaSha256),
            5 => Ok(SigType::RsaSha384),
            6 => Ok(SigType::RsaSha512),
            other => Err(Error::UnknownSigType(other)),
        }
    }

    pub fn is_rsa(self) -> bool {
        matches!(
            self,
            SigType::RsaSha256 | SigType::RsaSha384 | SigType::RsaSha512
        )
    }

    /// Header `sigLen` for this algorithm. RSA lengths follow the actual
    /// key size; `rsa_len` is the signature length when already known.
    pub fn signature_len(self, rsa_len: Option<usize>) -> u16 {
        match self {
            SigType::DsaSha1 => 40,
            SigType::EcdsaSha256 => 256,
            SigType::EcdsaSha384 => 384,
            SigType::EcdsaSha512 => 512,
            SigType::RsaSha256 | SigType::RsaSha384 | SigType::RsaSha512 => {
                rsa_len.map(|n| n as u16).unwrap_or(256)
            }
        }
    }
}

/// Format of the contained payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Zip,
    Xml,
    Html,
    XmlGz,
    TxtGz,
    Dmg,
    Exe,
}

impl FileType {
    pub fn code(self) -> u8 {
        match self {
            FileType::Zip => 0,
            FileType::Xml => 1,
            FileType::Html => 2,
            FileType::XmlGz => 3,
            FileType::TxtGz => 4,
            FileType::Dmg => 5,
            FileType::Exe => 6,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(FileType::Zip),
            1 => Ok(FileType::Xml),
            2 => Ok(FileType::Html),
            3 => Ok(FileType::XmlGz),
            4 => Ok(FileType::TxtGz),
            5 => Ok(FileType::Dmg),
            6 => Ok(FileType::Exe),
            other => Err(Error::Parse(format!("unknown SU3 file type: {}", other))),
        }
    }
}

/// Purpose of the contained payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Unknown,
    Router,
    Plugin,
    Reseed,
    News,
    Blocklist,
}

impl ContentType {
    pub fn code(self) -> u8 {
        match self {
            ContentType::Unknown => 0,
            ContentType::Router => 1,
            ContentType::Plugin => 2,
            ContentType::Reseed => 3,
            ContentType::News => 4,
            ContentType::Blocklist => 5,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ContentType::Unknown),
            1 => Ok(ContentType::Router),
            2 => Ok(ContentType::Plugin),
            3 => Ok(ContentType::Reseed),
            4 => Ok(ContentType::News),
            5 => Ok(ContentType::Blocklist),
            other => Err(Error::Parse(format!("unknown SU3 content type: {}", other))),
        }
    }
}

/// A complete SU3 file.
///
/// Created by a builder, exclusively owned until marshaled. The signed
/// portion is everything except the trailing signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Su3File {
    pub format: u8,
    pub sig_type: SigType,
    pub file_type: FileType,
    pub content_type: ContentType,
    pub version: Vec<u8>,
    pub signer_id: Vec<u8>,
    pub content: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Su3File {
    /// New SU3 file with RSA/SHA-512 signing and a Unix-seconds version.
    pub fn new() -> Self {
        let version = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string()
            .into_bytes();

        Su3File {
            format: 0,
            sig_type: SigType::RsaSha512,
            file_type: FileType::Zip,
            content_type: ContentType::Unknown,
            version,
            signer_id: Vec::new(),
            content: Vec::new(),
            signature: Vec::new(),
        }
    }

    /// The signed portion: header plus version, signer id and content.
    ///
    /// The version is zero-padded to [`MIN_VERSION_LEN`] in the output;
    /// the value itself is never mutated.
    pub fn signed_bytes(&self) -> Result<Vec<u8>> {
        if self.version.len() > u8::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "version field too long: {} bytes",
                self.version.len()
            )));
        }
        if self.signer_id.len() > u8::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "signer id too long: {} bytes",
                self.signer_id.len()
            )));
        }

        let version_len = self.version.len().max(MIN_VERSION_LEN);
        let sig_len = self.sig_type.signature_len(if self.signature.is_empty() {
            None
        } else {
            Some(self.signature.len())
        });

        let mut buf =
            Vec::with_capacity(HEADER_LEN + version_len + self.signer_id.len() + self.content.len());

        buf.extend_from_slice(MAGIC);
        buf.push(0);
        buf.push(self.format);
        buf.extend_from_slice(&self.sig_type.code().to_be_bytes());
        buf.extend_from_slice(&sig_len.to_be_bytes());
        buf.push(0);
        buf.push(version_len as u8);
        buf.push(0);
        buf.push(self.signer_id.len() as u8);
        buf.extend_from_slice(&(self.content.len() as u64).to_be_bytes());
        buf.push(0);
        buf.push(self.file_type.code());
        buf.push(0);
        buf.push(self.content_type.code());
        buf.extend_from_slice(&[0u8; 12]);

        buf.extend_from_slice(&self.version);
        buf.resize(HEADER_LEN + version_len, 0);
        buf.extend_from_slice(&self.signer_id);
        buf.extend_from_slice(&self.content);

        Ok(buf)
    }

    /// Serialize the complete file, signature last.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.signature.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot marshal an unsigned SU3 file".into(),
            ));
        }

        let mut buf = self.signed_bytes()?;
        buf.extend_from_slice(&self.signature);
        Ok(buf)
    }

    /// Deserialize an SU3 file. Performs structural validation only.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = data;

        let magic = take(&mut r, 6, "magic")?;
        if magic != MAGIC {
            return Err(Error::Parse("bad SU3 magic".into()));
        }
        take(&mut r, 1, "header")?;
        let format = take(&mut r, 1, "format")?[0];
        let sig_type = SigType::from_code(read_u16(take(&mut r, 2, "sigType")?))?;
        let sig_len = read_u16(take(&mut r, 2, "sigLen")?) as usize;
        take(&mut r, 1, "header")?;
        let version_len = take(&mut r, 1, "versionLen")?[0] as usize;
        take(&mut r, 1, "header")?;
        let signer_id_len = take(&mut r, 1, "signerIdLen")?[0] as usize;
        let content_len = read_u64(take(&mut r, 8, "contentLen")?) as usize;
        take(&mut r, 1, "header")?;
        let file_type = FileType::from_code(take(&mut r, 1, "fileType")?[0])?;
        take(&mut r, 1, "header")?;
        let content_type = ContentType::from_code(take(&mut r, 1, "contentType")?[0])?;
        take(&mut r, 12, "header")?;

        if version_len < MIN_VERSION_LEN {
            return Err(Error::Parse(format!(
                "SU3 version field shorter than {} bytes: {}",
                MIN_VERSION_LEN, version_len
            )));
        }
        if sig_len == 0 {
            return Err(Error::Parse("SU3 signature of zero length".into()));
        }

        let version = take(&mut r, version_len, "version")?.to_vec();
        let signer_id = take(&mut r, signer_id_len, "signerId")?.to_vec();
        let content = take(&mut r, content_len, "content")?.to_vec();
        let signature = take(&mut r, sig_len, "signature")?.to_vec();

        Ok(Su3File {
            format,
            sig_type,
            file_type,
            content_type,
            version,
            signer_id,
            content,
            signature,
        })
    }

    /// Version with trailing zero padding trimmed, for display.
    pub fn version_string(&self) -> String {
        let end = self
            .version
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        String::from_utf8_lossy(&self.version[..end]).into_owned()
    }
}

impl Default for Su3File {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Su3File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---------------------------")?;
        writeln!(f, "Format: {}", self.format)?;
        writeln!(f, "SignatureType: {:?}", self.sig_type)?;
        writeln!(f, "FileType: {:?}", self.file_type)?;
        writeln!(f, "ContentType: {:?}", self.content_type)?;
        writeln!(f, "Version: {:?}", self.version_string())?;
        writeln!(
            f,
            "SignerId: {:?}",
            String::from_utf8_lossy(&self.signer_id)
        )?;
        write!(f, "---------------------------")
    }
}

fn take<'a>(data: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8]> {
    if data.len() < n {
        return Err(Error::Parse(format!("truncated SU3 file: missing {}", what)));
    }
    let (head, tail) = data.split_at(n);
    *data = tail;
    Ok(head)
}

fn read_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn read_u64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> Su3File {
        Su3File {
            format: 0,
            sig_type: SigType::RsaSha512,
            file_type: FileType::Zip,
            content_type: ContentType::Reseed,
            version: b"1700000000".to_vec(),
            signer_id: b"test@example.org".to_vec(),
            content: b"payload bytes".to_vec(),
            signature: vec![0xab; 256],
        }
    }

    #[test]
    fn test_header_alignment() {
        let file = sample_file();
        let bytes = file.to_bytes().unwrap();

        assert_eq!(&bytes[0..6], MAGIC);
        // contentLen starts at offset 16
        assert_eq!(
            u64::from_be_bytes(bytes[16..24].try_into().unwrap()),
            file.content.len() as u64
        );
        // contentType at 27, followed by the 12-byte reserved block
        assert_eq!(bytes[27], ContentType::Reseed.code());
        assert_eq!(&bytes[28..40], &[0u8; 12]);
        assert_eq!(bytes[25], FileType::Zip.code());
    }

    #[test]
    fn test_round_trip() {
        let file = sample_file();
        let decoded = Su3File::from_bytes(&file.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.format, file.format);
        assert_eq!(decoded.sig_type, file.sig_type);
        assert_eq!(decoded.file_type, file.file_type);
        assert_eq!(decoded.content_type, file.content_type);
        assert_eq!(decoded.signer_id, file.signer_id);
        assert_eq!(decoded.content, file.content);
        assert_eq!(decoded.signature, file.signature);
        // version comes back zero-padded to the minimum length
        assert_eq!(decoded.version.len(), MIN_VERSION_LEN);
        assert_eq!(&decoded.version[..10], &file.version[..]);
        assert_eq!(decoded.version_string(), "1700000000");
    }

    #[test]
    fn test_version_padding_length() {
        for version in [&b"1"[..], &b"1700000000"[..], &[b'x'; 20][..]] {
            let mut file = sample_file();
            file.version = version.to_vec();
            let decoded = Su3File::from_bytes(&file.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded.version.len(), version.len().max(MIN_VERSION_LEN));
        }
    }

    #[test]
    fn test_signed_bytes_exclude_signature() {
        let file = sample_file();
        let mut other = file.clone();
        other.signature = vec![0xcd; 256];
        assert_eq!(
            file.signed_bytes().unwrap(),
            other.signed_bytes().unwrap()
        );

        let mut tampered = file.clone();
        tampered.content[0] ^= 1;
        assert_ne!(
            file.signed_bytes().unwrap(),
            tampered.signed_bytes().unwrap()
        );
    }

    #[test]
    fn test_emitted_length_rsa_2048() {
        // scenario: RSA/SHA-512 with a 2048-bit key
        let file = sample_file();
        let bytes = file.to_bytes().unwrap();

        assert_eq!(u16::from_be_bytes(bytes[10..12].try_into().unwrap()), 256);
        assert_eq!(
            bytes.len(),
            HEADER_LEN + 16 + file.signer_id.len() + file.content.len() + 256
        );
    }

    #[test]
    fn test_unsigned_marshal_rejected() {
        let mut file = sample_file();
        file.signature.clear();
        assert!(matches!(
            file.to_bytes(),
            Err(crate::error::Error::InvalidArgument(_))
        ));
        // the pre-sign header still reports the RSA default length
        let signed = file.signed_bytes().unwrap();
        assert_eq!(u16::from_be_bytes(signed[10..12].try_into().unwrap()), 256);
    }

    #[test]
    fn test_oversize_version_rejected() {
        let mut file = sample_file();
        file.version = vec![b'9'; 300];
        assert!(matches!(
            file.signed_bytes(),
            Err(crate::error::Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = sample_file().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            Su3File::from_bytes(&bytes),
            Err(crate::error::Error::Parse(_))
        ));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = sample_file().to_bytes().unwrap();
        assert!(Su3File::from_bytes(&bytes[..HEADER_LEN - 1]).is_err());
        assert!(Su3File::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_sig_type() {
        let mut bytes = sample_file().to_bytes().unwrap();
        bytes[8] = 0xff;
        assert!(matches!(
            Su3File::from_bytes(&bytes),
            Err(crate::error::Error::UnknownSigType(_))
        ));
    }

    #[test]
    fn test_sig_len_per_type() {
        assert_eq!(SigType::DsaSha1.signature_len(None), 40);
        assert_eq!(SigType::EcdsaSha256.signature_len(None), 256);
        assert_eq!(SigType::EcdsaSha384.signature_len(None), 384);
        assert_eq!(SigType::EcdsaSha512.signature_len(None), 512);
        assert_eq!(SigType::RsaSha512.signature_len(None), 256);
        assert_eq!(SigType::RsaSha512.signature_len(Some(512)), 512);
    }
}
