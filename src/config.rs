//! Configuration module for Seedium
//!
//! JSON configuration with sensible defaults for every tunable; only the
//! netdb directory is mandatory. Durations are written as strings such
//! as `"72h"`, `"30m"` or `"90s"`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory scanned for router-info files
    pub netdb_dir: PathBuf,

    /// Clearnet listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Optional path prefix for the bundle endpoint
    #[serde(default)]
    pub prefix: String,

    /// Signer identity embedded in generated bundles
    #[serde(default)]
    pub signer_id: String,

    /// PEM RSA private key used to sign bundles
    #[serde(default = "default_signing_key_file")]
    pub signing_key_file: PathBuf,

    /// Certificate store base directory
    #[serde(default = "default_keystore_dir")]
    pub keystore_dir: PathBuf,

    /// Optional blacklist file, one IP per line
    #[serde(default)]
    pub blacklist_file: Option<PathBuf>,

    /// TLS identity for the clearnet listener
    #[serde(default)]
    pub tls: Option<TlsFiles>,

    /// Maximum router-info age accepted from the netdb
    #[serde(default = "default_max_age", with = "duration_str")]
    pub max_age: Duration,

    /// Interval between cache rebuilds
    #[serde(default = "default_rebuild_interval", with = "duration_str")]
    pub rebuild_interval: Duration,

    /// Router infos per bundle
    #[serde(default = "default_num_ri")]
    pub num_ri: usize,

    /// Bundles per rebuild; 0 selects automatically
    #[serde(default)]
    pub num_su3: usize,

    /// Hourly per-IP budget on the bundle endpoint
    #[serde(default = "default_ratelimit")]
    pub ratelimit: u32,

    /// Hourly per-IP budget on the browse surface
    #[serde(default = "default_ratelimit_web")]
    pub ratelimit_web: u32,

    /// Take the client IP from X-Forwarded-For. Only enable behind a
    /// trusted reverse proxy.
    #[serde(default)]
    pub trust_proxy: bool,
}

/// TLS certificate and key file pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFiles {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Config {
            netdb_dir: PathBuf::from("/var/lib/i2pd/netDb"),
            listen: default_listen(),
            prefix: String::new(),
            signer_id: "you@mail.i2p".to_string(),
            signing_key_file: default_signing_key_file(),
            keystore_dir: default_keystore_dir(),
            blacklist_file: None,
            tls: None,
            max_age: default_max_age(),
            rebuild_interval: default_rebuild_interval(),
            num_ri: default_num_ri(),
            num_su3: 0,
            ratelimit: default_ratelimit(),
            ratelimit_web: default_ratelimit_web(),
            trust_proxy: false,
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_signing_key_file() -> PathBuf {
    PathBuf::from("reseed_private.pem")
}

fn default_keystore_dir() -> PathBuf {
    PathBuf::from("keystore")
}

fn default_max_age() -> Duration {
    Duration::from_secs(72 * 3600)
}

fn default_rebuild_interval() -> Duration {
    Duration::from_secs(90 * 3600)
}

fn default_num_ri() -> usize {
    77
}

fn default_ratelimit() -> u32 {
    4
}

fn default_ratelimit_web() -> u32 {
    40
}

/// Parse a duration string with an `h`, `m` or `s` suffix.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let multiplier = if s.ends_with('h') {
        3600
    } else if s.ends_with('m') {
        60
    } else if s.ends_with('s') {
        1
    } else {
        return Err(Error::Config(format!(
            "invalid duration {:?}: expected a number with an h, m or s suffix",
            s
        )));
    };
    let value: u64 = s[..s.len() - 1]
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration {:?}", s)))?;
    Ok(Duration::from_secs(value * multiplier))
}

fn format_duration(d: &Duration) -> String {
    let secs = d.as_secs();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

mod duration_str {
    use super::{format_duration, parse_duration};
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(de::Error::custom)
    }
}
