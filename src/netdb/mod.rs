//! Local network-database reader
//!
//! Scans a directory of router-info files, keeps the ones that are fresh
//! and pass the parser's quality predicates, and hands them to the bundle
//! builder as immutable candidates.
//!
//! Router-info parsing itself is an external concern: the reader only
//! sees an injectable [`RouterInfoFilter`], which makes the engine
//! testable without a real netdb on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;

lazy_static! {
    static ref ROUTER_INFO_NAME: Regex =
        Regex::new(r"^routerInfo-[A-Za-z0-9\-=~]+\.dat$").unwrap();
}

/// Decision made by a [`RouterInfoFilter`] over one router info.
#[derive(Debug)]
pub enum Verdict {
    /// Serve this router info.
    Keep,
    /// Structurally valid but failing a quality predicate
    /// (unreachable, congested, bad version).
    Skip { reason: String },
}

/// Parse-and-judge hook over raw router-info bytes.
///
/// Production deployments delegate to the netdb parser library; an `Err`
/// is a parse failure and should carry whatever remainder detail the
/// parser reports.
pub trait RouterInfoFilter: Send + Sync {
    fn inspect(&self, data: &[u8]) -> Result<Verdict>;
}

/// Filter that keeps every candidate. Used when no parser library is
/// wired in, and by tests.
pub struct AcceptAll;

impl RouterInfoFilter for AcceptAll {
    fn inspect(&self, _data: &[u8]) -> Result<Verdict> {
        Ok(Verdict::Keep)
    }
}

/// One router-info file surviving a scan. Immutable; lives only as long
/// as the rebuild that produced it.
#[derive(Debug, Clone)]
pub struct RouterInfoFile {
    pub name: String,
    pub mod_time: SystemTime,
    pub data: Vec<u8>,
}

/// Reader over a local netdb directory.
#[derive(Clone)]
pub struct LocalNetDb {
    path: PathBuf,
    max_age: Duration,
    filter: Arc<dyn RouterInfoFilter>,
}

impl LocalNetDb {
    pub fn new(
        path: impl Into<PathBuf>,
        max_age: Duration,
        filter: Arc<dyn RouterInfoFilter>,
    ) -> Self {
        LocalNetDb {
            path: path.into(),
            max_age,
            filter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Collect all fresh, acceptable router infos under the netdb path.
    pub fn router_infos(&self) -> Result<Vec<RouterInfoFile>> {
        let mut found = Vec::new();
        self.scan(&self.path, &mut found)?;
        debug!(count = found.len(), path = %self.path.display(), "netdb scan complete");
        Ok(found)
    }

    fn scan(&self, dir: &Path, out: &mut Vec<RouterInfoFile>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "failed to read netdb entry");
                    continue;
                }
            };

            let path = entry.path();
            if path.is_dir() {
                if let Err(e) = self.scan(&path, out) {
                    warn!(path = %path.display(), error = %e, "failed to scan netdb subdirectory");
                }
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if !ROUTER_INFO_NAME.is_match(&name) {
                continue;
            }

            let mod_time = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "no modification time");
                    continue;
                }
            };

            let data = match fs::read(&path) {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read router info");
                    continue;
                }
            };

            // ignore outdated router infos
            let age = SystemTime::now()
                .duration_since(mod_time)
                .unwrap_or(Duration::ZERO);
            if age > self.max_age {
                continue;
            }

            match self.filter.inspect(&data) {
                Ok(Verdict::Keep) => out.push(RouterInfoFile {
                    name,
                    mod_time,
                    data,
                }),
                Ok(Verdict::Skip { reason }) => {
                    debug!(path = %path.display(), reason = %reason, "skipped less-useful router info");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "router info parsing error");
                }
            }
        }

        Ok(())
    }
}
