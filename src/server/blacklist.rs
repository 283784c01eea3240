//! IP blacklist
//!
//! A thread-safe deny set consulted by the accept loops before any
//! request handling. Single writer, many readers.

use std::collections::HashSet;
use std::path::Path;

use parking_lot::RwLock;
use tracing::info;

use crate::error::Result;

#[derive(Default)]
pub struct Blacklist {
    blocked: RwLock<HashSet<String>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block a single IP address.
    pub fn block(&self, ip: impl Into<String>) {
        let ip = ip.into();
        if ip.is_empty() {
            return;
        }
        self.blocked.write().insert(ip);
    }

    /// Load a blacklist file: one IP per line, blank lines ignored.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let mut count = 0usize;
        for line in content.lines() {
            let ip = line.trim();
            if ip.is_empty() {
                continue;
            }
            self.block(ip);
            count += 1;
        }

        info!(count, path = %path.display(), "loaded blacklist");
        Ok(())
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.blocked.read().contains(ip)
    }

    pub fn len(&self) -> usize {
        self.blocked.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.read().is_empty()
    }
}
