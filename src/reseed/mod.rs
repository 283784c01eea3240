//! Reseed engine
//!
//! Owns the cache of pre-built bundles, drives the periodic rebuild, and
//! maps requesting peers onto bundles deterministically.
//!
//! The cache is a single snapshot slot: readers clone an `Arc` to the
//! current snapshot and never block the rebuild; a successful rebuild
//! swaps in a fully built replacement. A failed rebuild keeps the old
//! snapshot serving.

pub mod bundle;

pub use bundle::{auto_bundle_count, build_bundles, unzip_seeds, zip_seeds};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::netdb::LocalNetDb;

/// Default router infos per bundle.
pub const DEFAULT_NUM_RI: usize = 77;

/// Default interval between cache rebuilds.
pub const DEFAULT_REBUILD_INTERVAL: Duration = Duration::from_secs(90 * 3600);

/// A requesting peer, identified by its remote address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer(String);

impl Peer {
    pub fn new(addr: impl Into<String>) -> Self {
        Peer(addr.into())
    }

    /// Deterministic fingerprint: SHA-256 of the address, then CRC32 of
    /// the hash. The CRC step is kept so the peer-to-bundle mapping stays
    /// stable across implementations.
    pub fn fingerprint(&self) -> usize {
        let digest = Sha256::digest(self.0.as_bytes());
        crc32fast::hash(&digest) as usize
    }
}

/// The reseed engine.
pub struct Reseeder {
    netdb: LocalNetDb,
    cache: RwLock<Arc<Vec<Bytes>>>,
    rebuild_gate: tokio::sync::Mutex<()>,

    signing_key: RsaPrivateKey,
    signer_id: Vec<u8>,
    num_ri: usize,
    num_su3: usize,
    rebuild_interval: Duration,
}

impl Reseeder {
    pub fn new(netdb: LocalNetDb, signer_id: Vec<u8>, signing_key: RsaPrivateKey) -> Self {
        Reseeder {
            netdb,
            cache: RwLock::new(Arc::new(Vec::new())),
            rebuild_gate: tokio::sync::Mutex::new(()),
            signing_key,
            signer_id,
            num_ri: DEFAULT_NUM_RI,
            num_su3: 0,
            rebuild_interval: DEFAULT_REBUILD_INTERVAL,
        }
    }

    pub fn with_num_ri(mut self, num_ri: usize) -> Self {
        self.num_ri = num_ri;
        self
    }

    /// Bundle count per rebuild; 0 selects automatically from the
    /// candidate-set size.
    pub fn with_num_su3(mut self, num_su3: usize) -> Self {
        self.num_su3 = num_su3;
        self
    }

    pub fn with_rebuild_interval(mut self, interval: Duration) -> Self {
        self.rebuild_interval = interval;
        self
    }

    /// Start the rebuild loop: one initial rebuild (errors logged, the
    /// engine keeps running), then one per `rebuild_interval` until the
    /// shutdown channel fires.
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();

        tokio::spawn(async move {
            if let Err(e) = engine.rebuild().await {
                error!(error = %e, "initial rebuild failed");
            }

            let mut ticker = tokio::time::interval(engine.rebuild_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // the first tick completes immediately

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = engine.rebuild().await {
                            error!(error = %e, "rebuild failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("reseed engine stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Rebuild the bundle cache from the netdb. Single-flighted: a call
    /// overlapping a running rebuild is skipped.
    pub async fn rebuild(&self) -> Result<()> {
        let _gate = match self.rebuild_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                warn!("rebuild already in progress, skipping");
                return Ok(());
            }
        };

        info!("rebuilding su3 cache");

        let netdb = self.netdb.clone();
        let mut candidates = tokio::task::spawn_blocking(move || netdb.router_infos())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        // use only 75% of the router infos
        let candidates = candidates.split_off(candidates.len() / 4);

        if candidates.len() < self.num_ri {
            return Err(Error::InsufficientCandidates {
                have: candidates.len(),
                need: self.num_ri,
            });
        }

        let num_ri = self.num_ri;
        let num_su3 = self.num_su3;
        let signer_id = self.signer_id.clone();
        let signing_key = self.signing_key.clone();

        let bundles = tokio::task::spawn_blocking(move || {
            bundle::build_bundles(&candidates, num_ri, num_su3, &signer_id, &signing_key)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        self.install(bundles);
        info!("done rebuilding");

        Ok(())
    }

    /// The bundle served to `peer` from the current snapshot.
    pub fn peer_bundle(&self, peer: &Peer) -> Result<Bytes> {
        let snapshot = self.cache.read().clone();
        if snapshot.is_empty() {
            return Err(Error::NotAvailable);
        }

        Ok(snapshot[peer.fingerprint() % snapshot.len()].clone())
    }

    pub fn bundle_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Swap in a prebuilt snapshot. Readers observe either the previous
    /// snapshot or this one, never a partial state.
    pub(crate) fn install(&self, bundles: Vec<Bytes>) {
        *self.cache.write() = Arc::new(bundles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netdb::AcceptAll;
    use rand::rngs::OsRng;
    use std::fs;

    fn test_engine(dir: &std::path::Path, num_ri: usize) -> Reseeder {
        let netdb = LocalNetDb::new(dir, Duration::from_secs(3600), Arc::new(AcceptAll));
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        Reseeder::new(netdb, b"test@example.org".to_vec(), key).with_num_ri(num_ri)
    }

    fn write_router_infos(dir: &std::path::Path, n: usize) {
        for i in 0..n {
            fs::write(
                dir.join(format!("routerInfo-seed{}.dat", i)),
                format!("payload {}", i),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Peer::new("192.0.2.7");
        let b = Peer::new("192.0.2.7");
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = Peer::new("192.0.2.8");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_empty_cache_is_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path(), 10);
        assert!(matches!(
            engine.peer_bundle(&Peer::new("192.0.2.1")),
            Err(Error::NotAvailable)
        ));
    }

    #[test]
    fn test_peer_maps_to_stable_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path(), 10);
        engine.install(vec![
            Bytes::from_static(b"bundle-0"),
            Bytes::from_static(b"bundle-1"),
            Bytes::from_static(b"bundle-2"),
        ]);

        let peer = Peer::new("203.0.113.20");
        let first = engine.peer_bundle(&peer).unwrap();
        for _ in 0..10 {
            assert_eq!(engine.peer_bundle(&peer).unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_rebuild_fails_with_insufficient_candidates() {
        let dir = tempfile::tempdir().unwrap();
        write_router_infos(dir.path(), 5);

        let engine = test_engine(dir.path(), 10);
        assert!(matches!(
            engine.rebuild().await,
            Err(Error::InsufficientCandidates { have: 4, need: 10 })
        ));
        // previous (empty) cache is retained
        assert_eq!(engine.bundle_count(), 0);
        assert!(matches!(
            engine.peer_bundle(&Peer::new("192.0.2.1")),
            Err(Error::NotAvailable)
        ));
    }

    #[tokio::test]
    async fn test_rebuild_populates_cache() {
        let dir = tempfile::tempdir().unwrap();
        write_router_infos(dir.path(), 20);

        // 20 candidates thin to 15 after the leading-quarter drop
        let engine = test_engine(dir.path(), 5).with_num_su3(4);
        engine.rebuild().await.unwrap();
        assert_eq!(engine.bundle_count(), 4);

        let bundle = engine.peer_bundle(&Peer::new("192.0.2.1")).unwrap();
        let file = crate::su3::Su3File::from_bytes(&bundle).unwrap();
        assert_eq!(file.content_type, crate::su3::ContentType::Reseed);
    }

    #[tokio::test]
    async fn test_rebuild_auto_sizes_cache() {
        let dir = tempfile::tempdir().unwrap();
        write_router_infos(dir.path(), 100);

        let engine = test_engine(dir.path(), 10);
        engine.rebuild().await.unwrap();
        assert_eq!(engine.bundle_count(), 50);
    }

    #[tokio::test]
    async fn test_rebuild_is_single_flighted() {
        let dir = tempfile::tempdir().unwrap();
        write_router_infos(dir.path(), 20);

        let engine = test_engine(dir.path(), 5);
        let _gate = engine.rebuild_gate.try_lock().unwrap();

        // overlapping rebuild is skipped, not queued
        engine.rebuild().await.unwrap();
        assert_eq!(engine.bundle_count(), 0);
    }

    #[test]
    fn test_snapshot_swap_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(test_engine(dir.path(), 10));
        engine.install(vec![Bytes::from_static(b"snapshot-a")]);

        let readers: Vec<_> = (0..4)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let peer = Peer::new(format!("198.51.100.{}", i));
                    for _ in 0..2000 {
                        let got = engine.peer_bundle(&peer).unwrap();
                        assert!(
                            got == Bytes::from_static(b"snapshot-a")
                                || got == Bytes::from_static(b"snapshot-b"),
                            "reader observed a committed snapshot"
                        );
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            engine.install(vec![Bytes::from_static(b"snapshot-b")]);
            engine.install(vec![Bytes::from_static(b"snapshot-a")]);
        }

        for r in readers {
            r.join().unwrap();
        }
    }
}
