//! Bundle building
//!
//! Turns a candidate set into many overlapping reseed bundles: sample
//! `num_ri` router infos per bundle, pack them into a deflate archive,
//! wrap the archive in a signed SU3 file, and marshal to bytes.
//!
//! The pipeline is one seed producer feeding three builder workers, with
//! a fan-in collector draining the results. Signing is CPU-bound, so the
//! whole pipeline runs on plain threads; the engine drives it from a
//! blocking task.

use std::io::{Cursor, Read, Write};
use std::thread;
use std::time::SystemTime;

use bytes::Bytes;
use crossbeam_channel as channel;
use rand::seq::index;
use rsa::RsaPrivateKey;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::Result;
use crate::netdb::RouterInfoFile;
use crate::su3::{ContentType, FileType, Su3File};

/// Builder workers consuming seed sets in parallel.
const NUM_BUILDERS: usize = 3;

/// Bundle count for a candidate-set size when not configured explicitly.
/// The tiers keep each bundle a thin slice of the netdb.
pub fn auto_bundle_count(candidates: usize) -> usize {
    match candidates {
        n if n > 4000 => 300,
        n if n > 3000 => 200,
        n if n > 2000 => 100,
        n if n > 1000 => 75,
        _ => 50,
    }
}

/// Build `num_su3` marshaled bundles (0 = auto) of `num_ri` router infos
/// each. Bundles that fail to build are logged and skipped.
///
/// Callers must ensure `candidates.len() >= num_ri`.
pub fn build_bundles(
    candidates: &[RouterInfoFile],
    num_ri: usize,
    num_su3: usize,
    signer_id: &[u8],
    signing_key: &RsaPrivateKey,
) -> Vec<Bytes> {
    let num_su3 = if num_su3 != 0 {
        num_su3
    } else {
        auto_bundle_count(candidates.len())
    };

    info!(
        bundles = num_su3,
        per_bundle = num_ri,
        candidates = candidates.len(),
        "building su3 bundles"
    );

    let (seed_tx, seed_rx) = channel::bounded::<Vec<usize>>(NUM_BUILDERS);
    let (out_tx, out_rx) = channel::unbounded::<Bytes>();

    thread::scope(|s| {
        s.spawn(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..num_su3 {
                let picks = index::sample(&mut rng, candidates.len(), num_ri).into_vec();
                if seed_tx.send(picks).is_err() {
                    break;
                }
            }
        });

        for _ in 0..NUM_BUILDERS {
            let seed_rx = seed_rx.clone();
            let out_tx = out_tx.clone();
            s.spawn(move || {
                for picks in seed_rx {
                    let seeds: Vec<&RouterInfoFile> =
                        picks.iter().map(|&i| &candidates[i]).collect();
                    match build_one(&seeds, signer_id, signing_key) {
                        Ok(bundle) => {
                            let _ = out_tx.send(bundle);
                        }
                        Err(e) => warn!(error = %e, "failed to build bundle"),
                    }
                }
            });
        }
        drop(seed_rx);
        drop(out_tx);

        out_rx.iter().collect()
    })
}

fn build_one(
    seeds: &[&RouterInfoFile],
    signer_id: &[u8],
    signing_key: &RsaPrivateKey,
) -> Result<Bytes> {
    let mut su3 = Su3File::new();
    su3.file_type = FileType::Zip;
    su3.content_type = ContentType::Reseed;
    su3.content = zip_seeds(seeds)?;
    su3.signer_id = signer_id.to_vec();
    su3.sign(signing_key)?;

    Ok(Bytes::from(su3.to_bytes()?))
}

/// Pack router infos into a deflate zip archive, one entry per seed,
/// preserving names and modification times.
pub fn zip_seeds(seeds: &[&RouterInfoFile]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for seed in seeds {
        let mtime = time::OffsetDateTime::from(seed.mod_time);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::try_from(mtime).unwrap_or_default());

        writer
            .start_file(seed.name.as_str(), options)
            .map_err(std::io::Error::from)?;
        writer.write_all(&seed.data)?;
    }

    let cursor = writer.finish().map_err(std::io::Error::from)?;
    Ok(cursor.into_inner())
}

/// Unpack a reseed archive back into named router infos.
pub fn unzip_seeds(data: &[u8]) -> Result<Vec<RouterInfoFile>> {
    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(std::io::Error::from)?;

    let mut seeds = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(std::io::Error::from)?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;

        let mod_time = entry
            .last_modified()
            .and_then(|dt| time::OffsetDateTime::try_from(dt).ok())
            .map(SystemTime::from)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        seeds.push(RouterInfoFile {
            name: entry.name().to_string(),
            mod_time,
            data,
        });
    }

    Ok(seeds)
}
