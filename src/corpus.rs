use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::{self, Fingerprint, FingerprintOptions};
use crate::scanner::{self, ScanError};

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot format error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// One snapshot record: an identifier and its token counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: String,
    pub tokens: Vec<(u32, f64)>,
}

impl CorpusEntry {
    pub fn new(id: impl Into<String>, fingerprint: &Fingerprint) -> Self {
        Self {
            id: id.into(),
            tokens: fingerprint.iter().collect(),
        }
    }
}

pub struct IndexResult {
    pub scanned: usize,
    pub indexed: usize,
    pub failed: usize,
    pub duplicates: usize,
}

pub fn load_snapshot(path: &Path) -> Result<Vec<CorpusEntry>, CorpusError> {
    let reader = BufReader::new(File::open(path)?);
    let entries: Vec<CorpusEntry> = serde_json::from_reader(reader)?;
    log::info!("Loaded {} corpus entries from {}", entries.len(), path.display());
    Ok(entries)
}

pub fn save_snapshot(path: &Path, entries: &[CorpusEntry]) -> Result<(), CorpusError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, entries)?;
    log::info!("Saved {} corpus entries to {}", entries.len(), path.display());
    Ok(())
}

/// Turn snapshot records into fingerprints ready for indexing.
///
/// Entries left with no tokens (drum-only files when drums are omitted)
/// are dropped rather than kept as empty rows.
pub fn load_signatures(
    entries: &[CorpusEntry],
    omit_drums: bool,
    counts_to_ratios: bool,
) -> Vec<(String, Fingerprint)> {
    let mut dropped = 0;
    let signatures: Vec<(String, Fingerprint)> = entries
        .iter()
        .filter_map(|entry| {
            let mut fp = Fingerprint::from_counts(entry.tokens.iter().copied());
            if omit_drums {
                fp = fp.without_drums();
            }
            if counts_to_ratios {
                fp = fp.into_ratios();
            }
            if fp.is_empty() {
                dropped += 1;
                return None;
            }
            Some((entry.id.clone(), fp))
        })
        .collect();

    if dropped > 0 {
        log::debug!("Dropped {} corpus entries with no usable tokens", dropped);
    }
    signatures
}

/// Corpus identifier for a file: its stem.
pub fn file_id(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// Fingerprint every MIDI file under `dirs` using `jobs` worker threads.
///
/// Only the untransposed fingerprint is stored. Queries must be built with
/// the same chord repair catalogue for distances to be meaningful; see
/// `SearchConfig::index_options`.
pub fn build_corpus(
    dirs: &[PathBuf],
    jobs: usize,
    options: &FingerprintOptions,
) -> Result<(Vec<CorpusEntry>, IndexResult), CorpusError> {
    let files = scanner::discover(dirs)?;

    println!("Indexing {} MIDI files...", files.len());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;

    let results: Vec<Option<CorpusEntry>> = pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                let entry = index_file(path, options);
                pb.inc(1);
                entry
            })
            .collect()
    });

    let mut result = IndexResult {
        scanned: files.len(),
        indexed: 0,
        failed: 0,
        duplicates: 0,
    };
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(results.len());
    for entry in results {
        match entry {
            Some(entry) if !seen.insert(entry.id.clone()) => {
                log::warn!("Duplicate corpus id {}, keeping the first", entry.id);
                result.duplicates += 1;
            }
            Some(entry) => {
                result.indexed += 1;
                entries.push(entry);
            }
            None => result.failed += 1,
        }
    }

    pb.finish_with_message(format!(
        "Done: {} indexed, {} failed, {} duplicates",
        result.indexed, result.failed, result.duplicates
    ));

    Ok((entries, result))
}

fn index_file(path: &Path, options: &FingerprintOptions) -> Option<CorpusEntry> {
    let id = file_id(path)?;
    match fingerprint::file_fingerprints(path, options) {
        Ok(fps) => fps
            .into_iter()
            .find(|f| f.transpose == 0)
            .map(|f| CorpusEntry::new(id, &f.fingerprint)),
        Err(e) => {
            log::warn!("Skipping {}: {}", path.display(), e);
            None
        }
    }
}
