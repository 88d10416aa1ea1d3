use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::config::{ConfigError, SearchConfig};
use crate::fingerprint::{self, FingerprintError};
use crate::similarity::{CorpusIndex, SelectedMatch};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),
    #[error("Query path has no file name: {0}")]
    NoFileName(PathBuf),
}

/// What happened to one selected match on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Copied,
    AlreadyExists,
    MissingSource,
}

/// Copies matched corpus files into a per-query output directory.
#[derive(Debug, Clone)]
pub struct Exporter {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Exporter {
    pub fn new(source_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Corpus file for an id: `<source>/<first char>/<id>.mid`, else `<source>/<id>.mid`.
    pub fn source_path(&self, id: &str) -> Option<PathBuf> {
        let file_name = format!("{}.mid", id);
        let sharded = id
            .chars()
            .next()
            .map(|c| self.source_dir.join(c.to_string()).join(&file_name));
        sharded
            .into_iter()
            .chain(std::iter::once(self.source_dir.join(&file_name)))
            .find(|p| p.is_file())
    }

    /// `<output>/<query stem>/<rank>_<distance>_<transpose>_<id>.mid`
    pub fn destination_path(&self, query_stem: &str, selected: &SelectedMatch) -> PathBuf {
        self.output_dir.join(query_stem).join(format!(
            "{}_{}_{}_{}.mid",
            selected.rank, selected.distance, selected.transpose, selected.id
        ))
    }

    /// Copy one match. Existing destinations are left untouched.
    pub fn export(&self, query_stem: &str, selected: &SelectedMatch) -> Result<ExportOutcome, std::io::Error> {
        let Some(source) = self.source_path(&selected.id) else {
            log::warn!("Source file for {} not found under {}", selected.id, self.source_dir.display());
            return Ok(ExportOutcome::MissingSource);
        };
        let destination = self.destination_path(query_stem, selected);
        if destination.exists() {
            log::debug!("{} already exists, not overwriting", destination.display());
            return Ok(ExportOutcome::AlreadyExists);
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&source, &destination)?;
        log::debug!("Copied {} -> {}", source.display(), destination.display());
        Ok(ExportOutcome::Copied)
    }
}

/// Result of searching one query file.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub query: PathBuf,
    /// Transpositions that produced a fingerprint.
    pub transpositions: Vec<i8>,
    pub matches: Vec<SelectedMatch>,
    pub copied: usize,
    pub missing: usize,
    pub failed: usize,
}

pub struct SearchSummary {
    pub queries: usize,
    pub searched: usize,
    pub errors: usize,
    pub copied: usize,
}

/// Fingerprint one query file, rank the corpus per transposition, and
/// select (and optionally export) the merged top matches.
///
/// With an exporter, a match whose source file cannot be found or copied
/// is not selected, leaving its id and distance free for later rankings.
pub fn search_file(
    index: &CorpusIndex,
    query: &Path,
    config: &SearchConfig,
    exporter: Option<&Exporter>,
) -> Result<SearchReport, SearchError> {
    let query_stem = query
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| SearchError::NoFileName(query.to_path_buf()))?;

    let params = config.distance_params()?;
    let fingerprints = fingerprint::file_fingerprints(query, &config.fingerprint_options())?;

    let rankings: Vec<_> = fingerprints
        .iter()
        .map(|f| (f.transpose, index.rank(&f.fingerprint, &params)))
        .collect();

    let (mut copied, mut missing, mut failed) = (0, 0, 0);
    let matches = index.merge_top_matches(&rankings, config.top_matches, |candidate| {
        let Some(exporter) = exporter else {
            return true;
        };
        match exporter.export(&query_stem, candidate) {
            Ok(ExportOutcome::Copied) => {
                copied += 1;
                true
            }
            Ok(ExportOutcome::AlreadyExists) => true,
            Ok(ExportOutcome::MissingSource) => {
                missing += 1;
                false
            }
            Err(e) => {
                log::warn!("Failed to export {}: {}", candidate.id, e);
                failed += 1;
                false
            }
        }
    });

    let report = SearchReport {
        query: query.to_path_buf(),
        transpositions: fingerprints.iter().map(|f| f.transpose).collect(),
        matches,
        copied,
        missing,
        failed,
    };

    log::info!(
        "{}: {} matches over {} transpositions",
        query.display(),
        report.matches.len(),
        report.transpositions.len()
    );

    Ok(report)
}

/// Search query files one after another. Per-file failures are logged and
/// counted; the batch continues.
pub fn search_all(
    index: &CorpusIndex,
    queries: &[PathBuf],
    config: &SearchConfig,
    exporter: Option<&Exporter>,
) -> (Vec<SearchReport>, SearchSummary) {
    let pb = ProgressBar::new(queries.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut summary = SearchSummary {
        queries: queries.len(),
        searched: 0,
        errors: 0,
        copied: 0,
    };
    let mut reports = Vec::new();

    for query in queries {
        pb.set_message(
            query
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        match search_file(index, query, config, exporter) {
            Ok(report) => {
                summary.searched += 1;
                summary.copied += report.copied;
                reports.push(report);
            }
            Err(e) => {
                log::warn!("Error searching {}: {}", query.display(), e);
                summary.errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!(
        "Done: {} searched, {} errors, {} files copied",
        summary.searched, summary.errors, summary.copied
    ));

    (reports, summary)
}
