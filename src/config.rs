use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::chords::Catalogue;
use crate::fingerprint::{FingerprintOptions, MAX_TRANSPOSE};
use crate::similarity::DistanceParams;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("distance_exponent must be a finite number above 0, got {0}")]
    InvalidExponent(f64),
    #[error("mismatch_penalty must be a finite number of at least 0, got {0}")]
    InvalidPenalty(f64),
}

/// Application configuration loaded from TOML config file.
/// All fields have defaults, so the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Corpus snapshot path (overrides the XDG default).
    pub corpus_path: Option<PathBuf>,
    /// Root of the corpus MIDI files that matches are copied from.
    pub source_dir: Option<PathBuf>,
    /// Where matches are copied to.
    pub output_dir: Option<PathBuf>,
    /// Directories of query files (used when `search` has no CLI args).
    pub query_dirs: Vec<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    pub search: SearchConfig,
}

/// Search and fingerprint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Transpositions searched in each direction (0..=6).
    pub transpose_factor: u8,
    /// Matches copied per query.
    pub top_matches: usize,
    pub mismatch_penalty: f64,
    pub distance_exponent: f64,
    pub omit_drums: bool,
    pub counts_to_ratios: bool,
    /// Repair unknown chords against the smaller "full" catalogue.
    pub use_full_chords: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            transpose_factor: MAX_TRANSPOSE,
            top_matches: 30,
            mismatch_penalty: 10.0,
            distance_exponent: 3.0,
            omit_drums: true,
            counts_to_ratios: false,
            use_full_chords: true,
        }
    }
}

impl SearchConfig {
    pub fn transpose_factor(&self) -> u8 {
        self.transpose_factor.min(MAX_TRANSPOSE)
    }

    pub fn fingerprint_options(&self) -> FingerprintOptions {
        FingerprintOptions {
            transpose_factor: self.transpose_factor(),
            omit_drums: self.omit_drums,
            counts_to_ratios: self.counts_to_ratios,
            repair_catalogue: if self.use_full_chords {
                Catalogue::Full
            } else {
                Catalogue::Sorted
            },
        }
    }

    /// Options for building corpus entries: untransposed, drums kept, raw
    /// counts, same chord repair as queries.
    pub fn index_options(&self) -> FingerprintOptions {
        FingerprintOptions {
            transpose_factor: 0,
            omit_drums: false,
            counts_to_ratios: false,
            ..self.fingerprint_options()
        }
    }

    pub fn distance_params(&self) -> Result<DistanceParams, ConfigError> {
        if !(self.distance_exponent.is_finite() && self.distance_exponent > 0.0) {
            return Err(ConfigError::InvalidExponent(self.distance_exponent));
        }
        if !(self.mismatch_penalty.is_finite() && self.mismatch_penalty >= 0.0) {
            return Err(ConfigError::InvalidPenalty(self.mismatch_penalty));
        }
        Ok(DistanceParams {
            mismatch_penalty: self.mismatch_penalty,
            exponent: self.distance_exponent,
        })
    }
}

impl AppConfig {
    /// Load config from `~/.config/midisig/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn resolve_corpus_path(&self) -> PathBuf {
        self.corpus_path.clone().unwrap_or_else(default_corpus_path)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default corpus snapshot path using XDG data directory.
pub fn default_corpus_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("corpus.json")
    } else {
        PathBuf::from("corpus.json")
    }
}
