pub mod chords;
pub mod config;
pub mod corpus;
pub mod fingerprint;
pub mod midi;
pub mod scanner;
pub mod search;
pub mod similarity;
pub mod timing;

/// MIDI file extensions we index and search
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mid", "midi", "kar"];

/// Application name for XDG paths
pub const APP_NAME: &str = "midisig";
