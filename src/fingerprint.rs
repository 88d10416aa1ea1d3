//! Score → token histogram.
//!
//! Every simultaneity in a score becomes one token: a raw pitch (0..=127)
//! for a lone pitched note, `128 + id` of a canonical chord shape for two or
//! more, and `DRUM_TOKEN_OFFSET + key` for each percussion key struck.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::path::Path;

use thiserror::Error;

use crate::chords::{CanonicalizeError, Catalogue, PitchClassSet, Timed, canonicalize, chordify_by_time};
use crate::midi::{self, DRUM_CHANNEL, DecodeError, DecodeOptions, Message, Score};
use crate::timing::{self, TimingError};

/// First chord token; tokens below it are single pitches.
pub const CHORD_TOKEN_BASE: u32 = 128;

/// First drum token: past every pitch and every sorted-catalogue chord.
pub const DRUM_TOKEN_OFFSET: u32 = 449;

/// Patch number attached to percussion-channel notes.
pub const DRUM_PATCH: u8 = 128;

/// Millisecond times are divided by this before chords are formed.
pub const TIMING_DIVIDER: u64 = 16;

/// Largest transposition searched in either direction.
pub const MAX_TRANSPOSE: u8 = 6;

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Timing error: {0}")]
    Timing(#[from] TimingError),
    #[error("Canonicalization error: {0}")]
    Canonicalize(#[from] CanonicalizeError),
    #[error("no notes in score")]
    NoNotes,
    #[error("no tokens left after filtering")]
    Empty,
}

/// A note with its start time and the patch sounding on its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreNote {
    pub start: u64,
    pub duration: u64,
    pub channel: u8,
    pub pitch: u8,
    pub velocity: u8,
    pub patch: u8,
}

impl ScoreNote {
    pub fn is_drum(&self) -> bool {
        self.channel == DRUM_CHANNEL
    }
}

impl Timed for ScoreNote {
    fn time(&self) -> u64 {
        self.start
    }
}

/// Token → count (or ratio) histogram.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fingerprint(BTreeMap<u32, f64>);

impl Fingerprint {
    pub fn from_tokens(tokens: impl IntoIterator<Item = u32>) -> Self {
        let mut counts = BTreeMap::new();
        for token in tokens {
            *counts.entry(token).or_insert(0.0) += 1.0;
        }
        Self(counts)
    }

    /// Tokens whose value is not positive are left out.
    pub fn from_counts(counts: impl IntoIterator<Item = (u32, f64)>) -> Self {
        Self(counts.into_iter().filter(|&(_, v)| v > 0.0).collect())
    }

    pub fn get(&self, token: u32) -> f64 {
        self.0.get(&token).copied().unwrap_or(0.0)
    }

    /// (token, value) pairs in ascending token order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.0.iter().map(|(&t, &v)| (t, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Divide every count by the total. An empty histogram stays empty.
    pub fn into_ratios(self) -> Self {
        let total = self.total();
        if total <= 0.0 {
            return self;
        }
        Self(self.0.into_iter().map(|(t, v)| (t, v / total)).collect())
    }

    pub fn without_drums(mut self) -> Self {
        self.0.retain(|&t, _| t < DRUM_TOKEN_OFFSET);
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FingerprintOptions {
    /// Search transpositions -T..=T (clamped to `MAX_TRANSPOSE`); 0 means untransposed only.
    pub transpose_factor: u8,
    pub omit_drums: bool,
    pub counts_to_ratios: bool,
    /// Catalogue used to repair chords missing from the sorted catalogue.
    pub repair_catalogue: Catalogue,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            transpose_factor: 0,
            omit_drums: true,
            counts_to_ratios: false,
            repair_catalogue: Catalogue::Full,
        }
    }
}

/// A fingerprint of the score shifted by `transpose` semitones.
#[derive(Debug, Clone, PartialEq)]
pub struct TransposedFingerprint {
    pub transpose: i8,
    pub fingerprint: Fingerprint,
}

pub fn transpositions(factor: u8) -> RangeInclusive<i8> {
    let t = factor.min(MAX_TRANSPOSE) as i8;
    -t..=t
}

/// Flatten a score into notes tagged with their channel's current patch.
///
/// Events are ordered by time with non-note events first and notes by
/// descending pitch. A note repeating the (channel, pitch) of the note
/// kept just before it at the same time is dropped.
pub fn enhance_score(score: &Score) -> Vec<ScoreNote> {
    let mut events: Vec<&midi::Event> = score.tracks.iter().flatten().collect();
    events.sort_by_key(|e| {
        let pitch_key = match e.message {
            Message::Note { pitch, .. } => u16::from(pitch),
            _ => 128,
        };
        (e.time, Reverse(pitch_key))
    });

    let mut patches = [0u8; 16];
    let mut notes = Vec::new();
    let mut last_note: Option<(u64, u8, u8)> = None;

    for event in events {
        match event.message {
            Message::PatchChange { channel, patch } => {
                patches[usize::from(channel & 0x0F)] = patch;
                last_note = None;
            }
            Message::Note { duration, channel, pitch, velocity } => {
                let key = (event.time, channel, pitch);
                if last_note == Some(key) {
                    continue;
                }
                last_note = Some(key);
                let patch = if channel == DRUM_CHANNEL {
                    DRUM_PATCH
                } else {
                    patches[usize::from(channel & 0x0F)]
                };
                notes.push(ScoreNote {
                    start: event.time,
                    duration,
                    channel,
                    pitch,
                    velocity,
                    patch,
                });
            }
            _ => last_note = None,
        }
    }

    sort_notes(&mut notes);
    notes
}

/// Coarsen times by `divider` (durations at least 1) and clamp pitches to 1..=127.
pub fn quantize_notes(notes: &[ScoreNote], divider: u64) -> Vec<ScoreNote> {
    let divider = divider.max(1);
    let mut out: Vec<ScoreNote> = notes
        .iter()
        .map(|n| ScoreNote {
            start: n.start / divider,
            duration: (n.duration / divider).max(1),
            pitch: n.pitch.clamp(1, 127),
            ..n.clone()
        })
        .collect();
    sort_notes(&mut out);
    out
}

/// Start ascending, pitch descending, patch ascending.
fn sort_notes(notes: &mut [ScoreNote]) {
    notes.sort_by_key(|n| (n.start, Reverse(n.pitch), n.patch));
}

/// Shift pitched notes by `delta` semitones. Percussion keys are left alone;
/// pitched notes pushed outside 0..=127 are dropped.
pub fn transpose(notes: &[ScoreNote], delta: i8) -> Vec<ScoreNote> {
    notes
        .iter()
        .filter_map(|n| {
            if n.is_drum() {
                return Some(n.clone());
            }
            let pitch = i16::from(n.pitch) + i16::from(delta);
            (0..=127).contains(&pitch).then(|| ScoreNote {
                pitch: pitch as u8,
                ..n.clone()
            })
        })
        .collect()
}

/// Token for a set of two or more simultaneous pitches.
pub fn chord_token(pitches: &BTreeSet<u8>, repair_catalogue: Catalogue) -> Result<u32, CanonicalizeError> {
    let mut tones = PitchClassSet::from_pitches(pitches.iter().copied());
    if !Catalogue::Sorted.contains(tones) {
        tones = canonicalize(tones, repair_catalogue)?;
    }
    let id = Catalogue::Sorted
        .id_of(tones)
        .ok_or(CanonicalizeError::NoCanonicalMatch(tones, Catalogue::Sorted))?;
    Ok(CHORD_TOKEN_BASE + id as u32)
}

/// Count the tokens of a chordified note sequence.
pub fn fingerprint_chords(
    chords: &[Vec<ScoreNote>],
    options: &FingerprintOptions,
) -> Result<Fingerprint, CanonicalizeError> {
    let mut tokens = Vec::with_capacity(chords.len());

    for chord in chords {
        let (drums, pitched): (Vec<&ScoreNote>, Vec<&ScoreNote>) = chord.iter().partition(|n| n.is_drum());
        let pitches: BTreeSet<u8> = pitched.iter().map(|n| n.pitch).collect();

        match pitches.len() {
            0 => {}
            1 => tokens.extend(pitches.iter().map(|&p| u32::from(p))),
            _ => tokens.push(chord_token(&pitches, options.repair_catalogue)?),
        }

        if !options.omit_drums {
            let keys: BTreeSet<u8> = drums.iter().map(|n| n.pitch).collect();
            tokens.extend(keys.into_iter().map(|k| DRUM_TOKEN_OFFSET + u32::from(k)));
        }
    }

    let fingerprint = Fingerprint::from_tokens(tokens);
    Ok(if options.counts_to_ratios {
        fingerprint.into_ratios()
    } else {
        fingerprint
    })
}

/// Fingerprints of a millisecond score, one per searched transposition.
///
/// Transpositions that leave no tokens are skipped.
pub fn score_fingerprints(
    score: &Score,
    options: &FingerprintOptions,
) -> Result<Vec<TransposedFingerprint>, FingerprintError> {
    let notes = quantize_notes(&enhance_score(score), TIMING_DIVIDER);
    if notes.is_empty() {
        return Err(FingerprintError::NoNotes);
    }

    let mut out = Vec::new();
    for delta in transpositions(options.transpose_factor) {
        let chords = chordify_by_time(transpose(&notes, delta));
        let fingerprint = fingerprint_chords(&chords, options)?;
        if fingerprint.is_empty() {
            log::debug!("transposition {} produced no tokens", delta);
            continue;
        }
        out.push(TransposedFingerprint {
            transpose: delta,
            fingerprint,
        });
    }

    if out.is_empty() {
        return Err(FingerprintError::Empty);
    }
    Ok(out)
}

/// Decode raw file bytes and fingerprint them. `label` prefixes the logged
/// decode warnings.
pub fn bytes_fingerprints(
    bytes: &[u8],
    options: &FingerprintOptions,
    label: &str,
) -> Result<Vec<TransposedFingerprint>, FingerprintError> {
    let decoded = midi::decode_file(bytes, &DecodeOptions::default())?;
    decoded.diagnostics.log(label);
    let score = timing::single_track_ms_score(&decoded.opus)?;
    score_fingerprints(&score, options)
}

/// Read a file from disk and fingerprint it.
pub fn file_fingerprints(
    path: &Path,
    options: &FingerprintOptions,
) -> Result<Vec<TransposedFingerprint>, FingerprintError> {
    let bytes = std::fs::read(path).map_err(DecodeError::from)?;
    bytes_fingerprints(&bytes, options, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::Event;

    fn sn(start: u64, channel: u8, pitch: u8) -> ScoreNote {
        ScoreNote {
            start,
            duration: 1,
            channel,
            pitch,
            velocity: 90,
            patch: 0,
        }
    }

    fn note(time: u64, duration: u64, channel: u8, pitch: u8) -> Event {
        Event::new(time, Message::Note { duration, channel, pitch, velocity: 90 })
    }

    #[test]
    fn test_drum_offset_follows_sorted_catalogue() {
        assert_eq!(DRUM_TOKEN_OFFSET, CHORD_TOKEN_BASE + Catalogue::Sorted.len() as u32);
    }

    #[test]
    fn test_transpositions_range() {
        assert_eq!(transpositions(0).collect::<Vec<_>>(), vec![0]);
        assert_eq!(transpositions(2).collect::<Vec<_>>(), vec![-2, -1, 0, 1, 2]);
        assert_eq!(transpositions(9).count(), 13);
    }

    #[test]
    fn test_enhance_attaches_patches_and_drops_duplicates() {
        let score = Score {
            ticks_per_quarter: 1000,
            tracks: vec![
                vec![
                    Event::new(0, Message::PatchChange { channel: 0, patch: 40 }),
                    note(0, 100, 0, 60),
                    note(0, 100, 0, 64),
                    note(0, 50, 0, 64),
                ],
                vec![note(0, 10, 9, 36), note(50, 100, 1, 48)],
            ],
        };
        let notes = enhance_score(&score);
        let summary: Vec<(u64, u8, u8, u8)> = notes.iter().map(|n| (n.start, n.channel, n.pitch, n.patch)).collect();
        assert_eq!(
            summary,
            vec![(0, 0, 64, 40), (0, 0, 60, 40), (0, 9, 36, DRUM_PATCH), (50, 1, 48, 0)]
        );
    }

    #[test]
    fn test_quantize_divides_times_and_clamps() {
        let notes = vec![ScoreNote { start: 40, duration: 7, pitch: 0, ..sn(0, 0, 0) }, sn(35, 0, 70)];
        let q = quantize_notes(&notes, 16);
        assert_eq!(q[0].start, 2);
        assert_eq!(q[0].pitch, 70);
        assert_eq!(q[1].start, 2);
        assert_eq!(q[1].pitch, 1);
        assert_eq!(q[1].duration, 1);
    }

    #[test]
    fn test_transpose_keeps_drums_and_drops_out_of_range() {
        let notes = vec![sn(0, 0, 125), sn(0, 9, 38), sn(0, 0, 60)];
        let up = transpose(&notes, 3);
        let pitches: Vec<u8> = up.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![38, 63]);
    }

    #[test]
    fn test_tokens_for_single_notes_chords_and_drums() {
        let chords = vec![
            vec![sn(0, 0, 60)],
            vec![sn(1, 0, 60), sn(1, 0, 64), sn(1, 0, 67)],
            vec![sn(2, 9, 36), sn(2, 9, 42), sn(2, 0, 72)],
            vec![sn(3, 0, 48), sn(3, 1, 60)],
        ];
        let options = FingerprintOptions {
            omit_drums: false,
            ..Default::default()
        };
        let fp = fingerprint_chords(&chords, &options).unwrap();
        // C major triad is sorted-catalogue shape 16
        assert_eq!(fp.get(CHORD_TOKEN_BASE + 16), 1.0);
        assert_eq!(fp.get(60), 1.0);
        assert_eq!(fp.get(72), 1.0);
        // Octave doubling collapses to the single-class shape {0}
        assert_eq!(fp.get(CHORD_TOKEN_BASE), 1.0);
        assert_eq!(fp.get(DRUM_TOKEN_OFFSET + 36), 1.0);
        assert_eq!(fp.get(DRUM_TOKEN_OFFSET + 42), 1.0);
        assert_eq!(fp.total(), 6.0);

        let fp = fingerprint_chords(&chords, &FingerprintOptions::default()).unwrap();
        assert_eq!(fp.total(), 4.0);
    }

    #[test]
    fn test_unknown_chord_is_repaired() {
        // {0,1,2} is not a catalogue shape; the full catalogue repairs it to {0}
        let pitches: BTreeSet<u8> = [60, 61, 62].into_iter().collect();
        assert_eq!(chord_token(&pitches, Catalogue::Full).unwrap(), CHORD_TOKEN_BASE);
        // The sorted catalogue keeps {0,2}
        let id = Catalogue::Sorted.id_of(PitchClassSet::from_pitches([0, 2])).unwrap() as u32;
        assert_eq!(chord_token(&pitches, Catalogue::Sorted).unwrap(), CHORD_TOKEN_BASE + id);
    }

    #[test]
    fn test_ratios_sum_to_one() {
        let fp = Fingerprint::from_tokens([60, 60, 60, 140]).into_ratios();
        assert!((fp.get(60) - 0.75).abs() < 1e-12);
        assert!((fp.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_without_drums() {
        let fp = Fingerprint::from_tokens([60, 448, 449, 500]).without_drums();
        assert_eq!(fp.iter().map(|(t, _)| t).collect::<Vec<_>>(), vec![60, 448]);
    }

    #[test]
    fn test_score_fingerprints_per_transposition() {
        let score = Score {
            ticks_per_quarter: 1000,
            tracks: vec![vec![
                note(0, 500, 0, 60),
                note(0, 500, 0, 64),
                note(0, 500, 0, 67),
                note(500, 500, 0, 62),
            ]],
        };
        let options = FingerprintOptions {
            transpose_factor: 1,
            ..Default::default()
        };
        let fps = score_fingerprints(&score, &options).unwrap();
        assert_eq!(fps.iter().map(|f| f.transpose).collect::<Vec<_>>(), vec![-1, 0, 1]);
        let zero = &fps[1].fingerprint;
        assert_eq!(zero.get(CHORD_TOKEN_BASE + 16), 1.0);
        assert_eq!(zero.get(62), 1.0);
        assert_eq!(fps[2].fingerprint.get(63), 1.0);
    }

    #[test]
    fn test_drum_only_score_has_no_fingerprint() {
        let score = Score {
            ticks_per_quarter: 1000,
            tracks: vec![vec![note(0, 100, 9, 36)]],
        };
        assert!(matches!(
            score_fingerprints(&score, &FingerprintOptions::default()),
            Err(FingerprintError::Empty)
        ));
        assert!(matches!(
            score_fingerprints(&Score::default(), &FingerprintOptions::default()),
            Err(FingerprintError::NoNotes)
        ));
    }

    #[test]
    fn test_from_counts_drops_non_positive() {
        let fp = Fingerprint::from_counts([(60, 0.0), (62, -1.0), (64, 2.0)]);
        assert_eq!(fp.iter().collect::<Vec<_>>(), vec![(64, 2.0)]);
        assert!(Fingerprint::from_counts([(60, 0.0)]).into_ratios().is_empty());
    }

    #[test]
    fn test_bytes_fingerprints_from_raw_file() {
        let track: &[u8] = &[
            0x00, 0x90, 60, 90, 0x00, 0x90, 67, 90, // open fifth
            0x60, 0x80, 60, 0, 0x00, 0x80, 67, 0,
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let mut bytes = b"MThd".to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 6, 0, 0, 0, 1, 0, 96]);
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
        bytes.extend_from_slice(track);

        let fps = bytes_fingerprints(&bytes, &FingerprintOptions::default(), "fifth").unwrap();
        assert_eq!(fps.len(), 1);
        let id = Catalogue::Sorted.id_of(PitchClassSet::from_pitches([0, 7])).unwrap() as u32;
        assert_eq!(fps[0].fingerprint.iter().collect::<Vec<_>>(), vec![(CHORD_TOKEN_BASE + id, 1.0)]);

        assert!(matches!(
            bytes_fingerprints(b"RIFF0000000000", &FingerprintOptions::default(), "junk"),
            Err(FingerprintError::Decode(DecodeError::BadSignature(_)))
        ));
    }
}
