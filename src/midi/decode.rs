use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

use super::diagnostics::Diagnostics;
use super::varint::{ByteReader, read_14_bit, read_u24_be};
use super::{EventKind, Event, Message, Opus, TextKind, Track};

/// Magic tag + declared length + format + track count + division.
pub const HEADER_LEN: usize = 14;
const HEADER_MAGIC: &[u8; 4] = b"MThd";
const TRACK_MAGIC: &[u8; 4] = b"MTrk";
const CHUNK_PREFIX_LEN: usize = 8;

/// File-level failures: nothing useful can be decoded.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("File too short: {0} bytes, need at least {HEADER_LEN}")]
    TooShort(usize),
    #[error("File starts with {0:?} instead of \"MThd\"")]
    BadSignature([u8; 4]),
    #[error("Header length was {0} instead of 6")]
    BadHeaderLength(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Track-level failures: decoding of the current track stops, events read so far are kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error("running status not set at offset {offset}")]
    NoRunningStatus { offset: usize },
    #[error("truncated field at offset {offset} ({wanted} byte(s) wanted)")]
    Truncated { offset: usize, wanted: usize },
    #[error("variable-length quantity longer than 4 bytes at offset {offset}")]
    VarintTooLong { offset: usize },
}

/// Per-kind include/exclude filter applied before events are appended.
///
/// With no include list every kind is allowed unless excluded.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    include: Option<HashSet<EventKind>>,
    exclude: HashSet<EventKind>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            include: Some(kinds.into_iter().collect()),
            exclude: HashSet::new(),
        }
    }

    pub fn excluding(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.exclude.extend(kinds);
        self
    }

    pub fn allows(&self, kind: EventKind) -> bool {
        if self.exclude.contains(&kind) {
            return false;
        }
        match &self.include {
            Some(include) => include.contains(&kind),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    pub filter: EventFilter,
    /// Warn instead of failing when the file does not start with `MThd`.
    pub lenient_signature: bool,
    /// Keep `EndTrack` events verbatim (and synthesize one when missing)
    /// instead of folding a trailing delta into an empty text event.
    pub keep_end_track: bool,
}

/// Result of decoding a whole file.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub opus: Opus,
    pub format: u16,
    pub declared_tracks: u16,
    pub diagnostics: Diagnostics,
}

/// Read and decode a file from disk.
pub fn read_file(path: &Path, options: &DecodeOptions) -> Result<Decoded, DecodeError> {
    let bytes = std::fs::read(path)?;
    decode_file(&bytes, options)
}

/// Decode a complete file: header followed by length-prefixed track chunks.
///
/// Header problems abort with an error. Track problems are recorded in the
/// returned diagnostics and the affected track is kept as far as it decoded.
pub fn decode_file(bytes: &[u8], options: &DecodeOptions) -> Result<Decoded, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::TooShort(bytes.len()));
    }

    let mut diagnostics = Diagnostics::new();
    let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if &magic != HEADER_MAGIC {
        if !options.lenient_signature {
            return Err(DecodeError::BadSignature(magic));
        }
        diagnostics.warn(format!("file starts with {:?} instead of \"MThd\"", magic));
    }

    let mut reader = ByteReader::new(&bytes[4..]);
    // Length was checked above, these reads cannot fail.
    let header_len = reader.read_u32_be().unwrap_or_default();
    if header_len != 6 {
        return Err(DecodeError::BadHeaderLength(header_len));
    }
    let format = reader.read_u16_be().unwrap_or_default();
    let declared_tracks = reader.read_u16_be().unwrap_or_default();
    let division = reader.read_u16_be().unwrap_or_default();
    if division & 0x8000 != 0 {
        diagnostics.warn(format!(
            "SMPTE time division {:#06x} treated as ticks per quarter",
            division
        ));
    }

    let mut opus = Opus {
        ticks_per_quarter: u32::from(division),
        tracks: Vec::new(),
    };

    let mut chunks = ByteReader::new(&bytes[HEADER_LEN..]);
    let mut track_num = 1;
    while chunks.remaining() >= CHUNK_PREFIX_LEN {
        let tag = chunks.read_bytes(4).unwrap_or_default();
        if tag != &TRACK_MAGIC[..] {
            diagnostics.warn(format!(
                "track #{} chunk tag is {:?} instead of \"MTrk\"",
                track_num,
                String::from_utf8_lossy(tag)
            ));
        }
        let length = chunks.read_u32_be().unwrap_or_default() as usize;
        if length > chunks.remaining() {
            diagnostics.warn(format!(
                "track #{} length {} is too large ({} bytes left)",
                track_num,
                length,
                chunks.remaining()
            ));
            break;
        }
        let data = chunks.read_bytes(length).unwrap_or_default();

        let (track, error) = decode_track(data, options, &mut diagnostics);
        if let Some(e) = error {
            diagnostics.warn(format!("track #{}: {}; rest of track skipped", track_num, e));
        }
        opus.tracks.push(track);
        track_num += 1;
    }

    if opus.tracks.len() != usize::from(declared_tracks) {
        diagnostics.warn(format!(
            "header declares {} track(s), found {}",
            declared_tracks,
            opus.tracks.len()
        ));
    }

    Ok(Decoded {
        opus,
        format,
        declared_tracks,
        diagnostics,
    })
}

/// Decode one track chunk's payload into delta-timed events.
///
/// On a structural error the events decoded before it are returned along
/// with the error.
pub fn decode_track(
    data: &[u8],
    options: &DecodeOptions,
    diagnostics: &mut Diagnostics,
) -> (Track, Option<TrackError>) {
    let mut events = Vec::new();
    let mut reader = ByteReader::new(data);
    let result = decode_events(&mut reader, options, diagnostics, &mut events);

    if options.keep_end_track
        && !matches!(events.last(), Some(Event { message: Message::EndTrack, .. }))
        && options.filter.allows(EventKind::EndTrack)
    {
        events.push(Event::new(0, Message::EndTrack));
    }

    (events, result.err())
}

fn decode_events(
    reader: &mut ByteReader<'_>,
    options: &DecodeOptions,
    diagnostics: &mut Diagnostics,
    events: &mut Track,
) -> Result<(), TrackError> {
    let mut running_status: Option<u8> = None;

    while !reader.is_empty() {
        let time = u64::from(reader.read_varint()?);
        let status_offset = reader.position();
        let first = reader.read_u8()?;

        let message = match first {
            0x00..=0xEF => {
                let status = if first & 0x80 != 0 {
                    running_status = Some(first);
                    first
                } else {
                    reader.unread();
                    running_status.ok_or(TrackError::NoRunningStatus {
                        offset: status_offset,
                    })?
                };
                decode_channel_message(status, reader)?
            }
            0xFF => decode_meta(reader, diagnostics)?,
            0xF0 | 0xF7 => {
                let length = reader.read_varint()? as usize;
                let payload = reader.read_bytes(length)?.to_vec();
                if first == 0xF0 {
                    Message::SysexF0(payload)
                } else {
                    Message::SysexF7(payload)
                }
            }
            0xF2 => {
                let b = reader.read_bytes(2)?;
                Message::SongPosition(read_14_bit(b[0], b[1]))
            }
            0xF3 => Message::SongSelect(reader.read_u8()?),
            0xF6 => Message::TuneRequest,
            _ => Message::RawData(reader.read_u8()?),
        };

        if message == Message::EndTrack {
            let event = if options.keep_end_track {
                Some(Event::new(time, Message::EndTrack))
            } else if time > 0 {
                // Carry the trailing delta so the track keeps its length
                Some(Event::new(
                    time,
                    Message::Text {
                        kind: TextKind::Text,
                        data: Vec::new(),
                    },
                ))
            } else {
                None
            };
            if let Some(event) = event {
                if options.filter.allows(event.kind()) {
                    events.push(event);
                }
            }
            return Ok(());
        }

        if options.filter.allows(message.kind()) {
            events.push(Event::new(time, message));
        }
    }

    Ok(())
}

fn decode_channel_message(status: u8, reader: &mut ByteReader<'_>) -> Result<Message, TrackError> {
    let channel = status & 0x0F;
    let message = match status & 0xF0 {
        0xC0 => Message::PatchChange {
            channel,
            patch: reader.read_u8()?,
        },
        0xD0 => Message::ChannelAfterTouch {
            channel,
            pressure: reader.read_u8()?,
        },
        command => {
            let b = reader.read_bytes(2)?;
            match command {
                0x80 => Message::NoteOff { channel, pitch: b[0], velocity: b[1] },
                0x90 => Message::NoteOn { channel, pitch: b[0], velocity: b[1] },
                0xA0 => Message::KeyAfterTouch { channel, pitch: b[0], pressure: b[1] },
                0xB0 => Message::ControlChange { channel, controller: b[0], value: b[1] },
                // 0xE0
                _ => Message::PitchWheelChange {
                    channel,
                    value: read_14_bit(b[0], b[1]) as i16 - 0x2000,
                },
            }
        }
    };
    Ok(message)
}

fn decode_meta(reader: &mut ByteReader<'_>, diagnostics: &mut Diagnostics) -> Result<Message, TrackError> {
    let meta_type = reader.read_u8()?;
    let length = reader.read_varint()? as usize;
    let payload_offset = reader.position();
    let payload = reader.read_bytes(length)?;

    let message = match meta_type {
        0x00 => {
            if payload.len() == 2 {
                Message::SequenceNumber(u16::from_be_bytes([payload[0], payload[1]]))
            } else {
                diagnostics.warn(format!(
                    "set_sequence_number: length must be 2, not {}",
                    payload.len()
                ));
                Message::SequenceNumber(0)
            }
        }
        0x01..=0x0F => Message::Text {
            kind: TextKind::from_meta_type(meta_type).unwrap_or(TextKind::Text),
            data: payload.to_vec(),
        },
        0x2F => Message::EndTrack,
        0x51 => {
            let p = fixed_fields(payload, payload_offset, "set_tempo", 3, diagnostics)?;
            Message::SetTempo {
                micros_per_quarter: read_u24_be([p[0], p[1], p[2]]),
            }
        }
        0x54 => {
            let p = fixed_fields(payload, payload_offset, "smpte_offset", 5, diagnostics)?;
            Message::SmpteOffset {
                hours: p[0],
                minutes: p[1],
                seconds: p[2],
                frames: p[3],
                subframes: p[4],
            }
        }
        0x58 => {
            let p = fixed_fields(payload, payload_offset, "time_signature", 4, diagnostics)?;
            Message::TimeSignature {
                numerator: p[0],
                denominator: p[1],
                clocks_per_click: p[2],
                thirty_seconds_per_quarter: p[3],
            }
        }
        0x59 => {
            let p = fixed_fields(payload, payload_offset, "key_signature", 2, diagnostics)?;
            Message::KeySignature {
                sharps: p[0] as i8,
                minor: p[1],
            }
        }
        0x7F => Message::SequencerSpecific(payload.to_vec()),
        _ => Message::RawMeta {
            meta_type,
            data: payload.to_vec(),
        },
    };
    Ok(message)
}

/// Fixed-layout meta payload: warn on an odd declared length, fail if the
/// fields are not all there.
fn fixed_fields<'p>(
    payload: &'p [u8],
    offset: usize,
    name: &str,
    expected: usize,
    diagnostics: &mut Diagnostics,
) -> Result<&'p [u8], TrackError> {
    if payload.len() != expected {
        diagnostics.warn(format!("{} event, but length={}", name, payload.len()));
    }
    if payload.len() < expected {
        return Err(TrackError::Truncated {
            offset,
            wanted: expected,
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &[u8]) -> (Track, Option<TrackError>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let (track, err) = decode_track(data, &DecodeOptions::default(), &mut diags);
        (track, err, diags)
    }

    fn file(tracks: &[&[u8]]) -> Vec<u8> {
        let mut out = b"MThd".to_vec();
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
        out.extend_from_slice(&96u16.to_be_bytes());
        for t in tracks {
            out.extend_from_slice(b"MTrk");
            out.extend_from_slice(&(t.len() as u32).to_be_bytes());
            out.extend_from_slice(t);
        }
        out
    }

    #[test]
    fn test_running_status_matches_explicit_status() {
        let explicit = [0x00, 0x90, 60, 90, 0x10, 0x90, 64, 80, 0x10, 0x80, 60, 0];
        let running = [0x00, 0x90, 60, 90, 0x10, 64, 80, 0x10, 0x80, 60, 0];
        let (a, ea, _) = decode(&explicit);
        let (b, eb, _) = decode(&running);
        assert!(ea.is_none() && eb.is_none());
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert_eq!(a[1], Event::new(16, Message::NoteOn { channel: 0, pitch: 64, velocity: 80 }));
    }

    #[test]
    fn test_running_status_not_set_aborts_track() {
        let data = [0x00, 0xFF, 0x03, 0x01, b'A', 0x00, 60, 90];
        let (track, err, _) = decode(&data);
        assert_eq!(track.len(), 1);
        assert_eq!(err, Some(TrackError::NoRunningStatus { offset: 6 }));
    }

    #[test]
    fn test_meta_events_decode_to_typed_fields() {
        let data = [
            0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, // tempo 500000
            0x00, 0xFF, 0x58, 0x04, 6, 3, 24, 8, // 6/8
            0x00, 0xFF, 0x59, 0x02, 0xFE, 1, // 2 flats, minor
            0x00, 0xFF, 0x05, 0x02, b'l', b'a', // lyric
            0x00, 0xFF, 0x21, 0x01, 0x00, // unknown meta -> raw
        ];
        let (track, err, diags) = decode(&data);
        assert!(err.is_none());
        assert!(diags.is_empty());
        assert_eq!(track[0].message, Message::SetTempo { micros_per_quarter: 500_000 });
        assert_eq!(
            track[1].message,
            Message::TimeSignature { numerator: 6, denominator: 3, clocks_per_click: 24, thirty_seconds_per_quarter: 8 }
        );
        assert_eq!(track[2].message, Message::KeySignature { sharps: -2, minor: 1 });
        assert_eq!(track[3].message, Message::Text { kind: TextKind::Lyric, data: b"la".to_vec() });
        assert_eq!(track[4].message, Message::RawMeta { meta_type: 0x21, data: vec![0x00] });
    }

    #[test]
    fn test_end_track_delta_becomes_text_marker() {
        let data = [0x00, 0x90, 60, 90, 0x60, 0xFF, 0x2F, 0x00, 0x00, 0x90, 62, 90];
        let (track, err, _) = decode(&data);
        assert!(err.is_none());
        // Decoding stops at end of track; the trailing note is ignored
        assert_eq!(track.len(), 2);
        assert_eq!(
            track[1],
            Event::new(0x60, Message::Text { kind: TextKind::Text, data: Vec::new() })
        );

        let (track, _, _) = decode(&[0x00, 0x90, 60, 90, 0x00, 0xFF, 0x2F, 0x00]);
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn test_keep_end_track_synthesizes_marker() {
        let options = DecodeOptions { keep_end_track: true, ..Default::default() };
        let mut diags = Diagnostics::new();
        let (track, _) = decode_track(&[0x00, 0x90, 60, 90], &options, &mut diags);
        assert_eq!(track.last(), Some(&Event::new(0, Message::EndTrack)));

        let (track, _) = decode_track(&[0x05, 0xFF, 0x2F, 0x00], &options, &mut diags);
        assert_eq!(track, vec![Event::new(5, Message::EndTrack)]);
    }

    #[test]
    fn test_filter_skips_but_advances() {
        let data = [0x00, 0xC0, 5, 0x00, 0x90, 60, 90, 0x00, 0xB0, 7, 100];
        let options = DecodeOptions {
            filter: EventFilter::all().excluding([EventKind::PatchChange, EventKind::ControlChange]),
            ..Default::default()
        };
        let mut diags = Diagnostics::new();
        let (track, err) = decode_track(&data, &options, &mut diags);
        assert!(err.is_none());
        assert_eq!(track, vec![Event::new(0, Message::NoteOn { channel: 0, pitch: 60, velocity: 90 })]);

        let only = EventFilter::only([EventKind::ControlChange]);
        assert!(only.allows(EventKind::ControlChange));
        assert!(!only.allows(EventKind::NoteOn));
    }

    #[test]
    fn test_system_events() {
        let data = [
            0x00, 0xF0, 0x03, 0x43, 0x12, 0xF7, // sysex
            0x00, 0xF2, 0x00, 0x01, // song position 128
            0x00, 0xF3, 0x04, // song select
            0x00, 0xF6, // tune request
            0x00, 0xF8, 0x11, // unhandled status, one raw byte
            0x00, 0xE1, 0x00, 0x40, // pitch wheel centre on channel 1
        ];
        let (track, err, _) = decode(&data);
        assert!(err.is_none());
        assert_eq!(track[0].message, Message::SysexF0(vec![0x43, 0x12, 0xF7]));
        assert_eq!(track[1].message, Message::SongPosition(128));
        assert_eq!(track[2].message, Message::SongSelect(4));
        assert_eq!(track[3].message, Message::TuneRequest);
        assert_eq!(track[4].message, Message::RawData(0x11));
        assert_eq!(track[5].message, Message::PitchWheelChange { channel: 1, value: 0 });
    }

    #[test]
    fn test_truncated_track_keeps_prefix() {
        let data = [0x00, 0x90, 60, 90, 0x00, 0x90, 62];
        let (track, err, _) = decode(&data);
        assert_eq!(track.len(), 1);
        assert!(matches!(err, Some(TrackError::Truncated { .. })));

        // Tempo with a short payload
        let (track, err, diags) = decode(&[0x00, 0xFF, 0x51, 0x02, 0x07, 0xA1]);
        assert!(track.is_empty());
        assert!(matches!(err, Some(TrackError::Truncated { .. })));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_decode_file_header_checks() {
        assert!(matches!(decode_file(b"MThd", &DecodeOptions::default()), Err(DecodeError::TooShort(4))));

        let mut bad_len = file(&[]);
        bad_len[7] = 7;
        assert!(matches!(
            decode_file(&bad_len, &DecodeOptions::default()),
            Err(DecodeError::BadHeaderLength(7))
        ));

        let mut bad_magic = file(&[]);
        bad_magic[0] = b'X';
        assert!(matches!(
            decode_file(&bad_magic, &DecodeOptions::default()),
            Err(DecodeError::BadSignature(_))
        ));
        let lenient = DecodeOptions { lenient_signature: true, ..Default::default() };
        let decoded = decode_file(&bad_magic, &lenient).unwrap();
        assert_eq!(decoded.diagnostics.len(), 1);
    }

    #[test]
    fn test_decode_file_tracks_and_bad_chunks() {
        let t1: &[u8] = &[0x00, 0x90, 60, 90, 0x60, 0x80, 60, 0];
        let t2: &[u8] = &[0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20];
        let mut bytes = file(&[t1, t2]);
        let decoded = decode_file(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.opus.ticks_per_quarter, 96);
        assert_eq!(decoded.format, 1);
        assert_eq!(decoded.opus.tracks.len(), 2);
        assert!(decoded.diagnostics.is_empty());

        // Wrong chunk tag is tolerated
        bytes[14] = b'X';
        let decoded = decode_file(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.opus.tracks.len(), 2);
        assert_eq!(decoded.diagnostics.len(), 1);

        // Oversized chunk length stops decoding after the good tracks
        let mut bytes = file(&[t1, t2]);
        let second_len_at = HEADER_LEN + 8 + t1.len() + 4;
        bytes[second_len_at..second_len_at + 4].copy_from_slice(&1000u32.to_be_bytes());
        let decoded = decode_file(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.opus.tracks.len(), 1);
        assert!(decoded.diagnostics.entries()[0].message.contains("too large"));
    }

    #[test]
    fn test_smpte_division_is_kept_with_warning() {
        let mut bytes = file(&[&[0x00, 0x90, 60, 90]]);
        bytes[12..14].copy_from_slice(&0xE728u16.to_be_bytes());
        let decoded = decode_file(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.opus.ticks_per_quarter, 0xE728);
        assert_eq!(decoded.opus.tracks.len(), 1);
        assert_eq!(decoded.diagnostics.len(), 1);
        assert!(decoded.diagnostics.entries()[0].message.contains("SMPTE"));
    }

    #[test]
    fn test_sequence_number_lengths() {
        let (track, err, diags) = decode(&[0x00, 0xFF, 0x00, 0x02, 0x00, 0x07]);
        assert!(err.is_none());
        assert!(diags.is_empty());
        assert_eq!(track[0].message, Message::SequenceNumber(7));

        // Wrong length still yields an event, numbered 0
        let (track, err, diags) = decode(&[0x00, 0xFF, 0x00, 0x01, 0x05, 0x00, 0x90, 60, 90]);
        assert!(err.is_none());
        assert_eq!(track.len(), 2);
        assert_eq!(track[0].message, Message::SequenceNumber(0));
        assert_eq!(diags.len(), 1);
        assert!(diags.entries()[0].message.contains("length must be 2, not 1"));
    }
}
