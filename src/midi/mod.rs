//! Standard MIDI file events and the two track representations built from them.
//!
//! An [`Opus`] mirrors the file: separate note-on/note-off events and delta
//! times. A [`Score`] is derived from it: note pairs collapsed into single
//! [`Message::Note`] events carrying a duration, and absolute times.

pub mod decode;
pub mod diagnostics;
pub mod varint;

pub use decode::{DecodeError, DecodeOptions, Decoded, EventFilter, TrackError, decode_file, decode_track, read_file};
pub use diagnostics::{Diagnostic, Diagnostics};

/// Channel reserved for percussion by General MIDI (0-based).
pub const DRUM_CHANNEL: u8 = 9;

/// Ticks-per-quarter reported for empty or unreadable input.
pub const DEFAULT_TICKS_PER_QUARTER: u32 = 1000;

/// Text-class meta events (meta types 0x01..=0x0F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKind {
    Text,
    Copyright,
    TrackName,
    InstrumentName,
    Lyric,
    Marker,
    CuePoint,
    /// Reserved but unassigned text types 0x08..=0x0F.
    Reserved(u8),
}

impl TextKind {
    pub fn from_meta_type(meta_type: u8) -> Option<Self> {
        match meta_type {
            0x01 => Some(Self::Text),
            0x02 => Some(Self::Copyright),
            0x03 => Some(Self::TrackName),
            0x04 => Some(Self::InstrumentName),
            0x05 => Some(Self::Lyric),
            0x06 => Some(Self::Marker),
            0x07 => Some(Self::CuePoint),
            0x08..=0x0F => Some(Self::Reserved(meta_type)),
            _ => None,
        }
    }

    pub fn meta_type(self) -> u8 {
        match self {
            Self::Text => 0x01,
            Self::Copyright => 0x02,
            Self::TrackName => 0x03,
            Self::InstrumentName => 0x04,
            Self::Lyric => 0x05,
            Self::Marker => 0x06,
            Self::CuePoint => 0x07,
            Self::Reserved(t) => t,
        }
    }
}

/// Payload of an event. The time lives on [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Score-only: a paired note with its duration in ticks.
    Note { duration: u64, channel: u8, pitch: u8, velocity: u8 },
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8, velocity: u8 },
    KeyAfterTouch { channel: u8, pitch: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    PatchChange { channel: u8, patch: u8 },
    ChannelAfterTouch { channel: u8, pressure: u8 },
    /// Signed bend, centre 0, range -8192..=8191.
    PitchWheelChange { channel: u8, value: i16 },
    SequenceNumber(u16),
    Text { kind: TextKind, data: Vec<u8> },
    SetTempo { micros_per_quarter: u32 },
    SmpteOffset { hours: u8, minutes: u8, seconds: u8, frames: u8, subframes: u8 },
    TimeSignature { numerator: u8, denominator: u8, clocks_per_click: u8, thirty_seconds_per_quarter: u8 },
    KeySignature { sharps: i8, minor: u8 },
    SequencerSpecific(Vec<u8>),
    RawMeta { meta_type: u8, data: Vec<u8> },
    SysexF0(Vec<u8>),
    SysexF7(Vec<u8>),
    SongPosition(u16),
    SongSelect(u8),
    TuneRequest,
    RawData(u8),
    EndTrack,
}

/// Field-less discriminant of [`Message`], used for include/exclude filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Note,
    NoteOn,
    NoteOff,
    KeyAfterTouch,
    ControlChange,
    PatchChange,
    ChannelAfterTouch,
    PitchWheelChange,
    SequenceNumber,
    Text(TextKind),
    SetTempo,
    SmpteOffset,
    TimeSignature,
    KeySignature,
    SequencerSpecific,
    RawMeta,
    SysexF0,
    SysexF7,
    SongPosition,
    SongSelect,
    TuneRequest,
    RawData,
    EndTrack,
}

impl Message {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Note { .. } => EventKind::Note,
            Self::NoteOn { .. } => EventKind::NoteOn,
            Self::NoteOff { .. } => EventKind::NoteOff,
            Self::KeyAfterTouch { .. } => EventKind::KeyAfterTouch,
            Self::ControlChange { .. } => EventKind::ControlChange,
            Self::PatchChange { .. } => EventKind::PatchChange,
            Self::ChannelAfterTouch { .. } => EventKind::ChannelAfterTouch,
            Self::PitchWheelChange { .. } => EventKind::PitchWheelChange,
            Self::SequenceNumber(_) => EventKind::SequenceNumber,
            Self::Text { kind, .. } => EventKind::Text(*kind),
            Self::SetTempo { .. } => EventKind::SetTempo,
            Self::SmpteOffset { .. } => EventKind::SmpteOffset,
            Self::TimeSignature { .. } => EventKind::TimeSignature,
            Self::KeySignature { .. } => EventKind::KeySignature,
            Self::SequencerSpecific(_) => EventKind::SequencerSpecific,
            Self::RawMeta { .. } => EventKind::RawMeta,
            Self::SysexF0(_) => EventKind::SysexF0,
            Self::SysexF7(_) => EventKind::SysexF7,
            Self::SongPosition(_) => EventKind::SongPosition,
            Self::SongSelect(_) => EventKind::SongSelect,
            Self::TuneRequest => EventKind::TuneRequest,
            Self::RawData(_) => EventKind::RawData,
            Self::EndTrack => EventKind::EndTrack,
        }
    }

    /// Channel of a channel-voice message (or score note).
    pub fn channel(&self) -> Option<u8> {
        match self {
            Self::Note { channel, .. }
            | Self::NoteOn { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::KeyAfterTouch { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::PatchChange { channel, .. }
            | Self::ChannelAfterTouch { channel, .. }
            | Self::PitchWheelChange { channel, .. } => Some(*channel),
            _ => None,
        }
    }
}

/// A time-tagged message. `time` is a delta in an [`Opus`] and absolute in a [`Score`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub time: u64,
    pub message: Message,
}

impl Event {
    pub fn new(time: u64, message: Message) -> Self {
        Self { time, message }
    }

    pub fn kind(&self) -> EventKind {
        self.message.kind()
    }
}

pub type Track = Vec<Event>;

/// Tracks as stored in the file: delta times, unpaired note events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opus {
    pub ticks_per_quarter: u32,
    pub tracks: Vec<Track>,
}

impl Default for Opus {
    fn default() -> Self {
        Self {
            ticks_per_quarter: DEFAULT_TICKS_PER_QUARTER,
            tracks: Vec::new(),
        }
    }
}

/// Tracks with absolute times and note pairs collapsed into [`Message::Note`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    pub ticks_per_quarter: u32,
    pub tracks: Vec<Track>,
}

impl Default for Score {
    fn default() -> Self {
        Self {
            ticks_per_quarter: DEFAULT_TICKS_PER_QUARTER,
            tracks: Vec::new(),
        }
    }
}
