//! Conversions between the opus and score representations, and tick to
//! millisecond recalibration.

use std::collections::{BTreeMap, HashMap, VecDeque};

use thiserror::Error;

use crate::midi::{Event, Message, Opus, Score, Track};

/// Ticks per quarter of a millisecond-calibrated opus (one tick = 1 ms at 60 bpm).
pub const MS_TICKS_PER_QUARTER: u32 = 1000;

/// Tempo written at the head of every recalibrated track: one quarter per second.
const MS_TEMPO: u32 = 1_000_000;

/// Milliseconds per quarter assumed before the first tempo entry.
const INITIAL_MS_PER_QUARTER: f64 = 400.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TimingError {
    #[error("millisecond conversion needs an opus, found a score note in track {track}")]
    ScoreEventInOpus { track: usize },
}

/// Pair note-on/note-off events into duration-bearing notes, with absolute times.
///
/// Overlapping notes on the same channel and pitch resolve first-in
/// first-out. A note-off with nothing pending is dropped; notes still
/// pending at the end of a track are closed at its final tick.
pub fn opus_to_score(opus: &Opus) -> Score {
    let tracks = opus.tracks.iter().map(|t| pair_track(t)).collect();
    Score {
        ticks_per_quarter: opus.ticks_per_quarter,
        tracks,
    }
}

fn pair_track(track: &[Event]) -> Track {
    let mut pending: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();
    let mut out = Vec::with_capacity(track.len());
    let mut ticks_so_far: u64 = 0;

    for event in track {
        ticks_so_far += event.time;
        match event.message {
            Message::NoteOff { channel, pitch, .. }
            | Message::NoteOn { channel, pitch, velocity: 0 } => {
                let queue = pending.get_mut(&(channel, pitch));
                if let Some((start, velocity)) = queue.and_then(VecDeque::pop_front) {
                    out.push(note(start, ticks_so_far - start, channel, pitch, velocity));
                } else {
                    log::trace!("note_off with no note_on: channel={} pitch={}", channel, pitch);
                }
            }
            Message::NoteOn { channel, pitch, velocity } => {
                pending
                    .entry((channel, pitch))
                    .or_default()
                    .push_back((ticks_so_far, velocity));
            }
            ref other => out.push(Event::new(ticks_so_far, other.clone())),
        }
    }

    let mut unterminated: Vec<Event> = pending
        .into_iter()
        .flat_map(|((channel, pitch), queue)| {
            queue
                .into_iter()
                .map(move |(start, velocity)| note(start, ticks_so_far - start, channel, pitch, velocity))
        })
        .collect();
    if !unterminated.is_empty() {
        log::trace!("closing {} unterminated note(s) at tick {}", unterminated.len(), ticks_so_far);
        unterminated.sort_by_key(|e| (e.time, e.message.channel(), note_pitch(e)));
        out.extend(unterminated);
    }

    out
}

fn note(start: u64, duration: u64, channel: u8, pitch: u8, velocity: u8) -> Event {
    Event::new(start, Message::Note { duration, channel, pitch, velocity })
}

fn note_pitch(event: &Event) -> u8 {
    match event.message {
        Message::Note { pitch, .. } => pitch,
        _ => 0,
    }
}

/// Split score notes back into note-on/note-off pairs and re-emit delta times.
///
/// Events are grouped by absolute tick in ascending order; within a tick
/// they keep their score order, each note-off following the events of its
/// own tick that precede it in the score.
pub fn score_to_opus(score: &Score) -> Opus {
    let tracks = score
        .tracks
        .iter()
        .map(|track| {
            let mut by_tick: BTreeMap<u64, Vec<Message>> = BTreeMap::new();
            for event in track {
                match event.message {
                    Message::Note { duration, channel, pitch, velocity } => {
                        by_tick
                            .entry(event.time)
                            .or_default()
                            .push(Message::NoteOn { channel, pitch, velocity });
                        by_tick
                            .entry(event.time + duration)
                            .or_default()
                            .push(Message::NoteOff { channel, pitch, velocity });
                    }
                    ref other => by_tick.entry(event.time).or_default().push(other.clone()),
                }
            }

            let mut abs_time = 0;
            let mut out = Vec::with_capacity(track.len() * 2);
            for (tick, messages) in by_tick {
                for message in messages {
                    out.push(Event::new(tick - abs_time, message));
                    abs_time = tick;
                }
            }
            out
        })
        .collect();

    Opus {
        ticks_per_quarter: score.ticks_per_quarter,
        tracks,
    }
}

/// Absolute tick → microseconds-per-quarter, collected from every track.
///
/// When two tracks set a tempo at the same tick the later track wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TempoMap {
    entries: Vec<(u64, u32)>,
}

impl TempoMap {
    pub fn from_opus(opus: &Opus) -> Result<Self, TimingError> {
        let mut ticks_to_tempo = BTreeMap::new();
        for (i, track) in opus.tracks.iter().enumerate() {
            let mut ticks_so_far = 0;
            for event in track {
                ticks_so_far += event.time;
                match event.message {
                    Message::Note { .. } => return Err(TimingError::ScoreEventInOpus { track: i }),
                    Message::SetTempo { micros_per_quarter } => {
                        ticks_to_tempo.insert(ticks_so_far, micros_per_quarter);
                    }
                    _ => {}
                }
            }
        }
        Ok(Self {
            entries: ticks_to_tempo.into_iter().collect(),
        })
    }

    pub fn entries(&self) -> &[(u64, u32)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Recalibrate every time in an opus to milliseconds (1000 ticks per quarter
/// at one quarter per second).
///
/// A tempo change takes effect exactly at its tick: time up to it runs at
/// the old rate, time after it at the new one. Output deltas are differences
/// of rounded cumulative times, so rounding error never accumulates.
/// Incoming `set_tempo` events are consumed; each output track opens with a
/// single one-second tempo.
pub fn to_millisecs(opus: &Opus) -> Result<Opus, TimingError> {
    let tempo_map = TempoMap::from_opus(opus)?;
    let tempos = tempo_map.entries();
    let old_tpq = f64::from(opus.ticks_per_quarter.max(1));

    let tracks = opus
        .tracks
        .iter()
        .map(|track| {
            let mut ms_per_tick = INITIAL_MS_PER_QUARTER / old_tpq;
            let mut next_tempo = 0;
            let mut ticks_so_far: u64 = 0;
            let mut ms_so_far = 0.0_f64;
            let mut emitted_ms: u64 = 0;

            let mut out = Vec::with_capacity(track.len() + 1);
            out.push(Event::new(0, Message::SetTempo { micros_per_quarter: MS_TEMPO }));

            for event in track {
                let target = ticks_so_far + event.time;
                while next_tempo < tempos.len() && tempos[next_tempo].0 < target {
                    let (tick, micros) = tempos[next_tempo];
                    ms_so_far += ms_per_tick * tick.saturating_sub(ticks_so_far) as f64;
                    ticks_so_far = ticks_so_far.max(tick);
                    ms_per_tick = f64::from(micros) / (1000.0 * old_tpq);
                    next_tempo += 1;
                }
                ms_so_far += ms_per_tick * (target - ticks_so_far) as f64;
                ticks_so_far = target;

                if matches!(event.message, Message::SetTempo { .. }) {
                    continue;
                }
                let rounded = ms_so_far.round() as u64;
                let delta = rounded.saturating_sub(emitted_ms);
                emitted_ms += delta;
                out.push(Event::new(delta, event.message.clone()));
            }
            out
        })
        .collect();

    Ok(Opus {
        ticks_per_quarter: MS_TICKS_PER_QUARTER,
        tracks,
    })
}

/// Concatenate all tracks of a score into one (absolute times are kept).
pub fn merge_tracks(score: &Score) -> Score {
    let merged: Track = score.tracks.iter().flatten().cloned().collect();
    Score {
        ticks_per_quarter: score.ticks_per_quarter,
        tracks: vec![merged],
    }
}

/// Single-track score with millisecond times: pair notes, merge tracks,
/// unpair, recalibrate, and pair again.
pub fn single_track_ms_score(opus: &Opus) -> Result<Score, TimingError> {
    let merged = merge_tracks(&opus_to_score(opus));
    let ms_opus = to_millisecs(&score_to_opus(&merged))?;
    Ok(opus_to_score(&ms_opus))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on(time: u64, channel: u8, pitch: u8, velocity: u8) -> Event {
        Event::new(time, Message::NoteOn { channel, pitch, velocity })
    }

    fn off(time: u64, channel: u8, pitch: u8) -> Event {
        Event::new(time, Message::NoteOff { channel, pitch, velocity: 0 })
    }

    fn tempo(time: u64, micros_per_quarter: u32) -> Event {
        Event::new(time, Message::SetTempo { micros_per_quarter })
    }

    fn opus(tpq: u32, tracks: Vec<Track>) -> Opus {
        Opus { ticks_per_quarter: tpq, tracks }
    }

    fn sorted(mut track: Track) -> Track {
        track.sort_by_key(|e| (e.time, format!("{:?}", e.message)));
        track
    }

    #[test]
    fn test_pairs_single_note() {
        let score = opus_to_score(&opus(96, vec![vec![on(0, 0, 60, 90), off(96, 0, 60)]]));
        assert_eq!(score.ticks_per_quarter, 96);
        assert_eq!(score.tracks[0], vec![note(0, 96, 0, 60, 90)]);
    }

    #[test]
    fn test_overlapping_same_pitch_is_fifo() {
        let track = vec![on(0, 0, 60, 90), on(10, 0, 60, 80), off(10, 0, 60), off(10, 0, 60)];
        let score = opus_to_score(&opus(96, vec![track]));
        assert_eq!(score.tracks[0], vec![note(0, 20, 0, 60, 90), note(10, 20, 0, 60, 80)]);
    }

    #[test]
    fn test_zero_velocity_on_closes_note() {
        let track = vec![on(0, 2, 64, 70), on(48, 2, 64, 0)];
        let score = opus_to_score(&opus(96, vec![track]));
        assert_eq!(score.tracks[0], vec![note(0, 48, 2, 64, 70)]);
    }

    #[test]
    fn test_unmatched_off_ignored_and_pending_closed_at_end() {
        let track = vec![
            off(0, 0, 50),
            on(0, 0, 60, 90),
            Event::new(100, Message::ControlChange { channel: 0, controller: 7, value: 100 }),
        ];
        let score = opus_to_score(&opus(96, vec![track]));
        assert_eq!(
            score.tracks[0],
            vec![
                Event::new(100, Message::ControlChange { channel: 0, controller: 7, value: 100 }),
                note(0, 100, 0, 60, 90),
            ]
        );
    }

    #[test]
    fn test_score_opus_score_round_trip() {
        let original = Score {
            ticks_per_quarter: 480,
            tracks: vec![vec![
                Event::new(0, Message::PatchChange { channel: 0, patch: 5 }),
                note(0, 480, 0, 60, 90),
                note(0, 240, 0, 64, 80),
                note(240, 240, 0, 67, 70),
                note(480, 960, 9, 36, 100),
                Event::new(1440, Message::Text { kind: crate::midi::TextKind::Marker, data: b"end".to_vec() }),
            ]],
        };
        let opus = score_to_opus(&original);
        // Deltas sum to the last absolute tick
        assert_eq!(opus.tracks[0].iter().map(|e| e.time).sum::<u64>(), 1440);
        let back = opus_to_score(&opus);
        assert_eq!(back.ticks_per_quarter, 480);
        assert_eq!(sorted(back.tracks[0].clone()), sorted(original.tracks[0].clone()));
    }

    #[test]
    fn test_tempo_map_latest_track_wins() {
        let o = opus(96, vec![vec![tempo(0, 500_000), tempo(96, 400_000)], vec![tempo(96, 300_000)]]);
        let map = TempoMap::from_opus(&o).unwrap();
        assert_eq!(map.entries(), &[(0, 500_000), (96, 300_000)]);
    }

    #[test]
    fn test_to_millisecs_constant_tempo() {
        let o = opus(96, vec![vec![tempo(0, 500_000), on(0, 0, 60, 90), off(96, 0, 60)]]);
        let ms = to_millisecs(&o).unwrap();
        assert_eq!(ms.ticks_per_quarter, 1000);
        assert_eq!(
            ms.tracks[0],
            vec![tempo(0, 1_000_000), on(0, 0, 60, 90), off(500, 0, 60)]
        );
    }

    #[test]
    fn test_tempo_change_between_events_applies_at_its_tick() {
        // 10 ms/tick until tick 50, then 5 ms/tick
        let conductor = vec![tempo(0, 1_000_000), tempo(50, 500_000)];
        let notes = vec![on(0, 0, 60, 90), off(100, 0, 60)];
        let ms = to_millisecs(&opus(100, vec![conductor, notes])).unwrap();
        assert_eq!(ms.tracks[1][2], off(750, 0, 60));
    }

    #[test]
    fn test_several_tempo_changes_inside_one_delta() {
        let conductor = vec![tempo(0, 1_000_000), tempo(10, 2_000_000), tempo(10, 500_000)];
        let notes = vec![on(0, 0, 60, 90), off(40, 0, 60)];
        // 10 ticks at 10ms, 10 at 20ms, 20 at 5ms
        let ms = to_millisecs(&opus(100, vec![conductor, notes])).unwrap();
        assert_eq!(ms.tracks[1][2].time, 100 + 200 + 100);
    }

    #[test]
    fn test_rounding_does_not_drift() {
        // 1/3 ms per tick; six one-tick steps make exactly 2 ms
        let mut track = vec![tempo(0, 1000)];
        for _ in 0..6 {
            track.push(Event::new(1, Message::ControlChange { channel: 0, controller: 1, value: 0 }));
        }
        let ms = to_millisecs(&opus(3, vec![track])).unwrap();
        let total: u64 = ms.tracks[0].iter().map(|e| e.time).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_millisecond_time_is_monotonic() {
        let conductor = vec![tempo(0, 700_000), tempo(7, 123_457), tempo(30, 2_345_678), tempo(1, 90_001)];
        let mut notes = Vec::new();
        for i in 0..40u64 {
            notes.push(on(i % 3, 0, 60 + (i % 12) as u8, 90));
        }
        let ms = to_millisecs(&opus(7, vec![conductor, notes])).unwrap();
        // Cumulative times of deltas are non-decreasing by construction; check
        // they also track the exact cumulative value within rounding.
        let total: u64 = ms.tracks[1].iter().map(|e| e.time).sum();
        assert!(total > 0);
        let score = opus_to_score(&ms);
        let times: Vec<u64> = score.tracks[1].iter().map(|e| e.time).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_to_millisecs_rejects_score_notes() {
        let o = opus(96, vec![vec![], vec![note(0, 10, 0, 60, 90)]]);
        assert_eq!(to_millisecs(&o), Err(TimingError::ScoreEventInOpus { track: 1 }));
    }

    #[test]
    fn test_single_track_ms_score_merges_tracks() {
        let conductor = vec![tempo(0, 500_000)];
        let a = vec![on(0, 0, 60, 90), off(96, 0, 60)];
        let b = vec![on(96, 1, 64, 80), off(96, 1, 64)];
        let score = single_track_ms_score(&opus(96, vec![conductor, a, b])).unwrap();
        assert_eq!(score.ticks_per_quarter, 1000);
        assert_eq!(score.tracks.len(), 1);
        let notes: Vec<&Event> = score.tracks[0]
            .iter()
            .filter(|e| matches!(e.message, Message::Note { .. }))
            .collect();
        assert_eq!(notes, vec![&note(0, 500, 0, 60, 90), &note(500, 500, 1, 64, 80)]);
    }
}
