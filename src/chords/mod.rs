pub mod catalogue;

pub use catalogue::{CanonicalizeError, Catalogue, PitchClassSet, canonicalize};

use crate::midi::{Event, Score};

/// Anything carrying a single timestamp (a start time for notes).
pub trait Timed {
    fn time(&self) -> u64;
}

impl Timed for Event {
    fn time(&self) -> u64 {
        self.time
    }
}

/// How the timestamps of a sequence are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeEncoding {
    /// Non-decreasing absolute times.
    Absolute,
    /// Deltas from the previous item.
    Relative,
}

pub fn detect_encoding<T: Timed>(items: &[T]) -> TimeEncoding {
    if items.windows(2).all(|w| w[0].time() <= w[1].time()) {
        TimeEncoding::Absolute
    } else {
        TimeEncoding::Relative
    }
}

/// Group a sequence into chords of simultaneous items, keeping input order.
///
/// Absolute times start a new chord whenever the timestamp changes;
/// relative times start one on every non-zero delta.
pub fn chordify<T: Timed>(items: Vec<T>) -> Vec<Vec<T>> {
    let encoding = detect_encoding(&items);
    let mut chords = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut previous_time = None;

    for item in items {
        let time = item.time();
        let starts_chord = match encoding {
            TimeEncoding::Absolute => previous_time.is_some_and(|p| p != time),
            TimeEncoding::Relative => time != 0,
        };
        if starts_chord && !current.is_empty() {
            chords.push(std::mem::take(&mut current));
        }
        current.push(item);
        previous_time = Some(time);
    }
    if !current.is_empty() {
        chords.push(current);
    }
    chords
}

/// Stable-sort by time, then group into chords.
pub fn chordify_by_time<T: Timed>(mut items: Vec<T>) -> Vec<Vec<T>> {
    items.sort_by_key(|item| item.time());
    chordify(items)
}

/// Chords of every event in a score, all tracks merged.
pub fn chordify_score(score: &Score) -> Vec<Vec<Event>> {
    chordify_by_time(score.tracks.iter().flatten().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::Message;

    impl Timed for (u64, char) {
        fn time(&self) -> u64 {
            self.0
        }
    }

    fn labels(chords: &[Vec<(u64, char)>]) -> Vec<String> {
        chords.iter().map(|c| c.iter().map(|x| x.1).collect()).collect()
    }

    #[test]
    fn test_absolute_grouping() {
        let items = vec![(0, 'a'), (0, 'b'), (5, 'c'), (9, 'd'), (9, 'e')];
        assert_eq!(detect_encoding(&items), TimeEncoding::Absolute);
        assert_eq!(labels(&chordify(items)), vec!["ab", "c", "de"]);
    }

    #[test]
    fn test_relative_grouping() {
        let items = vec![(0, 'a'), (0, 'b'), (5, 'c'), (3, 'd'), (0, 'e')];
        assert_eq!(detect_encoding(&items), TimeEncoding::Relative);
        assert_eq!(labels(&chordify(items)), vec!["ab", "c", "de"]);
    }

    #[test]
    fn test_sort_is_stable() {
        let items = vec![(9, 'x'), (0, 'a'), (9, 'y'), (0, 'b')];
        assert_eq!(labels(&chordify_by_time(items)), vec!["ab", "xy"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(chordify(Vec::<(u64, char)>::new()).is_empty());
    }

    #[test]
    fn test_chordify_score_merges_tracks() {
        let note = |t, p| Event::new(t, Message::Note { duration: 10, channel: 0, pitch: p, velocity: 90 });
        let score = Score {
            ticks_per_quarter: 1000,
            tracks: vec![vec![note(0, 60), note(10, 62)], vec![note(0, 64)]],
        };
        let chords = chordify_score(&score);
        assert_eq!(chords.len(), 2);
        assert_eq!(chords[0], vec![note(0, 60), note(0, 64)]);
        assert_eq!(chords[1], vec![note(10, 62)]);
    }
}
