//! Fixed catalogues of canonical pitch-class shapes.
//!
//! Each shape is a 12-bit mask, bit `n` set when pitch class `n` is present.
//! The position of a shape in its catalogue is its canonical id.

use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;

/// The chord shapes the fingerprint vocabulary accepts, in id order.
const SORTED_SHAPES: [u16; 321] = [
    0x001, 0x005, 0x009, 0x011, 0x015, 0x021, 0x025, 0x029, 0x041, 0x045, 0x049, 0x051,
    0x055, 0x081, 0x085, 0x089, 0x091, 0x0A1, 0x095, 0x0A5, 0x0A9, 0x101, 0x105, 0x109,
    0x111, 0x121, 0x141, 0x115, 0x125, 0x145, 0x129, 0x149, 0x151, 0x155, 0x201, 0x205,
    0x209, 0x211, 0x221, 0x241, 0x281, 0x215, 0x225, 0x245, 0x285, 0x229, 0x249, 0x289,
    0x251, 0x291, 0x2A1, 0x255, 0x295, 0x2A5, 0x2A9, 0x401, 0x405, 0x409, 0x411, 0x421,
    0x441, 0x481, 0x501, 0x415, 0x425, 0x445, 0x485, 0x505, 0x429, 0x449, 0x489, 0x509,
    0x451, 0x491, 0x511, 0x4A1, 0x521, 0x541, 0x455, 0x495, 0x515, 0x4A5, 0x525, 0x545,
    0x4A9, 0x529, 0x549, 0x551, 0x555, 0x002, 0x00A, 0x012, 0x022, 0x02A, 0x042, 0x04A,
    0x052, 0x082, 0x08A, 0x092, 0x0A2, 0x0AA, 0x102, 0x10A, 0x112, 0x122, 0x142, 0x12A,
    0x14A, 0x152, 0x202, 0x20A, 0x212, 0x222, 0x242, 0x282, 0x22A, 0x24A, 0x28A, 0x252,
    0x292, 0x2A2, 0x2AA, 0x402, 0x40A, 0x412, 0x422, 0x442, 0x482, 0x502, 0x42A, 0x44A,
    0x48A, 0x50A, 0x452, 0x492, 0x512, 0x4A2, 0x522, 0x542, 0x4AA, 0x52A, 0x54A, 0x552,
    0x802, 0x80A, 0x812, 0x822, 0x842, 0x882, 0x902, 0xA02, 0x82A, 0x84A, 0x88A, 0x90A,
    0xA0A, 0x852, 0x892, 0x912, 0xA12, 0x8A2, 0x922, 0xA22, 0x942, 0xA42, 0xA82, 0x8AA,
    0x92A, 0xA2A, 0x94A, 0xA4A, 0xA8A, 0x952, 0xA52, 0xA92, 0xAA2, 0xAAA, 0x004, 0x014,
    0x024, 0x044, 0x054, 0x084, 0x094, 0x0A4, 0x104, 0x114, 0x124, 0x144, 0x154, 0x204,
    0x214, 0x224, 0x244, 0x284, 0x254, 0x294, 0x2A4, 0x404, 0x414, 0x424, 0x444, 0x484,
    0x504, 0x454, 0x494, 0x514, 0x4A4, 0x524, 0x544, 0x554, 0x804, 0x814, 0x824, 0x844,
    0x884, 0x904, 0xA04, 0x854, 0x894, 0x914, 0xA14, 0x8A4, 0x924, 0xA24, 0x944, 0xA44,
    0xA84, 0x954, 0xA54, 0xA94, 0xAA4, 0x008, 0x028, 0x048, 0x088, 0x0A8, 0x108, 0x128,
    0x148, 0x208, 0x228, 0x248, 0x288, 0x2A8, 0x408, 0x428, 0x448, 0x488, 0x508, 0x4A8,
    0x528, 0x548, 0x808, 0x828, 0x848, 0x888, 0x908, 0xA08, 0x8A8, 0x928, 0xA28, 0x948,
    0xA48, 0xA88, 0xAA8, 0x010, 0x050, 0x090, 0x110, 0x150, 0x210, 0x250, 0x290, 0x410,
    0x450, 0x490, 0x510, 0x550, 0x810, 0x850, 0x890, 0x910, 0xA10, 0x950, 0xA50, 0xA90,
    0x020, 0x0A0, 0x120, 0x220, 0x2A0, 0x420, 0x4A0, 0x520, 0x820, 0x8A0, 0x920, 0xA20,
    0xAA0, 0x040, 0x140, 0x240, 0x440, 0x540, 0x840, 0x940, 0xA40, 0x080, 0x280, 0x480,
    0x880, 0xA80, 0x100, 0x500, 0x900, 0x200, 0xA00, 0x400, 0x800,
];

/// The subset of [`SORTED_SHAPES`] used to repair unknown chords when the
/// full catalogue is active.
const FULL_SHAPES: [u16; 136] = [
    0x001, 0x009, 0x029, 0x129, 0x229, 0x429, 0x049, 0x249, 0x449, 0x089, 0x489, 0x109,
    0x209, 0x409, 0x011, 0x051, 0x251, 0x451, 0x091, 0x491, 0x111, 0x211, 0x411, 0x021,
    0x121, 0x221, 0x421, 0x041, 0x241, 0x441, 0x081, 0x481, 0x101, 0x201, 0x401, 0x002,
    0x012, 0x052, 0x252, 0x452, 0x852, 0x092, 0x492, 0x892, 0x112, 0x912, 0x212, 0x412,
    0x812, 0x022, 0x122, 0x922, 0x222, 0x422, 0x822, 0x042, 0x242, 0x442, 0x842, 0x082,
    0x482, 0x882, 0x102, 0x902, 0x202, 0x402, 0x802, 0x004, 0x024, 0x124, 0x924, 0x224,
    0x424, 0x824, 0x044, 0x244, 0x444, 0x844, 0x084, 0x484, 0x884, 0x104, 0x904, 0x204,
    0x404, 0x804, 0x008, 0x028, 0x128, 0x928, 0x228, 0x428, 0x828, 0x048, 0x248, 0x448,
    0x848, 0x088, 0x488, 0x888, 0x108, 0x908, 0x208, 0x408, 0x808, 0x010, 0x050, 0x250,
    0x450, 0x850, 0x090, 0x490, 0x890, 0x110, 0x910, 0x210, 0x410, 0x810, 0x020, 0x120,
    0x920, 0x220, 0x420, 0x820, 0x040, 0x240, 0x440, 0x840, 0x080, 0x480, 0x880, 0x100,
    0x900, 0x200, 0x400, 0x800,
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalizeError {
    #[error("cannot canonicalize an empty pitch-class set")]
    EmptyPitchClassSet,
    #[error("no subset of {0} is in the {1:?} catalogue")]
    NoCanonicalMatch(PitchClassSet, Catalogue),
}

/// A set of pitch classes 0..=11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PitchClassSet(u16);

impl PitchClassSet {
    pub const EMPTY: Self = Self(0);

    pub fn from_bits(bits: u16) -> Self {
        Self(bits & 0x0FFF)
    }

    /// Pitch classes of MIDI pitches (`pitch % 12`).
    pub fn from_pitches(pitches: impl IntoIterator<Item = u8>) -> Self {
        pitches
            .into_iter()
            .fold(Self::EMPTY, |set, p| Self(set.0 | 1 << (p % 12)))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, class: u8) -> bool {
        class < 12 && self.0 & (1 << class) != 0
    }

    /// Member pitch classes in ascending order.
    pub fn classes(self) -> Vec<u8> {
        (0..12).filter(|&c| self.contains(c)).collect()
    }
}

impl fmt::Display for PitchClassSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.classes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Catalogue {
    Sorted,
    Full,
}

static SORTED_LOOKUP: OnceLock<Vec<(u16, usize)>> = OnceLock::new();
static FULL_LOOKUP: OnceLock<Vec<(u16, usize)>> = OnceLock::new();

fn build_lookup(shapes: &[u16]) -> Vec<(u16, usize)> {
    let mut lookup: Vec<(u16, usize)> = shapes.iter().enumerate().map(|(i, &m)| (m, i)).collect();
    lookup.sort_unstable();
    lookup
}

impl Catalogue {
    pub fn shapes(self) -> &'static [u16] {
        match self {
            Self::Sorted => &SORTED_SHAPES,
            Self::Full => &FULL_SHAPES,
        }
    }

    pub fn len(self) -> usize {
        self.shapes().len()
    }

    pub fn get(self, id: usize) -> Option<PitchClassSet> {
        self.shapes().get(id).map(|&m| PitchClassSet(m))
    }

    /// Canonical id of a shape, if it is in the catalogue.
    pub fn id_of(self, set: PitchClassSet) -> Option<usize> {
        let lookup = match self {
            Self::Sorted => SORTED_LOOKUP.get_or_init(|| build_lookup(&SORTED_SHAPES)),
            Self::Full => FULL_LOOKUP.get_or_init(|| build_lookup(&FULL_SHAPES)),
        };
        lookup
            .binary_search_by_key(&set.0, |&(mask, _)| mask)
            .ok()
            .map(|pos| lookup[pos].1)
    }

    pub fn contains(self, set: PitchClassSet) -> bool {
        self.id_of(set).is_some()
    }
}

/// Map a pitch-class set onto the largest subset of it that is in `catalogue`.
///
/// Subsets are tried from the full set downwards; within one size they are
/// tried in lexicographic order of member positions, and the first hit wins.
/// Shapes already in the catalogue come back unchanged.
pub fn canonicalize(set: PitchClassSet, catalogue: Catalogue) -> Result<PitchClassSet, CanonicalizeError> {
    if set.is_empty() {
        return Err(CanonicalizeError::EmptyPitchClassSet);
    }
    if catalogue.contains(set) {
        return Ok(set);
    }

    let classes = set.classes();
    for size in (1..classes.len()).rev() {
        let mut found = None;
        for_each_combination(classes.len(), size, |indices| {
            let subset = PitchClassSet::from_pitches(indices.iter().map(|&i| classes[i]));
            if catalogue.contains(subset) {
                found = Some(subset);
                return false;
            }
            true
        });
        if let Some(subset) = found {
            return Ok(subset);
        }
    }

    Err(CanonicalizeError::NoCanonicalMatch(set, catalogue))
}

/// Visit every `k`-combination of `0..n` in lexicographic order until `visit`
/// returns false.
fn for_each_combination(n: usize, k: usize, mut visit: impl FnMut(&[usize]) -> bool) {
    if k == 0 || k > n {
        return;
    }
    let mut indices: Vec<usize> = (0..k).collect();
    loop {
        if !visit(&indices) {
            return;
        }
        // Rightmost index that can still move right
        let Some(i) = (0..k).rev().find(|&i| indices[i] != i + n - k) else {
            return;
        };
        indices[i] += 1;
        for j in i + 1..k {
            indices[j] = indices[j - 1] + 1;
        }
    }
}
