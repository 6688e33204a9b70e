pub mod chord_type;

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub use chord_type::ChordType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChordError {
    #[error("Invalid chord symbol: {0:?}")]
    InvalidSymbol(String),
    #[error("Unknown chord type {suffix:?} in {symbol:?}")]
    UnknownType { symbol: String, suffix: String },
}

const NOTE_NAMES: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

pub fn note_name(pitch_class: u8) -> &'static str {
    NOTE_NAMES[(pitch_class % 12) as usize]
}

/// MIDI pitch as name and octave, middle C (60) being "C4".
pub fn pitch_label(pitch: u8) -> String {
    format!("{}{}", note_name(pitch), i32::from(pitch) / 12 - 1)
}

/// Pitch class of a note name like "C", "F#", "Bb".
pub fn pitch_class(name: &str) -> Option<u8> {
    let mut chars = name.chars();
    let base: i32 = match chars.next()? {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let offset: i32 = match chars.as_str() {
        "" => 0,
        "#" => 1,
        "b" => -1,
        _ => return None,
    };
    Some((base + offset).rem_euclid(12) as u8)
}

/// Ascending interval in semitones (0..12) from pitch class `from` to `to`.
pub fn interval(from: u8, to: u8) -> u8 {
    ((to as i32 - from as i32).rem_euclid(12)) as u8
}

// Root + accidental, quality suffix (lazy so "6/9" stays in the suffix), optional slash bass
static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<root>[A-G][#b]?)(?P<suffix>.*?)(?:/(?P<bass>[A-G][#b]?))?$").unwrap()
});

/// A chord symbol: root pitch class, chord type, optional slash bass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChordSymbol {
    pub root: u8,
    pub chord_type: ChordType,
    pub bass: Option<u8>,
}

impl ChordSymbol {
    pub fn new(root: u8, chord_type: ChordType) -> Self {
        Self {
            root: root % 12,
            chord_type,
            bass: None,
        }
    }

    pub fn with_bass(mut self, bass: u8) -> Self {
        let bass = bass % 12;
        self.bass = (bass != self.root).then_some(bass);
        self
    }

    /// Pitch class the bass is expected to play on the chord.
    pub fn bass_note(&self) -> u8 {
        self.bass.unwrap_or(self.root)
    }

    pub fn transposed(&self, semitones: i32) -> Self {
        let shift = |pc: u8| (pc as i32 + semitones).rem_euclid(12) as u8;
        Self {
            root: shift(self.root),
            chord_type: self.chord_type,
            bass: self.bass.map(shift),
        }
    }

    /// Compatibility of a bass line recorded over `self` when played over
    /// `target`, roots assumed aligned by transposition. 0..=100.
    ///
    /// A slash bass on the target must be matched; a slash bass only on the
    /// recorded chord halves the value.
    pub fn compatibility(&self, target: &ChordSymbol) -> u8 {
        let value = self.chord_type.compatibility(&target.chord_type);
        if value == 0 {
            return 0;
        }
        let own_bass = interval(self.root, self.bass_note());
        let target_bass = interval(target.root, target.bass_note());
        match (self.bass.is_some(), target.bass.is_some()) {
            (_, true) if own_bass != target_bass => 0,
            (true, false) => value / 2,
            _ => value,
        }
    }
}

impl FromStr for ChordSymbol {
    type Err = ChordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let caps = SYMBOL_RE
            .captures(s)
            .ok_or_else(|| ChordError::InvalidSymbol(s.to_string()))?;

        let root = pitch_class(&caps["root"]).ok_or_else(|| ChordError::InvalidSymbol(s.to_string()))?;
        let suffix = caps.name("suffix").map(|m| m.as_str()).unwrap_or("");
        let chord_type = ChordType::from_suffix(suffix).ok_or_else(|| ChordError::UnknownType {
            symbol: s.to_string(),
            suffix: suffix.to_string(),
        })?;

        let mut symbol = ChordSymbol::new(root, chord_type);
        if let Some(bass) = caps.name("bass") {
            let pc = pitch_class(bass.as_str()).ok_or_else(|| ChordError::InvalidSymbol(s.to_string()))?;
            symbol = symbol.with_bass(pc);
        }
        Ok(symbol)
    }
}

impl fmt::Display for ChordSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", note_name(self.root), self.chord_type)?;
        if let Some(bass) = self.bass {
            write!(f, "/{}", note_name(bass))?;
        }
        Ok(())
    }
}
