//! Chord type catalogue and the chord-type compatibility oracle.
//!
//! A chord type is an interval set over the 12 pitch classes stored as a
//! bitmask (bit i set = interval i semitones above the root). Compatibility
//! only looks at the simplified base form (root, third, fifth, seventh):
//! extensions color a chord but never decide whether a bass line fits it.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChordType {
    pub suffix: &'static str,
    pub intervals: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Third {
    Major,
    Minor,
    Suspended,
    Omitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fifth {
    Perfect,
    Flat,
    Sharp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seventh {
    None,
    Sixth,
    Minor,
    Major,
    Diminished,
}

/// The essential degrees of a chord type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Degrees {
    pub third: Third,
    pub fifth: Fifth,
    pub seventh: Seventh,
}

impl ChordType {
    const fn new(suffix: &'static str, intervals: &[u8]) -> Self {
        let mut mask = 0u16;
        let mut i = 0;
        while i < intervals.len() {
            mask |= 1 << intervals[i];
            i += 1;
        }
        Self {
            suffix,
            intervals: mask,
        }
    }

    /// Major triad, the type of a bare root symbol like "C".
    pub fn major() -> Self {
        CATALOGUE[0]
    }

    /// Look up a chord type by its suffix or one of its aliases ("min7", "-7", "M7"...).
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let canonical = ALIASES
            .iter()
            .find(|(alias, _)| *alias == suffix)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(suffix);
        CATALOGUE.iter().find(|ct| ct.suffix == canonical).copied()
    }

    fn has(&self, interval: u8) -> bool {
        self.intervals & (1 << interval) != 0
    }

    pub fn degrees(&self) -> Degrees {
        let third = if self.has(4) {
            Third::Major
        } else if self.has(3) {
            Third::Minor
        } else if self.has(5) || self.has(2) {
            Third::Suspended
        } else {
            Third::Omitted
        };

        let fifth = if self.has(7) {
            Fifth::Perfect
        } else if self.has(6) {
            Fifth::Flat
        } else if self.has(8) {
            Fifth::Sharp
        } else {
            Fifth::Perfect
        };

        let seventh = if self.has(10) {
            Seventh::Minor
        } else if self.has(11) {
            Seventh::Major
        } else if self.has(9) && third == Third::Minor && fifth == Fifth::Flat {
            Seventh::Diminished
        } else if self.has(9) {
            Seventh::Sixth
        } else {
            Seventh::None
        };

        Degrees {
            third,
            fifth,
            seventh,
        }
    }

    /// Interval mask of the base form: root, third, fifth, seventh (or sixth).
    pub fn simplified_mask(&self) -> u16 {
        let d = self.degrees();
        let mut mask = 1u16;
        mask |= match d.third {
            Third::Major => 1 << 4,
            Third::Minor => 1 << 3,
            Third::Suspended if self.has(5) => 1 << 5,
            Third::Suspended => 1 << 2,
            Third::Omitted => 0,
        };
        mask |= match d.fifth {
            Fifth::Perfect => 1 << 7,
            Fifth::Flat => 1 << 6,
            Fifth::Sharp => 1 << 8,
        };
        mask |= match d.seventh {
            Seventh::None => 0,
            Seventh::Sixth | Seventh::Diminished => 1 << 9,
            Seventh::Minor => 1 << 10,
            Seventh::Major => 1 << 11,
        };
        mask
    }

    /// The catalogue entry of the base form, e.g. "9" -> "7", "maj9" -> "maj7".
    pub fn simplified(&self) -> ChordType {
        let mask = self.simplified_mask();
        CATALOGUE
            .iter()
            .find(|ct| ct.intervals == mask)
            .copied()
            .unwrap_or(*self)
    }

    /// Harmonic similarity in 0..=100, 0 meaning a bass line recorded over
    /// `self` must not be played over `target`.
    pub fn compatibility(&self, target: &ChordType) -> u8 {
        if self == target {
            return 100;
        }

        let a = self.degrees();
        let b = target.degrees();

        if a.third != b.third && a.third != Third::Omitted && b.third != Third::Omitted {
            return 0;
        }
        if a.fifth != b.fifth {
            return 0;
        }
        let sevenths_fit = match (a.seventh, b.seventh) {
            (x, y) if x == y => true,
            (Seventh::None, _) | (_, Seventh::None) => true,
            (Seventh::Sixth, Seventh::Major) | (Seventh::Major, Seventh::Sixth) => true,
            _ => false,
        };
        if !sevenths_fit {
            return 0;
        }

        let ma = self.simplified_mask();
        let mb = target.simplified_mask();
        if ma == mb {
            return 90;
        }
        let shared = (ma & mb).count_ones() as f32;
        let union = (ma | mb).count_ones() as f32;
        ((100.0 * shared / union).round() as u8).clamp(1, 80)
    }

    /// Distinct simplified base types of the whole catalogue.
    pub fn base_types() -> Vec<ChordType> {
        let mut bases: Vec<ChordType> = Vec::new();
        for ct in CATALOGUE {
            let base = ct.simplified();
            if !bases.contains(&base) {
                bases.push(base);
            }
        }
        bases
    }
}

impl fmt::Display for ChordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix)
    }
}

/// All supported chord types. Base forms first.
pub static CATALOGUE: &[ChordType] = &[
    // Triads and dyad
    ChordType::new("", &[0, 4, 7]),
    ChordType::new("m", &[0, 3, 7]),
    ChordType::new("dim", &[0, 3, 6]),
    ChordType::new("aug", &[0, 4, 8]),
    ChordType::new("sus4", &[0, 5, 7]),
    ChordType::new("sus2", &[0, 2, 7]),
    ChordType::new("5", &[0, 7]),
    // Sixths and sevenths
    ChordType::new("6", &[0, 4, 7, 9]),
    ChordType::new("m6", &[0, 3, 7, 9]),
    ChordType::new("7", &[0, 4, 7, 10]),
    ChordType::new("maj7", &[0, 4, 7, 11]),
    ChordType::new("m7", &[0, 3, 7, 10]),
    ChordType::new("m(maj7)", &[0, 3, 7, 11]),
    ChordType::new("m7b5", &[0, 3, 6, 10]),
    ChordType::new("dim7", &[0, 3, 6, 9]),
    ChordType::new("7sus4", &[0, 5, 7, 10]),
    ChordType::new("7b5", &[0, 4, 6, 10]),
    ChordType::new("7#5", &[0, 4, 8, 10]),
    // Extensions
    ChordType::new("add9", &[0, 2, 4, 7]),
    ChordType::new("6/9", &[0, 2, 4, 7, 9]),
    ChordType::new("m6/9", &[0, 2, 3, 7, 9]),
    ChordType::new("9", &[0, 2, 4, 7, 10]),
    ChordType::new("maj9", &[0, 2, 4, 7, 11]),
    ChordType::new("m9", &[0, 2, 3, 7, 10]),
    ChordType::new("m11", &[0, 2, 3, 5, 7, 10]),
    ChordType::new("11", &[0, 2, 5, 7, 10]),
    ChordType::new("13", &[0, 2, 4, 7, 9, 10]),
    ChordType::new("maj13", &[0, 2, 4, 7, 9, 11]),
    ChordType::new("7b9", &[0, 1, 4, 7, 10]),
    ChordType::new("7#9", &[0, 3, 4, 7, 10]),
    ChordType::new("7#11", &[0, 4, 6, 7, 10]),
    ChordType::new("7b13", &[0, 4, 7, 8, 10]),
    ChordType::new("9sus4", &[0, 2, 5, 7, 10]),
    ChordType::new("maj7#11", &[0, 4, 6, 7, 11]),
];

static ALIASES: &[(&str, &str)] = &[
    ("M", ""),
    ("maj", ""),
    ("min", "m"),
    ("-", "m"),
    ("o", "dim"),
    ("+", "aug"),
    ("sus", "sus4"),
    ("dom7", "7"),
    ("M7", "maj7"),
    ("Maj7", "maj7"),
    ("ma7", "maj7"),
    ("^7", "maj7"),
    ("min7", "m7"),
    ("-7", "m7"),
    ("mi7", "m7"),
    ("ø", "m7b5"),
    ("m7-5", "m7b5"),
    ("o7", "dim7"),
    ("mM7", "m(maj7)"),
    ("m(M7)", "m(maj7)"),
    ("-6", "m6"),
    ("M9", "maj9"),
    ("-9", "m9"),
    ("69", "6/9"),
    ("+7", "7#5"),
    ("7+", "7#5"),
    ("7alt", "7#9"),
];
