//! Coverage and quality audit of a style's fragments.
//!
//! Three checks, all advisory (findings are logged and returned, never
//! fatal):
//! - every base chord type has enough one-bar candidates
//! - every pair of common chord qualities, split at mid-bar, under all
//!   twelve root movements, has enough one-bar candidates
//! - no one-bar fragment contains ghost notes

use std::fmt;

use crate::db::Database;
use crate::db::models::BassStyle;
use crate::harmony::{ChordSymbol, ChordType};
use crate::scoring::Scorer;
use crate::sequence::{BarRange, ChordSequence, ChordSlot, TimeSignature};

/// Fewer one-bar candidates than this is reported.
pub const MIN_CANDIDATES: usize = 2;

/// Qualities combined pairwise in the two-chord check.
pub const PAIR_QUALITIES: [&str; 6] = ["", "m", "7", "m7", "maj7", "m7b5"];

/// Notes shorter than this, or followed sooner than this, are ghost notes.
pub const MIN_NOTE_BEATS: f32 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct Coverage {
    /// The probed progression, e.g. "Cm7" or "Cm7 Eb7"
    pub chords: String,
    pub candidates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GhostNote {
    pub fragment_id: String,
    pub note_index: usize,
    pub pitch: u8,
    /// Duration or gap to the next note, whichever is too short
    pub beats: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyReport {
    pub style: BassStyle,
    pub types_checked: usize,
    pub weak_types: Vec<Coverage>,
    pub pairs_checked: usize,
    pub weak_pairs: Vec<Coverage>,
    pub ghost_notes: Vec<GhostNote>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.weak_types.is_empty() && self.weak_pairs.is_empty() && self.ghost_notes.is_empty()
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "style {}", self.style)?;
        writeln!(f, "  chord types:  {} weak / {}", self.weak_types.len(), self.types_checked)?;
        writeln!(f, "  chord pairs:  {} weak / {}", self.weak_pairs.len(), self.pairs_checked)?;
        write!(f, "  ghost notes:  {}", self.ghost_notes.len())
    }
}

pub fn check(db: &Database, style: BassStyle) -> ConsistencyReport {
    let scorer = Scorer::new();
    let ts = TimeSignature::default();
    let count = |chords: &[(f32, ChordSymbol)]| {
        one_bar(chords, ts).map(|seq| scorer.find_candidates(db, style, &seq, None).len())
    };

    let mut report = ConsistencyReport {
        style,
        types_checked: 0,
        weak_types: Vec::new(),
        pairs_checked: 0,
        weak_pairs: Vec::new(),
        ghost_notes: Vec::new(),
    };

    for chord_type in ChordType::base_types() {
        let symbol = ChordSymbol::new(0, chord_type);
        let Some(candidates) = count(&[(0.0, symbol)]) else {
            continue;
        };
        report.types_checked += 1;
        if candidates < MIN_CANDIDATES {
            log::warn!("{style}: only {candidates} one-bar fragment(s) for {symbol}");
            report.weak_types.push(Coverage {
                chords: symbol.to_string(),
                candidates,
            });
        }
    }

    let qualities: Vec<ChordType> = PAIR_QUALITIES.iter().filter_map(|s| ChordType::from_suffix(s)).collect();
    let mid_bar = ts.beats() / 2.0;
    for first in &qualities {
        for second in &qualities {
            for shift in 0..12 {
                let a = ChordSymbol::new(0, *first);
                let b = ChordSymbol::new(0, *second).transposed(shift);
                let Some(candidates) = count(&[(0.0, a), (mid_bar, b)]) else {
                    continue;
                };
                report.pairs_checked += 1;
                if candidates < MIN_CANDIDATES {
                    log::debug!("{style}: only {candidates} one-bar fragment(s) for {a} {b}");
                    report.weak_pairs.push(Coverage {
                        chords: format!("{a} {b}"),
                        candidates,
                    });
                }
            }
        }
    }
    if !report.weak_pairs.is_empty() {
        log::warn!(
            "{style}: {} of {} chord pairs lack one-bar fragments",
            report.weak_pairs.len(),
            report.pairs_checked
        );
    }

    report.ghost_notes = ghost_notes(db, style);
    for ghost in &report.ghost_notes {
        log::warn!(
            "{style}: ghost note {} (pitch {}, {:.2} beats) in {}",
            ghost.note_index,
            ghost.pitch,
            ghost.beats,
            ghost.fragment_id
        );
    }

    log::info!(
        "{style}: {} weak chord types, {} weak chord pairs, {} ghost notes",
        report.weak_types.len(),
        report.weak_pairs.len(),
        report.ghost_notes.len()
    );
    report
}

fn one_bar(chords: &[(f32, ChordSymbol)], ts: TimeSignature) -> Option<ChordSequence> {
    let mut seq = ChordSequence::new(BarRange { from: 0, to: 0 }, ts);
    for (beat, symbol) in chords {
        seq.add(ChordSlot::new(0, *beat, *symbol)).ok()?;
    }
    Some(seq)
}

fn ghost_notes(db: &Database, style: BassStyle) -> Vec<GhostNote> {
    let Ok(fragments) = db.fragments_of(Some(1), &[style]) else {
        return Vec::new();
    };
    let mut ghosts = Vec::new();
    for fragment in fragments {
        let notes = fragment.phrase().notes();
        for (i, note) in notes.iter().enumerate() {
            let gap = notes.get(i + 1).map(|next| next.position - note.position);
            let shortest = gap.map_or(note.duration, |g| g.min(note.duration));
            if shortest < MIN_NOTE_BEATS {
                ghosts.push(GhostNote {
                    fragment_id: fragment.id().to_string(),
                    note_index: i,
                    pitch: note.pitch,
                    beats: shortest,
                });
            }
        }
    }
    ghosts
}
