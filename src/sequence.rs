//! Chord sequences over a bar range, root profiles, and the usable-bar overlay.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::harmony::{ChordError, ChordSymbol, interval};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SequenceError {
    #[error("Invalid bar range {from}..={to}")]
    InvalidBarRange { from: u32, to: u32 },
    #[error("Bar range {inner} is outside {outer}")]
    RangeOutside { inner: BarRange, outer: BarRange },
    #[error("Position bar {bar} beat {beat} is outside the sequence")]
    PositionOutOfRange { bar: u32, beat: f32 },
    #[error("Time signatures differ: {0} vs {1} beats per bar")]
    TimeSignatureMismatch(u8, u8),
    #[error("Bar {0} is outside the sequence")]
    BarOutOfRange(u32),
    #[error("Empty progression")]
    EmptyProgression,
    #[error(transparent)]
    Chord(#[from] ChordError),
}

pub type Result<T> = std::result::Result<T, SequenceError>;

/// Beats per bar, quarter-note beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats_per_bar: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { beats_per_bar: 4 }
    }
}

impl TimeSignature {
    pub fn new(beats_per_bar: u8) -> Self {
        Self { beats_per_bar }
    }

    pub fn beats(&self) -> f32 {
        self.beats_per_bar as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Position {
    pub bar: u32,
    pub beat: f32,
}

impl Position {
    pub fn new(bar: u32, beat: f32) -> Self {
        Self { bar, beat }
    }

    /// Beats elapsed since bar 0 beat 0.
    pub fn absolute_beats(&self, ts: TimeSignature) -> f32 {
        self.bar as f32 * ts.beats() + self.beat
    }
}

/// Inclusive range of bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarRange {
    pub from: u32,
    pub to: u32,
}

impl BarRange {
    pub fn new(from: u32, to: u32) -> Result<Self> {
        if from > to {
            return Err(SequenceError::InvalidBarRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Range of `size` bars starting at `from`. `size` must be at least 1.
    pub fn with_size(from: u32, size: u32) -> Result<Self> {
        if size == 0 {
            return Err(SequenceError::InvalidBarRange { from, to: from });
        }
        let to = from
            .checked_add(size - 1)
            .ok_or(SequenceError::InvalidBarRange { from, to: u32::MAX })?;
        Ok(Self { from, to })
    }

    pub fn size(&self) -> u32 {
        self.to - self.from + 1
    }

    pub fn contains(&self, bar: u32) -> bool {
        bar >= self.from && bar <= self.to
    }

    pub fn contains_range(&self, other: &BarRange) -> bool {
        other.from >= self.from && other.to <= self.to
    }

    pub fn intersects(&self, other: &BarRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    pub fn union(&self, other: &BarRange) -> BarRange {
        BarRange {
            from: self.from.min(other.from),
            to: self.to.max(other.to),
        }
    }

    /// Same size, starting at `from`.
    pub fn moved_to(&self, from: u32) -> Result<BarRange> {
        let to = from
            .checked_add(self.to - self.from)
            .ok_or(SequenceError::InvalidBarRange { from, to: u32::MAX })?;
        Ok(BarRange { from, to })
    }

    pub fn bars(&self) -> RangeInclusive<u32> {
        self.from..=self.to
    }
}

impl fmt::Display for BarRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.from, self.to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChordSlot {
    pub position: Position,
    pub symbol: ChordSymbol,
}

impl ChordSlot {
    pub fn new(bar: u32, beat: f32, symbol: ChordSymbol) -> Self {
        Self {
            position: Position::new(bar, beat),
            symbol,
        }
    }
}

/// Coarse harmonic fingerprint: (beat offset x100 from the sequence start,
/// root interval above the first root) per chord. Transposition-invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RootProfile(Vec<(u32, u8)>);

impl RootProfile {
    pub fn entries(&self) -> &[(u32, u8)] {
        &self.0
    }
}

impl fmt::Display for RootProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(pos, iv)| format!("{:.2}:{}", *pos as f32 / 100.0, iv))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// Chords over a bar range, sorted by position, one chord per position.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordSequence {
    bar_range: BarRange,
    time_signature: TimeSignature,
    slots: Vec<ChordSlot>,
}

impl ChordSequence {
    pub fn new(bar_range: BarRange, time_signature: TimeSignature) -> Self {
        Self {
            bar_range,
            time_signature,
            slots: Vec::new(),
        }
    }

    /// Parse a progression like `"Cm7 F7 | Bbmaj7 | % | Eb6 D7"` starting at bar 0.
    ///
    /// Bars are separated by `|`; chords inside a bar are spread evenly over
    /// its beats. An empty bar or `%` holds the previous chord, as does a
    /// chord repeating the one already sounding: neither adds a slot.
    pub fn parse(text: &str, time_signature: TimeSignature) -> Result<Self> {
        let bars: Vec<&str> = text.split('|').map(str::trim).collect();
        let mut slots = Vec::new();

        for (bar, content) in bars.iter().enumerate() {
            let bar = bar as u32;
            let tokens: Vec<&str> = content.split_whitespace().collect();
            if tokens.is_empty() || tokens == ["%"] {
                if slots.is_empty() {
                    return Err(SequenceError::EmptyProgression);
                }
                continue;
            }
            let step = time_signature.beats() / tokens.len() as f32;
            for (i, token) in tokens.iter().enumerate() {
                let symbol: ChordSymbol = token.parse()?;
                slots.push(ChordSlot::new(bar, i as f32 * step, symbol));
            }
        }

        if slots.is_empty() {
            return Err(SequenceError::EmptyProgression);
        }

        let range = BarRange::with_size(0, bars.len() as u32)?;
        let mut seq = ChordSequence::new(range, time_signature);
        for slot in slots {
            seq.add(slot)?;
        }
        Ok(seq)
    }

    /// Insert a chord, replacing any chord already at the same position.
    ///
    /// A chord equal to the one sounding before it is a held chord and is
    /// not stored, so the same harmony always yields the same slots.
    pub fn add(&mut self, slot: ChordSlot) -> Result<()> {
        let pos = slot.position;
        if !self.bar_range.contains(pos.bar) || pos.beat < 0.0 || pos.beat >= self.time_signature.beats() {
            return Err(SequenceError::PositionOutOfRange {
                bar: pos.bar,
                beat: pos.beat,
            });
        }
        match self.slots.iter().position(|s| s.position >= pos) {
            Some(i) if self.slots[i].position == pos => self.slots[i] = slot,
            Some(i) => self.slots.insert(i, slot),
            None => self.slots.push(slot),
        }
        self.slots.dedup_by(|later, earlier| later.symbol == earlier.symbol);
        Ok(())
    }

    pub fn bar_range(&self) -> BarRange {
        self.bar_range
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn slots(&self) -> &[ChordSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn first_root(&self) -> Option<u8> {
        self.slots.first().map(|s| s.symbol.root)
    }

    /// The chord sounding at `pos`: the last chord at or before it.
    pub fn chord_at(&self, pos: Position) -> Option<&ChordSlot> {
        self.slots.iter().rev().find(|s| s.position <= pos)
    }

    pub fn root_profile(&self) -> RootProfile {
        let Some(first_root) = self.first_root() else {
            return RootProfile::default();
        };
        let start = Position::new(self.bar_range.from, 0.0).absolute_beats(self.time_signature);
        RootProfile(
            self.slots
                .iter()
                .map(|s| {
                    let offset = s.position.absolute_beats(self.time_signature) - start;
                    ((offset * 100.0).round() as u32, interval(first_root, s.symbol.root))
                })
                .collect(),
        )
    }

    /// The chords inside `range`, keeping absolute bar numbers.
    ///
    /// With `add_init_chord`, the chord sounding at the start of `range` is
    /// copied to its first beat when no chord starts there.
    pub fn sub_sequence(&self, range: BarRange, add_init_chord: bool) -> Result<ChordSequence> {
        if !self.bar_range.contains_range(&range) {
            return Err(SequenceError::RangeOutside {
                inner: range,
                outer: self.bar_range,
            });
        }
        let mut sub = ChordSequence::new(range, self.time_signature);
        sub.slots = self
            .slots
            .iter()
            .filter(|s| range.contains(s.position.bar))
            .copied()
            .collect();

        let start = Position::new(range.from, 0.0);
        let starts_with_chord = sub.slots.first().is_some_and(|s| s.position == start);
        if add_init_chord && !starts_with_chord {
            if let Some(prev) = self.chord_at(start) {
                sub.slots.insert(0, ChordSlot { position: start, symbol: prev.symbol });
            }
        }
        Ok(sub)
    }

    /// Same chords with the range renumbered to start at `from`.
    pub fn shifted(&self, from: u32) -> Result<ChordSequence> {
        Ok(self.renumbered(self.bar_range.moved_to(from)?))
    }

    /// Same chords renumbered to start at bar 0.
    pub fn normalized(&self) -> ChordSequence {
        self.renumbered(BarRange {
            from: 0,
            to: self.bar_range.to - self.bar_range.from,
        })
    }

    fn renumbered(&self, new_range: BarRange) -> ChordSequence {
        let slots = self
            .slots
            .iter()
            .map(|s| ChordSlot {
                position: Position::new(s.position.bar - self.bar_range.from + new_range.from, s.position.beat),
                symbol: s.symbol,
            })
            .collect();
        ChordSequence {
            bar_range: new_range,
            time_signature: self.time_signature,
            slots,
        }
    }

    /// Union of bars and chords. On a position present in both, `other` wins.
    pub fn merge(&self, other: &ChordSequence) -> Result<ChordSequence> {
        if self.time_signature != other.time_signature {
            return Err(SequenceError::TimeSignatureMismatch(
                self.time_signature.beats_per_bar,
                other.time_signature.beats_per_bar,
            ));
        }
        let mut merged = ChordSequence::new(self.bar_range.union(&other.bar_range), self.time_signature);
        merged.slots = self.slots.clone();
        for slot in &other.slots {
            merged.add(*slot)?;
        }
        Ok(merged)
    }
}

impl fmt::Display for ChordSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for bar in self.bar_range.bars() {
            if !first {
                f.write_str(" | ")?;
            }
            first = false;
            let chords: Vec<String> = self
                .slots
                .iter()
                .filter(|s| s.position.bar == bar)
                .map(|s| s.symbol.to_string())
                .collect();
            if chords.is_empty() {
                f.write_str("%")?;
            } else {
                f.write_str(&chords.join(" "))?;
            }
        }
        Ok(())
    }
}

/// A chord sequence whose bars are individually marked usable for fragment
/// placement. Usable bars always lie inside the bar range.
#[derive(Debug, Clone, PartialEq)]
pub struct UsableChordSequence {
    sequence: ChordSequence,
    usable: BTreeSet<u32>,
}

impl UsableChordSequence {
    /// Every bar usable.
    pub fn new(sequence: ChordSequence) -> Self {
        let usable = sequence.bar_range().bars().collect();
        Self { sequence, usable }
    }

    pub fn with_usable_bars(sequence: ChordSequence, bars: impl IntoIterator<Item = u32>) -> Result<Self> {
        let range = sequence.bar_range();
        let usable: BTreeSet<u32> = bars.into_iter().collect();
        if let Some(bad) = usable.iter().find(|b| !range.contains(**b)) {
            return Err(SequenceError::BarOutOfRange(*bad));
        }
        Ok(Self { sequence, usable })
    }

    pub fn sequence(&self) -> &ChordSequence {
        &self.sequence
    }

    pub fn bar_range(&self) -> BarRange {
        self.sequence.bar_range()
    }

    pub fn usable_bars(&self) -> &BTreeSet<u32> {
        &self.usable
    }

    pub fn set_usable(&mut self, bar: u32, usable: bool) -> Result<()> {
        if !self.bar_range().contains(bar) {
            return Err(SequenceError::BarOutOfRange(bar));
        }
        if usable {
            self.usable.insert(bar);
        } else {
            self.usable.remove(&bar);
        }
        Ok(())
    }

    pub fn is_usable(&self, bar: u32) -> bool {
        self.usable.contains(&bar)
    }

    /// True only if every bar of `range` is usable.
    pub fn is_usable_range(&self, range: BarRange) -> bool {
        range.bars().all(|b| self.usable.contains(&b))
    }

    pub fn sub_sequence(&self, range: BarRange, add_init_chord: bool) -> Result<UsableChordSequence> {
        let sequence = self.sequence.sub_sequence(range, add_init_chord)?;
        let usable = self.usable.iter().copied().filter(|b| range.contains(*b)).collect();
        Ok(Self { sequence, usable })
    }

    /// Union of chords. Usable bars are unioned when `merge_usable`,
    /// otherwise only this sequence's usable bars are kept.
    pub fn merge(&self, other: &UsableChordSequence, merge_usable: bool) -> Result<UsableChordSequence> {
        let sequence = self.sequence.merge(&other.sequence)?;
        let mut usable = self.usable.clone();
        if merge_usable {
            usable.extend(other.usable.iter().copied());
        }
        Ok(Self { sequence, usable })
    }
}
