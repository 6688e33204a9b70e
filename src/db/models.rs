use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{DbError, Result};
use crate::phrase::{ANTICIPATION_BEATS, Phrase};
use crate::sequence::{BarRange, ChordSequence, RootProfile, TimeSignature};

/// Largest fragment, in bars.
pub const MAX_FRAGMENT_BARS: u8 = 4;

/// A note starting up to this many beats after a slice end is the slice's target note.
const TARGET_NOTE_WINDOW: f32 = 0.5;

/// Playing style tag partitioning the fragments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BassStyle {
    TwoFeet,
    #[default]
    Walking,
    WalkingDoubleNote,
    WalkingDoubleTime,
}

impl BassStyle {
    pub const ALL: [BassStyle; 4] = [
        BassStyle::TwoFeet,
        BassStyle::Walking,
        BassStyle::WalkingDoubleNote,
        BassStyle::WalkingDoubleTime,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::TwoFeet => "two-feet",
            Self::Walking => "walking",
            Self::WalkingDoubleNote => "walking-double-note",
            Self::WalkingDoubleTime => "walking-double-time",
        }
    }
}

impl fmt::Display for BassStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BassStyle {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|style| style.name() == s)
            .ok_or(DbError::UnknownStyle(s))
    }
}

/// Index key of the database: fragments sharing a style and root profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub style: BassStyle,
    pub root_profile: RootProfile,
}

/// A 1-4 bar recorded bass excerpt with its local harmony. Immutable.
#[derive(Debug, Clone)]
pub struct Fragment {
    id: String,
    session_id: String,
    session_bars: BarRange,
    chords: ChordSequence,
    phrase: Phrase,
    style: BassStyle,
    target_note: Option<u8>,
    root_profile: RootProfile,
}

impl Fragment {
    /// `session_bars` locates the fragment inside its session; `chords` is
    /// renumbered to start at bar 0.
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        session_bars: BarRange,
        chords: ChordSequence,
        phrase: Phrase,
        style: BassStyle,
        target_note: Option<u8>,
    ) -> Result<Self> {
        let size = chords.bar_range().size();
        if size == 0 || size > MAX_FRAGMENT_BARS as u32 {
            return Err(DbError::InvalidSize(size as i32));
        }
        if session_bars.size() != size {
            return Err(DbError::InvalidFragment(format!(
                "session bars {session_bars} do not match {size} chord bars"
            )));
        }
        if chords.is_empty() {
            return Err(DbError::InvalidFragment("no chords".to_string()));
        }
        if phrase.notes().iter().any(|n| n.position < 0.0) {
            return Err(DbError::InvalidFragment("phrase starts before beat 0".to_string()));
        }
        let chords = chords.normalized();
        let root_profile = chords.root_profile();
        Ok(Self {
            id: id.into(),
            session_id: session_id.into(),
            session_bars,
            chords,
            phrase,
            style,
            target_note,
            root_profile,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Bars covered inside the originating session.
    pub fn session_bars(&self) -> BarRange {
        self.session_bars
    }

    pub fn chords(&self) -> &ChordSequence {
        &self.chords
    }

    pub fn phrase(&self) -> &Phrase {
        &self.phrase
    }

    pub fn style(&self) -> BassStyle {
        self.style
    }

    pub fn target_note(&self) -> Option<u8> {
        self.target_note
    }

    pub fn root_profile(&self) -> &RootProfile {
        &self.root_profile
    }

    pub fn size(&self) -> u8 {
        self.chords.bar_range().size() as u8
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey {
            style: self.style,
            root_profile: self.root_profile.clone(),
        }
    }

    /// Same session, overlapping bars, different fragment.
    pub fn is_related_to(&self, other: &Fragment) -> bool {
        self.id != other.id
            && self.session_id == other.session_id
            && self.session_bars.intersects(&other.session_bars)
    }
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Fragment {}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {} bar, {})", self.id, self.style, self.size(), self.chords)
    }
}

/// Recorded material from which fragments of every size are cut.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub style: BassStyle,
    pub chords: ChordSequence,
    /// Session-absolute beats
    pub phrase: Phrase,
    /// Pitch the line resolves to after the last bar
    pub target_note: Option<u8>,
    pub tags: Vec<String>,
}

impl Session {
    pub fn time_signature(&self) -> TimeSignature {
        self.chords.time_signature()
    }

    pub fn bar_count(&self) -> u32 {
        self.chords.bar_range().size()
    }

    /// Every 1..=4 bar window of the session as a fragment, largest first.
    /// Windows without notes are skipped.
    pub fn slice(&self) -> Vec<Fragment> {
        let range = self.chords.bar_range();
        let beats = self.time_signature().beats();
        let mut fragments = Vec::new();

        for size in (1..=MAX_FRAGMENT_BARS as u32).rev() {
            if size > range.size() {
                continue;
            }
            for from in range.from..=(range.to + 1 - size) {
                let bars = BarRange { from, to: from + size - 1 };
                let start_beat = from as f32 * beats;
                let end_beat = (bars.to + 1) as f32 * beats;

                let phrase = self.phrase.slice(start_beat, end_beat, true);
                if phrase.is_empty() {
                    log::debug!("{}: no notes in bars {bars}, skipped", self.id);
                    continue;
                }
                let chords = match self.chords.sub_sequence(bars, true) {
                    Ok(c) => c,
                    Err(e) => {
                        log::warn!("{}: cannot slice bars {bars}: {e}", self.id);
                        continue;
                    }
                };

                let target_note = if bars.to == range.to {
                    self.target_note
                } else {
                    self.note_starting_near(end_beat)
                };

                let id = format!("{}#{}-{}", self.id, bars.from, bars.to);
                match Fragment::new(id, &self.id, bars, chords, phrase, self.style, target_note) {
                    Ok(f) => fragments.push(f),
                    Err(e) => log::warn!("{}: invalid slice {bars}: {e}", self.id),
                }
            }
        }
        fragments
    }

    fn note_starting_near(&self, beat: f32) -> Option<u8> {
        self.phrase
            .notes()
            .iter()
            .find(|n| n.position >= beat - ANTICIPATION_BEATS && n.position <= beat + TARGET_NOTE_WINDOW)
            .map(|n| n.pitch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phrase::NoteEvent;

    fn session(progression: &str, pitches: &[u8]) -> Session {
        let chords = ChordSequence::parse(progression, TimeSignature::default()).unwrap();
        let phrase = Phrase::from_notes(
            pitches
                .iter()
                .enumerate()
                .map(|(i, &p)| NoteEvent::new(p, i as f32, 0.9, 80)),
        );
        Session {
            id: "s1".to_string(),
            style: BassStyle::Walking,
            chords,
            phrase,
            target_note: Some(36),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_style_parse() {
        assert_eq!("walking".parse::<BassStyle>().unwrap(), BassStyle::Walking);
        assert_eq!("Two_Feet".parse::<BassStyle>().unwrap(), BassStyle::TwoFeet);
        assert!("polka".parse::<BassStyle>().is_err());
    }

    #[test]
    fn test_slice_counts_every_window() {
        // 5 bars: 5 one-bar + 4 two-bar + 3 three-bar + 2 four-bar windows
        let pitches: Vec<u8> = (0..20).map(|i| 36 + (i % 12) as u8).collect();
        let s = session("C | F | G7 | C | C", &pitches);
        let fragments = s.slice();
        assert_eq!(fragments.len(), 14);
        assert_eq!(fragments[0].size(), 4);
        assert_eq!(fragments.last().unwrap().size(), 1);
    }

    #[test]
    fn test_slice_normalizes_and_finds_target_notes() {
        let s = session("C | F", &[36, 40, 43, 45, 41, 45, 48, 50]);
        let fragments = s.slice();
        let bar0 = fragments.iter().find(|f| f.id() == "s1#0-0").unwrap();
        assert_eq!(bar0.target_note(), Some(41));
        assert_eq!(bar0.phrase().len(), 4);

        let bar1 = fragments.iter().find(|f| f.id() == "s1#1-1").unwrap();
        assert_eq!(bar1.chords().bar_range().from, 0);
        assert_eq!(bar1.phrase().first_note().unwrap().position, 0.0);
        assert_eq!(bar1.phrase().first_note().unwrap().pitch, 41);
        // Last window resolves to the session target note
        assert_eq!(bar1.target_note(), Some(36));
        assert_eq!(bar1.session_bars(), BarRange { from: 1, to: 1 });
    }

    #[test]
    fn test_slice_skips_silent_windows() {
        let s = session("C | F | G", &[36, 40, 43, 45]);
        let ids: Vec<String> = s.slice().iter().map(|f| f.id().to_string()).collect();
        assert!(ids.contains(&"s1#0-0".to_string()));
        assert!(!ids.contains(&"s1#1-1".to_string()));
        assert!(!ids.contains(&"s1#2-2".to_string()));
    }

    #[test]
    fn test_fragment_validation() {
        let chords = ChordSequence::parse("C | C | C | C | C", TimeSignature::default()).unwrap();
        let err = Fragment::new(
            "x",
            "s",
            BarRange { from: 0, to: 4 },
            chords,
            Phrase::new(),
            BassStyle::Walking,
            None,
        );
        assert!(matches!(err, Err(DbError::InvalidSize(5))));
    }

    #[test]
    fn test_related() {
        let pitches: Vec<u8> = (0..12).map(|i| 36 + i as u8).collect();
        let fragments = session("C | F | G", &pitches).slice();
        let get = |id: &str| fragments.iter().find(|f| f.id() == id).unwrap();
        assert!(get("s1#0-1").is_related_to(get("s1#1-2")));
        assert!(get("s1#0-1").is_related_to(get("s1#1-1")));
        assert!(!get("s1#0-0").is_related_to(get("s1#1-2")));
        assert!(!get("s1#0-0").is_related_to(get("s1#0-0")));
    }
}
