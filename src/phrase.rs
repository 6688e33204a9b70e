use serde::{Deserialize, Serialize};

/// Notes starting this many beats before a window boundary belong to the
/// next window (players anticipate the beat).
pub const ANTICIPATION_BEATS: f32 = 0.1;

/// Default tolerance used when comparing note timings of two phrases.
pub const NEAR_WINDOW: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    /// Start in beats
    pub position: f32,
    /// Length in beats
    pub duration: f32,
    #[serde(default = "default_velocity")]
    pub velocity: u8,
}

fn default_velocity() -> u8 {
    80
}

impl NoteEvent {
    pub fn new(pitch: u8, position: f32, duration: f32, velocity: u8) -> Self {
        Self {
            pitch,
            position,
            duration,
            velocity,
        }
    }

    pub fn end(&self) -> f32 {
        self.position + self.duration
    }
}

/// Time-ordered note events, beat-relative to the phrase window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Phrase {
    notes: Vec<NoteEvent>,
}

impl Phrase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_notes(notes: impl IntoIterator<Item = NoteEvent>) -> Self {
        let mut notes: Vec<NoteEvent> = notes.into_iter().collect();
        notes.sort_by(|a, b| a.position.total_cmp(&b.position).then(a.pitch.cmp(&b.pitch)));
        Self { notes }
    }

    pub fn add(&mut self, note: NoteEvent) {
        let idx = self
            .notes
            .iter()
            .position(|n| n.position > note.position)
            .unwrap_or(self.notes.len());
        self.notes.insert(idx, note);
    }

    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn first_note(&self) -> Option<&NoteEvent> {
        self.notes.first()
    }

    pub fn pitch_range(&self) -> Option<(u8, u8)> {
        let min = self.notes.iter().map(|n| n.pitch).min()?;
        let max = self.notes.iter().map(|n| n.pitch).max()?;
        Some((min, max))
    }

    /// Notes starting in `[from, to)` moved so that `from` becomes beat 0.
    ///
    /// Anticipated notes (up to [`ANTICIPATION_BEATS`] early) are pulled into
    /// the window. With `clip`, durations are cut at the window end.
    pub fn slice(&self, from: f32, to: f32, clip: bool) -> Phrase {
        let length = to - from;
        let notes = self
            .notes
            .iter()
            .filter(|n| n.position >= from - ANTICIPATION_BEATS && n.position < to - ANTICIPATION_BEATS)
            .map(|n| {
                let position = (n.position - from).max(0.0);
                let duration = if clip {
                    n.duration.min(length - position)
                } else {
                    n.duration
                };
                NoteEvent { position, duration, ..*n }
            })
            .collect();
        Phrase { notes }
    }

    pub fn shifted(&self, beats: f32) -> Phrase {
        Phrase {
            notes: self
                .notes
                .iter()
                .map(|n| NoteEvent {
                    position: n.position + beats,
                    ..*n
                })
                .collect(),
        }
    }

    /// Transposed copy, pitches saturating to the MIDI range.
    pub fn transposed(&self, semitones: i32) -> Phrase {
        Phrase {
            notes: self
                .notes
                .iter()
                .map(|n| NoteEvent {
                    pitch: (n.pitch as i32 + semitones).clamp(0, 127) as u8,
                    ..*n
                })
                .collect(),
        }
    }

    /// Same melodic shape under some transposition: same pitch intervals
    /// relative to the first note, start positions within `near_window`
    /// beats, and when `compare_durations` durations within `near_window`.
    pub fn equals_as_intervals(&self, other: &Phrase, near_window: f32, compare_durations: bool) -> bool {
        if self.notes.len() != other.notes.len() {
            return false;
        }
        let (Some(a0), Some(b0)) = (self.notes.first(), other.notes.first()) else {
            return true;
        };
        self.notes.iter().zip(&other.notes).all(|(a, b)| {
            let same_interval = a.pitch as i32 - a0.pitch as i32 == b.pitch as i32 - b0.pitch as i32;
            let same_start = (a.position - b.position).abs() <= near_window;
            let same_duration = !compare_durations || (a.duration - b.duration).abs() <= near_window;
            same_interval && same_start && same_duration
        })
    }
}
