//! Session files (TOML or JSON) and the built-in stub sessions.
//!
//! A session file describes one recorded take:
//!
//! ```toml
//! id = "blues-f-take1"
//! style = "walking"
//! beats_per_bar = 4
//! target_note = 41
//! chords = [ { bar = 0, symbol = "F7" }, { bar = 1, beat = 2.0, symbol = "Bb7" } ]
//! notes = [ { pitch = 41, position = 0.0, duration = 0.9 } ]
//! ```
//!
//! Note positions are in beats from the start of the session.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use thiserror::Error;
use walkdir::WalkDir;

use super::models::{BassStyle, Session};
use crate::harmony::{ChordError, ChordSymbol, ChordType};
use crate::phrase::{NoteEvent, Phrase};
use crate::sequence::{BarRange, ChordSequence, ChordSlot, SequenceError, TimeSignature};

/// Session file extensions we read
pub const SESSION_EXTENSIONS: &[&str] = &["toml", "json"];

/// Octave of the stub lines: C2
const STUB_ROOT_PITCH: u8 = 36;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported session file {0}")]
    UnsupportedFormat(String),
    #[error("Invalid session {id}: {message}")]
    Invalid { id: String, message: String },
    #[error("Chord error: {0}")]
    Chord(#[from] ChordError),
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),
}

#[derive(Debug, Deserialize)]
struct SessionFile {
    id: String,
    style: BassStyle,
    #[serde(default = "default_beats_per_bar")]
    beats_per_bar: u8,
    /// Derived from chords and notes when absent
    bars: Option<u32>,
    target_note: Option<u8>,
    #[serde(default)]
    tags: Vec<String>,
    chords: Vec<ChordEntry>,
    notes: Vec<NoteEvent>,
}

#[derive(Debug, Deserialize)]
struct ChordEntry {
    bar: u32,
    #[serde(default)]
    beat: f32,
    symbol: String,
}

fn default_beats_per_bar() -> u8 {
    4
}

pub struct LoadResult {
    pub sessions: Vec<Session>,
    pub errors: u64,
}

pub fn parse_session_toml(text: &str) -> Result<Session, LoadError> {
    let file: SessionFile = toml::from_str(text)?;
    file.into_session()
}

pub fn parse_session_json(text: &str) -> Result<Session, LoadError> {
    let file: SessionFile = serde_json::from_str(text)?;
    file.into_session()
}

/// Read one session file, format chosen by extension.
pub fn load_session_file(path: &Path) -> Result<Session, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    match extension(path).as_str() {
        "toml" => parse_session_toml(&text),
        "json" => parse_session_json(&text),
        _ => Err(LoadError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Recursively load every session file under `dirs`. Unreadable files are
/// logged and counted, never fatal.
pub fn load_sessions(dirs: &[PathBuf]) -> LoadResult {
    let mut files: Vec<PathBuf> = Vec::new();
    for dir in dirs {
        for entry in WalkDir::new(dir).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && SESSION_EXTENSIONS.contains(&extension(entry.path()).as_str()) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();

    let mut result = LoadResult {
        sessions: Vec::with_capacity(files.len()),
        errors: 0,
    };
    if files.is_empty() {
        log::info!("No session files found");
        return result;
    }

    let pb = ProgressBar::new(files.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} sessions {msg}") {
        pb.set_style(style.progress_chars("#>-"));
    }

    for path in &files {
        match load_session_file(path) {
            Ok(session) => {
                log::debug!("Loaded session {} from {}", session.id, path.display());
                result.sessions.push(session);
            }
            Err(e) => {
                log::warn!("Error loading {}: {}", path.display(), e);
                result.errors += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message(format!("{} loaded, {} errors", result.sessions.len(), result.errors));

    result
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

impl SessionFile {
    fn into_session(self) -> Result<Session, LoadError> {
        let invalid = |message: &str| LoadError::Invalid {
            id: self.id.clone(),
            message: message.to_string(),
        };
        if self.beats_per_bar == 0 {
            return Err(invalid("beats_per_bar must be positive"));
        }
        if self.chords.is_empty() {
            return Err(invalid("no chords"));
        }
        if self.notes.iter().any(|n| n.position < 0.0 || n.duration <= 0.0) {
            return Err(invalid("notes need a non-negative position and a positive duration"));
        }

        let ts = TimeSignature::new(self.beats_per_bar);
        let last_chord_bar = self.chords.iter().map(|c| c.bar).max().unwrap_or(0);
        let last_note_bar = self
            .notes
            .iter()
            .map(|n| (n.position / ts.beats()).floor() as u32)
            .max()
            .unwrap_or(0);
        let bars = self
            .bars
            .unwrap_or(last_chord_bar.max(last_note_bar).saturating_add(1));

        // In position order, so a repeated chord is recognised as held
        let mut entries: Vec<&ChordEntry> = self.chords.iter().collect();
        entries.sort_by(|a, b| a.bar.cmp(&b.bar).then(a.beat.total_cmp(&b.beat)));

        let mut chords = ChordSequence::new(BarRange::with_size(0, bars)?, ts);
        for entry in entries {
            let symbol: ChordSymbol = entry.symbol.parse()?;
            chords.add(ChordSlot::new(entry.bar, entry.beat, symbol))?;
        }
        if chords.slots().first().is_none_or(|s| s.position.bar != 0 || s.position.beat != 0.0) {
            return Err(invalid("first chord must be at bar 0 beat 0"));
        }

        Ok(Session {
            id: self.id,
            style: self.style,
            chords,
            phrase: Phrase::from_notes(self.notes),
            target_note: self.target_note,
            tags: self.tags,
        })
    }
}

/// One-bar sessions over every base chord type for every style: the
/// minimal material that keeps lookups meaningful on an empty database.
pub fn stub_sessions() -> Vec<Session> {
    let mut sessions = Vec::new();
    for style in BassStyle::ALL {
        for chord_type in ChordType::base_types() {
            let symbol = ChordSymbol::new(0, chord_type);
            let mut chords = ChordSequence::new(BarRange { from: 0, to: 0 }, TimeSignature::default());
            if chords.add(ChordSlot::new(0, 0.0, symbol)).is_err() {
                continue;
            }
            sessions.push(Session {
                id: format!("stub-{}-{}", style.name(), stub_suffix(&chord_type)),
                style,
                chords,
                phrase: stub_phrase(style, &chord_type),
                target_note: Some(STUB_ROOT_PITCH),
                tags: vec!["stub".to_string()],
            });
        }
    }
    sessions
}

fn stub_suffix(chord_type: &ChordType) -> String {
    if chord_type.suffix.is_empty() {
        "maj".to_string()
    } else {
        chord_type.suffix.replace('/', "-")
    }
}

/// Chord tones of the base form walked upward, octave filling missing tones.
fn stub_phrase(style: BassStyle, chord_type: &ChordType) -> Phrase {
    let mask = chord_type.simplified_mask();
    let tones: Vec<u8> = (0..12u8).filter(|i| mask & (1 << i) != 0).collect();
    let tone = |i: usize| STUB_ROOT_PITCH + tones.get(i).copied().unwrap_or(12);

    let (pitches, step): (Vec<u8>, f32) = match style {
        BassStyle::TwoFeet => (vec![tone(0), tone(2)], 2.0),
        BassStyle::Walking => (vec![tone(0), tone(1), tone(2), tone(3)], 1.0),
        BassStyle::WalkingDoubleNote => (
            vec![tone(0), tone(0), tone(1), tone(1), tone(2), tone(2), tone(3), tone(3)],
            0.5,
        ),
        BassStyle::WalkingDoubleTime => (
            vec![tone(0), tone(1), tone(2), tone(3), tone(3), tone(2), tone(1), tone(0)],
            0.5,
        ),
    };
    Phrase::from_notes(
        pitches
            .into_iter()
            .enumerate()
            .map(|(i, p)| NoteEvent::new(p, i as f32 * step, step * 0.9, 80)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_SESSION: &str = r#"
        id = "blues-f"
        style = "walking"
        target_note = 41
        tags = ["blues"]
        chords = [
            { bar = 0, symbol = "F7" },
            { bar = 1, symbol = "Bb7" },
            { bar = 1, beat = 2.0, symbol = "B°7" },
        ]
        notes = [
            { pitch = 41, position = 0.0, duration = 0.9 },
            { pitch = 45, position = 1.0, duration = 0.9 },
            { pitch = 48, position = 2.0, duration = 0.9 },
            { pitch = 51, position = 3.0, duration = 0.9 },
            { pitch = 46, position = 4.0, duration = 0.9, velocity = 90 },
        ]
    "#;

    #[test]
    fn test_parse_toml_session() {
        let toml = TOML_SESSION.replace("B°7", "Bdim7");
        let s = parse_session_toml(&toml).unwrap();
        assert_eq!(s.id, "blues-f");
        assert_eq!(s.style, BassStyle::Walking);
        assert_eq!(s.bar_count(), 2);
        assert_eq!(s.chords.len(), 3);
        assert_eq!(s.phrase.len(), 5);
        assert_eq!(s.phrase.notes()[0].velocity, 80);
        assert_eq!(s.phrase.notes()[4].velocity, 90);
        assert_eq!(s.target_note, Some(41));
        assert_eq!(s.tags, vec!["blues"]);
    }

    #[test]
    fn test_parse_rejects_unknown_chord() {
        assert!(matches!(parse_session_toml(TOML_SESSION), Err(LoadError::Chord(_))));
    }

    #[test]
    fn test_parse_json_session() {
        let json = r#"{
            "id": "two-feet-c",
            "style": "two-feet",
            "bars": 2,
            "chords": [{"bar": 0, "symbol": "C6"}, {"bar": 1, "symbol": "Am7"}],
            "notes": [
                {"pitch": 36, "position": 0.0, "duration": 1.8},
                {"pitch": 43, "position": 2.0, "duration": 1.8},
                {"pitch": 45, "position": 4.0, "duration": 1.8}
            ]
        }"#;
        let s = parse_session_json(json).unwrap();
        assert_eq!(s.style, BassStyle::TwoFeet);
        assert_eq!(s.bar_count(), 2);
        assert_eq!(s.target_note, None);
    }

    #[test]
    fn test_first_chord_required_at_start() {
        let json = r#"{"id": "x", "style": "walking",
            "chords": [{"bar": 1, "symbol": "C"}],
            "notes": [{"pitch": 36, "position": 0.0, "duration": 1.0}]}"#;
        assert!(matches!(parse_session_json(json), Err(LoadError::Invalid { .. })));
    }

    const HELD_SESSION: &str = r#"
        id = "held"
        style = "walking"
        chords = [ { bar = 2, symbol = "Bb7" }, { bar = 0, symbol = "F7" }, { bar = 3, symbol = "Bb7" } ]
        notes = [
            { pitch = 41, position = 0.0, duration = 0.9 },
            { pitch = 45, position = 1.0, duration = 0.9 },
            { pitch = 48, position = 2.0, duration = 0.9 },
            { pitch = 51, position = 3.0, duration = 0.9 },
            { pitch = 53, position = 4.0, duration = 0.9 },
            { pitch = 51, position = 5.0, duration = 0.9 },
            { pitch = 48, position = 6.0, duration = 0.9 },
            { pitch = 45, position = 7.0, duration = 0.9 },
            { pitch = 46, position = 8.0, duration = 0.9 },
            { pitch = 50, position = 9.0, duration = 0.9 },
            { pitch = 53, position = 10.0, duration = 0.9 },
            { pitch = 56, position = 11.0, duration = 0.9 },
            { pitch = 58, position = 12.0, duration = 0.9 },
            { pitch = 55, position = 13.0, duration = 0.9 },
            { pitch = 53, position = 14.0, duration = 0.9 },
            { pitch = 50, position = 15.0, duration = 0.9 },
        ]
    "#;

    #[test]
    fn test_held_chords_match_typed_progressions() {
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        use crate::candidates::CandidateStore;
        use crate::db::{Database, DedupConfig};
        use crate::scoring::Scorer;
        use crate::sequence::UsableChordSequence;
        use crate::tiling::Tiling;

        let session = parse_session_toml(HELD_SESSION).unwrap();
        assert_eq!(session.bar_count(), 4);
        assert_eq!(session.chords.len(), 2);
        let db = Database::from_sessions([session], DedupConfig::default());
        let whole = db.get("held#0-3").unwrap();

        for text in ["F7 | F7 | Bb7 | Bb7", "F7 | % | Bb7 | %", "F7 | | Bb7 |"] {
            let chords = ChordSequence::parse(text, TimeSignature::default()).unwrap();
            assert_eq!(&chords.root_profile(), whole.root_profile(), "{text}");

            let tiling = Tiling::new(UsableChordSequence::new(chords));
            let mut store = CandidateStore::new(8, 0.0);
            store.initialize(&tiling, &Scorer::new(), &db, BassStyle::Walking, &mut StdRng::seed_from_u64(0));

            let four: Vec<&str> = store.candidates_at(0, 4).unwrap().iter().map(|a| a.fragment().id()).collect();
            assert_eq!(four, vec!["held#0-3"], "{text}");
            for bar in 0..3 {
                assert!(!store.candidates_at(bar, 2).unwrap().is_empty(), "{text} at bar {bar}");
            }
            assert!(store.candidates_at(0, 3).unwrap().iter().any(|a| a.fragment().id() == "held#0-2"));
        }
    }

    #[test]
    fn test_load_sessions_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("blues");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("a.toml"), TOML_SESSION.replace("B°7", "Bdim7")).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let result = load_sessions(&[dir.path().to_path_buf()]);
        assert_eq!(result.sessions.len(), 1);
        assert_eq!(result.errors, 1);
    }

    #[test]
    fn test_stub_sessions_cover_every_style_and_base_type() {
        let stubs = stub_sessions();
        assert_eq!(stubs.len(), BassStyle::ALL.len() * ChordType::base_types().len());
        for s in &stubs {
            assert_eq!(s.bar_count(), 1);
            assert!(!s.phrase.is_empty());
            assert!(!s.id.contains('/'));
        }
        let walking_m7 = stubs
            .iter()
            .find(|s| s.id == "stub-walking-m7")
            .unwrap();
        let pitches: Vec<u8> = walking_m7.phrase.notes().iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![36, 39, 43, 46]);
    }
}
