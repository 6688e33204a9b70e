pub mod loader;
pub mod models;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde::Deserialize;
use thiserror::Error;

use crate::consistency::{self, ConsistencyReport};
use crate::phrase::NEAR_WINDOW;
use crate::scoring;
use crate::sequence::{RootProfile, SequenceError};
use models::{BassStyle, Fragment, FragmentKey, MAX_FRAGMENT_BARS, Session};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid fragment size {0} (expected 1..={max})", max = MAX_FRAGMENT_BARS)]
    InvalidSize(i32),
    #[error("Invalid fragment: {0}")]
    InvalidFragment(String),
    #[error("Unknown bass style {0:?}")]
    UnknownStyle(String),
    #[error("Database index corrupted: {0}")]
    Inconsistent(String),
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// How fragments are compared for deduplication.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Tolerance in beats on note starts (and durations)
    pub near_window: f32,
    /// Also require matching note durations
    pub compare_durations: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            near_window: NEAR_WINDOW,
            compare_durations: true,
        }
    }
}

/// Summary counts for display.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    pub fragments: usize,
    pub sessions: usize,
    pub keys: usize,
    /// Index = size - 1
    pub per_size: [usize; MAX_FRAGMENT_BARS as usize],
    pub per_style: BTreeMap<BassStyle, usize>,
}

/// In-memory fragment database indexed by id, by session, and by
/// (style, root profile).
///
/// Read-only once built; `add_fragment`/`remove_fragment` take `&mut self`
/// so sharing a built database across threads is safe.
#[derive(Debug, Default)]
pub struct Database {
    by_id: HashMap<String, Arc<Fragment>>,
    by_session: HashMap<String, Vec<Arc<Fragment>>>,
    by_key: HashMap<FragmentKey, Vec<Arc<Fragment>>>,
    dedup: DedupConfig,
}

impl Database {
    pub fn new(dedup: DedupConfig) -> Self {
        Self {
            dedup,
            ..Default::default()
        }
    }

    /// Build from sessions. Seeds the stub fragments if nothing was kept.
    pub fn from_sessions(sessions: impl IntoIterator<Item = Session>, dedup: DedupConfig) -> Self {
        let mut db = Self::new(dedup);
        let mut session_count = 0;
        for session in sessions {
            db.add_session(&session);
            session_count += 1;
        }

        if db.is_empty() {
            log::warn!("No fragments loaded, using stub fragments");
            for session in loader::stub_sessions() {
                db.add_session(&session);
            }
        }

        log::info!(
            "Fragment database: {} fragments from {} sessions, {} index keys",
            db.len(),
            session_count,
            db.by_key.len()
        );
        db
    }

    /// Load every session file found under `dirs` and build the database.
    pub fn load(dirs: &[PathBuf], dedup: DedupConfig) -> Self {
        let loaded = loader::load_sessions(dirs);
        if loaded.errors > 0 {
            log::warn!("{} session files could not be loaded", loaded.errors);
        }
        Self::from_sessions(loaded.sessions, dedup)
    }

    /// Slice a session and insert each slice. Returns the number kept.
    pub fn add_session(&mut self, session: &Session) -> usize {
        let fragments = session.slice();
        let total = fragments.len();
        let kept = fragments.into_iter().filter(|f| self.add_fragment(f.clone())).count();
        log::debug!("Session {}: {kept}/{total} fragments kept", session.id);
        kept
    }

    /// Insert a fragment unless its id is taken or an equivalent fragment
    /// is already indexed under the same key. Returns whether it was added.
    pub fn add_fragment(&mut self, fragment: Fragment) -> bool {
        if self.by_id.contains_key(fragment.id()) {
            log::debug!("Duplicate fragment id {}", fragment.id());
            return false;
        }
        let key = fragment.key();
        if let Some(existing) = self
            .by_key
            .get(&key)
            .and_then(|list| list.iter().find(|e| self.is_equivalent(&fragment, e)))
        {
            log::debug!("{} is equivalent to {}, skipped", fragment.id(), existing.id());
            return false;
        }

        let fragment = Arc::new(fragment);
        self.by_id.insert(fragment.id().to_string(), Arc::clone(&fragment));
        self.by_session
            .entry(fragment.session_id().to_string())
            .or_default()
            .push(Arc::clone(&fragment));
        self.by_key.entry(key).or_default().push(fragment);
        true
    }

    /// Remove a fragment from all indices.
    ///
    /// Every index must hold the fragment; a missing entry means the
    /// indices have diverged and is reported as [`DbError::Inconsistent`].
    pub fn remove_fragment(&mut self, fragment: &Fragment) -> Result<()> {
        let id = fragment.id();
        let key = fragment.key();

        let in_session = self
            .by_session
            .get(fragment.session_id())
            .is_some_and(|l| l.iter().any(|f| f.id() == id));
        let in_key = self
            .by_key
            .get(&key)
            .is_some_and(|l| l.iter().any(|f| f.id() == id));
        let in_id = self.by_id.contains_key(id);

        match (in_id, in_session, in_key) {
            (false, false, false) => {
                return Err(DbError::Inconsistent(format!("fragment {id} is not in the database")));
            }
            (true, true, true) => {}
            _ => {
                log::error!(
                    "Index mismatch for {id}: by_id={in_id} by_session={in_session} by_key={in_key}"
                );
                return Err(DbError::Inconsistent(format!("fragment {id} missing from an index")));
            }
        }

        self.by_id.remove(id);
        remove_from(&mut self.by_session, fragment.session_id().to_string(), id);
        remove_from(&mut self.by_key, key, id);
        Ok(())
    }

    /// Two fragments are equivalent when they share a root profile, have the
    /// same phrase shape, and `candidate` scores above zero over
    /// `existing`'s chords.
    pub fn is_equivalent(&self, candidate: &Fragment, existing: &Fragment) -> bool {
        candidate.root_profile() == existing.root_profile()
            && candidate.phrase().equals_as_intervals(
                existing.phrase(),
                self.dedup.near_window,
                self.dedup.compare_durations,
            )
            && scoring::base_score(candidate, existing.chords()).overall() > 0.0
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Fragment>> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Fragments of `size` bars (`None` = any size) in any of `styles`
    /// (empty = all styles), sorted by id.
    pub fn fragments_of(&self, size: Option<u8>, styles: &[BassStyle]) -> Result<Vec<Arc<Fragment>>> {
        if let Some(s) = size {
            if s == 0 || s > MAX_FRAGMENT_BARS {
                return Err(DbError::InvalidSize(s as i32));
            }
        }
        let mut fragments: Vec<Arc<Fragment>> = self
            .by_id
            .values()
            .filter(|f| size.is_none_or(|s| f.size() == s))
            .filter(|f| styles.is_empty() || styles.contains(&f.style()))
            .cloned()
            .collect();
        fragments.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(fragments)
    }

    /// All fragments indexed under (style, root profile).
    pub fn fragments_for(&self, style: BassStyle, root_profile: &RootProfile) -> &[Arc<Fragment>] {
        let key = FragmentKey {
            style,
            root_profile: root_profile.clone(),
        };
        self.by_key.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fragments of the same session overlapping `fragment`'s bars, itself excluded.
    pub fn related_fragments(&self, fragment: &Fragment) -> Vec<Arc<Fragment>> {
        self.by_session
            .get(fragment.session_id())
            .map(|list| list.iter().filter(|f| f.is_related_to(fragment)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn session_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_session.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn stats(&self) -> DatabaseStats {
        let mut stats = DatabaseStats {
            fragments: self.by_id.len(),
            sessions: self.by_session.len(),
            keys: self.by_key.len(),
            ..Default::default()
        };
        for f in self.by_id.values() {
            stats.per_size[f.size() as usize - 1] += 1;
            *stats.per_style.entry(f.style()).or_default() += 1;
        }
        stats
    }

    /// Coverage and data-artifact diagnostics for one style. Logs findings.
    pub fn check_consistency(&self, style: BassStyle) -> ConsistencyReport {
        consistency::check(self, style)
    }
}

fn remove_from<K: std::hash::Hash + Eq>(index: &mut HashMap<K, Vec<Arc<Fragment>>>, key: K, id: &str) {
    if let Some(list) = index.get_mut(&key) {
        list.retain(|f| f.id() != id);
        if list.is_empty() {
            index.remove(&key);
        }
    }
}

/// A database built on first access from configured source directories.
pub struct LazyDatabase {
    source_dirs: Vec<PathBuf>,
    dedup: DedupConfig,
    cell: OnceLock<Database>,
}

impl LazyDatabase {
    pub fn new(source_dirs: Vec<PathBuf>, dedup: DedupConfig) -> Self {
        Self {
            source_dirs,
            dedup,
            cell: OnceLock::new(),
        }
    }

    /// The database, loading it if this is the first call.
    pub fn get(&self) -> &Database {
        self.cell
            .get_or_init(|| Database::load(&self.source_dirs, self.dedup))
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}
