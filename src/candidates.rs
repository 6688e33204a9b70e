//! Per-bar, per-size candidate lists for the non-tiled parts of a tiling.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::db::models::{BassStyle, MAX_FRAGMENT_BARS};
use crate::db::{Database, DbError};
use crate::scoring::{CompatibilityScore, FragmentAdaptation, Scorer};
use crate::sequence::BarRange;
use crate::tiling::Tiling;

pub const DEFAULT_WIDTH: usize = 8;
pub const DEFAULT_SCORE_WINDOW: f32 = 5.0;

/// Best candidates for every (start bar, size) slot not yet tiled.
///
/// Each list is sorted best first, except inside groups of similar scores
/// which are shuffled, and holds at most `width` entries.
#[derive(Debug, Clone)]
pub struct CandidateStore {
    width: usize,
    score_window: f32,
    by_size: [BTreeMap<u32, Vec<FragmentAdaptation>>; MAX_FRAGMENT_BARS as usize],
}

impl Default for CandidateStore {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_SCORE_WINDOW)
    }
}

impl CandidateStore {
    /// `width` is at least 1. A `score_window` of 0 disables shuffling.
    pub fn new(width: usize, score_window: f32) -> Self {
        Self {
            width: width.max(1),
            score_window,
            by_size: Default::default(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn score_window(&self) -> f32 {
        self.score_window
    }

    /// Rebuild every list from the tiling's usable free slots.
    ///
    /// Scoring runs in parallel; shuffling consumes `rng` sequentially in
    /// (bar, size) order so a seeded generator gives reproducible lists.
    pub fn initialize<R: Rng + ?Sized>(
        &mut self,
        tiling: &Tiling,
        scorer: &Scorer,
        db: &Database,
        style: BassStyle,
        rng: &mut R,
    ) {
        for map in &mut self.by_size {
            map.clear();
        }

        let sequence = tiling.target().sequence();
        let slots: Vec<(u32, u8, _)> = tiling
            .non_tiled_bars()
            .into_iter()
            .flat_map(|bar| (1..=MAX_FRAGMENT_BARS).rev().map(move |size| (bar, size)))
            .filter_map(|(bar, size)| {
                let range = BarRange::with_size(bar, size as u32).ok()?;
                if !tiling.is_usable_and_free(range) {
                    return None;
                }
                let slice = sequence.sub_sequence(range, true).ok()?;
                Some((bar, size, slice))
            })
            .collect();

        let scored: Vec<(u32, u8, Vec<FragmentAdaptation>)> = slots
            .into_par_iter()
            .map(|(bar, size, slice)| (bar, size, scorer.find_candidates(db, style, &slice, Some(tiling))))
            .collect();

        let mut total = 0;
        for (bar, size, candidates) in scored {
            let mut candidates = randomize_similar_score_sets(candidates, self.score_window, rng);
            candidates.truncate(self.width);
            if candidates.is_empty() {
                continue;
            }
            total += candidates.len();
            self.by_size[size as usize - 1].insert(bar, candidates);
        }
        log::debug!("{total} candidates for {} free bars", tiling.non_tiled_bars().len());
    }

    /// Candidates of `size` bars starting at `bar`, best first.
    pub fn candidates_at(&self, bar: u32, size: u8) -> Result<&[FragmentAdaptation], DbError> {
        Ok(self.map(size)?.get(&bar).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Candidates of every size starting at `bar`, largest size first.
    pub fn candidates_at_bar(&self, bar: u32) -> Vec<&FragmentAdaptation> {
        self.by_size
            .iter()
            .rev()
            .filter_map(|map| map.get(&bar))
            .flatten()
            .collect()
    }

    /// For each start bar with `size`-bar candidates, the one at `rank`,
    /// or the last one when the list is shorter.
    pub fn candidates_ranked(&self, rank: usize, size: u8) -> Result<Vec<&FragmentAdaptation>, DbError> {
        Ok(self
            .map(size)?
            .values()
            .filter_map(|list| list.get(rank).or(list.last()))
            .collect())
    }

    /// Every stored candidate.
    pub fn all(&self) -> impl Iterator<Item = &FragmentAdaptation> {
        self.by_size.iter().flat_map(|map| map.values().flatten())
    }

    pub fn len(&self) -> usize {
        self.all().count()
    }

    pub fn is_empty(&self) -> bool {
        self.by_size.iter().all(BTreeMap::is_empty)
    }

    fn map(&self, size: u8) -> Result<&BTreeMap<u32, Vec<FragmentAdaptation>>, DbError> {
        if size == 0 || size > MAX_FRAGMENT_BARS {
            return Err(DbError::InvalidSize(size as i32));
        }
        Ok(&self.by_size[size as usize - 1])
    }
}

/// Shuffle runs of similar scores inside a best-first list.
///
/// Walking from the top, a group holds every following item scoring
/// strictly above `top - window`, `top` being the group's first score.
/// Groups keep their order; only items inside a group move.
pub fn randomize_similar_score_sets<R: Rng + ?Sized>(
    mut candidates: Vec<FragmentAdaptation>,
    window: f32,
    rng: &mut R,
) -> Vec<FragmentAdaptation> {
    if window <= 0.0 || candidates.len() < 2 {
        return candidates;
    }
    let mut start = 0;
    while start < candidates.len() {
        let top = candidates[start].score().overall();
        let floor = CompatibilityScore::from_overall(top - window);
        let group = candidates[start..]
            .iter()
            .take_while(|c| c.score() > floor)
            .count()
            .max(1);
        candidates[start..start + group].shuffle(rng);
        start += group;
    }
    candidates
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::db::DedupConfig;
    use crate::db::tests::{fragment, fragment_at};
    use crate::scoring::TransposingAdapter;
    use crate::sequence::{ChordSequence, TimeSignature, UsableChordSequence};

    fn seq(text: &str) -> ChordSequence {
        ChordSequence::parse(text, TimeSignature::default()).unwrap()
    }

    /// Adaptation with a fixed score.
    fn scored(id: &str, overall: f32) -> FragmentAdaptation {
        let f = Arc::new(fragment(id, id, "C7", &[36, 40, 43, 46], None));
        FragmentAdaptation::new(f, seq("C7")).with_score(CompatibilityScore::from_overall(overall))
    }

    fn ids(list: &[FragmentAdaptation]) -> Vec<&str> {
        list.iter().map(|a| a.fragment().id()).collect()
    }

    #[test]
    fn test_randomize_windows_example() {
        let list = vec![
            scored("a", 90.0),
            scored("b", 89.0),
            scored("c", 85.0),
            scored("d", 84.0),
            scored("e", 70.0),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let out = randomize_similar_score_sets(list.clone(), 5.0, &mut rng);
            let mut first: Vec<&str> = ids(&out[..2]);
            first.sort_unstable();
            assert_eq!(first, vec!["a", "b"]);
            let mut second: Vec<&str> = ids(&out[2..4]);
            second.sort_unstable();
            assert_eq!(second, vec!["c", "d"]);
            assert_eq!(out[4].fragment().id(), "e");
        }
    }

    #[test]
    fn test_randomize_zero_window_keeps_order() {
        let list = vec![scored("a", 90.0), scored("b", 89.0), scored("c", 88.0)];
        let mut rng = StdRng::seed_from_u64(1);
        let out = randomize_similar_score_sets(list, 0.0, &mut rng);
        assert_eq!(ids(&out), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_randomize_preserves_window_order() {
        let values = [98.0, 97.5, 96.0, 93.0, 92.0, 91.0, 80.0, 79.0, 60.0, 55.0, 54.0];
        let list: Vec<FragmentAdaptation> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| scored(&format!("f{i:02}"), v))
            .collect();
        let window = 3.0;
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let out = randomize_similar_score_sets(list.clone(), window, &mut rng);
            assert_eq!(out.len(), list.len());
            for (i, a) in out.iter().enumerate() {
                for b in &out[i + 1..] {
                    let (sa, sb) = (a.score().overall(), b.score().overall());
                    assert!(sb - sa < window, "{sb} placed after {sa}");
                }
            }
        }
    }

    #[test]
    fn test_seeded_randomize_is_reproducible() {
        let list: Vec<FragmentAdaptation> = (0..8).map(|i| scored(&format!("f{i}"), 90.0)).collect();
        let a = randomize_similar_score_sets(list.clone(), 5.0, &mut StdRng::seed_from_u64(3));
        let b = randomize_similar_score_sets(list, 5.0, &mut StdRng::seed_from_u64(3));
        assert_eq!(ids(&a), ids(&b));
    }

    fn walking_db() -> Database {
        let mut db = Database::new(DedupConfig::default());
        db.add_fragment(fragment("cm7-a", "s1", "Cm7", &[36, 39, 43, 46], Some(41)));
        db.add_fragment(fragment("cm7-b", "s2", "Cm7", &[48, 46, 43, 39], Some(41)));
        db.add_fragment(fragment("cm9", "s3", "Cm9", &[36, 38, 39, 43], Some(41)));
        db.add_fragment(fragment("f7", "s4", "F7", &[41, 45, 48, 51], Some(46)));
        db.add_fragment(fragment_at("two", "s5", 0, "Cm7 | F7", &[36, 39, 43, 46, 41, 45, 48, 51], Some(46)));
        db
    }

    #[test]
    fn test_initialize_fills_free_slots() {
        let db = walking_db();
        let tiling = Tiling::new(UsableChordSequence::new(seq("Cm7 | F7 | Cm7")));
        let mut store = CandidateStore::new(8, 0.0);
        store.initialize(
            &tiling,
            &Scorer::with_adapter(TransposingAdapter),
            &db,
            BassStyle::Walking,
            &mut StdRng::seed_from_u64(0),
        );

        let bar0 = store.candidates_at(0, 1).unwrap();
        assert_eq!(bar0.len(), 3);
        assert!(bar0.windows(2).all(|w| w[0].score() >= w[1].score()));
        assert_eq!(store.candidates_at(1, 1).unwrap().len(), 1);
        assert_eq!(ids(store.candidates_at(0, 2).unwrap()), vec!["two"]);
        assert!(store.candidates_at(1, 2).unwrap().is_empty());
        assert!(store.candidates_at(0, 3).unwrap().is_empty());
        assert!(matches!(store.candidates_at(0, 5), Err(DbError::InvalidSize(5))));

        let at_bar0: Vec<&str> = store.candidates_at_bar(0).iter().map(|a| a.fragment().id()).collect();
        assert_eq!(at_bar0[0], "two");
        assert_eq!(at_bar0.len(), 4);
    }

    #[test]
    fn test_initialize_skips_tiled_and_unusable_bars() {
        let db = walking_db();
        let target = UsableChordSequence::with_usable_bars(seq("Cm7 | F7 | Cm7"), [0, 1]).unwrap();
        let mut tiling = Tiling::new(target);
        let f7 = db.get("f7").cloned().unwrap();
        tiling.add(FragmentAdaptation::new(f7, seq("F7").shifted(1).unwrap())).unwrap();

        let mut store = CandidateStore::default();
        store.initialize(&tiling, &Scorer::new(), &db, BassStyle::Walking, &mut StdRng::seed_from_u64(0));
        assert!(!store.candidates_at(0, 1).unwrap().is_empty());
        assert!(store.candidates_at(1, 1).unwrap().is_empty());
        assert!(store.candidates_at(2, 1).unwrap().is_empty());
        assert!(store.candidates_at(0, 2).unwrap().is_empty());
    }

    #[test]
    fn test_width_bound() {
        let mut db = Database::new(DedupConfig::default());
        for i in 0..6u8 {
            db.add_fragment(fragment(&format!("c{i}"), &format!("s{i}"), "C7", &[36, 40 + i, 43, 46], None));
        }
        let tiling = Tiling::new(UsableChordSequence::new(seq("C7 | C7")));
        let mut store = CandidateStore::new(2, 5.0);
        store.initialize(&tiling, &Scorer::new(), &db, BassStyle::Walking, &mut StdRng::seed_from_u64(9));
        for bar in 0..2 {
            assert_eq!(store.candidates_at(bar, 1).unwrap().len(), 2);
        }
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_four_bar_store_bounded_by_width() {
        let mut db = Database::new(DedupConfig::default());
        for i in 0..12u8 {
            db.add_fragment(fragment(&format!("one{i:02}"), &format!("a{i}"), "Cm7", &[36, 37 + i, 43, 46], None));
        }
        let four = [36, 39, 43, 46, 41, 45, 48, 51, 46, 50, 53, 56, 39, 43, 46, 50];
        for i in 0..10u8 {
            let mut pitches = four;
            pitches[1] += i;
            let id = format!("four{i:02}");
            let session = format!("b{i}");
            db.add_fragment(fragment_at(&id, &session, 0, "Cm7 | F7 | Bbmaj7 | Ebmaj7", &pitches, None));
        }

        let tiling = Tiling::new(UsableChordSequence::new(seq("Cm7 | Cm7 | Cm7 | Cm7")));
        let mut store = CandidateStore::new(8, 5.0);
        store.initialize(&tiling, &Scorer::new(), &db, BassStyle::Walking, &mut StdRng::seed_from_u64(5));
        for bar in 0..4 {
            assert_eq!(store.candidates_at(bar, 1).unwrap().len(), 8);
        }

        let tiling = Tiling::new(UsableChordSequence::new(seq("Cm7 | F7 | Bbmaj7 | Ebmaj7")));
        store.initialize(&tiling, &Scorer::new(), &db, BassStyle::Walking, &mut StdRng::seed_from_u64(5));
        assert_eq!(store.candidates_at(0, 4).unwrap().len(), 8);
        assert!(store.candidates_at(1, 1).unwrap().is_empty());
    }

    #[test]
    fn test_candidates_ranked() {
        let db = walking_db();
        let tiling = Tiling::new(UsableChordSequence::new(seq("Cm7 | F7")));
        let mut store = CandidateStore::new(8, 0.0);
        store.initialize(&tiling, &Scorer::new(), &db, BassStyle::Walking, &mut StdRng::seed_from_u64(0));

        let best = store.candidates_ranked(0, 1).unwrap();
        assert_eq!(best.len(), 2);
        assert_eq!(best[1].fragment().id(), "f7");
        // Bar 1 only has one candidate; higher ranks fall back to it
        let deep = store.candidates_ranked(5, 1).unwrap();
        assert_eq!(deep[1].fragment().id(), "f7");
        assert!(store.candidates_ranked(0, 0).is_err());
    }
}
