use std::cmp::Reverse;
use std::collections::HashSet;

use rand::Rng;

use crate::candidates::{CandidateStore, DEFAULT_SCORE_WINDOW, DEFAULT_WIDTH};
use crate::db::Database;
use crate::db::models::BassStyle;
use crate::phrase::Phrase;
use crate::scoring::{FragmentAdaptation, PhraseAdapter, Scorer};
use crate::tiling::Tiling;

/// Fills a tiling one tile at a time, always committing the best candidate
/// left and rescoring the rest against the new neighbours.
#[derive(Debug, Clone)]
pub struct BestFirstTiler {
    pub style: BassStyle,
    pub width: usize,
    pub score_window: f32,
    /// Never place the same fragment twice.
    pub no_repeat: bool,
}

impl BestFirstTiler {
    pub fn new(style: BassStyle) -> Self {
        Self {
            style,
            width: DEFAULT_WIDTH,
            score_window: DEFAULT_SCORE_WINDOW,
            no_repeat: true,
        }
    }

    /// Returns the usable bars left without a tile.
    pub fn tile<R: Rng + ?Sized>(&self, tiling: &mut Tiling, db: &Database, scorer: &Scorer, rng: &mut R) -> Vec<u32> {
        let mut store = CandidateStore::new(self.width, self.score_window);
        let mut placed = 0;

        while !tiling.is_complete() {
            store.initialize(tiling, scorer, db, self.style, rng);
            let Some(best) = self.pick(&store, tiling) else {
                break;
            };
            log::debug!("placing {best}");
            if let Err(e) = tiling.add(best) {
                // Store slots are always free; a failure means the store is stale
                log::error!("cannot place candidate: {e}");
                break;
            }
            placed += 1;
        }

        let untiled = tiling.non_tiled_bars();
        if untiled.is_empty() {
            log::info!("tiled {} bars with {placed} fragments", tiling.target().usable_bars().len());
        } else {
            log::warn!("no {} fragment fits bars {untiled:?}", self.style);
        }
        untiled
    }

    /// Highest score first, then larger fragments, then earlier bars.
    fn pick(&self, store: &CandidateStore, tiling: &Tiling) -> Option<FragmentAdaptation> {
        let used: HashSet<&str> = if self.no_repeat {
            tiling.used_fragment_ids()
        } else {
            HashSet::new()
        };
        store
            .all()
            .filter(|a| !used.contains(a.fragment().id()))
            .filter(|a| tiling.is_usable_and_free(a.bar_range()))
            .max_by_key(|a| (a.score(), a.fragment().size(), Reverse(a.bar_range().from)))
            .cloned()
    }
}

/// The bass line of a tiling, in beats from the start of the target.
pub fn render(tiling: &Tiling, adapter: &dyn PhraseAdapter) -> Phrase {
    let beats = tiling.target().sequence().time_signature().beats();
    let origin = tiling.target().bar_range().from;
    let mut line = Phrase::new();
    for adaptation in tiling.adaptations() {
        let offset = (adaptation.bar_range().from - origin) as f32 * beats;
        for note in adapter.adapt(adaptation).shifted(offset).notes() {
            line.add(*note);
        }
    }
    line
}
