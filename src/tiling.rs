use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

use crate::scoring::FragmentAdaptation;
use crate::sequence::{BarRange, UsableChordSequence};

#[derive(Error, Debug)]
pub enum TilingError {
    #[error("bars {0} are outside the target or not usable")]
    NotUsable(BarRange),

    #[error("bars {0} overlap an existing tile")]
    Occupied(BarRange),

    #[error("fragment {id} has {size} bars but covers {range}")]
    SizeMismatch { id: String, size: u8, range: BarRange },

    #[error("no tile starts at bar {0}")]
    NotAssigned(u32),
}

pub type Result<T> = std::result::Result<T, TilingError>;

/// Non-overlapping fragment adaptations laid over a target chord sequence,
/// keyed by start bar.
#[derive(Debug, Clone)]
pub struct Tiling {
    target: UsableChordSequence,
    tiles: BTreeMap<u32, FragmentAdaptation>,
}

impl Tiling {
    pub fn new(target: UsableChordSequence) -> Self {
        Self {
            target,
            tiles: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> &UsableChordSequence {
        &self.target
    }

    pub fn add(&mut self, adaptation: FragmentAdaptation) -> Result<()> {
        let range = adaptation.bar_range();
        let size = adaptation.fragment().size();
        if size as u32 != range.size() {
            return Err(TilingError::SizeMismatch {
                id: adaptation.fragment().id().to_string(),
                size,
                range,
            });
        }
        if !self.target.is_usable_range(range) {
            return Err(TilingError::NotUsable(range));
        }
        if range.bars().any(|bar| self.adaptation_at(bar).is_some()) {
            return Err(TilingError::Occupied(range));
        }
        log::debug!("tiled {} over {range}", adaptation.fragment().id());
        self.tiles.insert(range.from, adaptation);
        Ok(())
    }

    pub fn remove(&mut self, start_bar: u32) -> Result<FragmentAdaptation> {
        self.tiles.remove(&start_bar).ok_or(TilingError::NotAssigned(start_bar))
    }

    /// The tile covering `bar`.
    pub fn adaptation_at(&self, bar: u32) -> Option<&FragmentAdaptation> {
        self.tiles
            .range(..=bar)
            .next_back()
            .map(|(_, a)| a)
            .filter(|a| a.bar_range().contains(bar))
    }

    /// The tile ending on the bar just before `range`.
    pub fn adaptation_before(&self, range: BarRange) -> Option<&FragmentAdaptation> {
        let bar = range.from.checked_sub(1)?;
        self.adaptation_at(bar)
    }

    /// The tile starting on the bar just after `range`.
    pub fn adaptation_after(&self, range: BarRange) -> Option<&FragmentAdaptation> {
        self.tiles.get(&range.to.checked_add(1)?)
    }

    /// Usable for the target and not covered by any tile.
    pub fn is_usable_and_free(&self, range: BarRange) -> bool {
        self.target.is_usable_range(range) && range.bars().all(|bar| self.adaptation_at(bar).is_none())
    }

    /// Usable bars not covered by a tile, ascending.
    pub fn non_tiled_bars(&self) -> Vec<u32> {
        self.target
            .usable_bars()
            .iter()
            .copied()
            .filter(|&bar| self.adaptation_at(bar).is_none())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.non_tiled_bars().is_empty()
    }

    /// Tiles in bar order.
    pub fn adaptations(&self) -> impl Iterator<Item = &FragmentAdaptation> {
        self.tiles.values()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn used_fragment_ids(&self) -> HashSet<&str> {
        self.tiles.values().map(|a| a.fragment().id()).collect()
    }
}
