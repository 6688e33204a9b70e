//! Compatibility scoring of a fragment against a target chord slice.
//!
//! A score has four components in [0, 100]:
//! - harmonic: mean chord-pair compatibility, 0 if any pair is incompatible
//! - transposability: how far the fragment must be transposed to the target root
//! - pre-target: first note of this fragment vs target note of the previous tile
//! - post-target: target note of this fragment vs first note of the next tile
//!
//! `overall = (6 h + 2 t + pre + post) / 10`, forced to 0 when h is 0.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::db::Database;
use crate::db::models::{BassStyle, Fragment};
use crate::harmony::interval;
use crate::phrase::Phrase;
use crate::sequence::{BarRange, ChordSequence};
use crate::tiling::Tiling;

const WEIGHT_HARMONIC: f32 = 6.0;
const WEIGHT_TRANSPOSABILITY: f32 = 2.0;
const WEIGHT_PRE_TARGET: f32 = 1.0;
const WEIGHT_POST_TARGET: f32 = 1.0;
const WEIGHT_TOTAL: f32 = WEIGHT_HARMONIC + WEIGHT_TRANSPOSABILITY + WEIGHT_PRE_TARGET + WEIGHT_POST_TARGET;

/// Transposability by shortest shift distance in semitones (0..=6).
const TRANSPOSABILITY_CURVE: [f32; 7] = [100.0, 95.0, 90.0, 80.0, 70.0, 60.0, 50.0];

/// Playable range of the adapted lines: E1..G4.
pub const BASS_LOWEST_PITCH: u8 = 28;
pub const BASS_HIGHEST_PITCH: u8 = 67;

#[derive(Debug, Clone, Copy)]
pub struct CompatibilityScore {
    harmonic: f32,
    transposability: f32,
    pre_target: f32,
    post_target: f32,
}

impl CompatibilityScore {
    pub const ZERO: CompatibilityScore = CompatibilityScore {
        harmonic: 0.0,
        transposability: 0.0,
        pre_target: 0.0,
        post_target: 0.0,
    };

    /// Components are clamped to [0, 100].
    pub fn new(harmonic: f32, transposability: f32, pre_target: f32, post_target: f32) -> Self {
        let clamp = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) };
        Self {
            harmonic: clamp(harmonic),
            transposability: clamp(transposability),
            pre_target: clamp(pre_target),
            post_target: clamp(post_target),
        }
    }

    /// A score whose overall value is `overall`.
    pub fn from_overall(overall: f32) -> Self {
        Self::new(overall, overall, overall, overall)
    }

    pub fn harmonic(&self) -> f32 {
        self.harmonic
    }

    pub fn transposability(&self) -> f32 {
        self.transposability
    }

    pub fn pre_target(&self) -> f32 {
        self.pre_target
    }

    pub fn post_target(&self) -> f32 {
        self.post_target
    }

    pub fn overall(&self) -> f32 {
        if self.harmonic == 0.0 {
            return 0.0;
        }
        (WEIGHT_HARMONIC * self.harmonic
            + WEIGHT_TRANSPOSABILITY * self.transposability
            + WEIGHT_PRE_TARGET * self.pre_target
            + WEIGHT_POST_TARGET * self.post_target)
            / WEIGHT_TOTAL
    }

    pub fn is_zero(&self) -> bool {
        self.overall() == 0.0
    }

    fn with_continuity(self, pre_target: f32, post_target: f32) -> Self {
        Self::new(self.harmonic, self.transposability, pre_target, post_target)
    }
}

impl PartialEq for CompatibilityScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CompatibilityScore {}

impl PartialOrd for CompatibilityScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompatibilityScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.overall().total_cmp(&other.overall())
    }
}

impl fmt::Display for CompatibilityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} (harmonic={:.0} transpose={:.0} pre={:.0} post={:.0})",
            self.overall(),
            self.harmonic,
            self.transposability,
            self.pre_target,
            self.post_target
        )
    }
}

/// A fragment placed over a target chord slice (absolute bar numbers),
/// with its score cached once computed.
#[derive(Debug, Clone)]
pub struct FragmentAdaptation {
    fragment: Arc<Fragment>,
    target: ChordSequence,
    score: Option<CompatibilityScore>,
}

impl FragmentAdaptation {
    pub fn new(fragment: Arc<Fragment>, target: ChordSequence) -> Self {
        Self {
            fragment,
            target,
            score: None,
        }
    }

    pub fn fragment(&self) -> &Arc<Fragment> {
        &self.fragment
    }

    pub fn target(&self) -> &ChordSequence {
        &self.target
    }

    pub fn bar_range(&self) -> BarRange {
        self.target.bar_range()
    }

    /// Cached score, zero if never scored.
    pub fn score(&self) -> CompatibilityScore {
        self.score.unwrap_or(CompatibilityScore::ZERO)
    }

    pub fn is_scored(&self) -> bool {
        self.score.is_some()
    }

    #[cfg(test)]
    pub(crate) fn with_score(mut self, score: CompatibilityScore) -> Self {
        self.score = Some(score);
        self
    }

    /// Ascending semitones (0..12) from the fragment's first root to the target's.
    pub fn root_shift(&self) -> u8 {
        match (self.fragment.chords().first_root(), self.target.first_root()) {
            (Some(from), Some(to)) => interval(from, to),
            _ => 0,
        }
    }
}

impl fmt::Display for FragmentAdaptation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} {}", self.fragment.id(), self.bar_range(), self.score())
    }
}

/// Turns a fragment into the notes actually played over its target.
pub trait PhraseAdapter: Send + Sync {
    fn adapt(&self, adaptation: &FragmentAdaptation) -> Phrase;

    /// Pitch of the fragment's target note once adapted.
    fn target_note_pitch(&self, adaptation: &FragmentAdaptation) -> Option<u8>;

    fn first_note_pitch(&self, adaptation: &FragmentAdaptation) -> Option<u8> {
        self.adapt(adaptation).first_note().map(|n| n.pitch)
    }
}

/// Transposes the recorded line to the target root.
///
/// Takes the shortest shift (up to a tritone either way) unless it pushes
/// the line out of the bass register and the opposite direction does not.
#[derive(Debug, Clone, Default)]
pub struct TransposingAdapter;

impl TransposingAdapter {
    pub fn transposition(&self, adaptation: &FragmentAdaptation) -> i32 {
        let up = adaptation.root_shift() as i32;
        if up == 0 {
            return 0;
        }
        let (short, long) = if up <= 6 { (up, up - 12) } else { (up - 12, up) };
        let Some((low, high)) = adaptation.fragment().phrase().pitch_range() else {
            return short;
        };
        let fits = |shift: i32| {
            low as i32 + shift >= BASS_LOWEST_PITCH as i32 && high as i32 + shift <= BASS_HIGHEST_PITCH as i32
        };
        if !fits(short) && fits(long) { long } else { short }
    }
}

impl PhraseAdapter for TransposingAdapter {
    fn adapt(&self, adaptation: &FragmentAdaptation) -> Phrase {
        adaptation
            .fragment()
            .phrase()
            .transposed(self.transposition(adaptation))
    }

    fn target_note_pitch(&self, adaptation: &FragmentAdaptation) -> Option<u8> {
        let shift = self.transposition(adaptation);
        adaptation
            .fragment()
            .target_note()
            .map(|p| (p as i32 + shift).clamp(0, 127) as u8)
    }
}

/// Harmonic + transposability score of `fragment` over `target`, no tiling context.
pub fn base_score(fragment: &Fragment, target: &ChordSequence) -> CompatibilityScore {
    let harmonic = harmonic_compatibility(fragment.chords(), target);
    if harmonic == 0.0 {
        return CompatibilityScore::ZERO;
    }
    let transposability = match (fragment.chords().first_root(), target.first_root()) {
        (Some(from), Some(to)) => {
            let up = interval(from, to);
            TRANSPOSABILITY_CURVE[up.min(12 - up) as usize]
        }
        _ => 0.0,
    };
    CompatibilityScore::new(harmonic, transposability, 0.0, 0.0)
}

/// Mean chord-pair compatibility of `source` chords played over `target`.
///
/// Both sequences must have the same bar count and root profile. Any
/// incompatible pair makes the result 0.
pub fn harmonic_compatibility(source: &ChordSequence, target: &ChordSequence) -> f32 {
    if source.bar_range().size() != target.bar_range().size()
        || source.time_signature() != target.time_signature()
        || source.is_empty()
        || source.root_profile() != target.root_profile()
    {
        return 0.0;
    }

    let mut total = 0.0;
    for (a, b) in source.slots().iter().zip(target.slots()) {
        let value = a.symbol.compatibility(&b.symbol);
        if value == 0 {
            return 0.0;
        }
        total += value as f32;
    }
    total / source.len() as f32
}

/// 100 for the same pitch, 50 for the same pitch class in another octave.
fn note_match(expected: Option<u8>, actual: Option<u8>) -> f32 {
    match (expected, actual) {
        (Some(a), Some(b)) if a == b => 100.0,
        (Some(a), Some(b)) if a % 12 == b % 12 => 50.0,
        _ => 0.0,
    }
}

/// Scores fragment adaptations, with continuity against a tiling when an
/// adapter is configured.
#[derive(Default)]
pub struct Scorer {
    adapter: Option<Box<dyn PhraseAdapter>>,
}

impl Scorer {
    /// Harmonic and transposability only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(adapter: impl PhraseAdapter + 'static) -> Self {
        Self {
            adapter: Some(Box::new(adapter)),
        }
    }

    /// Score `adaptation` and cache the result on it.
    pub fn score(&self, adaptation: &mut FragmentAdaptation, tiling: Option<&Tiling>) -> CompatibilityScore {
        let mut score = base_score(&adaptation.fragment, &adaptation.target);

        if !score.is_zero() {
            if let (Some(adapter), Some(tiling)) = (self.adapter.as_deref(), tiling) {
                let range = adaptation.bar_range();
                let pre = tiling
                    .adaptation_before(range)
                    .map(|prev| note_match(adapter.target_note_pitch(prev), adapter.first_note_pitch(adaptation)))
                    .unwrap_or(0.0);
                let post = tiling
                    .adaptation_after(range)
                    .map(|next| note_match(adapter.target_note_pitch(adaptation), adapter.first_note_pitch(next)))
                    .unwrap_or(0.0);
                score = score.with_continuity(pre, post);
            }
        }

        adaptation.score = Some(score);
        score
    }

    /// Every fragment of `style` fitting `slice` with a non-zero score, best first.
    pub fn find_candidates(
        &self,
        db: &Database,
        style: BassStyle,
        slice: &ChordSequence,
        tiling: Option<&Tiling>,
    ) -> Vec<FragmentAdaptation> {
        let profile = slice.root_profile();
        let mut candidates: Vec<FragmentAdaptation> = db
            .fragments_for(style, &profile)
            .iter()
            .filter_map(|f| {
                let mut adaptation = FragmentAdaptation::new(Arc::clone(f), slice.clone());
                let score = self.score(&mut adaptation, tiling);
                (!score.is_zero()).then_some(adaptation)
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score()
                .cmp(&a.score())
                .then_with(|| a.fragment.id().cmp(b.fragment.id()))
        });
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::BassStyle;
    use crate::db::tests::fragment;
    use crate::sequence::{TimeSignature, UsableChordSequence};

    fn seq(text: &str) -> ChordSequence {
        ChordSequence::parse(text, TimeSignature::default()).unwrap()
    }

    fn bars(text: &str, from: u32) -> ChordSequence {
        seq(text).shifted(from).unwrap()
    }

    #[test]
    fn test_overall_weights() {
        let s = CompatibilityScore::new(100.0, 50.0, 0.0, 100.0);
        assert!((s.overall() - 80.0).abs() < 1e-4);
        assert_eq!(CompatibilityScore::new(0.0, 100.0, 100.0, 100.0).overall(), 0.0);
        assert_eq!(CompatibilityScore::from_overall(85.0).overall(), 85.0);
    }

    #[test]
    fn test_components_clamped() {
        let s = CompatibilityScore::new(150.0, -3.0, f32::NAN, 100.0);
        assert_eq!(s.harmonic(), 100.0);
        assert_eq!(s.transposability(), 0.0);
        assert_eq!(s.pre_target(), 0.0);
        assert!(s.overall() <= 100.0);
    }

    #[test]
    fn test_ordering_by_overall() {
        let low = CompatibilityScore::new(50.0, 100.0, 0.0, 0.0);
        let high = CompatibilityScore::new(90.0, 50.0, 0.0, 0.0);
        assert!(high > low);
        assert_eq!(CompatibilityScore::ZERO, CompatibilityScore::new(0.0, 90.0, 0.0, 0.0));
    }

    #[test]
    fn test_base_score_identical_key() {
        let f = fragment("a", "s", "Cm7", &[36, 39, 43, 46], None);
        let s = base_score(&f, &seq("Cm7"));
        assert_eq!(s.harmonic(), 100.0);
        assert_eq!(s.transposability(), 100.0);
    }

    #[test]
    fn test_transposability_falls_with_distance() {
        let f = fragment("a", "s", "Cm7", &[36, 39, 43, 46], None);
        let near = base_score(&f, &seq("Dbm7"));
        let far = base_score(&f, &seq("F#m7"));
        let down = base_score(&f, &seq("Bm7"));
        assert_eq!(near.transposability(), 95.0);
        assert_eq!(down.transposability(), 95.0);
        assert_eq!(far.transposability(), 50.0);
        assert_eq!(near.harmonic(), 100.0);
    }

    #[test]
    fn test_size_mismatch_is_zero() {
        let f = fragment("a", "s", "Cm7", &[36, 39, 43, 46], None);
        assert!(base_score(&f, &seq("Cm7 | Cm7")).is_zero());
    }

    #[test]
    fn test_zero_propagation() {
        let f = fragment("a", "s", "Dm7 G7 | Cmaj7", &[38, 41, 43, 47, 36, 40, 43, 47], None);
        assert!(!base_score(&f, &seq("Dm7 G7 | C6")).is_zero());
        // One incompatible pair among three kills the whole harmonic term
        let s = base_score(&f, &seq("Dm7 G7 | C7"));
        assert_eq!(s.harmonic(), 0.0);
        assert_eq!(s.overall(), 0.0);
    }

    #[test]
    fn test_harmonic_is_mean_of_pairs() {
        let source = seq("Dm7 G7");
        let target = seq("Dm9 G7");
        // (90 + 100) / 2
        assert_eq!(harmonic_compatibility(&source, &target), 95.0);
        assert_eq!(harmonic_compatibility(&source, &seq("Dm7 | G7")), 0.0);
    }

    #[test]
    fn test_transposing_adapter_shortest_shift() {
        let f = Arc::new(fragment("a", "s", "C7", &[36, 40, 43, 46], Some(41)));
        let adapter = TransposingAdapter;

        let up = FragmentAdaptation::new(Arc::clone(&f), seq("D7"));
        assert_eq!(adapter.transposition(&up), 2);
        assert_eq!(adapter.first_note_pitch(&up), Some(38));
        assert_eq!(adapter.target_note_pitch(&up), Some(43));

        let down = FragmentAdaptation::new(Arc::clone(&f), seq("A7"));
        assert_eq!(adapter.transposition(&down), -3);
    }

    #[test]
    fn test_transposing_adapter_keeps_bass_register() {
        // Line sitting at the bottom: shifting down would leave the register
        let f = Arc::new(fragment("a", "s", "E7", &[28, 32, 35, 38], None));
        let adaptation = FragmentAdaptation::new(f, seq("Eb7"));
        assert_eq!(TransposingAdapter.transposition(&adaptation), 11);
    }

    #[test]
    fn test_score_is_cached_on_adaptation() {
        let f = Arc::new(fragment("a", "s", "Cm7", &[36, 39, 43, 46], None));
        let mut a = FragmentAdaptation::new(f, seq("Cm7"));
        assert!(!a.is_scored());
        let s = Scorer::new().score(&mut a, None);
        assert!(a.is_scored());
        assert_eq!(a.score(), s);
    }

    #[test]
    fn test_find_candidates_cm7() {
        let mut db = Database::default();
        db.add_fragment(fragment("cm7", "s1", "Cm7", &[36, 39, 43, 46], None));
        db.add_fragment(fragment("fm9", "s2", "Fm9", &[41, 43, 44, 48], None));
        db.add_fragment(fragment("c7", "s3", "C7", &[36, 40, 43, 46], None));
        db.add_fragment(fragment("two", "s4", "Cm7 F7", &[36, 39, 41, 45], None));

        let slice = seq("Cm7");
        let candidates = Scorer::new().find_candidates(&db, BassStyle::Walking, &slice, None);
        let ids: Vec<&str> = candidates.iter().map(|c| c.fragment().id()).collect();
        assert_eq!(ids, vec!["cm7", "fm9"]);
        for c in &candidates {
            assert_eq!(c.fragment().root_profile(), &slice.root_profile());
            assert!(c.score().harmonic() > 0.0);
        }
        assert!(candidates[0].score() >= candidates[1].score());
        assert!(Scorer::new().find_candidates(&db, BassStyle::TwoFeet, &slice, None).is_empty());
    }

    /// Bar 2 holds a fragment resolving to pitch 48; bar 3 candidates start on 48 or 50.
    fn continuity_setup(first_pitch: u8) -> CompatibilityScore {
        let target = UsableChordSequence::new(seq("C7 | C7 | C7 | C7"));
        let mut tiling = Tiling::new(target);
        let tiled = Arc::new(fragment("prev", "s1", "C7", &[36, 40, 43, 46], Some(48)));
        tiling.add(FragmentAdaptation::new(tiled, bars("C7", 2))).unwrap();

        let candidate = Arc::new(fragment("next", "s2", "C7", &[first_pitch, 52, 55, 58], None));
        let mut adaptation = FragmentAdaptation::new(candidate, bars("C7", 3));
        Scorer::with_adapter(TransposingAdapter).score(&mut adaptation, Some(&tiling))
    }

    #[test]
    fn test_pre_target_continuity() {
        let matching = continuity_setup(48);
        assert_eq!(matching.pre_target(), 100.0);

        let missing = continuity_setup(50);
        assert_eq!(missing.pre_target(), 0.0);
        assert_eq!(missing.harmonic(), matching.harmonic());
        assert_eq!(missing.transposability(), matching.transposability());
        assert_eq!(missing.post_target(), matching.post_target());
        assert!(matching > missing);
    }

    #[test]
    fn test_post_target_continuity() {
        let target = UsableChordSequence::new(seq("F7 | Bb7"));
        let mut tiling = Tiling::new(target);
        let next = Arc::new(fragment("next", "s1", "Bb7", &[46, 50, 53, 56], None));
        tiling.add(FragmentAdaptation::new(next, bars("Bb7", 1))).unwrap();

        let candidate = Arc::new(fragment("cand", "s2", "F7", &[41, 45, 48, 51], Some(34)));
        let mut adaptation = FragmentAdaptation::new(candidate, bars("F7", 0));
        let with_adapter = Scorer::with_adapter(TransposingAdapter).score(&mut adaptation, Some(&tiling));
        // Same pitch class, other octave
        assert_eq!(with_adapter.post_target(), 50.0);
        assert_eq!(with_adapter.pre_target(), 0.0);

        let without_adapter = Scorer::new().score(&mut adaptation, Some(&tiling));
        assert_eq!(without_adapter.post_target(), 0.0);
        let without_tiling = Scorer::with_adapter(TransposingAdapter).score(&mut adaptation, None);
        assert_eq!(without_tiling.post_target(), 0.0);
    }

    #[test]
    fn test_scores_bounded() {
        let mut db = Database::default();
        for (i, chord) in ["C", "Cm", "C7", "Cmaj7", "Cm7b5", "Cdim7", "C6", "C9"].iter().enumerate() {
            db.add_fragment(fragment(&format!("f{i}"), "s", chord, &[36, 38 + i as u8, 43, 45], Some(41)));
        }
        let scorer = Scorer::with_adapter(TransposingAdapter);
        for target in ["C", "Dm", "E7", "Fmaj7", "Gm7b5", "Adim7", "Bb6", "Eb13"] {
            for f in db.fragments_of(None, &[]).unwrap() {
                let mut a = FragmentAdaptation::new(f, seq(target));
                let s = scorer.score(&mut a, None);
                for c in [s.harmonic(), s.transposability(), s.pre_target(), s.post_target(), s.overall()] {
                    assert!((0.0..=100.0).contains(&c));
                }
                if s.harmonic() == 0.0 {
                    assert_eq!(s.overall(), 0.0);
                }
            }
        }
    }
}
