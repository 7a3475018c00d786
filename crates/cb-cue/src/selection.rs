//! Variation selection
//!
//! Cues pick one of their sounds and tracks pick one of their wave entries
//! with the same four algorithms. Cues choose uniformly; tracks choose by
//! entry weight. The cross-call memory lives in a `SelectionCursor`.

use rand::Rng;

// ═══════════════════════════════════════════════════════════════════════════════
// VARIATION MODE
// ═══════════════════════════════════════════════════════════════════════════════

/// How successive plays choose among N alternatives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum VariationMode {
    /// 0, 1, .., N-1, 0, ..
    #[default]
    Ordered = 0,
    /// Independent pick every play
    Random = 2,
    /// Random, never the same choice twice in a row
    RandomNoImmediateRepeat = 3,
    /// Every choice once per round, in a fresh random order each round
    Shuffle = 4,
}

impl VariationMode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(VariationMode::Ordered),
            2 => Some(VariationMode::Random),
            3 => Some(VariationMode::RandomNoImmediateRepeat),
            4 => Some(VariationMode::Shuffle),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Effective mode of a stored code over `choices` alternatives
    ///
    /// A single alternative is Ordered whatever was stored. None for an
    /// unknown code over several alternatives.
    pub fn for_choices(code: i32, choices: usize) -> Option<Self> {
        if choices <= 1 {
            return Some(VariationMode::Ordered);
        }
        Self::from_code(code)
    }

    /// Decode a stored mode, degrading unknown codes to Ordered
    pub(crate) fn decode(code: i32, choices: usize, owner: &str) -> Self {
        Self::for_choices(code, choices).unwrap_or_else(|| {
            log::warn!(
                "[Variation] {} has unsupported variation mode {}, playing ordered",
                owner,
                code
            );
            VariationMode::Ordered
        })
    }

    /// Code to write back: the stored one while it still decodes to `self`
    pub(crate) fn stored_code(self, stored: i32, choices: usize) -> i32 {
        let decoded = Self::for_choices(stored, choices).unwrap_or(VariationMode::Ordered);
        if decoded == self { stored } else { self.code() }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CURSOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Selection state carried between plays
#[derive(Debug, Clone, Default)]
pub struct SelectionCursor {
    /// Last choice (None before the first play)
    current: Option<usize>,
    /// Current shuffle round
    deck: Vec<usize>,
    /// Next position in `deck`
    deck_pos: usize,
}

impl SelectionCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last choice made through this cursor
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Choose uniformly among `count` alternatives
    ///
    /// Returns None only when `count` is 0.
    pub fn next_uniform<R: Rng + ?Sized>(
        &mut self,
        mode: VariationMode,
        count: usize,
        rng: &mut R,
    ) -> Option<usize> {
        self.next(mode, count, None, rng)
    }

    /// Choose among weighted alternatives
    ///
    /// Weights only affect the random modes. Returns None only when
    /// `weights` is empty.
    pub fn next_weighted<R: Rng + ?Sized>(
        &mut self,
        mode: VariationMode,
        weights: &[u8],
        rng: &mut R,
    ) -> Option<usize> {
        self.next(mode, weights.len(), Some(weights), rng)
    }

    fn next<R: Rng + ?Sized>(
        &mut self,
        mode: VariationMode,
        count: usize,
        weights: Option<&[u8]>,
        rng: &mut R,
    ) -> Option<usize> {
        if count == 0 {
            return None;
        }
        // A single alternative is always the ordered one
        let mode = if count == 1 {
            VariationMode::Ordered
        } else {
            mode
        };

        let choice = match mode {
            VariationMode::Ordered => self.ordered(count),
            VariationMode::Random => match weights {
                Some(w) => weighted_pick(w, None, rng),
                None => rng.random_range(0..count),
            },
            VariationMode::RandomNoImmediateRepeat => {
                let previous = self.current.filter(|&c| c < count);
                match weights {
                    Some(w) => weighted_pick(w, previous, rng),
                    None => uniform_no_repeat(count, previous, rng),
                }
            }
            VariationMode::Shuffle => self.shuffled(count, rng),
        };

        self.current = Some(choice);
        Some(choice)
    }

    fn ordered(&self, count: usize) -> usize {
        match self.current {
            Some(c) if c + 1 < count => c + 1,
            _ => 0,
        }
    }

    fn shuffled<R: Rng + ?Sized>(&mut self, count: usize, rng: &mut R) -> usize {
        if self.deck_pos >= self.deck.len() || self.deck.len() != count {
            self.deck.clear();
            self.deck.extend(0..count);
            // Fisher-Yates
            for i in (1..count).rev() {
                let j = rng.random_range(0..=i);
                self.deck.swap(i, j);
            }
            self.deck_pos = 0;
        }
        let choice = self.deck[self.deck_pos];
        self.deck_pos += 1;
        choice
    }

    /// Forget all history
    pub fn reset(&mut self) {
        self.current = None;
        self.deck.clear();
        self.deck_pos = 0;
    }
}

fn uniform_no_repeat<R: Rng + ?Sized>(count: usize, previous: Option<usize>, rng: &mut R) -> usize {
    match previous {
        Some(prev) => {
            let pick = rng.random_range(0..count - 1);
            if pick >= prev { pick + 1 } else { pick }
        }
        None => rng.random_range(0..count),
    }
}

/// Weighted draw, optionally excluding one index
///
/// Draws a threshold in [0, total) and walks the entries until the running
/// weight passes it. A zero total picks the first eligible entry.
fn weighted_pick<R: Rng + ?Sized>(weights: &[u8], exclude: Option<usize>, rng: &mut R) -> usize {
    let eligible = |i: usize| Some(i) != exclude;
    let total: u32 = weights
        .iter()
        .enumerate()
        .filter(|&(i, _)| eligible(i))
        .map(|(_, &w)| w as u32)
        .sum();

    if total == 0 {
        return (0..weights.len()).find(|&i| eligible(i)).unwrap_or(0);
    }

    let threshold = rng.random_range(0..total);
    let mut acc = 0u32;
    for (i, &w) in weights.iter().enumerate() {
        if !eligible(i) {
            continue;
        }
        acc += w as u32;
        if threshold < acc {
            return i;
        }
    }
    // Unreachable while threshold < total
    weights.len() - 1
}

/// Uniform draw over [min, max], tolerating empty or reversed ranges
pub(crate) fn uniform_between<R: Rng + ?Sized>(min: f32, max: f32, rng: &mut R) -> f32 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    if lo < hi { rng.random_range(lo..=hi) } else { lo }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
