//! Randomness seam for the host state machine.
//!
//! Every random draw in a room goes through [`Dice`], one draw per roll, so
//! tests can script outcomes with [`ScriptedDice`].

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait Dice: Send {
    /// Uniform value in `0..n`. `n` is never zero.
    fn below(&mut self, n: u32) -> u32;

    /// Six-sided die face, 1..=6.
    fn d6(&mut self) -> u8 {
        u8::try_from(self.below(6) + 1).unwrap_or(6)
    }
}

/// Production dice backed by an OS-seeded `StdRng`.
pub struct RngDice {
    rng: StdRng,
}

impl RngDice {
    #[must_use]
    pub fn from_os() -> Self {
        Self { rng: StdRng::from_os_rng() }
    }

    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }
}

impl Dice for RngDice {
    fn below(&mut self, n: u32) -> u32 {
        self.rng.random_range(0..n.max(1))
    }
}

/// Replays a fixed sequence of raw draws; yields 0 once exhausted.
#[derive(Debug, Default, Clone)]
pub struct ScriptedDice {
    draws: VecDeque<u32>,
}

impl ScriptedDice {
    pub fn new(draws: impl IntoIterator<Item = u32>) -> Self {
        Self { draws: draws.into_iter().collect() }
    }

    /// Script d6 faces (1..=6) instead of raw draws.
    pub fn faces(faces: impl IntoIterator<Item = u8>) -> Self {
        Self::new(faces.into_iter().map(|f| u32::from(f.saturating_sub(1))))
    }
}

impl Dice for ScriptedDice {
    fn below(&mut self, n: u32) -> u32 {
        self.draws.pop_front().unwrap_or(0).min(n.saturating_sub(1))
    }
}

/// Fisher–Yates shuffle drawing from `dice`.
pub fn shuffle<T>(items: &mut [T], dice: &mut dyn Dice) {
    for i in (1..items.len()).rev() {
        let bound = u32::try_from(i + 1).unwrap_or(u32::MAX);
        let j = dice.below(bound) as usize;
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_faces_replay_in_order() {
        let mut dice = ScriptedDice::faces([5, 1, 6]);
        assert_eq!(dice.d6(), 5);
        assert_eq!(dice.d6(), 1);
        assert_eq!(dice.d6(), 6);
        assert_eq!(dice.d6(), 1);
    }

    #[test]
    fn scripted_draws_clamp_to_bound() {
        let mut dice = ScriptedDice::new([99]);
        assert_eq!(dice.below(3), 2);
    }

    #[test]
    fn seeded_dice_stay_in_range() {
        let mut dice = RngDice::seeded(7);
        for _ in 0..200 {
            let face = dice.d6();
            assert!((1..=6).contains(&face));
        }
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut items: Vec<u32> = (0..20).collect();
        shuffle(&mut items, &mut RngDice::seeded(42));
        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_with_zero_draws_is_deterministic() {
        let mut items = vec!['a', 'b', 'c'];
        shuffle(&mut items, &mut ScriptedDice::default());
        // i=2 swaps with 0, then i=1 swaps with 0.
        assert_eq!(items, vec!['b', 'c', 'a']);
    }
}
