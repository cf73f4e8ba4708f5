//! End-of-game scoring.
//!
//! Each player's captures are broken down by point value. A complete set is
//! one 1-point, one 2-point and one 3-point capture; every complete set is
//! worth [`SET_BONUS`] extra points. Bonuses only ever add to a score.

use serde::Serialize;

use super::Player;

pub const SET_BONUS: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown {
    pub one_point: u32,
    pub two_point: u32,
    pub three_point: u32,
}

impl Breakdown {
    #[must_use]
    pub fn complete_sets(self) -> u32 {
        self.one_point.min(self.two_point).min(self.three_point)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalScore {
    pub player_id: String,
    pub player_name: String,
    /// Score accumulated during play.
    pub base: u32,
    pub breakdown: Breakdown,
    pub sets: u32,
    pub bonus: u32,
    pub total: u32,
    pub captured: usize,
}

#[must_use]
pub fn final_score(player: &Player) -> FinalScore {
    let mut breakdown = Breakdown::default();
    for bird in &player.hand.birds {
        match bird.points {
            1 => breakdown.one_point += 1,
            2 => breakdown.two_point += 1,
            3 => breakdown.three_point += 1,
            _ => {}
        }
    }
    let sets = breakdown.complete_sets();
    let bonus = sets * SET_BONUS;
    FinalScore {
        player_id: player.id.clone(),
        player_name: player.name.clone(),
        base: player.score,
        breakdown,
        sets,
        bonus,
        total: player.score + bonus,
        captured: player.hand.birds.len(),
    }
}

/// Ids of the winners: highest total, ties broken by most captures. Several
/// ids come back when both still tie.
#[must_use]
pub fn winners(scores: &[FinalScore]) -> Vec<String> {
    let Some(best) = scores.iter().map(|s| (s.total, s.captured)).max() else {
        return Vec::new();
    };
    scores
        .iter()
        .filter(|s| (s.total, s.captured) == best)
        .map(|s| s.player_id.clone())
        .collect()
}
