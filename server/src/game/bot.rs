//! Scripted opponent.
//!
//! DESIGN
//! ======
//! [`plan`] is a pure decision function: it looks at the bot's hand, the
//! visible targets and the turn cursor, and returns the next [`Action`]. The
//! room applies that action through the same handlers humans use, so a bot
//! can never do anything a player could not.
//!
//! Every tier first tries a capture-all when a roll is pending and the hand
//! holds three cards of one type. After that:
//! - Easy takes the first slot and photographs with probability 0.3 / 0.7 /
//!   1.0 by distance tier. It never spends cards defensively.
//! - Medium takes the highest-value slot, approaches once, then photographs,
//!   and spends one card when that card turns a miss into a capture.
//! - Hard scores targets by exact success probability times points and only
//!   approaches when 0.66 of the next tier's expected value beats shooting now.
//! - Legendary attracts the best target it holds two matching cards for,
//!   otherwise plays like Hard.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::action::Action;
use super::cards::{BirdCard, InsectCard, InsectType, MAX_PROGRESS};
use super::dice::Dice;

/// Discount applied to the expected value of approaching one tier closer.
const APPROACH_DISCOUNT: f64 = 0.66;

/// Easy photo probability (percent) by distance tier.
const EASY_PHOTO_PERCENT: [u32; 3] = [30, 70, 100];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    Legendary,
}

/// What a bot can see when it plans.
#[derive(Debug, Clone, Copy)]
pub struct BotView<'a> {
    pub difficulty: Difficulty,
    pub hand: &'a [InsectCard],
    pub visible: &'a [BirdCard],
    /// Locked target id, if any.
    pub locked: Option<&'a str>,
    pub progress: u8,
    /// Pending photo roll, if any.
    pub pending: Option<u8>,
}

/// Choose the next action for a bot holding the turn.
pub fn plan(view: &BotView<'_>, dice: &mut dyn Dice) -> Action {
    if let Some(value) = view.pending {
        return plan_pending(view, value);
    }

    if view.difficulty == Difficulty::Legendary {
        if let Some((target, card_ids)) = attract_option(view) {
            return Action::Attract { target_id: target.id.clone(), card_ids };
        }
    }

    let target = match view.locked {
        Some(id) => view.visible.iter().find(|b| b.id == id),
        None => choose_target(view),
    };
    let Some(target) = target else {
        return Action::Pass {};
    };

    if should_photograph(view, target, dice) {
        Action::StartPhotoRoll { target_id: target.id.clone() }
    } else {
        Action::Sneak { target_id: Some(target.id.clone()), use_card: false, card_id: None }
    }
}

fn plan_pending(view: &BotView<'_>, value: u8) -> Action {
    if let Some(card_ids) = capture_all_cards(view, value) {
        return Action::CaptureAll { card_ids };
    }

    if view.difficulty != Difficulty::Easy {
        let target = view
            .locked
            .and_then(|id| view.visible.iter().find(|b| b.id == id));
        if let Some(target) = target {
            if !target.photo_succeeds(value, view.progress) {
                if let Some(card) = fixing_card(view.hand, target, value, view.progress) {
                    return Action::ApplyBonus { card_id: card.id.clone() };
                }
            }
        }
    }

    Action::ResolvePhoto {}
}

// =============================================================================
// TARGET CHOICE
// =============================================================================

fn choose_target<'a>(view: &BotView<'a>) -> Option<&'a BirdCard> {
    match view.difficulty {
        Difficulty::Easy => view.visible.first(),
        Difficulty::Medium => first_max_by(view.visible, |b| f64::from(b.points)),
        Difficulty::Hard | Difficulty::Legendary => first_max_by(view.visible, |b| {
            success_probability(b, view.progress, view.hand) * f64::from(b.points)
        }),
    }
}

/// Highest-scoring item; the earliest one wins ties.
fn first_max_by<'a>(items: &'a [BirdCard], score: impl Fn(&BirdCard) -> f64) -> Option<&'a BirdCard> {
    let mut best: Option<(&BirdCard, f64)> = None;
    for item in items {
        let s = score(item);
        if best.is_none_or(|(_, b)| s > b) {
            best = Some((item, s));
        }
    }
    best.map(|(item, _)| item)
}

fn should_photograph(view: &BotView<'_>, target: &BirdCard, dice: &mut dyn Dice) -> bool {
    if view.progress >= MAX_PROGRESS {
        return true;
    }
    match view.difficulty {
        Difficulty::Easy => {
            let percent = EASY_PHOTO_PERCENT[usize::from(view.progress)];
            dice.below(100) < percent
        }
        Difficulty::Medium => view.progress > 0,
        Difficulty::Hard | Difficulty::Legendary => {
            let points = f64::from(target.points);
            let now = success_probability(target, view.progress, view.hand) * points;
            let next = success_probability(target, view.progress + 1, view.hand) * points;
            now >= APPROACH_DISCOUNT * next
        }
    }
}

// =============================================================================
// PROBABILITY
// =============================================================================

/// Chance that a uniform d6 photo at `tier` captures `target`, counting every
/// card in `hand` that converts a losing roll. A reroll card counts at the
/// plain success rate.
#[must_use]
pub fn success_probability(target: &BirdCard, tier: u8, hand: &[InsectCard]) -> f64 {
    let direct: Vec<bool> = (1..=6u8).map(|face| target.photo_succeeds(face, tier)).collect();
    let plain = direct.iter().filter(|ok| **ok).count();
    #[allow(clippy::cast_precision_loss)]
    let plain_rate = plain as f64 / 6.0;
    let has_reroll = hand.iter().any(|c| c.bonus_action.apply_fixed(1).is_none());

    let mut total = 0.0;
    for (face, ok) in (1..=6u8).zip(&direct) {
        if *ok {
            total += 1.0;
        } else if hand.iter().any(|c| converts(c, target, face, tier)) {
            total += 1.0;
        } else if has_reroll {
            total += plain_rate;
        }
    }
    total / 6.0
}

fn converts(card: &InsectCard, target: &BirdCard, value: u8, tier: u8) -> bool {
    card.bonus_action
        .apply_fixed(value)
        .is_some_and(|v| target.photo_succeeds(v, tier))
}

fn fixing_card<'a>(hand: &'a [InsectCard], target: &BirdCard, value: u8, tier: u8) -> Option<&'a InsectCard> {
    hand.iter().find(|c| converts(c, target, value, tier))
}

// =============================================================================
// MULTI-CARD PLAYS
// =============================================================================

fn by_type(hand: &[InsectCard]) -> BTreeMap<InsectType, Vec<&InsectCard>> {
    let mut groups: BTreeMap<InsectType, Vec<&InsectCard>> = BTreeMap::new();
    for card in hand {
        groups.entry(card.card_type).or_default().push(card);
    }
    groups
}

/// Three same-type card ids, if the pending roll captures at least one target.
fn capture_all_cards(view: &BotView<'_>, value: u8) -> Option<Vec<String>> {
    let any_capturable = view
        .visible
        .iter()
        .any(|b| b.photo_succeeds(value, view.progress));
    if !any_capturable {
        return None;
    }
    by_type(view.hand)
        .into_values()
        .find(|cards| cards.len() >= 3)
        .map(|cards| cards.iter().take(3).map(|c| c.id.clone()).collect())
}

/// Highest-value target the hand can attract with two matching cards.
fn attract_option<'a>(view: &BotView<'a>) -> Option<(&'a BirdCard, Vec<String>)> {
    let groups = by_type(view.hand);
    let mut candidates: Vec<&BirdCard> = match view.locked {
        Some(id) => view.visible.iter().filter(|b| b.id == id).collect(),
        None => view.visible.iter().collect(),
    };
    candidates.sort_by(|a, b| b.points.cmp(&a.points));

    candidates.into_iter().find_map(|target| {
        let cards = groups.get(&target.attract_type)?;
        (cards.len() >= 2).then(|| (target, cards.iter().take(2).map(|c| c.id.clone()).collect()))
    })
}

#[cfg(test)]
#[path = "bot_test.rs"]
mod tests;
