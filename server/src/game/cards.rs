//! Card dataset — target (bird) and resource (insect) cards.
//!
//! A target card carries one dice requirement per distance tier: far (0),
//! mid (1) and near (2). Requirements are written as `"N"` or `"A-B"` in the
//! dataset and parsed into [`Requirement`] at load time, so a malformed set is
//! rejected before any room is created.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::frame::ErrorCode;

/// Dataset compiled into the binary.
const DEFAULT_CARDS: &str = include_str!("../../data/cards.json");

/// Highest distance tier (near).
pub const MAX_PROGRESS: u8 = 2;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("failed to read card set {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid card set json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid dice requirement: {0:?}")]
    InvalidRequirement(String),
    #[error("duplicate card id: {0}")]
    DuplicateId(String),
    #[error("card {id} has {points} points (expected 1-3)")]
    InvalidPoints { id: String, points: u32 },
    #[error("card set has no {0} cards")]
    Empty(&'static str),
}

impl ErrorCode for CardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "E_CARDS_IO",
            Self::Parse(_) => "E_CARDS_PARSE",
            Self::InvalidRequirement(_) => "E_CARDS_REQUIREMENT",
            Self::DuplicateId(_) => "E_CARDS_DUPLICATE",
            Self::InvalidPoints { .. } => "E_CARDS_POINTS",
            Self::Empty(_) => "E_CARDS_EMPTY",
        }
    }
}

// =============================================================================
// REQUIREMENT
// =============================================================================

/// Dice faces that satisfy one distance tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Requirement {
    Exact(u8),
    Range(u8, u8),
}

impl Requirement {
    #[must_use]
    pub fn matches(self, value: u8) -> bool {
        match self {
            Self::Exact(face) => value == face,
            Self::Range(lo, hi) => (lo..=hi).contains(&value),
        }
    }
}

fn parse_face(raw: &str, whole: &str) -> Result<u8, CardError> {
    match raw.trim().parse::<u8>() {
        Ok(face @ 1..=6) => Ok(face),
        _ => Err(CardError::InvalidRequirement(whole.to_owned())),
    }
}

impl FromStr for Requirement {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            None => parse_face(s, s).map(Self::Exact),
            Some((lo, hi)) => {
                let lo = parse_face(lo, s)?;
                let hi = parse_face(hi, s)?;
                if lo > hi {
                    return Err(CardError::InvalidRequirement(s.to_owned()));
                }
                Ok(Self::Range(lo, hi))
            }
        }
    }
}

impl TryFrom<String> for Requirement {
    type Error = CardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(face) => write!(f, "{face}"),
            Self::Range(lo, hi) => write!(f, "{lo}-{hi}"),
        }
    }
}

impl From<Requirement> for String {
    fn from(value: Requirement) -> Self {
        value.to_string()
    }
}

// =============================================================================
// CARDS
// =============================================================================

/// Type tag shared by resource cards and target attraction requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsectType {
    Ant,
    Caterpillar,
    Grasshopper,
    Fly,
}

impl fmt::Display for InsectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ant => "ant",
            Self::Caterpillar => "caterpillar",
            Self::Grasshopper => "grasshopper",
            Self::Fly => "fly",
        };
        f.write_str(name)
    }
}

/// Effect of spending a resource card on a pending photo roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BonusAction {
    Increase,
    Decrease,
    Flip,
    Reroll,
}

impl BonusAction {
    /// Deterministic result of this bonus, or `None` for a reroll.
    #[must_use]
    pub fn apply_fixed(self, value: u8) -> Option<u8> {
        match self {
            Self::Increase => Some((value + 1).min(6)),
            Self::Decrease => Some(value.saturating_sub(1).max(1)),
            Self::Flip => Some(7u8.saturating_sub(value)),
            Self::Reroll => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BirdCard {
    pub id: String,
    pub name: String,
    pub points: u32,
    pub attract_type: InsectType,
    pub distance_far: Requirement,
    pub distance_mid: Requirement,
    pub distance_near: Requirement,
}

impl BirdCard {
    /// Requirement at a distance tier. Tiers above near clamp to near.
    #[must_use]
    pub fn requirement(&self, tier: u8) -> Requirement {
        match tier {
            0 => self.distance_far,
            1 => self.distance_mid,
            _ => self.distance_near,
        }
    }

    /// A photo succeeds if the value satisfies any tier reached so far.
    #[must_use]
    pub fn photo_succeeds(&self, value: u8, progress: u8) -> bool {
        (0..=progress.min(MAX_PROGRESS)).any(|tier| self.requirement(tier).matches(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsectCard {
    pub id: String,
    pub name: String,
    pub card_type: InsectType,
    pub bonus_action: BonusAction,
}

// =============================================================================
// CARD SET
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSet {
    pub birds: Vec<BirdCard>,
    pub insects: Vec<InsectCard>,
}

impl CardSet {
    /// The compiled-in dataset.
    ///
    /// # Errors
    ///
    /// Only fails if the bundled file is malformed.
    pub fn builtin() -> Result<Self, CardError> {
        Self::from_json(DEFAULT_CARDS)
    }

    /// # Errors
    ///
    /// Returns [`CardError`] for unreadable files or an invalid dataset.
    pub fn from_path(path: &Path) -> Result<Self, CardError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| CardError::Io { path: path.display().to_string(), source })?;
        Self::from_json(&raw)
    }

    /// Load the configured dataset, or the compiled-in one when `path` is `None`.
    ///
    /// # Errors
    ///
    /// See [`CardSet::from_path`].
    pub fn load(path: Option<&Path>) -> Result<Self, CardError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::builtin(),
        }
    }

    /// # Errors
    ///
    /// Returns [`CardError`] for malformed JSON, bad requirements, duplicate
    /// ids, point values outside 1-3, or an empty deck.
    pub fn from_json(raw: &str) -> Result<Self, CardError> {
        let set: Self = serde_json::from_str(raw)?;
        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<(), CardError> {
        if self.birds.is_empty() {
            return Err(CardError::Empty("bird"));
        }
        if self.insects.is_empty() {
            return Err(CardError::Empty("insect"));
        }

        let mut seen = HashSet::new();
        let ids = self
            .birds
            .iter()
            .map(|b| &b.id)
            .chain(self.insects.iter().map(|i| &i.id));
        for id in ids {
            if !seen.insert(id) {
                return Err(CardError::DuplicateId(id.clone()));
            }
        }

        if let Some(bird) = self.birds.iter().find(|b| !(1..=3).contains(&b.points)) {
            return Err(CardError::InvalidPoints { id: bird.id.clone(), points: bird.points });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "cards_test.rs"]
mod tests;
