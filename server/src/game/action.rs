//! Closed catalog of actions a player can send to the host.
//!
//! Wire shape is `{eventName, payload}`; parsing wraps it into an adjacently
//! tagged `{event, payload}` object so serde picks the variant by name.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::bot::Difficulty;
use super::GameError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    Join {
        name: String,
    },
    StartGame {},
    SelectTarget {
        target_id: String,
    },
    Sneak {
        #[serde(default)]
        target_id: Option<String>,
        #[serde(default)]
        use_card: bool,
        #[serde(default)]
        card_id: Option<String>,
    },
    StartPhotoRoll {
        target_id: String,
    },
    ApplyBonus {
        card_id: String,
    },
    ResolvePhoto {},
    CaptureAll {
        card_ids: Vec<String>,
    },
    Attract {
        target_id: String,
        card_ids: Vec<String>,
    },
    AddBot {
        #[serde(default)]
        difficulty: Difficulty,
    },
    GetHand {},
    Pass {},
    GetState {},
}

/// Event names accepted by [`Action::parse`].
pub const EVENT_NAMES: &[&str] = &[
    "join",
    "startGame",
    "selectTarget",
    "sneak",
    "startPhotoRoll",
    "applyBonus",
    "resolvePhoto",
    "captureAll",
    "attract",
    "addBot",
    "getHand",
    "pass",
    "getState",
];

impl Action {
    /// Parse an event name and payload. A null payload is treated as `{}`.
    ///
    /// # Errors
    ///
    /// `UnknownEvent` for names outside the catalog, `InvalidPayload` when
    /// the payload does not fit the event.
    pub fn parse(event: &str, payload: Value) -> Result<Self, GameError> {
        if !EVENT_NAMES.contains(&event) {
            return Err(GameError::UnknownEvent(event.to_owned()));
        }
        let payload = match payload {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let mut tagged = Map::new();
        tagged.insert("event".into(), Value::String(event.to_owned()));
        tagged.insert("payload".into(), payload);
        serde_json::from_value(Value::Object(tagged)).map_err(|e| GameError::InvalidPayload(e.to_string()))
    }

    /// Wire event name.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::StartGame {} => "startGame",
            Self::SelectTarget { .. } => "selectTarget",
            Self::Sneak { .. } => "sneak",
            Self::StartPhotoRoll { .. } => "startPhotoRoll",
            Self::ApplyBonus { .. } => "applyBonus",
            Self::ResolvePhoto {} => "resolvePhoto",
            Self::CaptureAll { .. } => "captureAll",
            Self::Attract { .. } => "attract",
            Self::AddBot { .. } => "addBot",
            Self::GetHand {} => "getHand",
            Self::Pass {} => "pass",
            Self::GetState {} => "getState",
        }
    }
}
