//! Authoritative room state machine for the bird-photography game.
//!
//! DESIGN
//! ======
//! A [`Room`] owns every piece of canonical state: seats, decks, the visible
//! target row, discard piles and the turn cursor. Actions arrive one at a
//! time through [`Dispatcher::dispatch`]; each handler validates first and
//! mutates only once every check has passed, so a rejected action leaves no
//! trace. Broadcasts are queued in an outbox during the action and handed to
//! the bridge in the returned [`Outcome`].
//!
//! TURN SUB-MACHINE
//! ================
//! `Idle → Locked{target, progress} → PhotoPending{target, progress, value}`
//! and back to `Idle` when the turn ends (capture, miss, scare or pass). The
//! lock cannot switch targets within a turn; progress never exceeds near.
//!
//! PARTITION
//! =========
//! Every bird is in exactly one of: deck, visible row, discard, a collection.
//! Every insect is in exactly one of: deck, a hand, discard.

pub mod action;
pub mod bot;
pub mod cards;
pub mod dice;
pub mod score;

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::bridge::dispatch::{Broadcast, Dispatcher, DispatcherFactory, Outcome};
use crate::config::HostConfig;
use crate::frame::{ErrorCode, failure, success};

use self::action::Action;
use self::bot::{BotView, Difficulty};
use self::cards::{BirdCard, CardSet, InsectCard, InsectType, MAX_PROGRESS};
use self::dice::{Dice, RngDice, shuffle};
use self::score::FinalScore;

/// Action log lines kept in the snapshot.
pub const LOG_CAPACITY: usize = 50;

/// Sneak draws in `0..6`; values below this succeed.
const SNEAK_SUCCESS_BELOW: u32 = 4;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GameError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("room is full")]
    RoomFull,
    #[error("game has already started")]
    GameStarted,
    #[error("game is not in progress")]
    NotPlaying,
    #[error("at least one player is required")]
    NoPlayers,
    #[error("not seated in this room: {0}")]
    UnknownPlayer(String),
    #[error("not your turn")]
    NotYourTurn,
    #[error("target {0} is not visible")]
    TargetNotVisible(String),
    #[error("turn is locked on target {locked}")]
    TargetLocked { locked: String },
    #[error("no target selected")]
    NoTarget,
    #[error("a photo roll is pending")]
    PhotoPending,
    #[error("no photo roll is pending")]
    NoPendingPhoto,
    #[error("card {0} is not in your hand")]
    CardNotInHand(String),
    #[error("card {0} listed more than once")]
    DuplicateCard(String),
    #[error("a card id is required")]
    MissingCard,
    #[error("expected {expected} cards, got {got}")]
    WrongCardCount { expected: usize, got: usize },
    #[error("cards must share one type")]
    MixedCardTypes,
    #[error("cards must be of type {expected}")]
    WrongCardType { expected: InsectType },
    #[error("no visible target matches this roll")]
    NothingToCapture,
}

impl ErrorCode for GameError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownEvent(_) => "E_UNKNOWN_EVENT",
            Self::InvalidPayload(_) => "E_INVALID_PAYLOAD",
            Self::RoomFull => "E_ROOM_FULL",
            Self::GameStarted => "E_GAME_STARTED",
            Self::NotPlaying => "E_NOT_PLAYING",
            Self::NoPlayers => "E_NO_PLAYERS",
            Self::UnknownPlayer(_) => "E_UNKNOWN_PLAYER",
            Self::NotYourTurn => "E_NOT_YOUR_TURN",
            Self::TargetNotVisible(_) => "E_TARGET_NOT_VISIBLE",
            Self::TargetLocked { .. } => "E_TARGET_LOCKED",
            Self::NoTarget => "E_NO_TARGET",
            Self::PhotoPending => "E_PHOTO_PENDING",
            Self::NoPendingPhoto => "E_NO_PENDING_PHOTO",
            Self::CardNotInHand(_) => "E_CARD_NOT_IN_HAND",
            Self::DuplicateCard(_) => "E_DUPLICATE_CARD",
            Self::MissingCard => "E_MISSING_CARD",
            Self::WrongCardCount { .. } => "E_CARD_COUNT",
            Self::MixedCardTypes => "E_MIXED_TYPES",
            Self::WrongCardType { .. } => "E_WRONG_TYPE",
            Self::NothingToCapture => "E_NOTHING_TO_CAPTURE",
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hand {
    pub insects: Vec<InsectCard>,
    /// Captured targets. Append-only.
    pub birds: Vec<BirdCard>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub turn_order: usize,
    pub score: u32,
    pub hand: Hand,
    /// Set for scripted seats, including humans replaced after a disconnect.
    pub bot: Option<Difficulty>,
}

impl Player {
    pub fn human(id: impl Into<String>, name: impl Into<String>, turn_order: usize) -> Self {
        Self { id: id.into(), name: name.into(), turn_order, score: 0, hand: Hand::default(), bot: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Turn {
    Idle,
    Locked { target: String, progress: u8 },
    PhotoPending { target: String, progress: u8, value: u8 },
}

impl Turn {
    fn target(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Locked { target, .. } | Self::PhotoPending { target, .. } => Some(target),
        }
    }

    fn progress(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Locked { progress, .. } | Self::PhotoPending { progress, .. } => *progress,
        }
    }

    fn pending_value(&self) -> Option<u8> {
        match self {
            Self::PhotoPending { value, .. } => Some(*value),
            _ => None,
        }
    }
}

// ----- snapshot views -----

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<'a> {
    room_code: &'a str,
    status: RoomStatus,
    visible_targets: &'a [BirdCard],
    bird_deck_count: usize,
    insect_deck_count: usize,
    bird_discard_count: usize,
    insect_discard_count: usize,
    current_player_index: usize,
    current_player_id: Option<&'a str>,
    current_target_id: Option<&'a str>,
    current_progress: u8,
    pending_action: Option<PendingAction<'a>>,
    players: Vec<PlayerSummary<'a>>,
    log: &'a VecDeque<String>,
    final_scores: &'a [FinalScore],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingAction<'a> {
    kind: &'static str,
    rolled_value: u8,
    target_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerSummary<'a> {
    player_id: &'a str,
    player_name: &'a str,
    turn_order: usize,
    score: u32,
    is_bot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    difficulty: Option<Difficulty>,
    hand_count: usize,
    captured_count: usize,
}

impl<'a> From<&'a Player> for PlayerSummary<'a> {
    fn from(p: &'a Player) -> Self {
        Self {
            player_id: &p.id,
            player_name: &p.name,
            turn_order: p.turn_order,
            score: p.score,
            is_bot: p.bot.is_some(),
            difficulty: p.bot,
            hand_count: p.hand.insects.len(),
            captured_count: p.hand.birds.len(),
        }
    }
}

fn to_json(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

// =============================================================================
// ROOM
// =============================================================================

pub struct Room {
    code: String,
    config: HostConfig,
    cards: Arc<CardSet>,
    dice: Box<dyn Dice>,
    status: RoomStatus,
    players: Vec<Player>,
    bird_deck: VecDeque<BirdCard>,
    insect_deck: VecDeque<InsectCard>,
    visible: Vec<BirdCard>,
    bird_discard: Vec<BirdCard>,
    insect_discard: Vec<InsectCard>,
    current: usize,
    turn: Turn,
    log: VecDeque<String>,
    final_scores: Vec<FinalScore>,
    bots_added: usize,
    outbox: Vec<Broadcast>,
}

/// Factory producing a fresh [`Room`] per created room code.
#[must_use]
pub fn room_factory(config: HostConfig, cards: Arc<CardSet>) -> DispatcherFactory {
    Arc::new(move |code: &str| -> Box<dyn Dispatcher> {
        Box::new(Room::new(code, config.clone(), Arc::clone(&cards), Box::new(RngDice::from_os())))
    })
}

impl Room {
    pub fn new(code: impl Into<String>, config: HostConfig, cards: Arc<CardSet>, dice: Box<dyn Dice>) -> Self {
        Self {
            code: code.into(),
            config,
            cards,
            dice,
            status: RoomStatus::Waiting,
            players: Vec::new(),
            bird_deck: VecDeque::new(),
            insect_deck: VecDeque::new(),
            visible: Vec::new(),
            bird_discard: Vec::new(),
            insect_discard: Vec::new(),
            current: 0,
            turn: Turn::Idle,
            log: VecDeque::new(),
            final_scores: Vec::new(),
            bots_added: 0,
            outbox: Vec::new(),
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn status(&self) -> RoomStatus {
        self.status
    }

    #[must_use]
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    #[must_use]
    pub fn visible(&self) -> &[BirdCard] {
        &self.visible
    }

    #[must_use]
    pub fn current_player(&self) -> Option<&Player> {
        if self.status == RoomStatus::Playing { self.players.get(self.current) } else { None }
    }

    /// Full public snapshot, as sent in `gameStateUpdate`.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let playing = self.status == RoomStatus::Playing;
        to_json(Snapshot {
            room_code: &self.code,
            status: self.status,
            visible_targets: &self.visible,
            bird_deck_count: self.bird_deck.len(),
            insect_deck_count: self.insect_deck.len(),
            bird_discard_count: self.bird_discard.len(),
            insect_discard_count: self.insect_discard.len(),
            current_player_index: self.current,
            current_player_id: playing
                .then(|| self.players.get(self.current).map(|p| p.id.as_str()))
                .flatten(),
            current_target_id: self.turn.target(),
            current_progress: self.turn.progress(),
            pending_action: match &self.turn {
                Turn::PhotoPending { target, value, .. } => {
                    Some(PendingAction { kind: "photo", rolled_value: *value, target_id: target })
                }
                _ => None,
            },
            players: self.players.iter().map(PlayerSummary::from).collect(),
            log: &self.log,
            final_scores: &self.final_scores,
        })
    }

    /// Apply one typed action. The returned data is merged into a success
    /// result by the caller.
    ///
    /// # Errors
    ///
    /// Returns a [`GameError`] and leaves the room untouched when the action
    /// is not allowed.
    pub fn apply(&mut self, sender: &str, action: Action) -> Result<Value, GameError> {
        match action {
            Action::Join { name } => self.join(sender, &name),
            Action::StartGame {} => self.start_game(),
            Action::SelectTarget { target_id } => self.select_target(sender, &target_id),
            Action::Sneak { target_id, use_card, card_id } => {
                self.sneak(sender, target_id.as_deref(), use_card, card_id.as_deref())
            }
            Action::StartPhotoRoll { target_id } => self.start_photo_roll(sender, &target_id),
            Action::ApplyBonus { card_id } => self.apply_bonus(sender, &card_id),
            Action::ResolvePhoto {} => self.resolve_photo(sender),
            Action::CaptureAll { card_ids } => self.capture_all(sender, &card_ids),
            Action::Attract { target_id, card_ids } => self.attract(sender, &target_id, &card_ids),
            Action::AddBot { difficulty } => self.add_bot(difficulty),
            Action::GetHand {} => self.get_hand(sender),
            Action::Pass {} => self.pass(sender),
            Action::GetState {} => Ok(json!({ "fullState": self.snapshot() })),
        }
    }

    // ===== LOBBY =====

    fn join(&mut self, sender: &str, name: &str) -> Result<Value, GameError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GameError::InvalidPayload("name must not be empty".into()));
        }
        if self.players.iter().any(|p| p.id == sender) {
            return Ok(json!({ "playerId": sender, "fullState": self.snapshot() }));
        }
        if self.status != RoomStatus::Waiting {
            return Err(GameError::GameStarted);
        }
        if self.players.len() >= self.config.max_players {
            return Err(GameError::RoomFull);
        }

        self.players.push(Player::human(sender, name, self.players.len()));
        info!(room = %self.code, player = %sender, %name, "game: player joined");
        self.push_log(format!("{name} joined the room"));
        self.push_player_list();
        Ok(json!({ "playerId": sender, "fullState": self.snapshot() }))
    }

    fn add_bot(&mut self, difficulty: Difficulty) -> Result<Value, GameError> {
        if self.status != RoomStatus::Waiting {
            return Err(GameError::GameStarted);
        }
        if self.players.len() >= self.config.max_players {
            return Err(GameError::RoomFull);
        }

        self.bots_added += 1;
        let id = format!("bot_{}", self.bots_added);
        let name = format!("Robo-Snapper {}", self.players.len() + 1);
        let mut player = Player::human(id.clone(), name.clone(), self.players.len());
        player.bot = Some(difficulty);
        self.players.push(player);

        info!(room = %self.code, bot = %id, ?difficulty, "game: bot added");
        self.push_log(format!("{name} joined the room"));
        self.push_player_list();
        Ok(json!({ "playerId": id }))
    }

    fn start_game(&mut self) -> Result<Value, GameError> {
        if self.status != RoomStatus::Waiting {
            return Err(GameError::GameStarted);
        }
        if self.players.is_empty() {
            return Err(GameError::NoPlayers);
        }

        let mut birds = self.cards.birds.clone();
        let mut insects = self.cards.insects.clone();
        shuffle(&mut birds, self.dice.as_mut());
        shuffle(&mut insects, self.dice.as_mut());
        self.bird_deck = birds.into();
        self.insect_deck = insects.into();

        let slots = self.config.visible_slots.min(self.bird_deck.len());
        self.visible = self.bird_deck.drain(..slots).collect();
        for player in &mut self.players {
            let n = self.config.initial_hand.min(self.insect_deck.len());
            player.hand.insects = self.insect_deck.drain(..n).collect();
        }

        self.status = RoomStatus::Playing;
        self.current = 0;
        self.turn = Turn::Idle;

        info!(room = %self.code, players = self.players.len(), "game: started");
        self.push_log("The game has started".into());
        let snapshot = self.snapshot();
        self.outbox.push(Broadcast::new("gameStarted", snapshot));
        self.announce_turn();
        self.push_state();
        Ok(json!({}))
    }

    fn get_hand(&self, sender: &str) -> Result<Value, GameError> {
        let player = self
            .players
            .iter()
            .find(|p| p.id == sender)
            .ok_or_else(|| GameError::UnknownPlayer(sender.to_owned()))?;
        Ok(json!({
            "resourceCards": to_json(&player.hand.insects),
            "collectedItems": to_json(&player.hand.birds),
        }))
    }

    // ===== TURN ACTIONS =====

    fn select_target(&mut self, sender: &str, target_id: &str) -> Result<Value, GameError> {
        self.require_turn(sender)?;
        match self.turn.target() {
            Some(locked) if locked == target_id => return Ok(json!({})),
            Some(locked) => return Err(GameError::TargetLocked { locked: locked.to_owned() }),
            None => {}
        }
        let bird = self.visible_bird(target_id)?;
        let line = format!("{} is eyeing the {}", self.players[self.current].name, bird.name);

        self.turn = Turn::Locked { target: target_id.to_owned(), progress: 0 };
        self.push_log(line);
        self.push_state();
        Ok(json!({}))
    }

    fn sneak(
        &mut self,
        sender: &str,
        target_id: Option<&str>,
        use_card: bool,
        card_id: Option<&str>,
    ) -> Result<Value, GameError> {
        let idx = self.require_turn(sender)?;
        let (target, progress) = self.resolve_target(target_id)?;
        let card_pos = if use_card {
            let card_id = card_id.ok_or(GameError::MissingCard)?;
            Some(self.card_position(idx, card_id)?)
        } else {
            None
        };

        let advanced = match card_pos {
            Some(pos) => {
                let card = self.players[idx].hand.insects.remove(pos);
                self.insect_discard.push(card);
                true
            }
            None => self.dice.below(6) < SNEAK_SUCCESS_BELOW,
        };
        self.outbox.push(Broadcast::new(
            "diceRolled",
            json!({
                "playerId": sender,
                "kind": "sneak",
                "diceValue": if advanced { "blank" } else { "bird" },
                "skipAnimation": use_card,
            }),
        ));

        let name = self.players[idx].name.clone();
        let bird_name = self.bird_name(&target);
        if advanced {
            let progress = (progress + 1).min(MAX_PROGRESS);
            self.turn = Turn::Locked { target, progress };
            self.push_log(format!("{name} crept closer to the {bird_name}"));
            self.push_state();
            Ok(json!({ "outcome": "success", "newProgress": progress }))
        } else {
            self.scare(&target);
            self.compensate(idx);
            self.push_log(format!("The {bird_name} flew away from {name}"));
            self.end_turn();
            Ok(json!({ "outcome": "scared", "newProgress": 0 }))
        }
    }

    fn start_photo_roll(&mut self, sender: &str, target_id: &str) -> Result<Value, GameError> {
        self.require_turn(sender)?;
        let (target, progress) = self.resolve_target(Some(target_id))?;

        let value = self.dice.d6();
        let line = format!("{} rolled {value} photographing the {}", self.players[self.current].name, self.bird_name(&target));
        self.turn = Turn::PhotoPending { target, progress, value };
        self.outbox.push(Broadcast::new(
            "diceRolled",
            json!({ "playerId": sender, "kind": "photo", "diceValue": value }),
        ));
        self.push_log(line);
        self.push_state();
        Ok(json!({ "rolledValue": value }))
    }

    fn apply_bonus(&mut self, sender: &str, card_id: &str) -> Result<Value, GameError> {
        let idx = self.require_turn(sender)?;
        let value = self.turn.pending_value().ok_or(GameError::NoPendingPhoto)?;
        let pos = self.card_position(idx, card_id)?;

        let card = self.players[idx].hand.insects.remove(pos);
        let new_value = card.bonus_action.apply_fixed(value).unwrap_or_else(|| self.dice.d6());
        if let Turn::PhotoPending { value, .. } = &mut self.turn {
            *value = new_value;
        }
        self.outbox.push(Broadcast::new(
            "diceUpdated",
            json!({
                "playerId": sender,
                "cardId": card.id,
                "bonusAction": to_json(card.bonus_action),
                "newValue": new_value,
            }),
        ));
        self.push_log(format!("{} used a {} card: the die now shows {new_value}", self.players[idx].name, card.name));
        self.insect_discard.push(card);
        self.push_state();
        Ok(json!({ "newValue": new_value }))
    }

    fn resolve_photo(&mut self, sender: &str) -> Result<Value, GameError> {
        let idx = self.require_turn(sender)?;
        let Turn::PhotoPending { target, progress, value } = self.turn.clone() else {
            return Err(GameError::NoPendingPhoto);
        };
        let captured = self.visible_bird(&target)?.photo_succeeds(value, progress);

        let name = self.players[idx].name.clone();
        let bird_name = self.bird_name(&target);
        if captured {
            self.capture(idx, &target);
            self.push_log(format!("{name} photographed the {bird_name}"));
        } else {
            self.scare(&target);
            self.compensate(idx);
            self.push_log(format!("{name} missed the {bird_name}"));
        }
        self.end_turn();
        Ok(json!({ "outcome": if captured { "captured" } else { "missed" } }))
    }

    fn capture_all(&mut self, sender: &str, card_ids: &[String]) -> Result<Value, GameError> {
        let idx = self.require_turn(sender)?;
        let value = self.turn.pending_value().ok_or(GameError::NoPendingPhoto)?;
        let cards = self.select_cards(idx, card_ids, 3)?;
        let first = cards[0].card_type;
        if cards.iter().any(|c| c.card_type != first) {
            return Err(GameError::MixedCardTypes);
        }

        let progress = self.turn.progress();
        let targets: Vec<String> = self
            .visible
            .iter()
            .filter(|b| b.photo_succeeds(value, progress))
            .map(|b| b.id.clone())
            .collect();
        if targets.is_empty() {
            return Err(GameError::NothingToCapture);
        }

        self.spend_cards(idx, card_ids);
        for target in &targets {
            self.capture(idx, target);
        }
        self.push_log(format!("{} captured {} birds at once", self.players[idx].name, targets.len()));
        self.end_turn();
        Ok(json!({ "capturedCount": targets.len() }))
    }

    fn attract(&mut self, sender: &str, target_id: &str, card_ids: &[String]) -> Result<Value, GameError> {
        let idx = self.require_turn(sender)?;
        let (target, _) = self.resolve_target(Some(target_id))?;
        let cards = self.select_cards(idx, card_ids, 2)?;
        let expected = self.visible_bird(&target)?.attract_type;
        if cards.iter().any(|c| c.card_type != expected) {
            return Err(GameError::WrongCardType { expected });
        }

        let bird_name = self.bird_name(&target);
        self.spend_cards(idx, card_ids);
        self.capture(idx, &target);
        self.push_log(format!("{} attracted the {bird_name}", self.players[idx].name));
        self.end_turn();
        Ok(json!({}))
    }

    fn pass(&mut self, sender: &str) -> Result<Value, GameError> {
        let idx = self.require_turn(sender)?;
        if self.turn.pending_value().is_some() {
            return Err(GameError::PhotoPending);
        }
        self.push_log(format!("{} passed", self.players[idx].name));
        self.end_turn();
        Ok(json!({}))
    }

    // ===== VALIDATION =====

    fn require_turn(&self, sender: &str) -> Result<usize, GameError> {
        if self.status != RoomStatus::Playing {
            return Err(GameError::NotPlaying);
        }
        match self.players.get(self.current) {
            Some(p) if p.id == sender => Ok(self.current),
            _ => Err(GameError::NotYourTurn),
        }
    }

    /// Target the action applies to, with its current progress. From `Idle`
    /// the requested target becomes the implicit lock.
    fn resolve_target(&self, requested: Option<&str>) -> Result<(String, u8), GameError> {
        match &self.turn {
            Turn::PhotoPending { .. } => Err(GameError::PhotoPending),
            Turn::Locked { target, progress } => match requested {
                Some(id) if id != target => Err(GameError::TargetLocked { locked: target.clone() }),
                _ => Ok((target.clone(), *progress)),
            },
            Turn::Idle => {
                let id = requested.ok_or(GameError::NoTarget)?;
                self.visible_bird(id)?;
                Ok((id.to_owned(), 0))
            }
        }
    }

    fn visible_bird(&self, id: &str) -> Result<&BirdCard, GameError> {
        self.visible
            .iter()
            .find(|b| b.id == id)
            .ok_or_else(|| GameError::TargetNotVisible(id.to_owned()))
    }

    fn bird_name(&self, id: &str) -> String {
        self.visible
            .iter()
            .find(|b| b.id == id)
            .map_or_else(|| id.to_owned(), |b| b.name.clone())
    }

    fn card_position(&self, idx: usize, card_id: &str) -> Result<usize, GameError> {
        self.players[idx]
            .hand
            .insects
            .iter()
            .position(|c| c.id == card_id)
            .ok_or_else(|| GameError::CardNotInHand(card_id.to_owned()))
    }

    /// Exactly `count` distinct cards from the player's hand.
    fn select_cards(&self, idx: usize, card_ids: &[String], count: usize) -> Result<Vec<&InsectCard>, GameError> {
        if card_ids.len() != count {
            return Err(GameError::WrongCardCount { expected: count, got: card_ids.len() });
        }
        let mut cards = Vec::with_capacity(count);
        for (i, id) in card_ids.iter().enumerate() {
            if card_ids[..i].contains(id) {
                return Err(GameError::DuplicateCard(id.clone()));
            }
            let pos = self.card_position(idx, id)?;
            cards.push(&self.players[idx].hand.insects[pos]);
        }
        Ok(cards)
    }

    // ===== MUTATION HELPERS =====

    fn spend_cards(&mut self, idx: usize, card_ids: &[String]) {
        let hand = &mut self.players[idx].hand.insects;
        let (spent, kept): (Vec<_>, Vec<_>) = hand.drain(..).partition(|c| card_ids.contains(&c.id));
        *hand = kept;
        self.insect_discard.extend(spent);
    }

    /// Move a visible target into the player's collection and refill its slot.
    fn capture(&mut self, idx: usize, target: &str) {
        if let Some(bird) = self.take_visible(target) {
            let player = &mut self.players[idx];
            player.score += bird.points;
            player.hand.birds.push(bird);
        }
    }

    /// Discard a visible target and refill its slot.
    fn scare(&mut self, target: &str) {
        if let Some(bird) = self.take_visible(target) {
            self.bird_discard.push(bird);
        }
    }

    /// Remove a target from the row; the slot is refilled from the deck head
    /// or dropped when the deck is empty.
    fn take_visible(&mut self, target: &str) -> Option<BirdCard> {
        let pos = self.visible.iter().position(|b| b.id == target)?;
        match self.bird_deck.pop_front() {
            Some(next) => Some(std::mem::replace(&mut self.visible[pos], next)),
            None => Some(self.visible.remove(pos)),
        }
    }

    /// Compensatory resource card after a scare or miss.
    fn compensate(&mut self, idx: usize) {
        if let Some(card) = self.insect_deck.pop_front() {
            self.players[idx].hand.insects.push(card);
        }
    }

    fn end_turn(&mut self) {
        self.turn = Turn::Idle;
        self.current = (self.current + 1) % self.players.len().max(1);

        if self.bird_deck.is_empty() || self.insect_deck.is_empty() {
            self.finish();
            return;
        }
        self.announce_turn();
        self.push_state();
    }

    fn finish(&mut self) {
        self.status = RoomStatus::Finished;
        let scores: Vec<FinalScore> = self.players.iter().map(score::final_score).collect();
        for (player, line) in self.players.iter_mut().zip(&scores) {
            player.score += line.bonus;
        }
        let winners = score::winners(&scores);
        self.final_scores = scores;

        info!(room = %self.code, ?winners, "game: finished");
        self.push_log("The game is over".into());
        self.push_state();
        self.outbox.push(Broadcast::new(
            "gameEnded",
            json!({ "finalScores": to_json(&self.final_scores), "winners": winners }),
        ));
    }

    // ===== BROADCASTS =====

    fn push_log(&mut self, line: String) {
        debug!(room = %self.code, %line, "game: log");
        self.outbox.push(Broadcast::new("logUpdate", json!({ "entry": line })));
        self.log.push_back(line);
        while self.log.len() > LOG_CAPACITY {
            self.log.pop_front();
        }
    }

    fn push_state(&mut self) {
        let snapshot = self.snapshot();
        self.outbox.push(Broadcast::new("gameStateUpdate", snapshot));
    }

    fn push_player_list(&mut self) {
        let list: Vec<PlayerSummary<'_>> = self.players.iter().map(PlayerSummary::from).collect();
        let payload = json!({ "players": to_json(list) });
        self.outbox.push(Broadcast::new("playerListUpdate", payload));
    }

    fn announce_turn(&mut self) {
        if let Some(player) = self.players.get(self.current) {
            let line = format!("It is {}'s turn", player.name);
            self.push_log(line);
        }
    }

    fn take_outcome(&mut self, result: Value) -> Outcome {
        Outcome { result, broadcasts: std::mem::take(&mut self.outbox) }
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

impl Dispatcher for Room {
    fn dispatch(&mut self, sender: &str, event: &str, payload: Value) -> Outcome {
        let result = match Action::parse(event, payload).and_then(|action| self.apply(sender, action)) {
            Ok(data) => success(data),
            Err(err) => {
                warn!(room = %self.code, %sender, event, code = err.error_code(), error = %err, "game: action rejected");
                self.outbox.clear();
                failure(&err)
            }
        };
        self.take_outcome(result)
    }

    fn peer_closed(&mut self, peer: &str) -> Outcome {
        let Some(pos) = self.players.iter().position(|p| p.id == peer) else {
            return self.take_outcome(Value::Null);
        };
        match self.status {
            RoomStatus::Waiting => {
                let player = self.players.remove(pos);
                for (order, p) in self.players.iter_mut().enumerate() {
                    p.turn_order = order;
                }
                info!(room = %self.code, player = %peer, "game: seat released");
                self.push_log(format!("{} left the room", player.name));
                self.push_player_list();
            }
            RoomStatus::Playing if self.players[pos].bot.is_none() => {
                self.players[pos].bot = Some(Difficulty::Medium);
                let name = self.players[pos].name.clone();
                info!(room = %self.code, player = %peer, "game: bot took over seat");
                self.push_log(format!("{name} disconnected; a bot takes over"));
                self.push_player_list();
                self.push_state();
            }
            RoomStatus::Playing | RoomStatus::Finished => {}
        }
        self.take_outcome(Value::Null)
    }

    fn bot_to_move(&self) -> bool {
        self.current_player().is_some_and(|p| p.bot.is_some())
    }

    fn bot_step(&mut self) -> Option<Outcome> {
        let player = self.current_player()?;
        let difficulty = player.bot?;
        let bot_id = player.id.clone();

        let view = BotView {
            difficulty,
            hand: &self.players[self.current].hand.insects,
            visible: &self.visible,
            locked: self.turn.target(),
            progress: self.turn.progress(),
            pending: self.turn.pending_value(),
        };
        let action = bot::plan(&view, self.dice.as_mut());
        let event = action.event_name();
        debug!(room = %self.code, bot = %bot_id, event, "game: bot acts");

        let result = match self.apply(&bot_id, action) {
            Ok(data) => success(data),
            Err(err) => {
                warn!(room = %self.code, bot = %bot_id, event, error = %err, "game: bot action rejected, falling back");
                self.outbox.clear();
                let fallback = if self.turn.pending_value().is_some() { Action::ResolvePhoto {} } else { Action::Pass {} };
                match self.apply(&bot_id, fallback) {
                    Ok(data) => success(data),
                    Err(err) => {
                        warn!(room = %self.code, bot = %bot_id, error = %err, "game: bot fallback rejected, ending turn");
                        let name = self.players[self.current].name.clone();
                        self.push_log(format!("{name} skips the turn"));
                        self.end_turn();
                        failure(&err)
                    }
                }
            }
        };
        Some(self.take_outcome(result))
    }
}

// =============================================================================
// TEST HOOKS
// =============================================================================

#[cfg(test)]
impl Room {
    /// Replace decks, visible row and hands after `startGame`, in seat order.
    pub(crate) fn deal(
        &mut self,
        visible: Vec<BirdCard>,
        bird_deck: Vec<BirdCard>,
        insect_deck: Vec<InsectCard>,
        hands: Vec<Vec<InsectCard>>,
    ) {
        self.visible = visible;
        self.bird_deck = bird_deck.into();
        self.insect_deck = insect_deck.into();
        for (player, hand) in self.players.iter_mut().zip(hands) {
            player.hand.insects = hand;
        }
    }

    pub(crate) fn set_dice(&mut self, dice: Box<dyn Dice>) {
        self.dice = dice;
    }

    pub(crate) fn deck_counts(&self) -> (usize, usize, usize, usize) {
        (self.bird_deck.len(), self.bird_discard.len(), self.insect_deck.len(), self.insect_discard.len())
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
