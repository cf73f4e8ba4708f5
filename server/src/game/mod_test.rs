use super::*;
use crate::frame::is_success;
use crate::game::cards::{BonusAction, Requirement};
use crate::game::dice::ScriptedDice;

// =============================================================================
// HELPERS
// =============================================================================

fn bird(id: &str, points: u32, attract: InsectType, tiers: [&str; 3]) -> BirdCard {
    BirdCard {
        id: id.into(),
        name: format!("bird {id}"),
        points,
        attract_type: attract,
        distance_far: tiers[0].parse::<Requirement>().unwrap(),
        distance_mid: tiers[1].parse::<Requirement>().unwrap(),
        distance_near: tiers[2].parse::<Requirement>().unwrap(),
    }
}

fn filler_birds(prefix: &str, n: usize) -> Vec<BirdCard> {
    (0..n)
        .map(|i| bird(&format!("{prefix}{i}"), 1, InsectType::Caterpillar, ["1", "1", "1"]))
        .collect()
}

fn insect(id: &str, card_type: InsectType, bonus: BonusAction) -> InsectCard {
    InsectCard { id: id.into(), name: format!("{card_type}"), card_type, bonus_action: bonus }
}

fn filler_insects(n: usize) -> Vec<InsectCard> {
    (0..n)
        .map(|i| insect(&format!("D{i}"), InsectType::Grasshopper, BonusAction::Increase))
        .collect()
}

fn new_room() -> Room {
    Room::new(
        "ABC123",
        HostConfig::default(),
        Arc::new(CardSet::builtin().unwrap()),
        Box::new(ScriptedDice::default()),
    )
}

fn send(room: &mut Room, sender: &str, event: &str, payload: Value) -> Outcome {
    room.dispatch(sender, event, payload)
}

fn assert_ok(outcome: &Outcome) {
    assert!(is_success(&outcome.result), "expected success, got {}", outcome.result);
}

fn assert_code(outcome: &Outcome, code: &str) {
    assert!(!is_success(&outcome.result), "expected {code}, got success");
    assert_eq!(outcome.result["code"], code, "result: {}", outcome.result);
    assert!(outcome.result["error"].as_str().is_some_and(|e| !e.is_empty()));
    assert!(outcome.broadcasts.is_empty(), "rejected action must not broadcast");
}

fn events(outcome: &Outcome) -> Vec<&str> {
    outcome.broadcasts.iter().map(|b| b.event.as_str()).collect()
}

fn broadcast<'a>(outcome: &'a Outcome, event: &str) -> &'a Value {
    &outcome
        .broadcasts
        .iter()
        .find(|b| b.event == event)
        .unwrap_or_else(|| panic!("no {event} broadcast in {:?}", events(outcome)))
        .payload
}

fn seated(names: &[&str]) -> Room {
    let mut room = new_room();
    for name in names {
        assert_ok(&send(&mut room, name, "join", json!({ "name": name })));
    }
    room
}

fn started(names: &[&str]) -> Room {
    let mut room = seated(names);
    assert_ok(&send(&mut room, names[0], "startGame", json!({})));
    room
}

fn player<'a>(room: &'a Room, id: &str) -> &'a Player {
    room.players().iter().find(|p| p.id == id).unwrap()
}

// =============================================================================
// LOBBY
// =============================================================================

#[test]
fn join_broadcasts_player_list_and_returns_state() {
    let mut room = new_room();
    let out = send(&mut room, "p1", "join", json!({"name": "Ada"}));

    assert_ok(&out);
    assert_eq!(out.result["playerId"], "p1");
    assert_eq!(out.result["fullState"]["status"], "waiting");
    let list = broadcast(&out, "playerListUpdate");
    assert_eq!(list["players"][0]["playerName"], "Ada");
    assert_eq!(list["players"][0]["turnOrder"], 0);
}

#[test]
fn join_is_idempotent_for_seated_id() {
    let mut room = seated(&["p1"]);
    let out = send(&mut room, "p1", "join", json!({"name": "Again"}));
    assert_ok(&out);
    assert!(out.broadcasts.is_empty());
    assert_eq!(room.players().len(), 1);
    assert_eq!(room.players()[0].name, "p1");
}

#[test]
fn join_rejects_full_room_and_started_game() {
    let mut room = seated(&["p1", "p2", "p3", "p4"]);
    assert_code(&send(&mut room, "p5", "join", json!({"name": "p5"})), "E_ROOM_FULL");

    let mut room = started(&["p1"]);
    assert_code(&send(&mut room, "p2", "join", json!({"name": "p2"})), "E_GAME_STARTED");
}

#[test]
fn join_rejects_blank_name() {
    let mut room = new_room();
    assert_code(&send(&mut room, "p1", "join", json!({"name": "   "})), "E_INVALID_PAYLOAD");
}

#[test]
fn add_bot_names_seat_and_respects_cap() {
    let mut room = seated(&["p1"]);
    let out = send(&mut room, "p1", "addBot", json!({"difficulty": "hard"}));
    assert_ok(&out);

    let bot_id = out.result["playerId"].as_str().unwrap().to_owned();
    let bot = player(&room, &bot_id);
    assert_eq!(bot.name, "Robo-Snapper 2");
    assert_eq!(bot.bot, Some(Difficulty::Hard));
    assert_eq!(bot.turn_order, 1);

    assert_ok(&send(&mut room, "p1", "addBot", json!({})));
    assert_ok(&send(&mut room, "p1", "addBot", json!({})));
    assert_code(&send(&mut room, "p1", "addBot", json!({})), "E_ROOM_FULL");
}

#[test]
fn start_game_deals_row_and_hands() {
    let mut room = seated(&["p1", "p2"]);
    let out = send(&mut room, "p1", "startGame", json!({}));
    assert_ok(&out);

    assert_eq!(room.status(), RoomStatus::Playing);
    assert_eq!(room.visible().len(), 3);
    assert!(room.players().iter().all(|p| p.hand.insects.len() == 3));
    assert_eq!(room.current_player().unwrap().id, "p1");

    let started = broadcast(&out, "gameStarted");
    assert_eq!(started["status"], "playing");
    assert_eq!(started["visibleTargets"].as_array().unwrap().len(), 3);

    assert_code(&send(&mut room, "p1", "startGame", json!({})), "E_GAME_STARTED");
}

#[test]
fn start_game_requires_a_player() {
    let mut room = new_room();
    assert_code(&send(&mut room, "host", "startGame", json!({})), "E_NO_PLAYERS");
}

#[test]
fn unknown_event_is_structured_failure() {
    let mut room = seated(&["p1"]);
    assert_code(&send(&mut room, "p1", "teleport", json!({})), "E_UNKNOWN_EVENT");
}

#[test]
fn get_hand_is_private_to_sender() {
    let mut room = started(&["p1", "p2"]);
    let out = send(&mut room, "p2", "getHand", Value::Null);
    assert_ok(&out);
    assert_eq!(out.result["resourceCards"].as_array().unwrap().len(), 3);
    assert_eq!(out.result["collectedItems"], json!([]));
    assert!(out.broadcasts.is_empty());

    assert_code(&send(&mut room, "stranger", "getHand", Value::Null), "E_UNKNOWN_PLAYER");
}

#[test]
fn get_state_returns_snapshot() {
    let mut room = started(&["p1"]);
    let out = send(&mut room, "p1", "getState", json!({}));
    assert_ok(&out);
    assert_eq!(out.result["fullState"]["roomCode"], "ABC123");
    assert_eq!(out.result["fullState"]["currentPlayerId"], "p1");
}

// =============================================================================
// TURN RULES
// =============================================================================

#[test]
fn only_turn_holder_may_act() {
    let mut room = started(&["p1", "p2"]);
    let target = room.visible()[0].id.clone();
    let before = room.snapshot();

    assert_code(&send(&mut room, "p2", "selectTarget", json!({"targetId": target})), "E_NOT_YOUR_TURN");
    assert_code(&send(&mut room, "p2", "pass", json!({})), "E_NOT_YOUR_TURN");
    assert_eq!(room.snapshot(), before);
}

#[test]
fn actions_before_start_are_rejected() {
    let mut room = seated(&["p1"]);
    assert_code(&send(&mut room, "p1", "pass", json!({})), "E_NOT_PLAYING");
}

#[test]
fn target_lock_cannot_switch() {
    let mut room = started(&["p1"]);
    let a = room.visible()[0].id.clone();
    let b = room.visible()[1].id.clone();

    let out = send(&mut room, "p1", "selectTarget", json!({"targetId": a}));
    assert_ok(&out);
    assert!(events(&out).contains(&"gameStateUpdate"));

    // Same target: idempotent, no side effects.
    let out = send(&mut room, "p1", "selectTarget", json!({"targetId": a}));
    assert_ok(&out);
    assert!(out.broadcasts.is_empty());

    let out = send(&mut room, "p1", "selectTarget", json!({"targetId": b}));
    assert_code(&out, "E_TARGET_LOCKED");
    let out = send(&mut room, "p1", "startPhotoRoll", json!({"targetId": b}));
    assert_code(&out, "E_TARGET_LOCKED");
    assert_eq!(room.snapshot()["currentTargetId"], a.as_str());
}

#[test]
fn select_target_must_be_visible() {
    let mut room = started(&["p1"]);
    assert_code(&send(&mut room, "p1", "selectTarget", json!({"targetId": "nope"})), "E_TARGET_NOT_VISIBLE");
}

#[test]
fn progress_is_capped_at_near() {
    let mut room = started(&["p1"]);
    let hand: Vec<InsectCard> = (0..3)
        .map(|i| insect(&format!("c{i}"), InsectType::Ant, BonusAction::Flip))
        .collect();
    room.deal(
        vec![bird("T", 2, InsectType::Ant, ["6", "5-6", "4-6"])],
        filler_birds("F", 3),
        filler_insects(3),
        vec![hand],
    );

    let mut progress = Vec::new();
    for card in ["c0", "c1", "c2"] {
        let out = send(&mut room, "p1", "sneak", json!({"targetId": "T", "useCard": true, "cardId": card}));
        assert_ok(&out);
        assert_eq!(out.result["outcome"], "success");
        assert_eq!(broadcast(&out, "diceRolled")["skipAnimation"], true);
        progress.push(out.result["newProgress"].as_u64().unwrap());
    }
    assert_eq!(progress, vec![1, 2, 2]);
    assert!(player(&room, "p1").hand.insects.is_empty());
}

#[test]
fn sneak_with_card_requires_card_in_hand() {
    let mut room = started(&["p1"]);
    room.deal(
        vec![bird("T", 2, InsectType::Ant, ["6", "5-6", "4-6"])],
        filler_birds("F", 3),
        filler_insects(3),
        vec![vec![]],
    );
    assert_code(&send(&mut room, "p1", "sneak", json!({"targetId": "T", "useCard": true})), "E_MISSING_CARD");
    assert_code(
        &send(&mut room, "p1", "sneak", json!({"targetId": "T", "useCard": true, "cardId": "X"})),
        "E_CARD_NOT_IN_HAND",
    );
    // Implicit lock was not taken by the rejected sneaks.
    assert_eq!(room.snapshot()["currentTargetId"], Value::Null);
}

#[test]
fn sneak_roll_below_four_advances() {
    let mut room = started(&["p1"]);
    room.deal(
        vec![bird("T", 2, InsectType::Ant, ["6", "5-6", "4-6"])],
        filler_birds("F", 3),
        filler_insects(3),
        vec![vec![]],
    );
    room.set_dice(Box::new(ScriptedDice::new([3])));

    let out = send(&mut room, "p1", "sneak", json!({"targetId": "T", "useCard": false}));
    assert_ok(&out);
    assert_eq!(out.result["outcome"], "success");
    assert_eq!(out.result["newProgress"], 1);
    assert_eq!(broadcast(&out, "diceRolled")["diceValue"], "blank");
}

#[test]
fn pass_ends_turn_but_not_while_photo_pending() {
    let mut room = started(&["p1", "p2"]);
    let target = room.visible()[0].id.clone();
    room.set_dice(Box::new(ScriptedDice::faces([3])));

    assert_ok(&send(&mut room, "p1", "startPhotoRoll", json!({"targetId": target})));
    assert_code(&send(&mut room, "p1", "pass", json!({})), "E_PHOTO_PENDING");
    assert_code(&send(&mut room, "p1", "sneak", json!({})), "E_PHOTO_PENDING");

    let mut room = started(&["p1", "p2"]);
    let out = send(&mut room, "p1", "pass", json!({}));
    assert_ok(&out);
    assert_eq!(room.current_player().unwrap().id, "p2");
}

#[test]
fn apply_bonus_modifies_pending_roll() {
    let mut room = started(&["p1"]);
    let hand = vec![
        insect("inc", InsectType::Ant, BonusAction::Increase),
        insect("flip", InsectType::Ant, BonusAction::Flip),
        insect("re", InsectType::Ant, BonusAction::Reroll),
    ];
    room.deal(
        vec![bird("T", 2, InsectType::Ant, ["6", "5-6", "4-6"])],
        filler_birds("F", 3),
        filler_insects(3),
        vec![hand],
    );
    room.set_dice(Box::new(ScriptedDice::faces([2, 4])));

    assert_code(&send(&mut room, "p1", "applyBonus", json!({"cardId": "inc"})), "E_NO_PENDING_PHOTO");
    assert_ok(&send(&mut room, "p1", "startPhotoRoll", json!({"targetId": "T"})));

    let out = send(&mut room, "p1", "applyBonus", json!({"cardId": "inc"}));
    assert_ok(&out);
    assert_eq!(out.result["newValue"], 3);
    assert_eq!(broadcast(&out, "diceUpdated")["newValue"], 3);

    let out = send(&mut room, "p1", "applyBonus", json!({"cardId": "flip"}));
    assert_eq!(out.result["newValue"], 4);

    let out = send(&mut room, "p1", "applyBonus", json!({"cardId": "re"}));
    assert_eq!(out.result["newValue"], 4);
    assert_eq!(room.snapshot()["pendingAction"]["rolledValue"], 4);

    assert_code(&send(&mut room, "p1", "applyBonus", json!({"cardId": "inc"})), "E_CARD_NOT_IN_HAND");
    assert_eq!(room.deck_counts().3, 3);
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn single_player_photo_capture_with_forced_five() {
    let mut room = started(&["p1"]);
    room.deal(
        vec![bird("T", 2, InsectType::Ant, ["4-6", "4-6", "4-6"]), bird("A", 1, InsectType::Fly, ["1", "1", "1"])],
        filler_birds("F", 2),
        filler_insects(3),
        vec![vec![]],
    );
    room.set_dice(Box::new(ScriptedDice::faces([5])));

    let out = send(&mut room, "p1", "startPhotoRoll", json!({"targetId": "T"}));
    assert_ok(&out);
    assert_eq!(out.result["rolledValue"], 5);
    assert_eq!(broadcast(&out, "diceRolled")["diceValue"], 5);

    let out = send(&mut room, "p1", "resolvePhoto", json!({}));
    assert_ok(&out);
    assert_eq!(out.result["outcome"], "captured");

    let p1 = player(&room, "p1");
    assert_eq!(p1.score, 2);
    assert_eq!(p1.hand.birds[0].id, "T");
    // Slot refilled in place from the deck head.
    assert_eq!(room.visible()[0].id, "F0");
    assert_eq!(room.deck_counts().0, 1);
    assert_eq!(room.status(), RoomStatus::Playing);
    assert_eq!(room.snapshot()["pendingAction"], Value::Null);
}

#[test]
fn failed_photo_discards_and_compensates() {
    let mut room = started(&["p1", "p2"]);
    room.deal(
        vec![bird("T", 2, InsectType::Ant, ["6", "6", "6"])],
        filler_birds("F", 2),
        filler_insects(3),
        vec![vec![], vec![]],
    );
    room.set_dice(Box::new(ScriptedDice::faces([1])));

    assert_ok(&send(&mut room, "p1", "startPhotoRoll", json!({"targetId": "T"})));
    let out = send(&mut room, "p1", "resolvePhoto", json!({}));
    assert_ok(&out);
    assert_eq!(out.result["outcome"], "missed");
    assert_eq!(player(&room, "p1").score, 0);
    assert_eq!(player(&room, "p1").hand.insects.len(), 1);
    assert_eq!(room.deck_counts().1, 1);
    assert_eq!(room.current_player().unwrap().id, "p2");
}

#[test]
fn sneak_failure_discards_refills_compensates_and_passes_turn() {
    let mut room = started(&["p1", "p2"]);
    room.deal(
        vec![bird("T", 2, InsectType::Ant, ["6", "5-6", "4-6"]), bird("U", 1, InsectType::Ant, ["1", "1", "1"])],
        filler_birds("F", 2),
        filler_insects(3),
        vec![vec![], vec![]],
    );
    room.set_dice(Box::new(ScriptedDice::new([5])));

    let out = send(&mut room, "p1", "sneak", json!({"targetId": "T", "useCard": false}));
    assert_ok(&out);
    assert_eq!(out.result["outcome"], "scared");
    assert_eq!(out.result["newProgress"], 0);
    assert_eq!(broadcast(&out, "diceRolled")["diceValue"], "bird");

    assert_eq!(room.visible()[0].id, "F0");
    let (bird_deck, bird_discard, insect_deck, _) = room.deck_counts();
    assert_eq!((bird_deck, bird_discard, insect_deck), (1, 1, 2));
    assert_eq!(player(&room, "p1").hand.insects.len(), 1);
    assert_eq!(room.current_player().unwrap().id, "p2");

    let state = broadcast(&out, "gameStateUpdate");
    assert_eq!(state["currentTargetId"], Value::Null);
    assert_eq!(state["currentProgress"], 0);
    assert_eq!(state["currentPlayerId"], "p2");
}

#[test]
fn attract_with_two_matching_cards_captures() {
    let mut room = started(&["p1", "p2"]);
    let hand = vec![
        insect("f1", InsectType::Fly, BonusAction::Flip),
        insect("a1", InsectType::Ant, BonusAction::Flip),
        insect("f2", InsectType::Fly, BonusAction::Increase),
    ];
    room.deal(
        vec![bird("T", 3, InsectType::Fly, ["6", "6", "6"])],
        filler_birds("F", 2),
        filler_insects(3),
        vec![hand, vec![]],
    );

    assert_code(
        &send(&mut room, "p1", "attract", json!({"targetId": "T", "cardIds": ["f1", "a1"]})),
        "E_WRONG_TYPE",
    );
    assert_code(&send(&mut room, "p1", "attract", json!({"targetId": "T", "cardIds": ["f1"]})), "E_CARD_COUNT");
    assert_code(
        &send(&mut room, "p1", "attract", json!({"targetId": "T", "cardIds": ["f1", "f1"]})),
        "E_DUPLICATE_CARD",
    );

    let out = send(&mut room, "p1", "attract", json!({"targetId": "T", "cardIds": ["f1", "f2"]}));
    assert_ok(&out);

    let p1 = player(&room, "p1");
    assert_eq!(p1.score, 3);
    assert_eq!(p1.hand.birds[0].id, "T");
    assert_eq!(p1.hand.insects.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["a1"]);
    assert_eq!(room.deck_counts().3, 2);
    assert_eq!(room.current_player().unwrap().id, "p2");
}

#[test]
fn attract_is_rejected_while_photo_pending() {
    let mut room = started(&["p1"]);
    let hand = vec![insect("f1", InsectType::Fly, BonusAction::Flip), insect("f2", InsectType::Fly, BonusAction::Flip)];
    room.deal(vec![bird("T", 3, InsectType::Fly, ["6", "6", "6"])], filler_birds("F", 2), filler_insects(3), vec![hand]);
    room.set_dice(Box::new(ScriptedDice::faces([2])));

    assert_ok(&send(&mut room, "p1", "startPhotoRoll", json!({"targetId": "T"})));
    assert_code(
        &send(&mut room, "p1", "attract", json!({"targetId": "T", "cardIds": ["f1", "f2"]})),
        "E_PHOTO_PENDING",
    );
}

#[test]
fn capture_all_with_mixed_types_changes_nothing() {
    let mut room = started(&["p1"]);
    let hand = vec![
        insect("a1", InsectType::Ant, BonusAction::Flip),
        insect("a2", InsectType::Ant, BonusAction::Flip),
        insect("f1", InsectType::Fly, BonusAction::Flip),
    ];
    room.deal(
        vec![bird("T", 2, InsectType::Ant, ["4-6", "4-6", "4-6"]), bird("U", 1, InsectType::Ant, ["5", "5", "5"])],
        filler_birds("F", 3),
        filler_insects(3),
        vec![hand.clone()],
    );
    room.set_dice(Box::new(ScriptedDice::faces([5])));
    assert_ok(&send(&mut room, "p1", "startPhotoRoll", json!({"targetId": "T"})));

    let before = room.snapshot();
    let out = send(&mut room, "p1", "captureAll", json!({"cardIds": ["a1", "a2", "f1"]}));
    assert_code(&out, "E_MIXED_TYPES");
    assert_eq!(room.snapshot(), before);
    assert_eq!(player(&room, "p1").hand.insects, hand);
}

#[test]
fn capture_all_with_no_qualifying_target_changes_nothing() {
    let mut room = started(&["p1"]);
    let hand: Vec<InsectCard> = (1..=3)
        .map(|i| insect(&format!("a{i}"), InsectType::Ant, BonusAction::Flip))
        .collect();
    room.deal(vec![bird("T", 2, InsectType::Ant, ["6", "6", "6"])], filler_birds("F", 3), filler_insects(3), vec![hand]);
    room.set_dice(Box::new(ScriptedDice::faces([2])));
    assert_ok(&send(&mut room, "p1", "startPhotoRoll", json!({"targetId": "T"})));

    let before = room.snapshot();
    let out = send(&mut room, "p1", "captureAll", json!({"cardIds": ["a1", "a2", "a3"]}));
    assert_code(&out, "E_NOTHING_TO_CAPTURE");
    assert_eq!(room.snapshot(), before);
    assert_eq!(player(&room, "p1").hand.insects.len(), 3);
}

#[test]
fn capture_all_requires_pending_roll() {
    let mut room = started(&["p1"]);
    assert_code(&send(&mut room, "p1", "captureAll", json!({"cardIds": ["x", "y", "z"]})), "E_NO_PENDING_PHOTO");
}

#[test]
fn deck_exhaustion_finishes_with_set_bonus() {
    let mut room = started(&["p1"]);
    let hand: Vec<InsectCard> = (1..=3)
        .map(|i| insect(&format!("a{i}"), InsectType::Ant, BonusAction::Flip))
        .collect();
    room.deal(
        vec![
            bird("B1", 1, InsectType::Ant, ["4-6", "4-6", "4-6"]),
            bird("B2", 2, InsectType::Ant, ["5", "5", "5"]),
            bird("B3", 3, InsectType::Ant, ["1-5", "1-5", "1-5"]),
        ],
        Vec::new(),
        filler_insects(3),
        vec![hand],
    );
    room.set_dice(Box::new(ScriptedDice::faces([5])));

    assert_ok(&send(&mut room, "p1", "startPhotoRoll", json!({"targetId": "B1"})));
    let out = send(&mut room, "p1", "captureAll", json!({"cardIds": ["a1", "a2", "a3"]}));
    assert_ok(&out);
    assert_eq!(out.result["capturedCount"], 3);

    assert_eq!(room.status(), RoomStatus::Finished);
    assert!(room.visible().is_empty());
    let ended = broadcast(&out, "gameEnded");
    let line = &ended["finalScores"][0];
    assert_eq!(line["base"], 6);
    assert_eq!(line["sets"], 1);
    assert_eq!(line["bonus"], 2);
    assert_eq!(line["total"], 8);
    assert_eq!(ended["winners"], json!(["p1"]));
    assert_eq!(player(&room, "p1").score, 8);
    assert_eq!(events(&out).last(), Some(&"gameEnded"));

    assert_code(&send(&mut room, "p1", "pass", json!({})), "E_NOT_PLAYING");
}

#[test]
fn log_keeps_the_latest_entries() {
    let mut room = started(&["p1"]);
    for _ in 0..40 {
        let out = send(&mut room, "p1", "pass", json!({}));
        assert_ok(&out);
        assert!(events(&out).contains(&"logUpdate"));
    }
    let log = room.snapshot()["log"].as_array().unwrap().clone();
    assert_eq!(log.len(), LOG_CAPACITY);
    assert_eq!(log.last().unwrap(), "It is p1's turn");
}

// =============================================================================
// DISCONNECTS
// =============================================================================

#[test]
fn disconnect_while_waiting_releases_seat() {
    let mut room = seated(&["p1", "p2", "p3"]);
    let out = room.peer_closed("p2");

    let ids: Vec<_> = room.players().iter().map(|p| (p.id.as_str(), p.turn_order)).collect();
    assert_eq!(ids, vec![("p1", 0), ("p3", 1)]);
    assert_eq!(broadcast(&out, "playerListUpdate")["players"].as_array().unwrap().len(), 2);
}

#[test]
fn disconnect_while_playing_hands_seat_to_bot() {
    let mut room = started(&["p1", "p2"]);
    let score_before = player(&room, "p1").score;
    let out = room.peer_closed("p1");

    let p1 = player(&room, "p1");
    assert_eq!(p1.bot, Some(Difficulty::Medium));
    assert_eq!(p1.score, score_before);
    assert_eq!(p1.hand.insects.len(), 3);
    assert!(events(&out).contains(&"logUpdate"));
    assert!(room.bot_to_move());
}

#[test]
fn unknown_peer_close_is_a_no_op() {
    let mut room = started(&["p1"]);
    let out = room.peer_closed("ghost");
    assert!(out.broadcasts.is_empty());
}

// =============================================================================
// BOTS
// =============================================================================

fn assert_partition(room: &Room, cards: &CardSet) {
    let (bird_deck, bird_discard, insect_deck, insect_discard) = room.deck_counts();
    let collected: usize = room.players().iter().map(|p| p.hand.birds.len()).sum();
    let held: usize = room.players().iter().map(|p| p.hand.insects.len()).sum();
    assert_eq!(bird_deck + room.visible().len() + bird_discard + collected, cards.birds.len());
    assert_eq!(insect_deck + held + insect_discard, cards.insects.len());
}

#[test]
fn bot_only_games_always_finish() {
    let cards = Arc::new(CardSet::builtin().unwrap());
    for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard, Difficulty::Legendary] {
        for seed in 0..5 {
            let mut room = Room::new(
                "BOTS01",
                HostConfig::default(),
                Arc::clone(&cards),
                Box::new(dice::RngDice::seeded(seed)),
            );
            for _ in 0..4 {
                assert_ok(&send(&mut room, "host", "addBot", json!({ "difficulty": difficulty })));
            }
            assert_ok(&send(&mut room, "host", "startGame", json!({})));

            let mut steps = 0;
            while room.bot_to_move() {
                let out = room.bot_step().expect("bot holds the turn");
                assert!(is_success(&out.result), "{difficulty:?}/{seed}: {}", out.result);
                assert_partition(&room, &cards);
                steps += 1;
                assert!(steps < 5_000, "{difficulty:?}/{seed}: bot game did not terminate");
            }
            assert_eq!(room.status(), RoomStatus::Finished, "{difficulty:?}/{seed}");
        }
    }
}

#[test]
fn bot_step_is_none_for_human_turn() {
    let mut room = started(&["p1"]);
    assert!(!room.bot_to_move());
    assert!(room.bot_step().is_none());
}

#[test]
fn bot_turn_ends_even_when_every_action_is_rejected() {
    let mut room = started(&["p1", "p2"]);
    room.deal(
        vec![bird("T", 2, InsectType::Ant, ["6", "6", "6"])],
        filler_birds("F", 3),
        filler_insects(3),
        vec![vec![], vec![]],
    );
    room.set_dice(Box::new(ScriptedDice::faces([6])));
    assert_ok(&send(&mut room, "p1", "startPhotoRoll", json!({"targetId": "T"})));

    // Pending target vanished from the row: resolving can never succeed.
    room.visible.clear();
    room.peer_closed("p1");

    let out = room.bot_step().unwrap();
    assert_eq!(out.result["code"], "E_TARGET_NOT_VISIBLE");
    assert!(events(&out).contains(&"gameStateUpdate"));
    assert_eq!(room.current_player().unwrap().id, "p2");
    assert!(!room.bot_to_move());
}
