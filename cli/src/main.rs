use std::sync::Arc;

use clap::{Parser, Subcommand};
use peerhost::bridge::{Bridge, BridgeError, CREATE_ROOM, DISCONNECTED, JOIN_ROOM, TRANSPORT_ERROR};
use peerhost::config::{ConfigError, HostConfig};
use peerhost::game::cards::{CardError, CardSet};
use peerhost::game::room_factory;
use peerhost::transport::ws::WsSignaling;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("card data error: {0}")]
    Cards(#[from] CardError),
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("usage: {0}")]
    Usage(String),
    #[error("{event} rejected: {message}")]
    Rejected { event: String, message: String },
}

#[derive(Parser, Debug)]
#[command(name = "peerhost", about = "Host or join a bird-photography room from the terminal")]
struct Cli {
    #[arg(long, env = "PEERHOST_RELAY_URL", default_value = "ws://127.0.0.1:3000")]
    relay: String,

    #[arg(long, env = "PEERHOST_NAME", default_value = "Player")]
    name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a room and play as its host.
    Host {
        /// Room code to request instead of a random one.
        #[arg(long)]
        code: Option<String>,

        /// Seat a bot before play starts (easy, medium, hard, legendary). Repeatable.
        #[arg(long = "bot", value_name = "DIFFICULTY")]
        bots: Vec<String>,
    },
    /// Join a room by code.
    Join { code: String },
}

const HELP: &str = "\
commands:
  start                      start the game (host)
  bot [difficulty]           add a bot while waiting
  select TARGET              lock a target bird
  sneak TARGET [CARD]        approach, optionally spending a card
  photo TARGET               roll for a photo
  bonus CARD                 apply a card to the pending roll
  resolve                    resolve the pending photo
  capture CARD CARD CARD     capture every bird the roll satisfies
  attract TARGET CARD CARD   lure the locked bird with two cards
  pass                       end your turn
  hand | state | help | quit";

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = HostConfig::from_env()?;
    let cards = Arc::new(CardSet::load(config.cards_path.as_deref())?);
    let bridge = Bridge::new(
        Arc::new(WsSignaling::new(cli.relay.clone())),
        room_factory(config.clone(), cards),
        config,
    );
    install_printers(&bridge);

    match &cli.command {
        Command::Host { code, bots } => {
            let payload = code.as_ref().map_or_else(|| json!({}), |c| json!({ "roomCode": c }));
            let created = bridge.emit(CREATE_ROOM, payload).await?;
            println!("hosting room {}", created["roomCode"].as_str().unwrap_or("?"));
            checked("join", bridge.emit("join", json!({ "name": cli.name })).await?)?;
            for difficulty in bots {
                checked("addBot", bridge.emit("addBot", json!({ "difficulty": difficulty })).await?)?;
            }
        }
        Command::Join { code } => {
            bridge.emit(JOIN_ROOM, json!({ "roomCode": code })).await?;
            let joined = checked("join", bridge.emit("join", json!({ "name": cli.name })).await?)?;
            println!("joined {code} as {}", joined["playerId"].as_str().unwrap_or("?"));
        }
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                println!("{HELP}");
                continue;
            }
            _ => {}
        }
        let (event, payload) = match parse_command(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        tracing::debug!(%event, "cli: emit");
        match bridge.emit(event, payload).await {
            Ok(result) => match checked(event, result) {
                Ok(result) => print_result(event, &result),
                Err(e) => eprintln!("{e}"),
            },
            Err(BridgeError::Timeout) => eprintln!("{event}: no reply from host"),
            Err(e) => return Err(e.into()),
        }
    }

    bridge.disconnect();
    Ok(())
}

/// Map one input line to an event and payload.
fn parse_command(line: &str) -> Result<(&'static str, Value), CliError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let usage = |text: &str| CliError::Usage(text.to_owned());
    let parsed = match words.as_slice() {
        ["start"] => ("startGame", json!({})),
        ["bot"] => ("addBot", json!({})),
        ["bot", difficulty] => ("addBot", json!({ "difficulty": difficulty })),
        ["select", target] => ("selectTarget", json!({ "targetId": target })),
        ["sneak", target] => ("sneak", json!({ "targetId": target, "useCard": false })),
        ["sneak", target, card] => ("sneak", json!({ "targetId": target, "useCard": true, "cardId": card })),
        ["photo", target] => ("startPhotoRoll", json!({ "targetId": target })),
        ["bonus", card] => ("applyBonus", json!({ "cardId": card })),
        ["resolve"] => ("resolvePhoto", json!({})),
        ["capture", cards @ ..] if cards.len() == 3 => ("captureAll", json!({ "cardIds": cards })),
        ["attract", target, a, b] => ("attract", json!({ "targetId": target, "cardIds": [a, b] })),
        ["pass"] => ("pass", json!({})),
        ["hand"] => ("getHand", json!({})),
        ["state"] => ("getState", json!({})),
        ["capture", ..] => return Err(usage("capture CARD CARD CARD")),
        ["attract", ..] => return Err(usage("attract TARGET CARD CARD")),
        [word, ..] => return Err(usage(&format!("unknown command `{word}`; try help"))),
        [] => return Err(usage("empty command")),
    };
    Ok(parsed)
}

fn checked(event: &str, result: Value) -> Result<Value, CliError> {
    if result.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(result);
    }
    Err(CliError::Rejected {
        event: event.to_owned(),
        message: result.get("error").and_then(Value::as_str).unwrap_or("unknown error").to_owned(),
    })
}

fn print_result(event: &str, result: &Value) {
    match event {
        "getHand" => {
            println!("cards:");
            for card in result["resourceCards"].as_array().into_iter().flatten() {
                println!("  {} {} ({}, {})", card["id"], card["name"], card["cardType"], card["bonusAction"]);
            }
            let captured: Vec<&str> =
                result["collectedItems"].as_array().into_iter().flatten().filter_map(|b| b["name"].as_str()).collect();
            println!("captured: {}", captured.join(", "));
        }
        "getState" => print_state(&result["fullState"]),
        "sneak" => println!("sneak: {} (progress {})", result["outcome"], result["newProgress"]),
        "startPhotoRoll" => println!("rolled {}", result["rolledValue"]),
        "applyBonus" => println!("roll is now {}", result["newValue"]),
        "resolvePhoto" => println!("photo {}", result["outcome"]),
        "captureAll" => println!("captured {} birds", result["capturedCount"]),
        _ => println!("ok"),
    }
}

fn print_state(state: &Value) {
    println!(
        "status {} | turn {} | target {} | progress {}",
        state["status"], state["currentPlayerId"], state["currentTargetId"], state["currentProgress"]
    );
    for bird in state["visibleTargets"].as_array().into_iter().flatten() {
        println!(
            "  {} {} [{}pt, {}] far {} mid {} near {}",
            bird["id"],
            bird["name"],
            bird["points"],
            bird["attractType"],
            bird["distanceFar"],
            bird["distanceMid"],
            bird["distanceNear"]
        );
    }
}

fn install_printers(bridge: &Bridge) {
    bridge.on("logUpdate", |p| println!("* {}", p["entry"].as_str().unwrap_or_default()));
    bridge.on("gameStarted", print_state);
    bridge.on("diceRolled", |p| println!("{} rolled {} ({})", p["playerId"], p["diceValue"], p["kind"]));
    bridge.on("diceUpdated", |p| println!("{} changed the roll to {}", p["playerId"], p["newValue"]));
    bridge.on("gameEnded", |p| {
        for score in p["finalScores"].as_array().into_iter().flatten() {
            println!("  {}: {} points ({} birds)", score["playerName"], score["total"], score["captured"]);
        }
        println!("winners: {}", p["winners"]);
    });
    bridge.on(TRANSPORT_ERROR, |p| eprintln!("transport error: {}", p["message"]));
    bridge.on(DISCONNECTED, |p| eprintln!("disconnected from {}", p["roomCode"]));
}
