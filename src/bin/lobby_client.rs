use futures::{SinkExt, StreamExt};
use parlor::identity::IdentityCache;
use parlor::lobby::{GameCode, Player, PlayerId};
use parlor::session::Route;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

// --- Re-definitions of DTOs ---
// The library's request types only derive Deserialize (they are inbound on
// the server). The client needs the outbound direction, so we mirror the
// wire shapes here.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerForm {
    id: Option<PlayerId>,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateGameRequest {
    name: String,
    max_players: u32,
    max_rounds: u32,
    is_private: bool,
    player: PlayerForm,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinGameRequest {
    player: PlayerForm,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameEnvelope {
    game: GameView,
    route: Route,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameView {
    id: GameCode,
    players: Vec<Player>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
enum ClientMessage {
    UpdatePlayer(Player),
}

async fn spawn_lobby_connection(
    code: GameCode,
    player: Player,
    label: String,
) -> tokio::task::JoinHandle<()> {
    let ws_base = "ws://127.0.0.1:3000/ws/game";

    tokio::spawn(async move {
        let url_str = format!("{}/{}", ws_base, code);
        let (ws_stream, _) = connect_async(url_str).await.expect("failed to connect");
        let (mut write, mut read) = ws_stream.split();

        println!("....[{label}] Connected!");

        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        println!("....[{label}] Toggling ready...");
        let mut ready = player;
        ready.is_ready = true;
        let msg = serde_json::to_string(&ClientMessage::UpdatePlayer(ready)).unwrap();
        write
            .send(Message::Text(msg.into()))
            .await
            .expect("failed to send ready toggle");

        while let Some(msg) = read.next().await {
            let msg = msg.expect("Error reading message");
            if msg.is_text() {
                println!("....[{label} RX] {}", msg.to_text().unwrap());
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Local identity, surviving reruns of this binary.
    let mut cache = IdentityCache::open()?;
    let host = match cache.player() {
        Some(saved) => {
            println!("Welcome back, {}!", saved.name);
            saved.clone()
        }
        None => {
            let fresh = Player::new("Host");
            cache.set_player(fresh.clone())?;
            fresh
        }
    };
    cache.ensure_persisted()?;

    let guest = Player::new("Guest");
    let client = reqwest::Client::new();
    let base_url = "http://127.0.0.1:3000";

    println!("--- 🎉 PARLOR LOBBY TEST CLIENT ---");
    println!("Host ID:  {}", host.id);
    println!("Guest ID: {}", guest.id);

    println!("\n[1] Creating Game...");
    let created = client
        .post(format!("{}/game", base_url))
        .json(&CreateGameRequest {
            name: "Trivia Night".to_string(),
            max_players: 2,
            max_rounds: 5,
            is_private: false,
            player: PlayerForm {
                id: Some(host.id),
                name: host.name.clone(),
            },
        })
        .send()
        .await?
        .json::<GameEnvelope>()
        .await?;

    let code = created.game.id;
    println!("Success! Room code: {} (route: {:?})", code, created.route);

    println!("\n[2] Guest Joining...");
    let joined = client
        .post(format!("{}/game/{}/join", base_url, code))
        .json(&JoinGameRequest {
            player: PlayerForm {
                id: Some(guest.id),
                name: guest.name.clone(),
            },
        })
        .send()
        .await?
        .json::<GameEnvelope>()
        .await?;
    println!("Success! Roster size: {}", joined.game.players.len());

    println!("\n[3] Connecting WebSockets...");
    let host_handle = spawn_lobby_connection(code, host, "Host".to_string()).await;
    let guest_handle = spawn_lobby_connection(code, guest, "Guest".to_string()).await;

    let _ = tokio::join!(host_handle, guest_handle);

    Ok(())
}
