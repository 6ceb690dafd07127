use axum::{
    extract::{
        ws::{Message as AxumWsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

mod protocol;
mod state;

use protocol::{Message, RoomInfo, RoomRequest, VideoState, PING, PONG};
use state::{RelayState, LOG_TAG};

const JOIN_HTML: &str = include_str!("../static/join.html");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syncroom_relay=debug,info".into()),
        )
        .init();

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(3005);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("{LOG_TAG} Listening on {}", addr);
    axum::serve(listener, app(RelayState::new())).await?;
    Ok(())
}

fn app(state: RelayState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/join/:room_id", get(serve_join))
        .route("/:room_id", get(ws_endpoint).post(room_info))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn serve_join(Path(_room_id): Path<String>) -> Html<&'static str> {
    Html(JOIN_HTML)
}

async fn room_info(
    Path(room_id): Path<String>,
    State(state): State<RelayState>,
    Json(request): Json<RoomRequest>,
) -> Result<Json<RoomInfo>, StatusCode> {
    match request {
        RoomRequest::GetRoomInfo => state
            .room_url(&room_id)
            .map(|url| Json(RoomInfo { url }))
            .ok_or(StatusCode::NOT_FOUND),
    }
}

async fn ws_endpoint(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, room_id, state))
}

async fn handle_connection(socket: WebSocket, room_id: String, state: RelayState) {
    let member_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.join(&room_id, member_id, tx.clone());

    // Spawn task to send frames to the member
    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = ws_sender.send(AxumWsMessage::Text(text)).await {
                tracing::debug!("{LOG_TAG} Failed to send frame: {}", e);
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(AxumWsMessage::Text(text)) => {
                handle_text(&text, &room_id, member_id, &tx, &state);
            }
            Ok(AxumWsMessage::Close(_)) => {
                tracing::debug!("{LOG_TAG} Member {} closing connection", member_id);
                break;
            }
            Err(e) => {
                tracing::warn!("{LOG_TAG} WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    state.leave(&room_id, member_id);
    send_task.abort();
}

fn handle_text(
    text: &str,
    room_id: &str,
    member_id: Uuid,
    tx: &mpsc::UnboundedSender<String>,
    state: &RelayState,
) {
    if text == PING {
        let _ = tx.send(PONG.to_string());
        return;
    }

    let msg: Message = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!("{LOG_TAG} Ignoring unreadable frame in room {}: {}", room_id, e);
            return;
        }
    };

    match msg {
        Message::Create {
            client_id,
            video_state,
            url,
        } => {
            log_state(room_id, "create", &client_id, &video_state);
            state.create(room_id, client_id, url, video_state);
        }
        Message::Fetch { client_id } => {
            let Some((origin, video_state)) = state.current_state(room_id) else {
                tracing::debug!("{LOG_TAG} {} fetched empty room {}", client_id, room_id);
                return;
            };
            let reply = Message::Sync {
                client_id: origin,
                video_state,
            };
            match serde_json::to_string(&reply) {
                Ok(json) => {
                    let _ = tx.send(json);
                }
                Err(e) => tracing::error!("{LOG_TAG} Failed to serialize message: {}", e),
            }
        }
        Message::Sync {
            client_id,
            video_state,
        } => {
            log_state(room_id, "sync", &client_id, &video_state);
            let delivered = state.sync(room_id, member_id, client_id, video_state, text);
            tracing::debug!("{LOG_TAG} Forwarded sync to {} members", delivered);
        }
        Message::Load { client_id, url } => {
            tracing::debug!(
                "{LOG_TAG} Ignoring load from {} in room {} ({} bytes)",
                client_id,
                room_id,
                url.len()
            );
        }
    }
}

fn log_state(room_id: &str, kind: &str, client_id: &str, video_state: &VideoState) {
    tracing::debug!(
        "{LOG_TAG} {} from {} in room {}: media {} at {:.3}s {} (ts {})",
        kind,
        client_id,
        room_id,
        video_state.id,
        video_state.current_time,
        if video_state.paused { "paused" } else { "playing" },
        video_state.timestamp
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
    use tower::ServiceExt;

    async fn spawn_relay(state: RelayState) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });
        addr
    }

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .expect("websocket error");
            if let WsMessage::Text(text) = frame {
                return text.as_str().to_string();
            }
        }
    }

    fn create_json() -> String {
        serde_json::json!({
            "type": "create",
            "clientId": "alice",
            "videoState": {
                "id": "7288324857687883",
                "timestamp": 1_000,
                "currentTime": 10.0,
                "paused": false
            },
            "url": "ciphertext"
        })
        .to_string()
    }

    #[tokio::test]
    async fn relays_room_traffic() {
        let state = RelayState::new();
        let addr = spawn_relay(state.clone()).await;

        let (mut alice, _) = connect_async(format!("ws://{addr}/room1")).await.unwrap();
        alice.send(WsMessage::Text(create_json().into())).await.unwrap();
        alice.send(WsMessage::Text("not json".into())).await.unwrap();
        // Frames are handled in order, so the pong means the create landed.
        alice.send(WsMessage::Text(PING.into())).await.unwrap();
        assert_eq!(next_text(&mut alice).await, PONG);

        let (mut bob, _) = connect_async(format!("ws://{addr}/room1")).await.unwrap();
        bob.send(WsMessage::Text(r#"{"type":"fetch","clientId":"bob"}"#.into()))
            .await
            .unwrap();
        let reply: Message = serde_json::from_str(&next_text(&mut bob).await).unwrap();
        let Message::Sync {
            client_id,
            video_state,
        } = reply
        else {
            panic!("expected sync, got {reply:?}");
        };
        assert_eq!(client_id, "alice");
        assert_eq!(video_state.current_time, 10.0);

        let update = Message::Sync {
            client_id: "bob".into(),
            video_state: VideoState {
                timestamp: 2_000,
                current_time: 42.0,
                paused: true,
                ..video_state
            },
        };
        let update_json = serde_json::to_string(&update).unwrap();
        bob.send(WsMessage::Text(update_json.clone().into()))
            .await
            .unwrap();
        assert_eq!(next_text(&mut alice).await, update_json);
        assert_eq!(state.current_state("room1").unwrap().1.current_time, 42.0);
        assert_eq!(state.member_count("room1"), 2);
    }

    #[tokio::test]
    async fn room_info_returns_announced_url() {
        let state = RelayState::new();
        state.create(
            "room1",
            "alice".into(),
            "ciphertext".into(),
            VideoState {
                id: "1".into(),
                timestamp: 0,
                current_time: 0.0,
                paused: true,
            },
        );

        let request = |room: &str| {
            Request::builder()
                .method("POST")
                .uri(format!("/{room}"))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"type":"getRoomInfo"}"#))
                .unwrap()
        };

        let response = app(state.clone()).oneshot(request("room1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let info: RoomInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.url, "ciphertext");

        let response = app(state).oneshot(request("missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serves_health_and_join_page() {
        let state = RelayState::new();
        let response = app(state.clone())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(state)
            .oneshot(Request::builder().uri("/join/room1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("syncroom join"));
    }
}
