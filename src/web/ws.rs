use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::state::Event;

use super::server::AppState;

/// Messages the operator UI may send. Anything else is ignored with a
/// warning; the connection stays open.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    FftSubscribe { frequency: u64 },
    FftUnsubscribe,
}

pub async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = uuid::Uuid::new_v4().to_string();
    log::info!("ws client {} connected", conn_id);

    // The init snapshot goes out before the event loop starts, so a
    // client can never miss it.
    let init = json!({
        "type": "init",
        "state": state.bus.get_state(),
        "fft": {
            "running": state.fft.is_running(),
            "config": state.fft.get_config(),
            "error": state.fft.get_error(),
            "subscribers": state.fft.subscriber_count(),
        }
    });
    if sender.send(Message::Text(init.to_string().into())).await.is_err() {
        return;
    }

    let mut events = state.bus.subscribe();
    let stream_id = events.id;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                log::error!("event serialization failed: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // The bus evicted us as a slow consumer.
                    None => {
                        let bye = serde_json::to_string(&Event::Error {
                            message: "slow_consumer".to_string(),
                        })
                        .unwrap_or_default();
                        let _ = sender.send(Message::Text(bye.into())).await;
                        break;
                    }
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &conn_id, &state);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("ws read error from {}: {}", conn_id, e);
                        break;
                    }
                }
            }
        }
    }

    state.fft.unsubscribe(&conn_id);
    state.bus.unsubscribe(stream_id);
    log::info!("ws client {} disconnected", conn_id);
}

fn handle_client_message(text: &str, conn_id: &str, state: &AppState) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::FftSubscribe { frequency }) => {
            state.fft.subscribe(conn_id, frequency);
        }
        Ok(ClientMessage::FftUnsubscribe) => {
            state.fft.unsubscribe(conn_id);
        }
        Err(e) => {
            log::warn!("ignoring malformed ws message: {}", e);
        }
    }
}
