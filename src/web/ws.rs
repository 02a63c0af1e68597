//! WebSocket handler for real-time event streaming
//!
//! Endpoint `/api/ws`: clients subscribe to topics (`*`, `inject.*`,
//! `gadget.state_changed`) and receive matching [`SystemEvent`]s. The current
//! gadget state is sent right after the first subscription.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::SystemEvent;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Client-to-server message
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload")]
enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topics: Vec<String> },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topics: Vec<String> },

    #[serde(rename = "ping")]
    Ping,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.events.subscribe();
    let mut subscribed_topics: Vec<String> = vec![];
    let mut snapshot_sent = false;

    info!("WebSocket client connected");

    let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&text, &mut subscribed_topics) {
                            warn!("Failed to handle client message: {}", e);
                        }

                        if !snapshot_sent && !subscribed_topics.is_empty() {
                            let snapshot = SystemEvent::GadgetStateChanged {
                                state: state.gadget_state().as_str().to_string(),
                            };
                            if should_send_event(&snapshot, &subscribed_topics) {
                                if let Ok(json) = serde_json::to_string(&snapshot) {
                                    if sender.send(Message::Text(json)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            snapshot_sent = true;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if should_send_event(&event, &subscribed_topics) {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if sender.send(Message::Text(json)).await.is_err() {
                                    warn!("Failed to send event to client, disconnecting");
                                    break;
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {} events", n);
                        let error_event = SystemEvent::SystemError {
                            message: format!("Lagged by {} events", n),
                        };
                        if let Ok(json) = serde_json::to_string(&error_event) {
                            let _ = sender.send(Message::Text(json)).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Event bus closed");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }

            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    debug!("WebSocket handler exiting");
}

fn handle_client_message(text: &str, topics: &mut Vec<String>) -> serde_json::Result<()> {
    match serde_json::from_str::<ClientMessage>(text)? {
        ClientMessage::Subscribe { topics: new_topics } => {
            info!("Client subscribed to topics: {:?}", new_topics);
            *topics = new_topics;
        }
        ClientMessage::Unsubscribe {
            topics: remove_topics,
        } => {
            topics.retain(|t| !remove_topics.contains(t));
            info!("Client unsubscribed from topics: {:?}", remove_topics);
        }
        ClientMessage::Ping => debug!("Received ping from client"),
    }
    Ok(())
}

fn should_send_event(event: &SystemEvent, topics: &[String]) -> bool {
    topics.iter().any(|topic| event.matches_topic(topic))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_event() -> SystemEvent {
        SystemEvent::GadgetStateChanged {
            state: "active".to_string(),
        }
    }

    #[test]
    fn test_should_send_event() {
        let event = state_event();
        assert!(should_send_event(&event, &["*".to_string()]));
        assert!(should_send_event(&event, &["gadget.*".to_string()]));
        assert!(should_send_event(
            &event,
            &["gadget.state_changed".to_string()]
        ));
        assert!(!should_send_event(&event, &["inject.*".to_string()]));
        assert!(!should_send_event(&event, &[]));
    }

    #[test]
    fn test_client_messages() {
        let mut topics = Vec::new();
        handle_client_message(
            r#"{"type":"subscribe","payload":{"topics":["inject.*","payload.*"]}}"#,
            &mut topics,
        )
        .unwrap();
        assert_eq!(topics, vec!["inject.*", "payload.*"]);

        handle_client_message(
            r#"{"type":"unsubscribe","payload":{"topics":["payload.*"]}}"#,
            &mut topics,
        )
        .unwrap();
        assert_eq!(topics, vec!["inject.*"]);

        handle_client_message(r#"{"type":"ping"}"#, &mut topics).unwrap();
        assert!(handle_client_message("not json", &mut topics).is_err());
    }
}
