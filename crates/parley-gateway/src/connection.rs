use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use parley_db::Database;
use parley_types::events::{GatewayCommand, GatewayFrame, room_of_topic};
use parley_types::models::{RoomId, UserId};

use crate::dispatcher::{Dispatcher, Scope};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type Subscriptions = Arc<std::sync::RwLock<HashSet<RoomId>>>;

/// Serve one pre-authenticated WebSocket subscriber until it disconnects.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: UserId,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("user {} connected to gateway", user_id);

    let ready = GatewayFrame::Ready { user_id };
    if send_frame(&mut sender, &ready).await.is_err() {
        return;
    }

    let (conn_id, mut user_rx) = dispatcher.register_connection(user_id).await;
    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection room subscriptions (shared between send and recv tasks).
    let subscribed: Subscriptions = Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscribed.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward deliveries -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let delivery = match result {
                        Ok(delivery) => delivery,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver for user {} lagged by {} deliveries", user_id, n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if delivery.scope == Scope::Topic {
                        let Some(room_id) = room_of_topic(&delivery.destination) else {
                            continue;
                        };
                        let subs = send_subscriptions
                            .read()
                            .unwrap_or_else(|e| e.into_inner());
                        if !subs.contains(&room_id) {
                            continue;
                        }
                    }

                    if sender.send(Message::Text(delivery.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(delivery) = result else { break };
                    if sender.send(Message::Text(delivery.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout for user {} (missed {} pongs), dropping connection", user_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_dispatcher, &db, user_id, cmd, &subscribed).await;
                    }
                    Err(e) => {
                        warn!(
                            "user {} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            preview(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_connection(user_id, conn_id).await;
    info!("user {} disconnected from gateway", user_id);
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: UserId,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
) {
    match cmd {
        GatewayCommand::Subscribe { chat_ids } => {
            let allowed = allowed_rooms(db, user_id, chat_ids).await;
            {
                let mut subs = subscriptions.write().unwrap_or_else(|e| e.into_inner());
                subs.extend(allowed.iter().copied());
            }
            info!("user {} subscribed to {} chats", user_id, allowed.len());
            ack_subscriptions(dispatcher, user_id, subscriptions).await;
        }

        GatewayCommand::Unsubscribe { chat_ids } => {
            {
                let mut subs = subscriptions.write().unwrap_or_else(|e| e.into_inner());
                for id in &chat_ids {
                    subs.remove(id);
                }
            }
            ack_subscriptions(dispatcher, user_id, subscriptions).await;
        }
    }
}

/// Keep only rooms the user actively participates in.
async fn allowed_rooms(db: &Arc<Database>, user_id: UserId, chat_ids: Vec<RoomId>) -> Vec<RoomId> {
    let db = db.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut allowed = Vec::with_capacity(chat_ids.len());
        for chat_id in chat_ids {
            if db.find_active_participant(chat_id, user_id)?.is_some() {
                allowed.push(chat_id);
            } else {
                warn!("user {} may not subscribe to chat {}", user_id, chat_id);
            }
        }
        Ok::<_, anyhow::Error>(allowed)
    })
    .await;

    match result {
        Ok(Ok(allowed)) => allowed,
        Ok(Err(e)) => {
            error!("Subscription check failed for user {}: {}", user_id, e);
            Vec::new()
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            Vec::new()
        }
    }
}

async fn ack_subscriptions(dispatcher: &Dispatcher, user_id: UserId, subscriptions: &Subscriptions) {
    let mut chat_ids: Vec<RoomId> = subscriptions
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .copied()
        .collect();
    chat_ids.sort_unstable();

    match serde_json::to_string(&GatewayFrame::Subscribed { chat_ids }) {
        Ok(json) => {
            dispatcher
                .deliver_to_user(user_id, "gateway", Arc::from(json))
                .await
        }
        Err(e) => error!("Failed to encode subscription ack: {}", e),
    }
}

async fn send_frame(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: &GatewayFrame,
) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|e| error!("Failed to encode frame: {}", e))?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|_| ())
}

/// At most `max` bytes of `text`, cut on a char boundary.
fn preview(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_never_splits_a_character() {
        let ascii = "a".repeat(300);
        assert_eq!(preview(&ascii, 200).len(), 200);

        let mut text = "a".repeat(199);
        text.push('é');
        text.push_str("tail");
        assert_eq!(preview(&text, 200), "a".repeat(199));

        let korean = "안녕하세요".repeat(50);
        let cut = preview(&korean, 200);
        assert!(cut.len() <= 200);
        assert!(korean.starts_with(cut));

        assert_eq!(preview("short", 200), "short");
    }
}
