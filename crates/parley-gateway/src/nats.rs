//! NATS relay transport.
//!
//! Publishing nodes push serialized events onto NATS subjects; every node
//! runs [`run_bridge`] to pull them back off and hand them to its local
//! [`Dispatcher`], so a WebSocket client sees events regardless of which node
//! accepted the write.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use parley_types::models::UserId;

use crate::broker::PublishError;
use crate::dispatcher::Dispatcher;

const SUBJECT_ROOT: &str = "parley";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Topic,
    All,
    User(UserId),
}

#[derive(Clone)]
pub struct NatsRelay {
    client: async_nats::Client,
}

impl NatsRelay {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = async_nats::connect(url).await?;
        info!("Connected to NATS at {}", url);
        Ok(Self { client })
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub(crate) async fn publish_topic(&self, destination: &str, json: Arc<str>) -> Result<(), PublishError> {
        self.publish(Route::Topic, destination, json).await
    }

    pub(crate) async fn publish_all(&self, destination: &str, json: Arc<str>) -> Result<(), PublishError> {
        self.publish(Route::All, destination, json).await
    }

    pub(crate) async fn publish_user(
        &self,
        user_id: UserId,
        destination: &str,
        json: Arc<str>,
    ) -> Result<(), PublishError> {
        self.publish(Route::User(user_id), destination, json).await
    }

    async fn publish(&self, route: Route, destination: &str, json: Arc<str>) -> Result<(), PublishError> {
        let subject = subject_for(route, destination);
        let payload = Bytes::copy_from_slice(json.as_bytes());
        self.client
            .publish(subject, payload)
            .await
            .map_err(|e| PublishError::Transport {
                destination: destination.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Relay everything published under the subject root into `dispatcher`.
/// Returns when the subscription closes.
pub async fn run_bridge(client: async_nats::Client, dispatcher: Dispatcher) -> anyhow::Result<()> {
    let mut subscriber = client.subscribe(format!("{}.>", SUBJECT_ROOT)).await?;
    info!("NATS bridge subscribed to {}.>", SUBJECT_ROOT);

    while let Some(msg) = subscriber.next().await {
        let subject = msg.subject.to_string();
        let Some((route, destination)) = parse_subject(&subject) else {
            warn!("NATS bridge: ignoring unexpected subject {}", subject);
            continue;
        };
        let json: Arc<str> = match std::str::from_utf8(&msg.payload) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!("NATS bridge: non-UTF-8 payload on {}: {}", subject, e);
                continue;
            }
        };

        debug!("NATS bridge: relaying {} ({} bytes)", destination, json.len());
        match route {
            Route::Topic => dispatcher.deliver_topic(&destination, json),
            Route::All => dispatcher.deliver_all(&destination, json),
            Route::User(user_id) => dispatcher.deliver_to_user(user_id, &destination, json).await,
        }
    }

    warn!("NATS bridge subscription ended");
    Ok(())
}

/// `topic/chat/4` on the topic route becomes `parley.topic.topic.chat.4`.
fn subject_for(route: Route, destination: &str) -> String {
    let tail = destination.trim_matches('/').replace('/', ".");
    match route {
        Route::Topic => format!("{}.topic.{}", SUBJECT_ROOT, tail),
        Route::All => format!("{}.all.{}", SUBJECT_ROOT, tail),
        Route::User(user_id) => format!("{}.user.{}.{}", SUBJECT_ROOT, user_id, tail),
    }
}

fn parse_subject(subject: &str) -> Option<(Route, String)> {
    let rest = subject.strip_prefix(SUBJECT_ROOT)?.strip_prefix('.')?;
    let (kind, rest) = rest.split_once('.')?;
    let (route, tail) = match kind {
        "topic" => (Route::Topic, rest),
        "all" => (Route::All, rest),
        "user" => {
            let (id, tail) = rest.split_once('.')?;
            (Route::User(id.parse().ok()?), tail)
        }
        _ => return None,
    };
    if tail.is_empty() {
        return None;
    }
    Some((route, tail.replace('.', "/")))
}
