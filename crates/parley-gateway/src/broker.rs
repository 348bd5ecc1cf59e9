use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use parley_types::models::UserId;

use crate::dispatcher::Dispatcher;
use crate::nats::NatsRelay;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport rejected publish to '{destination}': {reason}")]
    Transport { destination: String, reason: String },
}

/// Deployment-level choice of fan-out transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Local,
    Nats,
}

impl FromStr for BrokerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "simple" => Ok(Self::Local),
            "nats" => Ok(Self::Nats),
            other => anyhow::bail!("unknown broker '{}' (expected 'local' or 'nats')", other),
        }
    }
}

/// Transport-agnostic publisher for chat events.
///
/// Exactly one variant is built at startup. Every operation is
/// fire-and-forget: `Ok` means the transport accepted the payload, not that
/// any subscriber received it.
#[derive(Clone)]
pub enum Broker {
    /// Straight into this node's dispatcher.
    Local(Dispatcher),
    /// Through NATS; each node's bridge feeds its own dispatcher.
    Nats(NatsRelay),
}

impl Broker {
    pub fn kind(&self) -> BrokerKind {
        match self {
            Self::Local(_) => BrokerKind::Local,
            Self::Nats(_) => BrokerKind::Nats,
        }
    }

    /// Deliver to subscribers of `destination`.
    pub async fn send_to_topic<P: Serialize>(
        &self,
        destination: &str,
        payload: &P,
    ) -> Result<(), PublishError> {
        let json = encode(payload)?;
        match self {
            Self::Local(dispatcher) => {
                dispatcher.deliver_topic(destination, json);
                Ok(())
            }
            Self::Nats(relay) => relay.publish_topic(destination, json).await,
        }
    }

    /// Deliver to every live connection of one subscriber.
    pub async fn send_to_user<P: Serialize>(
        &self,
        user_id: UserId,
        destination: &str,
        payload: &P,
    ) -> Result<(), PublishError> {
        let json = encode(payload)?;
        match self {
            Self::Local(dispatcher) => {
                dispatcher.deliver_to_user(user_id, destination, json).await;
                Ok(())
            }
            Self::Nats(relay) => relay.publish_user(user_id, destination, json).await,
        }
    }

    /// Deliver to every live connection regardless of subscriptions.
    pub async fn broadcast<P: Serialize>(
        &self,
        destination: &str,
        payload: &P,
    ) -> Result<(), PublishError> {
        let json = encode(payload)?;
        match self {
            Self::Local(dispatcher) => {
                dispatcher.deliver_all(destination, json);
                Ok(())
            }
            Self::Nats(relay) => relay.publish_all(destination, json).await,
        }
    }
}

fn encode<P: Serialize>(payload: &P) -> Result<Arc<str>, PublishError> {
    Ok(Arc::from(serde_json::to_string(payload)?))
}
