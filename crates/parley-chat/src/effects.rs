//! Post-commit side effects.
//!
//! Write operations queue [`Effect`]s on the transaction outbox; the
//! [`EffectRunner`] only ever sees the effects of committed transactions.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use parley_db::Database;
use parley_gateway::Broker;
use parley_types::events::ChatEvent;

use crate::storage::ObjectStore;
use crate::upload::{UploadJob, UploadPipeline};

#[derive(Debug)]
pub enum Effect {
    /// Fan an event out to the room topic.
    Publish(ChatEvent),
    /// Push staged files to durable storage.
    Upload(UploadJob),
}

#[derive(Clone)]
pub struct EffectRunner {
    tracker: TaskTracker,
    broker: Broker,
    uploads: Arc<UploadPipeline>,
}

impl EffectRunner {
    pub fn new(db: Arc<Database>, broker: Broker, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            tracker: TaskTracker::new(),
            uploads: Arc::new(UploadPipeline::new(db, store, broker.clone())),
            broker,
        }
    }

    /// Run one transaction's effects on a background task, in queue order.
    /// Safe to call from a blocking thread.
    pub fn dispatch_on(&self, effects: Vec<Effect>, runtime: &Handle) {
        if effects.is_empty() {
            return;
        }

        let broker = self.broker.clone();
        let uploads = self.uploads.clone();
        let task = async move {
            for effect in effects {
                match effect {
                    Effect::Publish(event) => publish_event(&broker, &event).await,
                    Effect::Upload(job) => uploads.run(job).await,
                }
            }
        };
        self.tracker.spawn_on(task, runtime);
    }

    /// Wait for every dispatched effect to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

/// Publish to the event's room topic. Transport failures are logged and
/// dropped; the write they describe is already committed.
pub(crate) async fn publish_event(broker: &Broker, event: &ChatEvent) {
    let destination = event.destination();
    match broker.send_to_topic(&destination, event).await {
        Ok(()) => debug!(
            "Published {} for message {} to {}",
            event_kind(event),
            event.message_id(),
            destination
        ),
        Err(e) => error!(
            "Failed to publish {} for message {} in chat {}: {}",
            event_kind(event),
            event.message_id(),
            event.chat_id(),
            e
        ),
    }
}

fn event_kind(event: &ChatEvent) -> &'static str {
    match event {
        ChatEvent::Message(_) => "MESSAGE",
        ChatEvent::Attachment(_) => "ATTACHMENT",
        ChatEvent::Deleted(_) => "DELETED",
    }
}
