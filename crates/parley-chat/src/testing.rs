use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use parley_db::Database;
use parley_gateway::{Broker, Delivery, Dispatcher};
use parley_types::events::ChatEvent;
use parley_types::models::{RoomId, UserId};

use crate::error::UploadError;
use crate::service::ChatService;
use crate::staging::tests::temp_dir;
use crate::staging::{StagedFile, Stager};
use crate::storage::ObjectStore;

/// Object store kept in memory. Uploads of a file whose original name equals
/// `fail_on` are rejected.
#[derive(Default)]
pub(crate) struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_on: Option<String>,
}

impl MemoryStore {
    pub(crate) fn failing_on(name: &str) -> Self {
        Self {
            objects: Mutex::default(),
            fail_on: Some(name.to_string()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, file: &StagedFile) -> Result<String, UploadError> {
        if self.fail_on.as_deref() == Some(file.original_name()) {
            return Err(UploadError::Rejected {
                status: 503,
                key: key.to_string(),
            });
        }
        let bytes = tokio::fs::read(file.path()).await?;
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(format!("mem://{}", key))
    }

    async fn delete(&self, key: &str) -> Result<(), UploadError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

pub(crate) struct Harness {
    pub service: ChatService,
    pub store: Arc<MemoryStore>,
    pub stager_dir: std::path::PathBuf,
    deliveries: broadcast::Receiver<Delivery>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_store(MemoryStore::default())
    }

    pub(crate) fn with_store(store: MemoryStore) -> Self {
        let dispatcher = Dispatcher::new();
        let deliveries = dispatcher.subscribe();
        let store = Arc::new(store);
        let stager_dir = temp_dir("harness-stage");
        let service = ChatService::new(
            Arc::new(Database::open_in_memory().unwrap()),
            Broker::Local(dispatcher),
            store.clone(),
            Stager::new(stager_dir.clone()).unwrap(),
        );
        Self {
            service,
            store,
            stager_dir,
            deliveries,
        }
    }

    /// Room opened by `owner` with `members` joined, events so far discarded.
    pub(crate) async fn room(&mut self, owner: UserId, members: &[UserId]) -> RoomId {
        let room = self.service.open_room(owner, "test room".into()).await.unwrap();
        for &m in members {
            self.service.add_participant(room.chat_id, m).await.unwrap();
        }
        self.service.drain().await;
        self.events();
        room.chat_id
    }

    /// Every event published so far, in publish order.
    pub(crate) fn events(&mut self) -> Vec<ChatEvent> {
        let mut out = Vec::new();
        while let Ok(d) = self.deliveries.try_recv() {
            out.push(serde_json::from_str(&d.json).unwrap());
        }
        out
    }

    pub(crate) fn staged_count(&self) -> usize {
        std::fs::read_dir(&self.stager_dir).unwrap().count()
    }
}
