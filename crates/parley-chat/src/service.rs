use std::sync::Arc;

use rusqlite::Connection;
use tokio::runtime::Handle;
use tracing::error;

use parley_db::{Database, Outbox};
use parley_gateway::Broker;

use crate::effects::{Effect, EffectRunner};
use crate::error::ChatError;
use crate::staging::Stager;
use crate::storage::ObjectStore;

/// Entry point for every chat operation. Cheap to clone.
#[derive(Clone)]
pub struct ChatService {
    pub(crate) db: Arc<Database>,
    pub(crate) stager: Arc<Stager>,
    effects: EffectRunner,
}

impl ChatService {
    pub fn new(
        db: Arc<Database>,
        broker: Broker,
        store: Arc<dyn ObjectStore>,
        stager: Stager,
    ) -> Self {
        Self {
            effects: EffectRunner::new(db.clone(), broker, store),
            db,
            stager: Arc::new(stager),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Wait for queued publishes and in-flight uploads to finish.
    pub async fn drain(&self) {
        self.effects.drain().await;
    }

    /// Run `f` in a write transaction off the async runtime. The committed
    /// effects are handed to the runner on the blocking thread itself, so a
    /// caller that stops polling cannot strand a committed write.
    pub(crate) async fn write<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Connection, &mut Outbox<Effect>) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let runner = self.effects.clone();
        let runtime = Handle::current();
        run_blocking(move || {
            let (value, effects) = db.transaction(f)?;
            runner.dispatch_on(effects, &runtime);
            Ok(value)
        })
        .await
    }

    /// Run a read-only query off the async runtime.
    pub(crate) async fn read<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        run_blocking(move || f(&db)).await
    }
}

pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ChatError>
where
    F: FnOnce() -> Result<T, ChatError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ChatError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
    })?
}
