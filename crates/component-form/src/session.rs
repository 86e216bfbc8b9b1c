use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Where the respondent's client session id lives between page loads.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn session_id(&self) -> Option<String>;

    async fn set_session_id(&self, id: String);

    async fn clear(&self);
}

/// Returns the stored session id, creating one on first use.
pub async fn ensure_session(store: &dyn SessionStore) -> String {
    if let Some(id) = store.session_id().await {
        return id;
    }
    let id = Uuid::new_v4().to_string();
    store.set_session_id(id.clone()).await;
    id
}

#[derive(Debug, Default)]
pub struct MemorySession {
    id: Mutex<Option<String>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySession {
    async fn session_id(&self) -> Option<String> {
        self.id.lock().await.clone()
    }

    async fn set_session_id(&self, id: String) {
        *self.id.lock().await = Some(id);
    }

    async fn clear(&self) {
        self.id.lock().await.take();
    }
}
