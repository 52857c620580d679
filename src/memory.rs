//! In-process conversation store.
//!
//! Keeps records in a `Vec` behind an async lock. Used for local runs
//! (`kbchat serve --memory-history`) and tests; nothing is persisted and
//! records never expire.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{ConversationFilter, ConversationRecord};
use crate::traits::ConversationStore;

#[derive(Default)]
pub struct InMemoryConversationStore {
    records: RwLock<Vec<ConversationRecord>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn put(&self, record: &ConversationRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn scan(&self, filter: &ConversationFilter) -> Result<Vec<ConversationRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}
