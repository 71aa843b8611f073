use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use super::{
    DocumentStore, DocumentStream, Document, SetMode, TransactionFn, apply_set, document_parent,
    validate_collection,
};
use crate::utils::error::StoreError;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Process-local store. Transactions hold the write lock for the whole
/// read-modify-write, so they are serialized against every other writer.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    documents: Arc<RwLock<BTreeMap<String, Value>>>,
    changes: broadcast::Sender<String>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            documents: Arc::new(RwLock::new(BTreeMap::new())),
            changes,
        }
    }

    fn notify(&self, path: &str) {
        // No receivers is fine.
        let _ = self.changes.send(path.to_string());
    }

    async fn snapshot(&self, path: &str) -> Option<Document> {
        let documents = self.documents.read().await;
        documents
            .get(path)
            .map(|data| Document::new(path, data.clone()))
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

struct WatchState {
    store: MemoryDocumentStore,
    path: String,
    receiver: broadcast::Receiver<String>,
    last: Option<Option<Value>>,
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        document_parent(path)?;
        Ok(self.snapshot(path).await)
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        validate_collection(collection)?;
        let documents = self.documents.read().await;
        Ok(documents
            .iter()
            .filter(|(path, _)| document_parent(path).ok() == Some(collection))
            .map(|(path, data)| Document::new(path.clone(), data.clone()))
            .collect())
    }

    async fn set(&self, path: &str, data: Value, mode: SetMode) -> Result<(), StoreError> {
        document_parent(path)?;
        {
            let mut documents = self.documents.write().await;
            let existing = documents.remove(path);
            documents.insert(path.to_string(), apply_set(existing, data, mode));
        }
        self.notify(path);
        Ok(())
    }

    async fn transaction(
        &self,
        path: &str,
        update: TransactionFn,
    ) -> Result<Option<Value>, StoreError> {
        document_parent(path)?;
        let written = {
            let mut documents = self.documents.write().await;
            let current = documents.get(path).cloned();
            match update(current)? {
                Some(body) => {
                    documents.insert(path.to_string(), body.clone());
                    Some(body)
                }
                None => None,
            }
        };
        if written.is_some() {
            self.notify(path);
        }
        Ok(written)
    }

    fn watch(&self, path: &str) -> DocumentStream {
        if let Err(e) = document_parent(path) {
            return futures::stream::once(async move { Err(e) }).boxed();
        }

        let state = WatchState {
            store: self.clone(),
            path: path.to_string(),
            receiver: self.changes.subscribe(),
            last: None,
        };

        futures::stream::unfold(state, |mut state| async move {
            loop {
                // First poll delivers the current state; later polls wait for
                // a change to this path.
                if state.last.is_some() {
                    match state.receiver.recv().await {
                        Ok(changed) if changed != state.path => continue,
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }

                let current = state.store.snapshot(&state.path).await;
                let body = current.as_ref().map(|document| document.data.clone());
                if state.last.as_ref() == Some(&body) {
                    continue;
                }
                state.last = Some(body);
                return Some((Ok(current), state));
            }
        })
        .boxed()
    }
}
