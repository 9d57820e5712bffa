//! Data access facade
//!
//! Per-collection read/write API used by callers. Reads are served from the
//! local store and never wait on the network; writes update the store and
//! queue the mutation in one step, then ask the sync manager to push.
//!
//! When the local store is unavailable the facade talks to the server
//! directly and network errors propagate to the caller.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Collection, MutationAction, NewMutation, Record};
use crate::remote::{with_timeout, RemoteError};
use crate::storage::StorageError;
use crate::sync::SyncManager;

/// Errors returned by [`Repository`] operations
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Record for '{collection}' has no usable 'id'")]
    MissingId { collection: Collection },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Which records a read returns
#[derive(Debug, Clone, PartialEq)]
pub enum ReadFilter {
    All,
    ById(String),
    /// Records whose indexed key equals the value
    ByIndex { index: String, value: Value },
}

impl ReadFilter {
    pub fn by_index(index: impl Into<String>, value: impl Into<Value>) -> Self {
        ReadFilter::ByIndex {
            index: index.into(),
            value: value.into(),
        }
    }
}

/// Read/write access to one collection
#[derive(Clone)]
pub struct Repository {
    collection: Collection,
    sync: SyncManager,
}

impl Repository {
    pub fn new(collection: Collection, sync: SyncManager) -> Self {
        Self { collection, sync }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    fn offline_capable(&self) -> bool {
        self.sync.store().is_available()
    }

    fn request_timeout(&self) -> Duration {
        self.sync.options().request_timeout
    }

    // ==================== Reads ====================

    /// Records matching `filter`
    ///
    /// Served from the local store; a background sync is requested so the
    /// cache converges without blocking the caller.
    pub async fn read(&self, filter: &ReadFilter) -> RepositoryResult<Vec<Record>> {
        if !self.offline_capable() {
            return self.read_remote(filter).await;
        }

        let store = self.sync.store();
        let records = match filter {
            ReadFilter::All => store.get_all(self.collection)?,
            ReadFilter::ById(id) => store
                .get_by_id(self.collection, id)?
                .into_iter()
                .collect(),
            ReadFilter::ByIndex { index, value } => {
                store.get_by_index(self.collection, index, value)?
            }
        };

        self.sync.request_sync();
        Ok(records)
    }

    /// Single record by id
    pub async fn get(&self, id: &str) -> RepositoryResult<Option<Record>> {
        Ok(self
            .read(&ReadFilter::ById(id.to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn read_remote(&self, filter: &ReadFilter) -> RepositoryResult<Vec<Record>> {
        // Validate before going to the network
        let index_key = match filter {
            ReadFilter::ByIndex { index, .. } => Some(
                self.collection
                    .index(index)
                    .ok_or_else(|| StorageError::UnknownIndex {
                        collection: self.collection,
                        index: index.clone(),
                    })?
                    .key,
            ),
            _ => None,
        };

        let remote = self.sync.remote();
        let records = with_timeout(self.request_timeout(), remote.fetch_all(self.collection)).await?;

        Ok(match filter {
            ReadFilter::All => records,
            ReadFilter::ById(id) => records
                .into_iter()
                .filter(|r| r.id().as_deref() == Some(id.as_str()))
                .collect(),
            ReadFilter::ByIndex { value, .. } => records
                .into_iter()
                .filter(|r| index_key.is_some_and(|key| r.matches(key, value)))
                .collect(),
        })
    }

    // ==================== Writes ====================

    /// Create a record, assigning a UUID when it has no id
    pub async fn create(&self, mut record: Record) -> RepositoryResult<Record> {
        if record.id().is_none() {
            record.set("id", Uuid::new_v4().to_string());
        }
        self.write(MutationAction::Create, record).await
    }

    /// Replace a record by id
    pub async fn update(&self, record: Record) -> RepositoryResult<Record> {
        self.write(MutationAction::Update, record).await
    }

    /// Delete a record by id; deleting an unknown id is not an error
    pub async fn delete(&self, id: &str) -> RepositoryResult<()> {
        self.write(MutationAction::Delete, Record::with_id(id))
            .await
            .map(|_| ())
    }

    async fn write(&self, action: MutationAction, record: Record) -> RepositoryResult<Record> {
        let mutation = NewMutation::new(action, self.collection, record).ok_or(
            RepositoryError::MissingId {
                collection: self.collection,
            },
        )?;

        if !self.offline_capable() {
            self.write_remote(&mutation).await?;
            return Ok(mutation.payload);
        }

        self.sync.queue().commit(&mutation)?;
        self.sync.request_sync();
        Ok(mutation.payload)
    }

    async fn write_remote(&self, mutation: &NewMutation) -> RepositoryResult<()> {
        debug!(
            action = %mutation.action,
            collection = %mutation.collection,
            record_id = %mutation.record_id,
            "Offline store unavailable, writing directly to the server"
        );
        let remote = self.sync.remote();
        let limit = self.request_timeout();
        let request = async {
            match mutation.action {
                MutationAction::Create => remote.create(mutation.collection, &mutation.payload).await,
                MutationAction::Update => {
                    remote
                        .update(mutation.collection, &mutation.record_id, &mutation.payload)
                        .await
                }
                MutationAction::Delete => {
                    remote.delete(mutation.collection, &mutation.record_id).await
                }
            }
        };
        with_timeout(limit, request).await?;
        Ok(())
    }

    /// Drop the cached copy of this collection
    ///
    /// Queued mutations are kept; they are still owed to the server.
    pub fn forget(&self) -> RepositoryResult<()> {
        self.sync.store().clear(self.collection)?;
        Ok(())
    }
}
