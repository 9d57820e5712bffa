//! Scripted server used by engine tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::models::{Collection, Record};
use crate::remote::{RemoteApi, RemoteError, RemoteResult};

/// A request received by [`ScriptedRemote`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Fetch(Collection),
    Create(Collection, String),
    Update(Collection, String),
    Delete(Collection, String),
}

impl Call {
    pub fn is_write(&self) -> bool {
        !matches!(self, Call::Fetch(_))
    }
}

#[derive(Default)]
struct ServerState {
    collections: HashMap<Collection, Vec<Record>>,
    calls: Vec<Call>,
    failing_ids: HashSet<String>,
    failing_fetches: HashSet<Collection>,
}

/// In-process [`RemoteApi`] that keeps server state and records every call
#[derive(Default)]
pub(crate) struct ScriptedRemote {
    state: Mutex<ServerState>,
    gate: Mutex<Option<Arc<Notify>>>,
    latency: Mutex<Option<Duration>>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, collection: Collection, records: Vec<Record>) {
        self.state
            .lock()
            .unwrap()
            .collections
            .insert(collection, records);
    }

    pub fn records(&self, collection: Collection) -> Vec<Record> {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Writes touching `id` answer with HTTP 500
    pub fn fail_writes_for(&self, id: &str) {
        self.state.lock().unwrap().failing_ids.insert(id.to_string());
    }

    pub fn fail_fetch(&self, collection: Collection) {
        self.state
            .lock()
            .unwrap()
            .failing_fetches
            .insert(collection);
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_ids.clear();
        state.failing_fetches.clear();
    }

    /// Make the next write wait until the returned notify fires
    pub fn hold_next_write(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    /// Delay every request by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    async fn arrive(&self, call: Call) {
        let is_write = call.is_write();
        self.state.lock().unwrap().calls.push(call);

        let gate = if is_write {
            self.gate.lock().unwrap().take()
        } else {
            None
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn write_result(&self, collection: Collection, id: &str, method: &'static str) -> RemoteResult<()> {
        if self.state.lock().unwrap().failing_ids.contains(id) {
            return Err(RemoteError::Status {
                method,
                url: format!("/api/{}/{}", collection.endpoint(), id),
                status: 500,
            });
        }
        Ok(())
    }

    fn upsert(&self, collection: Collection, record: &Record) {
        let mut state = self.state.lock().unwrap();
        let records = state.collections.entry(collection).or_default();
        let id = record.id();
        match records.iter_mut().find(|r| r.id() == id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn fetch_all(&self, collection: Collection) -> RemoteResult<Vec<Record>> {
        self.arrive(Call::Fetch(collection)).await;
        if self.state.lock().unwrap().failing_fetches.contains(&collection) {
            return Err(RemoteError::Status {
                method: "GET",
                url: format!("/api/{}", collection.endpoint()),
                status: 503,
            });
        }
        Ok(self.records(collection))
    }

    async fn create(&self, collection: Collection, record: &Record) -> RemoteResult<()> {
        let id = record.id().unwrap_or_default();
        self.arrive(Call::Create(collection, id.clone())).await;
        self.write_result(collection, &id, "POST")?;
        self.upsert(collection, record);
        Ok(())
    }

    async fn update(&self, collection: Collection, id: &str, record: &Record) -> RemoteResult<()> {
        self.arrive(Call::Update(collection, id.to_string())).await;
        self.write_result(collection, id, "PUT")?;
        self.upsert(collection, record);
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()> {
        self.arrive(Call::Delete(collection, id.to_string())).await;
        self.write_result(collection, id, "DELETE")?;
        let mut state = self.state.lock().unwrap();
        if let Some(records) = state.collections.get_mut(&collection) {
            records.retain(|r| r.id().as_deref() != Some(id));
        }
        Ok(())
    }
}
