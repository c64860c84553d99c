//! Task table access.
//!
//! The worker only needs three operations: take one pending row, patch a row
//! by id, and upsert a full row. [`RestTaskStore`] speaks PostgREST (the
//! Supabase REST API); [`MemoryTaskStore`] keeps rows in process.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::{
    config::StoreConfig,
    types::{POLL_COLUMNS, Task, TaskStatus, TaskUpdate},
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Store rejected the write: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// One row with `status = pending`, no ordering guarantee.
    async fn next_pending(&self) -> Result<Option<Task>, StoreError>;

    /// Patch the row with the given id. Patching a missing row is not an error.
    async fn update(&self, video_id: &str, update: &TaskUpdate) -> Result<(), StoreError>;

    async fn upsert(&self, task: &Task) -> Result<(), StoreError>;

    /// The raw row, every column included.
    async fn get(&self, video_id: &str) -> Result<Option<Value>, StoreError>;
}

pub struct RestTaskStore {
    http: reqwest::Client,
    config: StoreConfig,
}

impl RestTaskStore {
    pub fn new(http: reqwest::Client, config: StoreConfig) -> Self {
        Self { http, config }
    }

    pub fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.url.trim_end_matches('/'),
            self.config.table
        )
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.table_url())
            .header("apikey", &self.config.key)
            .bearer_auth(&self.config.key)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

pub fn eq_filter(value: &str) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl TaskStore for RestTaskStore {
    async fn next_pending(&self) -> Result<Option<Task>, StoreError> {
        let response = self
            .request(reqwest::Method::GET)
            .query(&[
                ("select", POLL_COLUMNS.join(",")),
                ("status", eq_filter(&TaskStatus::Pending.to_string())),
                ("video_id", "not.is.null".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let rows: Vec<Value> = Self::check(response).await?.json().await?;
        Ok(rows.iter().find_map(decode_pending))
    }

    async fn update(&self, video_id: &str, update: &TaskUpdate) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::PATCH)
            .query(&[("video_id", eq_filter(video_id))])
            .header("Prefer", "return=minimal")
            .json(update)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn upsert(&self, task: &Task) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::POST)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[task])
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn get(&self, video_id: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .request(reqwest::Method::GET)
            .query(&[
                ("select", "*".to_string()),
                ("video_id", eq_filter(video_id)),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let rows: Vec<Value> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().next())
    }
}

/// Rows held as JSON objects, keyed by video id.
///
/// Writes can be made to fail per column to reproduce a remote table that is
/// missing a column, or wholesale to reproduce an unreachable store.
#[derive(Default)]
pub struct MemoryTaskStore {
    rows: Mutex<BTreeMap<String, Value>>,
    rejected_columns: Mutex<HashSet<String>>,
    reject_all: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending<I, S>(video_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for video_id in video_ids {
            store.insert(&Task::pending(video_id));
        }
        store
    }

    pub fn insert(&self, task: &Task) {
        // Task always serializes to an object.
        let row = serde_json::to_value(task).unwrap_or(Value::Null);
        self.rows
            .lock()
            .expect("MemoryTaskStore poisoned")
            .insert(task.video_id.clone(), row);
    }

    pub fn insert_raw(&self, video_id: &str, row: Value) {
        self.rows
            .lock()
            .expect("MemoryTaskStore poisoned")
            .insert(video_id.to_string(), row);
    }

    pub fn row(&self, video_id: &str) -> Option<Value> {
        self.rows
            .lock()
            .expect("MemoryTaskStore poisoned")
            .get(video_id)
            .cloned()
    }

    pub fn status(&self, video_id: &str) -> Option<TaskStatus> {
        self.row(video_id)
            .and_then(|row| serde_json::from_value(row["status"].clone()).ok())
    }

    pub fn reject_column(&self, column: &str) {
        self.rejected_columns
            .lock()
            .expect("MemoryTaskStore poisoned")
            .insert(column.to_string());
    }

    pub fn reject_all_writes(&self) {
        self.reject_all.store(true, Ordering::SeqCst);
    }

    fn check_write(&self, fields: &serde_json::Map<String, Value>) -> Result<(), StoreError> {
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("store is read-only".into()));
        }

        let rejected = self
            .rejected_columns
            .lock()
            .expect("MemoryTaskStore poisoned");
        match fields.keys().find(|key| rejected.contains(*key)) {
            Some(column) => Err(StoreError::Rejected(format!("unknown column {column}"))),
            None => Ok(()),
        }
    }
}

/// Project a row onto [`POLL_COLUMNS`] and decode it. Rows that cannot
/// become a task (no usable `video_id`, say) are logged and skipped.
fn decode_pending(row: &Value) -> Option<Task> {
    let projected: serde_json::Map<String, Value> = POLL_COLUMNS
        .iter()
        .filter_map(|column| row.get(*column).map(|v| (column.to_string(), v.clone())))
        .collect();

    match serde_json::from_value(Value::Object(projected)) {
        Ok(task) => Some(task),
        Err(err) => {
            warn!(row = %row, error = %err, "skipping undecodable pending row");
            None
        }
    }
}

fn as_object(value: Value) -> Result<serde_json::Map<String, Value>, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Rejected(format!("expected a JSON object, got {other}"))),
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn next_pending(&self) -> Result<Option<Task>, StoreError> {
        let rows = self.rows.lock().expect("MemoryTaskStore poisoned");
        Ok(rows
            .values()
            .filter(|row| row["status"] == "pending")
            .find_map(decode_pending))
    }

    async fn update(&self, video_id: &str, update: &TaskUpdate) -> Result<(), StoreError> {
        let fields = as_object(serde_json::to_value(update)?)?;
        self.check_write(&fields)?;

        let mut rows = self.rows.lock().expect("MemoryTaskStore poisoned");
        if let Some(Value::Object(row)) = rows.get_mut(video_id) {
            row.extend(fields);
        }
        Ok(())
    }

    async fn upsert(&self, task: &Task) -> Result<(), StoreError> {
        let fields = as_object(serde_json::to_value(task)?)?;
        self.check_write(&fields)?;

        let mut rows = self.rows.lock().expect("MemoryTaskStore poisoned");
        match rows.get_mut(&task.video_id) {
            Some(Value::Object(row)) => row.extend(fields),
            _ => {
                rows.insert(task.video_id.clone(), Value::Object(fields));
            }
        }
        Ok(())
    }

    async fn get(&self, video_id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.row(video_id))
    }
}
