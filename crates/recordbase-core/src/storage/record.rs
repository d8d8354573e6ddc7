//! Record documents and their version snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::{FormId, ResourceId};
use crate::error::Result;
use crate::security::Author;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique 16-byte id: timestamp followed by a process counter.
fn generate_id() -> [u8; 16] {
    let ts = Utc::now().timestamp_micros() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut id = [0u8; 16];
    id[0..8].copy_from_slice(&ts.to_be_bytes());
    id[8..16].copy_from_slice(&counter.to_be_bytes());
    id
}

/// A fresh hex-encoded internal id.
pub fn new_id() -> String {
    hex::encode(generate_id())
}

/// Frozen copy of a record's data taken just before a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub data: Map<String, Value>,
    /// Author of `data`, i.e. the editor preceding the mutation.
    pub created_by: Author,
    pub created_at: DateTime<Utc>,
}

/// One data instance of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    /// Human-facing identifier, unique within the resource.
    pub incremental_id: String,
    pub resource: ResourceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<FormId>,
    pub data: Map<String, Value>,
    #[serde(default)]
    pub archived: bool,
    /// Oldest first.
    #[serde(default)]
    pub versions: Vec<Version>,
    pub created_by: Author,
    pub created_at: DateTime<Utc>,
    pub modified_by: Author,
    pub modified_at: DateTime<Utc>,
}

impl Record {
    pub fn new(
        id: String,
        incremental_id: String,
        resource: ResourceId,
        form: Option<FormId>,
        data: Map<String, Value>,
        author: Author,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            incremental_id,
            resource,
            form,
            data,
            archived: false,
            versions: Vec::new(),
            created_by: author.clone(),
            created_at: now,
            modified_by: author,
            modified_at: now,
        }
    }

    /// Snapshot the current data into a version, then swap in `data`.
    ///
    /// `modified_at` always moves forward, keeping the chain strictly
    /// chronological even when the clock does not.
    pub fn apply_update(&mut self, data: Map<String, Value>, editor: Author, now: DateTime<Utc>) {
        let previous = std::mem::replace(&mut self.data, data);
        let previous_editor = std::mem::replace(&mut self.modified_by, editor);
        self.versions.push(Version {
            data: previous,
            created_by: previous_editor,
            created_at: self.modified_at,
        });
        let floor = self.modified_at + Duration::microseconds(1);
        self.modified_at = now.max(floor);
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
