//! In-memory document store.
//!
//! Backs unit and scenario tests; also usable as a dry-run store. Tracks
//! mutation counts so tests can assert on idempotence (no deletions, no
//! arrivals) rather than just on final state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::ports::{merge_fields, DocumentStore};

/// Counts of mutating operations since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub upserts: usize,
    pub deletes: usize,
    pub inserts: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    counts: Mutex<OpCounts>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a document directly, bypassing the operation counters. Intended
    /// for seeding test fixtures.
    pub fn seed(&self, collection: &str, key: &str, body: Value) {
        self.collections
            .lock()
            .expect("store mutex poisoned")
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), body);
    }

    pub fn get(&self, collection: &str, key: &str) -> Option<Value> {
        self.collections
            .lock()
            .expect("store mutex poisoned")
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .expect("store mutex poisoned")
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    pub fn op_counts(&self) -> OpCounts {
        *self.counts.lock().expect("store mutex poisoned")
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, collection: &str, key: &str, fields: Map<String, Value>) -> Result<()> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| anyhow!("store mutex poisoned"))?;
        let body = collections
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        merge_fields(body, fields);

        self.counts
            .lock()
            .map_err(|_| anyhow!("store mutex poisoned"))?
            .upserts += 1;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| anyhow!("store mutex poisoned"))?;
        if let Some(docs) = collections.get_mut(collection) {
            docs.remove(key);
        }

        self.counts
            .lock()
            .map_err(|_| anyhow!("store mutex poisoned"))?
            .deletes += 1;
        Ok(())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        let collections = self
            .collections
            .lock()
            .map_err(|_| anyhow!("store mutex poisoned"))?;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(key, body)| (key.clone(), body.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<String> {
        let key = Uuid::new_v4().to_string();
        {
            let mut collections = self
                .collections
                .lock()
                .map_err(|_| anyhow!("store mutex poisoned"))?;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(key.clone(), Value::Object(fields));
        }

        self.counts
            .lock()
            .map_err(|_| anyhow!("store mutex poisoned"))?
            .inserts += 1;
        Ok(key)
    }
}
