use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::{AnalysisModes, Finding, Resource};

mod store;

pub use store::{FindingStore, JsonFileStore, default_cache_dir};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource_digest: String,
    pub modes: String,
}

impl CacheKey {
    pub fn new(resource: &Resource, modes: &AnalysisModes) -> Self {
        Self {
            resource_digest: resource_digest(resource),
            modes: modes.digest(),
        }
    }

    pub fn file_stem(&self) -> String {
        format!("{}.{}", self.resource_digest, self.modes.replace('+', "-"))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_digest, self.modes)
    }
}

// the resource id is not part of the digest
pub fn resource_digest(resource: &Resource) -> String {
    let canonical = canonical_json(&resource.declaration());
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    pub findings: Vec<Finding>,
    pub hit: bool,
}

pub struct FindingCache {
    entries: Mutex<HashMap<CacheKey, Vec<Finding>>>,
    inflight: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
    store: Option<Box<dyn FindingStore>>,
}

impl FindingCache {
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    pub fn with_store(store: Box<dyn FindingStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::in_memory()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<Finding>> {
        if let Some(found) = self.entries.lock().get(key) {
            return Some(found.clone());
        }
        let store = self.store.as_ref()?;
        match store.load(key) {
            Ok(Some(found)) => {
                self.entries.lock().insert(key.clone(), found.clone());
                Some(found)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, error = %err, "finding store lookup failed");
                None
            }
        }
    }

    pub fn insert(&self, key: CacheKey, findings: Vec<Finding>) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save(&key, &findings) {
                warn!(key = %key, error = %err, "finding store write failed");
            }
        }
        self.entries.lock().insert(key, findings);
    }

    /// Concurrent callers with the same key wait for the first computation. Errors are
    /// returned to the caller and never cached.
    pub async fn get_or_try_compute<F, Fut, E>(
        &self,
        key: &CacheKey,
        compute: F,
    ) -> Result<CacheLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Finding>, E>>,
    {
        if let Some(findings) = self.get(key) {
            debug!(key = %key, "finding cache hit");
            return Ok(CacheLookup {
                findings,
                hit: true,
            });
        }

        let gate = self
            .inflight
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let result = {
            let _guard = gate.lock().await;
            match self.get(key) {
                Some(findings) => {
                    debug!(key = %key, "finding cache hit after wait");
                    Ok(CacheLookup {
                        findings,
                        hit: true,
                    })
                }
                None => compute().await.map(|findings| {
                    self.insert(key.clone(), findings.clone());
                    CacheLookup {
                        findings,
                        hit: false,
                    }
                }),
            }
        };
        self.release(key, &gate);
        result
    }

    // Drops the gate once no other caller holds or waits on it.
    fn release(&self, key: &CacheKey, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock();
        if Arc::strong_count(gate) == 2 {
            inflight.remove(key);
        }
    }
}

impl Default for FindingCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for FindingCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindingCache")
            .field("entries", &self.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}
