//! In-process cluster.
//!
//! Buckets live in memory for the lifetime of the [`MemoryCluster`] (and its
//! clones). Nothing is persisted. Used for tests and for scripts that only
//! need scratch buckets.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::store::{Bucket, ConnectionSpec, Connector, Lookup, RC_KEY_NOT_FOUND, StoreError};

struct StoredDocument {
    cas: u64,
    value: Value,
}

struct BucketData {
    password: Option<String>,
    documents: RwLock<BTreeMap<String, StoredDocument>>,
}

impl BucketData {
    fn new(password: Option<&str>) -> Self {
        Self {
            password: password.map(str::to_string),
            documents: RwLock::new(BTreeMap::new()),
        }
    }
}

/// A cluster of in-memory buckets.
///
/// Clones share the same buckets, so a test can keep one clone for
/// inspection while the facade owns another.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    buckets: Arc<RwLock<HashMap<String, Arc<BucketData>>>>,
    cas_counter: Arc<AtomicU64>,
    auto_create: bool,
}

impl MemoryCluster {
    /// Create a cluster with no buckets. Opening an unknown bucket fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cluster that creates unknown buckets on first open.
    #[must_use]
    pub fn auto_create() -> Self {
        Self {
            auto_create: true,
            ..Self::default()
        }
    }

    /// Add a bucket, optionally protected by a password.
    #[must_use]
    pub fn with_bucket(self, name: &str, password: Option<&str>) -> Self {
        self.create_bucket(name, password);
        self
    }

    /// Add a bucket if it does not exist yet.
    pub fn create_bucket(&self, name: &str, password: Option<&str>) {
        self.buckets
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BucketData::new(password)));
    }

    /// Number of documents stored in a bucket, if the bucket exists.
    #[must_use]
    pub fn document_count(&self, bucket: &str) -> Option<usize> {
        self.buckets
            .read()
            .get(bucket)
            .map(|data| data.documents.read().len())
    }
}

impl Connector for MemoryCluster {
    fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn Bucket>, StoreError> {
        spec.check_address_family()?;

        let data = {
            let mut buckets = self.buckets.write();
            match buckets.get(&spec.bucket) {
                Some(data) => Arc::clone(data),
                None if self.auto_create => {
                    debug!(bucket = %spec.bucket, "Creating in-memory bucket");
                    let data = Arc::new(BucketData::new(spec.password.as_deref()));
                    buckets.insert(spec.bucket.clone(), Arc::clone(&data));
                    data
                }
                None => return Err(StoreError::BucketNotFound(spec.bucket.clone())),
            }
        };

        if let Some(expected) = &data.password
            && spec.password.as_deref() != Some(expected.as_str())
        {
            return Err(StoreError::Authentication(spec.bucket.clone()));
        }

        Ok(Box::new(MemoryBucket {
            name: spec.bucket.clone(),
            data,
            cas_counter: Arc::clone(&self.cas_counter),
            closed: false,
        }))
    }
}

/// Connection to one in-memory bucket.
pub struct MemoryBucket {
    name: String,
    data: Arc<BucketData>,
    cas_counter: Arc<AtomicU64>,
    closed: bool,
}

impl MemoryBucket {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str, quiet: bool) -> Result<Lookup, StoreError> {
        self.ensure_open()?;
        match self.data.documents.read().get(key) {
            Some(doc) => Ok(Lookup::Found {
                cas: doc.cas,
                value: doc.value.clone(),
            }),
            None if quiet => Ok(Lookup::Missing {
                rc: RC_KEY_NOT_FOUND,
            }),
            None => Err(StoreError::KeyNotFound(key.to_string())),
        }
    }

    fn remove(&self, key: &str, quiet: bool) -> Result<(), StoreError> {
        self.ensure_open()?;
        let removed = self.data.documents.write().remove(key);
        if removed.is_none() && !quiet {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }

    fn upsert(&self, key: &str, value: &Value) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let cas = self.cas_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.data.documents.write().insert(
            key.to_string(),
            StoredDocument {
                cas,
                value: value.clone(),
            },
        );
        Ok(cas)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.closed = true;
        Ok(())
    }
}
