//! Document keywords.
//!
//! [`BucketLibrary`] is the surface a test host calls. It opens bucket
//! connections through an injected [`Connector`], keeps them in a
//! [`ConnectionRegistry`], and runs every document keyword against whichever
//! connection is current.

use serde_json::Value;
use tracing::debug;

use crate::registry::{ConnectionRegistry, RegistryError};
use crate::selector;
use crate::store::{Bucket, ConnectionSpec, Connector, Lookup, StoreError};

/// Errors surfaced by document keywords.
#[derive(Debug, thiserror::Error)]
pub enum KeywordError {
    #[error("Could not connect to bucket {descriptor}: {source}")]
    Connection {
        descriptor: String,
        #[source]
        source: StoreError,
    },

    #[error("No bucket connection is open")]
    NoActiveConnection,

    #[error("Document not found: {0}")]
    KeyNotFound(String),

    #[error("Non-existing index or alias '{0}'")]
    ConnectionNotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

impl KeywordError {
    /// True for both a missing document and a missing connection.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KeywordError::KeyNotFound(_) | KeywordError::ConnectionNotFound(_)
        )
    }
}

impl From<StoreError> for KeywordError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::KeyNotFound(key) => KeywordError::KeyNotFound(key),
            other => KeywordError::Store(other),
        }
    }
}

impl From<RegistryError> for KeywordError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(name) => KeywordError::ConnectionNotFound(name),
        }
    }
}

pub type Result<T> = std::result::Result<T, KeywordError>;

/// Keyword library working against one registry of bucket connections.
pub struct BucketLibrary {
    connector: Box<dyn Connector>,
    registry: ConnectionRegistry<Box<dyn Bucket>>,
}

impl BucketLibrary {
    #[must_use]
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::from_boxed(Box::new(connector))
    }

    #[must_use]
    pub fn from_boxed(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            registry: ConnectionRegistry::new(),
        }
    }

    /// The registry holding this library's connections.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry<Box<dyn Bucket>> {
        &self.registry
    }

    /// Connect to a bucket and make it the current connection.
    ///
    /// Returns the index of the new connection.
    ///
    /// # Errors
    ///
    /// Returns `KeywordError::Connection` with the client's error as source
    /// if the bucket cannot be opened.
    pub fn connect_to_bucket(
        &mut self,
        spec: &ConnectionSpec,
        alias: Option<&str>,
    ) -> Result<usize> {
        debug!(
            host = %spec.host,
            port = spec.port,
            bucket = %spec.bucket,
            password_set = spec.password.is_some(),
            network = %spec.network,
            "Connecting to bucket"
        );

        let bucket = self
            .connector
            .open(spec)
            .map_err(|source| KeywordError::Connection {
                descriptor: spec.descriptor(),
                source,
            })?;
        Ok(self.registry.register(bucket, alias))
    }

    /// Close the current connection and forget all others.
    ///
    /// Only the current connection is closed, but the whole registry is
    /// cleared. Use [`close_all_bucket_connections`](Self::close_all_bucket_connections)
    /// to close every connection. Never fails.
    pub fn disconnect_from_bucket(&mut self) {
        self.registry.close_current_and_clear();
    }

    /// Close every connection. The next connection gets index 1.
    pub fn close_all_bucket_connections(&mut self) {
        self.registry.close_all();
    }

    /// Switch the current connection by alias or index.
    ///
    /// Returns the index that was current before.
    ///
    /// # Errors
    ///
    /// Returns `KeywordError::ConnectionNotFound` if nothing matches.
    pub fn switch_bucket_connection(&mut self, index_or_alias: &str) -> Result<Option<usize>> {
        Ok(self.registry.switch(index_or_alias)?)
    }

    /// Result code of a quiet lookup: `0` when the document exists.
    ///
    /// # Errors
    ///
    /// Returns `KeywordError::NoActiveConnection` without a current
    /// connection, or a store error.
    pub fn view_document_by_key(&self, key: &str) -> Result<u32> {
        Ok(self.lookup(key, true)?.rc())
    }

    /// Whether the current bucket holds a document under `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeywordError::NoActiveConnection` without a current
    /// connection, or a store error.
    pub fn bucket_contains_document_by_key(&self, key: &str) -> Result<bool> {
        let lookup = self.lookup(key, true)?;
        debug!(
            key,
            success = lookup.is_found(),
            code = lookup.rc(),
            "Checked document presence"
        );
        Ok(lookup.is_found())
    }

    /// CAS of the document under `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeywordError::KeyNotFound` if the document does not exist.
    pub fn get_document_cas_by_key(&self, key: &str) -> Result<u64> {
        match self.lookup(key, false)? {
            Lookup::Found { cas, .. } => Ok(cas),
            Lookup::Missing { .. } => Err(KeywordError::KeyNotFound(key.to_string())),
        }
    }

    /// Value of the document under `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeywordError::KeyNotFound` if the document does not exist.
    pub fn get_document_value_by_key(&self, key: &str) -> Result<Value> {
        match self.lookup(key, false)? {
            Lookup::Found { value, .. } => Ok(value),
            Lookup::Missing { .. } => Err(KeywordError::KeyNotFound(key.to_string())),
        }
    }

    /// Whether the document under `key` exists and `expression` selects at
    /// least one element of it.
    ///
    /// A missing document or an invalid expression gives `false`.
    ///
    /// # Errors
    ///
    /// Returns `KeywordError::NoActiveConnection` without a current
    /// connection, or a store error.
    pub fn validate_document_by_json(&self, key: &str, expression: &str) -> Result<bool> {
        let Lookup::Found { value, .. } = self.lookup(key, true)? else {
            return Ok(false);
        };

        match selector::matches(&value, expression) {
            Ok(matched) => Ok(matched),
            Err(e) => {
                debug!(key, expression, error = %e, "Json validation failed");
                Ok(false)
            }
        }
    }

    /// Remove the document under `key`. A missing document is not an error.
    ///
    /// # Errors
    ///
    /// Returns `KeywordError::NoActiveConnection` without a current
    /// connection, or a store error.
    pub fn certainly_delete_document_by_key(&self, key: &str) -> Result<()> {
        Ok(self.bucket()?.remove(key, true)?)
    }

    /// Insert or replace the document under `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeywordError::NoActiveConnection` without a current
    /// connection, or a store error.
    pub fn upsert_document(&self, key: &str, value: &Value) -> Result<()> {
        self.bucket()?.upsert(key, value)?;
        Ok(())
    }

    fn bucket(&self) -> Result<&dyn Bucket> {
        self.registry
            .current()
            .map(|bucket| &**bucket)
            .ok_or(KeywordError::NoActiveConnection)
    }

    fn lookup(&self, key: &str, quiet: bool) -> Result<Lookup> {
        Ok(self.bucket()?.get(key, quiet)?)
    }
}
