//! Document store client contract and implementations.
//!
//! The keyword facade never talks to a concrete store. It opens buckets
//! through a [`Connector`] and issues document operations on the returned
//! [`Bucket`] handles, so the same keywords run against the in-process
//! cluster, the filesystem cluster, or any other client that implements
//! these traits.

pub mod local;
pub mod memory;

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::Closeable;

/// Result code of a lookup that found the document.
pub const RC_SUCCESS: u32 = 0;

/// Result code of a lookup whose key does not exist.
pub const RC_KEY_NOT_FOUND: u32 = 13;

/// Errors raised by document store clients.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Authentication failed for bucket '{0}'")]
    Authentication(String),

    #[error("Address {host} not allowed with network mode '{mode}'")]
    AddressFamily { host: String, mode: NetworkMode },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Bucket '{0}' is closed")]
    Closed(String),

    #[error("Failed to read: {0}")]
    ReadError(String),

    #[error("Failed to write: {0}")]
    WriteError(String),

    #[error("Failed to parse document: {0}")]
    ParseError(String),
}

/// Address family used when connecting to a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// IPv4 only.
    #[default]
    Disabled,
    /// IPv4 and IPv6.
    Allow,
    /// IPv6 only.
    Only,
}

impl NetworkMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkMode::Disabled => "disabled",
            NetworkMode::Allow => "allow",
            NetworkMode::Only => "only",
        }
    }

    /// Whether a literal address is reachable under this mode.
    ///
    /// Host names are always allowed; name resolution picks the family.
    #[must_use]
    pub fn permits(self, host: &str) -> bool {
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        match (self, literal.parse::<IpAddr>()) {
            (NetworkMode::Disabled, Ok(IpAddr::V6(_))) | (NetworkMode::Only, Ok(IpAddr::V4(_))) => {
                false
            }
            _ => true,
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(NetworkMode::Disabled),
            "allow" => Ok(NetworkMode::Allow),
            "only" => Ok(NetworkMode::Only),
            other => Err(format!(
                "invalid network mode '{other}' (expected disabled, allow or only)"
            )),
        }
    }
}

/// Everything needed to open one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub password: Option<String>,
    pub network: NetworkMode,
}

impl ConnectionSpec {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, bucket: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            bucket: bucket.into(),
            password: None,
            network: NetworkMode::default(),
        }
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn network(mut self, network: NetworkMode) -> Self {
        self.network = network;
        self
    }

    /// Connection string in the form the cluster client expects.
    #[must_use]
    pub fn descriptor(&self) -> String {
        format!(
            "couchbase://{}:{}/{}?ipv6={}",
            self.host, self.port, self.bucket, self.network
        )
    }

    /// Reject literal addresses the network mode cannot reach.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AddressFamily` on a mismatch.
    pub fn check_address_family(&self) -> Result<(), StoreError> {
        if self.network.permits(&self.host) {
            Ok(())
        } else {
            Err(StoreError::AddressFamily {
                host: self.host.clone(),
                mode: self.network,
            })
        }
    }
}

/// Outcome of a document lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found { cas: u64, value: Value },
    Missing { rc: u32 },
}

impl Lookup {
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found { .. })
    }

    /// Raw result code: [`RC_SUCCESS`] when found.
    #[must_use]
    pub fn rc(&self) -> u32 {
        match self {
            Lookup::Found { .. } => RC_SUCCESS,
            Lookup::Missing { rc } => *rc,
        }
    }
}

/// Opens bucket connections on a cluster.
pub trait Connector: Send + Sync {
    /// Open a connection to the bucket described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the bucket is unknown, the password is
    /// rejected, or the host is unreachable under the requested network mode.
    fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn Bucket>, StoreError>;
}

/// An open connection to one bucket.
pub trait Bucket: Send {
    /// Name of the bucket this handle is connected to.
    fn name(&self) -> &str;

    /// Fetch a document.
    ///
    /// With `quiet` set, a missing key is reported as [`Lookup::Missing`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KeyNotFound` for a missing key when not quiet, or
    /// any backend error.
    fn get(&self, key: &str, quiet: bool) -> Result<Lookup, StoreError>;

    /// Remove a document.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KeyNotFound` for a missing key when not quiet, or
    /// any backend error.
    fn remove(&self, key: &str, quiet: bool) -> Result<(), StoreError>;

    /// Insert or replace a document unconditionally. Returns the new CAS.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the document cannot be written.
    fn upsert(&self, key: &str, value: &Value) -> Result<u64, StoreError>;

    /// Close the connection. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails to release the connection.
    fn close(&mut self) -> Result<(), StoreError>;
}

impl Closeable for Box<dyn Bucket> {
    type Error = StoreError;

    fn close(&mut self) -> Result<(), StoreError> {
        Bucket::close(self.as_mut())
    }
}
