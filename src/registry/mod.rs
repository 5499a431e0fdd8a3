//! Indexed and aliased cache of open connections.
//!
//! Every registered connection gets a 1-based index. Indices grow with each
//! registration and are only handed out again after the whole registry has
//! been cleared. One entry at a time is "current"; document keywords always
//! act on it.
//!
//! Aliases are matched ignoring case and whitespace, so `Main Bucket` and
//! `mainbucket` name the same entry.

use std::collections::BTreeMap;
use std::fmt::Display;

use tracing::{info, warn};

/// Errors raised by registry lookups.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Non-existing index or alias '{0}'")]
    NotFound(String),
}

/// Something the registry can close during teardown.
pub trait Closeable {
    type Error: Display;

    /// Release the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns the implementation's error if the close fails. The registry
    /// logs the failure and moves on.
    fn close(&mut self) -> Result<(), Self::Error>;
}

struct Entry<H> {
    alias: Option<String>,
    /// `alias` in the form used for lookups.
    normalized: Option<String>,
    handle: H,
}

fn normalize_alias(alias: &str) -> String {
    alias
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Registry of open connections with a notion of the current one.
pub struct ConnectionRegistry<H> {
    entries: BTreeMap<usize, Entry<H>>,
    current: Option<usize>,
    last_index: usize,
}

impl<H> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> ConnectionRegistry<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            current: None,
            last_index: 0,
        }
    }

    /// Register a connection and make it current.
    ///
    /// Returns the index assigned to the connection. An alias already bound
    /// to another entry moves to the new one; the older entry stays reachable
    /// by index.
    pub fn register(&mut self, handle: H, alias: Option<&str>) -> usize {
        self.last_index += 1;
        let index = self.last_index;

        let normalized = alias.map(normalize_alias);
        if let Some(wanted) = &normalized {
            for entry in self.entries.values_mut() {
                if entry.normalized.as_ref() == Some(wanted) {
                    entry.alias = None;
                    entry.normalized = None;
                }
            }
        }

        self.entries.insert(
            index,
            Entry {
                alias: alias.map(str::to_string),
                normalized,
                handle,
            },
        );
        self.current = Some(index);
        info!(index, alias = alias.unwrap_or(""), "Registered connection");
        index
    }

    /// Make the entry matching `index_or_alias` current.
    ///
    /// Aliases are tried first, then the argument is parsed as an index, so an
    /// alias that looks like a number wins over the index with that number.
    /// Returns the index that was current before the switch.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if nothing matches. The current
    /// connection is left unchanged in that case.
    pub fn switch(&mut self, index_or_alias: &str) -> Result<Option<usize>, RegistryError> {
        let index = self.resolve(index_or_alias)?;
        let previous = self.current.replace(index);
        info!(from = ?previous, to = index, "Switched connection");
        Ok(previous)
    }

    /// Index of the current connection, if any.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Handle of the current connection, if any.
    #[must_use]
    pub fn current(&self) -> Option<&H> {
        self.current
            .and_then(|index| self.entries.get(&index))
            .map(|entry| &entry.handle)
    }

    /// Mutable handle of the current connection, if any.
    pub fn current_mut(&mut self) -> Option<&mut H> {
        let index = self.current?;
        self.entries.get_mut(&index).map(|entry| &mut entry.handle)
    }

    /// Look up a handle by index or alias without switching to it.
    #[must_use]
    pub fn get(&self, index_or_alias: &str) -> Option<&H> {
        let index = self.resolve(index_or_alias).ok()?;
        self.entries.get(&index).map(|entry| &entry.handle)
    }

    /// Remove one entry and hand its handle back without closing it.
    ///
    /// The index is not reused. If the entry was current, no connection is
    /// current afterwards.
    pub fn unregister(&mut self, index_or_alias: &str) -> Option<H> {
        let index = self.resolve(index_or_alias).ok()?;
        let entry = self.entries.remove(&index)?;
        if self.current == Some(index) {
            self.current = None;
        }
        info!(index, "Unregistered connection");
        Some(entry.handle)
    }

    /// Registered `(index, alias)` pairs in index order.
    #[must_use]
    pub fn entries(&self) -> Vec<(usize, Option<&str>)> {
        self.entries
            .iter()
            .map(|(index, entry)| (*index, entry.alias.as_deref()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn resolve(&self, index_or_alias: &str) -> Result<usize, RegistryError> {
        let wanted = normalize_alias(index_or_alias);
        let by_alias = self
            .entries
            .iter()
            .find(|(_, entry)| entry.normalized.as_deref() == Some(wanted.as_str()))
            .map(|(index, _)| *index);

        by_alias
            .or_else(|| {
                index_or_alias
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|index| self.entries.contains_key(index))
            })
            .ok_or_else(|| RegistryError::NotFound(index_or_alias.to_string()))
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.current = None;
        self.last_index = 0;
    }
}

impl<H: Closeable> ConnectionRegistry<H> {
    /// Close every registered connection, then clear the registry.
    ///
    /// Close failures are logged and do not stop the remaining closes. The
    /// next registration gets index 1.
    pub fn close_all(&mut self) {
        let mut failures = 0;
        for (index, entry) in &mut self.entries {
            if let Err(e) = entry.handle.close() {
                warn!(index, error = %e, "Failed to close connection");
                failures += 1;
            }
        }
        if failures > 0 {
            warn!(failures, "Some connections failed to close");
        }
        info!(closed = self.entries.len(), "Cleared connection registry");
        self.reset();
    }

    /// Close only the current connection, then clear the whole registry.
    ///
    /// Other registered connections are dropped from bookkeeping without
    /// being closed. Does nothing harmful on an empty registry.
    pub fn close_current_and_clear(&mut self) {
        if let Some(index) = self.current
            && let Some(handle) = self.current_mut()
            && let Err(e) = handle.close()
        {
            warn!(index, error = %e, "Failed to close connection");
        }
        self.reset();
    }
}
