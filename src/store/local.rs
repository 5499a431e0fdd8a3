//! Local filesystem cluster.
//!
//! Each bucket is a directory under the cluster root. A bucket may carry a
//! `bucket.toml` with a `password`. Documents are stored one per file as a
//! JSON envelope holding the key, the CAS and the value. CAS tokens come from
//! a per-bucket counter in `.cas`, so a token is never handed out twice even
//! when a key is deleted and written again.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::store::{Bucket, ConnectionSpec, Connector, Lookup, RC_KEY_NOT_FOUND, StoreError};

const BUCKET_SETTINGS: &str = "bucket.toml";
const CAS_COUNTER: &str = ".cas";

/// Longest encoded key used verbatim as a file stem. Longer keys are stored
/// under a digest so the file name stays within filesystem limits.
const MAX_STEM_LEN: usize = 200;

#[derive(Debug, Default, Serialize, Deserialize)]
struct BucketSettings {
    password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    cas: u64,
    value: Value,
}

/// Cluster whose buckets are directories under a root path.
pub struct LocalCluster {
    root: PathBuf,
}

impl LocalCluster {
    /// Create a cluster rooted at the given path.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create a bucket directory, optionally protected by a password.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::WriteError` if the directory or settings file
    /// cannot be written.
    pub fn create_bucket(&self, name: &str, password: Option<&str>) -> Result<(), StoreError> {
        let dir = self.bucket_dir(name)?;
        fs::create_dir_all(&dir).map_err(|e| write_error(&dir, &e))?;

        if let Some(password) = password {
            let path = dir.join(BUCKET_SETTINGS);
            let settings = BucketSettings {
                password: Some(password.to_string()),
            };
            let contents =
                toml::to_string(&settings).map_err(|e| StoreError::WriteError(e.to_string()))?;
            fs::write(&path, contents).map_err(|e| write_error(&path, &e))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '%'))
            && name != "."
            && name != "..";
        if !valid {
            return Err(StoreError::BucketNotFound(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    fn read_settings(dir: &Path) -> Result<BucketSettings, StoreError> {
        let path = dir.join(BUCKET_SETTINGS);
        if !path.exists() {
            return Ok(BucketSettings::default());
        }

        let contents = fs::read_to_string(&path).map_err(|e| read_error(&path, &e))?;
        toml::from_str(&contents)
            .map_err(|e| StoreError::ParseError(format!("{}: {e}", path.display())))
    }
}

impl Connector for LocalCluster {
    fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn Bucket>, StoreError> {
        spec.check_address_family()?;

        let dir = self.bucket_dir(&spec.bucket)?;
        if !dir.is_dir() {
            return Err(StoreError::BucketNotFound(spec.bucket.clone()));
        }

        let settings = Self::read_settings(&dir)?;
        if let Some(expected) = &settings.password
            && spec.password.as_deref() != Some(expected.as_str())
        {
            return Err(StoreError::Authentication(spec.bucket.clone()));
        }

        Ok(Box::new(LocalBucket {
            name: spec.bucket.clone(),
            dir,
            closed: false,
        }))
    }
}

/// Connection to one directory-backed bucket.
pub struct LocalBucket {
    name: String,
    dir: PathBuf,
    closed: bool,
}

impl LocalBucket {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }

    fn read_envelope(&self, key: &str) -> Result<Option<Envelope>, StoreError> {
        let path = self.document_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).map_err(|e| read_error(&path, &e))?;
        let envelope: Envelope = serde_json::from_str(&contents)
            .map_err(|e| StoreError::ParseError(format!("{}: {e}", path.display())))?;

        // A digest-named file belongs to another key only on a hash collision.
        if envelope.key.as_deref().is_some_and(|stored| stored != key) {
            return Ok(None);
        }
        Ok(Some(envelope))
    }

    /// Bump the bucket's CAS counter and return the new value.
    fn next_cas(&self) -> Result<u64, StoreError> {
        let path = self.dir.join(CAS_COUNTER);
        let current = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| read_error(&path, &e))?;
            contents
                .trim()
                .parse::<u64>()
                .map_err(|e| StoreError::ParseError(format!("{}: {e}", path.display())))?
        } else {
            0
        };

        let next = current.checked_add(1).ok_or_else(|| {
            StoreError::WriteError(format!("{}: CAS counter exhausted", path.display()))
        })?;
        fs::write(&path, next.to_string()).map_err(|e| write_error(&path, &e))?;
        Ok(next)
    }
}

impl Bucket for LocalBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str, quiet: bool) -> Result<Lookup, StoreError> {
        self.ensure_open()?;
        match self.read_envelope(key)? {
            Some(envelope) => Ok(Lookup::Found {
                cas: envelope.cas,
                value: envelope.value,
            }),
            None if quiet => Ok(Lookup::Missing {
                rc: RC_KEY_NOT_FOUND,
            }),
            None => Err(StoreError::KeyNotFound(key.to_string())),
        }
    }

    fn remove(&self, key: &str, quiet: bool) -> Result<(), StoreError> {
        self.ensure_open()?;
        let path = self.document_path(key);
        if !path.exists() {
            if quiet {
                return Ok(());
            }
            return Err(StoreError::KeyNotFound(key.to_string()));
        }

        fs::remove_file(&path).map_err(|e| write_error(&path, &e))
    }

    fn upsert(&self, key: &str, value: &Value) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let envelope = Envelope {
            key: Some(key.to_string()),
            cas: self.next_cas()?,
            value: value.clone(),
        };

        let path = self.document_path(key);
        let contents = serde_json::to_string_pretty(&envelope)
            .map_err(|e| StoreError::WriteError(e.to_string()))?;
        fs::write(&path, contents).map_err(|e| write_error(&path, &e))?;
        Ok(envelope.cas)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.closed = true;
        Ok(())
    }
}

fn read_error(path: &Path, err: &std::io::Error) -> StoreError {
    StoreError::ReadError(format!("{}: {err}", path.display()))
}

fn write_error(path: &Path, err: &std::io::Error) -> StoreError {
    StoreError::WriteError(format!("{}: {err}", path.display()))
}

/// File stem for a document key.
///
/// Short keys are percent-encoded. Keys whose encoding would be too long
/// become `~` plus the hex SHA-256 of the key; `~` is always escaped by
/// [`encode_key`], so the two forms never collide.
fn file_stem(key: &str) -> String {
    let encoded = encode_key(key);
    if encoded.len() <= MAX_STEM_LEN {
        encoded
    } else {
        format!("~{}", hex::encode(Sha256::digest(key.as_bytes())))
    }
}

/// Turn a document key into a safe file stem.
///
/// ASCII letters, digits, `-`, `_` and `.` are kept; every other byte is
/// written as `%XX`. A leading `.` is escaped too so keys never map to
/// hidden files or `..`.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for (i, byte) in key.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_')
            || (byte == b'.' && i > 0);
        if keep {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn cluster_with_bucket(name: &str, password: Option<&str>) -> (TempDir, LocalCluster) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cluster = LocalCluster::new(temp_dir.path().to_path_buf());
        cluster
            .create_bucket(name, password)
            .expect("Failed to create bucket");
        (temp_dir, cluster)
    }

    #[test]
    fn encode_key_escapes_unsafe_bytes() {
        assert_eq!(encode_key("user_42"), "user_42");
        assert_eq!(encode_key("1C1#000"), "1C1%23000");
        assert_eq!(encode_key("a/b"), "a%2Fb");
        assert_eq!(encode_key(".hidden"), "%2Ehidden");
        assert_eq!(encode_key(".."), "%2E.");
    }

    #[test]
    fn missing_bucket_directory_is_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cluster = LocalCluster::new(temp_dir.path().to_path_buf());

        let result = cluster.open(&ConnectionSpec::new("localhost", 8091, "absent"));
        assert!(matches!(result, Err(StoreError::BucketNotFound(_))));
    }

    #[test]
    fn bucket_name_cannot_escape_root() {
        let (_temp_dir, cluster) = cluster_with_bucket("b", None);
        let result = cluster.open(&ConnectionSpec::new("localhost", 8091, "../b"));
        assert!(matches!(result, Err(StoreError::BucketNotFound(_))));
    }

    #[test]
    fn password_from_settings_is_enforced() {
        let (_temp_dir, cluster) = cluster_with_bucket("secure", Some("pa\"ss"));

        let wrong = cluster.open(&ConnectionSpec::new("localhost", 8091, "secure"));
        assert!(matches!(wrong, Err(StoreError::Authentication(_))));

        let right =
            cluster.open(&ConnectionSpec::new("localhost", 8091, "secure").password("pa\"ss"));
        assert!(right.is_ok());
    }

    #[test]
    fn documents_persist_across_connections() {
        let (_temp_dir, cluster) = cluster_with_bucket("b", None);
        let spec = ConnectionSpec::new("localhost", 8091, "b");

        let mut first = cluster.open(&spec).expect("open");
        first
            .upsert("1C1#000", &json!({"name": "alpha", "tags": [1, 2]}))
            .expect("upsert");
        first.close().expect("close");

        let second = cluster.open(&spec).expect("reopen");
        match second.get("1C1#000", false).expect("get") {
            Lookup::Found { value, .. } => {
                assert_eq!(value, json!({"name": "alpha", "tags": [1, 2]}));
            }
            Lookup::Missing { .. } => panic!("document should exist"),
        }
    }

    #[test]
    fn cas_increments_on_overwrite() {
        let (_temp_dir, cluster) = cluster_with_bucket("b", None);
        let bucket = cluster
            .open(&ConnectionSpec::new("localhost", 8091, "b"))
            .expect("open");

        let first = bucket.upsert("k", &json!(1)).expect("upsert");
        let second = bucket.upsert("k", &json!(2)).expect("upsert");
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn cas_is_not_reused_after_delete() {
        let (_temp_dir, cluster) = cluster_with_bucket("b", None);
        let bucket = cluster
            .open(&ConnectionSpec::new("localhost", 8091, "b"))
            .expect("open");

        let before = bucket.upsert("k", &json!(1)).expect("upsert");
        bucket.remove("k", false).expect("remove");
        let after = bucket.upsert("k", &json!(2)).expect("upsert");
        assert!(after > before);

        let other = bucket.upsert("other", &json!(3)).expect("upsert");
        assert!(other > after);
    }

    #[test]
    fn cas_counter_survives_reconnect() {
        let (_temp_dir, cluster) = cluster_with_bucket("b", None);
        let spec = ConnectionSpec::new("localhost", 8091, "b");

        let first = cluster
            .open(&spec)
            .expect("open")
            .upsert("k", &json!(1))
            .expect("upsert");
        let second = cluster
            .open(&spec)
            .expect("reopen")
            .upsert("k", &json!(1))
            .expect("upsert");
        assert_eq!(second, first + 1);
    }

    #[test]
    fn exhausted_cas_counter_is_a_write_error() {
        let (temp_dir, cluster) = cluster_with_bucket("b", None);
        fs::write(temp_dir.path().join("b/.cas"), u64::MAX.to_string()).expect("write");

        let bucket = cluster
            .open(&ConnectionSpec::new("localhost", 8091, "b"))
            .expect("open");
        assert!(matches!(
            bucket.upsert("k", &json!(1)),
            Err(StoreError::WriteError(_))
        ));
    }

    #[test]
    fn upsert_overwrites_corrupt_document() {
        let (temp_dir, cluster) = cluster_with_bucket("b", None);
        fs::write(temp_dir.path().join("b/broken.json"), "not json").expect("write");

        let bucket = cluster
            .open(&ConnectionSpec::new("localhost", 8091, "b"))
            .expect("open");
        bucket.upsert("broken", &json!({"ok": true})).expect("upsert");
        assert!(bucket.get("broken", false).expect("get").is_found());
    }

    #[test]
    fn long_keys_are_stored_under_a_digest() {
        let (temp_dir, cluster) = cluster_with_bucket("b", None);
        let bucket = cluster
            .open(&ConnectionSpec::new("localhost", 8091, "b"))
            .expect("open");

        let hashes = "#".repeat(250);
        let cyrillic = "ж".repeat(125);
        for key in [&hashes, &cyrillic] {
            assert_eq!(key.len(), 250);
            bucket.upsert(key, &json!({"len": 250})).expect("upsert");
            match bucket.get(key, false).expect("get") {
                Lookup::Found { value, .. } => assert_eq!(value, json!({"len": 250})),
                Lookup::Missing { .. } => panic!("document should exist"),
            }
            assert!(file_stem(key).starts_with('~'));
        }

        let names: Vec<String> = fs::read_dir(temp_dir.path().join("b"))
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|name| name.len() <= 255));

        bucket.remove(&hashes, false).expect("remove");
        assert!(!bucket.get(&hashes, true).expect("get").is_found());
        assert!(bucket.get(&cyrillic, true).expect("get").is_found());
    }

    #[test]
    fn digest_file_of_another_key_is_ignored() {
        let (temp_dir, cluster) = cluster_with_bucket("b", None);
        let key = "#".repeat(100);
        let path = temp_dir.path().join(format!("b/{}.json", file_stem(&key)));
        fs::write(&path, r#"{"key": "someone-else", "cas": 1, "value": 1}"#).expect("write");

        let bucket = cluster
            .open(&ConnectionSpec::new("localhost", 8091, "b"))
            .expect("open");
        assert!(!bucket.get(&key, true).expect("get").is_found());
    }

    #[test]
    fn quiet_remove_of_missing_key_succeeds() {
        let (_temp_dir, cluster) = cluster_with_bucket("b", None);
        let bucket = cluster
            .open(&ConnectionSpec::new("localhost", 8091, "b"))
            .expect("open");

        assert!(bucket.remove("missing", true).is_ok());
        assert!(matches!(
            bucket.remove("missing", false),
            Err(StoreError::KeyNotFound(_))
        ));

        bucket.upsert("k", &json!("v")).expect("upsert");
        bucket.remove("k", false).expect("remove");
        assert_eq!(
            bucket.get("k", true).expect("get"),
            Lookup::Missing {
                rc: RC_KEY_NOT_FOUND
            }
        );
    }

    #[test]
    fn corrupt_document_is_a_parse_error() {
        let (temp_dir, cluster) = cluster_with_bucket("b", None);
        fs::write(temp_dir.path().join("b/broken.json"), "not json").expect("write");

        let bucket = cluster
            .open(&ConnectionSpec::new("localhost", 8091, "b"))
            .expect("open");
        assert!(matches!(
            bucket.get("broken", true),
            Err(StoreError::ParseError(_))
        ));
    }
}
