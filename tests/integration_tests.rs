//! Integration tests for the keyword library.
//!
//! Every property is checked against both the in-memory cluster and the
//! directory-backed cluster, so the facade behaves the same whichever client
//! sits underneath.

use bucketlib::keywords::{BucketLibrary, KeywordError};
use bucketlib::store::local::LocalCluster;
use bucketlib::store::memory::MemoryCluster;
use bucketlib::store::{ConnectionSpec, RC_KEY_NOT_FOUND, RC_SUCCESS};
use serde_json::json;
use tempfile::TempDir;

/// A library over one backend, plus whatever keeps that backend alive.
struct TestBackend {
    _temp_dir: Option<TempDir>,
    library: BucketLibrary,
}

impl TestBackend {
    /// In-memory cluster with buckets `b1` and `b2`.
    fn memory() -> Self {
        let cluster = MemoryCluster::new()
            .with_bucket("b1", None)
            .with_bucket("b2", None);
        Self {
            _temp_dir: None,
            library: BucketLibrary::new(cluster),
        }
    }

    /// Directory-backed cluster with buckets `b1` and `b2`.
    fn local() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cluster = LocalCluster::new(temp_dir.path().to_path_buf());
        cluster.create_bucket("b1", None).expect("Failed to create b1");
        cluster.create_bucket("b2", None).expect("Failed to create b2");
        Self {
            _temp_dir: Some(temp_dir),
            library: BucketLibrary::new(cluster),
        }
    }

    fn all() -> Vec<(&'static str, Self)> {
        vec![("memory", Self::memory()), ("local", Self::local())]
    }
}

fn spec(bucket: &str) -> ConnectionSpec {
    ConnectionSpec::new("localhost", 8091, bucket)
}

// =============================================================================
// Registry behaviour through the facade
// =============================================================================

#[test]
fn indices_are_sequential_until_close_all() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;

        let indices: Vec<usize> = (0..4)
            .map(|_| library.connect_to_bucket(&spec("b1"), None).expect("connect"))
            .collect();
        assert_eq!(indices, vec![1, 2, 3, 4], "{name}");

        library.close_all_bucket_connections();
        assert_eq!(
            library.connect_to_bucket(&spec("b2"), None).ok(),
            Some(1),
            "{name}"
        );
    }
}

#[test]
fn switch_round_trips_between_two_connections() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;
        let a = library.connect_to_bucket(&spec("b1"), Some("a")).expect("connect");
        let b = library.connect_to_bucket(&spec("b2"), Some("b")).expect("connect");

        assert_eq!(library.switch_bucket_connection("a").ok(), Some(Some(b)), "{name}");
        assert_eq!(library.switch_bucket_connection("b").ok(), Some(Some(a)), "{name}");
        assert_eq!(
            library.switch_bucket_connection(&a.to_string()).ok(),
            Some(Some(b)),
            "{name}"
        );
    }
}

#[test]
fn switch_to_missing_connection_keeps_current() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;
        library.connect_to_bucket(&spec("b1"), Some("only")).expect("connect");
        library.upsert_document("k", &json!(1)).expect("upsert");

        let err = library.switch_bucket_connection("other").unwrap_err();
        assert!(err.is_not_found(), "{name}");
        assert_eq!(library.registry().current_index(), Some(1), "{name}");
        assert_eq!(
            library.bucket_contains_document_by_key("k").ok(),
            Some(true),
            "{name}"
        );
    }
}

#[test]
fn end_to_end_scenario() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;

        assert_eq!(library.connect_to_bucket(&spec("b1"), Some("b1")).ok(), Some(1));
        assert_eq!(library.connect_to_bucket(&spec("b2"), Some("b2")).ok(), Some(2));
        assert_eq!(library.switch_bucket_connection("b1").ok(), Some(Some(2)));

        library
            .upsert_document("k", &json!({"v": 1}))
            .expect("upsert");
        assert_eq!(
            library.get_document_value_by_key("k").ok(),
            Some(json!({"v": 1})),
            "{name}"
        );

        assert_eq!(library.switch_bucket_connection("b2").ok(), Some(Some(1)));
        assert_eq!(
            library.bucket_contains_document_by_key("k").ok(),
            Some(false),
            "{name}"
        );

        library.close_all_bucket_connections();
        assert_eq!(library.connect_to_bucket(&spec("b1"), None).ok(), Some(1), "{name}");
    }
}

// =============================================================================
// Document keywords
// =============================================================================

#[test]
fn keywords_fail_without_connection() {
    for (name, backend) in TestBackend::all() {
        let library = &backend.library;
        assert!(
            matches!(
                library.bucket_contains_document_by_key("k"),
                Err(KeywordError::NoActiveConnection)
            ),
            "{name}"
        );
        assert!(
            matches!(
                library.upsert_document("k", &json!(1)),
                Err(KeywordError::NoActiveConnection)
            ),
            "{name}"
        );
    }
}

#[test]
fn exists_follows_upsert_and_delete() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;
        library.connect_to_bucket(&spec("b1"), None).expect("connect");

        assert_eq!(library.bucket_contains_document_by_key("doc").ok(), Some(false));
        assert_eq!(library.view_document_by_key("doc").ok(), Some(RC_KEY_NOT_FOUND));

        library.upsert_document("doc", &json!("v")).expect("upsert");
        assert_eq!(library.bucket_contains_document_by_key("doc").ok(), Some(true));
        assert_eq!(library.view_document_by_key("doc").ok(), Some(RC_SUCCESS));

        library
            .certainly_delete_document_by_key("doc")
            .expect("delete");
        library
            .certainly_delete_document_by_key("doc")
            .expect("second delete");
        assert_eq!(
            library.bucket_contains_document_by_key("doc").ok(),
            Some(false),
            "{name}"
        );
    }
}

#[test]
fn value_round_trips() {
    let document = json!({
        "id": "1C1#000",
        "amount": 12.5,
        "active": true,
        "tags": ["a", "b"],
        "nested": {"empty": null, "list": [1, {"x": 2}]}
    });

    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;
        library.connect_to_bucket(&spec("b1"), None).expect("connect");

        library.upsert_document("1C1#000", &document).expect("upsert");
        assert_eq!(
            library.get_document_value_by_key("1C1#000").ok(),
            Some(document.clone()),
            "{name}"
        );
    }
}

#[test]
fn cas_changes_after_upsert_and_missing_key_is_not_found() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;
        library.connect_to_bucket(&spec("b1"), None).expect("connect");

        let err = library.get_document_cas_by_key("k").unwrap_err();
        assert!(matches!(err, KeywordError::KeyNotFound(_)), "{name}");

        library.upsert_document("k", &json!(1)).expect("upsert");
        let before = library.get_document_cas_by_key("k").expect("cas");
        library.upsert_document("k", &json!(1)).expect("upsert");
        let after = library.get_document_cas_by_key("k").expect("cas");
        assert_ne!(before, after, "{name}");
    }
}

#[test]
fn validation_is_false_for_missing_documents_and_bad_expressions() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;
        library.connect_to_bucket(&spec("b1"), None).expect("connect");

        for expr in [".a", "", "[", ":val(1)", "$..*"] {
            assert_eq!(
                library.validate_document_by_json("absent", expr).ok(),
                Some(false),
                "{name}: {expr}"
            );
        }

        library
            .upsert_document("order", &json!({"lines": [{"sku": "A1"}, {"sku": "B2"}]}))
            .expect("upsert");
        assert_eq!(
            library
                .validate_document_by_json("order", r#".lines .sku:val("B2")"#)
                .ok(),
            Some(true),
            "{name}"
        );
        assert_eq!(
            library
                .validate_document_by_json("order", ".lines > :nth-child(6)")
                .ok(),
            Some(false),
            "{name}"
        );
        assert_eq!(
            library.validate_document_by_json("order", ".lines[").ok(),
            Some(false),
            "{name}"
        );
    }
}

#[test]
fn validation_finds_nested_keys() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;
        library.connect_to_bucket(&spec("b1"), None).expect("connect");
        library
            .upsert_document("doc", &json!({"outer": {"somekey": "value"}}))
            .expect("upsert");

        for (expr, expected) in [
            (r#".somekey:val("value")"#, true),
            (r#".outer .somekey:val("value")"#, true),
            (r#".outer > .somekey"#, true),
            (r#":root > .somekey"#, false),
            (r#".somekey:val("other")"#, false),
        ] {
            assert_eq!(
                library.validate_document_by_json("doc", expr).ok(),
                Some(expected),
                "{name}: {expr}"
            );
        }
    }
}

#[test]
fn cas_is_fresh_after_delete_and_recreate() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;
        library.connect_to_bucket(&spec("b1"), None).expect("connect");

        library.upsert_document("k", &json!(1)).expect("upsert");
        let before = library.get_document_cas_by_key("k").expect("cas");
        library.certainly_delete_document_by_key("k").expect("delete");
        library.upsert_document("k", &json!(2)).expect("upsert");
        let after = library.get_document_cas_by_key("k").expect("cas");

        assert_ne!(before, after, "{name}");
    }
}

#[test]
fn longest_keys_round_trip() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;
        library.connect_to_bucket(&spec("b1"), None).expect("connect");

        let key = "#".repeat(250);
        library.upsert_document(&key, &json!({"v": 1})).expect("upsert");
        assert_eq!(
            library.get_document_value_by_key(&key).ok(),
            Some(json!({"v": 1})),
            "{name}"
        );
        assert_eq!(library.view_document_by_key(&key).ok(), Some(RC_SUCCESS), "{name}");
    }
}

#[test]
fn disconnect_clears_registry_and_is_idempotent() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;
        library.disconnect_from_bucket();

        library.connect_to_bucket(&spec("b1"), Some("one")).expect("connect");
        library.connect_to_bucket(&spec("b2"), Some("two")).expect("connect");
        library.disconnect_from_bucket();

        assert!(library.registry().is_empty(), "{name}");
        assert!(library.switch_bucket_connection("one").is_err(), "{name}");
        assert_eq!(library.connect_to_bucket(&spec("b1"), None).ok(), Some(1), "{name}");
    }
}

#[test]
fn connect_errors_carry_descriptor_and_cause() {
    for (name, mut backend) in TestBackend::all() {
        let library = &mut backend.library;

        let err = library
            .connect_to_bucket(&spec("nope"), Some("x"))
            .unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("couchbase://localhost:8091/nope"),
            "{name}: {message}"
        );
        assert!(message.contains("Bucket not found"), "{name}: {message}");
        assert!(std::error::Error::source(&err).is_some(), "{name}");
        assert!(library.registry().is_empty(), "{name}");
    }
}
