//! bucketlib - document bucket keywords for test automation.
//!
//! This library exposes document store operations (connect, get, upsert,
//! remove, existence checks, JSON validation) as keywords a test host can
//! call by name. Connections are kept in an indexed and aliased registry so a
//! test can hold several buckets open and switch between them.
//!
//! # Modules
//!
//! - [`keywords`] - The keyword facade and its error type
//! - [`registry`] - Indexed/aliased connection registry
//! - [`store`] - Document store client traits and backends (memory, local)
//! - [`selector`] - JSON selector expressions used for validation
//! - [`script`] - Keyword script parsing and execution
//! - [`commands`] - Operations behind the CLI
//! - [`config`] - Configuration loading
//! - [`cli`] - Command-line interface definitions
//!
//! ```
//! use bucketlib::keywords::BucketLibrary;
//! use bucketlib::store::ConnectionSpec;
//! use bucketlib::store::memory::MemoryCluster;
//! use serde_json::json;
//!
//! let cluster = MemoryCluster::new().with_bucket("orders", None);
//! let mut library = BucketLibrary::new(cluster);
//!
//! let index = library
//!     .connect_to_bucket(&ConnectionSpec::new("localhost", 8091, "orders"), Some("main"))
//!     .unwrap();
//! assert_eq!(index, 1);
//!
//! library.upsert_document("1C1#000", &json!({"state": "new"})).unwrap();
//! assert!(library.bucket_contains_document_by_key("1C1#000").unwrap());
//! assert!(library.validate_document_by_json("1C1#000", r#".state:val("new")"#).unwrap());
//!
//! library.close_all_bucket_connections();
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod keywords;
pub mod registry;
pub mod script;
pub mod selector;
pub mod store;
