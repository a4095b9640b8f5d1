//! workgraph - work-item storage with hierarchy, hybrid search and file sync
//!
//! Work items (initiative > epic > feature > story > task) live in one
//! SQLite database per namespace and are mirrored as one JSON file per item,
//! kept in step by a bidirectional sync engine.
//!
//! # Architecture
//!
//! - [`storage`] - SQLite record store: items, embeddings, keyword index, audit events
//! - [`hierarchy`] - Parent/child and dependency graphs with validation
//! - [`search`] - Keyword, semantic and hybrid search
//! - [`sync`] - File representation and the file/database sync engine
//! - [`namespace`] - Per-namespace workspaces under one storage root
//! - [`tools`] - The call surface (`manage_work_item`, `get_work_item`, ...)
//! - [`config`] - Engine configuration
//! - [`embeddings`] - Embedding providers (Ollama, HuggingFace, Model2Vec, hashing)
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod deadline;
pub mod embeddings;
pub mod error;
pub mod hierarchy;
pub mod logging;
pub mod model;
pub mod namespace;
pub mod retry;
pub mod search;
pub mod storage;
pub mod sync;
pub mod tools;
pub mod validate;

pub use error::{Error, Result};
pub use namespace::{NamespaceRouter, Workspace};
pub use tools::Tools;
