//! Knowledge Hub - resumable agent sessions backed by a searchable memory
//!
//! This crate provides the core functionality for the `kh` CLI tool.
//!
//! # Architecture
//!
//! - [`session`] - Session lifecycle, summaries and resume bundles
//! - [`capture`] - Classification and durable recording of agent messages
//! - [`ingestion`] - Processing queue, pipeline and worker pool
//! - [`embeddings`] - Embedding providers (Ollama, HuggingFace) and chunking
//! - [`extraction`] - Entity and relationship extraction
//! - [`storage`] - Relational SQLite store (source of truth)
//! - [`vector`] / [`graph`] - Derived, rebuildable indexes
//! - [`coordinator`] - Rebuild, reindex, prune and retention across stores
//! - [`cli`] - Command-line interface using clap
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod capture;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod embeddings;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod ingestion;
pub mod model;
pub mod session;
pub mod storage;
pub mod stores;
pub mod vector;

pub use error::{Error, Result};
