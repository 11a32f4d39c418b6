//! # Trove
//!
//! Local-first ingestion, classification and hybrid retrieval for
//! heterogeneous dataset trees (tables, documents, images, scientific
//! containers, free text).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Dataset tree│──▶│ Parse pool   │──▶│ Coordinator  │──▶│  SQLite  │
//! │ archives    │   │ hash+load+OCR│   │ embed+cascade│   │ records  │
//! └─────────────┘   └──────────────┘   └──────────────┘   └────┬─────┘
//!                                                              │
//!                                          ┌───────────────────┤
//!                                          ▼                   ▼
//!                                     ┌──────────┐       ┌──────────┐
//!                                     │   CLI    │       │   HTTP   │
//!                                     │ (trove)  │       │ /search  │
//!                                     └──────────┘       └──────────┘
//! ```
//!
//! The classification cascade, the retriever and the port traits live in
//! [`trove_core`]; this crate provides the adapters and the orchestration.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`embedding`] / [`ocr`] / [`arbitration`] | Model service adapters |
//! | [`loaders`] | Per-format document loaders |
//! | [`scan`] / [`vocabulary`] | Archives, signatures, hashes, labels |
//! | [`pool`] / [`monitor`] | Parse workers and resource telemetry |
//! | [`ingest`] | Ingestion orchestrator |
//! | [`search`] / [`server`] | CLI and HTTP retrieval |
//! | [`watch`] | Debounced re-ingestion |

pub mod arbitration;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod loaders;
pub mod logging;
pub mod migrate;
pub mod monitor;
pub mod ocr;
pub mod pool;
pub mod progress;
pub mod scan;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod vocabulary;
pub mod watch;

pub use error::SetupError;
