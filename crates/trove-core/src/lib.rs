//! # Trove Core
//!
//! Shared logic for Trove: data models, the ports the application plugs
//! model services into (embedding, OCR, arbitration, vector store), the
//! classification cascade, and the hybrid retrieval scorer.
//!
//! This crate performs no filesystem scanning, parsing, or database I/O.
//! Everything it needs from the outside world arrives through a trait:
//!
//! | Port | Trait |
//! |------|-------|
//! | Embeddings | [`embedding::EmbeddingPort`] |
//! | OCR | [`ocr::OcrPort`] |
//! | LLM arbitration | [`arbitration::ArbitrationPort`] |
//! | Vector storage | [`store::VectorStore`] |

pub mod arbitration;
pub mod cascade;
pub mod embedding;
pub mod models;
pub mod ocr;
pub mod reference;
pub mod retrieval;
pub mod retry;
pub mod store;
