//! RAG document backend: document ingestion, semantic search, and
//! retrieval-augmented chat over a local SQLite-backed vector index.

pub mod chat;
pub mod chunker;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod errors;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod state;
