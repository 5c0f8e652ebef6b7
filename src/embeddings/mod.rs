//! The embeddings database: exchange chunks, vectors, and index metadata
//! (§4.5, §4.6.1), kept in a separate WAL-mode SQLite file from the main
//! store so rebuilding an embedding model never locks conversation ingest.

pub mod backend;
pub mod chunk;
pub mod indexer;
pub mod store;
pub mod vector;
