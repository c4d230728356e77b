//! `objnav-memory` – the agent's scratch memory.
//!
//! Provides the agent with a run-scoped, append-only log of short textual
//! facts derived from past observations and a lexical retriever over it.
//!
//! # Modules
//!
//! - [`store`] – [`MemoryStore`][store::MemoryStore]: append-only JSONL log of
//!   [`MemoryEntry`][store::MemoryEntry] records, persisted one line per write.
//! - [`retrieval`] – token-overlap cosine similarity, top-k retrieval with a
//!   type filter, memory-entry builders and prompt snippet formatting.

pub mod retrieval;
pub mod store;

pub use retrieval::{RetrievalHit, format_snippets, retrieve, similarity};
pub use store::{MemoryEntry, MemoryError, MemoryMetadata, MemoryStore};
