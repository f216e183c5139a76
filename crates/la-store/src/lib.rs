//! la-store: On-disk context persistence for llama-agent
//!
//! Conversations, compaction archives, and plans live under a configurable
//! base directory. Every write is atomic (temp file + rename).

pub mod state;
pub mod store;

pub use state::{
    file_stamp, now_iso, ArchiveRecord, CompactEntry, ContextState, ContextSummary,
};
pub use store::{write_atomic, ContextStore};
