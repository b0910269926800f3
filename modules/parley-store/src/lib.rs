//! Postgres persistence: the evolution store and the pgvector-backed
//! transcript index.

pub mod index;
pub mod store;

pub use index::PgTranscriptIndex;
pub use store::PgStore;
