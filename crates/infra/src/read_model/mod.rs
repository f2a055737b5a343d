//! Read-model document storage: keyed JSON documents written through
//! unit-of-work sessions.

pub mod document_store;
pub mod in_memory;
pub mod postgres;

pub use document_store::{
    Document, DocumentChange, DocumentSession, DocumentStore, DocumentStoreError,
};
pub use in_memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;
