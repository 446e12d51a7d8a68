pub mod dead_letter;
pub mod embedding;
pub mod extraction;
pub mod metadata;
pub mod notification;

pub use embedding::{EmbeddingStore, embedding_store};
pub use metadata::{MetadataStore, RunLease};
