//! Vector retrieval over the persisted knowledge base

mod index;

pub use index::{IndexManifest, VectorIndex};
