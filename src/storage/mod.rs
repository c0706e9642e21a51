//! On-disk storage: the memory-mapped vector arena and the metadata log.

mod arena;
mod guard;
mod metadata_store;

pub use arena::VectorArena;
pub use guard::VectorSliceGuard;
pub use metadata_store::MetadataStore;
