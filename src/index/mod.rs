//! The HNSW approximate nearest-neighbor graph and its on-disk persistence.

pub mod graph;
mod layer;
mod persistence;

pub use graph::{GraphSnapshot, HnswGraph, VectorSource};
pub use layer::NodeId;
pub use persistence::{read_snapshot, write_snapshot, HnswHeader};
