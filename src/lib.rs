//! Embedded, on-disk vector database: HNSW approximate nearest-neighbor
//! search over memory-mapped storage, with SIMD-accelerated distance
//! kernels and metadata filtering.
//!
//! A [`Database`] owns one directory containing its vector arena
//! (`vectors.bin`), metadata log (`metadata.jsonl`), graph snapshot
//! (`index.hnsw`), and configuration (`vecgraph.toml`). Open one with
//! [`Database::create`] or [`Database::open`], then [`Database::insert`],
//! [`Database::search`], [`Database::tombstone`], and periodically
//! [`Database::optimize`] it.

pub mod config;
pub mod database;
pub mod distance;
pub mod error;
pub mod filter;
pub mod index;
pub mod lockfile;
pub mod metadata;
pub mod planner;
pub mod simd;
pub mod storage;

pub use config::{SimdOverride, VecgraphConfig};
pub use database::{Database, SearchHit, Stats};
pub use distance::Metric;
pub use error::{Error, Result};
pub use filter::{NumericOp, Predicate};
pub use metadata::{Bias, MetadataRecord};
