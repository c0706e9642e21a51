//! Top-level façade: composes the vector arena, metadata log, and HNSW graph
//! into one on-disk database under single-writer/many-reader discipline.
//!
//! One directory, one lockfile, one `RwLock` guarding the mutable state: a
//! read guard for lookups and a write guard for anything that mutates. The
//! write lock covers one `Inner` bundle (arena + metadata + graph) rather
//! than independently-locked subsystems, since `optimize` needs to touch the
//! graph and the metadata log together without a reader observing a
//! half-compacted state.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::config::VecgraphConfig;
use crate::distance::{normalize_in_place, Metric};
use crate::error::{Error, Result};
use crate::filter::Predicate;
use crate::index::{self, HnswGraph};
use crate::lockfile::LockFile;
use crate::metadata::MetadataRecord;
use crate::planner::{self, FilterPlan};
use crate::storage::{MetadataStore, VectorArena};

const CONFIG_FILE: &str = "vecgraph.toml";
const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.jsonl";
const INDEX_FILE: &str = "index.hnsw";
const LOCK_FILE: &str = "lockfile";

/// Post-filter retries double `ef_search` this many times before giving up
/// and returning whatever matched.
const MAX_POST_FILTER_ATTEMPTS: usize = 6;

/// One matched vector: its id, distance to the query, and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The matched vector's id.
    pub id: u32,
    /// Distance under the database's fixed metric (lower is closer).
    pub distance: f32,
    /// The id's metadata record at the time of the search.
    pub metadata: MetadataRecord,
}

/// Point-in-time size and configuration counters.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    /// Number of ids with a live (non-tombstoned) record.
    pub live_count: usize,
    /// Number of ids currently tombstoned.
    pub tombstoned_count: usize,
    /// Fixed vector dimension.
    pub dimension: usize,
    /// Fixed distance metric.
    pub metric: Metric,
    /// Rough estimate of vector storage in use, in bytes.
    pub estimated_bytes: u64,
}

struct Inner {
    arena: Arc<VectorArena>,
    metadata: Arc<MetadataStore>,
    graph: Arc<HnswGraph<Arc<VectorArena>>>,
}

/// An open, on-disk embedded vector database.
///
/// One directory holds everything: `vectors.bin`, `metadata.jsonl`,
/// `index.hnsw`, `vecgraph.toml`, and a `lockfile` sentinel held exclusively
/// for the process's lifetime. Reads (`search`, `stats`) take a shared lock;
/// writes (`insert`, `tombstone`, `flush`, `optimize`) take an exclusive one.
pub struct Database {
    dir: PathBuf,
    config: VecgraphConfig,
    _lock: LockFile,
    inner: RwLock<Inner>,
}

impl Database {
    /// Creates a fresh database at `dir`, which must not already contain one.
    ///
    /// `config` is layered over any `vecgraph.toml` already present in `dir`
    /// and `VDB_*` environment variables (see [`VecgraphConfig::load_layered`])
    /// before being validated and persisted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the resolved configuration fails
    /// validation, [`Error::Concurrency`] if another process holds the
    /// directory's lock, or [`Error::Io`] if any file cannot be created.
    pub fn create(dir: impl Into<PathBuf>, config: VecgraphConfig) -> Result<Self> {
        let dir = dir.into();
        let config = VecgraphConfig::load_layered(config, dir.join(CONFIG_FILE))?;
        config.validate()?;

        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        let lock = LockFile::acquire(dir.join(LOCK_FILE))?;

        let arena = Arc::new(VectorArena::create(
            dir.join(VECTORS_FILE),
            config.dimension,
            config.metric,
        )?);
        let metadata = Arc::new(MetadataStore::create(dir.join(METADATA_FILE))?);
        let graph = Arc::new(HnswGraph::new(
            Arc::clone(&arena),
            config.metric,
            config.simd_override,
            config.hnsw_m,
            config.m0(),
            config.hnsw_ef_construction,
            config.level_multiplier(),
            config.seed,
        ));

        let db = Self {
            dir,
            config,
            _lock: lock,
            inner: RwLock::new(Inner {
                arena,
                metadata,
                graph,
            }),
        };
        db.persist_config()?;
        db.flush()?;
        tracing::info!(dir = %db.dir.display(), "database.create");
        Ok(db)
    }

    /// Opens an existing database at `dir`, replaying the metadata log and
    /// restoring the graph from `index.hnsw`.
    ///
    /// `vecgraph.toml` is optional: a directory missing it (e.g. from a
    /// crash between `create` building the database and its call to
    /// `persist_config`) still opens. Dimension, metric, and the HNSW build
    /// parameters are reconstructed from the vector arena's and index
    /// snapshot's own on-disk headers instead; the remaining settings fall
    /// back to [`VecgraphConfig`]'s defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Concurrency`] if another process holds the
    /// directory's write lock, [`Error::Corruption`] if `index.hnsw` or
    /// `vectors.bin` fail validation, or [`Error::Io`]/[`Error::Config`] for
    /// an unreadable or malformed `vecgraph.toml`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let lock = LockFile::acquire(dir.join(LOCK_FILE))?;

        let (snapshot, header) = index::read_snapshot(dir.join(INDEX_FILE))?;
        let arena = Arc::new(VectorArena::open(dir.join(VECTORS_FILE), header.n as usize)?);

        let config_path = dir.join(CONFIG_FILE);
        let config: VecgraphConfig = match fs::read_to_string(&config_path) {
            Ok(text) => toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %config_path.display(),
                    "vecgraph.toml missing, reconstructing configuration from on-disk headers"
                );
                let mut config = VecgraphConfig::new(arena.dimension());
                config.metric = arena.metric();
                config.hnsw_m = header.m as usize;
                config.hnsw_ef_construction = header.ef_construction as usize;
                config.seed = header.seed;
                config
            }
            Err(e) => return Err(Error::io(&config_path, e)),
        };
        config.validate()?;

        let metadata = Arc::new(MetadataStore::open(dir.join(METADATA_FILE))?);
        let graph = Arc::new(HnswGraph::from_snapshot(
            Arc::clone(&arena),
            config.metric,
            config.simd_override,
            header.m as usize,
            header.m0 as usize,
            header.ef_construction as usize,
            f64::from(header.level_mult),
            header.seed,
            snapshot,
        ));

        tracing::info!(dir = %dir.display(), n = header.n, "database.open");
        Ok(Self {
            dir,
            config,
            _lock: lock,
            inner: RwLock::new(Inner {
                arena,
                metadata,
                graph,
            }),
        })
    }

    /// Inserts `vector` with its attached `metadata`, returning the assigned id.
    ///
    /// Under the cosine metric `vector` is normalized as part of the arena
    /// write; ids are assigned sequentially and never reused except by
    /// [`Database::insert`] itself rolling back a failed attempt.
    ///
    /// Writes the arena, then the metadata log, then the graph, in that
    /// order. A failure in the metadata write rolls the arena's `len()`
    /// back. A failure in the graph write rolls the arena back *and*
    /// retracts the metadata record already stored for this id, so `id`
    /// never appears live or tombstoned once `insert` has returned an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `vector.len()` doesn't match
    /// the database's fixed dimension, or [`Error::InvalidArgument`] if
    /// `vector` is all-zero under the cosine metric.
    pub fn insert(&self, vector: &[f32], metadata: MetadataRecord) -> Result<u32> {
        if vector.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }

        let inner = self.inner.write();
        let id = inner.arena.append(vector)?;
        let stored = inner.arena.get(id)?.as_slice().to_vec();

        if let Err(e) = inner.metadata.store(id, metadata) {
            let _ = inner.arena.rollback_last_append(id);
            return Err(e);
        }

        if let Err(e) = inner.graph.insert(id, &stored) {
            let _ = inner.metadata.retract(id);
            let _ = inner.arena.rollback_last_append(id);
            return Err(e);
        }

        tracing::debug!(id, "database.insert");
        Ok(id)
    }

    /// Finds the `k` nearest vectors to `query`.
    ///
    /// `ef_search` defaults to the database's configured
    /// `hnsw_ef_search_default` when `None`. `filter`, if given, restricts
    /// results to ids whose metadata matches; the query planner decides
    /// between widening the graph search (post-filter) and enumerating
    /// matches directly (pre-filter) based on estimated selectivity. Even
    /// with no filter, tombstoned ids are always excluded: the beam search
    /// itself is filter-blind, so liveness is treated as an implicit filter
    /// here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `query.len()` doesn't match
    /// the database's fixed dimension, or [`Error::InvalidArgument`] if `k`
    /// is zero or `query` is all-zero under the cosine metric.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: Option<usize>,
        filter: Option<&Predicate>,
    ) -> Result<Vec<SearchHit>> {
        if query.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".into()));
        }

        let mut owned_query;
        let query: &[f32] = if self.config.metric.requires_normalization() {
            owned_query = query.to_vec();
            normalize_in_place(&mut owned_query).map_err(|()| {
                Error::InvalidArgument(
                    "cannot search the all-zero vector under cosine metric".into(),
                )
            })?;
            &owned_query
        } else {
            query
        };

        let ef = ef_search.unwrap_or(self.config.hnsw_ef_search_default).max(k);
        let inner = self.inner.read();
        let started = Instant::now();

        let result = if let Some(predicate) = filter {
            let sample = inner.metadata.iter_live();
            let selectivity =
                planner::estimate_selectivity(predicate, sample.iter().map(|(_, r)| r));
            match planner::plan(selectivity) {
                FilterPlan::PreFilter => self.search_pre_filter(&inner, query, k, predicate),
                FilterPlan::PostFilter { oversample } => {
                    self.search_post_filter(&inner, query, k, ef, Some(predicate), oversample)
                }
            }
        } else {
            self.search_post_filter(&inner, query, k, ef, None, 1.0)
        };

        tracing::debug!(
            k,
            dimension = self.config.dimension,
            elapsed_us = started.elapsed().as_micros() as u64,
            "database.search"
        );
        result
    }

    fn search_post_filter(
        &self,
        inner: &Inner,
        query: &[f32],
        k: usize,
        ef_search: usize,
        predicate: Option<&Predicate>,
        oversample: f64,
    ) -> Result<Vec<SearchHit>> {
        let len = inner.arena.len().max(1);
        let mut widened = ef_search;
        for attempt in 0..MAX_POST_FILTER_ATTEMPTS {
            let beam = ((widened as f64) * oversample).ceil() as usize;
            let raw = inner.graph.search(query, k, beam.min(len))?;

            let mut hits = Vec::with_capacity(k);
            for (distance, id) in raw {
                let Some(record) = inner.metadata.get(id) else {
                    continue;
                };
                if predicate.is_some_and(|p| !p.matches(&record)) {
                    continue;
                }
                hits.push(SearchHit {
                    id,
                    distance,
                    metadata: record,
                });
                if hits.len() == k {
                    break;
                }
            }

            let exhausted = widened >= len;
            if hits.len() >= k || attempt == MAX_POST_FILTER_ATTEMPTS - 1 || exhausted {
                return Ok(hits);
            }
            widened = (widened * 2).min(len);
        }
        unreachable!("loop always returns before exhausting its range")
    }

    fn search_pre_filter(
        &self,
        inner: &Inner,
        query: &[f32],
        k: usize,
        predicate: &Predicate,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for (id, record) in inner.metadata.iter_live() {
            if !predicate.matches(&record) {
                continue;
            }
            let vector = inner.arena.get(id)?.as_slice().to_vec();
            let distance =
                self.config
                    .metric
                    .distance_dispatched(query, &vector, self.config.simd_override);
            hits.push(SearchHit {
                id,
                distance,
                metadata: record,
            });
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    /// Marks `id` as tombstoned: excluded from future search results, but
    /// its arena slot and graph edges are not reclaimed until [`Database::optimize`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` has no live record.
    pub fn tombstone(&self, id: u32) -> Result<()> {
        let inner = self.inner.write();
        if !inner.metadata.is_live(id) {
            return Err(Error::NotFound(id));
        }
        inner.metadata.tombstone(id)?;
        tracing::debug!(id, "database.tombstone");
        Ok(())
    }

    /// Flushes the arena, metadata log, and graph snapshot to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if any underlying flush or write fails.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.read();
        inner.arena.flush()?;
        inner.metadata.flush()?;
        self.persist_graph_locked(&inner)
    }

    /// Compacts the graph's adjacency and the metadata log down to live ids
    /// only. Ids are preserved (no vector is renumbered), so the vector
    /// arena's storage for tombstoned ids remains allocated; only the graph
    /// edges pointing at them and the metadata log's historical lines are
    /// reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the metadata log rewrite or the graph
    /// snapshot write fails.
    pub fn optimize(&self) -> Result<()> {
        let inner = self.inner.write();
        let metadata = &inner.metadata;
        inner.graph.compact(|id| metadata.is_live(id))?;
        inner.metadata.compact()?;
        self.persist_graph_locked(&inner)?;
        tracing::info!("database.optimize");
        Ok(())
    }

    /// Point-in-time size and configuration counters.
    #[must_use]
    pub fn stats(&self) -> Stats {
        let inner = self.inner.read();
        Stats {
            live_count: inner.metadata.live_count(),
            tombstoned_count: inner.metadata.tombstoned_count(),
            dimension: self.config.dimension,
            metric: self.config.metric,
            estimated_bytes: estimate_bytes(&inner),
        }
    }

    /// Flushes and releases the directory lock. Equivalent to dropping the
    /// handle, except it surfaces a flush failure instead of silently losing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the final flush fails.
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    fn persist_config(&self) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let serialized = toml::to_string_pretty(&self.config)
            .map_err(|e| Error::Internal(format!("config serialization failed: {e}")))?;
        fs::write(&path, serialized).map_err(|e| Error::io(&path, e))
    }

    fn persist_graph_locked(&self, inner: &Inner) -> Result<()> {
        let snapshot = inner.graph.snapshot();
        index::write_snapshot(
            self.dir.join(INDEX_FILE),
            &snapshot,
            self.config.hnsw_m as u32,
            self.config.m0() as u32,
            self.config.hnsw_ef_construction as u32,
            self.config.level_multiplier() as f32,
            self.config.seed,
        )
    }
}

fn estimate_bytes(inner: &Inner) -> u64 {
    inner.arena.len() as u64 * inner.arena.dimension() as u64 * std::mem::size_of::<f32>() as u64
}
