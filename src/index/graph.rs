//! From-scratch HNSW graph: insertion, beam search, and the heuristic
//! neighbor selector.
//!
//! The dual candidates/results heap beam search has early termination, a
//! lock-ordering discipline for bidirectional connections (fetch the
//! neighbor's vector before taking the layer lock), and a seeded
//! layer-assignment PRNG. Node ids are assigned externally (by the vector
//! arena) rather than self-allocated, since every component must agree on
//! one id space. The neighbor selector fixes its diversity threshold at
//! 1.0 rather than exposing a tunable VAMANA-style `alpha`: one plain
//! heuristic selector, not a configurable one.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rustc_hash::FxHashSet;

use crate::config::SimdOverride;
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::index::layer::{Layer, NodeId};

/// The deepest layer a node can be assigned to, regardless of how the
/// exponential draw comes out. Guards against pathological single-node
/// towers of empty layers from an unlucky RNG draw.
const MAX_LAYER: usize = 31;

/// Supplies the raw vector behind a node id, on demand.
///
/// The graph does not hold vectors itself; it asks its [`VectorSource`] for
/// them, keeping the vector arena as the single place vector bytes live.
pub trait VectorSource: Sync {
    /// Fetches the vector stored at `id`.
    fn vector(&self, id: NodeId) -> Result<Vec<f32>>;
}

impl<T: VectorSource + ?Sized> VectorSource for std::sync::Arc<T> {
    fn vector(&self, id: NodeId) -> Result<Vec<f32>> {
        (**self).vector(id)
    }
}

#[derive(Debug, Clone, Copy)]
struct Scored(f32, NodeId);

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits() && self.1 == other.1
    }
}
impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

/// Plain snapshot of graph state, used for binary persistence.
pub struct GraphSnapshot {
    /// `node_layers[id]` is the highest layer `id` participates in.
    pub node_layers: Vec<u8>,
    /// `layers[l][id]` is `id`'s neighbor list at layer `l`.
    pub layers: Vec<Vec<Vec<NodeId>>>,
    /// Current entry point, or `None` for an empty graph.
    pub entry_point: Option<NodeId>,
    /// Highest populated layer index.
    pub max_layer: usize,
}

/// A from-scratch HNSW graph over vectors supplied by `S`.
pub struct HnswGraph<S: VectorSource> {
    source: S,
    metric: Metric,
    simd_override: SimdOverride,
    m: usize,
    m0: usize,
    ef_construction: usize,
    level_mult: f64,
    layers: RwLock<Vec<Layer>>,
    node_layers: RwLock<Vec<u8>>,
    entry_point: RwLock<Option<NodeId>>,
    max_layer: AtomicUsize,
    count: AtomicUsize,
    rng: Mutex<Xoshiro256PlusPlus>,
}

impl<S: VectorSource> HnswGraph<S> {
    /// Builds an empty graph.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        source: S,
        metric: Metric,
        simd_override: SimdOverride,
        m: usize,
        m0: usize,
        ef_construction: usize,
        level_mult: f64,
        seed: u64,
    ) -> Self {
        Self {
            source,
            metric,
            simd_override,
            m,
            m0,
            ef_construction,
            level_mult,
            layers: RwLock::new(Vec::new()),
            node_layers: RwLock::new(Vec::new()),
            entry_point: RwLock::new(None),
            max_layer: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
            rng: Mutex::new(Xoshiro256PlusPlus::seed_from_u64(seed)),
        }
    }

    /// Rebuilds a graph from a persisted [`GraphSnapshot`].
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_snapshot(
        source: S,
        metric: Metric,
        simd_override: SimdOverride,
        m: usize,
        m0: usize,
        ef_construction: usize,
        level_mult: f64,
        seed: u64,
        snapshot: GraphSnapshot,
    ) -> Self {
        let count = snapshot.node_layers.len();
        let layers = snapshot
            .layers
            .into_iter()
            .map(|per_node| {
                let mut layer = Layer::new(per_node.len());
                for (id, neighbors) in per_node.into_iter().enumerate() {
                    layer.set_neighbors(id as NodeId, neighbors);
                }
                layer
            })
            .collect();

        Self {
            source,
            metric,
            simd_override,
            m,
            m0,
            ef_construction,
            level_mult,
            layers: RwLock::new(layers),
            node_layers: RwLock::new(snapshot.node_layers),
            entry_point: RwLock::new(snapshot.entry_point),
            max_layer: AtomicUsize::new(snapshot.max_layer),
            count: AtomicUsize::new(count),
            rng: Mutex::new(Xoshiro256PlusPlus::seed_from_u64(seed)),
        }
    }

    /// Number of nodes inserted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Whether the graph holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current entry point, if any.
    #[must_use]
    pub fn entry_point(&self) -> Option<NodeId> {
        *self.entry_point.read()
    }

    /// Highest populated layer index.
    #[must_use]
    pub fn max_layer(&self) -> usize {
        self.max_layer.load(Ordering::Acquire)
    }

    /// Underlying vector source, for callers that need direct access.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Prunes every layer's adjacency down to ids `is_live` accepts,
    /// reassigning the entry point if it no longer is. Ids and existing
    /// layer assignments are left untouched: this compacts the graph's
    /// edges, not its id space.
    ///
    /// # Errors
    ///
    /// This method itself cannot fail; the `Result` return keeps the
    /// signature uniform with the rest of the maintenance path.
    pub fn compact(&self, is_live: impl Fn(NodeId) -> bool) -> Result<()> {
        {
            let layers = self.layers.read();
            for layer in layers.iter() {
                for id in 0..layer.capacity() as NodeId {
                    if is_live(id) {
                        let pruned: Vec<NodeId> = layer
                            .get_neighbors(id)
                            .into_iter()
                            .filter(|&n| is_live(n))
                            .collect();
                        layer.set_neighbors(id, pruned);
                    } else {
                        layer.set_neighbors(id, Vec::new());
                    }
                }
            }
        }

        let current_entry = self.entry_point();
        if current_entry.is_none_or(|e| !is_live(e)) {
            let node_layers = self.node_layers.read();
            let new_entry = (0..node_layers.len() as NodeId)
                .filter(|&id| is_live(id))
                .max_by_key(|&id| node_layers[id as usize]);
            let new_max_layer = new_entry.map_or(0, |id| node_layers[id as usize] as usize);
            drop(node_layers);
            *self.entry_point.write() = new_entry;
            self.max_layer.store(new_max_layer, Ordering::Release);
        }
        tracing::debug!("graph.compact");
        Ok(())
    }

    /// Snapshots graph state for persistence.
    #[must_use]
    pub fn snapshot(&self) -> GraphSnapshot {
        let node_layers = self.node_layers.read().clone();
        let layers = self
            .layers
            .read()
            .iter()
            .map(|layer| {
                (0..layer.capacity())
                    .map(|id| layer.get_neighbors(id as NodeId))
                    .collect()
            })
            .collect();
        GraphSnapshot {
            node_layers,
            layers,
            entry_point: self.entry_point(),
            max_layer: self.max_layer(),
        }
    }

    /// Inserts `id` (which must equal [`HnswGraph::len`]; ids are assigned
    /// by the vector arena, not self-allocated here) with its vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `id` is not the next expected id, or
    /// propagates any [`Error`] the [`VectorSource`] returns.
    pub fn insert(&self, id: NodeId, vector: &[f32]) -> Result<()> {
        let expected = self.count.load(Ordering::Acquire) as u32;
        if id != expected {
            return Err(Error::Internal(format!(
                "graph insert expected next id {expected}, got {id}"
            )));
        }

        let node_layer = self.random_layer();
        {
            let mut node_layers = self.node_layers.write();
            if node_layers.len() <= id as usize {
                node_layers.resize(id as usize + 1, 0);
            }
            node_layers[id as usize] = node_layer as u8;
        }
        {
            let mut layers = self.layers.write();
            while layers.len() <= node_layer {
                layers.push(Layer::new(id as usize + 1));
            }
            for layer in layers.iter_mut().take(node_layer + 1) {
                layer.ensure_capacity(id);
            }
        }

        let Some(mut current) = self.entry_point() else {
            *self.entry_point.write() = Some(id);
            self.max_layer.store(node_layer, Ordering::Release);
            self.count.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        };

        let top_layer = self.max_layer();
        for layer in (node_layer + 1..=top_layer).rev() {
            current = self.search_layer_single(vector, current, layer)?;
        }

        let start_layer = node_layer.min(top_layer);
        for layer in (0..=start_layer).rev() {
            let m_at_layer = if layer == 0 { self.m0 } else { self.m };
            let candidates = self.search_layer(vector, &[current], self.ef_construction, layer)?;
            let selected = self.select_neighbors(vector, candidates.clone(), m_at_layer)?;

            {
                let layers = self.layers.read();
                layers[layer].set_neighbors(id, selected.clone());
            }

            for &neighbor in &selected {
                self.add_bidirectional_connection(id, neighbor, layer, m_at_layer)?;
            }

            if let Some(best) = candidates.first() {
                current = best.1;
            }
        }

        if node_layer > top_layer {
            *self.entry_point.write() = Some(id);
            self.max_layer.store(node_layer, Ordering::Release);
        }

        self.count.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(id, node_layer, "graph.insert");
        Ok(())
    }

    /// Returns up to `k` nearest neighbors of `query`, ordered by ascending
    /// distance. Does not itself know about tombstones; callers requiring
    /// liveness filtering (see [`crate::planner`]) must oversample `ef_search`.
    ///
    /// # Errors
    ///
    /// Propagates any [`Error`] the [`VectorSource`] returns.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(f32, NodeId)>> {
        let Some(entry) = self.entry_point() else {
            return Ok(Vec::new());
        };

        let mut current = entry;
        for layer in (1..=self.max_layer()).rev() {
            current = self.search_layer_single(query, current, layer)?;
        }

        let ef = ef_search.max(k).max(1);
        let mut candidates = self.search_layer(query, &[current], ef, 0)?;
        candidates.truncate(k);
        Ok(candidates)
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.metric.distance_dispatched(a, b, self.simd_override)
    }

    fn random_layer(&self) -> usize {
        let mut rng = self.rng.lock();
        let draw = (rng.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64);
        let uniform = draw.max(f64::MIN_POSITIVE);
        let level = (-uniform.ln() * self.level_mult).floor();
        if level < 0.0 {
            0
        } else {
            (level as usize).min(MAX_LAYER)
        }
    }

    /// Greedy single-best descent within one layer.
    fn search_layer_single(&self, query: &[f32], entry: NodeId, layer: usize) -> Result<NodeId> {
        let mut current = entry;
        let mut current_dist = self.distance(query, &self.source.vector(current)?);
        loop {
            let neighbors = {
                let layers = self.layers.read();
                match layers.get(layer) {
                    Some(layer_ref) => layer_ref.get_neighbors(current),
                    None => return Ok(current),
                }
            };
            let mut improved = false;
            for neighbor in neighbors {
                let d = self.distance(query, &self.source.vector(neighbor)?);
                if d < current_dist {
                    current = neighbor;
                    current_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return Ok(current);
            }
        }
    }

    /// Beam search within one layer: a min-heap of candidates to expand and
    /// a bounded max-heap of the best `ef` results found so far, with
    /// early termination once the best candidate can no longer improve
    /// the current worst result.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[NodeId],
        ef: usize,
        layer: usize,
    ) -> Result<Vec<(f32, NodeId)>> {
        let layer_capacity = {
            let layers = self.layers.read();
            match layers.get(layer) {
                Some(l) => l.capacity(),
                None => return Ok(Vec::new()),
            }
        };
        if layer_capacity == 0 {
            return Ok(Vec::new());
        }

        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut candidates: BinaryHeap<std::cmp::Reverse<Scored>> = BinaryHeap::new();
        let mut results: BinaryHeap<Scored> = BinaryHeap::new();

        for &ep in entry_points {
            if visited.insert(ep) {
                let d = self.distance(query, &self.source.vector(ep)?);
                candidates.push(std::cmp::Reverse(Scored(d, ep)));
                results.push(Scored(d, ep));
            }
        }

        while let Some(std::cmp::Reverse(Scored(c_dist, c_id))) = candidates.pop() {
            let furthest = results.peek().map_or(f32::INFINITY, |s| s.0);
            if c_dist > furthest && results.len() >= ef {
                break;
            }

            let neighbors = {
                let layers = self.layers.read();
                layers[layer].get_neighbors(c_id)
            };
            for neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = self.distance(query, &self.source.vector(neighbor)?);
                let furthest = results.peek().map_or(f32::INFINITY, |s| s.0);
                if results.len() < ef || d < furthest {
                    candidates.push(std::cmp::Reverse(Scored(d, neighbor)));
                    results.push(Scored(d, neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        Ok(results
            .into_sorted_vec()
            .into_iter()
            .map(|s| (s.0, s.1))
            .collect())
    }

    /// Diversity-preserving heuristic: sorted by distance to `query`
    /// ascending, a candidate is kept only if it is closer to `query` than
    /// to every neighbor already selected, the standard HNSW heuristic
    /// selector with its diversity threshold fixed at `1.0`.
    fn select_neighbors(
        &self,
        query: &[f32],
        mut candidates: Vec<(f32, NodeId)>,
        m: usize,
    ) -> Result<Vec<NodeId>> {
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut selected: Vec<(NodeId, Vec<f32>)> = Vec::with_capacity(m);
        for (dist_to_query, id) in candidates {
            if selected.len() >= m {
                break;
            }
            let vec_c = self.source.vector(id)?;
            let is_diverse = selected
                .iter()
                .all(|(_, vec_r)| dist_to_query <= self.distance(&vec_c, vec_r));
            if is_diverse {
                selected.push((id, vec_c));
            }
        }
        Ok(selected.into_iter().map(|(id, _)| id).collect())
    }

    /// Adds `id` to `neighbor`'s adjacency list at `layer`, re-running the
    /// heuristic selector to prune `neighbor`'s list back to `m_at_layer`
    /// if the insertion pushed it over budget.
    ///
    /// Fetches `neighbor`'s vector before taking the layers lock (vectors,
    /// then layers, then neighbor adjacency) to avoid a lock-order
    /// inversion against readers.
    fn add_bidirectional_connection(
        &self,
        id: NodeId,
        neighbor: NodeId,
        layer: usize,
        m_at_layer: usize,
    ) -> Result<()> {
        let neighbor_vec = self.source.vector(neighbor)?;

        let current = {
            let layers = self.layers.read();
            layers[layer].add_neighbor(neighbor, id);
            layers[layer].get_neighbors(neighbor)
        };

        if current.len() > m_at_layer {
            let mut scored = Vec::with_capacity(current.len());
            for n in current {
                let d = self.distance(&neighbor_vec, &self.source.vector(n)?);
                scored.push((d, n));
            }
            let pruned = self.select_neighbors(&neighbor_vec, scored, m_at_layer)?;
            let layers = self.layers.read();
            layers[layer].set_neighbors(neighbor, pruned);
        }
        Ok(())
    }
}
