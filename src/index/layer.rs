//! Per-layer adjacency lists.
//!
//! A flat `Vec` of per-node neighbor lists, each behind its own lock, rather
//! than heap-allocated node objects linked by pointers. Many small,
//! independently-mutable adjacency lists is the right shape regardless of
//! whether node ids are `usize` or `u32`.

use parking_lot::RwLock;

/// Vector id, also the HNSW graph node id.
pub type NodeId = u32;

/// One layer's worth of adjacency lists, indexed by [`NodeId`].
pub struct Layer {
    neighbors: Vec<RwLock<Vec<NodeId>>>,
}

impl Layer {
    /// A layer with room for `capacity` nodes, all starting with no neighbors.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            neighbors: (0..capacity).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    /// Grows the layer so `node_id` has a slot, if it doesn't already.
    pub fn ensure_capacity(&mut self, node_id: NodeId) {
        let needed = node_id as usize + 1;
        if needed > self.neighbors.len() {
            self.neighbors
                .resize_with(needed, || RwLock::new(Vec::new()));
        }
    }

    /// A snapshot copy of `node_id`'s neighbor list.
    #[must_use]
    pub fn get_neighbors(&self, node_id: NodeId) -> Vec<NodeId> {
        self.neighbors[node_id as usize].read().clone()
    }

    /// Replaces `node_id`'s neighbor list wholesale.
    pub fn set_neighbors(&self, node_id: NodeId, neighbors: Vec<NodeId>) {
        *self.neighbors[node_id as usize].write() = neighbors;
    }

    /// Appends `neighbor` to `node_id`'s list if not already present.
    pub fn add_neighbor(&self, node_id: NodeId, neighbor: NodeId) {
        let mut list = self.neighbors[node_id as usize].write();
        if !list.contains(&neighbor) {
            list.push(neighbor);
        }
    }

    /// Number of node slots allocated in this layer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.neighbors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_neighbor_is_idempotent() {
        let layer = Layer::new(4);
        layer.add_neighbor(0, 1);
        layer.add_neighbor(0, 1);
        assert_eq!(layer.get_neighbors(0), vec![1]);
    }

    #[test]
    fn ensure_capacity_grows_without_losing_data() {
        let mut layer = Layer::new(2);
        layer.add_neighbor(1, 0);
        layer.ensure_capacity(5);
        assert_eq!(layer.capacity(), 6);
        assert_eq!(layer.get_neighbors(1), vec![0]);
        assert_eq!(layer.get_neighbors(5), Vec::<NodeId>::new());
    }
}
