//! Binary (de)serialization of `index.hnsw`.
//!
//! Layout: a 48-byte header, then for each id `0..N`: `top_layer` u8, then
//! for each layer `0..=top_layer`, `count` u16 followed by `count` neighbor
//! ids u32 (node-major, not layer-major). The file is portable independent
//! of how [`HnswGraph`](crate::index::graph::HnswGraph) happens to lay
//! adjacency out in memory.
//!
//! The header extends the pinned 40-byte layout with an 8-byte seed field
//! (see `DESIGN.md`): the random source design note calls for the seed to
//! live in the index header's reserved area, and the pinned field list has
//! no such area, so this is a deliberate, spec-consistent addition rather
//! than a deviation.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::index::graph::GraphSnapshot;
use crate::index::layer::NodeId;

const MAGIC: &[u8; 8] = b"VDBHNSW1";
const FORMAT_VERSION: u32 = 1;
const HEADER_BYTES: usize = 48;
const NO_ENTRY_POINT: u32 = u32::MAX;

/// Fixed-size fields read back from an `index.hnsw` header.
#[derive(Debug, Clone, Copy)]
pub struct HnswHeader {
    /// Live + tombstoned vector count at the time of the last save.
    pub n: u32,
    /// `M`: bidirectional links per node above layer 0.
    pub m: u32,
    /// `M0`: bidirectional links per node at layer 0.
    pub m0: u32,
    /// Beam width used during insertion.
    pub ef_construction: u32,
    /// Level-selection multiplier `1 / ln(M)`.
    pub level_mult: f32,
    /// Entry point node id, or `None` for an empty graph.
    pub entry_point: Option<NodeId>,
    /// Highest populated layer index.
    pub max_layer: u32,
    /// Seed for the deterministic layer-assignment PRNG.
    pub seed: u64,
}

/// Serializes `snapshot` (plus the parameters needed to reconstruct the
/// graph on open) to `path`, overwriting any existing file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be written, or
/// [`Error::Internal`] if a node has more neighbors at one layer than a
/// `u16` count can represent (would indicate `hnsw_m`/`hnsw_m0` far outside
/// any sane configuration).
#[allow(clippy::too_many_arguments)]
pub fn write_snapshot(
    path: impl Into<PathBuf>,
    snapshot: &GraphSnapshot,
    m: u32,
    m0: u32,
    ef_construction: u32,
    level_mult: f32,
    seed: u64,
) -> Result<()> {
    let path = path.into();
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| Error::io(&path, e))?;
    let mut writer = BufWriter::new(file);

    let n = snapshot.node_layers.len() as u32;
    let entry_point = snapshot.entry_point.unwrap_or(NO_ENTRY_POINT);
    let max_layer = snapshot.max_layer as u32;

    writer.write_all(MAGIC).map_err(|e| Error::io(&path, e))?;
    writer
        .write_all(&FORMAT_VERSION.to_le_bytes())
        .map_err(|e| Error::io(&path, e))?;
    writer.write_all(&n.to_le_bytes()).map_err(|e| Error::io(&path, e))?;
    writer.write_all(&m.to_le_bytes()).map_err(|e| Error::io(&path, e))?;
    writer.write_all(&m0.to_le_bytes()).map_err(|e| Error::io(&path, e))?;
    writer
        .write_all(&ef_construction.to_le_bytes())
        .map_err(|e| Error::io(&path, e))?;
    writer
        .write_all(&level_mult.to_le_bytes())
        .map_err(|e| Error::io(&path, e))?;
    writer
        .write_all(&entry_point.to_le_bytes())
        .map_err(|e| Error::io(&path, e))?;
    writer
        .write_all(&max_layer.to_le_bytes())
        .map_err(|e| Error::io(&path, e))?;
    writer.write_all(&seed.to_le_bytes()).map_err(|e| Error::io(&path, e))?;

    for (id, &top_layer) in snapshot.node_layers.iter().enumerate() {
        writer.write_all(&[top_layer]).map_err(|e| Error::io(&path, e))?;
        for layer in 0..=top_layer as usize {
            let neighbors = snapshot
                .layers
                .get(layer)
                .and_then(|per_node| per_node.get(id))
                .map_or(&[][..], Vec::as_slice);
            let count: u16 = neighbors.len().try_into().map_err(|_| {
                Error::Internal(format!(
                    "node {id} has {} neighbors at layer {layer}, too many for the u16 count field",
                    neighbors.len()
                ))
            })?;
            writer
                .write_all(&count.to_le_bytes())
                .map_err(|e| Error::io(&path, e))?;
            for &neighbor in neighbors {
                writer
                    .write_all(&neighbor.to_le_bytes())
                    .map_err(|e| Error::io(&path, e))?;
            }
        }
    }

    writer.flush().map_err(|e| Error::io(&path, e))?;
    writer.get_ref().sync_all().map_err(|e| Error::io(&path, e))
}

/// Reads back a [`GraphSnapshot`] and its [`HnswHeader`] from `path`.
///
/// # Errors
///
/// Returns [`Error::Corruption`] if the magic, format version, or body
/// framing don't check out, or [`Error::Io`] if the file can't be read.
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<(GraphSnapshot, HnswHeader)> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::new(file);

    let mut header_buf = [0u8; HEADER_BYTES];
    reader
        .read_exact(&mut header_buf)
        .map_err(|e| Error::io(path, e))?;

    if &header_buf[0..8] != MAGIC {
        return Err(Error::corruption(path, "bad magic in index.hnsw header"));
    }
    let version = u32::from_le_bytes(header_buf[8..12].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(Error::corruption(
            path,
            format!("unsupported format version {version}"),
        ));
    }
    let n = u32::from_le_bytes(header_buf[12..16].try_into().unwrap());
    let m = u32::from_le_bytes(header_buf[16..20].try_into().unwrap());
    let m0 = u32::from_le_bytes(header_buf[20..24].try_into().unwrap());
    let ef_construction = u32::from_le_bytes(header_buf[24..28].try_into().unwrap());
    let level_mult = f32::from_le_bytes(header_buf[28..32].try_into().unwrap());
    let entry_point_raw = u32::from_le_bytes(header_buf[32..36].try_into().unwrap());
    let max_layer = u32::from_le_bytes(header_buf[36..40].try_into().unwrap());
    let seed = u64::from_le_bytes(header_buf[40..48].try_into().unwrap());

    let entry_point = if entry_point_raw == NO_ENTRY_POINT {
        None
    } else {
        Some(entry_point_raw)
    };

    let mut node_layers = Vec::with_capacity(n as usize);
    let mut layers: Vec<Vec<Vec<NodeId>>> = vec![Vec::new(); max_layer as usize + 1];
    for layer in layers.iter_mut() {
        layer.resize(n as usize, Vec::new());
    }

    for id in 0..n as usize {
        let mut top_layer_buf = [0u8; 1];
        reader
            .read_exact(&mut top_layer_buf)
            .map_err(|e| Error::io(path, e))?;
        let top_layer = top_layer_buf[0];
        node_layers.push(top_layer);

        for layer in 0..=top_layer as usize {
            let mut count_buf = [0u8; 2];
            reader
                .read_exact(&mut count_buf)
                .map_err(|e| Error::io(path, e))?;
            let count = u16::from_le_bytes(count_buf) as usize;

            let mut neighbors = Vec::with_capacity(count);
            for _ in 0..count {
                let mut id_buf = [0u8; 4];
                reader.read_exact(&mut id_buf).map_err(|e| Error::io(path, e))?;
                neighbors.push(u32::from_le_bytes(id_buf));
            }
            layers
                .get_mut(layer)
                .ok_or_else(|| Error::corruption(path, format!("node {id} claims layer {layer} beyond max_layer")))?
                [id] = neighbors;
        }
    }

    Ok((
        GraphSnapshot {
            node_layers,
            layers,
            entry_point,
            max_layer: max_layer as usize,
        },
        HnswHeader {
            n,
            m,
            m0,
            ef_construction,
            level_mult,
            entry_point,
            max_layer,
            seed,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_an_empty_graph() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.hnsw");
        let snapshot = GraphSnapshot {
            node_layers: Vec::new(),
            layers: vec![Vec::new()],
            entry_point: None,
            max_layer: 0,
        };
        write_snapshot(&path, &snapshot, 16, 32, 200, 0.36, 42).unwrap();
        let (restored, header) = read_snapshot(&path).unwrap();
        assert_eq!(header.n, 0);
        assert_eq!(header.entry_point, None);
        assert!(restored.node_layers.is_empty());
    }

    #[test]
    fn round_trips_populated_layers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.hnsw");
        let snapshot = GraphSnapshot {
            node_layers: vec![0, 1, 0],
            layers: vec![
                vec![vec![1, 2], vec![0], vec![0]],
                vec![Vec::new(), Vec::new(), Vec::new()],
            ],
            entry_point: Some(1),
            max_layer: 1,
        };
        write_snapshot(&path, &snapshot, 16, 32, 200, 0.36, 7).unwrap();
        let (restored, header) = read_snapshot(&path).unwrap();
        assert_eq!(header.entry_point, Some(1));
        assert_eq!(header.seed, 7);
        assert_eq!(restored.layers[0][0], vec![1, 2]);
        assert_eq!(restored.node_layers, vec![0, 1, 0]);
        assert_eq!(restored.max_layer, 1);
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.hnsw");
        std::fs::write(&path, [0u8; HEADER_BYTES]).unwrap();
        assert!(matches!(read_snapshot(&path), Err(Error::Corruption { .. })));
    }
}
