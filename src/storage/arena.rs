//! Append-only, fixed-stride, memory-mapped vector store.
//!
//! Growth-by-doubling, epoch-guarded read path over a single-file
//! `vectors.bin` layout: a 64-byte header occupying page 0, vectors starting
//! at page 1 (byte offset 4096) for alignment.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use memmap2::MmapMut;
use parking_lot::RwLock;

use crate::distance::normalize_in_place;
use crate::error::{Error, Result};
use crate::storage::guard::VectorSliceGuard;
use crate::distance::Metric;

const MAGIC: &[u8; 8] = b"VDBVEC01";
const FORMAT_VERSION: u32 = 1;
const HEADER_BYTES: usize = 64;
const PAGE_SIZE: usize = 4096;
/// Vectors begin at page 2 (byte offset 4096) for alignment.
const DATA_OFFSET: usize = PAGE_SIZE;
const INITIAL_CAPACITY: usize = 4096;

fn record_bytes(dimension: usize) -> usize {
    dimension * std::mem::size_of::<f32>()
}

fn file_len_for_capacity(dimension: usize, capacity: usize) -> u64 {
    (DATA_OFFSET + capacity * record_bytes(dimension)) as u64
}

/// Append-only, memory-mapped arena of fixed-length `f32` vectors.
pub struct VectorArena {
    path: PathBuf,
    dimension: usize,
    metric: Metric,
    file: File,
    mmap: RwLock<MmapMut>,
    capacity: AtomicUsize,
    len: AtomicUsize,
    remap_epoch: AtomicU64,
}

impl VectorArena {
    /// Creates a new arena file at `path` with room for [`INITIAL_CAPACITY`] records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created or sized.
    pub fn create(path: impl Into<PathBuf>, dimension: usize, metric: Metric) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;

        file.set_len(file_len_for_capacity(dimension, INITIAL_CAPACITY))
            .map_err(|e| Error::io(&path, e))?;

        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| Error::io(&path, e))?;
        write_header(&mut mmap, dimension, metric);

        Ok(Self {
            path,
            dimension,
            metric,
            file,
            mmap: RwLock::new(mmap),
            capacity: AtomicUsize::new(INITIAL_CAPACITY),
            len: AtomicUsize::new(0),
            remap_epoch: AtomicU64::new(0),
        })
    }

    /// Opens an existing arena file, validating its header.
    ///
    /// `known_len` is the live vector count as recorded by the HNSW index
    /// header (the arena itself does not persist `N`, only the bytes that
    /// back it, so the caller, [`crate::Database::open`], supplies it).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] if the magic or format version don't
    /// match, or [`Error::Io`] if the file can't be opened/mapped.
    pub fn open(path: impl Into<PathBuf>, known_len: usize) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;

        let file_len = file.metadata().map_err(|e| Error::io(&path, e))?.len();
        if file_len < HEADER_BYTES as u64 {
            return Err(Error::corruption(&path, "file shorter than header"));
        }

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| Error::io(&path, e))?;
        let (dimension, metric) = read_header(&mmap, &path)?;

        let capacity = ((file_len as usize).saturating_sub(DATA_OFFSET)) / record_bytes(dimension);
        if known_len > capacity {
            return Err(Error::corruption(
                &path,
                format!("index reports {known_len} vectors but arena only has room for {capacity}"),
            ));
        }

        Ok(Self {
            path,
            dimension,
            metric,
            file,
            mmap: RwLock::new(mmap),
            capacity: AtomicUsize::new(capacity),
            len: AtomicUsize::new(known_len),
            remap_epoch: AtomicU64::new(0),
        })
    }

    /// The fixed vector dimension for this arena.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The fixed distance metric for this arena.
    #[must_use]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Number of vectors currently assigned, live or tombstoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the arena holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `v`, returning the newly assigned id.
    ///
    /// Under the cosine metric, `v` is L2-normalized before the write; the
    /// caller's slice is left untouched (normalization happens on a local copy).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `v.len() != dimension()`, or
    /// [`Error::InvalidArgument`] if cosine normalization would divide by zero.
    pub fn append(&self, v: &[f32]) -> Result<u32> {
        if v.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: v.len(),
            });
        }

        let mut owned;
        let stored: &[f32] = if self.metric.requires_normalization() {
            owned = v.to_vec();
            normalize_in_place(&mut owned).map_err(|()| {
                Error::InvalidArgument(
                    "cannot normalize the all-zero vector under cosine metric".into(),
                )
            })?;
            &owned
        } else {
            v
        };

        let id = self.len.load(Ordering::Acquire);
        self.ensure_capacity(id + 1)?;

        {
            let mmap = self.mmap.read();
            let offset = DATA_OFFSET + id * record_bytes(self.dimension);
            // SAFETY: `offset..offset+record_bytes` lies within the mapped
            // region because `ensure_capacity` guaranteed `id < capacity`,
            // and no other writer can run concurrently under the caller's
            // single-writer discipline (we still hold only a read lock here
            // because growth, not this write, is what needs exclusivity).
            unsafe {
                let dst = mmap.as_ptr().add(offset) as *mut f32;
                std::ptr::copy_nonoverlapping(stored.as_ptr(), dst, stored.len());
            }
        }

        self.len.store(id + 1, Ordering::Release);
        tracing::debug!(id, dimension = self.dimension, "arena.append");
        Ok(id as u32)
    }

    /// Borrows vector `id` with zero copies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id >= len()`.
    pub fn get(&self, id: u32) -> Result<VectorSliceGuard<'_>> {
        let id = id as usize;
        if id >= self.len() {
            return Err(Error::NotFound(id as u32));
        }
        let mmap = self.mmap.read();
        let offset = DATA_OFFSET + id * record_bytes(self.dimension);
        // SAFETY: `offset..offset+record_bytes` lies within the mapped
        // region because `id < len() <= capacity`.
        let ptr = unsafe { mmap.as_ptr().add(offset) as *const f32 };
        Ok(VectorSliceGuard::new(mmap, ptr, self.dimension, &self.remap_epoch))
    }

    /// Ensures the file/mmap can hold at least `needed` records, growing by
    /// doubling (at least to `INITIAL_CAPACITY`) if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if resizing or remapping the file fails.
    pub fn ensure_capacity(&self, needed: usize) -> Result<()> {
        if needed <= self.capacity.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut mmap = self.mmap.write();
        // Re-check under the write lock: another thread may have grown it already.
        let current_capacity = self.capacity.load(Ordering::Acquire);
        if needed <= current_capacity {
            return Ok(());
        }

        mmap.flush().map_err(|e| Error::io(&self.path, e))?;

        let new_capacity = (current_capacity * 2).max(INITIAL_CAPACITY).max(needed);
        self.file
            .set_len(file_len_for_capacity(self.dimension, new_capacity))
            .map_err(|e| Error::io(&self.path, e))?;

        let new_mmap =
            unsafe { MmapMut::map_mut(&self.file) }.map_err(|e| Error::io(&self.path, e))?;
        *mmap = new_mmap;

        self.capacity.store(new_capacity, Ordering::Release);
        self.remap_epoch.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(new_capacity, "arena.grow");
        Ok(())
    }

    /// Rolls back the most recent `append`, provided its id matches `id` and
    /// is still the highest assigned. Used by [`crate::Database::insert`] to
    /// undo the arena write when a later step (metadata, graph) fails, since
    /// the stride-based layout can only ever shrink from the tail.
    ///
    /// The vector's bytes are left in place untouched; only `len()` moves
    /// back, so the slot is overwritten by the next `append`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `id` is not the most recently assigned id.
    pub fn rollback_last_append(&self, id: u32) -> Result<()> {
        let current = self.len.load(Ordering::Acquire);
        if current == 0 || id as usize != current - 1 {
            return Err(Error::Internal(format!(
                "rollback_last_append({id}) but arena len is {current}"
            )));
        }
        self.len.store(id as usize, Ordering::Release);
        tracing::debug!(id, "arena.rollback_last_append");
        Ok(())
    }

    /// Flushes pending writes through the OS page cache to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the flush or `fsync` fails.
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .read()
            .flush()
            .map_err(|e| Error::io(&self.path, e))?;
        self.file.sync_all().map_err(|e| Error::io(&self.path, e))
    }
}

impl crate::index::VectorSource for VectorArena {
    fn vector(&self, id: crate::index::NodeId) -> Result<Vec<f32>> {
        Ok(self.get(id)?.as_slice().to_vec())
    }
}

fn write_header(mmap: &mut MmapMut, dimension: usize, metric: Metric) {
    mmap[0..8].copy_from_slice(MAGIC);
    mmap[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    mmap[12..16].copy_from_slice(&(dimension as u32).to_le_bytes());
    mmap[16] = metric.tag();
    for b in &mut mmap[17..HEADER_BYTES] {
        *b = 0;
    }
}

fn read_header(mmap: &MmapMut, path: &Path) -> Result<(usize, Metric)> {
    if &mmap[0..8] != MAGIC {
        return Err(Error::corruption(path, "bad magic in vectors.bin header"));
    }
    let version = u32::from_le_bytes(mmap[8..12].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(Error::corruption(
            path,
            format!("unsupported format version {version}"),
        ));
    }
    let dimension = u32::from_le_bytes(mmap[12..16].try_into().unwrap()) as usize;
    let metric = Metric::from_tag(mmap[16])
        .ok_or_else(|| Error::corruption(path, format!("unknown metric tag {}", mmap[16])))?;
    Ok((dimension, metric))
}
