//! Configuration envelope applied at [`crate::Database::create`].
//!
//! Layered via `figment`: programmatic defaults < `vecgraph.toml` < `VDB_*`
//! environment variables.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::distance::Metric;
use crate::error::{Error, Result};

/// Forces a specific SIMD dispatch path, bypassing CPU feature probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimdOverride {
    /// Probe CPU features and pick the widest available path.
    #[default]
    Auto,
    /// Force the 512-bit (16-lane) path.
    Avx512,
    /// Force the 256-bit (8-lane) path.
    Avx2,
    /// Force the scalar fallback.
    Scalar,
}

/// Configuration recognized at database creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VecgraphConfig {
    /// Vector dimension. Required; zero is rejected by [`VecgraphConfig::validate`].
    pub dimension: usize,
    /// Distance metric, fixed for the lifetime of the database.
    pub metric: Metric,
    /// HNSW `M`: bidirectional links per node above layer 0.
    pub hnsw_m: usize,
    /// HNSW `ef_construction`: beam width during insertion.
    pub hnsw_ef_construction: usize,
    /// Default `ef_search` used when a query does not override it.
    pub hnsw_ef_search_default: usize,
    /// Soft capacity hint used to size the initial arena allocation.
    pub max_elements: usize,
    /// Hard cap on arena growth; `None` means unbounded.
    pub max_elements_hard_cap: Option<usize>,
    /// Forces a specific SIMD kernel, otherwise auto-detected.
    pub simd_override: SimdOverride,
    /// Worker thread pool size; `0` means "use available parallelism".
    pub thread_pool_size: usize,
    /// Seed for the deterministic layer-assignment PRNG.
    pub seed: u64,
}

impl Default for VecgraphConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            metric: Metric::Cosine,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search_default: 50,
            max_elements: 1_000_000,
            max_elements_hard_cap: None,
            simd_override: SimdOverride::Auto,
            thread_pool_size: 0,
            seed: default_seed(),
        }
    }
}

fn default_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5DEE_CE66_D1A4_B5B5)
}

impl VecgraphConfig {
    /// Creates a config for the given dimension, defaults otherwise.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Loads configuration layered over a `vecgraph.toml` file (if present)
    /// and `VDB_*` environment variables, starting from `base` as the
    /// programmatic default (typically [`VecgraphConfig::new`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the TOML file is malformed or a value
    /// fails to deserialize into its expected type.
    pub fn load_layered(base: Self, toml_path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Toml::file(toml_path.as_ref()))
            .merge(Env::prefixed("VDB_").split("_").lowercase(false));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Validates the configuration, rejecting values that would make
    /// `create` unsafe or nonsensical.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::Config("dimension must be positive".into()));
        }
        if self.hnsw_m == 0 {
            return Err(Error::Config("hnsw_m must be positive".into()));
        }
        if self.hnsw_ef_construction == 0 {
            return Err(Error::Config("hnsw_ef_construction must be positive".into()));
        }
        if self.hnsw_ef_search_default == 0 {
            return Err(Error::Config(
                "hnsw_ef_search_default must be positive".into(),
            ));
        }
        if let Some(cap) = self.max_elements_hard_cap {
            if cap < self.max_elements {
                return Err(Error::Config(
                    "max_elements_hard_cap must be >= max_elements".into(),
                ));
            }
        }
        Ok(())
    }

    /// `M` at layer 0, per spec `M0 = 2M`.
    #[must_use]
    pub fn m0(&self) -> usize {
        self.hnsw_m * 2
    }

    /// `m_L = 1 / ln(M)`, the level-selection multiplier.
    #[must_use]
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.hnsw_m as f64).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimension() {
        let cfg = VecgraphConfig::new(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_m() {
        let mut cfg = VecgraphConfig::new(128);
        cfg.hnsw_m = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_sane_defaults() {
        let cfg = VecgraphConfig::new(128);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.m0(), 32);
    }

    #[test]
    fn layered_load_applies_env_override() {
        std::env::set_var("VDB_HNSW_M", "24");
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("vecgraph.toml");
        let cfg = VecgraphConfig::load_layered(VecgraphConfig::new(64), &toml_path).unwrap();
        assert_eq!(cfg.hnsw_m, 24);
        std::env::remove_var("VDB_HNSW_M");
    }
}
