//! Metric definitions and scalar distance reference implementations.
//!
//! The SIMD-dispatched kernels in [`crate::simd`] must agree with these
//! scalar forms to a tight relative tolerance, since graph determinism and
//! recall both depend on every kernel path producing the same ordering.

use serde::{Deserialize, Serialize};

/// Distance metric fixed at database creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// `1 - dot(a, b)` for pre-normalized vectors.
    Cosine,
    /// Squared Euclidean distance; no square root is taken.
    L2,
}

impl Metric {
    /// On-disk tag used in `vectors.bin`'s header (0=cosine, 1=L2).
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::Cosine => 0,
            Self::L2 => 1,
        }
    }

    /// Parses the on-disk metric tag.
    ///
    /// # Errors
    ///
    /// Returns `None` for any value other than 0 or 1.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Cosine),
            1 => Some(Self::L2),
            _ => None,
        }
    }

    /// Whether vectors must be L2-normalized before storage under this metric.
    #[must_use]
    pub fn requires_normalization(self) -> bool {
        matches!(self, Self::Cosine)
    }

    /// Scalar distance between `a` and `b`. Both must have equal length
    /// and, for cosine, must already be normalized.
    ///
    /// # Panics
    ///
    /// Panics if `a.len() != b.len()`.
    #[must_use]
    pub fn distance_scalar(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vector length mismatch");
        match self {
            Self::Cosine => 1.0 - dot_scalar(a, b),
            Self::L2 => l2_squared_scalar(a, b),
        }
    }

    /// Distance between `a` and `b` through the SIMD dispatch table.
    ///
    /// # Panics
    ///
    /// Panics if `a.len() != b.len()`.
    #[must_use]
    pub fn distance_dispatched(
        self,
        a: &[f32],
        b: &[f32],
        simd_override: crate::config::SimdOverride,
    ) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vector length mismatch");
        match self {
            Self::Cosine => 1.0 - crate::simd::dot_dispatched(a, b, simd_override),
            Self::L2 => crate::simd::l2_squared_dispatched(a, b, simd_override),
        }
    }
}

/// Scalar dot product, the reference implementation SIMD kernels must agree with.
#[must_use]
pub fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scalar squared L2 distance, the reference implementation SIMD kernels must agree with.
#[must_use]
pub fn l2_squared_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// L2 norm (not squared) of a vector.
#[must_use]
pub fn norm_scalar(v: &[f32]) -> f32 {
    dot_scalar(v, v).sqrt()
}

/// Normalizes `v` in place to unit L2 norm.
///
/// # Errors
///
/// Returns `Err(())` if `v`'s norm is zero (normalization is undefined);
/// callers should surface this as `Error::InvalidArgument`.
pub fn normalize_in_place(v: &mut [f32]) -> std::result::Result<(), ()> {
    let norm = norm_scalar(v);
    if norm == 0.0 || !norm.is_finite() {
        return Err(());
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(())
}
