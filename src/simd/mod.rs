//! Zero-overhead SIMD distance dispatch.
//!
//! CPU feature probing happens once per process; the winning kernel is
//! cached behind a [`OnceLock`]-backed function pointer so hot loops pay no
//! per-call branch. `VDB_SIMD` (`auto` | `avx512` | `avx2` | `scalar`) or the
//! `simd_override` config field force a specific path, primarily for tests
//! that must exercise every kernel on the same machine.

mod avx2;
mod avx512;

use std::sync::OnceLock;

use crate::config::SimdOverride;

/// Function-pointer type shared by every distance kernel in this module.
pub type DistanceFn = fn(&[f32], &[f32]) -> f32;

static DOT_FN: OnceLock<DistanceFn> = OnceLock::new();
static L2_SQUARED_FN: OnceLock<DistanceFn> = OnceLock::new();

/// Which instruction set the dispatcher picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdLevel {
    /// 512-bit wide path, 16 `f32` lanes.
    Avx512,
    /// 256-bit wide path, 8 `f32` lanes.
    Avx2,
    /// Portable scalar fallback.
    Scalar,
}

impl SimdLevel {
    fn from_override(o: SimdOverride) -> Option<Self> {
        match o {
            SimdOverride::Auto => None,
            SimdOverride::Avx512 => Some(Self::Avx512),
            SimdOverride::Avx2 => Some(Self::Avx2),
            SimdOverride::Scalar => Some(Self::Scalar),
        }
    }

    fn from_env() -> Option<Self> {
        match std::env::var("VDB_SIMD").ok()?.to_lowercase().as_str() {
            "avx512" => Some(Self::Avx512),
            "avx2" => Some(Self::Avx2),
            "scalar" => Some(Self::Scalar),
            _ => None,
        }
    }
}

/// CPU feature flags relevant to kernel selection, for diagnostics and `stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdFeatures {
    /// AVX-512 foundation instructions available.
    pub avx512f: bool,
    /// AVX2 instructions available.
    pub avx2: bool,
}

impl SimdFeatures {
    /// Detects available SIMD features on the current CPU.
    #[must_use]
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            Self {
                avx512f: is_x86_feature_detected!("avx512f"),
                avx2: is_x86_feature_detected!("avx2"),
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            Self {
                avx512f: false,
                avx2: false,
            }
        }
    }

    /// The widest level these features support.
    #[must_use]
    pub fn best_level(&self) -> SimdLevel {
        if self.avx512f {
            SimdLevel::Avx512
        } else if self.avx2 {
            SimdLevel::Avx2
        } else {
            SimdLevel::Scalar
        }
    }
}

fn resolve_level(requested: SimdOverride) -> SimdLevel {
    SimdLevel::from_env()
        .or_else(|| SimdLevel::from_override(requested))
        .unwrap_or_else(|| SimdFeatures::detect().best_level())
}

fn select_dot(level: SimdLevel) -> DistanceFn {
    match level {
        SimdLevel::Avx512 if avx512::available() => avx512::dot_avx512,
        SimdLevel::Avx2 | SimdLevel::Avx512 if avx2::available() => avx2::dot_avx2,
        _ => dot_scalar,
    }
}

fn select_l2_squared(level: SimdLevel) -> DistanceFn {
    match level {
        SimdLevel::Avx512 if avx512::available() => avx512::l2_squared_avx512,
        SimdLevel::Avx2 | SimdLevel::Avx512 if avx2::available() => avx2::l2_squared_avx2,
        _ => l2_squared_scalar,
    }
}

fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    crate::distance::dot_scalar(a, b)
}

fn l2_squared_scalar(a: &[f32], b: &[f32]) -> f32 {
    crate::distance::l2_squared_scalar(a, b)
}

/// Dispatches a dot product through the process-wide cached kernel.
///
/// The first call on a process initializes the dispatch table according to
/// `override_hint` (normally the database's `simd_override` config, or
/// `Auto` to let CPU probing decide); subsequent calls reuse the cached
/// function pointer regardless of the hint passed.
#[must_use]
pub fn dot_dispatched(a: &[f32], b: &[f32], override_hint: SimdOverride) -> f32 {
    let f = *DOT_FN.get_or_init(|| select_dot(resolve_level(override_hint)));
    f(a, b)
}

/// Dispatches squared L2 distance through the process-wide cached kernel.
#[must_use]
pub fn l2_squared_dispatched(a: &[f32], b: &[f32], override_hint: SimdOverride) -> f32 {
    let f = *L2_SQUARED_FN.get_or_init(|| select_l2_squared(resolve_level(override_hint)));
    f(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(dim: usize, seed: f32) -> Vec<f32> {
        (0..dim).map(|i| (seed + i as f32 * 0.37).sin()).collect()
    }

    fn rel_err(expected: f32, actual: f32) -> f32 {
        (expected - actual).abs() / expected.abs().max(1.0)
    }

    proptest! {
        #[test]
        fn dot_and_l2_agree_with_scalar_across_random_vectors(
            dim in 1usize..300,
            seed in 0u32..10_000,
        ) {
            let a = sample(dim, seed as f32 * 0.011);
            let b = sample(dim, seed as f32 * 0.023 + 1.0);

            let scalar_dot = crate::distance::dot_scalar(&a, &b);
            let scalar_l2 = crate::distance::l2_squared_scalar(&a, &b);

            prop_assert!(rel_err(scalar_dot, avx2::dot_avx2(&a, &b)) < 1e-4);
            prop_assert!(rel_err(scalar_l2, avx2::l2_squared_avx2(&a, &b)) < 1e-4);

            if avx512::available() {
                prop_assert!(rel_err(scalar_dot, avx512::dot_avx512(&a, &b)) < 1e-4);
                prop_assert!(rel_err(scalar_l2, avx512::l2_squared_avx512(&a, &b)) < 1e-4);
            }
        }
    }

    #[test]
    fn avx2_agrees_with_scalar() {
        let a = sample(257, 0.0);
        let b = sample(257, 1.0);
        let scalar = crate::distance::dot_scalar(&a, &b);
        let simd = avx2::dot_avx2(&a, &b);
        let rel = (scalar - simd).abs() / scalar.abs().max(1.0);
        assert!(rel < 1e-5, "rel error {rel}");
    }

    #[test]
    fn avx512_agrees_with_scalar_when_available() {
        if !avx512::available() {
            return;
        }
        let a = sample(129, 2.0);
        let b = sample(129, 3.0);
        let scalar = crate::distance::l2_squared_scalar(&a, &b);
        let simd = avx512::l2_squared_avx512(&a, &b);
        let rel = (scalar - simd).abs() / scalar.abs().max(1.0);
        assert!(rel < 1e-5, "rel error {rel}");
    }

    #[test]
    fn features_best_level_is_consistent() {
        let f = SimdFeatures::detect();
        if f.avx512f {
            assert_eq!(f.best_level(), SimdLevel::Avx512);
        } else if f.avx2 {
            assert_eq!(f.best_level(), SimdLevel::Avx2);
        } else {
            assert_eq!(f.best_level(), SimdLevel::Scalar);
        }
    }
}
