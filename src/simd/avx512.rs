//! 512-bit wide kernel (16 `f32` lanes), `x86_64` AVX-512F intrinsics.
//!
//! Callers must not invoke the `_avx512` functions unless [`available`]
//! returned `true` on this process; [`super::resolve_level`] only selects
//! this path after `is_x86_feature_detected!` has confirmed the feature, so
//! the `unsafe` blocks below never run on a CPU lacking AVX-512F.

const LANES: usize = 16;

/// Whether AVX-512F is present on this CPU.
pub fn available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("avx512f")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Dot product, 16-wide AVX-512 FMA accumulation then a scalar remainder.
///
/// # Panics
///
/// Panics (via `debug_assert`) if `a.len() != b.len()`.
pub fn dot_avx512(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: `available()` gates every call site in `super::select_dot`;
        // this function is only reached once `is_x86_feature_detected!("avx512f")`
        // has already returned true for the running process.
        unsafe { dot_avx512_impl(a, b) }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        crate::distance::dot_scalar(a, b)
    }
}

/// Squared L2 distance, 16-wide AVX-512 FMA accumulation then a scalar remainder.
///
/// # Panics
///
/// Panics (via `debug_assert`) if `a.len() != b.len()`.
pub fn l2_squared_avx512(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: see `dot_avx512`.
        unsafe { l2_squared_avx512_impl(a, b) }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        crate::distance::l2_squared_scalar(a, b)
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn dot_avx512_impl(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let chunks = a.len() / LANES;
    let mut acc = _mm512_setzero_ps();
    for i in 0..chunks {
        let off = i * LANES;
        let va = _mm512_loadu_ps(a.as_ptr().add(off));
        let vb = _mm512_loadu_ps(b.as_ptr().add(off));
        acc = _mm512_fmadd_ps(va, vb, acc);
    }

    let mut lanes = [0.0_f32; LANES];
    _mm512_storeu_ps(lanes.as_mut_ptr(), acc);
    let mut result: f32 = lanes.iter().sum();

    let base = chunks * LANES;
    for i in base..a.len() {
        result += a[i] * b[i];
    }
    result
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn l2_squared_avx512_impl(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let chunks = a.len() / LANES;
    let mut acc = _mm512_setzero_ps();
    for i in 0..chunks {
        let off = i * LANES;
        let va = _mm512_loadu_ps(a.as_ptr().add(off));
        let vb = _mm512_loadu_ps(b.as_ptr().add(off));
        let diff = _mm512_sub_ps(va, vb);
        acc = _mm512_fmadd_ps(diff, diff, acc);
    }

    let mut lanes = [0.0_f32; LANES];
    _mm512_storeu_ps(lanes.as_mut_ptr(), acc);
    let mut result: f32 = lanes.iter().sum();

    let base = chunks * LANES;
    for i in base..a.len() {
        let d = a[i] - b[i];
        result += d * d;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_agrees_with_scalar_when_available() {
        if !available() {
            return;
        }
        let a: Vec<f32> = (0..37).map(|i| i as f32 * 0.1).collect();
        let b: Vec<f32> = (0..37).map(|i| i as f32 * -0.2).collect();
        let expect: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((dot_avx512(&a, &b) - expect).abs() < 1e-2);
    }

    #[test]
    fn l2_squared_exact_multiple_of_lanes() {
        if !available() {
            return;
        }
        let a = vec![2.0_f32; 32];
        let b = vec![0.0_f32; 32];
        assert!((l2_squared_avx512(&a, &b) - 128.0).abs() < 1e-3);
    }
}
