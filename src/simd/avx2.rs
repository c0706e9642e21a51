//! 256-bit wide kernel (8 `f32` lanes), built on the portable `wide` crate.
//!
//! `wide::f32x8` compiles to AVX2/SSE on `x86_64`, NEON on `aarch64`, and a
//! scalar loop elsewhere, so this module doubles as the fallback for any
//! platform that isn't `x86_64` with AVX-512.

use wide::f32x8;

const LANES: usize = 8;

/// Whether this 8-lane path is usable on the current CPU. `wide` always
/// produces correct results, so this is `true` everywhere; kept as a
/// function (rather than a `const true`) to mirror the AVX-512 module's
/// shape and keep the dispatch table in [`super`] uniform.
pub fn available() -> bool {
    true
}

/// Dot product over 8-wide lanes, full chunks first then a scalar remainder.
pub fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let chunks = a.len() / LANES;
    let mut acc = f32x8::ZERO;
    for i in 0..chunks {
        let off = i * LANES;
        let va = f32x8::from(&a[off..off + LANES]);
        let vb = f32x8::from(&b[off..off + LANES]);
        acc = va.mul_add(vb, acc);
    }
    let mut result = acc.reduce_add();
    let base = chunks * LANES;
    for i in base..a.len() {
        result += a[i] * b[i];
    }
    result
}

/// Squared L2 distance over 8-wide lanes, full chunks first then a scalar remainder.
pub fn l2_squared_avx2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let chunks = a.len() / LANES;
    let mut acc = f32x8::ZERO;
    for i in 0..chunks {
        let off = i * LANES;
        let va = f32x8::from(&a[off..off + LANES]);
        let vb = f32x8::from(&b[off..off + LANES]);
        let diff = va - vb;
        acc = diff.mul_add(diff, acc);
    }
    let mut result = acc.reduce_add();
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
    fn dot_handles_non_multiple_of_lanes() {
        let a: Vec<f32> = (0..19).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..19).map(|i| (i as f32) * 0.5).collect();
        let expect: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((dot_avx2(&a, &b) - expect).abs() < 1e-3);
    }

    #[test]
    fn l2_squared_handles_exact_multiple_of_lanes() {
        let a = vec![1.0_f32; 16];
        let b = vec![0.0_f32; 16];
        assert!((l2_squared_avx2(&a, &b) - 16.0).abs() < 1e-5);
    }
}
