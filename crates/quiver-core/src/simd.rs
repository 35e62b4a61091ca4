//! SIMD-optimized distance kernels
//!
//! Provides explicit SIMD intrinsics for aarch64 (NEON) and x86_64 (AVX2),
//! with a scalar fallback that LLVM auto-vectorizes.
//!
//! All ranking in the engine uses **squared** L2: sqrt is monotonic, so
//! ordering by L2² equals ordering by L2 and the root is never taken.
//!
//! # Architecture Selection
//!
//! | Platform    | ISA      | Width           |
//! |-------------|----------|-----------------|
//! | aarch64     | NEON     | 128-bit (4×f32) |
//! | x86_64+AVX2 | AVX2+FMA | 256-bit (8×f32) |
//! | other       | scalar   | 1×f32           |
//!
//! Loads are unaligned: vector rows live in heap `Vec<f32>` storage with no
//! 32-byte alignment guarantee.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistanceError {
    #[error("dimension mismatch: left has {left} elements, right has {right}")]
    DimensionMismatch { left: usize, right: usize },
}

// ============================================================================
// aarch64 NEON intrinsics
// ============================================================================

/// NEON L2 distance squared: processes 4 floats per iteration
#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn l2_sq_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let n = a.len();
    let chunks = n / 4;
    let remainder = n % 4;

    let mut acc = vdupq_n_f32(0.0);

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = vld1q_f32(a_ptr.add(i * 4));
        let vb = vld1q_f32(b_ptr.add(i * 4));
        let diff = vsubq_f32(va, vb);
        acc = vfmaq_f32(acc, diff, diff); // acc += diff * diff
    }

    let mut sum = vaddvq_f32(acc); // horizontal add

    let tail_start = chunks * 4;
    for i in 0..remainder {
        let d = a[tail_start + i] - b[tail_start + i];
        sum += d * d;
    }

    sum
}

/// NEON inner product: processes 4 floats per iteration
#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn dot_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let n = a.len();
    let chunks = n / 4;
    let remainder = n % 4;

    let mut acc = vdupq_n_f32(0.0);

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = vld1q_f32(a_ptr.add(i * 4));
        let vb = vld1q_f32(b_ptr.add(i * 4));
        acc = vfmaq_f32(acc, va, vb); // acc += va * vb
    }

    let mut sum = vaddvq_f32(acc);

    let tail_start = chunks * 4;
    for i in 0..remainder {
        sum += a[tail_start + i] * b[tail_start + i];
    }

    sum
}

// ============================================================================
// x86_64 AVX2 intrinsics (runtime feature detection)
// ============================================================================

/// Horizontal sum of 8 floats → 1 float
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn hsum_avx2(acc: std::arch::x86_64::__m256) -> f32 {
    use std::arch::x86_64::*;

    let hi = _mm256_extractf128_ps(acc, 1);
    let lo = _mm256_castps256_ps128(acc);
    let sum128 = _mm_add_ps(lo, hi);
    let shuf = _mm_movehdup_ps(sum128);
    let sums = _mm_add_ps(sum128, shuf);
    let shuf2 = _mm_movehl_ps(sums, sums);
    let result = _mm_add_ss(sums, shuf2);
    _mm_cvtss_f32(result)
}

/// AVX2+FMA L2 distance squared: processes 8 floats per iteration
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn l2_sq_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 8;
    let remainder = n % 8;

    let mut acc = _mm256_setzero_ps();

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = _mm256_loadu_ps(a_ptr.add(i * 8));
        let vb = _mm256_loadu_ps(b_ptr.add(i * 8));
        let diff = _mm256_sub_ps(va, vb);
        acc = _mm256_fmadd_ps(diff, diff, acc); // acc += diff * diff
    }

    let mut sum = hsum_avx2(acc);

    let tail_start = chunks * 8;
    for i in 0..remainder {
        let d = a[tail_start + i] - b[tail_start + i];
        sum += d * d;
    }

    sum
}

/// AVX2+FMA inner product: processes 8 floats per iteration
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 8;
    let remainder = n % 8;

    let mut acc = _mm256_setzero_ps();

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = _mm256_loadu_ps(a_ptr.add(i * 8));
        let vb = _mm256_loadu_ps(b_ptr.add(i * 8));
        acc = _mm256_fmadd_ps(va, vb, acc); // acc += va * vb
    }

    let mut sum = hsum_avx2(acc);

    let tail_start = chunks * 8;
    for i in 0..remainder {
        sum += a[tail_start + i] * b[tail_start + i];
    }

    sum
}

// ============================================================================
// Scalar fallback (auto-vectorized by LLVM)
// ============================================================================

#[inline(always)]
fn l2_sq_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[inline(always)]
fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ============================================================================
// Crate-internal dispatch (unchecked hot path)
// ============================================================================

/// Squared L2 distance without a length check.
///
/// Callers guarantee `a.len() == b.len()`; inside the index loops that holds
/// by the dataset dimension invariant.
#[inline(always)]
pub(crate) fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector length mismatch");

    #[cfg(target_arch = "aarch64")]
    {
        // NEON is always available on aarch64.
        return unsafe { l2_sq_neon(a, b) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { l2_sq_avx2(a, b) };
        }
    }

    #[allow(unreachable_code)]
    l2_sq_scalar(a, b)
}

/// Inner product without a length check.
#[inline(always)]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector length mismatch");

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { dot_neon(a, b) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { dot_avx2(a, b) };
        }
    }

    #[allow(unreachable_code)]
    dot_scalar(a, b)
}

// ============================================================================
// Public checked API
// ============================================================================

/// Compute squared L2 (Euclidean) distance between two vectors
///
/// Returns ||a - b||² (no square root). Uses NEON on aarch64, AVX2+FMA on
/// x86_64, or a scalar fallback.
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> Result<f32, DistanceError> {
    if a.len() != b.len() {
        return Err(DistanceError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(l2_sq(a, b))
}

/// Compute the inner product of two vectors
#[inline]
pub fn ip_distance(a: &[f32], b: &[f32]) -> Result<f32, DistanceError> {
    if a.len() != b.len() {
        return Err(DistanceError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(dot(a, b))
}
