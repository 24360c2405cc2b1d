//! Sum kernels used by the aggregation engine.
//!
//! On x86_64 with AVX2 the sums run four lanes at a time; everywhere else
//! (and on CPUs without AVX2) a scalar loop is used. Integer sums are exact:
//! `None` means the total does not fit in an i64, on every path.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::{
    __m256i, _mm256_add_epi64, _mm256_add_pd, _mm256_and_si256, _mm256_castsi256_pd,
    _mm256_loadu_pd, _mm256_loadu_si256, _mm256_movemask_pd, _mm256_or_si256,
    _mm256_setzero_pd, _mm256_setzero_si256, _mm256_storeu_pd, _mm256_storeu_si256,
    _mm256_xor_si256,
};

/// Sum of an i64 slice, `None` on overflow
pub fn sum_i64(values: &[i64]) -> Option<i64> {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            // a lane that overflowed is redone exactly
            if let Some(sum) = unsafe { sum_i64_avx2(values) } {
                return Some(sum);
            }
        }
    }
    sum_i64_scalar(values)
}

/// Sum of an f64 slice
pub fn sum_f64(values: &[f64]) -> f64 {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { sum_f64_avx2(values) };
        }
    }
    values.iter().sum()
}

fn sum_i64_scalar(values: &[i64]) -> Option<i64> {
    let total: i128 = values.iter().map(|&v| v as i128).sum();
    i64::try_from(total).ok()
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn sum_i64_avx2(values: &[i64]) -> Option<i64> {
    const LANES: usize = 4; // __m256i holds 4 i64s
    let chunks = values.chunks_exact(LANES);
    let remainder = chunks.remainder();

    let mut lanes = [0i64; LANES];
    let overflowed = unsafe {
        let mut sum = _mm256_setzero_si256();
        let mut overflow = _mm256_setzero_si256();
        for chunk in chunks {
            let v = _mm256_loadu_si256(chunk.as_ptr() as *const __m256i);
            let next = _mm256_add_epi64(sum, v);
            // sign bit set when both operands share a sign the result lacks
            let flags =
                _mm256_and_si256(_mm256_xor_si256(sum, next), _mm256_xor_si256(v, next));
            overflow = _mm256_or_si256(overflow, flags);
            sum = next;
        }
        _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, sum);
        _mm256_movemask_pd(_mm256_castsi256_pd(overflow)) != 0
    };
    if overflowed {
        return None;
    }

    sum_i64_scalar(&lanes)?.checked_add(sum_i64_scalar(remainder)?)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn sum_f64_avx2(values: &[f64]) -> f64 {
    const LANES: usize = 4; // __m256d holds 4 f64s
    let chunks = values.chunks_exact(LANES);
    let remainder = chunks.remainder();

    let mut lanes = [0f64; LANES];
    unsafe {
        let mut sum = _mm256_setzero_pd();
        for chunk in chunks {
            let v = _mm256_loadu_pd(chunk.as_ptr());
            sum = _mm256_add_pd(sum, v);
        }
        _mm256_storeu_pd(lanes.as_mut_ptr(), sum);
    }

    lanes.iter().sum::<f64>() + remainder.iter().sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_i64_matches_scalar() {
        let values: Vec<i64> = (1..=1001).collect();
        assert_eq!(sum_i64(&values), Some(501_501));
        assert_eq!(sum_i64_scalar(&values), Some(501_501));
        assert_eq!(sum_i64(&[]), Some(0));
        assert_eq!(sum_i64(&[-3, 5, 7]), Some(9));
    }

    #[test]
    fn test_sum_i64_overflow() {
        assert_eq!(sum_i64(&[i64::MAX, 1]), None);
        assert_eq!(sum_i64(&[i64::MIN, -1]), None);
        // lanes overflow on the way but the total fits
        let mut values = vec![i64::MAX, 0, 0, 0, 1, 0, 0, 0, -1, 0, 0, 0];
        assert_eq!(sum_i64(&values), Some(i64::MAX));
        values.extend([i64::MAX; 8]);
        assert_eq!(sum_i64(&values), None);
    }

    #[test]
    fn test_sum_f64_small_inputs() {
        assert_eq!(sum_f64(&[]), 0.0);
        assert_eq!(sum_f64(&[10.0, 5.0]), 15.0);
        assert_eq!(sum_f64(&[0.5; 9]), 4.5);
    }
}
