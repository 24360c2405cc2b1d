pub mod csv_helpers;
pub mod simd_helpers;
