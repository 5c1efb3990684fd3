//! Q16 fixed-point quantization.
//!
//! Guest kernels compute in integers only. Weights become i8 with one shared
//! Q16 scale per tensor; biases and thresholds become i32 carrying Q16
//! directly. Rounding is ties-to-even throughout so a re-run of `convert`
//! over the same floats reproduces the blob byte for byte.

/// Fixed-point one: scales and Q16 values are numerators over this.
pub const Q16: i64 = 1 << 16;

/// Quantize floats to i8 with a Q16 scale.
///
/// When no scale is given, one is derived so the largest magnitude maps to
/// 127, clamped to at least 1. An all-zero tensor gets the identity scale.
pub fn quantize_i8(values: &[f64], scale_q16: Option<i64>) -> (Vec<i8>, i64) {
    if values.is_empty() {
        return (Vec::new(), Q16);
    }

    let scale_q16 = scale_q16.unwrap_or_else(|| {
        let max_abs = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if max_abs == 0.0 {
            Q16
        } else {
            let scale_real = max_abs / 127.0;
            ((scale_real * Q16 as f64).round_ties_even() as i64).max(1)
        }
    });

    let mut scale_real = scale_q16 as f64 / Q16 as f64;
    if scale_real == 0.0 {
        scale_real = 1.0;
    }

    let q = values
        .iter()
        .map(|v| (v / scale_real).round_ties_even().clamp(-128.0, 127.0) as i8)
        .collect();
    (q, scale_q16)
}

/// Convert floats to i32 Q16 fixed point.
pub fn to_i32_q16(values: &[f64]) -> Vec<i32> {
    values
        .iter()
        .map(|v| {
            (v * Q16 as f64)
                .round_ties_even()
                .clamp(i32::MIN as f64, i32::MAX as f64) as i32
        })
        .collect()
}

/// Recover approximate floats from i8 values and their Q16 scale.
pub fn dequantize_i8(values: &[i8], scale_q16: i64) -> Vec<f64> {
    let scale_real = scale_q16 as f64 / Q16 as f64;
    values.iter().map(|&q| q as f64 * scale_real).collect()
}
