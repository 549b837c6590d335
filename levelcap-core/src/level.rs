//! Loudness measurement over PCM blocks.
//!
//! ## RMS contract
//!
//! For a block of `n` `i16` samples: normalize each sample by `1 / 32768`,
//! accumulate the squares in `f64`, divide by `n` (the length of the block
//! actually measured), take the square root. An empty block measures `0.0`.

/// Normalization factor for signed 16-bit PCM.
pub const PCM_SCALE: f64 = 1.0 / 32_768.0;

/// Floor used when converting silence to decibels.
pub const DBFS_FLOOR: f64 = -120.0;

/// Map one `i16` sample into `[-1.0, 1.0)`.
#[inline]
pub fn normalize_sample(sample: i16) -> f32 {
    (sample as f64 * PCM_SCALE) as f32
}

/// Write the normalized form of `samples` into `out`, reusing its allocation.
pub fn normalize_into(samples: &[i16], out: &mut Vec<f32>) {
    out.clear();
    out.extend(samples.iter().map(|&s| normalize_sample(s)));
}

/// Root-mean-square of `samples` on the normalized scale.
pub fn compute_rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 * PCM_SCALE;
            x * x
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Express a linear RMS value in dBFS, clamped at [`DBFS_FLOOR`].
pub fn rms_to_dbfs(rms: f64) -> f64 {
    if rms <= 0.0 {
        return DBFS_FLOOR;
    }
    (20.0 * rms.log10()).max(DBFS_FLOOR)
}
