//! Frame loudness in dBFS
//!
//! RMS amplitude relative to i16 full scale, converted to decibels.

use crate::audio_buffer::AudioSample;

/// Lowest level ever reported; also returned for empty frames
pub const DBFS_FLOOR: f32 = -120.0;

const EPSILON: f64 = 1e-12;
const FULL_SCALE: f64 = 32768.0;

/// Root-mean-square amplitude normalized to [0, 1]
pub fn rms(samples: &[AudioSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / FULL_SCALE;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64 + EPSILON).sqrt()
}

/// Loudness of a frame in dBFS, floored at [`DBFS_FLOOR`]
pub fn rms_dbfs(samples: &[AudioSample]) -> f32 {
    if samples.is_empty() {
        return DBFS_FLOOR;
    }

    let dbfs = 20.0 * (rms(samples) + EPSILON).log10();
    (dbfs as f32).max(DBFS_FLOOR)
}
