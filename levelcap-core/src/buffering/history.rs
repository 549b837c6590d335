//! Trailing window of normalized samples, owned by the consumer.

use std::collections::VecDeque;

use crate::error::{LevelcapError, Result};
use crate::level::normalize_sample;

/// Longest accepted history window.
pub const MAX_HISTORY_SECONDS: f32 = 3_600.0;

/// Samples reserved up front; the window grows on demand beyond this.
const INITIAL_RESERVE: usize = 1 << 16;

/// Rolling FIFO of normalized `f32` samples capped at a fixed duration.
///
/// After every append, the oldest samples are evicted until the length is
/// back within capacity. Eviction is strictly by age.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
    sample_rate: u32,
}

impl HistoryBuffer {
    /// A buffer holding at most `capacity` samples recorded at `sample_rate`.
    pub fn new(capacity: usize, sample_rate: u32) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(INITIAL_RESERVE)),
            capacity,
            sample_rate,
        }
    }

    /// A buffer sized for `seconds` of audio at `sample_rate`.
    ///
    /// # Errors
    /// `InvalidConfig` if `seconds` is not finite or lies outside
    /// `0..=MAX_HISTORY_SECONDS`.
    pub fn with_duration(sample_rate: u32, seconds: f32) -> Result<Self> {
        if !seconds.is_finite() || !(0.0..=MAX_HISTORY_SECONDS).contains(&seconds) {
            return Err(LevelcapError::InvalidConfig(format!(
                "history window must be between 0 and {MAX_HISTORY_SECONDS} s, got {seconds}"
            )));
        }
        let capacity = (f64::from(sample_rate) * f64::from(seconds)).round() as usize;
        Ok(Self::new(capacity, sample_rate))
    }

    /// Append normalized samples, then evict from the front down to capacity.
    pub fn append(&mut self, samples: &[f32]) {
        // Only the newest `capacity` samples of the batch can survive.
        let keep_from = samples.len().saturating_sub(self.capacity);
        self.samples.extend(&samples[keep_from..]);
        self.evict_overflow();
    }

    /// Append raw PCM, normalizing each sample by 1/32768.
    pub fn append_pcm(&mut self, samples: &[i16]) {
        let keep_from = samples.len().saturating_sub(self.capacity);
        self.samples
            .extend(samples[keep_from..].iter().map(|&s| normalize_sample(s)));
        self.evict_overflow();
    }

    fn evict_overflow(&mut self) {
        if self.samples.len() > self.capacity {
            let excess = self.samples.len() - self.capacity;
            self.samples.drain(..excess);
        }
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration of the buffered audio in milliseconds.
    pub fn duration_ms(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.samples.len() as f64 / self.sample_rate as f64 * 1000.0) as f32
    }

    /// Oldest-to-newest view of the window.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{HistoryBuffer, MAX_HISTORY_SECONDS};
    use crate::error::LevelcapError;
    use approx::assert_abs_diff_eq;

    #[test]
    fn keeps_the_newest_samples_in_order() {
        let mut history = HistoryBuffer::new(3, 48_000);
        history.append(&[0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![0.3, 0.4, 0.5]);
    }

    #[test]
    fn evicts_across_separate_appends() {
        let mut history = HistoryBuffer::new(3, 48_000);
        history.append(&[0.1, 0.2]);
        history.append(&[0.3]);
        history.append(&[0.4, 0.5]);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![0.3, 0.4, 0.5]);
        assert_eq!(history.size(), 3);
    }

    #[test]
    fn duration_follows_occupancy() {
        let mut history = HistoryBuffer::with_duration(16_000, 3.0).expect("history");
        assert_eq!(history.capacity(), 48_000);
        assert_eq!(history.duration_ms(), 0.0);

        history.append_pcm(&vec![0; 8_000]);
        assert_abs_diff_eq!(history.duration_ms(), 500.0, epsilon = 1e-3);

        history.append_pcm(&vec![0; 100_000]);
        assert_eq!(history.size(), 48_000);
        assert_abs_diff_eq!(history.duration_ms(), 3_000.0, epsilon = 1e-3);
    }

    #[test]
    fn pcm_is_normalized_by_32768() {
        let mut history = HistoryBuffer::new(4, 8_000);
        history.append_pcm(&[i16::MIN, 0, 16_384, i16::MAX]);
        let got: Vec<f32> = history.iter().collect();
        assert_eq!(got[0], -1.0);
        assert_eq!(got[1], 0.0);
        assert_eq!(got[2], 0.5);
        assert_abs_diff_eq!(got[3], 32_767.0 / 32_768.0, epsilon = 1e-7);
    }

    #[test]
    fn zero_capacity_never_holds_samples() {
        let mut history = HistoryBuffer::new(0, 8_000);
        history.append(&[0.5, 0.25]);
        assert!(history.is_empty());
    }

    #[test]
    fn oversized_window_is_rejected_not_allocated() {
        for seconds in [1e30, f32::INFINITY, f32::NAN, -1.0, MAX_HISTORY_SECONDS * 2.0] {
            assert!(
                matches!(
                    HistoryBuffer::with_duration(384_000, seconds),
                    Err(LevelcapError::InvalidConfig(_))
                ),
                "{seconds} s should be rejected"
            );
        }
    }

    #[test]
    fn longest_window_reserves_lazily() {
        let mut history =
            HistoryBuffer::with_duration(384_000, MAX_HISTORY_SECONDS).expect("history");
        assert_eq!(history.capacity(), 1_382_400_000);
        history.append_pcm(&[1_000; 4]);
        assert_eq!(history.size(), 4);
    }
}
