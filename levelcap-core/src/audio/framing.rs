//! Re-framing of variable-size callback buffers into exact block-length periods.
//!
//! Device backends do not always honour a requested buffer size, so the
//! callback may see 441 frames, then 480, then 1024. `PeriodFramer` keeps a
//! pre-allocated scratch block and emits it every time it fills up.
//! Nothing here allocates after construction, so it is safe to call from
//! the audio callback.

/// Scale used to convert `f32` samples into `i16`.
const F32_TO_I16: f32 = 32_767.0;

pub struct PeriodFramer {
    scratch: Box<[i16]>,
    filled: usize,
}

impl PeriodFramer {
    pub fn new(block_len: usize) -> Self {
        Self {
            scratch: vec![0; block_len].into_boxed_slice(),
            filled: 0,
        }
    }

    pub fn block_len(&self) -> usize {
        self.scratch.len()
    }

    /// Samples currently waiting for the next full period.
    pub fn pending(&self) -> usize {
        self.filled
    }

    /// Feed interleaved `i16` frames, keeping only channel 0.
    /// `emit` is called once per completed period.
    pub fn push_i16<F>(&mut self, data: &[i16], channels: usize, emit: F)
    where
        F: FnMut(&[i16]),
    {
        self.push_with(data.iter().step_by(channels.max(1)).copied(), emit);
    }

    /// Feed interleaved `f32` frames, keeping only channel 0 and converting
    /// with saturation to `i16`.
    pub fn push_f32<F>(&mut self, data: &[f32], channels: usize, emit: F)
    where
        F: FnMut(&[i16]),
    {
        self.push_with(
            data.iter().step_by(channels.max(1)).map(|&s| f32_to_i16(s)),
            emit,
        );
    }

    fn push_with<I, F>(&mut self, samples: I, mut emit: F)
    where
        I: Iterator<Item = i16>,
        F: FnMut(&[i16]),
    {
        if self.scratch.is_empty() {
            return;
        }
        for sample in samples {
            self.scratch[self.filled] = sample;
            self.filled += 1;
            if self.filled == self.scratch.len() {
                emit(&self.scratch);
                self.filled = 0;
            }
        }
    }

    /// Forget any partial period (e.g. after a stream restart).
    pub fn reset(&mut self) {
        self.filled = 0;
    }
}

#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * F32_TO_I16) as i16
}
