//! One period of mono 16-bit PCM.

/// A fixed-length block of mono `i16` samples.
///
/// The sample storage is never resized after construction, so the length
/// recorded when the block was formed is the length every reader sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    samples: Box<[i16]>,
}

impl AudioBlock {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    /// A silent block of `len` samples, used as a reusable pop target.
    pub fn zeroed(len: usize) -> Self {
        Self {
            samples: vec![0; len].into_boxed_slice(),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// In-place write access for the consumer's allocation-free pop.
    pub(crate) fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }
}

impl From<Vec<i16>> for AudioBlock {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

impl AsRef<[i16]> for AudioBlock {
    fn as_ref(&self) -> &[i16] {
        self.samples()
    }
}

#[cfg(test)]
mod tests {
    use super::AudioBlock;

    #[test]
    fn zeroed_block_has_requested_length() {
        let block = AudioBlock::zeroed(512);
        assert_eq!(block.len(), 512);
        assert!(block.samples().iter().all(|&s| s == 0));
    }

    #[test]
    fn in_place_writes_keep_the_length() {
        let mut block = AudioBlock::zeroed(2);
        block.samples_mut().copy_from_slice(&[1, 2]);
        assert_eq!(block.samples(), &[1, 2]);
        assert_eq!(block.len(), 2);
    }
}
