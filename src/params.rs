//! PCM stream shape.

use crate::AudioError;

/// Shape of a PCM stream: channel count, sample width, rate and block size.
///
/// 24-bit samples are carried in 4-byte containers, so [`sample_size`]
/// reports 4 for both 24 and 32-bit streams.
///
/// [`sample_size`]: PcmParams::sample_size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PcmParams {
    /// Number of interleaved channels.
    pub channels: u32,
    /// Bits per sample (8, 16, 24 or 32).
    pub sample_bits: u32,
    /// Frames per second.
    pub sample_rate: u32,
    /// Block size in frames.
    pub frame_count: usize,
}

impl PcmParams {
    /// Creates params from their four components.
    #[must_use]
    pub const fn new(channels: u32, sample_bits: u32, sample_rate: u32, frame_count: usize) -> Self {
        Self {
            channels,
            sample_bits,
            sample_rate,
            frame_count,
        }
    }

    /// Returns `true` if channels, sample width and rate are all non-zero.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.channels != 0 && self.sample_bits != 0 && self.sample_rate != 0
    }

    /// Returns `Ok` if the params are valid and describe a non-empty block.
    pub fn check_block(&self) -> Result<(), AudioError> {
        if !self.is_valid() {
            return Err(AudioError::invalid_params(format!(
                "{} channels, {} bits, {} Hz",
                self.channels, self.sample_bits, self.sample_rate
            )));
        }
        if self.frame_count == 0 {
            return Err(AudioError::invalid_params("frame count is zero"));
        }
        Ok(())
    }

    /// Bytes of storage per sample.
    #[must_use]
    pub fn sample_size(&self) -> usize {
        match self.sample_bits {
            24 => 4,
            bits => (bits / 8) as usize,
        }
    }

    /// Bytes per frame.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.sample_size() * self.channels as usize
    }

    /// Bytes per block.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.frame_size() * self.frame_count
    }

    /// Samples per block, across all channels.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.channels as usize * self.frame_count
    }

    /// Converts a frame count to bytes.
    #[must_use]
    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.frame_size()
    }

    /// Converts a byte count to whole frames.
    #[must_use]
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        match self.frame_size() {
            0 => 0,
            size => bytes / size,
        }
    }

    /// Mask covering every channel of this stream.
    #[must_use]
    pub fn channel_mask(&self) -> u32 {
        match self.channels {
            0 => 0,
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }

    /// Duration of `frames` at this rate, in microseconds.
    #[must_use]
    pub fn frames_to_micros(&self, frames: usize) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        frames as u64 * 1_000_000 / u64::from(self.sample_rate)
    }

    /// Same params with a different channel count.
    #[must_use]
    pub fn with_channels(self, channels: u32) -> Self {
        Self { channels, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_validity() {
        assert!(PcmParams::new(2, 16, 48000, 256).is_valid());
        assert!(!PcmParams::new(0, 16, 48000, 256).is_valid());
        assert!(!PcmParams::new(2, 0, 48000, 256).is_valid());
        assert!(!PcmParams::new(2, 16, 0, 256).is_valid());
        // frame count does not affect validity
        assert!(PcmParams::new(2, 16, 48000, 0).is_valid());
        assert!(PcmParams::new(2, 16, 48000, 0).check_block().is_err());
    }

    #[test]
    fn test_params_sizes() {
        let params = PcmParams::new(2, 16, 48000, 256);
        assert_eq!(params.sample_size(), 2);
        assert_eq!(params.frame_size(), 4);
        assert_eq!(params.buffer_size(), 1024);
        assert_eq!(params.sample_count(), 512);
        assert_eq!(params.frames_to_bytes(10), 40);
        assert_eq!(params.bytes_to_frames(41), 10);
    }

    #[test]
    fn test_params_24bit_container() {
        let params = PcmParams::new(4, 24, 48000, 64);
        assert_eq!(params.sample_size(), 4);
        assert_eq!(params.frame_size(), 16);
    }

    #[test]
    fn test_params_channel_mask() {
        assert_eq!(PcmParams::new(2, 16, 48000, 1).channel_mask(), 0b11);
        assert_eq!(PcmParams::new(32, 16, 48000, 1).channel_mask(), u32::MAX);
    }

    #[test]
    fn test_params_duration() {
        let params = PcmParams::new(1, 16, 48000, 480);
        assert_eq!(params.frames_to_micros(480), 10_000);
    }
}
