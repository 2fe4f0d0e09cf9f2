//! Sample access over raw PCM bytes.
//!
//! Buffers carry samples in native byte order.

/// Reads the `index`-th 16-bit sample from `bytes`.
#[inline]
pub fn read_i16(bytes: &[u8], index: usize) -> i16 {
    let at = index * 2;
    i16::from_ne_bytes([bytes[at], bytes[at + 1]])
}

/// Writes `sample` as the `index`-th 16-bit sample of `bytes`.
#[inline]
pub fn write_i16(bytes: &mut [u8], index: usize, sample: i16) {
    let at = index * 2;
    bytes[at..at + 2].copy_from_slice(&sample.to_ne_bytes());
}

/// Copies 16-bit samples into a byte buffer.
pub fn i16_to_bytes(samples: &[i16], bytes: &mut [u8]) {
    for (chunk, sample) in bytes.chunks_exact_mut(2).zip(samples) {
        chunk.copy_from_slice(&sample.to_ne_bytes());
    }
}

/// Collects the 16-bit samples of a byte buffer.
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
        .collect()
}

/// Converts f32 samples to i16.
///
/// Input should be in the range [-1.0, 1.0]. Values outside this range are
/// clamped. Scales by 32767 so that -1.0 maps to -32767.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts i16 samples to f32 in the range [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_i16() {
        let mut bytes = [0u8; 6];
        write_i16(&mut bytes, 1, -1234);
        write_i16(&mut bytes, 2, 32767);
        assert_eq!(read_i16(&bytes, 0), 0);
        assert_eq!(read_i16(&bytes, 1), -1234);
        assert_eq!(read_i16(&bytes, 2), 32767);
    }

    #[test]
    fn test_i16_bytes_conversion() {
        let samples = [1i16, -2, 300];
        let mut bytes = [0u8; 6];
        i16_to_bytes(&samples, &mut bytes);
        assert_eq!(bytes_to_i16(&bytes), samples);
    }

    #[test]
    fn test_f32_to_i16_clamping() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_i16_to_f32_range() {
        assert!((i16_to_f32(32767) - 0.99997).abs() < 0.001);
        assert!((i16_to_f32(-32768) + 1.0).abs() < f32::EPSILON);
    }
}
