//! Sample format utilities and sample rate conversion.
//!
//! - Sample access over raw byte buffers (16-bit, native endian)
//! - f32 ↔ i16 conversion for backends that deliver float samples
//! - Streaming sample rate conversion ([`Resampler`])

mod convert;
mod resample;

pub use convert::{bytes_to_i16, f32_to_i16, i16_to_bytes, i16_to_f32, read_i16, write_i16};
pub use resample::{Resampler, HEADROOM_FRAMES};
