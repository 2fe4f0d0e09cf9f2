//! Port pumps.
//!
//! A pump owns one port and the routing engine between that port and its
//! registered streams. [`PcmReader`] reads capture blocks and unmerges them
//! into [`InStream`](crate::InStream)s; [`PcmWriter`] merges
//! [`OutStream`](crate::OutStream)s into playback blocks.
//!
//! Streams count as pump users while started. The first user opens and
//! starts the port and spawns the pump thread; the last user stops the
//! thread and closes the port. A port error ends the thread: every stream
//! on the pump must be stopped before the port is opened again.

mod reader;
mod stats;
mod worker;
mod writer;

pub use reader::PcmReader;
pub use stats::PumpStats;
pub use writer::PcmWriter;

use crate::format::Resampler;
use crate::{AudioError, PcmParams};

use worker::Worker;

/// Users and thread of a pump, guarded by the pump lock.
#[derive(Default)]
struct PumpState {
    users: usize,
    worker: Option<Worker>,
}

/// Resampler from the pump's rate to a capture stream's rate, if they differ.
pub(crate) fn capture_resampler(
    pump: PcmParams,
    stream: PcmParams,
    quality: u32,
) -> Option<Result<Resampler, AudioError>> {
    rate_converter(pump, stream).map(|checked| {
        checked.map(|()| Resampler::with_quality(pump.with_channels(stream.channels), stream, quality))
    })
}

/// Resampler from a playback stream's rate to the pump's rate, if they differ.
pub(crate) fn playback_resampler(
    pump: PcmParams,
    stream: PcmParams,
    quality: u32,
) -> Option<Result<Resampler, AudioError>> {
    rate_converter(pump, stream).map(|checked| {
        checked.map(|()| Resampler::with_quality(stream, pump.with_channels(stream.channels), quality))
    })
}

fn rate_converter(pump: PcmParams, stream: PcmParams) -> Option<Result<(), AudioError>> {
    if pump.sample_rate == stream.sample_rate {
        return None;
    }
    if pump.sample_bits != 16 || stream.sample_bits != 16 {
        return Some(Err(AudioError::incompatible(format!(
            "{} Hz {}-bit stream on {} Hz pump: resampling needs 16-bit samples",
            stream.sample_rate, stream.sample_bits, pump.sample_rate
        ))));
    }
    Some(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_rates_need_no_resampler() {
        let pump = PcmParams::new(2, 16, 48000, 256);
        assert!(capture_resampler(pump, PcmParams::new(1, 16, 48000, 256), 4).is_none());
    }

    #[test]
    fn test_resampler_direction() {
        let pump = PcmParams::new(2, 16, 48000, 240);
        let stream = PcmParams::new(1, 16, 16000, 80);

        let capture = capture_resampler(pump, stream, 4).unwrap().unwrap();
        assert_eq!(capture.in_params().sample_rate, 48000);
        assert_eq!(capture.in_params().channels, 1);
        assert_eq!(capture.out_params(), stream);

        let playback = playback_resampler(pump, stream, 4).unwrap().unwrap();
        assert_eq!(playback.in_params(), stream);
        assert_eq!(playback.out_params().sample_rate, 48000);
    }

    #[test]
    fn test_wide_samples_cannot_resample() {
        let pump = PcmParams::new(2, 24, 48000, 256);
        let stream = PcmParams::new(2, 24, 44100, 256);
        assert!(matches!(
            playback_resampler(pump, stream, 4),
            Some(Err(AudioError::Incompatible { .. }))
        ));
    }
}
