//! Physical port contract and the ports shipped with the crate.
//!
//! A port is a capture or playback device moving raw interleaved frames.
//! Pumps own their port and drive it from a dedicated thread; every other
//! call (`open`, `close`, `stop`) comes from control threads, so ports use
//! interior mutability and take `&self`.
//!
//! - [`NullInPort`]/[`NullOutPort`]: silence at real-time pace
//! - [`MockInPort`]/[`MockOutPort`]: scripted ports for tests
//! - `CpalInPort`/`CpalOutPort`: hardware ports (`cpal` feature)

#[cfg(feature = "cpal")]
mod cpal;
mod mock;
mod null;

#[cfg(feature = "cpal")]
pub use self::cpal::{CpalInPort, CpalOutPort};
pub use mock::{MockInPort, MockOutPort};
pub use null::{NullInPort, NullOutPort};

use crate::{AudioError, PcmParams};

/// Capabilities shared by capture and playback ports.
pub trait PcmPort: Send + Sync {
    /// Human-readable port name, used in logs and pump names.
    fn name(&self) -> &str;

    /// Sound card index.
    fn card_id(&self) -> u32 {
        0
    }

    /// Device index on the card.
    fn port_id(&self) -> u32 {
        0
    }

    /// Opens the port with the given frame shape.
    ///
    /// Fails with [`AudioError::PortBusy`] if the port is already open.
    fn open(&self, params: &PcmParams) -> Result<(), AudioError>;

    /// Closes the port. Closing a closed port is a no-op.
    fn close(&self) -> Result<(), AudioError>;

    /// Returns `true` if the port is open.
    fn is_open(&self) -> bool;

    /// Starts (or restarts after [`stop`](Self::stop)) frame transfer.
    fn start(&self) -> Result<(), AudioError>;

    /// Stops frame transfer and unblocks any `read`/`write` in flight.
    fn stop(&self) -> Result<(), AudioError>;
}

/// Capture port.
pub trait PcmInPort: PcmPort {
    /// Reads up to `frames` frames into `buffer`, blocking for at most about
    /// one block. Returns the frames read; zero means nothing this time.
    fn read(&self, buffer: &mut [u8], frames: usize) -> Result<usize, AudioError>;
}

/// Playback port.
pub trait PcmOutPort: PcmPort {
    /// Writes up to `frames` frames from `buffer`, blocking for at most about
    /// one block. Returns the frames written; zero means nothing this time.
    fn write(&self, buffer: &[u8], frames: usize) -> Result<usize, AudioError>;
}

/// Bytes needed for `frames` frames of `params`, checked against `len`.
pub(crate) fn checked_bytes(
    port: &str,
    params: &PcmParams,
    len: usize,
    frames: usize,
) -> Result<usize, AudioError> {
    let bytes = params.frames_to_bytes(frames);
    if bytes > len {
        return Err(AudioError::port_io(
            port,
            format!("{frames} frames need {bytes} bytes, buffer has {len}"),
        ));
    }
    Ok(bytes)
}
