//! Application-side streams.
//!
//! A stream is one logical channel set routed through a pump. It is created
//! by the application, registered with exactly one pump, then started and
//! stopped any number of times. Three front-ends exist per direction:
//!
//! - **provider**: the application supplies a [`BufferProvider`] that the
//!   pump thread calls directly
//! - **adapted**: the application calls blocking `read`/`write`; a
//!   [`BufferAdaptor`](crate::BufferAdaptor) hands its buffer to the pump
//!   thread without copying
//! - **buffered**: the application calls `read`/`write` against a
//!   [`MonoPipe`](crate::MonoPipe) that decouples it from the pump thread
//!
//! When the stream's rate differs from the pump's, the pump attaches a
//! [`Resampler`] at registration and the stream converts between rates on
//! the pump thread.

mod input;
mod output;

pub use input::InStream;
pub use output::OutStream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::buffer::Scratch;
use crate::format::Resampler;
use crate::{AudioError, PcmParams, SlotMap};

/// The pump side of a registration, as seen by a stream.
pub(crate) trait PumpHandle: Send + Sync {
    /// Counts one more started stream, opening the port on the first.
    fn open(&self) -> Result<(), AudioError>;

    /// Counts one less started stream, closing the port on the last.
    fn close(&self) -> Result<(), AudioError>;

    fn name(&self) -> &str;
}

/// State common to capture and playback streams.
pub(crate) struct StreamCore {
    params: PcmParams,
    map: SlotMap,
    started: AtomicBool,
    /// Serializes start and stop.
    transition: Mutex<()>,
    pump: Mutex<Option<Weak<dyn PumpHandle>>>,
    resampler: Mutex<Option<Resampler>>,
    rsmp_buf: Scratch,
}

impl StreamCore {
    pub fn new(params: PcmParams, map: SlotMap) -> Self {
        Self {
            params,
            map,
            started: AtomicBool::new(false),
            transition: Mutex::new(()),
            pump: Mutex::new(None),
            resampler: Mutex::new(None),
            rsmp_buf: Scratch::new(),
        }
    }

    pub fn params(&self) -> PcmParams {
        self.params
    }

    pub fn map(&self) -> &SlotMap {
        &self.map
    }

    /// Validates the params and that `stream_mask` fits the stream.
    pub fn init_check(&self, stream_mask: u32) -> Result<(), AudioError> {
        self.params.check_block()?;
        match self.params.sample_bits {
            16 | 24 | 32 => {}
            bits => return Err(AudioError::unsupported(format!("{bits}-bit samples"))),
        }
        if !self.map.is_valid() {
            return Err(AudioError::InvalidSlotMap);
        }
        if stream_mask & !self.params.channel_mask() != 0 {
            return Err(AudioError::ChannelOutOfRange {
                mask: stream_mask,
                channels: self.params.channels,
            });
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn check_started(&self) -> Result<(), AudioError> {
        if self.is_started() {
            Ok(())
        } else {
            Err(AudioError::NotStarted)
        }
    }

    pub fn pump(&self) -> Option<Arc<dyn PumpHandle>> {
        self.pump.lock().as_ref().and_then(Weak::upgrade)
    }

    #[cfg(test)]
    pub fn is_bound(&self) -> bool {
        self.pump().is_some()
    }

    /// Points the stream at `pump`; fails if it already points at a live one.
    ///
    /// A stream left started by a dropped pump is refused, and a resampler
    /// left over from a dropped pump is discarded.
    pub fn bind(&self, pump: Weak<dyn PumpHandle>) -> Result<(), AudioError> {
        {
            let mut current = self.pump.lock();
            if current.as_ref().is_some_and(|p| p.strong_count() > 0) {
                return Err(AudioError::AlreadyRegistered);
            }
            if self.is_started() {
                return Err(AudioError::StillStarted);
            }
            *current = Some(pump);
        }
        self.detach_resampler();
        Ok(())
    }

    pub fn unbind(&self) {
        self.pump.lock().take();
    }

    /// Installs a resampler and sizes the intermediate buffer for `frames`.
    pub fn attach_resampler(&self, resampler: Resampler, frames: usize) -> Result<(), AudioError> {
        resampler.init_check()?;
        self.rsmp_buf.reserve(frames * self.params.frame_size())?;
        *self.resampler.lock() = Some(resampler);
        Ok(())
    }

    pub fn detach_resampler(&self) {
        if self.resampler.lock().take().is_some() {
            self.rsmp_buf.clear();
        }
    }

    pub fn has_resampler(&self) -> bool {
        self.resampler.lock().is_some()
    }

    pub fn resampler(&self) -> MutexGuard<'_, Option<Resampler>> {
        self.resampler.lock()
    }

    pub fn rsmp_buf(&self) -> &Scratch {
        &self.rsmp_buf
    }

    /// Starts the stream: runs `prepare`, then opens the pump.
    pub fn start(&self, prepare: impl FnOnce()) -> Result<(), AudioError> {
        let _transition = self.transition.lock();
        if self.is_started() {
            return Err(AudioError::AlreadyStarted);
        }
        let pump = self.pump().ok_or(AudioError::NotRegistered)?;
        prepare();
        pump.open()?;
        self.started.store(true, Ordering::SeqCst);
        tracing::debug!(pump = pump.name(), "stream started");
        Ok(())
    }

    /// Stops the stream.
    ///
    /// `quiesce` runs first, without any lock held, to unblock an
    /// application thread stuck in `read`/`write`. `cleanup` runs once the
    /// pump has been closed.
    pub fn stop(&self, quiesce: impl FnOnce(), cleanup: impl FnOnce()) -> Result<(), AudioError> {
        quiesce();
        let _transition = self.transition.lock();
        if !self.is_started() {
            return Err(AudioError::NotStarted);
        }
        self.started.store(false, Ordering::SeqCst);
        let result = match self.pump() {
            Some(pump) => {
                tracing::debug!(pump = pump.name(), "stream stopping");
                pump.close()
            }
            None => Ok(()),
        };
        cleanup();
        result
    }

    /// Releases the pump reference of a stream dropped while started.
    pub fn release_on_drop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::error!("stream dropped while started");
        if let Some(pump) = self.pump() {
            if let Err(error) = pump.close() {
                tracing::warn!(%error, pump = pump.name(), "closing pump of dropped stream");
            }
        }
    }
}
