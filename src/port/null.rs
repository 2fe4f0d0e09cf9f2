//! Ports that produce and consume silence at real-time pace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{checked_bytes, PcmInPort, PcmOutPort, PcmPort};
use crate::{AudioError, PcmParams};

/// Open/stop state shared by both null ports.
struct NullState {
    name: String,
    params: Mutex<Option<PcmParams>>,
    stopped: AtomicBool,
}

impl NullState {
    fn new(name: String) -> Self {
        Self {
            name,
            params: Mutex::new(None),
            stopped: AtomicBool::new(true),
        }
    }

    fn open(&self, params: &PcmParams) -> Result<(), AudioError> {
        params.check_block()?;
        let mut current = self.params.lock();
        if current.is_some() {
            return Err(AudioError::PortBusy {
                port: self.name.clone(),
            });
        }
        *current = Some(*params);
        self.stopped.store(false, Ordering::SeqCst);
        tracing::debug!(port = %self.name, ?params, "null port opened");
        Ok(())
    }

    fn close(&self) {
        if self.params.lock().take().is_some() {
            self.stopped.store(true, Ordering::SeqCst);
            tracing::debug!(port = %self.name, "null port closed");
        }
    }

    /// Sleeps for the play time of `frames` and returns the params in use.
    fn transfer(&self, len: usize, frames: usize) -> Result<(PcmParams, usize), AudioError> {
        let params = (*self.params.lock()).ok_or_else(|| AudioError::port_closed(&self.name))?;
        if self.stopped.load(Ordering::SeqCst) {
            return Ok((params, 0));
        }
        let bytes = checked_bytes(&self.name, &params, len, frames)?;
        thread::sleep(Duration::from_micros(params.frames_to_micros(frames)));
        Ok((params, bytes))
    }
}

/// Capture port that yields silence.
///
/// Every read sleeps for the duration of the frames requested, so a pump
/// driving it cycles at the configured rate.
pub struct NullInPort {
    state: NullState,
}

impl NullInPort {
    /// Creates a closed port named `"NullIn"`.
    pub fn new() -> Self {
        Self::with_name("NullIn")
    }

    /// Creates a closed port with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            state: NullState::new(name.into()),
        }
    }
}

impl Default for NullInPort {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmPort for NullInPort {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn open(&self, params: &PcmParams) -> Result<(), AudioError> {
        self.state.open(params)
    }

    fn close(&self) -> Result<(), AudioError> {
        self.state.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.params.lock().is_some()
    }

    fn start(&self) -> Result<(), AudioError> {
        self.state.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.state.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl PcmInPort for NullInPort {
    fn read(&self, buffer: &mut [u8], frames: usize) -> Result<usize, AudioError> {
        let (params, bytes) = self.state.transfer(buffer.len(), frames)?;
        buffer[..bytes].fill(0);
        Ok(params.bytes_to_frames(bytes))
    }
}

/// Playback port that discards everything written to it.
pub struct NullOutPort {
    state: NullState,
}

impl NullOutPort {
    /// Creates a closed port named `"NullOut"`.
    pub fn new() -> Self {
        Self::with_name("NullOut")
    }

    /// Creates a closed port with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            state: NullState::new(name.into()),
        }
    }
}

impl Default for NullOutPort {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmPort for NullOutPort {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn open(&self, params: &PcmParams) -> Result<(), AudioError> {
        self.state.open(params)
    }

    fn close(&self) -> Result<(), AudioError> {
        self.state.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.params.lock().is_some()
    }

    fn start(&self) -> Result<(), AudioError> {
        self.state.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.state.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl PcmOutPort for NullOutPort {
    fn write(&self, buffer: &[u8], frames: usize) -> Result<usize, AudioError> {
        let (params, bytes) = self.state.transfer(buffer.len(), frames)?;
        Ok(params.bytes_to_frames(bytes))
    }
}
