//! Capture pump.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::stats::{PumpCounters, PumpStats};
use super::worker::Worker;
use super::{capture_resampler, PumpState};
use crate::buffer::Buffer;
use crate::event::{emit, RouteEvent};
use crate::pipeline::UnMerge;
use crate::port::PcmInPort;
use crate::stream::{InStream, PumpHandle};
use crate::{AudioError, PcmParams, PumpConfig};

/// What the pump thread needs; shared with it so the pump itself can be
/// dropped while the thread runs.
struct Shared {
    name: String,
    port: Arc<dyn PcmInPort>,
    params: PcmParams,
    engine: UnMerge,
    counters: PumpCounters,
    config: PumpConfig,
}

impl Shared {
    /// One capture cycle: read a block from the port, scatter it to streams.
    fn cycle(&self, block: &mut [u8]) -> Result<(), AudioError> {
        let frame_size = self.params.frame_size();
        let requested = self.params.frame_count;

        let frames = match self.port.read(block, requested) {
            Ok(frames) => frames,
            Err(error) => {
                tracing::error!(pump = %self.name, %error, "capture port failed");
                let mut empty = Buffer::from_slice(&block[..0], frame_size);
                empty.set_error(error.clone());
                if let Err(e) = self.engine.process(&empty) {
                    tracing::warn!(pump = %self.name, error = %e, "failed to notify streams");
                }
                emit(
                    self.config.event_callback.as_ref(),
                    RouteEvent::PortFailed {
                        port: self.port.name().to_string(),
                        error: error.clone(),
                    },
                );
                return Err(error);
            }
        };

        if frames == 0 {
            tracing::trace!(pump = %self.name, "no frames captured");
            return Ok(());
        }
        let frames = frames.min(requested);
        if frames < requested {
            self.counters.record_short();
            tracing::warn!(pump = %self.name, requested, frames, "short read");
            emit(
                self.config.event_callback.as_ref(),
                RouteEvent::ShortTransfer {
                    port: self.port.name().to_string(),
                    requested,
                    transferred: frames,
                },
            );
        }

        let buffer = Buffer::from_slice(&block[..frames * frame_size], frame_size);
        let report = self.engine.process(&buffer)?;
        self.counters.record(frames, report);
        Ok(())
    }
}

/// Drives one capture port and distributes its frames to [`InStream`]s.
///
/// The port is opened when the first registered stream starts and closed
/// when the last one stops. While open, a dedicated thread reads one block
/// per cycle and hands each stream the channels its slot map selects,
/// resampled to the stream's rate when it differs from the port's.
pub struct PcmReader {
    this: Weak<PcmReader>,
    shared: Arc<Shared>,
    state: Mutex<PumpState>,
}

impl PcmReader {
    /// Creates a pump for `port` using blocks of shape `params`.
    pub fn new(port: Arc<dyn PcmInPort>, params: PcmParams, config: PumpConfig) -> Arc<Self> {
        let name = format!("Reader-{}", port.name());
        tracing::debug!(pump = %name, ?params, "creating capture pump");
        let engine = UnMerge::with_callback(params, config.event_callback.clone());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            shared: Arc::new(Shared {
                name,
                port,
                params,
                engine,
                counters: PumpCounters::default(),
                config,
            }),
            state: Mutex::new(PumpState::default()),
        })
    }

    /// Checks the pump's block shape.
    pub fn init_check(&self) -> Result<(), AudioError> {
        self.shared.engine.init_check()
    }

    /// Block shape read from the port.
    #[must_use]
    pub fn params(&self) -> PcmParams {
        self.shared.params
    }

    /// Pump name, `Reader-<port>`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Registers a stopped stream.
    ///
    /// A stream whose rate differs from the pump's gets a resampler
    /// (16-bit only). Nothing changes if any check fails.
    pub fn register_stream(&self, stream: &Arc<InStream>) -> Result<(), AudioError> {
        let _state = self.state.lock();
        let core = stream.core();
        if let Err(error) = stream.init_check() {
            tracing::error!(pump = %self.shared.name, %error, "stream rejected");
            return Err(error);
        }

        let pump: Weak<dyn PumpHandle> = self.this.clone();
        core.bind(pump)?;

        let attached = match capture_resampler(
            self.shared.params,
            core.params(),
            self.shared.config.resampler_quality,
        ) {
            Some(Ok(resampler)) => core.attach_resampler(resampler, self.shared.params.frame_count),
            Some(Err(error)) => Err(error),
            None => Ok(()),
        };
        if let Err(error) = attached.and_then(|()| self.shared.engine.register_stream(stream)) {
            core.detach_resampler();
            core.unbind();
            tracing::error!(pump = %self.shared.name, %error, "stream registration failed");
            return Err(error);
        }

        tracing::info!(
            pump = %self.shared.name,
            rate = core.params().sample_rate,
            channels = core.params().channels,
            resampling = core.has_resampler(),
            "capture stream registered"
        );
        Ok(())
    }

    /// Unregisters a stopped stream.
    pub fn unregister_stream(&self, stream: &Arc<InStream>) -> Result<(), AudioError> {
        let _state = self.state.lock();
        if !self.shared.engine.is_stream_registered(stream) {
            tracing::warn!(pump = %self.shared.name, "stream is not registered");
            return Err(AudioError::NotRegistered);
        }
        if stream.is_started() {
            tracing::error!(pump = %self.shared.name, "cannot unregister a started stream");
            return Err(AudioError::StillStarted);
        }
        self.shared.engine.unregister_stream(stream)?;
        let core = stream.core();
        core.detach_resampler();
        core.unbind();
        tracing::info!(pump = %self.shared.name, "capture stream unregistered");
        Ok(())
    }

    /// Returns `true` if `stream` is registered here.
    #[must_use]
    pub fn is_stream_registered(&self, stream: &Arc<InStream>) -> bool {
        self.shared.engine.is_stream_registered(stream)
    }

    /// Snapshot of the pump's counters.
    #[must_use]
    pub fn stats(&self) -> PumpStats {
        let state = self.state.lock();
        self.shared
            .counters
            .snapshot(state.users, state.worker.as_ref().is_some_and(Worker::is_running))
    }
}

impl PumpHandle for PcmReader {
    fn open(&self) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        if state.users == 0 {
            let shared = &self.shared;
            shared.port.open(&shared.params)?;
            if let Err(error) = shared.port.start() {
                let _ = shared.port.close();
                return Err(error);
            }

            let cycle_shared = Arc::clone(shared);
            let mut block = vec![0u8; shared.params.buffer_size()];
            let worker = Worker::spawn(shared.name.clone(), move || {
                cycle_shared.cycle(&mut block)
            });
            match worker {
                Ok(worker) => state.worker = Some(worker),
                Err(error) => {
                    let _ = shared.port.stop();
                    let _ = shared.port.close();
                    return Err(error);
                }
            }

            tracing::info!(pump = %shared.name, "capture pump started");
            emit(
                shared.config.event_callback.as_ref(),
                RouteEvent::PumpStarted {
                    port: shared.port.name().to_string(),
                },
            );
        }
        state.users += 1;
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        if state.users == 0 {
            tracing::warn!(pump = %self.shared.name, "close without open");
            return Err(AudioError::NotStarted);
        }
        state.users -= 1;
        if state.users > 0 {
            return Ok(());
        }

        let shared = &self.shared;
        let result = match state.worker.take() {
            Some(worker) => worker.stop(|| {
                if let Err(error) = shared.port.stop() {
                    tracing::warn!(pump = %shared.name, %error, "failed to stop port");
                }
            }),
            None => Ok(()),
        };
        if let Err(error) = shared.port.close() {
            tracing::warn!(pump = %shared.name, %error, "failed to close port");
        }

        tracing::info!(pump = %shared.name, "capture pump stopped");
        emit(
            shared.config.event_callback.as_ref(),
            RouteEvent::PumpStopped {
                port: shared.port.name().to_string(),
            },
        );
        result
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

impl Drop for PcmReader {
    fn drop(&mut self) {
        let shared = &self.shared;
        if let Some(worker) = self.state.get_mut().worker.take() {
            tracing::warn!(pump = %shared.name, "capture pump dropped while running");
            let _ = worker.stop(|| {
                let _ = shared.port.stop();
            });
        }
        if shared.port.is_open() {
            let _ = shared.port.close();
        }
    }
}
