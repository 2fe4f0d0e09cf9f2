//! Playback pump.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::stats::{PumpCounters, PumpStats};
use super::worker::Worker;
use super::{playback_resampler, PumpState};
use crate::buffer::Buffer;
use crate::event::{emit, RouteEvent};
use crate::pipeline::Merge;
use crate::port::PcmOutPort;
use crate::stream::{OutStream, PumpHandle};
use crate::{AudioError, PcmParams, PumpConfig};

struct Shared {
    name: String,
    port: Arc<dyn PcmOutPort>,
    params: PcmParams,
    engine: Merge,
    counters: PumpCounters,
    config: PumpConfig,
}

impl Shared {
    /// One playback cycle: merge every stream into a block, write it out.
    fn cycle(&self, block: &mut [u8]) -> Result<(), AudioError> {
        let frame_size = self.params.frame_size();
        let requested = self.params.frame_count;

        let mut buffer = Buffer::from_mut_slice(block, frame_size);
        let report = self.engine.process(&mut buffer)?;
        drop(buffer);

        let frames = match self.port.write(block, requested) {
            Ok(frames) => frames,
            Err(error) => {
                tracing::error!(pump = %self.name, %error, "playback port failed");
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
            tracing::trace!(pump = %self.name, "no frames played");
            return Ok(());
        }
        let frames = frames.min(requested);
        if frames < requested {
            self.counters.record_short();
            tracing::warn!(pump = %self.name, requested, frames, "short write");
            emit(
                self.config.event_callback.as_ref(),
                RouteEvent::ShortTransfer {
                    port: self.port.name().to_string(),
                    requested,
                    transferred: frames,
                },
            );
        }
        self.counters.record(frames, report);
        Ok(())
    }
}

/// Drives one playback port fed by [`OutStream`]s.
///
/// Each cycle pulls one block from every registered stream, places the
/// stream's channels in the slots its slot map names, and writes the block
/// to the port. Slots no stream owns are silent. Port lifetime follows the
/// started streams exactly as for [`PcmReader`](crate::PcmReader).
pub struct PcmWriter {
    this: Weak<PcmWriter>,
    shared: Arc<Shared>,
    state: Mutex<PumpState>,
}

impl PcmWriter {
    /// Creates a pump for `port` using blocks of shape `params`.
    pub fn new(port: Arc<dyn PcmOutPort>, params: PcmParams, config: PumpConfig) -> Arc<Self> {
        let name = format!("Writer-{}", port.name());
        tracing::debug!(pump = %name, ?params, "creating playback pump");
        let engine = Merge::with_callback(params, config.event_callback.clone());
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

    /// Block shape written to the port.
    #[must_use]
    pub fn params(&self) -> PcmParams {
        self.shared.params
    }

    /// Pump name, `Writer-<port>`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Registers a stopped stream; see [`PcmReader::register_stream`].
    ///
    /// [`PcmReader::register_stream`]: crate::PcmReader::register_stream
    pub fn register_stream(&self, stream: &Arc<OutStream>) -> Result<(), AudioError> {
        let _state = self.state.lock();
        let core = stream.core();
        if let Err(error) = stream.init_check() {
            tracing::error!(pump = %self.shared.name, %error, "stream rejected");
            return Err(error);
        }

        let pump: Weak<dyn PumpHandle> = self.this.clone();
        core.bind(pump)?;

        let attached = match playback_resampler(
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
            "playback stream registered"
        );
        Ok(())
    }

    /// Unregisters a stopped stream.
    pub fn unregister_stream(&self, stream: &Arc<OutStream>) -> Result<(), AudioError> {
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
        tracing::info!(pump = %self.shared.name, "playback stream unregistered");
        Ok(())
    }

    /// Returns `true` if `stream` is registered here.
    #[must_use]
    pub fn is_stream_registered(&self, stream: &Arc<OutStream>) -> bool {
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

impl PumpHandle for PcmWriter {
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

            tracing::info!(pump = %shared.name, "playback pump started");
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

        tracing::info!(pump = %shared.name, "playback pump stopped");
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

impl Drop for PcmWriter {
    fn drop(&mut self) {
        let shared = &self.shared;
        if let Some(worker) = self.state.get_mut().worker.take() {
            tracing::warn!(pump = %shared.name, "playback pump dropped while running");
            let _ = worker.stop(|| {
                let _ = shared.port.stop();
            });
        }
        if shared.port.is_open() {
            let _ = shared.port.close();
        }
    }
}
