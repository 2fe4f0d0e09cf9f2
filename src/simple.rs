//! Single-stream pumps without a thread.
//!
//! [`SimpleReader`] and [`SimpleWriter`] own a port and accept exactly one
//! stream. The stream's `read`/`write` runs the port I/O directly on the
//! calling thread, converting rates when the stream's rate differs from the
//! port's. Channel count and sample width must match the port.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferProvider, Scratch};
use crate::event::{emit, RouteEvent};
use crate::port::{PcmInPort, PcmOutPort};
use crate::pump::{capture_resampler, playback_resampler};
use crate::stream::{PumpHandle, StreamCore};
use crate::{AudioError, PcmParams, PumpConfig, SlotMap};

/// Checks that a simple stream can run on a port of shape `port`.
fn check_shape(port: PcmParams, stream: PcmParams) -> Result<(), AudioError> {
    if port.channels != stream.channels || port.sample_bits != stream.sample_bits {
        return Err(AudioError::incompatible(format!(
            "{}ch {}-bit stream on {}ch {}-bit simple pump",
            stream.channels, stream.sample_bits, port.channels, port.sample_bits
        )));
    }
    Ok(())
}

/// Registration slot of a simple pump.
fn claim<S>(slot: &mut Option<Weak<S>>, stream: &Arc<S>) -> Result<(), AudioError> {
    if let Some(current) = slot.as_ref().filter(|s| s.strong_count() > 0) {
        if std::ptr::eq(current.as_ptr(), Arc::as_ptr(stream)) {
            return Err(AudioError::AlreadyRegistered);
        }
        return Err(AudioError::unsupported("simple pumps take one stream"));
    }
    *slot = Some(Arc::downgrade(stream));
    Ok(())
}

fn holds<S>(slot: &Option<Weak<S>>, stream: &Arc<S>) -> bool {
    slot.as_ref()
        .is_some_and(|s| std::ptr::eq(s.as_ptr(), Arc::as_ptr(stream)))
}

/// Capture pump serving one [`SimpleInStream`] on the caller's thread.
pub struct SimpleReader {
    this: Weak<SimpleReader>,
    name: String,
    port: Arc<dyn PcmInPort>,
    params: PcmParams,
    config: PumpConfig,
    stream: Mutex<Option<Weak<SimpleInStream>>>,
}

impl SimpleReader {
    /// Creates a pump for `port`; `params` is the shape the port is opened with.
    pub fn new(port: Arc<dyn PcmInPort>, params: PcmParams, config: PumpConfig) -> Arc<Self> {
        let name = format!("SimpleReader-{}", port.name());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            name,
            port,
            params,
            config,
            stream: Mutex::new(None),
        })
    }

    /// Checks the port shape.
    pub fn init_check(&self) -> Result<(), AudioError> {
        self.params.check_block()
    }

    /// Port shape.
    #[must_use]
    pub fn params(&self) -> PcmParams {
        self.params
    }

    /// Pump name, `SimpleReader-<port>`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the pump's only stream.
    ///
    /// Fails with [`AudioError::Unsupported`] while another stream is
    /// registered.
    pub fn register_stream(&self, stream: &Arc<SimpleInStream>) -> Result<(), AudioError> {
        let mut slot = self.stream.lock();
        stream.init_check()?;
        check_shape(self.params, stream.params())?;
        claim(&mut slot, stream)?;

        let pump: Weak<dyn PumpHandle> = self.this.clone();
        let core = &stream.core;
        let linked = core.bind(pump).and_then(|()| {
            match capture_resampler(self.params, core.params(), self.config.resampler_quality) {
                Some(Ok(resampler)) => core.attach_resampler(resampler, self.params.frame_count),
                Some(Err(error)) => Err(error),
                None => Ok(()),
            }
        });
        if let Err(error) = linked {
            core.detach_resampler();
            core.unbind();
            slot.take();
            tracing::error!(pump = %self.name, %error, "stream registration failed");
            return Err(error);
        }
        *stream.port.lock() = Some(self.port.clone());
        tracing::info!(pump = %self.name, resampling = core.has_resampler(), "simple capture stream registered");
        Ok(())
    }

    /// Unregisters the stopped stream.
    pub fn unregister_stream(&self, stream: &Arc<SimpleInStream>) -> Result<(), AudioError> {
        let mut slot = self.stream.lock();
        if !holds(&slot, stream) {
            return Err(AudioError::NotRegistered);
        }
        if stream.is_started() {
            return Err(AudioError::StillStarted);
        }
        slot.take();
        stream.port.lock().take();
        stream.core.detach_resampler();
        stream.core.unbind();
        tracing::info!(pump = %self.name, "simple capture stream unregistered");
        Ok(())
    }

    /// Returns `true` if `stream` is registered here.
    #[must_use]
    pub fn is_stream_registered(&self, stream: &Arc<SimpleInStream>) -> bool {
        holds(&self.stream.lock(), stream)
    }
}

impl PumpHandle for SimpleReader {
    fn open(&self) -> Result<(), AudioError> {
        if self.port.is_open() {
            tracing::warn!(pump = %self.name, "port already open");
            return Ok(());
        }
        self.port.open(&self.params)?;
        if let Err(error) = self.port.start() {
            let _ = self.port.close();
            return Err(error);
        }
        emit(
            self.config.event_callback.as_ref(),
            RouteEvent::PumpStarted {
                port: self.port.name().to_string(),
            },
        );
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        let stopped = self.port.stop();
        self.port.close()?;
        emit(
            self.config.event_callback.as_ref(),
            RouteEvent::PumpStopped {
                port: self.port.name().to_string(),
            },
        );
        stopped
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SimpleReader {
    fn drop(&mut self) {
        if self.port.is_open() {
            let _ = self.port.stop();
            let _ = self.port.close();
        }
    }
}

/// Reads port blocks into a scratch buffer for the pull-mode resampler.
struct PortSource<'a> {
    port: &'a dyn PcmInPort,
    frame_size: usize,
    scratch: &'a Scratch,
}

impl BufferProvider for PortSource<'_> {
    fn get_next_buffer(&self, frames: usize) -> Result<Buffer<'_>, AudioError> {
        let mut buffer = self.scratch.lend(frames, self.frame_size)?;
        let read = buffer
            .as_bytes_mut()
            .and_then(|bytes| self.port.read(bytes, frames));
        match read {
            Ok(read) => {
                buffer.set_frames(read);
                Ok(buffer)
            }
            Err(error) => {
                self.scratch.reclaim(buffer)?;
                Err(error)
            }
        }
    }

    fn release_buffer(&self, buffer: Buffer<'_>) {
        if let Err(error) = self.scratch.reclaim(buffer) {
            tracing::warn!(%error, "port source release");
        }
    }
}

/// The one stream of a [`SimpleReader`].
pub struct SimpleInStream {
    core: StreamCore,
    port: Mutex<Option<Arc<dyn PcmInPort>>>,
}

impl SimpleInStream {
    /// Creates a stream of shape `params`.
    pub fn new(params: PcmParams) -> Arc<Self> {
        Arc::new(Self {
            core: StreamCore::new(params, SlotMap::symmetric(params.channel_mask())),
            port: Mutex::new(None),
        })
    }

    /// Stream shape.
    #[must_use]
    pub fn params(&self) -> PcmParams {
        self.core.params()
    }

    /// Checks the stream's params.
    pub fn init_check(&self) -> Result<(), AudioError> {
        self.core.init_check(self.core.map().dst_mask())
    }

    /// Returns `true` if reads convert from the port's rate.
    #[must_use]
    pub fn is_resampling(&self) -> bool {
        self.core.has_resampler()
    }

    /// Returns `true` while started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.core.is_started()
    }

    /// Opens the pump's port.
    pub fn start(&self) -> Result<(), AudioError> {
        self.core.start(|| {})
    }

    /// Closes the pump's port.
    pub fn stop(&self) -> Result<(), AudioError> {
        self.core.stop(|| {}, || {})
    }

    /// Reads up to `frames` frames from the port into `buffer`, on the
    /// calling thread.
    pub fn read(&self, buffer: &mut [u8], frames: usize) -> Result<usize, AudioError> {
        self.core.check_started()?;
        let port = self.port.lock().clone().ok_or(AudioError::NotRegistered)?;
        let frame_size = self.core.params().frame_size();
        let frames = frames.min(buffer.len() / frame_size);
        if frames == 0 {
            return Ok(0);
        }

        let mut guard = self.core.resampler();
        let Some(resampler) = guard.as_mut() else {
            return port.read(&mut buffer[..frames * frame_size], frames);
        };
        let source = PortSource {
            port: port.as_ref(),
            frame_size,
            scratch: self.core.rsmp_buf(),
        };
        resampler.resample_from(&source, buffer, frames)
    }
}

impl Drop for SimpleInStream {
    fn drop(&mut self) {
        self.core.release_on_drop();
    }
}

/// Playback pump serving one [`SimpleOutStream`] on the caller's thread.
pub struct SimpleWriter {
    this: Weak<SimpleWriter>,
    name: String,
    port: Arc<dyn PcmOutPort>,
    params: PcmParams,
    config: PumpConfig,
    stream: Mutex<Option<Weak<SimpleOutStream>>>,
}

impl SimpleWriter {
    /// Creates a pump for `port`; `params` is the shape the port is opened with.
    pub fn new(port: Arc<dyn PcmOutPort>, params: PcmParams, config: PumpConfig) -> Arc<Self> {
        let name = format!("SimpleWriter-{}", port.name());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            name,
            port,
            params,
            config,
            stream: Mutex::new(None),
        })
    }

    /// Checks the port shape.
    pub fn init_check(&self) -> Result<(), AudioError> {
        self.params.check_block()
    }

    /// Port shape.
    #[must_use]
    pub fn params(&self) -> PcmParams {
        self.params
    }

    /// Pump name, `SimpleWriter-<port>`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the pump's only stream.
    pub fn register_stream(&self, stream: &Arc<SimpleOutStream>) -> Result<(), AudioError> {
        let mut slot = self.stream.lock();
        stream.init_check()?;
        check_shape(self.params, stream.params())?;
        claim(&mut slot, stream)?;

        let pump: Weak<dyn PumpHandle> = self.this.clone();
        let core = &stream.core;
        let linked = core.bind(pump).and_then(|()| {
            match playback_resampler(self.params, core.params(), self.config.resampler_quality) {
                Some(Ok(resampler)) => core.attach_resampler(resampler, self.params.frame_count),
                Some(Err(error)) => Err(error),
                None => Ok(()),
            }
        });
        if let Err(error) = linked {
            core.detach_resampler();
            core.unbind();
            slot.take();
            tracing::error!(pump = %self.name, %error, "stream registration failed");
            return Err(error);
        }
        *stream.link.lock() = Some((self.port.clone(), self.params.frame_count));
        tracing::info!(pump = %self.name, resampling = core.has_resampler(), "simple playback stream registered");
        Ok(())
    }

    /// Unregisters the stopped stream.
    pub fn unregister_stream(&self, stream: &Arc<SimpleOutStream>) -> Result<(), AudioError> {
        let mut slot = self.stream.lock();
        if !holds(&slot, stream) {
            return Err(AudioError::NotRegistered);
        }
        if stream.is_started() {
            return Err(AudioError::StillStarted);
        }
        slot.take();
        stream.link.lock().take();
        stream.core.detach_resampler();
        stream.core.unbind();
        tracing::info!(pump = %self.name, "simple playback stream unregistered");
        Ok(())
    }

    /// Returns `true` if `stream` is registered here.
    #[must_use]
    pub fn is_stream_registered(&self, stream: &Arc<SimpleOutStream>) -> bool {
        holds(&self.stream.lock(), stream)
    }
}

impl PumpHandle for SimpleWriter {
    fn open(&self) -> Result<(), AudioError> {
        if self.port.is_open() {
            tracing::warn!(pump = %self.name, "port already open");
            return Ok(());
        }
        self.port.open(&self.params)?;
        if let Err(error) = self.port.start() {
            let _ = self.port.close();
            return Err(error);
        }
        emit(
            self.config.event_callback.as_ref(),
            RouteEvent::PumpStarted {
                port: self.port.name().to_string(),
            },
        );
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        let stopped = self.port.stop();
        self.port.close()?;
        emit(
            self.config.event_callback.as_ref(),
            RouteEvent::PumpStopped {
                port: self.port.name().to_string(),
            },
        );
        stopped
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SimpleWriter {
    fn drop(&mut self) {
        if self.port.is_open() {
            let _ = self.port.stop();
            let _ = self.port.close();
        }
    }
}

/// Writes all of `bytes` to `port`, retrying short writes.
fn write_all(port: &dyn PcmOutPort, bytes: &[u8], frames: usize, frame_size: usize) -> Result<usize, AudioError> {
    let mut written = 0;
    while written < frames {
        let n = port.write(&bytes[written * frame_size..frames * frame_size], frames - written)?;
        if n == 0 {
            break;
        }
        written += n;
    }
    Ok(written)
}

/// The one stream of a [`SimpleWriter`].
pub struct SimpleOutStream {
    core: StreamCore,
    /// Port and its block size, set while registered.
    link: Mutex<Option<(Arc<dyn PcmOutPort>, usize)>>,
}

impl SimpleOutStream {
    /// Creates a stream of shape `params`.
    pub fn new(params: PcmParams) -> Arc<Self> {
        Arc::new(Self {
            core: StreamCore::new(params, SlotMap::symmetric(params.channel_mask())),
            link: Mutex::new(None),
        })
    }

    /// Stream shape.
    #[must_use]
    pub fn params(&self) -> PcmParams {
        self.core.params()
    }

    /// Checks the stream's params.
    pub fn init_check(&self) -> Result<(), AudioError> {
        self.core.init_check(self.core.map().src_mask())
    }

    /// Returns `true` if writes convert to the port's rate.
    #[must_use]
    pub fn is_resampling(&self) -> bool {
        self.core.has_resampler()
    }

    /// Returns `true` while started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.core.is_started()
    }

    /// Opens the pump's port.
    pub fn start(&self) -> Result<(), AudioError> {
        self.core.start(|| {})
    }

    /// Closes the pump's port.
    pub fn stop(&self) -> Result<(), AudioError> {
        self.core.stop(|| {}, || {})
    }

    /// Writes `frames` frames from `buffer` to the port, on the calling
    /// thread. Returns the stream frames consumed.
    pub fn write(&self, buffer: &[u8], frames: usize) -> Result<usize, AudioError> {
        self.core.check_started()?;
        let (port, block) = self.link.lock().clone().ok_or(AudioError::NotRegistered)?;
        let frame_size = self.core.params().frame_size();
        let frames = frames.min(buffer.len() / frame_size);
        if frames == 0 {
            return Ok(0);
        }

        let mut guard = self.core.resampler();
        let Some(resampler) = guard.as_mut() else {
            return write_all(port.as_ref(), buffer, frames, frame_size);
        };

        let scratch = self.core.rsmp_buf();
        let mut out = scratch.lend(block, frame_size)?;
        let result = out.as_bytes_mut().and_then(|out| {
            let mut consumed = 0;
            while consumed < frames {
                let mut in_frames = frames - consumed;
                let mut produced = block;
                resampler.resample(
                    &buffer[consumed * frame_size..frames * frame_size],
                    &mut in_frames,
                    out,
                    &mut produced,
                )?;
                consumed += in_frames;
                if produced > 0 {
                    write_all(port.as_ref(), out, produced, frame_size)?;
                }
                if in_frames == 0 && produced == 0 {
                    break;
                }
            }
            Ok(consumed)
        });
        scratch.reclaim(out)?;
        result
    }
}

impl Drop for SimpleOutStream {
    fn drop(&mut self) {
        self.core.release_on_drop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{bytes_to_i16, i16_to_bytes};
    use crate::port::{MockInPort, MockOutPort, PcmPort};

    fn stereo(rate: u32) -> PcmParams {
        PcmParams::new(2, 16, rate, 128)
    }

    #[test]
    fn test_reader_takes_one_stream() {
        let reader = SimpleReader::new(Arc::new(MockInPort::new("mic")), stereo(48000), PumpConfig::default());
        let first = SimpleInStream::new(stereo(48000));
        let second = SimpleInStream::new(stereo(48000));

        reader.register_stream(&first).unwrap();
        assert_eq!(reader.register_stream(&first), Err(AudioError::AlreadyRegistered));
        assert!(matches!(
            reader.register_stream(&second),
            Err(AudioError::Unsupported { .. })
        ));

        reader.unregister_stream(&first).unwrap();
        reader.register_stream(&second).unwrap();
        assert!(reader.is_stream_registered(&second));
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let writer = SimpleWriter::new(Arc::new(MockOutPort::new("spk")), stereo(48000), PumpConfig::default());
        let mono = SimpleOutStream::new(PcmParams::new(1, 16, 48000, 128));
        assert!(matches!(
            writer.register_stream(&mono),
            Err(AudioError::Incompatible { .. })
        ));
        assert!(!writer.is_stream_registered(&mono));
    }

    #[test]
    fn test_read_on_caller_thread() {
        let samples: Vec<i16> = (0..256).collect();
        let port = Arc::new(MockInPort::new("mic").with_samples(&samples).unpaced());
        let reader = SimpleReader::new(port.clone(), stereo(48000), PumpConfig::default());
        let stream = SimpleInStream::new(stereo(48000));
        reader.register_stream(&stream).unwrap();

        let mut buf = vec![0u8; 128 * 4];
        assert_eq!(stream.read(&mut buf, 128), Err(AudioError::NotStarted));
        stream.start().unwrap();
        stream.start().unwrap_err();
        assert_eq!(stream.read(&mut buf, 128).unwrap(), 128);
        assert_eq!(bytes_to_i16(&buf), samples);

        stream.stop().unwrap();
        assert!(!port.is_open());
    }

    #[test]
    fn test_resampled_write_produces_port_rate() {
        let port = Arc::new(MockOutPort::new("spk").unpaced());
        let writer = SimpleWriter::new(port.clone(), stereo(48000), PumpConfig::default());
        let stream = SimpleOutStream::new(stereo(16000));
        writer.register_stream(&stream).unwrap();
        assert!(stream.is_resampling());
        stream.start().unwrap();

        let mut block = vec![0u8; 160 * 4];
        i16_to_bytes(&[500i16; 320], &mut block);
        for _ in 0..10 {
            assert_eq!(stream.write(&block, 160).unwrap(), 160);
        }
        stream.stop().unwrap();

        let frames = port.written().len() / 4;
        assert!((4700..=4800).contains(&frames), "wrote {frames} frames");
    }

    #[test]
    fn test_resampled_read_converts_rate() {
        let port = Arc::new(MockInPort::new("mic").with_samples(&[800i16; 48000]).unpaced());
        let reader = SimpleReader::new(port, stereo(48000), PumpConfig::default());
        let stream = SimpleInStream::new(stereo(16000));
        reader.register_stream(&stream).unwrap();
        stream.start().unwrap();

        let mut buf = vec![0u8; 80 * 4];
        let mut last = Vec::new();
        for _ in 0..20 {
            assert_eq!(stream.read(&mut buf, 80).unwrap(), 80);
            last = bytes_to_i16(&buf);
        }
        assert!(last.iter().all(|&s| (i32::from(s) - 800).abs() <= 2));
        stream.stop().unwrap();
    }
}
