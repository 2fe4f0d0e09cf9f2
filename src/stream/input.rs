//! Capture streams.

use std::sync::Arc;

use super::StreamCore;
use crate::buffer::{Buffer, BufferProvider};
use crate::pipeline::{BufferAdaptor, MonoPipe, PipeWriter, RoutedStream};
use crate::{AudioError, PcmParams, SlotMap};

enum Source {
    Provider(Box<dyn BufferProvider>),
    Adapted(BufferAdaptor),
    Buffered(PipeWriter),
}

/// Capture stream fed by a [`PcmReader`](crate::PcmReader).
///
/// The slot map's *source* mask names the capture-port channels the stream
/// receives; its *destination* mask names the stream's own channels.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use pcm_route::port::NullInPort;
/// use pcm_route::{InStream, PcmParams, PcmReader, PumpConfig};
///
/// let hw = PcmParams::new(2, 16, 48000, 256);
/// let reader = PcmReader::new(Arc::new(NullInPort::new()), hw, PumpConfig::default());
///
/// let stream = InStream::buffered(PcmParams::new(2, 16, 16000, 160));
/// reader.register_stream(&stream)?;
/// stream.start()?;
///
/// let mut block = vec![0u8; 160 * 4];
/// let frames = stream.read(&mut block, 160)?;
/// # let _ = frames;
/// stream.stop()?;
/// # Ok::<(), pcm_route::AudioError>(())
/// ```
pub struct InStream {
    core: StreamCore,
    source: Source,
}

impl InStream {
    /// Stream delivering into `provider`, mapping channels one to one.
    pub fn new(params: PcmParams, provider: impl BufferProvider + 'static) -> Arc<Self> {
        Self::with_map(params, SlotMap::symmetric(params.channel_mask()), provider)
    }

    /// Stream delivering into `provider` with an explicit slot map.
    pub fn with_map(
        params: PcmParams,
        map: SlotMap,
        provider: impl BufferProvider + 'static,
    ) -> Arc<Self> {
        Self::build(params, map, Source::Provider(Box::new(provider)))
    }

    /// Stream read with blocking [`read`](Self::read) calls, zero copy.
    pub fn adapted(params: PcmParams) -> Arc<Self> {
        Self::adapted_with_map(params, SlotMap::symmetric(params.channel_mask()))
    }

    /// Adapted stream with an explicit slot map.
    pub fn adapted_with_map(params: PcmParams, map: SlotMap) -> Arc<Self> {
        Self::from_adaptor(params, map, BufferAdaptor::new(params.frame_size()))
    }

    /// Adapted stream over a preconfigured adaptor, e.g. one with a pull
    /// timeout.
    pub fn from_adaptor(params: PcmParams, map: SlotMap, adaptor: BufferAdaptor) -> Arc<Self> {
        Self::build(params, map, Source::Adapted(adaptor))
    }

    /// Stream read with [`read`](Self::read) calls through a [`MonoPipe`].
    pub fn buffered(params: PcmParams) -> Arc<Self> {
        Self::buffered_with_map(params, SlotMap::symmetric(params.channel_mask()))
    }

    /// Buffered stream with an explicit slot map.
    pub fn buffered_with_map(params: PcmParams, map: SlotMap) -> Arc<Self> {
        let pipe = Arc::new(MonoPipe::new(params));
        pipe.shutdown(true);
        Self::build(params, map, Source::Buffered(PipeWriter::new(pipe)))
    }

    fn build(params: PcmParams, map: SlotMap, source: Source) -> Arc<Self> {
        Arc::new(Self {
            core: StreamCore::new(params, map),
            source,
        })
    }

    pub(crate) fn core(&self) -> &StreamCore {
        &self.core
    }

    /// Stream shape.
    #[must_use]
    pub fn params(&self) -> PcmParams {
        self.core.params()
    }

    /// Slot map.
    #[must_use]
    pub fn slot_map(&self) -> &SlotMap {
        self.core.map()
    }

    /// Checks params, slot map and source before registration.
    pub fn init_check(&self) -> Result<(), AudioError> {
        self.core.init_check(self.core.map().dst_mask())?;
        if let Source::Buffered(writer) = &self.source {
            writer.pipe().init_check()?;
        }
        Ok(())
    }

    /// Returns `true` if the stream converts between its rate and the pump's.
    #[must_use]
    pub fn is_resampling(&self) -> bool {
        self.core.has_resampler()
    }

    /// Returns `true` between a successful [`start`](Self::start) and
    /// [`stop`](Self::stop).
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.core.is_started()
    }

    /// Starts delivery, opening the pump's port if this is its first
    /// started stream.
    pub fn start(&self) -> Result<(), AudioError> {
        self.core.start(|| match &self.source {
            Source::Provider(_) => {}
            Source::Adapted(adaptor) => adaptor.reopen(),
            Source::Buffered(writer) => writer.pipe().shutdown(false),
        })
    }

    /// Stops delivery, closing the pump's port if this was its last started
    /// stream. A blocked [`read`](Self::read) returns.
    pub fn stop(&self) -> Result<(), AudioError> {
        self.core.stop(
            || match &self.source {
                Source::Provider(_) => {}
                Source::Adapted(adaptor) => adaptor.close(),
                Source::Buffered(writer) => writer.pipe().shutdown(true),
            },
            || {
                if let Source::Buffered(writer) = &self.source {
                    writer.pipe().flush();
                }
            },
        )
    }

    /// Reads up to `frames` frames into `buffer`.
    ///
    /// Adapted streams block until the pump thread fills the buffer;
    /// buffered streams wait at most the time of the missing frames.
    /// Provider-backed streams fail with [`AudioError::Unsupported`].
    pub fn read(&self, buffer: &mut [u8], frames: usize) -> Result<usize, AudioError> {
        match &self.source {
            Source::Provider(_) => Err(AudioError::unsupported(
                "read on a provider-backed stream",
            )),
            Source::Adapted(adaptor) => {
                self.core.check_started()?;
                adaptor.read(buffer, frames)
            }
            Source::Buffered(writer) => {
                self.core.check_started()?;
                writer.pipe().read(buffer, frames)
            }
        }
    }

    /// Pulls missed by an adapted stream's application side.
    #[must_use]
    pub fn underruns(&self) -> u64 {
        match &self.source {
            Source::Adapted(adaptor) => adaptor.underruns(),
            _ => 0,
        }
    }

    fn sink(&self) -> &dyn BufferProvider {
        match &self.source {
            Source::Provider(provider) => provider.as_ref(),
            Source::Adapted(adaptor) => adaptor,
            Source::Buffered(writer) => writer,
        }
    }

    /// Converts `buffer` (pump rate) and delivers it to the sink.
    fn deliver_resampled(&self, buffer: &Buffer<'_>) {
        let frames = buffer.frames();
        let mut guard = self.core.resampler();
        let Some(resampler) = guard.as_mut() else {
            return;
        };
        let fs = buffer.frame_size();
        let input = buffer.as_bytes();
        let (num, den) = resampler.ratio();
        let sink = self.sink();

        let mut consumed = 0;
        while consumed < frames {
            let pending = frames - consumed;
            let request = pending * den as usize / num.max(1) as usize + 1;
            let mut out = match sink.get_next_buffer(request) {
                Ok(out) => out,
                Err(error) => {
                    tracing::trace!(%error, dropped = pending, "capture sink has no buffer");
                    break;
                }
            };

            let mut in_frames = pending;
            let mut out_frames = out.frames();
            let converted = out.as_bytes_mut().and_then(|bytes| {
                resampler.resample(&input[consumed * fs..], &mut in_frames, bytes, &mut out_frames)
            });
            if let Err(error) = converted {
                out.set_frames(0);
                out.set_error(error.clone());
                sink.release_buffer(out);
                tracing::warn!(%error, "capture resampling failed");
                break;
            }
            out.set_frames(out_frames);
            sink.release_buffer(out);
            consumed += in_frames;
            if in_frames == 0 && out_frames == 0 {
                break;
            }
        }
    }
}

impl BufferProvider for InStream {
    fn get_next_buffer(&self, frames: usize) -> Result<Buffer<'_>, AudioError> {
        if self.core.has_resampler() {
            return self.core.rsmp_buf().lend(frames, self.core.params().frame_size());
        }
        self.sink().get_next_buffer(frames)
    }

    fn release_buffer(&self, buffer: Buffer<'_>) {
        if !self.core.has_resampler() {
            self.sink().release_buffer(buffer);
            return;
        }
        let scratch = self.core.rsmp_buf();
        if !scratch.is_lent(&buffer) {
            tracing::warn!("capture stream release of a buffer it did not lend");
            return;
        }
        if buffer.frames() > 0 {
            self.deliver_resampled(&buffer);
        }
        if let Err(error) = scratch.reclaim(buffer) {
            tracing::warn!(%error, "capture stream release");
        }
    }
}

impl RoutedStream for InStream {
    fn params(&self) -> PcmParams {
        self.core.params()
    }

    fn slot_map(&self) -> &SlotMap {
        self.core.map()
    }

    fn can_resample(&self) -> bool {
        self.core.has_resampler()
    }
}

impl Drop for InStream {
    fn drop(&mut self) {
        self.core.release_on_drop();
    }
}
