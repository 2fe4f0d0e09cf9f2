//! Playback streams.

use std::sync::Arc;

use super::StreamCore;
use crate::buffer::{Buffer, BufferProvider};
use crate::pipeline::{BufferAdaptor, MonoPipe, PipeReader, RoutedStream};
use crate::{AudioError, PcmParams, SlotMap};

enum Source {
    Provider(Box<dyn BufferProvider>),
    Adapted(BufferAdaptor),
    Buffered(PipeReader),
}

/// Playback stream drained by a [`PcmWriter`](crate::PcmWriter).
///
/// The slot map's *source* mask names the stream's own channels; its
/// *destination* mask names the playback-port channels they land in.
pub struct OutStream {
    core: StreamCore,
    source: Source,
}

impl OutStream {
    /// Stream pulling from `provider`, mapping channels one to one.
    pub fn new(params: PcmParams, provider: impl BufferProvider + 'static) -> Arc<Self> {
        Self::with_map(params, SlotMap::symmetric(params.channel_mask()), provider)
    }

    /// Stream pulling from `provider` with an explicit slot map.
    pub fn with_map(
        params: PcmParams,
        map: SlotMap,
        provider: impl BufferProvider + 'static,
    ) -> Arc<Self> {
        Self::build(params, map, Source::Provider(Box::new(provider)))
    }

    /// Stream fed with blocking [`write`](Self::write) calls, zero copy.
    pub fn adapted(params: PcmParams) -> Arc<Self> {
        Self::adapted_with_map(params, SlotMap::symmetric(params.channel_mask()))
    }

    /// Adapted stream with an explicit slot map.
    pub fn adapted_with_map(params: PcmParams, map: SlotMap) -> Arc<Self> {
        Self::from_adaptor(params, map, BufferAdaptor::new(params.frame_size()))
    }

    /// Adapted stream over a preconfigured adaptor.
    pub fn from_adaptor(params: PcmParams, map: SlotMap, adaptor: BufferAdaptor) -> Arc<Self> {
        Self::build(params, map, Source::Adapted(adaptor))
    }

    /// Stream fed with [`write`](Self::write) calls through a [`MonoPipe`].
    pub fn buffered(params: PcmParams) -> Arc<Self> {
        Self::buffered_with_map(params, SlotMap::symmetric(params.channel_mask()))
    }

    /// Buffered stream with an explicit slot map.
    pub fn buffered_with_map(params: PcmParams, map: SlotMap) -> Arc<Self> {
        let pipe = Arc::new(MonoPipe::new(params));
        pipe.shutdown(true);
        Self::build(params, map, Source::Buffered(PipeReader::new(pipe)))
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
        self.core.init_check(self.core.map().src_mask())?;
        if let Source::Buffered(reader) = &self.source {
            reader.pipe().init_check()?;
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

    /// Starts playback, opening the pump's port if this is its first
    /// started stream.
    pub fn start(&self) -> Result<(), AudioError> {
        self.core.start(|| match &self.source {
            Source::Provider(_) => {}
            Source::Adapted(adaptor) => adaptor.reopen(),
            Source::Buffered(reader) => reader.pipe().shutdown(false),
        })
    }

    /// Stops playback, closing the pump's port if this was its last started
    /// stream. A blocked [`write`](Self::write) returns; frames still queued
    /// in a buffered stream are dropped.
    pub fn stop(&self) -> Result<(), AudioError> {
        self.core.stop(
            || match &self.source {
                Source::Provider(_) => {}
                Source::Adapted(adaptor) => adaptor.close(),
                Source::Buffered(reader) => reader.pipe().shutdown(true),
            },
            || {
                if let Source::Buffered(reader) = &self.source {
                    reader.pipe().flush();
                }
            },
        )
    }

    /// Writes `frames` frames from `buffer`.
    ///
    /// Adapted streams block until the pump thread has consumed the buffer
    /// and return how much it took; buffered streams block while the pipe
    /// is full. Provider-backed streams fail with [`AudioError::Unsupported`].
    pub fn write(&self, buffer: &[u8], frames: usize) -> Result<usize, AudioError> {
        match &self.source {
            Source::Provider(_) => Err(AudioError::unsupported(
                "write on a provider-backed stream",
            )),
            Source::Adapted(adaptor) => {
                self.core.check_started()?;
                adaptor.write(buffer, frames)
            }
            Source::Buffered(reader) => {
                self.core.check_started()?;
                reader.pipe().write(buffer, frames)
            }
        }
    }

    /// Pulls that found nothing written, for adapted streams.
    #[must_use]
    pub fn underruns(&self) -> u64 {
        match &self.source {
            Source::Adapted(adaptor) => adaptor.underruns(),
            _ => 0,
        }
    }

    fn upstream(&self) -> &dyn BufferProvider {
        match &self.source {
            Source::Provider(provider) => provider.as_ref(),
            Source::Adapted(adaptor) => adaptor,
            Source::Buffered(reader) => reader,
        }
    }
}

impl BufferProvider for OutStream {
    fn get_next_buffer(&self, frames: usize) -> Result<Buffer<'_>, AudioError> {
        if !self.core.has_resampler() {
            return self.upstream().get_next_buffer(frames);
        }
        let mut guard = self.core.resampler();
        let Some(resampler) = guard.as_mut() else {
            return Err(AudioError::resampler_init("resampler was detached"));
        };

        let scratch = self.core.rsmp_buf();
        let mut buffer = scratch.lend(frames, self.core.params().frame_size())?;
        let produced = buffer
            .as_bytes_mut()
            .and_then(|bytes| resampler.resample_from(self.upstream(), bytes, frames));
        match produced {
            Ok(produced) => {
                buffer.set_frames(produced);
                Ok(buffer)
            }
            Err(error) => {
                scratch.reclaim(buffer)?;
                Err(error)
            }
        }
    }

    fn release_buffer(&self, buffer: Buffer<'_>) {
        if !self.core.has_resampler() {
            self.upstream().release_buffer(buffer);
            return;
        }
        if let Err(error) = self.core.rsmp_buf().reclaim(buffer) {
            tracing::warn!(%error, "playback stream release");
        }
    }
}

impl RoutedStream for OutStream {
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

impl Drop for OutStream {
    fn drop(&mut self) {
        self.core.release_on_drop();
    }
}
