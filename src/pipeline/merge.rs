//! Channel-slot multiplexing between one shared buffer and many streams.
//!
//! [`Merge`] gathers per-stream playback buffers into one hardware-width
//! buffer; [`UnMerge`] scatters one hardware-width capture buffer into
//! per-stream buffers. Each stream's [`SlotMap`] says which of its channels
//! land in which shared slot. Samples are copied as-is: no two streams may
//! claim the same shared slot, so nothing is ever summed.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferProvider};
use crate::event::{emit, EventCallback, RouteEvent};
use crate::{AudioError, PcmParams, SlotMap};

/// A stream that can be registered with a [`Merge`] or [`UnMerge`] engine.
pub trait RoutedStream: BufferProvider {
    /// Shape of the stream's own buffers.
    fn params(&self) -> PcmParams;

    /// Routing between the stream's channels and the shared buffer.
    fn slot_map(&self) -> &SlotMap;

    /// Returns `true` if the stream converts rate and block size itself.
    ///
    /// Such a stream hands the engine buffers at the engine's rate, so its
    /// own rate and block size need not match.
    fn can_resample(&self) -> bool {
        false
    }
}

/// Outcome of one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Streams whose frames were copied.
    pub serviced: usize,
    /// Streams skipped because they were gone, failed, or had no frames.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Merge,
    UnMerge,
}

impl Side {
    /// Slots claimed in the shared buffer.
    fn shared_mask(self, map: &SlotMap) -> u32 {
        match self {
            Self::Merge => map.dst_mask(),
            Self::UnMerge => map.src_mask(),
        }
    }

    /// Slots used in the stream's own buffer.
    fn stream_mask(self, map: &SlotMap) -> u32 {
        match self {
            Self::Merge => map.src_mask(),
            Self::UnMerge => map.dst_mask(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::UnMerge => "unmerge",
        }
    }
}

struct Entry {
    stream: Weak<dyn RoutedStream>,
    mask: u32,
}

impl Entry {
    fn is<S: RoutedStream + 'static>(&self, stream: &Arc<S>) -> bool {
        self.stream.as_ptr().cast::<u8>() == Arc::as_ptr(stream).cast::<u8>()
    }
}

#[derive(Default)]
struct Registry {
    entries: Vec<Entry>,
    claimed: u32,
}

impl Registry {
    fn purge_expired(&mut self) {
        let claimed = &mut self.claimed;
        self.entries.retain(|entry| {
            if entry.stream.strong_count() == 0 {
                *claimed &= !entry.mask;
                false
            } else {
                true
            }
        });
    }
}

/// State and registration logic shared by both directions.
struct Engine {
    side: Side,
    params: PcmParams,
    container: usize,
    events: Option<EventCallback>,
    registry: Mutex<Registry>,
}

impl Engine {
    fn new(side: Side, params: PcmParams, events: Option<EventCallback>) -> Self {
        Self {
            side,
            params,
            container: params.sample_size(),
            events,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn init_check(&self) -> Result<(), AudioError> {
        self.params.check_block()?;
        match self.params.sample_bits {
            16 | 24 | 32 => Ok(()),
            bits => Err(AudioError::unsupported(format!("{bits}-bit samples"))),
        }
    }

    fn register<S: RoutedStream + 'static>(&self, stream: &Arc<S>) -> Result<(), AudioError> {
        let params = stream.params();
        let can_resample = stream.can_resample();

        if params.sample_bits != self.params.sample_bits {
            return Err(AudioError::incompatible(format!(
                "{}-bit stream on {}-bit {}",
                params.sample_bits,
                self.params.sample_bits,
                self.side.name()
            )));
        }
        if !can_resample && params.sample_rate != self.params.sample_rate {
            return Err(AudioError::incompatible(format!(
                "{} Hz stream on {} Hz {} without resampler",
                params.sample_rate,
                self.params.sample_rate,
                self.side.name()
            )));
        }
        if !can_resample && params.frame_count != self.params.frame_count {
            return Err(AudioError::incompatible(format!(
                "{}-frame stream on {}-frame {} without resampler",
                params.frame_count,
                self.params.frame_count,
                self.side.name()
            )));
        }

        let map = stream.slot_map();
        if !map.is_valid() {
            return Err(AudioError::InvalidSlotMap);
        }
        let mask = self.side.shared_mask(map);
        if mask & !self.params.channel_mask() != 0 {
            return Err(AudioError::ChannelOutOfRange {
                mask,
                channels: self.params.channels,
            });
        }
        let stream_mask = self.side.stream_mask(map);
        if stream_mask & !params.channel_mask() != 0 {
            return Err(AudioError::ChannelOutOfRange {
                mask: stream_mask,
                channels: params.channels,
            });
        }

        let mut registry = self.registry.lock();
        registry.purge_expired();
        if registry.entries.iter().any(|entry| entry.is(stream)) {
            return Err(AudioError::AlreadyRegistered);
        }
        if mask & registry.claimed != 0 {
            return Err(AudioError::SlotOverlap {
                mask,
                claimed: registry.claimed,
            });
        }
        let limit = self.params.channels as usize;
        if registry.entries.len() >= limit {
            return Err(AudioError::CapacityExceeded { limit });
        }

        let weak: Weak<S> = Arc::downgrade(stream);
        let weak: Weak<dyn RoutedStream> = weak;
        registry.entries.push(Entry { stream: weak, mask });
        registry.claimed |= mask;
        tracing::debug!(
            side = self.side.name(),
            mask = format_args!("{mask:#x}"),
            claimed = format_args!("{:#x}", registry.claimed),
            streams = registry.entries.len(),
            "stream registered"
        );
        Ok(())
    }

    fn unregister<S: RoutedStream + 'static>(&self, stream: &Arc<S>) -> Result<(), AudioError> {
        let mut registry = self.registry.lock();
        let Some(index) = registry.entries.iter().position(|entry| entry.is(stream)) else {
            tracing::warn!(side = self.side.name(), "stream is not registered");
            return Err(AudioError::NotRegistered);
        };
        let entry = registry.entries.swap_remove(index);
        registry.claimed &= !entry.mask;
        registry.purge_expired();
        tracing::debug!(
            side = self.side.name(),
            mask = format_args!("{:#x}", entry.mask),
            streams = registry.entries.len(),
            "stream unregistered"
        );
        Ok(())
    }

    fn is_registered<S: RoutedStream + 'static>(&self, stream: &Arc<S>) -> bool {
        self.registry.lock().entries.iter().any(|entry| entry.is(stream))
    }

    fn skip(&self, report: &mut ProcessReport, reason: String) {
        tracing::warn!(side = self.side.name(), %reason, "stream skipped");
        report.skipped += 1;
        emit(self.events.as_ref(), RouteEvent::StreamSkipped { reason });
    }

    /// Runs one pass over every registered stream under the registry lock.
    ///
    /// `error` is recorded into the buffers of streams that return zero
    /// frames. Streams upgraded for the pass are dropped only after the lock
    /// is released: the last reference to a started stream closes its pump.
    fn process(
        &self,
        mut shared: Shared<'_>,
        frames: usize,
        error: Option<&AudioError>,
    ) -> ProcessReport {
        let mut report = ProcessReport::default();
        let mut held: Vec<Arc<dyn RoutedStream>> = Vec::new();
        let mut registry = self.registry.lock();
        let mut expired = false;

        for entry in &registry.entries {
            let Some(stream) = entry.stream.upgrade() else {
                expired = true;
                self.skip(&mut report, "stream was dropped while registered".into());
                continue;
            };
            held.push(Arc::clone(&stream));

            let mut buffer = match stream.get_next_buffer(frames) {
                Ok(buffer) => buffer,
                Err(error) => {
                    self.skip(&mut report, format!("no buffer from stream: {error}"));
                    continue;
                }
            };

            if buffer.frames() == 0 {
                buffer.set_error(error.cloned().unwrap_or(AudioError::NoFrames));
                stream.release_buffer(buffer);
                self.skip(&mut report, "stream returned zero frames".into());
                continue;
            }

            let params = stream.params();
            if buffer.frame_size() != params.frame_size() {
                let reason = format!(
                    "stream buffer has {}-byte frames, expected {}",
                    buffer.frame_size(),
                    params.frame_size()
                );
                buffer.set_error(AudioError::invalid_params(reason.clone()));
                stream.release_buffer(buffer);
                self.skip(&mut report, reason);
                continue;
            }

            let count = buffer.frames().min(frames);
            if count < frames {
                tracing::debug!(
                    side = self.side.name(),
                    requested = frames,
                    provided = count,
                    "partial stream buffer"
                );
            }

            let pairs: Vec<(usize, usize)> = stream
                .slot_map()
                .iter()
                .map(|(dst, src)| (dst as usize, src as usize))
                .collect();
            let stream_channels = params.channels as usize;
            let shared_channels = self.params.channels as usize;

            let copied = match &mut shared {
                Shared::Out(out) => {
                    route(
                        &pairs,
                        buffer.as_bytes(),
                        stream_channels,
                        out,
                        shared_channels,
                        count,
                        self.container,
                    );
                    Ok(())
                }
                Shared::In(input) => buffer.as_bytes_mut().map(|bytes| {
                    route(
                        &pairs,
                        input,
                        shared_channels,
                        bytes,
                        stream_channels,
                        count,
                        self.container,
                    );
                }),
            };

            match copied {
                Ok(()) => {
                    buffer.set_frames(count);
                    stream.release_buffer(buffer);
                    report.serviced += 1;
                }
                Err(error) => {
                    buffer.set_frames(0);
                    buffer.set_error(error.clone());
                    stream.release_buffer(buffer);
                    self.skip(&mut report, format!("cannot fill stream buffer: {error}"));
                }
            }
        }

        if expired {
            registry.purge_expired();
        }
        drop(registry);
        drop(held);
        report
    }
}

/// The hardware-width side of a pass.
enum Shared<'s> {
    /// Merge destination.
    Out(&'s mut [u8]),
    /// Unmerge source.
    In(&'s [u8]),
}

/// Copies mapped samples frame by frame. `pairs` are `(dst, src)` slots.
fn route(
    pairs: &[(usize, usize)],
    src: &[u8],
    src_channels: usize,
    dst: &mut [u8],
    dst_channels: usize,
    frames: usize,
    container: usize,
) {
    for frame in 0..frames {
        let src_frame = frame * src_channels;
        let dst_frame = frame * dst_channels;
        for &(dst_slot, src_slot) in pairs {
            let from = (src_frame + src_slot) * container;
            let to = (dst_frame + dst_slot) * container;
            dst[to..to + container].copy_from_slice(&src[from..from + container]);
        }
    }
}

fn check_shared(params: &PcmParams, buffer: &Buffer<'_>) -> Result<usize, AudioError> {
    if buffer.frame_size() != params.frame_size() {
        return Err(AudioError::invalid_params(format!(
            "shared buffer has {}-byte frames, expected {}",
            buffer.frame_size(),
            params.frame_size()
        )));
    }
    Ok(buffer.frames().min(params.frame_count))
}

/// Combines many playback streams into one shared buffer.
///
/// Each stream's slot-map *destination* mask names the shared slots it
/// owns. Slots nobody owns are silent.
pub struct Merge {
    engine: Engine,
}

impl Merge {
    /// Creates a merge engine for the shared buffer shape `params`.
    pub fn new(params: PcmParams) -> Self {
        Self::with_callback(params, None)
    }

    /// Creates a merge engine that reports skipped streams to `events`.
    pub fn with_callback(params: PcmParams, events: Option<EventCallback>) -> Self {
        Self {
            engine: Engine::new(Side::Merge, params, events),
        }
    }

    /// Checks that the params describe a supported shared buffer.
    pub fn init_check(&self) -> Result<(), AudioError> {
        self.engine.init_check()
    }

    /// Shared buffer shape.
    #[must_use]
    pub fn params(&self) -> PcmParams {
        self.engine.params
    }

    /// Adds a stream.
    ///
    /// Fails without side effects on width, rate or block size mismatch
    /// (rate and size are fine if the stream resamples), on an invalid or
    /// out-of-range slot map, on overlap with claimed slots, and when the
    /// stream count would exceed the channel count.
    pub fn register_stream<S: RoutedStream + 'static>(&self, stream: &Arc<S>) -> Result<(), AudioError> {
        self.engine.register(stream)
    }

    /// Removes a stream and frees its slots.
    pub fn unregister_stream<S: RoutedStream + 'static>(&self, stream: &Arc<S>) -> Result<(), AudioError> {
        self.engine.unregister(stream)
    }

    /// Returns `true` if `stream` is registered.
    pub fn is_stream_registered<S: RoutedStream + 'static>(&self, stream: &Arc<S>) -> bool {
        self.engine.is_registered(stream)
    }

    /// Number of registered streams, including dropped ones not yet purged.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.engine.registry.lock().entries.len()
    }

    /// Shared slots currently claimed.
    #[must_use]
    pub fn claimed_mask(&self) -> u32 {
        self.engine.registry.lock().claimed
    }

    /// Fills `buffer` from every registered stream.
    ///
    /// The buffer is clamped to the block size and zero-filled first. A
    /// stream that fails or yields no frames is skipped; one that yields
    /// fewer frames contributes only those.
    pub fn process(&self, buffer: &mut Buffer<'_>) -> Result<ProcessReport, AudioError> {
        let frames = check_shared(&self.engine.params, buffer)?;
        buffer.set_frames(frames);
        let shared = buffer.as_bytes_mut()?;
        shared.fill(0);
        Ok(self.engine.process(Shared::Out(shared), frames, None))
    }
}

/// Splits one shared capture buffer into many streams.
///
/// Each stream's slot-map *source* mask names the shared slots it reads.
pub struct UnMerge {
    engine: Engine,
}

impl UnMerge {
    /// Creates an unmerge engine for the shared buffer shape `params`.
    pub fn new(params: PcmParams) -> Self {
        Self::with_callback(params, None)
    }

    /// Creates an unmerge engine that reports skipped streams to `events`.
    pub fn with_callback(params: PcmParams, events: Option<EventCallback>) -> Self {
        Self {
            engine: Engine::new(Side::UnMerge, params, events),
        }
    }

    /// Checks that the params describe a supported shared buffer.
    pub fn init_check(&self) -> Result<(), AudioError> {
        self.engine.init_check()
    }

    /// Shared buffer shape.
    #[must_use]
    pub fn params(&self) -> PcmParams {
        self.engine.params
    }

    /// Adds a stream; see [`Merge::register_stream`] for the checks.
    pub fn register_stream<S: RoutedStream + 'static>(&self, stream: &Arc<S>) -> Result<(), AudioError> {
        self.engine.register(stream)
    }

    /// Removes a stream and frees its slots.
    pub fn unregister_stream<S: RoutedStream + 'static>(&self, stream: &Arc<S>) -> Result<(), AudioError> {
        self.engine.unregister(stream)
    }

    /// Returns `true` if `stream` is registered.
    pub fn is_stream_registered<S: RoutedStream + 'static>(&self, stream: &Arc<S>) -> bool {
        self.engine.is_registered(stream)
    }

    /// Number of registered streams, including dropped ones not yet purged.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.engine.registry.lock().entries.len()
    }

    /// Shared slots currently claimed.
    #[must_use]
    pub fn claimed_mask(&self) -> u32 {
        self.engine.registry.lock().claimed
    }

    /// Delivers `buffer` to every registered stream.
    ///
    /// Streams asked for zero frames (an empty `buffer`) get the buffer's
    /// error, or [`AudioError::NoFrames`], recorded into theirs.
    pub fn process(&self, buffer: &Buffer<'_>) -> Result<ProcessReport, AudioError> {
        let frames = check_shared(&self.engine.params, buffer)?;
        Ok(self
            .engine
            .process(Shared::In(buffer.as_bytes()), frames, buffer.error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Scratch;
    use crate::format::{bytes_to_i16, i16_to_bytes};

    /// Playback or capture stream backed by a fixed pattern.
    struct PatternStream {
        params: PcmParams,
        map: SlotMap,
        data: Vec<u8>,
        limit: Option<usize>,
        scratch: Scratch,
        captured: Mutex<Vec<i16>>,
    }

    impl PatternStream {
        fn new(params: PcmParams, map: SlotMap, samples: &[i16]) -> Arc<Self> {
            let mut data = vec![0u8; samples.len() * 2];
            i16_to_bytes(samples, &mut data);
            Arc::new(Self {
                params,
                map,
                data,
                limit: None,
                scratch: Scratch::new(),
                captured: Mutex::new(Vec::new()),
            })
        }
    }

    impl BufferProvider for PatternStream {
        fn get_next_buffer(&self, frames: usize) -> Result<Buffer<'_>, AudioError> {
            let frames = self.limit.map_or(frames, |limit| frames.min(limit));
            if self.data.is_empty() {
                return self.scratch.lend(frames, self.params.frame_size());
            }
            let end = (frames * self.params.frame_size()).min(self.data.len());
            Ok(Buffer::from_slice(&self.data[..end], self.params.frame_size()))
        }

        fn release_buffer(&self, buffer: Buffer<'_>) {
            if self.data.is_empty() {
                self.captured.lock().extend(bytes_to_i16(buffer.as_bytes()));
                self.scratch.reclaim(buffer).unwrap();
            }
        }
    }

    impl RoutedStream for PatternStream {
        fn params(&self) -> PcmParams {
            self.params
        }

        fn slot_map(&self) -> &SlotMap {
            &self.map
        }
    }

    fn shared() -> PcmParams {
        PcmParams::new(4, 16, 48000, 4)
    }

    #[test]
    fn test_merge_routes_and_zero_fills() {
        let merge = Merge::new(shared());
        merge.init_check().unwrap();
        // stereo stream into shared slots 1 and 3
        let stream = PatternStream::new(
            PcmParams::new(2, 16, 48000, 4),
            SlotMap::consecutive(0b11, 0b1010),
            &[1, 2, 3, 4, 5, 6, 7, 8],
        );
        merge.register_stream(&stream).unwrap();
        assert_eq!(merge.claimed_mask(), 0b1010);

        let mut out = vec![0xffu8; 4 * 4 * 2];
        let mut buffer = Buffer::from_mut_slice(&mut out, 8);
        let report = merge.process(&mut buffer).unwrap();
        assert_eq!(report.serviced, 1);
        drop(buffer);

        assert_eq!(
            bytes_to_i16(&out),
            vec![0, 1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0, 7, 0, 8]
        );
    }

    #[test]
    fn test_merge_clamps_to_block_size() {
        let merge = Merge::new(shared());
        let mut out = vec![0u8; 8 * 8];
        let mut buffer = Buffer::from_mut_slice(&mut out, 8);
        assert_eq!(buffer.frames(), 8);
        merge.process(&mut buffer).unwrap();
        assert_eq!(buffer.frames(), 4);
    }

    #[test]
    fn test_merge_partial_stream() {
        let merge = Merge::new(shared());
        let mut stream = PatternStream::new(
            PcmParams::new(1, 16, 48000, 4),
            SlotMap::consecutive(0b1, 0b1),
            &[9, 9, 9, 9],
        );
        Arc::get_mut(&mut stream).unwrap().limit = Some(2);
        merge.register_stream(&stream).unwrap();

        let mut out = vec![0u8; 4 * 4 * 2];
        let mut buffer = Buffer::from_mut_slice(&mut out, 8);
        merge.process(&mut buffer).unwrap();
        drop(buffer);
        let samples = bytes_to_i16(&out);
        assert_eq!(samples[0], 9);
        assert_eq!(samples[4], 9);
        assert_eq!(samples[8], 0);
        assert_eq!(samples[12], 0);
    }

    #[test]
    fn test_register_rejections_leave_state_untouched() {
        let merge = Merge::new(shared());
        let first = PatternStream::new(
            PcmParams::new(2, 16, 48000, 4),
            SlotMap::consecutive(0b11, 0b0011),
            &[0; 8],
        );
        merge.register_stream(&first).unwrap();

        let overlapping = PatternStream::new(
            PcmParams::new(2, 16, 48000, 4),
            SlotMap::consecutive(0b11, 0b0110),
            &[0; 8],
        );
        assert!(matches!(
            merge.register_stream(&overlapping),
            Err(AudioError::SlotOverlap { .. })
        ));

        let wrong_rate = PatternStream::new(
            PcmParams::new(2, 16, 16000, 4),
            SlotMap::consecutive(0b11, 0b1100),
            &[0; 8],
        );
        assert!(matches!(
            merge.register_stream(&wrong_rate),
            Err(AudioError::Incompatible { .. })
        ));

        let out_of_range = PatternStream::new(
            PcmParams::new(1, 16, 48000, 4),
            SlotMap::consecutive(0b1, 0b10000),
            &[0; 4],
        );
        assert!(matches!(
            merge.register_stream(&out_of_range),
            Err(AudioError::ChannelOutOfRange { .. })
        ));

        assert_eq!(merge.register_stream(&first), Err(AudioError::AlreadyRegistered));
        assert_eq!(merge.stream_count(), 1);
        assert_eq!(merge.claimed_mask(), 0b0011);
    }

    #[test]
    fn test_every_slot_claimed() {
        let params = PcmParams::new(2, 16, 48000, 4);
        let merge = Merge::new(params);
        let a = PatternStream::new(PcmParams::new(1, 16, 48000, 4), SlotMap::consecutive(1, 0b01), &[0; 4]);
        let b = PatternStream::new(PcmParams::new(1, 16, 48000, 4), SlotMap::consecutive(1, 0b10), &[0; 4]);
        merge.register_stream(&a).unwrap();
        merge.register_stream(&b).unwrap();
        assert_eq!(merge.stream_count(), 2);
        assert_eq!(merge.claimed_mask(), 0b11);
    }

    #[test]
    fn test_unregister_frees_slots() {
        let merge = Merge::new(shared());
        let stream = PatternStream::new(
            PcmParams::new(2, 16, 48000, 4),
            SlotMap::symmetric(0b11),
            &[0; 8],
        );
        merge.register_stream(&stream).unwrap();
        merge.unregister_stream(&stream).unwrap();
        assert_eq!(merge.claimed_mask(), 0);
        assert!(!merge.is_stream_registered(&stream));
        assert_eq!(merge.unregister_stream(&stream), Err(AudioError::NotRegistered));
    }

    #[test]
    fn test_dropped_stream_is_skipped_and_purged() {
        let merge = Merge::new(shared());
        let stream = PatternStream::new(
            PcmParams::new(2, 16, 48000, 4),
            SlotMap::symmetric(0b11),
            &[5; 8],
        );
        merge.register_stream(&stream).unwrap();
        drop(stream);

        let mut out = vec![0u8; 4 * 4 * 2];
        let mut buffer = Buffer::from_mut_slice(&mut out, 8);
        let report = merge.process(&mut buffer).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(merge.stream_count(), 0);
        assert_eq!(merge.claimed_mask(), 0);
    }

    #[test]
    fn test_unmerge_routes_to_streams() {
        let unmerge = UnMerge::new(shared());
        // stream channel 0 <- shared slot 2, stream channel 1 <- shared slot 3
        let stream = PatternStream::new(
            PcmParams::new(2, 16, 48000, 4),
            SlotMap::consecutive(0b1100, 0b0011),
            &[],
        );
        unmerge.register_stream(&stream).unwrap();
        assert_eq!(unmerge.claimed_mask(), 0b1100);

        let input: Vec<i16> = (0..16).collect();
        let mut bytes = vec![0u8; 32];
        i16_to_bytes(&input, &mut bytes);
        let report = unmerge.process(&Buffer::from_slice(&bytes, 8)).unwrap();
        assert_eq!(report.serviced, 1);
        assert_eq!(*stream.captured.lock(), vec![2, 3, 6, 7, 10, 11, 14, 15]);
    }

    #[test]
    fn test_merge_24bit_containers() {
        let params = PcmParams::new(2, 24, 48000, 2);
        let merge = Merge::new(params);
        let mut stream = PatternStream::new(
            PcmParams::new(1, 24, 48000, 2),
            SlotMap::consecutive(0b1, 0b10),
            &[],
        );
        Arc::get_mut(&mut stream).unwrap().data = vec![1, 2, 3, 0, 4, 5, 6, 0];
        merge.register_stream(&stream).unwrap();

        let mut out = vec![0u8; 16];
        let mut buffer = Buffer::from_mut_slice(&mut out, 8);
        merge.process(&mut buffer).unwrap();
        drop(buffer);
        assert_eq!(out, vec![0, 0, 0, 0, 1, 2, 3, 0, 0, 0, 0, 0, 4, 5, 6, 0]);
    }
}
