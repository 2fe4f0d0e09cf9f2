//! Integration tests for pcm-route.
//!
//! Everything here runs against null and scripted ports; nothing needs
//! audio hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pcm_route::format::{bytes_to_i16, i16_to_bytes};
use pcm_route::port::{MockInPort, MockOutPort, NullInPort, NullOutPort, PcmPort};
use pcm_route::{
    AudioError, Buffer, BufferAdaptor, BufferProvider, InStream, Merge, MonoPipe, OutStream,
    PcmParams, PcmReader, PcmWriter, PipeReader, PumpConfig, Resampler, RouteEvent, SlotMap,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Writes every frame, retrying partial writes.
fn write_all(stream: &OutStream, bytes: &[u8], frames: usize) {
    let frame_size = stream.params().frame_size();
    let mut done = 0;
    while done < frames {
        done += stream
            .write(&bytes[done * frame_size..], frames - done)
            .unwrap();
    }
}

fn zero_crossings(samples: &[i16]) -> usize {
    samples
        .windows(2)
        .filter(|pair| (pair[0] < 0) != (pair[1] < 0))
        .count()
}

#[test]
fn test_symmetric_map_covers_mask() {
    for mask in [0b1u32, 0b1010, 0xff, 0x8000_0001] {
        let map = SlotMap::symmetric(mask);
        assert_eq!(map.channel_count(), mask.count_ones() as usize);
        assert_eq!(map.src_mask(), mask);
        assert_eq!(map.dst_mask(), mask);
        assert!(map.is_valid());
    }
}

#[test]
fn test_consecutive_map_pairs_low_to_high() {
    let map = SlotMap::consecutive(0b1011_0000, 0b0000_0111);
    assert_eq!(map.src_mask(), 0b1011_0000);
    assert_eq!(map.dst_mask(), 0b0000_0111);
    let pairs: Vec<(u32, u32)> = map.iter().collect();
    assert_eq!(pairs, vec![(0, 4), (1, 5), (2, 7)]);
}

#[test]
fn test_merge_leaves_unclaimed_slots_silent() {
    let shared = PcmParams::new(4, 16, 48000, 32);
    let mono = PcmParams::new(1, 16, 48000, 32);
    let merge = Merge::new(shared);

    let pipe = Arc::new(MonoPipe::new(mono));
    let mut block = vec![0u8; mono.buffer_size()];
    i16_to_bytes(&[1234i16; 32], &mut block);
    pipe.write(&block, 32).unwrap();

    let stream = OutStream::with_map(mono, SlotMap::consecutive(0b1, 0b100), PipeReader::new(pipe));
    merge.register_stream(&stream).unwrap();

    let mut out = vec![0xAAu8; shared.buffer_size()];
    let report = merge
        .process(&mut Buffer::from_mut_slice(&mut out, shared.frame_size()))
        .unwrap();
    assert_eq!(report.serviced, 1);

    for frame in bytes_to_i16(&out).chunks_exact(4) {
        assert_eq!(frame, &[0, 0, 1234, 0]);
    }
}

#[test]
fn test_overlapping_registration_changes_nothing() {
    let shared = PcmParams::new(2, 16, 48000, 64);
    let merge = Merge::new(shared);
    let first = OutStream::adapted(shared);
    let second = OutStream::adapted_with_map(
        PcmParams::new(1, 16, 48000, 64),
        SlotMap::consecutive(0b1, 0b10),
    );

    merge.register_stream(&first).unwrap();
    let claimed = merge.claimed_mask();
    assert!(matches!(
        merge.register_stream(&second),
        Err(AudioError::SlotOverlap { .. })
    ));
    assert_eq!(merge.claimed_mask(), claimed);
    assert_eq!(merge.stream_count(), 1);
    assert!(!merge.is_stream_registered(&second));
}

#[test]
fn test_resampler_same_rate_twice_keeps_state() {
    let mut resampler = Resampler::with_params(
        PcmParams::new(2, 16, 44100, 256),
        PcmParams::new(2, 16, 48000, 256),
    );
    resampler.set_out_sample_rate(32000).unwrap();
    let ratio = resampler.ratio();
    let frames = resampler.buffer_frames();

    resampler.set_out_sample_rate(32000).unwrap();
    resampler.set_out_sample_rate(32000).unwrap();
    assert_eq!(resampler.ratio(), ratio);
    assert_eq!(resampler.buffer_frames(), frames);
}

#[test]
fn test_resampler_round_trip_keeps_tone() {
    let high = PcmParams::new(1, 16, 48000, 480);
    let low = PcmParams::new(1, 16, 32000, 320);
    let tone: Vec<i16> = (0..4800)
        .map(|i| ((i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 48000.0).sin() * 8000.0) as i16)
        .collect();

    let convert = |resampler: &mut Resampler, input: &[i16], capacity: usize| -> Vec<i16> {
        let mut bytes = vec![0u8; input.len() * 2];
        i16_to_bytes(input, &mut bytes);
        let mut out = vec![0u8; capacity * 2];
        let mut in_frames = input.len();
        let mut out_frames = capacity;
        resampler
            .resample(&bytes, &mut in_frames, &mut out, &mut out_frames)
            .unwrap();
        assert_eq!(in_frames, input.len());
        bytes_to_i16(&out[..out_frames * 2])
    };

    let mut down = Resampler::with_params(high, low);
    let mut up = Resampler::with_params(low, high);
    let middle = convert(&mut down, &tone, 6000);
    let back = convert(&mut up, &middle, 8000);

    // Up to one partial kernel chunk per pass stays staged
    assert!(back.len() <= tone.len() + 1, "got {} frames", back.len());
    assert!(back.len() + 64 >= tone.len(), "got {} frames", back.len());

    // Compare equal windows once the filters have settled
    let settled = 256;
    let end = back.len().min(tone.len());
    let expected = zero_crossings(&tone[settled..end]);
    let actual = zero_crossings(&back[settled..end]);
    assert!(actual.abs_diff(expected) <= 2, "{actual} vs {expected} crossings");
}

#[test]
fn test_adaptor_delivers_in_push_order() {
    let adaptor = Arc::new(BufferAdaptor::new(2).with_timeout(Duration::from_secs(1)));
    let pusher = {
        let adaptor = adaptor.clone();
        thread::spawn(move || {
            for value in 0..8i16 {
                let mut bytes = vec![0u8; 16 * 2];
                i16_to_bytes(&[value; 16], &mut bytes);
                assert_eq!(adaptor.write(&bytes, 16).unwrap(), 16);
            }
        })
    };

    for value in 0..8i16 {
        let buffer = adaptor.get_next_buffer(16).unwrap();
        assert_eq!(buffer.frames(), 16);
        assert!(bytes_to_i16(buffer.as_bytes()).iter().all(|&s| s == value));
        adaptor.release_buffer(buffer);
    }
    pusher.join().unwrap();
    assert_eq!(adaptor.underruns(), 0);
}

#[test]
fn test_mono_pipe_capacity_bounds() {
    let params = PcmParams::new(2, 16, 48000, 100);
    let pipe = MonoPipe::new(params);
    assert!(pipe.size() >= 300);
    assert_eq!(pipe.available_to_write() + pipe.available_to_read(), pipe.size());

    let block = vec![0u8; params.buffer_size()];
    pipe.write(&block, 100).unwrap();
    pipe.write(&block, 100).unwrap();
    let mut out = vec![0u8; params.buffer_size()];
    pipe.read(&mut out, 50).unwrap();
    assert!(pipe.available_to_write() + pipe.available_to_read() <= pipe.size());
    assert_eq!(pipe.available_to_read(), 150);
}

#[test]
fn test_port_open_while_any_stream_started() {
    init_tracing();
    let port = Arc::new(NullInPort::with_name("quad-mic"));
    let events = Arc::new(AtomicUsize::new(0));
    let counter = events.clone();
    let config = PumpConfig::default().with_event_callback(move |event| {
        if matches!(event, RouteEvent::PumpStarted { .. } | RouteEvent::PumpStopped { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let reader = PcmReader::new(port.clone(), PcmParams::new(4, 16, 48000, 128), config);
    let mono = PcmParams::new(1, 16, 48000, 128);

    let streams: Vec<Arc<InStream>> = (0..3)
        .map(|slot| InStream::adapted_with_map(mono, SlotMap::consecutive(1 << slot, 0b1)))
        .collect();
    for stream in &streams {
        reader.register_stream(stream).unwrap();
        stream.start().unwrap();
    }
    assert!(port.is_open());
    assert_eq!(reader.stats().users, 3);

    streams[0].stop().unwrap();
    streams[2].stop().unwrap();
    assert!(port.is_open());
    assert!(reader.stats().running);

    streams[1].stop().unwrap();
    assert!(!port.is_open());
    assert_eq!(events.load(Ordering::SeqCst), 2);

    streams[1].start().unwrap();
    assert!(port.is_open());
    streams[1].stop().unwrap();
    assert!(!port.is_open());
}

#[test]
fn test_mixed_rate_playback() {
    init_tracing();
    let params = PcmParams::new(2, 16, 48000, 256);
    let timeout = Duration::from_millis(500);

    // Stream A at the port rate passes through untouched
    let port_a = Arc::new(MockOutPort::new("spk-a"));
    let writer_a = PcmWriter::new(port_a.clone(), params, PumpConfig::default());
    let stream_a = OutStream::from_adaptor(
        params,
        SlotMap::symmetric(0b11),
        BufferAdaptor::new(params.frame_size()).with_timeout(timeout),
    );
    writer_a.register_stream(&stream_a).unwrap();
    assert!(!stream_a.is_resampling());

    // Stream B at 16 kHz on a second writer gets a resampler
    let low = PcmParams::new(2, 16, 16000, 256);
    let port_b = Arc::new(MockOutPort::new("spk-b"));
    let writer_b = PcmWriter::new(port_b.clone(), params, PumpConfig::default());
    let stream_b = OutStream::from_adaptor(
        low,
        SlotMap::symmetric(0b11),
        BufferAdaptor::new(low.frame_size()).with_timeout(timeout),
    );
    writer_b.register_stream(&stream_b).unwrap();
    assert!(stream_b.is_resampling());

    stream_a.start().unwrap();
    let ramp: Vec<i16> = (0..512).map(|i| i as i16 - 256).collect();
    let mut bytes_a = vec![0u8; params.buffer_size()];
    i16_to_bytes(&ramp, &mut bytes_a);
    write_all(&stream_a, &bytes_a, 256);

    stream_b.start().unwrap();
    let mut bytes_b = vec![0u8; low.buffer_size()];
    i16_to_bytes(&[-900i16; 512], &mut bytes_b);
    for _ in 0..10 {
        write_all(&stream_b, &bytes_b, 256);
    }

    stream_a.stop().unwrap();
    stream_b.stop().unwrap();

    let played_a = port_a.written_samples();
    assert_eq!(&played_a[..512], &ramp[..]);

    // 2560 frames at 16 kHz become about 7680 at 48 kHz
    let played_b = port_b.written_samples();
    assert!(played_b.len() >= 6000 * 2, "only {} samples", played_b.len());
    // Skip the filter delay and the step response at the start
    for &sample in &played_b[2000..6000 * 2] {
        assert!((i32::from(sample) + 900).abs() <= 2, "sample {sample}");
    }
}

#[test]
fn test_buffered_capture_splits_channels() {
    init_tracing();
    let samples: Vec<i16> = (0..2048).collect();
    let port = Arc::new(MockInPort::new("stereo-mic").with_samples(&samples));
    let reader = PcmReader::new(port, PcmParams::new(2, 16, 48000, 64), PumpConfig::default());

    let mono = PcmParams::new(1, 16, 48000, 64);
    let right = InStream::buffered_with_map(mono, SlotMap::consecutive(0b10, 0b1));
    reader.register_stream(&right).unwrap();
    right.start().unwrap();

    let mut collected = Vec::new();
    let mut block = vec![0u8; mono.buffer_size()];
    while collected.len() < 256 {
        let frames = right.read(&mut block, 64).unwrap();
        collected.extend(bytes_to_i16(&block[..frames * 2]));
    }
    right.stop().unwrap();

    let expected: Vec<i16> = (0..256).map(|i| 2 * i + 1).collect();
    assert_eq!(&collected[..256], &expected[..]);
}

#[test]
fn test_dropped_stream_is_skipped() {
    let port = Arc::new(NullOutPort::new());
    let writer = PcmWriter::new(port, PcmParams::new(2, 16, 48000, 64), PumpConfig::default());
    let stream = OutStream::adapted(PcmParams::new(2, 16, 48000, 64));
    writer.register_stream(&stream).unwrap();
    assert!(writer.is_stream_registered(&stream));

    drop(stream);
    let replacement = OutStream::adapted(PcmParams::new(2, 16, 48000, 64));
    writer.register_stream(&replacement).unwrap();
    assert!(writer.is_stream_registered(&replacement));
}

#[test]
fn test_push_on_provider_stream_unsupported() {
    struct Silence;

    impl BufferProvider for Silence {
        fn get_next_buffer(&self, _frames: usize) -> Result<Buffer<'_>, AudioError> {
            Err(AudioError::Underrun)
        }

        fn release_buffer(&self, _buffer: Buffer<'_>) {}
    }

    let stream = InStream::new(PcmParams::new(1, 16, 8000, 80), Silence);
    let mut block = [0u8; 160];
    assert!(matches!(
        stream.read(&mut block, 80),
        Err(AudioError::Unsupported { .. })
    ));
}
