//! Loopback routing example.
//!
//! Plays a 48 kHz tone on the left channel and a 16 kHz tone on the right
//! channel of one stereo playback port, while a capture pump splits a
//! scripted stereo microphone into two mono streams.
//!
//! Run with: cargo run --example loopback
//!
//! With `--features cpal` the playback port is the default output device.

use std::sync::Arc;
use std::thread;

use pcm_route::format::{bytes_to_i16, i16_to_bytes};
use pcm_route::port::{MockInPort, PcmOutPort};
use pcm_route::{
    BufferAdaptor, InStream, OutStream, PcmParams, PcmReader, PcmWriter, PumpConfig, Quality,
    SlotMap, ADAPTOR_PULL_TIMEOUT,
};

fn tone(rate: u32, freq: f32, frames: usize, start: usize) -> Vec<i16> {
    (start..start + frames)
        .map(|i| ((i as f32 * freq * 2.0 * std::f32::consts::PI / rate as f32).sin() * 6000.0) as i16)
        .collect()
}

fn playback_port() -> Arc<dyn PcmOutPort> {
    #[cfg(feature = "cpal")]
    {
        Arc::new(pcm_route::port::CpalOutPort::default_device())
    }
    #[cfg(not(feature = "cpal"))]
    {
        Arc::new(pcm_route::port::NullOutPort::with_name("speakers"))
    }
}

/// Feeds `blocks` blocks of a tone into an adapted playback stream.
fn play(stream: Arc<OutStream>, freq: f32, blocks: usize) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let params = stream.params();
        let mut bytes = vec![0u8; params.buffer_size()];
        for block in 0..blocks {
            let samples = tone(params.sample_rate, freq, params.frame_count, block * params.frame_count);
            i16_to_bytes(&samples, &mut bytes);
            let mut done = 0;
            while done < params.frame_count {
                match stream.write(&bytes[done * params.frame_size()..], params.frame_count - done) {
                    Ok(frames) => done += frames,
                    Err(error) => {
                        tracing::warn!(%error, "playback write stopped");
                        return;
                    }
                }
            }
        }
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt::init();

    let config = PumpConfig::default()
        .with_quality(Quality::Desktop)
        .with_event_callback(|event| tracing::info!(?event, "route event"));

    // Playback: two mono streams sharing one stereo port
    let port_params = PcmParams::new(2, 16, 48000, 480);
    let writer = PcmWriter::new(playback_port(), port_params, config.clone());

    let left_params = PcmParams::new(1, 16, 48000, 480);
    let left = OutStream::from_adaptor(
        left_params,
        SlotMap::consecutive(0b1, 0b01),
        BufferAdaptor::new(left_params.frame_size()).with_timeout(ADAPTOR_PULL_TIMEOUT),
    );
    let right_params = PcmParams::new(1, 16, 16000, 160);
    let right = OutStream::from_adaptor(
        right_params,
        SlotMap::consecutive(0b1, 0b10),
        BufferAdaptor::new(right_params.frame_size()).with_timeout(ADAPTOR_PULL_TIMEOUT),
    );
    writer.register_stream(&left)?;
    writer.register_stream(&right)?;
    println!("right stream resampling: {}", right.is_resampling());

    left.start()?;
    right.start()?;
    let players = [play(left.clone(), 440.0, 100), play(right.clone(), 220.0, 100)];

    // Capture: one scripted stereo mic split into two mono streams
    let mic_params = PcmParams::new(2, 16, 48000, 480);
    let script: Vec<i16> = (0..48000).flat_map(|i| [(i % 1000) as i16, -((i % 1000) as i16)]).collect();
    let mic = Arc::new(MockInPort::new("mic").with_samples(&script));
    let reader = PcmReader::new(mic, mic_params, config);

    let mono = PcmParams::new(1, 16, 48000, 480);
    let mic_left = InStream::buffered_with_map(mono, SlotMap::consecutive(0b01, 0b1));
    let mic_right = InStream::buffered_with_map(mono, SlotMap::consecutive(0b10, 0b1));
    reader.register_stream(&mic_left)?;
    reader.register_stream(&mic_right)?;
    mic_left.start()?;
    mic_right.start()?;

    let mut block = vec![0u8; mono.buffer_size()];
    for _ in 0..20 {
        let frames = mic_left.read(&mut block, mono.frame_count)?;
        let left_peak = bytes_to_i16(&block[..frames * 2]).into_iter().max().unwrap_or(0);
        let frames = mic_right.read(&mut block, mono.frame_count)?;
        let right_peak = bytes_to_i16(&block[..frames * 2]).into_iter().min().unwrap_or(0);
        println!("captured peaks: left {left_peak}, right {right_peak}");
    }

    mic_left.stop()?;
    mic_right.stop()?;
    println!("Capture stats: {:?}", reader.stats());

    for player in players {
        let _ = player.join();
    }
    left.stop()?;
    right.stop()?;
    println!("Playback stats: {:?}", writer.stats());

    Ok(())
}
