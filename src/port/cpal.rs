//! Hardware ports backed by cpal.
//!
//! cpal streams are not `Send`, so each open port owns a thread that builds
//! and plays the stream and parks until the port is closed. Samples cross
//! between that stream's callback and the pump thread through a ringbuf
//! SPSC ring sized to a few blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::{checked_bytes, PcmInPort, PcmOutPort, PcmPort};
use crate::format::{f32_to_i16, i16_to_f32, read_i16, write_i16};
use crate::{AudioError, PcmParams};

/// Blocks of ring buffering between the cpal callback and the pump.
const RING_BLOCKS: usize = 4;

/// How long a blocked transfer sleeps between ring checks.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

fn backend(port: &str, error: impl std::fmt::Display) -> AudioError {
    AudioError::port_io(port, error.to_string())
}

fn find_device(input: bool, name: Option<&str>) -> Result<Device, AudioError> {
    let host = cpal::default_host();
    let label = name.unwrap_or("default");
    let device = match name {
        None if input => host.default_input_device(),
        None => host.default_output_device(),
        Some(wanted) => {
            let devices = if input {
                host.input_devices()
            } else {
                host.output_devices()
            }
            .map_err(|e| backend(label, e))?;
            devices
                .into_iter()
                .find(|device| device.name().is_ok_and(|n| n == wanted))
        }
    };
    device.ok_or_else(|| AudioError::port_io(label, "device not found"))
}

/// The thread holding a playing cpal stream.
struct Running {
    params: PcmParams,
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl Running {
    /// Spawns the stream thread and waits until the stream plays or fails.
    fn spawn<F>(name: &str, params: PcmParams, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let port = name.to_string();

        let thread = thread::Builder::new()
            .name(format!("cpal-{name}"))
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream.play().map_err(|e| backend(&port, e))?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(error) => {
                        let _ = ready_tx.send(Err(error));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Parked until the port closes; the stream stops when dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::ThreadSpawn {
                reason: e.to_string(),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                params,
                stop_tx,
                thread,
            }),
            Ok(Err(error)) => {
                let _ = thread.join();
                Err(error)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::ThreadPanicked {
                    name: format!("cpal-{name}"),
                })
            }
        }
    }

    fn shut(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            tracing::error!("cpal stream thread panicked");
        }
    }
}

fn stream_config(name: &str, params: &PcmParams) -> Result<StreamConfig, AudioError> {
    params.check_block()?;
    if params.sample_bits != 16 {
        return Err(AudioError::unsupported(format!(
            "{name}: {}-bit samples, cpal ports carry 16-bit",
            params.sample_bits
        )));
    }
    let channels = u16::try_from(params.channels)
        .map_err(|_| AudioError::invalid_params(format!("{} channels", params.channels)))?;
    Ok(StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    })
}

/// Capture port on a cpal input device.
///
/// Samples the callback cannot fit into the ring are dropped.
pub struct CpalInPort {
    name: String,
    device: Option<String>,
    running: Mutex<Option<Running>>,
    consumer: Mutex<Option<HeapCons<i16>>>,
    stopped: AtomicBool,
}

impl CpalInPort {
    /// Port on the default input device.
    pub fn default_device() -> Self {
        Self::build(None)
    }

    /// Port on the input device called `device`.
    pub fn with_device(device: impl Into<String>) -> Self {
        Self::build(Some(device.into()))
    }

    fn build(device: Option<String>) -> Self {
        Self {
            name: device.clone().unwrap_or_else(|| "default-in".into()),
            device,
            running: Mutex::new(None),
            consumer: Mutex::new(None),
            stopped: AtomicBool::new(true),
        }
    }
}

fn build_input(
    port: &str,
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProd<i16>,
) -> Result<cpal::Stream, AudioError> {
    let format = device
        .default_input_config()
        .map_err(|e| backend(port, e))?
        .sample_format();
    let on_error = |err: cpal::StreamError| tracing::error!("cpal input stream error: {}", err);

    let stream = match format {
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let _ = producer.push_slice(data);
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    let _ = producer.try_push(f32_to_i16(sample));
                }
            },
            on_error,
            None,
        ),
        other => {
            return Err(AudioError::unsupported(format!("{port}: {other:?} samples")));
        }
    };
    stream.map_err(|e| backend(port, e))
}

impl PcmPort for CpalInPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, params: &PcmParams) -> Result<(), AudioError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(AudioError::PortBusy {
                port: self.name.clone(),
            });
        }
        let config = stream_config(&self.name, params)?;
        let ring = HeapRb::<i16>::new(params.sample_count().max(1) * RING_BLOCKS);
        let (producer, consumer) = ring.split();

        let name = self.name.clone();
        let wanted = self.device.clone();
        *running = Some(Running::spawn(&self.name, *params, move || {
            let device = find_device(true, wanted.as_deref())?;
            build_input(&name, &device, &config, producer)
        })?);
        *self.consumer.lock() = Some(consumer);
        self.stopped.store(false, Ordering::SeqCst);
        tracing::info!(port = %self.name, ?params, "cpal input opened");
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(running) = self.running.lock().take() {
            running.shut();
            tracing::info!(port = %self.name, "cpal input closed");
        }
        self.consumer.lock().take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.running.lock().is_some()
    }

    fn start(&self) -> Result<(), AudioError> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl PcmInPort for CpalInPort {
    fn read(&self, buffer: &mut [u8], frames: usize) -> Result<usize, AudioError> {
        let params = self
            .running
            .lock()
            .as_ref()
            .map(|running| running.params)
            .ok_or_else(|| AudioError::port_closed(&self.name))?;
        let bytes = checked_bytes(&self.name, &params, buffer.len(), frames)?;
        let wanted = bytes / 2;

        let mut guard = self.consumer.lock();
        let consumer = guard
            .as_mut()
            .ok_or_else(|| AudioError::port_closed(&self.name))?;
        while consumer.occupied_len() < wanted {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(0);
            }
            thread::sleep(POLL_INTERVAL);
        }

        let mut samples = vec![0i16; wanted];
        let popped = consumer.pop_slice(&mut samples);
        for (index, &sample) in samples[..popped].iter().enumerate() {
            write_i16(buffer, index, sample);
        }
        Ok(params.bytes_to_frames(popped * 2))
    }
}

/// Playback port on a cpal output device.
///
/// The callback plays silence when the ring runs dry.
pub struct CpalOutPort {
    name: String,
    device: Option<String>,
    running: Mutex<Option<Running>>,
    producer: Mutex<Option<HeapProd<i16>>>,
    stopped: AtomicBool,
}

impl CpalOutPort {
    /// Port on the default output device.
    pub fn default_device() -> Self {
        Self::build(None)
    }

    /// Port on the output device called `device`.
    pub fn with_device(device: impl Into<String>) -> Self {
        Self::build(Some(device.into()))
    }

    fn build(device: Option<String>) -> Self {
        Self {
            name: device.clone().unwrap_or_else(|| "default-out".into()),
            device,
            running: Mutex::new(None),
            producer: Mutex::new(None),
            stopped: AtomicBool::new(true),
        }
    }
}

fn build_output(
    port: &str,
    device: &Device,
    config: &StreamConfig,
    mut consumer: HeapCons<i16>,
) -> Result<cpal::Stream, AudioError> {
    let format = device
        .default_output_config()
        .map_err(|e| backend(port, e))?
        .sample_format();
    let on_error = |err: cpal::StreamError| tracing::error!("cpal output stream error: {}", err);

    let stream = match format {
        SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let played = consumer.pop_slice(data);
                data[played..].fill(0);
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for slot in data.iter_mut() {
                    *slot = consumer.try_pop().map_or(0.0, i16_to_f32);
                }
            },
            on_error,
            None,
        ),
        other => {
            return Err(AudioError::unsupported(format!("{port}: {other:?} samples")));
        }
    };
    stream.map_err(|e| backend(port, e))
}

impl PcmPort for CpalOutPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, params: &PcmParams) -> Result<(), AudioError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(AudioError::PortBusy {
                port: self.name.clone(),
            });
        }
        let config = stream_config(&self.name, params)?;
        let ring = HeapRb::<i16>::new(params.sample_count().max(1) * RING_BLOCKS);
        let (producer, consumer) = ring.split();

        let name = self.name.clone();
        let wanted = self.device.clone();
        *running = Some(Running::spawn(&self.name, *params, move || {
            let device = find_device(false, wanted.as_deref())?;
            build_output(&name, &device, &config, consumer)
        })?);
        *self.producer.lock() = Some(producer);
        self.stopped.store(false, Ordering::SeqCst);
        tracing::info!(port = %self.name, ?params, "cpal output opened");
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(running) = self.running.lock().take() {
            running.shut();
            tracing::info!(port = %self.name, "cpal output closed");
        }
        self.producer.lock().take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.running.lock().is_some()
    }

    fn start(&self) -> Result<(), AudioError> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl PcmOutPort for CpalOutPort {
    fn write(&self, buffer: &[u8], frames: usize) -> Result<usize, AudioError> {
        let params = self
            .running
            .lock()
            .as_ref()
            .map(|running| running.params)
            .ok_or_else(|| AudioError::port_closed(&self.name))?;
        let bytes = checked_bytes(&self.name, &params, buffer.len(), frames)?;
        let samples: Vec<i16> = (0..bytes / 2).map(|i| read_i16(buffer, i)).collect();

        let mut guard = self.producer.lock();
        let producer = guard
            .as_mut()
            .ok_or_else(|| AudioError::port_closed(&self.name))?;
        let mut pushed = 0;
        while pushed < samples.len() {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            let count = producer.push_slice(&samples[pushed..]);
            if count == 0 {
                thread::sleep(POLL_INTERVAL);
            }
            pushed += count;
        }
        let channels = params.channels as usize;
        Ok(pushed / channels)
    }
}
