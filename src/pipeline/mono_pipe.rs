//! Blocking single-producer/single-consumer frame pipe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::buffer::{Buffer, BufferProvider, Scratch};
use crate::{AudioError, PcmParams};

/// Shortest sleep of a blocked pipe call.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Ring buffer of whole PCM frames.
///
/// `write` blocks while the pipe is full. `read` never blocks for long: if
/// fewer frames are queued than asked for, it sleeps for the time the
/// missing frames take to play at the pipe's rate, then returns whatever is
/// there.
pub struct MonoPipe {
    params: PcmParams,
    frame_size: usize,
    size: usize,
    producer: Mutex<HeapProd<u8>>,
    consumer: Mutex<HeapCons<u8>>,
    shutdown: AtomicBool,
}

impl MonoPipe {
    /// Minimum pipe size, in blocks.
    pub const PIPE_SIZE_FACTOR: usize = 3;

    /// Creates a pipe holding [`PIPE_SIZE_FACTOR`](Self::PIPE_SIZE_FACTOR)
    /// blocks of `params`.
    pub fn new(params: PcmParams) -> Self {
        Self::with_size(params, 0)
    }

    /// Creates a pipe holding at least `frames` frames.
    ///
    /// The size is never less than three blocks and is rounded up to a power
    /// of two.
    pub fn with_size(params: PcmParams, frames: usize) -> Self {
        let frame_size = params.frame_size().max(1);
        let size = frames
            .max(Self::PIPE_SIZE_FACTOR * params.frame_count)
            .max(1)
            .next_power_of_two();
        let (producer, consumer) = HeapRb::<u8>::new(size * frame_size).split();
        tracing::trace!(size, frame_size, "pipe created");
        Self {
            params,
            frame_size,
            size,
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Checks that the pipe's params describe whole frames and blocks.
    pub fn init_check(&self) -> Result<(), AudioError> {
        self.params.check_block()
    }

    /// Frame shape.
    #[must_use]
    pub fn params(&self) -> PcmParams {
        self.params
    }

    /// Capacity in frames.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Frames queued for reading.
    #[must_use]
    pub fn available_to_read(&self) -> usize {
        self.consumer.lock().occupied_len() / self.frame_size
    }

    /// Frames that can be written without blocking.
    #[must_use]
    pub fn available_to_write(&self) -> usize {
        self.producer.lock().vacant_len() / self.frame_size
    }

    /// Stops (`true`) or re-enables (`false`) blocking writes.
    ///
    /// While shut down, a blocked `write` returns what it has written so far
    /// and new writes fail with [`AudioError::Shutdown`].
    pub fn shutdown(&self, enable: bool) {
        self.shutdown.store(enable, Ordering::SeqCst);
    }

    /// Returns `true` if the pipe is shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Drops every queued frame.
    pub fn flush(&self) {
        if !self.is_shutdown() {
            tracing::warn!("flushing a pipe that is not shut down");
        }
        let dropped = self.consumer.lock().clear();
        tracing::trace!(frames = dropped / self.frame_size, "pipe flushed");
    }

    /// Queues `frames` frames of `data`, blocking while the pipe is full.
    ///
    /// Returns the frames written, which is fewer than asked only if the
    /// pipe was shut down meanwhile.
    pub fn write(&self, data: &[u8], frames: usize) -> Result<usize, AudioError> {
        self.check_len(data.len(), frames)?;
        let fs = self.frame_size;
        let mut written = 0;

        while written < frames {
            if self.is_shutdown() {
                break;
            }
            let count = {
                let mut producer = self.producer.lock();
                let count = (producer.vacant_len() / fs).min(frames - written);
                if count > 0 {
                    producer.push_slice(&data[written * fs..(written + count) * fs]);
                }
                count
            };
            if count == 0 {
                let missing = (frames - written).min(self.params.frame_count);
                thread::sleep(self.frames_to_duration(missing));
            }
            written += count;
        }

        if written == 0 && frames > 0 {
            return Err(AudioError::Shutdown);
        }
        Ok(written)
    }

    /// Takes up to `frames` frames into `data`.
    ///
    /// Sleeps once for the duration of the missing frames if the pipe is
    /// short, then returns what is queued, possibly zero.
    pub fn read(&self, data: &mut [u8], frames: usize) -> Result<usize, AudioError> {
        self.check_len(data.len(), frames)?;
        let available = self.available_to_read();
        if available < frames && !self.is_shutdown() {
            thread::sleep(self.frames_to_duration(frames - available));
        }

        let mut consumer = self.consumer.lock();
        let count = (consumer.occupied_len() / self.frame_size).min(frames);
        consumer.pop_slice(&mut data[..count * self.frame_size]);
        Ok(count)
    }

    fn check_len(&self, len: usize, frames: usize) -> Result<(), AudioError> {
        let bytes = frames * self.frame_size;
        if bytes > len {
            return Err(AudioError::invalid_params(format!(
                "{frames} frames need {bytes} bytes, buffer has {len}"
            )));
        }
        Ok(())
    }

    fn frames_to_duration(&self, frames: usize) -> Duration {
        Duration::from_micros(self.params.frames_to_micros(frames)).max(MIN_WAIT)
    }
}

/// [`BufferProvider`] that drains a [`MonoPipe`].
///
/// A short pipe yields a short buffer; an empty one fails with
/// [`AudioError::Underrun`].
pub struct PipeReader {
    pipe: Arc<MonoPipe>,
    scratch: Scratch,
}

impl PipeReader {
    /// Creates a reader over `pipe`.
    pub fn new(pipe: Arc<MonoPipe>) -> Self {
        Self {
            pipe,
            scratch: Scratch::new(),
        }
    }

    /// The pipe being read.
    #[must_use]
    pub fn pipe(&self) -> &Arc<MonoPipe> {
        &self.pipe
    }
}

impl BufferProvider for PipeReader {
    fn get_next_buffer(&self, frames: usize) -> Result<Buffer<'_>, AudioError> {
        let mut buffer = self.scratch.lend(frames, self.pipe.frame_size)?;

        let read = buffer
            .as_bytes_mut()
            .and_then(|bytes| self.pipe.read(bytes, frames));
        let total = match read {
            Ok(total) => total,
            Err(error) => {
                self.scratch.reclaim(buffer)?;
                return Err(error);
            }
        };
        if total == 0 {
            self.scratch.reclaim(buffer)?;
            return Err(AudioError::Underrun);
        }
        if total < frames {
            tracing::trace!(requested = frames, provided = total, "pipe reader short");
        }
        buffer.set_frames(total);
        Ok(buffer)
    }

    fn release_buffer(&self, buffer: Buffer<'_>) {
        let consumed = buffer.frames();
        if let Err(error) = self.scratch.reclaim(buffer) {
            tracing::warn!(%error, "pipe reader release");
            return;
        }
        if consumed == 0 {
            thread::sleep(self.pipe.frames_to_duration(self.pipe.params.frame_count));
        }
    }
}

/// [`BufferProvider`] that fills a [`MonoPipe`].
///
/// Released frames are written to the pipe, blocking while it is full.
/// Frames released after the pipe was shut down are dropped.
pub struct PipeWriter {
    pipe: Arc<MonoPipe>,
    scratch: Scratch,
}

impl PipeWriter {
    /// Creates a writer over `pipe`.
    pub fn new(pipe: Arc<MonoPipe>) -> Self {
        Self {
            pipe,
            scratch: Scratch::new(),
        }
    }

    /// The pipe being written.
    #[must_use]
    pub fn pipe(&self) -> &Arc<MonoPipe> {
        &self.pipe
    }
}

impl BufferProvider for PipeWriter {
    fn get_next_buffer(&self, frames: usize) -> Result<Buffer<'_>, AudioError> {
        self.scratch.lend(frames, self.pipe.frame_size)
    }

    fn release_buffer(&self, buffer: Buffer<'_>) {
        if !self.scratch.is_lent(&buffer) {
            tracing::warn!("pipe writer release of a buffer it did not lend");
            return;
        }
        let frames = buffer.frames();
        if frames > 0 {
            match self.pipe.write(buffer.as_bytes(), frames) {
                Ok(written) if written < frames => {
                    tracing::debug!(dropped = frames - written, "pipe shut down mid-write");
                }
                Ok(_) | Err(AudioError::Shutdown) => {}
                Err(error) => tracing::warn!(%error, "pipe writer release"),
            }
        }
        if let Err(error) = self.scratch.reclaim(buffer) {
            tracing::warn!(%error, "pipe writer release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn params(frames: usize) -> PcmParams {
        PcmParams::new(2, 16, 48000, frames)
    }

    #[test]
    fn test_size_is_at_least_three_blocks() {
        for frames in [1, 100, 256, 480, 1000] {
            let pipe = MonoPipe::new(params(frames));
            assert!(pipe.size() >= 3 * frames);
            assert!(pipe.size().is_power_of_two());
            assert_eq!(pipe.available_to_write(), pipe.size());
            assert_eq!(pipe.available_to_read(), 0);
        }
        assert_eq!(MonoPipe::with_size(params(16), 200).size(), 256);
    }

    #[test]
    fn test_write_read_keeps_order() {
        let pipe = MonoPipe::new(params(4));
        let data: Vec<u8> = (0..32).collect();
        assert_eq!(pipe.write(&data, 8).unwrap(), 8);
        assert_eq!(pipe.available_to_read(), 8);
        assert!(pipe.available_to_read() + pipe.available_to_write() <= pipe.size());

        let mut out = vec![0u8; 16];
        assert_eq!(pipe.read(&mut out, 4).unwrap(), 4);
        assert_eq!(out, &data[..16]);
        assert_eq!(pipe.read(&mut out, 4).unwrap(), 4);
        assert_eq!(out, &data[16..]);
    }

    #[test]
    fn test_short_read_sleeps_then_returns_partial() {
        let pipe = MonoPipe::new(PcmParams::new(1, 16, 1000, 10));
        pipe.write(&[1, 0, 2, 0], 2).unwrap();

        let mut out = [0u8; 20];
        let start = Instant::now();
        assert_eq!(pipe.read(&mut out, 10).unwrap(), 2);
        // 8 missing frames at 1 kHz
        assert!(start.elapsed() >= Duration::from_millis(7));
        assert_eq!(&out[..4], &[1, 0, 2, 0]);
    }

    #[test]
    fn test_shutdown_unblocks_full_write() {
        let pipe = Arc::new(MonoPipe::new(PcmParams::new(1, 16, 8000, 4)));
        let size = pipe.size();
        let data = vec![0u8; (size + 4) * 2];

        let writer = {
            let pipe = pipe.clone();
            thread::spawn(move || pipe.write(&data, size + 4))
        };
        thread::sleep(Duration::from_millis(20));
        pipe.shutdown(true);
        assert_eq!(writer.join().unwrap(), Ok(size));
        assert_eq!(pipe.write(&[0, 0], 1), Err(AudioError::Shutdown));

        pipe.flush();
        assert_eq!(pipe.available_to_read(), 0);
        pipe.shutdown(false);
        assert_eq!(pipe.write(&[0, 0], 1), Ok(1));
    }

    #[test]
    fn test_init_check_rejects_empty_block() {
        assert!(MonoPipe::new(params(0)).init_check().is_err());
        assert!(MonoPipe::new(params(64)).init_check().is_ok());
    }

    #[test]
    fn test_pipe_reader_provides_fewer_frames() {
        let pipe = Arc::new(MonoPipe::new(PcmParams::new(1, 16, 48000, 8)));
        pipe.write(&[5, 0, 6, 0, 7, 0], 3).unwrap();
        let reader = PipeReader::new(pipe.clone());

        let buffer = reader.get_next_buffer(8).unwrap();
        assert_eq!(buffer.frames(), 3);
        assert_eq!(buffer.as_bytes(), &[5, 0, 6, 0, 7, 0]);
        reader.release_buffer(buffer);

        assert_eq!(reader.get_next_buffer(8).unwrap_err(), AudioError::Underrun);
    }

    #[test]
    fn test_pipe_writer_forwards_released_frames() {
        let pipe = Arc::new(MonoPipe::new(PcmParams::new(1, 16, 48000, 8)));
        let writer = PipeWriter::new(pipe.clone());

        let mut buffer = writer.get_next_buffer(4).unwrap();
        buffer.as_bytes_mut().unwrap().copy_from_slice(&[1, 0, 2, 0, 3, 0, 4, 0]);
        buffer.set_frames(2);
        writer.release_buffer(buffer);

        assert_eq!(pipe.available_to_read(), 2);
        let mut out = [0u8; 4];
        pipe.read(&mut out, 2).unwrap();
        assert_eq!(out, [1, 0, 2, 0]);
    }

    #[test]
    fn test_pipe_writer_drops_frames_after_shutdown() {
        let pipe = Arc::new(MonoPipe::new(PcmParams::new(1, 16, 48000, 8)));
        pipe.shutdown(true);
        let writer = PipeWriter::new(pipe.clone());

        let buffer = writer.get_next_buffer(4).unwrap();
        writer.release_buffer(buffer);
        assert_eq!(pipe.available_to_read(), 0);
        assert!(writer.get_next_buffer(4).is_ok());
    }
}
