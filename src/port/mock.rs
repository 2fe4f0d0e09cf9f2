//! Scripted ports for testing without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{checked_bytes, PcmInPort, PcmOutPort, PcmPort};
use crate::format::{bytes_to_i16, i16_to_bytes};
use crate::{AudioError, PcmParams};

/// Bookkeeping shared by both mock ports.
struct MockState {
    name: String,
    params: Mutex<Option<PcmParams>>,
    stopped: AtomicBool,
    opens: AtomicUsize,
    transfers: AtomicUsize,
    fail_at: Option<(usize, AudioError)>,
    max_frames: Option<usize>,
    paced: bool,
}

impl MockState {
    fn new(name: String) -> Self {
        Self {
            name,
            params: Mutex::new(None),
            stopped: AtomicBool::new(true),
            opens: AtomicUsize::new(0),
            transfers: AtomicUsize::new(0),
            fail_at: None,
            max_frames: None,
            paced: true,
        }
    }

    fn open(&self, params: &PcmParams) -> Result<(), AudioError> {
        params.check_block()?;
        let mut current = self.params.lock();
        if current.is_some() {
            return Err(AudioError::PortBusy {
                port: self.name.clone(),
            });
        }
        *current = Some(*params);
        self.stopped.store(false, Ordering::SeqCst);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.params.lock().take();
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Validates a transfer and returns the frame count it will move.
    fn begin(&self, len: usize, frames: usize) -> Result<(PcmParams, usize), AudioError> {
        let params = (*self.params.lock()).ok_or_else(|| AudioError::port_closed(&self.name))?;
        if self.stopped.load(Ordering::SeqCst) {
            return Ok((params, 0));
        }
        checked_bytes(&self.name, &params, len, frames)?;

        let index = self.transfers.fetch_add(1, Ordering::SeqCst);
        if let Some((at, error)) = &self.fail_at {
            if index >= *at {
                return Err(error.clone());
            }
        }
        if self.paced {
            thread::sleep(Duration::from_micros(params.frames_to_micros(frames)));
        }
        Ok((params, self.max_frames.map_or(frames, |max| frames.min(max))))
    }
}

macro_rules! mock_port_common {
    ($port:ty) => {
        impl $port {
            /// Fails every transfer from the `index`-th (zero-based) on.
            #[must_use]
            pub fn fail_from(mut self, index: usize, error: AudioError) -> Self {
                self.state.fail_at = Some((index, error));
                self
            }

            /// Moves at most `frames` frames per transfer.
            #[must_use]
            pub fn with_max_frames(mut self, frames: usize) -> Self {
                self.state.max_frames = Some(frames);
                self
            }

            /// Transfers return at once instead of taking real time.
            #[must_use]
            pub fn unpaced(mut self) -> Self {
                self.state.paced = false;
                self
            }

            /// Number of successful `open` calls.
            #[must_use]
            pub fn open_count(&self) -> usize {
                self.state.opens.load(Ordering::SeqCst)
            }

            /// Number of transfers attempted while running.
            #[must_use]
            pub fn transfer_count(&self) -> usize {
                self.state.transfers.load(Ordering::SeqCst)
            }
        }

        impl PcmPort for $port {
            fn name(&self) -> &str {
                &self.state.name
            }

            fn open(&self, params: &PcmParams) -> Result<(), AudioError> {
                self.state.open(params)
            }

            fn close(&self) -> Result<(), AudioError> {
                self.state.close();
                Ok(())
            }

            fn is_open(&self) -> bool {
                self.state.params.lock().is_some()
            }

            fn start(&self) -> Result<(), AudioError> {
                self.state.stopped.store(false, Ordering::SeqCst);
                Ok(())
            }

            fn stop(&self) -> Result<(), AudioError> {
                self.state.stopped.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    };
}

/// Capture port that plays back queued 16-bit samples.
///
/// Once the queue runs dry, reads yield silence.
///
/// # Example
///
/// ```
/// use pcm_route::port::{MockInPort, PcmInPort, PcmPort};
/// use pcm_route::PcmParams;
///
/// let port = MockInPort::new("mic").with_samples(&[1, 2, 3, 4]).unpaced();
/// port.open(&PcmParams::new(1, 16, 8000, 4)).unwrap();
///
/// let mut block = [0u8; 8];
/// assert_eq!(port.read(&mut block, 4).unwrap(), 4);
/// ```
pub struct MockInPort {
    state: MockState,
    queue: Mutex<VecDeque<i16>>,
}

impl MockInPort {
    /// Creates a closed port with an empty queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: MockState::new(name.into()),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues interleaved samples to be read.
    #[must_use]
    pub fn with_samples(self, samples: &[i16]) -> Self {
        self.push_samples(samples);
        self
    }

    /// Queues more interleaved samples.
    pub fn push_samples(&self, samples: &[i16]) {
        self.queue.lock().extend(samples.iter().copied());
    }

    /// Samples still queued.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}

mock_port_common!(MockInPort);

impl PcmInPort for MockInPort {
    fn read(&self, buffer: &mut [u8], frames: usize) -> Result<usize, AudioError> {
        let (params, frames) = self.state.begin(buffer.len(), frames)?;
        let bytes = params.frames_to_bytes(frames);
        let block = &mut buffer[..bytes];
        block.fill(0);

        if params.sample_bits == 16 {
            let mut queue = self.queue.lock();
            let count = queue.len().min(bytes / 2);
            let samples: Vec<i16> = queue.drain(..count).collect();
            i16_to_bytes(&samples, block);
        }
        Ok(frames)
    }
}

/// Playback port that records everything written to it.
pub struct MockOutPort {
    state: MockState,
    written: Mutex<Vec<u8>>,
}

impl MockOutPort {
    /// Creates a closed port.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: MockState::new(name.into()),
            written: Mutex::new(Vec::new()),
        }
    }

    /// Raw bytes written so far.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    /// Bytes written so far, as 16-bit samples.
    #[must_use]
    pub fn written_samples(&self) -> Vec<i16> {
        bytes_to_i16(&self.written.lock())
    }
}

mock_port_common!(MockOutPort);

impl PcmOutPort for MockOutPort {
    fn write(&self, buffer: &[u8], frames: usize) -> Result<usize, AudioError> {
        let (params, frames) = self.state.begin(buffer.len(), frames)?;
        let bytes = params.frames_to_bytes(frames);
        self.written.lock().extend_from_slice(&buffer[..bytes]);
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_port_plays_queue_then_silence() {
        let port = MockInPort::new("in").with_samples(&[1, 2, 3]).unpaced();
        port.open(&PcmParams::new(1, 16, 8000, 2)).unwrap();

        let mut block = [0xFFu8; 4];
        port.read(&mut block, 2).unwrap();
        assert_eq!(bytes_to_i16(&block), vec![1, 2]);
        port.read(&mut block, 2).unwrap();
        assert_eq!(bytes_to_i16(&block), vec![3, 0]);
        port.read(&mut block, 2).unwrap();
        assert_eq!(bytes_to_i16(&block), vec![0, 0]);
        assert_eq!(port.queued(), 0);
        assert_eq!(port.transfer_count(), 3);
    }

    #[test]
    fn test_out_port_records_and_fails_on_schedule() {
        let port = MockOutPort::new("out")
            .unpaced()
            .fail_from(1, AudioError::port_io("out", "unplugged"));
        port.open(&PcmParams::new(1, 16, 8000, 2)).unwrap();
        assert_eq!(port.open_count(), 1);

        let block = i16::to_ne_bytes(7)
            .into_iter()
            .chain(i16::to_ne_bytes(8))
            .collect::<Vec<u8>>();
        assert_eq!(port.write(&block, 2).unwrap(), 2);
        assert!(matches!(port.write(&block, 2), Err(AudioError::PortIo { .. })));
        assert_eq!(port.written_samples(), vec![7, 8]);
    }

    #[test]
    fn test_max_frames_shortens_transfers() {
        let port = MockOutPort::new("out").unpaced().with_max_frames(3);
        port.open(&PcmParams::new(2, 16, 8000, 8)).unwrap();
        assert_eq!(port.write(&[0u8; 32], 8).unwrap(), 3);
        assert_eq!(port.written().len(), 12);
    }
}
