//! Push-to-pull bridge between one producer and one consumer.

// The pull side borrows the push caller's buffer while the caller is blocked.
#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::buffer::{Buffer, BufferProvider, Loan};
use crate::AudioError;

/// How often a blocked push call checks whether the adaptor was closed.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Counting semaphore.
pub(crate) struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    pub fn post(&self) {
        *self.count.lock() += 1;
        self.cond.notify_one();
    }

    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count == 0 {
            if self.cond.wait_until(&mut count, deadline).timed_out() && *count == 0 {
                return false;
            }
        }
        *count -= 1;
        true
    }
}

/// Buffer handed over by the push side.
struct Pending {
    ptr: Option<NonNull<u8>>,
    frames: usize,
    writable: bool,
    status: Result<usize, AudioError>,
}

// SAFETY: the pointer is only dereferenced through a Buffer while the push
// caller that owns the memory is blocked in `transfer`.
unsafe impl Send for Pending {}

/// Turns blocking `read`/`write` calls into
/// [`get_next_buffer`](BufferProvider::get_next_buffer)/
/// [`release_buffer`](BufferProvider::release_buffer) calls without copying.
///
/// The push side parks its buffer and blocks until the pull side has
/// released it, then returns the frame count (or error) the pull side
/// reported. The pull side never blocks by default: if nothing has been
/// pushed, `get_next_buffer` fails with [`AudioError::Underrun`] and the
/// underrun counter is bumped.
///
/// Exactly one thread may push and one may pull.
pub struct BufferAdaptor {
    frame_size: usize,
    fill: Semaphore,
    empty: Semaphore,
    done: Semaphore,
    pending: Mutex<Pending>,
    underruns: AtomicU64,
    timeout: Option<Duration>,
    closed: AtomicBool,
    lent: Mutex<Option<Loan>>,
}

impl BufferAdaptor {
    /// Creates an adaptor for frames of `frame_size` bytes.
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            fill: Semaphore::new(0),
            empty: Semaphore::new(1),
            done: Semaphore::new(0),
            pending: Mutex::new(Pending {
                ptr: None,
                frames: 0,
                writable: false,
                status: Err(AudioError::NoFrames),
            }),
            underruns: AtomicU64::new(0),
            timeout: None,
            closed: AtomicBool::new(false),
            lent: Mutex::new(None),
        }
    }

    /// Lets the pull side wait up to `timeout` for a push.
    ///
    /// ```
    /// use pcm_route::{BufferAdaptor, BufferProvider, AudioError, ADAPTOR_PULL_TIMEOUT};
    ///
    /// let adaptor = BufferAdaptor::new(4).with_timeout(ADAPTOR_PULL_TIMEOUT);
    /// // nothing was pushed: the pull gives up after the timeout
    /// assert_eq!(adaptor.get_next_buffer(64).unwrap_err(), AudioError::Underrun);
    /// assert_eq!(adaptor.underruns(), 1);
    /// ```
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bytes per frame.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Number of pulls that found nothing pushed.
    #[must_use]
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Fails pending and future push calls with [`AudioError::Shutdown`].
    ///
    /// A push whose buffer the pull side already holds still waits for the
    /// release.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Accepts push calls again after [`close`](Self::close).
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Returns `true` if the adaptor is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Hands `buffer` to the pull side to be filled; blocks until released.
    ///
    /// Returns the number of frames the pull side filled.
    pub fn read(&self, buffer: &mut [u8], frames: usize) -> Result<usize, AudioError> {
        let bytes = self.checked_len(buffer.len(), frames)?;
        let ptr = NonNull::from(&mut buffer[..bytes]).cast::<u8>();
        self.transfer(ptr, frames, true)
    }

    /// Hands `buffer` to the pull side to be consumed; blocks until released.
    ///
    /// Returns the number of frames the pull side consumed.
    pub fn write(&self, buffer: &[u8], frames: usize) -> Result<usize, AudioError> {
        let bytes = self.checked_len(buffer.len(), frames)?;
        let ptr = NonNull::from(&buffer[..bytes]).cast::<u8>();
        self.transfer(ptr, frames, false)
    }

    fn checked_len(&self, len: usize, frames: usize) -> Result<usize, AudioError> {
        let bytes = frames * self.frame_size;
        if bytes > len {
            return Err(AudioError::invalid_params(format!(
                "{frames} frames need {bytes} bytes, buffer has {len}"
            )));
        }
        Ok(bytes)
    }

    fn transfer(&self, ptr: NonNull<u8>, frames: usize, writable: bool) -> Result<usize, AudioError> {
        if frames == 0 {
            return Ok(0);
        }

        while !self.empty.wait_timeout(POLL_INTERVAL) {
            if self.is_closed() {
                return Err(AudioError::Shutdown);
            }
        }
        if self.is_closed() {
            self.empty.post();
            return Err(AudioError::Shutdown);
        }

        {
            let mut pending = self.pending.lock();
            pending.ptr = Some(ptr);
            pending.frames = frames;
            pending.writable = writable;
            pending.status = Err(AudioError::NoFrames);
        }
        self.fill.post();

        while !self.done.wait_timeout(POLL_INTERVAL) {
            // Take the buffer back only if the pull side never got it.
            if self.is_closed() && self.fill.try_wait() {
                self.pending.lock().ptr = None;
                self.empty.post();
                return Err(AudioError::Shutdown);
            }
        }

        let status = std::mem::replace(&mut self.pending.lock().status, Err(AudioError::NoFrames));
        self.empty.post();
        status
    }
}

impl BufferProvider for BufferAdaptor {
    fn get_next_buffer(&self, frames: usize) -> Result<Buffer<'_>, AudioError> {
        if self.lent.lock().is_some() {
            return Err(AudioError::BufferOutstanding);
        }

        let filled = match self.timeout {
            None => self.fill.try_wait(),
            Some(timeout) => self.fill.wait_timeout(timeout),
        };
        if !filled {
            self.underruns.fetch_add(1, Ordering::Relaxed);
            return Err(AudioError::Underrun);
        }

        let pending = self.pending.lock();
        let Some(ptr) = pending.ptr else {
            drop(pending);
            self.fill.post();
            return Err(AudioError::BufferNotObtained);
        };
        let frames = frames.min(pending.frames);
        // SAFETY: the push caller owns `ptr` for `pending.frames` frames and
        // stays blocked until `release_buffer` takes back this exact view
        // and posts `done`.
        let buffer = unsafe { Buffer::from_raw_parts(ptr, frames, self.frame_size, pending.writable) };
        *self.lent.lock() = Some(buffer.loan());
        Ok(buffer)
    }

    fn release_buffer(&self, mut buffer: Buffer<'_>) {
        {
            let mut lent = self.lent.lock();
            match *lent {
                None => {
                    tracing::warn!("adaptor buffer released without being obtained");
                    return;
                }
                Some(loan) if loan != buffer.loan() => {
                    tracing::warn!("adaptor refused a buffer it did not lend");
                    return;
                }
                Some(_) => *lent = None,
            }
        }
        let status = match buffer.frames() {
            0 => Err(buffer.take_error().unwrap_or(AudioError::NoFrames)),
            frames => Ok(frames),
        };
        drop(buffer);
        {
            let mut pending = self.pending.lock();
            pending.status = status;
            pending.ptr = None;
        }
        self.done.post();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_semaphore_counts() {
        let sem = Semaphore::new(1);
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        sem.post();
        assert!(sem.wait_timeout(Duration::from_millis(1)));
        assert!(!sem.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_pull_without_push_is_underrun() {
        let adaptor = BufferAdaptor::new(2);
        assert_eq!(adaptor.get_next_buffer(4).unwrap_err(), AudioError::Underrun);
        assert_eq!(adaptor.get_next_buffer(4).unwrap_err(), AudioError::Underrun);
        assert_eq!(adaptor.underruns(), 2);
    }

    #[test]
    fn test_timeout_pull_waits() {
        let adaptor = BufferAdaptor::new(2).with_timeout(Duration::from_millis(20));
        let start = Instant::now();
        assert!(adaptor.get_next_buffer(4).is_err());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_write_is_consumed_without_copy() {
        let adaptor = Arc::new(BufferAdaptor::new(2));
        let puller = {
            let adaptor = adaptor.clone();
            thread::spawn(move || loop {
                if let Ok(mut buffer) = adaptor.get_next_buffer(3) {
                    let bytes = buffer.as_bytes().to_vec();
                    buffer.set_frames(2);
                    adaptor.release_buffer(buffer);
                    return bytes;
                }
                thread::sleep(Duration::from_millis(1));
            })
        };

        let data = [1u8, 0, 2, 0, 3, 0, 4, 0];
        let consumed = adaptor.write(&data, 4).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(puller.join().unwrap(), vec![1, 0, 2, 0, 3, 0]);
    }

    #[test]
    fn test_read_is_filled_by_puller() {
        let adaptor = Arc::new(BufferAdaptor::new(1));
        let puller = {
            let adaptor = adaptor.clone();
            thread::spawn(move || loop {
                if let Ok(mut buffer) = adaptor.get_next_buffer(8) {
                    buffer.as_bytes_mut().unwrap().fill(9);
                    adaptor.release_buffer(buffer);
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            })
        };

        let mut data = [0u8; 4];
        assert_eq!(adaptor.read(&mut data, 4).unwrap(), 4);
        assert_eq!(data, [9; 4]);
        puller.join().unwrap();
    }

    #[test]
    fn test_zero_frame_release_reports_error() {
        let adaptor = Arc::new(BufferAdaptor::new(1));
        let puller = {
            let adaptor = adaptor.clone();
            thread::spawn(move || loop {
                if let Ok(mut buffer) = adaptor.get_next_buffer(0) {
                    buffer.set_error(AudioError::port_io("hw", "gone"));
                    adaptor.release_buffer(buffer);
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            })
        };

        let mut data = [0u8; 4];
        assert!(matches!(
            adaptor.read(&mut data, 4),
            Err(AudioError::PortIo { .. })
        ));
        puller.join().unwrap();
    }

    #[test]
    fn test_close_unblocks_unserviced_push() {
        let adaptor = Arc::new(BufferAdaptor::new(1));
        let pusher = {
            let adaptor = adaptor.clone();
            thread::spawn(move || adaptor.write(&[1, 2, 3], 3))
        };
        thread::sleep(Duration::from_millis(30));
        adaptor.close();
        assert_eq!(pusher.join().unwrap(), Err(AudioError::Shutdown));
        assert_eq!(adaptor.write(&[1], 1), Err(AudioError::Shutdown));

        adaptor.reopen();
        assert_eq!(adaptor.get_next_buffer(1).unwrap_err(), AudioError::Underrun);
    }

    #[test]
    fn test_double_get_is_refused() {
        let adaptor = Arc::new(BufferAdaptor::new(1));
        let pusher = {
            let adaptor = adaptor.clone();
            thread::spawn(move || adaptor.write(&[7, 7], 2))
        };
        let buffer = loop {
            if let Ok(buffer) = adaptor.get_next_buffer(2) {
                break buffer;
            }
            thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(
            adaptor.get_next_buffer(2).unwrap_err(),
            AudioError::BufferOutstanding
        );
        adaptor.release_buffer(buffer);
        assert_eq!(pusher.join().unwrap(), Ok(2));
    }

    #[test]
    fn test_foreign_release_keeps_push_blocked() {
        let adaptor = Arc::new(BufferAdaptor::new(1));
        let pusher = {
            let adaptor = adaptor.clone();
            thread::spawn(move || adaptor.write(&[4, 5], 2))
        };
        let lent = loop {
            if let Ok(buffer) = adaptor.get_next_buffer(2) {
                break buffer;
            }
            thread::sleep(Duration::from_millis(1));
        };

        let other = [9u8, 9];
        adaptor.release_buffer(Buffer::from_slice(&other, 1));
        thread::sleep(Duration::from_millis(30));
        assert!(!pusher.is_finished());
        assert_eq!(
            adaptor.get_next_buffer(2).unwrap_err(),
            AudioError::BufferOutstanding
        );

        assert_eq!(lent.as_bytes(), &[4, 5]);
        adaptor.release_buffer(lent);
        assert_eq!(pusher.join().unwrap(), Ok(2));
    }
}
