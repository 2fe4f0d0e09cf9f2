//! Zero-copy buffer hand-off.
//!
//! A [`BufferProvider`] lends out [`Buffer`] views with
//! [`get_next_buffer`](BufferProvider::get_next_buffer) and takes them back
//! with [`release_buffer`](BufferProvider::release_buffer). The requester
//! must not keep a view past the matching release.

// Buffers point into memory owned by the provider or by a blocked push caller.
#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::AudioError;

/// Non-owning view of interleaved PCM frames.
///
/// The view can only shrink: [`set_frames`](Buffer::set_frames) never
/// grows it past the frame count it was created with.
pub struct Buffer<'a> {
    ptr: NonNull<u8>,
    frames: usize,
    capacity: usize,
    frame_size: usize,
    writable: bool,
    error: Option<AudioError>,
    _marker: PhantomData<&'a mut [u8]>,
}

// SAFETY: a Buffer is an exclusive (or read-only) view of plain bytes.
unsafe impl Send for Buffer<'_> {}

impl<'a> Buffer<'a> {
    /// Read-only view over the whole frames of `bytes`.
    pub fn from_slice(bytes: &'a [u8], frame_size: usize) -> Self {
        let frames = whole_frames(bytes.len(), frame_size);
        Self {
            ptr: NonNull::from(bytes).cast(),
            frames,
            capacity: frames,
            frame_size,
            writable: false,
            error: None,
            _marker: PhantomData,
        }
    }

    /// Writable view over the whole frames of `bytes`.
    pub fn from_mut_slice(bytes: &'a mut [u8], frame_size: usize) -> Self {
        let frames = whole_frames(bytes.len(), frame_size);
        Self {
            ptr: NonNull::from(bytes).cast(),
            frames,
            capacity: frames,
            frame_size,
            writable: true,
            error: None,
            _marker: PhantomData,
        }
    }

    /// Builds a view from a raw pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `frames * frame_size` bytes (and for
    /// writes if `writable`) for all of `'a`, and nothing else may access
    /// that memory while the view exists.
    pub unsafe fn from_raw_parts(
        ptr: NonNull<u8>,
        frames: usize,
        frame_size: usize,
        writable: bool,
    ) -> Self {
        Self {
            ptr,
            frames,
            capacity: frames,
            frame_size,
            writable,
            error: None,
            _marker: PhantomData,
        }
    }

    /// Number of frames in the view.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Bytes per frame.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Shrinks the view to `frames`; larger values are clamped.
    pub fn set_frames(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity);
    }

    /// Returns `true` if the view may be written.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Bytes of the frames in view.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: guaranteed by the constructor contract.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.frames * self.frame_size) }
    }

    /// Mutable bytes of the frames in view.
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8], AudioError> {
        if !self.writable {
            return Err(AudioError::ReadOnlyBuffer);
        }
        // SAFETY: guaranteed by the constructor contract; the view is writable.
        Ok(unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.frames * self.frame_size)
        })
    }

    /// Error recorded by the consumer of this buffer, if any.
    #[must_use]
    pub fn error(&self) -> Option<&AudioError> {
        self.error.as_ref()
    }

    /// Records an error to be reported back to the buffer's owner.
    pub fn set_error(&mut self, error: AudioError) {
        self.error = Some(error);
    }

    /// Removes the recorded error.
    pub fn take_error(&mut self) -> Option<AudioError> {
        self.error.take()
    }

    /// Identity of the memory behind this view, unchanged by `set_frames`.
    pub(crate) fn loan(&self) -> Loan {
        Loan {
            addr: self.ptr.as_ptr() as usize,
            capacity: self.capacity,
            frame_size: self.frame_size,
        }
    }
}

/// Identity of a lent [`Buffer`]; a provider takes back only the view it
/// handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Loan {
    addr: usize,
    capacity: usize,
    frame_size: usize,
}

impl std::fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("frames", &self.frames)
            .field("frame_size", &self.frame_size)
            .field("writable", &self.writable)
            .field("error", &self.error)
            .finish()
    }
}

fn whole_frames(bytes: usize, frame_size: usize) -> usize {
    if frame_size == 0 {
        0
    } else {
        bytes / frame_size
    }
}

/// Source or sink of [`Buffer`]s.
///
/// A provider lends out at most one buffer at a time. Asking for another
/// before releasing the first is refused with
/// [`AudioError::BufferOutstanding`].
pub trait BufferProvider: Send + Sync {
    /// Lends a buffer of at most `frames` frames.
    ///
    /// A provider may return fewer frames than requested, or zero frames to
    /// report that it has nothing this time.
    fn get_next_buffer(&self, frames: usize) -> Result<Buffer<'_>, AudioError>;

    /// Returns a buffer obtained from [`get_next_buffer`](Self::get_next_buffer).
    ///
    /// The buffer's frame count tells the provider how many frames were
    /// actually consumed or produced. A buffer the provider did not lend is
    /// ignored and the outstanding loan stays open.
    fn release_buffer(&self, buffer: Buffer<'_>);
}

/// Growable byte buffer lent out as [`Buffer`] views, one at a time.
pub(crate) struct Scratch {
    inner: Mutex<ScratchInner>,
}

struct ScratchInner {
    data: Vec<u8>,
    loan: Option<Loan>,
}

impl Scratch {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ScratchInner {
                data: Vec::new(),
                loan: None,
            }),
        }
    }

    /// Grows the backing storage to at least `bytes`.
    pub fn reserve(&self, bytes: usize) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        if inner.loan.is_some() {
            return Err(AudioError::BufferOutstanding);
        }
        grow(&mut inner.data, bytes)
    }

    /// Releases the backing storage.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        if inner.loan.is_none() {
            inner.data = Vec::new();
        }
    }

    /// Current size in bytes.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Lends a writable view of `frames` frames, growing the storage if needed.
    pub fn lend(&self, frames: usize, frame_size: usize) -> Result<Buffer<'_>, AudioError> {
        let mut inner = self.inner.lock();
        if inner.loan.is_some() {
            return Err(AudioError::BufferOutstanding);
        }
        grow(&mut inner.data, frames * frame_size)?;
        let ptr = NonNull::new(inner.data.as_mut_ptr()).unwrap_or(NonNull::dangling());
        // SAFETY: the loan stays recorded until `reclaim` gets this exact view
        // back, and every path that touches the vector refuses to run while a
        // loan is recorded. The borrow of `self` keeps the vector alive for
        // the view's lifetime.
        let buffer = unsafe { Buffer::from_raw_parts(ptr, frames, frame_size, true) };
        inner.loan = Some(buffer.loan());
        Ok(buffer)
    }

    /// Returns `true` if `buffer` is the view currently lent out.
    pub fn is_lent(&self, buffer: &Buffer<'_>) -> bool {
        self.inner.lock().loan == Some(buffer.loan())
    }

    /// Takes back the lent view.
    ///
    /// Any other buffer is refused with [`AudioError::BufferNotObtained`]
    /// and the loan stays open.
    pub fn reclaim(&self, buffer: Buffer<'_>) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        if inner.loan != Some(buffer.loan()) {
            return Err(AudioError::BufferNotObtained);
        }
        drop(buffer);
        inner.loan = None;
        Ok(())
    }
}

fn grow(data: &mut Vec<u8>, bytes: usize) -> Result<(), AudioError> {
    if data.len() < bytes {
        data.try_reserve_exact(bytes - data.len())
            .map_err(|_| AudioError::Allocation { bytes })?;
        data.resize(bytes, 0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_from_slice_is_read_only() {
        let data = [1u8, 2, 3, 4, 5];
        let mut buffer = Buffer::from_slice(&data, 2);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(buffer.as_bytes_mut(), Err(AudioError::ReadOnlyBuffer));
    }

    #[test]
    fn test_buffer_set_frames_only_shrinks() {
        let mut data = [0u8; 8];
        let mut buffer = Buffer::from_mut_slice(&mut data, 2);
        buffer.set_frames(2);
        assert_eq!(buffer.frames(), 2);
        buffer.set_frames(10);
        assert_eq!(buffer.frames(), 4);
    }

    #[test]
    fn test_buffer_write_through() {
        let mut data = [0u8; 4];
        {
            let mut buffer = Buffer::from_mut_slice(&mut data, 2);
            buffer.as_bytes_mut().unwrap()[3] = 7;
        }
        assert_eq!(data, [0, 0, 0, 7]);
    }

    #[test]
    fn test_buffer_error_roundtrip() {
        let data = [0u8; 4];
        let mut buffer = Buffer::from_slice(&data, 2);
        assert!(buffer.error().is_none());
        buffer.set_error(AudioError::NoFrames);
        assert_eq!(buffer.take_error(), Some(AudioError::NoFrames));
        assert!(buffer.error().is_none());
    }

    #[test]
    fn test_scratch_single_loan() {
        let scratch = Scratch::new();
        let first = scratch.lend(4, 2).unwrap();
        assert_eq!(first.frames(), 4);
        assert!(matches!(
            scratch.lend(4, 2),
            Err(AudioError::BufferOutstanding)
        ));
        scratch.reclaim(first).unwrap();
        let data = [0u8; 8];
        assert_eq!(
            scratch.reclaim(Buffer::from_slice(&data, 2)),
            Err(AudioError::BufferNotObtained)
        );
        assert_eq!(scratch.len(), 8);
    }

    #[test]
    fn test_scratch_refuses_foreign_buffer() {
        let scratch = Scratch::new();
        let mut lent = scratch.lend(2, 2).unwrap();
        lent.as_bytes_mut().unwrap()[0] = 5;

        let mut other = [0u8; 4];
        let foreign = Buffer::from_mut_slice(&mut other, 2);
        assert!(!scratch.is_lent(&foreign));
        assert_eq!(scratch.reclaim(foreign), Err(AudioError::BufferNotObtained));
        assert!(matches!(scratch.lend(2, 2), Err(AudioError::BufferOutstanding)));
        assert_eq!(scratch.reserve(64), Err(AudioError::BufferOutstanding));

        // A shrunk view is still the one that was lent.
        lent.set_frames(1);
        assert!(scratch.is_lent(&lent));
        assert_eq!(lent.as_bytes(), &[5, 0]);
        scratch.reclaim(lent).unwrap();
        assert!(scratch.lend(2, 2).is_ok());
    }
}
