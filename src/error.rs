//! Error types for pcm-route.
//!
//! Every fallible operation returns [`AudioError`]. Errors fall into the
//! categories of [`ErrorKind`]:
//! - **Incompatibility** and **Capacity**: rejected at registration, nothing changes
//! - **Resource**: an allocation or converter could not be created
//! - **Transient**: nothing was transferred this time; callers may try again
//! - **Fatal**: the physical port failed and the pump thread has stopped
//! - **Usage**: the call violates the component's protocol and was refused
//!
//! Runtime issues that do not fail a call (skipped streams, short transfers)
//! are reported through [`EventCallback`](crate::EventCallback) instead.

/// Category of an [`AudioError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Mismatched stream parameters or an out-of-range slot map.
    Incompatibility,
    /// Channel-count or stream-count limit exceeded.
    Capacity,
    /// Allocation or converter construction failed.
    Resource,
    /// Nothing could be transferred right now.
    Transient,
    /// Physical port failure.
    Fatal,
    /// Programmer error; the operation was refused.
    Usage,
}

/// Errors returned by streams, pumps, ports and the routing engines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    /// PCM parameters are not usable for the requested operation.
    #[error("invalid PCM params: {reason}")]
    InvalidParams {
        /// What is wrong with the params.
        reason: String,
    },

    /// The slot map is empty or its masks disagree.
    #[error("invalid slot map")]
    InvalidSlotMap,

    /// Stream params cannot be served by the pump or engine.
    #[error("incompatible stream: {reason}")]
    Incompatible {
        /// Which parameter does not match.
        reason: String,
    },

    /// A slot-map mask references channels beyond the shared buffer.
    #[error("channel mask {mask:#x} exceeds {channels} channels")]
    ChannelOutOfRange {
        /// Offending mask.
        mask: u32,
        /// Channel count of the shared buffer.
        channels: u32,
    },

    /// A slot-map mask overlaps slots claimed by another stream.
    #[error("channel mask {mask:#x} overlaps claimed slots {claimed:#x}")]
    SlotOverlap {
        /// Offending mask.
        mask: u32,
        /// Slots already claimed.
        claimed: u32,
    },

    /// Registering would exceed the number of streams the engine can hold.
    #[error("stream limit of {limit} reached")]
    CapacityExceeded {
        /// Maximum number of streams.
        limit: usize,
    },

    /// The operation is not supported by this component.
    #[error("not supported: {reason}")]
    Unsupported {
        /// Why it is not supported.
        reason: String,
    },

    /// The sample-rate converter could not be created or initialized.
    #[error("resampler initialization failed: {reason}")]
    ResamplerInit {
        /// Why the converter is unusable.
        reason: String,
    },

    /// A buffer allocation failed.
    #[error("failed to allocate {bytes} bytes")]
    Allocation {
        /// Requested size.
        bytes: usize,
    },

    /// The stream is already registered with a pump.
    #[error("stream is already registered")]
    AlreadyRegistered,

    /// The stream is not registered with a pump.
    #[error("stream is not registered")]
    NotRegistered,

    /// The stream is already started.
    #[error("stream is already started")]
    AlreadyStarted,

    /// The stream must be started for this call.
    #[error("stream is not started")]
    NotStarted,

    /// The stream must be stopped before it can be unregistered.
    #[error("stream is still started")]
    StillStarted,

    /// A buffer was requested while the previous one is still outstanding.
    #[error("previous buffer has not been released")]
    BufferOutstanding,

    /// A buffer was released that was never obtained.
    #[error("buffer was never obtained")]
    BufferNotObtained,

    /// Attempted to write through a read-only buffer view.
    #[error("buffer is read-only")]
    ReadOnlyBuffer,

    /// No buffer was available from the producer (non-blocking pull).
    #[error("buffer underrun")]
    Underrun,

    /// A transfer completed without moving any frames.
    #[error("no frames transferred")]
    NoFrames,

    /// The pipe or adaptor has been shut down.
    #[error("shut down")]
    Shutdown,

    /// The port is not open.
    #[error("port {port} is not open")]
    PortClosed {
        /// Port name.
        port: String,
    },

    /// The port is already open.
    #[error("port {port} is busy")]
    PortBusy {
        /// Port name.
        port: String,
    },

    /// The port failed a read or write.
    #[error("port {port} I/O failure: {reason}")]
    PortIo {
        /// Port name.
        port: String,
        /// Backend description of the failure.
        reason: String,
    },

    /// The pump thread could not be spawned.
    #[error("failed to spawn thread: {reason}")]
    ThreadSpawn {
        /// OS error text.
        reason: String,
    },

    /// The pump thread panicked.
    #[error("thread {name} panicked")]
    ThreadPanicked {
        /// Thread name.
        name: String,
    },
}

// Linux errno values; statuses are their negations.
const EPERM: i32 = 1;
const EIO: i32 = 5;
const EAGAIN: i32 = 11;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const EPIPE: i32 = 32;
const ENOTSUP: i32 = 95;

impl AudioError {
    /// Creates an invalid params error.
    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            reason: reason.into(),
        }
    }

    /// Creates an incompatible stream error.
    pub fn incompatible(reason: impl Into<String>) -> Self {
        Self::Incompatible {
            reason: reason.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// Creates a resampler initialization error.
    pub fn resampler_init(reason: impl Into<String>) -> Self {
        Self::ResamplerInit {
            reason: reason.into(),
        }
    }

    /// Creates a port closed error.
    pub fn port_closed(port: impl Into<String>) -> Self {
        Self::PortClosed { port: port.into() }
    }

    /// Creates a port I/O error.
    pub fn port_io(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortIo {
            port: port.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParams { .. }
            | Self::InvalidSlotMap
            | Self::Incompatible { .. }
            | Self::ChannelOutOfRange { .. }
            | Self::SlotOverlap { .. } => ErrorKind::Incompatibility,
            Self::CapacityExceeded { .. } | Self::Unsupported { .. } => ErrorKind::Capacity,
            Self::ResamplerInit { .. } | Self::Allocation { .. } | Self::ThreadSpawn { .. } => {
                ErrorKind::Resource
            }
            Self::Underrun | Self::NoFrames | Self::Shutdown => ErrorKind::Transient,
            Self::PortIo { .. } | Self::ThreadPanicked { .. } => ErrorKind::Fatal,
            Self::AlreadyRegistered
            | Self::NotRegistered
            | Self::AlreadyStarted
            | Self::NotStarted
            | Self::StillStarted
            | Self::BufferOutstanding
            | Self::BufferNotObtained
            | Self::ReadOnlyBuffer
            | Self::PortClosed { .. }
            | Self::PortBusy { .. } => ErrorKind::Usage,
        }
    }

    /// Returns the negative errno-style status for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        let errno = match self {
            Self::InvalidParams { .. }
            | Self::InvalidSlotMap
            | Self::Incompatible { .. }
            | Self::ChannelOutOfRange { .. }
            | Self::SlotOverlap { .. }
            | Self::AlreadyRegistered
            | Self::NotRegistered
            | Self::BufferNotObtained => EINVAL,
            Self::CapacityExceeded { .. } | Self::Allocation { .. } => ENOMEM,
            Self::Unsupported { .. } => ENOTSUP,
            Self::ResamplerInit { .. } => ENODEV,
            Self::AlreadyStarted
            | Self::StillStarted
            | Self::BufferOutstanding
            | Self::PortBusy { .. } => EBUSY,
            Self::NotStarted | Self::ReadOnlyBuffer => EPERM,
            Self::Underrun | Self::NoFrames | Self::PortClosed { .. } | Self::ThreadSpawn { .. } => {
                EAGAIN
            }
            Self::Shutdown => EPIPE,
            Self::PortIo { .. } | Self::ThreadPanicked { .. } => EIO,
        };
        -errno
    }

    /// Returns `true` for errors that only mean "nothing moved this time".
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AudioError::ChannelOutOfRange {
            mask: 0x4,
            channels: 2,
        };
        assert_eq!(err.to_string(), "channel mask 0x4 exceeds 2 channels");
    }

    #[test]
    fn test_error_codes_are_negative_errno() {
        assert_eq!(AudioError::invalid_params("x").code(), -22);
        assert_eq!(AudioError::CapacityExceeded { limit: 2 }.code(), -12);
        assert_eq!(AudioError::resampler_init("x").code(), -19);
        assert_eq!(AudioError::AlreadyStarted.code(), -16);
        assert_eq!(AudioError::NotStarted.code(), -1);
        assert_eq!(AudioError::Underrun.code(), -11);
        assert_eq!(AudioError::unsupported("x").code(), -95);
        assert_eq!(AudioError::port_io("p", "x").code(), -5);
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            AudioError::SlotOverlap {
                mask: 1,
                claimed: 1
            }
            .kind(),
            ErrorKind::Incompatibility
        );
        assert_eq!(AudioError::port_io("p", "x").kind(), ErrorKind::Fatal);
        assert!(AudioError::Underrun.is_transient());
        assert!(!AudioError::StillStarted.is_transient());
    }
}
