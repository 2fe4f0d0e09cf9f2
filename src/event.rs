//! Runtime events for monitoring pump health.
//!
//! Events are non-fatal notifications. A pump keeps cycling after emitting
//! one, except for [`RouteEvent::PortFailed`], which is emitted as the pump
//! thread exits.

use std::sync::Arc;

use crate::AudioError;

/// Runtime events emitted by pumps and routing engines.
///
/// # Example
///
/// ```
/// use pcm_route::RouteEvent;
///
/// fn handle_event(event: RouteEvent) {
///     match event {
///         RouteEvent::PumpStarted { port } => eprintln!("{port} running"),
///         RouteEvent::PumpStopped { port } => eprintln!("{port} stopped"),
///         RouteEvent::StreamSkipped { reason } => eprintln!("skipped stream: {reason}"),
///         RouteEvent::ShortTransfer { port, requested, transferred } => {
///             eprintln!("{port}: {transferred}/{requested} frames");
///         }
///         RouteEvent::PortFailed { port, error } => eprintln!("{port} failed: {error}"),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum RouteEvent {
    /// The first stream started and the pump thread is running.
    PumpStarted {
        /// Port driven by the pump.
        port: String,
    },

    /// The last stream stopped and the port was closed.
    PumpStopped {
        /// Port driven by the pump.
        port: String,
    },

    /// A registered stream contributed nothing to a processing pass.
    ///
    /// Emitted when the stream's handle has been dropped, when it returned
    /// an error, or when it yielded zero frames. The shared buffer slots it
    /// owns stay silent for that pass.
    StreamSkipped {
        /// Why the stream was skipped.
        reason: String,
    },

    /// The port moved fewer frames than a full block.
    ShortTransfer {
        /// Port name.
        port: String,
        /// Frames requested.
        requested: usize,
        /// Frames actually moved.
        transferred: usize,
    },

    /// The port failed and the pump thread stopped.
    ///
    /// Every stream on the pump must be stopped before the pump can be
    /// opened again.
    PortFailed {
        /// Port name.
        port: String,
        /// The port error.
        error: AudioError,
    },
}

/// Callback type for receiving runtime events.
///
/// Set one through [`PumpConfig::with_event_callback`].
///
/// [`PumpConfig::with_event_callback`]: crate::PumpConfig::with_event_callback
pub type EventCallback = Arc<dyn Fn(RouteEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use pcm_route::{event_callback, RouteEvent};
///
/// let callback = event_callback(|event| {
///     tracing::warn!(?event, "route event");
/// });
/// callback(RouteEvent::PumpStarted { port: "null".into() });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(RouteEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn emit(callback: Option<&EventCallback>, event: RouteEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}
