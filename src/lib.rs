//! # pcm-route
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! PCM stream routing between audio ports and application streams.
//!
//! `pcm-route` multiplexes many logical streams onto one capture or playback
//! port. Each stream owns a set of channel slots in the port's interleaved
//! frames, may run at its own sample rate, and is fed or drained either by a
//! callback-style [`BufferProvider`] or by blocking `read`/`write` calls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pcm_route::port::NullOutPort;
//! use pcm_route::{OutStream, PcmParams, PcmWriter, PumpConfig, SlotMap};
//!
//! # fn main() -> Result<(), pcm_route::AudioError> {
//! // Stereo playback port, 256-frame blocks
//! let writer = PcmWriter::new(
//!     Arc::new(NullOutPort::new()),
//!     PcmParams::new(2, 16, 48000, 256),
//!     PumpConfig::default(),
//! );
//!
//! // A 16 kHz mono stream feeding the right channel
//! let voice = OutStream::adapted_with_map(
//!     PcmParams::new(1, 16, 16000, 256),
//!     SlotMap::consecutive(0b1, 0b10),
//! );
//! writer.register_stream(&voice)?;
//! voice.start()?;
//!
//! let block = vec![0u8; 256 * 2];
//! voice.write(&block, 256)?;
//!
//! voice.stop()?;
//! writer.unregister_stream(&voice)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Ports** ([`port`]): physical capture/playback devices behind the
//!   [`PcmInPort`](port::PcmInPort)/[`PcmOutPort`](port::PcmOutPort) traits
//! - **Pumps** ([`PcmReader`], [`PcmWriter`]): one thread per open port,
//!   cycling one block at a time through a [`Merge`] or [`UnMerge`] engine
//! - **Streams** ([`InStream`], [`OutStream`]): application endpoints with a
//!   [`SlotMap`] and an optional per-stream [`Resampler`]
//! - **Hand-off** ([`BufferAdaptor`], [`MonoPipe`]): turn the pump's pull
//!   into blocking application calls, zero-copy or decoupled
//!
//! A port is open exactly while at least one of its streams is started.
//! [`SimpleReader`]/[`SimpleWriter`] skip the thread and run one stream's
//! port I/O on the caller's thread.

// unsafe_code lint is configured in Cargo.toml as "deny"; buffer hand-off modules override it
#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod buffer;
mod config;
mod error;
mod event;
pub mod format;
mod params;
mod pipeline;
pub mod port;
mod pump;
mod simple;
mod slot_map;
mod stream;

pub use buffer::{Buffer, BufferProvider};
pub use config::{PumpConfig, Quality, ADAPTOR_PULL_TIMEOUT};
pub use error::{AudioError, ErrorKind};
pub use event::{event_callback, EventCallback, RouteEvent};
pub use format::Resampler;
pub use params::PcmParams;
pub use pipeline::{
    BufferAdaptor, Merge, MonoPipe, PipeReader, PipeWriter, ProcessReport, RoutedStream, UnMerge,
};
pub use pump::{PcmReader, PcmWriter, PumpStats};
pub use simple::{SimpleInStream, SimpleOutStream, SimpleReader, SimpleWriter};
pub use slot_map::SlotMap;
pub use stream::{InStream, OutStream};
