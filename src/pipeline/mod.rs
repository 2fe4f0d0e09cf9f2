//! Routing engines and buffer hand-off primitives.
//!
//! ```text
//! playback:  streams ──► Merge ──► shared block ──► port
//! capture:   port ──► shared block ──► UnMerge ──► streams
//! ```
//!
//! - **Merge/UnMerge**: copy channel slots between the shared block and
//!   each registered stream, following the stream's slot map
//! - **BufferAdaptor**: turns push-style `read`/`write` into provider calls
//!   without copying
//! - **MonoPipe**: blocking frame ring for streams that want buffering
//!   between the application and the pump thread

mod adaptor;
mod merge;
mod mono_pipe;

pub use adaptor::BufferAdaptor;
pub use merge::{Merge, ProcessReport, RoutedStream, UnMerge};
pub use mono_pipe::{MonoPipe, PipeReader, PipeWriter};
