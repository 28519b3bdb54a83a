//! Producer-facing ingest
//!
//! Producers open a plain TCP connection and write JSON objects with no
//! delimiter beyond balanced braces:
//!
//! ```text
//! {"text":"hello","audio":"/audio/hello.mp3"}{"text":"bye"}
//! ```
//!
//! - [`frame`]: reassembles objects from arbitrary chunks
//! - [`pipeline`]: validates frames and routes them to the hub or handshake
//! - [`listener`]: accept loop, one task per producer connection

pub mod frame;
pub mod listener;
pub mod pipeline;

pub use frame::{Frame, FrameExtractor, Frames, DEFAULT_MAX_FRAME_BYTES};
pub use listener::{IngestConfig, ProducerListener};
pub use pipeline::{Dispatch, IngestPipeline};
