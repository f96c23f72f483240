//! Byte-stream primitives shared by every codec.
//!
//! # Data Flow
//! ```text
//! Raw bytes (slice)      → primitives.rs (ByteReader cursor, BE/LE integer codecs)
//! Raw bytes (stream)     → rewind.rs (replay sniffed prefix, then inner stream)
//! ```
//!
//! # Design Decisions
//! - Decoding never panics on short input; every read is bounds-checked
//! - Length-prefixed reads return borrowed sub-slices (no copying)

pub mod primitives;
pub mod rewind;

pub use primitives::{ByteReader, DecodeError};
pub use rewind::Rewind;
