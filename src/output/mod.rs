//! Output capture for supervised runtimes.
//!
//! Raw PTY bytes are decoded incrementally, kept in a bounded ring of chunks
//! for tail snapshots, and assembled into complete lines for classification.

mod buffer;
mod splitter;

pub use buffer::*;
pub use splitter::*;
