//! Pseudo-terminal sessions for supervised runtimes.
//!
//! This module resolves the command line of an upstream runtime, spawns it
//! attached to a PTY, and exposes raw byte I/O plus liveness probing and
//! graceful termination of the child.

mod command;
mod error;
mod session;

pub use command::*;
pub use error::PtyError;
pub use session::*;
