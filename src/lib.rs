//! Runtime Supervisor - keep a text-mode runtime alive on a PTY and turn its
//! output into structured events.

pub mod config;
pub mod events;
pub mod output;
pub mod pty;
pub mod supervisor;
