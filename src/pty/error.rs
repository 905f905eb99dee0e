//! PTY error types.

/// Errors that can occur while resolving, spawning or talking to a runtime.
#[derive(thiserror::Error, Debug)]
pub enum PtyError {
    /// Neither the override variable nor any candidate produced a command.
    #[error("No runtime command resolvable (override: {override_env}, candidates: [{candidates}])")]
    Unresolvable {
        override_env: String,
        candidates: String,
    },

    /// The override variable could not be tokenized into an argv.
    #[error("Override variable {var} is not a valid command line: {value:?}")]
    InvalidOverride { var: String, value: String },

    /// The operating system refused to allocate a pseudo-terminal.
    #[error("Failed to allocate pty: {0}")]
    Open(String),

    /// Fork/exec of the runtime failed.
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    /// The writer side of the PTY was already closed.
    #[error("PTY writer closed")]
    Closed,

    /// Read or write on the PTY master failed.
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PtyError {
    /// Returns true for errors caused by configuration rather than the OS.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Unresolvable { .. } | Self::InvalidOverride { .. })
    }
}
