//! Append-only JSON-lines event log.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::{Event, SinkError};

/// Append-only event log shared by any number of adapters.
///
/// Each record is one JSON object terminated by a newline. The file is
/// opened in append mode for every write and the whole line goes out in a
/// single `write`, so concurrent writers rely on the OS append atomicity for
/// lines shorter than the filesystem's atomic-write size.
#[derive(Debug, Clone)]
pub struct EventSink {
    path: PathBuf,
}

impl EventSink {
    /// Prepare a sink at `path`, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::CreateDir` if the parent directory cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| SinkError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, opening or writing fails.
    pub fn append(&self, event: &Event) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| SinkError::Open {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(&line).map_err(|source| SinkError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Read every event recorded so far. A missing file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line is not an event.
    pub fn read_all(&self) -> Result<Vec<Event>, SinkError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SinkError::Open {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| SinkError::Open {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}
