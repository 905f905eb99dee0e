//! Incremental UTF-8 decoding and line assembly.

/// Longest partial line kept before it is forced out as a line.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Assembles complete lines from arbitrarily split output chunks.
///
/// Owned by the reader thread; not shared. A partial line longer than the
/// limit (a full-screen program redrawing without newlines) is cut at the
/// limit and emitted, so the accumulator stays bounded.
#[derive(Debug)]
pub struct LineSplitter {
    pending: String,
    max_line_len: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a splitter that cuts partial lines at `max_line_len` bytes.
    #[must_use]
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            pending: String::new(),
            max_line_len: max_line_len.max(1),
        }
    }

    /// Append decoded text to the line accumulator.
    pub fn on_chunk(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    /// Split off every complete line, stripping the newline and one
    /// trailing carriage return. A partial trailing line stays buffered
    /// unless it is over the length limit.
    pub fn drain_lines(&mut self) -> Vec<String> {
        let mut lines: Vec<String> = match self.pending.rfind('\n') {
            Some(last_newline) => {
                let rest = self.pending.split_off(last_newline + 1);
                let complete = std::mem::replace(&mut self.pending, rest);
                complete
                    .split_terminator('\n')
                    .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
                    .collect()
            }
            None => Vec::new(),
        };
        self.cut_overlong(&mut lines);
        lines
    }

    fn cut_overlong(&mut self, lines: &mut Vec<String>) {
        while self.pending.len() > self.max_line_len {
            let mut cut = self.max_line_len;
            while !self.pending.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == 0 {
                cut = self.pending.chars().next().map_or(1, char::len_utf8);
            }
            let rest = self.pending.split_off(cut);
            lines.push(std::mem::replace(&mut self.pending, rest));
            tracing::warn!(
                max_line_len = self.max_line_len,
                "Output line over length limit, emitting it in pieces"
            );
        }
    }

    /// Take the unterminated remainder, if any.
    ///
    /// Used at end of stream so a final line without newline is not lost.
    pub fn flush_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.pending);
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

/// Decodes a byte stream as UTF-8 across read boundaries.
///
/// A multi-byte sequence cut by a read is carried into the next call.
/// Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `bytes` (after any carried bytes) as possible.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush carried bytes at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
