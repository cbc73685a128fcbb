use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::{debug, trace, warn};

use crate::config::EncodingMode;
use crate::errors::{ScanError, ScanResult};

const BUFFER_CAPACITY: usize = 65536;

/// Longest line a [`LineReader`] returns unless told otherwise
pub const DEFAULT_MAX_LINE_LENGTH: usize = 512;

/// Sequential supplier of text lines.
///
/// Producers call `next_line` while holding the buffer lock, so reads are
/// already serialized and implementations need no locking of their own.
/// `Ok(None)` signals exhaustion, which is a normal end and not an error.
/// A call must return eventually, or the workers sharing the lock cannot
/// observe cancellation.
pub trait LineSource: Send {
    fn next_line(&mut self) -> ScanResult<Option<String>>;

    /// Whether the last line returned was cut at a length limit
    fn last_line_cut(&self) -> bool {
        false
    }
}

/// Reads newline-terminated lines from any buffered reader.
///
/// No call reads more than `max_line_length` bytes of content. A longer
/// line comes back in pieces, each cut at a char boundary, so memory stays
/// bounded and every call returns even on input without newlines.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    // Bytes read past the last cut, which start the next piece
    carry: Vec<u8>,
    line_number: usize,
    encoding_mode: EncodingMode,
    max_line_length: usize,
    last_cut: bool,
    replaced_lines: usize,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R, encoding_mode: EncodingMode) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            carry: Vec::new(),
            line_number: 0,
            encoding_mode,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            last_cut: false,
            replaced_lines: 0,
        }
    }

    /// Caps each returned line at `limit` bytes; zero is treated as one
    pub fn with_max_line_length(mut self, limit: usize) -> Self {
        self.max_line_length = limit.max(1);
        self
    }

    /// Number of lines returned so far, counting each piece of a cut line
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Fills `buf` with at most `max_line_length + 1` bytes of the current
    /// line. Returns true if a newline ended it, which is kept in `buf`.
    fn fill_line(&mut self) -> io::Result<bool> {
        let window_len = self.max_line_length.saturating_add(1);
        while self.buf.len() < window_len {
            let available = match self.reader.fill_buf() {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(false);
            }

            let window = &available[..available.len().min(window_len - self.buf.len())];
            let (used, found) = match window.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (window.len(), false),
            };
            self.buf.extend_from_slice(&window[..used]);
            self.reader.consume(used);
            if found {
                return Ok(true);
            }
        }

        // A full window ending in '\r' may still be a "\r\n" terminator
        if self.buf.last() == Some(&b'\r') {
            let newline_next = loop {
                match self.reader.fill_buf() {
                    Ok(bytes) => break bytes.first() == Some(&b'\n'),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            };
            if newline_next {
                self.reader.consume(1);
                self.buf.push(b'\n');
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Moves everything past the last char boundary at or below the limit
    /// into `carry`
    fn cut_overlong(&mut self) {
        let limit = self.max_line_length;
        // A UTF-8 character is at most four bytes long
        let floor = limit.saturating_sub(3);
        let mut cut = limit;
        while cut > floor && is_continuation(self.buf[cut]) {
            cut -= 1;
        }
        if cut == 0 || is_continuation(self.buf[cut]) {
            // No boundary in reach, so the limit wins over the character
            cut = limit;
        }
        self.carry = self.buf.split_off(cut);
    }
}

impl<R: BufRead + Send> LineSource for LineReader<R> {
    fn next_line(&mut self) -> ScanResult<Option<String>> {
        self.buf.clear();
        self.buf.append(&mut self.carry);
        self.last_cut = false;

        let terminated = self.fill_line()?;
        if self.buf.is_empty() {
            trace!("source exhausted after {} lines", self.line_number);
            return Ok(None);
        }
        self.line_number += 1;

        if terminated {
            strip_terminator(&mut self.buf);
        } else if self.buf.len() > self.max_line_length {
            self.cut_overlong();
            self.last_cut = true;
        }
        self.decode().map(Some)
    }

    fn last_line_cut(&self) -> bool {
        self.last_cut
    }
}

impl<R> LineReader<R> {
    fn decode(&mut self) -> ScanResult<String> {
        match self.encoding_mode {
            EncodingMode::FailFast => String::from_utf8(self.buf.clone())
                .map_err(|e| ScanError::encoding_error(self.line_number, e)),
            EncodingMode::Lossy => {
                let cow = String::from_utf8_lossy(&self.buf);
                if let Cow::Owned(_) = cow {
                    self.replaced_lines += 1;
                    if self.replaced_lines == 1 {
                        warn!(
                            "Invalid UTF-8 replaced on line {}, further lines are logged at debug",
                            self.line_number
                        );
                    } else {
                        debug!("Invalid UTF-8 replaced on line {}", self.line_number);
                    }
                }
                Ok(cow.into_owned())
            }
        }
    }
}

/// Opens `path` for line-by-line reading
pub fn open(
    path: &Path,
    encoding_mode: EncodingMode,
    max_line_length: usize,
) -> ScanResult<LineReader<BufReader<File>>> {
    let file = File::open(path).map_err(|e| ScanError::from_open(path, e))?;
    Ok(LineReader::new(BufReader::with_capacity(BUFFER_CAPACITY, file), encoding_mode)
        .with_max_line_length(max_line_length))
}

/// Adapts any iterator of strings, including endless ones
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    lines: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = String>,
{
    pub fn new(lines: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            lines: lines.into_iter(),
        }
    }
}

impl<I> LineSource for IterSource<I>
where
    I: Iterator<Item = String> + Send,
{
    fn next_line(&mut self) -> ScanResult<Option<String>> {
        Ok(self.lines.next())
    }
}

/// Cuts `line` to at most `max_len` bytes without splitting a character.
/// Returns true if anything was removed.
pub fn truncate_line(line: &mut String, max_len: usize) -> bool {
    if line.len() <= max_len {
        return false;
    }
    let mut cut = max_len;
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    line.truncate(cut);
    true
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

fn strip_terminator(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
}
