//! A mutually-exclusive append/drain buffer (spec §4.1): the sink a remote
//! exec channel writes stdout/stderr into, and the streamer's drain loop
//! reads lines out of. One guard covers both paths so a writer delivering
//! exec output never races the reader draining completed lines.

use parking_lot::Mutex;

/// Outcome of [`SafeBuffer::read_until`]: either a complete line (delimiter
/// included in the input, stripped from the return), or the data seen so far
/// with no delimiter yet — mirroring `bufio.Reader.ReadString` semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    Line(Vec<u8>),
    Partial(Vec<u8>),
}

#[derive(Default)]
pub struct SafeBuffer {
    inner: Mutex<Vec<u8>>,
}

impl SafeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` and returns the number of bytes written.
    pub fn append(&self, data: &[u8]) -> usize {
        let mut buf = self.inner.lock();
        buf.extend_from_slice(data);
        data.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads up to and including the first occurrence of `delim`, removing
    /// the consumed bytes from the buffer. Returns `Partial` (and leaves the
    /// buffer untouched) when no delimiter is present yet.
    pub fn read_until(&self, delim: u8) -> ReadResult {
        let mut buf = self.inner.lock();
        match buf.iter().position(|&b| b == delim) {
            Some(idx) => {
                let mut line: Vec<u8> = buf.drain(..=idx).collect();
                line.pop(); // drop the delimiter itself
                ReadResult::Line(line)
            }
            None => ReadResult::Partial(buf.clone()),
        }
    }
}
