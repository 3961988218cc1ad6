//! Cached object bodies.
//!
//! A cached item's body is a shared byte pipe: one [`StreamingBody`] writer
//! appends bytes while any number of [`Body`] readers stream them back out.
//! Readers observe bytes in the order the writer appended them, and a reader
//! that catches up with an unfinished writer blocks until more bytes arrive
//! or the writer finishes.

use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::CacheError;

#[derive(Default)]
struct PipeState {
    buf: Vec<u8>,
    /// Total length declared up front by the writer, if any.
    declared_len: Option<u64>,
    complete: bool,
    aborted: bool,
}

/// The shared buffer behind one cached object's body.
///
/// Kept alive by the owning cache object, its writer, and any open readers,
/// so purging an entry does not invalidate streams already handed out.
pub(crate) struct Pipe {
    state: Mutex<PipeState>,
    cond: Condvar,
}

impl Pipe {
    pub(crate) fn new(declared_len: Option<u64>) -> Arc<Self> {
        Arc::new(Pipe {
            state: Mutex::new(PipeState {
                declared_len,
                ..PipeState::default()
            }),
            cond: Condvar::new(),
        })
    }

    fn append(&self, bytes: &[u8]) -> Result<(), CacheError> {
        let mut st = self.state.lock();
        if st.complete || st.aborted {
            return Err(CacheError::StreamUnavailable);
        }
        let total = st.buf.len() as u64 + bytes.len() as u64;
        if let Some(declared) = st.declared_len {
            if total > declared {
                st.aborted = true;
                self.cond.notify_all();
                return Err(CacheError::LengthMismatch {
                    declared,
                    actual: total,
                });
            }
        }
        st.buf.extend_from_slice(bytes);
        self.cond.notify_all();
        Ok(())
    }

    fn complete(&self) -> Result<(), CacheError> {
        let mut st = self.state.lock();
        if st.complete || st.aborted {
            return Err(CacheError::StreamUnavailable);
        }
        match st.declared_len {
            Some(declared) if declared != st.buf.len() as u64 => {
                st.aborted = true;
                self.cond.notify_all();
                return Err(CacheError::LengthMismatch {
                    declared,
                    actual: st.buf.len() as u64,
                });
            }
            Some(_) => {}
            None => st.declared_len = Some(st.buf.len() as u64),
        }
        st.complete = true;
        self.cond.notify_all();
        Ok(())
    }

    fn abort(&self) {
        let mut st = self.state.lock();
        st.aborted = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// The total body length, if known.
    ///
    /// Unknown while the writer is still streaming without a declared length.
    pub(crate) fn known_length(&self) -> Option<u64> {
        self.state.lock().declared_len
    }
}

/// A handle for streaming a body into a cached object.
///
/// Bytes written here become immediately visible to concurrent readers of the
/// same object. Call [`finish()`][Self::finish()] to mark the body complete;
/// dropping the writer without finishing aborts the body, and concurrent
/// readers observe a stream error instead of a silent truncation.
pub struct StreamingBody {
    pipe: Arc<Pipe>,
    finished: bool,
}

impl StreamingBody {
    pub(crate) fn new(pipe: Arc<Pipe>) -> Self {
        StreamingBody {
            pipe,
            finished: false,
        }
    }

    /// Append a chunk of bytes to the end of the body.
    ///
    /// If a length was declared at insertion, appending past it aborts the
    /// body and fails with [`CacheError::LengthMismatch`].
    pub fn append(&mut self, bytes: impl AsRef<[u8]>) -> Result<(), CacheError> {
        self.pipe.append(bytes.as_ref())
    }

    /// Finish the body, making it fully readable end-to-end.
    ///
    /// If no length was declared at insertion, the body's known length is set
    /// to the number of bytes appended. If a length was declared, finishing
    /// with fewer total bytes aborts the body and fails with
    /// [`CacheError::LengthMismatch`].
    pub fn finish(mut self) -> Result<(), CacheError> {
        self.finished = true;
        self.pipe.complete()
    }
}

impl Write for StreamingBody {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pipe
            .append(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // writes are visible to readers as soon as they are appended
        Ok(())
    }
}

impl Drop for StreamingBody {
    fn drop(&mut self) {
        if !self.finished {
            self.pipe.abort();
        }
    }
}

impl std::fmt::Debug for StreamingBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<opaque StreamingBody>")
    }
}

/// A lazy, single-pass reader over a range of a cached object's body.
///
/// Reading past the bytes currently available blocks until the writer appends
/// more or finishes; reading a range beyond the finished body's length simply
/// yields fewer bytes.
pub struct Body {
    pipe: Arc<Pipe>,
    pos: u64,
    /// Exclusive end bound, or `None` for "to the end of the body".
    end: Option<u64>,
}

impl Body {
    pub(crate) fn new(pipe: Arc<Pipe>, pos: u64, end: Option<u64>) -> Self {
        Body { pipe, pos, end }
    }

    /// Read the remainder of the body into a byte vector.
    ///
    /// Blocks until the writer finishes if the body is still streaming.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, CacheError> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)
            .map_err(|_| CacheError::StreamUnavailable)?;
        Ok(buf)
    }

    /// Read the remainder of the body into a `String`, interpreting the bytes
    /// as UTF-8.
    ///
    /// # Panics
    ///
    /// Panics if the bytes are not valid UTF-8.
    pub fn into_string(self) -> Result<String, CacheError> {
        let bytes = self.into_bytes()?;
        Ok(String::from_utf8(bytes).expect("cached body was not valid UTF-8"))
    }
}

impl Read for Body {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut st = self.pipe.state.lock();
        loop {
            let buf_len = st.buf.len() as u64;
            let limit = match self.end {
                Some(end) => end.min(buf_len),
                None => buf_len,
            };
            if self.pos < limit {
                let start = self.pos as usize;
                let n = ((limit - self.pos) as usize).min(out.len());
                out[..n].copy_from_slice(&st.buf[start..start + n]);
                self.pos += n as u64;
                return Ok(n);
            }
            if matches!(self.end, Some(end) if self.pos >= end) {
                return Ok(0);
            }
            if st.complete {
                return Ok(0);
            }
            if st.aborted {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    CacheError::StreamUnavailable,
                ));
            }
            self.pipe.cond.wait(&mut st);
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<opaque Body>")
    }
}
