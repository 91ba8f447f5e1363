use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Byte buffer that stops growing at `cap` and remembers that it did.
#[derive(Debug)]
pub struct CappedBuffer {
    bytes: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl CappedBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Lossy UTF-8 text plus the truncation flag. Leaves the buffer empty.
    pub fn take_text(&mut self) -> (String, bool) {
        let bytes = std::mem::take(&mut self.bytes);
        (String::from_utf8_lossy(&bytes).into_owned(), self.truncated)
    }
}

pub type SharedBuffer = Arc<Mutex<CappedBuffer>>;

pub fn shared(cap: usize) -> SharedBuffer {
    Arc::new(Mutex::new(CappedBuffer::new(cap)))
}

/// Which parent stream live output is teed to.
#[derive(Debug, Clone, Copy)]
pub enum Echo {
    Stdout,
    Stderr,
}

impl Echo {
    fn write(self, chunk: &[u8]) {
        // Terminal echo is best-effort; capture continues if it fails.
        let _ = match self {
            Echo::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(chunk).and_then(|_| out.flush())
            }
            Echo::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(chunk).and_then(|_| err.flush())
            }
        };
    }
}

/// Copy a child pipe into `sink` until EOF. Data lands in the shared buffer
/// chunk by chunk, so whatever arrived survives if this task is aborted.
pub async fn drain<R>(mut reader: R, sink: SharedBuffer, echo: Option<Echo>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if let Some(echo) = echo {
                    echo.write(&chunk[..n]);
                }
                sink.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(&chunk[..n]);
            }
            Err(e) => {
                debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}

/// Take the captured text out of a shared buffer.
pub fn take(sink: &SharedBuffer) -> (String, bool) {
    sink.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_cap_keeps_everything() {
        let mut buf = CappedBuffer::new(16);
        buf.push(b"hello ");
        buf.push(b"world");
        assert!(!buf.is_truncated());
        assert_eq!(buf.take_text(), ("hello world".to_string(), false));
    }

    #[test]
    fn over_cap_truncates_and_flags() {
        let mut buf = CappedBuffer::new(4);
        buf.push(b"abc");
        buf.push(b"defg");
        buf.push(b"h");
        let (text, truncated) = buf.take_text();
        assert_eq!(text, "abcd");
        assert!(truncated);
    }

    #[test]
    fn exact_fill_is_not_truncation() {
        let mut buf = CappedBuffer::new(3);
        buf.push(b"abc");
        assert!(!buf.is_truncated());
        buf.push(b"");
        assert!(!buf.is_truncated());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut buf = CappedBuffer::new(8);
        buf.push(&[b'o', b'k', 0xff]);
        let (text, _) = buf.take_text();
        assert!(text.starts_with("ok"));
        assert!(text.contains('\u{fffd}'));
    }

    #[tokio::test]
    async fn drain_reads_until_eof() {
        let sink = shared(1024);
        drain(&b"line one\nline two\n"[..], sink.clone(), None).await;
        assert_eq!(take(&sink), ("line one\nline two\n".to_string(), false));
    }
}
