//! The expectation engine: patterns and the rolling output buffer they are
//! matched against.
//!
//! A background thread reads the PTY master and forwards chunks over a
//! channel; [`OutputStream::expect`] drains that channel into a rolling
//! buffer and tests the buffer after every chunk. On a match the buffer is
//! consumed up to and including the matched region, so sequential expects
//! walk forward through the stream and never re-match old output.

use crate::error::{Error, Result};
use log::trace;
use regex::Regex;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::thread;
use std::time::{Duration, Instant};

/// Sink for everything the child writes to its terminal.
pub type OutputHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Upper bound between deadline checks while waiting for output.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Cap on the rolling buffer; old, already-scanned output is dropped first.
const MAX_BUFFER: usize = 64 * 1024;

/// What an expectation is waiting for: a literal substring or a regular
/// expression.
#[derive(Debug, Clone)]
pub enum Pattern {
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    /// Literal substring pattern.
    pub fn literal(text: impl Into<String>) -> Self {
        Pattern::Literal(text.into())
    }

    /// Regular-expression pattern. Fails on an invalid expression.
    pub fn regex(expr: &str) -> Result<Self> {
        Ok(Pattern::Regex(Regex::new(expr)?))
    }

    /// Byte range of the first match in `haystack`, if any.
    fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        match self {
            Pattern::Literal(text) => haystack.find(text).map(|start| (start, start + text.len())),
            Pattern::Regex(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(text) => write!(f, "\"{}\"", text.escape_debug()),
            Pattern::Regex(re) => write!(f, "/{re}/"),
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Pattern::literal(text)
    }
}

impl From<String> for Pattern {
    fn from(text: String) -> Self {
        Pattern::Literal(text)
    }
}

impl From<Regex> for Pattern {
    fn from(re: Regex) -> Self {
        Pattern::Regex(re)
    }
}

/// Rolling view over the bytes the child has written to its terminal.
pub(crate) struct OutputStream {
    rx: Receiver<Vec<u8>>,
    buffer: String,
    eof: bool,
    handler: OutputHandler,
}

impl OutputStream {
    /// Start a reader thread over the PTY master and return the stream fed
    /// by it. The thread exits on EOF, read error, or receiver drop.
    pub(crate) fn start(mut reader: Box<dyn Read + Send>, handler: OutputHandler) -> Self {
        let (tx, rx) = channel();

        thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        OutputStream {
            rx,
            buffer: String::new(),
            eof: false,
            handler,
        }
    }

    fn ingest(&mut self, chunk: &[u8]) {
        (self.handler)(chunk);
        trace!("read {} bytes from pty", chunk.len());
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        if self.buffer.len() > MAX_BUFFER {
            let mut cut = self.buffer.len() - MAX_BUFFER / 2;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            self.buffer.drain(..cut);
        }
    }

    /// Drain whatever the child has already written without blocking.
    pub(crate) fn drain_pending(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => self.ingest(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.eof = true;
                    break;
                }
            }
        }
    }

    /// Block until `pattern` appears in the output, the stream closes, or
    /// `timeout` elapses. On success the buffer is consumed through the end
    /// of the match and the matched region is returned.
    pub(crate) async fn expect(&mut self, pattern: &Pattern, timeout: Duration) -> Result<String> {
        let start = Instant::now();

        loop {
            if let Some((begin, end)) = pattern.find(&self.buffer) {
                let matched = self.buffer[begin..end].to_string();
                self.buffer.drain(..end);
                return Ok(matched);
            }

            if self.eof {
                return Err(Error::Eof {
                    pattern: pattern.to_string(),
                });
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(Error::Timeout {
                    pattern: pattern.to_string(),
                    elapsed,
                });
            }

            // Bounded slices so the deadline is honored even while the
            // channel stays silent.
            match self.rx.recv_timeout((timeout - elapsed).min(READ_SLICE)) {
                Ok(chunk) => self.ingest(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.eof = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc::Sender;

    fn quiet() -> OutputHandler {
        Arc::new(|_| {})
    }

    fn manual_stream() -> (Sender<Vec<u8>>, OutputStream) {
        let (tx, rx) = channel();
        let stream = OutputStream {
            rx,
            buffer: String::new(),
            eof: false,
            handler: quiet(),
        };
        (tx, stream)
    }

    #[test]
    fn test_literal_find() {
        let pattern = Pattern::literal("> ");
        assert_eq!(pattern.find("hello\r\n> "), Some((7, 9)));
        assert_eq!(pattern.find("hello"), None);
    }

    #[test]
    fn test_regex_find() {
        let pattern = Pattern::regex(r"Set interface \d+").unwrap();
        assert_eq!(pattern.find("ok\r\nSet interface 15\r\n"), Some((4, 20)));
    }

    #[test]
    fn test_regex_rejects_invalid() {
        assert!(Pattern::regex("(unclosed").is_err());
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Pattern::literal("> ").to_string(), "\"> \"");
        assert_eq!(Pattern::regex("a+").unwrap().to_string(), "/a+/");
    }

    #[tokio::test]
    async fn test_sequential_expects_consume_forward() {
        let (tx, mut stream) = manual_stream();
        tx.send(b"argument invalid\r\n> ".to_vec()).unwrap();

        let first = stream
            .expect(&"argument invalid".into(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first, "argument invalid");

        stream
            .expect(&"> ".into(), Duration::from_secs(1))
            .await
            .unwrap();

        // Both matches are consumed; the same prompt must not match again.
        let err = stream
            .expect(&"> ".into(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_match_across_chunks() {
        let (tx, mut stream) = manual_stream();
        tx.send(b"argument in".to_vec()).unwrap();
        tx.send(b"valid\r\n".to_vec()).unwrap();

        let matched = stream
            .expect(&"argument invalid".into(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(matched, "argument invalid");
    }

    #[tokio::test]
    async fn test_disconnect_is_eof_not_timeout() {
        let (tx, mut stream) = manual_stream();
        tx.send(b"partial".to_vec()).unwrap();
        drop(tx);

        let err = stream
            .expect(&"never".into(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Eof { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_buffered_match_survives_disconnect() {
        let (tx, mut stream) = manual_stream();
        tx.send(b"goodbye\r\n".to_vec()).unwrap();
        drop(tx);

        // Data already in flight must still be matchable after EOF.
        stream
            .expect(&"goodbye".into(), Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_timeout_is_bounded() {
        let (_tx, mut stream) = manual_stream();

        let start = Instant::now();
        let err = stream
            .expect(&"never".into(), Duration::from_millis(300))
            .await
            .unwrap_err();
        let waited = start.elapsed();

        assert!(matches!(err, Error::Timeout { .. }), "got {err}");
        assert!(waited >= Duration::from_millis(300));
        assert!(waited < Duration::from_secs(2), "took {waited:?}");
    }

    #[tokio::test]
    async fn test_reader_thread_feeds_stream() {
        let mut stream = OutputStream::start(
            Box::new(Cursor::new(b"ready\r\n> ".to_vec())),
            quiet(),
        );

        stream
            .expect(&"ready".into(), Duration::from_secs(1))
            .await
            .unwrap();
        stream.expect(&"> ".into(), Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_sees_all_output() {
        let captured = Arc::new(std::sync::Mutex::new(Vec::<u8>::new()));
        let sink = captured.clone();
        let mut stream = OutputStream::start(
            Box::new(Cursor::new(b"hello world".to_vec())),
            Arc::new(move |data: &[u8]| sink.lock().unwrap().extend_from_slice(data)),
        );

        stream
            .expect(&"world".into(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&*captured.lock().unwrap(), b"hello world");
    }
}
