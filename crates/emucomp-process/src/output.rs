//! Streaming capture of a child's stdout/stderr.
//!
//! Pipes have a fixed kernel capacity (64 KiB on Linux). A child that writes
//! more than that blocks until somebody reads, so output is drained by a
//! background task for as long as the process runs instead of being read
//! after exit.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 8192;

/// Bytes captured from one output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Captured bytes, at most `max_output_bytes` long.
    pub bytes: Vec<u8>,
    /// Whether bytes were discarded, past the limit or after an abandoned drain.
    pub truncated: bool,
}

impl CapturedOutput {
    /// Lossy UTF-8 view of the captured bytes.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    fn append(&mut self, chunk: &[u8], limit: usize, stream: &'static str) {
        let room = limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            if !self.truncated {
                tracing::warn!(stream, limit, "Output limit reached, discarding");
            }
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

type SharedOutput = Arc<Mutex<CapturedOutput>>;

fn take(shared: &SharedOutput) -> CapturedOutput {
    std::mem::take(&mut *shared.lock().unwrap_or_else(PoisonError::into_inner))
}

/// Background task reading a single stream to EOF.
///
/// Bytes land in a buffer shared with the owner, so whatever was read
/// survives the task being aborted.
pub(crate) struct OutputDrain {
    task: JoinHandle<()>,
    output: SharedOutput,
}

impl OutputDrain {
    pub(crate) fn spawn<R>(mut reader: R, limit: usize, stream: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let output = SharedOutput::default();
        let sink = Arc::clone(&output);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .append(&chunk[..n], limit, stream),
                    Err(e) => {
                        tracing::debug!(stream, error = %e, "Output stream closed with error");
                        break;
                    }
                }
            }
        });

        Self { task, output }
    }

    /// Wait for EOF and return what was captured.
    ///
    /// A grandchild that inherited the pipe can keep it open after the direct
    /// child exited; the drain is abandoned once `grace` elapses and the bytes
    /// read so far are returned flagged as truncated.
    pub(crate) async fn collect_within(mut self, grace: Duration) -> CapturedOutput {
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(())) => take(&self.output),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Output drain did not finish");
                let mut output = take(&self.output);
                output.truncated = true;
                output
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Output stream still open, abandoning drain"
                );
                self.task.abort();
                let mut output = take(&self.output);
                output.truncated = true;
                output
            }
        }
    }

    pub(crate) fn abort(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_reads_everything() {
        let data = vec![7u8; 100_000];
        let drain = OutputDrain::spawn(std::io::Cursor::new(data.clone()), usize::MAX, "stdout");
        let output = drain.collect_within(Duration::from_secs(5)).await;
        assert_eq!(output.bytes, data);
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_drain_truncates_past_limit() {
        let data = vec![1u8; 10_000];
        let drain = OutputDrain::spawn(std::io::Cursor::new(data), 1024, "stdout");
        let output = drain.collect_within(Duration::from_secs(5)).await;
        assert_eq!(output.bytes.len(), 1024);
        assert!(output.truncated);
    }

    #[tokio::test]
    async fn test_abandoned_drain_keeps_bytes_read() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let drain = OutputDrain::spawn(reader, usize::MAX, "stdout");
        tokio::io::AsyncWriteExt::write_all(&mut writer, b"hello\n")
            .await
            .unwrap();

        // writer stays open, like a grandchild holding the pipe
        let output = drain.collect_within(Duration::from_millis(200)).await;
        assert_eq!(output.bytes, b"hello\n");
        assert!(output.truncated);
        drop(writer);
    }

    #[test]
    fn test_lossy_string() {
        let output = CapturedOutput {
            bytes: b"hello\n".to_vec(),
            truncated: false,
        };
        assert_eq!(output.to_string_lossy(), "hello\n");
    }
}
