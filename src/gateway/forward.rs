//! The gateway's three forwarding duties.
//!
//! Each duty runs until its source reaches EOF or `cancel` fires. They are
//! generic over the I/O halves so tests can drive them with in-memory pipes.
//!
//! The output and error duties keep draining the child even when their own
//! sink fails, so the child never blocks on a full pipe.

use std::path::Path;

use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::codec::{Frame, LineCodec};
use super::filter::{translate_bytes, DropReason, LineDisposition};
use crate::{AppError, Result};

/// Line counts reported by [`forward_output`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    /// Lines written to our stdout.
    pub emitted: u64,
    /// Lines dropped (blank, banner, non-JSON, malformed, oversized, not
    /// UTF-8, or unwritable).
    pub dropped: u64,
}

/// Copy our stdin lines byte for byte to the child, flushing after each line.
///
/// The child's stdin is shut down when our stdin reaches EOF, so the child
/// sees EOF in turn. Returns the number of lines forwarded.
///
/// # Errors
///
/// Returns `AppError::Gateway` if writing to the child fails.
pub async fn forward_input<R, W>(input: R, mut child_stdin: W, cancel: CancellationToken) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedRead::new(input, LineCodec::new());
    let mut forwarded = 0_u64;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("gateway input: cancellation received, stopping");
                break;
            }

            item = framed.next() => match item {
                None => {
                    debug!(forwarded, "gateway input: EOF, closing child stdin");
                    child_stdin
                        .shutdown()
                        .await
                        .map_err(|e| AppError::Gateway(format!("closing child stdin failed: {e}")))?;
                    break;
                }
                Some(Ok(Frame::TooLong)) => {
                    warn!("gateway input: skipping oversized line");
                }
                Some(Err(e)) => {
                    warn!(error = %e, "gateway input: read failed, stopping");
                    break;
                }
                Some(Ok(Frame::Line(line))) => {
                    child_stdin
                        .write_all(&line)
                        .await
                        .map_err(|e| AppError::Gateway(format!("write to child stdin failed: {e}")))?;
                    child_stdin
                        .flush()
                        .await
                        .map_err(|e| AppError::Gateway(format!("flush of child stdin failed: {e}")))?;
                    forwarded += 1;
                }
            },
        }
    }

    Ok(forwarded)
}

/// Translate the child's stdout line by line onto `out`.
///
/// If `out` stops accepting writes, the failure is logged and the child's
/// stdout is still read to EOF, with every later line counted as dropped.
pub async fn forward_output<R, W>(child_stdout: R, mut out: W, cancel: CancellationToken) -> OutputStats
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedRead::new(child_stdout, LineCodec::new());
    let mut stats = OutputStats::default();
    let mut out_open = true;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("gateway output: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                let line = match item {
                    None => {
                        debug!(emitted = stats.emitted, dropped = stats.dropped, "gateway output: child stdout closed");
                        break;
                    }
                    Some(Ok(Frame::TooLong)) => {
                        warn!("gateway output: skipping oversized line");
                        stats.dropped += 1;
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "gateway output: read failed, stopping");
                        break;
                    }
                    Some(Ok(Frame::Line(line))) => line,
                };

                match translate_bytes(&line) {
                    LineDisposition::Emit(encoded) if out_open => {
                        match write_line(&mut out, encoded).await {
                            Ok(()) => stats.emitted += 1,
                            Err(e) => {
                                warn!(error = %e, "gateway output: stdout unwritable, discarding further output");
                                out_open = false;
                                stats.dropped += 1;
                            }
                        }
                    }
                    LineDisposition::Emit(_) => stats.dropped += 1,
                    LineDisposition::Drop(reason) => {
                        stats.dropped += 1;
                        let text = String::from_utf8_lossy(&line);
                        match reason {
                            DropReason::Banner => debug!(line = %text.trim(), "gateway output: dropped startup banner"),
                            DropReason::Malformed(error) => warn!(%error, "gateway output: dropped malformed json line"),
                            DropReason::InvalidUtf8 => warn!(line = %text.trim(), "gateway output: dropped line that is not utf-8"),
                            DropReason::NotJson => trace!(line = %text.trim(), "gateway output: dropped non-json line"),
                            DropReason::Blank | DropReason::Internal => {}
                        }
                    }
                }
            }
        }
    }

    stats
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, mut encoded: String) -> std::io::Result<()> {
    encoded.push('\n');
    out.write_all(encoded.as_bytes()).await?;
    out.flush().await
}

/// Append the child's stderr bytes, unmodified, to the file at `path`.
///
/// If the log cannot be opened or stops accepting writes, the failure is
/// logged and the child's stderr is still drained to EOF. Returns the number
/// of bytes that reached the log.
pub async fn forward_errors<R>(mut child_stderr: R, path: &Path, cancel: CancellationToken) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut sink = match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "gateway errors: cannot open stderr log, discarding child stderr");
            None
        }
    };

    let mut buf = vec![0_u8; 8 * 1024];
    let mut written = 0_usize;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("gateway errors: cancellation received, stopping");
                break;
            }

            read = child_stderr.read(&mut buf) => {
                let n = match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "gateway errors: read failed, stopping");
                        break;
                    }
                };
                let Some(file) = sink.as_mut() else {
                    continue;
                };
                match append(file, &buf[..n]).await {
                    Ok(()) => written += n,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "gateway errors: stderr log write failed, discarding child stderr");
                        sink = None;
                    }
                }
            }
        }
    }

    written
}

async fn append(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}
