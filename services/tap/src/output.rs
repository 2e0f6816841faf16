// Output side of the drain: payloads arrive on a channel and are written one
// per line. Logging goes to stderr, so stdout carries payloads only.
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Bound on payloads buffered between the drain loop and the writer.
pub const OUTPUT_BUFFER: usize = 256;

/// Write every received payload followed by a newline, flushing after each so
/// piped consumers see messages as they arrive. Returns the number written
/// once the channel closes.
pub async fn write_lines<W>(mut rx: mpsc::Receiver<String>, mut out: W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(line) = rx.recv().await {
        out.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            out.write_all(b"\n").await?;
        }
        out.flush().await?;
        written += 1;
    }
    Ok(written)
}
