//! Chunked transfer-coding encoder.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::ChunkedError;

const TERMINATOR: &[u8] = b"0\r\n\r\n";

/// Encodes each `write` as one chunk on the wrapped channel.
#[derive(Debug)]
pub struct ChunkedWriter<W> {
    inner: W,
    finished: bool,
}

impl<W: AsyncWrite + Unpin> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    /// Emit `buf` as a single chunk. An empty buffer writes nothing, since a
    /// zero-length chunk would terminate the body.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, ChunkedError> {
        if self.finished {
            return Err(ChunkedError::Finished);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let header = format!("{:X}\r\n", buf.len());
        let mut frame = Vec::with_capacity(header.len() + buf.len() + 2);
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(buf);
        frame.extend_from_slice(b"\r\n");
        self.inner.write_all(&frame).await?;
        Ok(buf.len())
    }

    pub async fn flush(&mut self) -> Result<(), ChunkedError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Write the terminating zero-length chunk and flush. Fails if called twice.
    pub async fn finish(&mut self) -> Result<(), ChunkedError> {
        if self.finished {
            return Err(ChunkedError::Finished);
        }
        self.finished = true;
        self.inner.write_all(TERMINATOR).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap the channel. It is left open.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uppercase_hex_sizes() {
        let mut out = Vec::new();
        let mut w = ChunkedWriter::new(&mut out);
        w.write(&[b'x'; 255]).await.unwrap();
        w.finish().await.unwrap();
        assert!(out.starts_with(b"FF\r\n"));
        assert!(out.ends_with(b"\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn empty_write_is_noop() {
        let mut out = Vec::new();
        let mut w = ChunkedWriter::new(&mut out);
        assert_eq!(w.write(b"").await.unwrap(), 0);
        w.finish().await.unwrap();
        assert_eq!(out, TERMINATOR);
    }

    #[tokio::test]
    async fn finish_twice_fails() {
        let mut out = Vec::new();
        let mut w = ChunkedWriter::new(&mut out);
        w.finish().await.unwrap();
        assert!(matches!(w.finish().await, Err(ChunkedError::Finished)));
        assert!(matches!(w.write(b"late").await, Err(ChunkedError::Finished)));
        assert_eq!(out, TERMINATOR);
    }
}
