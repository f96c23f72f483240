//! Message body relay for each framing kind.

use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::head::BodyKind;
use super::ProxyError;
use crate::chunked::{copy_chunked, ChunkedReader, ChunkedWriter};

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Forward one body from `reader` to `writer` according to `kind`.
///
/// Chunked bodies are decoded and re-encoded, so chunk boundaries and
/// extensions from the sender are not preserved. `on_data` sees the decoded
/// payload. Returns the payload byte count.
pub async fn relay_body<R, W, F>(
    kind: BodyKind,
    reader: &mut R,
    writer: &mut W,
    mut on_data: F,
) -> Result<u64, ProxyError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&[u8]),
{
    let total = match kind {
        BodyKind::Empty => 0,
        BodyKind::ContentLength(len) => {
            let copied = copy_with(&mut (&mut *reader).take(len), writer, &mut on_data).await?;
            if copied < len {
                return Err(ProxyError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            copied
        }
        BodyKind::Chunked => {
            let mut decoder = ChunkedReader::new(&mut *reader);
            let mut encoder = ChunkedWriter::new(&mut *writer);
            copy_chunked(&mut decoder, &mut encoder, &mut on_data).await?
        }
        BodyKind::UntilClose => copy_with(reader, writer, &mut on_data).await?,
    };
    writer.flush().await?;
    Ok(total)
}

async fn copy_with<R, W, F>(reader: &mut R, writer: &mut W, on_data: &mut F) -> Result<u64, ProxyError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        on_data(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn content_length_stops_at_boundary() {
        let mut reader = BufReader::new(&b"hello, and the next request"[..]);
        let mut out = Vec::new();
        let n = relay_body(BodyKind::ContentLength(5), &mut reader, &mut out, |_| {}).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn short_content_length_is_eof() {
        let mut reader = BufReader::new(&b"abc"[..]);
        let mut out = Vec::new();
        let err = relay_body(BodyKind::ContentLength(10), &mut reader, &mut out, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn chunked_is_re_encoded() {
        let mut reader = BufReader::new(&b"2;ext=1\r\nhe\r\n3\r\nllo\r\n0\r\n\r\nGET"[..]);
        let mut out = Vec::new();
        let mut seen = Vec::new();
        let n = relay_body(BodyKind::Chunked, &mut reader, &mut out, |d| seen.extend_from_slice(d))
            .await
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(seen, b"hello");
        assert_eq!(out, b"5\r\nhello\r\n0\r\n\r\n");
    }
}
