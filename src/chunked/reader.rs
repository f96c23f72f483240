//! Chunked transfer-coding decoder.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::ChunkedError;

/// Upper bound on a chunk-size or trailer line.
const MAX_LINE_LEN: usize = 1024;
/// Bytes read while looking for a line end: the line plus its CRLF.
const LINE_READ_LIMIT: usize = MAX_LINE_LEN + 2;
/// Upper bound on trailer fields after the last chunk.
const MAX_TRAILER_LINES: usize = 64;

/// Decodes a chunked body from a buffered channel.
#[derive(Debug)]
pub struct ChunkedReader<R> {
    inner: R,
    /// Data bytes left in the current chunk.
    remaining: u64,
    ended: bool,
}

impl<R: AsyncBufRead + Unpin> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            ended: false,
        }
    }

    /// Fill `buf` from as many chunks as needed.
    ///
    /// Returns fewer than `buf.len()` bytes (possibly zero) only when the
    /// terminating chunk was reached; `is_ended` is then true.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChunkedError> {
        let mut filled = 0;
        while filled < buf.len() && !self.ended {
            if self.remaining == 0 {
                let size = self.read_size_line().await?;
                if size == 0 {
                    self.read_trailers().await?;
                    self.ended = true;
                    tracing::trace!("chunked body complete");
                    break;
                }
                self.remaining = size;
            }

            let want = (buf.len() - filled).min(self.remaining.min(usize::MAX as u64) as usize);
            let n = self.inner.read(&mut buf[filled..filled + want]).await?;
            if n == 0 {
                return Err(ChunkedError::UnexpectedEof);
            }
            filled += n;
            self.remaining -= n as u64;

            if self.remaining == 0 {
                let line = self.read_line().await?;
                if !line.is_empty() {
                    return Err(ChunkedError::InvalidTrailer);
                }
            }
        }
        Ok(filled)
    }

    /// True once the zero-length chunk and its trailers were consumed.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Unwrap the channel, positioned just after the chunked body when ended.
    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn read_size_line(&mut self) -> Result<u64, ChunkedError> {
        let line = match self.read_line().await {
            Ok(line) => line,
            Err(ChunkedError::LineTooLong(limit)) => {
                return Err(ChunkedError::InvalidSize(format!("size line longer than {} bytes", limit)));
            }
            Err(e) => return Err(e),
        };
        parse_chunk_size(&line)
    }

    async fn read_trailers(&mut self) -> Result<(), ChunkedError> {
        for _ in 0..MAX_TRAILER_LINES {
            if self.read_line().await?.is_empty() {
                return Ok(());
            }
        }
        Err(ChunkedError::TooManyTrailers(MAX_TRAILER_LINES))
    }

    /// One line without its terminating CRLF (a bare LF is tolerated).
    async fn read_line(&mut self) -> Result<Vec<u8>, ChunkedError> {
        let mut line = Vec::new();
        let n = (&mut self.inner)
            .take(LINE_READ_LIMIT as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Err(ChunkedError::UnexpectedEof);
        }
        if line.last() != Some(&b'\n') {
            // a short read without a newline means the channel closed
            if n >= LINE_READ_LIMIT {
                return Err(ChunkedError::LineTooLong(MAX_LINE_LEN));
            }
            return Err(ChunkedError::UnexpectedEof);
        }
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }
}

/// Parse a chunk-size line, ignoring any `;` extensions.
fn parse_chunk_size(line: &[u8]) -> Result<u64, ChunkedError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ChunkedError::InvalidSize(String::from_utf8_lossy(line).into_owned()))?;
    let size = text.split(';').next().unwrap_or_default().trim_matches([' ', '\t']);
    if size.is_empty() || size.len() > 16 || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ChunkedError::InvalidSize(text.to_string()));
    }
    u64::from_str_radix(size, 16).map_err(|_| ChunkedError::InvalidSize(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn decode_all(input: &[u8]) -> Result<Vec<u8>, ChunkedError> {
        let mut r = ChunkedReader::new(BufReader::new(input));
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = r.read(&mut buf).await?;
            out.extend_from_slice(&buf[..n]);
            if r.is_ended() {
                return Ok(out);
            }
        }
    }

    #[tokio::test]
    async fn decodes_single_chunk() {
        let mut r = ChunkedReader::new(BufReader::new(&b"5\r\nHELLO\r\n0\r\n\r\n"[..]));
        let mut buf = [0u8; 5];
        assert_eq!(r.read(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf, b"HELLO");
        assert!(!r.is_ended());
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
        assert!(r.is_ended());
    }

    #[tokio::test]
    async fn lowercase_hex_and_extensions() {
        let out = decode_all(b"a;name=value\r\n0123456789\r\n0\r\n\r\n").await.unwrap();
        assert_eq!(out, b"0123456789");
        let out = decode_all(b"1A\r\nabcdefghijklmnopqrstuvwxyz\r\n0\r\n\r\n").await.unwrap();
        assert_eq!(out.len(), 26);
    }

    #[tokio::test]
    async fn truncated_mid_chunk_is_eof_error() {
        let err = decode_all(b"a\r\nabc").await.unwrap_err();
        assert!(matches!(err, ChunkedError::UnexpectedEof));
    }

    #[tokio::test]
    async fn non_empty_trailer_is_rejected() {
        let err = decode_all(b"3\r\nabcXY\r\n0\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, ChunkedError::InvalidTrailer));
    }

    #[tokio::test]
    async fn invalid_size_is_rejected() {
        let err = decode_all(b"zz\r\nabc\r\n").await.unwrap_err();
        assert!(matches!(err, ChunkedError::InvalidSize(_)));
        let err = decode_all(b"+5\r\nhello\r\n0\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, ChunkedError::InvalidSize(_)));

        let mut long = vec![b'0'; 2000];
        long.extend_from_slice(b"1\r\nx\r\n0\r\n\r\n");
        let err = decode_all(&long).await.unwrap_err();
        assert!(matches!(err, ChunkedError::InvalidSize(_)));
    }

    #[tokio::test]
    async fn eof_on_a_long_unterminated_line_is_eof_error() {
        for len in [MAX_LINE_LEN - 1, MAX_LINE_LEN, MAX_LINE_LEN + 1] {
            let err = decode_all(&vec![b'0'; len]).await.unwrap_err();
            assert!(matches!(err, ChunkedError::UnexpectedEof), "len {len}: {err}");
        }
    }

    #[tokio::test]
    async fn endless_trailers_are_rejected() {
        let mut input = b"0\r\n".to_vec();
        for _ in 0..100 {
            input.extend_from_slice(b"X-Filler: 1\r\n");
        }
        input.extend_from_slice(b"\r\n");
        let err = decode_all(&input).await.unwrap_err();
        assert!(matches!(err, ChunkedError::TooManyTrailers(64)));
    }

    #[tokio::test]
    async fn trailer_fields_are_skipped() {
        let out = decode_all(b"2\r\nok\r\n0\r\nExpires: never\r\n\r\n").await.unwrap();
        assert_eq!(out, b"ok");
    }

    #[tokio::test]
    async fn missing_terminator_is_eof_error() {
        let err = decode_all(b"2\r\nok\r\n").await.unwrap_err();
        assert!(matches!(err, ChunkedError::UnexpectedEof));
    }
}
