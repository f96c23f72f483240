//! HTTP chunked transfer coding over an arbitrary byte channel.
//!
//! # Data Flow
//! ```text
//! body bytes → writer.rs → "<HEX>\r\n<data>\r\n" ... "0\r\n\r\n" → wire
//! wire → reader.rs → body bytes (stops at the zero-length chunk)
//! ```
//!
//! # Design Decisions
//! - Neither side closes the underlying channel; keep-alive connections continue
//!   after the terminating chunk
//! - The reader never consumes bytes past the end of the chunked body
//! - Malformed framing is fatal: the stream is desynchronized and cannot recover

pub mod reader;
pub mod writer;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite};

pub use reader::ChunkedReader;
pub use writer::ChunkedWriter;

/// Errors raised by the chunked codecs.
#[derive(Debug, Error)]
pub enum ChunkedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel closed before the chunked body was complete.
    #[error("unexpected end of stream inside chunked body")]
    UnexpectedEof,

    #[error("invalid chunk size line: {0:?}")]
    InvalidSize(String),

    /// The CRLF after a chunk's data was not empty.
    #[error("chunk data not followed by an empty line")]
    InvalidTrailer,

    #[error("chunk framing line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("more than {0} trailer fields")]
    TooManyTrailers(usize),

    /// Write or finish after the terminating chunk was emitted.
    #[error("chunked stream already finished")]
    Finished,
}

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Stream a whole chunked body from `reader` to `writer`, re-encoding it.
///
/// `on_data` sees every decoded slice before it is forwarded. The terminating
/// chunk is written once the reader reaches the end of the body.
pub async fn copy_chunked<R, W, F>(
    reader: &mut ChunkedReader<R>,
    writer: &mut ChunkedWriter<W>,
    mut on_data: F,
) -> Result<u64, ChunkedError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n > 0 {
            on_data(&buf[..n]);
            writer.write(&buf[..n]).await?;
            total += n as u64;
        }
        if reader.is_ended() {
            break;
        }
    }
    writer.finish().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn round_trip_preserves_split_writes() {
        let pieces: Vec<&[u8]> = vec![b"alpha", b"", b"b", &[0u8; 300], b"omega"];
        let mut encoded = Vec::new();
        {
            let mut w = ChunkedWriter::new(&mut encoded);
            for p in &pieces {
                w.write(p).await.unwrap();
            }
            w.finish().await.unwrap();
        }
        encoded.extend_from_slice(b"NEXT REQUEST");

        let mut r = ChunkedReader::new(BufReader::new(&encoded[..]));
        let mut decoded = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = r.read(&mut buf).await.unwrap();
            decoded.extend_from_slice(&buf[..n]);
            if r.is_ended() {
                break;
            }
        }
        assert_eq!(decoded, pieces.concat());

        // bytes after the zero chunk are left for the next reader
        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut r.into_inner(), &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, b"NEXT REQUEST");
    }

    #[tokio::test]
    async fn round_trip_at_every_split_point() {
        let body: Vec<u8> = (0u8..40).collect();
        for split in 0..=body.len() {
            let mut encoded = Vec::new();
            {
                let mut w = ChunkedWriter::new(&mut encoded);
                w.write(&body[..split]).await.unwrap();
                w.write(&body[split..]).await.unwrap();
                w.finish().await.unwrap();
            }

            for buf_len in [1, 7, 64] {
                let mut r = ChunkedReader::new(BufReader::new(&encoded[..]));
                let mut decoded = Vec::new();
                let mut buf = vec![0u8; buf_len];
                while !r.is_ended() {
                    let n = r.read(&mut buf).await.unwrap();
                    decoded.extend_from_slice(&buf[..n]);
                }
                assert_eq!(decoded, body, "split {split}, buffer {buf_len}");
            }
        }
    }

    #[tokio::test]
    async fn copy_reencodes_body() {
        let input = b"3\r\nabc\r\n2;ext=1\r\nde\r\n0\r\n\r\n";
        let mut reader = ChunkedReader::new(BufReader::new(&input[..]));
        let mut out = Vec::new();
        let mut seen = Vec::new();
        let n = {
            let mut writer = ChunkedWriter::new(&mut out);
            copy_chunked(&mut reader, &mut writer, |d| seen.extend_from_slice(d))
                .await
                .unwrap()
        };
        assert_eq!(n, 5);
        assert_eq!(seen, b"abcde");
        assert_eq!(out, b"5\r\nabcde\r\n0\r\n\r\n");
    }
}
