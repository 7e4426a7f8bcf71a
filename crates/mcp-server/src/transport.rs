//! Newline-delimited JSON framing over async byte streams.

use serde::Serialize;
use serde_json::Value;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for one inbound line.
pub const MAX_FRAME_BYTES: usize = if cfg!(test) { 4096 } else { 16 * 1024 * 1024 };

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    TooLarge,
}

const fn is_ascii_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn strip_utf8_bom(line: &mut Vec<u8>) {
    const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
    if line.starts_with(BOM) {
        line.drain(..BOM.len());
    }
}

/// Reads one JSON value per line. Blank lines are skipped.
pub struct FrameReader<R> {
    read: R,
    first: bool,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(read: R) -> Self {
        Self { read, first: true }
    }

    /// The next frame, or `None` on a clean end of input.
    pub async fn next_frame(&mut self) -> Result<Option<Value>, FrameError> {
        loop {
            let mut line = Vec::new();
            let n = (&mut self.read)
                .take(MAX_FRAME_BYTES as u64 + 1)
                .read_until(b'\n', &mut line)
                .await?;
            if n == 0 {
                return Ok(None);
            }
            if line.len() > MAX_FRAME_BYTES {
                return Err(FrameError::TooLarge);
            }
            if std::mem::take(&mut self.first) {
                strip_utf8_bom(&mut line);
            }
            let Some(start) = line.iter().position(|b| !is_ascii_whitespace(*b)) else {
                continue;
            };
            return serde_json::from_slice(&line[start..])
                .map(Some)
                .map_err(|err| FrameError::Malformed(err.to_string()));
        }
    }
}

/// Writes compact JSON followed by `\n`, flushing after every frame.
pub struct FrameWriter<W> {
    write: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(write: W) -> Self {
        Self { write }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> io::Result<()> {
        let mut bytes = serde_json::to_vec(message).map_err(io::Error::other)?;
        bytes.push(b'\n');
        self.write.write_all(&bytes).await?;
        self.write.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn reads_lines_and_skips_blanks() {
        let input: &[u8] = b"\xEF\xBB\xBF{\"a\":1}\r\n\n   \n[1,2]\n{\"tail\":true}";
        let mut reader = FrameReader::new(input);
        assert_eq!(reader.next_frame().await.expect("a"), Some(json!({"a": 1})));
        assert_eq!(reader.next_frame().await.expect("b"), Some(json!([1, 2])));
        assert_eq!(reader.next_frame().await.expect("c"), Some(json!({"tail": true})));
        assert_eq!(reader.next_frame().await.expect("eof"), None);
    }

    #[tokio::test]
    async fn garbage_and_oversized_lines_fail() {
        let mut reader = FrameReader::new(&b"{not json}\n"[..]);
        assert!(matches!(
            reader.next_frame().await,
            Err(FrameError::Malformed(_))
        ));

        let big = format!("\"{}\"\n", "x".repeat(MAX_FRAME_BYTES + 10));
        let mut reader = FrameReader::new(big.as_bytes());
        assert!(matches!(reader.next_frame().await, Err(FrameError::TooLarge)));
    }

    #[tokio::test]
    async fn writer_emits_one_line_per_message() {
        let mut out = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut out);
            writer.send(&json!({"id": 1})).await.expect("send");
            writer.send(&json!({"id": 2})).await.expect("send");
        }
        assert_eq!(String::from_utf8(out).expect("utf8"), "{\"id\":1}\n{\"id\":2}\n");
    }
}
