//! REPL wire protocol codec
//!
//! The child speaks plain text over its standard streams:
//! ```text
//! harness -> child:  <command>\r\n
//! child -> harness:  <output lines...>sqlite >
//! ```
//! Responses are delimited by the prompt, which has no trailing newline, so
//! reads cannot be line-based. The readers here take a caller-owned
//! `pending` buffer: bytes are moved into it before they are consumed from
//! the reader, so a read cancelled by a timeout loses nothing.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Result;

use super::types::{CaptureEnd, Command, Response};

/// Write a command followed by the line terminator, then flush
pub async fn write_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    command: &Command,
    terminator: &str,
) -> Result<()> {
    let mut line = String::with_capacity(command.as_str().len() + terminator.len());
    line.push_str(command.as_str());
    line.push_str(terminator);

    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}

/// Read until `delimiter` appears or the stream ends
///
/// The delimiter itself is consumed but not included in the response text.
pub async fn read_until_delimiter<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    delimiter: &[u8],
    pending: &mut Vec<u8>,
) -> Result<Response> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(take_response(pending, CaptureEnd::EndOfStream));
        }

        let mut used = buf.len();
        let mut found = false;
        for (i, byte) in buf.iter().enumerate() {
            pending.push(*byte);
            if pending.ends_with(delimiter) {
                pending.truncate(pending.len() - delimiter.len());
                used = i + 1;
                found = true;
                break;
            }
        }
        reader.consume(used);

        if found {
            return Ok(take_response(pending, CaptureEnd::Delimiter));
        }
    }
}

/// Read exactly one line; the line terminator is stripped
pub async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    pending: &mut Vec<u8>,
) -> Result<Response> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(take_response(pending, CaptureEnd::EndOfStream));
        }

        match buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                pending.extend_from_slice(&buf[..pos]);
                reader.consume(pos + 1);
                if pending.last() == Some(&b'\r') {
                    pending.pop();
                }
                return Ok(take_response(pending, CaptureEnd::LineEnd));
            }
            None => {
                let len = buf.len();
                pending.extend_from_slice(buf);
                reader.consume(len);
            }
        }
    }
}

/// Read everything until the stream ends
pub async fn read_to_end<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    pending: &mut Vec<u8>,
) -> Result<Response> {
    reader.read_to_end(pending).await?;
    Ok(take_response(pending, CaptureEnd::EndOfStream))
}

fn take_response(pending: &mut Vec<u8>, end: CaptureEnd) -> Response {
    let bytes = std::mem::take(pending);
    Response::new(String::from_utf8_lossy(&bytes).into_owned(), end)
}
