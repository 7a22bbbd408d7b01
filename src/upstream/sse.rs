//! Incremental decoder for the provider's `text/event-stream` body.
//!
//! Network chunks do not line up with SSE lines or frames, so the unfinished
//! line is buffered between pushes and every byte is scanned once. Lines end
//! in `\n`, `\r\n` or a bare `\r`; a blank line terminates a frame. Only
//! `data:` fields matter here; `event:`, `id:` and comment lines are skipped.

use bytes::BytesMut;

use crate::upstream::UpstreamError;

/// Payload that marks the end of an OpenAI stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Largest frame (pending line plus collected data) held in memory.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

#[derive(Debug, Default)]
pub struct SseDecoder {
    line: BytesMut,
    data: Option<String>,
    frame_len: usize,
    /// The previous push ended on `\r`; a leading `\n` belongs to it.
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, appending the `data` payload of every completed frame
    /// to `out`. Fails once a single frame grows past [`MAX_FRAME_BYTES`].
    pub fn push(
        &mut self,
        bytes: &[u8],
        out: &mut impl Extend<String>,
    ) -> Result<(), UpstreamError> {
        let mut rest = bytes;
        if self.after_cr && !rest.is_empty() {
            self.after_cr = false;
            if rest[0] == b'\n' {
                rest = &rest[1..];
            }
        }

        while let Some(pos) = rest.iter().position(|&b| b == b'\n' || b == b'\r') {
            self.line.extend_from_slice(&rest[..pos]);
            let mut consumed = pos + 1;
            if rest[pos] == b'\r' {
                match rest.get(pos + 1) {
                    Some(b'\n') => consumed += 1,
                    Some(_) => {}
                    None => self.after_cr = true,
                }
            }
            rest = &rest[consumed..];

            let line = self.line.split();
            if let Some(payload) = self.accept_line(&line) {
                out.extend(Some(payload));
            }
        }
        self.line.extend_from_slice(rest);

        if self.line.len() + self.frame_len > MAX_FRAME_BYTES {
            return Err(UpstreamError::Decode(format!(
                "event stream frame exceeds {MAX_FRAME_BYTES} bytes"
            )));
        }
        Ok(())
    }

    /// Flush whatever is left once the body ends without a trailing blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.line.is_empty() {
            let line = self.line.split();
            self.accept_line(&line);
        }
        self.frame_len = 0;
        self.data.take()
    }

    /// Apply one complete line; a blank line yields the finished frame's data.
    fn accept_line(&mut self, line: &[u8]) -> Option<String> {
        if line.is_empty() {
            self.frame_len = 0;
            return self.data.take();
        }

        let value = line.strip_prefix(b"data:")?;
        let value = value.strip_prefix(b" ").unwrap_or(value);
        let value = String::from_utf8_lossy(value);
        self.frame_len += value.len() + 1;
        match self.data.as_mut() {
            Some(d) => {
                d.push('\n');
                d.push_str(&value);
            }
            None => self.data = Some(value.into_owned()),
        }
        None
    }
}
