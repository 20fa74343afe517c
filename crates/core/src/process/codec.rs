//! Line framing for tool output.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Splits a byte stream into lines on `\n` or `\r`.
///
/// Progress bars redraw with a bare `\r`, so each redraw becomes its own
/// line as soon as it arrives. Runs without a delimiter are cut every
/// `max_length` bytes, which keeps memory bounded on output that never ends
/// a line. Blank lines are dropped and invalid UTF-8 is replaced.
#[derive(Debug, Clone, Copy)]
pub struct OutputLineCodec {
    max_length: usize,
}

impl OutputLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

fn to_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    if text.trim().is_empty() {
        None
    } else {
        Some(text.into_owned())
    }
}

impl Decoder for OutputLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let delimiter = src.iter().position(|b| *b == b'\n' || *b == b'\r');
            let chunk = match delimiter {
                Some(pos) if pos <= self.max_length => {
                    let chunk = src.split_to(pos);
                    src.advance(1);
                    chunk
                }
                _ if src.len() >= self.max_length => src.split_to(self.max_length),
                _ => return Ok(None),
            };
            if let Some(line) = to_line(&chunk) {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(to_line(&rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut OutputLineCodec, input: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(input);
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            lines.push(line);
        }
        while let Some(line) = codec.decode_eof(&mut buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_splits_on_carriage_return_and_newline() {
        let mut codec = OutputLineCodec::new(1024);
        let lines = decode_all(&mut codec, b"10%\r20%\r\nframe=1\n\n  \nlast");
        assert_eq!(lines, vec!["10%", "20%", "frame=1", "last"]);
    }

    #[test]
    fn test_partial_line_waits_for_delimiter() {
        let mut codec = OutputLineCodec::new(1024);
        let mut buf = BytesMut::from(&b"[download]  5"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"0.0%\r");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("[download]  50.0%")
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_long_run_without_delimiter_is_cut() {
        let mut codec = OutputLineCodec::new(4);
        let mut buf = BytesMut::from(&b"abcdefghij"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("abcd"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("efgh"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 2);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("ij"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut codec = OutputLineCodec::new(64);
        let lines = decode_all(&mut codec, b"bad \xff byte\n");
        assert_eq!(lines, vec!["bad \u{fffd} byte"]);
    }

    #[test]
    fn test_zero_limit_still_makes_progress() {
        let codec = OutputLineCodec::new(0);
        assert_eq!(codec.max_length(), 1);
    }
}
