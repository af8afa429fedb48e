use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Newline-delimited JSON codec used for subscription event streams.
/// Blank lines are skipped and a trailing `\r` is tolerated.
pub struct EventStreamCodec {
    max_line_length: usize,
}

impl EventStreamCodec {
    pub fn new() -> Self {
        Self {
            max_line_length: 1024 * 1024, // 1MB default
        }
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self { max_line_length }
    }

    fn parse_line(line: &[u8]) -> Result<Option<Value>, EventCodecError> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(line)
            .map(Some)
            .map_err(|e| EventCodecError::JsonError(e.to_string()))
    }
}

impl Default for EventStreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventStreamCodec {
    type Item = Value;
    type Error = EventCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > self.max_line_length {
                    return Err(EventCodecError::LineTooLong(src.len()));
                }
                return Ok(None);
            };

            if pos > self.max_line_length {
                return Err(EventCodecError::LineTooLong(pos));
            }

            let line = src.split_to(pos);
            src.advance(1);

            if let Some(event) = Self::parse_line(&line)? {
                return Ok(Some(event));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        // Last line without a terminating newline.
        let rest = src.split_to(src.len());
        Self::parse_line(&rest)
    }
}

impl Encoder<Value> for EventStreamCodec {
    type Error = EventCodecError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json_bytes =
            serde_json::to_vec(&item).map_err(|e| EventCodecError::JsonError(e.to_string()))?;

        if json_bytes.len() > self.max_line_length {
            return Err(EventCodecError::LineTooLong(json_bytes.len()));
        }

        dst.reserve(json_bytes.len() + 1);
        dst.put_slice(&json_bytes);
        dst.put_u8(b'\n');

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventCodecError {
    #[error("Line too long: {0} bytes")]
    LineTooLong(usize),

    #[error("JSON error: {0}")]
    JsonError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode() {
        let mut codec = EventStreamCodec::new();
        let mut buffer = BytesMut::new();

        codec.encode(json!({"tick": 1}), &mut buffer).unwrap();
        assert_eq!(buffer[buffer.len() - 1], b'\n');

        let decoded = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(decoded, json!({"tick": 1}));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_line_waits_for_more() {
        let mut codec = EventStreamCodec::new();
        let mut buffer = BytesMut::from(&b"{\"tick\""[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.put_slice(b":2}\r\n");
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(json!({"tick": 2})));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut codec = EventStreamCodec::new();
        let mut buffer = BytesMut::from(&b"\n\r\n  \n3\n"[..]);
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(json!(3)));
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_trailing_line_at_eof() {
        let mut codec = EventStreamCodec::new();
        let mut buffer = BytesMut::from(&b"\"last\""[..]);
        assert_eq!(codec.decode_eof(&mut buffer).unwrap(), Some(json!("last")));
        assert_eq!(codec.decode_eof(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_line_too_long() {
        let mut codec = EventStreamCodec::with_max_line_length(8);
        let mut buffer = BytesMut::from(&b"\"0123456789\"\n"[..]);
        assert!(matches!(codec.decode(&mut buffer), Err(EventCodecError::LineTooLong(_))));

        let mut out = BytesMut::new();
        assert!(codec.encode(json!("0123456789"), &mut out).is_err());
    }

    #[test]
    fn test_invalid_json_line() {
        let mut codec = EventStreamCodec::new();
        let mut buffer = BytesMut::from(&b"{nope\n"[..]);
        assert!(matches!(codec.decode(&mut buffer), Err(EventCodecError::JsonError(_))));
    }
}
