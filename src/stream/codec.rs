//! Line codec for the generation event stream
//!
//! Each line that starts with the marker (default `data:`, optionally
//! followed by one space) carries one JSON event. Other lines are ignored.
//! Partial lines stay buffered until their terminator arrives, so events
//! split across network chunks decode intact.

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use super::StreamEvent;
use crate::error::MarginaliaError;

pub const DEFAULT_MARKER: &str = "data:";

/// One decoded line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    /// Marked line whose payload did not decode; the stream continues
    Malformed { line: String, error: String },
}

#[derive(Debug, Clone)]
pub struct EventLineCodec {
    marker: String,
    /// Bytes already scanned for a newline
    scanned: usize,
}

impl Default for EventLineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl EventLineCodec {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            scanned: 0,
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    fn parse_line(&self, raw: &[u8]) -> Option<Frame> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);

        let payload = line.strip_prefix(self.marker.as_str())?;
        let payload = payload.strip_prefix(' ').unwrap_or(payload);
        if payload.trim().is_empty() {
            return None;
        }

        trace!(payload = %payload, "Decoded stream line");
        Some(match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => Frame::Event(event),
            Err(e) => Frame::Malformed {
                line: payload.to_string(),
                error: e.to_string(),
            },
        })
    }
}

impl Decoder for EventLineCodec {
    type Item = Frame;
    type Error = MarginaliaError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, MarginaliaError> {
        loop {
            let Some(offset) = buf[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = buf.len();
                return Ok(None);
            };

            let line_end = self.scanned + offset;
            self.scanned = 0;
            let line = buf.split_to(line_end + 1);
            if let Some(frame) = self.parse_line(&line[..line_end]) {
                return Ok(Some(frame));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, MarginaliaError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        // Unterminated last line
        let line = buf.split_to(buf.len());
        self.scanned = 0;
        Ok(self.parse_line(&line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut EventLineCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut codec = EventLineCodec::default();
        let mut buf = BytesMut::from(&b"data: {\"type\":\"del"[..]);
        assert!(decode_all(&mut codec, &mut buf).is_empty());

        buf.extend_from_slice(b"ta\",\"content\":\"Hi\"}\r\ndata: {\"type\":\"start\"}\n");
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(
            frames,
            vec![
                Frame::Event(StreamEvent::Delta {
                    content: "Hi".to_string()
                }),
                Frame::Event(StreamEvent::Start { request_id: None }),
            ]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unmarked_and_blank_lines_ignored() {
        let mut codec = EventLineCodec::default();
        let mut buf = BytesMut::from(&b": keepalive\nevent: x\n\ndata:\n"[..]);
        assert!(decode_all(&mut codec, &mut buf).is_empty());
    }

    #[test]
    fn test_malformed_line_reported() {
        let mut codec = EventLineCodec::default();
        let mut buf = BytesMut::from(&b"data: {not json}\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert!(matches!(&frames[0], Frame::Malformed { line, .. } if line == "{not json}"));
    }

    #[test]
    fn test_marker_without_space() {
        let mut codec = EventLineCodec::default();
        let mut buf = BytesMut::from(&b"data:{\"type\":\"reasoning\",\"content\":\"r\"}\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(
            frames,
            vec![Frame::Event(StreamEvent::Reasoning {
                content: "r".to_string()
            })]
        );
    }

    #[test]
    fn test_decode_eof_flushes_last_line() {
        let mut codec = EventLineCodec::default();
        let mut buf = BytesMut::from(&b"data: {\"type\":\"start\"}"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.decode_eof(&mut buf).unwrap().is_some());
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_custom_marker() {
        let mut codec = EventLineCodec::new("event-data:");
        let mut buf =
            BytesMut::from(&b"data: {\"type\":\"start\"}\nevent-data: {\"type\":\"start\"}\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf).len(), 1);
    }
}
