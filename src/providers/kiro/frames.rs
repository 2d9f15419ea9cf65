use antihub_schema::kiro::AssistantEvent;
use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

/// Frame layout:
///
/// ```text
/// ┌──────────┬────────────┬─────────────┬──────────┬─────┐
/// │ total_len│ header_len │ header_bytes│ payload  │ crc │
/// │  u32 BE  │   u32 BE   │             │   JSON   │ u32 │
/// └──────────┴────────────┴─────────────┴──────────┴─────┘
/// ```
///
/// Payload spans `[12 + header_len, total_len − 4)`; the trailing CRC is
/// carried but not validated.
const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_FRAME_LEN: usize = 16;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Incremental decoder for the binary assistant event stream.
///
/// Keeps a rolling byte buffer: complete frames are drained as they arrive,
/// partial bytes wait for the next chunk. A length field outside the valid
/// range means the stream is out of sync; the decoder shifts forward one
/// byte at a time until a plausible frame header reappears.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk; returns the decoded payloads of every
    /// complete frame. Malformed JSON payloads are skipped, not fatal.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<AssistantEvent> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            if self.buf.len() < PRELUDE_LEN {
                break;
            }

            let total_len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                as usize;
            let header_len =
                u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;

            if !frame_shape_plausible(total_len, header_len) {
                // Out of sync; resync one byte at a time.
                self.buf.advance(1);
                continue;
            }

            if self.buf.len() < total_len {
                break;
            }

            let payload_start = PRELUDE_LEN + header_len;
            let payload_end = total_len - CRC_LEN;
            let frame = self.buf.split_to(total_len);
            let payload = &frame[payload_start..payload_end];

            match serde_json::from_slice::<AssistantEvent>(payload) {
                Ok(event) => out.push(event),
                Err(e) => {
                    warn!(
                        payload_len = payload.len(),
                        "skipping frame with undecodable payload: {e}"
                    );
                    debug!(payload = %String::from_utf8_lossy(payload), "bad frame payload");
                }
            }
        }
        out
    }

    /// Bytes still waiting for completion (diagnostics / tests).
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn frame_shape_plausible(total_len: usize, header_len: usize) -> bool {
    (MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len)
        && PRELUDE_LEN + header_len + CRC_LEN <= total_len
}

#[cfg(test)]
pub(crate) fn encode_frame(header: &[u8], payload: &[u8]) -> Vec<u8> {
    let total_len = PRELUDE_LEN + header.len() + payload.len() + CRC_LEN;
    let mut frame = Vec::with_capacity(total_len);
    frame.extend_from_slice(&(total_len as u32).to_be_bytes());
    frame.extend_from_slice(&(header.len() as u32).to_be_bytes());
    frame.extend_from_slice(&[0u8; 4]); // prelude crc, not validated
    frame.extend_from_slice(header);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&[0u8; CRC_LEN]); // message crc, not validated
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_event(text: &str) -> (Vec<u8>, AssistantEvent) {
        let payload = format!(r#"{{"content":{}}}"#, serde_json::json!(text));
        let event = AssistantEvent {
            content: Some(text.to_string()),
            ..AssistantEvent::default()
        };
        (encode_frame(b"", payload.as_bytes()), event)
    }

    #[test]
    fn single_shot_decode() {
        let (frame, expected) = text_event("hello");
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(&frame), vec![expected]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn every_byte_split_matches_single_shot() {
        let (f1, e1) = text_event("hel");
        let (f2, e2) = text_event("lo");
        let mut stream = f1;
        stream.extend_from_slice(&f2);
        let expected = vec![e1, e2];

        for split in 1..stream.len() {
            let mut decoder = FrameDecoder::new();
            let mut got = decoder.push(&stream[..split]);
            got.extend(decoder.push(&stream[split..]));
            assert_eq!(got, expected, "split at {split} diverged");
        }
    }

    #[test]
    fn resyncs_after_malformed_prefix_between_frames() {
        let (f1, e1) = text_event("first");
        let (f2, e2) = text_event("second");

        let mut stream = f1;
        // Garbage that reads as an absurd total_len.
        stream.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        stream.extend_from_slice(&f2);

        let mut decoder = FrameDecoder::new();
        let got = decoder.push(&stream);
        assert_eq!(got, vec![e1, e2]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn undersized_length_is_skipped_not_fatal() {
        let (frame, expected) = text_event("ok");
        let mut stream = vec![0, 0, 0, 4, 0, 0, 0, 0]; // total_len=4 < 16
        stream.extend_from_slice(&frame);

        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(&stream), vec![expected]);
    }

    #[test]
    fn header_bytes_are_excluded_from_payload() {
        let payload = br#"{"usage":0.5}"#;
        let frame = encode_frame(b"\x00headerjunk", payload);
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].usage, Some(0.5));
    }

    #[test]
    fn tool_call_fields_decode() {
        let payload = br#"{"name":"fs_read","toolUseId":"t1","input":"{\"pa"}"#;
        let frame = encode_frame(b"", payload);
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(&frame);
        assert_eq!(events[0].name.as_deref(), Some("fs_read"));
        assert_eq!(events[0].tool_use_id.as_deref(), Some("t1"));
        assert_eq!(events[0].input.as_deref(), Some("{\"pa"));
    }
}
