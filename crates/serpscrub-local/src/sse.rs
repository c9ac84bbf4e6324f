//! Minimal server-sent-events framing for chat-completions streams.
//!
//! Only the subset OpenAI-compatible endpoints actually use: `data:` lines,
//! events separated by a blank line, comment/field lines ignored. Payloads are
//! returned as raw strings; the caller handles `[DONE]` and JSON decoding.

/// Reassembles `data:` payloads from an incrementally-received byte stream.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence, so the
/// buffer is kept as raw bytes and only complete events are decoded.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buf: Vec<u8>,
}

/// Position and width of the next blank-line separator, if complete.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (x, y) => x.or(y),
    }
}

impl SseBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes; returns the `data:` payloads of every event that
    /// is now complete, in order.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some((pos, width)) = find_event_boundary(&self.buf) {
            let event: Vec<u8> = self.buf.drain(..pos + width).collect();
            let Ok(text) = std::str::from_utf8(&event[..pos]) else {
                // Non-UTF-8 garbage between boundaries: skip the event.
                continue;
            };
            for line in text.lines() {
                let line = line.trim_end_matches('\r');
                if let Some(data) = line.strip_prefix("data:") {
                    out.push(data.trim_start().to_string());
                }
                // `:` comments (keep-alives) and other fields are ignored.
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn whole_event_in_one_push() {
        let mut b = SseBuffer::new();
        let got = b.push(b"data: {\"x\":1}\n\n");
        assert_eq!(got, vec!["{\"x\":1}".to_string()]);
    }

    #[test]
    fn event_split_across_pushes() {
        let mut b = SseBuffer::new();
        assert!(b.push(b"data: {\"x\"").is_empty());
        assert!(b.push(b":1}").is_empty());
        let got = b.push(b"\n\n");
        assert_eq!(got, vec!["{\"x\":1}".to_string()]);
    }

    #[test]
    fn split_inside_utf8_sequence() {
        let payload = "data: {\"s\":\"héllo\"}\n\n".as_bytes();
        // Split in the middle of the two-byte 'é'.
        let cut = payload.iter().position(|&b| b == 0xc3).unwrap() + 1;
        let mut b = SseBuffer::new();
        assert!(b.push(&payload[..cut]).is_empty());
        let got = b.push(&payload[cut..]);
        assert_eq!(got, vec!["{\"s\":\"héllo\"}".to_string()]);
    }

    #[test]
    fn multiple_events_and_done_marker() {
        let mut b = SseBuffer::new();
        let got = b.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n");
        assert_eq!(got, vec!["{\"a\":1}", "{\"b\":2}", "[DONE]"]);
    }

    #[test]
    fn keep_alive_comments_are_ignored() {
        let mut b = SseBuffer::new();
        let got = b.push(b": keep-alive\n\ndata: {\"a\":1}\n\n");
        assert_eq!(got, vec!["{\"a\":1}"]);
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut b = SseBuffer::new();
        let got = b.push(b"data: {\"a\":1}\r\n\ndata: {\"b\":2}\r\n\n");
        assert_eq!(got, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn crlf_event_separators_are_tolerated() {
        let mut b = SseBuffer::new();
        let got = b.push(b"data: {\"a\":1}\r\n\r\ndata: {\"b\":2}\r\n\r\n");
        assert_eq!(got, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    proptest! {
        #[test]
        fn arbitrary_chunking_yields_the_same_payloads(
            cuts in proptest::collection::vec(1usize..52, 0..6),
        ) {
            let body: &[u8] = b"data: {\"a\":1}\n\n: ping\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n";
            let mut cuts = cuts;
            cuts.sort_unstable();
            cuts.dedup();

            let mut b = SseBuffer::new();
            let mut got: Vec<String> = Vec::new();
            let mut start = 0;
            for cut in cuts {
                got.extend(b.push(&body[start..cut]));
                start = cut;
            }
            got.extend(b.push(&body[start..]));
            prop_assert_eq!(got, vec!["{\"a\":1}", "{\"b\":2}", "[DONE]"]);
        }
    }
}
