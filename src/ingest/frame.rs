//! Frame Extractor
//!
//! Reassembles complete JSON objects from a producer's byte stream. Chunk
//! boundaries are arbitrary: an object may arrive split across many reads,
//! and one read may carry several objects.
//!
//! Framing is by brace depth. A frame starts at a `{` seen at depth 0 and ends
//! at the `}` that brings the depth back to 0, so nested objects inside a
//! field stay in one frame. While inside an object, string literals are
//! tracked (including backslash escapes) so braces in string values do not
//! count.
//!
//! Recovery is best effort:
//! - a `}` at depth 0 drops everything buffered up to and including it
//! - a frame that grows past the configured limit is discarded through its
//!   balancing `}`; nothing nested inside it is emitted
//! - a closing quote followed by anything but `:`, `,`, `}` or `]` means the
//!   quotes are unbalanced, and the frame is rescanned counting braces only

use std::borrow::Cow;

/// Default limit on bytes buffered while waiting for a frame to complete
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024; // 1 MiB

/// A structurally balanced JSON object cut from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Raw frame bytes, starting with `{` and ending with `}`
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame text for logging (invalid UTF-8 is replaced)
    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Per-connection stream buffer plus scan state
///
/// The buffer always holds exactly the bytes received so far minus the bytes
/// already consumed (emitted as frames or dropped during recovery). Scan
/// state persists between chunks; bytes are only rescanned after an
/// unbalanced quote.
#[derive(Debug)]
pub struct FrameExtractor {
    buffer: Vec<u8>,
    /// Next buffer index to scan
    scan_pos: usize,
    /// Current brace nesting depth
    depth: usize,
    /// Index of the `{` that opened the current frame
    frame_start: Option<usize>,
    in_string: bool,
    escaped: bool,
    /// A string just closed; the next non-whitespace byte must be `:,}]`
    after_string: bool,
    /// Quotes are ignored until the current frame closes
    quote_blind: bool,
    /// The current frame overflowed the limit and is dropped as it arrives
    discarding: bool,
    max_buffered: usize,
    dropped_bytes: u64,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExtractor {
    /// Create an extractor with the default buffer limit
    pub fn new() -> Self {
        Self::with_max_buffered(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create an extractor that discards its buffer past `max_buffered` bytes
    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scan_pos: 0,
            depth: 0,
            frame_start: None,
            in_string: false,
            escaped: false,
            after_string: false,
            quote_blind: false,
            discarding: false,
            max_buffered: max_buffered.max(1),
            dropped_bytes: 0,
        }
    }

    /// Append a chunk and lazily extract the frames it completes
    ///
    /// Frames not pulled from the returned iterator stay buffered and are
    /// yielded by the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { extractor: self }
    }

    /// Bytes received but not yet consumed
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total bytes dropped by malformed-input recovery
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Discard all buffered bytes and scan state
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reset_scan();
    }

    fn reset_scan(&mut self) {
        self.scan_pos = 0;
        self.depth = 0;
        self.frame_start = None;
        self.in_string = false;
        self.escaped = false;
        self.after_string = false;
        self.quote_blind = false;
        self.discarding = false;
    }

    /// Scan forward until a frame completes or the buffer is exhausted
    fn next_frame(&mut self) -> Option<Frame> {
        while self.scan_pos < self.buffer.len() {
            let pos = self.scan_pos;
            let byte = self.buffer[pos];
            self.scan_pos += 1;

            if self.after_string {
                match byte {
                    b' ' | b'\t' | b'\n' | b'\r' => continue,
                    b':' | b',' | b'}' | b']' => self.after_string = false,
                    _ => {
                        self.unbalanced_quote();
                        continue;
                    }
                }
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                    self.after_string = true;
                }
                continue;
            }

            match byte {
                b'"' if self.depth > 0 && !self.quote_blind => self.in_string = true,
                b'{' => {
                    if self.depth == 0 {
                        self.frame_start = Some(pos);
                    }
                    self.depth += 1;
                }
                b'}' if self.depth == 0 => {
                    tracing::warn!(
                        dropped = pos + 1,
                        "Orphan closing brace in producer stream, dropping buffered bytes"
                    );
                    self.consume_through(pos);
                    self.dropped_bytes += (pos + 1) as u64;
                }
                b'}' => {
                    self.depth -= 1;
                    if self.depth > 0 {
                        continue;
                    }
                    if self.discarding {
                        tracing::debug!("Oversized frame closed, resuming extraction");
                        self.consume_through(pos);
                        self.dropped_bytes += (pos + 1) as u64;
                        continue;
                    }
                    if let Some(start) = self.frame_start.take() {
                        let frame = Frame {
                            bytes: self.buffer[start..=pos].to_vec(),
                        };
                        self.dropped_bytes += start as u64;
                        self.consume_through(pos);
                        return Some(frame);
                    }
                }
                _ => {}
            }
        }

        if self.discarding {
            self.dropped_bytes += self.buffer.len() as u64;
            self.buffer.clear();
            self.scan_pos = 0;
        } else {
            self.enforce_limit();
        }
        None
    }

    /// A closing quote was followed by something other than `:`, `,`, `}` or
    /// `]`, so the quote parity of the current object is wrong.
    ///
    /// A frame still being buffered is rescanned from its `{` counting braces
    /// only; it then ends at its first balancing `}` and fails validation
    /// downstream. An oversized frame being discarded is abandoned and the
    /// unscanned remainder is rescanned from depth 0.
    fn unbalanced_quote(&mut self) {
        self.after_string = false;
        if self.discarding {
            tracing::warn!("Unbalanced quote in oversized frame, rescanning remainder");
            self.reset_scan();
            return;
        }

        tracing::warn!("Unbalanced quote in producer frame, counting braces only");
        if let Some(start) = self.frame_start {
            self.scan_pos = start + 1;
            self.depth = 1;
        }
        self.in_string = false;
        self.escaped = false;
        self.quote_blind = true;
    }

    /// Remove `buffer[..=pos]`; only called at depth 0
    fn consume_through(&mut self, pos: usize) {
        self.buffer.drain(..=pos);
        self.reset_scan();
    }

    /// Past the limit the buffered bytes are dropped but the nesting state is
    /// kept, so the rest of the oversized frame is discarded as it arrives
    /// instead of being scanned as new top-level input.
    fn enforce_limit(&mut self) {
        if self.buffer.len() <= self.max_buffered {
            return;
        }

        tracing::warn!(
            buffered = self.buffer.len(),
            limit = self.max_buffered,
            "Producer buffer exceeded limit without a complete frame, discarding"
        );
        self.dropped_bytes += self.buffer.len() as u64;
        self.buffer.clear();
        self.scan_pos = 0;
        self.frame_start = None;
        if self.depth > 0 {
            self.discarding = true;
        } else {
            self.reset_scan();
        }
    }
}

/// Lazy sequence of frames completed by one [`FrameExtractor::push`]
#[derive(Debug)]
pub struct Frames<'a> {
    extractor: &'a mut FrameExtractor,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.extractor.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(extractor: &mut FrameExtractor, chunk: &[u8]) -> Vec<String> {
        extractor
            .push(chunk)
            .map(|f| f.as_text().into_owned())
            .collect()
    }

    #[test]
    fn test_empty_input() {
        let mut extractor = FrameExtractor::new();
        assert!(collect(&mut extractor, b"").is_empty());
        assert!(extractor.is_empty());
    }

    #[test]
    fn test_single_frame() {
        let mut extractor = FrameExtractor::new();
        let frames = collect(&mut extractor, br#"{"text":"hi"}"#);
        assert_eq!(frames, vec![r#"{"text":"hi"}"#]);
        assert!(extractor.is_empty());
    }

    #[test]
    fn test_split_across_chunks() {
        let mut extractor = FrameExtractor::new();
        assert!(collect(&mut extractor, br#"{"text":"hi""#).is_empty());
        assert_eq!(extractor.buffered(), br#"{"text":"hi""#);

        let frames = collect(&mut extractor, br#","audio":"a.mp3"}{"text":"bye"}"#);
        assert_eq!(
            frames,
            vec![r#"{"text":"hi","audio":"a.mp3"}"#, r#"{"text":"bye"}"#]
        );
        assert!(extractor.is_empty());
    }

    #[test]
    fn test_every_split_point_yields_one_frame() {
        let object = br#"{"text":"a {b} c","meta":{"nested":{"deep":"}"}},"audio":"x\"}.mp3"}"#;

        for first in 0..=object.len() {
            for second in first..=object.len() {
                let mut extractor = FrameExtractor::new();
                let mut frames = Vec::new();
                for chunk in [
                    &object[..first],
                    &object[first..second],
                    &object[second..],
                ] {
                    frames.extend(extractor.push(chunk));
                }

                assert_eq!(frames.len(), 1, "split at {first}/{second}");
                assert_eq!(frames[0].as_bytes(), &object[..]);
                assert!(extractor.is_empty());
            }
        }
    }

    #[test]
    fn test_multiple_frames_with_noise() {
        let mut extractor = FrameExtractor::new();
        let input = b"  {\"text\":\"one\"}\r\n garbage {\"text\":\"two\"}\n\n{\"text\":\"three\"} ";
        let frames = collect(&mut extractor, input);
        assert_eq!(
            frames,
            vec![
                r#"{"text":"one"}"#,
                r#"{"text":"two"}"#,
                r#"{"text":"three"}"#,
            ]
        );
        // Trailing noise stays until a frame or recovery consumes it
        assert_eq!(extractor.buffered(), b" ");
    }

    #[test]
    fn test_nested_object_is_one_frame() {
        let mut extractor = FrameExtractor::new();
        let input = br#"{"text":"hi","meta":{"speaker":{"name":"bob"}}}"#;
        let frames: Vec<Frame> = extractor.push(input).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &input[..]);
    }

    #[test]
    fn test_braces_inside_strings() {
        let mut extractor = FrameExtractor::new();
        let frames = collect(&mut extractor, br#"{"text":"} oops {"}{"text":"say \"}\""}"#);
        assert_eq!(
            frames,
            vec![r#"{"text":"} oops {"}"#, r#"{"text":"say \"}\""}"#]
        );
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let mut extractor = FrameExtractor::new();
        assert!(collect(&mut extractor, br#"{"text":"a\"#).is_empty());
        assert!(collect(&mut extractor, br#""}"#).is_empty());
        let frames = collect(&mut extractor, br#""}"#);
        assert_eq!(frames, vec![r#"{"text":"a\"}"}"#]);
    }

    #[test]
    fn test_orphan_closer_is_dropped() {
        let mut extractor = FrameExtractor::new();
        let frames = collect(&mut extractor, br#"xx}{"text":"ok"}"#);
        assert_eq!(frames, vec![r#"{"text":"ok"}"#]);
        assert!(extractor.is_empty());
        assert_eq!(extractor.dropped_bytes(), 3);
    }

    #[test]
    fn test_orphan_closer_between_chunks() {
        let mut extractor = FrameExtractor::new();
        assert_eq!(collect(&mut extractor, br#"{"text":"a"}}"#).len(), 1);
        assert!(extractor.is_empty());

        let frames = collect(&mut extractor, br#"{"text":"b"}"#);
        assert_eq!(frames, vec![r#"{"text":"b"}"#]);
    }

    #[test]
    fn test_quotes_outside_objects_are_noise() {
        let mut extractor = FrameExtractor::new();
        let frames = collect(&mut extractor, br#"" {"text":"ok"}"#);
        assert_eq!(frames, vec![r#"{"text":"ok"}"#]);
    }

    #[test]
    fn test_unterminated_frame_is_retained() {
        let mut extractor = FrameExtractor::new();
        assert!(collect(&mut extractor, br#"{"text":{"#).is_empty());
        assert!(collect(&mut extractor, br#""a":1}"#).is_empty());
        assert_eq!(extractor.buffered(), br#"{"text":{"a":1}"#);

        let frames = collect(&mut extractor, b"}");
        assert_eq!(frames, vec![r#"{"text":{"a":1}}"#]);
    }

    #[test]
    fn test_unconsumed_frames_survive_dropped_iterator() {
        let mut extractor = FrameExtractor::new();
        let first = extractor.push(br#"{"text":"1"}{"text":"2"}"#).next();
        assert_eq!(first.unwrap().as_bytes(), br#"{"text":"1"}"#);

        let rest = collect(&mut extractor, b"");
        assert_eq!(rest, vec![r#"{"text":"2"}"#]);
    }

    #[test]
    fn test_buffer_limit_discards_runaway_frame() {
        let mut extractor = FrameExtractor::with_max_buffered(16);
        assert!(collect(&mut extractor, br#"{"text":"this never ends"#).is_empty());
        assert!(extractor.is_empty());
        assert_eq!(extractor.dropped_bytes(), 24);

        let frames = collect(&mut extractor, br#"{"text":"ok"}"#);
        assert_eq!(frames, vec![r#"{"text":"ok"}"#]);
    }

    #[test]
    fn test_complete_frames_emitted_before_limit_applies() {
        let mut extractor = FrameExtractor::with_max_buffered(8);
        let frames = collect(&mut extractor, br#"{"text":"longer than eight"}"#);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_oversized_frame_hides_nested_objects() {
        let mut extractor = FrameExtractor::with_max_buffered(32);
        let head = format!(r#"{{"text":"{}"#, "a".repeat(36));
        assert!(collect(&mut extractor, head.as_bytes()).is_empty());
        assert!(extractor.is_empty());

        let frames = collect(&mut extractor, br#"","meta":{"text":"injected"}}"#);
        assert!(frames.is_empty(), "nested object leaked: {frames:?}");
        assert!(extractor.is_empty());

        let frames = collect(&mut extractor, br#"{"text":"next"}"#);
        assert_eq!(frames, vec![r#"{"text":"next"}"#]);
    }

    #[test]
    fn test_oversized_frame_discarded_across_chunks() {
        let mut extractor = FrameExtractor::with_max_buffered(16);
        let mut frames = Vec::new();
        for chunk in [
            &br#"{"text":"aaaaaaaaaaaaaaaaaaaa"#[..],
            br#"","meta":{"te"#,
            br#"xt":"inj}ected"}"#,
            br#"}{"text":"after"}"#,
        ] {
            frames.extend(collect(&mut extractor, chunk));
            assert!(extractor.buffered().len() <= 32);
        }

        assert_eq!(frames, vec![r#"{"text":"after"}"#]);
        assert!(extractor.is_empty());
    }

    #[test]
    fn test_stray_quote_does_not_swallow_later_frames() {
        let mut extractor = FrameExtractor::new();
        assert!(collect(&mut extractor, br#"{"text":"oops}"#).is_empty());

        let frames = collect(&mut extractor, br#"{"text":"ok"}{"text":"ok2"}{"text":"ok3"}"#);
        assert_eq!(
            frames,
            vec![
                r#"{"text":"oops}"#,
                r#"{"text":"ok"}"#,
                r#"{"text":"ok2"}"#,
                r#"{"text":"ok3"}"#,
            ]
        );
        assert!(crate::protocol::parse_frame(frames[0].as_bytes()).is_err());
        assert!(extractor.is_empty());
    }

    #[test]
    fn test_stray_quote_inside_key() {
        let mut extractor = FrameExtractor::new();
        let frames = collect(&mut extractor, br#"{"te"xt":"v"} {"text":"ok"}"#);
        assert_eq!(frames, vec![r#"{"te"xt":"v"}"#, r#"{"text":"ok"}"#]);
    }

    #[test]
    fn test_unterminated_string_in_oversized_frame_recovers() {
        let mut extractor = FrameExtractor::with_max_buffered(16);
        assert!(collect(&mut extractor, br#"{"text":"no closing quote here"#).is_empty());

        // The oversized frame's string swallows nothing past the next good frame
        let frames = collect(&mut extractor, br#"{"text":"ok"}{"text":"ok2"}"#);
        assert_eq!(frames, vec![r#"{"text":"ok"}"#, r#"{"text":"ok2"}"#]);
    }

    #[test]
    fn test_whitespace_after_strings_is_valid() {
        let mut extractor = FrameExtractor::new();
        let input = b"{ \"text\" : \"hi\" ,\n\t\"audio\"\r\n: \"a.mp3\" }";
        let frames = collect(&mut extractor, input);
        assert_eq!(frames.len(), 1);
        assert!(crate::protocol::parse_frame(frames[0].as_bytes()).is_ok());
    }
}
