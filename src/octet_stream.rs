//! Parser for a bare `application/octet-stream` body: the entire input is
//! one opaque data stream, with no framing of its own.
//!
//! This is the simplest of the three parsers — it exists so that a
//! [`crate::form::FormParser`] can treat all three content types uniformly
//! through a feed/finalize interface, and so a raw body can be routed
//! straight to a single [`crate::sink::File`] without multipart or
//! urlencoded framing overhead.

/// Receives events from an [`OctetStreamParser`].
pub trait OctetStreamVisitor {
    /// The stream has started. Called at most once, on the first `feed`.
    fn on_start(&mut self) {}
    /// A chunk of raw body data.
    fn on_data(&mut self, data: &[u8]);
    /// The stream ended (on `finalize`).
    fn on_end(&mut self) {}
}

/// Feeds an entire body through unchanged, emitting start/data/end events.
pub struct OctetStreamParser {
    started: bool,
    ended: bool,
    max_size: u64,
    processed: u64,
}

impl OctetStreamParser {
    pub fn new() -> Self {
        Self::with_max_size(u64::MAX)
    }

    pub fn with_max_size(max_size: u64) -> Self {
        OctetStreamParser {
            started: false,
            ended: false,
            max_size,
            processed: 0,
        }
    }

    /// Feeds a chunk of body bytes to `visitor`. Returns the number of bytes
    /// accepted, which is `data.len()` unless doing so would exceed
    /// `max_size`, in which case the excess is silently dropped.
    pub fn feed<V: OctetStreamVisitor>(&mut self, data: &[u8], visitor: &mut V) -> usize {
        if !self.started {
            visitor.on_start();
            self.started = true;
        }

        let remaining = self.max_size.saturating_sub(self.processed);
        let accepted = (data.len() as u64).min(remaining) as usize;
        if accepted < data.len() {
            log::warn!(
                "octet-stream body truncated at {} bytes (max_body_size)",
                self.max_size
            );
        }

        let accepted_data = &data[..accepted];
        if !accepted_data.is_empty() {
            visitor.on_data(accepted_data);
        }
        self.processed += accepted as u64;
        accepted
    }

    /// Signals end of input.
    pub fn finalize<V: OctetStreamVisitor>(&mut self, visitor: &mut V) {
        if !self.started {
            visitor.on_start();
            self.started = true;
        }
        if !self.ended {
            visitor.on_end();
            self.ended = true;
        }
    }
}

impl Default for OctetStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        started: bool,
        data: Vec<u8>,
        ended: bool,
    }

    impl OctetStreamVisitor for Recorder {
        fn on_start(&mut self) {
            self.started = true;
        }
        fn on_data(&mut self, data: &[u8]) {
            self.data.extend_from_slice(data);
        }
        fn on_end(&mut self) {
            self.ended = true;
        }
    }

    #[test]
    fn single_chunk() {
        let mut parser = OctetStreamParser::new();
        let mut rec = Recorder::default();
        let consumed = parser.feed(b"hello world", &mut rec);
        parser.finalize(&mut rec);
        assert_eq!(consumed, 11);
        assert!(rec.started);
        assert!(rec.ended);
        assert_eq!(rec.data, b"hello world");
    }

    #[test]
    fn multiple_chunks_concatenate() {
        let mut parser = OctetStreamParser::new();
        let mut rec = Recorder::default();
        parser.feed(b"abc", &mut rec);
        parser.feed(b"def", &mut rec);
        parser.finalize(&mut rec);
        assert_eq!(rec.data, b"abcdef");
    }

    #[test]
    fn empty_feed_does_not_emit_data() {
        let mut parser = OctetStreamParser::new();
        let mut rec = Recorder::default();
        parser.feed(b"", &mut rec);
        parser.finalize(&mut rec);
        assert!(rec.data.is_empty());
        assert!(rec.started);
        assert!(rec.ended);
    }

    #[test]
    fn truncates_at_max_size() {
        let mut parser = OctetStreamParser::with_max_size(5);
        let mut rec = Recorder::default();
        let accepted = parser.feed(b"0123456789", &mut rec);
        parser.finalize(&mut rec);
        assert_eq!(accepted, 5);
        assert_eq!(rec.data, b"01234");
    }

    #[test]
    fn finalize_without_feed_still_starts_and_ends() {
        let mut parser = OctetStreamParser::new();
        let mut rec = Recorder::default();
        parser.finalize(&mut rec);
        assert!(rec.started);
        assert!(rec.ended);
    }
}
