//! Streaming parser for `multipart/form-data` bodies.
//!
//! Searches for `CRLF "--" <boundary-token>` incrementally across writes
//! without ever buffering a whole part. Grounded on the reference
//! implementation's `MultipartParser`, which carries a small "lookbehind"
//! buffer of tentatively-matched boundary bytes so that a false match can be
//! replayed as literal part data without re-scanning the source buffer.

use std::collections::HashMap;

use crate::error::{MultipartParseErrorKind, ParseError};
use crate::token::{CR, HYPHEN, LF, SPACE, is_tchar};

/// Receives events from a [`MultipartParser`].
pub trait MultipartVisitor {
    /// A new part has started, right after its boundary line.
    fn on_part_begin(&mut self) {}
    /// A new header line has started (fired once per header, before the
    /// first [`MultipartVisitor::on_header_field`] chunk of that header).
    fn on_header_begin(&mut self) {}
    /// A chunk of the current header's field name.
    fn on_header_field(&mut self, data: &[u8]);
    /// A chunk of the current header's value.
    fn on_header_value(&mut self, data: &[u8]);
    /// The current header line ended.
    fn on_header_end(&mut self) {}
    /// The header block for this part ended (blank line reached).
    fn on_headers_finished(&mut self) {}
    /// A chunk of the current part's body.
    fn on_part_data(&mut self, data: &[u8]);
    /// The current part ended (at its closing boundary).
    fn on_part_end(&mut self) {}
    /// The whole body ended (closing `--boundary--` reached).
    fn on_end(&mut self) {}
}

/// Set once the boundary-terminating CR has been matched in [`State::PartData`],
/// while deciding between `LF` (another part follows) and a false match.
const PART_BOUNDARY: u8 = 0b01;
/// Set once the boundary-terminating first `-` has been matched in
/// [`State::PartData`], while deciding between a second `-` (body ends) and a
/// false match.
const LAST_BOUNDARY: u8 = 0b10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    StartBoundary,
    HeaderFieldStart,
    HeaderField,
    HeaderValueStart,
    HeaderValue,
    HeaderValueAlmostDone,
    HeadersAlmostDone,
    /// Documented state: in this implementation entering part-data mode is
    /// folded directly into the `HeadersAlmostDone` → `PartData` transition,
    /// so `self.state` is never actually set to this variant.
    PartDataStart,
    PartData,
    /// Documented state: the "full boundary token matched, deciding CR vs
    /// `-`" step is handled by `flags`/`boundary_index` bookkeeping inside
    /// the `PartData` match arm, per the single-switch design constraint.
    /// `self.state` is never actually set to this variant.
    PartDataEnd,
    /// Documented state, see [`State::PartDataEnd`].
    EndBoundary,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MarkKind {
    HeaderField,
    HeaderValue,
    PartData,
}

#[derive(Debug, Default)]
struct Marks(HashMap<MarkKind, usize>);

impl Marks {
    fn set(&mut self, kind: MarkKind, at: usize) {
        self.0.insert(kind, at);
    }
    fn get(&self, kind: MarkKind) -> Option<usize> {
        self.0.get(&kind).copied()
    }
    fn take(&mut self, kind: MarkKind) -> Option<usize> {
        self.0.remove(&kind)
    }
    fn clear(&mut self, kind: MarkKind) {
        self.0.remove(&kind);
    }
}

/// Byte-level `multipart/form-data` parser.
pub struct MultipartParser {
    state: State,
    flags: u8,
    /// Cursor into `full_boundary` (body boundaries) or `opening_boundary`
    /// (the very first boundary, matched from `State::StartBoundary`).
    boundary_index: usize,
    opening_boundary: Vec<u8>,
    full_boundary: Vec<u8>,
    lookbehind: Vec<u8>,
    marks: Marks,
    max_size: u64,
    processed: u64,
}

impl MultipartParser {
    /// `boundary` is the raw token from the `Content-Type` header's
    /// `boundary=` parameter (already unescaped, no surrounding quotes).
    pub fn new(boundary: &[u8]) -> Self {
        Self::with_max_size(boundary, u64::MAX)
    }

    pub fn with_max_size(boundary: &[u8], max_size: u64) -> Self {
        let mut opening_boundary = Vec::with_capacity(boundary.len() + 2);
        opening_boundary.extend_from_slice(b"--");
        opening_boundary.extend_from_slice(boundary);

        let mut full_boundary = Vec::with_capacity(boundary.len() + 4);
        full_boundary.extend_from_slice(b"\r\n--");
        full_boundary.extend_from_slice(boundary);

        let lookbehind = vec![0u8; full_boundary.len() + 8];

        MultipartParser {
            state: State::Start,
            flags: 0,
            boundary_index: 0,
            opening_boundary,
            full_boundary,
            lookbehind,
            marks: Marks::default(),
            max_size,
            processed: 0,
        }
    }

    /// Whether the closing `--boundary--` has been reached.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::End)
    }

    /// Feeds a chunk of body bytes to `visitor`. Returns the number of bytes
    /// consumed on success (always `data.len()`; an error is returned
    /// instead of a short count).
    pub fn feed<V: MultipartVisitor>(
        &mut self,
        data: &[u8],
        visitor: &mut V,
    ) -> Result<usize, ParseError> {
        let remaining = self.max_size.saturating_sub(self.processed);
        let accepted_len = (data.len() as u64).min(remaining) as usize;
        if accepted_len < data.len() {
            log::warn!(
                "multipart body truncated at {} bytes (max_body_size)",
                self.max_size
            );
        }
        let data = &data[..accepted_len];
        self.processed += accepted_len as u64;

        let mut i = 0;

        while i < data.len() {
            let b = data[i];

            match self.state {
                State::Start => {
                    if b == CR || b == LF {
                        i += 1;
                    } else {
                        self.state = State::StartBoundary;
                        self.boundary_index = 0;
                    }
                }

                State::StartBoundary => {
                    let pattern_len = self.opening_boundary.len();
                    if self.boundary_index < pattern_len {
                        if b == self.opening_boundary[self.boundary_index] {
                            self.boundary_index += 1;
                            i += 1;
                        } else {
                            return Err(ParseError::multipart(
                                MultipartParseErrorKind::UnexpectedBoundaryByte {
                                    expected: self.opening_boundary[self.boundary_index],
                                    found: b,
                                },
                                i,
                            ));
                        }
                    } else if self.boundary_index == pattern_len {
                        if b == CR {
                            self.boundary_index += 1;
                            i += 1;
                        } else if b == HYPHEN {
                            self.flags |= LAST_BOUNDARY;
                            self.boundary_index += 1;
                            i += 1;
                        } else {
                            return Err(ParseError::multipart(
                                MultipartParseErrorKind::MissingOpeningCr,
                                i,
                            ));
                        }
                    } else if self.flags & LAST_BOUNDARY != 0 {
                        if b == HYPHEN {
                            visitor.on_end();
                            self.state = State::End;
                            self.boundary_index = 0;
                            self.flags = 0;
                            i += 1;
                        } else {
                            return Err(ParseError::multipart(
                                MultipartParseErrorKind::UnexpectedBoundaryByte {
                                    expected: HYPHEN,
                                    found: b,
                                },
                                i,
                            ));
                        }
                    } else if b == LF {
                        visitor.on_part_begin();
                        self.state = State::HeaderFieldStart;
                        self.boundary_index = 0;
                        i += 1;
                    } else {
                        return Err(ParseError::multipart(
                            MultipartParseErrorKind::MissingOpeningLf,
                            i,
                        ));
                    }
                }

                State::HeaderFieldStart => {
                    if b == CR {
                        self.state = State::HeadersAlmostDone;
                        i += 1;
                    } else if b == b':' {
                        return Err(ParseError::multipart(
                            MultipartParseErrorKind::EmptyHeaderName,
                            i,
                        ));
                    } else if !is_tchar(b) {
                        return Err(ParseError::multipart(
                            MultipartParseErrorKind::InvalidHeaderFieldByte(b),
                            i,
                        ));
                    } else {
                        visitor.on_header_begin();
                        self.marks.set(MarkKind::HeaderField, i);
                        self.state = State::HeaderField;
                        i += 1;
                    }
                }

                State::HeaderField => {
                    if self.marks.get(MarkKind::HeaderField).is_none() {
                        self.marks.set(MarkKind::HeaderField, i);
                    }
                    if b == b':' {
                        let start = self.marks.take(MarkKind::HeaderField).unwrap_or(i);
                        visitor.on_header_field(&data[start..i]);
                        self.state = State::HeaderValueStart;
                        i += 1;
                    } else if !is_tchar(b) {
                        return Err(ParseError::multipart(
                            MultipartParseErrorKind::InvalidHeaderFieldByte(b),
                            i,
                        ));
                    } else {
                        i += 1;
                    }
                }

                State::HeaderValueStart => {
                    if b == SPACE {
                        i += 1;
                    } else if b == CR {
                        self.state = State::HeaderValueAlmostDone;
                        i += 1;
                    } else {
                        self.marks.set(MarkKind::HeaderValue, i);
                        self.state = State::HeaderValue;
                        i += 1;
                    }
                }

                State::HeaderValue => {
                    if self.marks.get(MarkKind::HeaderValue).is_none() {
                        self.marks.set(MarkKind::HeaderValue, i);
                    }
                    if b == CR {
                        let start = self.marks.take(MarkKind::HeaderValue).unwrap_or(i);
                        visitor.on_header_value(&data[start..i]);
                        self.state = State::HeaderValueAlmostDone;
                        i += 1;
                    } else {
                        i += 1;
                    }
                }

                State::HeaderValueAlmostDone => {
                    if b == LF {
                        visitor.on_header_end();
                        self.state = State::HeaderFieldStart;
                        i += 1;
                    } else {
                        return Err(ParseError::multipart(
                            MultipartParseErrorKind::MissingHeaderValueLf,
                            i,
                        ));
                    }
                }

                State::HeadersAlmostDone => {
                    if b == LF {
                        visitor.on_headers_finished();
                        self.state = State::PartData;
                        self.boundary_index = 0;
                        self.marks.set(MarkKind::PartData, i + 1);
                        i += 1;
                    } else {
                        return Err(ParseError::multipart(
                            MultipartParseErrorKind::MissingHeaderBlockLf,
                            i,
                        ));
                    }
                }

                State::PartData => {
                    i = self.feed_part_data_byte(data, i, visitor);
                }

                State::PartDataStart | State::PartDataEnd | State::EndBoundary => {
                    unreachable!("folded into the PartData arm, see State doc comments")
                }

                State::End => {
                    log::warn!("discarding {} trailing byte(s) after closing boundary", data.len() - i);
                    i = data.len();
                }
            }
        }

        self.flush_open_span_at_buffer_end(data, visitor);

        Ok(data.len())
    }

    /// Handles one byte of `State::PartData`, returning the next value of
    /// `i`. Split out of `feed`'s match purely to keep that match's arms
    /// readable; it is still reached through the single `match self.state`
    /// dispatch in `feed`.
    fn feed_part_data_byte<V: MultipartVisitor>(
        &mut self,
        data: &[u8],
        i: usize,
        visitor: &mut V,
    ) -> usize {
        let b = data[i];

        if self.boundary_index == 0 {
            if b == CR {
                if let Some(start) = self.marks.take(MarkKind::PartData) {
                    if start < i {
                        visitor.on_part_data(&data[start..i]);
                    }
                }
                self.lookbehind[0] = b;
                self.boundary_index = 1;
            } else {
                if self.marks.get(MarkKind::PartData).is_none() {
                    self.marks.set(MarkKind::PartData, i);
                }
            }
            return i + 1;
        }

        if self.boundary_index < self.full_boundary.len() {
            if b == self.full_boundary[self.boundary_index] {
                self.lookbehind[self.boundary_index] = b;
                self.boundary_index += 1;
                return i + 1;
            }
            self.fail_boundary_match(visitor, i);
            return i;
        }

        if self.boundary_index == self.full_boundary.len() {
            if b == CR {
                self.flags |= PART_BOUNDARY;
                self.lookbehind[self.boundary_index] = b;
                self.boundary_index += 1;
                return i + 1;
            }
            if b == HYPHEN {
                self.flags |= LAST_BOUNDARY;
                self.lookbehind[self.boundary_index] = b;
                self.boundary_index += 1;
                return i + 1;
            }
            self.fail_boundary_match(visitor, i);
            return i;
        }

        // boundary_index == full_boundary.len() + 1: resolving CR-vs-LF or
        // first-hyphen-vs-second-hyphen.
        if self.flags & PART_BOUNDARY != 0 {
            if b == LF {
                self.flags &= !PART_BOUNDARY;
                visitor.on_part_end();
                visitor.on_part_begin();
                self.state = State::HeaderFieldStart;
                self.boundary_index = 0;
                return i + 1;
            }
            self.fail_boundary_match(visitor, i);
            return i;
        }
        if self.flags & LAST_BOUNDARY != 0 {
            if b == HYPHEN {
                self.flags &= !LAST_BOUNDARY;
                visitor.on_part_end();
                visitor.on_end();
                self.state = State::End;
                self.boundary_index = 0;
                return i + 1;
            }
            self.fail_boundary_match(visitor, i);
            return i;
        }

        unreachable!("boundary_index beyond full_boundary.len() requires PART_BOUNDARY or LAST_BOUNDARY")
    }

    /// A partially-matched boundary turned out not to continue: the bytes
    /// tentatively held in `lookbehind` were real part data all along.
    fn fail_boundary_match<V: MultipartVisitor>(&mut self, visitor: &mut V, i: usize) {
        if self.boundary_index > 0 {
            visitor.on_part_data(&self.lookbehind[..self.boundary_index]);
        }
        self.boundary_index = 0;
        self.flags = 0;
        self.marks.set(MarkKind::PartData, i);
    }

    /// Flushes whatever span is still open at the very end of this `feed`
    /// call, since the underlying buffer will not outlive the call. The
    /// corresponding mark is cleared so the next `feed` call starts a fresh
    /// span at its own offset 0 rather than reusing a now-invalid index.
    fn flush_open_span_at_buffer_end<V: MultipartVisitor>(&mut self, data: &[u8], visitor: &mut V) {
        match self.state {
            State::HeaderField => {
                if let Some(start) = self.marks.take(MarkKind::HeaderField) {
                    if start < data.len() {
                        visitor.on_header_field(&data[start..]);
                    }
                }
            }
            State::HeaderValue => {
                if let Some(start) = self.marks.take(MarkKind::HeaderValue) {
                    if start < data.len() {
                        visitor.on_header_value(&data[start..]);
                    }
                }
            }
            State::PartData if self.boundary_index == 0 => {
                if let Some(start) = self.marks.take(MarkKind::PartData) {
                    if start < data.len() {
                        visitor.on_part_data(&data[start..]);
                    }
                }
            }
            _ => {}
        }
    }

    /// Like `finalize`, but fails if the closing boundary was never reached.
    /// `finalize` itself never performs this check, matching the reference
    /// parser's behavior of treating a truncated body as merely incomplete
    /// rather than an error.
    pub fn strict_finalize(&mut self) -> Result<(), ParseError> {
        if self.is_finished() {
            Ok(())
        } else {
            Err(ParseError::multipart(
                MultipartParseErrorKind::IncompleteAtFinalize,
                -1,
            ))
        }
    }

    /// Signals end of input. A no-op beyond bookkeeping: whether the parser
    /// actually reached `End` is the caller's concern (see
    /// [`MultipartParser::strict_finalize`]).
    pub fn finalize(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        headers: Vec<(Vec<u8>, Vec<u8>)>,
        current_field: Vec<u8>,
        current_value: Vec<u8>,
        parts: Vec<Vec<(Vec<u8>, Vec<u8>)>>,
        part_data: Vec<u8>,
        parts_data: Vec<Vec<u8>>,
        ended: bool,
    }

    impl MultipartVisitor for Recorder {
        fn on_part_begin(&mut self) {
            self.headers.clear();
            self.part_data.clear();
        }
        fn on_header_field(&mut self, data: &[u8]) {
            self.current_field.extend_from_slice(data);
        }
        fn on_header_value(&mut self, data: &[u8]) {
            self.current_value.extend_from_slice(data);
        }
        fn on_header_end(&mut self) {
            self.headers
                .push((self.current_field.clone(), self.current_value.clone()));
            self.current_field.clear();
            self.current_value.clear();
        }
        fn on_part_data(&mut self, data: &[u8]) {
            self.part_data.extend_from_slice(data);
        }
        fn on_part_end(&mut self) {
            self.parts.push(self.headers.clone());
            self.parts_data.push(self.part_data.clone());
        }
        fn on_end(&mut self) {
            self.ended = true;
        }
    }

    fn minimal_body() -> Vec<u8> {
        b"--boundary\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nhello\r\n--boundary--"
            .to_vec()
    }

    #[test]
    fn minimal_multipart_single_field() {
        let mut parser = MultipartParser::new(b"boundary");
        let mut rec = Recorder::default();
        let body = minimal_body();
        parser.feed(&body, &mut rec).unwrap();
        parser.finalize();

        assert!(rec.ended);
        assert_eq!(rec.parts.len(), 1);
        assert_eq!(rec.parts[0].len(), 1);
        assert_eq!(rec.parts[0][0].0, b"Content-Disposition");
        assert_eq!(rec.parts[0][0].1, b"form-data; name=\"field\"");
        assert_eq!(rec.parts_data[0], b"hello");
        assert!(parser.is_finished());
    }

    #[test]
    fn two_parts() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--B\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\n2\r\n--B--".to_vec();
        let mut parser = MultipartParser::new(b"B");
        let mut rec = Recorder::default();
        parser.feed(&body, &mut rec).unwrap();
        parser.finalize();
        assert_eq!(rec.parts_data, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn chunking_invariance_byte_by_byte() {
        let body = minimal_body();
        let mut parser = MultipartParser::new(b"boundary");
        let mut rec = Recorder::default();
        for byte in &body {
            parser.feed(std::slice::from_ref(byte), &mut rec).unwrap();
        }
        parser.finalize();

        let mut whole_parser = MultipartParser::new(b"boundary");
        let mut whole_rec = Recorder::default();
        whole_parser.feed(&body, &mut whole_rec).unwrap();
        whole_parser.finalize();

        assert_eq!(rec.parts_data, whole_rec.parts_data);
        assert_eq!(rec.parts, whole_rec.parts);
        assert_eq!(rec.ended, whole_rec.ended);
    }

    #[test]
    fn boundary_straddling_chunk_split_is_tolerated() {
        let body = minimal_body();
        for split in 0..body.len() {
            let mut parser = MultipartParser::new(b"boundary");
            let mut rec = Recorder::default();
            parser.feed(&body[..split], &mut rec).unwrap();
            parser.feed(&body[split..], &mut rec).unwrap();
            parser.finalize();
            assert_eq!(rec.parts_data, vec![b"hello".to_vec()], "split at {split}");
            assert!(rec.ended, "split at {split}");
        }
    }

    #[test]
    fn data_containing_boundary_like_text_is_not_mistaken_for_boundary() {
        let body = b"--boundary\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\n--bound\r\n--boundary--".to_vec();
        let mut parser = MultipartParser::new(b"boundary");
        let mut rec = Recorder::default();
        parser.feed(&body, &mut rec).unwrap();
        parser.finalize();
        assert_eq!(rec.parts_data, vec![b"--bound".to_vec()]);
    }

    #[test]
    fn crlf_inside_part_data_not_matching_boundary_is_replayed_as_data() {
        let body = b"--boundary\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nfoo\r\nbar\r\n--boundary--".to_vec();
        let mut parser = MultipartParser::new(b"boundary");
        let mut rec = Recorder::default();
        parser.feed(&body, &mut rec).unwrap();
        parser.finalize();
        assert_eq!(rec.parts_data, vec![b"foo\r\nbar".to_vec()]);
    }

    #[test]
    fn failed_cr_disambiguation_after_full_boundary_match_replays_the_real_byte() {
        // "abc\r\n--B" matches the full boundary token, then a lone CR sets
        // PART_BOUNDARY, then "d" (not LF) fails the match — the CR must be
        // replayed as literal part_data, not a stale/zero byte from
        // lookbehind[boundary_index].
        let body = b"--B\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nabc\r\n--B\rdef\r\n--B--".to_vec();
        let mut parser = MultipartParser::new(b"B");
        let mut rec = Recorder::default();
        parser.feed(&body, &mut rec).unwrap();
        parser.finalize();
        assert_eq!(rec.parts_data, vec![b"abc\r\n--B\rdef".to_vec()]);
    }

    #[test]
    fn empty_body_zero_parts() {
        let body = b"--boundary--".to_vec();
        let mut parser = MultipartParser::new(b"boundary");
        let mut rec = Recorder::default();
        parser.feed(&body, &mut rec).unwrap();
        parser.finalize();
        assert!(rec.ended);
        assert!(rec.parts.is_empty());
    }

    #[test]
    fn leading_crlf_before_first_boundary_is_tolerated() {
        let mut body = b"\r\n\r\n".to_vec();
        body.extend_from_slice(&minimal_body());
        let mut parser = MultipartParser::new(b"boundary");
        let mut rec = Recorder::default();
        parser.feed(&body, &mut rec).unwrap();
        parser.finalize();
        assert_eq!(rec.parts_data, vec![b"hello".to_vec()]);
    }

    #[test]
    fn trailing_bytes_after_close_are_ignored() {
        let mut body = minimal_body();
        body.extend_from_slice(b"\r\nextra garbage");
        let mut parser = MultipartParser::new(b"boundary");
        let mut rec = Recorder::default();
        parser.feed(&body, &mut rec).unwrap();
        parser.finalize();
        assert!(rec.ended);
    }

    #[test]
    fn empty_header_name_is_an_error() {
        let body = b"--boundary\r\n: value\r\n\r\nx\r\n--boundary--".to_vec();
        let mut parser = MultipartParser::new(b"boundary");
        let mut rec = Recorder::default();
        let err = parser.feed(&body, &mut rec).unwrap_err();
        assert_eq!(
            err.kind,
            crate::error::ParseErrorKind::Multipart(MultipartParseErrorKind::EmptyHeaderName)
        );
    }

    #[test]
    fn strict_finalize_rejects_truncated_body() {
        let body = b"--boundary\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nhello".to_vec();
        let mut parser = MultipartParser::new(b"boundary");
        let mut rec = Recorder::default();
        parser.feed(&body, &mut rec).unwrap();
        assert!(parser.strict_finalize().is_err());
    }

    #[test]
    fn strict_finalize_accepts_complete_body() {
        let mut parser = MultipartParser::new(b"boundary");
        let mut rec = Recorder::default();
        parser.feed(&minimal_body(), &mut rec).unwrap();
        assert!(parser.strict_finalize().is_ok());
    }

    #[test]
    fn truncates_at_max_size() {
        let body = minimal_body();
        let mut parser = MultipartParser::with_max_size(b"boundary", 15);
        let mut rec = Recorder::default();
        let accepted = parser.feed(&body, &mut rec).unwrap();
        assert_eq!(accepted, 15);
        assert!(!parser.is_finished());
    }
}
