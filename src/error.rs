//! Error taxonomy for the parsing engine.
//!
//! Mirrors the exception hierarchy of the reference implementation as a
//! closed tree of Rust enums rather than an inheritance chain: a
//! [`FormParserError`] is the top-level failure type everything else folds
//! into.

use std::fmt;
use std::io;

/// Offset into the chunk currently being processed, or `-1` if unknown.
///
/// Always relative to the `write` call in which the error was detected,
/// never to the overall stream — a parser does not track how many bytes
/// preceded the current chunk.
pub type Offset = isize;

/// The specific condition that made the multipart parser reject its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartParseErrorKind {
    /// The opening boundary was not followed by CR where expected.
    MissingOpeningCr,
    /// The opening boundary was not followed by LF where expected.
    MissingOpeningLf,
    /// A byte inside the opening boundary did not match the expected
    /// boundary character.
    UnexpectedBoundaryByte { expected: u8, found: u8 },
    /// A header field name contained a byte outside the HTTP token set.
    InvalidHeaderFieldByte(u8),
    /// A header line had a zero-length field name (bare `:`).
    EmptyHeaderName,
    /// CR in a header value was not followed by LF.
    MissingHeaderValueLf,
    /// CR at the end of the header block was not followed by LF.
    MissingHeaderBlockLf,
    /// `strict_finalize` was called but the parser never reached `End`.
    IncompleteAtFinalize,
}

impl fmt::Display for MultipartParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingOpeningCr => write!(f, "did not find CR at end of opening boundary"),
            Self::MissingOpeningLf => write!(f, "did not find LF at end of opening boundary"),
            Self::UnexpectedBoundaryByte { expected, found } => write!(
                f,
                "expected boundary byte 0x{expected:02X}, found 0x{found:02X}"
            ),
            Self::InvalidHeaderFieldByte(b) => {
                write!(f, "invalid byte 0x{b:02X} in header field name")
            }
            Self::EmptyHeaderName => write!(f, "found zero-length header name"),
            Self::MissingHeaderValueLf => write!(f, "did not find LF after header value CR"),
            Self::MissingHeaderBlockLf => write!(f, "did not find LF after header block CR"),
            Self::IncompleteAtFinalize => write!(f, "finalize called before reaching End state"),
        }
    }
}

/// The specific condition that made the querystring parser reject its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerystringParseErrorKind {
    /// Two consecutive `&`/`;` separators with nothing between them, while
    /// `strict_parsing` is enabled.
    DuplicateSeparator,
    /// A field chunk had no `=` before the next separator, while
    /// `strict_parsing` is enabled.
    MissingEquals,
}

impl fmt::Display for QuerystringParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateSeparator => write!(f, "duplicate ampersand/semicolon separator"),
            Self::MissingEquals => write!(f, "field chunk has no '=' and strict_parsing is set"),
        }
    }
}

/// The parser family a [`ParseError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Multipart(MultipartParseErrorKind),
    Querystring(QuerystringParseErrorKind),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multipart(k) => write!(f, "{k}"),
            Self::Querystring(k) => write!(f, "{k}"),
        }
    }
}

/// A parse failure carrying the byte offset (within the current chunk) at
/// which it was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: Offset,
}

impl ParseError {
    pub(crate) fn multipart(kind: MultipartParseErrorKind, offset: usize) -> Self {
        ParseError {
            kind: ParseErrorKind::Multipart(kind),
            offset: offset as Offset,
        }
    }

    pub(crate) fn querystring(kind: QuerystringParseErrorKind, offset: usize) -> Self {
        ParseError {
            kind: ParseErrorKind::Querystring(kind),
            offset: offset as Offset,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (offset {})", self.kind, self.offset)
    }
}

impl std::error::Error for ParseError {}

/// Why a streaming decoder ([`crate::decode::base64::Base64Decoder`] or
/// [`crate::decode::quoted_printable::QuotedPrintableDecoder`]) rejected its
/// input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeErrorReason {
    /// A base64 quartet contained a byte outside the alphabet (or padding).
    InvalidBase64,
    /// A quoted-printable `=XX` escape's two hex digits did not parse, or a
    /// trailing `=` was never completed.
    InvalidQuotedPrintable,
    /// `finalize` was called with unconsumed bytes left in the cache.
    ResidueAtFinalize { residue_len: usize },
}

impl fmt::Display for DecodeErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBase64 => write!(f, "invalid base64-encoded data"),
            Self::InvalidQuotedPrintable => write!(f, "invalid quoted-printable escape"),
            Self::ResidueAtFinalize { residue_len } => write!(
                f,
                "{residue_len} byte(s) remaining in decoder cache at finalize"
            ),
        }
    }
}

/// Raised by the streaming content-transfer-encoding decoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub reason: DecodeErrorReason,
}

impl DecodeError {
    pub(crate) fn new(reason: DecodeErrorReason) -> Self {
        DecodeError { reason }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for DecodeError {}

/// Failed to open, create, or write a spooled [`crate::sink::File`] on disk.
#[derive(Debug)]
pub struct FileError {
    pub message: String,
    pub source: Option<io::Error>,
}

impl FileError {
    pub(crate) fn new(message: impl Into<String>, source: io::Error) -> Self {
        FileError {
            message: message.into(),
            source: Some(source),
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// The top-level error type for the whole crate.
#[derive(Debug)]
pub enum FormParserError {
    /// `Content-Type` did not match any of the three supported encodings.
    UnknownContentType(Vec<u8>),
    /// `multipart/form-data` was requested with no `boundary` parameter.
    NoBoundary,
    /// A part declared a `Content-Transfer-Encoding` this crate cannot
    /// handle, and `upload_error_on_bad_cte` is set.
    BadContentTransferEncoding(Vec<u8>),
    /// A byte-level parse failure in one of the state machines.
    Parse(ParseError),
    /// A streaming content-transfer-encoding decode failure.
    Decode(DecodeError),
    /// Failed to spool a [`crate::sink::File`] to disk.
    File(FileError),
}

impl fmt::Display for FormParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownContentType(ct) => {
                write!(f, "unknown Content-Type: {:?}", String::from_utf8_lossy(ct))
            }
            Self::NoBoundary => write!(f, "no boundary given"),
            Self::BadContentTransferEncoding(cte) => write!(
                f,
                "unknown Content-Transfer-Encoding: {:?}",
                String::from_utf8_lossy(cte)
            ),
            Self::Parse(e) => write!(f, "{e}"),
            Self::Decode(e) => write!(f, "{e}"),
            Self::File(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FormParserError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::File(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for FormParserError {
    fn from(e: ParseError) -> Self {
        FormParserError::Parse(e)
    }
}

impl From<DecodeError> for FormParserError {
    fn from(e: DecodeError) -> Self {
        FormParserError::Decode(e)
    }
}

impl From<FileError> for FormParserError {
    fn from(e: FileError) -> Self {
        FormParserError::File(e)
    }
}
