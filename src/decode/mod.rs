//! Streaming `Content-Transfer-Encoding` decoders.
//!
//! Each decoder wraps a [`crate::sink::Sink`] and exposes the same
//! `write`/`finalize` shape, so the coordinator in [`crate::form`] can chain
//! identity passthrough, [`base64::Base64Decoder`] or
//! [`quoted_printable::QuotedPrintableDecoder`] onto a `Field` or `File`
//! without the sink ever knowing which one it is.

pub mod base64;
pub mod quoted_printable;
