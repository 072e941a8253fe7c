//! Dispatches on `Content-Type`, wires the selected byte-level parser's
//! events to [`Field`]/[`File`] sinks (through a transfer-encoding decoder
//! when one applies), and hands finished sinks to the caller's [`Visitor`].
//!
//! This is the one module that ties `octet_stream.rs`/`querystring.rs`/
//! `multipart.rs`, `header.rs`, `decode/`, and `sink.rs` together; none of
//! those modules know about each other.

use std::io::Read;

use crate::config::FormParserConfig;
use crate::decode::base64::Base64Decoder;
use crate::decode::quoted_printable::QuotedPrintableDecoder;
use crate::error::{FileError, FormParserError};
use crate::header::parse_options_header;
use crate::multipart::{MultipartParser, MultipartVisitor};
use crate::octet_stream::{OctetStreamParser, OctetStreamVisitor};
use crate::querystring::{QuerystringConfig, QuerystringParser, QuerystringVisitor};
use crate::sink::{Field, File, Sink};
use crate::token::to_ascii_lower;

/// High-level callbacks a [`FormParser`] delivers finished fields/files to.
pub trait Visitor {
    /// A form field finished (its value may be [`crate::sink::FieldValue::Null`]).
    fn on_field(&mut self, field: Field) {
        let _ = field;
    }
    /// A file upload finished.
    fn on_file(&mut self, file: File) {
        let _ = file;
    }
    /// The whole body finished.
    fn on_end(&mut self) {}
}

/// Either sink kind a multipart part (or an octet-stream body) can end up
/// writing into, so a single `Writer` can wrap either one uniformly.
enum ActiveSink {
    Field(Field),
    File(File),
}

impl Sink for ActiveSink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), FormParserError> {
        match self {
            ActiveSink::Field(f) => f.write_bytes(data),
            ActiveSink::File(f) => f.write_bytes(data),
        }
    }

    fn finalize_sink(&mut self) -> Result<(), FormParserError> {
        match self {
            ActiveSink::Field(f) => f.finalize_sink(),
            ActiveSink::File(f) => f.finalize_sink(),
        }
    }
}

/// A part's active writer, chosen by its `Content-Transfer-Encoding`.
enum Writer {
    Pass(ActiveSink),
    Base64(Base64Decoder<ActiveSink>),
    QuotedPrintable(QuotedPrintableDecoder<ActiveSink>),
}

impl Writer {
    fn write(&mut self, data: &[u8]) -> Result<(), FormParserError> {
        match self {
            Writer::Pass(s) => s.write_bytes(data),
            Writer::Base64(d) => d.write(data).map(|_| ()),
            Writer::QuotedPrintable(d) => d.write(data).map(|_| ()),
        }
    }

    fn finish(mut self) -> Result<ActiveSink, FormParserError> {
        match &mut self {
            Writer::Pass(s) => s.finalize_sink()?,
            Writer::Base64(d) => d.finalize()?,
            Writer::QuotedPrintable(d) => d.finalize()?,
        }
        Ok(match self {
            Writer::Pass(s) => s,
            Writer::Base64(d) => d.into_inner(),
            Writer::QuotedPrintable(d) => d.into_inner(),
        })
    }
}

/// Per-parser-family state plus the caller's [`Visitor`], kept in a struct
/// separate from the parser itself so [`FormParser::feed`] can borrow each
/// independently (a parser event handler cannot also own the parser it is
/// being fed by).
struct Handler<V: Visitor> {
    visitor: V,
    config: FormParserConfig,
    pending_error: Option<FormParserError>,

    // octet-stream
    octet_file_name: Option<Vec<u8>>,
    octet_file: Option<File>,

    // querystring
    qs_name: Vec<u8>,
    qs_field: Option<Field>,

    // multipart
    mp_header_field: Vec<u8>,
    mp_header_value: Vec<u8>,
    mp_field_name: Vec<u8>,
    mp_file_name: Option<Vec<u8>>,
    mp_content_type: Option<Vec<u8>>,
    mp_transfer_encoding: Option<Vec<u8>>,
    mp_writer: Option<Writer>,
}

impl<V: Visitor> Handler<V> {
    fn new(config: FormParserConfig, octet_file_name: Option<Vec<u8>>, visitor: V) -> Self {
        Handler {
            visitor,
            config,
            pending_error: None,
            octet_file_name,
            octet_file: None,
            qs_name: Vec::new(),
            qs_field: None,
            mp_header_field: Vec::new(),
            mp_header_value: Vec::new(),
            mp_field_name: Vec::new(),
            mp_file_name: None,
            mp_content_type: None,
            mp_transfer_encoding: None,
            mp_writer: None,
        }
    }

    fn fail(&mut self, err: impl Into<FormParserError>) {
        if self.pending_error.is_none() {
            self.pending_error = Some(err.into());
        }
    }
}

impl<V: Visitor> OctetStreamVisitor for Handler<V> {
    fn on_start(&mut self) {
        self.octet_file = Some(File::new(
            "file",
            self.octet_file_name.clone(),
            self.config.spool_config(),
        ));
    }

    fn on_data(&mut self, data: &[u8]) {
        if self.pending_error.is_some() {
            return;
        }
        if let Some(file) = &mut self.octet_file {
            if let Err(e) = file.write(data) {
                self.fail(e);
            }
        }
    }

    fn on_end(&mut self) {
        if let Some(mut file) = self.octet_file.take() {
            match file.finalize() {
                Ok(()) => self.visitor.on_file(file),
                Err(e) => self.fail(e),
            }
        }
        self.visitor.on_end();
    }
}

impl<V: Visitor> QuerystringVisitor for Handler<V> {
    fn on_field_start(&mut self) {
        self.qs_name.clear();
        self.qs_field = None;
    }

    fn on_field_name(&mut self, data: &[u8]) {
        self.qs_name.extend_from_slice(data);
    }

    fn on_field_data(&mut self, data: &[u8]) {
        if self.qs_field.is_none() {
            self.qs_field = Some(Field::new(self.qs_name.clone()));
        }
        if let Some(field) = &mut self.qs_field {
            field.write(data);
        }
    }

    fn on_field_end(&mut self) {
        let mut field = self
            .qs_field
            .take()
            .unwrap_or_else(|| Field::new(self.qs_name.clone()));
        field.finalize();
        self.visitor.on_field(field);
    }

    fn on_end(&mut self) {
        self.visitor.on_end();
    }
}

impl<V: Visitor> MultipartVisitor for Handler<V> {
    fn on_part_begin(&mut self) {
        self.mp_header_field.clear();
        self.mp_header_value.clear();
        self.mp_field_name.clear();
        self.mp_file_name = None;
        self.mp_content_type = None;
        self.mp_transfer_encoding = None;
        self.mp_writer = None;
    }

    fn on_header_field(&mut self, data: &[u8]) {
        self.mp_header_field.extend_from_slice(data);
    }

    fn on_header_value(&mut self, data: &[u8]) {
        self.mp_header_value.extend_from_slice(data);
    }

    fn on_header_end(&mut self) {
        let name: Vec<u8> = self
            .mp_header_field
            .iter()
            .map(|&b| to_ascii_lower(b))
            .collect();

        match name.as_slice() {
            b"content-disposition" => {
                let (_, options) = parse_options_header(&self.mp_header_value);
                if let Some(field_name) = options.get(b"name".as_slice()) {
                    self.mp_field_name = field_name.clone();
                }
                if let Some(file_name) = options.get(b"filename".as_slice()) {
                    self.mp_file_name = Some(file_name.clone());
                }
            }
            b"content-transfer-encoding" => {
                let (main, _) = parse_options_header(&self.mp_header_value);
                self.mp_transfer_encoding = Some(main);
            }
            b"content-type" => {
                let (main, _) = parse_options_header(&self.mp_header_value);
                self.mp_content_type = Some(main);
            }
            _ => {}
        }

        self.mp_header_field.clear();
        self.mp_header_value.clear();
    }

    fn on_headers_finished(&mut self) {
        let sink = if let Some(file_name) = self.mp_file_name.take() {
            let mut file = File::new(
                self.mp_field_name.clone(),
                Some(file_name),
                self.config.spool_config(),
            );
            file.set_content_type(self.mp_content_type.clone());
            ActiveSink::File(file)
        } else {
            ActiveSink::Field(Field::new(self.mp_field_name.clone()))
        };

        self.mp_writer = Some(match self.mp_transfer_encoding.as_deref() {
            None | Some(b"7bit") | Some(b"8bit") | Some(b"binary") => Writer::Pass(sink),
            Some(b"base64") => Writer::Base64(Base64Decoder::new(sink)),
            Some(b"quoted-printable") => Writer::QuotedPrintable(QuotedPrintableDecoder::new(sink)),
            Some(other) => {
                if self.config.upload_error_on_bad_cte {
                    self.fail(FormParserError::BadContentTransferEncoding(other.to_vec()));
                }
                Writer::Pass(sink)
            }
        });
    }

    fn on_part_data(&mut self, data: &[u8]) {
        if self.pending_error.is_some() {
            return;
        }
        if let Some(writer) = &mut self.mp_writer {
            if let Err(e) = writer.write(data) {
                self.fail(e);
            }
        }
    }

    fn on_part_end(&mut self) {
        if let Some(writer) = self.mp_writer.take() {
            match writer.finish() {
                Ok(ActiveSink::Field(field)) => self.visitor.on_field(field),
                Ok(ActiveSink::File(file)) => self.visitor.on_file(file),
                Err(e) => self.fail(e),
            }
        }
    }

    fn on_end(&mut self) {
        self.visitor.on_end();
    }
}

enum Inner {
    OctetStream(OctetStreamParser),
    Querystring(QuerystringParser),
    Multipart(MultipartParser),
}

/// Parses a single form body, dispatched on its `Content-Type`.
///
/// Construct with [`FormParser::new`], feed body bytes via [`FormParser::feed`]
/// in any chunking, then call [`FormParser::finalize`]. Finished fields/files
/// are delivered to the [`Visitor`] supplied at construction, by value, as
/// soon as each one completes — the coordinator never retains one past that
/// point.
pub struct FormParser<V: Visitor> {
    parser: Inner,
    handler: Handler<V>,
}

impl<V: Visitor> FormParser<V> {
    /// `content_type` is the raw `Content-Type` header value. `x_file_name`
    /// is the `X-File-Name` header, used only for `application/octet-stream`
    /// bodies (ignored otherwise).
    pub fn new(
        content_type: &[u8],
        x_file_name: Option<Vec<u8>>,
        config: FormParserConfig,
        visitor: V,
    ) -> Result<Self, FormParserError> {
        let (main, options) = parse_options_header(content_type);
        let max_size = config.max_body_size;

        let parser = match main.as_slice() {
            b"application/octet-stream" => Inner::OctetStream(OctetStreamParser::with_max_size(max_size)),
            b"application/x-www-form-urlencoded" | b"application/x-url-encoded" => {
                Inner::Querystring(QuerystringParser::new(QuerystringConfig {
                    strict_parsing: config.strict_querystring,
                    max_size,
                }))
            }
            b"multipart/form-data" => {
                let boundary = options
                    .get(b"boundary".as_slice())
                    .ok_or(FormParserError::NoBoundary)?;
                Inner::Multipart(MultipartParser::with_max_size(boundary, max_size))
            }
            _ => return Err(FormParserError::UnknownContentType(main)),
        };

        Ok(FormParser {
            parser,
            handler: Handler::new(config, x_file_name, visitor),
        })
    }

    /// Feeds a chunk of body bytes. Returns the number of bytes accepted
    /// (short of `data.len()` only if `max_body_size` was hit).
    pub fn feed(&mut self, data: &[u8]) -> Result<usize, FormParserError> {
        let consumed = match &mut self.parser {
            Inner::OctetStream(p) => p.feed(data, &mut self.handler),
            Inner::Querystring(p) => p.feed(data, &mut self.handler)?,
            Inner::Multipart(p) => p.feed(data, &mut self.handler)?,
        };
        if let Some(e) = self.handler.pending_error.take() {
            return Err(e);
        }
        Ok(consumed)
    }

    /// Signals end of input, delivering any still-open field/file.
    pub fn finalize(&mut self) -> Result<(), FormParserError> {
        match &mut self.parser {
            Inner::OctetStream(p) => p.finalize(&mut self.handler),
            Inner::Querystring(p) => p.finalize(&mut self.handler)?,
            Inner::Multipart(p) => p.finalize(),
        }
        if let Some(e) = self.handler.pending_error.take() {
            return Err(e);
        }
        Ok(())
    }

    /// For multipart bodies, fails if the closing boundary was never
    /// reached. A no-op for the other two content types, which have no
    /// equivalent notion of an unterminated body.
    pub fn strict_finalize(&mut self) -> Result<(), FormParserError> {
        if let Inner::Multipart(p) = &mut self.parser {
            p.strict_finalize()?;
        }
        Ok(())
    }

    /// Unwraps the supplied [`Visitor`], e.g. to read back an accumulator it
    /// collected into.
    pub fn into_visitor(self) -> V {
        self.handler.visitor
    }
}

/// Reads a whole body from `reader` in chunks of `config.chunk_size` and
/// feeds it through a [`FormParser`], stopping at `content_length` bytes (if
/// given) or EOF, then finalizes. Returns the visitor so its accumulated
/// fields/files can be read back.
pub fn parse_form<R: Read, V: Visitor>(
    mut reader: R,
    content_type: &[u8],
    x_file_name: Option<Vec<u8>>,
    content_length: Option<u64>,
    config: FormParserConfig,
    visitor: V,
) -> Result<V, FormParserError> {
    let chunk_size = config.chunk_size.max(1);
    let mut parser = FormParser::new(content_type, x_file_name, config, visitor)?;
    let mut buf = vec![0u8; chunk_size];
    let mut total_read = 0u64;

    loop {
        if let Some(limit) = content_length {
            if total_read >= limit {
                break;
            }
        }
        let want = match content_length {
            Some(limit) => std::cmp::min(chunk_size as u64, limit - total_read) as usize,
            None => chunk_size,
        };
        let n = reader
            .read(&mut buf[..want])
            .map_err(|e| FormParserError::from(FileError::new("failed reading body", e)))?;
        if n == 0 {
            break;
        }
        parser.feed(&buf[..n])?;
        total_read += n as u64;
    }

    parser.finalize()?;
    Ok(parser.into_visitor())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FieldValue;

    #[derive(Default)]
    struct Collector {
        fields: Vec<(Vec<u8>, FieldValue)>,
        files: Vec<(Vec<u8>, Option<Vec<u8>>, Vec<u8>)>,
        ended: bool,
    }

    impl Visitor for Collector {
        fn on_field(&mut self, field: Field) {
            self.fields.push((field.name().to_vec(), field.value().clone()));
        }
        fn on_file(&mut self, mut file: File) {
            let name = file.field_name().to_vec();
            let file_name = file.file_name().map(|b| b.to_vec());
            let data = file.read_to_vec().unwrap();
            self.files.push((name, file_name, data));
        }
        fn on_end(&mut self) {
            self.ended = true;
        }
    }

    #[test]
    fn querystring_round_trip() {
        let mut parser = FormParser::new(
            b"application/x-www-form-urlencoded",
            None,
            FormParserConfig::default(),
            Collector::default(),
        )
        .unwrap();
        parser.feed(b"a=1&flag&b=2").unwrap();
        parser.finalize().unwrap();
        let rec = parser.into_visitor();
        assert_eq!(
            rec.fields,
            vec![
                (b"a".to_vec(), FieldValue::Bytes(b"1".to_vec())),
                (b"flag".to_vec(), FieldValue::Null),
                (b"b".to_vec(), FieldValue::Bytes(b"2".to_vec())),
            ]
        );
        assert!(rec.ended);
    }

    #[test]
    fn octet_stream_produces_one_file() {
        let mut parser = FormParser::new(
            b"application/octet-stream",
            Some(b"data.bin".to_vec()),
            FormParserConfig::default(),
            Collector::default(),
        )
        .unwrap();
        parser.feed(b"\x00\x01\x02").unwrap();
        parser.finalize().unwrap();
        let rec = parser.into_visitor();
        assert_eq!(rec.files.len(), 1);
        assert_eq!(rec.files[0].1, Some(b"data.bin".to_vec()));
        assert_eq!(rec.files[0].2, b"\x00\x01\x02");
    }

    #[test]
    fn multipart_plain_field() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nhello\r\n--B--".to_vec();
        let mut parser = FormParser::new(
            br#"multipart/form-data; boundary=B"#,
            None,
            FormParserConfig::default(),
            Collector::default(),
        )
        .unwrap();
        parser.feed(&body).unwrap();
        parser.finalize().unwrap();
        let rec = parser.into_visitor();
        assert_eq!(
            rec.fields,
            vec![(b"field".to_vec(), FieldValue::Bytes(b"hello".to_vec()))]
        );
        assert!(rec.ended);
    }

    #[test]
    fn multipart_file_upload() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello file\r\n--B--".to_vec();
        let mut parser = FormParser::new(
            br#"multipart/form-data; boundary=B"#,
            None,
            FormParserConfig::default(),
            Collector::default(),
        )
        .unwrap();
        parser.feed(&body).unwrap();
        parser.finalize().unwrap();
        let rec = parser.into_visitor();
        assert_eq!(rec.files.len(), 1);
        assert_eq!(rec.files[0].0, b"upload");
        assert_eq!(rec.files[0].1, Some(b"a.txt".to_vec()));
        assert_eq!(rec.files[0].2, b"hello file");
    }

    #[test]
    fn multipart_base64_file_decodes() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"a.bin\"\r\nContent-Transfer-Encoding: base64\r\n\r\naGVsbG8=\r\n--B--".to_vec();
        let mut parser = FormParser::new(
            br#"multipart/form-data; boundary=B"#,
            None,
            FormParserConfig::default(),
            Collector::default(),
        )
        .unwrap();
        parser.feed(&body).unwrap();
        parser.finalize().unwrap();
        let rec = parser.into_visitor();
        assert_eq!(rec.files[0].2, b"hello");
    }

    #[test]
    fn missing_boundary_is_an_error() {
        let err = FormParser::new(
            b"multipart/form-data",
            None,
            FormParserConfig::default(),
            Collector::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FormParserError::NoBoundary));
    }

    #[test]
    fn unknown_content_type_is_an_error() {
        let err = FormParser::new(
            b"application/json",
            None,
            FormParserConfig::default(),
            Collector::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FormParserError::UnknownContentType(_)));
    }

    #[test]
    fn parse_form_reads_from_a_reader() {
        let body = b"a=1&b=2".to_vec();
        let rec = parse_form(
            &body[..],
            b"application/x-www-form-urlencoded",
            None,
            Some(body.len() as u64),
            FormParserConfig::default(),
            Collector::default(),
        )
        .unwrap();
        assert_eq!(
            rec.fields,
            vec![
                (b"a".to_vec(), FieldValue::Bytes(b"1".to_vec())),
                (b"b".to_vec(), FieldValue::Bytes(b"2".to_vec())),
            ]
        );
    }
}
