//! # streamform
//!
//! A **streaming, incremental parser** for HTTP request bodies carrying form
//! data, implemented as three byte-level state machines, built as both a
//! Rust library and a CLI tool.
//!
//! streamform processes a body incrementally (byte-by-byte or in
//! arbitrarily-sized chunks) without ever buffering the whole thing, and
//! accepts the three encodings an HTTP form submission commonly arrives in:
//! `application/octet-stream`, `application/x-www-form-urlencoded`, and
//! `multipart/form-data`.
//!
//! ## Quick start — one-shot parsing
//!
//! ```rust
//! use streamform::form::{FormParser, Visitor};
//! use streamform::config::FormParserConfig;
//! use streamform::sink::{Field, File};
//!
//! #[derive(Default)]
//! struct Collected {
//!     fields: Vec<Field>,
//! }
//!
//! impl Visitor for Collected {
//!     fn on_field(&mut self, field: Field) {
//!         self.fields.push(field);
//!     }
//!     fn on_file(&mut self, _file: File) {}
//! }
//!
//! let mut parser = FormParser::new(
//!     b"application/x-www-form-urlencoded",
//!     None,
//!     FormParserConfig::default(),
//!     Collected::default(),
//! )
//! .unwrap();
//! parser.feed(b"name=ferris&lang=rust").unwrap();
//! parser.finalize().unwrap();
//! assert_eq!(parser.into_visitor().fields.len(), 2);
//! ```
//!
//! ## Quick start — incremental multipart parsing
//!
//! The lower-level state machines in [`multipart`], [`querystring`], and
//! [`octet_stream`] can also be driven directly, without the [`form`]
//! coordinator, by implementing their `Visitor` traits.

pub mod config;
pub mod decode;
pub mod error;
pub mod form;
pub mod header;
pub mod multipart;
pub mod octet_stream;
pub mod querystring;
pub mod sink;
pub mod token;

pub use config::FormParserConfig;
pub use error::FormParserError;
pub use form::{parse_form, FormParser, Visitor};
pub use sink::{Field, FieldValue, File};
