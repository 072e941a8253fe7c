//! Streaming parser for `application/x-www-form-urlencoded` bodies.
//!
//! A three-state machine, grounded on the reference implementation's
//! `QuerystringParser`: bytes before the first `=` in a field chunk are the
//! field name, bytes after are the value, and `&` or `;` end the chunk. No
//! percent-decoding happens here — see the module-level note in
//! [`crate::form`] for why that is out of scope for this crate.

use crate::error::{ParseError, QuerystringParseErrorKind};
use crate::token::{AMPERSAND, SEMICOLON};

/// Receives events from a [`QuerystringParser`].
pub trait QuerystringVisitor {
    /// A new field chunk has started (after the leading separator, if any).
    fn on_field_start(&mut self) {}
    /// A chunk of the current field's name.
    fn on_field_name(&mut self, data: &[u8]);
    /// A chunk of the current field's value.
    fn on_field_data(&mut self, data: &[u8]);
    /// The current field chunk ended (at a separator or at `finalize`).
    fn on_field_end(&mut self) {}
    /// The whole body ended.
    fn on_end(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    BeforeField,
    FieldName,
    FieldData,
}

/// Whether malformed separators/missing `=` are rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerystringConfig {
    /// Reject two consecutive separators and field chunks with no `=`.
    pub strict_parsing: bool,
    /// Cap on total bytes accepted. `u64::MAX` means no cap.
    pub max_size: u64,
}

impl Default for QuerystringConfig {
    fn default() -> Self {
        QuerystringConfig {
            strict_parsing: false,
            max_size: u64::MAX,
        }
    }
}

/// Byte-level `application/x-www-form-urlencoded` parser.
pub struct QuerystringParser {
    state: State,
    config: QuerystringConfig,
    field_started: bool,
    saw_equals_in_field: bool,
    processed: u64,
}

impl QuerystringParser {
    pub fn new(config: QuerystringConfig) -> Self {
        QuerystringParser {
            state: State::BeforeField,
            config,
            field_started: false,
            saw_equals_in_field: false,
            processed: 0,
        }
    }

    /// Feeds a chunk of body bytes to `visitor`.
    ///
    /// Returns the number of bytes accepted. Bytes beyond `max_size` are
    /// silently dropped (logged at `debug!`); under `strict_parsing` a
    /// shorter count can also result from an error partway through.
    pub fn feed<V: QuerystringVisitor>(
        &mut self,
        data: &[u8],
        visitor: &mut V,
    ) -> Result<usize, ParseError> {
        let remaining = self.config.max_size.saturating_sub(self.processed);
        let accepted_len = (data.len() as u64).min(remaining) as usize;
        if accepted_len < data.len() {
            log::debug!(
                "querystring body truncated at {} bytes (max_size)",
                self.config.max_size
            );
        }
        let data = &data[..accepted_len];

        let mut i = 0;
        let mut mark = 0;

        while i < data.len() {
            let b = data[i];

            match self.state {
                State::BeforeField => {
                    if b == AMPERSAND || b == SEMICOLON {
                        if self.config.strict_parsing {
                            return Err(ParseError::querystring(
                                QuerystringParseErrorKind::DuplicateSeparator,
                                i,
                            ));
                        }
                        i += 1;
                        continue;
                    }
                    self.start_field(visitor);
                    self.state = State::FieldName;
                    mark = i;
                }
                State::FieldName => {
                    if b == b'=' {
                        if mark < i {
                            visitor.on_field_name(&data[mark..i]);
                        }
                        self.saw_equals_in_field = true;
                        self.state = State::FieldData;
                        mark = i + 1;
                    } else if b == AMPERSAND || b == SEMICOLON {
                        if mark < i {
                            visitor.on_field_name(&data[mark..i]);
                        }
                        if self.config.strict_parsing && !self.saw_equals_in_field {
                            return Err(ParseError::querystring(
                                QuerystringParseErrorKind::MissingEquals,
                                i,
                            ));
                        }
                        self.end_field(visitor);
                        self.state = State::BeforeField;
                        mark = i + 1;
                    }
                }
                State::FieldData => {
                    if b == AMPERSAND || b == SEMICOLON {
                        if mark < i {
                            visitor.on_field_data(&data[mark..i]);
                        }
                        self.end_field(visitor);
                        self.state = State::BeforeField;
                        mark = i + 1;
                    }
                }
            }

            i += 1;
        }

        // Flush whatever partial name/value chunk remains to the visitor;
        // the field stays open across this `feed` call's boundary.
        if mark < data.len() {
            match self.state {
                State::FieldName => visitor.on_field_name(&data[mark..]),
                State::FieldData => visitor.on_field_data(&data[mark..]),
                State::BeforeField => {}
            }
        }

        self.processed += data.len() as u64;
        Ok(data.len())
    }

    /// Ends the final field chunk, if one is open, and emits `on_end`.
    pub fn finalize<V: QuerystringVisitor>(&mut self, visitor: &mut V) -> Result<(), ParseError> {
        match self.state {
            State::FieldName if self.config.strict_parsing && !self.saw_equals_in_field => {
                return Err(ParseError::querystring(
                    QuerystringParseErrorKind::MissingEquals,
                    0,
                ));
            }
            State::FieldName | State::FieldData => {
                self.end_field(visitor);
            }
            State::BeforeField => {}
        }
        self.state = State::BeforeField;
        visitor.on_end();
        Ok(())
    }

    fn start_field<V: QuerystringVisitor>(&mut self, visitor: &mut V) {
        self.field_started = true;
        self.saw_equals_in_field = false;
        visitor.on_field_start();
    }

    fn end_field<V: QuerystringVisitor>(&mut self, visitor: &mut V) {
        if self.field_started {
            visitor.on_field_end();
            self.field_started = false;
        }
    }
}
