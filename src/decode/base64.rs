//! Streaming base64 decoder (`Content-Transfer-Encoding: base64`).
//!
//! Base64 encodes in 4-byte groups, so a chunk boundary can split a group
//! across two `write` calls. The decoder carries 0–3 unconsumed bytes in a
//! small cache, decodes the largest multiple-of-4 prefix available on each
//! write, and forwards the result to the wrapped sink.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{DecodeError, DecodeErrorReason, FormParserError};
use crate::sink::Sink;

pub struct Base64Decoder<S: Sink> {
    sink: S,
    cache: Vec<u8>,
}

impl<S: Sink> Base64Decoder<S> {
    pub fn new(sink: S) -> Self {
        Base64Decoder {
            sink,
            cache: Vec::with_capacity(4),
        }
    }

    pub fn into_inner(self) -> S {
        self.sink
    }

    /// Decodes as much of `data` as forms complete 4-byte groups (including
    /// any bytes carried over from a previous call) and forwards the decoded
    /// bytes to the wrapped sink. Returns the number of input bytes
    /// consumed, always `data.len()`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, FormParserError> {
        self.cache.extend_from_slice(data);

        let usable_len = self.cache.len() - (self.cache.len() % 4);
        if usable_len == 0 {
            return Ok(data.len());
        }

        let decodable = &self.cache[..usable_len];
        let decoded = STANDARD
            .decode(decodable)
            .map_err(|_| FormParserError::from(DecodeError::new(DecodeErrorReason::InvalidBase64)))?;
        self.sink.write_bytes(&decoded)?;

        self.cache.drain(..usable_len);
        Ok(data.len())
    }

    /// Fails if a partial 4-byte group is still cached; otherwise forwards
    /// `finalize` to the wrapped sink.
    pub fn finalize(&mut self) -> Result<(), FormParserError> {
        if !self.cache.is_empty() {
            return Err(FormParserError::from(DecodeError::new(
                DecodeErrorReason::ResidueAtFinalize {
                    residue_len: self.cache.len(),
                },
            )));
        }
        self.sink.finalize_sink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct VecSink(Vec<u8>);

    impl Sink for VecSink {
        fn write_bytes(&mut self, data: &[u8]) -> Result<(), FormParserError> {
            self.0.extend_from_slice(data);
            Ok(())
        }
        fn finalize_sink(&mut self) -> Result<(), FormParserError> {
            Ok(())
        }
    }

    #[test]
    fn decodes_in_one_shot() {
        let mut decoder = Base64Decoder::new(VecSink::default());
        decoder.write(b"Zm9vYmFy").unwrap();
        decoder.finalize().unwrap();
        assert_eq!(decoder.into_inner().0, b"foobar");
    }

    #[test]
    fn decodes_split_across_writes_at_every_offset() {
        let encoded = b"Zm9vYmFy";
        for split in 0..=encoded.len() {
            let mut decoder = Base64Decoder::new(VecSink::default());
            decoder.write(&encoded[..split]).unwrap();
            decoder.write(&encoded[split..]).unwrap();
            decoder.finalize().unwrap();
            assert_eq!(decoder.into_inner().0, b"foobar", "split at {split}");
        }
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        let originals: &[&[u8]] = &[b"", b"a", b"ab", b"abc", b"abcd", b"hello world!", &[0, 1, 2, 255, 254]];
        for original in originals {
            let encoded = STANDARD.encode(original);
            let mut decoder = Base64Decoder::new(VecSink::default());
            decoder.write(encoded.as_bytes()).unwrap();
            decoder.finalize().unwrap();
            assert_eq!(&decoder.into_inner().0, original);
        }
    }

    #[test]
    fn invalid_alphabet_byte_is_an_error() {
        let mut decoder = Base64Decoder::new(VecSink::default());
        let err = decoder.write(b"!!!!").unwrap_err();
        assert!(matches!(err, FormParserError::Decode(_)));
    }

    #[test]
    fn residue_at_finalize_is_an_error() {
        let mut decoder = Base64Decoder::new(VecSink::default());
        decoder.write(b"Zm9").unwrap();
        let err = decoder.finalize().unwrap_err();
        assert!(matches!(err, FormParserError::Decode(_)));
    }
}
