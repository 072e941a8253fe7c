//! Parses `Content-Type` / `Content-Disposition` style header values of the
//! form `value; key=token; key="quoted value"` into a main value and an
//! options map.
//!
//! This is a hand-written linear scan rather than a regex, by design: the
//! reference implementation uses a single backtracking regex for this and is
//! vulnerable to catastrophic backtracking on adversarial input (alternating
//! backslashes inside a quoted value). A plain left-to-right byte scan with
//! an explicit "inside quotes" flag has no such failure mode.

use std::collections::HashMap;

use crate::token::{BACKSLASH, DOUBLE_QUOTE, SEMICOLON, to_ascii_lower};

/// Lowercased byte-string keys mapped to their (already-unescaped) byte-string
/// values. Insertion order is not significant, so a hash map is used.
pub type HeaderOptions = HashMap<Vec<u8>, Vec<u8>>;

/// Parses a header value into `(main_value, options)`.
///
/// `main_value` is the lowercased, whitespace-trimmed token before the first
/// `;`. Malformed input is never an error: unparseable tails are silently
/// truncated and the caller gets a best-effort mapping.
pub fn parse_options_header(value: &[u8]) -> (Vec<u8>, HeaderOptions) {
    if value.is_empty() {
        return (Vec::new(), HeaderOptions::new());
    }

    let Some(semi) = value.iter().position(|&b| b == SEMICOLON) else {
        return (lower_trim(value), HeaderOptions::new());
    };

    let main_value = lower_trim(&value[..semi]);
    let mut options = HeaderOptions::new();
    let rest = &value[semi + 1..];

    for (raw_key, raw_value) in scan_options(rest) {
        let key = to_ascii_lower_vec(raw_key);
        let mut val = unescape_if_quoted(raw_value);

        if key == b"filename" {
            val = strip_ie6_path(val);
        }

        if let Some(base_key) = key.strip_suffix(b"*") {
            // RFC 2231 extended value: charset'lang'percent-encoded.
            let decoded = decode_rfc2231_value(&val);
            options.insert(base_key.to_vec(), decoded);
        } else {
            // Don't clobber a value already installed by an RFC 2231 `key*`
            // option, regardless of which one we saw first.
            options.entry(key).or_insert(val);
        }
    }

    (main_value, options)
}

/// Scans `key=value` pairs separated by top-level `;` bytes (i.e. not inside
/// a quoted value), returning `(key_bytes, value_bytes)` slices of `input`.
/// `value_bytes` still includes surrounding quotes, if any, so the caller can
/// tell a quoted value from a bare one.
fn scan_options(input: &[u8]) -> Vec<(&[u8], &[u8])> {
    let mut pairs = Vec::new();
    let mut i = 0;
    let len = input.len();

    while i < len {
        // Skip leading whitespace / stray separators before a key.
        while i < len && (input[i] == b' ' || input[i] == b'\t' || input[i] == SEMICOLON) {
            i += 1;
        }
        if i >= len {
            break;
        }

        let key_start = i;
        while i < len && input[i] != b'=' && input[i] != SEMICOLON {
            i += 1;
        }
        if i >= len || input[i] == SEMICOLON {
            // No '=' before the next separator (or end of input): not a
            // well-formed option, skip it.
            i += 1;
            continue;
        }
        let key_end = trim_end(input, key_start, i);
        let key = &input[key_start..key_end];
        i += 1; // consume '='

        while i < len && (input[i] == b' ' || input[i] == b'\t') {
            i += 1;
        }

        let value_start = i;
        if i < len && input[i] == DOUBLE_QUOTE {
            i += 1;
            while i < len {
                if input[i] == BACKSLASH && i + 1 < len {
                    i += 2;
                    continue;
                }
                if input[i] == DOUBLE_QUOTE {
                    i += 1;
                    break;
                }
                i += 1;
            }
        } else {
            while i < len && input[i] != SEMICOLON {
                i += 1;
            }
        }
        let value_end = trim_end(input, value_start, i);
        pairs.push((key, &input[value_start..value_end]));
    }

    pairs
}

fn trim_end(input: &[u8], start: usize, end: usize) -> usize {
    let mut e = end;
    while e > start && (input[e - 1] == b' ' || input[e - 1] == b'\t') {
        e -= 1;
    }
    e
}

fn lower_trim(input: &[u8]) -> Vec<u8> {
    let trimmed = trim(input);
    trimmed.iter().map(|&b| to_ascii_lower(b)).collect()
}

fn trim(input: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = input.len();
    while start < end && input[start].is_ascii_whitespace() {
        start += 1;
    }
    while end > start && input[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &input[start..end]
}

fn to_ascii_lower_vec(input: &[u8]) -> Vec<u8> {
    input.iter().map(|&b| to_ascii_lower(b)).collect()
}

/// If `value` is wrapped in double quotes, strips them and resolves `\\` and
/// `\"` escapes (any other backslash sequence is kept verbatim, backslash
/// included). Otherwise returns `value` unchanged.
fn unescape_if_quoted(value: &[u8]) -> Vec<u8> {
    if value.len() < 2 || value[0] != DOUBLE_QUOTE || value[value.len() - 1] != DOUBLE_QUOTE {
        return value.to_vec();
    }

    let inner = &value[1..value.len() - 1];
    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        if inner[i] == BACKSLASH && i + 1 < inner.len() {
            let next = inner[i + 1];
            if next == BACKSLASH || next == DOUBLE_QUOTE {
                out.push(next);
                i += 2;
                continue;
            }
        }
        out.push(inner[i]);
        i += 1;
    }
    out
}

/// Works around a bug in IE6 where the full path is sent instead of just the
/// file name: if the value looks like `X:\...` or `\\...`, keep only the
/// final `\`-separated component.
fn strip_ie6_path(value: Vec<u8>) -> Vec<u8> {
    let looks_like_drive_letter =
        value.len() >= 3 && value[0].is_ascii_alphabetic() && value[1] == b':' && value[2] == b'\\';
    let looks_like_unc = value.len() >= 2 && value[0] == b'\\' && value[1] == b'\\';

    if !looks_like_drive_letter && !looks_like_unc {
        return value;
    }

    value
        .rsplit(|&b| b == b'\\')
        .next()
        .map(|b| b.to_vec())
        .unwrap_or(value)
}

/// Decodes an RFC 2231 extended value (`charset'lang'percent-encoded`): drops
/// the charset/language prefix and percent-decodes the remainder. Bytes are
/// never re-interpreted as anything but raw bytes (no charset conversion is
/// performed — the caller gets back the decoded octets, consistent with this
/// crate's policy of never interpreting character encodings).
fn decode_rfc2231_value(value: &[u8]) -> Vec<u8> {
    let mut quotes = value.iter().enumerate().filter(|&(_, &b)| b == b'\'');
    let Some(_first) = quotes.next() else {
        // Not actually in `charset'lang'value` form; treat as a plain value.
        return percent_decode(value);
    };
    let Some((second, _)) = quotes.next() else {
        return percent_decode(value);
    };
    percent_decode(&value[second + 1..])
}

fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' && i + 2 < input.len() {
            if let (Some(hi), Some(lo)) = (hex_val(input[i + 1]), hex_val(input[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt<'a>(options: &'a HeaderOptions, key: &str) -> Option<&'a [u8]> {
        options.get(key.as_bytes()).map(|v| v.as_slice())
    }

    #[test]
    fn empty_input() {
        let (main, options) = parse_options_header(b"");
        assert_eq!(main, b"");
        assert!(options.is_empty());
    }

    #[test]
    fn no_options() {
        let (main, options) = parse_options_header(b"  Text/Plain  ");
        assert_eq!(main, b"text/plain");
        assert!(options.is_empty());
    }

    #[test]
    fn single_param() {
        let (main, options) = parse_options_header(b"application/json;param=value");
        assert_eq!(main, b"application/json");
        assert_eq!(opt(&options, "param"), Some(&b"value"[..]));
    }

    #[test]
    fn quoted_param_with_semicolon() {
        let (_, options) = parse_options_header(br#"application/json;param="quoted;with;semicolons""#);
        assert_eq!(opt(&options, "param"), Some(&b"quoted;with;semicolons"[..]));
    }

    #[test]
    fn quoted_param_with_escapes() {
        let (_, options) =
            parse_options_header(br#"application/json;param="This \" is \" a \" quote""#);
        assert_eq!(opt(&options, "param"), Some(&br#"This " is " a " quote"#[..]));
    }

    #[test]
    fn ie6_drive_letter_path() {
        let (_, options) =
            parse_options_header(br#"form-data; filename="C:\path\file.txt""#);
        assert_eq!(opt(&options, "filename"), Some(&b"file.txt"[..]));
    }

    #[test]
    fn ie6_unc_path() {
        let (_, options) =
            parse_options_header(br#"form-data; filename="\\server\share\file.txt""#);
        assert_eq!(opt(&options, "filename"), Some(&b"file.txt"[..]));
    }

    #[test]
    fn rfc2231_extended_value() {
        let (_, options) =
            parse_options_header(b"text/plain; param*=us-ascii'en-us'encoded%20message");
        assert_eq!(opt(&options, "param"), Some(&b"encoded message"[..]));
    }

    #[test]
    fn rfc2231_wins_over_plain_filename_regardless_of_order() {
        let (_, options) = parse_options_header(
            br#"form-data; filename="plain.txt"; filename*=utf-8''encoded.txt"#,
        );
        assert_eq!(opt(&options, "filename"), Some(&b"encoded.txt"[..]));

        let (_, options) = parse_options_header(
            br#"form-data; filename*=utf-8''encoded.txt; filename="plain.txt""#,
        );
        assert_eq!(opt(&options, "filename"), Some(&b"encoded.txt"[..]));
    }

    #[test]
    fn redos_candidate_terminates_quickly() {
        let backslashes = b"\\".repeat(20_000);
        let mut header = b"application/x-www-form-urlencoded; bang=\"".to_vec();
        header.extend_from_slice(&backslashes);
        let (_, options) = parse_options_header(&header);
        assert!(opt(&options, "bang").is_some());
    }
}
