//! Template Decoder - JSON bytes to the typed model
//!
//! Decoding is purely syntactic. Diagnostics are rendered in the wording
//! CoMID tooling has always reported ("invalid character '.' looking for
//! beginning of value") while keeping the position as typed fields.

use serde::de::IgnoredAny;
use serde_json::error::Category;
use std::fmt;
use thiserror::Error;

use crate::comid::Comid;

/// Where the parser was when it hit an unexpected character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenContext {
    BeginningOfValue,
    BeginningOfObjectKey,
    AfterObjectKey,
    AfterObjectValue,
    AfterArrayElement,
    AfterTopLevelValue,
    InLiteral {
        literal: &'static str,
        expecting: char,
    },
    InStringLiteral,
    InStringEscape,
    InUnicodeEscape,
    InNumericLiteral,
    AfterDecimalPoint,
    InExponent,
}

impl fmt::Display for TokenContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenContext::InLiteral { literal, expecting } => {
                return write!(f, "in literal {literal} (expecting {})", quote_char(*expecting));
            }
            TokenContext::BeginningOfValue => "looking for beginning of value",
            TokenContext::BeginningOfObjectKey => "looking for beginning of object key string",
            TokenContext::AfterObjectKey => "after object key",
            TokenContext::AfterObjectValue => "after object key:value pair",
            TokenContext::AfterArrayElement => "after array element",
            TokenContext::AfterTopLevelValue => "after top-level value",
            TokenContext::InStringLiteral => "in string literal",
            TokenContext::InStringEscape => "in string escape code",
            TokenContext::InUnicodeEscape => "in \\u hexadecimal character escape",
            TokenContext::InNumericLiteral => "in numeric literal",
            TokenContext::AfterDecimalPoint => "after decimal point in numeric literal",
            TokenContext::InExponent => "in exponent of numeric literal",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    InvalidCharacter {
        character: char,
        context: TokenContext,
    },
    UnexpectedEnd,
    /// Well-formed JSON that does not fit the model (wrong type, bad base64, ...).
    Data(String),
    Other(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::InvalidCharacter { character, context } => {
                write!(f, "invalid character {} {}", quote_char(*character), context)
            }
            Diagnostic::UnexpectedEnd => f.write_str("unexpected end of JSON input"),
            Diagnostic::Data(msg) | Diagnostic::Other(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{diagnostic}")]
pub struct DecodeError {
    /// 1-based line of the offending token.
    pub line: usize,
    /// 1-based byte column of the offending token.
    pub column: usize,
    /// Byte offset into the input, when it can be resolved.
    pub offset: Option<usize>,
    pub diagnostic: Diagnostic,
}

/// Decode a JSON template into a [`Comid`]. No semantic checks are made.
///
/// The whole input is checked for well-formedness first, so a syntax
/// error anywhere is reported ahead of a type mismatch earlier on.
pub fn decode_template(input: &[u8]) -> Result<Comid, DecodeError> {
    serde_json::from_slice::<IgnoredAny>(input).map_err(|err| diagnose(&err, input))?;
    serde_json::from_slice(input).map_err(|err| diagnose(&err, input))
}

fn diagnose(err: &serde_json::Error, input: &[u8]) -> DecodeError {
    let mut line = err.line();
    let mut column = err.column();
    let mut offset = byte_offset(input, line, column);
    let message = strip_position(err);

    let diagnostic = match err.classify() {
        Category::Eof => Diagnostic::UnexpectedEnd,
        Category::Data => Diagnostic::Data(message),
        Category::Io => Diagnostic::Other(message),
        Category::Syntax => match syntax_diagnostic(input, offset, &message) {
            Some((at, diagnostic)) => {
                if offset != Some(at) {
                    (line, column) = position(input, at);
                    offset = Some(at);
                }
                diagnostic
            }
            None => Diagnostic::Other(message),
        },
    };

    DecodeError {
        line,
        column,
        offset,
        diagnostic,
    }
}

/// Name the offending character. Returns its offset, which can differ
/// from the reported one where the parser points past it.
fn syntax_diagnostic(
    input: &[u8],
    offset: Option<usize>,
    message: &str,
) -> Option<(usize, Diagnostic)> {
    if message.starts_with("control character") {
        let at = control_character(input)?;
        let character = char_at(input, at)?;
        let context = TokenContext::InStringLiteral;
        return Some((at, Diagnostic::InvalidCharacter { character, context }));
    }

    let at = offset?;
    let character = char_at(input, at)?;
    let context = match message {
        "expected value" => TokenContext::BeginningOfValue,
        "key must be a string" => TokenContext::BeginningOfObjectKey,
        "expected `:`" => TokenContext::AfterObjectKey,
        "expected `,` or `}`" => TokenContext::AfterObjectValue,
        "expected `,` or `]`" => TokenContext::AfterArrayElement,
        "trailing characters" => TokenContext::AfterTopLevelValue,
        "trailing comma" => match character {
            '}' => TokenContext::BeginningOfObjectKey,
            _ => TokenContext::BeginningOfValue,
        },
        "expected ident" => literal_context(input, at)?,
        "invalid escape" => match at.checked_sub(1).map(|i| input[i]) {
            Some(b'\\') => TokenContext::InStringEscape,
            _ => TokenContext::InUnicodeEscape,
        },
        "invalid number" => {
            if at + 1 == input.len() && number_wants_more(input, at) {
                return Some((at, Diagnostic::UnexpectedEnd));
            }
            number_context(input, at)
        }
        _ => return None,
    };
    Some((at, Diagnostic::InvalidCharacter { character, context }))
}

fn literal_context(input: &[u8], offset: usize) -> Option<TokenContext> {
    ["true", "false", "null"].into_iter().find_map(|literal| {
        let bytes = literal.as_bytes();
        (1..bytes.len()).rev().find_map(|k| {
            let start = offset.checked_sub(k)?;
            (input[start..offset] == bytes[..k]).then_some(TokenContext::InLiteral {
                literal,
                expecting: bytes[k] as char,
            })
        })
    })
}

fn number_context(input: &[u8], offset: usize) -> TokenContext {
    let prev = offset.checked_sub(1).map(|i| input[i]);
    let before = offset.checked_sub(2).map(|i| input[i]);
    match (before, prev) {
        (_, Some(b'.')) => TokenContext::AfterDecimalPoint,
        (_, Some(b'e' | b'E' | b'+')) | (Some(b'e' | b'E'), Some(b'-')) => TokenContext::InExponent,
        (_, Some(b'-')) => TokenContext::InNumericLiteral,
        // A digit after a leading zero: the number already ended.
        _ => after_value(input, offset),
    }
}

// The parser reports the last byte when a number is cut off by the end
// of input; that byte is a legal continuation still waiting for a digit.
fn number_wants_more(input: &[u8], offset: usize) -> bool {
    let prev = offset.checked_sub(1).map(|i| input[i]);
    match input[offset] {
        b'.' | b'e' | b'E' => prev.is_some_and(|b| b.is_ascii_digit()),
        b'+' => matches!(prev, Some(b'e' | b'E')),
        b'-' => match prev {
            Some(b'e' | b'E') | None => true,
            Some(b) => !(b.is_ascii_digit() || matches!(b, b'.' | b'+' | b'-')),
        },
        _ => false,
    }
}

/// Tracks string and container nesting over a byte prefix.
#[derive(Default)]
struct Scanner {
    open: Vec<u8>,
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    /// Feed one byte; true if it sits inside a string literal.
    fn feed(&mut self, b: u8) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
            }
            return true;
        }
        match b {
            b'"' => self.in_string = true,
            b'[' | b'{' => self.open.push(b),
            b']' | b'}' => {
                self.open.pop();
            }
            _ => {}
        }
        false
    }
}

fn after_value(input: &[u8], offset: usize) -> TokenContext {
    let mut scanner = Scanner::default();
    for &b in &input[..offset] {
        scanner.feed(b);
    }
    match scanner.open.last() {
        Some(b'[') => TokenContext::AfterArrayElement,
        Some(_) => TokenContext::AfterObjectValue,
        None => TokenContext::AfterTopLevelValue,
    }
}

fn control_character(input: &[u8]) -> Option<usize> {
    let mut scanner = Scanner::default();
    input
        .iter()
        .position(|&b| scanner.feed(b) && b < 0x20)
}

fn strip_position(err: &serde_json::Error) -> String {
    let full = err.to_string();
    let suffix = format!(" at line {} column {}", err.line(), err.column());
    match full.strip_suffix(&suffix) {
        Some(message) => message.to_string(),
        None => full,
    }
}

// serde_json reports 1-based byte columns pointing at the offending byte;
// column 0 is the newline that ends the previous line.
fn byte_offset(input: &[u8], line: usize, column: usize) -> Option<usize> {
    if line == 0 {
        return None;
    }
    let line_start = if line == 1 {
        0
    } else {
        input
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .nth(line - 2)
            .map(|(i, _)| i + 1)?
    };
    let offset = (line_start + column).checked_sub(1)?;
    (offset < input.len()).then_some(offset)
}

fn position(input: &[u8], offset: usize) -> (usize, usize) {
    let before = &input[..offset];
    let line = 1 + before.iter().filter(|b| **b == b'\n').count();
    let line_start = before.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    (line, offset - line_start + 1)
}

fn char_at(input: &[u8], offset: usize) -> Option<char> {
    let end = (offset + 4).min(input.len());
    String::from_utf8_lossy(&input[offset..end]).chars().next()
}

fn quote_char(c: char) -> String {
    match c {
        '\'' => r"'\''".to_string(),
        '"' => "'\"'".to_string(),
        '\\' => r"'\\'".to_string(),
        '\u{7}' => r"'\a'".to_string(),
        '\u{8}' => r"'\b'".to_string(),
        '\u{c}' => r"'\f'".to_string(),
        '\n' => r"'\n'".to_string(),
        '\r' => r"'\r'".to_string(),
        '\t' => r"'\t'".to_string(),
        '\u{b}' => r"'\v'".to_string(),
        c if c.is_control() && (c as u32) < 0x80 => format!(r"'\x{:02x}'", c as u32),
        c if c.is_control() => format!(r"'\u{:04x}'", c as u32),
        c => format!("'{c}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dots_report_beginning_of_value() {
        let err = decode_template(b"...").unwrap_err();
        assert_eq!(err.to_string(), "invalid character '.' looking for beginning of value");
        assert_eq!(err.offset, Some(0));
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn test_offset_points_into_later_lines() {
        let err = decode_template(b"{\n  \"lang\": \"en\"\n  x}").unwrap_err();
        assert_eq!(err.to_string(), "invalid character 'x' after object key:value pair");
        assert_eq!(err.line, 3);
        assert_eq!(err.offset, Some(19));
    }

    #[test]
    fn test_trailing_garbage() {
        let err = decode_template(b"{} !").unwrap_err();
        assert_eq!(err.to_string(), "invalid character '!' after top-level value");
    }

    #[test]
    fn test_unquoted_key() {
        let err = decode_template(b"{lang: 1}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid character 'l' looking for beginning of object key string"
        );
    }

    #[test]
    fn test_empty_input_is_unexpected_end() {
        let err = decode_template(b"").unwrap_err();
        assert_eq!(err.diagnostic, Diagnostic::UnexpectedEnd);
        assert_eq!(err.to_string(), "unexpected end of JSON input");

        let err = decode_template(b"{\"lang\": ").unwrap_err();
        assert_eq!(err.diagnostic, Diagnostic::UnexpectedEnd);
    }

    #[test]
    fn test_type_mismatch_is_data_error() {
        let err = decode_template(br#"{"lang": 7}"#).unwrap_err();
        assert!(matches!(err.diagnostic, Diagnostic::Data(_)));
        assert!(!err.to_string().contains("at line"));
    }

    #[test]
    fn test_bad_base64_fails_decoding() {
        let json = br#"{"triples": {"reference-values": [{"environment": {"class": {"id": {"type": "psa.impl-id", "value": "%%%"}}}}]}}"#;
        let err = decode_template(json).unwrap_err();
        assert!(err.to_string().contains("illegal base64 data"));
    }

    #[test]
    fn test_structureless_object_decodes() {
        let comid = decode_template(b"{}").unwrap();
        assert_eq!(comid, Comid::default());

        let comid = decode_template(br#"{"unrelated": [1, 2, 3]}"#).unwrap();
        assert_eq!(comid, Comid::default());
    }

    #[test]
    fn test_psa_template_decodes() {
        let comid = decode_template(include_bytes!("../tests/fixtures/psa-refval.json")).unwrap();
        assert_eq!(comid.lang.as_deref(), Some("en-GB"));
        let refvals = comid.triples.reference_values.as_ref().unwrap();
        assert_eq!(refvals.len(), 1);
        assert_eq!(refvals[0].measurements.len(), 3);
    }

    fn message(input: &[u8]) -> String {
        decode_template(input).unwrap_err().to_string()
    }

    #[test]
    fn test_syntax_error_wins_over_earlier_type_mismatch() {
        let err = decode_template(br#"{"lang": 7, "x": ]}"#).unwrap_err();
        assert_eq!(err.to_string(), "invalid character ']' looking for beginning of value");
        assert_eq!(err.offset, Some(17));

        assert_eq!(
            message(br#"{"tag-identity": {"id": 1}} garbage"#),
            "invalid character 'g' after top-level value"
        );
    }

    #[test]
    fn test_trailing_commas() {
        assert_eq!(
            message(br#"{"a":1,}"#),
            "invalid character '}' looking for beginning of object key string"
        );
        assert_eq!(message(b"[1,]"), "invalid character ']' looking for beginning of value");
    }

    #[test]
    fn test_malformed_numbers() {
        let err = decode_template(b"1.x").unwrap_err();
        assert_eq!(err.to_string(), "invalid character 'x' after decimal point in numeric literal");
        assert_eq!(err.offset, Some(2));

        assert_eq!(message(b"01"), "invalid character '1' after top-level value");
        assert_eq!(message(br#"{"a": 01}"#), "invalid character '1' after object key:value pair");
        assert_eq!(message(b"[01]"), "invalid character '1' after array element");
        assert_eq!(message(b"-x"), "invalid character 'x' in numeric literal");
        assert_eq!(message(b"1ex"), "invalid character 'x' in exponent of numeric literal");
    }

    #[test]
    fn test_number_cut_off_by_end_of_input() {
        assert_eq!(message(b"1."), "unexpected end of JSON input");
        assert_eq!(message(b"[1e"), "unexpected end of JSON input");
    }

    #[test]
    fn test_control_character_in_string() {
        let err = decode_template(b"\"ab\x01\"").unwrap_err();
        assert_eq!(err.to_string(), r"invalid character '\x01' in string literal");
        assert_eq!(err.offset, Some(3));
        assert_eq!((err.line, err.column), (1, 4));
    }

    #[test]
    fn test_bad_escape() {
        assert_eq!(
            message(br#"{"lang": "a\qb"}"#),
            "invalid character 'q' in string escape code"
        );
    }

    #[test]
    fn test_broken_literal_names_expected_character() {
        let err = decode_template(b"trux").unwrap_err();
        assert_eq!(err.to_string(), "invalid character 'x' in literal true (expecting 'e')");
        assert_eq!(err.offset, Some(3));

        assert_eq!(
            message(br#"{"lang": nul}"#),
            "invalid character '}' in literal null (expecting 'l')"
        );
    }

    #[test]
    fn test_quote_char() {
        assert_eq!(quote_char('.'), "'.'");
        assert_eq!(quote_char('\''), r"'\''");
        assert_eq!(quote_char('\u{1}'), r"'\x01'");
        assert_eq!(quote_char('\n'), r"'\n'");
        assert_eq!(quote_char('\\'), r"'\\'");
    }
}
