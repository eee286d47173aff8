// src/control.rs

//! Debian control-format reader and writer
//!
//! The dpkg status database and the `control` member of a `.deb` share one
//! textual convention: stanzas separated by blank lines, each stanza a run of
//! `Field: value` lines where lines starting with whitespace continue the
//! previous field.
//!
//! Values are stored as follows so that [`write_stanza`] followed by
//! [`parse_stanzas`] reproduces them exactly:
//! - the text after the colon is trimmed on both sides
//! - each continuation line is appended after a `\n`, keeping its leading
//!   whitespace and dropping trailing whitespace

use crate::error::ParseError;
use indexmap::IndexMap;
use tracing::debug;

/// Ordered field mapping of one stanza
pub type Fields = IndexMap<String, String>;

/// One stanza together with the line it started on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    /// 1-based line number of the first field
    pub line: usize,
    pub fields: Fields,
}

impl Stanza {
    /// Case-insensitive field lookup, as field names in control files are
    pub fn get(&self, name: &str) -> Option<&str> {
        lookup(&self.fields, name)
    }
}

/// Case-insensitive lookup that prefers an exact key match
pub fn lookup<'a>(fields: &'a Fields, name: &str) -> Option<&'a str> {
    if let Some(value) = fields.get(name) {
        return Some(value.as_str());
    }

    fields
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Split control-format text into stanzas
///
/// Fails when the input holds no stanza at all, when a stanza lacks a
/// `Package` field, when a continuation line precedes every field, or when a
/// line is neither blank, a continuation nor a `Field: value` pair. Unknown
/// fields are kept verbatim and in their original order.
pub fn parse_stanzas(input: &[u8]) -> Result<Vec<Stanza>, ParseError> {
    let mut stanzas = Vec::new();
    let mut current: Option<Stanza> = None;
    let mut last_field: Option<String> = None;

    for (index, raw_line) in input.split(|byte| *byte == b'\n').enumerate() {
        let line_no = index + 1;
        let raw_line = raw_line.strip_suffix(b"\r").unwrap_or(raw_line);
        let line = std::str::from_utf8(raw_line)
            .map_err(|_| ParseError::InvalidUtf8 { line: line_no })?;

        if line.trim().is_empty() {
            if let Some(stanza) = current.take() {
                stanzas.push(finish_stanza(stanza, stanzas.len() + 1)?);
            }
            last_field = None;
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let (stanza, field) = match (current.as_mut(), last_field.as_ref()) {
                (Some(stanza), Some(field)) => (stanza, field),
                _ => return Err(ParseError::OrphanContinuation { line: line_no }),
            };
            // Field was inserted when `last_field` was set
            if let Some(value) = stanza.fields.get_mut(field) {
                value.push('\n');
                value.push_str(line.trim_end());
            }
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::MalformedLine { line: line_no })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::MalformedLine { line: line_no });
        }

        let stanza = current.get_or_insert_with(|| Stanza {
            line: line_no,
            fields: Fields::new(),
        });

        if stanza.get(key).is_some() {
            return Err(ParseError::DuplicateField {
                field: key.to_string(),
                line: line_no,
            });
        }

        stanza.fields.insert(key.to_string(), value.trim().to_string());
        last_field = Some(key.to_string());
    }

    if let Some(stanza) = current.take() {
        stanzas.push(finish_stanza(stanza, stanzas.len() + 1)?);
    }

    if stanzas.is_empty() {
        return Err(ParseError::Empty);
    }

    debug!("Parsed {} stanzas", stanzas.len());
    Ok(stanzas)
}

fn finish_stanza(stanza: Stanza, ordinal: usize) -> Result<Stanza, ParseError> {
    match stanza.get("Package") {
        Some(package) if !package.is_empty() => Ok(stanza),
        _ => Err(ParseError::MissingPackage {
            stanza: ordinal,
            line: stanza.line,
        }),
    }
}

/// Serialize one stanza in control format, fields in mapping order
///
/// The output ends with a single newline and contains no blank line, so it
/// can be used directly as the `control` member of a package.
pub fn write_stanza(fields: &Fields) -> String {
    let capacity = fields
        .iter()
        .fold(0, |sum, (key, value)| sum + key.len() + value.len() + 3);
    let mut out = String::with_capacity(capacity);

    for (key, value) in fields {
        out.push_str(key);
        out.push(':');

        let mut lines = value.split('\n');
        if let Some(first) = lines.next()
            && !first.is_empty()
        {
            out.push(' ');
            out.push_str(first);
        }

        for line in lines {
            out.push('\n');
            // Parsed values always keep their indentation; anything else
            // would terminate the field when read back
            if !line.starts_with(' ') && !line.starts_with('\t') {
                out.push(' ');
            }
            out.push_str(line);
        }

        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_stanzas() {
        let input = b"Package: a\nDepends: b (>= 1.0), c | d\n\nPackage: b\nVersion: 2\n";
        let stanzas = parse_stanzas(input).unwrap();

        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[0].get("Package"), Some("a"));
        assert_eq!(stanzas[0].get("Depends"), Some("b (>= 1.0), c | d"));
        assert_eq!(stanzas[1].line, 4);
        assert_eq!(stanzas[1].get("version"), Some("2"));
    }

    #[test]
    fn test_multiline_values_keep_indentation() {
        let input = b"Package: valid-package-1\nDescription: First Line\n Second Line\n  Third Line   \nVersion: 1\n";
        let stanzas = parse_stanzas(input).unwrap();

        assert_eq!(
            stanzas[0].get("Description"),
            Some("First Line\n Second Line\n  Third Line")
        );
        assert_eq!(stanzas[0].get("Version"), Some("1"));
    }

    #[test]
    fn test_field_order_and_unknown_fields_preserved() {
        let input = b"Zeta: 1\nPackage: p\nX-Custom-Thing: hello\nAlpha: 2\n";
        let stanzas = parse_stanzas(input).unwrap();
        let keys: Vec<_> = stanzas[0].fields.keys().map(String::as_str).collect();

        assert_eq!(keys, ["Zeta", "Package", "X-Custom-Thing", "Alpha"]);
    }

    #[test]
    fn test_crlf_and_extra_blank_lines() {
        let input = b"\r\n\r\nPackage: a\r\nVersion: 1\r\n\r\n\r\n \r\nPackage: b\r\n";
        let stanzas = parse_stanzas(input).unwrap();

        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[0].get("Version"), Some("1"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_stanzas(b""), Err(ParseError::Empty));
        assert_eq!(parse_stanzas(b"\n\n  \n"), Err(ParseError::Empty));
        assert_eq!(
            parse_stanzas(b" leading continuation\nPackage: a\n"),
            Err(ParseError::OrphanContinuation { line: 1 })
        );
        assert_eq!(
            parse_stanzas(b"Package: a\n\nVersion: 1\n"),
            Err(ParseError::MissingPackage { stanza: 2, line: 3 })
        );
        assert_eq!(
            parse_stanzas(b"Package: a\nno colon here\n"),
            Err(ParseError::MalformedLine { line: 2 })
        );
        assert_eq!(
            parse_stanzas(b"Package: a\npackage: b\n"),
            Err(ParseError::DuplicateField {
                field: "package".to_string(),
                line: 2
            })
        );
        assert_eq!(
            parse_stanzas(b"Package: a\nDescription: \xff\n"),
            Err(ParseError::InvalidUtf8 { line: 2 })
        );
    }

    #[test]
    fn test_empty_package_value_is_missing() {
        assert!(matches!(
            parse_stanzas(b"Package:\nVersion: 1\n"),
            Err(ParseError::MissingPackage { .. })
        ));
    }

    #[test]
    fn test_write_then_parse_is_identity() {
        let input = b"Package: tweak\nVersion: 1:2.0-3\nEmpty:\nDescription: Short\n Long line one\n .\n  indented\nConffiles:\n /etc/tweak.conf 0123abcd\n";
        let original = parse_stanzas(input).unwrap().remove(0);

        let written = write_stanza(&original.fields);
        let reparsed = parse_stanzas(written.as_bytes()).unwrap().remove(0);

        assert_eq!(reparsed.fields, original.fields);
        assert!(written.starts_with("Package: tweak\n"));
        assert!(written.contains("Empty:\n"));
        assert!(written.contains("Conffiles:\n /etc/tweak.conf 0123abcd\n"));
        assert!(written.ends_with('\n') && !written.ends_with("\n\n"));
    }
}
