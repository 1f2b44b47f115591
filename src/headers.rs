// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! HTTP header fields.
//!
//! A message carries an ordered list of [`Header`]s. Insertion order is
//! preserved on the wire; lookup is case-insensitive on the name. Duplicate
//! names are allowed: single-value accessors return the first occurrence and
//! multi-value accessors collect all of them.

use crate::error::{Error, Result};

/// A single `name: value` header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    /// Builds a header, validating the name against the HTTP token grammar
    /// and the value as a CR/LF-free printable ASCII field-value.
    pub fn new<N, V>(name: N, value: V) -> Result<Header>
    where
        N: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        let value = value.into();

        if !is_token(&name) {
            return Err(Error::MalformedHeader(name));
        }
        if !is_field_value(&value) {
            return Err(Error::MalformedHeader(format!("{}: {}", name, value)));
        }

        Ok(Header { name, value })
    }

    /// Builds a header from parts already known to be valid, such as
    /// compile-time literals.
    ///
    /// # Panics
    ///
    /// Panics if either part fails validation. Use [`Header::new`] for
    /// runtime input.
    pub fn known<N, V>(name: N, value: V) -> Header
    where
        N: Into<String>,
        V: Into<String>,
    {
        match Header::new(name, value) {
            Ok(h) => h,
            Err(e) => panic!("invalid literal header: {}", e),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// True if this header's name equals `name`, ignoring ASCII case.
    #[inline]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// The ordered header list of a message.
///
/// All mutators return a new list; messages holding one stay value-typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<Header>,
}

impl Headers {
    #[inline]
    pub fn new() -> Headers {
        Headers { fields: Vec::new() }
    }

    pub fn from_fields(fields: Vec<Header>) -> Headers {
        Headers { fields }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates the fields in insertion order.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.fields.iter()
    }

    /// First value carried under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|h| h.is_named(name))
            .map(|h| h.value())
    }

    /// Every value carried under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |h| h.is_named(name))
            .map(|h| h.value())
    }

    /// True if at least one field is named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|h| h.is_named(name))
    }

    /// Splits every value under `name` on commas and trims the pieces.
    ///
    /// This is the view used for token-list headers such as `Connection`,
    /// `Transfer-Encoding` and `Accept-Encoding`.
    pub fn get_tokens(&self, name: &str) -> Vec<String> {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Appends a field, keeping any existing fields with the same name.
    pub fn with_added(mut self, header: Header) -> Headers {
        self.fields.push(header);
        self
    }

    /// Replaces every field named like `header` with this single one.
    ///
    /// The replacement takes the position of the first replaced field, so
    /// header order stays stable under repeated sets.
    pub fn with_set(mut self, header: Header) -> Headers {
        let first = self.fields.iter().position(|h| h.is_named(header.name()));
        match first {
            Some(idx) => {
                self.fields.retain(|h| !h.is_named(header.name()));
                self.fields.insert(idx.min(self.fields.len()), header);
            }
            None => self.fields.push(header),
        }
        self
    }

    /// Drops every field named `name`.
    pub fn with_removed(mut self, name: &str) -> Headers {
        self.fields.retain(|h| !h.is_named(name));
        self
    }

    /// Total serialized size of the fields: `name + ": " + value + CRLF`.
    pub fn wire_len(&self) -> usize {
        self.fields
            .iter()
            .map(|h| h.name().len() + h.value().len() + 4)
            .sum()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

// token = 1*tchar, per the HTTP grammar.
pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_tchar)
}

#[inline]
pub(crate) fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
        | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

// field-value = visible ASCII plus SP and HTAB. CR and LF never appear in a
// stored value; the codec trims OWS on parse.
pub(crate) fn is_field_value(s: &str) -> bool {
    s.bytes().all(|b| b == b'\t' || (0x20..0x7f).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_grammar() {
        assert!(is_token("Content-Length"));
        assert!(is_token("X-Custom_1"));
        assert!(!is_token(""));
        assert!(!is_token("Bad Header"));
        assert!(!is_token("Bad:Header"));
    }

    #[test]
    fn rejects_crlf_values() {
        assert!(Header::new("X-A", "ok value").is_ok());
        assert!(Header::new("X-A", "bad\r\nvalue").is_err());
        assert!(Header::new("X-A", "bad\nvalue").is_err());
    }

    #[test]
    fn lookup_is_case_insensitive_and_ordered() {
        let headers = Headers::new()
            .with_added(Header::known("Accept", "text/html"))
            .with_added(Header::known("Set-Cookie", "a=1"))
            .with_added(Header::known("set-cookie", "b=2"));

        assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));
        let all: Vec<_> = headers.get_all("Set-Cookie").collect();
        assert_eq!(all, vec!["a=1", "b=2"]);
    }

    #[test]
    fn set_replaces_in_place() {
        let headers = Headers::new()
            .with_added(Header::known("A", "1"))
            .with_added(Header::known("B", "2"))
            .with_added(Header::known("a", "3"))
            .with_set(Header::known("A", "9"));

        let names: Vec<_> = headers.iter().map(|h| h.name().to_owned()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(headers.get("a"), Some("9"));
    }

    #[test]
    fn token_list_view() {
        let headers =
            Headers::new().with_added(Header::known("Connection", "keep-alive, TE , upgrade"));
        assert_eq!(headers.get_tokens("connection"), vec!["keep-alive", "TE", "upgrade"]);
    }
}
