// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Typed header accessors.
//!
//! Explicit functions generic over [`Message`]; parsing happens on read,
//! formatting on write, and nothing mutates the header list except the
//! `set_*` / `remove_*` builders. Each header follows the same contract:
//! `has_x`, `get_x -> Option<_>`, `x -> Result<_>` (failing with
//! [`Error::HeaderNotFound`] when absent), `set_x`, `remove_x`.

use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::headers::Header;
use crate::message::Message;

macro_rules! string_header {
    ($(#[$doc:meta])* $header:literal =>
     $has:ident, $get:ident, $req:ident, $set:ident, $remove:ident) => {
        $(#[$doc])*
        pub fn $has<M: Message>(msg: &M) -> bool {
            msg.has_header($header)
        }

        pub fn $get<M: Message>(msg: &M) -> Option<&str> {
            msg.header($header)
        }

        pub fn $req<M: Message>(msg: &M) -> Result<&str> {
            msg.header($header).ok_or(Error::HeaderNotFound($header))
        }

        pub fn $set<M: Message, V: AsRef<str>>(msg: M, value: V) -> Result<M> {
            Ok(msg.with_set_header(Header::new($header, value.as_ref())?))
        }

        pub fn $remove<M: Message>(msg: M) -> M {
            msg.without_header($header)
        }
    };
}

string_header! {
    /// `Content-Type` accessors.
    "Content-Type" => has_content_type, get_content_type, content_type, set_content_type, remove_content_type
}

string_header! {
    /// `Host` accessors.
    "Host" => has_host, get_host, host, set_host, remove_host
}

string_header! {
    /// `Location` accessors.
    "Location" => has_location, get_location, location, set_location, remove_location
}

string_header! {
    /// `User-Agent` accessors.
    "User-Agent" => has_user_agent, get_user_agent, user_agent, set_user_agent, remove_user_agent
}

string_header! {
    /// `Accept` accessors.
    "Accept" => has_accept, get_accept, accept, set_accept, remove_accept
}

string_header! {
    /// `Accept-Encoding` accessors.
    "Accept-Encoding" => has_accept_encoding, get_accept_encoding, accept_encoding, set_accept_encoding, remove_accept_encoding
}

string_header! {
    /// `Upgrade` accessors.
    "Upgrade" => has_upgrade, get_upgrade, upgrade, set_upgrade, remove_upgrade
}

string_header! {
    /// `Expect` accessors.
    "Expect" => has_expect, get_expect, expect, set_expect, remove_expect
}

// Content-Length parses on read; a non-decimal or negative value is a
// malformed header, distinct from an absent one.

pub fn has_content_length<M: Message>(msg: &M) -> bool {
    msg.has_header("Content-Length")
}

pub fn get_content_length<M: Message>(msg: &M) -> Option<u64> {
    msg.header("Content-Length").and_then(parse_content_length)
}

pub fn content_length<M: Message>(msg: &M) -> Result<u64> {
    let raw = msg
        .header("Content-Length")
        .ok_or(Error::HeaderNotFound("Content-Length"))?;
    parse_content_length(raw)
        .ok_or_else(|| Error::MalformedHeader(format!("Content-Length: {}", raw)))
}

pub fn set_content_length<M: Message>(msg: M, len: u64) -> M {
    msg.with_set_header(Header::known("Content-Length", len.to_string()))
}

pub fn remove_content_length<M: Message>(msg: M) -> M {
    msg.without_header("Content-Length")
}

fn parse_content_length(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

// Token-list headers.

/// The comma-separated codings of `Transfer-Encoding`, in order.
pub fn transfer_encoding<M: Message>(msg: &M) -> Vec<String> {
    msg.headers().get_tokens("Transfer-Encoding")
}

/// True if `chunked` is the last transfer coding.
pub fn is_chunked<M: Message>(msg: &M) -> bool {
    transfer_encoding(msg)
        .last()
        .is_some_and(|t| t.eq_ignore_ascii_case("chunked"))
}

pub fn set_transfer_encoding<M: Message>(msg: M, codings: &[&str]) -> M {
    msg.with_set_header(Header::known("Transfer-Encoding", codings.join(", ")))
}

pub fn remove_transfer_encoding<M: Message>(msg: M) -> M {
    msg.without_header("Transfer-Encoding")
}

/// The `Connection` option tokens, in order.
pub fn connection<M: Message>(msg: &M) -> Vec<String> {
    msg.headers().get_tokens("Connection")
}

/// True if the `Connection` header carries `token`, ignoring case.
pub fn connection_has<M: Message>(msg: &M, token: &str) -> bool {
    connection(msg).iter().any(|t| t.eq_ignore_ascii_case(token))
}

pub fn set_connection<M: Message>(msg: M, tokens: &[&str]) -> M {
    msg.with_set_header(Header::known("Connection", tokens.join(", ")))
}

pub fn remove_connection<M: Message>(msg: M) -> M {
    msg.without_header("Connection")
}

// Date formats on write and parses on read via httpdate.

pub fn has_date<M: Message>(msg: &M) -> bool {
    msg.has_header("Date")
}

pub fn get_date<M: Message>(msg: &M) -> Option<SystemTime> {
    msg.header("Date").and_then(|v| httpdate::parse_http_date(v).ok())
}

pub fn date<M: Message>(msg: &M) -> Result<SystemTime> {
    let raw = msg.header("Date").ok_or(Error::HeaderNotFound("Date"))?;
    httpdate::parse_http_date(raw)
        .map_err(|_| Error::MalformedHeader(format!("Date: {}", raw)))
}

pub fn set_date<M: Message>(msg: M, time: SystemTime) -> M {
    msg.with_set_header(Header::known("Date", httpdate::fmt_http_date(time)))
}

pub fn remove_date<M: Message>(msg: M) -> M {
    msg.without_header("Date")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::HttpRequest;

    #[test]
    fn accessor_contract() {
        let request = HttpRequest::fake("GET", "/", &[], b"");
        assert!(!has_content_type(&request));
        assert!(matches!(content_type(&request), Err(Error::HeaderNotFound(_))));

        let request = set_content_type(request, "application/json").unwrap();
        assert_eq!(get_content_type(&request), Some("application/json"));

        let request = remove_content_type(request);
        assert!(get_content_type(&request).is_none());
    }

    #[test]
    fn content_length_parsing() {
        let request = HttpRequest::fake("POST", "/", &[("Content-Length", "42")], b"");
        assert_eq!(get_content_length(&request), Some(42));

        let bad = HttpRequest::fake("POST", "/", &[("Content-Length", "-1")], b"");
        assert_eq!(get_content_length(&bad), None);
        assert!(matches!(content_length(&bad), Err(Error::MalformedHeader(_))));

        let hex = HttpRequest::fake("POST", "/", &[("Content-Length", "0x10")], b"");
        assert_eq!(get_content_length(&hex), None);
    }

    #[test]
    fn chunked_must_be_last() {
        let last = HttpRequest::fake("POST", "/", &[("Transfer-Encoding", "gzip, chunked")], b"");
        assert!(is_chunked(&last));

        let not_last = HttpRequest::fake("POST", "/", &[("Transfer-Encoding", "chunked, gzip")], b"");
        assert!(!is_chunked(&not_last));
    }

    #[test]
    fn connection_tokens() {
        let request = HttpRequest::fake("GET", "/", &[("Connection", "keep-alive, TE")], b"");
        assert!(connection_has(&request, "te"));
        assert!(!connection_has(&request, "close"));
    }

    #[test]
    fn date_round_trip() {
        let now = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let request = set_date(HttpRequest::fake("GET", "/", &[], b""), now);
        assert_eq!(get_date(&request), Some(now));
    }
}
