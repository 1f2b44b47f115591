// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Content encoding of responses.
//!
//! Analyzes the request's `Accept-Encoding` and, when gzip or deflate is
//! acceptable, encodes the response body and stamps `Content-Encoding`.
//!
//! If the response already carries a `Content-Encoding` header, this is a
//! no-op. If the `Content-Type` is not textual content, this is a no-op.

use std::io::Write;

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use crate::entity::Entity;
use crate::error::Result;
use crate::headers::Header;
use crate::message::Message;
use crate::request::HttpRequest;
use crate::response::HttpResponse;

// Encoded bodies are buffered; anything bigger passes through untouched.
const ENCODE_LIMIT: u64 = 8 * 1024 * 1024;

/// Applies content encoding to `response` based on `request`.
///
/// # Example
///
/// ```
/// use scamper::content_encoding;
/// use scamper::{HttpRequest, HttpResponse};
///
/// let request = HttpRequest::fake("GET", "/", &[("Accept-Encoding", "gzip")], b"");
/// let response = content_encoding::apply(&request, HttpResponse::text("hello world")).unwrap();
/// ```
pub fn apply(request: &HttpRequest, response: HttpResponse) -> Result<HttpResponse> {
    // Only text is worth encoding.
    if !response_is_text(&response) {
        return Ok(response);
    }

    if response.has_header("Content-Encoding") {
        return Ok(response);
    }

    // The list is ordered from most to least desired.
    for encoding in accepted_content_encodings(request) {
        if encoding.eq_ignore_ascii_case("gzip") {
            return encode(response, "gzip");
        }
        if encoding.eq_ignore_ascii_case("deflate") {
            return encode(response, "deflate");
        }
        // The identity encoding is always supported.
        if encoding.eq_ignore_ascii_case("identity") {
            return Ok(response);
        }
    }

    Ok(response)
}

/// A response filter applying [`apply`] using the request snapshot carried
/// in the response's attributes. Register it with the server's outgoing
/// chain.
pub fn filter(response: HttpResponse) -> Result<HttpResponse> {
    match response.attributes().request().cloned() {
        Some(request) => apply(&request, response),
        None => Ok(response),
    }
}

/// The content encodings the request accepts, most desired first.
pub fn accepted_content_encodings(request: &HttpRequest) -> Vec<String> {
    request
        .header("Accept-Encoding")
        .unwrap_or("")
        .split(',')
        .map(|piece| piece.split(';').next().unwrap_or("").trim().to_owned())
        .filter(|piece| !piece.is_empty())
        .collect()
}

// Encoding is an optimisation; occasional false negatives here are fine.
fn response_is_text(response: &HttpResponse) -> bool {
    match response.header("Content-Type") {
        Some(value) => {
            let value = value.to_ascii_lowercase();
            value.starts_with("text/")
                || value.contains("javascript")
                || value.contains("json")
                || value.contains("xml")
                || value.contains("font")
        }
        None => false,
    }
}

fn encode(response: HttpResponse, coding: &'static str) -> Result<HttpResponse> {
    let plain = match response.entity().known_size() {
        Some(size) if size <= ENCODE_LIMIT => response.entity().read_to_bytes(ENCODE_LIMIT)?,
        // Unknown or oversized bodies pass through unencoded.
        _ => return Ok(response),
    };

    let encoded = match coding {
        "gzip" => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&plain)?;
            encoder.finish()?
        }
        _ => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&plain)?;
            encoder.finish()?
        }
    };

    Ok(response
        .with_set_header(Header::known("Content-Encoding", coding))
        .without_header("Content-Length")
        .with_entity(Entity::from_bytes(encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn no_request_encodings() {
        let request = HttpRequest::fake("GET", "/", &[], b"");
        assert_eq!(accepted_content_encodings(&request).len(), 0);
    }

    #[test]
    fn empty_request_encodings() {
        let request = HttpRequest::fake("GET", "/", &[("Accept-Encoding", "")], b"");
        assert_eq!(accepted_content_encodings(&request).len(), 0);
    }

    #[test]
    fn multi_request_encodings() {
        let request =
            HttpRequest::fake("GET", "/", &[("Accept-Encoding", "gzip, deflate;q=0.5")], b"");
        assert_eq!(accepted_content_encodings(&request), vec!["gzip", "deflate"]);
    }

    #[test]
    fn gzip_round_trips() {
        let request = HttpRequest::fake("GET", "/", &[("Accept-Encoding", "gzip")], b"");
        let response = apply(&request, HttpResponse::text("hello hello hello")).unwrap();
        assert_eq!(response.header("Content-Encoding"), Some("gzip"));

        let compressed = response.entity().read_to_bytes(1 << 20).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut plain = String::new();
        decoder.read_to_string(&mut plain).unwrap();
        assert_eq!(plain, "hello hello hello");
    }

    #[test]
    fn non_text_passes_through() {
        let request = HttpRequest::fake("GET", "/", &[("Accept-Encoding", "gzip")], b"");
        let response = HttpResponse::empty(200)
            .with_set_header(Header::known("Content-Type", "image/png"))
            .with_entity(Entity::from_bytes(vec![1, 2, 3]));
        let response = apply(&request, response).unwrap();
        assert!(!response.has_header("Content-Encoding"));
    }

    #[test]
    fn existing_encoding_wins() {
        let request = HttpRequest::fake("GET", "/", &[("Accept-Encoding", "gzip")], b"");
        let response = HttpResponse::text("x")
            .with_set_header(Header::known("Content-Encoding", "br"));
        let response = apply(&request, response).unwrap();
        assert_eq!(response.header("Content-Encoding"), Some("br"));
    }

    #[test]
    fn identity_first_disables_encoding() {
        let request =
            HttpRequest::fake("GET", "/", &[("Accept-Encoding", "identity, gzip")], b"");
        let response = apply(&request, HttpResponse::text("hello")).unwrap();
        assert!(!response.has_header("Content-Encoding"));
    }
}
