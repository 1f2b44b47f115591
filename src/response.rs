// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! HTTP responses.

use crate::connection::UpgradedSocket;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::headers::{Header, Headers};
use crate::message::{Attributes, Message};

/// The first line of a response: version, status code, reason phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    version: (u8, u8),
    code: u16,
    reason: String,
}

impl StatusLine {
    /// Builds a status line. Codes outside `100..=599` are rejected. An
    /// empty reason falls back to the registered phrase.
    pub fn new(version: (u8, u8), code: u16, reason: &str) -> Result<StatusLine> {
        if !(100..=599).contains(&code) {
            return Err(Error::MalformedStartLine(format!("bad status code: {}", code)));
        }
        let reason = if reason.is_empty() {
            reason_phrase(code).to_owned()
        } else {
            reason.to_owned()
        };
        Ok(StatusLine {
            version,
            code,
            reason,
        })
    }

    #[inline]
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    #[inline]
    pub fn code(&self) -> u16 {
        self.code
    }

    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Hands the connection to new ownership after a `101 Switching Protocols`
/// response is written. The pipeline disables its close-guard first; the
/// receiver owns the socket from then on.
pub trait Upgrade: Send {
    fn claim(self: Box<Self>, socket: UpgradedSocket);
}

impl<F> Upgrade for F
where
    F: FnOnce(UpgradedSocket) + Send,
{
    fn claim(self: Box<Self>, socket: UpgradedSocket) {
        (*self)(socket)
    }
}

/// An immutable HTTP response.
///
/// # Example
///
/// ```
/// use scamper::HttpResponse;
///
/// let response = HttpResponse::text("hello world");
/// assert_eq!(response.code(), 200);
/// ```
pub struct HttpResponse {
    line: StatusLine,
    headers: Headers,
    entity: Entity,
    attributes: Attributes,
    upgrade: Option<Box<dyn Upgrade>>,
}

impl HttpResponse {
    pub fn new(line: StatusLine) -> HttpResponse {
        HttpResponse {
            line,
            headers: Headers::new(),
            entity: Entity::empty(),
            attributes: Attributes::new(),
            upgrade: None,
        }
    }

    /// An empty response with the given status code and its registered
    /// reason phrase.
    pub fn empty(code: u16) -> HttpResponse {
        let line = match StatusLine::new((1, 1), code, "") {
            Ok(line) => line,
            Err(e) => panic!("bad literal status code: {}", e),
        };
        HttpResponse::new(line)
    }

    /// A `200` response carrying plain text.
    pub fn text<S>(text: S) -> HttpResponse
    where
        S: Into<String>,
    {
        HttpResponse::empty(200)
            .with_set_header(Header::known("Content-Type", "text/plain; charset=utf-8"))
            .with_entity(Entity::from_string(text))
    }

    /// A `200` response carrying HTML.
    pub fn html<S>(text: S) -> HttpResponse
    where
        S: Into<String>,
    {
        HttpResponse::empty(200)
            .with_set_header(Header::known("Content-Type", "text/html; charset=utf-8"))
            .with_entity(Entity::from_string(text))
    }

    /// A redirect with the given 3xx code and `Location`.
    ///
    /// When unsure which code to pick, `303 See Other` is the safe choice.
    pub fn redirect(code: u16, location: &str) -> Result<HttpResponse> {
        if !(300..400).contains(&code) {
            return Err(Error::MalformedStartLine(format!("not a redirect code: {}", code)));
        }
        Ok(HttpResponse::empty(code).with_set_header(Header::new("Location", location)?))
    }

    #[inline]
    pub fn line(&self) -> &StatusLine {
        &self.line
    }

    #[inline]
    pub fn code(&self) -> u16 {
        self.line.code()
    }

    #[inline]
    pub fn reason(&self) -> &str {
        self.line.reason()
    }

    /// True for status codes in `100..200`.
    #[inline]
    pub fn is_interim(&self) -> bool {
        self.code() < 200
    }

    /// True for status codes in `200..400`.
    #[inline]
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.code())
    }

    pub fn with_status(self, code: u16) -> Result<HttpResponse> {
        let line = StatusLine::new(self.line.version, code, "")?;
        Ok(HttpResponse { line, ..self })
    }

    #[inline]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn with_attributes(self, attributes: Attributes) -> HttpResponse {
        HttpResponse { attributes, ..self }
    }

    pub(crate) fn map_attributes<F>(self, f: F) -> HttpResponse
    where
        F: FnOnce(&mut Attributes),
    {
        let mut attributes = self.attributes.clone();
        f(&mut attributes);
        HttpResponse { attributes, ..self }
    }

    /// Attaches an upgrade hook. After this response is written, the server
    /// pipeline transfers the socket to the hook instead of continuing the
    /// keep-alive loop.
    pub fn with_upgrade<U>(self, upgrade: U) -> HttpResponse
    where
        U: Upgrade + 'static,
    {
        HttpResponse {
            upgrade: Some(Box::new(upgrade)),
            ..self
        }
    }

    #[inline]
    pub fn has_upgrade(&self) -> bool {
        self.upgrade.is_some()
    }

    pub(crate) fn take_upgrade(&mut self) -> Option<Box<dyn Upgrade>> {
        self.upgrade.take()
    }
}

impl Message for HttpResponse {
    #[inline]
    fn version(&self) -> (u8, u8) {
        self.line.version()
    }

    #[inline]
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn with_headers(self, headers: Headers) -> HttpResponse {
        HttpResponse { headers, ..self }
    }

    #[inline]
    fn entity(&self) -> &Entity {
        &self.entity
    }

    fn with_entity(self, entity: Entity) -> HttpResponse {
        HttpResponse { entity, ..self }
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("line", &self.line)
            .field("headers", &self.headers)
            .field("entity", &self.entity)
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

/// The registered phrase for a status code, or `"Unknown"`.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_bounds() {
        assert!(StatusLine::new((1, 1), 99, "").is_err());
        assert!(StatusLine::new((1, 1), 600, "").is_err());
        assert_eq!(StatusLine::new((1, 1), 404, "").unwrap().reason(), "Not Found");
    }

    #[test]
    fn text_constructor() {
        let response = HttpResponse::text("hi");
        assert_eq!(response.code(), 200);
        assert_eq!(response.header("Content-Type"), Some("text/plain; charset=utf-8"));
        assert_eq!(response.entity().known_size(), Some(2));
    }

    #[test]
    fn redirect_validation() {
        assert!(HttpResponse::redirect(303, "/index").is_ok());
        assert!(HttpResponse::redirect(200, "/index").is_err());
    }
}
