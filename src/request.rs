// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! HTTP requests.

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::headers::{is_token, Header, Headers};
use crate::message::{Attributes, Message};
use crate::uri::{QueryString, Target};

/// The first line of a request: method, target and HTTP version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: String,
    target: Target,
    version: (u8, u8),
}

impl RequestLine {
    /// Builds a request line, validating the method against the token
    /// grammar.
    pub fn new<M>(method: M, target: Target, version: (u8, u8)) -> Result<RequestLine>
    where
        M: Into<String>,
    {
        let method = method.into();
        if !is_token(&method) {
            return Err(Error::MalformedStartLine(format!("bad method: {}", method)));
        }
        Ok(RequestLine {
            method,
            target,
            version,
        })
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[inline]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[inline]
    pub fn version(&self) -> (u8, u8) {
        self.version
    }
}

/// An immutable HTTP request.
///
/// Builders consume the request and return a new one; unchanged fields are
/// shared.
///
/// # Example
///
/// ```
/// use scamper::{HttpRequest, Message};
///
/// let request = HttpRequest::get("http://localhost:8080/motd").unwrap()
///     .with_header(scamper::Header::known("Accept", "text/plain"));
/// assert_eq!(request.method(), "GET");
/// ```
#[derive(Debug, Clone)]
pub struct HttpRequest {
    line: RequestLine,
    headers: Headers,
    entity: Entity,
    attributes: Attributes,
}

impl HttpRequest {
    pub fn new(line: RequestLine) -> HttpRequest {
        HttpRequest {
            line,
            headers: Headers::new(),
            entity: Entity::empty(),
            attributes: Attributes::new(),
        }
    }

    /// A GET request for the given target (absolute or origin-form).
    pub fn get(target: &str) -> Result<HttpRequest> {
        HttpRequest::with_method_and_target("GET", target)
    }

    /// A POST request for the given target.
    pub fn post(target: &str) -> Result<HttpRequest> {
        HttpRequest::with_method_and_target("POST", target)
    }

    /// A PUT request for the given target.
    pub fn put(target: &str) -> Result<HttpRequest> {
        HttpRequest::with_method_and_target("PUT", target)
    }

    /// A DELETE request for the given target.
    pub fn delete(target: &str) -> Result<HttpRequest> {
        HttpRequest::with_method_and_target("DELETE", target)
    }

    fn with_method_and_target(method: &str, target: &str) -> Result<HttpRequest> {
        let line = RequestLine::new(method, Target::parse(target)?, (1, 1))?;
        Ok(HttpRequest::new(line))
    }

    #[inline]
    pub fn line(&self) -> &RequestLine {
        &self.line
    }

    #[inline]
    pub fn method(&self) -> &str {
        self.line.method()
    }

    #[inline]
    pub fn target(&self) -> &Target {
        self.line.target()
    }

    /// The path component of the target.
    #[inline]
    pub fn path(&self) -> &str {
        self.line.target().path()
    }

    /// The raw query component, if any.
    #[inline]
    pub fn query(&self) -> Option<&str> {
        self.line.target().query()
    }

    /// The parsed query multimap.
    pub fn query_string(&self) -> QueryString {
        self.line.target().query_string()
    }

    pub fn with_method<M>(self, method: M) -> Result<HttpRequest>
    where
        M: Into<String>,
    {
        let line = RequestLine::new(method, self.line.target.clone(), self.line.version)?;
        Ok(HttpRequest { line, ..self })
    }

    pub fn with_target(self, target: Target) -> HttpRequest {
        let line = RequestLine {
            target,
            ..self.line
        };
        HttpRequest { line, ..self }
    }

    #[inline]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn with_attributes(self, attributes: Attributes) -> HttpRequest {
        HttpRequest { attributes, ..self }
    }

    pub(crate) fn map_attributes<F>(self, f: F) -> HttpRequest
    where
        F: FnOnce(&mut Attributes),
    {
        let mut attributes = self.attributes.clone();
        f(&mut attributes);
        HttpRequest { attributes, ..self }
    }

    /// The decoded value of a path parameter captured by the router.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.attributes
            .path_params()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// A path parameter converted to an integer.
    ///
    /// A missing parameter or one that does not parse surfaces
    /// [`Error::ParameterNotConvertible`]; servers usually recover that as a
    /// `400` through an error handler.
    pub fn path_param_int(&self, name: &str) -> Result<i64> {
        self.path_param(name)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::ParameterNotConvertible { name: name.to_owned() })
    }

    /// A path parameter as an owned string, or `ParameterNotConvertible` if
    /// the router captured no such name.
    pub fn path_param_string(&self, name: &str) -> Result<String> {
        self.path_param(name)
            .map(str::to_owned)
            .ok_or_else(|| Error::ParameterNotConvertible { name: name.to_owned() })
    }

    /// Builds a request out of thin air for tests: no socket, no codec.
    ///
    /// # Example
    ///
    /// ```
    /// use scamper::HttpRequest;
    ///
    /// let request = HttpRequest::fake("GET", "/motd", &[("Host", "localhost")], b"");
    /// assert_eq!(request.path(), "/motd");
    /// ```
    pub fn fake(method: &str, target: &str, headers: &[(&str, &str)], body: &[u8]) -> HttpRequest {
        let line = match RequestLine::new(method, Target::parse(target).unwrap(), (1, 1)) {
            Ok(line) => line,
            Err(e) => panic!("bad fake request line: {}", e),
        };
        let mut list = Headers::new();
        for (name, value) in headers {
            list = list.with_added(Header::known(*name, *value));
        }
        let entity = if body.is_empty() {
            Entity::empty()
        } else {
            Entity::from_bytes(body.to_vec())
        };
        HttpRequest {
            line,
            headers: list,
            entity,
            attributes: Attributes::new(),
        }
    }
}

impl Message for HttpRequest {
    #[inline]
    fn version(&self) -> (u8, u8) {
        self.line.version()
    }

    #[inline]
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn with_headers(self, headers: Headers) -> HttpRequest {
        HttpRequest { headers, ..self }
    }

    #[inline]
    fn entity(&self) -> &Entity {
        &self.entity
    }

    fn with_entity(self, entity: Entity) -> HttpRequest {
        HttpRequest { entity, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_share_unchanged_fields() {
        let request = HttpRequest::get("/a").unwrap().with_header(Header::known("X-A", "1"));
        let modified = request.clone().with_target(Target::parse("/b").unwrap());
        assert_eq!(request.path(), "/a");
        assert_eq!(modified.path(), "/b");
        assert_eq!(modified.header("X-A"), Some("1"));
    }

    #[test]
    fn method_must_be_token() {
        assert!(RequestLine::new("GE T", Target::Asterisk, (1, 1)).is_err());
    }

    #[test]
    fn path_param_accessors() {
        let request = HttpRequest::fake("GET", "/messages/7", &[], b"").map_attributes(|a| {
            a.set_path_params(vec![("id".into(), "7".into()), ("tag".into(), "x".into())])
        });

        assert_eq!(request.path_param("id"), Some("7"));
        assert_eq!(request.path_param_int("id").unwrap(), 7);
        assert!(matches!(
            request.path_param_int("tag"),
            Err(Error::ParameterNotConvertible { .. })
        ));
        assert!(request.path_param_int("missing").is_err());
    }
}
