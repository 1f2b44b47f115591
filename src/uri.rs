// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! URIs, request targets and query strings.
//!
//! Absolute URIs are restricted to the `http`, `https`, `ws` and `wss`
//! schemes; user-info is forbidden and ports must fall in `1..=65535`.
//! Paths are normalized on parse (`.`, `..` and duplicate slashes collapse),
//! so equality is equality of the normalized ASCII form.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::{Error, Result};

/// Schemes an absolute URI may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Ws,
    Wss,
}

impl Scheme {
    pub fn parse(s: &str) -> Result<Scheme> {
        match s {
            s if s.eq_ignore_ascii_case("http") => Ok(Scheme::Http),
            s if s.eq_ignore_ascii_case("https") => Ok(Scheme::Https),
            s if s.eq_ignore_ascii_case("ws") => Ok(Scheme::Ws),
            s if s.eq_ignore_ascii_case("wss") => Ok(Scheme::Wss),
            other => Err(Error::MalformedUri(format!("unsupported scheme: {}", other))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http | Scheme::Ws => 80,
            Scheme::Https | Scheme::Wss => 443,
        }
    }

    /// True for the TLS schemes.
    pub fn is_secure(self) -> bool {
        matches!(self, Scheme::Https | Scheme::Wss)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An absolute URI: scheme, authority, path, optional query and fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

impl Uri {
    /// Parses an absolute URI.
    pub fn parse(input: &str) -> Result<Uri> {
        let (scheme_str, rest) = input
            .split_once("://")
            .ok_or_else(|| Error::MalformedUri(format!("not absolute: {}", input)))?;
        let scheme = Scheme::parse(scheme_str)?;

        let (authority, rest) = match rest.find(|c| c == '/' || c == '?' || c == '#') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        if authority.contains('@') {
            return Err(Error::MalformedUri("user-info is forbidden".into()));
        }
        if authority.is_empty() {
            return Err(Error::MalformedUri(format!("missing host: {}", input)));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
                let port: u32 = p
                    .parse()
                    .map_err(|_| Error::MalformedUri(format!("bad port: {}", p)))?;
                if port == 0 || port > u16::MAX as u32 {
                    return Err(Error::MalformedUri(format!("port out of range: {}", port)));
                }
                (h.to_owned(), Some(port as u16))
            }
            Some(_) => return Err(Error::MalformedUri(format!("bad authority: {}", authority))),
            None => (authority.to_owned(), None),
        };

        if host.is_empty() {
            return Err(Error::MalformedUri(format!("missing host: {}", input)));
        }

        let (path, query, fragment) = split_path_query_fragment(rest)?;

        Ok(Uri {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
            path: normalize_path(&path),
            query,
            fragment,
        })
    }

    /// Builds an absolute URI from parts.
    pub fn build(scheme: Scheme, host: &str, port: Option<u16>, path: &str, query: Option<&str>) -> Result<Uri> {
        if host.is_empty() || host.contains('@') {
            return Err(Error::MalformedUri(format!("bad host: {}", host)));
        }
        if port == Some(0) {
            return Err(Error::MalformedUri("port out of range: 0".into()));
        }
        Ok(Uri {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
            path: normalize_path(path),
            query: query.map(str::to_owned),
            fragment: None,
        })
    }

    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The explicit port, if one appeared in the authority.
    #[inline]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The port actually dialed: explicit or the scheme default.
    #[inline]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// `host[:port]`, omitting the port when it is the scheme default.
    /// This is the value the `Host` header carries.
    pub fn host_header(&self) -> String {
        match self.port {
            Some(p) if p != self.scheme.default_port() => format!("{}:{}", self.host, p),
            _ => self.host.clone(),
        }
    }

    /// Strips scheme, authority and fragment, preserving path and query.
    ///
    /// An empty path becomes `/`; reinterpretation of the empty path as `*`
    /// for OPTIONS happens during client normalization, not here.
    pub fn to_target(&self) -> Target {
        let path = if self.path.is_empty() { "/".to_owned() } else { self.path.clone() };
        Target::Origin {
            path,
            query: self.query.clone(),
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(p) = self.port {
            write!(f, ":{}", p)?;
        }
        if self.path.is_empty() {
            f.write_str("/")?;
        } else {
            f.write_str(&self.path)?;
        }
        if let Some(q) = &self.query {
            write!(f, "?{}", q)?;
        }
        if let Some(frag) = &self.fragment {
            write!(f, "#{}", frag)?;
        }
        Ok(())
    }
}

/// A request target as it appears in a request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `path[?query]`, used on the wire for non-CONNECT requests.
    Origin { path: String, query: Option<String> },
    /// An absolute URI, used by client-side requests before normalization.
    Absolute(Uri),
    /// The literal `*`, for server-wide OPTIONS.
    Asterisk,
}

impl Target {
    /// Parses the target of a request line. No SP or CTL bytes are accepted;
    /// the codec guarantees that before calling.
    pub fn parse(input: &str) -> Result<Target> {
        if input == "*" {
            return Ok(Target::Asterisk);
        }
        if input.contains("://") {
            return Ok(Target::Absolute(Uri::parse(input)?));
        }
        if !input.starts_with('/') {
            return Err(Error::MalformedUri(format!("bad request target: {}", input)));
        }
        let (path, query, _) = split_path_query_fragment(input)?;
        Ok(Target::Origin {
            path: normalize_path(&path),
            query,
        })
    }

    /// The path component. `*` and empty absolute paths read as `/` for
    /// routing purposes; `*` is preserved on the wire by [`Target::fmt`].
    pub fn path(&self) -> &str {
        match self {
            Target::Origin { path, .. } => path,
            Target::Absolute(uri) if !uri.path().is_empty() => uri.path(),
            _ => "/",
        }
    }

    pub fn query(&self) -> Option<&str> {
        match self {
            Target::Origin { query, .. } => query.as_deref(),
            Target::Absolute(uri) => uri.query(),
            Target::Asterisk => None,
        }
    }

    /// The parsed query multimap.
    pub fn query_string(&self) -> QueryString {
        self.query().map(QueryString::parse).unwrap_or_default()
    }

    /// Stamps scheme and authority onto this target, producing an absolute
    /// URI. An `*` target maps to the empty path.
    pub fn to_absolute(&self, scheme: Scheme, host: &str, port: Option<u16>) -> Result<Uri> {
        match self {
            Target::Absolute(uri) => Ok(uri.clone()),
            Target::Origin { path, query } => Uri::build(scheme, host, port, path, query.as_deref()),
            Target::Asterisk => Uri::build(scheme, host, port, "", None),
        }
    }

    /// Rewrites to origin form, dropping scheme/authority. `*` stays `*`.
    pub fn to_origin_form(&self) -> Target {
        match self {
            Target::Absolute(uri) => uri.to_target(),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Origin { path, query } => {
                f.write_str(if path.is_empty() { "/" } else { path })?;
                if let Some(q) = query {
                    write!(f, "?{}", q)?;
                }
                Ok(())
            }
            Target::Absolute(uri) => uri.fmt(f),
            Target::Asterisk => f.write_str("*"),
        }
    }
}

// Bytes escaped when serializing query names and values.
const QUERY_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'=')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// An ordered multimap of query parameters with
/// `application/x-www-form-urlencoded` serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryString {
    pairs: Vec<(String, String)>,
}

impl QueryString {
    #[inline]
    pub fn new() -> QueryString {
        QueryString::default()
    }

    /// Parses `name=value` pairs separated by `&`, percent-decoding both
    /// sides and mapping `+` to space. Empty values are accepted; empty
    /// names are skipped.
    pub fn parse(input: &str) -> QueryString {
        let pairs = input
            .split('&')
            .filter(|piece| !piece.is_empty())
            .filter_map(|piece| {
                let (name, value) = match piece.split_once('=') {
                    Some((n, v)) => (n, v),
                    None => (piece, ""),
                };
                let name = form_decode(name);
                if name.is_empty() {
                    return None;
                }
                Some((name, form_decode(value)))
            })
            .collect();
        QueryString { pairs }
    }

    pub fn from_pairs<I, N, V>(pairs: I) -> QueryString
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        QueryString {
            pairs: pairs.into_iter().map(|(n, v)| (n.into(), v.into())).collect(),
        }
    }

    /// First value under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn add<N, V>(mut self, name: N, value: V) -> QueryString
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.pairs.push((name.into(), value.into()));
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, (String, String)> {
        self.pairs.iter()
    }
}

impl fmt::Display for QueryString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}", utf8_percent_encode(name, QUERY_ENCODE))?;
            f.write_str("=")?;
            write!(f, "{}", utf8_percent_encode(value, QUERY_ENCODE))?;
        }
        Ok(())
    }
}

fn form_decode(s: &str) -> String {
    let plus_mapped = s.replace('+', " ");
    percent_decode_str(&plus_mapped).decode_utf8_lossy().into_owned()
}

/// Percent-decodes a path segment, for router parameter capture.
pub(crate) fn decode_segment(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn split_path_query_fragment(input: &str) -> Result<(String, Option<String>, Option<String>)> {
    let (before_frag, fragment) = match input.split_once('#') {
        Some((b, f)) => (b, Some(f.to_owned())),
        None => (input, None),
    };
    let (path, query) = match before_frag.split_once('?') {
        Some((p, q)) => (p.to_owned(), Some(q.to_owned())),
        None => (before_frag.to_owned(), None),
    };
    Ok((path, query, fragment))
}

/// Collapses `.`, `..` and duplicate slashes per RFC 3986. Absolute paths
/// stay absolute; `..` cannot climb above the root.
pub(crate) fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let trailing_slash = path.len() > 1 && path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut out = String::with_capacity(path.len());
    out.push('/');
    out.push_str(&segments.join("/"));
    if trailing_slash && out.len() > 1 {
        out.push('/');
    }
    out
}
