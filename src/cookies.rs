// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Cookies: the `Cookie` / `Set-Cookie` headers and the client-side store
//! contract.
//!
//! The store interface is the only surface the client depends on; a
//! thread-safe in-memory implementation and a null store are provided.

use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::uri::Uri;

/// A request cookie: bare `name=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainCookie {
    pub name: String,
    pub value: String,
}

impl PlainCookie {
    pub fn new<N, V>(name: N, value: V) -> PlainCookie
    where
        N: Into<String>,
        V: Into<String>,
    {
        PlainCookie {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// `SameSite` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A response cookie with its scoping attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub expires: Option<SystemTime>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl SetCookie {
    pub fn new<N, V>(name: N, value: V) -> SetCookie
    where
        N: Into<String>,
        V: Into<String>,
    {
        SetCookie {
            name: name.into(),
            value: value.into(),
            ..SetCookie::default()
        }
    }

    pub fn with_path<P: Into<String>>(mut self, path: P) -> SetCookie {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain<D: Into<String>>(mut self, domain: D) -> SetCookie {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_max_age(mut self, seconds: i64) -> SetCookie {
        self.max_age = Some(seconds);
        self
    }

    pub fn with_expires(mut self, at: SystemTime) -> SetCookie {
        self.expires = Some(at);
        self
    }

    pub fn secure(mut self) -> SetCookie {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> SetCookie {
        self.http_only = true;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> SetCookie {
        self.same_site = Some(same_site);
        self
    }

    /// Parses a `Set-Cookie` header value. Unknown attributes are ignored;
    /// a value without `name=` yields `None`.
    pub fn parse(raw: &str) -> Option<SetCookie> {
        let mut parts = raw.split(';');

        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let mut cookie = SetCookie::new(name, value.trim().trim_matches('"'));

        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attr.trim(), ""),
            };
            if key.eq_ignore_ascii_case("Path") {
                cookie.path = Some(val.to_owned());
            } else if key.eq_ignore_ascii_case("Domain") {
                cookie.domain = Some(val.trim_start_matches('.').to_ascii_lowercase());
            } else if key.eq_ignore_ascii_case("Max-Age") {
                cookie.max_age = val.parse().ok();
            } else if key.eq_ignore_ascii_case("Expires") {
                cookie.expires = httpdate::parse_http_date(val).ok();
            } else if key.eq_ignore_ascii_case("Secure") {
                cookie.secure = true;
            } else if key.eq_ignore_ascii_case("HttpOnly") {
                cookie.http_only = true;
            } else if key.eq_ignore_ascii_case("SameSite") {
                cookie.same_site = if val.eq_ignore_ascii_case("Strict") {
                    Some(SameSite::Strict)
                } else if val.eq_ignore_ascii_case("Lax") {
                    Some(SameSite::Lax)
                } else if val.eq_ignore_ascii_case("None") {
                    Some(SameSite::None)
                } else {
                    None
                };
            }
        }

        Some(cookie)
    }

    /// Formats the `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str("; Max-Age=");
            out.push_str(&max_age.to_string());
        }
        if let Some(expires) = self.expires {
            out.push_str("; Expires=");
            out.push_str(&httpdate::fmt_http_date(expires));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(same_site) = self.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site.as_str());
        }
        out
    }
}

/// Parses a `Cookie` request-header value into its pairs. Malformed pieces
/// are skipped.
pub fn parse_cookie_header(value: &str) -> Vec<PlainCookie> {
    value
        .split(';')
        .filter_map(|piece| {
            let (name, value) = piece.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(PlainCookie::new(name, value.trim().trim_matches('"')))
        })
        .collect()
}

/// Formats pairs as a `Cookie` header value.
pub fn format_cookie_header(cookies: &[PlainCookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Client-side cookie storage contract.
///
/// Implementations must be internally thread-safe; a store is shared by
/// every in-flight request of its client.
pub trait CookieStore: Send + Sync {
    /// Cookies applicable to `target`: domain suffix-matches the host, path
    /// prefix-matches the target path, and `secure` cookies only flow to
    /// secure schemes.
    fn get(&self, target: &Uri) -> Vec<PlainCookie>;

    /// Stores a cookie received for `target`, replacing any prior cookie
    /// with the same `(name, domain, path)`.
    fn put(&self, target: &Uri, cookie: SetCookie);
}

/// A store that holds nothing: `get` is empty, `put` is ignored.
#[derive(Debug, Default)]
pub struct NullCookieStore;

impl CookieStore for NullCookieStore {
    fn get(&self, _target: &Uri) -> Vec<PlainCookie> {
        Vec::new()
    }

    fn put(&self, _target: &Uri, _cookie: SetCookie) {}
}

struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    // Cookies without an explicit Domain attribute bind to the exact host.
    host_only: bool,
    path: String,
    secure: bool,
    expires: Option<SystemTime>,
}

/// An in-memory [`CookieStore`].
#[derive(Default)]
pub struct InMemoryCookieStore {
    cookies: Mutex<Vec<StoredCookie>>,
}

impl InMemoryCookieStore {
    pub fn new() -> InMemoryCookieStore {
        InMemoryCookieStore::default()
    }
}

impl CookieStore for InMemoryCookieStore {
    fn get(&self, target: &Uri) -> Vec<PlainCookie> {
        let now = SystemTime::now();
        let mut cookies = self.cookies.lock().unwrap_or_else(|p| p.into_inner());
        cookies.retain(|c| c.expires.map_or(true, |at| at > now));

        cookies
            .iter()
            .filter(|c| {
                if c.host_only {
                    target.host() == c.domain
                } else {
                    domain_matches(target.host(), &c.domain)
                }
            })
            .filter(|c| path_matches(target.path(), &c.path))
            .filter(|c| !c.secure || target.scheme().is_secure())
            .map(|c| PlainCookie::new(c.name.clone(), c.value.clone()))
            .collect()
    }

    fn put(&self, target: &Uri, cookie: SetCookie) {
        let host_only = cookie.domain.is_none();
        let domain = cookie
            .domain
            .clone()
            .unwrap_or_else(|| target.host().to_owned());
        let path = cookie
            .path
            .clone()
            .unwrap_or_else(|| default_path(target.path()));

        // Max-Age wins over Expires when both are present.
        let expires = match cookie.max_age {
            Some(age) if age <= 0 => Some(SystemTime::UNIX_EPOCH),
            Some(age) => Some(SystemTime::now() + Duration::from_secs(age as u64)),
            None => cookie.expires,
        };

        let mut cookies = self.cookies.lock().unwrap_or_else(|p| p.into_inner());
        cookies.retain(|c| !(c.name == cookie.name && c.domain == domain && c.path == path));

        let expired = expires.is_some_and(|at| at <= SystemTime::now());
        if !expired {
            cookies.push(StoredCookie {
                name: cookie.name,
                value: cookie.value,
                domain,
                host_only,
                path,
                secure: cookie.secure,
                expires,
            });
        }
    }
}

// Host `a.b.example.com` matches cookie domain `example.com` but never a
// partial label like `ple.com`.
fn domain_matches(host: &str, cookie_domain: &str) -> bool {
    host == cookie_domain
        || (host.ends_with(cookie_domain)
            && host.as_bytes()[host.len() - cookie_domain.len() - 1] == b'.')
}

fn path_matches(target_path: &str, cookie_path: &str) -> bool {
    let target_path = if target_path.is_empty() { "/" } else { target_path };
    target_path == cookie_path
        || (target_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || target_path.as_bytes()[cookie_path.len()] == b'/'))
}

// The default path of a cookie is the directory of the request path.
fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(idx) => request_path[..idx].to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        Uri::parse(s).unwrap()
    }

    #[test]
    fn cookie_header_round_trip() {
        let cookies = parse_cookie_header("a=b; hello=world");
        assert_eq!(
            cookies,
            vec![PlainCookie::new("a", "b"), PlainCookie::new("hello", "world")]
        );
        assert_eq!(format_cookie_header(&cookies), "a=b; hello=world");
    }

    #[test]
    fn set_cookie_parse_and_format() {
        let cookie = SetCookie::parse("sid=abc123; Path=/app; Secure; HttpOnly; SameSite=Lax")
            .unwrap();
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.path.as_deref(), Some("/app"));
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert_eq!(cookie.same_site, Some(SameSite::Lax));
        assert_eq!(
            cookie.to_header_value(),
            "sid=abc123; Path=/app; Secure; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn store_scoping() {
        let store = InMemoryCookieStore::new();
        store.put(&uri("http://example.com/app/login"), SetCookie::new("sid", "1"));

        assert_eq!(store.get(&uri("http://example.com/app/page")).len(), 1);
        assert_eq!(store.get(&uri("http://sub.example.com/app")).len(), 0);
        assert_eq!(store.get(&uri("http://example.com/other")).len(), 0);
    }

    #[test]
    fn domain_cookie_covers_subdomains() {
        let store = InMemoryCookieStore::new();
        store.put(
            &uri("http://example.com/"),
            SetCookie::new("sid", "1").with_domain("example.com").with_path("/"),
        );
        assert_eq!(store.get(&uri("http://a.example.com/x")).len(), 1);
        assert_eq!(store.get(&uri("http://notexample.com/x")).len(), 0);
    }

    #[test]
    fn secure_cookies_stay_secure() {
        let store = InMemoryCookieStore::new();
        store.put(
            &uri("https://example.com/"),
            SetCookie::new("sid", "1").with_path("/").secure(),
        );
        assert_eq!(store.get(&uri("https://example.com/")).len(), 1);
        assert_eq!(store.get(&uri("http://example.com/")).len(), 0);
    }

    #[test]
    fn replacement_and_expiry() {
        let store = InMemoryCookieStore::new();
        let target = uri("http://example.com/");
        store.put(&target, SetCookie::new("sid", "old").with_path("/"));
        store.put(&target, SetCookie::new("sid", "new").with_path("/"));

        let got = store.get(&target);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value, "new");

        store.put(&target, SetCookie::new("sid", "gone").with_path("/").with_max_age(0));
        assert!(store.get(&target).is_empty());
    }
}
