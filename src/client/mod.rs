// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The HTTP client.
//!
//! [`HttpClient`] normalizes each outgoing request (host, user agent,
//! cookies, connection tokens, body framing), dispatches it over a pooled
//! persistent connection when keep-alive is enabled, applies the registered
//! filter chains, and hands the response to the caller.
//!
//! # Example
//!
//! ```no_run
//! use scamper::client::ClientSettings;
//! use scamper::{HttpRequest, Message};
//!
//! let client = ClientSettings::new().keep_alive(true).build();
//! let request = HttpRequest::get("http://localhost:8080/motd").unwrap();
//! let body = client
//!     .send(request, |response| response.entity().read_to_bytes(64 * 1024).map_err(Into::into))
//!     .unwrap();
//! println!("{}", String::from_utf8_lossy(&body));
//! ```

pub(crate) mod pool;

use std::net::TcpStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, trace};

use crate::codec::{self, BodyFraming, CodecLimits};
use crate::connection::{BufferedConnection, TlsConnector};
use crate::cookies::{format_cookie_header, parse_cookie_header, CookieStore, NullCookieStore, SetCookie};
use crate::error::{Error, Result};
use crate::filters::{RequestFilter, ResponseFilter};
use crate::headers::Header;
use crate::message::Message;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::typed;
use crate::uri::{Scheme, Target, Uri};

use self::pool::{ConnectionManager, OriginKey};

const DEFAULT_USER_AGENT: &str = concat!("scamper/", env!("CARGO_PKG_VERSION"));

/// Configuration for an [`HttpClient`]. Consumed by [`ClientSettings::build`].
pub struct ClientSettings {
    resolve_to: Option<(Scheme, String, Option<u16>)>,
    accept: Option<String>,
    accept_encoding: Option<String>,
    user_agent: String,
    buffer_size: usize,
    read_timeout: Option<Duration>,
    continue_timeout: Duration,
    keep_alive: bool,
    pool_idle_timeout: Duration,
    pool_eviction_interval: Duration,
    pool_queue_size: usize,
    cookies: Arc<dyn CookieStore>,
    tls: Option<Arc<dyn TlsConnector>>,
    outgoing: Vec<Box<dyn RequestFilter>>,
    incoming: Vec<Box<dyn ResponseFilter>>,
    limits: CodecLimits,
}

impl Default for ClientSettings {
    fn default() -> ClientSettings {
        ClientSettings::new()
    }
}

impl ClientSettings {
    pub fn new() -> ClientSettings {
        ClientSettings {
            resolve_to: None,
            accept: Some("*/*".into()),
            accept_encoding: None,
            user_agent: DEFAULT_USER_AGENT.into(),
            buffer_size: 8 * 1024,
            read_timeout: None,
            continue_timeout: Duration::from_millis(1000),
            keep_alive: false,
            pool_idle_timeout: Duration::from_secs(60),
            pool_eviction_interval: Duration::from_secs(5),
            pool_queue_size: 16,
            cookies: Arc::new(NullCookieStore),
            tls: None,
            outgoing: Vec::new(),
            incoming: Vec::new(),
            limits: CodecLimits::default(),
        }
    }

    /// Default authority stamped onto relative targets.
    pub fn resolve_to(mut self, scheme: Scheme, host: &str, port: Option<u16>) -> ClientSettings {
        self.resolve_to = Some((scheme, host.to_owned(), port));
        self
    }

    /// Default `Accept` header for requests that set none. `None` disables.
    pub fn accept(mut self, accept: Option<&str>) -> ClientSettings {
        self.accept = accept.map(str::to_owned);
        self
    }

    /// Default `Accept-Encoding` header for requests that set none.
    pub fn accept_encoding(mut self, encoding: Option<&str>) -> ClientSettings {
        self.accept_encoding = encoding.map(str::to_owned);
        self
    }

    pub fn user_agent(mut self, agent: &str) -> ClientSettings {
        self.user_agent = agent.to_owned();
        self
    }

    pub fn buffer_size(mut self, size: usize) -> ClientSettings {
        self.buffer_size = size;
        self.limits.buffer_size = size;
        self
    }

    /// Socket read timeout. `None` blocks indefinitely.
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> ClientSettings {
        self.read_timeout = timeout;
        self
    }

    /// How long to wait for an interim `100 Continue` before sending the
    /// body of an `Expect: 100-continue` request. Zero disables the wait.
    pub fn continue_timeout(mut self, timeout: Duration) -> ClientSettings {
        self.continue_timeout = timeout;
        self
    }

    /// Enables the idle-connection pool and keep-alive negotiation.
    pub fn keep_alive(mut self, enabled: bool) -> ClientSettings {
        self.keep_alive = enabled;
        self
    }

    /// Maximum dwell time of an idle pooled connection.
    pub fn connection_idle_timeout(mut self, timeout: Duration) -> ClientSettings {
        self.pool_idle_timeout = timeout;
        self
    }

    /// Wake interval of the pool's eviction task.
    pub fn connection_eviction_interval(mut self, interval: Duration) -> ClientSettings {
        self.pool_eviction_interval = interval;
        self
    }

    /// Size cap of the idle pool.
    pub fn connection_queue_size(mut self, size: usize) -> ClientSettings {
        self.pool_queue_size = size;
        self
    }

    /// Cookie store consulted and updated on every exchange.
    pub fn cookies(mut self, store: Arc<dyn CookieStore>) -> ClientSettings {
        self.cookies = store;
        self
    }

    /// TLS connector used for `https`/`wss` origins.
    pub fn trust(mut self, connector: Arc<dyn TlsConnector>) -> ClientSettings {
        self.tls = Some(connector);
        self
    }

    /// Appends an outgoing (request) filter. Order-preserving.
    pub fn outgoing<F>(mut self, filter: F) -> ClientSettings
    where
        F: RequestFilter + 'static,
    {
        self.outgoing.push(Box::new(filter));
        self
    }

    /// Appends an incoming (response) filter. Order-preserving.
    pub fn incoming<F>(mut self, filter: F) -> ClientSettings
    where
        F: ResponseFilter + 'static,
    {
        self.incoming.push(Box::new(filter));
        self
    }

    /// Read-side limits (start line, headers, body).
    pub fn limits(mut self, limits: CodecLimits) -> ClientSettings {
        self.limits = limits;
        self
    }

    /// Builds the immutable runtime client.
    pub fn build(self) -> HttpClient {
        let pool = ConnectionManager::new(
            self.pool_idle_timeout,
            self.pool_eviction_interval,
            self.pool_queue_size,
        );
        HttpClient {
            settings: self,
            pool,
            client_id: rand::random(),
            sequence: AtomicU32::new(0),
        }
    }
}

/// A finished head-and-body exchange, with the connection it ran on. The
/// WebSocket connect path claims the connection out of this instead of
/// letting it return to the pool.
pub(crate) struct Exchange {
    pub response: HttpResponse,
    pub conn: BufferedConnection,
    pub key: OriginKey,
    pub reusable: bool,
}

/// An HTTP/1.1 client with an owned idle-connection pool.
pub struct HttpClient {
    settings: ClientSettings,
    pool: ConnectionManager,
    client_id: u16,
    sequence: AtomicU32,
}

impl HttpClient {
    /// Sends `request` and hands the response to `handler`.
    ///
    /// After the handler returns, the connection goes back to the pool when
    /// the exchange permitted keep-alive; otherwise it closes.
    pub fn send<T, F>(&self, request: HttpRequest, handler: F) -> Result<T>
    where
        F: FnOnce(HttpResponse) -> Result<T>,
    {
        let exchange = self.exchange(request)?;
        let Exchange {
            response,
            conn,
            key,
            reusable,
            ..
        } = exchange;

        let result = handler(response);

        if reusable {
            self.pool.checkin(key, conn);
        } else {
            let _ = conn.shutdown();
        }
        result
    }

    /// Sends `request` and returns the response.
    pub fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.send(request, Ok)
    }

    /// The full send path: normalize, connect, write, read, filter.
    pub(crate) fn exchange(&self, request: HttpRequest) -> Result<Exchange> {
        let (request, target) = self.normalize(request)?;

        let mut request = request;
        for filter in &self.settings.outgoing {
            request = filter.filter(request)?;
        }

        let key = OriginKey {
            secure: target.scheme().is_secure(),
            host: target.host().to_owned(),
            port: target.effective_port(),
        };

        let mut conn = match self.settings.keep_alive {
            true => self.pool.checkout(&key),
            false => None,
        }
        .map_or_else(|| self.dial(&key, &target), Ok)?;

        let correlate = self.next_correlate();
        trace!("{}: {} {}", correlate, request.method(), request.target());

        match self.drive(&mut conn, &request, &target, &correlate) {
            Ok((response, reusable)) => Ok(Exchange {
                response,
                conn,
                key,
                reusable,
            }),
            Err(e) => {
                let _ = conn.shutdown();
                Err(e)
            }
        }
    }

    // Writes the request and reads the final response on an owned
    // connection. Any error here disposes of the connection.
    fn drive(
        &self,
        conn: &mut BufferedConnection,
        request: &HttpRequest,
        target: &Uri,
        correlate: &str,
    ) -> Result<(HttpResponse, bool)> {
        let limits = &self.settings.limits;

        let framing = codec::write_request_head(conn, request)?;

        let mut pending_head = None;
        let expects_continue = request
            .header("Expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
        let wait = self.settings.continue_timeout;

        if expects_continue && !wait.is_zero() && framing != BodyFraming::Empty {
            conn.set_read_timeout(Some(wait))?;
            match codec::read_response_head(conn, limits) {
                // The interim arrived; fall through and send the body.
                Ok((line, _)) if line.code() < 200 => {}
                // A final response preempted the body.
                Ok(head) => pending_head = Some(head),
                // No answer in time: proceed and send the body anyway.
                Err(Error::ReadTimeout) => {}
                Err(e) => return Err(e),
            }
            conn.set_read_timeout(self.settings.read_timeout)?;
        }

        if pending_head.is_none() {
            codec::write_request_body(conn, request, framing, limits)?;
        }

        // Interim responses other than the final head are read and skipped;
        // 101 is final despite its class.
        let (line, headers) = loop {
            let head = match pending_head.take() {
                Some(head) => head,
                None => codec::read_response_head(conn, limits)?,
            };
            if head.0.code() >= 200 || head.0.code() == 101 {
                break head;
            }
        };

        let body_framing = codec::response_body_framing(request.method(), line.code(), &headers)?;
        let entity = codec::read_body(conn, body_framing, limits)?;
        let mut response = HttpResponse::new(line).with_headers(headers).with_entity(entity);

        for raw in response.headers().get_all("Set-Cookie") {
            if let Some(cookie) = SetCookie::parse(raw) {
                self.settings.cookies.put(target, cookie);
            }
        }

        for filter in &self.settings.incoming {
            response = filter.filter(response)?;
        }

        let socket = conn.handle().clone();
        let correlate = correlate.to_owned();
        let snapshot = request.clone();
        let target_attr = target.clone();
        response = response.map_attributes(move |a| {
            a.set_correlate(correlate);
            a.set_socket(socket);
            a.set_request(snapshot);
            a.set_target(target_attr);
        });

        let reusable = self.settings.keep_alive
            && response.code() != 101
            && body_framing != BodyFraming::UntilEof
            && !typed::connection_has(&response, "close")
            && !(response.version() == (1, 0) && !typed::connection_has(&response, "keep-alive"));

        Ok((response, reusable))
    }

    // Steps 1-5 of the send path: absolute target, connection tokens, body
    // framing per method, default headers, origin-form rewrite.
    fn normalize(&self, request: HttpRequest) -> Result<(HttpRequest, Uri)> {
        let target = match request.target() {
            Target::Absolute(uri) => uri.clone(),
            relative => match &self.settings.resolve_to {
                Some((scheme, host, port)) => relative.to_absolute(*scheme, host, *port)?,
                None => {
                    return Err(Error::MalformedUri(format!(
                        "target is not absolute: {}",
                        relative
                    )))
                }
            },
        };

        let mut connection: Vec<String> = typed::connection(&request)
            .into_iter()
            .filter(|t| {
                !t.eq_ignore_ascii_case("close")
                    && !t.eq_ignore_ascii_case("keep-alive")
                    && !t.eq_ignore_ascii_case("TE")
            })
            .collect();
        if request.has_header("TE") {
            connection.push("TE".into());
        }
        // An upgrade exchange negotiates its own connection fate.
        if !typed::has_upgrade(&request) {
            connection.push(if self.settings.keep_alive { "keep-alive" } else { "close" }.into());
        }
        let tokens: Vec<&str> = connection.iter().map(String::as_str).collect();
        let mut request = typed::set_connection(request, &tokens);

        request = self.normalize_body(request)?;

        request = typed::set_host(request, target.host_header())?;
        if !typed::has_user_agent(&request) {
            request = typed::set_user_agent(request, &self.settings.user_agent)?;
        }

        request = self.merge_cookies(request, &target)?;

        if let Some(accept) = &self.settings.accept {
            if !typed::has_accept(&request) {
                request = typed::set_accept(request, accept)?;
            }
        }
        if let Some(encoding) = &self.settings.accept_encoding {
            if !typed::has_accept_encoding(&request) {
                request = typed::set_accept_encoding(request, encoding)?;
            }
        }

        // Origin-form target; a server-wide OPTIONS keeps its `*`.
        let origin = if request.method() == "OPTIONS" && target.path().is_empty() {
            Target::Asterisk
        } else {
            target.to_target()
        };
        let request = request.with_target(origin);

        Ok((request, target))
    }

    fn normalize_body(&self, request: HttpRequest) -> Result<HttpRequest> {
        if matches!(request.method(), "GET" | "HEAD" | "DELETE" | "TRACE") {
            let request = request
                .without_header("Content-Length")
                .without_header("Transfer-Encoding");
            return Ok(request.with_entity(crate::entity::Entity::empty()));
        }

        let codings = typed::transfer_encoding(&request);
        if !codings.is_empty() {
            // Chunked must end the list; anything else stays in front.
            let mut codings: Vec<String> = codings
                .into_iter()
                .filter(|c| !c.eq_ignore_ascii_case("chunked"))
                .collect();
            codings.push("chunked".into());
            let refs: Vec<&str> = codings.iter().map(String::as_str).collect();
            return Ok(typed::remove_content_length(typed::set_transfer_encoding(
                request, &refs,
            )));
        }

        if typed::has_content_length(&request) {
            let declared = typed::content_length(&request)?;
            if let Some(actual) = request.entity().known_size() {
                if actual != declared {
                    return Err(Error::MalformedHeader(format!(
                        "Content-Length {} does not match entity size {}",
                        declared, actual
                    )));
                }
            }
            return Ok(request);
        }

        match request.entity().known_size() {
            Some(size) => Ok(typed::set_content_length(request, size)),
            None => Ok(typed::set_transfer_encoding(request, &["chunked"])),
        }
    }

    fn merge_cookies(&self, request: HttpRequest, target: &Uri) -> Result<HttpRequest> {
        let mut cookies = request
            .header("Cookie")
            .map(parse_cookie_header)
            .unwrap_or_default();
        for stored in self.settings.cookies.get(target) {
            if !cookies.iter().any(|c| c.name == stored.name) {
                cookies.push(stored);
            }
        }
        if cookies.is_empty() {
            return Ok(request);
        }
        Ok(request.with_set_header(Header::new("Cookie", format_cookie_header(&cookies))?))
    }

    fn dial(&self, key: &OriginKey, target: &Uri) -> Result<BufferedConnection> {
        debug!("connecting to {}:{}", key.host, key.port);
        let tcp = TcpStream::connect((key.host.as_str(), key.port))?;
        tcp.set_read_timeout(self.settings.read_timeout)?;

        let stream: Box<dyn crate::connection::Stream> = if key.secure {
            let connector = self.settings.tls.as_ref().ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    format!("no TLS connector configured for {}", target),
                ))
            })?;
            connector.connect(&key.host, tcp)?
        } else {
            Box::new(tcp)
        };

        Ok(BufferedConnection::new(stream, self.settings.buffer_size))
    }

    // `<ms-epoch-hex>-<client-id-hex4>-<request-seq-hex4>`, monotonic per
    // client.
    fn next_correlate(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) as u16;
        format!("{:x}-{:04x}-{:04x}", millis, self.client_id, seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    fn client() -> HttpClient {
        ClientSettings::new().build()
    }

    #[test]
    fn requires_absolute_target_without_resolve() {
        let err = client().normalize(HttpRequest::get("/x").unwrap()).unwrap_err();
        assert!(matches!(err, Error::MalformedUri(_)));
    }

    #[test]
    fn resolve_to_fills_authority() {
        let client = ClientSettings::new()
            .resolve_to(Scheme::Http, "localhost", Some(8080))
            .build();
        let (request, target) = client.normalize(HttpRequest::get("/x").unwrap()).unwrap();
        assert_eq!(target.to_string(), "http://localhost:8080/x");
        assert_eq!(request.header("Host"), Some("localhost:8080"));
    }

    #[test]
    fn connection_header_rewrite() {
        let request = HttpRequest::get("http://h/x")
            .unwrap()
            .with_header(Header::known("Connection", "close, X-Custom"))
            .with_header(Header::known("TE", "trailers"));
        let (request, _) = client().normalize(request).unwrap();
        assert_eq!(request.header("Connection"), Some("X-Custom, TE, close"));
    }

    #[test]
    fn keep_alive_opt_in_changes_token() {
        let client = ClientSettings::new().keep_alive(true).build();
        let (request, _) = client.normalize(HttpRequest::get("http://h/").unwrap()).unwrap();
        assert_eq!(request.header("Connection"), Some("keep-alive"));
    }

    #[test]
    fn get_loses_body_and_framing_headers() {
        let request = HttpRequest::get("http://h/x")
            .unwrap()
            .with_header(Header::known("Content-Length", "5"))
            .with_entity(Entity::from_string("hello"));
        let (request, _) = client().normalize(request).unwrap();
        assert!(!request.has_header("Content-Length"));
        assert!(!request.has_header("Transfer-Encoding"));
        assert!(request.entity().is_known_empty());
    }

    #[test]
    fn post_framing_rules() {
        // Known size gains Content-Length.
        let post = HttpRequest::post("http://h/x")
            .unwrap()
            .with_entity(Entity::from_string("hello"));
        let (post, _) = client().normalize(post).unwrap();
        assert_eq!(post.header("Content-Length"), Some("5"));

        // Unknown size gains chunked.
        let stream = HttpRequest::post("http://h/x")
            .unwrap()
            .with_entity(Entity::from_reader(std::io::Cursor::new(vec![1u8])));
        let (stream, _) = client().normalize(stream).unwrap();
        assert_eq!(stream.header("Transfer-Encoding"), Some("chunked"));

        // Existing Transfer-Encoding keeps chunked last.
        let te = HttpRequest::post("http://h/x")
            .unwrap()
            .with_header(Header::known("Transfer-Encoding", "chunked, gzip"))
            .with_entity(Entity::from_reader(std::io::Cursor::new(vec![1u8])));
        let (te, _) = client().normalize(te).unwrap();
        assert_eq!(te.header("Transfer-Encoding"), Some("gzip, chunked"));
    }

    #[test]
    fn mismatched_content_length_rejected() {
        let request = HttpRequest::post("http://h/x")
            .unwrap()
            .with_header(Header::known("Content-Length", "3"))
            .with_entity(Entity::from_string("hello"));
        assert!(client().normalize(request).is_err());
    }

    #[test]
    fn default_headers() {
        let (request, _) = client().normalize(HttpRequest::get("http://h/").unwrap()).unwrap();
        assert_eq!(request.header("Accept"), Some("*/*"));
        assert!(request.header("User-Agent").unwrap().starts_with("scamper/"));
    }

    #[test]
    fn options_star_preserved() {
        let request = HttpRequest::fake("OPTIONS", "http://h", &[], b"");
        let (request, _) = client().normalize(request).unwrap();
        assert_eq!(request.target(), &Target::Asterisk);
    }

    #[test]
    fn cookie_store_merges() {
        use crate::cookies::InMemoryCookieStore;

        let store = Arc::new(InMemoryCookieStore::new());
        store.put(
            &Uri::parse("http://h/").unwrap(),
            SetCookie::new("sid", "42").with_path("/"),
        );
        let client = ClientSettings::new().cookies(store).build();

        let request = HttpRequest::get("http://h/x")
            .unwrap()
            .with_header(Header::known("Cookie", "theme=dark"));
        let (request, _) = client.normalize(request).unwrap();
        assert_eq!(request.header("Cookie"), Some("theme=dark; sid=42"));
    }

    #[test]
    fn correlates_are_monotonic() {
        let client = client();
        let a = client.next_correlate();
        let b = client.next_correlate();
        assert_ne!(a, b);
        assert_eq!(a.split('-').count(), 3);
    }
}
