// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The message capability trait and per-message attributes.
//!
//! Requests and responses share the same shape: a start line, an ordered
//! header list, an entity, and a process-local attribute set that is never
//! transmitted. Everything generic over "a message" (typed header accessors,
//! the codec's header fix-ups) is written against [`Message`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::entity::Entity;
use crate::headers::{Header, Headers};
use crate::request::HttpRequest;
use crate::server::ServerHandle;
use crate::uri::Uri;

/// Capability trait implemented by [`HttpRequest`] and
/// [`crate::response::HttpResponse`].
///
/// Mutators consume the message and return a new one; unchanged fields are
/// shared. Published messages are logically immutable.
pub trait Message: Sized {
    /// `(major, minor)` of the HTTP version in the start line.
    fn version(&self) -> (u8, u8);

    fn headers(&self) -> &Headers;

    fn with_headers(self, headers: Headers) -> Self;

    fn entity(&self) -> &Entity;

    fn with_entity(self, entity: Entity) -> Self;

    /// First value of the named header.
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name)
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers().contains(name)
    }

    /// Appends a header, keeping existing same-named fields.
    fn with_header(self, header: Header) -> Self {
        let headers = self.headers().clone().with_added(header);
        self.with_headers(headers)
    }

    /// Replaces all same-named fields with this one.
    fn with_set_header(self, header: Header) -> Self {
        let headers = self.headers().clone().with_set(header);
        self.with_headers(headers)
    }

    /// Drops all fields with the given name.
    fn without_header(self, name: &str) -> Self {
        let headers = self.headers().clone().with_removed(name);
        self.with_headers(headers)
    }
}

/// Identity of the transport a message arrived on or left through.
///
/// Cheap to clone; two handles compare equal exactly when they refer to the
/// same accepted or dialed socket. Connection reuse is observable by
/// comparing handles across exchanges.
#[derive(Clone)]
pub struct SocketHandle {
    inner: Arc<SocketIdentity>,
}

struct SocketIdentity {
    id: u64,
    peer: Option<SocketAddr>,
}

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

impl SocketHandle {
    pub(crate) fn next(peer: Option<SocketAddr>) -> SocketHandle {
        SocketHandle {
            inner: Arc::new(SocketIdentity {
                id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
                peer,
            }),
        }
    }

    /// Process-unique id of the underlying socket.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Address of the peer, when known.
    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &SocketHandle) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for SocketHandle {}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SocketHandle#{}", self.inner.id)
    }
}

/// Process-local context attached to a message. Never transmitted.
///
/// The set is closed: correlate id, the socket the exchange runs on, the
/// position of the request on its keep-alive connection, decoded path
/// parameters, and (responses only) the post-filter request snapshot.
#[derive(Clone, Default)]
pub struct Attributes {
    correlate: Option<String>,
    socket: Option<SocketHandle>,
    request_count: Option<u32>,
    path_params: Option<Arc<Vec<(String, String)>>>,
    request: Option<Arc<HttpRequest>>,
    target: Option<Arc<Uri>>,
    server: Option<ServerHandle>,
}

impl Attributes {
    #[inline]
    pub fn new() -> Attributes {
        Attributes::default()
    }

    pub fn correlate(&self) -> Option<&str> {
        self.correlate.as_deref()
    }

    pub fn set_correlate(&mut self, correlate: String) {
        self.correlate = Some(correlate);
    }

    pub fn socket(&self) -> Option<&SocketHandle> {
        self.socket.as_ref()
    }

    pub fn set_socket(&mut self, socket: SocketHandle) {
        self.socket = Some(socket);
    }

    /// 1-based position of the request on its keep-alive connection.
    pub fn request_count(&self) -> Option<u32> {
        self.request_count
    }

    pub fn set_request_count(&mut self, count: u32) {
        self.request_count = Some(count);
    }

    pub fn path_params(&self) -> &[(String, String)] {
        self.path_params.as_deref().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_path_params(&mut self, params: Vec<(String, String)>) {
        self.path_params = Some(Arc::new(params));
    }

    /// The request this response answers, as it looked after request filters
    /// ran. Responses only.
    pub fn request(&self) -> Option<&HttpRequest> {
        self.request.as_deref()
    }

    pub fn set_request(&mut self, request: HttpRequest) {
        self.request = Some(Arc::new(request));
    }

    /// The absolute target the exchange was sent to. Client responses only.
    pub fn target(&self) -> Option<&Uri> {
        self.target.as_deref()
    }

    pub fn set_target(&mut self, target: Uri) {
        self.target = Some(Arc::new(target));
    }

    /// The server the exchange runs on. Server-side messages only.
    pub fn server(&self) -> Option<&ServerHandle> {
        self.server.as_ref()
    }

    pub fn set_server(&mut self, server: ServerHandle) {
        self.server = Some(server);
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes")
            .field("correlate", &self.correlate)
            .field("socket", &self.socket)
            .field("request_count", &self.request_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_handles_are_unique() {
        let a = SocketHandle::next(None);
        let b = SocketHandle::next(None);
        assert_ne!(a.id(), b.id());
        assert_eq!(a, a.clone());
    }
}
