// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Scamper is an HTTP/1.1 library with a symmetric message model, an
//! outbound client pooling persistent connections, an inbound server with
//! a pipeline of request handlers and response filters, and RFC 6455
//! WebSockets (permessage-deflate included) reachable through an HTTP
//! Upgrade handshake.
//!
//! Requests and responses are immutable values: every builder consumes the
//! message and returns a new one sharing the unchanged fields. The same
//! [`HttpRequest`]/[`HttpResponse`] types flow through the client and the
//! server.
//!
//! # A server
//!
//! ```no_run
//! use scamper::router::Router;
//! use scamper::server::ServerApplication;
//! use scamper::HttpResponse;
//!
//! let router = Router::new()
//!     .get("/motd", |_req: scamper::HttpRequest| {
//!         Ok(HttpResponse::text("Hello, world!"))
//!     })
//!     .unwrap();
//!
//! let server = ServerApplication::new()
//!     .keep_alive(30, 100)
//!     .route("/", router)
//!     .unwrap()
//!     .create("127.0.0.1:8080")
//!     .unwrap();
//! println!("listening on {}", server.addr());
//! ```
//!
//! # A client
//!
//! ```no_run
//! use scamper::client::ClientSettings;
//! use scamper::HttpRequest;
//!
//! let client = ClientSettings::new().keep_alive(true).build();
//! let request = HttpRequest::get("http://localhost:8080/motd").unwrap();
//! let response = client.fetch(request).unwrap();
//! assert_eq!(response.code(), 200);
//! ```

pub mod client;
pub mod codec;
pub mod connection;
pub mod content_encoding;
pub mod cookies;
pub mod entity;
pub mod error;
pub mod filters;
pub mod headers;
pub mod message;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod static_files;
pub mod typed;
pub mod uri;
pub mod websocket;

pub use crate::entity::Entity;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::filters::{ErrorHandler, Handled, RequestFilter, RequestHandler, ResponseFilter};
pub use crate::headers::{Header, Headers};
pub use crate::message::{Attributes, Message, SocketHandle};
pub use crate::request::{HttpRequest, RequestLine};
pub use crate::response::{HttpResponse, StatusLine, Upgrade};
pub use crate::uri::{QueryString, Scheme, Target, Uri};
