// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Handler and filter traits shared by the client and the server.
//!
//! Within one scope everything runs in registration order. A request
//! handler either passes an (optionally rewritten) request to the next
//! handler or short-circuits the chain with a response; errors travel as
//! `Err` and are consumed by error handlers.

use crate::error::{Error, Result};
use crate::request::HttpRequest;
use crate::response::HttpResponse;

/// Outcome of one request handler.
pub enum Handled {
    /// Continue the chain with this (possibly rewritten) request.
    Next(HttpRequest),
    /// Stop the chain; this is the response.
    Done(HttpResponse),
}

/// A step in the server's request chain.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: HttpRequest) -> Result<Handled>;
}

impl<F> RequestHandler for F
where
    F: Fn(HttpRequest) -> Result<Handled> + Send + Sync,
{
    fn handle(&self, request: HttpRequest) -> Result<Handled> {
        self(request)
    }
}

/// Rewrites outgoing requests (client-side `outgoing` chain).
pub trait RequestFilter: Send + Sync {
    fn filter(&self, request: HttpRequest) -> Result<HttpRequest>;
}

impl<F> RequestFilter for F
where
    F: Fn(HttpRequest) -> Result<HttpRequest> + Send + Sync,
{
    fn filter(&self, request: HttpRequest) -> Result<HttpRequest> {
        self(request)
    }
}

/// Rewrites responses: the server's response chain and the client's
/// `incoming` chain.
pub trait ResponseFilter: Send + Sync {
    fn filter(&self, response: HttpResponse) -> Result<HttpResponse>;
}

impl<F> ResponseFilter for F
where
    F: Fn(HttpResponse) -> Result<HttpResponse> + Send + Sync,
{
    fn filter(&self, response: HttpResponse) -> Result<HttpResponse> {
        self(response)
    }
}

/// Recovers a response from a failed handler.
///
/// Returning `None` passes the error to the next handler; an unrecovered
/// error becomes a `500`. [`Error::ResponseAborted`] never reaches these.
pub trait ErrorHandler: Send + Sync {
    fn recover(&self, error: &Error, request: &HttpRequest) -> Option<HttpResponse>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&Error, &HttpRequest) -> Option<HttpResponse> + Send + Sync,
{
    fn recover(&self, error: &Error, request: &HttpRequest) -> Option<HttpResponse> {
        self(error, request)
    }
}
