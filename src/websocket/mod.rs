// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! WebSockets (RFC 6455) over an HTTP Upgrade handshake.
//!
//! Server side, a request handler validates the Upgrade request with
//! [`upgrade`] and returns the `101` response it builds; once the response
//! is written, the pipeline hands the socket to the new [`WebSocket`]
//! session. Client side, [`connect`] performs the handshake through an
//! [`HttpClient`] and claims the connection out of the pool's control.
//!
//! # Example
//!
//! ```no_run
//! use scamper::server::ServerApplication;
//! use scamper::websocket::{self, SessionConfig};
//! use scamper::Handled;
//!
//! let server = ServerApplication::new()
//!     .incoming(|req: scamper::HttpRequest| {
//!         let response = websocket::upgrade(&req, None, SessionConfig::default(), |ws| {
//!             ws.on_text(|ws, text| {
//!                 let _ = ws.send_text(&text);
//!             });
//!             let _ = ws.open();
//!         })?;
//!         Ok(Handled::Done(response))
//!     })
//!     .create("127.0.0.1:8080")
//!     .unwrap();
//! # drop(server);
//! ```

pub(crate) mod deflate;
pub mod frame;
mod session;

pub use self::frame::{Opcode, Role};
pub use self::session::{SessionConfig, SessionState, WebSocket};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use rand::RngCore;
use sha1_smol::Sha1;

use crate::client::HttpClient;
use crate::connection::UpgradedSocket;
use crate::error::{Error, Result};
use crate::headers::Header;
use crate::message::Message;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::typed;

/// Close status codes from RFC 6455 (and the local-only sentinels).
pub mod status {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED_DATA: u16 = 1003;
    pub const NO_STATUS: u16 = 1005;
    pub const ABNORMAL_CLOSURE: u16 = 1006;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const MANDATORY_EXTENSION: u16 = 1010;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const TLS_HANDSHAKE_FAILURE: u16 = 1015;

    /// Codes that exist only locally and never travel in a Close frame.
    pub fn is_local_only(code: u16) -> bool {
        matches!(code, NO_STATUS | ABNORMAL_CLOSURE | TLS_HANDSHAKE_FAILURE)
    }
}

const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derives `Sec-WebSocket-Accept` from `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(ACCEPT_GUID.as_bytes());
    BASE64.encode(sha1.digest().bytes())
}

/// A fresh random 16-byte `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    BASE64.encode(nonce)
}

// The deflate parameters this implementation understands in an offer.
fn deflate_param_supported(param: &str) -> bool {
    let name = param.split('=').next().unwrap_or("").trim();
    name.eq_ignore_ascii_case("client_no_context_takeover")
        || name.eq_ignore_ascii_case("server_no_context_takeover")
        || name.eq_ignore_ascii_case("client_max_window_bits")
}

// True if any permessage-deflate offer can be accepted. An offer with an
// unsupported parameter declines; a later offer may still match.
fn accepts_deflate_offer(request: &HttpRequest) -> bool {
    request
        .headers()
        .get_all("Sec-WebSocket-Extensions")
        .flat_map(|value| value.split(','))
        .any(|offer| {
            let mut parts = offer.split(';').map(str::trim);
            match parts.next() {
                Some(name) if name.eq_ignore_ascii_case("permessage-deflate") => {
                    parts.all(deflate_param_supported)
                }
                _ => false,
            }
        })
}

fn response_negotiated_deflate(response: &HttpResponse) -> bool {
    response
        .headers()
        .get_all("Sec-WebSocket-Extensions")
        .flat_map(|value| value.split(','))
        .any(|ext| {
            ext.split(';')
                .next()
                .is_some_and(|name| name.trim().eq_ignore_ascii_case("permessage-deflate"))
        })
}

/// Validates a server-side Upgrade request, returning the client's key.
///
/// The request must be a GET carrying `Upgrade: websocket`,
/// `Connection: upgrade`, `Sec-WebSocket-Version: 13`, and a
/// `Sec-WebSocket-Key` that decodes to exactly 16 bytes.
pub fn validate_upgrade(request: &HttpRequest) -> Result<String> {
    if request.method() != "GET" {
        return Err(Error::Protocol("websocket upgrade requires GET".into()));
    }
    if !typed::get_upgrade(request).is_some_and(|u| u.eq_ignore_ascii_case("websocket")) {
        return Err(Error::Protocol("missing Upgrade: websocket".into()));
    }
    if !typed::connection_has(request, "upgrade") {
        return Err(Error::Protocol("missing Connection: upgrade".into()));
    }
    // Only version 13; no alternatives are offered on mismatch.
    match request.header("Sec-WebSocket-Version") {
        Some("13") => {}
        other => {
            return Err(Error::Protocol(format!(
                "unsupported Sec-WebSocket-Version: {}",
                other.unwrap_or("<none>")
            )))
        }
    }

    let key = request
        .header("Sec-WebSocket-Key")
        .ok_or_else(|| Error::Protocol("missing Sec-WebSocket-Key".into()))?;
    match BASE64.decode(key.trim()) {
        Ok(decoded) if decoded.len() == 16 => Ok(key.trim().to_owned()),
        _ => Err(Error::Protocol("Sec-WebSocket-Key is not 16 bytes".into())),
    }
}

/// Builds the `101 Switching Protocols` response for a valid Upgrade
/// request and schedules `on_open` with the new session once the server
/// pipeline hands over the socket.
///
/// `subprotocol`, when given, must be among those the client requested;
/// agreement is echoed in `Sec-WebSocket-Protocol`.
pub fn upgrade<F>(
    request: &HttpRequest,
    subprotocol: Option<&str>,
    config: SessionConfig,
    on_open: F,
) -> Result<HttpResponse>
where
    F: FnOnce(WebSocket) + Send + 'static,
{
    let key = validate_upgrade(request)?;

    if let Some(wanted) = subprotocol {
        let offered = request
            .headers()
            .get_all("Sec-WebSocket-Protocol")
            .flat_map(|value| value.split(','))
            .any(|p| p.trim() == wanted);
        if !offered {
            return Err(Error::Protocol(format!(
                "subprotocol not requested by client: {}",
                wanted
            )));
        }
    }

    let deflate = accepts_deflate_offer(request);
    debug!("websocket upgrade accepted (deflate: {})", deflate);

    let mut response = HttpResponse::empty(101)
        .with_set_header(Header::known("Upgrade", "websocket"))
        .with_set_header(Header::known("Connection", "upgrade"))
        .with_set_header(Header::known("Sec-WebSocket-Accept", accept_key(&key)));
    if deflate {
        response = response.with_set_header(Header::known(
            "Sec-WebSocket-Extensions",
            "permessage-deflate; client_no_context_takeover; server_no_context_takeover",
        ));
    }
    if let Some(agreed) = subprotocol {
        response = response.with_set_header(Header::new("Sec-WebSocket-Protocol", agreed)?);
    }

    Ok(response.with_upgrade(move |socket: UpgradedSocket| {
        match WebSocket::new(socket, Role::Server, deflate, config) {
            Ok(ws) => on_open(ws),
            Err(e) => warn!("failed to build websocket session: {}", e),
        }
    }))
}

/// Client-side connect: performs the Upgrade handshake over `client` and
/// returns the pending session. The connection is claimed away from the
/// pool; it belongs to the session from here on.
pub fn connect(client: &HttpClient, target: &str, config: SessionConfig) -> Result<WebSocket> {
    let key = generate_key();
    let request = HttpRequest::get(target)?
        .with_set_header(Header::known("Upgrade", "websocket"))
        .with_set_header(Header::known("Connection", "Upgrade"))
        .with_set_header(Header::known("Sec-WebSocket-Version", "13"))
        .with_set_header(Header::new("Sec-WebSocket-Key", &key)?)
        .with_set_header(Header::known(
            "Sec-WebSocket-Extensions",
            "permessage-deflate; client_no_context_takeover; server_no_context_takeover",
        ));

    let exchange = client.exchange(request)?;

    if let Err(e) = validate_upgrade_response(&exchange.response, &key) {
        let _ = exchange.conn.shutdown();
        return Err(e);
    }

    let deflate = response_negotiated_deflate(&exchange.response);
    let socket = UpgradedSocket::new(exchange.conn);
    WebSocket::new(socket, Role::Client, deflate, config)
}

fn validate_upgrade_response(response: &HttpResponse, key: &str) -> Result<()> {
    if response.code() != 101 {
        return Err(Error::Protocol(format!(
            "upgrade refused with status {}",
            response.code()
        )));
    }
    if !typed::get_upgrade(response).is_some_and(|u| u.eq_ignore_ascii_case("websocket")) {
        return Err(Error::Protocol("response missing Upgrade: websocket".into()));
    }
    if !typed::connection_has(response, "upgrade") {
        return Err(Error::Protocol("response missing Connection: upgrade".into()));
    }
    // Strict equality on the Base64 form; no renormalization.
    match response.header("Sec-WebSocket-Accept") {
        Some(accept) if accept == accept_key(key) => Ok(()),
        Some(_) => Err(Error::Protocol("Sec-WebSocket-Accept mismatch".into())),
        None => Err(Error::Protocol("response missing Sec-WebSocket-Accept".into())),
    }
}
