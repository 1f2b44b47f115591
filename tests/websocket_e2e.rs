// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! End-to-end WebSocket sessions over real sockets.

use std::sync::mpsc;
use std::time::Duration;

use scamper::client::ClientSettings;
use scamper::server::{HttpServer, ServerApplication};
use scamper::websocket::{self, status, SessionConfig};
use scamper::{Handled, HttpRequest};

fn echo_server() -> HttpServer {
    ServerApplication::new()
        .incoming(|req: HttpRequest| {
            let response = websocket::upgrade(&req, None, SessionConfig::default(), |ws| {
                ws.on_text(|ws, text| {
                    let _ = ws.send_text(&format!("echo: {}", text));
                });
                ws.on_binary(|ws, data| {
                    let _ = ws.send_binary(&data);
                });
                ws.on_ping(|ws, data| {
                    let _ = ws.pong(&data);
                });
                let _ = ws.open();
            })?;
            Ok(Handled::Done(response))
        })
        .create("127.0.0.1:0")
        .unwrap()
}

fn recv<T>(rx: &mpsc::Receiver<T>) -> T {
    rx.recv_timeout(Duration::from_secs(5)).expect("event")
}

#[test]
fn text_echo() {
    let server = echo_server();
    let client = ClientSettings::new().build();

    let ws = websocket::connect(
        &client,
        &format!("ws://{}/chat", server.addr()),
        SessionConfig::default(),
    )
    .unwrap();

    let (tx, rx) = mpsc::channel();
    ws.on_text(move |_ws, text| tx.send(text).unwrap());
    ws.open().unwrap();

    ws.send_text("hello").unwrap();
    assert_eq!(recv(&rx), "echo: hello");

    ws.send_text("again").unwrap();
    assert_eq!(recv(&rx), "echo: again");

    ws.close(status::NORMAL).unwrap();
}

#[test]
fn binary_echo_with_fragmentation() {
    let server = echo_server();
    let client = ClientSettings::new().build();

    // A small payload limit forces outgoing fragmentation; the server
    // reassembles and echoes one message back.
    let config = SessionConfig {
        payload_limit: 8,
        ..SessionConfig::default()
    };
    let ws = websocket::connect(&client, &format!("ws://{}/chat", server.addr()), config).unwrap();

    let (tx, rx) = mpsc::channel();
    ws.on_binary(move |_ws, data| tx.send(data).unwrap());
    ws.open().unwrap();

    let payload: Vec<u8> = (0..64u8).collect();
    ws.send_binary(&payload).unwrap();
    assert_eq!(recv(&rx), payload);

    ws.close(status::NORMAL).unwrap();
}

#[test]
fn ping_pong() {
    let server = echo_server();
    let client = ClientSettings::new().build();

    let ws = websocket::connect(
        &client,
        &format!("ws://{}/chat", server.addr()),
        SessionConfig::default(),
    )
    .unwrap();

    let (tx, rx) = mpsc::channel();
    ws.on_pong(move |_ws, data| tx.send(data).unwrap());
    ws.open().unwrap();

    ws.ping(b"tick").unwrap();
    assert_eq!(recv(&rx), b"tick");

    ws.close(status::NORMAL).unwrap();
}

#[test]
fn compression_is_negotiated_and_transparent() {
    let server = echo_server();
    let client = ClientSettings::new().build();

    let ws = websocket::connect(
        &client,
        &format!("ws://{}/chat", server.addr()),
        SessionConfig::default(),
    )
    .unwrap();
    assert!(ws.is_compressed(), "both sides offer permessage-deflate");

    let (tx, rx) = mpsc::channel();
    ws.on_text(move |_ws, text| tx.send(text).unwrap());
    ws.open().unwrap();

    let long = "repetitive payload ".repeat(200);
    ws.send_text(&long).unwrap();
    assert_eq!(recv(&rx), format!("echo: {}", long));

    ws.close(status::NORMAL).unwrap();
}

#[test]
fn rejected_handshake_surfaces_as_error() {
    // A plain HTTP server that knows nothing about websockets.
    let server = ServerApplication::new()
        .incoming(|_req: HttpRequest| Ok(Handled::Done(scamper::HttpResponse::text("nope"))))
        .create("127.0.0.1:0")
        .unwrap();

    let client = ClientSettings::new().build();
    let result = websocket::connect(
        &client,
        &format!("ws://{}/chat", server.addr()),
        SessionConfig::default(),
    );
    assert!(result.is_err());
}
