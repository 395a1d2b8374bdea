// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Opening handshake, RFC 6455 section 4.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};

use crate::http::{HttpRequest, HttpResponse};
use crate::AppError::MalformedFrame;
use crate::AppResult;

pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const WS_VERSION: &str = "13";

/// `Base64(SHA1(client_key + WS_GUID))`
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// How the server answers a handshake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// send the `101` response and switch to frames
    Upgrade(HttpResponse),
    /// send the `400` response and close
    Reject(HttpResponse),
}

/// Validate an opening handshake request.
///
/// A request without `Upgrade: websocket` or without a `Sec-WebSocket-Key` is
/// not a WebSocket request. A WebSocket request asking for any version other
/// than 13 is refused with the supported version in the response.
pub fn respond(request: &HttpRequest) -> HandshakeOutcome {
    let is_websocket = request
        .header("Upgrade")
        .is_some_and(|upgrade| upgrade.eq_ignore_ascii_case("websocket"));
    let client_key = request.header("Sec-WebSocket-Key").filter(|key| !key.is_empty());

    let Some(client_key) = client_key.filter(|_| is_websocket) else {
        return HandshakeOutcome::Reject(bad_request(
            "not a websocket handshake: Upgrade: websocket and Sec-WebSocket-Key are required",
        ));
    };
    if request.header("Sec-WebSocket-Version") != Some(WS_VERSION) {
        return HandshakeOutcome::Reject(
            bad_request("unsupported websocket version, only 13 is supported")
                .with_header("Sec-WebSocket-Version", WS_VERSION),
        );
    }
    HandshakeOutcome::Upgrade(switching_protocols(client_key))
}

pub fn switching_protocols(client_key: &str) -> HttpResponse {
    HttpResponse::new(101, "Switching Protocols")
        .with_header("Upgrade", "websocket")
        .with_header("Connection", "Upgrade")
        .with_header("Sec-WebSocket-Accept", compute_accept_key(client_key))
}

pub fn bad_request(reason: &str) -> HttpResponse {
    HttpResponse::new(400, "Bad Request")
        .with_header("Content-Type", "text/plain")
        .with_header("Connection", "close")
        .with_content(reason.to_string())
}

/// Build the opening handshake a client sends. `key` is the base64 nonce the
/// server must answer with its accept key.
pub fn client_request(host: &str, path: &str, key: &str) -> HttpRequest {
    HttpRequest::new("GET", path)
        .with_header("Host", host)
        .with_header("Upgrade", "websocket")
        .with_header("Connection", "Upgrade")
        .with_header("Sec-WebSocket-Key", key)
        .with_header("Sec-WebSocket-Version", WS_VERSION)
}

/// Check a server's answer to [`client_request`] made with `key`.
pub fn verify_response(response: &HttpResponse, key: &str) -> AppResult<()> {
    if response.status_code != 101 {
        return Err(MalformedFrame(format!(
            "handshake refused: {} {}",
            response.status_code, response.status_message
        )));
    }
    let expected = compute_accept_key(key);
    match response.header("Sec-WebSocket-Accept") {
        Some(accept) if accept == expected => Ok(()),
        accept => Err(MalformedFrame(format!(
            "handshake accept key mismatch: expected {}, got {:?}",
            expected, accept
        ))),
    }
}
