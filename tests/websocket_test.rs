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

mod common;

use bytes::{Bytes, BytesMut};
use common::{loopback, read_response_head, read_to_close, setup, WAIT};
use rstest::rstest;
use stonewire::framing::{OpCode, WebSocketFrame, FIXED_MASK_KEY};
use stonewire::network::{Acceptor, Connection};
use stonewire::websocket::handshake::{client_request, verify_response};
use stonewire::websocket::{MessageType, WebSocketConfig, WebSocketSession};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const RFC_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
const MAX: usize = 64;

type Messages = mpsc::UnboundedReceiver<(MessageType, Bytes)>;

/// Listen with a websocket session per connection; returns the acceptor (keep
/// it alive), the peer socket and the delivered messages.
async fn connect() -> (
    Acceptor<impl Fn(&Connection) -> WebSocketSession<mpsc::UnboundedSender<(MessageType, Bytes)>> + Send + Sync + 'static>,
    TcpStream,
    Messages,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = WebSocketConfig {
        max_handshake_size: 1024,
        max_message_size: MAX,
    };
    let mut acceptor = Acceptor::new(move |connection: &Connection| {
        WebSocketSession::new(connection, tx.clone(), &config)
    });
    let addr = acceptor.listen(loopback()).await.unwrap();
    let peer = TcpStream::connect(addr).await.unwrap();
    (acceptor, peer, rx)
}

async fn upgrade(peer: &mut TcpStream) {
    let request = client_request("localhost", "/chat", RFC_KEY);
    peer.write_all(&request.encode()).await.unwrap();
    let response = read_response_head(peer).await;
    verify_response(&response, RFC_KEY).unwrap();
}

fn masked(fin: bool, opcode: OpCode, payload: &'static [u8]) -> BytesMut {
    WebSocketFrame::new(fin, opcode, payload).encode(Some(FIXED_MASK_KEY))
}

async fn read_frame(peer: &mut TcpStream, len: usize) -> WebSocketFrame {
    let mut raw = BytesMut::zeroed(len);
    timeout(WAIT, peer.read_exact(&mut raw)).await.unwrap().unwrap();
    WebSocketFrame::parse(raw).unwrap()
}

#[rstest]
#[tokio::test]
async fn test_handshake_golden_key(#[from(setup)] _setup: ()) {
    let (_acceptor, mut peer, _messages) = connect().await;
    let request = client_request("server.example.com", "/chat", RFC_KEY);
    peer.write_all(&request.encode()).await.unwrap();

    let response = read_response_head(&mut peer).await;
    assert_eq!(response.status_code, 101);
    assert_eq!(response.status_message, "Switching Protocols");
    assert_eq!(response.header("Upgrade"), Some("websocket"));
    assert_eq!(response.header("Connection"), Some("Upgrade"));
    assert_eq!(response.header("Sec-WebSocket-Accept"), Some(RFC_ACCEPT));
}

#[rstest]
#[case::plain_http(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n", None)]
#[case::old_version(
    b"GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n\r\n",
    Some("13")
)]
#[case::missing_version(
    b"GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
    Some("13")
)]
#[tokio::test]
async fn test_bad_handshake_gets_400(
    #[from(setup)] _setup: (),
    #[case] request: &'static [u8],
    #[case] version_header: Option<&'static str>,
) {
    let (_acceptor, mut peer, _messages) = connect().await;
    peer.write_all(request).await.unwrap();

    let response = stonewire::http::HttpResponse::parse(&read_to_close(&mut peer).await).unwrap();
    assert_eq!(response.status_code, 400);
    assert!(response.content.as_ref().is_some_and(|body| !body.is_empty()));
    assert_eq!(response.header("Sec-WebSocket-Version"), version_header);
}

#[rstest]
#[tokio::test]
async fn test_malformed_handshake_closes_silently(#[from(setup)] _setup: ()) {
    let (_acceptor, mut peer, _messages) = connect().await;
    peer.write_all(b"NONSENSE\r\n\r\n").await.unwrap();
    assert!(read_to_close(&mut peer).await.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_continuation_reassembly(#[from(setup)] _setup: ()) {
    let (_acceptor, mut peer, mut messages) = connect().await;
    upgrade(&mut peer).await;

    peer.write_all(&masked(false, OpCode::Text, b"frag")).await.unwrap();
    peer.write_all(&masked(false, OpCode::Continuation, b"men")).await.unwrap();
    peer.write_all(&masked(true, OpCode::Continuation, b"ted")).await.unwrap();
    peer.write_all(&masked(true, OpCode::Binary, &[1, 2, 3])).await.unwrap();

    let (message_type, message) = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(message_type, MessageType::Text);
    assert_eq!(&message[..], b"fragmented");
    let (message_type, message) = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(message_type, MessageType::Binary);
    assert_eq!(&message[..], &[1, 2, 3]);
}

#[rstest]
#[tokio::test]
async fn test_ping_pong_and_close_echo(#[from(setup)] _setup: ()) {
    let (_acceptor, mut peer, _messages) = connect().await;
    upgrade(&mut peer).await;

    peer.write_all(&masked(true, OpCode::Ping, b"beat")).await.unwrap();
    let pong = read_frame(&mut peer, 2 + 4).await;
    assert_eq!(pong, WebSocketFrame::new(true, OpCode::Pong, &b"beat"[..]));

    // unsolicited pongs are ignored
    peer.write_all(&masked(true, OpCode::Pong, b"")).await.unwrap();

    // status 1000
    peer.write_all(&masked(true, OpCode::Close, &[0x03, 0xE8])).await.unwrap();
    let rest = read_to_close(&mut peer).await;
    assert_eq!(rest, vec![0x88, 2, 0x03, 0xE8]);
}

#[rstest]
#[tokio::test]
async fn test_protocol_violations_close_without_response(
    #[from(setup)] _setup: (),
    #[values(
        b"\x82\x7E\x04\x00",
        b"\x80\x03abc",
        b"\xC1\x00",
        b"\x83\x00"
    )]
    wire: &'static [u8],
) {
    let (_acceptor, mut peer, mut messages) = connect().await;
    upgrade(&mut peer).await;

    peer.write_all(wire).await.unwrap();
    assert!(read_to_close(&mut peer).await.is_empty());
    assert!(messages.try_recv().is_err());
}
