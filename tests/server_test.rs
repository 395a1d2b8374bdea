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

use std::net::SocketAddr;

use bytes::BytesMut;
use common::{read_response_head, read_to_close, setup, WAIT};
use rstest::rstest;
use stonewire::framing::{FramerKind, OpCode, WebSocketFrame, FIXED_MASK_KEY};
use stonewire::network::{Client, FramedSession};
use stonewire::service::NetworkConfig;
use stonewire::websocket::handshake::{client_request, verify_response};
use stonewire::{AppResult, Server, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<AppResult<()>>,
}

async fn start(framer: FramerKind) -> RunningServer {
    let mut config = ServerConfig {
        network: NetworkConfig {
            ip: "127.0.0.1".to_string(),
            port: 0,
            max_connection: 8,
        },
        ..Default::default()
    };
    config.framing.framer = framer;
    config.framing.max_message_size = 4096;

    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let server = Server::new(config);
        server
            .run(
                async {
                    let _ = shutdown_rx.await;
                },
                move |addr| {
                    let _ = ready_tx.send(addr);
                },
            )
            .await
    });
    let addr = timeout(WAIT, ready_rx).await.unwrap().unwrap();
    RunningServer {
        addr,
        shutdown,
        task,
    }
}

#[rstest]
#[tokio::test]
async fn test_framed_echo(
    #[from(setup)] _setup: (),
    #[values(
        FramerKind::LengthPrefix,
        FramerKind::NullTermination,
        FramerKind::DoubleNewLine
    )]
    kind: FramerKind,
) {
    let server = start(kind).await;

    let (tx, mut echoed) = mpsc::unbounded_channel::<BytesMut>();
    let mut client = Client::new();
    client
        .connect(server.addr, FramedSession::new(kind.build(4096), tx))
        .await
        .unwrap();
    let framer = kind.build(4096);
    let messages: [&[u8]; 3] = [b"first", b"second message", b"third"];
    for message in messages {
        client.send(&framer.frame(message).unwrap()).await.unwrap();
    }
    for expected in messages {
        let message = timeout(WAIT, echoed.recv()).await.unwrap().unwrap();
        assert_eq!(&message[..], expected);
    }

    // shutdown closes the live connection
    server.shutdown.send(()).unwrap();
    timeout(WAIT, server.task).await.unwrap().unwrap().unwrap();
    let connection = client.connection().unwrap().clone();
    timeout(WAIT, connection.closed()).await.unwrap();
    assert!(!client.is_connected());
}

#[rstest]
#[tokio::test]
async fn test_websocket_echo(#[from(setup)] _setup: ()) {
    let server = start(FramerKind::WebSocket).await;
    let key = "x3JJHMbDL1EzLkh9GBhXDw==";

    let mut peer = TcpStream::connect(server.addr).await.unwrap();
    peer.write_all(&client_request("localhost", "/echo", key).encode())
        .await
        .unwrap();
    verify_response(&read_response_head(&mut peer).await, key).unwrap();

    let frame = WebSocketFrame::new(true, OpCode::Text, &b"hello"[..]);
    peer.write_all(&frame.encode(Some(FIXED_MASK_KEY))).await.unwrap();
    let mut raw = BytesMut::zeroed(2 + 5);
    timeout(WAIT, peer.read_exact(&mut raw)).await.unwrap().unwrap();
    assert_eq!(WebSocketFrame::parse(raw).unwrap(), frame);

    server.shutdown.send(()).unwrap();
    timeout(WAIT, server.task).await.unwrap().unwrap().unwrap();
    assert!(read_to_close(&mut peer).await.is_empty());
}
