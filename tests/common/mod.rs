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

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use rstest::fixture;
use stonewire::http::HttpResponse;
use stonewire::network::ListenEndpoint;
use stonewire::setup_local_tracing;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

pub const WAIT: Duration = Duration::from_secs(5);

#[fixture]
#[once]
pub fn setup() {
    setup_local_tracing().expect("failed to setup tracing");
}

pub fn loopback() -> ListenEndpoint {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    ListenEndpoint::from(addr)
}

/// Poll `condition` until it holds, failing the test after [`WAIT`].
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Read until the peer closes, failing the test after [`WAIT`].
pub async fn read_to_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut rest))
        .await
        .expect("peer did not close in time")
        .expect("read failed");
    rest
}

/// Read one HTTP response head. Nothing after the head is consumed as long
/// as the server sends nothing else before the next request.
pub async fn read_response_head(stream: &mut TcpStream) -> HttpResponse {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = tokio::time::timeout(WAIT, stream.read(&mut byte))
            .await
            .expect("no response in time")
            .expect("read failed");
        assert_eq!(n, 1, "peer closed in the middle of a response head");
        head.push(byte[0]);
    }
    HttpResponse::parse(&head).expect("malformed response head")
}
