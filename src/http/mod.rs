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

//! Minimal HTTP/1.1 request and response heads, just enough for the
//! WebSocket opening handshake.
//!
//! Messages are cut out of the stream by `DoubleNewLineFramer`, so a parsed
//! head usually arrives without its trailing `\r\n\r\n`. `Content-Length` is
//! never consulted; any bytes after the first blank line are content.

pub use request::HttpRequest;
pub use response::HttpResponse;

mod request;
mod response;

use crate::AppError::MalformedFrame;
use crate::AppResult;

pub const HTTP_VERSION_1_1: &str = "HTTP/1.1";

const CRLF: &str = "\r\n";
const HEAD_END: &[u8] = b"\r\n\r\n";

/// Split `data` into a UTF-8 head and the content following the first blank
/// line, if any.
fn split_head(data: &[u8]) -> AppResult<(&str, &[u8])> {
    let (head, content) = match data
        .windows(HEAD_END.len())
        .position(|window| window == HEAD_END)
    {
        Some(end) => (&data[..end], &data[end + HEAD_END.len()..]),
        None => (data, &data[data.len()..]),
    };
    let head = std::str::from_utf8(head)
        .map_err(|e| MalformedFrame(format!("http head is not utf-8: {}", e)))?;
    Ok((head, content))
}

/// `Name: value`, both trimmed. Only the first colon separates, so values
/// such as `host:port` survive.
fn parse_header_line(line: &str) -> AppResult<(&str, &str)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| MalformedFrame(format!("header line without ':': {:?}", line)))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(MalformedFrame(format!("header line without a name: {:?}", line)));
    }
    Ok((name, value.trim()))
}

fn find_header<'a, I>(headers: I, name: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    headers
        .into_iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
