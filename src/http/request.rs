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

use bytes::{BufMut, Bytes, BytesMut};

use crate::AppError::MalformedFrame;
use crate::AppResult;

use super::{find_header, parse_header_line, split_head, CRLF, HTTP_VERSION_1_1};

/// An HTTP request head plus optional content. Headers keep the order and
/// case they were received with, repeated names included; lookups through
/// [`HttpRequest::header`] ignore case and return the first match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub request_uri: String,
    pub http_version: String,
    pub headers: Vec<(String, String)>,
    pub content: Bytes,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, request_uri: impl Into<String>) -> Self {
        HttpRequest {
            method: method.into(),
            request_uri: request_uri.into(),
            http_version: HTTP_VERSION_1_1.to_string(),
            headers: Vec::new(),
            content: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(self.headers.iter().map(|(k, v)| (k, v)), name)
    }

    /// Every value of `name`, in received order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    /// Parse a request. `data` is either a bare head, as cut out by the
    /// double newline framer, or a head followed by `\r\n\r\n` and content.
    pub fn parse(data: &[u8]) -> AppResult<HttpRequest> {
        let (head, content) = split_head(data)?;
        let mut lines = head.split(CRLF);

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (method, request_uri, http_version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(uri), Some(version), None) if version.starts_with("HTTP/") => {
                (method, uri, version)
            }
            _ => {
                return Err(MalformedFrame(format!(
                    "invalid request line: {:?}",
                    request_line
                )))
            }
        };

        let mut headers = Vec::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (name, value) = parse_header_line(line)?;
            headers.push((name.to_string(), value.to_string()));
        }

        Ok(HttpRequest {
            method: method.to_string(),
            request_uri: request_uri.to_string(),
            http_version: http_version.to_string(),
            headers,
            content: Bytes::copy_from_slice(content),
        })
    }

    /// Encode head and content; the head is terminated by `\r\n\r\n`.
    pub fn encode(&self) -> BytesMut {
        let mut wire = BytesMut::with_capacity(128 + self.content.len());
        wire.put_slice(
            format!(
                "{} {} {}{}",
                self.method, self.request_uri, self.http_version, CRLF
            )
            .as_bytes(),
        );
        for (name, value) in &self.headers {
            wire.put_slice(format!("{}: {}{}", name, value, CRLF).as_bytes());
        }
        wire.put_slice(CRLF.as_bytes());
        wire.put_slice(&self.content);
        wire
    }
}
