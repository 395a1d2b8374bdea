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

const CONTENT_LENGTH: &str = "Content-Length";

/// An HTTP response. Headers are kept in insertion order, which is the order
/// they are written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub http_version: String,
    pub status_code: u16,
    pub status_message: String,
    pub headers: Vec<(String, String)>,
    pub content: Option<Bytes>,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_message: impl Into<String>) -> Self {
        HttpResponse {
            http_version: HTTP_VERSION_1_1.to_string(),
            status_code,
            status_message: status_message.into(),
            headers: Vec::new(),
            content: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn with_content(mut self, content: impl Into<Bytes>) -> Self {
        self.set_content(content);
        self
    }

    /// Set the content and a matching `Content-Length` header.
    pub fn set_content(&mut self, content: impl Into<Bytes>) {
        let content = content.into();
        self.headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case(CONTENT_LENGTH));
        self.add_header(CONTENT_LENGTH, content.len().to_string());
        self.content = Some(content);
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(self.headers.iter().map(|(k, v)| (k, v)), name)
    }

    pub fn encode(&self) -> BytesMut {
        let content_len = self.content.as_ref().map_or(0, Bytes::len);
        let mut wire = BytesMut::with_capacity(128 + content_len);
        wire.put_slice(
            format!(
                "{} {} {}{}",
                self.http_version, self.status_code, self.status_message, CRLF
            )
            .as_bytes(),
        );
        for (name, value) in &self.headers {
            wire.put_slice(format!("{}: {}{}", name, value, CRLF).as_bytes());
        }
        wire.put_slice(CRLF.as_bytes());
        if let Some(content) = &self.content {
            wire.put_slice(content);
        }
        wire
    }

    /// Parse a response head, optionally followed by `\r\n\r\n` and content.
    pub fn parse(data: &[u8]) -> AppResult<HttpResponse> {
        let (head, content) = split_head(data)?;
        let mut lines = head.split(CRLF);

        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let http_version = parts.next().unwrap_or_default();
        let status_code = parts.next().and_then(|code| code.parse::<u16>().ok());
        let (http_version, status_code) = match status_code {
            Some(code) if http_version.starts_with("HTTP/") => (http_version, code),
            _ => {
                return Err(MalformedFrame(format!(
                    "invalid status line: {:?}",
                    status_line
                )))
            }
        };
        let status_message = parts.next().unwrap_or_default().trim();

        let mut headers = Vec::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (name, value) = parse_header_line(line)?;
            headers.push((name.to_string(), value.to_string()));
        }

        Ok(HttpResponse {
            http_version: http_version.to_string(),
            status_code,
            status_message: status_message.to_string(),
            headers,
            content: (!content.is_empty()).then(|| Bytes::copy_from_slice(content)),
        })
    }
}
