/*
 * response.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Portiere, a lightweight HTTP/1.x server.
 *
 * Portiere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Portiere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Portiere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Response metadata: status, reason, headers, declared content length.

use crate::protocol::http::request::Headers;

/// Response head supplied by the application (or synthesized for protocol
/// errors). Body bytes travel separately through the send path.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status: u16,
    /// Explicit reason phrase; the standard phrase for the status when None.
    pub reason: Option<String>,
    pub headers: Headers,
    /// Declared body length; -1 lets the generator choose the framing.
    pub content_length: i64,
}

impl ResponseMeta {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: Headers::new(),
            content_length: -1,
        }
    }

    pub fn with_reason(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
            headers: Headers::new(),
            content_length: -1,
        }
    }

    /// Add a header. Returns self for chaining.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn content_length(mut self, length: i64) -> Self {
        self.content_length = length;
        self
    }

    pub fn reason_phrase(&self) -> &str {
        match &self.reason {
            Some(r) => r,
            None => standard_reason(self.status),
        }
    }
}

/// Whether a response with this status carries a body at all.
pub fn status_has_body(status: u16) -> bool {
    !(status < 200 || status == 204 || status == 304)
}

pub fn standard_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        417 => "Expectation Failed",
        426 => "Upgrade Required",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}
