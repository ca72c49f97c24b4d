/*
 * exchange.rs
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

//! Per-request state on a connection: collected headers with their
//! interpretation (connection tokens, authority, expectations, body framing),
//! the queued body segments, and the request/response completion flags.

use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Instant;

use crate::buffer::Retained;
use crate::protocol::http::error::HttpError;
use crate::protocol::http::request::{Headers, Method, RequestMeta, TargetForm, UriBuilder, Version};

/// One body segment split from the input buffer. The guard keeps the pooled
/// buffer retained while the segment is alive; drop (or copy out) the chunk
/// before asking the connection for more content.
#[derive(Debug)]
pub struct Chunk {
    pub data: Bytes,
    /// Final segment of a known-length body.
    pub last: bool,
    _retained: Option<Retained>,
}

impl Chunk {
    pub fn new(data: Bytes, last: bool) -> Self {
        Self {
            data,
            last,
            _retained: None,
        }
    }

    pub(crate) fn retained(data: Bytes, last: bool, guard: Retained) -> Self {
        Self {
            data,
            last,
            _retained: Some(guard),
        }
    }
}

/// A unit of request body handed to the application.
#[derive(Debug)]
pub enum Content {
    Chunk(Chunk),
    /// Final segment carrying trailer fields; implies end of body.
    Trailers(Headers),
    /// End of body, no trailers.
    Eof,
}

/// State of one HTTP request/response exchange. Created at the parser's
/// start-request callback, committed at headers-complete, terminated when the
/// response has been sent with `last` and the request is fully parsed.
pub struct Exchange {
    id: u64,
    started: Instant,
    pub method: Method,
    pub version: Version,
    uri: Option<UriBuilder>,
    meta: Option<RequestMeta>,
    /// Declared Content-Length; -1 when absent.
    pub content_length: i64,
    pub chunked: bool,
    authority: Option<String>,
    pub upgrade: Option<String>,
    pub expect_100: bool,
    pub expect_102: bool,
    pub unknown_expectation: bool,
    pub connection_close: bool,
    pub connection_keep_alive: bool,
    headers: Headers,
    trailers: Option<Headers>,
    content: VecDeque<Content>,
    pub persistent: bool,
    pub dispatched: bool,
    pub request_complete: bool,
    pub response_complete: bool,
    /// First header-interpretation failure, surfaced at headers-complete.
    error: Option<HttpError>,
}

impl Exchange {
    pub fn new(id: u64, method: Method, target: &str, version: Version) -> Self {
        let (uri, error) = match UriBuilder::parse(target, &method) {
            Ok(u) => (Some(u), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            id,
            started: Instant::now(),
            method,
            version,
            uri,
            meta: None,
            content_length: -1,
            chunked: false,
            authority: None,
            upgrade: None,
            expect_100: false,
            expect_102: false,
            unknown_expectation: false,
            connection_close: false,
            connection_keep_alive: false,
            headers: Headers::new(),
            trailers: None,
            content: VecDeque::new(),
            persistent: false,
            dispatched: false,
            request_complete: false,
            response_complete: false,
            error,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Collect one header field and interpret the ones the engine acts on.
    pub fn on_header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("Connection") {
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    self.connection_close = true;
                } else if token.eq_ignore_ascii_case("keep-alive")
                    && self.version == Version::Http10
                {
                    self.connection_keep_alive = true;
                }
            }
        } else if name.eq_ignore_ascii_case("Host") {
            if self.authority.is_some() {
                self.set_error(HttpError::bad_message(400, "Duplicate Host"));
            } else {
                self.authority = Some(value.to_string());
            }
        } else if name.eq_ignore_ascii_case("Expect") {
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("100-continue") {
                    self.expect_100 = true;
                } else if token.eq_ignore_ascii_case("102-processing") {
                    self.expect_102 = true;
                } else {
                    self.unknown_expectation = true;
                    self.expect_100 = false;
                    self.expect_102 = false;
                }
            }
        } else if name.eq_ignore_ascii_case("Upgrade") {
            self.upgrade = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Content-Length") {
            match value.trim().parse::<i64>() {
                Ok(cl) if cl >= 0 => {
                    if self.content_length >= 0 && self.content_length != cl {
                        self.set_error(HttpError::bad_message(400, "Duplicate Content-Length"));
                    } else {
                        self.content_length = cl;
                    }
                }
                _ => self.set_error(HttpError::bad_message(400, "Bad Content-Length")),
            }
        } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("chunked") {
                    self.chunked = true;
                } else if !token.is_empty() {
                    self.set_error(HttpError::bad_message(400, "Unknown transfer encoding"));
                }
            }
        }
        self.headers.add(name, value);
    }

    fn set_error(&mut self, error: HttpError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn take_error(&mut self) -> Option<HttpError> {
        self.error.take()
    }

    /// True when the request carried no header fields at all (the h2c preface).
    pub fn headers_are_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Effective body length for the parser: chunked overrides Content-Length
    /// per RFC 7230 §3.3.3.
    pub fn body_length(&self) -> Option<u64> {
        if self.chunked || self.content_length < 0 {
            None
        } else {
            Some(self.content_length as u64)
        }
    }

    /// Normalize and commit the URI, then freeze the request metadata. The
    /// fallback authority (the transport's local address) applies to targets
    /// that carry none; CONNECT always has its own.
    pub fn commit(
        &mut self,
        scheme: &str,
        fallback_authority: Option<String>,
    ) -> Result<&RequestMeta, HttpError> {
        let mut uri = match self.uri.take() {
            Some(u) => u,
            None => return Err(HttpError::bad_message(400, "Bad request target")),
        };
        uri.normalize()?;
        if uri.form() != TargetForm::Authority {
            uri.set_scheme(scheme);
            if let Some(host) = &self.authority {
                uri.set_authority(host);
            } else if let Some(local) = fallback_authority {
                uri.set_authority(&local);
            }
        }
        let meta = RequestMeta {
            method: self.method.clone(),
            uri: uri.build(),
            version: self.version,
            headers: self.headers.clone(),
            content_length: if self.chunked { -1 } else { self.content_length },
            upgrade: self.upgrade.clone(),
        };
        Ok(self.meta.insert(meta))
    }

    pub fn meta(&self) -> Option<&RequestMeta> {
        self.meta.as_ref()
    }

    pub fn push_content(&mut self, content: Content) {
        // The client sent body bytes anyway; the 100-continue expectation is moot.
        self.expect_100 = false;
        self.content.push_back(content);
    }

    pub fn pop_content(&mut self) -> Option<Content> {
        self.content.pop_front()
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    pub fn add_trailer(&mut self, name: &str, value: &str) {
        self.trailers
            .get_or_insert_with(Headers::new)
            .add(name, value);
    }

    pub fn take_trailers(&mut self) -> Option<Headers> {
        self.trailers.take()
    }

    pub fn is_complete(&self) -> bool {
        self.request_complete && self.response_complete
    }
}
