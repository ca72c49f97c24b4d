/*
 * generator.rs
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

//! HTTP/1.x response generator: serializes the response head and chunked
//! framing into caller-supplied buffers and tells the send iterator what it
//! needs next. One generator per connection, reset between exchanges.
//!
//! Persistence is sticky: once cleared the head carries `Connection: close`
//! and completion schedules an output shutdown.

use bytes::BytesMut;
use std::fmt::Write as _;

use crate::protocol::http::error::HttpError;
use crate::protocol::http::request::Version;
use crate::protocol::http::response::{status_has_body, ResponseMeta};

/// What the generator produced, or what it needs before it can produce more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generate {
    /// Response metadata is required but was not supplied.
    NeedInfo,
    /// A header buffer is required.
    NeedHeader,
    /// The head did not fit the supplied buffer; retry with a larger one.
    HeaderOverflow,
    /// A small buffer for chunked framing is required.
    NeedChunk,
    /// A buffer for the terminal chunk is required.
    NeedChunkTrailer,
    /// Buffers hold bytes to write now.
    Flush,
    /// Schedule an output shutdown after completion.
    ShutdownOut,
    /// The current send is finished.
    Done,
    /// Call again.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenState {
    Start,
    Committed,
    Completing,
    End,
}

pub struct ResponseGenerator {
    state: GenState,
    persistent: bool,
    version: Version,
    /// HEAD request: body bytes are suppressed on the wire but still counted.
    head: bool,
    /// Decided body length; -1 means chunked or EOF-delimited.
    content_length: i64,
    content_written: u64,
    chunked: bool,
    no_body_status: bool,
    /// A chunk has been emitted; its terminating CRLF is still pending.
    chunk_open: bool,
    content_prepared: bool,
    flush_pending: bool,
    trailer_written: bool,
    shutdown_returned: bool,
    send_date: bool,
}

impl ResponseGenerator {
    pub fn new(send_date: bool) -> Self {
        Self {
            state: GenState::Start,
            persistent: true,
            version: Version::Http11,
            head: false,
            content_length: -1,
            content_written: 0,
            chunked: false,
            no_body_status: false,
            chunk_open: false,
            content_prepared: false,
            flush_pending: false,
            trailer_written: false,
            shutdown_returned: false,
            send_date,
        }
    }

    /// Bind the generator to the next exchange's request version and method.
    pub fn prepare(&mut self, version: Version, head: bool) {
        self.version = version;
        self.head = head;
    }

    /// Clearing persistence is one-way; it survives `reset`.
    pub fn set_persistent(&mut self, persistent: bool) {
        if !persistent {
            self.persistent = false;
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn is_committed(&self) -> bool {
        self.state != GenState::Start
    }

    pub fn is_ended(&self) -> bool {
        self.state == GenState::End
    }

    /// Whether the committed response may carry body bytes on the wire.
    pub fn body_allowed(&self) -> bool {
        !self.no_body_status
    }

    /// Prepare for the next exchange. Persistence survives.
    pub fn reset(&mut self) {
        self.state = GenState::Start;
        self.version = Version::Http11;
        self.head = false;
        self.content_length = -1;
        self.content_written = 0;
        self.chunked = false;
        self.no_body_status = false;
        self.chunk_open = false;
        self.content_prepared = false;
        self.flush_pending = false;
        self.trailer_written = false;
        self.shutdown_returned = false;
    }

    /// Serialize an informational response (100 Continue, 102 Processing)
    /// directly into `out`. Only legal before the final response commits.
    pub fn generate_interim(&mut self, status: u16, out: &mut BytesMut) {
        debug_assert_eq!(self.state, GenState::Start);
        let mut head = String::with_capacity(48);
        let _ = write!(
            head,
            "HTTP/1.1 {} {}\r\n\r\n",
            status,
            crate::protocol::http::response::standard_reason(status)
        );
        out.extend_from_slice(head.as_bytes());
    }

    /// Drive one step. `header` carries the buffer and its nominal capacity so
    /// an oversized head is detected as overflow rather than silently grown.
    pub fn generate(
        &mut self,
        meta: Option<&ResponseMeta>,
        header: Option<(&mut BytesMut, usize)>,
        chunk: Option<&mut BytesMut>,
        content: &[u8],
        last: bool,
    ) -> Result<Generate, HttpError> {
        match self.state {
            GenState::Start => {
                let Some(meta) = meta else {
                    return Ok(Generate::NeedInfo);
                };
                let Some((buf, capacity)) = header else {
                    return Ok(Generate::NeedHeader);
                };
                self.commit(meta, buf, capacity, content, last)
            }
            GenState::Committed => {
                if !content.is_empty() && !self.content_prepared {
                    // HEAD suppresses the body and its framing, but the bytes
                    // still count toward the declared length.
                    if self.chunked && !self.head {
                        let Some(cbuf) = chunk else {
                            return Ok(Generate::NeedChunk);
                        };
                        cbuf.clear();
                        let mut frame = String::with_capacity(16);
                        if self.chunk_open {
                            frame.push_str("\r\n");
                        }
                        let _ = write!(frame, "{:X}\r\n", content.len());
                        cbuf.extend_from_slice(frame.as_bytes());
                        self.chunk_open = true;
                    }
                    self.content_written += content.len() as u64;
                    if !self.head
                        && self.content_length >= 0
                        && self.content_written > self.content_length as u64
                    {
                        return Err(self.length_mismatch());
                    }
                    self.content_prepared = true;
                    self.flush_pending = true;
                }
                if self.flush_pending {
                    self.flush_pending = false;
                    return Ok(Generate::Flush);
                }
                if last {
                    self.state = GenState::Completing;
                    return Ok(Generate::Continue);
                }
                self.content_prepared = false;
                Ok(Generate::Done)
            }
            GenState::Completing => {
                if self.chunked && !self.head && !self.trailer_written {
                    let Some(cbuf) = chunk else {
                        return Ok(Generate::NeedChunkTrailer);
                    };
                    cbuf.clear();
                    if self.chunk_open {
                        cbuf.extend_from_slice(b"\r\n");
                    }
                    cbuf.extend_from_slice(b"0\r\n\r\n");
                    self.trailer_written = true;
                    return Ok(Generate::Flush);
                }
                if !self.head
                    && !self.chunked
                    && self.content_length >= 0
                    && self.content_written != self.content_length as u64
                {
                    return Err(self.length_mismatch());
                }
                if !self.persistent && !self.shutdown_returned {
                    self.shutdown_returned = true;
                    return Ok(Generate::ShutdownOut);
                }
                self.state = GenState::End;
                Ok(Generate::Done)
            }
            GenState::End => Ok(Generate::Done),
        }
    }

    fn commit(
        &mut self,
        meta: &ResponseMeta,
        buf: &mut BytesMut,
        capacity: usize,
        content: &[u8],
        last: bool,
    ) -> Result<Generate, HttpError> {
        self.no_body_status = !status_has_body(meta.status);

        // An application-supplied close token clears persistence too.
        if let Some(v) = meta.headers.get("Connection") {
            if v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")) {
                self.persistent = false;
            }
        }

        let explicit_length = meta.headers.contains("Content-Length");
        if self.no_body_status {
            self.content_length = 0;
        } else if meta.content_length >= 0 {
            self.content_length = meta.content_length;
        } else if let Some(v) = meta.headers.get("Content-Length") {
            self.content_length = v.trim().parse::<i64>().map_err(|_| {
                HttpError::bad_message(500, "Bad Content-Length in response")
            })?;
        } else if last {
            // The whole body is in this send.
            self.content_length = content.len() as i64;
        } else if self.version == Version::Http11 {
            self.chunked = true;
        } else {
            // HTTP/1.0 stream of unknown length: delimited by close.
            self.persistent = false;
        }

        // A declared length the single-send body cannot meet fails before the
        // head commits, so nothing is written for an impossible response.
        if last
            && !self.head
            && !self.no_body_status
            && self.content_length >= 0
            && content.len() as i64 != self.content_length
        {
            self.content_written = content.len() as u64;
            return Err(self.length_mismatch());
        }

        let mut head = String::with_capacity(256);
        let _ = write!(head, "HTTP/1.1 {} {}\r\n", meta.status, meta.reason_phrase());
        let mut has_connection = false;
        let mut has_date = false;
        for (name, value) in meta.headers.iter() {
            if name.eq_ignore_ascii_case("Connection") {
                has_connection = true;
            } else if name.eq_ignore_ascii_case("Date") {
                has_date = true;
            }
            let _ = write!(head, "{}: {}\r\n", name, value);
        }
        if !self.no_body_status {
            if self.chunked {
                head.push_str("Transfer-Encoding: chunked\r\n");
            } else if self.content_length >= 0 && !explicit_length {
                let _ = write!(head, "Content-Length: {}\r\n", self.content_length);
            }
        }
        if self.send_date && !has_date && meta.status >= 200 {
            let _ = write!(
                head,
                "Date: {}\r\n",
                chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT")
            );
        }
        if !has_connection {
            if !self.persistent {
                head.push_str("Connection: close\r\n");
            } else if self.version == Version::Http10 {
                head.push_str("Connection: keep-alive\r\n");
            }
        }
        head.push_str("\r\n");

        if head.len() > capacity {
            return Ok(Generate::HeaderOverflow);
        }
        buf.clear();
        buf.extend_from_slice(head.as_bytes());
        self.state = GenState::Committed;
        self.flush_pending = true;
        Ok(Generate::Continue)
    }

    fn length_mismatch(&self) -> HttpError {
        HttpError::bad_message(
            500,
            format!(
                "content-length {} != {}",
                self.content_length, self.content_written
            ),
        )
    }
}
