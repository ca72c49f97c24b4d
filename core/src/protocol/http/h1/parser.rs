/*
 * parser.rs
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

//! HTTP/1.x request push parser: request line, headers, body (Content-Length
//! or chunked), trailers. Feed bytes via `receive`; the listener is invoked as
//! complete tokens are parsed.
//!
//! The parser pauses at headers-complete: the connection interprets the
//! collected fields and calls `set_body_mode` before parsing resumes. Body
//! segments are split off the input buffer without copying.

use bytes::{Buf, Bytes, BytesMut};

use crate::protocol::http::error::HttpError;
use crate::protocol::http::request::{Method, Version};

/// Callback for request events, in wire order: `start_request`, `header`*,
/// `headers_complete`, `content`*, `trailer`*, `message_complete`. For a
/// message without a body the connection observes completion through
/// `set_body_mode` instead of a `message_complete` callback.
pub trait RequestListener {
    fn start_request(&mut self, method: Method, target: &str, version: Version);
    fn header(&mut self, name: &str, value: &str);
    fn headers_complete(&mut self);
    /// A body segment split from the input buffer. `last` marks the final
    /// segment of a known-length body; chunked bodies end through
    /// `message_complete` (possibly after trailers).
    fn content(&mut self, data: Bytes, last: bool);
    fn trailer(&mut self, name: &str, value: &str);
    fn message_complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    StartLine,
    Headers,
    /// Headers done; the connection must call `set_body_mode`.
    HeadersComplete,
    FixedBody,
    ChunkSize,
    ChunkData,
    Trailer,
    /// Message done; pipelined bytes stay untouched until `reset`.
    Complete,
    /// No further messages will be parsed on this connection.
    Closed,
}

/// Push parser for HTTP/1.x requests, reused across exchanges on a persistent
/// connection (`reset` between messages, `close` when done for good).
pub struct RequestParser {
    state: ParseState,
    /// Fixed body length (-1 for chunked).
    content_length: i64,
    bytes_received: i64,
    chunk_remaining: i64,
    at_eof: bool,
    /// Request line + header section bytes consumed so far.
    head_size: usize,
    max_head_size: usize,
}

impl RequestParser {
    pub fn new(max_head_size: usize) -> Self {
        Self {
            state: ParseState::StartLine,
            content_length: -1,
            bytes_received: 0,
            chunk_remaining: 0,
            at_eof: false,
            head_size: 0,
            max_head_size,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ParseState::Closed
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    /// True when no byte of a new request has been consumed yet.
    pub fn is_at_start(&self) -> bool {
        self.state == ParseState::StartLine && self.head_size == 0
    }

    /// Mark transport EOF. Interpreted on the next `receive`: EOF at start is a
    /// clean close, EOF mid-message is an early-EOF failure.
    pub fn mark_eof(&mut self) {
        self.at_eof = true;
    }

    pub fn is_at_eof(&self) -> bool {
        self.at_eof
    }

    /// Prepare for the next message on a persistent connection.
    pub fn reset(&mut self) {
        debug_assert_eq!(self.state, ParseState::Complete);
        self.state = ParseState::StartLine;
        self.content_length = -1;
        self.bytes_received = 0;
        self.chunk_remaining = 0;
        self.head_size = 0;
    }

    /// No further parsing; a closed parser only ever reports EOF.
    pub fn close(&mut self) {
        self.state = ParseState::Closed;
    }

    /// Find CRLF in the readable part of buf; returns the offset of the CR.
    fn find_crlf(buf: &[u8]) -> Option<usize> {
        let mut i = 0;
        while i + 1 < buf.len() {
            if buf[i] == b'\r' && buf[i + 1] == b'\n' {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    /// Consume and parse as much as possible from buf. Returns whether the
    /// header section completed during this call. Partial tokens remain in buf.
    pub fn receive<L: RequestListener>(
        &mut self,
        buf: &mut BytesMut,
        listener: &mut L,
    ) -> Result<bool, HttpError> {
        let mut headers_done = false;
        'parse: while !buf.is_empty() {
            match self.state {
                ParseState::StartLine => {
                    let line_end = match Self::find_crlf(buf) {
                        Some(n) => n,
                        None => {
                            self.check_head_size(buf.len())?;
                            break 'parse;
                        }
                    };
                    self.check_head_size(line_end + 2)?;
                    self.head_size += line_end + 2;
                    let line = buf.split_to(line_end + 2);
                    let line_str = std::str::from_utf8(&line[..line_end])
                        .map_err(|_| HttpError::bad_message(400, "Bad request line"))?;
                    let mut parts = line_str.split(' ').filter(|p| !p.is_empty());
                    let method = parts
                        .next()
                        .ok_or_else(|| HttpError::bad_message(400, "Bad request line"))?;
                    let target = parts
                        .next()
                        .ok_or_else(|| HttpError::bad_message(400, "Bad request line"))?;
                    let version = match parts.next() {
                        Some(token) => Version::from_token(token)
                            .ok_or_else(|| HttpError::bad_message(400, "Unknown version"))?,
                        None => Version::Http09,
                    };
                    if parts.next().is_some() {
                        return Err(HttpError::bad_message(400, "Bad request line"));
                    }
                    listener.start_request(Method::from_token(method), target, version);
                    if version == Version::Http09 {
                        // No header section in HTTP/0.9.
                        self.state = ParseState::HeadersComplete;
                        listener.headers_complete();
                        headers_done = true;
                        break 'parse;
                    }
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let line_end = match Self::find_crlf(buf) {
                        Some(n) => n,
                        None => {
                            self.check_head_size(buf.len())?;
                            break 'parse;
                        }
                    };
                    self.check_head_size(line_end + 2)?;
                    self.head_size += line_end + 2;
                    if line_end == 0 {
                        buf.advance(2);
                        self.state = ParseState::HeadersComplete;
                        listener.headers_complete();
                        headers_done = true;
                        break 'parse;
                    }
                    let line = buf.split_to(line_end + 2);
                    let line_str = std::str::from_utf8(&line[..line_end])
                        .map_err(|_| HttpError::bad_message(400, "Bad header encoding"))?;
                    if line_str.starts_with(' ') || line_str.starts_with('\t') {
                        return Err(HttpError::bad_message(400, "Header folding"));
                    }
                    let colon = line_str
                        .find(':')
                        .ok_or_else(|| HttpError::bad_message(400, "Bad header"))?;
                    let name = &line_str[..colon];
                    if name.is_empty() || name.ends_with(' ') || name.ends_with('\t') {
                        return Err(HttpError::bad_message(400, "Bad header name"));
                    }
                    listener.header(name, line_str[colon + 1..].trim());
                }
                ParseState::FixedBody => {
                    let remaining = (self.content_length - self.bytes_received) as usize;
                    let to_read = remaining.min(buf.len());
                    if to_read > 0 {
                        let data = buf.split_to(to_read).freeze();
                        self.bytes_received += to_read as i64;
                        let last = self.bytes_received >= self.content_length;
                        listener.content(data, last);
                        if last {
                            listener.message_complete();
                            self.state = ParseState::Complete;
                        }
                    }
                }
                ParseState::ChunkSize => {
                    let line_end = match Self::find_crlf(buf) {
                        Some(n) => n,
                        None => break 'parse,
                    };
                    let line = buf.split_to(line_end + 2);
                    let line_str = std::str::from_utf8(&line[..line_end])
                        .map_err(|_| HttpError::bad_message(400, "Bad chunk size"))?;
                    // Chunk extensions are ignored.
                    let hex = line_str.split(';').next().unwrap_or(line_str).trim();
                    self.chunk_remaining = i64::from_str_radix(hex, 16)
                        .map_err(|_| HttpError::bad_message(400, "Bad chunk size"))?;
                    if self.chunk_remaining == 0 {
                        self.state = ParseState::Trailer;
                    } else {
                        self.state = ParseState::ChunkData;
                    }
                }
                ParseState::ChunkData => {
                    let to_read = (self.chunk_remaining as usize).min(buf.len());
                    if to_read > 0 {
                        let data = buf.split_to(to_read).freeze();
                        self.chunk_remaining -= to_read as i64;
                        listener.content(data, false);
                    }
                    if self.chunk_remaining == 0 {
                        if buf.len() < 2 {
                            break 'parse;
                        }
                        if &buf[..2] != b"\r\n" {
                            return Err(HttpError::bad_message(400, "Bad chunk terminator"));
                        }
                        buf.advance(2);
                        self.state = ParseState::ChunkSize;
                    }
                }
                ParseState::Trailer => {
                    let line_end = match Self::find_crlf(buf) {
                        Some(n) => n,
                        None => break 'parse,
                    };
                    if line_end == 0 {
                        buf.advance(2);
                        listener.message_complete();
                        self.state = ParseState::Complete;
                        continue;
                    }
                    let line = buf.split_to(line_end + 2);
                    let line_str = std::str::from_utf8(&line[..line_end])
                        .map_err(|_| HttpError::bad_message(400, "Bad trailer"))?;
                    if let Some(colon) = line_str.find(':') {
                        listener.trailer(line_str[..colon].trim_end(), line_str[colon + 1..].trim());
                    } else {
                        return Err(HttpError::bad_message(400, "Bad trailer"));
                    }
                }
                ParseState::HeadersComplete | ParseState::Complete | ParseState::Closed => {
                    // Waiting on the connection: body mode, reset, or nothing.
                    break 'parse;
                }
            }
        }
        if self.at_eof {
            match self.state {
                ParseState::StartLine if buf.is_empty() && self.head_size == 0 => {
                    self.state = ParseState::Closed;
                }
                ParseState::HeadersComplete | ParseState::Complete | ParseState::Closed => {}
                _ => return Err(HttpError::EarlyEof),
            }
        }
        Ok(headers_done)
    }

    /// Called by the connection after interpreting the header fields. Returns
    /// true when the message has no body and is already complete.
    pub fn set_body_mode(&mut self, content_length: Option<u64>, chunked: bool) -> bool {
        if self.state != ParseState::HeadersComplete {
            return false;
        }
        if chunked {
            self.content_length = -1;
            self.state = ParseState::ChunkSize;
            false
        } else {
            match content_length {
                Some(cl) if cl > 0 => {
                    self.content_length = cl as i64;
                    self.bytes_received = 0;
                    self.state = ParseState::FixedBody;
                    false
                }
                _ => {
                    self.state = ParseState::Complete;
                    true
                }
            }
        }
    }

    fn check_head_size(&self, pending: usize) -> Result<(), HttpError> {
        if self.head_size + pending > self.max_head_size {
            return Err(HttpError::bad_message(431, "Request header too large"));
        }
        Ok(())
    }
}
