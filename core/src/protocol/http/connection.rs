/*
 * connection.rs
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

//! HTTP/1 server connection: owns one transport endpoint, one parser, one
//! generator, one pooled input buffer, and at most one active exchange. Drives
//! the read loop, hands requests to the application `Channel`, serializes
//! responses through the send iterator, and cedes the endpoint on upgrade.
//!
//! The engine never blocks: it reports what it waits for via `interest()` and
//! is re-entered by its driver with `on_readable`/`on_writable`/
//! `on_dispatched`. Exchanges are strictly serialized; pipelined bytes wait in
//! the input buffer until the previous exchange completes.

use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, IoSlice};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::{BufferPool, PooledBuffer, Retained};
use crate::config::HttpConfig;
use crate::net::{FillResult, Transport};
use crate::protocol::http::error::HttpError;
use crate::protocol::http::exchange::{Chunk, Content, Exchange};
use crate::protocol::http::h1::{RequestListener, RequestParser, ResponseGenerator};
use crate::protocol::http::handler::{Channel, SendCallback, UpgradeHandler};
use crate::protocol::http::request::{Method, RequestMeta, Version};
use crate::protocol::http::response::ResponseMeta;
use crate::protocol::http::send::{SendIterator, SendProgress};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// What the connection is waiting for. The driver translates this into
/// endpoint readiness waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Wait for readability, then call `on_readable`.
    Read,
    /// Wait for writability, then call `on_writable`.
    Write,
    /// Re-invoke `on_dispatched` off the current stack (pipelined request).
    Dispatch,
    /// The application holds the exchange; nothing to wait for here.
    Idle,
    /// Closed or upgraded; the driver is done with this connection.
    Closed,
}

/// One HTTP/1 connection over one endpoint.
pub struct HttpConnection {
    config: HttpConfig,
    pool: Arc<BufferPool>,
    transport: Option<Box<dyn Transport>>,
    channel: Option<Box<dyn Channel>>,
    upgrade: Option<Box<dyn UpgradeHandler>>,
    parser: RequestParser,
    generator: ResponseGenerator,
    input: Option<PooledBuffer>,
    send: SendIterator,
    exchange: Option<Exchange>,
    /// Informational response bytes not yet accepted by the endpoint.
    pending_interim: Option<BytesMut>,
    bytes_in: u64,
    bytes_out: u64,
    fill_interest: bool,
    /// Single-shot content demand registration.
    fill_demanded: bool,
    dispatch_pending: bool,
    /// Completion requested while a send was in flight.
    pending_complete: bool,
    in_fill_loop: bool,
    upgraded: bool,
    shutting_down: bool,
    id: u64,
    exchange_seq: u64,
}

impl HttpConnection {
    pub fn new(
        config: HttpConfig,
        pool: Arc<BufferPool>,
        transport: Box<dyn Transport>,
        channel: Box<dyn Channel>,
    ) -> Self {
        let parser = RequestParser::new(config.max_request_head_size);
        let generator = ResponseGenerator::new(config.send_date_header);
        Self {
            config,
            pool,
            transport: Some(transport),
            channel: Some(channel),
            upgrade: None,
            parser,
            generator,
            input: None,
            send: SendIterator::new(),
            exchange: None,
            pending_interim: None,
            bytes_in: 0,
            bytes_out: 0,
            fill_interest: false,
            fill_demanded: false,
            dispatch_pending: false,
            pending_complete: false,
            in_fill_loop: false,
            upgraded: false,
            shutting_down: false,
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            exchange_seq: 0,
        }
    }

    /// Install the successor-protocol hook (h2c, websocket).
    pub fn set_upgrade_handler(&mut self, handler: Box<dyn UpgradeHandler>) {
        self.upgrade = Some(handler);
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }

    /// The connector is going away: the next response closes the connection.
    pub fn initiate_shutdown(&mut self) {
        self.shutting_down = true;
    }

    fn transport_open(&self) -> bool {
        self.transport.as_ref().map_or(false, |t| t.is_open())
    }

    fn transport_output_shutdown(&self) -> bool {
        self.transport.as_ref().map_or(true, |t| t.is_output_shutdown())
    }

    /// What the driver should wait for next.
    pub fn interest(&self) -> Interest {
        if self.upgraded || !self.transport_open() {
            return Interest::Closed;
        }
        if self.pending_interim.is_some() || self.send.is_scheduled() {
            return Interest::Write;
        }
        if self.dispatch_pending {
            return Interest::Dispatch;
        }
        if self.fill_interest || self.fill_demanded {
            return Interest::Read;
        }
        Interest::Idle
    }

    /// Readability arrived: route to the content demand or the main read loop.
    pub fn on_readable(&mut self) {
        if self.fill_demanded {
            self.on_content_fillable();
        } else {
            self.on_fillable();
        }
    }

    /// Main read loop: fill, parse, dispatch, repeat until something blocks.
    pub fn on_fillable(&mut self) {
        self.in_fill_loop = true;
        self.fill_interest = false;
        let result = self.fill_loop();
        self.in_fill_loop = false;
        if let Err(e) = result {
            match e {
                HttpError::BadMessage { status, reason } => {
                    self.handle_bad_message(status, &reason)
                }
                HttpError::EarlyEof => self.handle_bad_message(400, "Early EOF"),
                other => {
                    eprintln!("[http] connection {}: {}", self.id, other);
                    self.close_transport();
                }
            }
        }
    }

    fn fill_loop(&mut self) -> Result<(), HttpError> {
        while self.transport_open() {
            if self.exchange.as_ref().map_or(false, |x| x.dispatched) {
                // The application owns the exchange; it resumes us.
                break;
            }
            let filled = self.fill()?;
            if filled == FillResult::Eof && self.transport_output_shutdown() {
                self.close_transport();
                break;
            }
            let headers_done = self.parse()?;
            if self.upgraded {
                break;
            }
            if headers_done {
                self.on_headers_complete()?;
                if self.upgraded {
                    break;
                }
                if self.exchange.is_some() {
                    self.dispatch();
                    if self.exchange.is_some() {
                        break;
                    }
                }
                // Exchange finished inline; look for a pipelined request.
                continue;
            }
            match filled {
                FillResult::Eof => {
                    if let Some(t) = self.transport.as_deref_mut() {
                        t.shutdown_output();
                    }
                    self.close_transport();
                    break;
                }
                FillResult::WouldBlock => {
                    self.fill_interest = true;
                    break;
                }
                FillResult::Data(_) => {}
            }
        }
        Ok(())
    }

    /// Fill pump: lazily acquire the input buffer and append transport bytes.
    /// A zero-byte outcome is retried once (encrypted endpoints can unwrap
    /// zero application bytes on the first call).
    fn fill(&mut self) -> Result<FillResult, HttpError> {
        if self.input.is_none() {
            self.input = Some(self.pool.acquire(self.config.input_buffer_size));
        }
        let input = match self.input.as_mut() {
            Some(i) => i,
            None => return Ok(FillResult::WouldBlock),
        };
        assert!(
            !input.is_retained(),
            "fill with retained input buffer"
        );
        let transport = match self.transport.as_deref_mut() {
            Some(t) => t,
            None => return Err(HttpError::Closed),
        };
        let mut result = match transport.fill(input.as_mut()) {
            Ok(r) => r,
            Err(e) => {
                self.parser.mark_eof();
                return Err(HttpError::Io(e));
            }
        };
        if result == FillResult::WouldBlock {
            result = match transport.fill(input.as_mut()) {
                Ok(r) => r,
                Err(e) => {
                    self.parser.mark_eof();
                    return Err(HttpError::Io(e));
                }
            };
        }
        match result {
            FillResult::Data(n) => self.bytes_in += n as u64,
            FillResult::Eof => self.parser.mark_eof(),
            FillResult::WouldBlock => {}
        }
        Ok(result)
    }

    /// Feed the input buffer to the parser, bridging its events into the
    /// current exchange. Releases the buffer once drained and unretained.
    fn parse(&mut self) -> Result<bool, HttpError> {
        let headers_done = match self.input.as_mut() {
            Some(input) => {
                let had_exchange = self.exchange.is_some();
                let next_id = self.exchange_seq + 1;
                let (buf, epoch) = input.parts();
                let mut events = ExchangeEvents {
                    exchange: &mut self.exchange,
                    epoch,
                    next_id,
                };
                let headers_done = self.parser.receive(buf, &mut events)?;
                if !had_exchange && self.exchange.is_some() {
                    self.exchange_seq = next_id;
                }
                headers_done
            }
            None => return Ok(false),
        };
        if let Some(x) = self.exchange.as_mut() {
            if let Some(e) = x.take_error() {
                return Err(e);
            }
        }
        if let Some(input) = self.input.as_ref() {
            if input.is_empty() && !input.is_retained() {
                if let Some(b) = self.input.take() {
                    b.release();
                }
            }
        }
        Ok(headers_done)
    }

    /// Headers-complete decision: finalize the URI, decide persistence, handle
    /// expectations and upgrades, set the parser's body mode.
    fn on_headers_complete(&mut self) -> Result<(), HttpError> {
        let secure = self.transport.as_ref().map_or(false, |t| t.is_secure());
        let local = self
            .transport
            .as_ref()
            .and_then(|t| t.local_addr())
            .map(|a| a.to_string());
        let scheme = if secure { "https" } else { "http" };

        let x = match self.exchange.as_mut() {
            Some(x) => x,
            None => {
                return Err(HttpError::Lifecycle(
                    "headers complete without exchange".into(),
                ))
            }
        };
        if let Some(e) = x.take_error() {
            return Err(e);
        }
        self.generator.prepare(x.version, x.method == Method::Head);

        if x.version == Version::Http2 {
            if x.method == Method::Pri && x.headers_are_empty() {
                let meta = x.commit(scheme, None)?.clone();
                if self.try_upgrade(&meta) {
                    return Ok(());
                }
                return Err(HttpError::bad_message(426, "Upgrade Required"));
            }
            return Err(HttpError::bad_message(505, "HTTP Version Not Supported"));
        }

        let persistent = match x.version {
            Version::Http09 => false,
            Version::Http10 => {
                (self.config.persistence_enabled
                    && x.connection_keep_alive
                    && !x.connection_close)
                    || x.method == Method::Connect
            }
            Version::Http11 | Version::Http2 => {
                (self.config.persistence_enabled && !x.connection_close)
                    || x.method == Method::Connect
            }
        };
        x.persistent = persistent;
        if !persistent {
            self.generator.set_persistent(false);
        }

        if x.version == Version::Http11 && x.unknown_expectation {
            return Err(HttpError::bad_message(417, "Unknown expectation"));
        }

        let fallback = if x.method == Method::Connect { None } else { local };
        x.commit(scheme, fallback)?;

        let body_length = x.body_length();
        let chunked = x.chunked;
        if self.parser.set_body_mode(body_length, chunked) {
            if let Some(x) = self.exchange.as_mut() {
                x.request_complete = true;
            }
        }

        // A request advertising an upgrade is offered to the successor before
        // dispatch; a successful handoff suppresses dispatch entirely.
        if self.upgrade.is_some() {
            let meta = self
                .exchange
                .as_ref()
                .filter(|x| x.upgrade.is_some())
                .and_then(|x| x.meta().cloned());
            if let Some(meta) = meta {
                if self.try_upgrade(&meta) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Hand the request to the application channel.
    fn dispatch(&mut self) {
        if let Some(x) = self.exchange.as_mut() {
            x.dispatched = true;
        }
        let mut channel = match self.channel.take() {
            Some(c) => c,
            None => return,
        };
        let mut stream = Stream { conn: self };
        channel.on_request(&mut stream);
        self.channel = Some(channel);
    }

    /// Next buffered content segment, or parse-and-fill until one arrives, the
    /// transport would block (None), or the body ends (Eof).
    pub(crate) fn read_content(&mut self) -> Result<Option<Content>, HttpError> {
        {
            let x = match self.exchange.as_mut() {
                Some(x) => x,
                None => return Err(HttpError::Closed),
            };
            if let Some(c) = x.pop_content() {
                return Ok(Some(c));
            }
            if x.request_complete {
                return Ok(Some(Content::Eof));
            }
        }
        if let Err(e) = self.parse_and_fill_for_content() {
            self.generator.set_persistent(false);
            return Err(e);
        }
        match self.exchange.as_mut() {
            Some(x) => {
                if let Some(c) = x.pop_content() {
                    return Ok(Some(c));
                }
                if x.request_complete {
                    return Ok(Some(Content::Eof));
                }
                Ok(None)
            }
            None => Err(HttpError::Closed),
        }
    }

    /// One-shot readiness registration for request content. Returns true when
    /// content (or end of body) is already available — the caller reads it
    /// directly; false when a fill interest was registered and the channel's
    /// `on_content_available` will fire later. An outstanding 100-continue
    /// expectation is answered before waiting for body bytes.
    pub(crate) fn demand_content(&mut self) -> Result<bool, HttpError> {
        let expect_100 = {
            let x = match self.exchange.as_mut() {
                Some(x) => x,
                None => return Err(HttpError::Closed),
            };
            if x.has_content() || x.request_complete {
                return Ok(true);
            }
            std::mem::take(&mut x.expect_100)
        };
        if expect_100 {
            self.send_continue();
        }
        self.parse_and_fill_for_content()?;
        let x = match self.exchange.as_ref() {
            Some(x) => x,
            None => return Err(HttpError::Closed),
        };
        if x.has_content() || x.request_complete {
            return Ok(true);
        }
        self.fill_demanded = true;
        Ok(false)
    }

    /// Alternate parsing and filling until content materializes or the
    /// transport has nothing more right now.
    fn parse_and_fill_for_content(&mut self) -> Result<(), HttpError> {
        assert!(!self.parser.is_closed(), "parse on a closed parser");
        loop {
            self.parse()?;
            let satisfied = self
                .exchange
                .as_ref()
                .map_or(true, |x| x.has_content() || x.request_complete);
            if satisfied {
                return Ok(());
            }
            match self.fill()? {
                FillResult::Data(_) => {}
                FillResult::WouldBlock => return Ok(()),
                FillResult::Eof => {
                    // Lets the parser observe the EOF (early EOF mid-body).
                    self.parse()?;
                    return Ok(());
                }
            }
        }
    }

    /// Fill-interest callback for a registered content demand.
    fn on_content_fillable(&mut self) {
        self.fill_demanded = false;
        if self.exchange.is_none() {
            return;
        }
        match self.parse_and_fill_for_content() {
            Err(e) => {
                self.generator.set_persistent(false);
                if let Some(ch) = self.channel.as_mut() {
                    ch.on_failure(&e);
                }
                self.close_transport();
            }
            Ok(()) => {
                let ready = self
                    .exchange
                    .as_ref()
                    .map_or(false, |x| x.has_content() || x.request_complete);
                if ready {
                    if let Some(mut channel) = self.channel.take() {
                        let mut stream = Stream { conn: self };
                        channel.on_content_available(&mut stream);
                        self.channel = Some(channel);
                    }
                } else {
                    self.fill_demanded = true;
                }
            }
        }
    }

    /// Queue a 100 Continue ahead of the response bytes. Suppressed once the
    /// final response has committed.
    fn send_continue(&mut self) {
        if self.generator.is_committed() {
            return;
        }
        let mut buf = BytesMut::with_capacity(64);
        self.generator.generate_interim(100, &mut buf);
        match self.pending_interim.as_mut() {
            Some(p) => p.extend_from_slice(&buf),
            None => self.pending_interim = Some(buf),
        }
        self.flush_interim();
    }

    /// Drain pending informational bytes. Returns true once nothing is queued.
    fn flush_interim(&mut self) -> bool {
        let mut failed = false;
        {
            let buf = match self.pending_interim.as_mut() {
                Some(b) => b,
                None => return true,
            };
            let transport = match self.transport.as_deref_mut() {
                Some(t) => t,
                None => return false,
            };
            while !buf.is_empty() {
                match transport.write_vectored(&[IoSlice::new(buf)]) {
                    Ok(0) => return false,
                    Ok(n) => {
                        buf.advance(n);
                        self.bytes_out += n as u64;
                    }
                    Err(e) => {
                        eprintln!("[http] connection {}: interim write failed: {}", self.id, e);
                        failed = true;
                        break;
                    }
                }
            }
        }
        if failed {
            self.pending_interim = None;
            self.close_transport();
            return false;
        }
        self.pending_interim = None;
        true
    }

    /// Application send entry: optional response head, at most one content
    /// buffer, the `last` flag, and the completion callback.
    pub(crate) fn send(
        &mut self,
        meta: Option<ResponseMeta>,
        content: Option<Bytes>,
        last: bool,
        callback: SendCallback,
    ) {
        if self.exchange.is_none() {
            callback(Err(HttpError::Closed));
            return;
        }
        if self.shutting_down {
            self.generator.set_persistent(false);
        }
        let head = self
            .exchange
            .as_ref()
            .map_or(false, |x| x.method == Method::Head);
        let closed = self.upgraded || !self.transport_open();
        if !self.send.start(meta, content, last, head, closed, callback) {
            return;
        }
        if self.pending_interim.is_some() {
            // The interim bytes go first; resume on writability.
            return;
        }
        self.process_send();
    }

    fn process_send(&mut self) {
        let transport = match self.transport.as_deref_mut() {
            Some(t) => t,
            None => return,
        };
        let progress = self.send.process(
            &mut self.generator,
            transport,
            &self.pool,
            &self.config,
            &mut self.bytes_out,
            self.upgraded,
        );
        self.after_send(progress);
    }

    fn after_send(&mut self, progress: SendProgress) {
        match progress {
            SendProgress::Scheduled => {}
            SendProgress::Complete { last } => {
                if last {
                    if let Some(x) = self.exchange.as_mut() {
                        x.response_complete = true;
                    }
                }
                if self.pending_complete {
                    self.pending_complete = false;
                    self.succeeded();
                }
            }
            SendProgress::Failed => {
                self.pending_complete = false;
                self.close_transport();
            }
        }
    }

    /// Writability arrived: interim bytes first, then the suspended send.
    pub fn on_writable(&mut self) {
        if !self.flush_interim() {
            return;
        }
        if self.send.is_pending() {
            self.process_send();
        }
    }

    /// Driver acknowledgement of a dispatch request (pipelined request queued
    /// behind a completed exchange).
    pub fn on_dispatched(&mut self) {
        self.dispatch_pending = false;
        self.on_fillable();
    }

    /// Exchange completion. Idempotent; called by the application when the
    /// response is fully sent. A completion racing an in-flight send is
    /// deferred until that send finishes.
    pub(crate) fn succeeded(&mut self) {
        if self.send.is_pending() {
            self.pending_complete = true;
            return;
        }
        let x = match self.exchange.take() {
            Some(x) => x,
            None => {
                eprintln!(
                    "[http] connection {}: duplicate exchange completion ignored",
                    self.id
                );
                return;
            }
        };
        if self.fill_demanded {
            self.fill_demanded = false;
            let err = HttpError::Io(io::Error::new(
                io::ErrorKind::Other,
                "exchange completed with read pending",
            ));
            if let Some(ch) = self.channel.as_mut() {
                ch.on_failure(&err);
            }
            self.close_transport();
            return;
        }
        if x.upgrade.is_some() {
            if let Some(meta) = x.meta().cloned() {
                if self.try_upgrade(&meta) {
                    return;
                }
            }
        }
        if x.expect_100 {
            // The peer never got its 100 and will likely drop the connection;
            // force EOF semantics on the next exchange attempt.
            self.parser.close();
        }
        if !self.parser.is_closed() && !self.parser.is_complete() && !self.parser.is_at_start() {
            self.drain_request_body();
        }
        if !self.parser.is_closed() {
            if self.generator.is_persistent() && self.parser.is_complete() {
                self.parser.reset();
            } else {
                self.parser.close();
            }
        }
        self.generator.reset();
        if let Some(input) = self.input.as_ref() {
            if input.is_empty() && !input.is_retained() {
                if let Some(b) = self.input.take() {
                    b.release();
                }
            }
        }
        if !self.in_fill_loop {
            if self.parser.is_closed() {
                // Stay readable to observe the peer's EOF.
                if self.transport_open() {
                    self.fill_interest = true;
                }
            } else if self.parser.is_at_start() {
                if self.input.as_ref().map_or(true, |b| b.is_empty()) {
                    self.fill_interest = true;
                } else {
                    self.dispatch_pending = true;
                }
            } else {
                self.close_transport();
            }
        }
    }

    /// Exchange failure from the application. Closes the transport.
    pub(crate) fn failed(&mut self, cause: HttpError) {
        if self.exchange.take().is_none() {
            eprintln!(
                "[http] connection {}: failure with no exchange: {}",
                self.id, cause
            );
            return;
        }
        eprintln!("[http] connection {}: exchange failed: {}", self.id, cause);
        self.close_transport();
    }

    /// The response finished before the request body was consumed. Drain what
    /// is already buffered; if the message still is not complete, give up on
    /// persistence rather than resynchronize mid-body.
    fn drain_request_body(&mut self) {
        struct Discard;
        impl RequestListener for Discard {
            fn start_request(&mut self, _: Method, _: &str, _: Version) {}
            fn header(&mut self, _: &str, _: &str) {}
            fn headers_complete(&mut self) {}
            fn content(&mut self, _: Bytes, _: bool) {}
            fn trailer(&mut self, _: &str, _: &str) {}
            fn message_complete(&mut self) {}
        }
        if let Some(input) = self.input.as_mut() {
            let (buf, _) = input.parts();
            let mut discard = Discard;
            if self.parser.receive(buf, &mut discard).is_err() {
                self.generator.set_persistent(false);
                self.parser.close();
                return;
            }
        }
        if !self.parser.is_complete() {
            self.generator.set_persistent(false);
            self.parser.close();
        }
    }

    /// Protocol-level failure: mark non-persistent and let the channel produce
    /// a canned response when nothing has been committed yet.
    fn handle_bad_message(&mut self, status: u16, reason: &str) {
        self.generator.set_persistent(false);
        self.parser.close();
        if self.generator.is_committed() {
            self.close_transport();
            return;
        }
        if self.exchange.is_none() {
            // Failure before start-request; synthesize an exchange so the
            // canned response runs through the normal send path.
            self.exchange_seq += 1;
            self.exchange = Some(Exchange::new(
                self.exchange_seq,
                Method::Get,
                "/",
                Version::Http11,
            ));
        }
        if let Some(x) = self.exchange.as_mut() {
            x.dispatched = true;
            x.request_complete = true;
        }
        let mut channel = match self.channel.take() {
            Some(c) => c,
            None => {
                self.close_transport();
                return;
            }
        };
        let mut stream = Stream { conn: self };
        channel.on_bad_message(&mut stream, status, reason);
        self.channel = Some(channel);
        if self.exchange.is_some() && !self.send.is_pending() {
            self.close_transport();
        }
    }

    /// Idle ceiling reached: abort an in-flight exchange, or just close.
    pub fn on_idle_timeout(&mut self) {
        if self.exchange.is_some() {
            let err = HttpError::Io(io::Error::new(io::ErrorKind::TimedOut, "idle timeout"));
            if let Some(ch) = self.channel.as_mut() {
                ch.on_failure(&err);
            }
            self.failed(err);
        } else {
            self.close_transport();
        }
    }

    /// Offer the endpoint to the successor protocol. On success this
    /// connection is done; on refusal everything is restored.
    fn try_upgrade(&mut self, request: &RequestMeta) -> bool {
        let mut handler = match self.upgrade.take() {
            Some(h) => h,
            None => return false,
        };
        let transport = match self.transport.take() {
            Some(t) => t,
            None => {
                self.upgrade = Some(handler);
                return false;
            }
        };
        let leftover = self.take_input_leftover();
        match handler.upgrade(request, transport, leftover) {
            Ok(()) => {
                self.upgraded = true;
                self.exchange = None;
                true
            }
            Err((transport, leftover)) => {
                self.transport = Some(transport);
                self.append_input(&leftover);
                self.upgrade = Some(handler);
                false
            }
        }
    }

    /// Copy out unconsumed input for a successor connection and release the
    /// pooled buffer.
    pub fn take_input_leftover(&mut self) -> Bytes {
        match self.input.take() {
            Some(mut buf) => {
                let bytes = Bytes::copy_from_slice(buf.as_slice());
                buf.clear();
                buf.release();
                bytes
            }
            None => Bytes::new(),
        }
    }

    /// Inherit bytes produced before this connection took over the endpoint.
    pub fn append_input(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.input.is_none() {
            let capacity = self.config.input_buffer_size.max(bytes.len());
            self.input = Some(self.pool.acquire(capacity));
        }
        if let Some(input) = self.input.as_mut() {
            input.as_mut().extend_from_slice(bytes);
        }
    }

    fn close_transport(&mut self) {
        if let Some(mut b) = self.input.take() {
            b.clear();
            b.release();
        }
        if let Some(t) = self.transport.as_deref_mut() {
            t.close();
        }
        self.fill_interest = false;
        self.fill_demanded = false;
        self.dispatch_pending = false;
    }
}

/// Bridges parser callbacks into the current exchange; body segments take a
/// retained guard on the input buffer.
struct ExchangeEvents<'a> {
    exchange: &'a mut Option<Exchange>,
    epoch: &'a Arc<()>,
    next_id: u64,
}

impl RequestListener for ExchangeEvents<'_> {
    fn start_request(&mut self, method: Method, target: &str, version: Version) {
        *self.exchange = Some(Exchange::new(self.next_id, method, target, version));
    }

    fn header(&mut self, name: &str, value: &str) {
        if let Some(x) = self.exchange.as_mut() {
            x.on_header(name, value);
        }
    }

    fn headers_complete(&mut self) {}

    fn content(&mut self, data: Bytes, last: bool) {
        if let Some(x) = self.exchange.as_mut() {
            let chunk = Chunk::retained(data, last, Retained::from_epoch(self.epoch));
            x.push_content(Content::Chunk(chunk));
        }
    }

    fn trailer(&mut self, name: &str, value: &str) {
        if let Some(x) = self.exchange.as_mut() {
            x.add_trailer(name, value);
        }
    }

    fn message_complete(&mut self) {
        if let Some(x) = self.exchange.as_mut() {
            x.request_complete = true;
            match x.take_trailers() {
                Some(t) => x.push_content(Content::Trailers(t)),
                None => x.push_content(Content::Eof),
            }
        }
    }
}

/// Context handle the application acts through. Borrows the connection for
/// the duration of one channel callback.
pub struct Stream<'a> {
    pub(crate) conn: &'a mut HttpConnection,
}

impl Stream<'_> {
    /// Request metadata of the active exchange.
    pub fn request(&self) -> Option<&RequestMeta> {
        self.conn.exchange.as_ref().and_then(|x| x.meta())
    }

    /// Next body segment: `Chunk`, `Trailers`, `Eof`, or None when the
    /// transport would block (register a demand to be resumed).
    pub fn read_content(&mut self) -> Result<Option<Content>, HttpError> {
        self.conn.read_content()
    }

    /// One-shot content demand; see `HttpConnection::demand_content`.
    pub fn demand_content(&mut self) -> Result<bool, HttpError> {
        self.conn.demand_content()
    }

    /// Send a response fragment: optional head (first call), at most one
    /// content buffer, and whether this is the last fragment.
    pub fn send(
        &mut self,
        meta: Option<ResponseMeta>,
        content: Option<Bytes>,
        last: bool,
        callback: SendCallback,
    ) {
        self.conn.send(meta, content, last, callback)
    }

    /// Whether the response head has been committed to the wire.
    pub fn is_committed(&self) -> bool {
        self.conn.generator.is_committed()
    }

    /// Whether both request and response have fully completed.
    pub fn is_complete(&self) -> bool {
        self.conn.exchange.as_ref().map_or(true, |x| x.is_complete())
    }

    /// Complete the exchange; the connection resets for the next request or
    /// closes, per its persistence state.
    pub fn succeeded(&mut self) {
        self.conn.succeeded()
    }

    /// Fail the exchange; the connection closes.
    pub fn failed(&mut self, cause: HttpError) {
        self.conn.failed(cause)
    }

    /// Server push has no HTTP/1 mapping; always refused.
    pub fn push(&mut self) -> Result<(), HttpError> {
        Err(HttpError::Lifecycle("push not supported on HTTP/1".into()))
    }

    pub fn id(&self) -> u64 {
        self.conn.exchange.as_ref().map_or(0, |x| x.id())
    }

    pub fn started(&self) -> Option<Instant> {
        self.conn.exchange.as_ref().map(|x| x.started())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MemoryTransport;

    struct NullChannel;
    impl Channel for NullChannel {
        fn on_request(&mut self, _stream: &mut Stream<'_>) {}
        fn on_content_available(&mut self, _stream: &mut Stream<'_>) {}
    }

    fn connection(mem: &MemoryTransport) -> HttpConnection {
        HttpConnection::new(
            HttpConfig {
                send_date_header: false,
                ..HttpConfig::default()
            },
            BufferPool::new(8),
            Box::new(mem.clone()),
            Box::new(NullChannel),
        )
    }

    #[test]
    fn upgrade_leftover_round_trip() {
        let mem = MemoryTransport::new();
        let mut conn = connection(&mem);
        conn.append_input(b"leftover bytes");
        let taken = conn.take_input_leftover();
        assert_eq!(&taken[..], b"leftover bytes");
        // A successor inheriting the bytes sees them verbatim.
        conn.append_input(&taken);
        assert_eq!(conn.take_input_leftover(), taken);
    }

    #[test]
    fn registers_fill_interest_when_nothing_buffered() {
        let mem = MemoryTransport::new();
        let mut conn = connection(&mem);
        conn.on_fillable();
        assert_eq!(conn.interest(), Interest::Read);
    }

    #[test]
    fn idle_timeout_without_exchange_closes() {
        let mem = MemoryTransport::new();
        let mut conn = connection(&mem);
        conn.on_idle_timeout();
        assert_eq!(conn.interest(), Interest::Closed);
        assert!(!mem.is_open());
    }
}
