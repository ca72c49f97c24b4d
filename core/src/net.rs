/*
 * net.rs
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

//! Transport endpoint under the connection engine: non-blocking fill and
//! gathered write with explicit readiness, a tokio TCP binding, an in-memory
//! endpoint for tests, and the async driver that runs one connection.
//!
//! The engine itself never awaits; it reports what it is waiting for through
//! `HttpConnection::interest()` and the driver here translates that into
//! `readable()`/`writable()` waits on the socket.

use bytes::BytesMut;
use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;

use crate::protocol::http::{HttpConnection, Interest};

/// Outcome of one non-blocking fill from the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillResult {
    /// Bytes were appended to the buffer.
    Data(usize),
    /// The endpoint has no bytes right now; register read interest.
    WouldBlock,
    /// The peer shut down its write half.
    Eof,
}

/// Byte-oriented full-duplex endpoint. Implementations are non-blocking: fills
/// and writes either make progress immediately or report that they would block.
pub trait Transport: Send {
    /// Append available bytes to `buf`, up to its spare capacity.
    fn fill(&mut self, buf: &mut BytesMut) -> io::Result<FillResult>;

    /// Gathered write. Returns the number of bytes accepted; 0 means the
    /// endpoint would block and write interest should be registered.
    fn write_vectored(&mut self, slices: &[IoSlice<'_>]) -> io::Result<usize>;

    /// Half-close: no more bytes will be written. Reading may continue.
    fn shutdown_output(&mut self);

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn is_output_shutdown(&self) -> bool;

    /// True when a decrypting layer sits below this endpoint (scheme https).
    fn is_secure(&self) -> bool {
        false
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Tokio TCP endpoint. The stream is shared with the driver, which awaits
/// readiness on it; this side only issues the non-blocking calls.
pub struct TcpTransport {
    stream: Arc<TcpStream>,
    open: bool,
    output_shutdown: bool,
}

impl TcpTransport {
    pub fn new(stream: Arc<TcpStream>) -> Self {
        Self {
            stream,
            open: true,
            output_shutdown: false,
        }
    }
}

impl Transport for TcpTransport {
    fn fill(&mut self, buf: &mut BytesMut) -> io::Result<FillResult> {
        if !self.open {
            return Ok(FillResult::Eof);
        }
        if buf.capacity() == buf.len() {
            buf.reserve(4096);
        }
        match self.stream.try_read_buf(buf) {
            Ok(0) => Ok(FillResult::Eof),
            Ok(n) => Ok(FillResult::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(FillResult::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn write_vectored(&mut self, slices: &[IoSlice<'_>]) -> io::Result<usize> {
        if !self.open || self.output_shutdown {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "output closed"));
        }
        match self.stream.try_write_vectored(slices) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn shutdown_output(&mut self) {
        if self.output_shutdown {
            return;
        }
        self.output_shutdown = true;
        // The stream is shared with the driver, so it cannot be pinned for
        // poll_shutdown; SockRef performs the same write-half close.
        let _ = socket2::SockRef::from(self.stream.as_ref()).shutdown(Shutdown::Write);
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_output_shutdown(&self) -> bool {
        self.output_shutdown
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

struct MemoryInner {
    input: VecDeque<Vec<u8>>,
    input_closed: bool,
    output: Vec<u8>,
    open: bool,
    output_shutdown: bool,
    secure: bool,
    /// Per-call cap on accepted write bytes, to script partial writes.
    write_limit: Option<usize>,
    /// When set, the next write reports WouldBlock once.
    block_next_write: bool,
}

/// Scripted in-memory endpoint for tests and protocol experiments. Clones share
/// state, so a test can keep a handle while the connection owns the transport.
#[derive(Clone)]
pub struct MemoryTransport(Arc<Mutex<MemoryInner>>);

impl MemoryTransport {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(MemoryInner {
            input: VecDeque::new(),
            input_closed: false,
            output: Vec::new(),
            open: true,
            output_shutdown: false,
            secure: false,
            write_limit: None,
            block_next_write: false,
        })))
    }

    pub fn secure() -> Self {
        let t = Self::new();
        t.0.lock().unwrap().secure = true;
        t
    }

    /// Queue bytes the next fill will deliver.
    pub fn push_input(&self, bytes: &[u8]) {
        self.0.lock().unwrap().input.push_back(bytes.to_vec());
    }

    /// No further input; fills report EOF once the queue drains.
    pub fn close_input(&self) {
        self.0.lock().unwrap().input_closed = true;
    }

    /// Everything written so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.lock().unwrap().output)
    }

    pub fn output(&self) -> Vec<u8> {
        self.0.lock().unwrap().output.clone()
    }

    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.0.lock().unwrap().write_limit = limit;
    }

    pub fn block_next_write(&self) {
        self.0.lock().unwrap().block_next_write = true;
    }

    pub fn is_open(&self) -> bool {
        self.0.lock().unwrap().open
    }

    pub fn is_output_shutdown(&self) -> bool {
        self.0.lock().unwrap().output_shutdown
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn fill(&mut self, buf: &mut BytesMut) -> io::Result<FillResult> {
        let mut inner = self.0.lock().unwrap();
        if !inner.open {
            return Ok(FillResult::Eof);
        }
        match inner.input.pop_front() {
            Some(segment) => {
                buf.extend_from_slice(&segment);
                Ok(FillResult::Data(segment.len()))
            }
            None if inner.input_closed => Ok(FillResult::Eof),
            None => Ok(FillResult::WouldBlock),
        }
    }

    fn write_vectored(&mut self, slices: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut inner = self.0.lock().unwrap();
        if !inner.open || inner.output_shutdown {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "output closed"));
        }
        if inner.block_next_write {
            inner.block_next_write = false;
            return Ok(0);
        }
        let mut budget = inner.write_limit.unwrap_or(usize::MAX);
        let mut written = 0;
        for slice in slices {
            if budget == 0 {
                break;
            }
            let take = slice.len().min(budget);
            inner.output.extend_from_slice(&slice[..take]);
            written += take;
            budget -= take;
            if take < slice.len() {
                break;
            }
        }
        Ok(written)
    }

    fn shutdown_output(&mut self) {
        self.0.lock().unwrap().output_shutdown = true;
    }

    fn close(&mut self) {
        self.0.lock().unwrap().open = false;
    }

    fn is_open(&self) -> bool {
        self.0.lock().unwrap().open
    }

    fn is_output_shutdown(&self) -> bool {
        self.0.lock().unwrap().output_shutdown
    }

    fn is_secure(&self) -> bool {
        self.0.lock().unwrap().secure
    }
}

/// Run one connection over a tokio TCP stream until it closes or is upgraded.
/// Waits according to the engine's reported interest; read waits are bounded by
/// the configured idle timeout.
pub async fn serve(mut conn: HttpConnection, stream: Arc<TcpStream>) -> io::Result<()> {
    let idle = conn.config().idle_timeout;
    conn.on_fillable();
    loop {
        match conn.interest() {
            Interest::Closed => return Ok(()),
            Interest::Read => {
                let ready = match idle {
                    Some(limit) => match tokio::time::timeout(limit, stream.readable()).await {
                        Ok(r) => r,
                        Err(_) => {
                            conn.on_idle_timeout();
                            continue;
                        }
                    },
                    None => stream.readable().await,
                };
                ready?;
                conn.on_readable();
            }
            Interest::Write => {
                stream.writable().await?;
                conn.on_writable();
            }
            Interest::Dispatch => {
                tokio::task::yield_now().await;
                conn.on_dispatched();
            }
            Interest::Idle => {
                // Nothing to wait for: the application holds the exchange and
                // this driver has no way to be woken by it.
                eprintln!("[http] connection {} idle with an unfinished exchange; closing", conn.id());
                conn.on_idle_timeout();
            }
        }
    }
}
