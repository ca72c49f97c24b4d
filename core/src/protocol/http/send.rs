/*
 * send.rs
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

//! Single-shot send iterator: drives the response generator, acquires pooled
//! header/chunk buffers on demand, and issues gathered writes to the endpoint.
//! At most one send is in flight per connection; a blocked write suspends the
//! iterator until the endpoint reports writability again.

use bytes::Bytes;
use std::io::{self, IoSlice};
use std::sync::Arc;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::config::HttpConfig;
use crate::net::Transport;
use crate::protocol::http::error::HttpError;
use crate::protocol::http::h1::{Generate, ResponseGenerator};
use crate::protocol::http::handler::SendCallback;
use crate::protocol::http::response::ResponseMeta;

/// Where one `process` call left the send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendProgress {
    /// A write blocked; resume on writability.
    Scheduled,
    /// The send finished and the callback saw success.
    Complete { last: bool },
    /// The send failed and the callback saw the error.
    Failed,
}

pub struct SendIterator {
    active: bool,
    meta: Option<ResponseMeta>,
    content: Option<Bytes>,
    last: bool,
    head: bool,
    callback: Option<SendCallback>,
    header: Option<PooledBuffer>,
    chunk: Option<PooledBuffer>,
    header_capacity: usize,
    shutdown_after: bool,
    write_pending: bool,
    /// Bytes of the current gather already accepted by the endpoint.
    written: usize,
}

impl SendIterator {
    pub fn new() -> Self {
        Self {
            active: false,
            meta: None,
            content: None,
            last: false,
            head: false,
            callback: None,
            header: None,
            chunk: None,
            header_capacity: 0,
            shutdown_after: false,
            write_pending: false,
            written: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.active
    }

    pub fn is_scheduled(&self) -> bool {
        self.active && self.write_pending
    }

    /// Transition from idle to busy. When the iterator is busy the callback
    /// fails with WritePending; a closed connection fails it with Closed; a
    /// no-op send (nothing to write, not last) succeeds inline. Returns whether
    /// a send actually started.
    pub fn start(
        &mut self,
        meta: Option<ResponseMeta>,
        content: Option<Bytes>,
        last: bool,
        head: bool,
        connection_closed: bool,
        callback: SendCallback,
    ) -> bool {
        if self.active {
            callback(Err(HttpError::WritePending));
            return false;
        }
        if connection_closed {
            callback(Err(HttpError::Closed));
            return false;
        }
        let empty = content.as_ref().map_or(true, |c| c.is_empty());
        if meta.is_none() && empty && !last {
            callback(Ok(()));
            return false;
        }
        self.active = true;
        self.meta = meta;
        self.content = content.filter(|c| !c.is_empty());
        self.last = last;
        self.head = head;
        self.callback = Some(callback);
        self.write_pending = false;
        self.written = 0;
        true
    }

    /// Iterate the generator until the send completes, fails, or a write
    /// blocks. Also the resumption point after writability.
    pub fn process(
        &mut self,
        generator: &mut ResponseGenerator,
        transport: &mut dyn Transport,
        pool: &Arc<BufferPool>,
        config: &HttpConfig,
        bytes_out: &mut u64,
        upgrading: bool,
    ) -> SendProgress {
        debug_assert!(self.active);
        loop {
            if self.write_pending {
                let allow_body = !self.head && generator.body_allowed();
                match self.flush(transport, allow_body, bytes_out) {
                    Ok(true) => {}
                    Ok(false) => return SendProgress::Scheduled,
                    Err(e) => {
                        self.complete_failure(HttpError::Io(e), transport, upgrading);
                        return SendProgress::Failed;
                    }
                }
            }
            let header_capacity = self.header_capacity;
            let content: &[u8] = self.content.as_deref().unwrap_or(&[]);
            let step = generator.generate(
                self.meta.as_ref(),
                self.header.as_mut().map(|b| (b.as_mut(), header_capacity)),
                self.chunk.as_mut().map(|b| b.as_mut()),
                content,
                self.last,
            );
            match step {
                Err(e) => {
                    self.complete_failure(e, transport, upgrading);
                    return SendProgress::Failed;
                }
                Ok(Generate::NeedHeader) => {
                    self.header_capacity = config.response_header_size;
                    self.header = Some(pool.acquire(self.header_capacity));
                }
                Ok(Generate::HeaderOverflow) => {
                    if self.header_capacity >= config.max_response_header_size {
                        self.complete_failure(
                            HttpError::bad_message(500, "Response header too large"),
                            transport,
                            upgrading,
                        );
                        return SendProgress::Failed;
                    }
                    if let Some(b) = self.header.take() {
                        b.release();
                    }
                    self.header_capacity =
                        (self.header_capacity * 2).min(config.max_response_header_size);
                    self.header = Some(pool.acquire(self.header_capacity));
                }
                Ok(Generate::NeedChunk) => {
                    self.chunk = Some(pool.acquire(config.chunk_buffer_size));
                }
                Ok(Generate::NeedChunkTrailer) => {
                    self.chunk = Some(pool.acquire(config.response_header_size));
                }
                Ok(Generate::Flush) => {
                    self.write_pending = true;
                    self.written = 0;
                }
                Ok(Generate::ShutdownOut) => {
                    self.shutdown_after = true;
                }
                Ok(Generate::Done) => {
                    let last = self.last;
                    self.complete_success(transport, upgrading);
                    return SendProgress::Complete { last };
                }
                Ok(Generate::Continue) => {}
                Ok(Generate::NeedInfo) => {
                    self.complete_failure(
                        HttpError::Lifecycle("generator demanded supplied info".into()),
                        transport,
                        upgrading,
                    );
                    return SendProgress::Failed;
                }
            }
        }
    }

    /// Write the gathered header/chunk/content slices, resuming past bytes the
    /// endpoint already accepted. Ok(true) when the gather is fully written.
    fn flush(
        &mut self,
        transport: &mut dyn Transport,
        allow_body: bool,
        bytes_out: &mut u64,
    ) -> io::Result<bool> {
        loop {
            let header = self.header.as_ref().map(|b| b.as_slice()).unwrap_or(&[]);
            let chunk = self.chunk.as_ref().map(|b| b.as_slice()).unwrap_or(&[]);
            let content: &[u8] = if allow_body {
                self.content.as_deref().unwrap_or(&[])
            } else {
                &[]
            };
            let total = header.len() + chunk.len() + content.len();
            if self.written >= total {
                break;
            }
            let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(3);
            let mut skip = self.written;
            for part in [header, chunk, content] {
                if part.is_empty() {
                    continue;
                }
                if skip >= part.len() {
                    skip -= part.len();
                    continue;
                }
                slices.push(IoSlice::new(&part[skip..]));
                skip = 0;
            }
            let n = transport.write_vectored(&slices)?;
            if n == 0 {
                return Ok(false);
            }
            self.written += n;
            *bytes_out += n as u64;
        }
        self.write_pending = false;
        self.written = 0;
        if let Some(b) = self.header.as_mut() {
            b.clear();
        }
        if let Some(b) = self.chunk.as_mut() {
            b.clear();
        }
        self.content = None;
        Ok(true)
    }

    fn complete_success(&mut self, transport: &mut dyn Transport, upgrading: bool) {
        self.release_buffers();
        self.active = false;
        self.meta = None;
        self.content = None;
        if self.shutdown_after {
            self.shutdown_after = false;
            if !upgrading {
                transport.shutdown_output();
            }
        }
        if let Some(cb) = self.callback.take() {
            cb(Ok(()));
        }
    }

    fn complete_failure(&mut self, error: HttpError, transport: &mut dyn Transport, upgrading: bool) {
        self.release_buffers();
        self.active = false;
        self.meta = None;
        self.content = None;
        self.write_pending = false;
        self.written = 0;
        if self.shutdown_after {
            self.shutdown_after = false;
            if !upgrading {
                transport.shutdown_output();
            }
        }
        if let Some(cb) = self.callback.take() {
            cb(Err(error));
        }
    }

    fn release_buffers(&mut self) {
        if let Some(mut b) = self.header.take() {
            b.clear();
            b.release();
        }
        if let Some(mut b) = self.chunk.take() {
            b.clear();
            b.release();
        }
        self.header_capacity = 0;
    }
}

impl Default for SendIterator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MemoryTransport;
    use crate::protocol::http::request::Version;
    use std::sync::Mutex;

    fn result_slot() -> (Arc<Mutex<Option<Result<(), String>>>>, SendCallback) {
        let slot: Arc<Mutex<Option<Result<(), String>>>> = Arc::new(Mutex::new(None));
        let clone = Arc::clone(&slot);
        let cb: SendCallback = Box::new(move |r| {
            *clone.lock().unwrap() = Some(r.map_err(|e| e.to_string()));
        });
        (slot, cb)
    }

    fn fixture() -> (ResponseGenerator, MemoryTransport, Arc<BufferPool>, HttpConfig) {
        let mut gen = ResponseGenerator::new(false);
        gen.prepare(Version::Http11, false);
        (gen, MemoryTransport::new(), BufferPool::new(8), HttpConfig::default())
    }

    #[test]
    fn simple_send_completes() {
        let (mut gen, mem, pool, config) = fixture();
        let mut transport = mem.clone();
        let mut send = SendIterator::new();
        let (slot, cb) = result_slot();
        let meta = ResponseMeta::new(200);
        assert!(send.start(Some(meta), Some(Bytes::from_static(b"Hello")), true, false, false, cb));
        let mut out = 0;
        let progress = send.process(&mut gen, &mut transport, &pool, &config, &mut out, false);
        assert_eq!(progress, SendProgress::Complete { last: true });
        assert!(slot.lock().unwrap().as_ref().unwrap().is_ok());
        let wire = String::from_utf8(mem.output()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.ends_with("\r\n\r\nHello"));
        assert_eq!(out as usize, wire.len());
        assert!(!send.is_pending());
    }

    #[test]
    fn blocked_write_schedules_and_resumes() {
        let (mut gen, mem, pool, config) = fixture();
        mem.block_next_write();
        let mut transport = mem.clone();
        let mut send = SendIterator::new();
        let (slot, cb) = result_slot();
        assert!(send.start(
            Some(ResponseMeta::new(200)),
            Some(Bytes::from_static(b"body")),
            true,
            false,
            false,
            cb
        ));
        let mut out = 0;
        assert_eq!(
            send.process(&mut gen, &mut transport, &pool, &config, &mut out, false),
            SendProgress::Scheduled
        );
        assert!(send.is_scheduled());
        assert!(slot.lock().unwrap().is_none());
        // Writability: resume and finish.
        assert_eq!(
            send.process(&mut gen, &mut transport, &pool, &config, &mut out, false),
            SendProgress::Complete { last: true }
        );
        assert!(String::from_utf8(mem.output()).unwrap().ends_with("body"));
    }

    #[test]
    fn second_send_fails_write_pending() {
        let (mut gen, mem, pool, config) = fixture();
        mem.block_next_write();
        let mut transport = mem.clone();
        let mut send = SendIterator::new();
        let (_slot, cb) = result_slot();
        send.start(Some(ResponseMeta::new(200)), None, true, false, false, cb);
        let mut out = 0;
        send.process(&mut gen, &mut transport, &pool, &config, &mut out, false);
        let (slot2, cb2) = result_slot();
        assert!(!send.start(Some(ResponseMeta::new(200)), None, true, false, false, cb2));
        assert!(slot2
            .lock()
            .unwrap()
            .as_ref()
            .unwrap()
            .as_ref()
            .unwrap_err()
            .contains("write pending"));
    }

    #[test]
    fn noop_send_succeeds_inline() {
        let mut send = SendIterator::new();
        let (slot, cb) = result_slot();
        assert!(!send.start(None, None, false, false, false, cb));
        assert!(slot.lock().unwrap().as_ref().unwrap().is_ok());
    }

    #[test]
    fn send_on_closed_connection_fails() {
        let mut send = SendIterator::new();
        let (slot, cb) = result_slot();
        assert!(!send.start(Some(ResponseMeta::new(200)), None, true, false, true, cb));
        assert!(slot.lock().unwrap().as_ref().unwrap().is_err());
    }

    #[test]
    fn head_suppresses_body_but_keeps_length() {
        let (mut gen, mem, pool, config) = fixture();
        gen.prepare(Version::Http11, true);
        let mut transport = mem.clone();
        let mut send = SendIterator::new();
        let (_slot, cb) = result_slot();
        assert!(send.start(
            Some(ResponseMeta::new(200)),
            Some(Bytes::from_static(b"Hello")),
            true,
            true,
            false,
            cb
        ));
        let mut out = 0;
        assert_eq!(
            send.process(&mut gen, &mut transport, &pool, &config, &mut out, false),
            SendProgress::Complete { last: true }
        );
        let wire = String::from_utf8(mem.output()).unwrap();
        assert!(wire.contains("Content-Length: 5\r\n"));
        assert!(wire.ends_with("\r\n\r\n"), "{}", wire);
    }
}
