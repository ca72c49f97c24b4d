/*
 * lib.rs
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

//! Portiere core: the per-connection HTTP/1.0 and HTTP/1.1 protocol engine.
//!
//! One `HttpConnection` owns one byte-oriented transport endpoint and drives the
//! lifecycle of request/response exchanges on it: pooled input buffers, an
//! incremental request parser, a response generator behind a single-shot send
//! iterator, persistence and pipelining, expectations, trailers, and protocol
//! upgrade handoff. Applications plug in through the `Channel` callback trait.

pub mod buffer;
pub mod config;
pub mod net;
pub mod protocol;

pub use buffer::{BufferPool, PooledBuffer};
pub use config::HttpConfig;
pub use net::{FillResult, MemoryTransport, TcpTransport, Transport};
pub use protocol::http::{
    Channel, Chunk, Content, Headers, HttpConnection, HttpError, Interest, Method, RequestMeta,
    ResponseMeta, SendCallback, Stream, UpgradeHandler, Version,
};
