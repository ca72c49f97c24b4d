/*
 * mod.rs
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

//! HTTP/1 server side: one connection drives request parsing, application
//! dispatch, and response generation on a single transport endpoint.
//!
//! Design:
//! - Push parser and buffer-filling generator, both owned by the connection and
//!   reused across persistent exchanges.
//! - Buffers: `bytes` crate (pooled BytesMut for the input, Bytes for body
//!   slices handed to the application).
//! - Applications implement `Channel`; the connection calls it with a `Stream`
//!   context handle at request, content, and error boundaries.
//! - Upgrade (websocket, h2c) hands the endpoint plus any trailing input bytes
//!   to an `UpgradeHandler`; the HTTP/2 cleartext preface is recognized here.

mod error;
mod exchange;
mod handler;
mod request;
mod response;
mod send;

pub mod connection;
pub mod h1;

pub use connection::{HttpConnection, Interest, Stream};
pub use error::HttpError;
pub use exchange::{Chunk, Content, Exchange};
pub use handler::{Channel, SendCallback, UpgradeHandler};
pub use request::{Headers, HttpUri, Method, RequestMeta, UriBuilder, Version};
pub use response::ResponseMeta;

/// HTTP/2 connection preface (PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n). The request
/// line and the empty header section are consumed by the HTTP/1 parser; the
/// rest rides along to the h2c successor as leftover input.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
