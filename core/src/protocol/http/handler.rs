/*
 * handler.rs
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

//! Application contract: the connection calls a `Channel` at request, content,
//! and error boundaries, always passing the `Stream` context handle it should
//! act through. Protocol upgrades go to a separate `UpgradeHandler`.

use bytes::Bytes;

use crate::net::Transport;
use crate::protocol::http::connection::Stream;
use crate::protocol::http::error::HttpError;
use crate::protocol::http::request::RequestMeta;
use crate::protocol::http::response::ResponseMeta;

/// Completion callback for one send. Invoked exactly once, with `Ok` when the
/// bytes are handed to the transport, or the failure otherwise.
pub type SendCallback = Box<dyn FnOnce(Result<(), HttpError>) + Send>;

/// Application side of a connection (push model). The connection drives this
/// as the exchange progresses.
///
/// Flow for one exchange:
/// 1. `on_request(stream)` — headers are complete; `stream.request()` has the
///    metadata. Read content, send the response, and finish with
///    `stream.succeeded()` (or `stream.failed(..)`).
/// 2. `on_content_available(stream)` — a previously registered content demand
///    can now make progress.
/// 3. `on_bad_message(stream, status, reason)` — the request failed at the
///    protocol level; the default implementation answers with a canned
///    response and completes the exchange.
pub trait Channel: Send {
    fn on_request(&mut self, stream: &mut Stream<'_>);

    fn on_content_available(&mut self, stream: &mut Stream<'_>);

    /// Malformed or unacceptable request. Only called while the response is
    /// uncommitted; the connection will not persist afterwards.
    fn on_bad_message(&mut self, stream: &mut Stream<'_>, status: u16, reason: &str) {
        let _ = reason;
        stream.send(Some(ResponseMeta::new(status)), None, true, Box::new(|_| {}));
        stream.succeeded();
    }

    /// Exchange-level failure the application did not itself report (idle
    /// timeout, completion while a read was pending).
    fn on_failure(&mut self, error: &HttpError) {
        let _ = error;
    }
}

/// Successor protocol hook. On success the handler keeps the endpoint and the
/// leftover input bytes; on refusal it hands both back so HTTP/1 can continue.
pub trait UpgradeHandler: Send {
    fn upgrade(
        &mut self,
        request: &RequestMeta,
        transport: Box<dyn Transport>,
        leftover: Bytes,
    ) -> Result<(), (Box<dyn Transport>, Bytes)>;
}
