/*
 * config.rs
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

//! Per-connection configuration snapshot. The connection takes a copy at
//! construction; loading from files is the embedding application's business.

use std::time::Duration;

/// Configuration snapshot for one HTTP/1 connection.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Capacity of the pooled input buffer filled from the transport.
    pub input_buffer_size: usize,
    /// Capacity of the pooled buffer the response head is generated into.
    pub response_header_size: usize,
    /// Ceiling for response head retries after a header overflow. Overflow at
    /// this size fails the exchange with a 500.
    pub max_response_header_size: usize,
    /// Capacity of the small buffer holding chunked transfer framing.
    pub chunk_buffer_size: usize,
    /// Request line plus header section ceiling; beyond it the request is
    /// rejected with 431.
    pub max_request_head_size: usize,
    /// Whether persistent connections are offered at all.
    pub persistence_enabled: bool,
    /// Emit a Date header on final responses.
    pub send_date_header: bool,
    /// Idle ceiling enforced by the connection driver.
    pub idle_timeout: Option<Duration>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            input_buffer_size: 8192,
            response_header_size: 8192,
            max_response_header_size: 65536,
            chunk_buffer_size: 32,
            max_request_head_size: 8192,
            persistence_enabled: true,
            send_date_header: true,
            idle_timeout: Some(Duration::from_secs(30)),
        }
    }
}
