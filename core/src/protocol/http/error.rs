/*
 * error.rs
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

//! Exchange and connection errors.

use std::fmt;
use std::io;

/// Errors raised by the connection engine, the parser, or the generator.
#[derive(Debug)]
pub enum HttpError {
    /// Malformed or unacceptable message. The channel's error handler answers
    /// with a canned response when the exchange is still uncommitted.
    BadMessage { status: u16, reason: String },
    /// The transport reported EOF before the message completed.
    EarlyEof,
    /// A send was started while another was still in flight.
    WritePending,
    /// The generator demanded information that was already supplied, or an
    /// operation arrived in a state that forbids it.
    Lifecycle(String),
    /// The connection is closed.
    Closed,
    /// Underlying transport failure.
    Io(io::Error),
}

impl HttpError {
    pub fn bad_message(status: u16, reason: impl Into<String>) -> Self {
        Self::BadMessage {
            status,
            reason: reason.into(),
        }
    }

    /// Status code a canned response for this error should carry, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::BadMessage { status, .. } => Some(*status),
            HttpError::EarlyEof => Some(400),
            _ => None,
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::BadMessage { status, reason } => write!(f, "{} {}", status, reason),
            HttpError::EarlyEof => write!(f, "Early EOF"),
            HttpError::WritePending => write!(f, "write pending"),
            HttpError::Lifecycle(m) => write!(f, "lifecycle violation: {}", m),
            HttpError::Closed => write!(f, "connection closed"),
            HttpError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HttpError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HttpError {
    fn from(e: io::Error) -> Self {
        HttpError::Io(e)
    }
}
