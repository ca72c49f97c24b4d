/*
 * request.rs
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

//! Request-side types: method, protocol version, header field list, request
//! target URI, and the immutable metadata handed to the application.

use percent_encoding::percent_decode_str;

use crate::protocol::http::error::HttpError;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    /// The HTTP/2 cleartext preface pseudo-method.
    Pri,
    Other(String),
}

impl Method {
    pub fn from_token(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            "CONNECT" => Method::Connect,
            "PRI" => Method::Pri,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Connect => "CONNECT",
            Method::Pri => "PRI",
            Method::Other(s) => s,
        }
    }
}

/// Protocol version on the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http09,
    Http10,
    Http11,
    /// Seen only on the cleartext preface request line.
    Http2,
}

impl Version {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            "HTTP/2.0" => Some(Version::Http2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http09 => "HTTP/0.9",
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::Http2 => "HTTP/2.0",
        }
    }
}

/// Ordered header field list. Names repeat for multi-value fields; lookups are
/// case-insensitive per HTTP.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Request-target form per RFC 7230 §5.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetForm {
    Origin,
    Absolute,
    Authority,
    Asterisk,
}

/// Mutable request URI under construction: the parser supplies the raw target,
/// the connection fills scheme and authority at headers-complete, then commits
/// an immutable `HttpUri`.
#[derive(Debug, Clone)]
pub struct UriBuilder {
    form: TargetForm,
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
    query: Option<String>,
}

impl UriBuilder {
    /// Classify and split the request target. The method matters: CONNECT
    /// carries an authority-form target.
    pub fn parse(target: &str, method: &Method) -> Result<Self, HttpError> {
        if target.is_empty() {
            return Err(HttpError::bad_message(400, "Empty request target"));
        }
        if target.bytes().any(|b| b <= b' ' || b == 0x7f) {
            return Err(HttpError::bad_message(400, "Illegal character in target"));
        }
        if *method == Method::Connect {
            return Ok(Self {
                form: TargetForm::Authority,
                scheme: None,
                authority: Some(target.to_string()),
                path: String::new(),
                query: None,
            });
        }
        if target == "*" {
            return Ok(Self {
                form: TargetForm::Asterisk,
                scheme: None,
                authority: None,
                path: "*".to_string(),
                query: None,
            });
        }
        if let Some(rest) = target
            .strip_prefix("http://")
            .map(|r| ("http", r))
            .or_else(|| target.strip_prefix("https://").map(|r| ("https", r)))
        {
            let (scheme, rest) = rest;
            let (authority, path_query) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, "/"),
            };
            if authority.is_empty() {
                return Err(HttpError::bad_message(400, "Empty authority"));
            }
            let (path, query) = split_query(path_query);
            return Ok(Self {
                form: TargetForm::Absolute,
                scheme: Some(scheme.to_string()),
                authority: Some(authority.to_string()),
                path,
                query,
            });
        }
        if target.starts_with('/') {
            let (path, query) = split_query(target);
            return Ok(Self {
                form: TargetForm::Origin,
                scheme: None,
                authority: None,
                path,
                query,
            });
        }
        Err(HttpError::bad_message(400, "Bad request target"))
    }

    pub fn form(&self) -> TargetForm {
        self.form
    }

    /// Fill the scheme unless the target already carried one (absolute form).
    pub fn set_scheme(&mut self, scheme: &str) {
        if self.scheme.is_none() {
            self.scheme = Some(scheme.to_string());
        }
    }

    /// Fill the authority unless the target already carried one.
    pub fn set_authority(&mut self, authority: &str) {
        if self.authority.is_none() {
            self.authority = Some(authority.to_string());
        }
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Remove dot segments and check percent-encoding compliance. A path that
    /// climbs above the root is rejected.
    pub fn normalize(&mut self) -> Result<(), HttpError> {
        if self.form == TargetForm::Asterisk || self.form == TargetForm::Authority {
            return Ok(());
        }
        check_percent_encoding(&self.path)?;
        if let Some(q) = &self.query {
            check_percent_encoding(q)?;
        }
        let mut out: Vec<&str> = Vec::new();
        for segment in self.path.split('/').skip(1) {
            let decoded = percent_decode_str(segment).collect::<Vec<u8>>();
            match decoded.as_slice() {
                b"." => continue,
                b".." => {
                    if out.pop().is_none() {
                        return Err(HttpError::bad_message(400, "Path escapes root"));
                    }
                }
                _ => out.push(segment),
            }
        }
        let mut path = String::with_capacity(self.path.len());
        for segment in &out {
            path.push('/');
            path.push_str(segment);
        }
        if path.is_empty() {
            path.push('/');
        } else if self.path.ends_with('/') && !path.ends_with('/') {
            path.push('/');
        }
        self.path = path;
        Ok(())
    }

    /// Commit to an immutable URI.
    pub fn build(self) -> HttpUri {
        HttpUri {
            scheme: self.scheme,
            authority: self.authority,
            path: self.path,
            query: self.query,
        }
    }
}

fn split_query(path_query: &str) -> (String, Option<String>) {
    match path_query.find('?') {
        Some(i) => (
            path_query[..i].to_string(),
            Some(path_query[i + 1..].to_string()),
        ),
        None => (path_query.to_string(), None),
    }
}

/// Reject stray `%` not followed by two hex digits, and `#` (a fragment is not
/// valid in a request target).
fn check_percent_encoding(s: &str) -> Result<(), HttpError> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 2 >= bytes.len()
                    || !bytes[i + 1].is_ascii_hexdigit()
                    || !bytes[i + 2].is_ascii_hexdigit()
                {
                    return Err(HttpError::bad_message(400, "Bad percent encoding"));
                }
                i += 3;
            }
            b'#' => return Err(HttpError::bad_message(400, "Fragment in target")),
            _ => i += 1,
        }
    }
    Ok(())
}

/// Immutable request URI.
#[derive(Debug, Clone)]
pub struct HttpUri {
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
    query: Option<String>,
}

impl HttpUri {
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

impl std::fmt::Display for HttpUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let (Some(scheme), Some(authority)) = (&self.scheme, &self.authority) {
            write!(f, "{}://{}", scheme, authority)?;
        }
        f.write_str(&self.path)?;
        if let Some(q) = &self.query {
            write!(f, "?{}", q)?;
        }
        Ok(())
    }
}

/// Immutable request metadata emitted at headers-complete and handed to the
/// application channel.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub uri: HttpUri,
    pub version: Version,
    pub headers: Headers,
    /// Declared body length; -1 when unknown (chunked or no body).
    pub content_length: i64,
    /// Verbatim Upgrade header, when present.
    pub upgrade: Option<String>,
}
