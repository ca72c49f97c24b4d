/*
 * h1_server.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * End-to-end tests for the HTTP/1 connection engine over a scripted in-memory
 * endpoint: byte-exact responses, persistence and pipelining, expectations,
 * protocol errors, and h2c upgrade handoff.
 *
 * Run with:
 *   cargo test -p portiere_core --test h1_server
 */

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use portiere_core::buffer::BufferPool;
use portiere_core::net::{MemoryTransport, Transport};
use portiere_core::protocol::http::{
    Channel, Content, HttpConnection, HttpError, Interest, RequestMeta, ResponseMeta, Stream,
    UpgradeHandler,
};
use portiere_core::HttpConfig;

/// Everything the test channels record for inspection.
#[derive(Default)]
struct Record {
    requests: Vec<String>,
    body: Vec<u8>,
    trailers: Vec<(String, String)>,
    send_results: Vec<Result<(), String>>,
    failures: Vec<String>,
    committed_at_failure: bool,
    completed: bool,
    demand_returns: Vec<bool>,
}

type Shared = Arc<Mutex<Record>>;

fn send_cb(record: &Shared) -> portiere_core::SendCallback {
    let record = Arc::clone(record);
    Box::new(move |result| {
        record
            .lock()
            .unwrap()
            .send_results
            .push(result.map_err(|e| e.to_string()));
    })
}

fn note_request(record: &Shared, stream: &Stream<'_>) {
    if let Some(req) = stream.request() {
        record
            .lock()
            .unwrap()
            .requests
            .push(format!("{} {}", req.method.as_str(), req.uri));
    }
}

/// Responds "Hello" as text/plain to every request.
struct HelloChannel(Shared);

impl Channel for HelloChannel {
    fn on_request(&mut self, stream: &mut Stream<'_>) {
        note_request(&self.0, stream);
        let meta = ResponseMeta::new(200).header("Content-Type", "text/plain; charset=utf-8");
        stream.send(Some(meta), Some(Bytes::from_static(b"Hello")), true, send_cb(&self.0));
        stream.succeeded();
        self.0.lock().unwrap().completed = stream.is_complete();
    }

    fn on_content_available(&mut self, _stream: &mut Stream<'_>) {}
}

/// Reads the whole request body, echoes it back.
struct EchoChannel {
    record: Shared,
    pending: Vec<u8>,
}

impl EchoChannel {
    fn new(record: Shared) -> Self {
        Self {
            record,
            pending: Vec::new(),
        }
    }

    fn pump(&mut self, stream: &mut Stream<'_>) {
        loop {
            match stream.read_content() {
                Ok(Some(Content::Chunk(c))) => {
                    self.pending.extend_from_slice(&c.data);
                }
                Ok(Some(Content::Trailers(t))) => {
                    let mut rec = self.record.lock().unwrap();
                    for (n, v) in t.iter() {
                        rec.trailers.push((n.to_string(), v.to_string()));
                    }
                    break;
                }
                Ok(Some(Content::Eof)) => break,
                Ok(None) => {
                    let registered = !stream.demand_content().unwrap_or(true);
                    self.record.lock().unwrap().demand_returns.push(registered);
                    if registered {
                        return; // resumed via on_content_available
                    }
                }
                Err(e) => {
                    let mut rec = self.record.lock().unwrap();
                    rec.failures.push(e.to_string());
                    rec.committed_at_failure = stream.is_committed();
                    drop(rec);
                    stream.failed(e);
                    return;
                }
            }
        }
        let body = std::mem::take(&mut self.pending);
        self.record.lock().unwrap().body = body.clone();
        let meta = ResponseMeta::new(200).header("Content-Type", "text/plain");
        stream.send(Some(meta), Some(Bytes::from(body)), true, send_cb(&self.record));
        stream.succeeded();
        self.record.lock().unwrap().completed = stream.is_complete();
    }
}

impl Channel for EchoChannel {
    fn on_request(&mut self, stream: &mut Stream<'_>) {
        note_request(&self.record, stream);
        self.pending.clear();
        self.pump(stream);
    }

    fn on_content_available(&mut self, stream: &mut Stream<'_>) {
        self.pump(stream);
    }
}

/// Declares Content-Length: 10 but writes only 5 bytes.
struct ShortChannel {
    record: Shared,
    commit_first: bool,
}

impl Channel for ShortChannel {
    fn on_request(&mut self, stream: &mut Stream<'_>) {
        note_request(&self.record, stream);
        let meta = ResponseMeta::new(200).content_length(10);
        if self.commit_first {
            stream.send(Some(meta), Some(Bytes::from_static(b"First")), false, send_cb(&self.record));
            stream.send(None, None, true, send_cb(&self.record));
        } else {
            stream.send(Some(meta), Some(Bytes::from_static(b"Hello")), true, send_cb(&self.record));
        }
        let mut rec = self.record.lock().unwrap();
        if let Some(Err(e)) = rec.send_results.last() {
            let e = e.clone();
            rec.committed_at_failure = stream.is_committed();
            rec.failures.push(e);
        }
    }

    fn on_content_available(&mut self, _stream: &mut Stream<'_>) {}

    fn on_failure(&mut self, error: &HttpError) {
        self.record.lock().unwrap().failures.push(error.to_string());
    }
}

/// Demands content before reading (exercises 100-continue and the single-shot
/// registration), then echoes.
struct ContinueChannel(EchoChannel);

impl Channel for ContinueChannel {
    fn on_request(&mut self, stream: &mut Stream<'_>) {
        note_request(&self.0.record, stream);
        match stream.demand_content() {
            Ok(true) => self.0.pump(stream),
            Ok(false) => {
                // Registered; also check the registration is single-shot.
                let again = stream.demand_content().unwrap_or(true);
                self.0.record.lock().unwrap().demand_returns.push(again);
            }
            Err(e) => stream.failed(e),
        }
    }

    fn on_content_available(&mut self, stream: &mut Stream<'_>) {
        self.0.pump(stream);
    }
}

/// Accepts any upgrade and records what it inherited.
struct AcceptUpgrade {
    taken: Arc<Mutex<Option<(String, Vec<u8>)>>>,
}

impl UpgradeHandler for AcceptUpgrade {
    fn upgrade(
        &mut self,
        request: &RequestMeta,
        _transport: Box<dyn Transport>,
        leftover: Bytes,
    ) -> Result<(), (Box<dyn Transport>, Bytes)> {
        *self.taken.lock().unwrap() = Some((request.method.as_str().to_string(), leftover.to_vec()));
        Ok(())
    }
}

/// Refuses every upgrade, handing the endpoint back.
struct RefuseUpgrade;

impl UpgradeHandler for RefuseUpgrade {
    fn upgrade(
        &mut self,
        _request: &RequestMeta,
        transport: Box<dyn Transport>,
        leftover: Bytes,
    ) -> Result<(), (Box<dyn Transport>, Bytes)> {
        Err((transport, leftover))
    }
}

fn config() -> HttpConfig {
    HttpConfig {
        send_date_header: false,
        ..HttpConfig::default()
    }
}

fn connection(
    mem: &MemoryTransport,
    pool: &Arc<BufferPool>,
    channel: Box<dyn Channel>,
) -> HttpConnection {
    HttpConnection::new(config(), Arc::clone(pool), Box::new(mem.clone()), channel)
}

#[test]
fn simple_get_roundtrip() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(HelloChannel(Arc::clone(&record))));

    mem.push_input(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n");
    conn.on_fillable();

    let out = String::from_utf8(mem.take_output()).unwrap();
    assert_eq!(
        out,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 5\r\n\r\nHello"
    );
    let rec = record.lock().unwrap();
    assert_eq!(rec.requests, vec!["GET http://h/"]);
    assert!(rec.send_results[0].is_ok());
    assert!(rec.completed);
    drop(rec);
    // Engine is back to awaiting the next request.
    assert_eq!(conn.interest(), Interest::Read);
    // Every pooled buffer went back.
    assert_eq!(pool.acquired(), pool.recycled());
}

#[test]
fn post_echo_with_content_length() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(EchoChannel::new(Arc::clone(&record))));

    mem.push_input(
        b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 14\r\nContent-Type: text/plain\r\n\r\nECHO Echo echo",
    );
    conn.on_fillable();

    let out = String::from_utf8(mem.take_output()).unwrap();
    assert!(out.contains("Content-Length: 14\r\n"), "{}", out);
    assert!(out.ends_with("ECHO Echo echo"));
    let rec = record.lock().unwrap();
    assert_eq!(rec.body, b"ECHO Echo echo");
    assert!(rec.completed);
    assert!(rec.failures.is_empty());
}

#[test]
fn pipelined_get_dispatches_after_post() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(EchoChannel::new(Arc::clone(&record))));

    // POST and a pipelined GET arrive in one fill; the response write blocks
    // once, so the POST completes off the reader path.
    mem.push_input(
        b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 4\r\n\r\nbodyGET / HTTP/1.1\r\nHost: h\r\n\r\n",
    );
    mem.block_next_write();
    conn.on_fillable();
    assert_eq!(conn.interest(), Interest::Write);

    conn.on_writable();
    // The pipelined request is handed off the completion stack.
    assert_eq!(conn.interest(), Interest::Dispatch);
    conn.on_dispatched();

    let out = String::from_utf8(mem.take_output()).unwrap();
    let responses: Vec<&str> = out.matches("HTTP/1.1 200 OK").collect();
    assert_eq!(responses.len(), 2, "{}", out);
    assert!(out.contains("Content-Length: 0\r\n"), "{}", out);
    assert_eq!(conn.interest(), Interest::Read);
}

#[test]
fn short_body_fails_uncommitted_exchange() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let channel = ShortChannel {
        record: Arc::clone(&record),
        commit_first: false,
    };
    let mut conn = connection(&mem, &pool, Box::new(channel));

    mem.push_input(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n");
    conn.on_fillable();

    let rec = record.lock().unwrap();
    let err = rec.send_results[0].as_ref().unwrap_err();
    assert!(err.contains("content-length 10 != 5"), "{}", err);
    assert!(!rec.committed_at_failure);
    drop(rec);
    // Nothing was sent and the connection is gone.
    assert!(mem.take_output().is_empty());
    assert_eq!(conn.interest(), Interest::Closed);
    assert_eq!(pool.acquired(), pool.recycled());
}

#[test]
fn short_body_fails_committed_exchange() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let channel = ShortChannel {
        record: Arc::clone(&record),
        commit_first: true,
    };
    let mut conn = connection(&mem, &pool, Box::new(channel));

    mem.push_input(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n");
    conn.on_fillable();

    let out = String::from_utf8(mem.take_output()).unwrap();
    // The head and first fragment made it out before the failure.
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.ends_with("First"));
    let rec = record.lock().unwrap();
    assert!(rec.send_results[0].is_ok());
    let err = rec.send_results[1].as_ref().unwrap_err();
    assert!(err.contains("content-length 10 != 5"), "{}", err);
    assert!(rec.committed_at_failure);
    drop(rec);
    assert_eq!(conn.interest(), Interest::Closed);
}

#[test]
fn unknown_expectation_gets_417() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(HelloChannel(Arc::clone(&record))));

    mem.push_input(b"POST / HTTP/1.1\r\nHost: h\r\nExpect: bogus\r\nContent-Length: 4\r\n\r\nbody");
    conn.on_fillable();

    let out = String::from_utf8(mem.take_output()).unwrap();
    assert!(out.starts_with("HTTP/1.1 417 Expectation Failed\r\n"), "{}", out);
    assert!(out.contains("Connection: close\r\n"));
    // Dispatch was suppressed; the handler never saw a request.
    assert!(record.lock().unwrap().requests.is_empty());
    assert!(mem.is_output_shutdown());
    // The engine stays readable to observe the peer's EOF, then closes.
    assert_eq!(conn.interest(), Interest::Read);
    mem.close_input();
    conn.on_readable();
    assert_eq!(conn.interest(), Interest::Closed);
}

#[test]
fn h2c_preface_hands_off_to_upgrade_handler() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(HelloChannel(Arc::clone(&record))));
    let taken = Arc::new(Mutex::new(None));
    conn.set_upgrade_handler(Box::new(AcceptUpgrade {
        taken: Arc::clone(&taken),
    }));

    mem.push_input(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");
    conn.on_fillable();

    assert!(conn.is_upgraded());
    assert_eq!(conn.interest(), Interest::Closed);
    // No HTTP/1 response was emitted.
    assert!(mem.take_output().is_empty());
    let taken = taken.lock().unwrap();
    let (method, leftover) = taken.as_ref().unwrap();
    assert_eq!(method, "PRI");
    assert_eq!(leftover, b"SM\r\n\r\n");
    assert!(record.lock().unwrap().requests.is_empty());
}

#[test]
fn h2c_preface_refused_gets_426() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(HelloChannel(Arc::clone(&record))));
    conn.set_upgrade_handler(Box::new(RefuseUpgrade));

    mem.push_input(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");
    conn.on_fillable();

    assert!(!conn.is_upgraded());
    let out = String::from_utf8(mem.take_output()).unwrap();
    assert!(out.starts_with("HTTP/1.1 426 Upgrade Required\r\n"), "{}", out);
    assert!(out.contains("Connection: close\r\n"));
}

#[test]
fn pipelined_requests_inline() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(HelloChannel(Arc::clone(&record))));

    mem.push_input(b"GET /a HTTP/1.1\r\nHost: h\r\n\r\nGET /b HTTP/1.1\r\nHost: h\r\n\r\n");
    conn.on_fillable();

    let rec = record.lock().unwrap();
    assert_eq!(rec.requests, vec!["GET http://h/a", "GET http://h/b"]);
    drop(rec);
    let out = String::from_utf8(mem.take_output()).unwrap();
    assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
    assert_eq!(conn.interest(), Interest::Read);
}

#[test]
fn http10_without_keep_alive_closes() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(HelloChannel(Arc::clone(&record))));

    mem.push_input(b"GET / HTTP/1.0\r\nHost: h\r\n\r\n");
    conn.on_fillable();

    let out = String::from_utf8(mem.take_output()).unwrap();
    assert!(out.contains("Connection: close\r\n"), "{}", out);
    assert!(mem.is_output_shutdown());
}

#[test]
fn http10_with_keep_alive_persists() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(HelloChannel(Arc::clone(&record))));

    mem.push_input(b"GET / HTTP/1.0\r\nHost: h\r\nConnection: keep-alive\r\n\r\n");
    conn.on_fillable();
    let out = String::from_utf8(mem.take_output()).unwrap();
    assert!(out.contains("Connection: keep-alive\r\n"), "{}", out);
    assert!(!mem.is_output_shutdown());

    mem.push_input(b"GET /again HTTP/1.0\r\nHost: h\r\nConnection: keep-alive\r\n\r\n");
    conn.on_readable();
    assert_eq!(record.lock().unwrap().requests.len(), 2);
}

#[test]
fn expect_100_continue_flow() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let channel = ContinueChannel(EchoChannel::new(Arc::clone(&record)));
    let mut conn = connection(&mem, &pool, Box::new(channel));

    mem.push_input(
        b"POST / HTTP/1.1\r\nHost: h\r\nExpect: 100-continue\r\nContent-Length: 4\r\n\r\n",
    );
    conn.on_fillable();

    let out = String::from_utf8(mem.take_output()).unwrap();
    assert_eq!(out, "HTTP/1.1 100 Continue\r\n\r\n");
    assert_eq!(conn.interest(), Interest::Read);
    // The re-registration attempt was the single outstanding one.
    assert_eq!(record.lock().unwrap().demand_returns, vec![false]);

    mem.push_input(b"body");
    conn.on_readable();
    let out = String::from_utf8(mem.take_output()).unwrap();
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{}", out);
    assert!(out.ends_with("body"));
    assert_eq!(record.lock().unwrap().body, b"body");
}

#[test]
fn chunked_request_with_trailers() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(EchoChannel::new(Arc::clone(&record))));

    mem.push_input(
        b"POST / HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n5\r\npedia\r\n0\r\nX-Sum: 9\r\n\r\n",
    );
    conn.on_fillable();

    let rec = record.lock().unwrap();
    assert_eq!(rec.body, b"wikipedia");
    assert_eq!(rec.trailers, vec![("X-Sum".to_string(), "9".to_string())]);
    drop(rec);
    let out = String::from_utf8(mem.take_output()).unwrap();
    assert!(out.ends_with("wikipedia"));
}

#[test]
fn early_eof_fails_exchange() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(EchoChannel::new(Arc::clone(&record))));

    mem.push_input(b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 14\r\n\r\nECHO");
    mem.close_input();
    conn.on_fillable();

    let rec = record.lock().unwrap();
    assert_eq!(rec.failures, vec!["Early EOF".to_string()]);
    drop(rec);
    assert_eq!(conn.interest(), Interest::Closed);
    assert_eq!(pool.acquired(), pool.recycled());
}

#[test]
fn bad_request_line_gets_400() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(HelloChannel(Arc::clone(&record))));

    mem.push_input(b"NOT A VALID LINE AT ALL\r\n\r\n");
    conn.on_fillable();

    let out = String::from_utf8(mem.take_output()).unwrap();
    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", out);
    assert!(out.contains("Connection: close\r\n"));
}

#[test]
fn clean_eof_between_requests_closes_quietly() {
    let mem = MemoryTransport::new();
    let pool = BufferPool::new(8);
    let record: Shared = Shared::default();
    let mut conn = connection(&mem, &pool, Box::new(HelloChannel(Arc::clone(&record))));

    mem.push_input(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n");
    conn.on_fillable();
    assert_eq!(conn.interest(), Interest::Read);

    mem.close_input();
    conn.on_readable();
    assert_eq!(conn.interest(), Interest::Closed);
    assert!(record.lock().unwrap().failures.is_empty());
    assert_eq!(pool.acquired(), pool.recycled());
}

#[tokio::test]
async fn serves_over_tcp() {
    use portiere_core::net::{serve, TcpTransport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let stream = Arc::new(stream);
        let record: Shared = Shared::default();
        let conn = HttpConnection::new(
            config(),
            BufferPool::new(8),
            Box::new(TcpTransport::new(Arc::clone(&stream))),
            Box::new(HelloChannel(record)),
        );
        serve(conn, stream).await
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    let mut chunk = vec![0u8; 1024];
    while !response.ends_with(b"Hello") {
        let n = client.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before the full response");
        response.extend_from_slice(&chunk[..n]);
    }
    let response = String::from_utf8_lossy(&response).into_owned();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
    assert!(response.ends_with("Hello"));

    drop(client);
    server.await.unwrap().unwrap();
}
