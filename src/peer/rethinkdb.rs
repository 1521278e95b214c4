//! RethinkDB peer. Publishing inserts `{data}` documents into the benchmark
//! table; consuming follows a changefeed on that table over a second
//! connection.

use super::{BENCH_TOPIC, Peer, PeerError, Publish, SendLoop, normalize_host};
use crate::protocol::ProtocolError;
use crate::protocol::rethinkdb::{self as wire, QueryType, Response, ResponseType};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const DEFAULT_PORT: u16 = 28015;

const MAX_HANDSHAKE_REPLY: usize = 1024;

struct Connection {
    stream: TcpStream,
    next_token: u64,
    scratch: BytesMut,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self, ProtocolError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&wire::encode_handshake("")).await?;

        let mut reply = Vec::new();
        loop {
            let byte = stream.read_u8().await?;
            if byte == 0 {
                break;
            }
            if reply.len() >= MAX_HANDSHAKE_REPLY {
                return Err(ProtocolError::Malformed(
                    "handshake reply is not terminated".to_string(),
                ));
            }
            reply.push(byte);
        }
        wire::check_handshake(&reply)?;

        Ok(Self {
            stream,
            next_token: 0,
            scratch: BytesMut::new(),
        })
    }

    async fn write_query(
        &mut self,
        token: u64,
        kind: QueryType,
        term: Option<&Value>,
    ) -> Result<(), ProtocolError> {
        self.stream
            .write_all(&wire::encode_query(token, kind, term))
            .await?;
        Ok(())
    }

    async fn read_response(&mut self, token: u64) -> Result<Response, ProtocolError> {
        let mut header = [0u8; wire::RESPONSE_HEADER_LEN];
        self.stream.read_exact(&mut header).await?;
        let (got, len) = wire::decode_response_header(&header);
        if len > crate::protocol::MAX_FRAME_BYTES {
            return Err(ProtocolError::Malformed(format!(
                "response too large: {len} bytes"
            )));
        }
        self.scratch.clear();
        self.scratch.resize(len, 0);
        self.stream.read_exact(&mut self.scratch[..]).await?;
        if got != token {
            return Err(ProtocolError::Malformed(format!(
                "response token {got} does not match query {token}"
            )));
        }
        wire::decode_response(token, &self.scratch)?.into_result()
    }

    /// Start a query and return its first response along with its token.
    async fn start(&mut self, term: &Value) -> Result<(u64, Response), ProtocolError> {
        self.next_token += 1;
        let token = self.next_token;
        self.write_query(token, QueryType::Start, Some(term)).await?;
        let response = self.read_response(token).await?;
        Ok((token, response))
    }
}

struct Producer {
    conn: Connection,
}

#[async_trait]
impl Publish for Producer {
    async fn publish(&mut self, payload: Bytes) -> Result<(), PeerError> {
        let term = wire::insert_data(wire::table(BENCH_TOPIC, BENCH_TOPIC), &payload);
        let (_, response) = self.conn.start(&term).await.map_err(PeerError::publish)?;
        let result = response.results.first().ok_or_else(|| {
            PeerError::Publish("insert returned no write result".to_string())
        })?;
        wire::check_write(result).map_err(PeerError::publish)?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.conn.stream.shutdown().await;
    }
}

struct Changefeed {
    conn: Connection,
    token: u64,
    buffered: VecDeque<Value>,
    exhausted: bool,
}

impl Changefeed {
    async fn open(addr: &str) -> Result<Self, ProtocolError> {
        let mut conn = Connection::open(addr).await?;
        let term = wire::changes(wire::table(BENCH_TOPIC, BENCH_TOPIC));
        let (token, response) = conn.start(&term).await?;
        let mut feed = Self {
            conn,
            token,
            buffered: VecDeque::new(),
            exhausted: false,
        };
        feed.absorb(response);
        Ok(feed)
    }

    fn absorb(&mut self, response: Response) {
        self.exhausted = response.kind != ResponseType::SuccessPartial;
        self.buffered.extend(response.results);
    }

    async fn next(&mut self) -> Result<Bytes, ProtocolError> {
        loop {
            while let Some(change) = self.buffered.pop_front() {
                if let Some(data) = wire::change_data(&change)? {
                    return Ok(data);
                }
            }
            if self.exhausted {
                return Err(ProtocolError::Closed);
            }
            self.conn
                .write_query(self.token, QueryType::Continue, None)
                .await?;
            let response = self.conn.read_response(self.token).await?;
            self.absorb(response);
        }
    }

    async fn close(&mut self) {
        if !self.exhausted {
            let _ = self.conn.write_query(self.token, QueryType::Stop, None).await;
        }
        let _ = self.conn.stream.shutdown().await;
    }
}

pub struct RethinkDbPeer {
    addr: String,
    send_loop: SendLoop,
    feed: Option<Changefeed>,
}

impl RethinkDbPeer {
    pub async fn connect(host: &str) -> Result<Self, PeerError> {
        Self::connect_addr(&normalize_host(host, DEFAULT_PORT)).await
    }

    /// Connect to an exact `host:port`. The benchmark table must already
    /// exist, see [`reset_table`].
    pub async fn connect_addr(addr: &str) -> Result<Self, PeerError> {
        let conn = Connection::open(addr)
            .await
            .map_err(PeerError::connection)?;
        tracing::debug!(addr, "rethinkdb peer connected");

        Ok(Self {
            addr: addr.to_string(),
            send_loop: SendLoop::new(Box::new(Producer { conn })),
            feed: None,
        })
    }
}

/// Recreate the benchmark table from scratch. Runs once per run, before any
/// peer subscribes, since dropping the table ends every open changefeed.
pub async fn reset_table(host: &str) -> Result<(), PeerError> {
    reset_table_addr(&normalize_host(host, DEFAULT_PORT)).await
}

pub async fn reset_table_addr(addr: &str) -> Result<(), PeerError> {
    let mut conn = Connection::open(addr)
        .await
        .map_err(PeerError::connection)?;

    // both fail harmlessly when the database exists or the table does not
    if let Err(e) = conn.start(&wire::db_create(BENCH_TOPIC)).await {
        tracing::debug!(error = %e, "db_create skipped");
    }
    if let Err(e) = conn.start(&wire::table_drop(BENCH_TOPIC, BENCH_TOPIC)).await {
        tracing::debug!(error = %e, "table_drop skipped");
    }
    conn.start(&wire::table_create(BENCH_TOPIC, BENCH_TOPIC))
        .await
        .map_err(PeerError::connection)?;
    let _ = conn.stream.shutdown().await;
    tracing::debug!(addr, "rethinkdb table recreated");
    Ok(())
}

#[async_trait]
impl Peer for RethinkDbPeer {
    async fn subscribe(&mut self) -> Result<(), PeerError> {
        if self.feed.is_none() {
            let feed = Changefeed::open(&self.addr)
                .await
                .map_err(PeerError::subscription)?;
            self.feed = Some(feed);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes, PeerError> {
        let feed = self.feed.as_mut().ok_or(PeerError::NotSubscribed)?;
        feed.next().await.map_err(PeerError::receive)
    }

    fn send_loop(&self) -> &SendLoop {
        &self.send_loop
    }

    fn send_loop_mut(&mut self) -> &mut SendLoop {
        &mut self.send_loop
    }

    async fn teardown(&mut self) {
        self.send_loop.teardown().await;
        if let Some(mut feed) = self.feed.take() {
            feed.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    async fn accept_handshake(socket: &mut TcpStream) {
        let mut hs = [0u8; 12];
        socket.read_exact(&mut hs).await.unwrap();
        assert_eq!(&hs[..4], &wire::VERSION_V0_4.to_le_bytes());
        socket.write_all(b"SUCCESS\0").await.unwrap();
    }

    async fn read_query(socket: &mut TcpStream) -> (u64, Value) {
        let token = socket.read_u64_le().await.unwrap();
        let len = socket.read_u32_le().await.unwrap() as usize;
        let mut body = vec![0u8; len];
        socket.read_exact(&mut body).await.unwrap();
        (token, serde_json::from_slice(&body).unwrap())
    }

    async fn reply(socket: &mut TcpStream, token: u64, body: Value) {
        let body = body.to_string();
        socket.write_all(&token.to_le_bytes()).await.unwrap();
        socket
            .write_all(&(body.len() as u32).to_le_bytes())
            .await
            .unwrap();
        socket.write_all(body.as_bytes()).await.unwrap();
    }

    fn term_name(query: &Value) -> &'static str {
        match query[1][0].as_u64() {
            Some(57) => "db_create",
            Some(60) => "table_create",
            Some(61) => "table_drop",
            Some(56) => "insert",
            Some(152) => "changes",
            _ => "other",
        }
    }

    #[tokio::test]
    async fn reset_recreates_table() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            accept_handshake(&mut socket).await;

            let (token, query) = read_query(&mut socket).await;
            assert_eq!(term_name(&query), "db_create");
            reply(&mut socket, token, json!({"t": 18, "r": ["Database `test` already exists."]}))
                .await;
            let (token, query) = read_query(&mut socket).await;
            assert_eq!(term_name(&query), "table_drop");
            reply(&mut socket, token, json!({"t": 1, "r": [{"tables_dropped": 1}]})).await;
            let (token, query) = read_query(&mut socket).await;
            assert_eq!(term_name(&query), "table_create");
            reply(&mut socket, token, json!({"t": 1, "r": [{"tables_created": 1}]})).await;
        });

        reset_table_addr(&addr).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn failed_table_create_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            accept_handshake(&mut socket).await;
            for _ in 0..2 {
                let (token, _) = read_query(&mut socket).await;
                reply(&mut socket, token, json!({"t": 1, "r": [{}]})).await;
            }
            let (token, _) = read_query(&mut socket).await;
            reply(&mut socket, token, json!({"t": 18, "r": ["Database `test` is read-only."]}))
                .await;
        });

        let err = reset_table_addr(&addr).await.unwrap_err();
        assert!(matches!(err, PeerError::Connection(_)));
        assert!(err.to_string().contains("read-only"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn publishes_inserts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            accept_handshake(&mut socket).await;

            let (token, query) = read_query(&mut socket).await;
            assert_eq!(term_name(&query), "insert");
            let doc = &query[1][1][1];
            assert_eq!(
                wire::decode_binary(&doc["data"]).unwrap(),
                Bytes::from_static(b"hello")
            );
            reply(&mut socket, token, json!({"t": 1, "r": [{"inserted": 1, "errors": 0}]})).await;

            let (token, _) = read_query(&mut socket).await;
            reply(
                &mut socket,
                token,
                json!({"t": 1, "r": [{"inserted": 0, "errors": 1, "first_error": "boom"}]}),
            )
            .await;
        });

        let mut peer = RethinkDbPeer::connect_addr(&addr).await.unwrap();
        peer.setup().unwrap();
        let out = peer.send().unwrap();
        out.send(Bytes::from_static(b"hello")).unwrap();
        out.send(Bytes::from_static(b"again")).unwrap();
        peer.done().await;

        let errors = peer.errors().drain();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("boom"));
        peer.teardown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_response_is_rejected_before_reading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            accept_handshake(&mut socket).await;
            let (token, _) = read_query(&mut socket).await;
            socket.write_all(&token.to_le_bytes()).await.unwrap();
            socket.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
            let mut sink = Vec::new();
            let _ = socket.read_to_end(&mut sink).await;
        });

        let mut peer = RethinkDbPeer::connect_addr(&addr).await.unwrap();
        peer.setup().unwrap();
        peer.send().unwrap().send(Bytes::from_static(b"x")).unwrap();
        peer.done().await;

        let errors = peer.errors().drain();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("too large"));
        peer.teardown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn later_connects_leave_open_changefeeds_alone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let log = Arc::new(Mutex::new(Vec::new()));
            // subscriber producer conn, subscriber feed conn, publisher conn
            for conn in 1..=3 {
                let (mut socket, _) = listener.accept().await.unwrap();
                accept_handshake(&mut socket).await;
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    loop {
                        let token = match socket.read_u64_le().await {
                            Ok(token) => token,
                            Err(_) => return,
                        };
                        let len = socket.read_u32_le().await.unwrap() as usize;
                        let mut body = vec![0u8; len];
                        socket.read_exact(&mut body).await.unwrap();
                        let query: Value = serde_json::from_slice(&body).unwrap();
                        if query[0] == json!(1) {
                            log.lock().unwrap().push(format!("conn{conn}:{}", term_name(&query)));
                        }
                        if query[0] == json!(3) {
                            return;
                        }
                        let kind = if query[0] == json!(1) && term_name(&query) == "changes" {
                            3
                        } else {
                            1
                        };
                        reply(&mut socket, token, json!({"t": kind, "r": []})).await;
                    }
                });
            }
            log
        });

        let mut subscriber = RethinkDbPeer::connect_addr(&addr).await.unwrap();
        subscriber.subscribe().await.unwrap();
        let mut publisher = RethinkDbPeer::connect_addr(&addr).await.unwrap();
        publisher.teardown().await;
        subscriber.teardown().await;

        let log = server.await.unwrap();
        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["conn2:changes".to_string()]);
    }

    #[tokio::test]
    async fn changefeed_delivers_new_values() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut producer, _) = listener.accept().await.unwrap();
            accept_handshake(&mut producer).await;

            let (mut feed, _) = listener.accept().await.unwrap();
            accept_handshake(&mut feed).await;
            let (token, query) = read_query(&mut feed).await;
            assert_eq!(term_name(&query), "changes");
            reply(&mut feed, token, json!({"t": 3, "r": []})).await;

            let (cont, query) = read_query(&mut feed).await;
            assert_eq!(cont, token);
            assert_eq!(query, json!([2]));
            reply(
                &mut feed,
                token,
                json!({"t": 3, "r": [
                    {"new_val": null, "old_val": {"id": "gone"}},
                    {"new_val": {"id": "a", "data": wire::binary(b"first")}, "old_val": null}
                ]}),
            )
            .await;

            // the consumer stops the feed on teardown
            let (stop, query) = read_query(&mut feed).await;
            assert_eq!(stop, token);
            assert_eq!(query, json!([3]));
            drop(producer);
        });

        let mut peer = RethinkDbPeer::connect_addr(&addr).await.unwrap();
        peer.subscribe().await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"first"));
        peer.teardown().await;
        server.await.unwrap();
    }
}
