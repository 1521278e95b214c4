//! NSQ peer. Producer and consumer talk to nsqd directly over separate TCP
//! connections; each consumer reads from its own ephemeral channel so every
//! subscriber sees every message.

use super::{BENCH_TOPIC, Peer, PeerError, Publish, SendLoop, normalize_host};
use crate::protocol::nsq::{self as wire, Frame};
use crate::protocol::{ProtocolError, read_sized_frame};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

pub const DEFAULT_PORT: u16 = 4150;

/// In-flight messages nsqd may push before waiting for FIN.
const MAX_IN_FLIGHT: u32 = 1024;

struct Connection {
    stream: TcpStream,
    scratch: BytesMut,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self, ProtocolError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(wire::MAGIC_V2).await?;
        Ok(Self {
            stream,
            scratch: BytesMut::with_capacity(64 * 1024),
        })
    }

    async fn write(&mut self, command: &[u8]) -> Result<(), ProtocolError> {
        self.stream.write_all(command).await?;
        Ok(())
    }

    /// Next frame that is not a heartbeat. Heartbeats are answered inline.
    async fn next_frame(&mut self) -> Result<Frame, ProtocolError> {
        loop {
            let frame = read_sized_frame(&mut self.stream, &mut self.scratch).await?;
            let frame = wire::decode_frame(frame)?;
            if frame.is_heartbeat() {
                self.write(&wire::encode_nop()).await?;
                continue;
            }
            return Ok(frame);
        }
    }

    /// Wait for the `OK` that acknowledges a command.
    async fn expect_ok(&mut self) -> Result<(), ProtocolError> {
        match self.next_frame().await? {
            frame if frame.is_ok() => Ok(()),
            Frame::Error(e) => Err(ProtocolError::Broker(e)),
            Frame::Response(data) => Err(ProtocolError::Malformed(format!(
                "unexpected response {}",
                String::from_utf8_lossy(&data)
            ))),
            Frame::Message(_) => Err(ProtocolError::Malformed(
                "unexpected message while awaiting OK".to_string(),
            )),
        }
    }
}

struct Producer {
    conn: Connection,
}

#[async_trait]
impl Publish for Producer {
    async fn publish(&mut self, payload: Bytes) -> Result<(), PeerError> {
        self.conn
            .write(&wire::encode_pub(BENCH_TOPIC, &payload))
            .await
            .map_err(PeerError::publish)?;
        self.conn.expect_ok().await.map_err(PeerError::publish)
    }

    async fn close(&mut self) {
        let _ = self.conn.stream.shutdown().await;
    }
}

struct Consumer {
    conn: Connection,
}

impl Consumer {
    async fn open(addr: &str, channel: &str) -> Result<Self, ProtocolError> {
        let mut conn = Connection::open(addr).await?;
        conn.write(&wire::encode_sub(BENCH_TOPIC, channel)).await?;
        conn.expect_ok().await?;
        conn.write(&wire::encode_rdy(MAX_IN_FLIGHT)).await?;
        Ok(Self { conn })
    }

    async fn next(&mut self) -> Result<Bytes, ProtocolError> {
        loop {
            match self.conn.next_frame().await? {
                Frame::Message(message) => {
                    self.conn.write(&wire::encode_fin(&message.id)).await?;
                    return Ok(message.body);
                }
                Frame::Error(e) => return Err(ProtocolError::Broker(e)),
                Frame::Response(data) => {
                    tracing::trace!(response = %String::from_utf8_lossy(&data), "nsq response");
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.conn.write(&wire::encode_cls()).await;
        let _ = self.conn.stream.shutdown().await;
    }
}

pub struct NsqPeer {
    addr: String,
    channel: String,
    send_loop: SendLoop,
    consumer: Option<Consumer>,
}

impl NsqPeer {
    pub async fn connect(host: &str) -> Result<Self, PeerError> {
        Self::connect_addr(&normalize_host(host, DEFAULT_PORT)).await
    }

    pub async fn connect_addr(addr: &str) -> Result<Self, PeerError> {
        let channel = format!("bench-{:08x}#ephemeral", rand::random::<u32>());
        wire::validate_name(&channel).map_err(PeerError::connection)?;
        let conn = Connection::open(addr)
            .await
            .map_err(PeerError::connection)?;
        tracing::debug!(addr, channel = %channel, "nsq peer connected");

        Ok(Self {
            addr: addr.to_string(),
            channel,
            send_loop: SendLoop::new(Box::new(Producer { conn })),
            consumer: None,
        })
    }
}

#[async_trait]
impl Peer for NsqPeer {
    async fn subscribe(&mut self) -> Result<(), PeerError> {
        if self.consumer.is_none() {
            let consumer = Consumer::open(&self.addr, &self.channel)
                .await
                .map_err(PeerError::subscription)?;
            self.consumer = Some(consumer);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes, PeerError> {
        let consumer = self.consumer.as_mut().ok_or(PeerError::NotSubscribed)?;
        consumer.next().await.map_err(PeerError::receive)
    }

    fn send_loop(&self) -> &SendLoop {
        &self.send_loop
    }

    fn send_loop_mut(&mut self) -> &mut SendLoop {
        &mut self.send_loop
    }

    async fn teardown(&mut self) {
        self.send_loop.teardown().await;
        if let Some(mut consumer) = self.consumer.take() {
            consumer.close().await;
        }
    }
}
