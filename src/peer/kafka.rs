//! Kafka peer: a producer and a fetch-based consumer, both pinned to
//! partition 0 of the benchmark topic. Leader discovery and request routing
//! are handled by the `rskafka` client.

use super::{BENCH_TOPIC, Peer, PeerError, Publish, SendLoop, normalize_host};
use async_trait::async_trait;
use bytes::Bytes;
use rskafka::client::partition::{Compression, OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::Record;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9092;

const PARTITION: i32 = 0;

/// Bound on bootstrap and leader lookup. The client retries both forever.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const TOPIC_TIMEOUT_MS: i32 = 5_000;
const FETCH_MAX_WAIT_MS: i32 = 500;
const FETCH_BYTES: std::ops::Range<i32> = 1..1024 * 1024;

async fn bounded<T, E: std::fmt::Display>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, PeerError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PeerError::Connection(format!("{what}: {e}"))),
        Err(_) => Err(PeerError::Connection(format!(
            "{what}: timed out after {timeout:?}"
        ))),
    }
}

async fn build_client(addr: &str, timeout: Duration) -> Result<Client, PeerError> {
    bounded(
        timeout,
        "kafka bootstrap",
        ClientBuilder::new(vec![addr.to_string()]).build(),
    )
    .await
}

async fn partition_client(client: &Client, timeout: Duration) -> Result<PartitionClient, PeerError> {
    bounded(
        timeout,
        "kafka partition leader",
        client.partition_client(BENCH_TOPIC, PARTITION, UnknownTopicHandling::Retry),
    )
    .await
}

/// Create the single-partition benchmark topic unless it already exists.
pub async fn ensure_topic(host: &str) -> Result<(), PeerError> {
    let client = build_client(&normalize_host(host, DEFAULT_PORT), CONNECT_TIMEOUT).await?;
    let controller = client
        .controller_client()
        .map_err(|e| PeerError::Connection(format!("kafka controller: {e}")))?;
    // an existing topic is the common case after the first run
    if let Err(e) = controller
        .create_topic(BENCH_TOPIC, 1, 1, TOPIC_TIMEOUT_MS)
        .await
    {
        tracing::debug!(error = %e, "create_topic skipped");
    }
    Ok(())
}

struct Producer {
    partition: PartitionClient,
}

#[async_trait]
impl Publish for Producer {
    async fn publish(&mut self, payload: Bytes) -> Result<(), PeerError> {
        let record = Record {
            key: None,
            value: Some(payload.to_vec()),
            headers: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        };
        self.partition
            .produce(vec![record], Compression::NoCompression)
            .await
            .map_err(|e| PeerError::Publish(e.to_string()))?;
        Ok(())
    }
}

struct Consumer {
    partition: PartitionClient,
    offset: i64,
    buffered: VecDeque<Bytes>,
}

impl Consumer {
    async fn open(client: &Client) -> Result<Self, PeerError> {
        let partition = partition_client(client, CONNECT_TIMEOUT)
            .await
            .map_err(|e| PeerError::Subscription(e.to_string()))?;
        let offset = partition
            .get_offset(OffsetAt::Latest)
            .await
            .map_err(|e| PeerError::Subscription(e.to_string()))?;
        tracing::debug!(offset, "kafka consumer starting at newest offset");
        Ok(Self {
            partition,
            offset,
            buffered: VecDeque::new(),
        })
    }

    async fn next(&mut self) -> Result<Bytes, PeerError> {
        loop {
            if let Some(value) = self.buffered.pop_front() {
                return Ok(value);
            }
            let (records, _high_watermark) = self
                .partition
                .fetch_records(self.offset, FETCH_BYTES, FETCH_MAX_WAIT_MS)
                .await
                .map_err(|e| PeerError::Receive(e.to_string()))?;
            for record in records {
                // compacted or control batches can return earlier offsets
                if record.offset < self.offset {
                    continue;
                }
                self.offset = record.offset + 1;
                self.buffered
                    .push_back(Bytes::from(record.record.value.unwrap_or_default()));
            }
        }
    }
}

pub struct KafkaPeer {
    client: Client,
    send_loop: SendLoop,
    consumer: Option<Consumer>,
}

impl KafkaPeer {
    pub async fn connect(host: &str) -> Result<Self, PeerError> {
        Self::connect_addr(&normalize_host(host, DEFAULT_PORT)).await
    }

    /// Connect to an exact bootstrap `host:port`.
    pub async fn connect_addr(addr: &str) -> Result<Self, PeerError> {
        Self::connect_within(addr, CONNECT_TIMEOUT).await
    }

    async fn connect_within(addr: &str, timeout: Duration) -> Result<Self, PeerError> {
        let client = build_client(addr, timeout).await?;
        let partition = partition_client(&client, timeout).await?;
        tracing::debug!(addr, "kafka peer connected");

        Ok(Self {
            client,
            send_loop: SendLoop::new(Box::new(Producer { partition })),
            consumer: None,
        })
    }
}

#[async_trait]
impl Peer for KafkaPeer {
    async fn subscribe(&mut self) -> Result<(), PeerError> {
        if self.consumer.is_none() {
            self.consumer = Some(Consumer::open(&self.client).await?);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes, PeerError> {
        let consumer = self.consumer.as_mut().ok_or(PeerError::NotSubscribed)?;
        consumer.next().await
    }

    fn send_loop(&self) -> &SendLoop {
        &self.send_loop
    }

    fn send_loop_mut(&mut self) -> &mut SendLoop {
        &mut self.send_loop
    }

    async fn teardown(&mut self) {
        self.send_loop.teardown().await;
        self.consumer = None;
    }
}
