use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::results::PERCENTILES;
use crate::worker::{Phase, SharedState};

/// Admin server that exposes Prometheus metrics while a run is in progress.
pub struct AdminServer {
    listen_addr: SocketAddr,
    shared: Arc<SharedState>,
    stop_notify: Arc<Notify>,
}

impl AdminServer {
    pub fn new(listen_addr: SocketAddr, shared: Arc<SharedState>) -> Self {
        Self {
            listen_addr,
            shared,
            stop_notify: Arc::new(Notify::new()),
        }
    }

    /// Run the admin server on its own thread and return immediately.
    pub fn run(self) -> AdminHandle {
        let stop_notify = Arc::clone(&self.stop_notify);

        let handle = std::thread::Builder::new()
            .name("admin".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to create admin runtime");

                rt.block_on(async move {
                    if let Err(e) =
                        run_prometheus_server(self.listen_addr, self.shared, self.stop_notify).await
                    {
                        tracing::error!("prometheus server error: {}", e);
                    }
                });
            })
            .expect("failed to spawn admin thread");

        AdminHandle {
            handle: Some(handle),
            stop_notify,
        }
    }
}

pub struct AdminHandle {
    handle: Option<std::thread::JoinHandle<()>>,
    stop_notify: Arc<Notify>,
}

impl AdminHandle {
    pub fn shutdown(&mut self) {
        // notify_one stores a permit, so a server that has not reached its
        // select yet still sees it
        self.stop_notify.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AdminHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_prometheus_server(
    addr: SocketAddr,
    shared: Arc<SharedState>,
    stop_notify: Arc<Notify>,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("prometheus server listening on {}", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((mut socket, _peer)) => {
                        let phase = shared.phase();
                        tokio::spawn(async move {
                            let mut buf = [0u8; 1024];
                            let n = socket.read(&mut buf).await.unwrap_or(0);
                            let request = String::from_utf8_lossy(&buf[..n]);
                            let response = respond(&request, phase);
                            let _ = socket.write_all(response.as_bytes()).await;
                        });
                    }
                    Err(e) => {
                        tracing::debug!("accept error: {}", e);
                    }
                }
            }
            _ = stop_notify.notified() => {
                break;
            }
            _ = shared.stopped() => {
                break;
            }
        }
    }

    Ok(())
}

/// Build the full HTTP response for a raw request.
fn respond(request: &str, phase: Phase) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let (status, body) = match path {
        "/" | "/metrics" => ("200 OK", generate_prometheus_output(phase)),
        _ => ("404 Not Found", "not found\n".to_string()),
    };

    format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: text/plain; version=0.0.4\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        body.len(),
        body
    )
}

fn phase_value(phase: Phase) -> u8 {
    match phase {
        Phase::Connect => 0,
        Phase::Subscribe => 1,
        Phase::Publish => 2,
        Phase::Drain => 3,
        Phase::Stop => 4,
    }
}

fn generate_prometheus_output(phase: Phase) -> String {
    let mut output = String::new();

    output.push_str("# TYPE run_phase gauge\n");
    output.push_str(&format!("run_phase {}\n", phase_value(phase)));

    for metric in metriken::metrics().iter() {
        let name = metric.name();
        let value = match metric.value() {
            Some(v) => v,
            None => continue,
        };

        match value {
            metriken::Value::Counter(v) => {
                output.push_str(&format!("# TYPE {} counter\n", name));
                output.push_str(&format!("{} {}\n", name, v));
            }
            metriken::Value::Gauge(v) => {
                output.push_str(&format!("# TYPE {} gauge\n", name));
                output.push_str(&format!("{} {}\n", name, v));
            }
            metriken::Value::Other(any) => {
                if let Some(histogram) = any.downcast_ref::<metriken::AtomicHistogram>() {
                    push_summary(name, histogram, &mut output);
                }
            }
            _ => {}
        }
    }

    output
}

fn push_summary(name: &str, histogram: &metriken::AtomicHistogram, output: &mut String) {
    let Some(snapshot) = histogram.load() else {
        return;
    };
    output.push_str(&format!("# TYPE {} summary\n", name));

    if let Ok(Some(results)) = snapshot.percentiles(&PERCENTILES) {
        for (pct, bucket) in results {
            output.push_str(&format!(
                "{}{{quantile=\"{}\"}} {}\n",
                name,
                pct / 100.0,
                bucket.end()
            ));
        }
    }

    // sum is approximated from bucket midpoints
    let mut count = 0u64;
    let mut sum = 0u64;
    for bucket in snapshot.into_iter() {
        let bucket_count = bucket.count();
        count += bucket_count;
        // halved separately, the top bucket ends at u64::MAX
        let midpoint = bucket.start() / 2 + bucket.end() / 2;
        sum = sum.saturating_add(bucket_count.saturating_mul(midpoint));
    }
    output.push_str(&format!("{}_count {}\n", name, count));
    output.push_str(&format!("{}_sum {}\n", name, sum));
}
