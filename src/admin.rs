//! Admin endpoint — spec §6 ("localhost-only endpoint that triggers a sweep
//! and returns the log as text. Intended to be driven by an external
//! scheduler") and §2.1.
//!
//! A minimal async HTTP/1.1 server built directly on `tokio::net::TcpListener`,
//! with no web framework in the way. Binds `127.0.0.1` unconditionally; only
//! the port is configurable (§9.1).

use crate::queue::WorkQueue;
use crate::telemetry::TelemetryStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Handle on the two drop counters the admin `/healthz` endpoint reports
/// (§6: "a small JSON object (`dropped_writes`, `dropped_alarms`,
/// `uptime_secs`)").
#[derive(Clone)]
pub struct AdminState<W, A> {
    telemetry: Arc<TelemetryStore>,
    write_queue: WorkQueue<W>,
    alarm_queue: WorkQueue<A>,
    started_at: Instant,
}

impl<W, A> AdminState<W, A>
where
    W: Send + 'static,
    A: Send + 'static,
{
    pub fn new(
        telemetry: Arc<TelemetryStore>,
        write_queue: WorkQueue<W>,
        alarm_queue: WorkQueue<A>,
    ) -> Self {
        Self {
            telemetry,
            write_queue,
            alarm_queue,
            started_at: Instant::now(),
        }
    }

    fn healthz_json(&self) -> String {
        format!(
            r#"{{"dropped_writes":{dw},"dropped_alarms":{da},"uptime_secs":{up}}}"#,
            dw = self.write_queue.dropped_count(),
            da = self.alarm_queue.dropped_count(),
            up = self.started_at.elapsed().as_secs(),
        )
    }
}

pub async fn run<W, A>(state: AdminState<W, A>, port: u16) -> std::io::Result<()>
where
    W: Send + 'static,
    A: Send + 'static,
{
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("[admin] listening on http://{addr}");
    let state = Arc::new(state);

    loop {
        match listener.accept().await {
            Ok((mut socket, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 512];
                    let n = match socket.read(&mut buf).await {
                        Ok(n) if n > 0 => n,
                        _ => return,
                    };

                    let request = std::str::from_utf8(&buf[..n]).unwrap_or("");
                    let path = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/healthz");

                    let (status, content_type, body) = match path {
                        "/sweep" => (
                            "200 OK",
                            "text/plain; charset=utf-8",
                            state.telemetry.sweep().await,
                        ),
                        "/healthz" => ("200 OK", "application/json", state.healthz_json()),
                        _ => ("404 Not Found", "text/plain; charset=utf-8", "not found".to_string()),
                    };

                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n{body}",
                        len = body.len(),
                    );

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("[admin] write error for {peer}: {e}");
                    }
                });
            }
            Err(e) => {
                warn!("[admin] accept error: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
