//! Alarm dispatcher — spec §4.7.
//!
//! Best-effort outbound POST of alarm payloads over a shared `reqwest::Client`
//! with a hard request timeout. Delivery failures are logged and dropped —
//! no retry, no propagation into the request path.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct AlarmPayload {
    pub feature: String,
    pub duration: u64,
    pub threshold: f64,
    pub probability: f64,
    pub command: String,
    pub actual_value: f64,
    pub client_ip: String,
    pub trigger_time: String,
}

/// One alarm queued for delivery (§4.7, §9 "bounded work queue... alarm
/// overflow drops the alarm").
#[derive(Debug, Clone)]
pub struct AlarmJob {
    pub payload: AlarmPayload,
}

#[derive(Clone)]
pub struct AlarmDispatcher {
    http: reqwest::Client,
    url: Option<String>,
}

impl AlarmDispatcher {
    /// `url` is the configured alarm endpoint; when `None` the dispatcher
    /// is a no-op (alarms are dropped silently, same as a delivery failure).
    pub fn new(url: Option<String>, timeout_ms: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, url }
    }

    /// Best-effort POST, `Content-Type: application/x-www-form-urlencoded`,
    /// body `msg=<json-payload>` (§4.7). Failures are logged and dropped.
    pub async fn dispatch(&self, job: AlarmJob) {
        let Some(url) = &self.url else {
            debug!("[alarm] no alarm_url configured — dropping alarm for {}", job.payload.command);
            return;
        };

        let body = match serde_json::to_string(&job.payload) {
            Ok(json) => format!("msg={}", urlencode(&json)),
            Err(e) => {
                warn!("[alarm] failed to encode payload: {e}");
                return;
            }
        };

        match self
            .http
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    "[alarm] delivered command={} feature={} (HTTP {})",
                    job.payload.command,
                    job.payload.feature,
                    resp.status()
                );
            }
            Ok(resp) => {
                warn!(
                    "[alarm] delivery rejected command={} HTTP {}",
                    job.payload.command,
                    resp.status()
                );
            }
            Err(e) => {
                warn!("[alarm] delivery failed command={}: {e}", job.payload.command);
            }
        }
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
