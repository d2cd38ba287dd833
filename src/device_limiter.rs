//! Device-number rate limiter — spec §4.6 ("For the device rate limiter").
//!
//! Reuses the sliding-window and rule-evaluator machinery under a different
//! key namespace: `(device_no, command)` instead of `command_key`. Two
//! features are unique to this evaluator: `single_command_hits` (hits for
//! this exact device+command pair) and `total_command_hits` (hits for this
//! device across all non-ignored commands).

use crate::backend::BackendPool;
use crate::error::BackendError;
use crate::evaluator::{self, MetricSource, Verdict};
use crate::feature::Feature;
use crate::rules::Rule;
use crate::time::TimeSource;
use rand::Rng;
use std::collections::HashMap;
use tracing::warn;

const KEY_LAST_HIT: &str = "ratelimit_last_hit";

fn key_single(device_no: &str, command_key: &str) -> String {
    format!("ratelimit_hits_{device_no}_{command_key}")
}

fn key_total(device_no: &str) -> String {
    format!("ratelimit_hits_{device_no}_total")
}

/// Registry member identifying one `(device_no, command_key)` pair, so the
/// sweeper can reconstruct both `key_single` and `key_total` for it without
/// a separate registry set per key (spec §6: "a `ratelimit_last_hit`
/// registry set swept the same way" as `apistatus_last_exec_time`).
fn registry_member(device_no: &str, command_key: &str) -> String {
    format!("{device_no}|{command_key}")
}

#[derive(Clone)]
pub struct DeviceLimiter {
    backend: BackendPool,
    time: TimeSource,
}

impl DeviceLimiter {
    pub fn new(backend: BackendPool, time: TimeSource) -> Self {
        Self { backend, time }
    }

    /// Record one request from `device_no` against `command_key`. Mirrors
    /// `telemetry::TelemetryStore::perform_write`'s shape: two sorted-set
    /// writes for the hit itself, plus a registry entry in
    /// `ratelimit_last_hit` the sweeper uses to find keys to trim (§6).
    pub async fn record_hit(&self, device_no: &str, command_key: &str) {
        if let Err(e) = self.try_record_hit(device_no, command_key).await {
            warn!("[device_limiter] failed to record hit for device={device_no}: {e}");
        }
    }

    async fn try_record_hit(&self, device_no: &str, command_key: &str) -> Result<(), BackendError> {
        let offset = self.time.now_us_offset();
        let member = format!("{offset}_{command_key}");

        let mut pipe = redis::pipe();
        pipe.cmd("ZADD")
            .arg(KEY_LAST_HIT)
            .arg(offset)
            .arg(registry_member(device_no, command_key));
        pipe.cmd("ZADD")
            .arg(key_single(device_no, command_key))
            .arg(offset)
            .arg(&member);
        pipe.cmd("ZADD")
            .arg(key_total(device_no))
            .arg(offset)
            .arg(&member);

        let mut handle = self.backend.pipeline().await?;
        handle.exec_raw(pipe).await?;
        Ok(())
    }

    /// Delete hits older than `expired_seconds`, mirroring
    /// `TelemetryStore::sweep` over the `ratelimit_*` namespace (§6). Returns
    /// a human-readable log line in the same shape the admin `/sweep`
    /// endpoint already returns for telemetry.
    pub async fn sweep(&self, expired_seconds: u64) -> String {
        let start = self.time.now_seconds();
        let now_offset = self.time.now_us_offset();
        let expired_offset = now_offset - (expired_seconds as i64) * 1_000_000;

        let members = match self.backend.zrange_all(KEY_LAST_HIT).await {
            Ok(members) => members,
            Err(e) => {
                warn!("[device_limiter] sweep: failed to list registry members: {e}");
                Vec::new()
            }
        };

        if let Err(e) = self.backend.zremrangebyscore(KEY_LAST_HIT, 0, expired_offset).await {
            warn!("[device_limiter] sweep: failed to trim registry: {e}");
        }

        let mut success = 0usize;
        let mut failure = 0usize;
        for batch in members.chunks(25) {
            match self.sweep_batch(batch, expired_offset).await {
                Ok(()) => success += batch.len(),
                Err(e) => {
                    warn!("[device_limiter] sweep: batch of {} failed: {e}", batch.len());
                    failure += batch.len();
                }
            }
        }

        let end = self.time.now_seconds();
        format!(
            "ratelimit sweep start={start} total_keys={} success={success} failure={failure} end={end}",
            members.len(),
        )
    }

    async fn sweep_batch(&self, batch: &[String], expired_offset: i64) -> Result<(), BackendError> {
        let mut pipe = redis::pipe();
        for member in batch {
            let Some((device_no, command_key)) = member.split_once('|') else {
                continue;
            };
            pipe.cmd("ZREMRANGEBYSCORE")
                .arg(key_single(device_no, command_key))
                .arg(0)
                .arg(expired_offset);
            pipe.cmd("ZREMRANGEBYSCORE")
                .arg(key_total(device_no))
                .arg(0)
                .arg(expired_offset);
        }
        let mut handle = self.backend.pipeline().await?;
        handle.exec_raw(pipe).await?;
        Ok(())
    }

    async fn count_window(&self, key: &str, duration_s: u64) -> i64 {
        let end = self.time.now_us_offset();
        let start = end - (duration_s as i64) * 1_000_000;
        match self.backend.zrangebyscore(key, start, end).await {
            Ok(members) => members.len() as i64,
            Err(e) => {
                warn!("[device_limiter] window count failed for {key}: {e}");
                0
            }
        }
    }

    /// Evaluate `rate_rules` for `(device_no, command_key)` and decide
    /// whether to fuse (reject with 429) the request.
    pub async fn check(
        &self,
        device_no: &str,
        command_key: &str,
        rules: &[Rule],
        rng: &mut impl Rng,
    ) -> Verdict {
        let mut source = DeviceMetricSource::fetch(self, device_no, command_key, rules).await;
        evaluator::evaluate_fuse(rules, &mut source, rng)
    }
}

struct DeviceMetricSource {
    single: HashMap<u64, i64>,
    total: HashMap<u64, i64>,
}

impl DeviceMetricSource {
    async fn fetch(
        limiter: &DeviceLimiter,
        device_no: &str,
        command_key: &str,
        rules: &[Rule],
    ) -> Self {
        let mut single_durations = Vec::new();
        let mut total_durations = Vec::new();
        for rule in rules {
            match rule.feature {
                Feature::SingleCommandHits if !single_durations.contains(&rule.duration) => {
                    single_durations.push(rule.duration)
                }
                Feature::TotalCommandHits if !total_durations.contains(&rule.duration) => {
                    total_durations.push(rule.duration)
                }
                _ => {}
            }
        }

        let mut single = HashMap::new();
        for duration in single_durations {
            let count = limiter
                .count_window(&key_single(device_no, command_key), duration)
                .await;
            single.insert(duration, count);
        }

        let mut total = HashMap::new();
        for duration in total_durations {
            let count = limiter.count_window(&key_total(device_no), duration).await;
            total.insert(duration, count);
        }

        Self { single, total }
    }
}

impl MetricSource for DeviceMetricSource {
    fn value(&mut self, feature: Feature, duration: u64) -> f64 {
        match feature {
            Feature::SingleCommandHits => self.single.get(&duration).copied().unwrap_or(0) as f64,
            Feature::TotalCommandHits => self.total.get(&duration).copied().unwrap_or(0) as f64,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_namespaces_are_distinct_per_device_and_command() {
        assert_ne!(key_single("d1", "api/orders"), key_single("d2", "api/orders"));
        assert_ne!(key_single("d1", "api/orders"), key_total("d1"));
    }

    #[test]
    fn registry_member_round_trips_through_split() {
        let member = registry_member("d1", "api/orders");
        let (device_no, command_key) = member.split_once('|').unwrap();
        assert_eq!(device_no, "d1");
        assert_eq!(command_key, "api/orders");
    }
}
