//! Telemetry store — spec §4.5.
//!
//! Two parallel sub-stores over the same backend: per-command event streams
//! (two sorted sets per command, plus a command-key registry set used by the
//! sweeper) and global per-second counters (plain integers with a TTL).
//! Writes are asynchronous from the caller's perspective — this module only
//! performs them; `queue::WorkQueue` supplies the backpressure and
//! fire-and-forget dispatch (§5, §9).

use crate::backend::BackendPool;
use crate::error::BackendError;
use crate::feature::{GlobalWindow, Window};
use crate::outcome::ExecStatus;
use crate::time::TimeSource;
use redis::Value;
use tracing::warn;

const KEY_LAST_EXEC_TIME: &str = "apistatus_last_exec_time";

fn key_exec_time(command_key: &str) -> String {
    format!("apistatus_exec_time_{command_key}")
}

fn key_exec_status(command_key: &str) -> String {
    format!("apistatus_exec_status_{command_key}")
}

fn key_global(metric: &str, second: i64) -> String {
    format!("apistatus_global_{metric}_count_{second}")
}

/// A recorded call, queued for an asynchronous write (§4.5 "Write").
#[derive(Debug, Clone)]
pub struct WriteJob {
    pub command_key: String,
    pub exec_time_ms: i64,
    pub exec_status: ExecStatus,
}

#[derive(Clone)]
pub struct TelemetryStore {
    backend: BackendPool,
    time: TimeSource,
    expired_seconds: u64,
}

impl TelemetryStore {
    pub fn new(backend: BackendPool, time: TimeSource, expired_seconds: u64) -> Self {
        Self {
            backend,
            time,
            expired_seconds,
        }
    }

    /// Perform the pipelined batch write for one event (§4.5 steps 1-6).
    /// Failures are logged and dropped — there is no retry and no caller
    /// notification (§7).
    pub async fn perform_write(&self, job: &WriteJob) {
        if let Err(e) = self.try_write(job).await {
            warn!(
                "[telemetry] write failed for command_key={}: {e}",
                job.command_key
            );
        }
    }

    async fn try_write(&self, job: &WriteJob) -> Result<(), BackendError> {
        let offset = self.time.now_us_offset();
        let second = self.time.now_seconds();
        let expire = self.expired_seconds as i64;

        let mut pipe = redis::pipe();
        pipe.cmd("ZADD")
            .arg(KEY_LAST_EXEC_TIME)
            .arg(offset)
            .arg(&job.command_key);
        pipe.cmd("ZADD")
            .arg(key_exec_time(&job.command_key))
            .arg(offset)
            .arg(format!("{offset}_{}", job.exec_time_ms));
        pipe.cmd("ZADD")
            .arg(key_exec_status(&job.command_key))
            .arg(offset)
            .arg(format!("{offset}_{}", job.exec_status.as_i64()));

        pipe.cmd("INCR").arg(key_global("exec", second));
        pipe.cmd("EXPIRE").arg(key_global("exec", second)).arg(expire);

        match job.exec_status {
            ExecStatus::BizFail => {
                pipe.cmd("INCR").arg(key_global("bizfail", second));
                pipe.cmd("EXPIRE").arg(key_global("bizfail", second)).arg(expire);
            }
            ExecStatus::SysFail => {
                pipe.cmd("INCR").arg(key_global("sysfail", second));
                pipe.cmd("EXPIRE").arg(key_global("sysfail", second)).arg(expire);
            }
            ExecStatus::Success => {}
        }

        let mut handle = self.backend.pipeline().await?;
        handle.exec_raw(pipe).await?;
        Ok(())
    }

    /// Read a per-command sliding window of width `duration_s` ending now
    /// (§4.5 "Read window"). Backend unavailability surfaces as an empty
    /// window so the evaluator fails open (§7).
    pub async fn read_window(&self, command_key: &str, duration_s: u64) -> Window {
        match self.try_read_window(command_key, duration_s).await {
            Ok(w) => w,
            Err(e) => {
                warn!("[telemetry] window read failed for {command_key}: {e}");
                Window::default()
            }
        }
    }

    async fn try_read_window(
        &self,
        command_key: &str,
        duration_s: u64,
    ) -> Result<Window, BackendError> {
        let end = self.time.now_us_offset();
        let start = end - (duration_s as i64) * 1_000_000;

        let mut pipe = redis::pipe();
        pipe.cmd("ZRANGEBYSCORE")
            .arg(key_exec_time(command_key))
            .arg(start)
            .arg(end);
        pipe.cmd("ZRANGEBYSCORE")
            .arg(key_exec_status(command_key))
            .arg(start)
            .arg(end);

        let mut handle = self.backend.pipeline().await?;
        let results = handle.exec_raw(pipe).await?;

        let time_members = results.first().map(value_to_strings).unwrap_or_default();
        let status_members = results.get(1).map(value_to_strings).unwrap_or_default();

        let mut sum_exec_time = 0i64;
        let mut time_count = 0i64;
        for member in &time_members {
            if let Some(v) = parse_member_value(member) {
                sum_exec_time += v;
                time_count += 1;
            }
        }
        let avg_exec_time_ms = if time_count > 0 {
            sum_exec_time / time_count
        } else {
            0
        };

        let mut biz_fail_count = 0i64;
        let mut sys_fail_count = 0i64;
        let mut total_exec_count = 0i64;
        for member in &status_members {
            if let Some(v) = parse_member_value(member) {
                total_exec_count += 1;
                if v == ExecStatus::BizFail.as_i64() {
                    biz_fail_count += 1;
                } else if v == ExecStatus::SysFail.as_i64() {
                    sys_fail_count += 1;
                }
            }
        }

        Ok(Window {
            avg_exec_time_ms,
            biz_fail_count,
            sys_fail_count,
            total_exec_count,
        })
    }

    /// Read the global sliding window of width `duration_s` ending at the
    /// current wall-clock second, inclusive of both ends (`duration_s + 1`
    /// buckets) (§4.5 "Read global window").
    pub async fn read_global_window(&self, duration_s: u64) -> GlobalWindow {
        match self.try_read_global_window(duration_s).await {
            Ok(w) => w,
            Err(e) => {
                warn!("[telemetry] global window read failed: {e}");
                GlobalWindow::default()
            }
        }
    }

    async fn try_read_global_window(&self, duration_s: u64) -> Result<GlobalWindow, BackendError> {
        let now_s = self.time.now_seconds();
        let start_s = now_s - duration_s as i64;

        let seconds: Vec<i64> = (start_s..=now_s).collect();
        let mut pipe = redis::pipe();
        for s in &seconds {
            pipe.cmd("GET").arg(key_global("exec", *s));
        }
        for s in &seconds {
            pipe.cmd("GET").arg(key_global("bizfail", *s));
        }
        for s in &seconds {
            pipe.cmd("GET").arg(key_global("sysfail", *s));
        }

        let mut handle = self.backend.pipeline().await?;
        let results = handle.exec_raw(pipe).await?;
        let n = seconds.len();

        let exec_count: i64 = results[0..n].iter().map(value_to_i64).sum();
        let biz_fail_count: i64 = results[n..2 * n].iter().map(value_to_i64).sum();
        let sys_fail_count: i64 = results[2 * n..3 * n].iter().map(value_to_i64).sum();

        Ok(GlobalWindow {
            exec_count,
            biz_fail_count,
            sys_fail_count,
        })
    }

    /// Delete events older than `expired_seconds` (§4.5 "Sweep"). Returns a
    /// human-readable log line for the admin endpoint (§6).
    pub async fn sweep(&self) -> String {
        let start = self.time.now_seconds();
        let now_offset = self.time.now_us_offset();
        let expired_offset = now_offset - (self.expired_seconds as i64) * 1_000_000;

        let command_keys = match self.backend.zrange_all(KEY_LAST_EXEC_TIME).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("[telemetry] sweep: failed to list command keys: {e}");
                Vec::new()
            }
        };

        if let Err(e) = self
            .backend
            .zremrangebyscore(KEY_LAST_EXEC_TIME, 0, expired_offset)
            .await
        {
            warn!("[telemetry] sweep: failed to trim command-key registry: {e}");
        }

        let mut success = 0usize;
        let mut failure = 0usize;
        for batch in command_keys.chunks(25) {
            match self.sweep_batch(batch, expired_offset).await {
                Ok(()) => success += batch.len(),
                Err(e) => {
                    warn!("[telemetry] sweep: batch of {} failed: {e}", batch.len());
                    failure += batch.len();
                }
            }
        }

        let end = self.time.now_seconds();
        format!(
            "sweep start={start} total_commands={} success={success} failure={failure} end={end}",
            command_keys.len(),
        )
    }

    async fn sweep_batch(&self, batch: &[String], expired_offset: i64) -> Result<(), BackendError> {
        let mut pipe = redis::pipe();
        for command_key in batch {
            pipe.cmd("ZREMRANGEBYSCORE")
                .arg(key_exec_time(command_key))
                .arg(0)
                .arg(expired_offset);
            pipe.cmd("ZREMRANGEBYSCORE")
                .arg(key_exec_status(command_key))
                .arg(0)
                .arg(expired_offset);
        }
        let mut handle = self.backend.pipeline().await?;
        handle.exec_raw(pipe).await?;
        Ok(())
    }
}

fn value_to_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::BulkString(b) => String::from_utf8(b.clone()).ok(),
                Value::SimpleString(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn value_to_i64(value: &Value) -> i64 {
    match value {
        Value::Int(i) => *i,
        Value::BulkString(b) => std::str::from_utf8(b)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        Value::SimpleString(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Split at the first `_`; the suffix is the integer value. If there is no
/// `_`, the whole string is the value. Unparsable members are silently
/// skipped (§4.5).
fn parse_member_value(member: &str) -> Option<i64> {
    match member.split_once('_') {
        Some((_prefix, suffix)) => suffix.parse().ok(),
        None => member.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_member_value_splits_at_first_underscore() {
        assert_eq!(parse_member_value("12345_600"), Some(600));
        assert_eq!(parse_member_value("12345_2"), Some(2));
    }

    #[test]
    fn parse_member_value_handles_bare_integer() {
        assert_eq!(parse_member_value("42"), Some(42));
    }

    #[test]
    fn parse_member_value_skips_unparsable() {
        assert_eq!(parse_member_value("not_a_number"), None);
        assert_eq!(parse_member_value(""), None);
    }

    #[test]
    fn value_to_strings_extracts_bulk_strings() {
        let v = Value::Array(vec![
            Value::BulkString(b"1_600".to_vec()),
            Value::BulkString(b"2_700".to_vec()),
        ]);
        assert_eq!(value_to_strings(&v), vec!["1_600", "2_700"]);
    }

    #[test]
    fn value_to_i64_defaults_missing_to_zero() {
        assert_eq!(value_to_i64(&Value::Nil), 0);
    }
}
