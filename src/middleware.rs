//! Proxy middleware — spec §4.8.
//!
//! Owns request-scoped state and the two hooks a reverse proxy calls: once
//! before the upstream call (classify, gate) and once after the response
//! headers arrive (record). The proxy itself — routing, TLS, upstream
//! health — is an external collaborator (§1 Non-goals); this module only
//! describes the view of a request/response it needs.

use crate::alarm::{AlarmDispatcher, AlarmJob, AlarmPayload};
use crate::classifier;
use crate::device_limiter::DeviceLimiter;
use crate::evaluator::{self, MetricCache, Verdict};
use crate::outcome;
use crate::queue::WorkQueue;
use crate::rules::{self, Resolution, Rule, RuleRegistry};
use crate::telemetry::{TelemetryStore, WriteJob};
use rand::rngs::ThreadRng;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Minimal view of an incoming request a caller needs to provide.
pub struct ProxyRequest {
    pub path: String,
    /// Lower-cased header names, matching the case-insensitivity any real
    /// HTTP header map gives you.
    pub headers: HashMap<String, String>,
    pub client_ip: String,
}

/// Minimal view of the upstream response.
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

/// Outcome of the pre-upstream gate (§6 "Exit status codes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    RateLimited,
    CircuitOpen,
}

impl GateDecision {
    pub fn status_code(self) -> u16 {
        match self {
            Self::RateLimited => 429,
            Self::CircuitOpen => 503,
        }
    }

    /// `Retry-After` seconds to attach for a circuit-open response; `None`
    /// for rate-limiting, which carries no such header in the spec.
    pub fn retry_after_secs(self) -> Option<u64> {
        match self {
            Self::CircuitOpen => Some(5),
            Self::RateLimited => None,
        }
    }
}

/// Request-scoped state threaded explicitly through the two hooks, in place
/// of the source's global mutable per-request table (§9).
pub struct RequestContext {
    /// Correlates the pre- and post-upstream log lines for one request.
    pub request_id: uuid::Uuid,
    start: Instant,
    command: Option<String>,
    command_key: Option<String>,
    /// Set when the classifier yields "no command" — the request bypasses
    /// rule evaluation and telemetry recording entirely (§3).
    ignorable: bool,
}

/// Immutable, constructed-once engine wiring (§9 "replace global mutable
/// registry... with a single immutable struct constructed at startup and
/// passed explicitly through request-scope context").
#[derive(Clone)]
pub struct FuseGate {
    rules: std::sync::Arc<RuleRegistry>,
    telemetry: TelemetryStore,
    write_queue: WorkQueue<WriteJob>,
    alarm_queue: WorkQueue<AlarmJob>,
    device_limiter: Option<DeviceLimiter>,
}

impl FuseGate {
    pub fn new(
        rules: std::sync::Arc<RuleRegistry>,
        telemetry: TelemetryStore,
        write_queue: WorkQueue<WriteJob>,
        alarm_queue: WorkQueue<AlarmJob>,
        device_limiter: Option<DeviceLimiter>,
    ) -> Self {
        Self {
            rules,
            telemetry,
            write_queue,
            alarm_queue,
            device_limiter,
        }
    }

    /// Pre-upstream gate: classify, then (if configured) the device rate
    /// limiter, then the circuit breaker. Returns the request context to
    /// carry into `after_upstream`, plus a gate decision if the request
    /// should be short-circuited without calling upstream.
    pub async fn before_upstream(
        &self,
        req: &ProxyRequest,
        rng: &mut ThreadRng,
    ) -> (RequestContext, Option<GateDecision>) {
        let start = Instant::now();
        let request_id = uuid::Uuid::new_v4();
        let Some(command) = classifier::classify(&req.path) else {
            return (
                RequestContext {
                    request_id,
                    start,
                    command: None,
                    command_key: None,
                    ignorable: true,
                },
                None,
            );
        };
        let command_key = classifier::command_key(&command);

        if let Some(limiter) = &self.device_limiter {
            if let Some(decision) = self
                .check_rate_limit(limiter, req, &command, &command_key, rng)
                .await
            {
                let ctx = RequestContext {
                    request_id,
                    start,
                    command: Some(command),
                    command_key: Some(command_key),
                    ignorable: false,
                };
                return (ctx, Some(decision));
            }
        }

        let fuse_rules = self.resolve("fuse_rules", "x-fuse-rules", req, &command);
        let alarm_rules = self.resolve("alarm_rules", "x-alarm-rules", req, &command);

        let fuse_rules = match fuse_rules {
            Resolution::Ignored | Resolution::None => Vec::new(),
            Resolution::Rules(rules) => rules,
        };
        let alarm_rules = match alarm_rules {
            Resolution::Ignored | Resolution::None => Vec::new(),
            Resolution::Rules(rules) => rules,
        };

        if !fuse_rules.is_empty() || !alarm_rules.is_empty() {
            let combined: Vec<Rule> = fuse_rules
                .iter()
                .chain(alarm_rules.iter())
                .copied()
                .collect();
            let mut cache = MetricCache::fetch(&self.telemetry, &command_key, &combined).await;

            if !alarm_rules.is_empty() {
                let triggers = evaluator::evaluate_alarms(&alarm_rules, &mut cache, rng);
                for trigger in triggers {
                    let payload = AlarmPayload {
                        feature: trigger.rule.feature.as_str().to_string(),
                        duration: trigger.rule.duration,
                        threshold: trigger.rule.threshold,
                        probability: trigger.rule.probability,
                        command: command.clone(),
                        actual_value: trigger.actual_value,
                        client_ip: req.client_ip.clone(),
                        trigger_time: chrono::Utc::now().to_rfc3339(),
                    };
                    self.alarm_queue.push(AlarmJob { payload }).await;
                }
            }

            if !fuse_rules.is_empty() {
                if let Verdict::Fuse { rule, actual_value } =
                    evaluator::evaluate_fuse(&fuse_rules, &mut cache, rng)
                {
                    debug!(
                        "[fuse_gate] request_id={request_id} circuit open command={command} feature={:?} actual={actual_value} threshold={}",
                        rule.feature, rule.threshold
                    );
                    let ctx = RequestContext {
                        request_id,
                        start,
                        command: Some(command),
                        command_key: Some(command_key),
                        ignorable: false,
                    };
                    return (ctx, Some(GateDecision::CircuitOpen));
                }
            }
        }

        (
            RequestContext {
                request_id,
                start,
                command: Some(command),
                command_key: Some(command_key),
                ignorable: false,
            },
            None,
        )
    }

    async fn check_rate_limit(
        &self,
        limiter: &DeviceLimiter,
        req: &ProxyRequest,
        command: &str,
        command_key: &str,
        rng: &mut ThreadRng,
    ) -> Option<GateDecision> {
        let resolution = self.resolve("rate_rules", "x-rate-rules", req, command);
        let rate_rules = match resolution {
            // No rate rules configured for this command, either an explicit
            // empty override or no rate-rule set at all: nothing to rate
            // limit against, so the request passes.
            Resolution::Ignored | Resolution::None => return None,
            Resolution::Rules(rules) => rules,
        };

        let Some(device_no) = req.headers.get("x-device-no") else {
            return Some(GateDecision::RateLimited);
        };

        limiter.record_hit(device_no, command_key).await;

        if rate_rules.is_empty() {
            return None;
        }

        match limiter.check(device_no, command_key, &rate_rules, rng).await {
            Verdict::Fuse { .. } => Some(GateDecision::RateLimited),
            Verdict::Pass => None,
        }
    }

    /// Resolve a named rule set, honoring a per-request header override
    /// when present and well-formed (§4.3). A malformed header falls back
    /// to the registry-resolved list (§9 open-question resolution).
    fn resolve(
        &self,
        rule_set_name: &str,
        header_name: &str,
        req: &ProxyRequest,
        command: &str,
    ) -> Resolution {
        if let Some(header) = req.headers.get(header_name) {
            if !header.trim().is_empty() {
                match rules::parse_header_rules(header) {
                    Ok(rules) => return Resolution::Rules(rules),
                    Err(e) => {
                        debug!(
                            "[fuse_gate] malformed {header_name} header ({e}) — falling back to registry"
                        );
                    }
                }
            }
        }
        self.rules.resolve(rule_set_name, command)
    }

    /// Post-upstream recorder: classify the exec status and enqueue a
    /// telemetry write (§4.8). No-op for requests the classifier bypassed.
    pub async fn after_upstream(&self, ctx: &RequestContext, resp: &UpstreamResponse) {
        if ctx.ignorable {
            return;
        }
        let Some(command_key) = &ctx.command_key else {
            return;
        };

        let exec_time_ms = ctx.start.elapsed().as_millis() as i64;
        let exec_status = outcome::classify(resp.status, resp.headers.get("x-response-code").map(String::as_str));
        debug!(
            "[fuse_gate] request_id={} command_key={command_key} exec_time_ms={exec_time_ms} exec_status={:?}",
            ctx.request_id, exec_status
        );

        self.write_queue
            .push(WriteJob {
                command_key: command_key.clone(),
                exec_time_ms,
                exec_status,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_decision_status_codes() {
        assert_eq!(GateDecision::RateLimited.status_code(), 429);
        assert_eq!(GateDecision::CircuitOpen.status_code(), 503);
        assert_eq!(GateDecision::CircuitOpen.retry_after_secs(), Some(5));
        assert_eq!(GateDecision::RateLimited.retry_after_secs(), None);
    }
}
