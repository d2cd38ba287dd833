//! Rule evaluator — spec §4.6.
//!
//! Computes metric values over memoized windows and applies probability
//! gating to alarm/fuse rules. The same algorithm drives both the circuit
//! breaker (`MetricSource` over command/global telemetry windows) and the
//! device rate limiter (`MetricSource` over hit counts) — "the same
//! fingerprint-and-rule machinery powers both" (§1).

use crate::feature::{Feature, GlobalWindow, Scope, Window};
use crate::rules::Rule;
use crate::telemetry::TelemetryStore;
use rand::Rng;
use std::collections::HashMap;

/// Supplies the actual value for a feature, memoizing per distinct
/// `(scope, duration)` so a fused request and an alarmed request observe the
/// same metric snapshot within one evaluation (§5 "Ordering").
pub trait MetricSource {
    fn value(&mut self, feature: Feature, duration: u64) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Fuse { rule: Rule, actual_value: f64 },
}

/// One alarm that triggered during evaluation, ready for the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmTrigger {
    pub rule: Rule,
    pub actual_value: f64,
}

/// Evaluate alarm rules: every rule is checked independently (no short
/// circuit), triggers gated by probability (§4.6 step 2-3).
pub fn evaluate_alarms(
    rules: &[Rule],
    source: &mut dyn MetricSource,
    rng: &mut impl Rng,
) -> Vec<AlarmTrigger> {
    let mut triggers = Vec::new();
    for rule in rules {
        let actual_value = source.value(rule.feature, rule.duration);
        if actual_value >= rule.threshold && probability_gate(rule.probability, rng) {
            triggers.push(AlarmTrigger {
                rule: *rule,
                actual_value,
            });
        }
    }
    triggers
}

/// Evaluate fuse rules: the first rule whose threshold is crossed and whose
/// probability gate fires short-circuits the rest (§4.6 step 4).
pub fn evaluate_fuse(rules: &[Rule], source: &mut dyn MetricSource, rng: &mut impl Rng) -> Verdict {
    for rule in rules {
        let actual_value = source.value(rule.feature, rule.duration);
        if actual_value >= rule.threshold && probability_gate(rule.probability, rng) {
            return Verdict::Fuse {
                rule: *rule,
                actual_value,
            };
        }
    }
    Verdict::Pass
}

/// Pre-fetched windows for a single evaluation, indexed by `(scope,
/// duration)` (§4.6 "Inputs"). Fetched once, up front, so a fused and an
/// alarmed rule list see the same snapshot (§5 "Ordering").
#[derive(Default)]
pub struct MetricCache {
    command_windows: HashMap<u64, Window>,
    global_windows: HashMap<u64, GlobalWindow>,
}

impl MetricCache {
    /// Fetch one window per distinct duration referenced by `rules`, scoped
    /// by whether the feature is `global_`-prefixed. Each window read is
    /// itself one pipelined backend round-trip (§4.5), so this issues at
    /// most one round-trip per distinct `(scope, duration)` pair (§5).
    pub async fn fetch(telemetry: &TelemetryStore, command_key: &str, rules: &[Rule]) -> Self {
        let mut command_durations = Vec::new();
        let mut global_durations = Vec::new();
        for rule in rules {
            match rule.feature.scope() {
                Scope::Command => {
                    if !command_durations.contains(&rule.duration) {
                        command_durations.push(rule.duration);
                    }
                }
                Scope::Global => {
                    if !global_durations.contains(&rule.duration) {
                        global_durations.push(rule.duration);
                    }
                }
            }
        }

        let mut command_windows = HashMap::new();
        for duration in command_durations {
            let window = telemetry.read_window(command_key, duration).await;
            command_windows.insert(duration, window);
        }

        let mut global_windows = HashMap::new();
        for duration in global_durations {
            let window = telemetry.read_global_window(duration).await;
            global_windows.insert(duration, window);
        }

        Self {
            command_windows,
            global_windows,
        }
    }
}

impl MetricSource for MetricCache {
    fn value(&mut self, feature: Feature, duration: u64) -> f64 {
        match feature.scope() {
            Scope::Command => self
                .command_windows
                .get(&duration)
                .map(|w| w.value(feature))
                .unwrap_or(0.0),
            Scope::Global => self
                .global_windows
                .get(&duration)
                .map(|w| w.value(feature))
                .unwrap_or(0.0),
        }
    }
}

/// Bernoulli gate applied after a threshold is crossed (§4.6, GLOSSARY
/// "Probability gating"). `probability` is a percentage in `[0, 100]`.
fn probability_gate(probability: f64, rng: &mut impl Rng) -> bool {
    if probability >= 100.0 {
        true
    } else if probability <= 0.0 {
        false
    } else {
        let r: f64 = rng.gen_range(0.0..1.0);
        r <= probability / 100.0
    }
}
