//! Integration tests driving the rule engine across module boundaries with
//! static fixtures — no live backend required.

use fuse_gate::classifier;
use fuse_gate::evaluator::{self, MetricSource, Verdict};
use fuse_gate::feature::Feature;
use fuse_gate::rules::{self, Resolution, RuleRegistry};
use rand::rngs::mock::StepRng;

fn fixtures_dir() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/rules")
}

/// A `MetricSource` that returns a fixed value regardless of feature or
/// duration — stands in for a `MetricCache` backed by a live telemetry read.
struct FixedSource(f64);
impl MetricSource for FixedSource {
    fn value(&mut self, _feature: Feature, _duration: u64) -> f64 {
        self.0
    }
}

#[test]
fn rule_registry_resolution_matches_spec_precedence() {
    let registry = RuleRegistry::load(fixtures_dir()).expect("fixture rule dir should load");

    // commands["health"] is an explicit empty list -> Ignored, regardless of global.
    assert_eq!(registry.resolve("fuse_rules", "health"), Resolution::Ignored);

    // commands["api/orders"] is present and non-empty -> that list, not global.
    match registry.resolve("fuse_rules", "api/orders") {
        Resolution::Rules(rules) => {
            assert_eq!(rules.len(), 1);
            assert_eq!(rules[0].feature, Feature::FailCount);
        }
        other => panic!("expected Rules, got {other:?}"),
    }

    // Any other command falls back to global.
    match registry.resolve("fuse_rules", "api/catalog") {
        Resolution::Rules(rules) => {
            assert_eq!(rules[0].feature, Feature::AvgExecTime);
        }
        other => panic!("expected Rules, got {other:?}"),
    }

    // An unknown rule set name resolves to None.
    assert_eq!(registry.resolve("no_such_rules", "api/orders"), Resolution::None);
}

#[test]
fn classifier_then_registry_end_to_end_for_a_versioned_path() {
    let registry = RuleRegistry::load(fixtures_dir()).expect("fixture rule dir should load");
    let command = classifier::classify("/api/orders/4711/items").expect("should classify");
    assert_eq!(command, "api/orders/items");

    // Falls through to global since "api/orders/items" isn't a registered override.
    assert!(matches!(
        registry.resolve("fuse_rules", &command),
        Resolution::Rules(_)
    ));
}

/// Scenario 1 (spec §8): fuse on avg latency at probability 100.
#[test]
fn scenario_fuse_on_avg_latency_at_full_probability() {
    let registry = RuleRegistry::load(fixtures_dir()).expect("fixture rule dir should load");
    let rules = match registry.resolve("fuse_rules", "api/catalog") {
        Resolution::Rules(rules) => rules,
        other => panic!("expected Rules, got {other:?}"),
    };

    let mut source = FixedSource(600.0); // 10 events at 600ms each -> avg 600
    let mut rng = StepRng::new(0, 1);
    let verdict = evaluator::evaluate_fuse(&rules, &mut source, &mut rng);
    assert!(matches!(verdict, Verdict::Fuse { .. }));
}

/// Scenario 2 (spec §8): probability 0 never fires even above threshold.
#[test]
fn scenario_probability_zero_never_fires() {
    let rule = rules::parse_header_rules("avg_exec_time:60:500:0").unwrap();
    let mut source = FixedSource(600.0);
    let mut rng = StepRng::new(0, 0); // rng that would pass any positive-probability gate
    let verdict = evaluator::evaluate_fuse(&rule, &mut source, &mut rng);
    assert_eq!(verdict, Verdict::Pass);
}

/// Scenario 5 (spec §8): a well-formed header override wins over the registry.
#[test]
fn scenario_header_override_wins_over_registry() {
    let registry = RuleRegistry::load(fixtures_dir()).expect("fixture rule dir should load");
    // The registry has no override for "api/payments" -> falls back to global
    // (avg_exec_time threshold 500), but a header override should replace it
    // entirely with a fail_count rule.
    let registry_rules = match registry.resolve("fuse_rules", "api/payments") {
        Resolution::Rules(rules) => rules,
        other => panic!("expected Rules, got {other:?}"),
    };
    assert_eq!(registry_rules[0].feature, Feature::AvgExecTime);

    let header_rules = rules::parse_header_rules("fail_count:30:1:100").unwrap();
    assert_eq!(header_rules[0].feature, Feature::FailCount);

    let mut source = FixedSource(2.0); // 2 sys failures in the last 30s
    let mut rng = StepRng::new(0, 1);
    let verdict = evaluator::evaluate_fuse(&header_rules, &mut source, &mut rng);
    assert!(matches!(verdict, Verdict::Fuse { .. }));
}

#[test]
fn malformed_header_override_is_rejected_as_a_whole() {
    assert!(rules::parse_header_rules("fail_count:30:1,bogus_tuple").is_err());
    assert!(rules::parse_header_rules("not_a_real_feature:30:1").is_err());
}
