//! Rule registry — spec §4.3, §6.
//!
//! Loads rule documents from a directory of JSON files at startup (key =
//! filename with `.json` stripped, non-alphanumerics collapsed to `_`,
//! mirroring `classifier::command_key`'s replacement rule) and resolves
//! `(rule_set_name, command)` against them. Also parses the per-request
//! header override tuples.

use crate::error::{RuleLoadError, RuleParseError};
use crate::feature::Feature;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Rule {
    pub feature: Feature,
    pub duration: u64,
    pub threshold: f64,
    #[serde(default = "default_probability")]
    pub probability: f64,
}

fn default_probability() -> f64 {
    100.0
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuleDocument {
    #[serde(default)]
    pub global: Vec<Rule>,
    #[serde(default)]
    pub commands: HashMap<String, Vec<Rule>>,
}

/// Outcome of resolving a rule set against a command (§3 "Invariants").
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Evaluate against this rule list.
    Rules(Vec<Rule>),
    /// `commands[command]` exists and is empty: skip evaluation entirely.
    Ignored,
    /// No rule set, and no applicable rules within it.
    None,
}

#[derive(Debug, Default)]
pub struct RuleRegistry {
    documents: HashMap<String, RuleDocument>,
}

impl RuleRegistry {
    /// Scan `dir` for `*.json` rule documents. A file that fails to parse is
    /// logged and skipped; startup still succeeds (§4.3).
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, RuleLoadError> {
        let dir = dir.as_ref();
        let mut documents = HashMap::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(source) => {
                return Err(RuleLoadError::Io {
                    path: dir.display().to_string(),
                    source,
                })
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("[rules] failed to read directory entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let name = sanitized_stem(&path);
            match load_document(&path) {
                Ok(doc) => {
                    info!(
                        "[rules] loaded rule set {name:?} from {} ({} global, {} command overrides)",
                        path.display(),
                        doc.global.len(),
                        doc.commands.len(),
                    );
                    documents.insert(name, doc);
                }
                Err(e) => {
                    error!("[rules] skipping {}: {e}", path.display());
                }
            }
        }

        Ok(Self { documents })
    }

    /// Resolve `(rule_set_name, command)` per §4.3:
    /// `commands[command]` if present (even empty — short-circuits to
    /// Ignored); else `global` if non-empty; else None.
    pub fn resolve(&self, rule_set_name: &str, command: &str) -> Resolution {
        let Some(doc) = self.documents.get(rule_set_name) else {
            return Resolution::None;
        };

        if let Some(rules) = doc.commands.get(command) {
            return if rules.is_empty() {
                Resolution::Ignored
            } else {
                Resolution::Rules(rules.clone())
            };
        }

        if doc.global.is_empty() {
            Resolution::None
        } else {
            Resolution::Rules(doc.global.clone())
        }
    }
}

fn load_document(path: &Path) -> Result<RuleDocument, RuleLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RuleLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| RuleLoadError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn sanitized_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Parse a `x-fuse-rules` / `x-alarm-rules` / `x-rate-rules` header value:
/// comma-separated `feature:duration:threshold[:probability]` tuples.
///
/// Untrusted input (§9 "String-based rule parsing from headers: treat as
/// untrusted input; reject on any malformed tuple rather than silently
/// defaulting"): the whole header is rejected on the first bad tuple.
pub fn parse_header_rules(header: &str) -> Result<Vec<Rule>, RuleParseError> {
    header
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_tuple)
        .collect()
}

fn parse_tuple(tuple: &str) -> Result<Rule, RuleParseError> {
    let parts: Vec<&str> = tuple.split(':').collect();
    if parts.len() != 3 && parts.len() != 4 {
        return Err(RuleParseError::WrongArity(tuple.to_string()));
    }

    let feature = Feature::parse(parts[0])
        .ok_or_else(|| RuleParseError::UnknownFeature(parts[0].to_string()))?;
    let duration: u64 = parts[1]
        .parse()
        .map_err(|_| RuleParseError::BadDuration(tuple.to_string()))?;
    let threshold: f64 = parts[2]
        .parse()
        .map_err(|_| RuleParseError::BadThreshold(tuple.to_string()))?;
    let probability = match parts.get(3) {
        Some(p) => p
            .parse()
            .map_err(|_| RuleParseError::BadProbability(tuple.to_string()))?,
        None => default_probability(),
    };

    Ok(Rule {
        feature,
        duration,
        threshold,
        probability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_rule_file(dir: &Path, name: &str, body: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn resolve_prefers_command_override() {
        let dir = tempfile::tempdir().unwrap();
        write_rule_file(
            dir.path(),
            "fuse_rules.json",
            r#"{"global":[{"feature":"avg_exec_time","duration":60,"threshold":500}],
                "commands":{"api/orders":[{"feature":"fail_count","duration":30,"threshold":1}]}}"#,
        );
        let registry = RuleRegistry::load(dir.path()).unwrap();

        match registry.resolve("fuse_rules", "api/orders") {
            Resolution::Rules(rules) => {
                assert_eq!(rules.len(), 1);
                assert_eq!(rules[0].feature, Feature::FailCount);
            }
            other => panic!("expected Rules, got {other:?}"),
        }
    }

    #[test]
    fn empty_command_override_ignores_regardless_of_global() {
        let dir = tempfile::tempdir().unwrap();
        write_rule_file(
            dir.path(),
            "fuse_rules.json",
            r#"{"global":[{"feature":"avg_exec_time","duration":60,"threshold":500}],
                "commands":{"health":[]}}"#,
        );
        let registry = RuleRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.resolve("fuse_rules", "health"), Resolution::Ignored);
    }

    #[test]
    fn falls_back_to_global_when_no_override() {
        let dir = tempfile::tempdir().unwrap();
        write_rule_file(
            dir.path(),
            "fuse_rules.json",
            r#"{"global":[{"feature":"avg_exec_time","duration":60,"threshold":500}],"commands":{}}"#,
        );
        let registry = RuleRegistry::load(dir.path()).unwrap();
        assert!(matches!(
            registry.resolve("fuse_rules", "anything"),
            Resolution::Rules(_)
        ));
    }

    #[test]
    fn unknown_rule_set_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RuleRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.resolve("nope", "cmd"), Resolution::None);
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_rule_file(dir.path(), "broken.json", "{not json");
        write_rule_file(
            dir.path(),
            "ok_rules.json",
            r#"{"global":[],"commands":{}}"#,
        );
        let registry = RuleRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.resolve("broken", "x"), Resolution::None);
        assert_eq!(registry.resolve("ok_rules", "x"), Resolution::None);
    }

    #[test]
    fn filename_sanitization_matches_command_key_rule() {
        let dir = tempfile::tempdir().unwrap();
        write_rule_file(dir.path(), "rate-rules.v2.json", r#"{"global":[],"commands":{}}"#);
        let registry = RuleRegistry::load(dir.path()).unwrap();
        assert!(registry.documents.contains_key("rate_rules_v2"));
    }

    #[test]
    fn header_tuple_with_probability() {
        let rules = parse_header_rules("fail_count:30:1:100").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].feature, Feature::FailCount);
        assert_eq!(rules[0].duration, 30);
        assert_eq!(rules[0].probability, 100.0);
    }

    #[test]
    fn header_tuple_defaults_probability_when_omitted() {
        let rules = parse_header_rules("fail_count:30:1").unwrap();
        assert_eq!(rules[0].probability, 100.0);
    }

    #[test]
    fn header_rejects_whole_list_on_one_bad_tuple() {
        assert!(parse_header_rules("fail_count:30:1,bogus").is_err());
        assert!(parse_header_rules("not_a_feature:30:1").is_err());
        assert!(parse_header_rules("fail_count:notanumber:1").is_err());
    }

    #[test]
    fn multiple_header_tuples() {
        let rules = parse_header_rules("fail_count:30:1,avg_exec_time:60:500:50").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].probability, 50.0);
    }
}
