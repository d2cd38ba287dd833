//! Feature dispatch — spec §4.6, §9 ("dynamic dispatch on feature name:
//! model as a tagged enum of metric kinds with a pure function
//! `(kind, window) -> number`").
//!
//! A closed enum of metric kinds plus two pure readers (`Window::value`,
//! `GlobalWindow::value`) replace the source's string-keyed dispatch table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AvgExecTime,
    BizFailCount,
    BizFailPercent,
    SysFailCount,
    SysFailPercent,
    FailCount,
    FailPercent,
    GlobalAvgExecTime,
    GlobalBizFailCount,
    GlobalBizFailPercent,
    GlobalSysFailCount,
    GlobalSysFailPercent,
    GlobalFailCount,
    GlobalFailPercent,
    SingleCommandHits,
    TotalCommandHits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Command,
    Global,
}

impl Feature {
    /// Mirrors the rule-file feature string exactly (§4.3 / §6 schema), so
    /// header-tuple parsing (`feature:duration:threshold[:probability]`)
    /// accepts the same vocabulary as JSON rule documents.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "avg_exec_time" => Self::AvgExecTime,
            "biz_fail_count" => Self::BizFailCount,
            "biz_fail_percent" => Self::BizFailPercent,
            "sys_fail_count" => Self::SysFailCount,
            "sys_fail_percent" => Self::SysFailPercent,
            "fail_count" => Self::FailCount,
            "fail_percent" => Self::FailPercent,
            "global_avg_exec_time" => Self::GlobalAvgExecTime,
            "global_biz_fail_count" => Self::GlobalBizFailCount,
            "global_biz_fail_percent" => Self::GlobalBizFailPercent,
            "global_sys_fail_count" => Self::GlobalSysFailCount,
            "global_sys_fail_percent" => Self::GlobalSysFailPercent,
            "global_fail_count" => Self::GlobalFailCount,
            "global_fail_percent" => Self::GlobalFailPercent,
            "single_command_hits" => Self::SingleCommandHits,
            "total_command_hits" => Self::TotalCommandHits,
            _ => return None,
        })
    }

    /// Any feature prefixed `global_` forces use of the global window (§4.6).
    /// The two device-hit features have their own namespace (§4.6, device
    /// rate limiter paragraph) and are resolved by `device_limiter.rs`
    /// directly rather than through `Window`/`GlobalWindow`.
    pub fn scope(self) -> Scope {
        match self {
            Self::GlobalAvgExecTime
            | Self::GlobalBizFailCount
            | Self::GlobalBizFailPercent
            | Self::GlobalSysFailCount
            | Self::GlobalSysFailPercent
            | Self::GlobalFailCount
            | Self::GlobalFailPercent => Scope::Global,
            _ => Scope::Command,
        }
    }

    pub fn is_device_hits(self) -> bool {
        matches!(self, Self::SingleCommandHits | Self::TotalCommandHits)
    }

    /// Inverse of `parse` — the canonical rule vocabulary used in rule
    /// files, header tuples, and alarm payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AvgExecTime => "avg_exec_time",
            Self::BizFailCount => "biz_fail_count",
            Self::BizFailPercent => "biz_fail_percent",
            Self::SysFailCount => "sys_fail_count",
            Self::SysFailPercent => "sys_fail_percent",
            Self::FailCount => "fail_count",
            Self::FailPercent => "fail_percent",
            Self::GlobalAvgExecTime => "global_avg_exec_time",
            Self::GlobalBizFailCount => "global_biz_fail_count",
            Self::GlobalBizFailPercent => "global_biz_fail_percent",
            Self::GlobalSysFailCount => "global_sys_fail_count",
            Self::GlobalSysFailPercent => "global_sys_fail_percent",
            Self::GlobalFailCount => "global_fail_count",
            Self::GlobalFailPercent => "global_fail_percent",
            Self::SingleCommandHits => "single_command_hits",
            Self::TotalCommandHits => "total_command_hits",
        }
    }
}

/// Per-command window over a sliding duration (spec §4.5 "Read window").
#[derive(Debug, Clone, Copy, Default)]
pub struct Window {
    pub avg_exec_time_ms: i64,
    pub biz_fail_count: i64,
    pub sys_fail_count: i64,
    /// Substituted to 1 when no events are observed, so percent metrics are
    /// well-defined as 0% rather than NaN (§4.5).
    pub total_exec_count: i64,
}

impl Window {
    pub fn value(&self, feature: Feature) -> f64 {
        let total = self.total_exec_count.max(1) as f64;
        match feature {
            Feature::AvgExecTime => self.avg_exec_time_ms as f64,
            Feature::BizFailCount => self.biz_fail_count as f64,
            Feature::BizFailPercent => 100.0 * self.biz_fail_count as f64 / total,
            Feature::SysFailCount => self.sys_fail_count as f64,
            Feature::SysFailPercent => 100.0 * self.sys_fail_count as f64 / total,
            Feature::FailCount => (self.biz_fail_count + self.sys_fail_count) as f64,
            Feature::FailPercent => {
                100.0 * (self.biz_fail_count + self.sys_fail_count) as f64 / total
            }
            // Global and device-hit features never route through a
            // per-command `Window`; nothing in the engine raises into the
            // request path (§7), so an out-of-scope feature reads as 0
            // rather than panicking.
            _ => 0.0,
        }
    }
}

/// Global per-second counters over a sliding duration (spec §4.5 "Read
/// global window").
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalWindow {
    pub exec_count: i64,
    pub biz_fail_count: i64,
    pub sys_fail_count: i64,
}

impl GlobalWindow {
    pub fn value(&self, feature: Feature) -> f64 {
        let total = self.exec_count.max(1) as f64;
        match feature {
            Feature::GlobalAvgExecTime => {
                // The source has no global latency counter; only counts are
                // summed per-second. Exposed for schema completeness but
                // always reads as 0 — no rule should threshold on it without
                // also reading per-command avg_exec_time.
                0.0
            }
            Feature::GlobalBizFailCount => self.biz_fail_count as f64,
            Feature::GlobalBizFailPercent => 100.0 * self.biz_fail_count as f64 / total,
            Feature::GlobalSysFailCount => self.sys_fail_count as f64,
            Feature::GlobalSysFailPercent => 100.0 * self.sys_fail_count as f64 / total,
            Feature::GlobalFailCount => (self.biz_fail_count + self.sys_fail_count) as f64,
            Feature::GlobalFailPercent => {
                100.0 * (self.biz_fail_count + self.sys_fail_count) as f64 / total
            }
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_with_serde_rename() {
        for (s, f) in [
            ("avg_exec_time", Feature::AvgExecTime),
            ("fail_percent", Feature::FailPercent),
            ("global_sys_fail_count", Feature::GlobalSysFailCount),
            ("single_command_hits", Feature::SingleCommandHits),
        ] {
            assert_eq!(Feature::parse(s), Some(f));
            let via_json: Feature = serde_json::from_str(&format!("{s:?}")).unwrap();
            assert_eq!(via_json, f);
        }
    }

    #[test]
    fn unknown_feature_parses_to_none() {
        assert_eq!(Feature::parse("not_a_feature"), None);
    }

    #[test]
    fn as_str_is_the_inverse_of_parse() {
        for f in [
            Feature::AvgExecTime,
            Feature::FailPercent,
            Feature::GlobalSysFailCount,
            Feature::SingleCommandHits,
        ] {
            assert_eq!(Feature::parse(f.as_str()), Some(f));
        }
    }

    #[test]
    fn empty_window_yields_zero_percent_not_nan() {
        let w = Window::default();
        assert_eq!(w.value(Feature::FailPercent), 0.0);
        assert_eq!(w.value(Feature::BizFailPercent), 0.0);
    }

    #[test]
    fn single_event_avg_equals_its_own_exec_time() {
        let w = Window {
            avg_exec_time_ms: 42,
            total_exec_count: 1,
            ..Default::default()
        };
        assert_eq!(w.value(Feature::AvgExecTime), 42.0);
    }

    #[test]
    fn fail_count_sums_biz_and_sys() {
        let w = Window {
            biz_fail_count: 2,
            sys_fail_count: 3,
            total_exec_count: 10,
            ..Default::default()
        };
        assert_eq!(w.value(Feature::FailCount), 5.0);
        assert!(w.biz_fail_count + w.sys_fail_count <= w.total_exec_count);
    }

    #[test]
    fn global_scope_detection() {
        assert_eq!(Feature::GlobalFailCount.scope(), Scope::Global);
        assert_eq!(Feature::FailCount.scope(), Scope::Command);
    }
}
