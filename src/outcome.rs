//! Outcome classifier — spec §3.
//!
//! Derives the logical exec status of a proxied call from the upstream HTTP
//! status and the `x-response-code` response header.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Success = 1,
    BizFail = 2,
    SysFail = 3,
}

impl ExecStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::Success),
            2 => Some(Self::BizFail),
            3 => Some(Self::SysFail),
            _ => None,
        }
    }
}

/// Classify (upstream_status, `x-response-code` header) into an `ExecStatus`.
///
/// `SYS_FAIL` if the upstream status isn't 200; else `BIZ_FAIL` if the header
/// is present and not `"1"`; else `SUCCESS`.
pub fn classify(upstream_status: u16, response_code_header: Option<&str>) -> ExecStatus {
    if upstream_status != 200 {
        return ExecStatus::SysFail;
    }
    match response_code_header {
        Some(code) if code != "1" => ExecStatus::BizFail,
        _ => ExecStatus::Success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_200_is_sys_fail() {
        assert_eq!(classify(500, None), ExecStatus::SysFail);
        assert_eq!(classify(404, Some("1")), ExecStatus::SysFail);
    }

    #[test]
    fn business_failure_header() {
        assert_eq!(classify(200, Some("2")), ExecStatus::BizFail);
    }

    #[test]
    fn success_header_is_success() {
        assert_eq!(classify(200, Some("1")), ExecStatus::Success);
    }

    #[test]
    fn missing_header_defaults_to_success() {
        assert_eq!(classify(200, None), ExecStatus::Success);
    }

    #[test]
    fn round_trips_through_i64() {
        for s in [ExecStatus::Success, ExecStatus::BizFail, ExecStatus::SysFail] {
            assert_eq!(ExecStatus::from_i64(s.as_i64()), Some(s));
        }
    }
}
