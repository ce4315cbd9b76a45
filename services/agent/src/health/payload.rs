//! Check script output parsing.

use hostpilot_model::HealthReport;

/// Pull a [`HealthReport`] out of free-form script output.
///
/// Scripts may print arbitrary text around the report, so the candidate is
/// everything from the first `{` to the last `}`. Returns `None` when there
/// is no such span or it does not decode as `{code, msg}`.
pub fn extract_report(output: &str) -> Option<HealthReport> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&output[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(r#"{"code":"0","msg":"ok"}"#, "0", "ok")]
    #[case("checking mysqld\n{\"code\": \"1\", \"msg\": \"down\"}\ndone\n", "1", "down")]
    #[case("  {\"msg\":\"slow\",\"code\":\"2\"}", "2", "slow")]
    fn test_extracts_report(#[case] output: &str, #[case] code: &str, #[case] msg: &str) {
        let report = extract_report(output).unwrap();
        assert_eq!(report.code, code);
        assert_eq!(report.msg, msg);
    }

    #[rstest]
    #[case("")]
    #[case("all good")]
    #[case("} backwards {")]
    #[case(r#"{"code":0,"msg":"ok"}"#)]
    #[case(r#"{"code":"0"}"#)]
    #[case(r#"{"code":"0","msg":"a"} and {"code":"1","msg":"b"}"#)]
    fn test_rejects_output(#[case] output: &str) {
        assert!(extract_report(output).is_none());
    }
}
