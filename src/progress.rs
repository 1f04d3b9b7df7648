use std::sync::OnceLock;

use regex::Regex;

static PERCENT_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Pull a download percentage out of one line of tool output.
///
/// The first `<digits>[.<digits>]%` token wins and is clamped to 0..=100.
/// Lines without a token return `None`, never zero, so a chatty tool can't
/// drag a running job's progress backwards.
pub fn extract_progress(line: &str) -> Option<f64> {
    let re = PERCENT_RE
        .get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)%").ok())
        .as_ref()?;

    let caps = re.captures(line)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0))
}
