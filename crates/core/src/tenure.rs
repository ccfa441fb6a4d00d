use regex::Regex;
use std::sync::OnceLock;

const DAYS_PER_YEAR: u64 = 365;
const DAYS_PER_MONTH: u64 = 30;

fn tenure_patterns() -> &'static [(Regex, u64)] {
    static PATTERNS: OnceLock<Vec<(Regex, u64)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(\d+) year", DAYS_PER_YEAR),
            (r"(\d+) month", DAYS_PER_MONTH),
            (r"(\d+) day", 1),
        ]
        .into_iter()
        .filter_map(|(pattern, multiplier)| Some((Regex::new(pattern).ok()?, multiplier)))
        .collect()
    })
}

/// Approximate length of a fixed-deposit tenure such as
/// `"1 year 6 month 10 day"`, counting a year as 365 days and a month as 30.
/// Parts that are missing count as zero; only the first match of each unit
/// is used.
pub fn number_of_days(tenure: &str) -> u64 {
    tenure_patterns()
        .iter()
        .map(|(pattern, multiplier)| {
            pattern
                .captures(tenure)
                .and_then(|captures| captures.get(1))
                .map(|amount| amount.as_str().parse::<u64>().unwrap_or(u64::MAX))
                .map(|amount| amount.saturating_mul(*multiplier))
                .unwrap_or(0)
        })
        .fold(0u64, u64::saturating_add)
}
