//! Summary metrics over matched calls.
//!
//! Used for the one-line summaries the query commands log after a
//! matching run.

use super::matcher::CallRecord;

/// Distribution of call durations
///
/// **Public** - returned from summarize_durations
#[derive(Debug, Clone, Default)]
pub struct DurationSummary {
    /// Number of matched calls
    pub call_count: usize,

    /// Sum of all call durations (ns)
    pub total_ns: u64,

    pub mean_ns: u64,
    pub median_ns: u64,

    /// Duration of the longest 10% of calls
    pub top_10_percent_ns: u64,

    /// Share of total duration in the longest 10% of calls
    pub top_10_percent_percentage: f64,
}

/// Compute duration statistics across all calls
///
/// **Public** - provides summary statistics
///
/// # Arguments
/// * `records` - Call records from the matcher
pub fn summarize_durations(records: &[CallRecord]) -> DurationSummary {
    if records.is_empty() {
        return DurationSummary::default();
    }

    let mut durations: Vec<u64> = records.iter().map(|r| r.duration).collect();
    durations.sort_unstable_by(|a, b| b.cmp(a));

    let count = durations.len();
    let total = durations.iter().fold(0u64, |acc, d| acc.saturating_add(*d));
    let top_count = (count as f64 * 0.1).ceil() as usize;
    let top = durations
        .iter()
        .take(top_count)
        .fold(0u64, |acc, d| acc.saturating_add(*d));

    DurationSummary {
        call_count: count,
        total_ns: total,
        mean_ns: total / count as u64,
        median_ns: durations[count / 2],
        top_10_percent_ns: top,
        top_10_percent_percentage: if total > 0 {
            (top as f64 / total as f64) * 100.0
        } else {
            0.0
        },
    }
}

impl DurationSummary {
    /// Get human-readable summary
    ///
    /// **Public** - for logging
    pub fn summary(&self) -> String {
        format!(
            "Calls: {} | Total: {} ns | Mean: {} ns | Median: {} ns | Top 10%: {:.1}%",
            self.call_count,
            self.total_ns,
            self.mean_ns,
            self.median_ns,
            self.top_10_percent_percentage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Value;

    fn record(duration: u64) -> CallRecord {
        CallRecord {
            entry_name: "enter".to_string(),
            exit_name: "exit".to_string(),
            track: Value::UInt(0),
            label: Value::Null,
            start_ts: 0,
            end_ts: duration,
            duration,
        }
    }

    #[test]
    fn test_summarize_durations() {
        let records = vec![record(8000), record(1000), record(500), record(500)];
        let s = summarize_durations(&records);

        assert_eq!(s.call_count, 4);
        assert_eq!(s.total_ns, 10000);
        assert_eq!(s.mean_ns, 2500);
        assert_eq!(s.median_ns, 500);
        assert_eq!(s.top_10_percent_ns, 8000);
        assert_eq!(s.top_10_percent_percentage, 80.0);
    }

    #[test]
    fn test_summarize_saturates_huge_durations() {
        let records = vec![record(u64::MAX); 20];
        let s = summarize_durations(&records);

        assert_eq!(s.total_ns, u64::MAX);
        assert_eq!(s.top_10_percent_ns, u64::MAX);
        assert_eq!(s.mean_ns, u64::MAX / 20);
        assert_eq!(s.top_10_percent_percentage, 100.0);
    }

    #[test]
    fn test_summarize_empty() {
        let s = summarize_durations(&[]);
        assert_eq!(s.call_count, 0);
        assert_eq!(s.total_ns, 0);
        assert!(s.summary().starts_with("Calls: 0"));
    }
}
