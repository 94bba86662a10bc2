//! Result Aggregator: groups issues by `group` then `checkId`,
//! dedupes within a check by `(file, line, ruleId, message)`, and rolls up
//! per-check execution statistics.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{ExecutionRecord, Outcome, ReviewSummary, Severity};

const UNGROUPED: &str = "ungrouped";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckStatistics {
    pub total_runs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub issues_by_severity: HashMap<Severity, usize>,
    pub iteration_durations_ms: Vec<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionStatistics {
    pub per_check: HashMap<String, CheckStatistics>,
}

impl ExecutionStatistics {
    pub fn record(&mut self, record: &ExecutionRecord) {
        let stats = self.per_check.entry(record.check_id.clone()).or_default();
        stats.total_runs += 1;
        match record.outcome {
            Outcome::Succeeded => stats.succeeded += 1,
            Outcome::Failed => stats.failed += 1,
            Outcome::Skipped => stats.skipped += 1,
            Outcome::Errored => stats.errored += 1,
        }
        for (severity, count) in &record.issue_counts {
            *stats.issues_by_severity.entry(*severity).or_insert(0) += count;
        }
        let duration = (record.end_time_ms - record.start_time_ms).max(0) as u64;
        stats.iteration_durations_ms.push(duration);
    }
}

/// `group → checkId → ReviewSummary[]`, the shape exposed to frontends as
/// the grouped results format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroupedResults(pub HashMap<String, HashMap<String, Vec<ReviewSummary>>>);

#[derive(Debug, Default)]
pub struct Aggregator {
    grouped: GroupedResults,
    statistics: ExecutionStatistics,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one check invocation's summary under its configured `group`
    /// (or `ungrouped`) and `checkId`, deduplicating issues within the
    /// check by `(file, line, ruleId, message)`.
    pub fn record_summary(&mut self, group: Option<&str>, check_id: &str, mut summary: ReviewSummary) {
        let group = group.unwrap_or(UNGROUPED).to_string();
        let per_check = self.grouped.0.entry(group).or_default();
        let summaries = per_check.entry(check_id.to_string()).or_default();

        let mut seen: std::collections::HashSet<(String, u32, String, String)> = summaries
            .iter()
            .flat_map(|s| s.issues.iter())
            .map(issue_key)
            .collect();
        summary.issues.retain(|issue| seen.insert(issue_key(issue)));

        summaries.push(summary);
    }

    pub fn record_execution(&mut self, record: &ExecutionRecord) {
        self.statistics.record(record);
    }

    pub fn grouped_results(&self) -> &GroupedResults {
        &self.grouped
    }

    pub fn statistics(&self) -> &ExecutionStatistics {
        &self.statistics
    }

    pub fn into_parts(self) -> (GroupedResults, ExecutionStatistics) {
        (self.grouped, self.statistics)
    }
}

fn issue_key(issue: &crate::model::ReviewIssue) -> (String, u32, String, String) {
    (issue.file.clone(), issue.line, issue.rule_id.clone(), issue.message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReviewIssue, Severity};

    #[test]
    fn groups_by_group_then_check() {
        let mut aggregator = Aggregator::new();
        aggregator.record_summary(Some("security"), "scan", ReviewSummary::empty());
        aggregator.record_summary(None, "lint", ReviewSummary::empty());
        let grouped = aggregator.grouped_results();
        assert!(grouped.0.contains_key("security"));
        assert!(grouped.0.contains_key(UNGROUPED));
    }

    #[test]
    fn deduplicates_identical_issues_within_a_check() {
        let mut aggregator = Aggregator::new();
        let issue = ReviewIssue::new("a.rs", 10, "lint/dup", "duplicate message", Severity::Warning);
        let summary_a = ReviewSummary { issues: vec![issue.clone()], ..Default::default() };
        let summary_b = ReviewSummary { issues: vec![issue], ..Default::default() };
        aggregator.record_summary(None, "lint", summary_a);
        aggregator.record_summary(None, "lint", summary_b);
        let summaries = &aggregator.grouped_results().0[UNGROUPED]["lint"];
        let total_issues: usize = summaries.iter().map(|s| s.issues.len()).sum();
        assert_eq!(total_issues, 1);
    }

    #[test]
    fn statistics_count_outcomes_and_issues() {
        let mut stats = ExecutionStatistics::default();
        let mut counts = HashMap::new();
        counts.insert(Severity::Error, 2);
        stats.record(&ExecutionRecord {
            check_id: "lint".into(),
            iteration: 0,
            start_time_ms: 0,
            end_time_ms: 100,
            provider_duration_ms: 90,
            input_fingerprint: "fp".into(),
            outcome: Outcome::Failed,
            skip_reason: None,
            issue_counts: counts,
        });
        let check_stats = &stats.per_check["lint"];
        assert_eq!(check_stats.failed, 1);
        assert_eq!(check_stats.issues_by_severity[&Severity::Error], 2);
        assert_eq!(check_stats.iteration_durations_ms, vec![100]);
    }
}
