//! Per-run execution traces
//!
//! Every run the engine starts leaves a trace: which trigger fired it,
//! when it started and finished, and how it ended. Traces sit in a
//! bounded per-automation ring buffer, oldest evicted first.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

/// Runs kept per automation
pub const DEFAULT_TRACE_CAPACITY: usize = 20;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Still executing
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

/// Record of one automation run
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunTrace {
    pub run_id: String,
    pub automation_id: String,
    /// Trigger platform that started the run ("state", "time", "sun",
    /// "manual")
    pub triggered_by: String,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
}

/// Bounded trace storage keyed by automation id
pub struct TraceLog {
    capacity: usize,
    runs: DashMap<String, VecDeque<RunTrace>>,
}

impl TraceLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            runs: DashMap::new(),
        }
    }

    /// Record a freshly started run with outcome [`RunOutcome::Running`].
    pub fn record_start(&self, trace: RunTrace) {
        let mut traces = self.runs.entry(trace.automation_id.clone()).or_default();
        if traces.len() == self.capacity {
            traces.pop_front();
        }
        traces.push_back(trace);
    }

    /// Close out a run. Unknown run ids are ignored; the trace may have
    /// been evicted already.
    pub fn record_end(
        &self,
        automation_id: &str,
        run_id: &str,
        finished: DateTime<Utc>,
        outcome: RunOutcome,
    ) {
        if let Some(mut traces) = self.runs.get_mut(automation_id) {
            if let Some(trace) = traces.iter_mut().rev().find(|t| t.run_id == run_id) {
                trace.finished = Some(finished);
                trace.outcome = outcome;
            }
        }
    }

    /// Traces for one automation, oldest first.
    pub fn traces(&self, automation_id: &str) -> Vec<RunTrace> {
        self.runs
            .get(automation_id)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop an automation's traces, for use when the automation itself
    /// is removed.
    pub fn forget(&self, automation_id: &str) {
        self.runs.remove(automation_id);
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn trace(run_id: &str) -> RunTrace {
        RunTrace {
            run_id: run_id.to_string(),
            automation_id: "morning".to_string(),
            triggered_by: "state".to_string(),
            started: start(),
            finished: None,
            outcome: RunOutcome::Running,
        }
    }

    #[test]
    fn end_updates_the_matching_run() {
        let log = TraceLog::default();
        log.record_start(trace("a"));
        log.record_start(trace("b"));

        let finished = start() + chrono::Duration::seconds(5);
        log.record_end("morning", "a", finished, RunOutcome::Completed);

        let traces = log.traces("morning");
        assert_eq!(traces[0].outcome, RunOutcome::Completed);
        assert_eq!(traces[0].finished, Some(finished));
        assert_eq!(traces[1].outcome, RunOutcome::Running);
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let log = TraceLog::new(3);
        for i in 0..5 {
            log.record_start(trace(&format!("run-{i}")));
        }

        let traces = log.traces("morning");
        assert_eq!(traces.len(), 3);
        assert_eq!(traces[0].run_id, "run-2");
        assert_eq!(traces[2].run_id, "run-4");

        // Ending an evicted run is a no-op, not a panic.
        log.record_end("morning", "run-0", start(), RunOutcome::Completed);
        assert_eq!(log.traces("morning").len(), 3);
    }

    #[test]
    fn forget_clears_an_automation() {
        let log = TraceLog::default();
        log.record_start(trace("a"));
        log.forget("morning");
        assert!(log.traces("morning").is_empty());
        assert!(log.traces("other").is_empty());
    }
}
