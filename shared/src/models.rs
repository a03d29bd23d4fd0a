//! Shared data models.

use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::Error;

/// Category of a schedulable event.
///
/// Partitions the lead-time policy and the tracking-store namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Concert,
    Interview,
    Study,
}

impl EventKind {
    /// Store namespace and summary key for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Concert => "concerts",
            EventKind::Interview => "interviews",
            EventKind::Study => "study",
        }
    }

    /// Sheet range read for this kind, header row excluded.
    pub fn sheet_range(&self) -> &'static str {
        match self {
            EventKind::Concert => "Sheet1!A2:H",
            EventKind::Interview => "Sheet1!A2:I",
            EventKind::Study => "Sheet1!A2:H",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical unit of schedulable content, re-derived fresh every run.
#[derive(Debug, Clone)]
pub struct Event {
    /// Stable identifier from the source row key
    pub event_id: String,
    pub kind: EventKind,
    /// Event start, localized to the reference timezone
    pub starts_at: DateTime<Tz>,
    /// Hash over all mutable source fields; a change re-arms every bucket
    pub content_hash: String,
    pub payload: EventPayload,
}

/// Category-specific fields used by message formatting.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Concert {
        band: String,
        venue: String,
        location: String,
        notes: String,
    },
    Interview {
        company: String,
        position: String,
        interviewer: String,
        stage: String,
        prep_notes: String,
    },
    Study {
        course: String,
        topic: String,
        duration: String,
        priority: String,
        resources: String,
    },
}

/// Scheduled trigger category from the invocation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    Morning,
    Afternoon,
    EveningCheck,
    HourlyUrgent,
    Manual,
}

impl TriggerType {
    /// Lenient parse; unknown values are treated as manual test runs.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "morning" => TriggerType::Morning,
            "afternoon" => TriggerType::Afternoon,
            "evening-check" => TriggerType::EveningCheck,
            "hourly-urgent" => TriggerType::HourlyUrgent,
            _ => TriggerType::Manual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Morning => "morning",
            TriggerType::Afternoon => "afternoon",
            TriggerType::EveningCheck => "evening-check",
            TriggerType::HourlyUrgent => "hourly-urgent",
            TriggerType::Manual => "manual",
        }
    }

    /// Tolerance window for due buckets: the interval until the next run of
    /// this trigger. Inclusive lower bound, exclusive upper bound.
    pub fn tolerance(&self) -> chrono::Duration {
        match self {
            TriggerType::HourlyUrgent | TriggerType::Manual => chrono::Duration::hours(1),
            _ => chrono::Duration::hours(6),
        }
    }

    /// The study sheet is only read on the evening check and manual runs.
    pub fn includes_study(&self) -> bool {
        matches!(self, TriggerType::EveningCheck | TriggerType::Manual)
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contained failure inside a source's pipeline.
#[derive(Debug, Serialize)]
pub struct SourceError {
    pub kind: &'static str,
    pub message: String,
}

/// Per-source outcome counts.
#[derive(Debug, Default, Serialize)]
pub struct SourceSummary {
    pub events_seen: u32,
    pub notifications_sent: u32,
    /// Due buckets suppressed because they were already recorded
    pub notifications_skipped: u32,
    pub errors: Vec<SourceError>,
    /// True when the source was not read on this trigger
    pub skipped: bool,
}

impl SourceSummary {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn record_error(&mut self, err: &Error) {
        self.errors.push(SourceError {
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

/// Structured result of one invocation, serialized as the response body.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub environment: String,
    pub trigger_type: &'static str,
    pub execution_time: String,
    pub concerts: SourceSummary,
    pub interviews: SourceSummary,
    pub study: SourceSummary,
    pub total_events_seen: u32,
    pub total_notifications_sent: u32,
    pub total_notifications_skipped: u32,
    pub errors_by_kind: BTreeMap<&'static str, u32>,
}

impl RunSummary {
    pub fn new(environment: &str, trigger: TriggerType, now: DateTime<Tz>) -> Self {
        Self {
            environment: environment.to_string(),
            trigger_type: trigger.as_str(),
            execution_time: now.to_rfc3339(),
            concerts: SourceSummary::default(),
            interviews: SourceSummary::default(),
            study: SourceSummary::default(),
            total_events_seen: 0,
            total_notifications_sent: 0,
            total_notifications_skipped: 0,
            errors_by_kind: BTreeMap::new(),
        }
    }

    pub fn source_mut(&mut self, kind: EventKind) -> &mut SourceSummary {
        match kind {
            EventKind::Concert => &mut self.concerts,
            EventKind::Interview => &mut self.interviews,
            EventKind::Study => &mut self.study,
        }
    }

    /// Compute run-level totals from the per-source counts.
    pub fn finalize(&mut self) {
        let sources = [&self.concerts, &self.interviews, &self.study];
        self.total_events_seen = sources.iter().map(|s| s.events_seen).sum();
        self.total_notifications_sent = sources.iter().map(|s| s.notifications_sent).sum();
        self.total_notifications_skipped =
            sources.iter().map(|s| s.notifications_skipped).sum();

        let mut by_kind = BTreeMap::new();
        for source in sources {
            for err in &source.errors {
                *by_kind.entry(err.kind).or_insert(0) += 1;
            }
        }
        self.errors_by_kind = by_kind;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_parse_is_lenient() {
        assert_eq!(TriggerType::parse("evening-check"), TriggerType::EveningCheck);
        assert_eq!(TriggerType::parse("hourly-urgent"), TriggerType::HourlyUrgent);
        assert_eq!(TriggerType::parse("something-else"), TriggerType::Manual);
        assert_eq!(TriggerType::parse(""), TriggerType::Manual);
    }

    #[test]
    fn study_only_read_on_evening_or_manual() {
        assert!(TriggerType::EveningCheck.includes_study());
        assert!(TriggerType::Manual.includes_study());
        assert!(!TriggerType::Morning.includes_study());
        assert!(!TriggerType::HourlyUrgent.includes_study());
    }

    #[test]
    fn finalize_aggregates_sources() {
        let tz: chrono_tz::Tz = "America/Lima".parse().unwrap();
        let now = chrono::Utc::now().with_timezone(&tz);
        let mut summary = RunSummary::new("dev", TriggerType::Manual, now);
        summary.concerts.events_seen = 3;
        summary.concerts.notifications_sent = 1;
        summary
            .concerts
            .record_error(&Error::MalformedRow("row 4".to_string()));
        summary.interviews.events_seen = 2;
        summary
            .interviews
            .record_error(&Error::MalformedRow("row 1".to_string()));
        summary.finalize();

        assert_eq!(summary.total_events_seen, 5);
        assert_eq!(summary.total_notifications_sent, 1);
        assert_eq!(summary.errors_by_kind.get("malformed_row"), Some(&2));
    }
}
