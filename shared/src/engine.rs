//! Per-run orchestration.
//!
//! Wires the source reader, normalizer, scheduler, tracking store, and
//! dispatcher into one invocation: fetch each source, normalize rows,
//! compute due buckets, dedup, send, record, summarize. Failures are
//! contained per event and per source; the run always reaches its summary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::calendar::CalendarClient;
use crate::config::Config;
use crate::models::{Event, EventKind, RunSummary, SourceSummary, TriggerType};
use crate::normalize;
use crate::notify::Dispatcher;
use crate::schedule::{due_buckets, LeadTimePolicy};
use crate::sheets::SourceReader;
use crate::store::{MarkOutcome, TrackingStore};
use crate::Error;

pub struct Engine {
    config: Config,
    reader: Arc<dyn SourceReader>,
    store: Arc<dyn TrackingStore>,
    dispatcher: Dispatcher,
    calendar: Option<CalendarClient>,
}

impl Engine {
    pub fn new(
        config: Config,
        reader: Arc<dyn SourceReader>,
        store: Arc<dyn TrackingStore>,
        dispatcher: Dispatcher,
        calendar: Option<CalendarClient>,
    ) -> Self {
        Self {
            config,
            reader,
            store,
            dispatcher,
            calendar,
        }
    }

    /// Process one invocation and produce its summary.
    pub async fn run(&self, trigger: TriggerType, now: DateTime<Tz>) -> RunSummary {
        info!(
            trigger = %trigger,
            environment = %self.config.environment,
            "Starting event processing"
        );

        let mut summary = RunSummary::new(&self.config.environment, trigger, now);

        // Sources are independent; process them concurrently.
        let (concerts, interviews, study) = tokio::join!(
            self.process_source(EventKind::Concert, trigger, now),
            self.process_source(EventKind::Interview, trigger, now),
            async {
                if trigger.includes_study() {
                    self.process_source(EventKind::Study, trigger, now).await
                } else {
                    info!("Skipping study schedule on this trigger");
                    SourceSummary::skipped()
                }
            },
        );

        summary.concerts = concerts;
        summary.interviews = interviews;
        summary.study = study;
        summary.finalize();

        if trigger == TriggerType::EveningCheck {
            let outcome = self.dispatcher.dispatch_summary(&summary).await;
            if !outcome.any_delivered() {
                warn!("Failed to deliver the run summary notification");
            }
        }

        info!(
            events_seen = summary.total_events_seen,
            notifications_sent = summary.total_notifications_sent,
            notifications_skipped = summary.total_notifications_skipped,
            "Event processing complete"
        );

        summary
    }

    async fn process_source(
        &self,
        kind: EventKind,
        trigger: TriggerType,
        now: DateTime<Tz>,
    ) -> SourceSummary {
        let mut summary = SourceSummary::default();

        let rows = match self
            .reader
            .fetch(self.config.sheet_id(kind), kind.sheet_range())
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(source = %kind, error = %e, "Source fetch failed, skipping source");
                summary.record_error(&e);
                return summary;
            }
        };

        info!(source = %kind, rows = rows.len(), "Processing source");
        let policy = LeadTimePolicy::for_kind(kind);

        for row in &rows {
            let event = match normalize::normalize(row, kind, self.config.timezone) {
                Ok(event) => event,
                Err(e) => {
                    warn!(source = %kind, error = %e, "Skipping malformed row");
                    summary.record_error(&e);
                    continue;
                }
            };

            summary.events_seen += 1;
            self.process_event(&event, &policy, now, trigger, &mut summary)
                .await;
        }

        summary
    }

    async fn process_event(
        &self,
        event: &Event,
        policy: &LeadTimePolicy,
        now: DateTime<Tz>,
        trigger: TriggerType,
        summary: &mut SourceSummary,
    ) {
        for bucket in due_buckets(event, policy, now, trigger.tolerance()) {
            match self
                .store
                .is_already_sent(&event.event_id, event.kind, bucket.label, &event.content_hash)
                .await
            {
                Ok(true) => {
                    summary.notifications_skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    // A send that cannot be marked would repeat forever;
                    // skip dispatch while the store is unreachable.
                    error!(event_id = %event.event_id, error = %e, "Store check failed");
                    summary.record_error(&e);
                    continue;
                }
            }

            let outcome = self.dispatcher.dispatch(event, bucket.label).await;
            if !outcome.any_delivered() {
                summary.record_error(&Error::ChannelSend(format!(
                    "no channel delivered {} for {}",
                    bucket.label, event.event_id
                )));
                continue;
            }

            // Send first, mark after: a crash in between duplicates on the
            // next run instead of dropping the notification.
            match self
                .store
                .mark_sent(
                    &event.event_id,
                    event.kind,
                    bucket.label,
                    &event.content_hash,
                    Utc::now(),
                    &event.starts_at.format("%Y-%m-%d").to_string(),
                )
                .await
            {
                Ok(MarkOutcome::Recorded) => summary.notifications_sent += 1,
                Ok(MarkOutcome::Conflict) => {
                    warn!(
                        event_id = %event.event_id,
                        bucket = bucket.label,
                        "Concurrent run already recorded this bucket"
                    );
                    summary.notifications_skipped += 1;
                }
                Err(e) => {
                    error!(event_id = %event.event_id, error = %e, "Failed to record send");
                    summary.record_error(&e);
                }
            }

            if let Some(calendar) = &self.calendar {
                if let Err(e) = calendar.mirror(event).await {
                    warn!(event_id = %event.event_id, error = %e, "Calendar mirror failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Notification, NotificationChannel};
    use crate::store::InMemoryTrackingStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeReader {
        sheets: HashMap<String, Vec<Vec<String>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeReader {
        fn new(sheets: HashMap<String, Vec<Vec<String>>>) -> Self {
            Self {
                sheets,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceReader for FakeReader {
        async fn fetch(&self, source_id: &str, _range: &str) -> crate::Result<Vec<Vec<String>>> {
            self.calls.lock().unwrap().push(source_id.to_string());
            self.sheets
                .get(source_id)
                .cloned()
                .ok_or_else(|| Error::SourceUnavailable(format!("no sheet {}", source_id)))
        }
    }

    struct RecordingChannel {
        name: &'static str,
        fail: bool,
        subjects: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, notification: &Notification) -> crate::Result<()> {
            if self.fail {
                return Err(Error::ChannelSend("down".to_string()));
            }
            self.subjects.lock().unwrap().push(notification.subject.clone());
            Ok(())
        }
    }

    fn tz() -> Tz {
        "America/Lima".parse().unwrap()
    }

    fn test_config() -> Config {
        Config {
            environment: "test".to_string(),
            timezone: tz(),
            concerts_sheet_id: "concerts-sheet".to_string(),
            interviews_sheet_id: "interviews-sheet".to_string(),
            study_sheet_id: "study-sheet".to_string(),
            tracking_table: "tracking".to_string(),
            sns_topic_arn: "arn:aws:sns:us-east-1:0:topic".to_string(),
            google_credentials_arn: "arn:secret:google".to_string(),
            discord_webhook_arn: "arn:secret:discord".to_string(),
            calendar_id: None,
        }
    }

    fn concert_row(id: &str, notes: &str) -> Vec<String> {
        vec![
            id.to_string(),
            "The National".to_string(),
            "Arena".to_string(),
            "2026-09-15".to_string(),
            "20:00".to_string(),
            "Lima".to_string(),
            String::new(),
            notes.to_string(),
        ]
    }

    fn study_row(id: &str, topic: &str) -> Vec<String> {
        vec![
            id.to_string(),
            "Distributed Systems".to_string(),
            topic.to_string(),
            "2026-09-05".to_string(),
            "2h".to_string(),
            "high".to_string(),
        ]
    }

    fn engine_with(
        sheets: HashMap<String, Vec<Vec<String>>>,
        store: Arc<InMemoryTrackingStore>,
        fail_channel: bool,
    ) -> (Engine, Arc<FakeReader>, Arc<Mutex<Vec<String>>>) {
        let reader = Arc::new(FakeReader::new(sheets));
        let subjects = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(vec![Box::new(RecordingChannel {
            name: "email",
            fail: fail_channel,
            subjects: Arc::clone(&subjects),
        })]);
        let engine = Engine::new(
            test_config(),
            Arc::clone(&reader) as Arc<dyn SourceReader>,
            store as Arc<dyn TrackingStore>,
            dispatcher,
            None,
        );
        (engine, reader, subjects)
    }

    fn sent_reminders(subjects: &Arc<Mutex<Vec<String>>>) -> usize {
        subjects
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.contains("summary"))
            .count()
    }

    #[tokio::test]
    async fn concert_two_weeks_out_sends_once_across_runs() {
        let sheets = HashMap::from([
            ("concerts-sheet".to_string(), vec![concert_row("c-001", "")]),
            ("interviews-sheet".to_string(), vec![]),
        ]);
        let store = Arc::new(InMemoryTrackingStore::new());
        let (engine, _, subjects) = engine_with(sheets.clone(), Arc::clone(&store), false);

        // Exactly 14 days before the show.
        let now = tz().with_ymd_and_hms(2026, 9, 1, 20, 0, 0).single().unwrap();
        let summary = engine.run(TriggerType::Morning, now).await;

        assert_eq!(summary.concerts.events_seen, 1);
        assert_eq!(summary.concerts.notifications_sent, 1);
        assert_eq!(sent_reminders(&subjects), 1);

        // A minute later, same content: dedup suppresses the send.
        let (engine, _, subjects2) = engine_with(sheets, store, false);
        let now = tz().with_ymd_and_hms(2026, 9, 1, 20, 1, 0).single().unwrap();
        let summary = engine.run(TriggerType::Morning, now).await;

        assert_eq!(summary.concerts.notifications_sent, 0);
        assert_eq!(summary.concerts.notifications_skipped, 1);
        assert_eq!(sent_reminders(&subjects2), 0);
    }

    #[tokio::test]
    async fn study_topic_edit_resends_the_bucket() {
        let store = Arc::new(InMemoryTrackingStore::new());
        let base = HashMap::from([
            ("concerts-sheet".to_string(), vec![]),
            ("interviews-sheet".to_string(), vec![]),
            ("study-sheet".to_string(), vec![study_row("s-001", "Consensus")]),
        ]);
        let now = tz().with_ymd_and_hms(2026, 9, 4, 18, 30, 0).single().unwrap();

        let (engine, _, subjects) = engine_with(base, Arc::clone(&store), false);
        let summary = engine.run(TriggerType::EveningCheck, now).await;
        assert_eq!(summary.study.notifications_sent, 1);
        assert_eq!(sent_reminders(&subjects), 1);

        // Topic edited between runs: the hash changes and the bucket re-arms.
        let edited = HashMap::from([
            ("concerts-sheet".to_string(), vec![]),
            ("interviews-sheet".to_string(), vec![]),
            ("study-sheet".to_string(), vec![study_row("s-001", "Paxos deep dive")]),
        ]);
        let (engine, _, subjects2) = engine_with(edited, store, false);
        let summary = engine.run(TriggerType::EveningCheck, now).await;
        assert_eq!(summary.study.notifications_sent, 1);
        assert_eq!(summary.study.notifications_skipped, 0);
        assert_eq!(sent_reminders(&subjects2), 1);
    }

    #[tokio::test]
    async fn malformed_row_does_not_abort_the_batch() {
        let sheets = HashMap::from([
            (
                "concerts-sheet".to_string(),
                vec![
                    vec!["c-bad".to_string(), "Band".to_string()],
                    concert_row("c-002", ""),
                ],
            ),
            ("interviews-sheet".to_string(), vec![]),
        ]);
        let store = Arc::new(InMemoryTrackingStore::new());
        let (engine, _, _) = engine_with(sheets, store, false);

        let now = tz().with_ymd_and_hms(2026, 9, 1, 20, 0, 0).single().unwrap();
        let summary = engine.run(TriggerType::Morning, now).await;

        assert_eq!(summary.concerts.events_seen, 1);
        assert_eq!(summary.concerts.notifications_sent, 1);
        assert_eq!(summary.errors_by_kind.get("malformed_row"), Some(&1));
    }

    #[tokio::test]
    async fn unreachable_source_skips_only_that_source() {
        // No concerts sheet configured in the fake: the fetch fails.
        let sheets = HashMap::from([(
            "interviews-sheet".to_string(),
            vec![vec![
                "i-001".to_string(),
                "Acme".to_string(),
                "Engineer".to_string(),
                "2026-09-08".to_string(),
                "10:00".to_string(),
                "Ada".to_string(),
                "final".to_string(),
            ]],
        )]);
        let store = Arc::new(InMemoryTrackingStore::new());
        let (engine, _, _) = engine_with(sheets, store, false);

        // Exactly one week before the interview.
        let now = tz().with_ymd_and_hms(2026, 9, 1, 10, 0, 0).single().unwrap();
        let summary = engine.run(TriggerType::Morning, now).await;

        assert_eq!(summary.errors_by_kind.get("source_unavailable"), Some(&1));
        assert_eq!(summary.interviews.notifications_sent, 1);
    }

    #[tokio::test]
    async fn study_sheet_not_read_outside_evening_check() {
        let sheets = HashMap::from([
            ("concerts-sheet".to_string(), vec![]),
            ("interviews-sheet".to_string(), vec![]),
            ("study-sheet".to_string(), vec![study_row("s-001", "Consensus")]),
        ]);
        let store = Arc::new(InMemoryTrackingStore::new());
        let (engine, reader, _) = engine_with(sheets, store, false);

        let now = tz().with_ymd_and_hms(2026, 9, 4, 9, 0, 0).single().unwrap();
        let summary = engine.run(TriggerType::Morning, now).await;

        assert!(summary.study.skipped);
        assert!(!reader.fetched().contains(&"study-sheet".to_string()));
    }

    #[tokio::test]
    async fn undelivered_notification_is_not_marked() {
        let sheets = HashMap::from([
            ("concerts-sheet".to_string(), vec![concert_row("c-001", "")]),
            ("interviews-sheet".to_string(), vec![]),
        ]);
        let store = Arc::new(InMemoryTrackingStore::new());
        let now = tz().with_ymd_and_hms(2026, 9, 1, 20, 0, 0).single().unwrap();

        // Every channel down: nothing delivered, nothing marked.
        let (engine, _, _) = engine_with(sheets.clone(), Arc::clone(&store), true);
        let summary = engine.run(TriggerType::Morning, now).await;
        assert_eq!(summary.concerts.notifications_sent, 0);
        assert_eq!(summary.errors_by_kind.get("channel_send"), Some(&1));

        // Channel restored: the bucket is still eligible and goes out.
        let (engine, _, subjects) = engine_with(sheets, store, false);
        let summary = engine.run(TriggerType::Morning, now).await;
        assert_eq!(summary.concerts.notifications_sent, 1);
        assert_eq!(sent_reminders(&subjects), 1);
    }
}
