//! Lead-time scheduling.
//!
//! Decides, for one event and the current instant, which notification
//! buckets are due. A bucket is due when `now` falls inside
//! `[notify_at, notify_at + tolerance)`: inclusive lower bound, exclusive
//! upper bound, so adjacent runs sharing a boundary cannot both fire it.

use chrono::{DateTime, Days, Duration, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::models::{Event, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketTiming {
    /// Notify this long before the event starts
    Offset(Duration),
    /// Notify at a fixed local hour on the day before the event
    EveningBefore { hour: u32 },
}

/// One lead-time threshold of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub label: &'static str,
    timing: BucketTiming,
}

impl Bucket {
    const fn offset(label: &'static str, offset: Duration) -> Self {
        Self {
            label,
            timing: BucketTiming::Offset(offset),
        }
    }

    const fn evening_before(label: &'static str, hour: u32) -> Self {
        Self {
            label,
            timing: BucketTiming::EveningBefore { hour },
        }
    }

    /// The instant this bucket wants to notify at, in the event's timezone.
    ///
    /// Returns `None` when the local wall-clock time does not exist or is
    /// ambiguous (DST transitions); such a bucket is silently not due.
    pub fn notify_at(&self, starts_at: DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self.timing {
            BucketTiming::Offset(offset) => Some(starts_at - offset),
            BucketTiming::EveningBefore { hour } => {
                let day = starts_at.date_naive().checked_sub_days(Days::new(1))?;
                let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
                starts_at
                    .timezone()
                    .from_local_datetime(&day.and_time(time))
                    .single()
            }
        }
    }
}

/// Ordered lead-time thresholds for one event kind. Fixed configuration,
/// never derived from persisted state.
#[derive(Debug, Clone)]
pub struct LeadTimePolicy {
    buckets: Vec<Bucket>,
}

impl LeadTimePolicy {
    pub fn for_kind(kind: EventKind) -> Self {
        let buckets = match kind {
            EventKind::Concert => vec![
                Bucket::offset("2_weeks_before", Duration::days(14)),
                Bucket::offset("1_day_before", Duration::days(1)),
                Bucket::offset("4_hours_before", Duration::hours(4)),
            ],
            EventKind::Interview => vec![
                Bucket::offset("1_week_before", Duration::days(7)),
                Bucket::offset("1_day_before", Duration::days(1)),
                Bucket::offset("1_hour_before", Duration::hours(1)),
            ],
            EventKind::Study => vec![Bucket::evening_before("1_day_before_6pm", 18)],
        };
        Self { buckets }
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }
}

/// All buckets due for this event at `now`.
///
/// Every currently-due bucket is returned and sent independently in the same
/// run. Events already started (or past) are never due.
pub fn due_buckets<'a>(
    event: &Event,
    policy: &'a LeadTimePolicy,
    now: DateTime<Tz>,
    tolerance: Duration,
) -> Vec<&'a Bucket> {
    if event.starts_at <= now {
        return Vec::new();
    }

    policy
        .buckets()
        .iter()
        .filter(|bucket| {
            bucket
                .notify_at(event.starts_at)
                .map(|at| at <= now && now < at + tolerance)
                .unwrap_or(false)
        })
        .collect()
}
