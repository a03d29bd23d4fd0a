//! Event normalization.
//!
//! Maps heterogeneous source rows into the canonical [`Event`] envelope and
//! computes the content hash that guards notification state against stale
//! source data.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use sha2::{Digest, Sha256};

use crate::models::{Event, EventKind, EventPayload};
use crate::{Error, Result};

/// Local hour a study session is anchored at when its row carries no time.
const STUDY_ANCHOR_HOUR: u32 = 9;

/// Parse one sheet row into a canonical event.
///
/// Missing required columns, a blank id, or an unparseable date/time fail
/// with `MalformedRow`; the caller skips the row and continues the batch.
pub fn normalize(row: &[String], kind: EventKind, tz: Tz) -> Result<Event> {
    match kind {
        EventKind::Concert => normalize_concert(row, tz),
        EventKind::Interview => normalize_interview(row, tz),
        EventKind::Study => normalize_study(row, tz),
    }
}

fn normalize_concert(row: &[String], tz: Tz) -> Result<Event> {
    if row.len() < 6 {
        return Err(short_row(row, EventKind::Concert, 6));
    }

    let event_id = required(row, 0, "event_id")?;
    let band = field(row, 1);
    let venue = field(row, 2);
    let date = required(row, 3, "date")?;
    let time = required(row, 4, "time")?;
    let location = field(row, 5);
    let notes = field(row, 7);

    let starts_at = parse_local(&date, Some(&time), tz)?;
    let content_hash = content_hash(&[
        EventKind::Concert.as_str(),
        &date,
        &time,
        &band,
        &venue,
        &location,
        &notes,
    ]);

    Ok(Event {
        event_id,
        kind: EventKind::Concert,
        starts_at,
        content_hash,
        payload: EventPayload::Concert {
            band,
            venue,
            location,
            notes,
        },
    })
}

fn normalize_interview(row: &[String], tz: Tz) -> Result<Event> {
    if row.len() < 7 {
        return Err(short_row(row, EventKind::Interview, 7));
    }

    let event_id = required(row, 0, "event_id")?;
    let company = field(row, 1);
    let position = field(row, 2);
    let date = required(row, 3, "date")?;
    let time = required(row, 4, "time")?;
    let interviewer = field(row, 5);
    let stage = field(row, 6);
    let prep_notes = field(row, 8);

    let starts_at = parse_local(&date, Some(&time), tz)?;
    let content_hash = content_hash(&[
        EventKind::Interview.as_str(),
        &date,
        &time,
        &company,
        &position,
        &interviewer,
        &stage,
        &prep_notes,
    ]);

    Ok(Event {
        event_id,
        kind: EventKind::Interview,
        starts_at,
        content_hash,
        payload: EventPayload::Interview {
            company,
            position,
            interviewer,
            stage,
            prep_notes,
        },
    })
}

fn normalize_study(row: &[String], tz: Tz) -> Result<Event> {
    if row.len() < 6 {
        return Err(short_row(row, EventKind::Study, 6));
    }

    let event_id = required(row, 0, "event_id")?;
    let course = field(row, 1);
    let topic = field(row, 2);
    let date = required(row, 3, "date")?;
    let duration = field(row, 4);
    let priority = field(row, 5);
    let resources = field(row, 7);

    // Study rows carry no time column; sessions are anchored mid-morning so
    // the evening-before bucket and the expiry check have a concrete instant.
    let starts_at = parse_local(&date, None, tz)?;
    let content_hash = content_hash(&[
        EventKind::Study.as_str(),
        &date,
        &course,
        &topic,
        &duration,
        &priority,
        &resources,
    ]);

    Ok(Event {
        event_id,
        kind: EventKind::Study,
        starts_at,
        content_hash,
        payload: EventPayload::Study {
            course,
            topic,
            duration,
            priority,
            resources,
        },
    })
}

/// Deterministic 128-bit hex hash over the canonical field sequence.
///
/// Fields are trimmed and joined with a separator byte, so reordering data
/// between fields or whitespace-only edits cannot collide or spuriously
/// change the hash.
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.trim().as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

fn field(row: &[String], idx: usize) -> String {
    row.get(idx).map(|v| v.trim().to_string()).unwrap_or_default()
}

fn required(row: &[String], idx: usize, name: &str) -> Result<String> {
    let value = field(row, idx);
    if value.is_empty() {
        return Err(Error::MalformedRow(format!("missing {}", name)));
    }
    Ok(value)
}

fn short_row(row: &[String], kind: EventKind, expected: usize) -> Error {
    Error::MalformedRow(format!(
        "{} row has {} columns, expected at least {}",
        kind,
        row.len(),
        expected
    ))
}

fn parse_local(date: &str, time: Option<&str>, tz: Tz) -> Result<DateTime<Tz>> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| Error::MalformedRow(format!("invalid date '{}': {}", date, e)))?;

    let time = match time {
        Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|e| Error::MalformedRow(format!("invalid time '{}': {}", raw, e)))?,
        None => NaiveTime::from_hms_opt(STUDY_ANCHOR_HOUR, 0, 0)
            .ok_or_else(|| Error::MalformedRow("invalid anchor time".to_string()))?,
    };

    tz.from_local_datetime(&date.and_time(time))
        .single()
        .ok_or_else(|| {
            Error::MalformedRow(format!("ambiguous local time {} {} in {}", date, time, tz))
        })
}
