//! Google Calendar mirror.
//!
//! When an event first notifies, it is mirrored into a Google Calendar so it
//! shows up alongside everything else. The mirror is strictly best-effort:
//! failures are logged and never affect the dispatch or dedup outcome.

use std::sync::Arc;

use chrono::Duration;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::google_auth::GoogleAuth;
use crate::models::{Event, EventKind, EventPayload};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<CalendarItem>,
}

#[derive(Debug, Deserialize)]
struct CalendarItem {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct InsertedEvent {
    id: String,
}

/// Client for the Google Calendar v3 events API.
pub struct CalendarClient {
    http: reqwest::Client,
    auth: Arc<GoogleAuth>,
    calendar_id: String,
}

impl CalendarClient {
    pub fn new(http: reqwest::Client, auth: Arc<GoogleAuth>, calendar_id: impl Into<String>) -> Self {
        Self {
            http,
            auth,
            calendar_id: calendar_id.into(),
        }
    }

    /// Mirror the event unless a calendar entry tagged with its id exists.
    /// Returns the created calendar event id, or `None` when already present.
    pub async fn mirror(&self, event: &Event) -> Result<Option<String>> {
        if self.event_exists(&event.event_id).await? {
            return Ok(None);
        }
        let id = self.insert_event(event).await?;
        info!(event_id = %event.event_id, calendar_event = %id, "Mirrored event to calendar");
        Ok(Some(id))
    }

    /// Search the calendar for an entry whose description carries this
    /// event id.
    async fn event_exists(&self, event_id: &str) -> Result<bool> {
        let url = format!(
            "https://www.googleapis.com/calendar/v3/calendars/{}/events?q={}&maxResults=10&singleEvents=true",
            urlencoding::encode(&self.calendar_id),
            urlencoding::encode(event_id)
        );

        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| Error::ChannelSend(format!("Calendar search failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::ChannelSend(format!(
                "Calendar search returned {}",
                response.status()
            )));
        }

        let list: EventList = response
            .json()
            .await
            .map_err(|e| Error::ChannelSend(format!("Invalid calendar response: {}", e)))?;

        Ok(list.items.iter().any(|item| item.description.contains(event_id)))
    }

    async fn insert_event(&self, event: &Event) -> Result<String> {
        let url = format!(
            "https://www.googleapis.com/calendar/v3/calendars/{}/events",
            urlencoding::encode(&self.calendar_id)
        );

        let end = event.starts_at + default_duration(event.kind);
        let timezone = event.starts_at.timezone().name();

        let body = json!({
            "summary": summary(event),
            "location": location(event),
            "description": description(event),
            "start": { "dateTime": event.starts_at.to_rfc3339(), "timeZone": timezone },
            "end": { "dateTime": end.to_rfc3339(), "timeZone": timezone },
            "reminders": {
                "useDefault": false,
                "overrides": [
                    { "method": "popup", "minutes": 24 * 60 },
                    { "method": "popup", "minutes": 60 },
                ],
            },
        });

        let token = self.auth.access_token().await?;
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ChannelSend(format!("Calendar insert failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ChannelSend(format!(
                "Calendar insert returned {}: {}",
                status, body
            )));
        }

        let created: InsertedEvent = response
            .json()
            .await
            .map_err(|e| Error::ChannelSend(format!("Invalid calendar response: {}", e)))?;

        Ok(created.id)
    }
}

fn default_duration(kind: EventKind) -> Duration {
    match kind {
        EventKind::Concert => Duration::hours(3),
        EventKind::Interview => Duration::hours(1),
        EventKind::Study => Duration::hours(2),
    }
}

fn summary(event: &Event) -> String {
    match &event.payload {
        EventPayload::Concert { band, .. } => format!("🎸 {}", band),
        EventPayload::Interview { company, .. } => format!("💼 Interview - {}", company),
        EventPayload::Study { topic, .. } => format!("📚 Study - {}", topic),
    }
}

fn location(event: &Event) -> String {
    match &event.payload {
        EventPayload::Concert { venue, .. } => venue.clone(),
        EventPayload::Interview { .. } => "Virtual/Office".to_string(),
        EventPayload::Study { .. } => "Home".to_string(),
    }
}

fn description(event: &Event) -> String {
    let details = match &event.payload {
        EventPayload::Concert {
            band,
            venue,
            location,
            notes,
        } => format!(
            "Concert: {}\nVenue: {}\nLocation: {}\nNotes: {}",
            band, venue, location, notes
        ),
        EventPayload::Interview {
            company,
            position,
            interviewer,
            stage,
            prep_notes,
        } => format!(
            "Interview\nCompany: {}\nPosition: {}\nInterviewer: {}\nStage: {}\n\nPreparation: {}",
            company, position, interviewer, stage, prep_notes
        ),
        EventPayload::Study {
            course,
            topic,
            duration,
            priority,
            resources,
        } => format!(
            "Study session\nCourse: {}\nTopic: {}\nDuration: {}\nPriority: {}\n\nResources: {}",
            course, topic, duration, priority, resources
        ),
    };

    format!("{}\n\nEvent ID: {}", details, event.event_id)
}
