//! Message formatting.
//!
//! Renders one notification per (event kind, bucket) combination: a
//! subject + plaintext body for the email topic and an embed payload for the
//! Discord webhook.

use chrono::Utc;
use serde_json::{json, Value};

use crate::models::{Event, EventPayload, RunSummary};
use crate::notify::Notification;

const COLOR_CONCERT: u32 = 0xFF0000;
const COLOR_INTERVIEW: u32 = 0x0099FF;
const COLOR_STUDY: u32 = 0x00FF00;

/// Render the notification for one due bucket of an event.
pub fn render_event(event: &Event, bucket: &str) -> Notification {
    Notification {
        subject: subject_line(event, bucket),
        body: email_body(event, bucket),
        discord: discord_embed(event, bucket),
    }
}

fn subject_line(event: &Event, bucket: &str) -> String {
    match &event.payload {
        EventPayload::Concert { band, .. } => match bucket {
            "2_weeks_before" => format!("🎸 Concert in two weeks - {}", band),
            "1_day_before" => format!("🎸 Tomorrow: {} live", band),
            "4_hours_before" => format!("⏰ In four hours - {}", band),
            _ => format!("🔔 Upcoming concert - {}", band),
        },
        EventPayload::Interview { company, .. } => match bucket {
            "1_week_before" => format!("💼 Interview in one week - {}", company),
            "1_day_before" => format!("💼 Tomorrow: interview with {}", company),
            "1_hour_before" => format!("⏰ In one hour - interview with {}", company),
            _ => format!("🔔 Upcoming interview - {}", company),
        },
        EventPayload::Study { course, .. } => match bucket {
            "1_day_before_6pm" => format!("📚 Study reminder - {}", course),
            _ => format!("🔔 Upcoming study session - {}", course),
        },
    }
}

fn email_body(event: &Event, bucket: &str) -> String {
    let date = event.starts_at.format("%Y-%m-%d");
    let time = event.starts_at.format("%H:%M");

    match &event.payload {
        EventPayload::Concert {
            band,
            venue,
            location,
            notes,
        } => {
            let mut body = format!(
                "Upcoming concert:\n\n\
                 Artist: {}\nVenue: {}\nDate: {}\nTime: {}\nLocation: {}\n",
                band, venue, date, time, location
            );
            if bucket == "1_day_before" {
                body.push_str(
                    "\nCheck before tomorrow:\n\
                     - Tickets downloaded or printed\n\
                     - Transport to the venue\n\
                     - Arrival time\n",
                );
            }
            if bucket == "4_hours_before" {
                body.push_str("\nAlmost time - leave early and charge your phone.\n");
            }
            if !notes.is_empty() {
                body.push_str(&format!("\nNotes: {}\n", notes));
            }
            body
        }
        EventPayload::Interview {
            company,
            position,
            interviewer,
            stage,
            prep_notes,
        } => {
            let mut body = format!(
                "Scheduled interview:\n\n\
                 Company: {}\nPosition: {}\nDate: {}\nTime: {}\n\
                 Interviewer: {}\nStage: {}\n",
                company, position, date, time, interviewer, stage
            );
            if bucket == "1_day_before" {
                body.push_str(
                    "\nLast checks:\n\
                     - Meeting link, if remote\n\
                     - Documents you may need\n\
                     - Questions you want to ask\n",
                );
            }
            if bucket == "1_hour_before" {
                body.push_str("\nOne hour to go - water, notes, quiet room.\n");
            }
            if !prep_notes.is_empty() {
                body.push_str(&format!("\nPreparation: {}\n", prep_notes));
            }
            body
        }
        EventPayload::Study {
            course,
            topic,
            duration,
            priority,
            resources,
        } => {
            let mut body = format!(
                "Study session scheduled for tomorrow:\n\n\
                 Course: {}\nTopic: {}\nDate: {}\nDuration: {}\nPriority: {}\n",
                course, topic, date, duration, priority
            );
            if !resources.is_empty() {
                body.push_str(&format!("\nResources: {}\n", resources));
            }
            body
        }
    }
}

fn discord_embed(event: &Event, bucket: &str) -> Value {
    let date = event.starts_at.format("%Y-%m-%d").to_string();
    let time = event.starts_at.format("%H:%M").to_string();

    let (title, color, fields) = match &event.payload {
        EventPayload::Concert {
            band,
            venue,
            location,
            notes,
        } => {
            let mut fields = vec![
                field("🎤 Artist", band, true),
                field("📍 Venue", venue, true),
                field("📅 Date", &date, true),
                field("🕒 Time", &time, true),
                field("🌎 Location", location, false),
            ];
            if !notes.is_empty() {
                fields.push(field("📝 Notes", notes, false));
            }
            ("🎸 Concert reminder", COLOR_CONCERT, fields)
        }
        EventPayload::Interview {
            company,
            position,
            interviewer,
            stage,
            prep_notes,
        } => {
            let mut fields = vec![
                field("🏢 Company", company, true),
                field("👔 Position", position, true),
                field("📅 Date", &date, true),
                field("🕒 Time", &time, true),
                field("👤 Interviewer", interviewer, true),
                field("📊 Stage", stage, true),
            ];
            if !prep_notes.is_empty() {
                fields.push(field("📝 Preparation", prep_notes, false));
            }
            ("💼 Interview reminder", COLOR_INTERVIEW, fields)
        }
        EventPayload::Study {
            course,
            topic,
            duration,
            priority,
            resources,
        } => {
            let mut fields = vec![
                field("📖 Course", course, true),
                field("📝 Topic", topic, true),
                field("📅 Date", &date, true),
                field("⏱️ Duration", duration, true),
                field("⭐ Priority", priority, true),
            ];
            if !resources.is_empty() {
                fields.push(field("🔗 Resources", resources, false));
            }
            ("📚 Study reminder", COLOR_STUDY, fields)
        }
    };

    json!({
        "embeds": [{
            "title": title,
            "color": color,
            "fields": fields,
            "footer": {
                "text": format!(
                    "Event ID: {} | {}",
                    event.event_id,
                    humanize_label(bucket)
                )
            },
            "timestamp": Utc::now().to_rfc3339(),
        }]
    })
}

/// Render the end-of-run summary notification (evening check).
pub fn render_summary(summary: &RunSummary) -> Notification {
    let body = format!(
        "Run summary ({}):\n\n\
         Events seen: {}\n\
         Notifications sent: {}\n\
         Already sent, skipped: {}\n\n\
         Breakdown:\n\
         - Concerts: {} sent\n\
         - Interviews: {} sent\n\
         - Study: {} sent\n\n\
         Errors: {}\n",
        summary.execution_time,
        summary.total_events_seen,
        summary.total_notifications_sent,
        summary.total_notifications_skipped,
        summary.concerts.notifications_sent,
        summary.interviews.notifications_sent,
        summary.study.notifications_sent,
        summary.errors_by_kind.values().sum::<u32>(),
    );

    let discord = json!({
        "embeds": [{
            "title": "📊 Daily summary",
            "color": 0x808080,
            "fields": [
                field("Events seen", &summary.total_events_seen.to_string(), true),
                field("Sent", &summary.total_notifications_sent.to_string(), true),
                field("Skipped", &summary.total_notifications_skipped.to_string(), true),
            ],
            "timestamp": Utc::now().to_rfc3339(),
        }]
    });

    Notification {
        subject: format!("📊 Daily summary - {}", summary.trigger_type),
        body,
        discord,
    }
}

fn field(name: &str, value: &str, inline: bool) -> Value {
    let value = if value.is_empty() { "N/A" } else { value };
    json!({ "name": name, "value": value, "inline": inline })
}

fn humanize_label(bucket: &str) -> String {
    bucket.replace('_', " ")
}
