//! Notification dispatch.
//!
//! Sends a rendered notification to every configured channel independently:
//! one channel failing never blocks the others, and the send counts as
//! delivered when at least one channel succeeded. Only delivered
//! notifications get marked in the tracking store.

use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use serde_json::Value;
use tracing::{info, warn};

use crate::format;
use crate::models::{Event, RunSummary};
use crate::{Error, Result};

/// A formatted notification, rendered once and fanned out per channel.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    /// Discord webhook payload (embed)
    pub discord: Value,
}

/// An opaque send sink. Implementations own their transport and timeouts.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Email channel backed by an SNS topic.
pub struct EmailChannel {
    sns: SnsClient,
    topic_arn: String,
}

impl EmailChannel {
    pub fn new(sns: SnsClient, topic_arn: impl Into<String>) -> Self {
        Self {
            sns,
            topic_arn: topic_arn.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sns
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(&notification.subject)
            .message(&notification.body)
            .send()
            .await
            .map_err(|e| {
                Error::ChannelSend(format!("SNS publish failed: {}", e.into_service_error()))
            })?;

        Ok(())
    }
}

/// Chat channel backed by a Discord webhook.
pub struct DiscordChannel {
    http: reqwest::Client,
    webhook_url: String,
}

impl DiscordChannel {
    pub fn new(http: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            http,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&notification.discord)
            .send()
            .await
            .map_err(|e| Error::ChannelSend(format!("Discord webhook failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::ChannelSend(format!(
                "Discord webhook returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Per-channel results of one dispatch.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl DispatchOutcome {
    /// The policy gate for marking the tracking record: at least one channel
    /// accepted the notification.
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Fans a rendered notification out to the configured channels.
pub struct Dispatcher {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    /// Format and send the notification for one due bucket.
    pub async fn dispatch(&self, event: &Event, bucket: &str) -> DispatchOutcome {
        let notification = format::render_event(event, bucket);
        let outcome = self.broadcast(&notification).await;
        info!(
            event_id = %event.event_id,
            bucket,
            delivered = ?outcome.delivered,
            failed = outcome.failed.len(),
            "Dispatched notification"
        );
        outcome
    }

    /// Send the end-of-run summary notification.
    pub async fn dispatch_summary(&self, summary: &RunSummary) -> DispatchOutcome {
        let notification = format::render_summary(summary);
        self.broadcast(&notification).await
    }

    async fn broadcast(&self, notification: &Notification) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for channel in &self.channels {
            match channel.send(notification).await {
                Ok(()) => outcome.delivered.push(channel.name()),
                Err(e) => {
                    warn!(channel = channel.name(), error = %e, "Channel send failed");
                    outcome.failed.push((channel.name(), e.to_string()));
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventKind, EventPayload};
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct StaticChannel {
        name: &'static str,
        fail: bool,
        sent: Arc<AtomicU32>,
    }

    #[async_trait]
    impl NotificationChannel for StaticChannel {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, _notification: &Notification) -> Result<()> {
            if self.fail {
                return Err(Error::ChannelSend("boom".to_string()));
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event() -> Event {
        let tz: Tz = "America/Lima".parse().unwrap();
        Event {
            event_id: "i-001".to_string(),
            kind: EventKind::Interview,
            starts_at: tz.with_ymd_and_hms(2026, 9, 1, 10, 0, 0).single().unwrap(),
            content_hash: "abc".to_string(),
            payload: EventPayload::Interview {
                company: "Acme".to_string(),
                position: "Engineer".to_string(),
                interviewer: "Ada".to_string(),
                stage: "final".to_string(),
                prep_notes: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_the_other() {
        let sent = Arc::new(AtomicU32::new(0));
        let dispatcher = Dispatcher::new(vec![
            Box::new(StaticChannel {
                name: "email",
                fail: true,
                sent: Arc::clone(&sent),
            }),
            Box::new(StaticChannel {
                name: "discord",
                fail: false,
                sent: Arc::clone(&sent),
            }),
        ]);

        let outcome = dispatcher.dispatch(&event(), "1_day_before").await;
        assert!(outcome.any_delivered());
        assert_eq!(outcome.delivered, vec!["discord"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_channels_failing_is_not_delivered() {
        let sent = Arc::new(AtomicU32::new(0));
        let dispatcher = Dispatcher::new(vec![
            Box::new(StaticChannel {
                name: "email",
                fail: true,
                sent: Arc::clone(&sent),
            }),
            Box::new(StaticChannel {
                name: "discord",
                fail: true,
                sent: Arc::clone(&sent),
            }),
        ]);

        let outcome = dispatcher.dispatch(&event(), "1_hour_before").await;
        assert!(!outcome.any_delivered());
        assert_eq!(outcome.failed.len(), 2);
    }
}
