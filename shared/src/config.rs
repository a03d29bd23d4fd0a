//! Configuration management for the notifier Lambda.

use std::env;

use chrono_tz::Tz;

use crate::models::EventKind;
use crate::{Error, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment environment name (dev, prod)
    pub environment: String,
    /// Reference timezone for source dates and lead-time buckets
    pub timezone: Tz,
    /// Spreadsheet id for the concerts sheet
    pub concerts_sheet_id: String,
    /// Spreadsheet id for the interviews sheet
    pub interviews_sheet_id: String,
    /// Spreadsheet id for the study schedule sheet
    pub study_sheet_id: String,
    /// DynamoDB table tracking sent notifications
    pub tracking_table: String,
    /// SNS topic for email notifications
    pub sns_topic_arn: String,
    /// ARN of the secret holding the Google service-account JSON
    pub google_credentials_arn: String,
    /// ARN of the secret holding the Discord webhook URL
    pub discord_webhook_arn: String,
    /// Calendar to mirror notified events into (disabled when unset)
    pub calendar_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let timezone_name =
            env::var("TIMEZONE").unwrap_or_else(|_| "America/Lima".to_string());
        let timezone = timezone_name
            .parse::<Tz>()
            .map_err(|_| Error::Config(format!("unknown timezone: {}", timezone_name)))?;

        Ok(Self {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()),
            timezone,
            concerts_sheet_id: require_var("CONCERTS_SHEET_ID")?,
            interviews_sheet_id: require_var("INTERVIEWS_SHEET_ID")?,
            study_sheet_id: require_var("STUDY_SHEET_ID")?,
            tracking_table: require_var("TRACKING_TABLE")?,
            sns_topic_arn: require_var("SNS_TOPIC_ARN")?,
            google_credentials_arn: require_var("GOOGLE_CREDENTIALS")?,
            discord_webhook_arn: require_var("DISCORD_WEBHOOK")?,
            calendar_id: env::var("GOOGLE_CALENDAR_ID").ok().filter(|v| !v.is_empty()),
        })
    }

    /// Spreadsheet id for a source.
    pub fn sheet_id(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Concert => &self.concerts_sheet_id,
            EventKind::Interview => &self.interviews_sheet_id,
            EventKind::Study => &self.study_sheet_id,
        }
    }
}

fn require_var(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("{} not set", name)))
}
