//! Shared library for the agenda notifier Lambda functions.
//!
//! This crate provides the event-processing engine and the clients it is
//! wired from: Google Sheets source reading, event normalization, lead-time
//! scheduling, the DynamoDB notification-tracking store, and the
//! email/Discord dispatcher.

pub mod calendar;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod google_auth;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod schedule;
pub mod secrets;
pub mod sheets;
pub mod store;

pub use calendar::CalendarClient;
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use google_auth::GoogleAuth;
pub use models::{Event, EventKind, EventPayload, RunSummary, SourceSummary, TriggerType};
pub use notify::{Dispatcher, DiscordChannel, EmailChannel, Notification, NotificationChannel};
pub use schedule::{due_buckets, Bucket, LeadTimePolicy};
pub use secrets::{get_secret, GoogleServiceAccount};
pub use sheets::{SheetsClient, SourceReader};
pub use store::{DynamoTrackingStore, InMemoryTrackingStore, MarkOutcome, TrackingStore};
