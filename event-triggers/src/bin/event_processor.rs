//! Event Processor Lambda - Checks spreadsheet sources and sends reminders.
//!
//! This Lambda runs on EventBridge schedules (morning, afternoon, evening,
//! hourly-urgent) and on manual test invocations. Each run:
//! 1. Reads upcoming events from the concerts, interviews, and study sheets
//! 2. Computes which lead-time buckets are due right now
//! 3. Deduplicates against the DynamoDB tracking table
//! 4. Sends due notifications to the SNS topic and the Discord webhook
//! 5. Returns a structured run summary

use std::sync::Arc;
use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_secretsmanager::Client as SecretsClient;
use aws_sdk_sns::Client as SnsClient;
use chrono::Utc;
use chrono_tz::Tz;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shared::{
    secrets, CalendarClient, Config, DiscordChannel, Dispatcher, DynamoTrackingStore,
    EmailChannel, Engine, GoogleAuth, SheetsClient, SourceReader, TrackingStore, TriggerType,
};

/// EventBridge schedule payload, also accepted from manual invocations.
#[derive(Debug, Deserialize)]
struct TriggerEvent {
    #[serde(default)]
    trigger_type: String,
    /// Set by manual test invocations; ignored beyond logging
    #[serde(default)]
    test: bool,
}

#[derive(Debug, Serialize)]
struct ProcessorResponse {
    status_code: u16,
    body: String,
}

struct AppState {
    engine: Engine,
    timezone: Tz,
}

impl AppState {
    async fn new() -> Result<Self, shared::Error> {
        let config = Config::from_env()?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(Duration::from_secs(10))
                    .operation_attempt_timeout(Duration::from_secs(5))
                    .build(),
            )
            .load()
            .await;

        let secrets_client = SecretsClient::new(&aws_config);
        let account =
            secrets::get_google_service_account(&secrets_client, &config.google_credentials_arn)
                .await?;
        let webhook_url =
            secrets::get_secret(&secrets_client, &config.discord_webhook_arn).await?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| shared::Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        let auth = Arc::new(GoogleAuth::new(http.clone(), account));
        let reader = Arc::new(SheetsClient::new(http.clone(), Arc::clone(&auth)));
        let store = Arc::new(DynamoTrackingStore::new(
            DynamoClient::new(&aws_config),
            &config.tracking_table,
        ));

        let dispatcher = Dispatcher::new(vec![
            Box::new(EmailChannel::new(
                SnsClient::new(&aws_config),
                &config.sns_topic_arn,
            )),
            Box::new(DiscordChannel::new(http.clone(), webhook_url)),
        ]);

        let calendar = config
            .calendar_id
            .as_ref()
            .map(|id| CalendarClient::new(http.clone(), Arc::clone(&auth), id));

        let timezone = config.timezone;
        let engine = Engine::new(
            config,
            reader as Arc<dyn SourceReader>,
            store as Arc<dyn TrackingStore>,
            dispatcher,
            calendar,
        );

        Ok(Self { engine, timezone })
    }
}

async fn handler(
    state: Arc<AppState>,
    event: LambdaEvent<TriggerEvent>,
) -> Result<ProcessorResponse, Error> {
    let trigger = TriggerType::parse(&event.payload.trigger_type);
    if event.payload.test {
        info!("Manual test invocation");
    }

    let now = Utc::now().with_timezone(&state.timezone);
    let summary = state.engine.run(trigger, now).await;

    Ok(ProcessorResponse {
        status_code: 200,
        body: serde_json::to_string(&summary)?,
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    match AppState::new().await {
        Ok(state) => {
            let state = Arc::new(state);
            run(service_fn(move |event| {
                let state = Arc::clone(&state);
                async move { handler(state, event).await }
            }))
            .await
        }
        Err(e) => {
            // Missing configuration or credentials is fatal for the run but
            // still reported as a structured response.
            error!(error = %e, "Initialization failed");
            let message = e.to_string();
            run(service_fn(move |_event: LambdaEvent<TriggerEvent>| {
                let message = message.clone();
                async move {
                    Ok::<_, Error>(ProcessorResponse {
                        status_code: 500,
                        body: serde_json::json!({
                            "error": message,
                            "error_kind": "configuration",
                        })
                        .to_string(),
                    })
                }
            }))
            .await
        }
    }
}
