//! Notification tracking store.
//!
//! Persists, per `(event_id, event_type)`, which lead-time buckets have been
//! sent for the event's current content hash. The conditional bucket write
//! is the only cross-invocation concurrency control in the system: two
//! overlapping runs racing on the same bucket resolve to exactly one
//! `Recorded` and one `Conflict`.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::EventKind;
use crate::{Error, Result};

/// Result of a `mark_sent` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// This invocation recorded the send
    Recorded,
    /// A concurrent invocation already recorded the same bucket and hash;
    /// the caller must not retry the send in this run
    Conflict,
}

/// Dedup state client.
///
/// Callers follow the send-then-mark order: a notification is dispatched
/// first and marked after, so a crash between the two duplicates on the next
/// run rather than dropping the notification. A store failure on the read
/// side skips dispatch entirely; never send what cannot be marked.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// True iff this bucket was already sent for the same content hash.
    async fn is_already_sent(
        &self,
        event_id: &str,
        kind: EventKind,
        bucket: &str,
        content_hash: &str,
    ) -> Result<bool>;

    /// Record a send. Compare-and-swap keyed on bucket + content hash.
    async fn mark_sent(
        &self,
        event_id: &str,
        kind: EventKind,
        bucket: &str,
        content_hash: &str,
        sent_at: DateTime<Utc>,
        event_date: &str,
    ) -> Result<MarkOutcome>;
}

/// DynamoDB-backed tracking store.
///
/// Item layout: partition key `event_id`, sort key `event_type`, a `buckets`
/// map of bucket label to `{sent_at, content_hash}`, and a convenience
/// `event_date` copy. Records are never deleted here; retention is an
/// external concern.
pub struct DynamoTrackingStore {
    client: DynamoClient,
    table: String,
}

impl DynamoTrackingStore {
    pub fn new(client: DynamoClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl TrackingStore for DynamoTrackingStore {
    async fn is_already_sent(
        &self,
        event_id: &str,
        kind: EventKind,
        bucket: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("event_id", AttributeValue::S(event_id.to_string()))
            .key("event_type", AttributeValue::S(kind.as_str().to_string()))
            .projection_expression("#b.#l")
            .expression_attribute_names("#b", "buckets")
            .expression_attribute_names("#l", bucket)
            .send()
            .await
            .map_err(|e| {
                Error::StoreUnavailable(format!(
                    "get_item failed for {}/{}: {}",
                    event_id,
                    kind,
                    e.into_service_error()
                ))
            })?;

        Ok(output
            .item()
            .map(|item| bucket_hash_matches(item, bucket, content_hash))
            .unwrap_or(false))
    }

    async fn mark_sent(
        &self,
        event_id: &str,
        kind: EventKind,
        bucket: &str,
        content_hash: &str,
        sent_at: DateTime<Utc>,
        event_date: &str,
    ) -> Result<MarkOutcome> {
        // Nested SET paths require the parent map to exist; this first
        // update is unconditional and idempotent.
        self.client
            .update_item()
            .table_name(&self.table)
            .key("event_id", AttributeValue::S(event_id.to_string()))
            .key("event_type", AttributeValue::S(kind.as_str().to_string()))
            .update_expression("SET #b = if_not_exists(#b, :empty), #d = :date")
            .expression_attribute_names("#b", "buckets")
            .expression_attribute_names("#d", "event_date")
            .expression_attribute_values(":empty", AttributeValue::M(HashMap::new()))
            .expression_attribute_values(":date", AttributeValue::S(event_date.to_string()))
            .send()
            .await
            .map_err(|e| {
                Error::StoreUnavailable(format!(
                    "ensure record failed for {}/{}: {}",
                    event_id,
                    kind,
                    e.into_service_error()
                ))
            })?;

        let entry = HashMap::from([
            (
                "sent_at".to_string(),
                AttributeValue::S(sent_at.to_rfc3339()),
            ),
            (
                "content_hash".to_string(),
                AttributeValue::S(content_hash.to_string()),
            ),
        ]);

        let result = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("event_id", AttributeValue::S(event_id.to_string()))
            .key("event_type", AttributeValue::S(kind.as_str().to_string()))
            .update_expression("SET #b.#l = :entry")
            .condition_expression(
                "attribute_not_exists(#b.#l) OR #b.#l.content_hash <> :hash",
            )
            .expression_attribute_names("#b", "buckets")
            .expression_attribute_names("#l", bucket)
            .expression_attribute_values(":entry", AttributeValue::M(entry))
            .expression_attribute_values(":hash", AttributeValue::S(content_hash.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(MarkOutcome::Recorded),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_conditional_check_failed_exception() {
                    debug!(event_id, bucket, "Lost mark_sent race to a concurrent run");
                    Ok(MarkOutcome::Conflict)
                } else {
                    Err(Error::StoreUnavailable(format!(
                        "mark_sent failed for {}/{}: {}",
                        event_id, kind, service_err
                    )))
                }
            }
        }
    }
}

/// True iff the item's bucket entry carries the given content hash.
fn bucket_hash_matches(
    item: &HashMap<String, AttributeValue>,
    bucket: &str,
    content_hash: &str,
) -> bool {
    item.get("buckets")
        .and_then(|v| v.as_m().ok())
        .and_then(|buckets| buckets.get(bucket))
        .and_then(|v| v.as_m().ok())
        .and_then(|entry| entry.get("content_hash"))
        .and_then(|v| v.as_s().ok())
        .map(|stored| stored == content_hash)
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
struct BucketEntry {
    content_hash: String,
}

/// In-memory tracking store with the same compare-and-swap semantics as the
/// DynamoDB implementation. Used by unit tests and local runs.
#[derive(Default)]
pub struct InMemoryTrackingStore {
    records: Mutex<HashMap<(String, EventKind), HashMap<String, BucketEntry>>>,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingStore for InMemoryTrackingStore {
    async fn is_already_sent(
        &self,
        event_id: &str,
        kind: EventKind,
        bucket: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let records = self.records.lock().await;
        Ok(records
            .get(&(event_id.to_string(), kind))
            .and_then(|buckets| buckets.get(bucket))
            .map(|entry| entry.content_hash == content_hash)
            .unwrap_or(false))
    }

    async fn mark_sent(
        &self,
        event_id: &str,
        kind: EventKind,
        bucket: &str,
        content_hash: &str,
        _sent_at: DateTime<Utc>,
        _event_date: &str,
    ) -> Result<MarkOutcome> {
        let mut records = self.records.lock().await;
        let buckets = records.entry((event_id.to_string(), kind)).or_default();

        match buckets.get(bucket) {
            Some(entry) if entry.content_hash == content_hash => Ok(MarkOutcome::Conflict),
            _ => {
                buckets.insert(
                    bucket.to_string(),
                    BucketEntry {
                        content_hash: content_hash.to_string(),
                    },
                );
                Ok(MarkOutcome::Recorded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn mark_then_check_round_trip() {
        let store = InMemoryTrackingStore::new();
        let sent_at = Utc::now();

        assert!(!store
            .is_already_sent("c-001", EventKind::Concert, "2_weeks_before", "h1")
            .await
            .unwrap());

        let outcome = store
            .mark_sent(
                "c-001",
                EventKind::Concert,
                "2_weeks_before",
                "h1",
                sent_at,
                "2026-09-15",
            )
            .await
            .unwrap();
        assert_eq!(outcome, MarkOutcome::Recorded);

        assert!(store
            .is_already_sent("c-001", EventKind::Concert, "2_weeks_before", "h1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn changed_hash_rearms_bucket() {
        let store = InMemoryTrackingStore::new();
        let sent_at = Utc::now();

        store
            .mark_sent("s-001", EventKind::Study, "1_day_before_6pm", "h1", sent_at, "d")
            .await
            .unwrap();

        // A topic edit changed the hash: the bucket is eligible again.
        assert!(!store
            .is_already_sent("s-001", EventKind::Study, "1_day_before_6pm", "h2")
            .await
            .unwrap());

        let outcome = store
            .mark_sent("s-001", EventKind::Study, "1_day_before_6pm", "h2", sent_at, "d")
            .await
            .unwrap();
        assert_eq!(outcome, MarkOutcome::Recorded);
    }

    #[tokio::test]
    async fn kinds_are_separate_namespaces() {
        let store = InMemoryTrackingStore::new();
        store
            .mark_sent("e-1", EventKind::Concert, "1_day_before", "h", Utc::now(), "d")
            .await
            .unwrap();

        assert!(!store
            .is_already_sent("e-1", EventKind::Interview, "1_day_before", "h")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn concurrent_marks_resolve_to_one_winner() {
        let store = Arc::new(InMemoryTrackingStore::new());
        let sent_at = Utc::now();

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .mark_sent("c-9", EventKind::Concert, "1_day_before", "h", sent_at, "d")
                    .await
                    .unwrap()
            })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .mark_sent("c-9", EventKind::Concert, "1_day_before", "h", sent_at, "d")
                    .await
                    .unwrap()
            })
        };

        let mut outcomes = vec![a.await.unwrap(), b.await.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, MarkOutcome::Recorded));
        assert_eq!(outcomes, vec![MarkOutcome::Conflict, MarkOutcome::Recorded]);
    }

    #[test]
    fn bucket_hash_matching_reads_nested_entry() {
        let entry = HashMap::from([
            (
                "sent_at".to_string(),
                AttributeValue::S("2026-08-01T12:00:00Z".to_string()),
            ),
            (
                "content_hash".to_string(),
                AttributeValue::S("h1".to_string()),
            ),
        ]);
        let buckets = HashMap::from([("1_day_before".to_string(), AttributeValue::M(entry))]);
        let item = HashMap::from([("buckets".to_string(), AttributeValue::M(buckets))]);

        assert!(bucket_hash_matches(&item, "1_day_before", "h1"));
        assert!(!bucket_hash_matches(&item, "1_day_before", "h2"));
        assert!(!bucket_hash_matches(&item, "4_hours_before", "h1"));
        assert!(!bucket_hash_matches(&HashMap::new(), "1_day_before", "h1"));
    }
}
