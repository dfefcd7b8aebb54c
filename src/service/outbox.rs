//! Outbox publisher
//!
//! Serializes locally-authored activity (responses, retractions, follow
//! requests) into ActivityPub JSON and broadcasts it to remote inboxes.
//! Follower enumeration and the actual delivery transport (including
//! request signing) belong to the host application; both sit behind
//! traits here.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::data::Response;
use crate::error::AppError;

// =============================================================================
// Outbound events
// =============================================================================

/// One outward-facing consequence of a local mutation.
///
/// Response reconciliation returns these instead of delivering from
/// inside save/delete, keeping the data layer free of transport
/// concerns.
#[derive(Debug, Clone)]
pub enum OutboxEvent {
    /// Broadcast a newly published activity
    Publish {
        user_id: String,
        activity: serde_json::Value,
    },
    /// Broadcast an Undo referencing a previously published activity
    Retract {
        user_id: String,
        activity: serde_json::Value,
    },
}

impl OutboxEvent {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Publish { user_id, .. } | Self::Retract { user_id, .. } => user_id,
        }
    }

    pub fn activity(&self) -> &serde_json::Value {
        match self {
            Self::Publish { activity, .. } | Self::Retract { activity, .. } => activity,
        }
    }
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// Opaque "deliver activity to inbox URL" capability.
///
/// The host application owns HTTP signatures; this engine only hands it
/// a target and a JSON body.
pub trait ActivityTransport: Send + Sync {
    fn deliver<'a>(
        &'a self,
        inbox_url: &'a str,
        activity: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), AppError>>;
}

/// Enumerates the remote inboxes subscribed to a local user.
pub trait FollowerDirectory: Send + Sync {
    fn follower_inboxes<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, AppError>>;
}

/// Unsigned reqwest transport.
///
/// Suitable for deployments where the host application terminates
/// signing elsewhere, and for local development.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl ActivityTransport for HttpTransport {
    fn deliver<'a>(
        &'a self,
        inbox_url: &'a str,
        activity: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            let response = self
                .http
                .post(inbox_url)
                .header("Content-Type", "application/activity+json")
                .json(activity)
                .send()
                .await
                .map_err(|e| {
                    AppError::Delivery(format!("Failed to deliver to {}: {}", inbox_url, e))
                })?;

            if !response.status().is_success() {
                return Err(AppError::Delivery(format!(
                    "Inbox {} rejected activity: HTTP {}",
                    inbox_url,
                    response.status()
                )));
            }

            tracing::debug!(inbox = %inbox_url, "Delivered activity");
            Ok(())
        })
    }
}

/// Directory for ingest-only deployments: no followers, nothing to
/// broadcast.
pub struct EmptyFollowerDirectory;

impl FollowerDirectory for EmptyFollowerDirectory {
    fn follower_inboxes<'a>(
        &'a self,
        _user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, AppError>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

// =============================================================================
// Activity builders
// =============================================================================

/// ActivityPub JSON builders for outbound activities
pub mod builder {
    use serde_json::json;

    use crate::data::Response;

    const CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

    /// Canonical outward representation of a Response
    pub fn response(response: &Response) -> serde_json::Value {
        let mut activity = json!({
            "@context": CONTEXT,
            "id": response.activity_uri,
            "type": response.response_type,
            "actor": response.actor_url,
            "object": response.message_url,
            "published": response.created_at.to_rfc3339(),
        });

        if !response.value.is_empty() {
            activity["content"] = json!(response.value);
        }

        activity
    }

    /// Undo wrapping a previously published Response.
    ///
    /// Carries the original activity's id so remote recipients can
    /// retract exactly what was published.
    pub fn undo(original: &Response) -> serde_json::Value {
        json!({
            "@context": CONTEXT,
            "id": format!("{}#undo", original.activity_uri),
            "type": "Undo",
            "actor": original.actor_url,
            "object": {
                "id": original.activity_uri,
                "type": original.response_type,
                "actor": original.actor_url,
                "object": original.message_url,
            },
        })
    }

    /// Follow request for push subscription
    pub fn follow(activity_uri: &str, actor_url: &str, object_url: &str) -> serde_json::Value {
        json!({
            "@context": CONTEXT,
            "id": activity_uri,
            "type": "Follow",
            "actor": actor_url,
            "object": object_url,
        })
    }

    /// Undo of a previously sent Follow
    pub fn undo_follow(
        follow_activity_uri: &str,
        actor_url: &str,
        object_url: &str,
    ) -> serde_json::Value {
        json!({
            "@context": CONTEXT,
            "id": format!("{}#undo", follow_activity_uri),
            "type": "Undo",
            "actor": actor_url,
            "object": {
                "id": follow_activity_uri,
                "type": "Follow",
                "actor": actor_url,
                "object": object_url,
            },
        })
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Result of one inbox delivery attempt
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub inbox_url: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Deduplicate identical inbox URLs while keeping distinct personal inboxes.
fn unique_inbox_targets(inbox_urls: Vec<String>) -> Vec<String> {
    use std::collections::HashSet;

    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for inbox_url in inbox_urls {
        if seen.insert(inbox_url.clone()) {
            targets.push(inbox_url);
        }
    }

    targets
}

/// Broadcasts outbox events to follower inboxes
pub struct OutboxPublisher {
    transport: Arc<dyn ActivityTransport>,
    followers: Arc<dyn FollowerDirectory>,
}

impl OutboxPublisher {
    pub fn new(
        transport: Arc<dyn ActivityTransport>,
        followers: Arc<dyn FollowerDirectory>,
    ) -> Self {
        Self {
            transport,
            followers,
        }
    }

    /// Broadcast a batch of events.
    ///
    /// Delivery failures are logged per inbox, never propagated: local
    /// state is the source of truth, and a failed-to-deliver retraction
    /// is best-effort, not rolled back.
    pub async fn dispatch(&self, events: &[OutboxEvent]) -> Vec<DeliveryResult> {
        let mut results = Vec::new();

        for event in events {
            results.extend(self.broadcast(event).await);
        }

        results
    }

    /// Deliver one activity to a single inbox (push subscription
    /// handshakes).
    pub async fn deliver_to(
        &self,
        inbox_url: &str,
        activity: &serde_json::Value,
    ) -> Result<(), AppError> {
        self.transport.deliver(inbox_url, activity).await
    }

    async fn broadcast(&self, event: &OutboxEvent) -> Vec<DeliveryResult> {
        use tokio::sync::Semaphore;

        let inboxes = match self.followers.follower_inboxes(event.user_id()).await {
            Ok(inboxes) => inboxes,
            Err(error) => {
                tracing::error!(%error, user_id = %event.user_id(), "Failed to enumerate follower inboxes");
                return Vec::new();
            }
        };

        let total_targets = inboxes.len();
        let delivery_targets = unique_inbox_targets(inboxes);

        tracing::info!(
            "Delivering to {} unique inboxes (deduplicated from {} total)",
            delivery_targets.len(),
            total_targets
        );

        // Deliver in parallel with a concurrency limit.
        const MAX_CONCURRENT: usize = 10;
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
        let activity = Arc::new(event.activity().clone());

        let mut tasks = Vec::new();

        for inbox_url in delivery_targets {
            let semaphore = semaphore.clone();
            let activity = activity.clone();
            let transport = self.transport.clone();

            let task = tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");

                let result = transport.deliver(&inbox_url, &activity).await;

                DeliveryResult {
                    inbox_url,
                    success: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                }
            });

            tasks.push(task);
        }

        let mut results = Vec::new();
        for task in tasks {
            if let Ok(result) = task.await {
                results.push(result);
            }
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let failure_count = results.len() - success_count;

        tracing::info!(
            "Batch delivery complete: {} succeeded, {} failed",
            success_count,
            failure_count
        );

        results
    }
}

/// Build the outbound activity for an event from its Response.
pub fn event_for_publish(response: &Response) -> OutboxEvent {
    OutboxEvent::Publish {
        user_id: response.user_id.clone(),
        activity: builder::response(response),
    }
}

/// Build the retraction event for a deleted Response.
pub fn event_for_retract(response: &Response) -> OutboxEvent {
    OutboxEvent::Retract {
        user_id: response.user_id.clone(),
        activity: builder::undo(response),
    }
}
