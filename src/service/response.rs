//! Response service
//!
//! Reconciles a local user's reaction to a Message with the single-
//! response invariant: at most one live Response per (actor, message),
//! a new response supersedes (deletes then recreates) any prior one,
//! and deletion produces a retraction event for the outbox publisher.

use std::sync::Arc;

use chrono::Utc;

use super::outbox::{event_for_publish, event_for_retract, OutboxEvent};
use crate::data::{Database, EntityId, Response};
use crate::error::AppError;

/// Response service
pub struct ResponseService {
    db: Arc<Database>,
    base_url: String,
}

impl ResponseService {
    /// Create new response service
    pub fn new(db: Arc<Database>, base_url: String) -> Self {
        Self { db, base_url }
    }

    /// Set, replace or delete the acting user's response to a message.
    ///
    /// # Arguments
    /// * `user_id` - Acting user (must own the target message's inbox)
    /// * `actor_url` - Acting user's public actor URI
    /// * `message_id` - Target message
    /// * `response_type` - "Like", "Dislike", ... — empty means delete-only
    /// * `value` - Optional value (e.g. an emoji)
    ///
    /// # Returns
    /// The outbound events this mutation produced (0..=2: a retraction
    /// for a superseded response, a publish for a new one). The caller
    /// hands them to the outbox publisher; delivery is not this
    /// service's concern.
    ///
    /// # Errors
    /// `Unauthorized` for unauthenticated calls (nothing is mutated),
    /// `NotFound` when the message does not exist for this user.
    pub async fn set_response(
        &self,
        user_id: &str,
        actor_url: &str,
        message_id: &str,
        response_type: &str,
        value: &str,
    ) -> Result<Vec<OutboxEvent>, AppError> {
        if user_id.is_empty() || actor_url.is_empty() {
            return Err(AppError::Unauthorized);
        }

        let message = self
            .db
            .get_message(user_id, message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let mut events = Vec::new();

        // If a response already exists, decide between no-op and
        // supersession.
        if let Some(existing) = self.db.get_response_by_message(user_id, message_id).await? {
            if existing.response_type == response_type && existing.value == value {
                return Ok(events);
            }

            // Clear the cached marker before the row goes away, then
            // retract what was published.
            self.db
                .set_message_response(user_id, message_id, None)
                .await?;
            self.db.delete_response(&existing.id).await?;
            events.push(event_for_retract(&existing));

            tracing::info!(
                user_id = %user_id,
                message_id = %message_id,
                response_type = %existing.response_type,
                "Superseded response"
            );
        }

        // Empty type means this was a delete-only request.
        if response_type.is_empty() {
            return Ok(events);
        }

        let id = EntityId::new().0;
        let response = Response {
            activity_uri: format!("{}/@{}/responses/{}", self.base_url, user_id, id),
            id,
            user_id: user_id.to_string(),
            actor_url: actor_url.to_string(),
            message_id: message_id.to_string(),
            message_url: message.url,
            response_type: response_type.to_string(),
            value: value.to_string(),
            created_at: Utc::now(),
        };

        self.db.insert_response(&response).await?;
        self.db
            .set_message_response(user_id, message_id, Some(response_type))
            .await?;

        events.push(event_for_publish(&response));

        tracing::info!(
            user_id = %user_id,
            message_id = %message_id,
            response_type = %response_type,
            "Stored response"
        );

        Ok(events)
    }

    /// Delete the acting user's response to a message, if any.
    pub async fn delete_response(
        &self,
        user_id: &str,
        actor_url: &str,
        message_id: &str,
    ) -> Result<Vec<OutboxEvent>, AppError> {
        self.set_response(user_id, actor_url, message_id, "", "").await
    }
}
