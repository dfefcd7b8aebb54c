//! Following service
//!
//! Owns the connection lifecycle of a subscription: the cyclic
//! `new → loading → {success | failure}` machine, profile metadata
//! caching, the ingest run, and best-effort push subscription.

use std::sync::Arc;

use chrono::Utc;

use super::folder::FolderService;
use super::inbox::InboxService;
use super::outbox::{builder, OutboxPublisher};
use crate::config::AppConfig;
use crate::data::{Database, EntityId, Following, FollowingFormat, FollowingStatus};
use crate::error::AppError;
use crate::protocol::{self, ItemStream, RemoteClient, ResolvedSource};

/// Following service
pub struct FollowingService {
    db: Arc<Database>,
    client: RemoteClient,
    inbox: Arc<InboxService>,
    folders: Arc<FolderService>,
    outbox: Arc<OutboxPublisher>,
    config: Arc<AppConfig>,
}

impl FollowingService {
    /// Create new following service
    pub fn new(
        db: Arc<Database>,
        client: RemoteClient,
        inbox: Arc<InboxService>,
        folders: Arc<FolderService>,
        outbox: Arc<OutboxPublisher>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            client,
            inbox,
            folders,
            outbox,
            config,
        }
    }

    // =========================================================================
    // Subscription lifecycle
    // =========================================================================

    /// Subscribe a user to a remote source.
    ///
    /// The Following starts in `new` with an unknown format; the first
    /// connect cycle detects the protocol and fills in the cached
    /// profile metadata.
    ///
    /// # Errors
    /// `Validation` when the user already follows this URL.
    pub async fn follow(
        &self,
        user_id: &str,
        url: &str,
        folder_id: &str,
    ) -> Result<Following, AppError> {
        if self.db.get_following_by_url(user_id, url).await?.is_some() {
            return Err(AppError::Validation(format!(
                "already following {}",
                url
            )));
        }

        // The folder must belong to the same user.
        self.folders.get(user_id, folder_id).await?;

        let following = Following {
            id: EntityId::new().0,
            user_id: user_id.to_string(),
            url: url.to_string(),
            format: FollowingFormat::Unknown.as_str().to_string(),
            status: FollowingStatus::New.as_str().to_string(),
            status_message: String::new(),
            folder_id: folder_id.to_string(),
            purge_days: self.config.ingest.purge_days,
            label: None,
            profile_url: None,
            image_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };

        self.db.insert_following(&following).await?;

        tracing::info!(user_id = %user_id, url = %url, "Created following");

        Ok(following)
    }

    /// Unsubscribe from a remote source.
    ///
    /// The Following is soft-deleted; its historical messages remain.
    /// For ActivityPub sources an Undo-Follow is sent best-effort so
    /// the remote side stops pushing.
    pub async fn unfollow(&self, user_id: &str, following_id: &str) -> Result<(), AppError> {
        let following = self
            .db
            .get_following(following_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if following.user_id != user_id {
            return Err(AppError::NotFound);
        }

        self.db.soft_delete_following(following_id).await?;

        tracing::info!(
            user_id = %user_id,
            following_id = %following_id,
            url = %following.url,
            "Deleted following"
        );

        if following.format() == FollowingFormat::ActivityPub {
            self.send_undo_follow(&following).await;
        }

        Ok(())
    }

    // =========================================================================
    // Connect cycle
    // =========================================================================

    /// Run one connect cycle for a Following.
    ///
    /// # Steps
    /// 1. Force status to `loading` and persist, before any network I/O
    /// 2. Resolve the remote source (adapter selected by format,
    ///    auto-detected on first contact); failure is terminal for the
    ///    cycle and recorded on the record
    /// 3. Cache label/image/format from the resolved document, persist
    ///    `success`
    /// 4. Ingest the source's item stream
    /// 5. Recompute the folder's unread count
    /// 6. Attempt push subscription (non-fatal)
    ///
    /// The caller guarantees at most one concurrent connect per
    /// Following.
    pub async fn connect(&self, following_id: &str) -> Result<(), AppError> {
        let mut following = self
            .db
            .get_following(following_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let is_first_connect = following.status() == FollowingStatus::New;

        // 1. Status visible to readers before network I/O completes.
        self.db
            .set_following_status(&following.id, FollowingStatus::Loading, "")
            .await?;
        following.status = FollowingStatus::Loading.as_str().to_string();

        // 2. Resolve the remote source document.
        let source =
            match protocol::resolve(&self.client, &following.url, following.format()).await {
                Ok(source) => source,
                Err(error) => {
                    let message = error.to_string();
                    self.db
                        .set_following_status(&following.id, FollowingStatus::Failure, &message)
                        .await?;
                    tracing::warn!(
                        following_id = %following.id,
                        url = %following.url,
                        error = %message,
                        "Connect failed"
                    );
                    return Err(error);
                }
            };

        // 3. Cache profile metadata and mark the cycle successful.
        following.format = source.format.as_str().to_string();
        following.label = source.label.clone();
        following.profile_url = source.profile_url.clone();
        following.image_url = source.image_url.clone();
        following.status = FollowingStatus::Success.as_str().to_string();
        following.status_message = String::new();
        self.db.update_following(&following).await?;

        // 4. Ingest; storage errors abort the cycle here.
        let stream = ItemStream::for_source(self.client.clone(), &source);
        self.inbox
            .ingest(&following, stream, is_first_connect)
            .await?;

        // 5. Unread count, recomputed from persisted state.
        self.folders
            .recalculate_unread_count(&following.user_id, &following.folder_id)
            .await?;

        // 6. Push subscription failures are logged, not fatal.
        self.connect_push_services(&following, &source).await;

        Ok(())
    }

    /// Try to connect the best available push service.
    async fn connect_push_services(&self, following: &Following, source: &ResolvedSource) {
        // ActivityPub first: it is the highest fidelity connection.
        if source.format == FollowingFormat::ActivityPub {
            if let (Some(inbox_url), Some(actor_id)) = (&source.inbox_url, &source.actor_id) {
                let activity = builder::follow(
                    &self.follow_activity_uri(following),
                    &self.config.server.actor_url(&following.user_id),
                    actor_id,
                );

                match self.outbox.deliver_to(inbox_url, &activity).await {
                    Ok(()) => {
                        tracing::info!(
                            following_id = %following.id,
                            inbox = %inbox_url,
                            "ActivityPub push subscription requested"
                        );
                        return;
                    }
                    Err(error) => {
                        tracing::warn!(
                            %error,
                            following_id = %following.id,
                            "ActivityPub push subscription failed"
                        );
                    }
                }
            }
        }

        // WebSub second.
        if let Some(hub_url) = &source.websub_hub {
            let callback_base = &self.config.websub.callback_base;
            if callback_base.is_empty() {
                tracing::debug!(
                    following_id = %following.id,
                    "WebSub hub available but no callback base configured"
                );
                return;
            }

            let callback_url =
                format!("{}/{}", callback_base.trim_end_matches('/'), following.id);
            let request = protocol::websub::SubscriptionRequest {
                hub_url,
                topic_url: &source.topic_url,
                callback_url: &callback_url,
                lease_seconds: self.config.websub.lease_seconds,
            };

            if let Err(error) = protocol::websub::subscribe(&self.client, &request).await {
                tracing::warn!(
                    %error,
                    following_id = %following.id,
                    hub = %hub_url,
                    "WebSub subscription failed"
                );
            }
        }
    }

    /// Best-effort Undo of the push-subscription Follow.
    async fn send_undo_follow(&self, following: &Following) {
        // The remote inbox is not cached locally; re-resolve to find it.
        let source = match protocol::resolve(
            &self.client,
            &following.url,
            FollowingFormat::ActivityPub,
        )
        .await
        {
            Ok(source) => source,
            Err(error) => {
                tracing::warn!(
                    %error,
                    following_id = %following.id,
                    "Could not resolve actor for Undo-Follow"
                );
                return;
            }
        };

        let (Some(inbox_url), Some(actor_id)) = (&source.inbox_url, &source.actor_id) else {
            return;
        };

        let activity = builder::undo_follow(
            &self.follow_activity_uri(following),
            &self.config.server.actor_url(&following.user_id),
            actor_id,
        );

        if let Err(error) = self.outbox.deliver_to(inbox_url, &activity).await {
            tracing::warn!(
                %error,
                following_id = %following.id,
                "Undo-Follow delivery failed"
            );
        }
    }

    /// Deterministic Follow activity URI for a Following.
    ///
    /// Minted the same way at subscribe and unsubscribe time, so the
    /// Undo can reference it without storing it.
    fn follow_activity_uri(&self, following: &Following) -> String {
        format!(
            "{}/@{}/follows/{}",
            self.config.server.base_url(),
            following.user_id,
            following.id
        )
    }
}
