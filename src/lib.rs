//! Tributary - a federation inbox engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Host Application (external)                 │
//! │  - Task scheduler, web routing, auth, delivery signing      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Following state machine / Inbox ingestion                │
//! │  - Response reconciliation / Outbox publishing              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Protocol Adapters + Data Layer                 │
//! │  - ActivityPub / RSS / WebSub                               │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `protocol`: adapters normalizing remote sources into canonical documents
//! - `service`: business logic layer
//! - `data`: database layer
//! - `config`: configuration management
//! - `error`: error types

pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod service;

use std::sync::Arc;

use service::{
    ActivityTransport, FolderService, FollowerDirectory, FollowingService, InboxService,
    OutboxEvent, OutboxPublisher, ResponseService,
};

/// Engine state shared with the host application
///
/// Wires configuration, storage and the service layer together. The
/// external task scheduler drives it through [`Engine::connect`],
/// [`Engine::websub_notification`] and [`Engine::set_response`].
#[derive(Clone)]
pub struct Engine {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Following lifecycle service
    pub followings: Arc<FollowingService>,

    /// Inbox ingestion service
    pub inbox: Arc<InboxService>,

    /// Folder service
    pub folders: Arc<FolderService>,

    /// Response reconciliation service
    pub responses: Arc<ResponseService>,

    /// Outbox publisher
    pub outbox: Arc<OutboxPublisher>,
}

impl Engine {
    /// Initialize the engine
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the remote HTTP client
    /// 3. Wire the service layer
    ///
    /// # Arguments
    /// * `config` - Application configuration
    /// * `transport` - Delivery capability (signing is the host's concern)
    /// * `followers` - Follower inbox enumeration
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(
        config: config::AppConfig,
        transport: Arc<dyn ActivityTransport>,
        followers: Arc<dyn FollowerDirectory>,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing engine...");

        let config = Arc::new(config);

        // 1. Connect to SQLite database
        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        // 2. Build the remote HTTP client
        let client = protocol::RemoteClient::new(&config.fetch)?;

        // 3. Wire the service layer
        let outbox = Arc::new(OutboxPublisher::new(transport, followers));
        let inbox = Arc::new(InboxService::new(
            db.clone(),
            config.ingest.unread_backlog,
        ));
        let folders = Arc::new(FolderService::new(db.clone()));
        let responses = Arc::new(ResponseService::new(
            db.clone(),
            config.server.base_url(),
        ));
        let followings = Arc::new(FollowingService::new(
            db.clone(),
            client,
            inbox.clone(),
            folders.clone(),
            outbox.clone(),
            config.clone(),
        ));

        tracing::info!("Engine initialized successfully");

        Ok(Self {
            config,
            db,
            followings,
            inbox,
            folders,
            responses,
            outbox,
        })
    }

    /// Run one connect cycle for a Following (scheduler entry point).
    pub async fn connect(&self, following_id: &str) -> Result<(), error::AppError> {
        self.followings.connect(following_id).await
    }

    /// Ingest a WebSub push notification body (callback entry point).
    ///
    /// Runs through the same ingestion pipeline as a connect cycle, but
    /// never through the connection state machine: a push failure does
    /// not change the Following's status.
    pub async fn websub_notification(
        &self,
        following_id: &str,
        body: &[u8],
    ) -> Result<service::IngestOutcome, error::AppError> {
        let following = self
            .db
            .get_following(following_id)
            .await?
            .ok_or(error::AppError::NotFound)?;

        let documents = protocol::websub::parse_notification(body)
            .map_err(|e| error::AppError::Conversion(e.to_string()))?;

        let outcome = self
            .inbox
            .ingest(
                &following,
                protocol::ItemStream::from_documents(documents),
                false,
            )
            .await?;

        self.folders
            .recalculate_unread_count(&following.user_id, &following.folder_id)
            .await?;

        Ok(outcome)
    }

    /// Set, replace or delete a user's response to a message and
    /// broadcast the resulting events (user-action entry point).
    pub async fn set_response(
        &self,
        user_id: &str,
        message_id: &str,
        response_type: &str,
        value: &str,
    ) -> Result<Vec<OutboxEvent>, error::AppError> {
        let actor_url = self.config.server.actor_url(user_id);
        let events = self
            .responses
            .set_response(user_id, &actor_url, message_id, response_type, value)
            .await?;

        // Delivery failures are logged inside the publisher; local
        // state is already the source of truth.
        self.outbox.dispatch(&events).await;

        Ok(events)
    }

    /// Purge aged read messages for one Following (scheduler entry
    /// point), then refresh the folder count.
    pub async fn purge_following(&self, following_id: &str) -> Result<u64, error::AppError> {
        let following = self
            .db
            .get_following(following_id)
            .await?
            .ok_or(error::AppError::NotFound)?;

        let purged = self.inbox.purge(&following).await?;

        if purged > 0 {
            self.folders
                .recalculate_unread_count(&following.user_id, &following.folder_id)
                .await?;
        }

        Ok(purged)
    }
}
