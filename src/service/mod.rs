//! Service layer
//!
//! Business logic separated from transport and storage:
//! - Following: connection state machine and subscription lifecycle
//! - Inbox: ingestion pipeline, read state, purge
//! - Folder: unread count recomputation
//! - Response: reconciliation of local reactions
//! - Outbox: outward publishing and retraction

mod folder;
mod following;
mod inbox;
mod outbox;
mod response;

pub use folder::FolderService;
pub use following::FollowingService;
pub use inbox::{InboxService, IngestOutcome};
pub use outbox::{
    builder, ActivityTransport, DeliveryResult, EmptyFollowerDirectory, FollowerDirectory,
    HttpTransport, OutboxEvent, OutboxPublisher,
};
pub use response::ResponseService;
