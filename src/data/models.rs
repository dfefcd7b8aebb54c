//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Following
// =============================================================================

/// A local user's subscription to a remote source
///
/// Exactly one non-deleted Following exists per (user_id, url).
/// Status transitions happen only inside the connector.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Following {
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Remote actor/feed URL
    pub url: String,
    /// Wire protocol: activitypub, rss, websub, unknown
    pub format: String,
    /// Lifecycle status: new, loading, success, failure
    pub status: String,
    /// Last connection error, empty on success
    pub status_message: String,
    /// Inbox folder messages from this source land in
    pub folder_id: String,
    /// Read messages older than this many days are purged
    pub purge_days: i64,
    /// Display label cached from the remote profile/feed
    pub label: Option<String>,
    /// Remote profile page URL
    pub profile_url: Option<String>,
    /// Avatar/logo URL cached from the remote profile/feed
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Following {
    pub fn format(&self) -> FollowingFormat {
        FollowingFormat::from_str(&self.format)
    }

    pub fn status(&self) -> FollowingStatus {
        FollowingStatus::from_str(&self.status)
    }
}

/// Wire protocol of a Following
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowingFormat {
    ActivityPub,
    Rss,
    WebSub,
    Unknown,
}

impl FollowingFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActivityPub => "activitypub",
            Self::Rss => "rss",
            Self::WebSub => "websub",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "activitypub" => Self::ActivityPub,
            "rss" => Self::Rss,
            "websub" => Self::WebSub,
            _ => Self::Unknown,
        }
    }
}

/// Lifecycle status of a Following
///
/// `Success` and `Failure` are both re-entered on the next scheduled
/// connect; the machine is cyclic, not terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowingStatus {
    New,
    Loading,
    Success,
    Failure,
}

impl FollowingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Loading => "loading",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "loading" => Self::Loading,
            "success" => Self::Success,
            "failure" => Self::Failure,
            _ => Self::New,
        }
    }
}

// =============================================================================
// Message
// =============================================================================

/// Canonical form of remote content in a user's inbox
///
/// Unique per (user_id, url) among non-deleted rows: re-ingesting the same
/// canonical URL updates the stored row instead of duplicating it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Folder the message is filed in
    pub folder_id: String,
    /// Originating Following; NULL for locally authored messages.
    /// Weak back-reference: the Following may be deleted while its
    /// historical messages remain.
    pub following_id: Option<String>,
    /// Canonical remote URL (identity key)
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Sanitized HTML content
    pub content_html: String,
    pub image_url: Option<String>,
    pub author_name: Option<String>,
    pub author_url: Option<String>,
    pub author_image_url: Option<String>,
    pub publish_date: DateTime<Utc>,
    /// Sort key (publish_date epoch milliseconds)
    pub rank: i64,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    /// URL of the document this replies to
    pub in_reply_to: Option<String>,
    /// Cached response type of the owning user, write-through from the
    /// Response service. Recomputed wholesale, never incremented.
    pub my_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Response
// =============================================================================

/// A local user's reaction to a Message
///
/// At most one row exists per (user_id, message_id). Setting a new
/// response supersedes (deletes then recreates) any prior one; deletion
/// emits a protocol-level retraction. Responses are hard-deleted, unlike
/// the soft-delete convention used elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Response {
    pub id: String,
    /// Acting user
    pub user_id: String,
    /// Acting user's public actor URI
    pub actor_url: String,
    /// Target message
    pub message_id: String,
    /// Target message's canonical URL (the activity object)
    pub message_url: String,
    /// Response type: Like, Dislike, ...
    pub response_type: String,
    /// Optional value (e.g. an emoji for Like variants)
    pub value: String,
    /// Minted activity URI; an Undo must reference this identity so
    /// remote recipients can retract the original.
    pub activity_uri: String,
    pub created_at: DateTime<Utc>,
}

/// Well-known response types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseType {
    Like,
    Dislike,
    Announce,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "Like",
            Self::Dislike => "Dislike",
            Self::Announce => "Announce",
        }
    }
}

// =============================================================================
// Folder
// =============================================================================

/// Ordered mailbox bucket owned by a user
///
/// `unread_count` is a cache, recomputed from message state whenever
/// read-state or folder membership changes inside it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Folder {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Display order
    pub rank: i64,
    /// Cached count of unread messages
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
