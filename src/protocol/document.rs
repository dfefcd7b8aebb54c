//! Canonical remote document model
//!
//! The single shape all three protocols convert into before the
//! ingestion pipeline stores anything. The canonical URL is the identity
//! key used for deduplication across protocols and re-ingestions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::FollowingFormat;

/// One remote content item, normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Canonical remote URL (identity key)
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Sanitized HTML content
    pub content_html: String,
    pub image_url: Option<String>,
    pub author: Author,
    pub published: DateTime<Utc>,
    /// URL of the document this replies to
    pub in_reply_to: Option<String>,
}

impl Document {
    /// Sort rank: publish timestamp in epoch milliseconds
    pub fn rank(&self) -> i64 {
        self.published.timestamp_millis()
    }
}

/// Display link for a document's author
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: Option<String>,
    pub profile_url: Option<String>,
    pub image_url: Option<String>,
}

/// Resolved remote source: the actor/feed-level metadata a connect cycle
/// copies onto the Following record, plus the handle used to iterate the
/// source's items.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    /// Detected or confirmed wire protocol
    pub format: FollowingFormat,
    /// Display label (actor name or feed title)
    pub label: Option<String>,
    /// Profile page URL
    pub profile_url: Option<String>,
    /// Avatar or feed logo URL
    pub image_url: Option<String>,
    /// ActivityPub actor id (push subscription target object)
    pub actor_id: Option<String>,
    /// ActivityPub inbox URL, when the source is an actor
    pub inbox_url: Option<String>,
    /// Discovered WebSub hub URL, when the feed advertises one
    pub websub_hub: Option<String>,
    /// Topic URL to subscribe with at the hub
    pub topic_url: String,
    /// Where the source's items come from
    pub items: SourceItems,
}

/// Item origin for a resolved source
///
/// RSS/Atom feeds are bounded and parsed in one pass, so their items are
/// already converted. An ActivityPub outbox is paginated lazily.
#[derive(Debug, Clone)]
pub enum SourceItems {
    /// Fully converted items, in feed order
    Buffered(Vec<Document>),
    /// Outbox collection URL to paginate on demand
    Outbox(String),
}
