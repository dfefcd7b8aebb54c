//! ActivityPub adapter
//!
//! Resolves a remote actor document and paginates its outbox lazily,
//! one collection page at a time. `Create`/`Update` wrapper activities
//! are dereferenced to their inner object before conversion, and
//! `attributedTo` references are resolved (and cached per stream) to a
//! display name, profile URL and avatar.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use super::document::{Author, Document, ResolvedSource, SourceItems};
use super::RemoteClient;
use crate::data::FollowingFormat;
use crate::error::AppError;

/// ActivityPub actor types accepted as a followable source
const ACTOR_TYPES: [&str; 5] = ["Person", "Service", "Group", "Organization", "Application"];

// =============================================================================
// JSON field helpers
// =============================================================================

/// Read a string field
fn str_field<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

/// Read a link-valued field: a bare string, an object with
/// `id`/`href`/`url`, or an array (first entry wins).
fn link_field(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(_) => ["id", "href", "url"]
            .iter()
            .find_map(|key| str_field(value, key))
            .map(str::to_string),
        serde_json::Value::Array(items) => items.first().and_then(link_field),
        _ => None,
    }
}

/// Canonical URL of a document: `id` preferred, `url` as fallback
fn document_url(value: &serde_json::Value) -> Option<String> {
    str_field(value, "id")
        .map(str::to_string)
        .or_else(|| value.get("url").and_then(link_field))
}

/// Image URL from an `icon`/`image` field
fn image_url(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(link_field)
}

fn parse_published(value: &serde_json::Value) -> DateTime<Utc> {
    str_field(value, "published")
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

// =============================================================================
// Actor resolution
// =============================================================================

/// Fetch and resolve a remote actor document
pub async fn resolve_actor(client: &RemoteClient, url: &str) -> Result<ResolvedSource, AppError> {
    let value = client.fetch_json(url).await?;
    resolve_from_value(url, value)
}

/// Resolve an already-fetched actor document
pub fn resolve_from_value(
    url: &str,
    value: serde_json::Value,
) -> Result<ResolvedSource, AppError> {
    let actor_type = str_field(&value, "type").unwrap_or("");
    if !ACTOR_TYPES.contains(&actor_type) {
        return Err(AppError::Connection(format!(
            "{} is not an ActivityPub actor document (type: {})",
            url,
            if actor_type.is_empty() { "missing" } else { actor_type }
        )));
    }

    let actor_id = document_url(&value).unwrap_or_else(|| url.to_string());
    let label = str_field(&value, "name")
        .or_else(|| str_field(&value, "preferredUsername"))
        .map(str::to_string);
    let profile_url = value
        .get("url")
        .and_then(link_field)
        .or_else(|| Some(actor_id.clone()));
    let image = image_url(&value, "icon").or_else(|| image_url(&value, "image"));
    let inbox_url = str_field(&value, "inbox").map(str::to_string);

    let items = match value.get("outbox").and_then(link_field) {
        Some(outbox_url) => SourceItems::Outbox(outbox_url),
        None => SourceItems::Buffered(Vec::new()),
    };

    Ok(ResolvedSource {
        format: FollowingFormat::ActivityPub,
        label,
        profile_url,
        image_url: image,
        actor_id: Some(actor_id.clone()),
        inbox_url,
        websub_hub: None,
        topic_url: actor_id,
        items,
    })
}

// =============================================================================
// Document conversion
// =============================================================================

/// Dereference `Create`/`Update` wrapper activities to the inner object.
///
/// A bare string (a link to the object) is fetched; anything else is
/// used as-is.
pub async fn actual_document(
    client: &RemoteClient,
    value: serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let value = match value {
        serde_json::Value::String(url) => client
            .fetch_json(&url)
            .await
            .map_err(|e| AppError::Conversion(e.to_string()))?,
        other => other,
    };

    match str_field(&value, "type") {
        Some("Create") | Some("Update") => {
            let object = value
                .get("object")
                .cloned()
                .ok_or_else(|| AppError::Conversion("activity has no object".to_string()))?;

            match object {
                serde_json::Value::String(url) => client
                    .fetch_json(&url)
                    .await
                    .map_err(|e| AppError::Conversion(e.to_string())),
                other => Ok(other),
            }
        }
        _ => Ok(value),
    }
}

/// Convert an ActivityPub object into a canonical document.
///
/// `authors` caches resolved `attributedTo` references across one
/// stream, so a single-author outbox costs one actor fetch.
pub async fn to_document(
    client: &RemoteClient,
    value: &serde_json::Value,
    authors: &mut HashMap<String, Author>,
) -> Result<Document, AppError> {
    let url = document_url(value)
        .ok_or_else(|| AppError::Conversion("object has no id or url".to_string()))?;

    let content_html = str_field(value, "content")
        .map(ammonia::clean)
        .unwrap_or_default();
    let summary = str_field(value, "summary").map(ammonia::clean);

    Ok(Document {
        url,
        title: str_field(value, "name").map(str::to_string),
        summary,
        content_html,
        image_url: image_url(value, "image").or_else(|| image_url(value, "icon")),
        author: resolve_author(client, value.get("attributedTo"), authors).await,
        published: parse_published(value),
        in_reply_to: value.get("inReplyTo").and_then(link_field),
    })
}

/// Resolve an `attributedTo` reference chain to a display author.
///
/// Resolution failure is never fatal; an unattributable document just
/// carries an empty author.
async fn resolve_author(
    client: &RemoteClient,
    attributed_to: Option<&serde_json::Value>,
    authors: &mut HashMap<String, Author>,
) -> Author {
    let Some(attributed_to) = attributed_to else {
        return Author::default();
    };

    // Inline objects carry everything we need.
    if attributed_to.is_object() {
        return author_from_value(attributed_to);
    }

    let Some(reference) = link_field(attributed_to) else {
        return Author::default();
    };

    if let Some(cached) = authors.get(&reference) {
        return cached.clone();
    }

    let author = match client.fetch_json(&reference).await {
        Ok(actor) => author_from_value(&actor),
        Err(error) => {
            tracing::debug!(%error, actor = %reference, "Failed to resolve attributedTo");
            Author {
                profile_url: Some(reference.clone()),
                ..Author::default()
            }
        }
    };

    authors.insert(reference, author.clone());
    author
}

fn author_from_value(value: &serde_json::Value) -> Author {
    Author {
        name: str_field(value, "name")
            .or_else(|| str_field(value, "preferredUsername"))
            .map(str::to_string),
        profile_url: value
            .get("url")
            .and_then(link_field)
            .or_else(|| str_field(value, "id").map(str::to_string)),
        image_url: image_url(value, "icon"),
    }
}

// =============================================================================
// Outbox pagination
// =============================================================================

/// Lazy pager over an ActivityPub outbox collection.
///
/// Fetches one page at a time; the owning `ItemStream` guarantees no
/// further calls arrive after `stop()`, so a page is only ever fetched
/// when the pipeline is still consuming.
pub struct OutboxPager {
    client: RemoteClient,
    next_page: Option<String>,
    pending: VecDeque<serde_json::Value>,
    authors: HashMap<String, Author>,
}

impl OutboxPager {
    pub fn new(client: RemoteClient, outbox_url: &str) -> Self {
        Self {
            client,
            next_page: Some(outbox_url.to_string()),
            pending: VecDeque::new(),
            authors: HashMap::new(),
        }
    }

    /// Yield the next document, fetching the next collection page when
    /// the current one is drained.
    pub async fn next(&mut self) -> Option<Result<Document, AppError>> {
        loop {
            if let Some(raw) = self.pending.pop_front() {
                return Some(self.convert(raw).await);
            }

            let page_url = self.next_page.take()?;
            if let Err(error) = self.fetch_page(&page_url).await {
                // A failed page ends the sequence; items already stored
                // this cycle are kept and the next cycle retries.
                return Some(Err(error));
            }
        }
    }

    async fn convert(&mut self, raw: serde_json::Value) -> Result<Document, AppError> {
        let object = actual_document(&self.client, raw).await?;
        to_document(&self.client, &object, &mut self.authors).await
    }

    async fn fetch_page(&mut self, page_url: &str) -> Result<(), AppError> {
        let page = self.client.fetch_json(page_url).await?;

        let items = page
            .get("orderedItems")
            .or_else(|| page.get("items"))
            .and_then(|v| v.as_array());

        match items {
            Some(items) => {
                self.pending.extend(items.iter().cloned());
                self.next_page = page.get("next").and_then(link_field);
            }
            None => {
                // A bare OrderedCollection: follow its first page.
                self.next_page = page.get("first").and_then(link_field);
                if self.next_page.is_none() {
                    return Err(AppError::Connection(format!(
                        "{} has no items and no first page",
                        page_url
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_client() -> RemoteClient {
        RemoteClient::from_parts(reqwest::Client::new(), 1024 * 1024)
    }

    #[test]
    fn resolve_from_value_reads_actor_fields() {
        let actor = json!({
            "id": "https://remote.example/users/anna",
            "type": "Person",
            "name": "Anna",
            "preferredUsername": "anna",
            "url": "https://remote.example/@anna",
            "icon": {"type": "Image", "url": "https://remote.example/avatar.png"},
            "inbox": "https://remote.example/users/anna/inbox",
            "outbox": "https://remote.example/users/anna/outbox"
        });

        let source = resolve_from_value("https://remote.example/users/anna", actor).unwrap();

        assert_eq!(source.format, FollowingFormat::ActivityPub);
        assert_eq!(source.label.as_deref(), Some("Anna"));
        assert_eq!(source.profile_url.as_deref(), Some("https://remote.example/@anna"));
        assert_eq!(
            source.image_url.as_deref(),
            Some("https://remote.example/avatar.png")
        );
        assert_eq!(
            source.inbox_url.as_deref(),
            Some("https://remote.example/users/anna/inbox")
        );
        assert!(matches!(
            source.items,
            SourceItems::Outbox(ref url) if url == "https://remote.example/users/anna/outbox"
        ));
    }

    #[test]
    fn resolve_from_value_rejects_non_actor() {
        let error = resolve_from_value(
            "https://remote.example/note/1",
            json!({"id": "https://remote.example/note/1", "type": "Note"}),
        )
        .unwrap_err();

        assert!(matches!(error, AppError::Connection(_)));
    }

    #[tokio::test]
    async fn actual_document_unwraps_create_and_update() {
        let client = test_client();
        for activity_type in ["Create", "Update"] {
            let wrapped = json!({
                "id": "https://remote.example/activity/1",
                "type": activity_type,
                "object": {
                    "id": "https://remote.example/note/1",
                    "type": "Note",
                    "content": "<p>hello</p>"
                }
            });

            let inner = actual_document(&client, wrapped).await.unwrap();
            assert_eq!(
                inner.get("id").and_then(|v| v.as_str()),
                Some("https://remote.example/note/1")
            );
        }
    }

    #[tokio::test]
    async fn actual_document_passes_plain_objects_through() {
        let client = test_client();
        let note = json!({"id": "https://remote.example/note/2", "type": "Note"});

        let inner = actual_document(&client, note.clone()).await.unwrap();
        assert_eq!(inner, note);
    }

    #[tokio::test]
    async fn to_document_sanitizes_content_and_reads_fields() {
        let client = test_client();
        let mut authors = HashMap::new();
        let note = json!({
            "id": "https://remote.example/note/3",
            "type": "Note",
            "name": "A note",
            "content": "<p>fine</p><script>alert(1)</script>",
            "published": "2024-03-01T12:00:00Z",
            "inReplyTo": "https://remote.example/note/2",
            "attributedTo": {
                "id": "https://remote.example/users/anna",
                "name": "Anna"
            }
        });

        let document = to_document(&client, &note, &mut authors).await.unwrap();

        assert_eq!(document.url, "https://remote.example/note/3");
        assert_eq!(document.title.as_deref(), Some("A note"));
        assert!(document.content_html.contains("<p>fine</p>"));
        assert!(!document.content_html.contains("script"));
        assert_eq!(
            document.in_reply_to.as_deref(),
            Some("https://remote.example/note/2")
        );
        assert_eq!(document.author.name.as_deref(), Some("Anna"));
        assert_eq!(document.published.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[tokio::test]
    async fn to_document_requires_an_identity() {
        let client = test_client();
        let mut authors = HashMap::new();

        let error = to_document(&client, &json!({"type": "Note"}), &mut authors)
            .await
            .unwrap_err();
        assert!(error.is_conversion());
    }

    #[test]
    fn link_field_handles_all_reference_shapes() {
        assert_eq!(
            link_field(&json!("https://a.example/")),
            Some("https://a.example/".to_string())
        );
        assert_eq!(
            link_field(&json!({"href": "https://b.example/"})),
            Some("https://b.example/".to_string())
        );
        assert_eq!(
            link_field(&json!(["https://c.example/", "https://d.example/"])),
            Some("https://c.example/".to_string())
        );
        assert_eq!(link_field(&json!(42)), None);
    }
}
