//! RSS/Atom adapter
//!
//! Fetches a feed with a bounded body size, parses it synchronously with
//! `feed-rs`, and converts each entry into the canonical document shape.
//! Feed-level metadata (title, logo, discoverable WebSub hub) goes onto
//! the Following record.

use chrono::Utc;
use feed_rs::model::{Entry, Feed};

use super::document::{Author, Document, ResolvedSource, SourceItems};
use super::{Fetched, RemoteClient, FEED_ACCEPT};
use crate::data::FollowingFormat;
use crate::error::AppError;

/// Fetch and resolve a syndication feed
pub async fn resolve_feed(client: &RemoteClient, url: &str) -> Result<ResolvedSource, AppError> {
    let fetched = client.fetch(url, FEED_ACCEPT).await?;
    resolve_from_fetched(url, &fetched)
}

/// Resolve an already-fetched feed document
pub fn resolve_from_fetched(url: &str, fetched: &Fetched) -> Result<ResolvedSource, AppError> {
    let feed = parse_feed(&fetched.body)?;

    // Hub discovery: feed links first, HTTP Link header as fallback.
    let websub_hub = feed_link(&feed, "hub").or_else(|| fetched.link_hub.clone());
    let topic_url = feed_link(&feed, "self")
        .or_else(|| fetched.link_self.clone())
        .unwrap_or_else(|| url.to_string());

    let format = if websub_hub.is_some() {
        FollowingFormat::WebSub
    } else {
        FollowingFormat::Rss
    };

    Ok(ResolvedSource {
        format,
        label: feed.title.as_ref().map(|t| t.content.clone()),
        profile_url: feed_link(&feed, "alternate").or_else(|| Some(url.to_string())),
        image_url: feed
            .logo
            .as_ref()
            .or(feed.icon.as_ref())
            .map(|image| image.uri.clone()),
        actor_id: None,
        inbox_url: None,
        websub_hub,
        topic_url,
        items: SourceItems::Buffered(entries_to_documents(&feed)),
    })
}

/// Parse raw feed bytes
pub fn parse_feed(body: &[u8]) -> Result<Feed, AppError> {
    feed_rs::parser::parse(body)
        .map_err(|e| AppError::Connection(format!("feed parse failed: {}", e)))
}

/// Convert all feed entries, skipping (and reporting) unconvertible ones
pub fn entries_to_documents(feed: &Feed) -> Vec<Document> {
    let mut documents = Vec::with_capacity(feed.entries.len());

    for entry in &feed.entries {
        match entry_to_document(entry) {
            Ok(document) => documents.push(document),
            Err(error) => {
                tracing::warn!(%error, entry = %entry.id, "Skipping unconvertible feed entry");
            }
        }
    }

    documents
}

/// Convert one feed entry into a canonical document
pub fn entry_to_document(entry: &Entry) -> Result<Document, AppError> {
    let url = entry_url(entry)
        .ok_or_else(|| AppError::Conversion("feed entry has no usable link".to_string()))?;

    let summary = entry
        .summary
        .as_ref()
        .map(|text| ammonia::clean(&text.content));
    let content_html = entry
        .content
        .as_ref()
        .and_then(|content| content.body.as_deref())
        .map(ammonia::clean)
        .or_else(|| summary.clone())
        .unwrap_or_default();

    let author = entry
        .authors
        .first()
        .map(|person| Author {
            name: Some(person.name.clone()),
            profile_url: person.uri.clone(),
            image_url: None,
        })
        .unwrap_or_default();

    Ok(Document {
        url,
        title: entry.title.as_ref().map(|t| t.content.clone()),
        summary,
        content_html,
        image_url: entry_image(entry),
        author,
        published: entry.published.or(entry.updated).unwrap_or_else(Utc::now),
        in_reply_to: None,
    })
}

/// Canonical URL of an entry: the alternate/plain link, else a
/// resolvable id.
fn entry_url(entry: &Entry) -> Option<String> {
    let linked = entry
        .links
        .iter()
        .find(|link| {
            link.rel.is_none() || link.rel.as_deref() == Some("alternate")
        })
        .or_else(|| entry.links.first())
        .map(|link| link.href.clone());

    linked.or_else(|| {
        entry
            .id
            .starts_with("http")
            .then(|| entry.id.clone())
    })
}

fn entry_image(entry: &Entry) -> Option<String> {
    entry.media.iter().find_map(|media| {
        media
            .thumbnails
            .first()
            .map(|thumbnail| thumbnail.image.uri.clone())
            .or_else(|| {
                media
                    .content
                    .iter()
                    .find_map(|content| content.url.as_ref().map(|url| url.to_string()))
            })
    })
}

fn feed_link(feed: &Feed, rel: &str) -> Option<String> {
    feed.links
        .iter()
        .find(|link| link.rel.as_deref() == Some(rel))
        .map(|link| link.href.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Example Journal</title>
    <link>https://journal.example/</link>
    <atom:link rel="self" href="https://journal.example/feed.xml"/>
    <atom:link rel="hub" href="https://hub.example/"/>
    <item>
      <title>Second post</title>
      <link>https://journal.example/posts/2</link>
      <description>Newer &lt;b&gt;entry&lt;/b&gt;</description>
      <pubDate>Tue, 02 Apr 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>First post</title>
      <link>https://journal.example/posts/1</link>
      <description>Older entry</description>
      <pubDate>Mon, 01 Apr 2024 10:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    const ATOM_FIXTURE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Journal</title>
  <link rel="alternate" href="https://atom.example/"/>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2024-04-02T10:00:00Z</updated>
  <entry>
    <title>Hello Atom</title>
    <link rel="alternate" href="https://atom.example/hello"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2024-04-02T10:00:00Z</updated>
    <author><name>Casey</name><uri>https://atom.example/about</uri></author>
    <content type="html">&lt;p&gt;body&lt;/p&gt;&lt;script&gt;x()&lt;/script&gt;</content>
  </entry>
</feed>"#;

    fn fetched(body: &str) -> Fetched {
        Fetched {
            url: "https://journal.example/feed.xml".to_string(),
            content_type: "application/rss+xml".to_string(),
            link_hub: None,
            link_self: None,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn resolve_reads_feed_metadata_and_discovers_hub() {
        let source =
            resolve_from_fetched("https://journal.example/feed.xml", &fetched(RSS_FIXTURE))
                .unwrap();

        assert_eq!(source.label.as_deref(), Some("Example Journal"));
        assert_eq!(source.websub_hub.as_deref(), Some("https://hub.example/"));
        assert_eq!(source.topic_url, "https://journal.example/feed.xml");
        assert_eq!(source.format, FollowingFormat::WebSub);
    }

    #[test]
    fn resolve_without_hub_stays_rss() {
        let body = RSS_FIXTURE.replace(r#"<atom:link rel="hub" href="https://hub.example/"/>"#, "");
        let source =
            resolve_from_fetched("https://journal.example/feed.xml", &fetched(&body)).unwrap();

        assert_eq!(source.format, FollowingFormat::Rss);
        assert!(source.websub_hub.is_none());
    }

    #[test]
    fn hub_falls_back_to_http_link_header() {
        let body = RSS_FIXTURE.replace(r#"<atom:link rel="hub" href="https://hub.example/"/>"#, "");
        let mut fetched = fetched(&body);
        fetched.link_hub = Some("https://header-hub.example/".to_string());

        let source =
            resolve_from_fetched("https://journal.example/feed.xml", &fetched).unwrap();
        assert_eq!(
            source.websub_hub.as_deref(),
            Some("https://header-hub.example/")
        );
    }

    #[test]
    fn entries_convert_in_feed_order() {
        let source =
            resolve_from_fetched("https://journal.example/feed.xml", &fetched(RSS_FIXTURE))
                .unwrap();

        let SourceItems::Buffered(documents) = source.items else {
            panic!("feed items are always buffered");
        };

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].url, "https://journal.example/posts/2");
        assert_eq!(documents[0].title.as_deref(), Some("Second post"));
        assert_eq!(documents[1].url, "https://journal.example/posts/1");
        assert!(documents[0].published > documents[1].published);
    }

    #[test]
    fn atom_entries_are_sanitized_and_attributed() {
        let feed = parse_feed(ATOM_FIXTURE.as_bytes()).unwrap();
        let documents = entries_to_documents(&feed);

        assert_eq!(documents.len(), 1);
        let document = &documents[0];
        assert_eq!(document.url, "https://atom.example/hello");
        assert!(document.content_html.contains("<p>body</p>"));
        assert!(!document.content_html.contains("script"));
        assert_eq!(document.author.name.as_deref(), Some("Casey"));
        assert_eq!(
            document.author.profile_url.as_deref(),
            Some("https://atom.example/about")
        );
    }

    #[test]
    fn unparsable_body_is_a_connection_error() {
        let error = parse_feed(b"this is not xml").unwrap_err();
        assert!(matches!(error, AppError::Connection(_)));
    }
}
