//! Protocol adapters
//!
//! Everything that talks to remote sources lives here:
//! - Canonical document model shared by all protocols
//! - ActivityPub actor/outbox resolution with lazy pagination
//! - RSS/Atom feed parsing and WebSub hub discovery
//! - WebSub subscription handshake and push notification parsing
//! - Format detection (pure function over probed metadata)
//!
//! The adapter set is closed: a Following is ActivityPub, RSS or WebSub,
//! and nothing else. Dispatch is an enum match, not dynamic.

pub mod activitypub;
mod document;
pub mod rss;
pub mod websub;

pub use document::{Author, Document, ResolvedSource, SourceItems};

use std::collections::VecDeque;

use crate::config::FetchConfig;
use crate::data::FollowingFormat;
use crate::error::AppError;

/// Accept header for ActivityPub documents
pub(crate) const ACTIVITY_ACCEPT: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Accept header for syndication feeds
pub(crate) const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8";

/// Accept header for first-contact probing, ActivityPub preferred
const PROBE_ACCEPT: &str = "application/activity+json, application/ld+json;q=0.9, \
     application/rss+xml;q=0.8, application/atom+xml;q=0.8, application/xml;q=0.7, */*;q=0.1";

// =============================================================================
// Remote HTTP client
// =============================================================================

/// HTTP client for remote source documents
///
/// Wraps `reqwest` with the configured user-agent, timeout and a response
/// body size bound. All fetch failures surface as connection errors: the
/// state machine records them on the Following.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    max_body_bytes: usize,
}

/// A fetched remote document plus the transport metadata format
/// detection and hub discovery need.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// URL after redirects
    pub url: String,
    /// Content-Type header value, lowercased
    pub content_type: String,
    /// `rel="hub"` target from the HTTP Link header
    pub link_hub: Option<String>,
    /// `rel="self"` target from the HTTP Link header
    pub link_self: Option<String>,
    pub body: Vec<u8>,
}

impl RemoteClient {
    /// Build a client from fetch configuration
    pub fn new(config: &FetchConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Wrap an existing reqwest client
    pub fn from_parts(http: reqwest::Client, max_body_bytes: usize) -> Self {
        Self {
            http,
            max_body_bytes,
        }
    }

    /// GET a remote document with the given Accept header, bounded in size
    pub async fn fetch(&self, url: &str, accept: &str) -> Result<Fetched, AppError> {
        let response = self
            .http
            .get(url)
            .header("Accept", accept)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Connection(format!(
                "GET {} returned HTTP {}",
                url,
                response.status()
            )));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_body_bytes {
                return Err(AppError::Connection(format!(
                    "GET {} response too large: {} bytes",
                    url, length
                )));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let mut link_hub = None;
        let mut link_self = None;
        for value in response.headers().get_all("link") {
            if let Ok(value) = value.to_str() {
                for (target, rel) in parse_link_header(value) {
                    match rel.as_str() {
                        "hub" if link_hub.is_none() => link_hub = Some(target),
                        "self" if link_self.is_none() => link_self = Some(target),
                        _ => {}
                    }
                }
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Connection(format!("GET {} body read failed: {}", url, e)))?;

        if body.len() > self.max_body_bytes {
            return Err(AppError::Connection(format!(
                "GET {} response too large: {} bytes",
                url,
                body.len()
            )));
        }

        Ok(Fetched {
            url: final_url,
            content_type,
            link_hub,
            link_self,
            body: body.to_vec(),
        })
    }

    /// GET and parse an ActivityPub JSON document
    pub async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, AppError> {
        let fetched = self.fetch(url, ACTIVITY_ACCEPT).await?;
        serde_json::from_slice(&fetched.body)
            .map_err(|e| AppError::Connection(format!("GET {} returned invalid JSON: {}", url, e)))
    }

    /// POST a form body (WebSub hub subscription requests)
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<(), AppError> {
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("POST {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Connection(format!(
                "POST {} returned HTTP {}",
                url,
                response.status()
            )));
        }

        Ok(())
    }
}

/// Parse an HTTP Link header value into (target, rel) pairs.
///
/// Handles the `<url>; rel="hub"` form, including multiple
/// comma-separated entries.
fn parse_link_header(value: &str) -> Vec<(String, String)> {
    let mut result = Vec::new();

    for part in value.split(',') {
        let part = part.trim();
        let Some(end) = part.find('>') else { continue };
        let Some(target) = part.strip_prefix('<').map(|rest| &rest[..end - 1]) else {
            continue;
        };

        for param in part[end + 1..].split(';') {
            let Some((key, val)) = param.split_once('=') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("rel") {
                for rel in val.trim().trim_matches('"').split_whitespace() {
                    result.push((target.to_string(), rel.to_ascii_lowercase()));
                }
            }
        }
    }

    result
}

// =============================================================================
// Format detection
// =============================================================================

/// Classify a probed document into a protocol format.
///
/// Pure function over content-type and body bytes; defaults to RSS when
/// undetermined.
pub fn detect_format(content_type: &str, body: &[u8]) -> FollowingFormat {
    if content_type.contains("activity+json")
        || (content_type.contains("ld+json") && content_type.contains("activitystreams"))
    {
        return FollowingFormat::ActivityPub;
    }

    if content_type.contains("rss")
        || content_type.contains("atom")
        || content_type.contains("xml")
    {
        return FollowingFormat::Rss;
    }

    if content_type.contains("json") {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
            if value
                .get("@context")
                .map(|c| c.to_string().contains("activitystreams"))
                .unwrap_or(false)
            {
                return FollowingFormat::ActivityPub;
            }
        }
        return FollowingFormat::Rss;
    }

    // No usable content-type: sniff the body.
    let head: String = String::from_utf8_lossy(&body[..body.len().min(1024)]).to_string();
    let head = head.trim_start();
    if head.starts_with('{') && head.contains("activitystreams") {
        return FollowingFormat::ActivityPub;
    }

    FollowingFormat::Rss
}

// =============================================================================
// Source resolution
// =============================================================================

/// Resolve a remote source document using the adapter selected by
/// `format`, probing content negotiation first when the format is still
/// unknown.
///
/// # Errors
/// `AppError::Connection` when the source is unreachable or unparsable;
/// the connect cycle records this on the Following.
pub async fn resolve(
    client: &RemoteClient,
    url: &str,
    format: FollowingFormat,
) -> Result<ResolvedSource, AppError> {
    match format {
        FollowingFormat::ActivityPub => activitypub::resolve_actor(client, url).await,
        FollowingFormat::Rss | FollowingFormat::WebSub => rss::resolve_feed(client, url).await,
        FollowingFormat::Unknown => {
            let fetched = client.fetch(url, PROBE_ACCEPT).await?;
            match detect_format(&fetched.content_type, &fetched.body) {
                FollowingFormat::ActivityPub => {
                    let value = serde_json::from_slice(&fetched.body).map_err(|e| {
                        AppError::Connection(format!("{} returned invalid JSON: {}", url, e))
                    })?;
                    activitypub::resolve_from_value(url, value)
                }
                _ => rss::resolve_from_fetched(url, &fetched),
            }
        }
    }
}

// =============================================================================
// Item stream
// =============================================================================

/// Restartable, finite, lazy sequence of remote content items.
///
/// `stop()` is the cooperative cancellation affordance: once signalled,
/// the stream yields nothing further and — for the paginated variant —
/// issues no further page fetches. The ingestion pipeline calls it the
/// moment it reaches an already-known item.
pub struct ItemStream {
    stopped: bool,
    inner: StreamInner,
}

enum StreamInner {
    Buffered(VecDeque<Result<Document, AppError>>),
    Outbox(activitypub::OutboxPager),
}

impl ItemStream {
    /// Stream over already-converted documents (feeds, WebSub pushes)
    pub fn from_documents(documents: Vec<Document>) -> Self {
        Self::from_results(documents.into_iter().map(Ok).collect())
    }

    /// Stream over conversion results, errors included
    pub fn from_results(results: Vec<Result<Document, AppError>>) -> Self {
        Self {
            stopped: false,
            inner: StreamInner::Buffered(results.into()),
        }
    }

    /// Stream for a resolved source's items
    pub fn for_source(client: RemoteClient, source: &ResolvedSource) -> Self {
        match &source.items {
            SourceItems::Buffered(documents) => Self::from_documents(documents.clone()),
            SourceItems::Outbox(outbox_url) => Self {
                stopped: false,
                inner: StreamInner::Outbox(activitypub::OutboxPager::new(client, outbox_url)),
            },
        }
    }

    /// Yield the next item in the protocol's natural ordering.
    ///
    /// Conversion failures for single items are yielded as
    /// `Err(AppError::Conversion)` so the pipeline can skip them; a page
    /// fetch failure is yielded once and ends the sequence.
    pub async fn next(&mut self) -> Option<Result<Document, AppError>> {
        if self.stopped {
            return None;
        }

        match &mut self.inner {
            StreamInner::Buffered(queue) => queue.pop_front(),
            StreamInner::Outbox(pager) => pager.next().await,
        }
    }

    /// Signal cooperative cancellation before the next fetch.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
