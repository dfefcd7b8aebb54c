//! WebSub adapter
//!
//! Subscribes to a discovered hub for a topic URL. Content never flows
//! through the hub handshake: push notification bodies arrive at the
//! host application's callback endpoint and are parsed here with the
//! shared feed conversion, then handed to the same ingestion entry point
//! the connect cycle uses.

use std::collections::HashMap;

use super::document::Document;
use super::{rss, RemoteClient};
use crate::error::AppError;

/// Subscription request parameters
#[derive(Debug, Clone)]
pub struct SubscriptionRequest<'a> {
    pub hub_url: &'a str,
    pub topic_url: &'a str,
    pub callback_url: &'a str,
    pub lease_seconds: u64,
}

/// Ask a hub to start pushing a topic to the callback.
///
/// The hub confirms asynchronously by GETting the callback with a
/// challenge; see [`verify_subscription`].
pub async fn subscribe(
    client: &RemoteClient,
    request: &SubscriptionRequest<'_>,
) -> Result<(), AppError> {
    let lease = request.lease_seconds.to_string();
    client
        .post_form(
            request.hub_url,
            &[
                ("hub.mode", "subscribe"),
                ("hub.topic", request.topic_url),
                ("hub.callback", request.callback_url),
                ("hub.lease_seconds", lease.as_str()),
            ],
        )
        .await?;

    tracing::info!(
        hub = %request.hub_url,
        topic = %request.topic_url,
        "WebSub subscription requested"
    );

    Ok(())
}

/// Ask a hub to stop pushing a topic.
pub async fn unsubscribe(
    client: &RemoteClient,
    hub_url: &str,
    topic_url: &str,
    callback_url: &str,
) -> Result<(), AppError> {
    client
        .post_form(
            hub_url,
            &[
                ("hub.mode", "unsubscribe"),
                ("hub.topic", topic_url),
                ("hub.callback", callback_url),
            ],
        )
        .await
}

/// Answer a hub verification request.
///
/// Pure function over the callback query parameters: returns the
/// challenge to echo when the request is a subscribe/unsubscribe
/// verification for the expected topic, `None` (deny) otherwise.
pub fn verify_subscription(
    params: &HashMap<String, String>,
    expected_topic: &str,
) -> Option<String> {
    let mode = params.get("hub.mode")?;
    if mode != "subscribe" && mode != "unsubscribe" {
        return None;
    }

    if params.get("hub.topic")? != expected_topic {
        return None;
    }

    params.get("hub.challenge").cloned()
}

/// Parse a push notification body into canonical documents.
///
/// Hubs deliver the topic's current feed document (or a diff of it) as
/// the notification payload.
pub fn parse_notification(body: &[u8]) -> Result<Vec<Document>, AppError> {
    let feed = rss::parse_feed(body)?;
    Ok(rss::entries_to_documents(&feed))
}
