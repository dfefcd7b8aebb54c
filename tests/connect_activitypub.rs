//! End-to-end connect cycle against a canned ActivityPub remote

mod common;

use common::{StubRemote, StubResponse, TestEngine};
use serde_json::json;
use tributary::data::{FollowingFormat, FollowingStatus};

fn activity_json(body: serde_json::Value) -> StubResponse {
    StubResponse {
        content_type: "application/activity+json".to_string(),
        body: body.to_string(),
    }
}

/// Serve an actor whose outbox spans two pages of Create-wrapped notes.
async fn activitypub_remote() -> StubRemote {
    StubRemote::serve_with(|base| {
        let note = |index: usize, published: &str| {
            json!({
                "id": format!("{base}/notes/{index}"),
                "type": "Note",
                "content": format!("<p>note {index}</p><script>x()</script>"),
                "published": published,
                "attributedTo": format!("{base}/users/anna"),
            })
        };
        let create = |index: usize, published: &str| {
            json!({
                "id": format!("{base}/activities/{index}"),
                "type": "Create",
                "object": note(index, published),
            })
        };

        let actor = json!({
            "id": format!("{base}/users/anna"),
            "type": "Person",
            "name": "Anna",
            "preferredUsername": "anna",
            "url": format!("{base}/@anna"),
            "icon": {"type": "Image", "url": format!("{base}/avatar.png")},
            "inbox": format!("{base}/users/anna/inbox"),
            "outbox": format!("{base}/users/anna/outbox"),
        });

        let outbox_page_1 = json!({
            "id": format!("{base}/users/anna/outbox"),
            "type": "OrderedCollectionPage",
            "orderedItems": [
                create(3, "2024-04-03T12:00:00Z"),
                create(2, "2024-04-02T12:00:00Z"),
            ],
            "next": format!("{base}/users/anna/outbox?page=2"),
        });

        let outbox_page_2 = json!({
            "id": format!("{base}/users/anna/outbox?page=2"),
            "type": "OrderedCollectionPage",
            "orderedItems": [
                create(1, "2024-04-01T12:00:00Z"),
            ],
        });

        vec![
            ("/users/anna".to_string(), activity_json(actor)),
            (
                "/users/anna/outbox".to_string(),
                activity_json(outbox_page_1),
            ),
            (
                "/users/anna/outbox?page=2".to_string(),
                activity_json(outbox_page_2),
            ),
            ("/users/anna/inbox".to_string(), activity_json(json!({}))),
        ]
    })
    .await
}

#[tokio::test]
async fn connect_paginates_the_outbox_and_unwraps_activities() {
    let remote = activitypub_remote().await;

    let t = TestEngine::new().await;
    let folder = t.engine.folders.create("user-1", "People", 0).await.unwrap();
    let following = t
        .engine
        .followings
        .follow("user-1", &remote.url("/users/anna"), &folder.id)
        .await
        .unwrap();

    t.engine.connect(&following.id).await.unwrap();

    let stored = t
        .engine
        .db
        .get_following(&following.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status(), FollowingStatus::Success);
    assert_eq!(stored.format(), FollowingFormat::ActivityPub);
    assert_eq!(stored.label.as_deref(), Some("Anna"));
    assert_eq!(stored.image_url, Some(remote.url("/avatar.png")));
    assert_eq!(stored.profile_url, Some(remote.url("/@anna")));

    let messages = t
        .engine
        .db
        .get_messages_in_folder("user-1", &folder.id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 3);

    // Create wrappers were dereferenced: the canonical URL is the
    // note's, not the activity's.
    let newest = &messages[0];
    assert_eq!(newest.url, remote.url("/notes/3"));
    assert!(newest.content_html.contains("note 3"));
    assert!(!newest.content_html.contains("script"));

    // attributedTo resolved through the actor document.
    assert_eq!(newest.author_name.as_deref(), Some("Anna"));
    assert_eq!(newest.author_url, Some(remote.url("/@anna")));

    // First connect with 3 items: all within the unread backlog.
    let folder = t.engine.folders.get("user-1", &folder.id).await.unwrap();
    assert_eq!(folder.unread_count, 3);
}

#[tokio::test]
async fn reconnect_stops_at_the_known_boundary_without_duplicates() {
    let remote = activitypub_remote().await;

    let t = TestEngine::new().await;
    let folder = t.engine.folders.create("user-1", "People", 0).await.unwrap();
    let following = t
        .engine
        .followings
        .follow("user-1", &remote.url("/users/anna"), &folder.id)
        .await
        .unwrap();

    t.engine.connect(&following.id).await.unwrap();
    t.engine.connect(&following.id).await.unwrap();

    let messages = t
        .engine
        .db
        .get_messages_in_folder("user-1", &folder.id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 3);

    let stored = t
        .engine
        .db
        .get_following(&following.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status(), FollowingStatus::Success);
}
