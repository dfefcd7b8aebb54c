//! Inbox ingestion pipeline
//!
//! Converts a stream of canonical remote documents into stored Messages.
//! Deduplication is by (user, canonical URL): an already-known item both
//! updates in place and signals that everything past it was ingested on
//! a previous cycle, so pagination stops there.

use std::sync::Arc;

use chrono::Utc;

use crate::data::{Database, EntityId, Following, Message};
use crate::error::AppError;
use crate::protocol::{Document, ItemStream};

/// Inbox service
pub struct InboxService {
    db: Arc<Database>,
    /// How many of the newest items stay unread on a first connect
    unread_backlog: usize,
}

/// What one ingest cycle did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Messages created
    pub created: usize,
    /// Known messages updated in place (at most 1: the dedup boundary)
    pub updated: usize,
    /// Items skipped because they could not be converted
    pub skipped: usize,
}

impl InboxService {
    /// Create new inbox service
    pub fn new(db: Arc<Database>, unread_backlog: usize) -> Self {
        Self { db, unread_backlog }
    }

    /// Ingest a finite stream of remote documents for one Following.
    ///
    /// Items are processed in the order the adapter yields them
    /// (reverse-chronological for ActivityPub and RSS). The stream is
    /// stopped cooperatively at the first already-known item.
    ///
    /// # Errors
    /// Storage errors abort the whole ingest. Conversion errors skip
    /// only the affected item; a mid-stream fetch error ends the
    /// sequence after being reported.
    ///
    /// The caller recomputes the folder's unread count afterwards; this
    /// pipeline never touches it.
    pub async fn ingest(
        &self,
        following: &Following,
        mut stream: ItemStream,
        is_first_connect: bool,
    ) -> Result<IngestOutcome, AppError> {
        let mut outcome = IngestOutcome::default();

        while let Some(item) = stream.next().await {
            let document = match item {
                Ok(document) => document,
                Err(error) if error.is_conversion() => {
                    tracing::warn!(
                        %error,
                        following_id = %following.id,
                        "Skipping unconvertible item"
                    );
                    outcome.skipped += 1;
                    continue;
                }
                Err(error) => {
                    tracing::warn!(
                        %error,
                        following_id = %following.id,
                        "Item sequence ended early"
                    );
                    break;
                }
            };

            // RULE: on a first connect the newest items stay unread up
            // to the backlog threshold; everything older is marked read
            // immediately so the unread counter is not flooded.
            let mark_read = is_first_connect && outcome.created >= self.unread_backlog;

            if self.save_document(following, &document, mark_read).await? {
                outcome.created += 1;
            } else {
                // Reached an already-known item. Remote collections are
                // reverse-chronological, so everything past this point
                // was ingested on a previous cycle.
                outcome.updated += 1;
                stream.stop();
                break;
            }
        }

        tracing::info!(
            following_id = %following.id,
            created = outcome.created,
            updated = outcome.updated,
            skipped = outcome.skipped,
            "Ingest complete"
        );

        Ok(outcome)
    }

    /// Store one document, deduplicating by (user, canonical URL).
    ///
    /// Mutable fields are always overwritten so remote edits propagate;
    /// read state and folder membership are preserved on updates.
    ///
    /// # Returns
    /// `true` when a new Message was created
    async fn save_document(
        &self,
        following: &Following,
        document: &Document,
        mark_read: bool,
    ) -> Result<bool, AppError> {
        if let Some(mut existing) = self
            .db
            .get_message_by_url(&following.user_id, &document.url)
            .await?
        {
            apply_document(&mut existing, document);
            self.db.update_message_content(&existing).await?;
            return Ok(false);
        }

        let now = Utc::now();
        let mut message = Message {
            id: EntityId::new().0,
            user_id: following.user_id.clone(),
            folder_id: following.folder_id.clone(),
            following_id: Some(following.id.clone()),
            url: document.url.clone(),
            title: None,
            summary: None,
            content_html: String::new(),
            image_url: None,
            author_name: None,
            author_url: None,
            author_image_url: None,
            publish_date: now,
            rank: 0,
            read: mark_read,
            read_at: mark_read.then_some(now),
            in_reply_to: None,
            my_response: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        apply_document(&mut message, document);

        self.db.insert_message(&message).await?;
        Ok(true)
    }

    /// Toggle a message's read state.
    ///
    /// Already in the target state is success without a write. On
    /// change, the folder's unread count is recomputed from storage.
    pub async fn set_read(
        &self,
        user_id: &str,
        message_id: &str,
        read: bool,
    ) -> Result<(), AppError> {
        let message = self
            .db
            .get_message(user_id, message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if message.read == read {
            return Ok(());
        }

        self.db.set_message_read(user_id, message_id, read).await?;
        self.db
            .recalculate_unread_count(user_id, &message.folder_id)
            .await?;

        Ok(())
    }

    /// Purge read messages from one Following that aged past its purge
    /// window.
    ///
    /// # Returns
    /// Number of purged messages
    pub async fn purge(&self, following: &Following) -> Result<u64, AppError> {
        let purged = self
            .db
            .purge_read_messages(&following.user_id, &following.id, following.purge_days)
            .await?;

        if purged > 0 {
            tracing::info!(
                following_id = %following.id,
                purged,
                "Purged read messages"
            );
        }

        Ok(purged)
    }
}

/// Overwrite a message's mutable fields from a document.
fn apply_document(message: &mut Message, document: &Document) {
    message.title = document.title.clone();
    message.summary = document.summary.clone();
    message.content_html = document.content_html.clone();
    message.image_url = document.image_url.clone();
    message.author_name = document.author.name.clone();
    message.author_url = document.author.profile_url.clone();
    message.author_image_url = document.author.image_url.clone();
    message.publish_date = document.published;
    message.rank = document.rank();
    message.in_reply_to = document.in_reply_to.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Folder, FollowingFormat, FollowingStatus};
    use crate::protocol::Author;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    async fn create_test_db() -> (Arc<Database>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::connect(&db_path).await.unwrap();
        (Arc::new(db), temp_dir)
    }

    async fn seed_following(db: &Database) -> Following {
        let folder = Folder {
            id: EntityId::new().0,
            user_id: "user-1".to_string(),
            name: "Inbox".to_string(),
            rank: 0,
            unread_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        db.insert_folder(&folder).await.unwrap();

        let following = Following {
            id: EntityId::new().0,
            user_id: "user-1".to_string(),
            url: "https://journal.example/feed.xml".to_string(),
            format: FollowingFormat::Rss.as_str().to_string(),
            status: FollowingStatus::New.as_str().to_string(),
            status_message: String::new(),
            folder_id: folder.id.clone(),
            purge_days: 14,
            label: None,
            profile_url: None,
            image_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        db.insert_following(&following).await.unwrap();
        following
    }

    /// Documents newest-first, the order remote collections yield them.
    fn documents(count: usize) -> Vec<Document> {
        let newest = Utc::now();
        (0..count)
            .map(|index| Document {
                url: format!("https://journal.example/posts/{}", count - index),
                title: Some(format!("Post {}", count - index)),
                summary: None,
                content_html: format!("<p>post {}</p>", count - index),
                image_url: None,
                author: Author::default(),
                published: newest - Duration::hours(index as i64),
                in_reply_to: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn ingesting_the_same_item_twice_stores_it_once() {
        let (db, _tmp) = create_test_db().await;
        let following = seed_following(&db).await;
        let inbox = InboxService::new(db.clone(), 6);

        let mut document = documents(1).remove(0);
        let first = inbox
            .ingest(&following, ItemStream::from_documents(vec![document.clone()]), true)
            .await
            .unwrap();
        assert_eq!(first.created, 1);

        // Second ingestion of an edited version updates in place.
        document.content_html = "<p>edited</p>".to_string();
        let second = inbox
            .ingest(&following, ItemStream::from_documents(vec![document.clone()]), false)
            .await
            .unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 1);

        let stored = db
            .get_message_by_url("user-1", &document.url)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content_html, "<p>edited</p>");
    }

    #[tokio::test]
    async fn ingest_stops_at_the_first_known_item() {
        let (db, _tmp) = create_test_db().await;
        let following = seed_following(&db).await;
        let inbox = InboxService::new(db.clone(), 6);

        let items = documents(10);

        // Item 5 (in feed order) is already known.
        inbox
            .ingest(
                &following,
                ItemStream::from_documents(vec![items[4].clone()]),
                false,
            )
            .await
            .unwrap();

        let outcome = inbox
            .ingest(&following, ItemStream::from_documents(items.clone()), false)
            .await
            .unwrap();

        // Items 1-4 created, item 5 updated, items 6-10 never touched.
        assert_eq!(outcome.created, 4);
        assert_eq!(outcome.updated, 1);
        for item in &items[..5] {
            assert!(db.get_message_by_url("user-1", &item.url).await.unwrap().is_some());
        }
        for item in &items[5..] {
            assert!(db.get_message_by_url("user-1", &item.url).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn first_connect_leaves_only_the_newest_backlog_unread() {
        let (db, _tmp) = create_test_db().await;
        let following = seed_following(&db).await;
        let inbox = InboxService::new(db.clone(), 6);

        let items = documents(10);
        let outcome = inbox
            .ingest(&following, ItemStream::from_documents(items.clone()), true)
            .await
            .unwrap();
        assert_eq!(outcome.created, 10);

        for (index, item) in items.iter().enumerate() {
            let stored = db
                .get_message_by_url("user-1", &item.url)
                .await
                .unwrap()
                .unwrap();
            if index < 6 {
                assert!(!stored.read, "item {} should be unread", index + 1);
            } else {
                assert!(stored.read, "item {} should be read", index + 1);
                assert!(stored.read_at.is_some());
            }
        }

        let unread = db
            .recalculate_unread_count("user-1", &following.folder_id)
            .await
            .unwrap();
        assert_eq!(unread, 6);
    }

    #[tokio::test]
    async fn later_connects_leave_new_items_unread() {
        let (db, _tmp) = create_test_db().await;
        let following = seed_following(&db).await;
        let inbox = InboxService::new(db.clone(), 6);

        let outcome = inbox
            .ingest(&following, ItemStream::from_documents(documents(8)), false)
            .await
            .unwrap();
        assert_eq!(outcome.created, 8);

        let unread = db
            .recalculate_unread_count("user-1", &following.folder_id)
            .await
            .unwrap();
        assert_eq!(unread, 8);
    }

    #[tokio::test]
    async fn conversion_errors_skip_only_the_affected_item() {
        let (db, _tmp) = create_test_db().await;
        let following = seed_following(&db).await;
        let inbox = InboxService::new(db.clone(), 6);

        let mut items: Vec<Result<Document, AppError>> =
            documents(3).into_iter().map(Ok).collect();
        items.insert(
            1,
            Err(AppError::Conversion("entry has no usable link".to_string())),
        );

        let outcome = inbox
            .ingest(&following, ItemStream::from_results(items), false)
            .await
            .unwrap();

        assert_eq!(outcome.created, 3);
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn stream_errors_end_the_sequence_without_failing_the_cycle() {
        let (db, _tmp) = create_test_db().await;
        let following = seed_following(&db).await;
        let inbox = InboxService::new(db.clone(), 6);

        let mut items: Vec<Result<Document, AppError>> =
            documents(2).into_iter().map(Ok).collect();
        items.push(Err(AppError::Connection("page fetch failed".to_string())));
        items.extend(documents(1).into_iter().map(Ok));

        let outcome = inbox
            .ingest(&following, ItemStream::from_results(items), false)
            .await
            .unwrap();

        // The two items before the failure landed; nothing after did.
        assert_eq!(outcome.created, 2);
    }

    #[tokio::test]
    async fn set_read_is_idempotent_and_recounts() {
        let (db, _tmp) = create_test_db().await;
        let following = seed_following(&db).await;
        let inbox = InboxService::new(db.clone(), 6);

        inbox
            .ingest(&following, ItemStream::from_documents(documents(1)), false)
            .await
            .unwrap();
        let message = db
            .get_message_by_url("user-1", "https://journal.example/posts/1")
            .await
            .unwrap()
            .unwrap();
        assert!(!message.read);

        inbox.set_read("user-1", &message.id, true).await.unwrap();
        inbox.set_read("user-1", &message.id, true).await.unwrap();

        let stored = db.get_message("user-1", &message.id).await.unwrap().unwrap();
        assert!(stored.read);

        let folder = db
            .get_folder("user-1", &following.folder_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(folder.unread_count, 0);
    }

    #[tokio::test]
    async fn purge_removes_only_read_messages_past_the_window() {
        let (db, _tmp) = create_test_db().await;
        let following = seed_following(&db).await;
        let inbox = InboxService::new(db.clone(), 6);

        let old_read_at = Utc::now() - Duration::days(30);
        let now = Utc::now();

        let mut old_read = Message {
            id: EntityId::new().0,
            user_id: "user-1".to_string(),
            folder_id: following.folder_id.clone(),
            following_id: Some(following.id.clone()),
            url: "https://journal.example/posts/old".to_string(),
            title: None,
            summary: None,
            content_html: String::new(),
            image_url: None,
            author_name: None,
            author_url: None,
            author_image_url: None,
            publish_date: old_read_at,
            rank: 0,
            read: true,
            read_at: Some(old_read_at),
            in_reply_to: None,
            my_response: None,
            created_at: old_read_at,
            updated_at: old_read_at,
            deleted_at: None,
        };
        db.insert_message(&old_read).await.unwrap();

        old_read.id = EntityId::new().0;
        old_read.url = "https://journal.example/posts/old-unread".to_string();
        old_read.read = false;
        old_read.read_at = None;
        db.insert_message(&old_read).await.unwrap();

        old_read.id = EntityId::new().0;
        old_read.url = "https://journal.example/posts/fresh".to_string();
        old_read.read = true;
        old_read.read_at = Some(now);
        db.insert_message(&old_read).await.unwrap();

        let purged = inbox.purge(&following).await.unwrap();
        assert_eq!(purged, 1);

        assert!(
            db.get_message_by_url("user-1", "https://journal.example/posts/old")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            db.get_message_by_url("user-1", "https://journal.example/posts/old-unread")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            db.get_message_by_url("user-1", "https://journal.example/posts/fresh")
                .await
                .unwrap()
                .is_some()
        );
    }
}
