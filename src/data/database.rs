//! SQLite database operations
//!
//! All database access goes through this module. Every query on a
//! soft-deleted entity applies the `deleted_at IS NULL` filter; responses
//! are hard-deleted and have no filter.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
        })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Following operations
    // =========================================================================

    /// Insert a new Following
    ///
    /// The partial unique index on (user_id, url) rejects a duplicate
    /// non-deleted subscription to the same source.
    pub async fn insert_following(&self, following: &Following) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO followings
                (id, user_id, url, format, status, status_message, folder_id,
                 purge_days, label, profile_url, image_url,
                 created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&following.id)
        .bind(&following.user_id)
        .bind(&following.url)
        .bind(&following.format)
        .bind(&following.status)
        .bind(&following.status_message)
        .bind(&following.folder_id)
        .bind(following.purge_days)
        .bind(&following.label)
        .bind(&following.profile_url)
        .bind(&following.image_url)
        .bind(following.created_at)
        .bind(following.updated_at)
        .bind(following.deleted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a Following by ID
    pub async fn get_following(&self, id: &str) -> Result<Option<Following>, AppError> {
        let following = sqlx::query_as::<_, Following>(
            "SELECT * FROM followings WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(following)
    }

    /// Get a Following by its identity key (user_id, url)
    pub async fn get_following_by_url(
        &self,
        user_id: &str,
        url: &str,
    ) -> Result<Option<Following>, AppError> {
        let following = sqlx::query_as::<_, Following>(
            "SELECT * FROM followings WHERE user_id = ? AND url = ? AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(following)
    }

    /// Get all Followings for a user
    pub async fn get_followings_for_user(&self, user_id: &str) -> Result<Vec<Following>, AppError> {
        let followings = sqlx::query_as::<_, Following>(
            "SELECT * FROM followings WHERE user_id = ? AND deleted_at IS NULL ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(followings)
    }

    /// Get all non-deleted Followings (poller sweep)
    pub async fn get_all_followings(&self) -> Result<Vec<Following>, AppError> {
        let followings = sqlx::query_as::<_, Following>(
            "SELECT * FROM followings WHERE deleted_at IS NULL ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(followings)
    }

    /// Update a Following's mutable fields
    pub async fn update_following(&self, following: &Following) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE followings
            SET format = ?, status = ?, status_message = ?, folder_id = ?,
                purge_days = ?, label = ?, profile_url = ?, image_url = ?,
                updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&following.format)
        .bind(&following.status)
        .bind(&following.status_message)
        .bind(&following.folder_id)
        .bind(following.purge_days)
        .bind(&following.label)
        .bind(&following.profile_url)
        .bind(&following.image_url)
        .bind(Utc::now())
        .bind(&following.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update only the lifecycle status and its message
    pub async fn set_following_status(
        &self,
        id: &str,
        status: FollowingStatus,
        status_message: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE followings
            SET status = ?, status_message = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(status.as_str())
        .bind(status_message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Soft-delete a Following
    ///
    /// Historical messages keep their weak back-reference and remain.
    pub async fn soft_delete_following(&self, id: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE followings SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Message operations
    // =========================================================================

    /// Get a Message by ID
    pub async fn get_message(&self, user_id: &str, id: &str) -> Result<Option<Message>, AppError> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE user_id = ? AND id = ? AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    /// Get a Message by its identity key (user_id, canonical URL)
    pub async fn get_message_by_url(
        &self,
        user_id: &str,
        url: &str,
    ) -> Result<Option<Message>, AppError> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE user_id = ? AND url = ? AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    /// Get all Messages in a folder, newest first
    pub async fn get_messages_in_folder(
        &self,
        user_id: &str,
        folder_id: &str,
    ) -> Result<Vec<Message>, AppError> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE user_id = ? AND folder_id = ? AND deleted_at IS NULL
            ORDER BY rank DESC, id DESC
            "#,
        )
        .bind(user_id)
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Insert a new Message
    pub async fn insert_message(&self, message: &Message) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, user_id, folder_id, following_id, url, title, summary,
                 content_html, image_url, author_name, author_url,
                 author_image_url, publish_date, rank, read, read_at,
                 in_reply_to, my_response, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.user_id)
        .bind(&message.folder_id)
        .bind(&message.following_id)
        .bind(&message.url)
        .bind(&message.title)
        .bind(&message.summary)
        .bind(&message.content_html)
        .bind(&message.image_url)
        .bind(&message.author_name)
        .bind(&message.author_url)
        .bind(&message.author_image_url)
        .bind(message.publish_date)
        .bind(message.rank)
        .bind(message.read)
        .bind(message.read_at)
        .bind(&message.in_reply_to)
        .bind(&message.my_response)
        .bind(message.created_at)
        .bind(message.updated_at)
        .bind(message.deleted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Overwrite a Message's mutable fields so remote edits propagate.
    ///
    /// Read state, folder membership and the response marker are not
    /// touched here.
    pub async fn update_message_content(&self, message: &Message) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE messages
            SET title = ?, summary = ?, content_html = ?, image_url = ?,
                author_name = ?, author_url = ?, author_image_url = ?,
                publish_date = ?, rank = ?, in_reply_to = ?, updated_at = ?
            WHERE user_id = ? AND id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&message.title)
        .bind(&message.summary)
        .bind(&message.content_html)
        .bind(&message.image_url)
        .bind(&message.author_name)
        .bind(&message.author_url)
        .bind(&message.author_image_url)
        .bind(message.publish_date)
        .bind(message.rank)
        .bind(&message.in_reply_to)
        .bind(Utc::now())
        .bind(&message.user_id)
        .bind(&message.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set a Message's read flag and timestamp
    pub async fn set_message_read(
        &self,
        user_id: &str,
        message_id: &str,
        read: bool,
    ) -> Result<(), AppError> {
        let read_at: Option<DateTime<Utc>> = read.then(Utc::now);

        sqlx::query(
            r#"
            UPDATE messages
            SET read = ?, read_at = ?, updated_at = ?
            WHERE user_id = ? AND id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(read)
        .bind(read_at)
        .bind(Utc::now())
        .bind(user_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write-through update of the cached "my response" marker
    pub async fn set_message_response(
        &self,
        user_id: &str,
        message_id: &str,
        response_type: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE messages
            SET my_response = ?, updated_at = ?
            WHERE user_id = ? AND id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(response_type)
        .bind(Utc::now())
        .bind(user_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Soft-delete read messages from one Following that were read before
    /// the purge cutoff.
    ///
    /// # Returns
    /// Number of purged messages
    pub async fn purge_read_messages(
        &self,
        user_id: &str,
        following_id: &str,
        purge_days: i64,
    ) -> Result<u64, AppError> {
        let cutoff = Utc::now() - Duration::days(purge_days);

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET deleted_at = ?, updated_at = ?
            WHERE user_id = ? AND following_id = ?
              AND read = 1 AND read_at < ?
              AND deleted_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(user_id)
        .bind(following_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Folder operations
    // =========================================================================

    /// Insert a new Folder
    pub async fn insert_folder(&self, folder: &Folder) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO folders
                (id, user_id, name, rank, unread_count, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&folder.id)
        .bind(&folder.user_id)
        .bind(&folder.name)
        .bind(folder.rank)
        .bind(folder.unread_count)
        .bind(folder.created_at)
        .bind(folder.updated_at)
        .bind(folder.deleted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a Folder by ID
    pub async fn get_folder(&self, user_id: &str, id: &str) -> Result<Option<Folder>, AppError> {
        let folder = sqlx::query_as::<_, Folder>(
            "SELECT * FROM folders WHERE user_id = ? AND id = ? AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(folder)
    }

    /// Recompute a folder's unread count from persisted message state.
    ///
    /// Always a full re-scan, never an increment, so concurrent writers
    /// converge on the authoritative value.
    ///
    /// # Returns
    /// The recomputed count
    pub async fn recalculate_unread_count(
        &self,
        user_id: &str,
        folder_id: &str,
    ) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM messages
            WHERE user_id = ? AND folder_id = ? AND read = 0 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(folder_id)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            r#"
            UPDATE folders
            SET unread_count = ?, updated_at = ?
            WHERE user_id = ? AND id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(count)
        .bind(Utc::now())
        .bind(user_id)
        .bind(folder_id)
        .execute(&self.pool)
        .await?;

        Ok(count)
    }

    // =========================================================================
    // Response operations
    // =========================================================================

    /// Get the Response for (user_id, message_id), if any
    pub async fn get_response_by_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<Option<Response>, AppError> {
        let response = sqlx::query_as::<_, Response>(
            "SELECT * FROM responses WHERE user_id = ? AND message_id = ?",
        )
        .bind(user_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(response)
    }

    /// Insert a new Response
    ///
    /// The unique index on (user_id, message_id) rejects a second live
    /// response for the same message.
    pub async fn insert_response(&self, response: &Response) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO responses
                (id, user_id, actor_url, message_id, message_url,
                 response_type, value, activity_uri, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&response.id)
        .bind(&response.user_id)
        .bind(&response.actor_url)
        .bind(&response.message_id)
        .bind(&response.message_url)
        .bind(&response.response_type)
        .bind(&response.value)
        .bind(&response.activity_uri)
        .bind(response.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Hard-delete a Response
    pub async fn delete_response(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM responses WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Count all Responses for a message (test/diagnostic helper)
    pub async fn count_responses_for_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM responses WHERE user_id = ? AND message_id = ?")
                .bind(user_id)
                .bind(message_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}
