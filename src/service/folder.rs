//! Folder service
//!
//! Folders are ordered mailbox buckets. The only interesting operation
//! is the unread count recomputation: always a wholesale re-scan of
//! persisted message state, never an in-place increment, so concurrent
//! connect cycles converge without locking.

use std::sync::Arc;

use chrono::Utc;

use crate::data::{Database, EntityId, Folder};
use crate::error::AppError;

/// Folder service
pub struct FolderService {
    db: Arc<Database>,
}

impl FolderService {
    /// Create new folder service
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a folder for a user
    pub async fn create(&self, user_id: &str, name: &str, rank: i64) -> Result<Folder, AppError> {
        let folder = Folder {
            id: EntityId::new().0,
            user_id: user_id.to_string(),
            name: name.to_string(),
            rank,
            unread_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };

        self.db.insert_folder(&folder).await?;
        Ok(folder)
    }

    /// Get a folder by ID
    pub async fn get(&self, user_id: &str, folder_id: &str) -> Result<Folder, AppError> {
        self.db
            .get_folder(user_id, folder_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Recompute the cached unread count from message state.
    pub async fn recalculate_unread_count(
        &self,
        user_id: &str,
        folder_id: &str,
    ) -> Result<i64, AppError> {
        let count = self.db.recalculate_unread_count(user_id, folder_id).await?;

        tracing::debug!(
            user_id = %user_id,
            folder_id = %folder_id,
            unread = count,
            "Recalculated folder unread count"
        );

        Ok(count)
    }
}
