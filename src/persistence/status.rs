//! Is-live status flag
//!
//! One row per user, updated in place. A missing row is created on the
//! first write.

use std::sync::Arc;
use tracing::{debug, info};

use super::metadata::MetadataStore;
use crate::error::Result;

pub struct StatusFlagStore {
    store: Arc<dyn MetadataStore>,
    user_id: String,
}

impl StatusFlagStore {
    pub fn new(store: Arc<dyn MetadataStore>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }

    /// Upsert the flag with the requested value
    ///
    /// `url` replaces the stored live URL when given; `None` keeps it.
    pub async fn set_live(&self, live: bool, url: Option<&str>) -> Result<()> {
        match self.store.latest_status(&self.user_id).await? {
            Some(existing) => {
                debug!("Updating live status row {} -> {}", existing.id, live);
                self.store.update_status(existing.id, live, url).await?;
            }
            None => {
                debug!("Creating live status row for user {}", self.user_id);
                self.store.insert_status(&self.user_id, live, url).await?;
            }
        }
        info!("Live status set to {}", live);
        Ok(())
    }

    pub async fn is_live(&self) -> Result<bool> {
        Ok(self
            .store
            .latest_status(&self.user_id)
            .await?
            .map(|s| s.is_live)
            .unwrap_or(false))
    }
}
