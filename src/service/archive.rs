//! Bounded per-rule version history.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::pagination::{paginate, Page, PageRequest};
use crate::error::Result;
use crate::rules::{Rule, RuleVersion};
use crate::storage::{get_json, keys, put_json, Storage};

/// Default number of versions kept per rule.
pub const DEFAULT_VERSION_LIMIT: usize = 50;

/// Keeps the most recent prior states of each rule, newest first.
///
/// Histories outlive their rules: deleting a rule leaves its archive key in
/// place so the rule can later be reverted back into existence.
pub struct VersionArchive<S: Storage + ?Sized> {
    storage: Arc<S>,
    limit: usize,
}

impl<S: Storage + ?Sized> VersionArchive<S> {
    /// Create an archive keeping at most `limit` versions per rule.
    pub fn new(storage: Arc<S>, limit: usize) -> Self {
        Self {
            storage,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Record `rule` as the newest version in its history.
    ///
    /// A rule without an id is skipped (logged, not an error).
    pub async fn archive(&self, rule: &Rule) -> Result<Option<RuleVersion>> {
        if rule.id.is_empty() {
            warn!("Skipping archive of a rule without an id");
            return Ok(None);
        }

        let mut history = self.history(&rule.id).await?;
        let version = RuleVersion {
            version_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            rule: rule.clone(),
        };
        history.insert(0, version.clone());
        history.truncate(self.limit);

        put_json(self.storage.as_ref(), &keys::versions(&rule.id), &history).await?;

        debug!(
            rule_id = %rule.id,
            version_id = %version.version_id,
            kept = history.len(),
            "Archived rule version"
        );
        Ok(Some(version))
    }

    /// Full history of a rule, newest first. Empty if none was recorded.
    pub async fn history(&self, id: &str) -> Result<Vec<RuleVersion>> {
        Ok(get_json(self.storage.as_ref(), &keys::versions(id))
            .await?
            .unwrap_or_default())
    }

    /// Look up a single version.
    pub async fn find(&self, id: &str, version_id: &str) -> Result<Option<RuleVersion>> {
        let history = self.history(id).await?;
        Ok(history.into_iter().find(|v| v.version_id == version_id))
    }

    /// One page of a rule's history. The history is already newest first.
    pub async fn page(&self, id: &str, request: PageRequest) -> Result<Page<RuleVersion>> {
        let history = self.history(id).await?;
        let window = paginate(history.len(), request.page, request.limit);
        Ok(Page {
            items: window.slice(&history).to_vec(),
            pagination: window.meta,
        })
    }
}
