//! The Config Service: public rule operations.
//!
//! Mutations are serialized by an explicit write lock so that read-modify-write
//! sequences over the id index and rule keys stay atomic. Reads do not take
//! the lock. Multi-key reads and writes fan out concurrently.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{join_all, try_join_all};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, warn};

use super::archive::VersionArchive;
use super::cache::ConfigCache;
use super::migration::{migrate_from_old_format, MigrationOutcome};
use super::notify::{ChangeEvent, ChangeNotifier};
use super::pagination::{paginate, Page, PageRequest};
use crate::config::ServiceConfig;
use crate::error::{Result, StoreError};
use crate::rules::{
    normalize, sort_by_priority, validate_rule, Rule, RuleVersion, ValidationIssue,
    ValidationReport,
};
use crate::storage::{get_json, keys, put_json, Storage};

/// Full rule set as exported for backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigExport {
    pub exported_at: DateTime<Utc>,
    pub environment: String,
    pub rules: Vec<Rule>,
}

/// Owns rule identity, validation, versioning and cache coherence on top of
/// a [`Storage`] backend.
pub struct ConfigService<S: Storage + ?Sized> {
    storage: Arc<S>,
    archive: VersionArchive<S>,
    cache: Mutex<ConfigCache>,
    notifier: Arc<dyn ChangeNotifier>,
    environment: String,
    write_lock: AsyncMutex<()>,
}

impl<S: Storage + ?Sized> ConfigService<S> {
    /// Create a service without touching storage.
    ///
    /// Callers serving a store that may still hold the legacy layout should
    /// use [`ConfigService::start`] instead.
    pub fn new(storage: Arc<S>, notifier: Arc<dyn ChangeNotifier>, config: &ServiceConfig) -> Self {
        Self {
            archive: VersionArchive::new(storage.clone(), config.version_limit),
            storage,
            cache: Mutex::new(ConfigCache::new(config.cache_ttl())),
            notifier,
            environment: config.environment.clone(),
            write_lock: AsyncMutex::new(()),
        }
    }

    /// Create a service and run the legacy-layout migration before returning.
    ///
    /// Legacy data in an unexpected shape is logged and the service starts
    /// with whatever was migrated; storage failures are returned.
    pub async fn start(
        storage: Arc<S>,
        notifier: Arc<dyn ChangeNotifier>,
        config: &ServiceConfig,
    ) -> Result<Self> {
        let service = Self::new(storage, notifier, config);
        match service.migrate_from_old_format().await {
            Ok(outcome) => debug!(?outcome, "Storage layout ready"),
            Err(StoreError::Migration(reason)) => {
                error!(%reason, "Legacy migration failed; serving current layout only")
            }
            Err(e) => return Err(e),
        }
        Ok(service)
    }

    /// Environment name carried in change notifications.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Convert the legacy single-blob layout, if present. Idempotent.
    #[instrument(skip(self))]
    pub async fn migrate_from_old_format(&self) -> Result<MigrationOutcome> {
        let _guard = self.write_lock.lock().await;
        let outcome = migrate_from_old_format(self.storage.as_ref()).await?;
        if outcome != MigrationOutcome::AlreadyMigrated {
            self.cache.lock().invalidate();
        }
        Ok(outcome)
    }

    /// The full rule set sorted by priority, served from cache while fresh.
    #[instrument(skip(self))]
    pub async fn get_config(&self) -> Result<Vec<Rule>> {
        let generation = {
            let cache = self.cache.lock();
            if let Some(rules) = cache.get() {
                debug!(count = rules.len(), "Serving rule set from cache");
                return Ok(rules.to_vec());
            }
            cache.generation()
        };

        let rules = self.load_all().await?;
        self.cache.lock().store_if_current(rules.clone(), generation);
        Ok(rules)
    }

    /// One page of the rule set.
    ///
    /// Always reads the id index for an accurate total and fetches only the
    /// rules on the page. Never reads or fills the whole-set cache.
    #[instrument(skip(self))]
    pub async fn get_config_page(&self, request: PageRequest) -> Result<Page<Rule>> {
        let ids = self.load_ids().await?;
        let window = paginate(ids.len(), request.page, request.limit);

        let mut rules = self.load_rules(window.slice(&ids)).await?;
        sort_by_priority(&mut rules);

        Ok(Page {
            items: rules,
            pagination: window.meta,
        })
    }

    /// Look up a rule: direct key first, then a fresh cache, then a full load.
    #[instrument(skip(self))]
    pub async fn get_rule(&self, id: &str) -> Result<Option<Rule>> {
        match self.load_rule(id).await {
            Ok(Some(rule)) => return Ok(Some(rule)),
            Ok(None) => {}
            Err(e) => warn!(rule_id = %id, error = %e, "Direct rule read failed"),
        }

        let cached = self
            .cache
            .lock()
            .get()
            .map(|rules| rules.iter().find(|rule| rule.id == id).cloned());
        if let Some(found) = cached {
            return Ok(found);
        }

        let rules = self.get_config().await?;
        Ok(rules.into_iter().find(|rule| rule.id == id))
    }

    /// Validate a candidate against the live rule set without storing it.
    pub async fn validate(&self, candidate: &Value, exempt_id: Option<&str>) -> Result<ValidationReport> {
        let mut candidate = candidate.clone();
        normalize(&mut candidate);
        let ids = self.load_ids().await?;
        Ok(validate_rule(&candidate, &ids, exempt_id))
    }

    /// Create a rule.
    #[instrument(skip(self, candidate))]
    pub async fn add_rule(&self, mut candidate: Value) -> Result<Rule> {
        let _guard = self.write_lock.lock().await;

        normalize(&mut candidate);
        let mut ids = self.load_ids().await?;
        let mut rule = self.checked(candidate, &ids, None)?;

        let now = Utc::now();
        rule.created_at.get_or_insert(now);
        rule.updated_at.get_or_insert(now);

        self.save_rule(&rule).await?;
        ids.push(rule.id.clone());
        self.save_ids(&ids).await?;
        self.archive_quietly(&rule).await;

        info!(rule_id = %rule.id, "Rule created");
        self.after_mutation().await;
        Ok(rule)
    }

    /// Replace a rule's content, keeping its id and creation time.
    #[instrument(skip(self, candidate))]
    pub async fn update_rule(&self, id: &str, mut candidate: Value) -> Result<Rule> {
        let _guard = self.write_lock.lock().await;

        let current = self
            .load_rule(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("rule '{}'", id)))?;

        normalize(&mut candidate);
        if let Some(obj) = candidate.as_object_mut() {
            match obj.get("id") {
                None | Some(Value::Null) => {
                    obj.insert("id".to_string(), Value::String(id.to_string()));
                }
                Some(Value::String(given)) if given != id => {
                    return Err(StoreError::invalid(
                        "id",
                        format!("rule id is immutable (expected '{}', got '{}')", id, given),
                    ));
                }
                Some(_) => {}
            }
        }

        let ids = self.load_ids().await?;
        let mut rule = self.checked(candidate, &ids, Some(id))?;
        rule.created_at = current.created_at.or(rule.created_at);
        rule.updated_at = Some(Utc::now());

        self.archive_quietly(&current).await;
        self.save_rule(&rule).await?;

        info!(rule_id = %id, "Rule updated");
        self.after_mutation().await;
        Ok(rule)
    }

    /// Remove a rule. Returns `false` if it did not exist.
    ///
    /// The rule's version history is kept.
    #[instrument(skip(self))]
    pub async fn delete_rule(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let Some(current) = self.load_rule(id).await? else {
            debug!(rule_id = %id, "Delete of unknown rule");
            return Ok(false);
        };

        self.archive_quietly(&current).await;

        let mut ids = self.load_ids().await?;
        ids.retain(|existing| existing != id);
        self.save_ids(&ids).await?;
        self.storage.delete(&keys::rule(id)).await?;

        info!(rule_id = %id, "Rule deleted");
        self.after_mutation().await;
        Ok(true)
    }

    /// Rewrite priorities to match `ordered_ids` (0-based).
    ///
    /// `ordered_ids` must be exactly the live id set; nothing is written
    /// otherwise.
    #[instrument(skip(self, ordered_ids), fields(count = ordered_ids.len()))]
    pub async fn reorder_rules(&self, ordered_ids: &[String]) -> Result<Vec<Rule>> {
        let _guard = self.write_lock.lock().await;

        let ids = self.load_ids().await?;
        check_reorder(&ids, ordered_ids)?;

        let loaded = try_join_all(ordered_ids.iter().map(|id| self.load_rule(id))).await?;
        let mut rules = Vec::with_capacity(loaded.len());
        for (id, rule) in ordered_ids.iter().zip(loaded) {
            rules.push(rule.ok_or_else(|| StoreError::NotFound(format!("rule '{}'", id)))?);
        }

        join_all(rules.iter().map(|rule| self.archive_quietly(rule))).await;

        let now = Utc::now();
        for (position, rule) in rules.iter_mut().enumerate() {
            rule.priority = Some(position as i64);
            rule.updated_at = Some(now);
        }

        try_join_all(rules.iter().map(|rule| self.save_rule(rule))).await?;
        self.save_ids(ordered_ids).await?;

        info!(count = rules.len(), "Rules reordered");
        self.after_mutation().await;
        Ok(rules)
    }

    /// Restore a rule to an archived version, recreating it if deleted.
    #[instrument(skip(self))]
    pub async fn revert_rule(&self, id: &str, version_id: &str) -> Result<Rule> {
        let _guard = self.write_lock.lock().await;

        let version = self.archive.find(id, version_id).await?.ok_or_else(|| {
            StoreError::NotFound(format!("version '{}' of rule '{}'", version_id, id))
        })?;

        let mut restored = version.rule;
        restored.id = id.to_string();
        restored.updated_at = Some(Utc::now());

        match self.load_rule(id).await? {
            Some(current) => {
                self.archive_quietly(&current).await;
                self.save_rule(&restored).await?;
            }
            None => {
                self.save_rule(&restored).await?;
                let mut ids = self.load_ids().await?;
                if !ids.iter().any(|existing| existing == id) {
                    ids.push(id.to_string());
                    self.save_ids(&ids).await?;
                }
            }
        }

        info!(rule_id = %id, version_id = %version_id, "Rule reverted");
        self.after_mutation().await;
        Ok(restored)
    }

    /// A rule's archived versions, newest first.
    pub async fn list_versions(&self, id: &str) -> Result<Vec<RuleVersion>> {
        self.archive.history(id).await
    }

    /// One page of a rule's archived versions.
    pub async fn list_versions_page(&self, id: &str, request: PageRequest) -> Result<Page<RuleVersion>> {
        self.archive.page(id, request).await
    }

    /// The full rule set for backup.
    pub async fn export_config(&self) -> Result<ConfigExport> {
        Ok(ConfigExport {
            exported_at: Utc::now(),
            environment: self.environment.clone(),
            rules: self.get_config().await?,
        })
    }

    fn checked(&self, candidate: Value, ids: &[String], exempt_id: Option<&str>) -> Result<Rule> {
        let report = validate_rule(&candidate, ids, exempt_id);
        if !report.valid {
            return Err(StoreError::Validation(report.errors));
        }
        for ValidationIssue { field, message } in &report.warnings {
            warn!(%field, %message, "Rule validation warning");
        }
        Rule::from_value(candidate).map_err(|e| match e {
            StoreError::Serialization(e) => StoreError::invalid("rule", e.to_string()),
            other => other,
        })
    }

    async fn load_ids(&self) -> Result<Vec<String>> {
        Ok(get_json(self.storage.as_ref(), keys::RULE_IDS)
            .await?
            .unwrap_or_default())
    }

    async fn save_ids(&self, ids: &[String]) -> Result<()> {
        put_json(self.storage.as_ref(), keys::RULE_IDS, ids).await
    }

    async fn load_rule(&self, id: &str) -> Result<Option<Rule>> {
        get_json(self.storage.as_ref(), &keys::rule(id)).await
    }

    async fn save_rule(&self, rule: &Rule) -> Result<()> {
        put_json(self.storage.as_ref(), &keys::rule(&rule.id), rule).await
    }

    /// Fetch the given rules concurrently; ids without a body are skipped.
    async fn load_rules(&self, ids: &[String]) -> Result<Vec<Rule>> {
        let loaded = try_join_all(ids.iter().map(|id| self.load_rule(id))).await?;
        Ok(ids
            .iter()
            .zip(loaded)
            .filter_map(|(id, rule)| {
                if rule.is_none() {
                    warn!(rule_id = %id, "Index entry without a rule body");
                }
                rule
            })
            .collect())
    }

    async fn load_all(&self) -> Result<Vec<Rule>> {
        let ids = self.load_ids().await?;
        let mut rules = self.load_rules(&ids).await?;
        sort_by_priority(&mut rules);
        Ok(rules)
    }

    /// Archive a prior state. A failed archive write does not fail the
    /// mutation that triggered it.
    async fn archive_quietly(&self, rule: &Rule) {
        if let Err(e) = self.archive.archive(rule).await {
            warn!(rule_id = %rule.id, error = %e, "Failed to archive rule version");
        }
    }

    async fn after_mutation(&self) {
        self.cache.lock().invalidate();

        let event = ChangeEvent::config_update(&self.environment);
        if let Err(e) = self.notifier.notify(&event).await {
            warn!(error = %e, "Failed to send change notification");
        }
    }
}

/// Check that `ordered_ids` is a permutation of `ids`, naming the first
/// offending id otherwise.
fn check_reorder(ids: &[String], ordered_ids: &[String]) -> Result<()> {
    let known: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(ordered_ids.len());

    for id in ordered_ids {
        if !known.contains(id.as_str()) {
            return Err(StoreError::invalid(
                "orderedIds",
                format!("unknown rule id '{}'", id),
            ));
        }
        if !seen.insert(id.as_str()) {
            return Err(StoreError::invalid(
                "orderedIds",
                format!("rule id '{}' listed more than once", id),
            ));
        }
    }

    if let Some(missing) = ids.iter().find(|id| !seen.contains(id.as_str())) {
        return Err(StoreError::invalid(
            "orderedIds",
            format!("missing rule id '{}'", missing),
        ));
    }
    Ok(())
}
