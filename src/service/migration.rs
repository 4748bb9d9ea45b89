//! Migration from the legacy single-blob layout.
//!
//! The legacy layout kept every rule in one JSON array under `rules` and
//! per-rule histories under `versions:<id>`. The current layout stores one key
//! per rule plus the `rule_ids` index. The index is written last, so an
//! interrupted migration simply runs again on the next start.

use futures::future::try_join_all;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{Result, StoreError};
use crate::rules::{normalize, validate_rule, validate_rules, Rule};
use crate::storage::{keys, put_json, Storage};

/// What a migration run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The id index already exists; nothing was touched.
    AlreadyMigrated,
    /// No legacy data; an empty index was created.
    Initialized,
    /// Legacy rules were fanned out into per-rule keys.
    Migrated {
        rules: usize,
        histories: usize,
        skipped: usize,
    },
}

/// Convert the legacy layout to the per-rule layout. Idempotent.
///
/// Fails without writing anything when the legacy blob is not a JSON array.
/// The legacy `rules` key is left in place.
pub async fn migrate_from_old_format<S: Storage + ?Sized>(storage: &S) -> Result<MigrationOutcome> {
    if storage.exists(keys::RULE_IDS).await? {
        return Ok(MigrationOutcome::AlreadyMigrated);
    }

    let Some(bytes) = storage.get(keys::LEGACY_RULES).await? else {
        put_json(storage, keys::RULE_IDS, &Vec::<String>::new()).await?;
        info!("No legacy rules found, initialized empty rule index");
        return Ok(MigrationOutcome::Initialized);
    };

    let legacy: Value = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Migration(format!("legacy rules are not valid JSON: {}", e)))?;
    let Value::Array(mut candidates) = legacy else {
        return Err(StoreError::Migration(
            "legacy rules blob is not an array".to_string(),
        ));
    };

    candidates.iter_mut().for_each(normalize);

    for issue in &validate_rules(&candidates).warnings {
        warn!(field = %issue.field, message = %issue.message, "Legacy rule set warning");
    }

    let mut ids: Vec<String> = Vec::with_capacity(candidates.len());
    let mut rules: Vec<Rule> = Vec::with_capacity(candidates.len());
    let mut skipped = 0;

    for (index, candidate) in candidates.into_iter().enumerate() {
        let report = validate_rule(&candidate, &[], None);
        if !report.valid {
            for issue in &report.errors {
                warn!(index, field = %issue.field, message = %issue.message, "Legacy rule failed validation");
            }
            skipped += 1;
            continue;
        }

        match Rule::from_value(candidate) {
            Ok(rule) if rule.id.is_empty() || ids.contains(&rule.id) => {
                warn!(index, rule_id = %rule.id, "Skipping legacy rule with missing or duplicate id");
                skipped += 1;
            }
            Ok(rule) => {
                ids.push(rule.id.clone());
                rules.push(rule);
            }
            Err(e) => {
                error!(index, error = %e, "Skipping undecodable legacy rule");
                skipped += 1;
            }
        }
    }

    try_join_all(rules.iter().map(|rule| async move {
        put_json(storage, &keys::rule(&rule.id), rule).await
    }))
    .await?;

    let copied = try_join_all(ids.iter().map(|id| copy_legacy_history(storage, id))).await?;
    let histories = copied.into_iter().filter(|copied| *copied).count();

    put_json(storage, keys::RULE_IDS, &ids).await?;

    info!(
        rules = rules.len(),
        histories, skipped, "Migrated legacy rules to per-rule layout"
    );
    Ok(MigrationOutcome::Migrated {
        rules: rules.len(),
        histories,
        skipped,
    })
}

/// Copy a legacy history blob to its new key, content untouched.
async fn copy_legacy_history<S: Storage + ?Sized>(storage: &S, id: &str) -> Result<bool> {
    match storage.get(&keys::legacy_versions(id)).await? {
        Some(bytes) => {
            storage.put(&keys::versions(id), bytes).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{get_json, MemoryStorage};
    use serde_json::json;

    fn legacy_rule(id: &str, order: i64) -> Value {
        json!({
            "version": 0,
            "name": "Test Bot Protection",
            "description": "Rate limit test for method matching",
            "rateLimit": {"limit": 10, "period": 600},
            "fingerprint": {"parameters": [{"name": "clientIP"}]},
            "initialMatch": {
                "conditions": [{"field": "method", "operator": "eq", "value": "POST"}],
                "action": {"type": "rateLimit"}
            },
            "elseIfActions": [],
            "id": id,
            "order": order
        })
    }

    #[tokio::test]
    async fn test_empty_store_initializes_index() {
        let storage = MemoryStorage::new();
        let outcome = migrate_from_old_format(&storage).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Initialized);

        let ids: Vec<String> = get_json(&storage, keys::RULE_IDS).await.unwrap().unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_legacy_rules() {
        let storage = MemoryStorage::new();
        let legacy = json!([legacy_rule("a", 1), legacy_rule("b", 0)]);
        put_json(&storage, keys::LEGACY_RULES, &legacy).await.unwrap();
        storage
            .put(&keys::legacy_versions("a"), b"[{\"opaque\":true}]".to_vec())
            .await
            .unwrap();

        let outcome = migrate_from_old_format(&storage).await.unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                rules: 2,
                histories: 1,
                skipped: 0
            }
        );

        let ids: Vec<String> = get_json(&storage, keys::RULE_IDS).await.unwrap().unwrap();
        assert_eq!(ids, vec!["a", "b"]);

        let rule: Rule = get_json(&storage, &keys::rule("a")).await.unwrap().unwrap();
        assert_eq!(rule.priority, Some(1));
        assert_eq!(
            rule.initial_match.conditions[0].operator,
            crate::rules::Operator::Equals
        );

        // History copied byte for byte
        assert_eq!(
            storage.get(&keys::versions("a")).await.unwrap(),
            Some(b"[{\"opaque\":true}]".to_vec())
        );
        assert!(storage.get(&keys::versions("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let storage = MemoryStorage::new();
        put_json(&storage, keys::LEGACY_RULES, &json!([legacy_rule("a", 0)]))
            .await
            .unwrap();

        migrate_from_old_format(&storage).await.unwrap();
        let after_first = storage.snapshot();
        let writes = storage.write_count();

        let outcome = migrate_from_old_format(&storage).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::AlreadyMigrated);
        assert_eq!(storage.snapshot(), after_first);
        assert_eq!(storage.write_count(), writes);
    }

    #[tokio::test]
    async fn test_non_array_blob_fails_without_writes() {
        let storage = MemoryStorage::new();
        put_json(&storage, keys::LEGACY_RULES, &json!({"rules": []}))
            .await
            .unwrap();
        let writes = storage.write_count();

        let err = migrate_from_old_format(&storage).await.unwrap_err();
        assert!(matches!(err, StoreError::Migration(_)));
        assert_eq!(storage.write_count(), writes);
        assert!(!storage.exists(keys::RULE_IDS).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_legacy_rules_are_skipped() {
        let storage = MemoryStorage::new();
        let mut bad = legacy_rule("bad id", 1);
        bad["rateLimit"]["limit"] = json!(0);
        let legacy = json!([bad, legacy_rule("good", 0)]);
        put_json(&storage, keys::LEGACY_RULES, &legacy).await.unwrap();

        let outcome = migrate_from_old_format(&storage).await.unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                rules: 1,
                histories: 0,
                skipped: 1
            }
        );

        let ids: Vec<String> = get_json(&storage, keys::RULE_IDS).await.unwrap().unwrap();
        assert_eq!(ids, vec!["good"]);
        assert!(!storage.exists(&keys::rule("bad id")).await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_and_duplicate_rules_are_skipped() {
        let storage = MemoryStorage::new();
        let legacy = json!([legacy_rule("a", 0), {"id": "broken"}, legacy_rule("a", 1)]);
        put_json(&storage, keys::LEGACY_RULES, &legacy).await.unwrap();

        let outcome = migrate_from_old_format(&storage).await.unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                rules: 1,
                histories: 0,
                skipped: 2
            }
        );
        assert!(!storage.exists(&keys::rule("broken")).await.unwrap());
    }
}
