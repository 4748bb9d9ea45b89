//! Rule validation.
//!
//! Validation runs over the raw JSON candidate rather than the typed [`Rule`]
//! so that malformed input is reported field by field instead of failing at
//! the first deserialization error. It never fails: every problem found is
//! collected into a [`ValidationReport`].
//!
//! [`Rule`]: super::Rule

use std::collections::HashMap;

use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::{ActionType, Operator};

/// A single problem found in a candidate, addressed by field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted path of the offending field, e.g. `initialMatch.conditions[0].value`
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Outcome of validating one rule or a set of rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl ValidationReport {
    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self
    }
}

/// Validate a single candidate rule.
///
/// `existing_ids` are the ids of the live rule set; `exempt_id` is skipped
/// by the uniqueness check so a rule can be re-saved under its own id.
pub fn validate_rule(
    candidate: &Value,
    existing_ids: &[String],
    exempt_id: Option<&str>,
) -> ValidationReport {
    let mut validator = Validator::new(String::new());
    validator.check_rule(candidate, existing_ids, exempt_id);
    validator.report.finish()
}

/// Validate a whole rule set.
///
/// Each rule is checked on its own, then ids are checked for uniqueness
/// across the set (error) and priorities for duplicates (warning).
pub fn validate_rules(candidates: &[Value]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen_ids: HashMap<&str, usize> = HashMap::new();
    let mut seen_priorities: HashMap<i64, usize> = HashMap::new();

    for (index, candidate) in candidates.iter().enumerate() {
        let mut validator = Validator::new(format!("rules[{}]", index));
        validator.check_rule(candidate, &[], None);
        report.errors.extend(validator.report.errors);
        report.warnings.extend(validator.report.warnings);

        if let Some(id) = candidate.get("id").and_then(Value::as_str) {
            if let Some(first) = seen_ids.get(id) {
                report.errors.push(ValidationIssue::new(
                    format!("rules[{}].id", index),
                    format!("duplicate id '{}' (also used by rules[{}])", id, first),
                ));
            } else {
                seen_ids.insert(id, index);
            }
        }

        if let Some(priority) = candidate.get("priority").and_then(Value::as_i64) {
            if let Some(first) = seen_priorities.get(&priority) {
                report.warnings.push(ValidationIssue::new(
                    format!("rules[{}].priority", index),
                    format!("priority {} is also used by rules[{}]", priority, first),
                ));
            } else {
                seen_priorities.insert(priority, index);
            }
        }
    }

    report.finish()
}

/// Whether `id` is a legal rule identifier.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

struct Validator {
    prefix: String,
    report: ValidationReport,
}

impl Validator {
    fn new(prefix: String) -> Self {
        Self {
            prefix,
            report: ValidationReport::default(),
        }
    }

    fn path(&self, field: &str) -> String {
        match (self.prefix.is_empty(), field.is_empty()) {
            (true, _) => field.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}.{}", self.prefix, field),
        }
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        let field = self.path(field);
        self.report.errors.push(ValidationIssue::new(field, message));
    }

    fn warning(&mut self, field: &str, message: impl Into<String>) {
        let field = self.path(field);
        self.report.warnings.push(ValidationIssue::new(field, message));
    }

    fn check_rule(&mut self, candidate: &Value, existing_ids: &[String], exempt_id: Option<&str>) {
        let Some(rule) = candidate.as_object() else {
            self.error("", "rule must be a JSON object");
            return;
        };

        // Required fields and their types first.
        let id = self.required_str(rule.get("id"), "id");
        self.required_str(rule.get("name"), "name");
        self.required_str(rule.get("description"), "description");
        let rate_limit = self.required_object(rule.get("rateLimit"), "rateLimit");
        let fingerprint = self.required_object(rule.get("fingerprint"), "fingerprint");
        let initial_match = self.required_object(rule.get("initialMatch"), "initialMatch");

        if let Some(id) = id {
            if !is_valid_id(id) {
                self.error(
                    "id",
                    "must contain only letters, digits, hyphens and underscores",
                );
            }
            if existing_ids.iter().any(|existing| existing == id) && exempt_id != Some(id) {
                self.error("id", format!("a rule with id '{}' already exists", id));
            }
        }

        if let Some(rate_limit) = rate_limit {
            self.positive_integer(rate_limit.get("limit"), "rateLimit.limit");
            self.positive_integer(rate_limit.get("period"), "rateLimit.period");
        }

        if let Some(fingerprint) = fingerprint {
            self.check_fingerprint(fingerprint.get("parameters"));
        }

        if initial_match.is_some() {
            if let Some(clause) = rule.get("initialMatch") {
                self.check_clause(clause, "initialMatch");
            }
        }

        match rule.get("elseIfActions") {
            None | Some(Value::Null) => {}
            Some(Value::Array(clauses)) => {
                for (index, clause) in clauses.iter().enumerate() {
                    self.check_clause(clause, &format!("elseIfActions[{}]", index));
                }
            }
            Some(_) => self.error("elseIfActions", "must be an array"),
        }

        match rule.get("elseAction") {
            None | Some(Value::Null) => {}
            Some(action) => self.check_action(action, "elseAction"),
        }

        match rule.get("priority") {
            None | Some(Value::Null) => {}
            Some(priority) if priority.as_i64().is_some() => {}
            Some(_) => self.error("priority", "must be an integer"),
        }

        for field in ["createdAt", "updatedAt"] {
            match rule.get(field) {
                None | Some(Value::Null) => {}
                Some(Value::String(raw)) => {
                    if let Err(e) = DateTime::parse_from_rfc3339(raw) {
                        self.error(field, format!("invalid timestamp '{}': {}", raw, e));
                    }
                }
                Some(_) => self.error(field, "must be an ISO-8601 timestamp string"),
            }
        }
    }

    fn required_str<'v>(&mut self, value: Option<&'v Value>, field: &str) -> Option<&'v str> {
        match value {
            None | Some(Value::Null) => {
                self.error(field, "is required");
                None
            }
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                self.error(field, "must be a string");
                None
            }
        }
    }

    fn required_object<'v>(
        &mut self,
        value: Option<&'v Value>,
        field: &str,
    ) -> Option<&'v serde_json::Map<String, Value>> {
        match value {
            None | Some(Value::Null) => {
                self.error(field, "is required");
                None
            }
            Some(Value::Object(obj)) => Some(obj),
            Some(_) => {
                self.error(field, "must be an object");
                None
            }
        }
    }

    fn positive_integer(&mut self, value: Option<&Value>, field: &str) {
        match value {
            None | Some(Value::Null) => self.error(field, "is required"),
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    if i <= 0 {
                        self.error(field, "must be greater than 0");
                    }
                } else if n.as_u64().is_none() {
                    self.error(field, "must be an integer");
                }
            }
            Some(_) => self.error(field, "must be a positive integer"),
        }
    }

    fn check_fingerprint(&mut self, parameters: Option<&Value>) {
        let Some(Value::Array(parameters)) = parameters else {
            self.error("fingerprint.parameters", "must be an array");
            return;
        };

        if parameters.is_empty() {
            self.warning(
                "fingerprint.parameters",
                "no fingerprint parameters; the rule applies to all traffic as one client",
            );
        }

        for (index, parameter) in parameters.iter().enumerate() {
            let path = format!("fingerprint.parameters[{}]", index);
            let ok = match parameter {
                Value::String(name) => !name.is_empty(),
                Value::Object(obj) => {
                    match obj.get("headerName") {
                        None | Some(Value::Null) | Some(Value::String(_)) => {}
                        Some(_) => self.error(&format!("{}.headerName", path), "must be a string"),
                    }
                    obj.get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|name| !name.is_empty())
                }
                _ => false,
            };
            if !ok {
                self.error(
                    &path,
                    "must be a field name or an object with a non-empty 'name'",
                );
            }
        }
    }

    fn check_clause(&mut self, clause: &Value, path: &str) {
        let Some(obj) = clause.as_object() else {
            self.error(path, "must be an object");
            return;
        };

        match obj.get("conditions") {
            Some(Value::Array(conditions)) => {
                for (index, condition) in conditions.iter().enumerate() {
                    self.check_condition(condition, &format!("{}.conditions[{}]", path, index));
                }
            }
            None | Some(Value::Null) => {
                self.error(&format!("{}.conditions", path), "is required");
            }
            Some(_) => self.error(&format!("{}.conditions", path), "must be an array"),
        }

        match obj.get("action") {
            None | Some(Value::Null) => self.error(&format!("{}.action", path), "is required"),
            Some(action) => self.check_action(action, &format!("{}.action", path)),
        }
    }

    fn check_condition(&mut self, condition: &Value, path: &str) {
        let Some(obj) = condition.as_object() else {
            self.error(path, "must be an object");
            return;
        };

        match obj.get("field") {
            Some(Value::String(field)) if !field.is_empty() => {}
            Some(Value::String(_)) => self.error(&format!("{}.field", path), "must not be empty"),
            None | Some(Value::Null) => self.error(&format!("{}.field", path), "is required"),
            Some(_) => self.error(&format!("{}.field", path), "must be a string"),
        }

        let operator = match obj.get("operator") {
            Some(Value::String(name)) => match Operator::parse(name) {
                Some(op) => Some(op),
                None => {
                    self.error(
                        &format!("{}.operator", path),
                        format!("unsupported operator '{}'", name),
                    );
                    None
                }
            },
            None | Some(Value::Null) => {
                self.error(&format!("{}.operator", path), "is required");
                None
            }
            Some(_) => {
                self.error(&format!("{}.operator", path), "must be a string");
                None
            }
        };

        let value_path = format!("{}.value", path);
        match (obj.get("value"), operator) {
            (None | Some(Value::Null), Some(op)) if op.requires_value() => self.error(
                &value_path,
                format!("operator '{}' requires a value", op),
            ),
            (None | Some(Value::Null), _) => {}
            (Some(Value::String(value)), Some(Operator::Matches)) => {
                if let Err(e) = Regex::new(value) {
                    self.error(
                        &value_path,
                        format!("invalid regular expression '{}': {}", value, e),
                    );
                }
            }
            (Some(Value::String(_)), _) => {}
            (Some(_), _) => self.error(&value_path, "must be a string"),
        }
    }

    fn check_action(&mut self, action: &Value, path: &str) {
        let Some(obj) = action.as_object() else {
            self.error(path, "must be an object");
            return;
        };

        let type_path = format!("{}.type", path);
        let action_type = match obj.get("type") {
            Some(Value::String(name)) => match ActionType::parse(name) {
                Some(t) => Some(t),
                None => {
                    self.error(&type_path, format!("unknown action type '{}'", name));
                    None
                }
            },
            None | Some(Value::Null) => {
                self.error(&type_path, "is required");
                None
            }
            Some(_) => {
                self.error(&type_path, "must be a string");
                None
            }
        };

        let status_path = format!("{}.status", path);
        match (obj.get("status").filter(|s| !s.is_null()), action_type) {
            (None, _) => {}
            (Some(status), Some(ActionType::Block)) => match status.as_u64() {
                Some(code) if (400..=599).contains(&code) => {}
                _ => self.error(
                    &status_path,
                    "block status must be an integer between 400 and 599",
                ),
            },
            (Some(status), _) => {
                if !status.as_u64().is_some_and(|code| code <= u64::from(u16::MAX)) {
                    self.error(&status_path, "must be an HTTP status code");
                }
            }
        }
    }
}
