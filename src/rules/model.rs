//! Rule data model.
//!
//! Rules are stored as camelCase JSON. Unknown fields on rules, actions and
//! fingerprint descriptors are carried through untouched so that data written
//! by other producers survives a read-modify-write cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Priority used for ordering rules that do not carry one.
pub const PRIORITY_SENTINEL: i64 = i64::MAX;

/// A rate limiting rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique, immutable identifier
    pub id: String,
    pub name: String,
    pub description: String,
    pub rate_limit: RateLimit,
    pub fingerprint: Fingerprint,
    pub initial_match: MatchClause,
    #[serde(default)]
    pub else_if_actions: Vec<MatchClause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_action: Option<Action>,
    /// Evaluation and listing order (lower first)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Fields this model does not know about
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request budget for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Requests allowed per period
    pub limit: u64,
    /// Period length in seconds
    pub period: u64,
}

/// Request attributes that distinguish one client from another.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(default)]
    pub parameters: Vec<FingerprintParameter>,
}

/// A fingerprint parameter: either a bare field name or a descriptor object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FingerprintParameter {
    Field(String),
    Descriptor(ParameterDescriptor),
}

impl FingerprintParameter {
    pub fn name(&self) -> &str {
        match self {
            FingerprintParameter::Field(name) => name,
            FingerprintParameter::Descriptor(descriptor) => &descriptor.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A list of conditions (all must hold) and the action taken when they do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchClause {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub action: Action,
}

/// A single predicate over a request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Condition operators, serialized in their canonical long form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    #[serde(alias = "eq")]
    Equals,
    #[serde(alias = "ne")]
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Matches,
    #[serde(alias = "gt")]
    GreaterThan,
    #[serde(alias = "ge")]
    GreaterThanOrEqual,
    #[serde(alias = "lt")]
    LessThan,
    #[serde(alias = "le")]
    LessThanOrEqual,
    Exists,
    NotExists,
}

impl Operator {
    /// Every canonical operator.
    pub const ALL: [Operator; 13] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::Contains,
        Operator::NotContains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Matches,
        Operator::GreaterThan,
        Operator::GreaterThanOrEqual,
        Operator::LessThan,
        Operator::LessThanOrEqual,
        Operator::Exists,
        Operator::NotExists,
    ];

    /// Parse an operator name, accepting short-form and snake_case aliases.
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "equals" | "eq" => Operator::Equals,
            "notEquals" | "ne" | "not_equals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "notContains" | "not_contains" => Operator::NotContains,
            "startsWith" | "starts_with" => Operator::StartsWith,
            "endsWith" | "ends_with" => Operator::EndsWith,
            "matches" => Operator::Matches,
            "greaterThan" | "gt" | "greater_than" => Operator::GreaterThan,
            "greaterThanOrEqual" | "ge" | "greater_than_or_equal" => {
                Operator::GreaterThanOrEqual
            }
            "lessThan" | "lt" | "less_than" => Operator::LessThan,
            "lessThanOrEqual" | "le" | "less_than_or_equal" => Operator::LessThanOrEqual,
            "exists" => Operator::Exists,
            "notExists" | "not_exists" => Operator::NotExists,
            _ => return None,
        };
        Some(op)
    }

    /// Canonical name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "notEquals",
            Operator::Contains => "contains",
            Operator::NotContains => "notContains",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Matches => "matches",
            Operator::GreaterThan => "greaterThan",
            Operator::GreaterThanOrEqual => "greaterThanOrEqual",
            Operator::LessThan => "lessThan",
            Operator::LessThanOrEqual => "lessThanOrEqual",
            Operator::Exists => "exists",
            Operator::NotExists => "notExists",
        }
    }

    /// Whether a condition using this operator must carry a `value`.
    pub fn requires_value(&self) -> bool {
        !matches!(self, Operator::Exists | Operator::NotExists)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a request that matches a clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Response status for `block` (400-599)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Type-specific fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Block,
    Allow,
    Log,
    Challenge,
    RateLimit,
}

impl ActionType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "block" => Some(ActionType::Block),
            "allow" => Some(ActionType::Allow),
            "log" => Some(ActionType::Log),
            "challenge" => Some(ActionType::Challenge),
            "rateLimit" => Some(ActionType::RateLimit),
            _ => None,
        }
    }
}

/// An immutable snapshot of a rule's prior state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleVersion {
    pub version_id: String,
    pub timestamp: DateTime<Utc>,
    pub rule: Rule,
}

impl Rule {
    /// Decode a rule from a (normalized, validated) JSON candidate.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Priority used for ordering; missing priorities sort last.
    pub fn sort_key(&self) -> i64 {
        self.priority.unwrap_or(PRIORITY_SENTINEL)
    }
}

/// Sort rules by priority. Ties keep their relative order.
pub fn sort_by_priority(rules: &mut [Rule]) {
    rules.sort_by_key(Rule::sort_key);
}

/// Rewrite a JSON candidate into canonical form before it is validated or
/// stored: operator aliases become long-form names and a legacy `order`
/// field becomes `priority`.
pub fn normalize(candidate: &mut Value) {
    let Some(obj) = candidate.as_object_mut() else {
        return;
    };

    if !obj.contains_key("priority") {
        if let Some(order) = obj.remove("order") {
            obj.insert("priority".to_string(), order);
        }
    }

    if let Some(clause) = obj.get_mut("initialMatch") {
        normalize_clause(clause);
    }
    if let Some(Value::Array(clauses)) = obj.get_mut("elseIfActions") {
        for clause in clauses {
            normalize_clause(clause);
        }
    }
}

fn normalize_clause(clause: &mut Value) {
    let Some(Value::Array(conditions)) = clause.get_mut("conditions") else {
        return;
    };
    for condition in conditions {
        let Some(Value::String(name)) = condition.get_mut("operator") else {
            continue;
        };
        if let Some(op) = Operator::parse(name) {
            *name = op.as_str().to_string();
        }
    }
}
