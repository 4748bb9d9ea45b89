//! Rule definitions and validation.

mod model;
mod validation;

pub use model::{
    normalize, sort_by_priority, Action, ActionType, Condition, Fingerprint,
    FingerprintParameter, MatchClause, Operator, ParameterDescriptor, RateLimit, Rule,
    RuleVersion, PRIORITY_SENTINEL,
};
pub use validation::{
    is_valid_id, validate_rule, validate_rules, ValidationIssue, ValidationReport,
};
