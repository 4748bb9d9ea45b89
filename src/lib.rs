//! Rule Store - Versioned Rate Limit Rule Configuration
//!
//! This crate manages rate limiting rule definitions on top of a key-value
//! storage backend: validated create/update/delete, reordering, bounded
//! version history with revert, a short-lived rule set cache, and a one-time
//! migration from the legacy single-blob layout. Enforcement of the rules
//! against live traffic happens elsewhere; consumers learn about changes
//! through change notifications.

pub mod config;
pub mod error;
pub mod rules;
pub mod service;
pub mod storage;

pub use error::{Result, StoreError};
pub use service::ConfigService;
