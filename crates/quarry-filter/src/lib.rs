//! # quarry-filter
//!
//! Decides which catalog objects become queryable entities.
//!
//! Tables and views are checked in this order:
//!
//! | Step | Rule |
//! |------|------|
//! | 1 | allowed schemas configured and the schema is not listed: reject |
//! | 2 | whitelist configured and the name does not match it: reject |
//! | 3 | name matches an exception: accept, even if blacklisted |
//! | 4 | name matches the blacklist: reject |
//! | 5 | accept |
//!
//! Exceptions only override the blacklist. The whitelist is the narrower
//! filter, so an exception cannot re-admit a name it leaves out.
//! Functions follow the same steps with their own lists and no exceptions.

mod pattern;

pub use pattern::{NamePattern, PatternSet};

use quarry_core::{LoaderConfig, Result};

/// Immutable loader policy built once from configuration.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    blacklist: PatternSet,
    whitelist: PatternSet,
    function_blacklist: PatternSet,
    function_whitelist: PatternSet,
    exceptions: PatternSet,
    allowed_schemas: PatternSet,
}

impl FilterPolicy {
    /// A policy that admits everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Build from loader configuration, rejecting malformed patterns.
    pub fn from_config(config: &LoaderConfig) -> Result<Self> {
        Ok(Self {
            blacklist: PatternSet::qualified(&config.blacklist)?,
            whitelist: PatternSet::qualified(&config.whitelist)?,
            function_blacklist: PatternSet::qualified(&config.function_blacklist)?,
            function_whitelist: PatternSet::qualified(&config.function_whitelist)?,
            exceptions: PatternSet::qualified(&config.exceptions)?,
            allowed_schemas: PatternSet::schemas(&config.allowed_schemas)?,
        })
    }

    pub fn is_schema_allowed(&self, schema: &str) -> bool {
        self.allowed_schemas.is_empty() || self.allowed_schemas.matches(schema)
    }

    /// Whether a table or view should be loaded.
    pub fn is_entity_allowed(&self, qualified_name: &str) -> bool {
        let name = pattern::qualify(qualified_name);
        if !self.is_schema_allowed(pattern::schema_of(&name)) {
            return false;
        }
        if !self.whitelist.is_empty() && !self.whitelist.matches(&name) {
            return false;
        }
        if self.exceptions.matches(&name) {
            return true;
        }
        !self.blacklist.matches(&name)
    }

    /// Whether a function should be loaded.
    pub fn is_function_allowed(&self, qualified_name: &str) -> bool {
        let name = pattern::qualify(qualified_name);
        if !self.is_schema_allowed(pattern::schema_of(&name)) {
            return false;
        }
        if !self.function_whitelist.is_empty() {
            return self.function_whitelist.matches(&name);
        }
        !self.function_blacklist.matches(&name)
    }

    /// Configured schema order, used to resolve unqualified names.
    pub fn schema_order(&self) -> Vec<&str> {
        self.allowed_schemas
            .iter()
            .filter(|p| !p.is_wildcard())
            .map(NamePattern::as_str)
            .collect()
    }
}
