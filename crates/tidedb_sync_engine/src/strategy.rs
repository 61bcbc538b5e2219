//! Pull strategies.
//!
//! A pull is applied either incrementally (only the listed records change)
//! or as a replacement (the pulled set is the full state of the table, and
//! anything local that is not in it is implicitly deleted). Replacement can
//! be overridden per table and narrowed per table with a scope predicate.

use crate::error::{SyncError, SyncResult};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tidedb_core::{AppSchema, RawRecord};
use tidedb_sync_protocol::TableName;

/// How a single table applies pulled changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStrategy {
    /// Apply only the listed records.
    Incremental,
    /// Treat the pulled records as the full state of the table.
    Replacement,
}

impl TableStrategy {
    /// Wire name of the strategy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Replacement => "replacement",
        }
    }
}

impl fmt::Display for TableStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "incremental" => Ok(Self::Incremental),
            "replacement" => Ok(Self::Replacement),
            other => Err(SyncError::invalid_strategy(format!(
                "unknown strategy {other:?}, expected \"incremental\" or \"replacement\""
            ))),
        }
    }
}

/// Restricts which local records a replacement pull may implicitly delete.
///
/// Records for which the predicate returns false are left alone.
pub type ScopePredicate = Arc<dyn Fn(&RawRecord) -> bool + Send + Sync>;

/// Settings of a replacement pull.
#[derive(Clone)]
pub struct ReplacementOptions {
    /// Strategy of tables without an override.
    pub default: TableStrategy,
    /// Per-table strategy overrides.
    pub overrides: BTreeMap<TableName, TableStrategy>,
    /// Per-table scope predicates for partial replacement.
    pub scopes: BTreeMap<TableName, ScopePredicate>,
}

impl fmt::Debug for ReplacementOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplacementOptions")
            .field("default", &self.default)
            .field("overrides", &self.overrides)
            .field("scopes", &self.scopes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Strategy used to apply a pull.
#[derive(Debug, Clone, Default)]
pub enum PullStrategy {
    /// Apply only the listed records in every table.
    #[default]
    Incremental,
    /// Replace table contents, with per-table overrides and scopes.
    Replacement(ReplacementOptions),
}

impl PullStrategy {
    /// Replacement for every table.
    pub fn replacement() -> Self {
        Self::Replacement(ReplacementOptions {
            default: TableStrategy::Replacement,
            overrides: BTreeMap::new(),
            scopes: BTreeMap::new(),
        })
    }

    /// Overrides the strategy of one table.
    ///
    /// Overriding a table of an incremental strategy turns it into a
    /// replacement strategy whose default is incremental.
    #[must_use]
    pub fn with_override(self, table: impl Into<TableName>, strategy: TableStrategy) -> Self {
        let mut options = self.into_options();
        options.overrides.insert(table.into(), strategy);
        Self::Replacement(options)
    }

    /// Restricts implicit deletion in a replacement table to matching records.
    #[must_use]
    pub fn with_scope<F>(self, table: impl Into<TableName>, predicate: F) -> Self
    where
        F: Fn(&RawRecord) -> bool + Send + Sync + 'static,
    {
        let mut options = self.into_options();
        options.scopes.insert(table.into(), Arc::new(predicate));
        Self::Replacement(options)
    }

    fn into_options(self) -> ReplacementOptions {
        match self {
            Self::Incremental => ReplacementOptions {
                default: TableStrategy::Incremental,
                overrides: BTreeMap::new(),
                scopes: BTreeMap::new(),
            },
            Self::Replacement(options) => options,
        }
    }

    /// Strategy that applies to a table.
    pub fn for_table(&self, table: &str) -> TableStrategy {
        match self {
            Self::Incremental => TableStrategy::Incremental,
            Self::Replacement(options) => options
                .overrides
                .get(table)
                .copied()
                .unwrap_or(options.default),
        }
    }

    /// Scope predicate of a table, if any.
    pub fn scope_for(&self, table: &str) -> Option<&ScopePredicate> {
        match self {
            Self::Incremental => None,
            Self::Replacement(options) => options.scopes.get(table),
        }
    }

    /// Returns true if at least one table is replaced.
    pub fn has_replacement(&self, schema: &AppSchema) -> bool {
        schema
            .tables()
            .any(|t| self.for_table(&t.name) == TableStrategy::Replacement)
    }

    /// Checks the strategy against a schema.
    ///
    /// Overrides and scopes must name schema tables, and scopes only make
    /// sense on tables that are replaced.
    pub fn validate(&self, schema: &AppSchema) -> SyncResult<()> {
        let Self::Replacement(options) = self else {
            return Ok(());
        };
        for table in options.overrides.keys().chain(options.scopes.keys()) {
            if schema.table(table).is_none() {
                return Err(SyncError::invalid_strategy(format!(
                    "strategy names unknown table {table}"
                )));
            }
        }
        for table in options.scopes.keys() {
            if self.for_table(table) != TableStrategy::Replacement {
                return Err(SyncError::invalid_strategy(format!(
                    "scope predicate on table {table}, which is not pulled with replacement"
                )));
            }
        }
        Ok(())
    }

    /// Carries the scope predicates of `configured` over to this strategy.
    ///
    /// A scope is copied only to a table this strategy replaces and does not
    /// already scope.
    #[must_use]
    pub fn with_scopes_of(self, configured: &PullStrategy) -> Self {
        match (self, configured) {
            (Self::Replacement(mut options), Self::Replacement(local)) => {
                for (table, scope) in &local.scopes {
                    let replaced = options.overrides.get(table).copied().unwrap_or(options.default)
                        == TableStrategy::Replacement;
                    if replaced && !options.scopes.contains_key(table) {
                        options.scopes.insert(table.clone(), Arc::clone(scope));
                    }
                }
                Self::Replacement(options)
            }
            (strategy, _) => strategy,
        }
    }

    /// Builds a strategy from its wire form.
    ///
    /// Accepts `"incremental"`, `"replacement"`, or an object
    /// `{"default": .., "override": {table: strategy}}`.
    pub fn from_wire(value: &serde_json::Value) -> SyncResult<Self> {
        use serde_json::Value;

        match value {
            Value::String(s) => match s.parse::<TableStrategy>()? {
                TableStrategy::Incremental => Ok(Self::Incremental),
                TableStrategy::Replacement => Ok(Self::replacement()),
            },
            Value::Object(map) => {
                let default = match map.get("default") {
                    Some(Value::String(s)) => s.parse()?,
                    None => TableStrategy::Incremental,
                    Some(other) => {
                        return Err(SyncError::invalid_strategy(format!(
                            "default strategy must be a string, got {other}"
                        )))
                    }
                };
                let mut overrides = BTreeMap::new();
                match map.get("override") {
                    Some(Value::Object(entries)) => {
                        for (table, strategy) in entries {
                            let strategy = strategy.as_str().ok_or_else(|| {
                                SyncError::invalid_strategy(format!(
                                    "override for table {table} must be a string"
                                ))
                            })?;
                            overrides.insert(table.clone(), strategy.parse()?);
                        }
                    }
                    None => {}
                    Some(_) => {
                        return Err(SyncError::invalid_strategy(
                            "override must be an object of table strategies",
                        ))
                    }
                }
                Ok(Self::Replacement(ReplacementOptions {
                    default,
                    overrides,
                    scopes: BTreeMap::new(),
                }))
            }
            other => Err(SyncError::invalid_strategy(format!(
                "strategy must be a string or an object, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidedb_core::{ColumnSchema, TableSchema};

    fn schema() -> AppSchema {
        AppSchema::new(
            1,
            [
                TableSchema::new("projects", [ColumnSchema::string("name")]),
                TableSchema::new("tasks", [ColumnSchema::string("project_id")]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn incremental_by_default() {
        let strategy = PullStrategy::default();
        assert_eq!(strategy.for_table("tasks"), TableStrategy::Incremental);
        assert!(!strategy.has_replacement(&schema()));
    }

    #[test]
    fn overrides() {
        let strategy = PullStrategy::replacement().with_override("tasks", TableStrategy::Incremental);
        assert_eq!(strategy.for_table("projects"), TableStrategy::Replacement);
        assert_eq!(strategy.for_table("tasks"), TableStrategy::Incremental);

        let strategy = PullStrategy::Incremental.with_override("tasks", TableStrategy::Replacement);
        assert_eq!(strategy.for_table("projects"), TableStrategy::Incremental);
        assert_eq!(strategy.for_table("tasks"), TableStrategy::Replacement);
    }

    #[test]
    fn validation() {
        let schema = schema();
        assert!(PullStrategy::replacement().validate(&schema).is_ok());
        assert!(PullStrategy::replacement()
            .with_override("nope", TableStrategy::Incremental)
            .validate(&schema)
            .is_err());
        assert!(PullStrategy::Incremental
            .with_scope("tasks", |_| true)
            .validate(&schema)
            .is_err());
        assert!(PullStrategy::replacement()
            .with_scope("tasks", |_| true)
            .validate(&schema)
            .is_ok());
    }

    #[test]
    fn scopes_survive_a_remote_strategy() {
        let configured = PullStrategy::replacement()
            .with_scope("tasks", |r: &RawRecord| r.get("project_id") == Some(&json!("p1")));
        let mut record = RawRecord::new_synced("t1");
        record.set_raw("project_id", "p2");

        let merged = PullStrategy::replacement().with_scopes_of(&configured);
        assert!(merged.validate(&schema()).is_ok());
        let scope = merged.scope_for("tasks").unwrap();
        assert!(!scope(&record));
        assert!(merged.scope_for("projects").is_none());

        let merged = PullStrategy::replacement()
            .with_override("tasks", TableStrategy::Incremental)
            .with_scopes_of(&configured);
        assert!(merged.scope_for("tasks").is_none());

        let merged = PullStrategy::Incremental.with_scopes_of(&configured);
        assert!(matches!(merged, PullStrategy::Incremental));
    }

    #[test]
    fn wire_forms() {
        assert!(matches!(
            PullStrategy::from_wire(&json!("incremental")).unwrap(),
            PullStrategy::Incremental
        ));
        let strategy = PullStrategy::from_wire(&json!({
            "default": "incremental",
            "override": {"tasks": "replacement"}
        }))
        .unwrap();
        assert_eq!(strategy.for_table("tasks"), TableStrategy::Replacement);
        assert_eq!(strategy.for_table("projects"), TableStrategy::Incremental);

        assert!(PullStrategy::from_wire(&json!("everything")).is_err());
        assert!(PullStrategy::from_wire(&json!(3)).is_err());
        assert!(PullStrategy::from_wire(&json!({"override": {"tasks": 1}})).is_err());
    }
}
