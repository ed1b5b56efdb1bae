//! Field exclusion filtering
//!
//! The field-exclude list names columns that must never appear in emitted
//! events, as fully-qualified `keyspace.table.column` names. Matching is
//! exact; the list is small and checked per column delta.

use std::collections::HashSet;

use crate::common::schema::TableId;

/// Excludes configured columns from translation.
#[derive(Debug, Clone, Default)]
pub struct FieldFilter {
    excluded: HashSet<String>,
}

impl FieldFilter {
    /// Build from a list of fully-qualified column names. Entries are
    /// whitespace-trimmed; empty entries are ignored.
    pub fn from_exclude_list<S: AsRef<str>>(names: &[S]) -> Self {
        let excluded = names
            .iter()
            .map(|n| n.as_ref().trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        Self { excluded }
    }

    /// A filter that excludes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether `column` of `table` is excluded from events.
    pub fn is_excluded(&self, table: &TableId, column: &str) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        self.excluded
            .contains(&format!("{}.{}.{}", table.keyspace, table.table, column))
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }
}
