//! Flat records produced by the normalizer.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered column name → text value mapping.
pub type Fields = IndexMap<String, String>;

/// One upstream entity flattened into text columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Identity key, stable across runs
    pub id: String,

    /// Partition (grade) the record was fetched under
    pub partition: String,

    /// Flat columns in upstream order, followed by `_grade` and `_season`
    pub fields: Fields,

    /// Hash-relevant logical fields, sorted by name
    pub hash_input: BTreeMap<String, String>,
}

impl Record {
    /// Value of a column, or an empty string.
    pub fn get(&self, column: &str) -> &str {
        self.fields.get(column).map(String::as_str).unwrap_or("")
    }
}

/// A partition of the upstream data set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub id: String,
    /// Season from the grade itself, falling back to the configured one
    pub season_id: String,
    pub name: String,
}

impl Grade {
    /// Table/tab name used for this grade's exports.
    pub fn table_name(&self) -> String {
        format!("Grade_{}", self.id)
    }
}
