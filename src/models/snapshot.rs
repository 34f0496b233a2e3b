//! Snapshot rows and change events.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::record::Fields;
use crate::error::AppError;

/// Identity key column.
pub const COL_ID: &str = "_id";
/// Partition column, written by the normalizer.
pub const COL_GRADE: &str = "_grade";
/// Season column, written by the normalizer.
pub const COL_SEASON: &str = "_season";
/// Last known content hash.
pub const COL_HASH: &str = "_hash";
/// Timestamp of the last classification other than unchanged.
pub const COL_LAST_CHANGED_AT: &str = "_last_changed_at";
/// Last classification other than unchanged.
pub const COL_LAST_CHANGE_TYPE: &str = "_last_change_type";
/// `1` while the record exists upstream, `0` once soft-deleted.
pub const COL_ACTIVE: &str = "_active";

/// Columns maintained by the reconciler rather than the upstream.
pub const BOOKKEEPING_COLUMNS: [&str; 5] = [
    COL_ID,
    COL_HASH,
    COL_LAST_CHANGED_AT,
    COL_LAST_CHANGE_TYPE,
    COL_ACTIVE,
];

/// Classification of a record in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Unchanged,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "unchanged" => Ok(Self::Unchanged),
            "deleted" => Ok(Self::Deleted),
            other => Err(AppError::validation(format!("unknown change type '{other}'"))),
        }
    }
}

/// One snapshot row: the record's columns plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub fields: Fields,
    pub hash: String,
    pub last_changed_at: String,
    /// Kept as text so unknown values from older tables survive a rewrite
    pub last_change_type: String,
    pub active: bool,
}

impl StoredRecord {
    /// Partition the record was last seen under.
    pub fn partition(&self) -> &str {
        self.fields.get(COL_GRADE).map(String::as_str).unwrap_or("")
    }

    /// Rebuild a stored record from a table row.
    ///
    /// Returns `None` when the row has no identity key.
    pub fn from_row(mut row: Fields) -> Option<Self> {
        let id = row.shift_remove(COL_ID).unwrap_or_default();
        if id.trim().is_empty() {
            return None;
        }
        let hash = row.shift_remove(COL_HASH).unwrap_or_default();
        let last_changed_at = row.shift_remove(COL_LAST_CHANGED_AT).unwrap_or_default();
        let last_change_type = row.shift_remove(COL_LAST_CHANGE_TYPE).unwrap_or_default();
        // Rows written before the flag existed count as active.
        let active = row
            .shift_remove(COL_ACTIVE)
            .map(|v| !matches!(v.trim(), "0" | "false" | "FALSE"))
            .unwrap_or(true);

        Some(Self {
            id,
            fields: row,
            hash,
            last_changed_at,
            last_change_type,
            active,
        })
    }

    /// Flatten into a table row: identity first, bookkeeping last.
    pub fn to_row(&self) -> Fields {
        let mut row = Fields::with_capacity(self.fields.len() + BOOKKEEPING_COLUMNS.len());
        row.insert(COL_ID.to_string(), self.id.clone());
        for (k, v) in &self.fields {
            row.insert(k.clone(), v.clone());
        }
        row.insert(COL_HASH.to_string(), self.hash.clone());
        row.insert(COL_LAST_CHANGED_AT.to_string(), self.last_changed_at.clone());
        row.insert(COL_LAST_CHANGE_TYPE.to_string(), self.last_change_type.clone());
        row.insert(
            COL_ACTIVE.to_string(),
            if self.active { "1" } else { "0" }.to_string(),
        );
        row
    }
}

/// Header of the CHANGES table.
pub const CHANGES_HEADER: [&str; 8] = [
    "run_id",
    "timestamp",
    "match_id",
    "change_type",
    "field",
    "old_hash",
    "new_hash",
    "grade_id",
];

/// Append-only audit entry for one created/updated/deleted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub run_id: String,
    pub timestamp: String,
    pub id: String,
    pub change_type: ChangeType,
    /// Columns whose stored values differ (updates only)
    pub field: String,
    pub old_hash: String,
    pub new_hash: String,
    pub partition: String,
}

impl ChangeEvent {
    /// Values in [`CHANGES_HEADER`] order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.run_id.clone(),
            self.timestamp.clone(),
            self.id.clone(),
            self.change_type.to_string(),
            self.field.clone(),
            self.old_hash.clone(),
            self.new_hash.clone(),
            self.partition.clone(),
        ]
    }
}
