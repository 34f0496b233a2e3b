// src/services/normalizer.rs

//! Record normalizer.
//!
//! Flattens upstream entities into text columns and resolves logical fields
//! through ordered alias lists. The upstream has renamed its keys across API
//! versions, so every logical field lists the spellings seen so far; the
//! first candidate holding a non-empty value wins.
//!
//! Candidate paths are dotted; numeric segments index into arrays
//! (`teams.0.name`). They are looked up in the original nested entity, not
//! in the flattened row.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::{COL_GRADE, COL_SEASON, Fields, Grade, Record};

/// Ordered extraction rule for one logical field.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub candidates: &'static [&'static str],
}

impl FieldRule {
    /// Resolve the rule against a nested entity; empty when nothing matches.
    pub fn resolve(&self, entity: &Value) -> String {
        self.candidates
            .iter()
            .filter_map(|path| lookup(entity, path))
            .map(|v| scalar_text(v).trim().to_string())
            .find(|v| !v.is_empty())
            .unwrap_or_default()
    }
}

// --- Grade rules ---

pub const GRADE_ID: FieldRule = FieldRule {
    name: "grade_id",
    candidates: &[
        "gradeId", "gradeID", "gradeid", "grade_id", "id", "Id", "ID", "grade.id",
        "grade.gradeId", "GradeId",
    ],
};

pub const GRADE_SEASON: FieldRule = FieldRule {
    name: "season_id",
    candidates: &["seasonid", "seasonId", "season.id"],
};

pub const GRADE_NAME: FieldRule = FieldRule {
    name: "grade_name",
    candidates: &["name", "gradeName", "grade_name", "grade.name"],
};

// --- Match rules ---

pub const MATCH_ID: FieldRule = FieldRule {
    name: "match_id",
    candidates: &[
        "match_id", "matchId", "matchID", "matchid", "MatchId", "id", "Id", "ID", "match.id",
    ],
};

/// Logical fields that make up a match's content hash.
///
/// Any column not reachable through these rules may change without the
/// match being classified as updated.
pub const HASH_FIELDS: [FieldRule; 6] = [
    FieldRule {
        name: "date",
        candidates: &[
            "matchDate", "match_date", "date", "startDateTime", "start_date", "dateTime",
        ],
    },
    FieldRule {
        name: "home_name",
        candidates: &[
            "homeTeamName", "home_name", "homeName", "homeTeam.name", "home.name",
            "teams.0.name",
        ],
    },
    FieldRule {
        name: "away_name",
        candidates: &[
            "awayTeamName", "away_name", "awayName", "awayTeam.name", "away.name",
            "teams.1.name",
        ],
    },
    FieldRule {
        name: "score_text",
        candidates: &[
            "scoreText", "score_text", "score", "result", "resultText", "matchResult",
        ],
    },
    FieldRule {
        name: "status",
        candidates: &[
            "matchStatus", "match_status", "statusText", "status.name", "status",
        ],
    },
    FieldRule {
        name: "venue",
        candidates: &[
            "venueName", "venue_name", "venue.name", "groundName", "ground", "venue",
        ],
    },
];

/// Follow a dotted path through objects and arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Text form of a value: scalars verbatim, composites as compact JSON.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}

/// Flatten the top level of an entity into text columns.
///
/// Non-object entities become a single `value` column.
pub fn flatten(entity: &Value) -> Fields {
    match entity {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), scalar_text(v)))
            .collect(),
        other => {
            let mut fields = Fields::new();
            fields.insert("value".to_string(), scalar_text(other));
            fields
        }
    }
}

/// Project an entity onto the hash fields.
pub fn hash_projection(entity: &Value) -> BTreeMap<String, String> {
    HASH_FIELDS
        .iter()
        .map(|rule| (rule.name.to_string(), rule.resolve(entity)))
        .collect()
}

/// Build a grade from an entry of the grades endpoint.
///
/// Returns `None` when no id can be found.
pub fn parse_grade(entity: &Value, fallback_season: Option<&str>) -> Option<Grade> {
    let id = GRADE_ID.resolve(entity);
    if id.is_empty() {
        return None;
    }
    let mut season_id = GRADE_SEASON.resolve(entity);
    if season_id.is_empty() {
        season_id = fallback_season.unwrap_or_default().to_string();
    }
    Some(Grade {
        id,
        season_id,
        name: GRADE_NAME.resolve(entity),
    })
}

/// Normalize one match entity fetched under `grade`.
///
/// Returns `None` when the entity has no identity key; the caller decides
/// how to report the drop.
pub fn normalize_match(entity: &Value, grade: &Grade) -> Option<Record> {
    let id = MATCH_ID.resolve(entity);
    if id.is_empty() {
        return None;
    }

    let mut fields = flatten(entity);
    fields.insert(COL_GRADE.to_string(), grade.id.clone());
    fields.insert(COL_SEASON.to_string(), grade.season_id.clone());

    Some(Record {
        id,
        partition: grade.id.clone(),
        fields,
        hash_input: hash_projection(entity),
    })
}
