// src/services/upstream.rs

//! ResultsVault endpoints: grade discovery and per-grade match lists.

use serde_json::Value;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Grade, UpstreamConfig};
use crate::services::normalizer::parse_grade;
use crate::utils::http::Session;

/// Keys probed, in order, for the payload array of an envelope object.
const ARRAY_KEYS: [&str; 4] = ["matches", "data", "items", "rows"];

/// Validate an upstream endpoint and pin its season parameter.
///
/// The endpoint must live on `host`. A `seasonId` parameter is renamed to
/// `seasonid` unless the URL already has one, in which case it is left
/// alone. A configured season overrides `seasonid`.
pub fn normalize_endpoint(
    name: &str,
    value: Option<&str>,
    host: &str,
    season: Option<&str>,
) -> Result<Url> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::config(format!("{name} is not set")))?;
    let url = Url::parse(value.trim())?;

    let actual = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if !actual.ends_with(&host.to_ascii_lowercase()) {
        return Err(AppError::config(format!(
            "{name} must point at {host} (got {actual})"
        )));
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.iter().any(|(k, _)| k == "seasonid") {
        if let Some(pos) = pairs.iter().position(|(k, _)| k == "seasonId") {
            let (_, value) = pairs.remove(pos);
            pairs.retain(|(k, _)| k != "seasonId");
            if !value.is_empty() {
                pairs.push(("seasonid".to_string(), value));
            }
        }
    }
    if let Some(s) = season.filter(|s| !s.is_empty()) {
        set_param(&mut pairs, "seasonid", s);
    }

    Ok(with_query(url, &pairs))
}

/// Per-grade matches URL derived from the matches endpoint.
pub fn build_match_url(base: &Url, grade_id: &str, season_id: &str) -> Url {
    let mut pairs: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| !matches!(&**k, "gradeid" | "seasonid" | "seasonId"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if !season_id.is_empty() {
        pairs.push(("seasonid".to_string(), season_id.to_string()));
    }
    pairs.push(("gradeid".to_string(), grade_id.to_string()));

    for (key, default) in [("action", "ors"), ("maxrecs", "1000"), ("strmflg", "1")] {
        if !pairs.iter().any(|(k, _)| k == key) {
            pairs.push((key.to_string(), default.to_string()));
        }
    }

    with_query(base.clone(), &pairs)
}

/// Set `key` in place, dropping later duplicates, or append it.
fn set_param(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    match pairs.iter().position(|(k, _)| k == key) {
        Some(pos) => {
            pairs[pos].1 = value.to_string();
            let mut seen = 0;
            pairs.retain(|(k, _)| {
                if k != key {
                    return true;
                }
                seen += 1;
                seen == 1
            });
        }
        None => pairs.push((key.to_string(), value.to_string())),
    }
}

fn with_query(mut url: Url, pairs: &[(String, String)]) -> Url {
    url.set_query(None);
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    url
}

/// Locate the payload array of an upstream response.
///
/// Accepts a bare array, a known envelope key, or else the first array
/// valued field.
pub fn extract_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => {
            let key = ARRAY_KEYS
                .iter()
                .map(|k| k.to_string())
                .find(|k| map.get(k).is_some_and(Value::is_array))
                .or_else(|| {
                    map.iter()
                        .find(|(_, v)| v.is_array())
                        .map(|(k, _)| k.clone())
                })?;
            match map.remove(&key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Keep only the requested grades; an empty filter keeps everything.
pub fn filter_grades(grades: Vec<Grade>, only: &[String]) -> Vec<Grade> {
    if only.is_empty() {
        return grades;
    }
    grades
        .into_iter()
        .filter(|g| {
            let keep = only.iter().any(|id| id == &g.id);
            if !keep {
                log::debug!("Grade {} filtered out", g.id);
            }
            keep
        })
        .collect()
}

/// Client for the two upstream endpoints.
#[derive(Debug, Clone)]
pub struct ResultsVault {
    grades_url: Url,
    matches_url: Url,
    season_id: Option<String>,
}

impl ResultsVault {
    /// Build the client from validated endpoints.
    pub fn from_config(upstream: &UpstreamConfig) -> Result<Self> {
        let season = upstream.season_id.as_deref();
        let grades_url = normalize_endpoint(
            "GRADES_JSON_API_ENDPOINT",
            upstream.grades_endpoint.as_deref(),
            &upstream.host,
            season,
        )?;
        let matches_url = normalize_endpoint(
            "MATCH_JSON_API_ENDPOINT",
            upstream.matches_endpoint.as_deref(),
            &upstream.host,
            season,
        )?;

        Ok(Self {
            grades_url,
            matches_url,
            season_id: upstream.season_id.clone().filter(|s| !s.is_empty()),
        })
    }

    pub fn grades_url(&self) -> &Url {
        &self.grades_url
    }

    /// Matches URL for one grade.
    pub fn match_url(&self, grade: &Grade) -> Url {
        build_match_url(&self.matches_url, &grade.id, &grade.season_id)
    }

    /// Fetch and parse the grade list. Grades without an id are skipped.
    pub async fn list_grades(&self, session: &mut Session) -> Result<Vec<Grade>> {
        let json = session.fetch_json(self.grades_url.as_str(), "grades").await?;
        let items = extract_array(json)
            .ok_or_else(|| AppError::validation("grades response holds no array"))?;

        let total = items.len();
        let grades: Vec<Grade> = items
            .iter()
            .filter_map(|g| {
                let grade = parse_grade(g, self.season_id.as_deref());
                if grade.is_none() {
                    log::warn!("Skipping grade without recognizable id");
                }
                grade
            })
            .collect();

        log::info!("Found {} grades ({} raw)", grades.len(), total);
        Ok(grades)
    }

    /// Fetch the raw match entities of one grade.
    pub async fn list_matches(&self, session: &mut Session, grade: &Grade) -> Result<Vec<Value>> {
        let url = self.match_url(grade);
        log::debug!("Fetching matches: {}", url);
        let label = format!("grade {}", grade.id);
        let json = session.fetch_json(url.as_str(), &label).await?;
        extract_array(json).ok_or_else(|| {
            AppError::validation(format!("no array found in matches for grade {}", grade.id))
        })
    }
}
