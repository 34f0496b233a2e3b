//! Google Sheets storage implementation.
//!
//! Each table is a tab of one spreadsheet, addressed through the Sheets v4
//! REST API with a bearer token. Tab names are matched case-insensitively;
//! missing tabs are created on first write.
//!
//! A full replace is a clear followed by an update. The API offers no
//! transaction around the pair, so a failure in between leaves the tab
//! empty until the next run rewrites it.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use url::Url;

use crate::error::{AppError, Result, head_of};
use crate::models::Config;
use crate::storage::{Table, TableStore};
use crate::utils::http::create_plain_client;
use crate::utils::retry::{RetryPolicy, retry};

/// A1 range covering a whole tab.
pub fn tab_range(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Existing tab titles from a spreadsheet metadata response.
pub fn parse_titles(metadata: &Value) -> Vec<String> {
    metadata["sheets"]
        .as_array()
        .map(|sheets| {
            sheets
                .iter()
                .filter_map(|s| s["properties"]["title"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Cell grid from a values response; every cell rendered as text.
pub fn parse_values(response: &Value) -> Vec<Vec<String>> {
    let cell = |v: &Value| match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    response["values"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| row.as_array().map(|r| r.iter().map(cell).collect()).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

/// Spreadsheet-backed table store.
pub struct SheetsStore {
    client: Client,
    api_base: String,
    spreadsheet_id: String,
    access_token: String,
    policy: RetryPolicy,
    titles: Mutex<Option<Vec<String>>>,
}

impl SheetsStore {
    pub fn new(
        client: Client,
        api_base: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        access_token: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            spreadsheet_id: spreadsheet_id.into(),
            access_token: access_token.into(),
            policy,
            titles: Mutex::new(None),
        }
    }

    /// Create the store from configuration; `None` when Sheets is disabled
    /// or not fully configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if !config.sheets_enabled() {
            return Ok(None);
        }
        let (Some(id), Some(token)) = (
            config.sheets.spreadsheet_id.as_deref(),
            config.sheets.access_token.as_deref(),
        ) else {
            return Ok(None);
        };
        let client = create_plain_client(&config.session)?;
        Ok(Some(Self::new(
            client,
            config.sheets.api_base.clone(),
            id,
            token,
            RetryPolicy::from(&config.retry),
        )))
    }

    /// URL under `spreadsheets/{id}` built from raw path segments.
    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)?;
        url.path_segments_mut()
            .map_err(|_| AppError::config(format!("invalid Sheets API base {}", self.api_base)))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn send(&self, method: Method, url: &Url, body: Option<&Value>) -> Result<Value> {
        let mut request = self
            .client
            .request(method, url.clone())
            .bearer_auth(&self.access_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Sheets {
                status: status.as_u16(),
                message: head_of(&text),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// One API call under the retry policy.
    async fn call(&self, method: Method, url: Url, body: Option<Value>, label: &str) -> Result<Value> {
        retry(
            &self.policy,
            label,
            || self.send(method.clone(), &url, body.as_ref()),
            || async {},
        )
        .await
    }

    async fn load_titles(&self) -> Result<Vec<String>> {
        if let Ok(guard) = self.titles.lock() {
            if let Some(titles) = guard.as_ref() {
                return Ok(titles.clone());
            }
        }
        let url = self.url(&[], &[("fields", "sheets.properties.title")])?;
        let metadata = self.call(Method::GET, url, None, "sheets metadata").await?;
        let titles = parse_titles(&metadata);
        if let Ok(mut guard) = self.titles.lock() {
            *guard = Some(titles.clone());
        }
        Ok(titles)
    }

    /// Existing tab title matching `name` case-insensitively.
    async fn find_tab(&self, name: &str) -> Result<Option<String>> {
        let titles = self.load_titles().await?;
        Ok(titles.into_iter().find(|t| t.eq_ignore_ascii_case(name)))
    }

    /// Resolve a tab, creating it when missing.
    async fn ensure_tab(&self, name: &str) -> Result<String> {
        if let Some(title) = self.find_tab(name).await? {
            return Ok(title);
        }

        let url = Url::parse(&format!(
            "{}/spreadsheets/{}:batchUpdate",
            self.api_base.trim_end_matches('/'),
            self.spreadsheet_id
        ))?;
        let body = json!({ "requests": [{ "addSheet": { "properties": { "title": name } } }] });
        self.call(Method::POST, url, Some(body), &format!("add tab {name}"))
            .await
            .map_err(|e| AppError::store(name, e))?;
        log::info!("Created tab {}", name);

        if let Ok(mut guard) = self.titles.lock() {
            if let Some(titles) = guard.as_mut() {
                titles.push(name.to_string());
            }
        }
        Ok(name.to_string())
    }

    async fn get_values(&self, title: &str) -> Result<Vec<Vec<String>>> {
        let url = self.url(&["values", &tab_range(title)], &[])?;
        let response = self.call(Method::GET, url, None, &format!("read {title}")).await?;
        Ok(parse_values(&response))
    }
}

#[async_trait]
impl TableStore for SheetsStore {
    fn describe(&self) -> String {
        format!("sheets:{}", self.spreadsheet_id)
    }

    async fn read_table(&self, name: &str) -> Result<Option<Table>> {
        let Some(title) = self.find_tab(name).await? else {
            return Ok(None);
        };
        let mut values = self
            .get_values(&title)
            .await
            .map_err(|e| AppError::store(name, e))?
            .into_iter();
        let header = values.next().unwrap_or_default();
        Ok(Some(Table {
            header,
            rows: values.collect(),
        }))
    }

    async fn replace_table(&self, name: &str, table: &Table) -> Result<()> {
        let title = self.ensure_tab(name).await?;
        let range = tab_range(&title);

        let clear = self.url(&["values", &format!("{range}:clear")], &[])?;
        self.call(Method::POST, clear, Some(json!({})), &format!("clear {title}"))
            .await
            .map_err(|e| AppError::store(name, e))?;

        if table.is_empty() {
            return Ok(());
        }
        let mut values: Vec<&Vec<String>> = Vec::with_capacity(table.rows.len() + 1);
        values.push(&table.header);
        values.extend(table.rows.iter());

        let update = self.url(
            &["values", &format!("{}!A1", range)],
            &[("valueInputOption", "RAW")],
        )?;
        self.call(
            Method::PUT,
            update,
            Some(json!({ "values": values })),
            &format!("write {title}"),
        )
        .await
        .map_err(|e| AppError::store(name, e))?;

        log::debug!("Wrote {} rows to tab {}", table.rows.len(), title);
        Ok(())
    }

    async fn append_rows(&self, name: &str, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
        let title = self.ensure_tab(name).await?;
        let existing = self
            .get_values(&title)
            .await
            .map_err(|e| AppError::store(name, e))?;

        let mut values: Vec<Vec<String>> = Vec::with_capacity(rows.len() + 1);
        if existing.iter().all(|r| r.iter().all(|c| c.is_empty())) {
            values.push(header.iter().map(|h| h.to_string()).collect());
        }
        values.extend(rows.iter().cloned());
        if values.is_empty() {
            return Ok(());
        }

        let url = self.url(
            &["values", &format!("{}!A1:append", tab_range(&title))],
            &[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")],
        )?;
        self.call(
            Method::POST,
            url,
            Some(json!({ "values": values })),
            &format!("append {title}"),
        )
        .await
        .map_err(|e| AppError::store(name, e))?;
        Ok(())
    }
}
