// src/services/notifier.rs

//! Best-effort Telegram notifications.
//!
//! Delivery failures are logged and swallowed; a notification can never
//! fail a run.

use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, Result, head_of};
use crate::models::{Config, RunSummary};
use crate::utils::http::create_plain_client;

/// Telegram caps message text at 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Sends plain-text messages to one chat.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    endpoint: String,
    chat_id: String,
}

impl Notifier {
    pub fn new(client: Client, api_base: &str, bot_token: &str, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), bot_token),
            chat_id: chat_id.into(),
        }
    }

    /// `None` unless both bot token and chat id are configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.telegram_enabled() {
            return None;
        }
        let token = config.telegram.bot_token.as_deref()?;
        let chat_id = config.telegram.chat_id.as_deref()?;
        match create_plain_client(&config.session) {
            Ok(client) => Some(Self::new(client, &config.telegram.api_base, token, chat_id)),
            Err(e) => {
                log::warn!("Telegram disabled, client setup failed: {}", e);
                None
            }
        }
    }

    async fn try_send(&self, text: &str) -> Result<()> {
        let text = truncate(text, MAX_MESSAGE_CHARS);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: &text,
            disable_web_page_preview: true,
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::validation(format!(
                "Telegram returned {}: {}",
                status.as_u16(),
                head_of(&text)
            )));
        }
        Ok(())
    }

    /// Send a message; failures are only logged.
    pub async fn send(&self, text: &str) {
        if let Err(e) = self.try_send(text).await {
            log::error!("Telegram error: {}", e);
        }
    }
}

/// Send through an optional notifier.
pub async fn notify(notifier: Option<&Notifier>, text: &str) {
    if let Some(notifier) = notifier {
        notifier.send(text).await;
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Message for a grade that could not be fetched.
pub fn grade_error_message(grade_id: &str, error: &str) -> String {
    format!("Error fetching grade {grade_id}: {error}")
}

/// Message for an aborted run.
pub fn fatal_message(error: &str) -> String {
    format!("Fatal error: {error}")
}

/// Message for a run that produced changes.
pub fn summary_message(script: &str, summary: &RunSummary) -> String {
    format!(
        "{script} {}: {} grades, {} matches, {} errors\n{}",
        summary.run_id,
        summary.grade_count,
        summary.match_count,
        summary.errors,
        summary.note()
    )
}
