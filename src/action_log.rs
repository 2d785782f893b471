//! # Action Log Module
//!
//! Analytics trail of user actions. Every record is shipped to the Sematext
//! log receiver when configured and kept in a bounded in-memory buffer that
//! the admin API can export.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ActionLogSettings;
use crate::errors::UpstreamError;

pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;
const SHIP_TIMEOUT: Duration = Duration::from_secs(5);

/// One analytics record, in the shape the log receiver indexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub message: String,
    pub user_id: i64,
    /// "{first_name} {last_name}" as shown in Telegram
    pub name: String,
    /// `@handle`, when the user has one
    pub username: Option<String>,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
}

pub struct ActionLogger {
    client: Client,
    settings: Option<ActionLogSettings>,
    recent: Mutex<VecDeque<ActionRecord>>,
    capacity: usize,
}

impl ActionLogger {
    pub fn new(client: Client, settings: Option<ActionLogSettings>, capacity: usize) -> Self {
        Self {
            client,
            settings,
            recent: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<ActionRecord>> {
        self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Receiver endpoint for single documents
    pub fn receiver_endpoint(settings: &ActionLogSettings) -> String {
        format!(
            "{}/{}/_doc",
            settings.receiver_url.trim_end_matches('/'),
            settings.token
        )
    }

    /// Record an action and ship it to the receiver
    pub async fn log(
        &self,
        message: &str,
        user_id: i64,
        name: &str,
        username: Option<&str>,
    ) -> Result<(), UpstreamError> {
        let record = ActionRecord {
            message: message.to_string(),
            user_id,
            name: name.to_string(),
            username: username.map(str::to_string),
            timestamp: Utc::now(),
        };

        {
            let mut buffer = self.buffer();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(record.clone());
        }

        let Some(settings) = &self.settings else {
            return Ok(());
        };

        debug!(user_id, action = %record.message, "Shipping action record");
        let response = self
            .client
            .post(Self::receiver_endpoint(settings))
            .timeout(SHIP_TIMEOUT)
            .json(&record)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Snapshot of the buffered records, oldest first
    pub fn recent(&self) -> Vec<ActionRecord> {
        self.buffer().iter().cloned().collect()
    }

    /// Buffered records as JSON lines
    pub fn export_recent(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut out = Vec::new();
        for record in self.buffer().iter() {
            serde_json::to_writer(&mut out, record)?;
            out.push(b'\n');
        }
        Ok(out)
    }

    /// File name for an export made now
    pub fn export_file_name(now: DateTime<Utc>) -> String {
        format!("actions_{}.jsonl", now.format("%Y-%m-%d_%H-%M-%S"))
    }
}
