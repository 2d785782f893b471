//! # CRM Module
//!
//! Bitrix24 integration through an inbound webhook: leads from finished
//! forms and file uploads to the CRM disk.

use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::catalog::CatalogSnapshot;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::BitrixSettings;
use crate::dialogue::FormData;
use crate::errors::UpstreamError;
use crate::form::{data_summary, FormSettings};
use crate::pricing::format_price;
use crate::recovery::{with_retry, RecoveryConfig};

/// A lead as sent to the CRM
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lead {
    pub title: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub comments: String,
}

impl Lead {
    /// Build a lead from a completed form
    pub fn from_form(data: &FormData, catalog: &CatalogSnapshot, settings: &FormSettings) -> Self {
        let comments = match data_summary(data, catalog, settings) {
            Some(summary) => {
                let mut lines = vec![format!("Курс: {}", summary.course_name)];
                lines.push(format!("Категория: {}", summary.category_name));
                if let Some(nosology) = &summary.nosology_name {
                    lines.push(format!("Нозология: {nosology}"));
                }
                lines.push(format!("Рост: {}", summary.height));
                lines.push(format!("Вес: {}", summary.weight));
                if let Some(price) = summary.price {
                    lines.push(format!("Цена: {}", format_price(price)));
                }
                lines.join("\n")
            }
            None => format!("Курс: {}", data.course_name.as_deref().unwrap_or_default()),
        };

        Self {
            title: settings.lead_title.clone(),
            first_name: data.first_name.clone(),
            last_name: data.last_name.clone(),
            email: data.email.clone(),
            phone_number: data.phone_number.clone(),
            comments,
        }
    }

    /// Query parameters for `crm.lead.add`, skipping empty fields
    pub fn lead_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("FIELDS[TITLE]", self.title.clone())];
        if let Some(name) = non_empty(&self.first_name) {
            params.push(("FIELDS[NAME]", name));
        }
        if let Some(name) = non_empty(&self.last_name) {
            params.push(("FIELDS[LAST_NAME]", name));
        }
        if let Some(email) = non_empty(&self.email) {
            params.push(("FIELDS[EMAIL][0][VALUE]", email));
            params.push(("FIELDS[EMAIL][0][VALUE_TYPE]", "WORK".to_string()));
        }
        if let Some(phone) = non_empty(&self.phone_number) {
            params.push(("FIELDS[PHONE][0][VALUE]", phone));
            params.push(("FIELDS[PHONE][0][VALUE_TYPE]", "WORK".to_string()));
        }
        if !self.comments.is_empty() {
            params.push(("FIELDS[COMMENTS]", self.comments.clone()));
        }
        params
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Interpret a Bitrix REST response body
pub fn parse_bitrix_response(status: u16, body: &str) -> Result<Value, UpstreamError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if let Some(error) = parsed.as_ref().and_then(|v| v.get("error")) {
        let description = parsed
            .as_ref()
            .and_then(|v| v.get("error_description"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let code = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
        // 5xx with an error body is still worth a retry
        if status >= 500 {
            return Err(UpstreamError::Status {
                status,
                body: body.to_string(),
            });
        }
        return Err(UpstreamError::Api(format!("{code}: {description}")));
    }

    if !(200..300).contains(&status) {
        return Err(UpstreamError::Status {
            status,
            body: body.to_string(),
        });
    }

    parsed
        .and_then(|mut v| v.get_mut("result").map(Value::take))
        .ok_or_else(|| UpstreamError::Decode(format!("no result in response: {body}")))
}

/// Numeric ids come back either as numbers or as strings
fn as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Bitrix24 webhook client
pub struct BitrixClient {
    client: Client,
    settings: BitrixSettings,
    recovery: RecoveryConfig,
    breaker: CircuitBreaker,
}

impl BitrixClient {
    pub fn new(client: Client, settings: BitrixSettings, recovery: RecoveryConfig) -> Self {
        Self {
            client,
            settings,
            breaker: CircuitBreaker::new(recovery.clone()),
            recovery,
        }
    }

    pub fn settings(&self) -> &BitrixSettings {
        &self.settings
    }

    /// Full URL of a REST method
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/{}.json", self.settings.webhook_url.trim_end_matches('/'), method)
    }

    /// Create a lead, returning its CRM id
    pub async fn create_lead(&self, lead: &Lead) -> Result<u64, UpstreamError> {
        let url = self.method_url("crm.lead.add");
        let params = lead.lead_params();
        debug!(fields = params.len(), "Sending lead to Bitrix");

        let result = with_retry("bitrix.crm.lead.add", &self.recovery, &self.breaker, || {
            let request = self.client.post(&url).query(&params);
            async move { send(request).await }
        })
        .await?;

        let id = as_id(&result)
            .ok_or_else(|| UpstreamError::Decode(format!("lead id is not a number: {result}")))?;
        info!(lead_id = id, "Lead created in Bitrix");
        Ok(id)
    }

    /// Upload a file into a disk folder, returning the new file id
    pub async fn upload_file(
        &self,
        folder_id: u64,
        name: &str,
        content: &[u8],
    ) -> Result<u64, UpstreamError> {
        let url = self.method_url("disk.folder.uploadfile");
        let body = json!({
            "id": folder_id,
            "data": { "NAME": name },
            "fileContent": [name, base64::engine::general_purpose::STANDARD.encode(content)],
            "generateUniqueName": true,
        });

        let result = with_retry("bitrix.disk.folder.uploadfile", &self.recovery, &self.breaker, || {
            let request = self.client.post(&url).json(&body);
            async move { send(request).await }
        })
        .await?;

        let id = result
            .get("ID")
            .and_then(as_id)
            .ok_or_else(|| UpstreamError::Decode(format!("file id missing: {result}")))?;
        info!(file_id = id, folder_id, file_name = name, "File uploaded to Bitrix disk");
        Ok(id)
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<Value, UpstreamError> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    parse_bitrix_response(status, &body)
}
