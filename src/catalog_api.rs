//! REST catalog API source.
//!
//! The API exposes three JSON arrays: `GET {base}/categories`,
//! `GET {base}/nosologies` and `GET {base}/courses`.

use futures::future::BoxFuture;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::catalog::{CatalogSnapshot, CatalogSource, Category, Course, Nosology};
use crate::circuit_breaker::CircuitBreaker;
use crate::errors::UpstreamError;
use crate::pricing::parse_coefficient;
use crate::recovery::{with_retry, RecoveryConfig};

#[derive(Debug, Deserialize)]
pub struct ApiCategory {
    #[serde(rename = "categoryid")]
    pub id: String,
    #[serde(rename = "categoryName")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiNosology {
    #[serde(rename = "nosologyid")]
    pub id: String,
    #[serde(rename = "nosologyName")]
    pub name: String,
    #[serde(rename = "categoryid")]
    pub category_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiCourse {
    #[serde(rename = "Courseid")]
    pub id: String,
    #[serde(rename = "Course")]
    pub name: String,
    /// Number or string (the API forwards spreadsheet cells verbatim)
    pub coefficient: serde_json::Value,
    #[serde(rename = "categoryid")]
    pub category_id: String,
    #[serde(rename = "nosologyids", default)]
    pub nosology_ids: Vec<String>,
    #[serde(default)]
    pub fixed_price: bool,
}

impl ApiCourse {
    fn into_course(self) -> Option<Course> {
        let coefficient = match &self.coefficient {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => parse_coefficient(s),
            _ => None,
        };
        let Some(coefficient) = coefficient else {
            warn!(
                course_id = %self.id,
                raw = %self.coefficient,
                "Skipping course with unparsable coefficient"
            );
            return None;
        };
        Some(Course {
            id: self.id,
            name: self.name.trim().to_string(),
            coefficient,
            category_id: self.category_id,
            nosology_ids: self.nosology_ids,
            fixed_price: self.fixed_price,
        })
    }
}

/// Assemble a snapshot from the three API payloads, dropping dangling rows
pub fn snapshot_from_api(
    categories: Vec<ApiCategory>,
    nosologies: Vec<ApiNosology>,
    courses: Vec<ApiCourse>,
) -> CatalogSnapshot {
    let categories: Vec<Category> = categories
        .into_iter()
        .map(|c| Category {
            id: c.id,
            name: c.name.trim().to_string(),
        })
        .collect();
    let known_category = |id: &str| categories.iter().any(|c| c.id == id);

    let nosologies: Vec<Nosology> = nosologies
        .into_iter()
        .filter(|n| known_category(&n.category_id))
        .map(|n| Nosology {
            id: n.id,
            name: n.name.trim().to_string(),
            category_id: n.category_id,
        })
        .collect();

    let courses: Vec<Course> = courses
        .into_iter()
        .filter(|c| known_category(&c.category_id))
        .filter_map(ApiCourse::into_course)
        .collect();

    CatalogSnapshot::new(categories, nosologies, courses)
}

/// Catalog source backed by the REST catalog API
pub struct RestCatalogSource {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
    recovery: RecoveryConfig,
    breaker: CircuitBreaker,
}

impl RestCatalogSource {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        login: Option<String>,
        password: Option<String>,
        recovery: RecoveryConfig,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: login.map(|l| (l, password.unwrap_or_default())),
            breaker: CircuitBreaker::new(recovery.clone()),
            recovery,
        }
    }

    pub fn endpoint(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource)
    }

    async fn get_json<T: DeserializeOwned>(&self, resource: &str) -> Result<T, UpstreamError> {
        let url = self.endpoint(resource);
        with_retry(resource, &self.recovery, &self.breaker, || {
            let mut request = self.client.get(&url);
            if let Some((login, password)) = &self.credentials {
                request = request.basic_auth(login, Some(password));
            }
            async move {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(UpstreamError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                response
                    .json::<T>()
                    .await
                    .map_err(|e| UpstreamError::Decode(format!("{resource}: {e}")))
            }
        })
        .await
    }
}

impl CatalogSource for RestCatalogSource {
    fn name(&self) -> &str {
        "catalog-api"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<CatalogSnapshot, UpstreamError>> {
        Box::pin(async move {
            let categories: Vec<ApiCategory> = self.get_json("categories").await?;
            let nosologies: Vec<ApiNosology> = self.get_json("nosologies").await?;
            let courses: Vec<ApiCourse> = self.get_json("courses").await?;
            Ok(snapshot_from_api(categories, nosologies, courses))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_format() {
        let categories: Vec<ApiCategory> = serde_json::from_str(
            r#"[{"categoryid": "1", "categoryName": " Онкология "}]"#,
        )
        .unwrap();
        let nosologies: Vec<ApiNosology> = serde_json::from_str(
            r#"[{"nosologyid": "10", "nosologyName": "Лимфома", "categoryid": "1"},
                {"nosologyid": "11", "nosologyName": "Orphan", "categoryid": "99"}]"#,
        )
        .unwrap();
        let courses: Vec<ApiCourse> = serde_json::from_str(
            r#"[
                {
                    "Courseid": "100",
                    "Course": "R-CHOP",
                    "coefficient": "12 000,5",
                    "categoryid": "1",
                    "nosologyids": ["10"]
                },
                {"Courseid": "101", "Course": "Broken", "coefficient": "n/a", "categoryid": "1"},
                {
                    "Courseid": "102",
                    "Course": "Fixed",
                    "coefficient": 700,
                    "categoryid": "1",
                    "fixed_price": true
                }
            ]"#,
        )
        .unwrap();

        let snapshot = snapshot_from_api(categories, nosologies, courses);
        assert_eq!(snapshot.categories[0].name, "Онкология");
        assert_eq!(snapshot.nosologies.len(), 1);
        assert_eq!(snapshot.courses.len(), 2);
        let rchop = snapshot.find_course("100").unwrap();
        assert_eq!(rchop.coefficient, 12000.5);
        assert_eq!(rchop.nosology_ids, vec!["10".to_string()]);
        assert!(snapshot.find_course("102").unwrap().fixed_price);
    }

    #[test]
    fn endpoint_joins_base_url() {
        let source = RestCatalogSource::new(
            Client::new(),
            "https://catalog.example.com/api/",
            None,
            None,
            RecoveryConfig::default(),
        );
        assert_eq!(source.endpoint("courses"), "https://catalog.example.com/api/courses");
    }
}
