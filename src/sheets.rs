//! Google Sheets catalog source.
//!
//! The sheet holds one course per row. Categories and nosologies are not
//! stored separately; they are collected from the course rows. Ids are short
//! SHA-256 prefixes of the identifying names, so a stored selection keeps
//! pointing at the same record when rows are inserted or reordered, and
//! callback payloads stay well under Telegram's 64 bytes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures::future::BoxFuture;
use reqwest::{Client, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::catalog::{CatalogSnapshot, CatalogSource, Category, Course, Nosology};
use crate::circuit_breaker::CircuitBreaker;
use crate::errors::UpstreamError;
use crate::pricing::parse_coefficient;
use crate::recovery::{with_retry, RecoveryConfig};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
/// Hex characters kept from the digest
const ID_LEN: usize = 12;

/// Column header (lowercased) -> course field
const FIELDS_MAPPING: &[(&str, CourseField)] = &[
    ("название курса", CourseField::Name),
    ("коэффициент", CourseField::Coefficient),
    ("подкатегория 1", CourseField::Category),
    ("нозология 1", CourseField::Nosology),
    ("нозология 2", CourseField::Nosology),
    ("нозология 3", CourseField::Nosology),
    ("нозология 4", CourseField::Nosology),
    ("нозология 5", CourseField::FixedPrice),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CourseField {
    Name,
    Coefficient,
    Category,
    Nosology,
    FixedPrice,
}

/// One course row after header mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetCourse {
    pub row: usize,
    pub name: String,
    pub coefficient: String,
    pub category: String,
    pub nosologies: Vec<String>,
    pub fixed_price: bool,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Drop columns whose header cell is empty
pub fn filter_empty_keys(values: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let mut rows = values.into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let keep: Vec<usize> = header
        .iter()
        .enumerate()
        .filter(|(_, key)| !key.trim().is_empty())
        .map(|(i, _)| i)
        .collect();

    let project = |row: &[String]| -> Vec<String> {
        keep.iter()
            .map(|&i| row.get(i).cloned().unwrap_or_default())
            .collect()
    };

    let mut filtered = vec![project(&header)];
    filtered.extend(rows.map(|row| project(&row)));
    filtered
}

/// Map one row onto course fields using the header row
pub fn map_course_fields(row_index: usize, header: &[String], row: &[String]) -> SheetCourse {
    let mut course = SheetCourse {
        row: row_index,
        ..Default::default()
    };
    for (key, value) in header.iter().zip(row) {
        let key = key.trim().to_lowercase();
        let Some((_, field)) = FIELDS_MAPPING.iter().find(|(name, _)| *name == key) else {
            continue;
        };
        let value = value.replace(['\n', '\r'], " ").trim().to_string();
        match field {
            CourseField::Name => course.name = value,
            CourseField::Coefficient => course.coefficient = value,
            CourseField::Category => course.category = value,
            CourseField::Nosology if !value.is_empty() => course.nosologies.push(value),
            CourseField::Nosology => {}
            CourseField::FixedPrice => course.fixed_price = !value.is_empty(),
        }
    }
    course
}

/// Turn raw sheet values (header row first) into a catalog snapshot
pub fn parse_courses(values: Vec<Vec<String>>) -> CatalogSnapshot {
    let values = filter_empty_keys(values);
    let Some((header, rows)) = values.split_first() else {
        return CatalogSnapshot::new(Vec::new(), Vec::new(), Vec::new());
    };

    let parsed: Vec<(SheetCourse, f64)> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| map_course_fields(i, header, row))
        .filter_map(|course| {
            if course.name.is_empty() || course.category.is_empty() {
                return None;
            }
            match parse_coefficient(&course.coefficient) {
                Some(coefficient) => Some((course, coefficient)),
                None => {
                    warn!(
                        row = course.row,
                        course = %course.name,
                        raw = %course.coefficient,
                        "Skipping course with unparsable coefficient"
                    );
                    None
                }
            }
        })
        .collect();

    // Category name -> set of nosology names, both ordered
    let mut tree: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (course, _) in &parsed {
        let entry = tree.entry(course.category.as_str()).or_default();
        entry.extend(course.nosologies.iter().map(String::as_str));
    }

    let mut categories = Vec::new();
    let mut nosologies = Vec::new();
    let mut category_ids: HashMap<&str, String> = HashMap::new();
    let mut nosology_ids: HashMap<(&str, &str), String> = HashMap::new();
    for (&category, names) in &tree {
        let category_id = content_id(&[category]);
        categories.push(Category {
            id: category_id.clone(),
            name: category.to_string(),
        });
        for &nosology in names {
            let nosology_id = content_id(&[category, nosology]);
            nosologies.push(Nosology {
                id: nosology_id.clone(),
                name: nosology.to_string(),
                category_id: category_id.clone(),
            });
            nosology_ids.insert((category, nosology), nosology_id);
        }
        category_ids.insert(category, category_id);
    }

    // Identical rows would share an id; later ones get a numeric suffix
    let mut seen: HashMap<String, usize> = HashMap::new();
    let courses = parsed
        .iter()
        .filter_map(|(course, coefficient)| {
            let category_id = category_ids.get(course.category.as_str())?;
            let mut key = vec![course.category.as_str(), course.name.as_str()];
            key.extend(course.nosologies.iter().map(String::as_str));
            let base_id = content_id(&key);
            let duplicates = seen.entry(base_id.clone()).or_default();
            *duplicates += 1;
            let id = match *duplicates {
                1 => base_id,
                n => format!("{base_id}-{n}"),
            };

            Some(Course {
                id,
                name: course.name.clone(),
                coefficient: *coefficient,
                category_id: category_id.clone(),
                nosology_ids: course
                    .nosologies
                    .iter()
                    .filter_map(|n| {
                        nosology_ids
                            .get(&(course.category.as_str(), n.as_str()))
                            .cloned()
                    })
                    .collect(),
                fixed_price: course.fixed_price,
            })
        })
        .collect();

    CatalogSnapshot::new(categories, nosologies, courses)
}

/// Short stable id for the values that identify a record
fn content_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    hex::encode(hasher.finalize())[..ID_LEN].to_string()
}

/// Catalog source reading a spreadsheet through the Sheets v4 values API
pub struct SheetCatalogSource {
    client: Client,
    spreadsheet_id: String,
    range: String,
    api_key: String,
    recovery: RecoveryConfig,
    breaker: CircuitBreaker,
}

impl SheetCatalogSource {
    pub fn new(
        client: Client,
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
        api_key: impl Into<String>,
        recovery: RecoveryConfig,
    ) -> Self {
        Self {
            client,
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            api_key: api_key.into(),
            breaker: CircuitBreaker::new(recovery.clone()),
            recovery,
        }
    }

    /// Values endpoint for the configured range, without the API key
    pub fn values_url(&self) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(SHEETS_API_BASE)
            .map_err(|e| UpstreamError::Api(format!("invalid sheets base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| UpstreamError::Api("sheets base url cannot be a base".into()))?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(&self.range);
        Ok(url)
    }

    async fn fetch_values(&self) -> Result<Vec<Vec<String>>, UpstreamError> {
        let url = self.values_url()?;
        with_retry("sheets", &self.recovery, &self.breaker, || {
            let request = self
                .client
                .get(url.clone())
                .query(&[("key", self.api_key.as_str())]);
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
                let range: ValueRange = response
                    .json()
                    .await
                    .map_err(|e| UpstreamError::Decode(format!("sheet values: {e}")))?;
                Ok(range.values)
            }
        })
        .await
    }
}

impl CatalogSource for SheetCatalogSource {
    fn name(&self) -> &str {
        "google-sheets"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<CatalogSnapshot, UpstreamError>> {
        Box::pin(async move {
            let values = self.fetch_values().await?;
            Ok(parse_courses(values))
        })
    }
}
