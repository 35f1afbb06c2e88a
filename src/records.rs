use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::AppResult;
use crate::security::InputValidator;

/// Choices offered by the form selects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropdownData {
    #[serde(default)]
    pub companies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub areas: Vec<String>,
    #[serde(default)]
    pub items: Vec<String>,
}

impl DropdownData {
    pub fn company_names(&self) -> Vec<String> {
        self.companies.keys().cloned().collect()
    }

    pub fn projects_for(&self, company: &str) -> &[String] {
        self.companies
            .get(company)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub date: String,
    pub company: Option<String>,
}

impl SearchQuery {
    pub fn new(date: &str, company: Option<&str>) -> AppResult<Self> {
        InputValidator::validate_query_date(date)?;
        let company = company
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        Ok(Self {
            date: date.trim().to_string(),
            company,
        })
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("date", self.date.clone())];
        if let Some(company) = &self.company {
            params.push(("company", company.clone()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    #[serde(rename = "type", default)]
    pub record_type: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub location: String,
}

/// Phase a stored record belongs to, from the record's `type` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Pre,
    During,
    After,
    Unknown,
}

impl RecordType {
    pub fn classify(record_type: &str) -> Self {
        match record_type.trim() {
            "動火前" => Self::Pre,
            "動火中" => Self::During,
            "動火後" => Self::After,
            _ => Self::Unknown,
        }
    }

    pub fn tag(&self) -> Option<&'static str> {
        match self {
            Self::Pre => Some("pre"),
            Self::During => Some("during"),
            Self::After => Some("after"),
            Self::Unknown => None,
        }
    }
}

impl SearchRecord {
    pub fn kind(&self) -> RecordType {
        RecordType::classify(&self.record_type)
    }

    /// Phase cell of the results table, e.g. `[pre] 動火前`.
    pub fn phase_label(&self) -> String {
        match self.kind().tag() {
            Some(tag) => format!("[{}] {}", tag, self.record_type),
            None => self.record_type.clone(),
        }
    }
}

const HEADERS: [&str; 5] = ["Phase", "Company", "Project", "Time", "Location"];

/// Render search results as an aligned text table.
pub fn render_table(records: &[SearchRecord]) -> String {
    if records.is_empty() {
        return "No records found".to_string();
    }

    let phases: Vec<String> = records.iter().map(SearchRecord::phase_label).collect();
    let rows: Vec<[&str; 5]> = records
        .iter()
        .zip(&phases)
        .map(|(r, phase)| {
            [
                phase.as_str(),
                r.company.as_str(),
                r.project.as_str(),
                r.time.as_str(),
                r.location.as_str(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_row = |cells: &[&str; 5]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let pad = width - cell.chars().count();
                format!("{}{}", cell, " ".repeat(pad))
            })
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format_row(&HEADERS));
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    lines.extend(rows.iter().map(format_row));
    lines.join("\n")
}
