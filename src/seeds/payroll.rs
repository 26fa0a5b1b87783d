//! Payroll specification documents.
//!
//! A document is stored verbatim in `payroll_spec.spec_yaml`; a few `meta`
//! fields are lifted into columns so rows can be looked up by jurisdiction and
//! year.

use std::{fs, path::Path};

use chrono::NaiveDate;
use sea_orm::ConnectionTrait;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::info;

use crate::error::SeedError;
use crate::repositories::{PayrollSpecInput, PayrollSpecRepository};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayrollMeta {
    /// `JURISDICTION-YEAR`, e.g. `CA-ON-2026`.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub period_mode: Option<String>,
    #[serde(default)]
    pub active_date: Option<Value>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// The parts of a payroll spec this service reads. Everything else in the
/// document is opaque.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayrollSpecDocument {
    #[serde(default)]
    pub meta: PayrollMeta,
    /// Older documents carry the date at the top level.
    #[serde(default)]
    pub active_date: Option<Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl PayrollSpecDocument {
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        let doc: Option<Self> = serde_yaml::from_str(raw)?;
        Ok(doc.unwrap_or_default())
    }

    /// Splits `meta.code` on its last `-` into jurisdiction and year.
    pub fn jurisdiction_and_year(&self) -> (Option<String>, Option<i32>) {
        let Some(code) = self.meta.code.as_deref() else {
            return (None, None);
        };
        let (jurisdiction, year) = match code.rsplit_once('-') {
            Some((jurisdiction, year)) => (jurisdiction.to_string(), year.trim().parse().ok()),
            None => (code.to_string(), None),
        };
        let year = year.or_else(|| self.active_date().map(|date| chrono::Datelike::year(&date)));
        (Some(jurisdiction), year)
    }

    /// `meta.active_date`, falling back to the top-level field.
    pub fn active_date(&self) -> Option<NaiveDate> {
        self.meta
            .active_date
            .as_ref()
            .or(self.active_date.as_ref())
            .and_then(parse_date)
    }

    /// `meta.comment`, falling back to the top-level `notes`.
    pub fn comment(&self) -> Option<&str> {
        self.meta.comment.as_deref().or(self.notes.as_deref())
    }

    fn has_active_date(&self) -> bool {
        self.meta.active_date.is_some() || self.active_date.is_some()
    }
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    // Accept full timestamps by reading only the date part.
    let date_part = text.get(..10).unwrap_or(&text);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Parses and validates a document into column values.
pub fn parse_payroll_spec(path: &Path, raw: &str) -> Result<PayrollSpecInput, SeedError> {
    let invalid = |message: String| SeedError::InvalidManifest {
        path: path.to_path_buf(),
        message,
    };

    let doc = PayrollSpecDocument::from_yaml(raw).map_err(|source| SeedError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    let Some(code) = doc.meta.code.clone() else {
        return Err(invalid("meta.code is required (e.g. CA-ON-2026)".to_string()));
    };
    if !doc.has_active_date() {
        return Err(invalid(
            "active_date is required in meta or at the top level".to_string(),
        ));
    }

    let (jurisdiction, year) = doc.jurisdiction_and_year();
    let (Some(jurisdiction), Some(year)) = (jurisdiction, year) else {
        return Err(invalid(format!(
            "cannot determine jurisdiction and year from code '{code}'"
        )));
    };

    Ok(PayrollSpecInput {
        code,
        jurisdiction,
        year,
        currency: doc.meta.currency.clone(),
        period_mode: doc.meta.period_mode.clone(),
        active_date: doc.active_date(),
        comment: doc.comment().map(str::to_owned),
        spec_yaml: raw.to_string(),
    })
}

/// Loads one document and upserts it by `(jurisdiction, year)`.
pub async fn seed_payroll_spec<C: ConnectionTrait>(
    conn: &C,
    path: &Path,
) -> Result<i32, SeedError> {
    let raw = fs::read_to_string(path).map_err(|source| SeedError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let input = parse_payroll_spec(path, &raw)?;
    let id = PayrollSpecRepository::new(conn).upsert(&input).await?;
    info!(
        spec = %path.display(),
        jurisdiction = %input.jurisdiction,
        year = input.year,
        "seeded payroll spec"
    );
    Ok(id)
}
