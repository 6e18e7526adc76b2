use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use thiserror::Error;

use super::model::{Rule, RuleBody, RuleName, Rules};

const RULENAME_COLUMN: &str = "rulename";
const RULE_JSON_COLUMN: &str = "rule_json";

/// Fatal input errors. Any of these aborts the run before the
/// embedding model is touched.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("required column `{0}` is missing")]
    MissingColumn(&'static str),

    #[error("`{column}` in row {row} must be a string")]
    NotAString { column: &'static str, row: usize },

    #[error("input must be a JSON array of objects")]
    NotAnArray,

    #[error("row {0} is not a JSON object")]
    RowNotAnObject(usize),

    #[error("csv row {row} has {found} fields, the header has {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("unterminated quoted field starting in csv row {0}")]
    UnterminatedQuote(usize),

    #[error("unsupported input extension `{0}`; expected .json or .csv")]
    UnsupportedExtension(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Rules {
    /// Load a dataset from a `.json` (array of objects) or `.csv`
    /// file. Both forms must carry `rulename` and `rule_json`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Rules::from_path({})", path.display()))?;

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let rules = match extension.as_str() {
            "json" => Self::from_json_str(&content),
            "csv" => Self::from_csv_str(&content),
            other => Err(DatasetError::UnsupportedExtension(other.to_owned())),
        }
        .with_context(|| format!("Rules::from_path({})", path.display()))?;
        Ok(rules)
    }

    /// Parse a JSON array of objects. Each object must have a string
    /// `rulename` and any `rule_json` value; remaining keys are kept
    /// as extras in input order.
    pub fn from_json_str(content: &str) -> Result<Self, DatasetError> {
        let parsed: Value = serde_json::from_str(content)?;
        let rows = parsed.as_array().ok_or(DatasetError::NotAnArray)?;

        let mut rules = Rules::default();
        for (row_idx, row) in rows.iter().enumerate() {
            let object = row
                .as_object()
                .ok_or(DatasetError::RowNotAnObject(row_idx))?;

            let name = object
                .get(RULENAME_COLUMN)
                .ok_or(DatasetError::MissingColumn(RULENAME_COLUMN))?
                .as_str()
                .ok_or(DatasetError::NotAString {
                    column: RULENAME_COLUMN,
                    row: row_idx,
                })?;
            let body = object
                .get(RULE_JSON_COLUMN)
                .ok_or(DatasetError::MissingColumn(RULE_JSON_COLUMN))?;

            let extras = object
                .iter()
                .filter(|(k, _)| k.as_str() != RULENAME_COLUMN && k.as_str() != RULE_JSON_COLUMN)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            rules.push(Rule {
                name: RuleName::from(name),
                body: RuleBody::from(body.clone()),
                extras,
            });
        }
        Ok(rules)
    }

    /// Parse delimited text with a header row. The `rule_json` cell is
    /// taken as a string and left to the canonicalizer's
    /// parse-or-passthrough; extra columns are kept as string extras.
    pub fn from_csv_str(content: &str) -> Result<Self, DatasetError> {
        let mut records = parse_delimited(content)?;
        if records.is_empty() {
            return Err(DatasetError::MissingColumn(RULENAME_COLUMN));
        }
        let header = records.remove(0);

        let name_idx = header
            .iter()
            .position(|h| h == RULENAME_COLUMN)
            .ok_or(DatasetError::MissingColumn(RULENAME_COLUMN))?;
        let body_idx = header
            .iter()
            .position(|h| h == RULE_JSON_COLUMN)
            .ok_or(DatasetError::MissingColumn(RULE_JSON_COLUMN))?;

        let mut rules = Rules::default();
        for (row_idx, fields) in records.into_iter().enumerate() {
            if fields.len() != header.len() {
                return Err(DatasetError::RaggedRow {
                    row: row_idx,
                    found: fields.len(),
                    expected: header.len(),
                });
            }

            let extras = header
                .iter()
                .zip(fields.iter())
                .enumerate()
                .filter(|(idx, _)| *idx != name_idx && *idx != body_idx)
                .map(|(_, (k, v))| (k.clone(), Value::String(v.clone())))
                .collect();

            rules.push(Rule {
                name: RuleName::from(fields[name_idx].as_str()),
                body: RuleBody::from(fields[body_idx].as_str()),
                extras,
            });
        }
        Ok(rules)
    }
}

/// Minimal RFC-4180-style reader: comma-separated, `"`-quoted fields
/// with `""` escapes, newlines allowed inside quotes. Returns one
/// `Vec<String>` per record, header included.
fn parse_delimited(content: &str) -> Result<Vec<Vec<String>>, DatasetError> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut fields));
            }
            other => field.push(other),
        }
    }
    if in_quotes {
        return Err(DatasetError::UnterminatedQuote(records.len()));
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push(fields);
    }
    // A trailing blank line shows up as a single empty field; drop it.
    records.retain(|r| !(r.len() == 1 && r[0].is_empty()));
    Ok(records)
}
