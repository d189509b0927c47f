//! Typed values exchanged with the surrounding workflow.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{Error, Result};

/// Data type of an input or output endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    Boolean,
    Integer,
    Float,
    ShortText,
    Vector,
    Matrix,
    FileReference,
    DirectoryReference,
}

impl DataType {
    /// Whether values of this type live on the filesystem.
    pub fn is_reference(self) -> bool {
        matches!(self, Self::FileReference | Self::DirectoryReference)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "Boolean",
            Self::Integer => "Integer",
            Self::Float => "Float",
            Self::ShortText => "Short Text",
            Self::Vector => "Vector",
            Self::Matrix => "Matrix",
            Self::FileReference => "File",
            Self::DirectoryReference => "Directory",
        };
        f.write_str(name)
    }
}

/// A value bound to an input or produced for an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum TypedValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    ShortText(String),
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
    FileReference(PathBuf),
    DirectoryReference(PathBuf),
}

impl TypedValue {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Integer(_) => DataType::Integer,
            Self::Float(_) => DataType::Float,
            Self::ShortText(_) => DataType::ShortText,
            Self::Vector(_) => DataType::Vector,
            Self::Matrix(_) => DataType::Matrix,
            Self::FileReference(_) => DataType::FileReference,
            Self::DirectoryReference(_) => DataType::DirectoryReference,
        }
    }

    /// Textual form of a scalar value, `None` for vectors, matrices and references.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::Boolean(b) => Some(b.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(float_literal(*f)),
            Self::ShortText(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Bracketed numeric literal list for vectors (`[1.0,2.5]`) and matrices (`[[1.0],[2.0]]`).
    pub fn numeric_literal(&self) -> Option<String> {
        match self {
            Self::Vector(values) => Some(row_literal(values)),
            Self::Matrix(rows) => {
                let rows: Vec<String> = rows.iter().map(|row| row_literal(row)).collect();
                Some(format!("[{}]", rows.join(",")))
            }
            _ => None,
        }
    }

    /// Parse a raw command-line value for the given type.
    ///
    /// Vectors are comma separated (`1,2,3`), matrix rows are separated by `;`.
    pub fn parse(data_type: DataType, raw: &str) -> Result<Self> {
        let invalid = |reason: String| {
            Error::endpoint(format!("Invalid {data_type} value '{raw}': {reason}"))
        };
        let value = match data_type {
            DataType::Boolean => Self::Boolean(
                raw.trim()
                    .to_ascii_lowercase()
                    .parse()
                    .map_err(|e: std::str::ParseBoolError| invalid(e.to_string()))?,
            ),
            DataType::Integer => Self::Integer(
                raw.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?,
            ),
            DataType::Float => Self::Float(parse_float(raw).map_err(invalid)?),
            DataType::ShortText => Self::ShortText(raw.to_string()),
            DataType::Vector => Self::Vector(parse_row(raw).map_err(invalid)?),
            DataType::Matrix => {
                let rows = raw
                    .trim()
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .split(';')
                    .map(parse_row)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(invalid)?;
                Self::Matrix(rows)
            }
            DataType::FileReference => Self::FileReference(PathBuf::from(raw)),
            DataType::DirectoryReference => Self::DirectoryReference(PathBuf::from(raw)),
        };
        Ok(value)
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileReference(path) | Self::DirectoryReference(path) => {
                write!(f, "{}", path.display())
            }
            Self::Vector(_) | Self::Matrix(_) => {
                f.write_str(&self.numeric_literal().unwrap_or_default())
            }
            _ => f.write_str(&self.scalar_text().unwrap_or_default()),
        }
    }
}

/// Float text that always keeps a decimal point, so `1.0` never degrades to `1`.
fn float_literal(value: f64) -> String {
    format!("{value:?}")
}

fn row_literal(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| float_literal(*v)).collect();
    format!("[{}]", items.join(","))
}

fn parse_float(raw: &str) -> std::result::Result<f64, String> {
    raw.trim().parse::<f64>().map_err(|e| e.to_string())
}

fn parse_row(raw: &str) -> std::result::Result<Vec<f64>, String> {
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner.split(',').map(parse_float).collect()
}
