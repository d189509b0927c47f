//! Conversions between script engine values and typed values.
//!
//! Every data type has its own conversion function; [`to_typed`] only selects
//! the function for the declared type of an output.

use rhai::{Array, Dynamic, Map};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ti_core::{DataType, TypedValue};

type Conversion<T> = std::result::Result<T, String>;

/// Convert a script value for an output of `data_type`.
///
/// File and directory values are paths; relative ones resolve against
/// `working_dir` and the target has to exist.
pub fn to_typed(value: Dynamic, data_type: DataType, working_dir: &Path) -> Conversion<TypedValue> {
    match data_type {
        DataType::Boolean => to_boolean(value).map(TypedValue::Boolean),
        DataType::Integer => to_integer(value).map(TypedValue::Integer),
        DataType::Float => to_float(value).map(TypedValue::Float),
        DataType::ShortText => to_short_text(value).map(TypedValue::ShortText),
        DataType::Vector => to_vector(value).map(TypedValue::Vector),
        DataType::Matrix => to_matrix(value).map(TypedValue::Matrix),
        DataType::FileReference => {
            to_existing_path(value, working_dir, false).map(TypedValue::FileReference)
        }
        DataType::DirectoryReference => {
            to_existing_path(value, working_dir, true).map(TypedValue::DirectoryReference)
        }
    }
}

/// Convert a value whose type is not declared, e.g. a persisted state entry.
pub fn infer(value: Dynamic) -> Conversion<TypedValue> {
    if value.is_bool() {
        return to_boolean(value).map(TypedValue::Boolean);
    }
    if value.is_int() {
        return to_integer(value).map(TypedValue::Integer);
    }
    if value.is_float() {
        return to_float(value).map(TypedValue::Float);
    }
    if value.is_string() {
        return to_short_text(value).map(TypedValue::ShortText);
    }
    if value.is_array() {
        let array = value.clone().into_array().map_err(mismatch("array"))?;
        if array.first().is_some_and(|row| row.is_array()) {
            return to_matrix(value).map(TypedValue::Matrix);
        }
        return to_vector(value).map(TypedValue::Vector);
    }
    Err(format!("values of type '{}' can not be stored", value.type_name()))
}

/// Script representation of a typed value.
pub fn to_dynamic(value: &TypedValue) -> Dynamic {
    match value {
        TypedValue::Boolean(b) => Dynamic::from(*b),
        TypedValue::Integer(i) => Dynamic::from(*i),
        TypedValue::Float(f) => Dynamic::from(*f),
        TypedValue::ShortText(s) => Dynamic::from(s.clone()),
        TypedValue::Vector(values) => Dynamic::from_array(float_array(values)),
        TypedValue::Matrix(rows) => Dynamic::from_array(
            rows.iter()
                .map(|row| Dynamic::from_array(float_array(row)))
                .collect(),
        ),
        TypedValue::FileReference(path) | TypedValue::DirectoryReference(path) => {
            Dynamic::from(path.display().to_string().replace('\\', "/"))
        }
    }
}

/// Script map of input values keyed by input name.
///
/// File and directory inputs point at their sandbox copies when available.
pub fn input_map(
    inputs: &BTreeMap<String, TypedValue>,
    local_paths: &BTreeMap<String, PathBuf>,
) -> Map {
    inputs
        .iter()
        .map(|(name, value)| {
            let dynamic = match (value, local_paths.get(name)) {
                (TypedValue::FileReference(_), Some(local)) => {
                    to_dynamic(&TypedValue::FileReference(local.clone()))
                }
                (TypedValue::DirectoryReference(_), Some(local)) => {
                    to_dynamic(&TypedValue::DirectoryReference(local.clone()))
                }
                _ => to_dynamic(value),
            };
            (name.as_str().into(), dynamic)
        })
        .collect()
}

fn float_array(values: &[f64]) -> Array {
    values.iter().map(|v| Dynamic::from(*v)).collect()
}

fn mismatch(expected: &'static str) -> impl Fn(&str) -> String {
    move |actual| format!("expected {expected}, got '{actual}'")
}

fn to_boolean(value: Dynamic) -> Conversion<bool> {
    if value.is_string() {
        let text = value.into_string().map_err(mismatch("boolean"))?;
        return text
            .trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| format!("'{text}' is not a boolean"));
    }
    value.as_bool().map_err(mismatch("boolean"))
}

fn to_integer(value: Dynamic) -> Conversion<i64> {
    if value.is_string() {
        let text = value.into_string().map_err(mismatch("integer"))?;
        return text.trim().parse().map_err(|_| format!("'{text}' is not an integer"));
    }
    value.as_int().map_err(mismatch("integer"))
}

fn to_float(value: Dynamic) -> Conversion<f64> {
    if value.is_int() {
        return value.as_int().map(|i| i as f64).map_err(mismatch("float"));
    }
    if value.is_string() {
        let text = value.into_string().map_err(mismatch("float"))?;
        return text.trim().parse().map_err(|_| format!("'{text}' is not a float"));
    }
    value.as_float().map_err(mismatch("float"))
}

fn to_short_text(value: Dynamic) -> Conversion<String> {
    if value.is_string() {
        return value.into_string().map_err(mismatch("text"));
    }
    if value.is_bool() || value.is_int() || value.is_float() || value.is_char() {
        return Ok(value.to_string());
    }
    Err(format!("expected text, got '{}'", value.type_name()))
}

fn to_vector(value: Dynamic) -> Conversion<Vec<f64>> {
    value
        .into_array()
        .map_err(mismatch("array of numbers"))?
        .into_iter()
        .map(to_float)
        .collect()
}

fn to_matrix(value: Dynamic) -> Conversion<Vec<Vec<f64>>> {
    let rows: Vec<Vec<f64>> = value
        .into_array()
        .map_err(mismatch("array of rows"))?
        .into_iter()
        .map(to_vector)
        .collect::<Conversion<_>>()?;
    if let Some(first) = rows.first() {
        if rows.iter().any(|row| row.len() != first.len()) {
            return Err("matrix rows differ in length".to_string());
        }
    }
    Ok(rows)
}

fn to_existing_path(value: Dynamic, working_dir: &Path, directory: bool) -> Conversion<PathBuf> {
    let text = to_short_text(value)?;
    let mut path = PathBuf::from(&text);
    if !path.is_absolute() {
        path = working_dir.join(path);
    }
    let exists = if directory { path.is_dir() } else { path.is_file() };
    if !exists {
        let kind = if directory { "Directory" } else { "File" };
        return Err(format!("{kind} doesn't exist: {}", path.display()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversions() {
        let wd = Path::new("/");
        assert_eq!(
            to_typed(Dynamic::from(3_i64), DataType::Float, wd).unwrap(),
            TypedValue::Float(3.0)
        );
        assert_eq!(
            to_typed(Dynamic::from("42".to_string()), DataType::Integer, wd).unwrap(),
            TypedValue::Integer(42)
        );
        assert_eq!(
            to_typed(Dynamic::from(true), DataType::ShortText, wd).unwrap(),
            TypedValue::ShortText("true".into())
        );
        assert!(to_typed(Dynamic::from(1.5_f64), DataType::Boolean, wd).is_err());
    }

    #[test]
    fn test_matrix_rows_must_align() {
        let ragged = Dynamic::from_array(vec![
            Dynamic::from_array(vec![Dynamic::from(1.0_f64)]),
            Dynamic::from_array(vec![Dynamic::from(1.0_f64), Dynamic::from(2.0_f64)]),
        ]);
        assert!(to_typed(ragged, DataType::Matrix, Path::new("/")).is_err());
    }

    #[test]
    fn test_file_output_resolved_against_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("result.txt"), "ok").unwrap();

        let value = to_typed(
            Dynamic::from("result.txt".to_string()),
            DataType::FileReference,
            dir.path(),
        )
        .unwrap();
        assert_eq!(value, TypedValue::FileReference(dir.path().join("result.txt")));

        let err = to_typed(
            Dynamic::from("missing.txt".to_string()),
            DataType::FileReference,
            dir.path(),
        )
        .unwrap_err();
        assert!(err.contains("doesn't exist"));
    }

    #[test]
    fn test_infer_and_back() {
        for value in [
            TypedValue::Boolean(false),
            TypedValue::Integer(7),
            TypedValue::Float(0.25),
            TypedValue::ShortText("abc".into()),
            TypedValue::Vector(vec![1.0, 2.0]),
            TypedValue::Matrix(vec![vec![1.0], vec![2.0]]),
        ] {
            assert_eq!(infer(to_dynamic(&value)).unwrap(), value);
        }
    }
}
