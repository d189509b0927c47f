//! Skip-if-unchanged memoization over static inputs and outputs.

use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use ti_core::{Error, InputDecl, OutputDecl, Result, TypedValue};

/// Comparable form of one static input value.
///
/// Files and directories are compared by content, so a re-sent file with the
/// same bytes counts as unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum StaticInput {
    Value(TypedValue),
    Content(String),
}

/// Static input snapshot of one run, keyed by input name.
pub type StaticInputs = BTreeMap<String, StaticInput>;

/// Capture the static inputs among `values`.
///
/// Reads file contents, so call it off the async threads.
pub fn capture(decls: &[InputDecl], values: &BTreeMap<String, TypedValue>) -> Result<StaticInputs> {
    let mut snapshot = StaticInputs::new();
    for decl in decls.iter().filter(|d| d.is_static) {
        let Some(value) = values.get(&decl.name) else {
            continue;
        };
        let entry = match value {
            TypedValue::FileReference(path) => StaticInput::Content(hash_file(path)?),
            TypedValue::DirectoryReference(path) => StaticInput::Content(hash_dir(path)?),
            other => StaticInput::Value(other.clone()),
        };
        snapshot.insert(decl.name.clone(), entry);
    }
    Ok(snapshot)
}

fn hash_file(path: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file =
        std::fs::File::open(path).map_err(|e| Error::sandbox_io("read static input", path, e))?;
    std::io::copy(&mut file, &mut hasher).map_err(|e| Error::sandbox_io("read static input", path, e))?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn hash_dir(root: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::sandbox_io("read static input", &path, e.into())
        })?;
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        if entry.file_type().is_file() {
            hasher.update(hash_file(entry.path())?.as_bytes());
        }
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// What the last completed run saw and produced.
///
/// Lives as long as its job.
#[derive(Debug, Clone, Default)]
pub struct CachedRunState {
    inputs: Option<StaticInputs>,
    outputs: Vec<(String, TypedValue)>,
    complete: bool,
}

impl CachedRunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a run with `current` static inputs can replay the last result.
    pub fn is_unchanged(&self, current: &StaticInputs) -> bool {
        self.complete && !current.is_empty() && self.inputs.as_ref() == Some(current)
    }

    /// Start recording a fresh run.
    pub fn begin(&mut self, current: StaticInputs) {
        self.inputs = Some(current);
        self.outputs.clear();
        self.complete = false;
    }

    /// Remember `value` if `name` is a static output.
    pub fn record_output(&mut self, decls: &[OutputDecl], name: &str, value: &TypedValue) {
        if decls.iter().any(|d| d.name == name && d.is_static) {
            self.outputs.push((name.to_string(), value.clone()));
        }
    }

    pub fn complete(&mut self) {
        self.complete = true;
    }

    /// Forget everything after a failed or cancelled run.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    /// Static outputs of the last completed run, in publication order.
    pub fn outputs(&self) -> &[(String, TypedValue)] {
        &self.outputs
    }
}
