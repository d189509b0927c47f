//! Tool configuration snapshot.
//!
//! A [`ToolConfig`] is taken once when a job is constructed and never changes
//! afterwards. Keys are camelCase so integration descriptions can be loaded from
//! JSON unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::value::DataType;
use crate::{Error, Result};

/// Whether the tool directory is copied into the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CopyToolBehaviour {
    /// Run the tool from its source directory.
    #[default]
    Never,
    /// Copy once into the base working directory.
    Once,
    /// Copy into every iteration directory.
    Always,
}

/// When the sandbox is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteBehaviour {
    Never,
    /// After the job has finished.
    Once,
    /// After every iteration.
    Always,
}

/// A declared input endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDecl {
    pub name: String,
    pub data_type: DataType,
    #[serde(rename = "static", default)]
    pub is_static: bool,
}

impl InputDecl {
    pub fn new<S: Into<String>>(name: S, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_static: false,
        }
    }

    /// Mark the input as static (eligible for skip-and-replay).
    pub fn static_input(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// A declared output endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDecl {
    pub name: String,
    pub data_type: DataType,
    #[serde(rename = "static", default)]
    pub is_static: bool,
}

impl OutputDecl {
    pub fn new<S: Into<String>>(name: S, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_static: false,
        }
    }

    pub fn static_output(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// A configuration property, optionally written into a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyValue {
    pub value: String,
    /// Target file name inside `Config/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_filename: Option<String>,
}

impl PropertyValue {
    pub fn plain<S: Into<String>>(value: S) -> Self {
        Self {
            value: value.into(),
            config_filename: None,
        }
    }

    pub fn in_file<S: Into<String>, F: Into<String>>(value: S, filename: F) -> Self {
        Self {
            value: value.into(),
            config_filename: Some(filename.into()),
        }
    }
}

/// Read access to the key-value configuration surface.
pub trait ConfigReader {
    /// Value of the property `key`, if configured.
    fn property(&self, key: &str) -> Option<String>;

    /// Properties tagged with a config file, grouped by file name.
    fn config_files(&self) -> BTreeMap<String, Vec<(String, String)>>;
}

/// Configuration snapshot of one integrated tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolConfig {
    pub tool_name: String,
    pub component_name: String,
    pub workflow_name: String,
    pub tool_directory: PathBuf,
    pub root_working_directory: Option<PathBuf>,

    pub use_iteration_directories: bool,
    pub copy_tool_behaviour: CopyToolBehaviour,
    pub delete_working_directories_always: bool,
    pub delete_working_directories_once: bool,
    pub delete_working_directories_never: bool,
    pub chosen_delete_temp_dir_behavior: Option<DeleteBehaviour>,
    pub keep_on_failure: bool,
    pub delete_working_directories_keep_on_error_iteration: bool,
    pub delete_working_directories_keep_on_error_once: bool,

    pub dont_crash_on_non_zero_exit_codes: bool,
    pub set_tool_dir_as_working_dir: bool,
    pub command_script_windows: String,
    pub command_script_windows_enabled: bool,
    pub command_script_linux: String,
    pub command_script_linux_enabled: bool,
    pub pre_script: String,
    pub post_script: String,
    pub mock_script: String,
    pub mock_mode_supported: bool,
    pub mock_mode: bool,
    pub always_run: bool,

    pub requires_output_approval: bool,
    pub verification_token_location: Option<PathBuf>,
    pub verification_token_recipients: String,

    /// Whether finished runs are pushed to the history sink.
    pub store_data_item: bool,

    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<OutputDecl>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tool_name: String::new(),
            component_name: String::new(),
            workflow_name: String::new(),
            tool_directory: PathBuf::new(),
            root_working_directory: None,
            use_iteration_directories: false,
            copy_tool_behaviour: CopyToolBehaviour::Never,
            delete_working_directories_always: false,
            delete_working_directories_once: true,
            delete_working_directories_never: false,
            chosen_delete_temp_dir_behavior: None,
            keep_on_failure: false,
            delete_working_directories_keep_on_error_iteration: false,
            delete_working_directories_keep_on_error_once: false,
            dont_crash_on_non_zero_exit_codes: false,
            set_tool_dir_as_working_dir: false,
            command_script_windows: String::new(),
            command_script_windows_enabled: false,
            command_script_linux: String::new(),
            command_script_linux_enabled: false,
            pre_script: String::new(),
            post_script: String::new(),
            mock_script: String::new(),
            mock_mode_supported: false,
            mock_mode: false,
            always_run: false,
            requires_output_approval: false,
            verification_token_location: None,
            verification_token_recipients: String::new(),
            store_data_item: true,
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: BTreeMap::new(),
        }
    }
}

impl ToolConfig {
    /// Load a configuration snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            Error::configuration(format!("Invalid tool configuration '{}': {}", path.display(), e))
        })
    }

    /// Name used in log lines and directory names.
    pub fn display_name(&self) -> &str {
        if self.component_name.is_empty() {
            &self.tool_name
        } else {
            &self.component_name
        }
    }

    /// Whether the mock script replaces the regular run.
    pub fn mock_active(&self) -> bool {
        self.mock_mode_supported && self.mock_mode
    }

    pub fn input(&self, name: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputDecl> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Recipients of the approval mail, split on `;` or `,`.
    pub fn approval_recipients(&self) -> Vec<String> {
        self.verification_token_recipients
            .split([';', ','])
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl ConfigReader for ToolConfig {
    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).map(|p| p.value.clone())
    }

    fn config_files(&self) -> BTreeMap<String, Vec<(String, String)>> {
        let mut files: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for (key, property) in &self.properties {
            if let Some(filename) = property.config_filename.as_deref().filter(|f| !f.is_empty()) {
                files
                    .entry(filename.to_string())
                    .or_default()
                    .push((key.clone(), property.value.clone()));
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_camel_case_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.json");
        std::fs::write(
            &path,
            r#"{
                "toolName": "solver",
                "toolDirectory": "/opt/solver",
                "useIterationDirectories": true,
                "copyToolBehaviour": "always",
                "commandScriptLinux": "./run.sh ${in:x}",
                "commandScriptLinuxEnabled": true,
                "inputs": [{"name": "x", "dataType": "integer", "static": true}],
                "properties": {"mode": {"value": "fast", "configFilename": "solver.cfg"}}
            }"#,
        )
        .unwrap();

        let config = ToolConfig::load(&path).unwrap();
        assert_eq!(config.tool_name, "solver");
        assert_eq!(config.copy_tool_behaviour, CopyToolBehaviour::Always);
        assert!(config.inputs[0].is_static);
        assert!(config.store_data_item);
        assert_eq!(config.property("mode").as_deref(), Some("fast"));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ToolConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn test_approval_recipients_split_and_trimmed() {
        let config = ToolConfig {
            verification_token_recipients: " a@example.org; b@example.org ,,c@example.org ".into(),
            ..ToolConfig::default()
        };
        assert_eq!(
            config.approval_recipients(),
            vec!["a@example.org", "b@example.org", "c@example.org"]
        );
    }

    #[test]
    fn test_config_files_grouped_by_filename() {
        let mut config = ToolConfig::default();
        config.properties.insert("a".into(), PropertyValue::in_file("1", "one.cfg"));
        config.properties.insert("b".into(), PropertyValue::in_file("2", "one.cfg"));
        config.properties.insert("c".into(), PropertyValue::in_file("3", "two.cfg"));
        config.properties.insert("d".into(), PropertyValue::plain("4"));

        let files = config.config_files();
        assert_eq!(files.len(), 2);
        assert_eq!(
            files["one.cfg"],
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
        assert_eq!(files["two.cfg"], vec![("c".to_string(), "3".to_string())]);
    }
}
