//! Wire types for the external plugin protocol.
//!
//! The build writes one [`PluginRequest`] line to the plugin's stdin and
//! closes it. The plugin writes one [`PluginResponse`] line to stdout and
//! exits. Stderr is captured for diagnostics only. File content travels as
//! standard base64 so binary assets survive the JSON encoding.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::PluginDescriptor;

/// The call being made, also passed as the executable's only argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Describe,
    Initialize,
    Generate,
    GenerateAfter,
    Transform,
    TransformAll,
}

impl Operation {
    pub fn as_arg(self) -> &'static str {
        match self {
            Operation::Describe => "describe",
            Operation::Initialize => "initialize",
            Operation::Generate => "generate",
            Operation::GenerateAfter => "generate-after",
            Operation::Transform => "transform",
            Operation::TransformAll => "transform-all",
        }
    }
}

/// Request written to the plugin's stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginRequest {
    operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    section_dir: Option<PathBuf>,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default)]
    files: Vec<FilePayload>,
    /// Section-relative names of listed files, for `generate_after`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    listed: Vec<String>,
}

impl PluginRequest {
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            project: None,
            section_dir: None,
            config: serde_json::Value::Null,
            files: Vec::new(),
            listed: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_section(mut self, project: &str, section_dir: PathBuf) -> Self {
        self.project = Some(project.to_owned());
        self.section_dir = Some(section_dir);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_files(mut self, files: Vec<FilePayload>) -> Self {
        self.files = files;
        self
    }

    #[must_use]
    pub fn with_listed(mut self, listed: Vec<String>) -> Self {
        self.listed = listed;
        self
    }

    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    #[must_use]
    pub fn files(&self) -> &[FilePayload] {
        &self.files
    }
}

/// One file in a request or response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilePayload {
    name: String,
    #[serde(with = "base64_bytes")]
    content: Vec<u8>,
}

impl FilePayload {
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), content: content.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    #[must_use]
    pub fn into_parts(self) -> (String, Vec<u8>) {
        (self.name, self.content)
    }
}

/// Response read from the plugin's stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginResponse {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    descriptor: Option<PluginDescriptor>,
    /// Candidate-file glob, only meaningful in a `describe` response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    glob: Option<String>,
    #[serde(default)]
    files: Vec<FilePayload>,
}

impl PluginResponse {
    #[must_use]
    pub fn success(files: Vec<FilePayload>) -> Self {
        Self { success: true, message: None, descriptor: None, glob: None, files }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            descriptor: None,
            glob: None,
            files: Vec::new(),
        }
    }

    #[must_use]
    pub fn described(descriptor: PluginDescriptor, glob: Option<String>) -> Self {
        Self { success: true, message: None, descriptor: Some(descriptor), glob, files: Vec::new() }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn descriptor(&self) -> Option<&PluginDescriptor> {
        self.descriptor.as_ref()
    }

    #[must_use]
    pub fn glob(&self) -> Option<&str> {
        self.glob.as_deref()
    }

    #[must_use]
    pub fn into_files(self) -> Vec<FilePayload> {
        self.files
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.trim()).map_err(serde::de::Error::custom)
    }
}
