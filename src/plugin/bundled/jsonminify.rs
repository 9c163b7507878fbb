//! Strips insignificant whitespace from JSON files.

use super::{BUNDLED_AUTHOR, BUNDLED_VERSION};
use crate::plugin::{
    Capability, OpenedFile, Plugin, PluginConfig, PluginContext, PluginDescriptor, PluginError,
    PluginKind, TransformFiles,
};

pub const NAME: &str = "rpbuild-jsonminify-plugin";

/// Minifies every `*.json` file it is given.
///
/// The file is validated first, then whitespace outside string literals is
/// removed byte by byte so that key order and number formatting survive.
pub struct JsonMinifyPlugin {
    descriptor: PluginDescriptor,
}

impl JsonMinifyPlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor::new(
                NAME,
                BUNDLED_AUTHOR,
                BUNDLED_VERSION,
                PluginKind::TransformFiles,
            ),
        }
    }
}

impl Default for JsonMinifyPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformFiles for JsonMinifyPlugin {
    fn transform(
        &self,
        _cx: &PluginContext,
        _config: &PluginConfig,
        file: &mut OpenedFile,
    ) -> Result<(), PluginError> {
        let name = file.name().to_string();
        let content = file.content().map_err(|e| PluginError::io(&name, e))?;
        serde_json::from_slice::<serde::de::IgnoredAny>(content)
            .map_err(|e| PluginError::failed(format!("{name} is not valid JSON: {e}")))?;

        let minified = minify(content);
        if minified != content {
            file.set_content(minified);
        }
        Ok(())
    }
}

impl Plugin for JsonMinifyPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn glob_pattern(&self) -> &str {
        "*.json"
    }

    fn capability(&self) -> Capability<'_> {
        Capability::TransformFiles(self)
    }
}

/// Drop whitespace that is not inside a string literal. Input must already be
/// valid JSON.
fn minify(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for &byte in input {
        if in_string {
            out.push(byte);
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b' ' | b'\t' | b'\n' | b'\r' => {}
            b'"' => {
                in_string = true;
                out.push(byte);
            }
            _ => out.push(byte),
        }
    }
    out
}
