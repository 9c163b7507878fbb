//! Lossless PNG optimization through the `optipng` tool.

use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};

use tempfile::NamedTempFile;

use super::{BUNDLED_AUTHOR, BUNDLED_VERSION};
use crate::plugin::{
    Capability, OpenedFile, Plugin, PluginConfig, PluginContext, PluginDescriptor, PluginError,
    PluginKind, TransformFiles,
};

pub const NAME: &str = "rpbuild-optipng-plugin";
const DEFAULT_LEVEL: i64 = 2;
const MAX_LEVEL: i64 = 7;

pub struct OptiPngPlugin {
    descriptor: PluginDescriptor,
    program: String,
}

impl OptiPngPlugin {
    pub fn new() -> Self {
        Self::with_program("optipng")
    }

    /// Use a specific executable instead of `optipng` from `PATH`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            descriptor: PluginDescriptor::new(
                NAME,
                BUNDLED_AUTHOR,
                BUNDLED_VERSION,
                PluginKind::TransformFiles,
            ),
            program: program.into(),
        }
    }

    fn level(config: &PluginConfig) -> Result<i64, PluginError> {
        let level = match config.get("level") {
            None => DEFAULT_LEVEL,
            Some(_) => config
                .get_int("level")
                .ok_or_else(|| PluginError::failed("level must be an integer"))?,
        };
        if !(0..=MAX_LEVEL).contains(&level) {
            return Err(PluginError::failed(format!("level {level} is outside 0-{MAX_LEVEL}")));
        }
        Ok(level)
    }

    fn optimize(
        &self,
        scratch: &NamedTempFile,
        level: i64,
        name: &str,
    ) -> Result<(), PluginError> {
        let output = Command::new(&self.program)
            .arg("-quiet")
            .arg(format!("-o{level}"))
            .arg(scratch.path())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| PluginError::SpawnFailed {
                name: self.program.clone(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PluginError::failed(format!(
                "{} failed on {name}: {}",
                self.program,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Default for OptiPngPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformFiles for OptiPngPlugin {
    fn transform(
        &self,
        _cx: &PluginContext,
        config: &PluginConfig,
        file: &mut OpenedFile,
    ) -> Result<(), PluginError> {
        let level = Self::level(config)?;
        let name = file.name().to_string();
        let original = file.content().map_err(|e| PluginError::io(&name, e))?.to_vec();

        let mut scratch = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .map_err(|e| PluginError::io(&name, e))?;
        scratch.write_all(&original).map_err(|e| PluginError::io(&name, e))?;
        scratch.flush().map_err(|e| PluginError::io(&name, e))?;

        self.optimize(&scratch, level, &name)?;

        let optimized = fs::read(scratch.path()).map_err(|e| PluginError::io(&name, e))?;
        if optimized != original {
            file.set_content(optimized);
        }
        Ok(())
    }
}

impl Plugin for OptiPngPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn glob_pattern(&self) -> &str {
        "*.png"
    }

    /// Fails when the tool cannot be started, which disables the plugin.
    fn initialize(&self) -> Result<(), PluginError> {
        Command::new(&self.program)
            .arg("-v")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|_| ())
            .map_err(|e| PluginError::SpawnFailed {
                name: self.program.clone(),
                message: format!("{e}; is optipng installed?"),
            })
    }

    fn capability(&self) -> Capability<'_> {
        Capability::TransformFiles(self)
    }
}
