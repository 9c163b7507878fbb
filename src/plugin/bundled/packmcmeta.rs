//! Generates the `pack.mcmeta` descriptor every resource pack needs.

use serde::Serialize;

use super::{BUNDLED_AUTHOR, BUNDLED_VERSION};
use crate::plugin::{
    Capability, GenerateBeforeList, OpenedFile, Plugin, PluginConfig, PluginContext,
    PluginDescriptor, PluginError, PluginKind,
};

pub const NAME: &str = "rpbuild-packmcmeta-plugin";
pub const FILE_NAME: &str = "pack.mcmeta";
const DEFAULT_PACK_FORMAT: i64 = 1;

#[derive(Serialize)]
struct PackMeta<'a> {
    pack: PackSection<'a>,
}

#[derive(Serialize)]
struct PackSection<'a> {
    pack_format: i64,
    description: &'a str,
}

/// Writes `pack.mcmeta` into the section directory.
///
/// Options: `pack_format` (default 1) and `description` (default: the project
/// name). The output depends only on those two values.
pub struct PackMcmetaPlugin {
    descriptor: PluginDescriptor,
}

impl PackMcmetaPlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor::new(
                NAME,
                BUNDLED_AUTHOR,
                BUNDLED_VERSION,
                PluginKind::GenerateBeforeList,
            ),
        }
    }
}

impl Default for PackMcmetaPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerateBeforeList for PackMcmetaPlugin {
    fn generate(
        &self,
        cx: &PluginContext,
        config: &PluginConfig,
    ) -> Result<Vec<OpenedFile>, PluginError> {
        let pack_format = match config.get("pack_format") {
            None => DEFAULT_PACK_FORMAT,
            Some(_) => config
                .get_int("pack_format")
                .ok_or_else(|| PluginError::failed("pack_format must be an integer"))?,
        };
        let description = config.get_str("description").unwrap_or(cx.project_name());

        let meta = PackMeta { pack: PackSection { pack_format, description } };
        let mut json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| PluginError::failed(format!("cannot encode {FILE_NAME}: {e}")))?;
        json.push(b'\n');
        Ok(vec![OpenedFile::generated(FILE_NAME, json)])
    }
}

impl Plugin for PackMcmetaPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn capability(&self) -> Capability<'_> {
        Capability::GenerateBeforeList(self)
    }
}
