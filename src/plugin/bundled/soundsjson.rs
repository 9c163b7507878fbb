//! Builds `sounds.json` from the `.ogg` files present after listing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{BUNDLED_AUTHOR, BUNDLED_VERSION};
use crate::plugin::{
    Capability, GenerateAfterList, OpenedFile, Plugin, PluginConfig, PluginContext,
    PluginDescriptor, PluginError, PluginKind,
};
use crate::section::slash_path;

pub const NAME: &str = "rpbuild-soundsjson-plugin";
const DEFAULT_SOUNDS_DIR: &str = "assets/minecraft/sounds";
const DEFAULT_OUTPUT: &str = "assets/minecraft/sounds.json";

#[derive(Debug, Default, Serialize)]
struct SoundEvent {
    sounds: Vec<String>,
}

/// Groups every `.ogg` below `sounds_dir` into sound events.
///
/// `block/stone_break1.ogg` contributes the sound `block/stone_break1` to the
/// event `block.stone`: the event key is the dotted path cut at its first `_`.
pub struct SoundsJsonPlugin {
    descriptor: PluginDescriptor,
}

impl SoundsJsonPlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor::new(
                NAME,
                BUNDLED_AUTHOR,
                BUNDLED_VERSION,
                PluginKind::GenerateAfterList,
            ),
        }
    }
}

impl Default for SoundsJsonPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn event_key(sound: &str) -> String {
    let dotted = sound.replace('/', ".");
    match dotted.find('_') {
        Some(cut) => dotted[..cut].to_string(),
        None => dotted,
    }
}

fn index_sounds(sounds_dir: &Path, files: &[PathBuf]) -> BTreeMap<String, SoundEvent> {
    let mut events: BTreeMap<String, SoundEvent> = BTreeMap::new();
    for file in files {
        let Ok(relative) = file.strip_prefix(sounds_dir) else {
            continue;
        };
        if relative.extension().and_then(|e| e.to_str()) != Some("ogg") {
            continue;
        }
        let sound = slash_path(&relative.with_extension(""));
        events.entry(event_key(&sound)).or_default().sounds.push(sound);
    }
    for event in events.values_mut() {
        event.sounds.sort();
    }
    events
}

impl GenerateAfterList for SoundsJsonPlugin {
    fn generate_after(
        &self,
        cx: &PluginContext,
        config: &PluginConfig,
        files: &[PathBuf],
    ) -> Result<Vec<OpenedFile>, PluginError> {
        let sounds_dir = config.get_str("sounds_dir").unwrap_or(DEFAULT_SOUNDS_DIR);
        let output = config.get_str("output").unwrap_or(DEFAULT_OUTPUT);

        let events = index_sounds(&cx.section_dir().join(sounds_dir), files);
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut json = serde_json::to_vec_pretty(&events)
            .map_err(|e| PluginError::failed(format!("cannot encode {output}: {e}")))?;
        json.push(b'\n');
        Ok(vec![OpenedFile::generated(output, json)])
    }
}

impl Plugin for SoundsJsonPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn capability(&self) -> Capability<'_> {
        Capability::GenerateAfterList(self)
    }
}
