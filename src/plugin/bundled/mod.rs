//! Plugins compiled into the binary.
//!
//! Bundled plugins are registered before resolution starts, so a section that
//! binds one of them never touches the local cache or a remote repository.

mod downscale;
mod jsonminify;
mod optipng;
mod packmcmeta;
mod soundsjson;

pub use downscale::DownscalePlugin;
pub use jsonminify::JsonMinifyPlugin;
pub use optipng::OptiPngPlugin;
pub use packmcmeta::PackMcmetaPlugin;
pub use soundsjson::SoundsJsonPlugin;

use std::sync::Arc;

use super::Plugin;

/// Author recorded in every bundled descriptor.
pub const BUNDLED_AUTHOR: &str = "rpbuild";

/// Version shared by the bundled plugins.
pub const BUNDLED_VERSION: &str = "1.0";

/// A fresh instance of every bundled plugin.
pub fn all() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(PackMcmetaPlugin::new()),
        Arc::new(JsonMinifyPlugin::new()),
        Arc::new(DownscalePlugin::new()),
        Arc::new(OptiPngPlugin::new()),
        Arc::new(SoundsJsonPlugin::new()),
    ]
}
