//! Shrinks oversized textures.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::debug;

use super::{BUNDLED_AUTHOR, BUNDLED_VERSION};
use crate::plugin::{
    Capability, OpenedFile, Plugin, PluginConfig, PluginContext, PluginDescriptor, PluginError,
    PluginKind, TransformAllFiles,
};

pub const NAME: &str = "rpbuild-downscale-plugin";
const DEFAULT_MAX_RESOLUTION: u32 = 256;
const POOL_THREADS: usize = 8;

/// Downsizes every PNG or JPEG wider than `maxResolution`, keeping the
/// aspect ratio and the file's format.
///
/// `interpolation` selects the filter: `nearest` (default), `bilinear` or
/// `bicubic`, in any letter case. Images are processed on the plugin's own
/// pool; a file that fails to decode or encode is marked failed and left as
/// it was.
pub struct DownscalePlugin {
    descriptor: PluginDescriptor,
}

impl DownscalePlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor::new(
                NAME,
                BUNDLED_AUTHOR,
                BUNDLED_VERSION,
                PluginKind::TransformAllFiles,
            ),
        }
    }
}

impl Default for DownscalePlugin {
    fn default() -> Self {
        Self::new()
    }
}

struct Settings {
    max_resolution: u32,
    filter: FilterType,
}

impl Settings {
    fn from_config(config: &PluginConfig) -> Result<Self, PluginError> {
        let max_resolution = match config.get("maxResolution") {
            None => DEFAULT_MAX_RESOLUTION,
            Some(_) => config
                .get_int("maxResolution")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .ok_or_else(|| PluginError::failed("maxResolution must be a positive integer"))?,
        };
        let interpolation = config.get_str("interpolation").unwrap_or("nearest");
        let filter = match interpolation.to_ascii_lowercase().as_str() {
            "nearest" => FilterType::Nearest,
            "bilinear" => FilterType::Triangle,
            "bicubic" => FilterType::CatmullRom,
            _ => {
                return Err(PluginError::failed(format!(
                    "unknown interpolation '{interpolation}' \
                     (expected nearest, bilinear or bicubic)"
                )))
            }
        };
        Ok(Self { max_resolution, filter })
    }
}

fn pool() -> Result<ThreadPool, PluginError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(POOL_THREADS)
        .thread_name(|i| format!("rpbuild-downscale-{i}"))
        .build()
        .map_err(|e| PluginError::failed(format!("cannot start image pool: {e}")))
}

/// Returns the new encoded image, or `None` if it is already small enough.
fn downscale(content: &[u8], settings: &Settings) -> Result<Option<Vec<u8>>, String> {
    let format = image::guess_format(content).map_err(|e| e.to_string())?;
    let image = image::load_from_memory_with_format(content, format).map_err(|e| e.to_string())?;
    let (width, height) = (image.width(), image.height());
    if width <= settings.max_resolution {
        return Ok(None);
    }

    let new_width = settings.max_resolution;
    let new_height = (u64::from(height) * u64::from(new_width) / u64::from(width)).max(1);
    let new_height = u32::try_from(new_height).map_err(|e| e.to_string())?;
    let mut resized = image.resize_exact(new_width, new_height, settings.filter);
    if format == ImageFormat::Jpeg {
        // JPEG has no alpha channel
        resized = DynamicImage::ImageRgb8(resized.to_rgb8());
    }

    let mut encoded = Cursor::new(Vec::new());
    resized.write_to(&mut encoded, format).map_err(|e| e.to_string())?;
    Ok(Some(encoded.into_inner()))
}

fn process(file: &mut OpenedFile, settings: &Settings) {
    let result = file.content().map_err(|e| e.to_string()).and_then(|c| downscale(c, settings));
    match result {
        Ok(Some(bytes)) => {
            debug!(file = file.name(), "downscaled");
            file.set_content(bytes);
        }
        Ok(None) => {}
        Err(message) => {
            let name = file.name().to_owned();
            file.fail(PluginError::failed(format!("cannot downscale {name}: {message}")));
        }
    }
}

impl TransformAllFiles for DownscalePlugin {
    fn transform_all(
        &self,
        _cx: &PluginContext,
        config: &PluginConfig,
        files: &mut [OpenedFile],
    ) -> Result<(), PluginError> {
        let settings = Settings::from_config(config)?;
        if files.is_empty() {
            return Ok(());
        }
        pool()?.install(|| files.par_iter_mut().for_each(|file| process(file, &settings)));
        Ok(())
    }
}

impl Plugin for DownscalePlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn glob_pattern(&self) -> &str {
        "**.{png,jpg}"
    }

    fn capability(&self) -> Capability<'_> {
        Capability::TransformAllFiles(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::path::Path;
    use tempfile::TempDir;

    fn write_png(dir: &TempDir, name: &str, width: u32, height: u32) -> OpenedFile {
        let path = dir.path().join(name);
        RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255])).save(&path).unwrap();
        OpenedFile::open(name, path)
    }

    fn config(text: &str) -> PluginConfig {
        PluginConfig::new(toml::from_str(text).unwrap())
    }

    #[test]
    fn test_large_images_are_resized() {
        let temp = TempDir::new().unwrap();
        let mut files =
            vec![write_png(&temp, "big.png", 512, 256), write_png(&temp, "small.png", 16, 16)];
        let cx = PluginContext::new("p", temp.path(), temp.path());

        DownscalePlugin::new().transform_all(&cx, &config(""), &mut files).unwrap();

        assert!(files[0].is_dirty());
        assert!(!files[1].is_dirty());
        let resized = image::load_from_memory(files[0].content().unwrap()).unwrap();
        assert_eq!((resized.width(), resized.height()), (256, 128));
    }

    #[test]
    fn test_corrupt_file_left_untouched() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        let mut files =
            vec![OpenedFile::open("broken.png", path), write_png(&temp, "ok.png", 64, 64)];
        let cx = PluginContext::new("p", temp.path(), temp.path());

        let settings = config("maxResolution = 32\ninterpolation = \"bicubic\"");
        DownscalePlugin::new().transform_all(&cx, &settings, &mut files).unwrap();

        assert!(!files[0].is_dirty());
        assert!(files[0].take_failure().is_some());
        assert!(files[1].is_dirty());
        assert!(files[1].take_failure().is_none());
    }

    #[test]
    fn test_jpeg_is_resized_and_stays_jpeg() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("photos/sky.jpg");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(400, 200, Rgb([90, 140, 220])).save(&path).unwrap();
        let mut files = vec![OpenedFile::open("photos/sky.jpg", &path)];
        let cx = PluginContext::new("p", temp.path(), temp.path());

        let settings = config("maxResolution = 100");
        DownscalePlugin::new().transform_all(&cx, &settings, &mut files).unwrap();

        let content = files[0].content().unwrap();
        assert_eq!(image::guess_format(content).unwrap(), ImageFormat::Jpeg);
        let resized = image::load_from_memory(content).unwrap();
        assert_eq!((resized.width(), resized.height()), (100, 50));
    }

    #[test]
    fn test_glob_selects_nested_png_and_jpg() {
        let glob = crate::section::GlobFilter::new(DownscalePlugin::new().glob_pattern()).unwrap();
        assert!(glob.matches(Path::new("a.png")));
        assert!(glob.matches(Path::new("textures/blocks/b.jpg")));
        assert!(!glob.matches(Path::new("textures/b.json")));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(Settings::from_config(&config("interpolation = \"lanczos\"")).is_err());
        assert!(Settings::from_config(&config("maxResolution = 0")).is_err());
        let settings = Settings::from_config(&config("interpolation = \"bilinear\"")).unwrap();
        assert_eq!(settings.filter, FilterType::Triangle);
        assert_eq!(settings.max_resolution, DEFAULT_MAX_RESOLUTION);
    }

    #[test]
    fn test_interpolation_ignores_case() {
        let settings = Settings::from_config(&config("interpolation = \"BiCubic\"")).unwrap();
        assert_eq!(settings.filter, FilterType::CatmullRom);
        let settings = Settings::from_config(&config("interpolation = \"NEAREST\"")).unwrap();
        assert_eq!(settings.filter, FilterType::Nearest);
    }
}
