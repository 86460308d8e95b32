//! Optional TOML configuration merged with command-line flags.
//!
//! ```toml
//! [render]
//! size = "1280x720"
//! time = 2.0
//! frames = 30
//! fps = 30.0
//! float = false
//! strict = true
//! output = "frames/wave.png"
//!
//! [inputs]
//! level = 0.5
//! tint = [1.0, 0.5, 0.0]
//!
//! [images]
//! inputImage = "photo.png"
//! ```
//!
//! Relative paths in the file resolve against the file's directory. Flags
//! given on the command line win over the file.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use scene::{SceneConfig, Size};
use serde::Deserialize;

use crate::cli::{parse_size, Cli};

pub const DEFAULT_OUTPUT: &str = "out.png";
pub const DEFAULT_FPS: f64 = 60.0;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub render: RenderSection,
    pub inputs: BTreeMap<String, toml::Value>,
    pub images: BTreeMap<String, PathBuf>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RenderSection {
    pub size: Option<String>,
    pub time: Option<f64>,
    pub frames: Option<u32>,
    pub fps: Option<f64>,
    pub float: Option<bool>,
    pub strict: Option<bool>,
    pub output: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// An input value still in the form it was written in.
#[derive(Debug, Clone)]
pub enum RawValue {
    Text(String),
    Toml(toml::Value),
}

/// Everything one invocation renders, after merging file and flags.
#[derive(Debug)]
pub struct RenderPlan {
    pub shader: PathBuf,
    pub size: Size,
    pub time: f64,
    pub frames: u32,
    pub fps: f64,
    pub output: PathBuf,
    pub scene: SceneConfig,
    /// File values first, then flags, so later entries override earlier ones.
    pub values: Vec<(String, RawValue)>,
    pub images: Vec<(String, PathBuf)>,
}

impl RenderPlan {
    pub fn resolve(cli: &Cli, file: &FileConfig) -> Result<Self> {
        let render = &file.render;
        let size = match (cli.size, render.size.as_deref()) {
            (Some(size), _) => size,
            (None, Some(text)) => parse_size(text).map_err(anyhow::Error::msg)?,
            (None, None) => Size::default(),
        };
        let frames = cli.frames.or(render.frames).unwrap_or(1);
        if frames == 0 {
            bail!("frame count must be at least 1");
        }
        let fps = cli.fps.or(render.fps).unwrap_or(DEFAULT_FPS);
        if !(fps.is_finite() && fps > 0.0) {
            bail!("fps must be a positive number, got {fps}");
        }
        let output = cli
            .output
            .clone()
            .or_else(|| render.output.as_deref().map(|path| file.resolve(path)))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

        let values = file
            .inputs
            .iter()
            .map(|(name, value)| (name.clone(), RawValue::Toml(value.clone())))
            .chain(
                cli.values
                    .iter()
                    .map(|(name, value)| (name.clone(), RawValue::Text(value.clone()))),
            )
            .collect();
        let images = file
            .images
            .iter()
            .map(|(name, path)| (name.clone(), file.resolve(path)))
            .chain(
                cli.images
                    .iter()
                    .map(|(name, path)| (name.clone(), PathBuf::from(path))),
            )
            .collect();

        Ok(Self {
            shader: cli.shader.clone(),
            size,
            time: cli.time.or(render.time).unwrap_or(0.0),
            frames,
            fps,
            output,
            scene: SceneConfig {
                always_render_to_float: cli.float || render.float.unwrap_or(false),
                strict: cli.strict || render.strict.unwrap_or(false),
                size,
            },
            values,
            images,
        })
    }

    /// Time of frame `index`.
    pub fn frame_time(&self, index: u32) -> f64 {
        self.time + f64::from(index) / self.fps
    }

    /// Output path of frame `index`: the plain path for single-frame renders,
    /// `stem-NNNN.ext` otherwise.
    pub fn frame_path(&self, index: u32) -> PathBuf {
        if self.frames == 1 {
            return self.output.clone();
        }
        let stem = self
            .output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame".to_string());
        let extension = self
            .output
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_else(|| "png".to_string());
        self.output
            .with_file_name(format!("{stem}-{index:04}.{extension}"))
    }
}
