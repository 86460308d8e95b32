use std::fmt;

use serde::{Deserialize, Serialize};

/// Pixel dimensions of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// `RENDERSIZE`/`_imgSize` representation.
    pub fn as_vec2(&self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Per-component precision of a pooled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Precision {
    /// 8 bits per channel.
    #[default]
    Standard,
    /// Floating point per channel.
    Float,
}

/// Engine options, usually filled from the caller's configuration file.
///
/// `strict` selects whether document load failures surface as errors or
/// degrade to "nothing bound"; see `Scene::use_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Render every pass into float buffers regardless of the pass `FLOAT` flag.
    pub always_render_to_float: bool,
    /// Surface load and import failures instead of logging them.
    pub strict: bool,
    /// Size used by `Scene::render_default`.
    pub size: Size,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            always_render_to_float: false,
            strict: false,
            size: Size::default(),
        }
    }
}
