use std::path::PathBuf;

use clap::Parser;
use scene::Size;

#[derive(Parser, Debug)]
#[command(
    name = "isfrender",
    author,
    version,
    about = "Render ISF shaders off-screen to PNG files"
)]
pub struct Cli {
    /// ISF fragment shader (`.fs`); a sibling `.vs` is picked up automatically.
    #[arg(value_name = "FILE")]
    pub shader: PathBuf,

    /// Render resolution (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<Size>,

    /// Time in seconds of the first frame.
    #[arg(long, value_name = "SECONDS")]
    pub time: Option<f64>,

    /// Number of frames to render.
    #[arg(long, value_name = "N")]
    pub frames: Option<u32>,

    /// Frame rate used to advance time between frames.
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f64>,

    /// Output PNG path; a `-NNNN` frame suffix is added when rendering several frames.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Render every pass into float buffers.
    #[arg(long)]
    pub float: bool,

    /// Fail on load and import errors instead of logging them.
    #[arg(long)]
    pub strict: bool,

    /// Set an input value, parsed according to its declared type.
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    pub values: Vec<(String, String)>,

    /// Bind an image input from a file, or a cube map from a directory of faces.
    #[arg(long = "image", value_name = "NAME=PATH", value_parser = parse_assignment)]
    pub images: Vec<(String, String)>,

    /// TOML file with `[render]`, `[inputs]` and `[images]` tables.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run the frames through the recording backend without a GPU and print a summary.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the document's inputs and exit.
    #[arg(long)]
    pub list_inputs: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<Size, String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid size '{value}'; expected WIDTHxHEIGHT"))?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width in '{value}'"))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height in '{value}'"))?;
    if width == 0 || height == 0 {
        return Err("size must be greater than zero".into());
    }
    Ok(Size::new(width, height))
}

pub fn parse_assignment(value: &str) -> Result<(String, String), String> {
    let (name, rest) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{value}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing input name in '{value}'"));
    }
    Ok((name.to_string(), rest.trim().to_string()))
}
