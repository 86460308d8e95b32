use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use isfdoc::{InputType, Literal, ShaderDocument, TextureTarget};
use scene::gpu::{load_cubemap, read_rgba, WgpuBackend, WgpuBufferPool, WgpuContext, CUBEMAP_FACE_STEMS};
use scene::{
    BufferPool, BufferRef, HeadlessBackend, HostBufferPool, PassOutputs, Precision, RenderBackend,
    Scene, SceneError, Size,
};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::{FileConfig, RawValue, RenderPlan};
use crate::values::{parse_value, value_from_toml};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub fn run(cli: Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let plan = RenderPlan::resolve(&cli, &file)?;
    tracing::debug!(?plan, "resolved render plan");

    if cli.list_inputs {
        list_inputs(&plan.shader)
    } else if cli.dry_run {
        dry_run(&plan)
    } else {
        render_to_files(&plan)
    }
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn list_inputs(path: &Path) -> Result<()> {
    let document = ShaderDocument::load(path)
        .with_context(|| format!("failed to load ISF document {}", path.display()))?;
    println!("{} ({:?})", document.name(), document.kind());
    if let Some(description) = document.description() {
        println!("  {description}");
    }
    println!("Inputs:");
    for input in document.inputs() {
        let default = input
            .default
            .as_ref()
            .map(|value| format!(" default={}", describe_literal(value)))
            .unwrap_or_default();
        println!("  {:<20} {:<9}{default}", input.name, input.kind.as_str());
    }
    for import in document.imports() {
        println!("  {:<20} imported  {}", import.name, import.path.display());
    }
    println!("Passes: {}", document.passes().len().max(1));
    for (index, pass) in document.passes().iter().enumerate() {
        let mut flags = Vec::new();
        if pass.persistent {
            flags.push("persistent");
        }
        if pass.float {
            flags.push("float");
        }
        println!(
            "  {:>2} target={} {}",
            index + 1,
            pass.target.as_deref().unwrap_or("-"),
            flags.join(",")
        );
    }
    Ok(())
}

fn describe_literal(value: &Literal) -> String {
    match value {
        Literal::Bool(flag) => flag.to_string(),
        Literal::Number(number) => number.to_string(),
        Literal::Vector(values) => values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
    }
}

/// Loads the document and applies every value and image of `plan`.
fn prepare<B: RenderBackend>(
    scene: &Scene<B>,
    plan: &RenderPlan,
    mut load_image: impl FnMut(&Path) -> Result<BufferRef>,
) -> Result<()> {
    scene
        .use_file(&plan.shader)
        .with_context(|| format!("failed to load ISF document {}", plan.shader.display()))?;
    let document = scene
        .document()
        .ok_or_else(|| anyhow!("no ISF document could be loaded from {}", plan.shader.display()))?;

    for (name, raw) in &plan.values {
        let decl = document
            .input(name)
            .ok_or_else(|| SceneError::UnknownInput(name.clone()))?;
        let value = match raw {
            RawValue::Text(text) => parse_value(decl, text),
            RawValue::Toml(value) => value_from_toml(decl, value),
        }
        .map_err(anyhow::Error::msg)?;
        scene.set_value(name, value)?;
    }

    for (name, path) in &plan.images {
        let decl = document
            .input(name)
            .ok_or_else(|| SceneError::UnknownInput(name.clone()))?;
        let buffer = load_image(path)
            .with_context(|| format!("failed to load image for `{name}` from {}", path.display()))?;
        tracing::debug!(input = %name, path = %path.display(), size = %buffer.size(), "bound image input");
        match decl.kind {
            InputType::Image => scene.set_image_input(name, buffer)?,
            kind if kind.is_audio() => scene.set_audio_input(name, buffer)?,
            kind => bail!("`{name}` is a {kind} input, not an image"),
        }
    }

    tracing::info!(
        document = document.name(),
        kind = ?document.kind(),
        inputs = document.inputs().len(),
        passes = document.passes().len().max(1),
        "loaded ISF document"
    );
    Ok(())
}

fn decode_rgba(path: &Path) -> Result<(Size, Vec<u8>)> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Ok((Size::new(width, height), image.into_raw()))
}

fn cubemap_face_size(directory: &Path) -> Result<Size> {
    let stem = CUBEMAP_FACE_STEMS[0];
    let face: PathBuf = IMAGE_EXTENSIONS
        .iter()
        .map(|ext| directory.join(format!("{stem}.{ext}")))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| anyhow!("cubemap face '{stem}' missing in {}", directory.display()))?;
    let (width, height) = image::image_dimensions(&face)
        .with_context(|| format!("failed to read {}", face.display()))?;
    Ok(Size::new(width, height))
}

fn render_to_files(plan: &RenderPlan) -> Result<()> {
    let context = WgpuContext::new_headless()?;
    tracing::info!(
        adapter = %context.adapter_info.name,
        backend = ?context.adapter_info.backend,
        "using GPU adapter"
    );
    let pool = Arc::new(WgpuBufferPool::new(Arc::clone(&context)));
    let scene = Scene::with_config(WgpuBackend::new(Arc::clone(&context)), pool.clone(), &plan.scene);

    prepare(&scene, plan, |path| {
        if path.is_dir() {
            Ok(load_cubemap(&pool, path)?)
        } else {
            let (size, pixels) = decode_rgba(path)?;
            Ok(pool.upload_rgba(size, &pixels)?)
        }
    })?;

    for index in 0..plan.frames {
        let time = plan.frame_time(index);
        let buffer = scene
            .render(plan.size, Some(time), None)
            .with_context(|| format!("failed to render frame {index}"))?;
        let image = read_rgba(&context, &buffer)?;

        let path = plan.frame_path(index);
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(frame = index, time, path = %path.display(), "wrote frame");
    }
    Ok(())
}

fn dry_run(plan: &RenderPlan) -> Result<()> {
    let pool = Arc::new(HostBufferPool::new());
    let scene = Scene::with_config(HeadlessBackend::new(), pool.clone(), &plan.scene);

    prepare(&scene, plan, |path| {
        if path.is_dir() {
            let face = cubemap_face_size(path)?;
            Ok(pool.create_with_target(face, Precision::Standard, TextureTarget::Cube)?)
        } else {
            let (size, pixels) = decode_rgba(path)?;
            Ok(pool.upload_rgba(size, &pixels)?)
        }
    })?;

    for index in 0..plan.frames {
        let time = plan.frame_time(index);
        let mut outputs = PassOutputs::new();
        let buffer = scene
            .render(plan.size, Some(time), Some(&mut outputs))
            .with_context(|| format!("failed to render frame {index}"))?;
        println!(
            "frame {index}: time={time:.3} passes={} output={} {:?} -> {}",
            outputs.len(),
            buffer.size(),
            buffer.precision(),
            plan.frame_path(index).display()
        );
    }
    println!(
        "programs compiled: {} (input types: {})",
        scene.compile_count(),
        scene.compiled_input_types().unwrap_or_else(|| "-".to_string())
    );
    Ok(())
}
