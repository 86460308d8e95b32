//! Lowers a parsed `IsfManifest` plus its GLSL bodies into the read-only
//! `ShaderDocument` the scene engine binds. Documents are immutable once built;
//! the engine shares them behind an `Arc` and keeps current input values on its
//! own side.
//!
//! Types:
//!
//! - `DocumentError` classifies I/O, metadata and validation failures.
//! - `InputDecl`, `PassDecl`, `ImportDecl` are the declarations consumed by the
//!   engine, in declaration order.
//! - `DocumentKind` tells generators, filters and transitions apart.
//! - `ShaderDocument` owns the declarations and shader bodies.
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::manifest::{InputSpec, InputType, IsfManifest, Literal, PassSpec};

/// Name ISF filters use for their source image.
pub const FILTER_INPUT_NAME: &str = "inputImage";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no ISF metadata comment (/*{{ ... }}*/) found at the top of the shader")]
    MissingMetadata,

    #[error("failed to parse ISF metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("unbalanced {macro_name} call at byte {offset}")]
    UnbalancedMacro {
        macro_name: &'static str,
        offset: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputDecl {
    pub name: String,
    pub kind: InputType,
    pub label: Option<String>,
    pub default: Option<Literal>,
    pub min: Option<Literal>,
    pub max: Option<Literal>,
    pub identity: Option<Literal>,
    pub values: Vec<i64>,
    pub labels: Vec<String>,
}

impl From<InputSpec> for InputDecl {
    fn from(spec: InputSpec) -> Self {
        Self {
            name: spec.name,
            kind: spec.kind,
            label: spec.label,
            default: spec.default,
            min: spec.min,
            max: spec.max,
            identity: spec.identity,
            values: spec.values,
            labels: spec.labels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PassDecl {
    pub target: Option<String>,
    pub persistent: bool,
    pub float: bool,
}

impl From<PassSpec> for PassDecl {
    fn from(spec: PassSpec) -> Self {
        Self {
            target: spec
                .target
                .map(|target| target.trim().to_string())
                .filter(|target| !target.is_empty()),
            persistent: spec.persistent,
            float: spec.float,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Source,
    Filter,
    Transition,
}

#[derive(Debug, Clone)]
pub struct ShaderDocument {
    name: String,
    path: Option<PathBuf>,
    description: Option<String>,
    credit: Option<String>,
    categories: Vec<String>,
    vsn: Option<String>,
    inputs: Vec<InputDecl>,
    passes: Vec<PassDecl>,
    imports: Vec<ImportDecl>,
    fragment_source: String,
    vertex_source: Option<String>,
}

impl ShaderDocument {
    /// Parses an ISF fragment shader (metadata comment + GLSL body) and an
    /// optional vertex shader body.
    pub fn parse(
        name: impl Into<String>,
        fragment: &str,
        vertex: Option<&str>,
    ) -> Result<Self, DocumentError> {
        let (json, body) = split_metadata(fragment)?;
        let manifest: IsfManifest = serde_json::from_str(json)?;
        let imports = manifest
            .imported
            .entries()
            .into_iter()
            .map(|(name, path)| ImportDecl {
                name,
                path: PathBuf::from(path),
            })
            .collect();

        let document = Self {
            name: name.into(),
            path: None,
            description: manifest.description,
            credit: manifest.credit,
            categories: manifest.categories,
            vsn: manifest.vsn,
            inputs: manifest.inputs.into_iter().map(InputDecl::from).collect(),
            passes: manifest.passes.into_iter().map(PassDecl::from).collect(),
            imports,
            fragment_source: body.to_string(),
            vertex_source: vertex.map(str::to_string),
        };

        let issues = document.validate();
        if !issues.is_empty() {
            return Err(DocumentError::Validation(issues));
        }
        Ok(document)
    }

    /// Loads `path` (usually `*.fs`) plus a sibling `*.vs` when present.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let fragment = fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let vertex_path = path.with_extension("vs");
        let vertex = if vertex_path != path && vertex_path.is_file() {
            Some(
                fs::read_to_string(&vertex_path).map_err(|source| DocumentError::Io {
                    path: vertex_path.clone(),
                    source,
                })?,
            )
        } else {
            None
        };

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string());

        let mut document = Self::parse(name, &fragment, vertex.as_deref())?;
        tracing::debug!(
            path = %path.display(),
            inputs = document.inputs.len(),
            passes = document.passes.len(),
            custom_vertex = document.vertex_source.is_some(),
            "loaded ISF document"
        );
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    /// Returns human-readable problems; empty when the document is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let mut seen: Vec<&str> = Vec::new();

        for input in &self.inputs {
            if input.name.trim().is_empty() {
                issues.push("input with a blank NAME".to_string());
                continue;
            }
            if seen.contains(&input.name.as_str()) {
                issues.push(format!("duplicate input name `{}`", input.name));
            }
            seen.push(input.name.as_str());
        }

        for import in &self.imports {
            if seen.contains(&import.name.as_str()) {
                issues.push(format!(
                    "imported image `{}` collides with another name",
                    import.name
                ));
            }
            seen.push(import.name.as_str());
        }

        let mut targets: Vec<&str> = Vec::new();
        for (index, pass) in self.passes.iter().enumerate() {
            match pass.target.as_deref() {
                Some(target) => {
                    if seen.contains(&target) {
                        issues.push(format!(
                            "pass {} target `{}` collides with an input or import",
                            index + 1,
                            target
                        ));
                    }
                    if targets.contains(&target) {
                        issues.push(format!(
                            "pass {} reuses target `{}`",
                            index + 1,
                            target
                        ));
                    }
                    targets.push(target);
                }
                None if pass.persistent => {
                    issues.push(format!("pass {} is persistent but has no TARGET", index + 1));
                }
                None => {}
            }
        }

        issues
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Directory imports are resolved against.
    pub fn base_dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn credit(&self) -> Option<&str> {
        self.credit.as_deref()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn vsn(&self) -> Option<&str> {
        self.vsn.as_deref()
    }

    pub fn inputs(&self) -> &[InputDecl] {
        &self.inputs
    }

    pub fn passes(&self) -> &[PassDecl] {
        &self.passes
    }

    pub fn imports(&self) -> &[ImportDecl] {
        &self.imports
    }

    pub fn fragment_source(&self) -> &str {
        &self.fragment_source
    }

    pub fn vertex_source(&self) -> Option<&str> {
        self.vertex_source.as_deref()
    }

    pub fn input(&self, name: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn inputs_of_type(&self, kind: InputType) -> impl Iterator<Item = &InputDecl> {
        self.inputs.iter().filter(move |input| input.kind == kind)
    }

    pub fn image_inputs(&self) -> impl Iterator<Item = &InputDecl> {
        self.inputs_of_type(InputType::Image)
    }

    pub fn audio_inputs(&self) -> impl Iterator<Item = &InputDecl> {
        self.inputs.iter().filter(|input| input.kind.is_audio())
    }

    /// The image input a filter reads from: `inputImage` if declared,
    /// otherwise the sole image input.
    pub fn filter_input(&self) -> Option<&InputDecl> {
        if let Some(input) = self
            .image_inputs()
            .find(|input| input.name == FILTER_INPUT_NAME)
        {
            return Some(input);
        }
        let mut images = self.image_inputs();
        match (images.next(), images.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        let has_image = |name: &str| self.image_inputs().any(|input| input.name == name);
        let has_progress = self
            .inputs_of_type(InputType::Float)
            .any(|input| input.name == "progress");
        if has_image("startImage") && has_image("endImage") && has_progress {
            DocumentKind::Transition
        } else if has_image(FILTER_INPUT_NAME) {
            DocumentKind::Filter
        } else {
            DocumentKind::Source
        }
    }

    /// Named pass targets in declaration order.
    pub fn pass_targets(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().filter_map(|pass| pass.target.as_deref())
    }
}

/// Splits `/*{ json }*/ body` into the JSON text and the remaining GLSL.
fn split_metadata(source: &str) -> Result<(&str, &str), DocumentError> {
    let start = source.find("/*").ok_or(DocumentError::MissingMetadata)?;
    if !source[..start].trim().is_empty() {
        return Err(DocumentError::MissingMetadata);
    }
    let after_open = start + 2;
    let end = source[after_open..]
        .find("*/")
        .map(|offset| after_open + offset)
        .ok_or(DocumentError::MissingMetadata)?;
    let json = source[after_open..end].trim();
    if !json.starts_with('{') {
        return Err(DocumentError::MissingMetadata);
    }
    Ok((json, &source[end + 2..]))
}
