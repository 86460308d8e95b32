//! Builds one compilable shader variant from a `ShaderDocument`.
//!
//! The generated bodies are dialect-neutral GLSL 4.50 without uniform
//! declarations: backends prepend their own declaration block built from the
//! returned `ProgramInterface` (a std140 block for wgpu, loose uniforms for a GL
//! driver). What differs between variants is how the `IMG_*` sampling macros
//! expand, which depends on the texture target each image is bound as.
use std::collections::HashMap;
use std::fmt;

use crate::document::{DocumentError, ShaderDocument};
use crate::manifest::InputType;

/// Built-in uniforms every program exposes, in declaration order.
pub const BUILTIN_UNIFORMS: [(&str, UniformKind); 6] = [
    ("PASSINDEX", UniformKind::Int),
    ("RENDERSIZE", UniformKind::Vec2),
    ("TIME", UniformKind::Float),
    ("TIMEDELTA", UniformKind::Float),
    ("DATE", UniformKind::Vec4),
    ("FRAMEINDEX", UniformKind::Int),
];

/// Vertex attribute carrying the full-frame quad positions.
pub const VERTEX_ATTRIBUTE: &str = "VERTEXDATA";

/// How an image is bound on the GPU, which decides how it may be sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureTarget {
    #[default]
    Texture2D,
    Rect,
    Cube,
}

impl TextureTarget {
    /// One-character classification symbol (`2`, `R` or `C`).
    pub fn symbol(self) -> char {
        match self {
            TextureTarget::Texture2D => '2',
            TextureTarget::Rect => 'R',
            TextureTarget::Cube => 'C',
        }
    }
}

impl fmt::Display for TextureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureTarget::Texture2D => f.write_str("2d"),
            TextureTarget::Rect => f.write_str("rect"),
            TextureTarget::Cube => f.write_str("cube"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    Bool,
    Vec2,
    Vec4,
    Sampler(TextureTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: String,
    pub kind: UniformKind,
}

/// Ordered uniform declarations a generated variant expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramInterface {
    uniforms: Vec<UniformDecl>,
}

impl ProgramInterface {
    fn push(&mut self, name: impl Into<String>, kind: UniformKind) {
        self.uniforms.push(UniformDecl {
            name: name.into(),
            kind,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &UniformDecl> {
        self.uniforms.iter()
    }

    pub fn get(&self, name: &str) -> Option<&UniformDecl> {
        self.uniforms.iter().find(|decl| decl.name == name)
    }

    pub fn samplers(&self) -> impl Iterator<Item = &UniformDecl> {
        self.uniforms
            .iter()
            .filter(|decl| matches!(decl.kind, UniformKind::Sampler(_)))
    }

    pub fn len(&self) -> usize {
        self.uniforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uniforms.is_empty()
    }
}

/// A vertex/fragment pair ready to hand to a backend compiler.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub vertex: String,
    pub fragment: String,
    pub interface: ProgramInterface,
    /// Texture targets the variant was generated for (image inputs, then imports).
    pub targets: Vec<TextureTarget>,
}

/// Name of the per-image size uniform for `image`.
pub fn image_size_uniform(image: &str) -> String {
    format!("_{image}_imgSize")
}

const VERTEX_PRELUDE: &str = r"layout(location = 0) in vec2 VERTEXDATA;
layout(location = 0) out vec2 isf_FragNormCoord;

void isf_vertShaderInit() {
    gl_Position = vec4(VERTEXDATA, 0.0, 1.0);
    isf_FragNormCoord = VERTEXDATA * 0.5 + vec2(0.5);
}
";

const DEFAULT_VERTEX_BODY: &str = r"void main() {
    isf_vertShaderInit();
}
";

const FRAGMENT_PRELUDE: &str = r"layout(location = 0) in vec2 isf_FragNormCoord;
layout(location = 0) out vec4 isf_FragColor;
#define gl_FragColor isf_FragColor
#define texture2D texture
#define texture2DRect texture
#define textureCube texture
";

impl ShaderDocument {
    /// Generates the variant for `targets`, one entry per image input followed
    /// by one per import. Missing entries default to 2D.
    pub fn generate(&self, targets: &[TextureTarget]) -> Result<ProgramSource, DocumentError> {
        let mut interface = ProgramInterface::default();
        for (name, kind) in BUILTIN_UNIFORMS {
            interface.push(name, kind);
        }

        let mut sampler_targets: HashMap<String, TextureTarget> = HashMap::new();
        let mut classified = targets.iter().copied();
        let mut resolved_targets = Vec::new();

        for input in self.inputs() {
            let kind = match input.kind {
                InputType::Event | InputType::Bool => UniformKind::Bool,
                InputType::Long => UniformKind::Int,
                InputType::Float => UniformKind::Float,
                InputType::Point2D => UniformKind::Vec2,
                InputType::Color => UniformKind::Vec4,
                InputType::Image => {
                    let target = classified.next().unwrap_or_default();
                    resolved_targets.push(target);
                    sampler_targets.insert(input.name.clone(), target);
                    UniformKind::Sampler(target)
                }
                InputType::Audio | InputType::AudioFft => {
                    sampler_targets.insert(input.name.clone(), TextureTarget::Texture2D);
                    UniformKind::Sampler(TextureTarget::Texture2D)
                }
            };
            interface.push(input.name.clone(), kind);
            if input.kind.is_buffer_backed() {
                interface.push(image_size_uniform(&input.name), UniformKind::Vec2);
            }
        }

        for import in self.imports() {
            let target = classified.next().unwrap_or_default();
            resolved_targets.push(target);
            sampler_targets.insert(import.name.clone(), target);
            interface.push(import.name.clone(), UniformKind::Sampler(target));
            interface.push(image_size_uniform(&import.name), UniformKind::Vec2);
        }

        for target in self.pass_targets() {
            sampler_targets.insert(target.to_string(), TextureTarget::Texture2D);
            interface.push(target, UniformKind::Sampler(TextureTarget::Texture2D));
            interface.push(image_size_uniform(target), UniformKind::Vec2);
        }

        let fragment_body = rewrite_image_macros(
            strip_version(self.fragment_source()),
            &sampler_targets,
        )?;
        let vertex_body = rewrite_image_macros(
            strip_version(self.vertex_source().unwrap_or(DEFAULT_VERTEX_BODY)),
            &sampler_targets,
        )?;

        Ok(ProgramSource {
            vertex: format!("{VERTEX_PRELUDE}\n{vertex_body}"),
            fragment: format!("{FRAGMENT_PRELUDE}\n{fragment_body}"),
            interface,
            targets: resolved_targets,
        })
    }
}

fn strip_version(source: &str) -> String {
    let mut stripped = String::with_capacity(source.len());
    for line in source.lines() {
        if line.trim_start().starts_with("#version") {
            continue;
        }
        stripped.push_str(line);
        stripped.push('\n');
    }
    stripped
}

const IMAGE_MACROS: [&str; 5] = [
    "IMG_THIS_NORM_PIXEL",
    "IMG_THIS_PIXEL",
    "IMG_NORM_PIXEL",
    "IMG_PIXEL",
    "IMG_SIZE",
];

/// Expands every `IMG_*` call in `source` for the texture target of the image
/// it names. Arguments are expanded recursively so nested calls work.
pub fn rewrite_image_macros(
    source: String,
    targets: &HashMap<String, TextureTarget>,
) -> Result<String, DocumentError> {
    let mut output = String::with_capacity(source.len());
    let bytes = source.as_bytes();
    let mut cursor = 0;

    while let Some(found) = source[cursor..].find("IMG_") {
        let start = cursor + found;
        let preceded_by_ident = start > 0 && is_ident_byte(bytes[start - 1]);
        let ident_end = start
            + source[start..]
                .bytes()
                .take_while(|byte| is_ident_byte(*byte))
                .count();
        let ident = &source[start..ident_end];
        let macro_name = IMAGE_MACROS.iter().copied().find(|name| *name == ident);

        let Some(macro_name) = macro_name.filter(|_| !preceded_by_ident) else {
            output.push_str(&source[cursor..ident_end]);
            cursor = ident_end;
            continue;
        };

        let (args, call_end) = split_call_args(&source, ident_end).ok_or(
            DocumentError::UnbalancedMacro {
                macro_name,
                offset: start,
            },
        )?;
        let args = args
            .into_iter()
            .map(|arg| rewrite_image_macros(arg.trim().to_string(), targets))
            .collect::<Result<Vec<_>, _>>()?;

        output.push_str(&source[cursor..start]);
        output.push_str(&expand(macro_name, &args, targets).ok_or(
            DocumentError::UnbalancedMacro {
                macro_name,
                offset: start,
            },
        )?);
        cursor = call_end;
    }

    output.push_str(&source[cursor..]);
    Ok(output)
}

fn expand(
    macro_name: &str,
    args: &[String],
    targets: &HashMap<String, TextureTarget>,
) -> Option<String> {
    let image = args.first()?.as_str();
    let target = targets.get(image).copied().unwrap_or_default();
    let size = image_size_uniform(image);
    let expanded = match (macro_name, args.len()) {
        ("IMG_SIZE", 1) => size,
        ("IMG_THIS_NORM_PIXEL", 1) => norm_pixel(image, "isf_FragNormCoord", target, &size),
        ("IMG_THIS_PIXEL", 1) => pixel(image, "gl_FragCoord.xy", target, &size),
        ("IMG_NORM_PIXEL", 2) => norm_pixel(image, &args[1], target, &size),
        ("IMG_PIXEL", 2) => pixel(image, &args[1], target, &size),
        _ => return None,
    };
    Some(expanded)
}

fn norm_pixel(image: &str, coord: &str, target: TextureTarget, size: &str) -> String {
    match target {
        TextureTarget::Texture2D | TextureTarget::Cube => format!("texture({image}, {coord})"),
        TextureTarget::Rect => format!("texture({image}, ({coord}) * {size})"),
    }
}

fn pixel(image: &str, coord: &str, target: TextureTarget, size: &str) -> String {
    match target {
        TextureTarget::Texture2D => format!("texture({image}, ({coord}) / {size})"),
        TextureTarget::Rect | TextureTarget::Cube => format!("texture({image}, {coord})"),
    }
}

/// Parses `( a, b(c, d), e )` starting at `open`, returning the top-level
/// arguments and the byte offset just past the closing parenthesis.
fn split_call_args(source: &str, open: usize) -> Option<(Vec<String>, usize)> {
    let rest = &source[open..];
    let skipped = rest.len() - rest.trim_start().len();
    let start = open + skipped;
    if source.as_bytes().get(start) != Some(&b'(') {
        return None;
    }

    let mut depth = 0usize;
    let mut args = Vec::new();
    let mut current = String::new();
    for (offset, ch) in source[start..].char_indices() {
        match ch {
            '(' => {
                depth += 1;
                if depth > 1 {
                    current.push(ch);
                }
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    args.push(std::mem::take(&mut current));
                    return Some((args, start + offset + 1));
                }
                current.push(ch);
            }
            ',' if depth == 1 => args.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    None
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}
