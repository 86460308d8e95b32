//! Current values of the bound document's declared inputs.
use std::collections::HashMap;
use std::sync::Arc;

use isfdoc::{InputDecl, InputType, ShaderDocument};

use crate::backend::UniformValue;
use crate::buffer::BufferRef;
use crate::error::SceneError;

#[derive(Debug, Clone)]
pub enum InputValue {
    Bool(bool),
    Long(i32),
    Float(f64),
    Point2D([f64; 2]),
    Color([f64; 4]),
    /// Column-major 2x2 matrix.
    Matrix2([f32; 4]),
    /// Column-major 4x4 matrix.
    Matrix4([f32; 16]),
    Image(BufferRef),
    Audio(BufferRef),
}

impl PartialEq for InputValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (InputValue::Bool(a), InputValue::Bool(b)) => a == b,
            (InputValue::Long(a), InputValue::Long(b)) => a == b,
            (InputValue::Float(a), InputValue::Float(b)) => a == b,
            (InputValue::Point2D(a), InputValue::Point2D(b)) => a == b,
            (InputValue::Color(a), InputValue::Color(b)) => a == b,
            (InputValue::Matrix2(a), InputValue::Matrix2(b)) => a == b,
            (InputValue::Matrix4(a), InputValue::Matrix4(b)) => a == b,
            (InputValue::Image(a), InputValue::Image(b)) => Arc::ptr_eq(a, b),
            (InputValue::Audio(a), InputValue::Audio(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl InputValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            InputValue::Bool(_) => "bool",
            InputValue::Long(_) => "long",
            InputValue::Float(_) => "float",
            InputValue::Point2D(_) => "point2D",
            InputValue::Color(_) => "color",
            InputValue::Matrix2(_) => "mat2",
            InputValue::Matrix4(_) => "mat4",
            InputValue::Image(_) => "image",
            InputValue::Audio(_) => "audio",
        }
    }

    pub fn buffer(&self) -> Option<&BufferRef> {
        match self {
            InputValue::Image(buffer) | InputValue::Audio(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Whether this value may be stored in an input declared as `kind`.
    pub fn matches(&self, kind: InputType) -> bool {
        match self {
            InputValue::Bool(_) => matches!(kind, InputType::Bool | InputType::Event),
            InputValue::Long(_) => kind == InputType::Long,
            InputValue::Float(_) => kind == InputType::Float,
            InputValue::Point2D(_) => kind == InputType::Point2D,
            InputValue::Color(_) => kind == InputType::Color,
            InputValue::Matrix2(_) | InputValue::Matrix4(_) => false,
            InputValue::Image(_) => kind == InputType::Image,
            InputValue::Audio(_) => kind.is_audio(),
        }
    }

    /// Value an input holds before it is ever set. Buffer-backed inputs have
    /// no default.
    pub fn default_for(decl: &InputDecl) -> Option<Self> {
        let default = decl.default.as_ref();
        let value = match decl.kind {
            InputType::Event => InputValue::Bool(false),
            InputType::Bool => InputValue::Bool(default.and_then(|d| d.as_bool()).unwrap_or(false)),
            InputType::Long => {
                let fallback = decl.values.first().copied().unwrap_or(0);
                let raw = default
                    .and_then(|d| d.as_f64())
                    .map(|v| v as i64)
                    .unwrap_or(fallback);
                InputValue::Long(raw.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
            }
            InputType::Float => InputValue::Float(default.and_then(|d| d.as_f64()).unwrap_or(0.0)),
            InputType::Point2D => InputValue::Point2D(vector(default, [0.0; 2])),
            InputType::Color => InputValue::Color(vector(default, [0.0, 0.0, 0.0, 1.0])),
            InputType::Image | InputType::Audio | InputType::AudioFft => return None,
        };
        Some(value)
    }

    /// Uniform payload for scalar and vector values.
    pub fn to_uniform(&self) -> Option<UniformValue> {
        match self {
            InputValue::Bool(value) => Some(UniformValue::Bool(*value)),
            InputValue::Long(value) => Some(UniformValue::Int(*value)),
            InputValue::Float(value) => Some(UniformValue::Float(*value as f32)),
            InputValue::Point2D([x, y]) => Some(UniformValue::Vec2([*x as f32, *y as f32])),
            InputValue::Color(rgba) => Some(UniformValue::Vec4(rgba.map(|c| c as f32))),
            InputValue::Matrix2(_)
            | InputValue::Matrix4(_)
            | InputValue::Image(_)
            | InputValue::Audio(_) => None,
        }
    }
}

fn vector<const N: usize>(literal: Option<&isfdoc::Literal>, fallback: [f64; N]) -> [f64; N] {
    let Some(components) = literal.and_then(|l| l.as_slice()) else {
        return fallback;
    };
    let mut out = fallback;
    for (slot, value) in out.iter_mut().zip(components) {
        *slot = *value;
    }
    out
}

/// Values explicitly set by the caller, keyed by input name, for the document
/// generation they were set against.
#[derive(Debug, Default)]
pub struct InputStore {
    generation: u64,
    values: HashMap<String, InputValue>,
}

impl InputStore {
    /// Drops values that belong to an older document.
    pub fn sync(&mut self, generation: u64) {
        if self.generation != generation {
            self.values.clear();
            self.generation = generation;
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Validates against `document` before storing; a rejected value leaves
    /// every stored value untouched.
    pub fn set(&mut self, document: &ShaderDocument, name: &str, value: InputValue) -> Result<(), SceneError> {
        let decl = document
            .input(name)
            .ok_or_else(|| SceneError::UnknownInput(name.to_string()))?;
        if !value.matches(decl.kind) {
            return Err(SceneError::TypeMismatch {
                input: name.to_string(),
                expected: decl.kind,
                found: value.kind_name(),
            });
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Stored value, falling back to the declared default.
    pub fn get(&self, document: &ShaderDocument, name: &str) -> Result<Option<InputValue>, SceneError> {
        let decl = document
            .input(name)
            .ok_or_else(|| SceneError::UnknownInput(name.to_string()))?;
        Ok(self
            .values
            .get(name)
            .cloned()
            .or_else(|| InputValue::default_for(decl)))
    }

    /// Value of every declared input for one frame, in declaration order.
    pub fn snapshot(&self, document: &ShaderDocument) -> Vec<(InputDecl, Option<InputValue>)> {
        document
            .inputs()
            .iter()
            .map(|decl| {
                let value = self
                    .values
                    .get(&decl.name)
                    .cloned()
                    .or_else(|| InputValue::default_for(decl));
                (decl.clone(), value)
            })
            .collect()
    }

    /// Events fire for a single frame.
    pub fn reset_events(&mut self, document: &ShaderDocument) {
        for decl in document.inputs_of_type(InputType::Event) {
            self.values.remove(&decl.name);
        }
    }
}
