//! Serde schema for the JSON metadata block that opens every ISF fragment
//! shader. `document` deserializes into these structures and then lowers them
//! into the validated declarations the scene engine consumes.
//!
//! Types:
//!
//! - `IsfManifest` mirrors the top-level keys (`DESCRIPTION`, `INPUTS`,
//!   `PASSES`, `IMPORTED`, ...).
//! - `InputSpec` and `InputType` describe one declared input.
//! - `PassSpec` describes one render pass; its boolean flags tolerate the
//!   number/string spellings found in older files.
//! - `ImportedSpec` accepts both the dictionary form and the legacy array form
//!   of `IMPORTED`.
//! - `Literal` holds default/min/max/identity values as written.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct IsfManifest {
    #[serde(rename = "DESCRIPTION", default)]
    pub description: Option<String>,
    #[serde(rename = "CREDIT", default)]
    pub credit: Option<String>,
    #[serde(rename = "ISFVSN", default)]
    pub vsn: Option<String>,
    #[serde(rename = "CATEGORIES", default)]
    pub categories: Vec<String>,
    #[serde(rename = "INPUTS", default)]
    pub inputs: Vec<InputSpec>,
    #[serde(rename = "PASSES", default)]
    pub passes: Vec<PassSpec>,
    #[serde(rename = "IMPORTED", default)]
    pub imported: ImportedSpec,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    #[serde(rename = "event")]
    Event,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "long")]
    Long,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "point2D")]
    Point2D,
    #[serde(rename = "color")]
    Color,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "audioFFT")]
    AudioFft,
}

impl InputType {
    /// True for inputs whose value is a GPU buffer rather than a scalar/vector.
    pub fn is_buffer_backed(self) -> bool {
        matches!(self, InputType::Image | InputType::Audio | InputType::AudioFft)
    }

    pub fn is_audio(self) -> bool {
        matches!(self, InputType::Audio | InputType::AudioFft)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InputType::Event => "event",
            InputType::Bool => "bool",
            InputType::Long => "long",
            InputType::Float => "float",
            InputType::Point2D => "point2D",
            InputType::Color => "color",
            InputType::Image => "image",
            InputType::Audio => "audio",
            InputType::AudioFft => "audioFFT",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InputSpec {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "TYPE")]
    pub kind: InputType,
    #[serde(rename = "LABEL", default)]
    pub label: Option<String>,
    #[serde(rename = "DEFAULT", default)]
    pub default: Option<Literal>,
    #[serde(rename = "MIN", default)]
    pub min: Option<Literal>,
    #[serde(rename = "MAX", default)]
    pub max: Option<Literal>,
    #[serde(rename = "IDENTITY", default)]
    pub identity: Option<Literal>,
    #[serde(rename = "VALUES", default)]
    pub values: Vec<i64>,
    #[serde(rename = "LABELS", default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PassSpec {
    #[serde(rename = "TARGET", default)]
    pub target: Option<String>,
    #[serde(rename = "PERSISTENT", default, deserialize_with = "deserialize_flag")]
    pub persistent: bool,
    #[serde(rename = "FLOAT", default, deserialize_with = "deserialize_flag")]
    pub float: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImportSpec {
    #[serde(rename = "NAME", default)]
    pub name: Option<String>,
    #[serde(rename = "PATH")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum ImportedSpec {
    Map(BTreeMap<String, ImportSpec>),
    List(Vec<ImportSpec>),
}

impl Default for ImportedSpec {
    fn default() -> Self {
        Self::Map(BTreeMap::new())
    }
}

impl ImportedSpec {
    /// Flattens both spellings into `(name, path)` pairs. List entries without
    /// a `NAME` are skipped.
    pub fn entries(&self) -> Vec<(String, String)> {
        match self {
            ImportedSpec::Map(map) => map
                .iter()
                .map(|(key, spec)| {
                    let name = spec.name.clone().unwrap_or_else(|| key.clone());
                    (name, spec.path.clone())
                })
                .collect(),
            ImportedSpec::List(list) => list
                .iter()
                .filter_map(|spec| spec.name.clone().map(|name| (name, spec.path.clone())))
                .collect(),
        }
    }
}

/// A metadata value as written in the JSON block.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Number(f64),
    Vector(Vec<f64>),
}

impl Literal {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Number(value) => Some(*value),
            Literal::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            Literal::Vector(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(value) => Some(*value),
            Literal::Number(value) => Some(*value != 0.0),
            Literal::Vector(_) => None,
        }
    }

    pub fn as_slice(&self) -> Option<&[f64]> {
        match self {
            Literal::Vector(values) => Some(values.as_slice()),
            _ => None,
        }
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Number(value) => value != 0.0,
        Flag::Text(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1"
        ),
    })
}
