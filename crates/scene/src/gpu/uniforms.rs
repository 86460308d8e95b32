//! std140 layout of a program's non-sampler uniforms, plus the GLSL that
//! declares them and its texture/sampler pairs.
//!
//! Every ISF name is a macro aliasing a member of one uniform block, the same
//! way wrapped Shadertoy sources alias `iTime` and friends, so user code keeps
//! its plain names without clashing with the block members.
use std::fmt::Write as _;

use isfdoc::{ProgramInterface, TextureTarget, UniformKind};

use crate::backend::UniformValue;
use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformSlot {
    pub name: String,
    pub kind: UniformKind,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSlot {
    pub name: String,
    pub target: TextureTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformLayout {
    slots: Vec<UniformSlot>,
    size: u32,
}

fn align_and_size(kind: UniformKind) -> (u32, u32) {
    match kind {
        UniformKind::Float | UniformKind::Int | UniformKind::Bool => (4, 4),
        UniformKind::Vec2 => (8, 8),
        UniformKind::Vec4 => (16, 16),
        UniformKind::Sampler(_) => (0, 0),
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

impl UniformLayout {
    pub fn from_interface(interface: &ProgramInterface) -> Self {
        let mut offset = 0;
        let mut slots = Vec::new();
        for decl in interface.iter() {
            let (alignment, size) = align_and_size(decl.kind);
            if size == 0 {
                continue;
            }
            offset = align_to(offset, alignment);
            slots.push(UniformSlot {
                name: decl.name.clone(),
                kind: decl.kind,
                offset,
            });
            offset += size;
        }
        Self {
            slots,
            size: align_to(offset, 16).max(16),
        }
    }

    /// Block size in bytes, a multiple of 16.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn slot(&self, name: &str) -> Option<&UniformSlot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub fn slots(&self) -> &[UniformSlot] {
        &self.slots
    }

    /// `layout(std140)` block at set 0, binding 0, with one alias per name.
    pub fn declaration(&self) -> String {
        let mut glsl = String::from("layout(std140, set = 0, binding = 0) uniform IsfUniforms {\n");
        for slot in &self.slots {
            let _ = writeln!(glsl, "    {} isf_{};", glsl_type(slot.kind), slot.name);
        }
        glsl.push_str("} isf_block;\n");
        for slot in &self.slots {
            let _ = match slot.kind {
                UniformKind::Bool => writeln!(glsl, "#define {0} (isf_block.isf_{0} != 0)", slot.name),
                _ => writeln!(glsl, "#define {0} isf_block.isf_{0}", slot.name),
            };
        }
        glsl
    }
}

fn glsl_type(kind: UniformKind) -> &'static str {
    match kind {
        UniformKind::Float => "float",
        UniformKind::Int | UniformKind::Bool => "int",
        UniformKind::Vec2 => "vec2",
        UniformKind::Vec4 => "vec4",
        UniformKind::Sampler(_) => "",
    }
}

/// Sampler uniforms in interface order; rectangle textures have no wgpu
/// equivalent.
pub fn texture_slots(interface: &ProgramInterface) -> Result<Vec<TextureSlot>, CompileError> {
    interface
        .samplers()
        .map(|decl| match decl.kind {
            UniformKind::Sampler(TextureTarget::Rect) => {
                Err(CompileError::UnsupportedTarget(TextureTarget::Rect))
            }
            UniformKind::Sampler(target) => Ok(TextureSlot {
                name: decl.name.clone(),
                target,
            }),
            _ => Err(CompileError::Pipeline(format!("{} is not a sampler", decl.name))),
        })
        .collect()
}

/// Separate texture and sampler bindings at set 1 (`2i`, `2i + 1`), combined
/// behind a macro carrying the ISF name.
pub fn texture_declarations(slots: &[TextureSlot]) -> String {
    let mut glsl = String::new();
    for (index, slot) in slots.iter().enumerate() {
        let (texture_type, combined) = match slot.target {
            TextureTarget::Cube => ("textureCube", "samplerCube"),
            _ => ("texture2D", "sampler2D"),
        };
        let binding = index * 2;
        let name = &slot.name;
        let _ = writeln!(
            glsl,
            "layout(set = 1, binding = {binding}) uniform {texture_type} isf_tex_{name};"
        );
        let _ = writeln!(
            glsl,
            "layout(set = 1, binding = {}) uniform sampler isf_smp_{name};",
            binding + 1
        );
        let _ = writeln!(glsl, "#define {name} {combined}(isf_tex_{name}, isf_smp_{name})");
    }
    glsl
}

/// Writes `value` at `offset` using the block's std140 encoding.
pub fn write_value(bytes: &mut [u8], offset: u32, value: UniformValue) {
    let offset = offset as usize;
    let mut put = |data: &[u8]| {
        if let Some(dst) = bytes.get_mut(offset..offset + data.len()) {
            dst.copy_from_slice(data);
        }
    };
    match value {
        UniformValue::Float(v) => put(bytemuck::bytes_of(&v)),
        UniformValue::Int(v) => put(bytemuck::bytes_of(&v)),
        UniformValue::Bool(v) => put(bytemuck::bytes_of(&i32::from(v))),
        UniformValue::Vec2(v) => put(bytemuck::cast_slice(&v)),
        UniformValue::Vec4(v) => put(bytemuck::cast_slice(&v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isfdoc::ShaderDocument;

    fn interface(source: &str) -> ProgramInterface {
        ShaderDocument::parse("layout", source, None)
            .expect("parse")
            .generate(&[])
            .expect("generate")
            .interface
    }

    #[test]
    fn builtins_follow_std140_alignment() {
        let layout = UniformLayout::from_interface(&interface("/*{}*/ void main() {}"));
        let offsets: Vec<(&str, u32)> = layout
            .slots()
            .iter()
            .map(|slot| (slot.name.as_str(), slot.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("PASSINDEX", 0),
                ("RENDERSIZE", 8),
                ("TIME", 16),
                ("TIMEDELTA", 20),
                ("DATE", 32),
                ("FRAMEINDEX", 48),
            ]
        );
        assert_eq!(layout.size(), 64);
    }

    #[test]
    fn samplers_take_no_block_space() {
        let layout = UniformLayout::from_interface(&interface(
            r#"/*{ "INPUTS": [
                { "NAME": "inputImage", "TYPE": "image" },
                { "NAME": "invert", "TYPE": "bool" }
            ] }*/ void main() {}"#,
        ));
        assert!(layout.slot("inputImage").is_none());
        let size = layout.slot("_inputImage_imgSize").expect("size uniform");
        assert_eq!(size.offset, 56);
        assert_eq!(layout.slot("invert").map(|slot| slot.offset), Some(64));
        assert_eq!(layout.size(), 80);
        assert!(layout
            .declaration()
            .contains("#define invert (isf_block.isf_invert != 0)"));
    }

    #[test]
    fn texture_declarations_pair_textures_with_samplers() {
        let slots = vec![
            TextureSlot {
                name: "inputImage".into(),
                target: TextureTarget::Texture2D,
            },
            TextureSlot {
                name: "sky".into(),
                target: TextureTarget::Cube,
            },
        ];
        let glsl = texture_declarations(&slots);
        assert!(glsl.contains("layout(set = 1, binding = 0) uniform texture2D isf_tex_inputImage;"));
        assert!(glsl.contains("layout(set = 1, binding = 3) uniform sampler isf_smp_sky;"));
        assert!(glsl.contains("#define sky samplerCube(isf_tex_sky, isf_smp_sky)"));
    }

    #[test]
    fn rect_samplers_are_rejected() {
        let source = ShaderDocument::parse(
            "rect",
            r#"/*{ "INPUTS": [ { "NAME": "src", "TYPE": "image" } ] }*/ void main() {}"#,
            None,
        )
        .expect("parse")
        .generate(&[TextureTarget::Rect])
        .expect("generate");
        assert!(matches!(
            texture_slots(&source.interface),
            Err(CompileError::UnsupportedTarget(TextureTarget::Rect))
        ));
    }

    #[test]
    fn values_are_written_little_endian_at_offsets() {
        let mut bytes = vec![0u8; 32];
        write_value(&mut bytes, 8, UniformValue::Vec2([1.0, 2.0]));
        write_value(&mut bytes, 16, UniformValue::Bool(true));
        assert_eq!(&bytes[8..12], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[12..16], &2.0f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &1i32.to_le_bytes());
        write_value(&mut bytes, 30, UniformValue::Float(1.0));
        assert_eq!(&bytes[28..32], &[0, 0, 0, 0]);
    }
}
