//! GPU-less backend that records what the engine asks of it.
//!
//! Programs "link" instantly against their `ProgramInterface`; locations are
//! indices into that interface tagged with the program id, so a handle used
//! against a different program is detected and counted instead of silently
//! writing somewhere else. Every draw is captured as a `DrawCall`.
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use isfdoc::{ProgramSource, TextureTarget, VERTEX_ATTRIBUTE};

use crate::backend::{RenderBackend, UniformValue};
use crate::buffer::{BufferId, BufferRef};
use crate::error::{BackendError, CompileError, ShaderStage};
use crate::geometry::Quad;
use crate::types::Size;

#[derive(Debug, Clone)]
pub struct HeadlessProgram {
    id: u64,
    names: Arc<Vec<String>>,
}

impl HeadlessProgram {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessLocation {
    pub program: u64,
    pub index: usize,
}

/// One successful compile.
#[derive(Debug, Clone)]
pub struct CompiledVariant {
    pub program: u64,
    pub targets: Vec<TextureTarget>,
    pub vertex: String,
    pub fragment: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: u64,
    pub target: BufferId,
    pub viewport: Size,
    pub uniforms: Vec<(String, UniformValue)>,
    pub textures: Vec<(String, BufferId)>,
    pub attribute: Option<HeadlessLocation>,
}

impl DrawCall {
    /// Last value written to `name` during this draw.
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms
            .iter()
            .rev()
            .find(|(uniform, _)| uniform == name)
            .map(|(_, value)| *value)
    }

    pub fn texture(&self, name: &str) -> Option<BufferId> {
        self.textures
            .iter()
            .rev()
            .find(|(sampler, _)| sampler == name)
            .map(|(_, buffer)| *buffer)
    }
}

#[derive(Debug)]
struct OpenPass {
    program: u64,
    names: Arc<Vec<String>>,
    target: BufferId,
    viewport: Size,
    uniforms: Vec<(String, UniformValue)>,
    textures: Vec<(String, BufferId)>,
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_program: u64,
    compiled: Vec<CompiledVariant>,
    fail_next: Option<String>,
    fail_draw: Option<String>,
    unused: HashSet<String>,
    quad: Option<Quad>,
    quad_uploads: u64,
    lookups: Cell<u64>,
    stale_uses: u64,
    open: Option<OpenPass>,
    draws: Vec<DrawCall>,
    contents: HashMap<BufferId, Vec<usize>>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `compile` fail with `message`.
    pub fn fail_next_compile(&mut self, message: impl Into<String>) {
        self.fail_next = Some(message.into());
    }

    /// Makes the next `draw` fail with `message`; the pass is discarded.
    pub fn fail_next_draw(&mut self, message: impl Into<String>) {
        self.fail_draw = Some(message.into());
    }

    /// Pretends the linker optimised `name` away, so lookups return `None`.
    pub fn treat_as_unused(&mut self, name: impl Into<String>) {
        self.unused.insert(name.into());
    }

    pub fn compiled(&self) -> &[CompiledVariant] {
        &self.compiled
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn last_draw(&self) -> Option<&DrawCall> {
        self.draws.last()
    }

    pub fn quad(&self) -> Option<&Quad> {
        self.quad.as_ref()
    }

    pub fn quad_uploads(&self) -> u64 {
        self.quad_uploads
    }

    /// Location lookups answered so far.
    pub fn lookups(&self) -> u64 {
        self.lookups.get()
    }

    /// Writes through a location resolved against another program.
    pub fn stale_uses(&self) -> u64 {
        self.stale_uses
    }

    /// Indices into `draws()` of every draw that rendered into `buffer`.
    pub fn content(&self, buffer: BufferId) -> &[usize] {
        self.contents
            .get(&buffer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Name behind `location` for the open pass, if the handle belongs to it.
    fn resolve(&mut self, location: HeadlessLocation) -> Option<String> {
        let open = self.open.as_ref()?;
        if location.program != open.program {
            self.stale_uses += 1;
            return None;
        }
        open.names.get(location.index).cloned()
    }
}

impl RenderBackend for HeadlessBackend {
    type Program = HeadlessProgram;
    type Location = HeadlessLocation;

    fn compile(&mut self, source: &ProgramSource) -> Result<Self::Program, CompileError> {
        if let Some(message) = self.fail_next.take() {
            return Err(CompileError::Shader {
                stage: ShaderStage::Fragment,
                message,
            });
        }
        self.next_program += 1;
        let id = self.next_program;
        let names = source
            .interface
            .iter()
            .map(|decl| decl.name.clone())
            .collect::<Vec<_>>();
        self.compiled.push(CompiledVariant {
            program: id,
            targets: source.targets.clone(),
            vertex: source.vertex.clone(),
            fragment: source.fragment.clone(),
        });
        Ok(HeadlessProgram {
            id,
            names: Arc::new(names),
        })
    }

    fn uniform_location(&self, program: &Self::Program, name: &str) -> Option<Self::Location> {
        self.lookups.set(self.lookups.get() + 1);
        if self.unused.contains(name) {
            return None;
        }
        program
            .names
            .iter()
            .position(|declared| declared == name)
            .map(|index| HeadlessLocation {
                program: program.id,
                index,
            })
    }

    fn attribute_location(&self, program: &Self::Program, name: &str) -> Option<Self::Location> {
        self.lookups.set(self.lookups.get() + 1);
        (name == VERTEX_ATTRIBUTE).then_some(HeadlessLocation {
            program: program.id,
            index: usize::MAX,
        })
    }

    fn upload_quad(&mut self, quad: &Quad) -> Result<(), BackendError> {
        self.quad = Some(*quad);
        self.quad_uploads += 1;
        Ok(())
    }

    fn begin_pass(
        &mut self,
        program: &Self::Program,
        target: &BufferRef,
        viewport: Size,
    ) -> Result<(), BackendError> {
        if self.open.is_some() {
            return Err(BackendError::new("previous pass was never drawn"));
        }
        self.open = Some(OpenPass {
            program: program.id,
            names: Arc::clone(&program.names),
            target: target.id(),
            viewport,
            uniforms: Vec::new(),
            textures: Vec::new(),
        });
        Ok(())
    }

    fn set_uniform(&mut self, location: Self::Location, value: UniformValue) {
        if let Some(name) = self.resolve(location) {
            if let Some(open) = self.open.as_mut() {
                open.uniforms.push((name, value));
            }
        }
    }

    fn bind_texture(&mut self, location: Self::Location, buffer: &BufferRef) {
        if let Some(name) = self.resolve(location) {
            if let Some(open) = self.open.as_mut() {
                open.textures.push((name, buffer.id()));
            }
        }
    }

    fn draw(&mut self, attribute: Option<Self::Location>) -> Result<(), BackendError> {
        let open = self
            .open
            .take()
            .ok_or_else(|| BackendError::new("draw issued outside a pass"))?;
        if self.quad.is_none() {
            return Err(BackendError::new("no quad uploaded"));
        }
        if let Some(message) = self.fail_draw.take() {
            return Err(BackendError::new(message));
        }
        let index = self.draws.len();
        self.contents.entry(open.target).or_default().push(index);
        self.draws.push(DrawCall {
            program: open.program,
            target: open.target,
            viewport: open.viewport,
            uniforms: open.uniforms,
            textures: open.textures,
            attribute,
        });
        Ok(())
    }
}
