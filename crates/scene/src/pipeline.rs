//! Multi-pass execution loop.
//!
//! `RenderState` owns everything keyed to the compiled program and the bound
//! document: the backend, the program itself, uniform handles, persistent
//! slots, this frame's temporaries and decoded imports. It lives behind the
//! scene's render lock; nothing here is shared across scenes.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use isfdoc::{image_size_uniform, InputDecl, InputType, PassDecl, ShaderDocument};
use tracing::{debug, warn};

use crate::backend::{RenderBackend, UniformValue};
use crate::buffer::{BufferPool, BufferRef};
use crate::error::{BackendError, CompileError, SceneError};
use crate::geometry::{GeometryCache, Quad};
use crate::inputs::InputValue;
use crate::timing::Timeline;
use crate::tracker::{InputTypeDescriptor, InputTypeTracker};
use crate::types::{Precision, Size};
use crate::uniforms::{date_vector, BuiltinUniform, UniformCache};

/// Output buffer of every pass drawn by one `render` call, keyed by 1-based
/// pass index.
pub type PassOutputs = BTreeMap<u32, BufferRef>;

/// Everything one frame needs from outside the render lock.
pub(crate) struct FrameRequest<'a> {
    pub document: &'a ShaderDocument,
    pub generation: u64,
    pub inputs: Vec<(InputDecl, Option<InputValue>)>,
    pub size: Size,
    pub time: Option<f64>,
    pub always_float: bool,
    pub strict: bool,
    /// Caller-supplied buffer receiving the final pass.
    pub target: Option<&'a BufferRef>,
}

pub(crate) struct RenderState<B: RenderBackend> {
    backend: B,
    generation: u64,
    program: Option<B::Program>,
    tracker: InputTypeTracker,
    uniforms: UniformCache<B::Location>,
    geometry: GeometryCache,
    timeline: Timeline,
    persistent: HashMap<String, BufferRef>,
    temporaries: Vec<(Option<String>, BufferRef)>,
    imports: HashMap<String, BufferRef>,
    imports_loaded: bool,
    render_size: Option<Size>,
    compile_count: u64,
}

impl<B: RenderBackend> RenderState<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            generation: 0,
            program: None,
            tracker: InputTypeTracker::default(),
            uniforms: UniformCache::default(),
            geometry: GeometryCache::default(),
            timeline: Timeline::default(),
            persistent: HashMap::new(),
            temporaries: Vec::new(),
            imports: HashMap::new(),
            imports_loaded: false,
            render_size: None,
            compile_count: 0,
        }
    }

    /// Drops all state tied to an older document generation.
    pub fn adopt(&mut self, generation: u64, pool: &dyn BufferPool) {
        if self.generation == generation {
            return;
        }
        let released = self.persistent.len() + self.temporaries.len() + self.imports.len();
        for (_, buffer) in self.persistent.drain() {
            pool.release(buffer);
        }
        for (_, buffer) in self.temporaries.drain(..) {
            pool.release(buffer);
        }
        for (_, buffer) in self.imports.drain() {
            pool.release(buffer);
        }
        self.program = None;
        self.tracker.reset();
        self.uniforms.invalidate();
        self.timeline.reset(Instant::now());
        self.imports_loaded = false;
        self.render_size = None;
        self.generation = generation;
        debug!(generation, released, "reset scene state for new document");
    }

    pub fn render(
        &mut self,
        frame: FrameRequest<'_>,
        pool: &dyn BufferPool,
        mut out: Option<&mut PassOutputs>,
    ) -> Result<BufferRef, SceneError> {
        let FrameRequest {
            document,
            generation,
            inputs,
            size,
            time,
            always_float,
            strict,
            target: into,
        } = frame;
        self.adopt(generation, pool);
        if let Some(into) = into.filter(|into| into.size() != size) {
            return Err(SceneError::TargetSize {
                expected: size,
                actual: into.size(),
            });
        }
        self.load_imports(document, pool, strict)?;

        let sample = self.timeline.sample(Instant::now(), time);
        let frame_index = self.timeline.frame_index();

        let descriptor = InputTypeDescriptor::classify(
            inputs
                .iter()
                .filter(|(decl, _)| decl.kind == InputType::Image)
                .map(|(_, value)| value.as_ref().and_then(InputValue::buffer).map(|buffer| &**buffer))
                .chain(
                    document
                        .imports()
                        .iter()
                        .map(|import| self.imports.get(&import.name).map(|buffer| &**buffer)),
                ),
        );
        if self.tracker.needs_recompile(&descriptor) {
            self.recompile(document, descriptor)?;
        }
        self.check_image_inputs(&inputs)?;

        for (_, buffer) in self.temporaries.drain(..) {
            pool.release(buffer);
        }
        if self.render_size.is_some_and(|previous| previous != size) {
            debug!(from = ?self.render_size, to = %size, "render size changed; persistent buffers invalidated");
        }
        self.render_size = Some(size);
        let mut fresh = self.prepare_persistent(document, size, always_float, pool)?;

        let implicit = [PassDecl::default()];
        let passes = if document.passes().is_empty() {
            &implicit[..]
        } else {
            document.passes()
        };
        let final_position = passes.len() - 1;

        let Self {
            backend,
            program,
            uniforms,
            geometry,
            persistent,
            temporaries,
            imports,
            ..
        } = &mut *self;
        let program = program
            .as_ref()
            .ok_or_else(|| CompileError::Pipeline("no program is linked".to_string()))?;
        let date = date_vector(chrono::Local::now());
        let mut last = None;

        for (position, pass) in passes.iter().enumerate() {
            let pass_index = position as u32 + 1;
            let final_target = into.filter(|_| position == final_position);
            let slot_name = pass
                .target
                .as_deref()
                .filter(|name| pass.persistent && persistent.contains_key(*name));

            let own_slot = slot_name.and_then(|name| persistent.get(name).map(|slot| (name, slot)));
            // `pooled` targets are this frame's temporaries, owned by the engine.
            let (target, own_copy, pooled) = match own_slot {
                Some((name, slot)) => {
                    let samples_itself = uniforms
                        .resolve_named(name, |n| backend.uniform_location(program, n))
                        .is_some();
                    let copy = if samples_itself && !fresh.contains(name) {
                        Some(pool.copy(slot)?)
                    } else {
                        None
                    };
                    (slot.clone(), copy, false)
                }
                None => match final_target {
                    Some(into) => (into.clone(), None, false),
                    None => (pool.acquire(size, pass_precision(pass, always_float))?, None, true),
                },
            };
            let abandon = |target: BufferRef, copy: Option<BufferRef>| {
                if pooled {
                    pool.release(target);
                }
                if let Some(copy) = copy {
                    pool.release(copy);
                }
            };

            if let Err(err) = geometry
                .bind(backend, &Quad::full_frame())
                .and_then(|()| backend.begin_pass(program, &target, size))
            {
                abandon(target, own_copy);
                return Err(err.into());
            }

            let mut bind = Binder {
                backend: &mut *backend,
                uniforms: &mut *uniforms,
                program,
            };
            bind.builtin(BuiltinUniform::RenderSize, UniformValue::Vec2(size.as_vec2()));
            bind.builtin(BuiltinUniform::PassIndex, UniformValue::Int(pass_index as i32));
            bind.builtin(BuiltinUniform::Time, UniformValue::Float(sample.time as f32));
            bind.builtin(BuiltinUniform::TimeDelta, UniformValue::Float(sample.delta as f32));
            bind.builtin(BuiltinUniform::Date, UniformValue::Vec4(date));
            bind.builtin(
                BuiltinUniform::FrameIndex,
                UniformValue::Int(frame_index.min(i32::MAX as u64) as i32),
            );

            for (decl, value) in &inputs {
                match value {
                    Some(InputValue::Image(buffer)) | Some(InputValue::Audio(buffer)) => {
                        bind.buffer(&decl.name, buffer);
                    }
                    Some(value) => {
                        if let Some(uniform) = value.to_uniform() {
                            bind.value(&decl.name, uniform);
                        }
                    }
                    None => {}
                }
            }

            for import in document.imports() {
                if let Some(buffer) = imports.get(&import.name) {
                    bind.buffer(&import.name, buffer);
                }
            }

            for name in document.pass_targets() {
                let own = pass.target.as_deref() == Some(name);
                if let Some(slot) = persistent.get(name) {
                    // Not yet drawn at this size: its memory may hold anything.
                    if fresh.contains(name) {
                        continue;
                    }
                    match (&own_copy, own && pass.persistent) {
                        (Some(copy), true) => bind.buffer(name, copy),
                        (None, true) => {}
                        (_, false) => bind.buffer(name, slot),
                    }
                } else if let Some((_, earlier)) = temporaries
                    .iter()
                    .find(|(target, _)| target.as_deref() == Some(name))
                {
                    bind.buffer(name, earlier);
                }
            }

            let attribute = uniforms.resolve(BuiltinUniform::VertexData, |name| {
                backend.attribute_location(program, name)
            });
            if let Err(err) = backend.draw(attribute) {
                abandon(target, own_copy);
                return Err(err.into());
            }

            if let Some(copy) = own_copy {
                pool.release(copy);
            }
            if let Some(name) = slot_name {
                fresh.remove(name);
                if let Some(into) = final_target {
                    pool.copy_into(&target, into)?;
                }
            } else if pooled {
                temporaries.push((pass.target.clone(), target.clone()));
            }
            if let Some(out) = out.as_mut() {
                out.insert(pass_index, target.clone());
            }
            last = Some(match final_target {
                Some(into) => into.clone(),
                None => target,
            });
        }

        self.timeline.commit(sample);
        last.ok_or_else(|| BackendError::new("document produced no passes").into())
    }

    fn recompile(
        &mut self,
        document: &ShaderDocument,
        descriptor: InputTypeDescriptor,
    ) -> Result<(), SceneError> {
        let source = document
            .generate(descriptor.targets())
            .map_err(CompileError::from)?;
        match self.backend.compile(&source) {
            Ok(program) => {
                self.program = Some(program);
                self.uniforms.invalidate();
                self.compile_count += 1;
                debug!(
                    document = document.name(),
                    descriptor = %descriptor,
                    compiles = self.compile_count,
                    epoch = self.uniforms.epoch(),
                    "compiled shader variant"
                );
                self.tracker.mark_compiled(descriptor);
                Ok(())
            }
            Err(err) => {
                self.program = None;
                self.tracker.reset();
                Err(err.into())
            }
        }
    }

    /// Every image input the program samples must have a buffer before any
    /// pass is drawn.
    fn check_image_inputs(&mut self, inputs: &[(InputDecl, Option<InputValue>)]) -> Result<(), SceneError> {
        let Some(program) = self.program.as_ref() else {
            return Ok(());
        };
        let backend = &self.backend;
        for (decl, value) in inputs {
            if decl.kind != InputType::Image || value.is_some() {
                continue;
            }
            let sampled = self
                .uniforms
                .resolve_named(&decl.name, |name| backend.uniform_location(program, name))
                .is_some();
            if sampled {
                return Err(SceneError::UnresolvedInput {
                    input: decl.name.clone(),
                    pass: 1,
                });
            }
        }
        Ok(())
    }

    /// Makes sure every persistent slot matches this frame's size and
    /// precision. Returns the names of slots allocated now, whose contents are
    /// undefined.
    fn prepare_persistent(
        &mut self,
        document: &ShaderDocument,
        size: Size,
        always_float: bool,
        pool: &dyn BufferPool,
    ) -> Result<HashSet<String>, SceneError> {
        let mut fresh = HashSet::new();
        for pass in document.passes().iter().filter(|pass| pass.persistent) {
            let Some(name) = pass.target.as_deref() else {
                continue;
            };
            let precision = pass_precision(pass, always_float);
            let reusable = self
                .persistent
                .get(name)
                .is_some_and(|slot| slot.size() == size && slot.precision() == precision);
            if reusable {
                continue;
            }
            if let Some(stale) = self.persistent.remove(name) {
                debug!(
                    slot = name,
                    from = %stale.size(),
                    to = %size,
                    ?precision,
                    "reallocating persistent buffer"
                );
                pool.release(stale);
            }
            self.persistent
                .insert(name.to_string(), pool.acquire(size, precision)?);
            fresh.insert(name.to_string());
        }
        Ok(fresh)
    }

    fn load_imports(
        &mut self,
        document: &ShaderDocument,
        pool: &dyn BufferPool,
        strict: bool,
    ) -> Result<(), SceneError> {
        if self.imports_loaded {
            return Ok(());
        }
        for import in document.imports() {
            if self.imports.contains_key(&import.name) {
                continue;
            }
            let path = import_path(document, &import.path);
            match decode_rgba(&path) {
                Ok((size, pixels)) => {
                    let buffer = pool.upload_rgba(size, &pixels)?;
                    debug!(import = %import.name, path = %path.display(), %size, "uploaded imported image");
                    self.imports.insert(import.name.clone(), buffer);
                }
                Err(reason) if strict => {
                    return Err(SceneError::Import {
                        name: import.name.clone(),
                        path,
                        reason,
                    });
                }
                Err(reason) => {
                    warn!(import = %import.name, path = %path.display(), %reason, "skipping imported image");
                }
            }
        }
        self.imports_loaded = true;
        Ok(())
    }

    pub fn persistent_buffer(&self, name: &str) -> Option<BufferRef> {
        self.persistent.get(name).cloned()
    }

    pub fn temp_buffer(&self, name: &str) -> Option<BufferRef> {
        self.temporaries
            .iter()
            .find(|(target, _)| target.as_deref() == Some(name))
            .map(|(_, buffer)| buffer.clone())
    }

    pub fn import_buffer(&self, name: &str) -> Option<BufferRef> {
        self.imports.get(name).cloned()
    }

    pub fn render_size(&self) -> Option<Size> {
        self.render_size
    }

    pub fn compile_count(&self) -> u64 {
        self.compile_count
    }

    pub fn frame_index(&self) -> u64 {
        self.timeline.frame_index()
    }

    pub fn uniform_epoch(&self) -> u64 {
        self.uniforms.epoch()
    }

    pub fn compiled_descriptor(&self) -> Option<String> {
        self.tracker.compiled().map(ToString::to_string)
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

fn pass_precision(pass: &PassDecl, always_float: bool) -> Precision {
    if pass.float || always_float {
        Precision::Float
    } else {
        Precision::Standard
    }
}

fn decode_rgba(path: &Path) -> Result<(Size, Vec<u8>), String> {
    let image = image::open(path).map_err(|err| err.to_string())?.to_rgba8();
    let (width, height) = image.dimensions();
    Ok((Size::new(width, height), image.into_raw()))
}

/// Resolves locations through the cache and writes values for one pass.
struct Binder<'a, B: RenderBackend> {
    backend: &'a mut B,
    uniforms: &'a mut UniformCache<B::Location>,
    program: &'a B::Program,
}

impl<B: RenderBackend> Binder<'_, B> {
    fn location(&mut self, name: &str) -> Option<B::Location> {
        let backend = &*self.backend;
        let program = self.program;
        self.uniforms
            .resolve_named(name, |n| backend.uniform_location(program, n))
    }

    fn builtin(&mut self, builtin: BuiltinUniform, value: UniformValue) {
        let backend = &*self.backend;
        let program = self.program;
        if let Some(location) = self
            .uniforms
            .resolve(builtin, |name| backend.uniform_location(program, name))
        {
            self.backend.set_uniform(location, value);
        }
    }

    fn value(&mut self, name: &str, value: UniformValue) {
        if let Some(location) = self.location(name) {
            self.backend.set_uniform(location, value);
        }
    }

    fn buffer(&mut self, name: &str, buffer: &BufferRef) {
        if let Some(location) = self.location(name) {
            self.backend.bind_texture(location, buffer);
        }
        self.value(
            &image_size_uniform(name),
            UniformValue::Vec2(buffer.size().as_vec2()),
        );
    }
}

fn import_path(document: &ShaderDocument, relative: &Path) -> PathBuf {
    document
        .base_dir()
        .map(|dir| dir.join(relative))
        .unwrap_or_else(|| relative.to_path_buf())
}
