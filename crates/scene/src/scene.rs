use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use isfdoc::{ImportDecl, InputDecl, InputType, ShaderDocument};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::backend::RenderBackend;
use crate::binding::{Bound, DocumentSlot};
use crate::buffer::{BufferPool, BufferRef, HostBufferPool};
use crate::error::SceneError;
use crate::inputs::{InputStore, InputValue};
use crate::pipeline::{FrameRequest, PassOutputs, RenderState};
use crate::types::{SceneConfig, Size};

/// Executes ISF documents frame by frame on one rendering context.
///
/// Binding and input updates may come from any thread. `render` serialises on
/// an internal lock and is meant to be driven from the thread that owns the
/// backend's context.
pub struct Scene<B: RenderBackend> {
    pool: Arc<dyn BufferPool>,
    document: DocumentSlot,
    inputs: Mutex<InputStore>,
    render: Mutex<RenderState<B>>,
    always_float: AtomicBool,
    strict: AtomicBool,
    size: Mutex<Size>,
}

impl<B: RenderBackend> Scene<B> {
    /// Scene allocating from a private `HostBufferPool`.
    pub fn new(backend: B) -> Self {
        Self::with_pool(backend, Arc::new(HostBufferPool::new()))
    }

    /// Scene allocating from `pool`, which may be shared with other scenes.
    pub fn with_pool(backend: B, pool: Arc<dyn BufferPool>) -> Self {
        Self::with_config(backend, pool, &SceneConfig::default())
    }

    pub fn with_config(backend: B, pool: Arc<dyn BufferPool>, config: &SceneConfig) -> Self {
        Self {
            pool,
            document: DocumentSlot::default(),
            inputs: Mutex::new(InputStore::default()),
            render: Mutex::new(RenderState::new(backend)),
            always_float: AtomicBool::new(config.always_render_to_float),
            strict: AtomicBool::new(config.strict),
            size: Mutex::new(config.size),
        }
    }

    pub fn pool(&self) -> &Arc<dyn BufferPool> {
        &self.pool
    }

    /// Makes `document` active. Persistent buffers, the compiled program and
    /// uniform handles of the previous document are discarded.
    pub fn bind(&self, document: Arc<ShaderDocument>) {
        let name = document.name().to_string();
        let generation = self.document.swap(Some(document));
        debug!(document = %name, generation, "bound ISF document");
        self.settle(generation);
    }

    /// Clears the active document and its persistent buffers.
    pub fn unbind(&self) {
        let generation = self.document.swap(None);
        debug!(generation, "unbound ISF document");
        self.settle(generation);
    }

    /// Releases old-document resources now unless a frame is in flight, in
    /// which case the next `render` does it.
    fn settle(&self, generation: u64) {
        if let Some(mut state) = self.render.try_lock() {
            state.adopt(generation, self.pool.as_ref());
        }
    }

    /// Loads and binds an ISF file. In lenient mode a load failure is logged
    /// and leaves nothing bound; in strict mode it is returned and the
    /// previously bound document stays active.
    pub fn use_file(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let path = path.as_ref();
        match ShaderDocument::load(path) {
            Ok(document) => {
                self.bind(Arc::new(document));
                Ok(())
            }
            Err(err) if self.strict() => Err(err.into()),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to load ISF document; nothing bound");
                self.unbind();
                Ok(())
            }
        }
    }

    pub fn document(&self) -> Option<Arc<ShaderDocument>> {
        self.document.document()
    }

    fn bound(&self) -> Result<(Arc<ShaderDocument>, u64), SceneError> {
        let Bound {
            document,
            generation,
        } = self.document.current();
        document
            .map(|document| (document, generation))
            .ok_or(SceneError::NoDocumentBound)
    }

    pub fn set_value(&self, name: &str, value: InputValue) -> Result<(), SceneError> {
        let (document, generation) = self.bound()?;
        let mut store = self.inputs.lock();
        store.sync(generation);
        store.set(&document, name, value)
    }

    /// Current value of `name`, or its declared default.
    pub fn value(&self, name: &str) -> Result<Option<InputValue>, SceneError> {
        let (document, generation) = self.bound()?;
        let mut store = self.inputs.lock();
        store.sync(generation);
        store.get(&document, name)
    }

    pub fn set_image_input(&self, name: &str, buffer: BufferRef) -> Result<(), SceneError> {
        self.set_value(name, InputValue::Image(buffer))
    }

    pub fn set_audio_input(&self, name: &str, buffer: BufferRef) -> Result<(), SceneError> {
        self.set_value(name, InputValue::Audio(buffer))
    }

    /// Binds the image a filter reads from (`inputImage`, or the document's
    /// only image input).
    pub fn set_filter_input(&self, buffer: BufferRef) -> Result<(), SceneError> {
        let name = self.filter_input_name()?;
        self.set_image_input(&name, buffer)
    }

    pub fn filter_input(&self) -> Result<Option<BufferRef>, SceneError> {
        let name = self.filter_input_name()?;
        self.image_input(&name)
    }

    fn filter_input_name(&self) -> Result<String, SceneError> {
        let (document, _) = self.bound()?;
        document
            .filter_input()
            .map(|decl| decl.name.clone())
            .ok_or_else(|| SceneError::UnknownInput(isfdoc::FILTER_INPUT_NAME.to_string()))
    }

    /// Binds the first declared input of `kind` (`audio` or `audioFFT`).
    pub fn set_audio_role(&self, kind: InputType, buffer: BufferRef) -> Result<(), SceneError> {
        let (document, _) = self.bound()?;
        let name = document
            .audio_inputs()
            .find(|decl| decl.kind == kind)
            .map(|decl| decl.name.clone())
            .ok_or_else(|| SceneError::UnknownInput(kind.to_string()))?;
        self.set_audio_input(&name, buffer)
    }

    pub fn image_input(&self, name: &str) -> Result<Option<BufferRef>, SceneError> {
        Ok(match self.value(name)? {
            Some(InputValue::Image(buffer)) => Some(buffer),
            _ => None,
        })
    }

    pub fn audio_input(&self, name: &str) -> Result<Option<BufferRef>, SceneError> {
        Ok(match self.value(name)? {
            Some(InputValue::Audio(buffer)) => Some(buffer),
            _ => None,
        })
    }

    /// Render state with anything left over from an older document dropped.
    fn state(&self) -> MutexGuard<'_, RenderState<B>> {
        let generation = self.document.current().generation;
        let mut state = self.render.lock();
        state.adopt(generation, self.pool.as_ref());
        state
    }

    /// Latest output of the persistent pass targeting `name`.
    pub fn persistent_buffer(&self, name: &str) -> Option<BufferRef> {
        self.state().persistent_buffer(name)
    }

    /// Output of the non-persistent pass targeting `name` in the last frame.
    pub fn temp_buffer(&self, name: &str) -> Option<BufferRef> {
        self.state().temp_buffer(name)
    }

    /// Decoded `IMPORTED` image, available after the first render.
    pub fn import_buffer(&self, name: &str) -> Option<BufferRef> {
        self.state().import_buffer(name)
    }

    pub fn inputs(&self) -> Vec<InputDecl> {
        self.document()
            .map(|document| document.inputs().to_vec())
            .unwrap_or_default()
    }

    pub fn inputs_of_type(&self, kind: InputType) -> Vec<InputDecl> {
        self.document()
            .map(|document| document.inputs_of_type(kind).cloned().collect())
            .unwrap_or_default()
    }

    pub fn image_inputs(&self) -> Vec<InputDecl> {
        self.inputs_of_type(InputType::Image)
    }

    pub fn audio_inputs(&self) -> Vec<InputDecl> {
        self.document()
            .map(|document| document.audio_inputs().cloned().collect())
            .unwrap_or_default()
    }

    pub fn image_imports(&self) -> Vec<ImportDecl> {
        self.document()
            .map(|document| document.imports().to_vec())
            .unwrap_or_default()
    }

    pub fn set_always_render_to_float(&self, enabled: bool) {
        self.always_float.store(enabled, Ordering::Relaxed);
    }

    pub fn always_render_to_float(&self) -> bool {
        self.always_float.load(Ordering::Relaxed)
    }

    pub fn set_strict(&self, strict: bool) {
        self.strict.store(strict, Ordering::Relaxed);
    }

    pub fn strict(&self) -> bool {
        self.strict.load(Ordering::Relaxed)
    }

    /// Size used by `render_default`.
    pub fn set_size(&self, size: Size) {
        *self.size.lock() = size;
    }

    pub fn size(&self) -> Size {
        *self.size.lock()
    }

    /// Size of the most recent render of the bound document.
    pub fn render_size(&self) -> Option<Size> {
        self.state().render_size()
    }

    /// Renders every pass of the bound document at `size` and returns the
    /// final pass's buffer. `time` overrides the internal clock; `out`
    /// receives each pass's buffer keyed by 1-based pass index.
    pub fn render(
        &self,
        size: Size,
        time: Option<f64>,
        out: Option<&mut PassOutputs>,
    ) -> Result<BufferRef, SceneError> {
        self.render_frame(size, time, out, None)
    }

    /// Like `render`, but the final pass draws into `target`, which must be
    /// `size` pixels. Earlier passes still allocate from the scene's pool. A
    /// persistent final pass keeps drawing into its own slot and is copied
    /// into `target` afterwards.
    pub fn render_into(
        &self,
        target: &BufferRef,
        size: Size,
        time: Option<f64>,
        out: Option<&mut PassOutputs>,
    ) -> Result<(), SceneError> {
        self.render_frame(size, time, out, Some(target)).map(drop)
    }

    fn render_frame(
        &self,
        size: Size,
        time: Option<f64>,
        out: Option<&mut PassOutputs>,
        target: Option<&BufferRef>,
    ) -> Result<BufferRef, SceneError> {
        let mut state = self.render.lock();
        let Bound {
            document,
            generation,
        } = self.document.current();
        let Some(document) = document else {
            state.adopt(generation, self.pool.as_ref());
            return Err(SceneError::NoDocumentBound);
        };

        let inputs = {
            let mut store = self.inputs.lock();
            store.sync(generation);
            store.snapshot(&document)
        };
        let frame = FrameRequest {
            document: &document,
            generation,
            inputs,
            size,
            time,
            always_float: self.always_render_to_float(),
            strict: self.strict(),
            target,
        };
        let output = state.render(frame, self.pool.as_ref(), out)?;

        let mut store = self.inputs.lock();
        if store.generation() == generation {
            store.reset_events(&document);
        }
        Ok(output)
    }

    /// `render` at `size()` on the internal clock.
    pub fn render_default(&self) -> Result<BufferRef, SceneError> {
        self.render(self.size(), None, None)
    }

    /// Programs compiled since the scene was created.
    pub fn compile_count(&self) -> u64 {
        self.state().compile_count()
    }

    /// Frames rendered for the bound document.
    pub fn frame_index(&self) -> u64 {
        self.state().frame_index()
    }

    /// Bumped every time cached uniform handles are discarded.
    pub fn uniform_epoch(&self) -> u64 {
        self.state().uniform_epoch()
    }

    /// Texture-target symbols (`2`, `R`, `C`) the current program was built for.
    pub fn compiled_input_types(&self) -> Option<String> {
        self.state().compiled_descriptor()
    }

    /// Runs `f` against the backend under the render lock.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(self.render.lock().backend_mut())
    }
}
