use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use scene::isfdoc::{ShaderDocument, TextureTarget};
use scene::{
    BufferPool, BufferRef, HeadlessBackend, HostBufferPool, InputValue, PassOutputs, PoolError,
    Precision, Scene, SceneError, Size, UniformValue,
};

const SOLID: &str = r#"/*{
    "INPUTS": [
        { "NAME": "level", "TYPE": "float", "DEFAULT": 0.25 },
        { "NAME": "flash", "TYPE": "event" }
    ]
}*/
void main() { gl_FragColor = vec4(level); }
"#;

const SAMPLER: &str = r#"/*{
    "INPUTS": [ { "NAME": "tex", "TYPE": "image" } ]
}*/
void main() { gl_FragColor = IMG_THIS_NORM_PIXEL(tex); }
"#;

const FEEDBACK: &str = r#"/*{
    "PASSES": [
        { "TARGET": "trail", "PERSISTENT": true },
        { "TARGET": "blur" },
        {}
    ]
}*/
void main() {
    if (PASSINDEX == 1) gl_FragColor = IMG_THIS_NORM_PIXEL(trail) * 0.9;
    else if (PASSINDEX == 2) gl_FragColor = IMG_THIS_NORM_PIXEL(trail);
    else gl_FragColor = IMG_THIS_NORM_PIXEL(blur);
}
"#;

const LAYERED: &str = r#"/*{
    "PASSES": [
        { "TARGET": "a" },
        { "TARGET": "b", "PERSISTENT": true },
        {}
    ]
}*/
void main() {
    if (PASSINDEX == 1) gl_FragColor = IMG_THIS_NORM_PIXEL(b);
    else if (PASSINDEX == 2) gl_FragColor = IMG_THIS_NORM_PIXEL(a);
    else gl_FragColor = IMG_THIS_NORM_PIXEL(b);
}
"#;

const ACCUMULATE: &str = r#"/*{
    "PASSES": [ { "TARGET": "sum", "PERSISTENT": true } ]
}*/
void main() { gl_FragColor = IMG_THIS_NORM_PIXEL(sum) + vec4(0.01); }
"#;

/// Host pool whose `acquire` can be switched to fail.
#[derive(Default)]
struct ExhaustiblePool {
    inner: HostBufferPool,
    exhausted: AtomicBool,
}

impl BufferPool for ExhaustiblePool {
    fn acquire(&self, size: Size, precision: Precision) -> Result<BufferRef, PoolError> {
        if self.exhausted.load(Ordering::Relaxed) {
            return Err(PoolError::Device("out of texture memory".into()));
        }
        self.inner.acquire(size, precision)
    }

    fn release(&self, buffer: BufferRef) {
        self.inner.release(buffer)
    }

    fn copy(&self, buffer: &BufferRef) -> Result<BufferRef, PoolError> {
        self.inner.copy(buffer)
    }

    fn copy_into(&self, source: &BufferRef, destination: &BufferRef) -> Result<(), PoolError> {
        self.inner.copy_into(source, destination)
    }

    fn upload_rgba(&self, size: Size, pixels: &[u8]) -> Result<BufferRef, PoolError> {
        self.inner.upload_rgba(size, pixels)
    }
}

fn document(name: &str, source: &str) -> Arc<ShaderDocument> {
    Arc::new(ShaderDocument::parse(name, source, None).unwrap())
}

fn scene_with_pool() -> (Scene<HeadlessBackend>, Arc<HostBufferPool>) {
    let pool = Arc::new(HostBufferPool::new());
    let scene = Scene::with_pool(HeadlessBackend::new(), pool.clone());
    (scene, pool)
}

#[test]
fn zero_pass_document_renders_at_requested_size() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("solid", SOLID));

    for size in [Size::new(1, 1), Size::new(640, 480), Size::new(33, 7)] {
        let buffer = scene.render(size, None, None).unwrap();
        assert_eq!(buffer.size(), size);
    }
}

#[test]
fn explicit_time_drives_time_and_delta() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("solid", SOLID));
    let size = Size::new(640, 480);

    let first = scene.render(size, Some(0.0), None).unwrap();
    let second = scene.render(size, Some(1.0), None).unwrap();
    assert_eq!(first.size(), size);
    assert_eq!(second.size(), size);

    scene.with_backend(|backend| {
        let draw = backend.last_draw().unwrap();
        assert_eq!(draw.uniform("TIME"), Some(UniformValue::Float(1.0)));
        assert_eq!(draw.uniform("TIMEDELTA"), Some(UniformValue::Float(1.0)));
        assert_eq!(draw.uniform("RENDERSIZE"), Some(UniformValue::Vec2([640.0, 480.0])));
        assert_eq!(draw.viewport, size);
    });
}

#[test]
fn render_after_unbind_reports_no_document() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("solid", SOLID));
    scene.render(Size::new(8, 8), None, None).unwrap();

    scene.unbind();
    let err = scene.render(Size::new(8, 8), None, None).unwrap_err();
    assert!(matches!(err, SceneError::NoDocumentBound));
    assert!(scene.document().is_none());
}

#[test]
fn rejected_values_leave_inputs_unchanged() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("solid", SOLID));
    scene.set_value("level", InputValue::Float(0.5)).unwrap();

    let unknown = scene.set_value("missing", InputValue::Float(1.0)).unwrap_err();
    assert!(matches!(unknown, SceneError::UnknownInput(name) if name == "missing"));

    let mismatch = scene.set_value("level", InputValue::Bool(true)).unwrap_err();
    assert!(matches!(mismatch, SceneError::TypeMismatch { ref input, .. } if input == "level"));

    let matrix = scene
        .set_value("level", InputValue::Matrix2([1.0, 0.0, 0.0, 1.0]))
        .unwrap_err();
    assert!(matches!(matrix, SceneError::TypeMismatch { found: "mat2", .. }));

    assert_eq!(scene.value("level").unwrap(), Some(InputValue::Float(0.5)));
}

#[test]
fn defaults_apply_until_set_and_events_reset_after_render() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("solid", SOLID));
    assert_eq!(scene.value("level").unwrap(), Some(InputValue::Float(0.25)));

    scene.set_value("flash", InputValue::Bool(true)).unwrap();
    scene.render(Size::new(4, 4), None, None).unwrap();
    scene.with_backend(|backend| {
        let draw = backend.last_draw().unwrap();
        assert_eq!(draw.uniform("flash"), Some(UniformValue::Bool(true)));
        assert_eq!(draw.uniform("level"), Some(UniformValue::Float(0.25)));
    });
    assert_eq!(scene.value("flash").unwrap(), Some(InputValue::Bool(false)));
}

#[test]
fn frame_index_strictly_increases() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("solid", SOLID));

    let mut seen = Vec::new();
    for _ in 0..4 {
        scene.render(Size::new(4, 4), None, None).unwrap();
        let frame = scene.with_backend(|backend| backend.last_draw().unwrap().uniform("FRAMEINDEX"));
        seen.push(frame);
    }
    assert_eq!(
        seen,
        (0..4).map(|i| Some(UniformValue::Int(i))).collect::<Vec<_>>()
    );
    assert_eq!(scene.frame_index(), 4);
}

#[test]
fn changing_texture_target_recompiles_once() {
    let (scene, pool) = scene_with_pool();
    scene.bind(document("sampler", SAMPLER));

    let flat = pool.acquire(Size::new(16, 16), Precision::Standard).unwrap();
    scene.set_image_input("tex", flat.clone()).unwrap();
    scene.render(Size::new(8, 8), None, None).unwrap();
    scene.render(Size::new(8, 8), None, None).unwrap();
    assert_eq!(scene.compile_count(), 1);
    assert_eq!(scene.compiled_input_types().as_deref(), Some("2"));
    let epoch_before = scene.uniform_epoch();
    let program_before = scene.with_backend(|backend| backend.last_draw().unwrap().program);

    let cube = pool
        .create_with_target(Size::new(16, 16), Precision::Standard, TextureTarget::Cube)
        .unwrap();
    scene.set_image_input("tex", cube.clone()).unwrap();
    scene.render(Size::new(8, 8), None, None).unwrap();

    assert_eq!(scene.compile_count(), 2);
    assert_eq!(scene.compiled_input_types().as_deref(), Some("C"));
    assert!(scene.uniform_epoch() > epoch_before);
    scene.with_backend(|backend| {
        let draw = backend.last_draw().unwrap();
        assert_ne!(draw.program, program_before);
        assert_eq!(draw.texture("tex"), Some(cube.id()));
        assert_eq!(draw.uniform("_tex_imgSize"), Some(UniformValue::Vec2([16.0, 16.0])));
        assert_eq!(backend.stale_uses(), 0);
        assert_eq!(
            backend.compiled().last().map(|variant| variant.targets.clone()),
            Some(vec![TextureTarget::Cube])
        );
    });

    // Same target again: no further compile.
    let other_cube = pool
        .create_with_target(Size::new(32, 32), Precision::Standard, TextureTarget::Cube)
        .unwrap();
    scene.set_image_input("tex", other_cube).unwrap();
    scene.render(Size::new(8, 8), None, None).unwrap();
    assert_eq!(scene.compile_count(), 2);
}

#[test]
fn unbound_sampled_image_is_unresolved() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("sampler", SAMPLER));

    let err = scene.render(Size::new(8, 8), None, None).unwrap_err();
    assert!(matches!(
        err,
        SceneError::UnresolvedInput { ref input, pass: 1 } if input == "tex"
    ));
    scene.with_backend(|backend| assert!(backend.draws().is_empty()));
}

#[test]
fn compile_failure_fails_the_render_and_retries_next_time() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("solid", SOLID));
    scene.with_backend(|backend| backend.fail_next_compile("syntax error"));

    let err = scene.render(Size::new(8, 8), None, None).unwrap_err();
    assert!(matches!(err, SceneError::CompilationFailed(_)));
    assert_eq!(scene.compile_count(), 0);
    assert!(scene.compiled_input_types().is_none());

    scene.render(Size::new(8, 8), None, None).unwrap();
    assert_eq!(scene.compile_count(), 1);
}

#[test]
fn passes_are_indexed_from_one() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("feedback", FEEDBACK));

    let mut outputs = PassOutputs::new();
    let last = scene.render(Size::new(8, 8), None, Some(&mut outputs)).unwrap();
    assert_eq!(outputs.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(outputs[&3].id(), last.id());
    assert_eq!(
        scene.persistent_buffer("trail").map(|buffer| buffer.id()),
        Some(outputs[&1].id())
    );
    assert_eq!(
        scene.temp_buffer("blur").map(|buffer| buffer.id()),
        Some(outputs[&2].id())
    );

    scene.with_backend(|backend| {
        let indices: Vec<_> = backend
            .draws()
            .iter()
            .map(|draw| draw.uniform("PASSINDEX"))
            .collect();
        assert_eq!(
            indices,
            vec![
                Some(UniformValue::Int(1)),
                Some(UniformValue::Int(2)),
                Some(UniformValue::Int(3)),
            ]
        );
        let draws = backend.draws();
        assert_eq!(draws[1].texture("trail"), Some(outputs[&1].id()));
        assert_eq!(draws[2].texture("blur"), Some(outputs[&2].id()));
    });
}

#[test]
fn persistent_buffer_survives_frames_at_same_size() {
    let (scene, pool) = scene_with_pool();
    scene.bind(document("feedback", FEEDBACK));
    let size = Size::new(8, 8);

    scene.render(size, None, None).unwrap();
    let trail = scene.persistent_buffer("trail").unwrap();
    // A fresh slot is never copied or sampled by its own pass.
    assert!(pool.copies().is_empty());
    scene.with_backend(|backend| assert_eq!(backend.draws()[0].texture("trail"), None));

    scene.render(size, None, None).unwrap();
    assert_eq!(scene.persistent_buffer("trail").unwrap().id(), trail.id());
    let copies = pool.copies();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].0, trail.id());

    scene.with_backend(|backend| {
        let draws = backend.draws();
        // Frame two, pass one reads the copy of frame one's output.
        assert_eq!(draws[3].texture("trail"), Some(copies[0].1));
        assert_eq!(backend.content(trail.id()), &[0, 3]);
    });
}

#[test]
fn size_change_discards_persistent_content() {
    let (scene, pool) = scene_with_pool();
    scene.bind(document("feedback", FEEDBACK));

    scene.render(Size::new(8, 8), None, None).unwrap();
    scene.render(Size::new(8, 8), None, None).unwrap();
    let old = scene.persistent_buffer("trail").unwrap();

    scene.render(Size::new(16, 16), None, None).unwrap();
    let resized = scene.persistent_buffer("trail").unwrap();
    assert_ne!(resized.id(), old.id());
    assert_eq!(resized.size(), Size::new(16, 16));
    assert_eq!(scene.render_size(), Some(Size::new(16, 16)));
    assert_eq!(pool.copies().len(), 1);

    scene.with_backend(|backend| {
        let draws = backend.draws();
        assert_eq!(draws[6].texture("trail"), None);
        assert_eq!(backend.content(resized.id()), &[6]);
    });
}

#[test]
fn document_swap_releases_state_and_restarts_clock() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("feedback", FEEDBACK));
    scene.render(Size::new(8, 8), None, None).unwrap();
    scene.render(Size::new(8, 8), None, None).unwrap();
    assert!(scene.persistent_buffer("trail").is_some());

    scene.bind(document("solid", SOLID));
    assert!(scene.persistent_buffer("trail").is_none());
    assert_eq!(scene.frame_index(), 0);
    assert_eq!(scene.render_size(), None);

    scene.render(Size::new(8, 8), None, None).unwrap();
    assert_eq!(scene.compile_count(), 2);
    scene.with_backend(|backend| {
        assert_eq!(
            backend.last_draw().unwrap().uniform("FRAMEINDEX"),
            Some(UniformValue::Int(0))
        );
        assert_eq!(backend.stale_uses(), 0);
    });
}

#[test]
fn always_float_promotes_every_pass() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("feedback", FEEDBACK));

    let standard = scene.render(Size::new(4, 4), None, None).unwrap();
    assert_eq!(standard.precision(), Precision::Standard);

    scene.set_always_render_to_float(true);
    let mut outputs = PassOutputs::new();
    scene.render(Size::new(4, 4), None, Some(&mut outputs)).unwrap();
    assert!(outputs.values().all(|buffer| buffer.precision() == Precision::Float));
}

#[test]
fn render_default_uses_configured_size() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("solid", SOLID));
    assert_eq!(scene.size(), Size::new(640, 480));

    scene.set_size(Size::new(320, 200));
    let buffer = scene.render_default().unwrap();
    assert_eq!(buffer.size(), Size::new(320, 200));
}

#[test]
fn binding_from_other_threads_is_atomic() {
    let scene = Arc::new(Scene::new(HeadlessBackend::new()));
    let solid = document("solid", SOLID);
    let feedback = document("feedback", FEEDBACK);
    scene.bind(solid.clone());

    let binder = {
        let scene = Arc::clone(&scene);
        std::thread::spawn(move || {
            for i in 0..50 {
                let next = if i % 2 == 0 { &feedback } else { &solid };
                scene.bind(next.clone());
            }
        })
    };
    for _ in 0..50 {
        let buffer = scene.render(Size::new(4, 4), None, None).unwrap();
        assert_eq!(buffer.size(), Size::new(4, 4));
    }
    binder.join().unwrap();
    scene.with_backend(|backend| assert_eq!(backend.stale_uses(), 0));
}

#[test]
fn failed_render_does_not_advance_the_clock() {
    let (scene, pool) = scene_with_pool();
    scene.bind(document("sampler", SAMPLER));
    let flat = pool.acquire(Size::new(4, 4), Precision::Standard).unwrap();
    scene.set_image_input("tex", flat).unwrap();
    scene.render(Size::new(8, 8), Some(0.0), None).unwrap();

    let cube = pool
        .create_with_target(Size::new(4, 4), Precision::Standard, TextureTarget::Cube)
        .unwrap();
    scene.set_image_input("tex", cube).unwrap();
    scene.with_backend(|backend| backend.fail_next_compile("syntax error"));
    let err = scene.render(Size::new(8, 8), Some(1.0), None).unwrap_err();
    assert!(matches!(err, SceneError::CompilationFailed(_)));
    assert_eq!(scene.frame_index(), 1);

    scene.render(Size::new(8, 8), Some(2.0), None).unwrap();
    scene.with_backend(|backend| {
        let draw = backend.last_draw().unwrap();
        assert_eq!(draw.uniform("TIMEDELTA"), Some(UniformValue::Float(2.0)));
        assert_eq!(draw.uniform("FRAMEINDEX"), Some(UniformValue::Int(1)));
    });
}

#[test]
fn reallocated_slot_is_unbound_until_its_pass_draws() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("layered", LAYERED));

    scene.render(Size::new(8, 8), None, None).unwrap();
    scene.render(Size::new(16, 16), None, None).unwrap();
    scene.render(Size::new(8, 8), None, None).unwrap();
    let slot = scene.persistent_buffer("b").unwrap();
    assert_eq!(slot.size(), Size::new(8, 8));
    scene.render(Size::new(8, 8), None, None).unwrap();

    scene.with_backend(|backend| {
        let draws = backend.draws();
        assert_eq!(draws.len(), 12);
        // Frames one to three: pass 1 runs before `b` holds anything at this size.
        for first in [0, 3, 6] {
            assert_eq!(draws[first].texture("b"), None);
        }
        assert_eq!(draws[7].target, slot.id());
        assert_eq!(draws[8].texture("b"), Some(slot.id()));
        // Frame four: the slot now holds frame three's output.
        assert_eq!(draws[9].texture("b"), Some(slot.id()));
    });
}

#[test]
fn render_into_draws_the_final_pass_into_the_given_buffer() {
    let (scene, pool) = scene_with_pool();
    scene.bind(document("feedback", FEEDBACK));
    let target = pool.acquire(Size::new(8, 8), Precision::Standard).unwrap();

    let mut outputs = PassOutputs::new();
    scene
        .render_into(&target, Size::new(8, 8), Some(0.5), Some(&mut outputs))
        .unwrap();
    assert_eq!(outputs[&3].id(), target.id());
    assert_ne!(outputs[&2].id(), target.id());
    assert_eq!(scene.frame_index(), 1);
    scene.with_backend(|backend| {
        let draw = backend.last_draw().unwrap();
        assert_eq!(draw.target, target.id());
        assert_eq!(draw.texture("blur"), Some(outputs[&2].id()));
    });

    // The caller keeps its buffer: later frames never hand it out again.
    let next = scene.render(Size::new(8, 8), None, None).unwrap();
    assert_ne!(next.id(), target.id());

    let err = scene
        .render_into(&target, Size::new(16, 16), None, None)
        .unwrap_err();
    assert!(matches!(
        err,
        SceneError::TargetSize { expected, actual }
            if expected == Size::new(16, 16) && actual == Size::new(8, 8)
    ));
    assert_eq!(scene.frame_index(), 2);
}

#[test]
fn render_into_copies_a_persistent_final_pass() {
    let (scene, pool) = scene_with_pool();
    scene.bind(document("accumulate", ACCUMULATE));
    let target = pool.acquire(Size::new(4, 4), Precision::Standard).unwrap();

    scene.render_into(&target, Size::new(4, 4), None, None).unwrap();
    let sum = scene.persistent_buffer("sum").unwrap();
    assert_ne!(sum.id(), target.id());
    assert_eq!(pool.copies(), vec![(sum.id(), target.id())]);
    scene.with_backend(|backend| assert_eq!(backend.last_draw().unwrap().target, sum.id()));
}

#[test]
fn empty_render_size_is_an_allocation_failure() {
    for source in [SOLID, FEEDBACK] {
        let scene = Scene::new(HeadlessBackend::new());
        scene.bind(document("doc", source));

        let err = scene.render(Size::new(0, 4), None, None).unwrap_err();
        assert!(matches!(
            err,
            SceneError::AllocationFailed(PoolError::InvalidSize { width: 0, height: 4 })
        ));
        assert_eq!(scene.frame_index(), 0);

        let buffer = scene.render(Size::new(4, 4), None, None).unwrap();
        assert_eq!(buffer.size(), Size::new(4, 4));
        assert_eq!(scene.frame_index(), 1);
    }
}

#[test]
fn pool_exhaustion_fails_the_frame_and_recovers() {
    let pool = Arc::new(ExhaustiblePool::default());
    let scene = Scene::with_pool(HeadlessBackend::new(), pool.clone());
    scene.bind(document("feedback", FEEDBACK));
    scene.render(Size::new(8, 8), None, None).unwrap();

    pool.exhausted.store(true, Ordering::Relaxed);
    let err = scene.render(Size::new(8, 8), None, None).unwrap_err();
    assert!(matches!(err, SceneError::AllocationFailed(PoolError::Device(_))));
    assert_eq!(scene.frame_index(), 1);

    pool.exhausted.store(false, Ordering::Relaxed);
    scene.render(Size::new(8, 8), None, None).unwrap();
    assert_eq!(scene.frame_index(), 2);
}

#[test]
fn failed_draw_returns_the_pass_target_to_the_pool() {
    let (scene, pool) = scene_with_pool();
    scene.bind(document("solid", SOLID));
    scene.render(Size::new(4, 4), None, None).unwrap();

    scene.with_backend(|backend| backend.fail_next_draw("device lost"));
    let err = scene.render(Size::new(4, 4), None, None).unwrap_err();
    assert!(matches!(err, SceneError::Backend(_)));
    assert_eq!(pool.allocations(), 1);
    assert_eq!(pool.free_buffers(), 1);

    scene.render(Size::new(4, 4), None, None).unwrap();
    assert_eq!(pool.allocations(), 1);
}

#[test]
fn failed_draw_returns_the_persistent_copy_to_the_pool() {
    let (scene, pool) = scene_with_pool();
    scene.bind(document("feedback", FEEDBACK));
    scene.render(Size::new(8, 8), None, None).unwrap();

    scene.with_backend(|backend| backend.fail_next_draw("device lost"));
    assert!(scene.render(Size::new(8, 8), None, None).is_err());
    assert_eq!(pool.copies().len(), 1);
    // Frame one's two temporaries plus the copy made for pass 1.
    assert_eq!(pool.free_buffers(), 3);
}

#[test]
fn queries_forget_the_previous_document_even_mid_frame() {
    let scene = Scene::new(HeadlessBackend::new());
    scene.bind(document("feedback", FEEDBACK));
    scene.render(Size::new(8, 8), None, None).unwrap();
    scene.render(Size::new(8, 8), None, None).unwrap();
    assert_eq!(scene.frame_index(), 2);

    // The render lock is held, so the swap cannot release state right away.
    scene.with_backend(|_| scene.bind(document("solid", SOLID)));

    assert_eq!(scene.frame_index(), 0);
    assert_eq!(scene.render_size(), None);
    assert_eq!(scene.compiled_input_types(), None);
    assert!(scene.persistent_buffer("trail").is_none());
    assert!(scene.temp_buffer("blur").is_none());
}
