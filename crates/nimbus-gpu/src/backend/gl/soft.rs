//! In-memory [`GlContext`] used by tests.
//!
//! Tracks the binding state a real context would, so tests can assert that
//! the backend restores whatever it touched. Fences signal when the test
//! calls [`SoftGl::complete_work`]; a one-shot failure flag simulates a lost
//! context during a fence wait.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::context::{
    consts, GlBuffer, GlContext, GlFence, GlFramebuffer, GlProgram, GlSampler, GlShader, GlTexture,
};

struct ShaderObj {
    source: String,
    compiled: bool,
    log: String,
}

struct ProgramObj {
    shaders: Vec<GlShader>,
    linked: bool,
    log: String,
}

#[derive(Default)]
struct SoftGlState {
    next_id: u32,

    buffers: HashMap<GlBuffer, u64>,
    textures: HashSet<GlTexture>,
    samplers: HashSet<GlSampler>,
    shaders: HashMap<GlShader, ShaderObj>,
    programs: HashMap<GlProgram, ProgramObj>,
    framebuffers: HashSet<GlFramebuffer>,

    bound_buffers: HashMap<u32, GlBuffer>,
    indexed_buffers: HashMap<(u32, u32), GlBuffer>,
    active_unit: u32,
    bound_textures: HashMap<(u32, u32), GlTexture>,
    bound_samplers: HashMap<u32, GlSampler>,
    bound_framebuffers: HashMap<u32, GlFramebuffer>,
    current_program: Option<GlProgram>,
    enabled_attribs: HashSet<u32>,

    fences: HashMap<GlFence, bool>,
    fail_next_fence_wait: bool,

    draw_calls: u32,
    flush_count: u32,
}

impl SoftGlState {
    fn alloc(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct SoftGl {
    state: Rc<RefCell<SoftGlState>>,
}

impl SoftGl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals every outstanding fence, as if the GPU drained its queue.
    pub fn complete_work(&self) {
        for signaled in self.state.borrow_mut().fences.values_mut() {
            *signaled = true;
        }
    }

    /// The next `client_wait_sync` returns `WAIT_FAILED` once.
    pub fn fail_next_fence_wait(&self) {
        self.state.borrow_mut().fail_next_fence_wait = true;
    }

    pub fn draw_calls(&self) -> u32 {
        self.state.borrow().draw_calls
    }

    pub fn flush_count(&self) -> u32 {
        self.state.borrow().flush_count
    }

    pub fn enabled_attribs(&self) -> Vec<u32> {
        let mut attribs: Vec<_> = self.state.borrow().enabled_attribs.iter().copied().collect();
        attribs.sort_unstable();
        attribs
    }

    /// Framebuffer objects created and not yet deleted.
    pub fn live_framebuffers(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }
}

impl GlContext for SoftGl {
    fn create_buffer(&mut self) -> GlBuffer {
        let mut state = self.state.borrow_mut();
        let id = GlBuffer(state.alloc());
        state.buffers.insert(id, 0);
        id
    }

    fn bind_buffer(&mut self, target: u32, buffer: Option<GlBuffer>) {
        let mut state = self.state.borrow_mut();
        match buffer {
            Some(buffer) => state.bound_buffers.insert(target, buffer),
            None => state.bound_buffers.remove(&target),
        };
    }

    fn bound_buffer(&self, target: u32) -> Option<GlBuffer> {
        self.state.borrow().bound_buffers.get(&target).copied()
    }

    fn buffer_data_size(&mut self, target: u32, size: u64) {
        let mut state = self.state.borrow_mut();
        if let Some(buffer) = state.bound_buffers.get(&target).copied() {
            state.buffers.insert(buffer, size);
        }
    }

    fn buffer_sub_data(&mut self, _target: u32, _offset: u64, _data: &[u8]) {}

    fn bind_buffer_range(
        &mut self,
        target: u32,
        index: u32,
        buffer: Option<GlBuffer>,
        _offset: u64,
        _size: u64,
    ) {
        let mut state = self.state.borrow_mut();
        match buffer {
            Some(buffer) => {
                state.indexed_buffers.insert((target, index), buffer);
                // Indexed binds also latch the generic binding point.
                state.bound_buffers.insert(target, buffer);
            }
            None => {
                state.indexed_buffers.remove(&(target, index));
                state.bound_buffers.remove(&target);
            }
        }
    }

    fn bound_buffer_range(&self, target: u32, index: u32) -> Option<GlBuffer> {
        self.state
            .borrow()
            .indexed_buffers
            .get(&(target, index))
            .copied()
    }

    fn create_texture(&mut self) -> GlTexture {
        let mut state = self.state.borrow_mut();
        let id = GlTexture(state.alloc());
        state.textures.insert(id);
        id
    }

    fn active_texture(&mut self, unit: u32) {
        self.state.borrow_mut().active_unit = unit - consts::TEXTURE0;
    }

    fn active_texture_unit(&self) -> u32 {
        consts::TEXTURE0 + self.state.borrow().active_unit
    }

    fn bind_texture(&mut self, target: u32, texture: Option<GlTexture>) {
        let mut state = self.state.borrow_mut();
        let unit = state.active_unit;
        match texture {
            Some(texture) => state.bound_textures.insert((unit, target), texture),
            None => state.bound_textures.remove(&(unit, target)),
        };
    }

    fn bound_texture(&self, unit: u32, target: u32) -> Option<GlTexture> {
        self.state
            .borrow()
            .bound_textures
            .get(&(unit, target))
            .copied()
    }

    fn tex_storage_2d(&mut self, _target: u32, _levels: u32, _internal: u32, _w: u32, _h: u32) {}

    fn tex_sub_image_2d(
        &mut self,
        _target: u32,
        _level: u32,
        _x: u32,
        _y: u32,
        _w: u32,
        _h: u32,
        _format: u32,
        _ty: u32,
        _data: &[u8],
    ) {
    }

    fn create_sampler(&mut self) -> GlSampler {
        let mut state = self.state.borrow_mut();
        let id = GlSampler(state.alloc());
        state.samplers.insert(id);
        id
    }

    fn sampler_parameter_u32(&mut self, _sampler: GlSampler, _pname: u32, _value: u32) {}

    fn bind_sampler(&mut self, unit: u32, sampler: Option<GlSampler>) {
        let mut state = self.state.borrow_mut();
        match sampler {
            Some(sampler) => state.bound_samplers.insert(unit, sampler),
            None => state.bound_samplers.remove(&unit),
        };
    }

    fn create_shader(&mut self, _ty: u32) -> GlShader {
        let mut state = self.state.borrow_mut();
        let id = GlShader(state.alloc());
        state.shaders.insert(
            id,
            ShaderObj {
                source: String::new(),
                compiled: false,
                log: String::new(),
            },
        );
        id
    }

    fn shader_source(&mut self, shader: GlShader, source: &str) {
        if let Some(obj) = self.state.borrow_mut().shaders.get_mut(&shader) {
            obj.source = source.to_owned();
        }
    }

    fn compile_shader(&mut self, shader: GlShader) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(obj) = state.shaders.get_mut(&shader) else {
            return false;
        };
        // `#error` makes compilation fail, like a real preprocessor.
        if obj.source.contains("#error") {
            obj.compiled = false;
            obj.log = "ERROR: preprocessor #error directive".to_owned();
        } else {
            obj.compiled = true;
            obj.log.clear();
        }
        obj.compiled
    }

    fn shader_info_log(&self, shader: GlShader) -> String {
        self.state
            .borrow()
            .shaders
            .get(&shader)
            .map(|obj| obj.log.clone())
            .unwrap_or_default()
    }

    fn create_program(&mut self) -> GlProgram {
        let mut state = self.state.borrow_mut();
        let id = GlProgram(state.alloc());
        state.programs.insert(
            id,
            ProgramObj {
                shaders: Vec::new(),
                linked: false,
                log: String::new(),
            },
        );
        id
    }

    fn attach_shader(&mut self, program: GlProgram, shader: GlShader) {
        if let Some(obj) = self.state.borrow_mut().programs.get_mut(&program) {
            obj.shaders.push(shader);
        }
    }

    fn link_program(&mut self, program: GlProgram) -> bool {
        let mut state = self.state.borrow_mut();
        let all_compiled = state
            .programs
            .get(&program)
            .map(|obj| {
                obj.shaders
                    .iter()
                    .all(|s| state.shaders.get(s).is_some_and(|sh| sh.compiled))
            })
            .unwrap_or(false);
        if let Some(obj) = state.programs.get_mut(&program) {
            obj.linked = all_compiled;
            obj.log = if all_compiled {
                String::new()
            } else {
                "ERROR: attached shader failed to compile".to_owned()
            };
        }
        all_compiled
    }

    fn program_info_log(&self, program: GlProgram) -> String {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|obj| obj.log.clone())
            .unwrap_or_default()
    }

    fn use_program(&mut self, program: Option<GlProgram>) {
        self.state.borrow_mut().current_program = program;
    }

    fn current_program(&self) -> Option<GlProgram> {
        self.state.borrow().current_program
    }

    fn create_framebuffer(&mut self) -> GlFramebuffer {
        let mut state = self.state.borrow_mut();
        let id = GlFramebuffer(state.alloc());
        state.framebuffers.insert(id);
        id
    }

    fn delete_framebuffer(&mut self, framebuffer: GlFramebuffer) {
        let mut state = self.state.borrow_mut();
        state.framebuffers.remove(&framebuffer);
        // Deleting unbinds, per GL semantics.
        state.bound_framebuffers.retain(|_, fb| *fb != framebuffer);
    }

    fn bind_framebuffer(&mut self, target: u32, framebuffer: Option<GlFramebuffer>) {
        let mut state = self.state.borrow_mut();
        match framebuffer {
            Some(fb) => state.bound_framebuffers.insert(target, fb),
            None => state.bound_framebuffers.remove(&target),
        };
    }

    fn bound_framebuffer(&self, target: u32) -> Option<GlFramebuffer> {
        self.state
            .borrow()
            .bound_framebuffers
            .get(&target)
            .copied()
    }

    fn framebuffer_texture_2d(
        &mut self,
        _target: u32,
        _attachment: u32,
        _textarget: u32,
        _texture: Option<GlTexture>,
        _level: u32,
    ) {
    }

    fn enable(&mut self, _cap: u32) {}
    fn disable(&mut self, _cap: u32) {}
    fn depth_func(&mut self, _func: u32) {}
    fn depth_mask(&mut self, _enabled: bool) {}
    fn blend_func(&mut self, _src: u32, _dst: u32) {}
    fn blend_equation(&mut self, _mode: u32) {}
    fn cull_face(&mut self, _mode: u32) {}
    fn front_face(&mut self, _mode: u32) {}
    fn color_mask(&mut self, _r: bool, _g: bool, _b: bool, _a: bool) {}
    fn clear_color(&mut self, _r: f32, _g: f32, _b: f32, _a: f32) {}
    fn clear_depth(&mut self, _depth: f32) {}
    fn clear(&mut self, _mask: u32) {}
    fn viewport(&mut self, _x: i32, _y: i32, _w: i32, _h: i32) {}

    fn vertex_attrib_pointer(
        &mut self,
        _location: u32,
        _size: u32,
        _ty: u32,
        _normalized: bool,
        _stride: u32,
        _offset: u64,
    ) {
    }

    fn enable_vertex_attrib_array(&mut self, location: u32) {
        self.state.borrow_mut().enabled_attribs.insert(location);
    }

    fn disable_vertex_attrib_array(&mut self, location: u32) {
        self.state.borrow_mut().enabled_attribs.remove(&location);
    }

    fn vertex_attrib_divisor(&mut self, _location: u32, _divisor: u32) {}

    fn draw_arrays(&mut self, _mode: u32, _first: u32, _count: u32) {
        self.state.borrow_mut().draw_calls += 1;
    }

    fn draw_elements(&mut self, _mode: u32, _count: u32, _ty: u32, _offset: u64) {
        self.state.borrow_mut().draw_calls += 1;
    }

    fn draw_arrays_instanced(&mut self, _mode: u32, _first: u32, _count: u32, _instances: u32) {
        self.state.borrow_mut().draw_calls += 1;
    }

    fn draw_elements_instanced(
        &mut self,
        _mode: u32,
        _count: u32,
        _ty: u32,
        _offset: u64,
        _instances: u32,
    ) {
        self.state.borrow_mut().draw_calls += 1;
    }

    fn fence_sync(&mut self) -> GlFence {
        let mut state = self.state.borrow_mut();
        let id = GlFence(state.alloc());
        state.fences.insert(id, false);
        id
    }

    fn client_wait_sync(&mut self, fence: GlFence, _timeout_ns: u64) -> u32 {
        let mut state = self.state.borrow_mut();
        if state.fail_next_fence_wait {
            state.fail_next_fence_wait = false;
            return consts::WAIT_FAILED;
        }
        match state.fences.get(&fence) {
            Some(true) => consts::ALREADY_SIGNALED,
            Some(false) => consts::TIMEOUT_EXPIRED,
            None => consts::WAIT_FAILED,
        }
    }

    fn delete_sync(&mut self, fence: GlFence) {
        self.state.borrow_mut().fences.remove(&fence);
    }

    fn flush(&mut self) {
        self.state.borrow_mut().flush_count += 1;
    }
}
