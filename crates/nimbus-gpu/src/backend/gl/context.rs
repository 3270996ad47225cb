//! Narrow GL context trait the emulation backend drives.
//!
//! Mirrors the subset of the GLES 3.0 API the backend needs, with raw GLenum
//! parameters so the mapping tables stay in one place. Production wires this
//! to a real context; tests use the in-memory [`super::SoftGl`].

/// GLenum constants used by the backend. Values match the GLES 3.0 spec.
pub mod consts {
    pub const ARRAY_BUFFER: u32 = 0x8892;
    pub const ELEMENT_ARRAY_BUFFER: u32 = 0x8893;
    pub const UNIFORM_BUFFER: u32 = 0x8A11;
    pub const COPY_WRITE_BUFFER: u32 = 0x8F37;

    pub const TEXTURE_2D: u32 = 0x0DE1;
    pub const TEXTURE0: u32 = 0x84C0;

    pub const FRAMEBUFFER: u32 = 0x8D40;
    pub const COLOR_ATTACHMENT0: u32 = 0x8CE0;
    pub const DEPTH_ATTACHMENT: u32 = 0x8D00;

    pub const R8: u32 = 0x8229;
    pub const RG8: u32 = 0x822B;
    pub const RGBA8: u32 = 0x8058;
    pub const RGBA16F: u32 = 0x881A;
    pub const RGBA32F: u32 = 0x8814;
    pub const DEPTH_COMPONENT24: u32 = 0x81A6;
    pub const DEPTH_COMPONENT32F: u32 = 0x8CAC;

    pub const RED: u32 = 0x1903;
    pub const RG: u32 = 0x8227;
    pub const RGBA: u32 = 0x1908;
    pub const DEPTH_COMPONENT: u32 = 0x1902;

    pub const UNSIGNED_BYTE: u32 = 0x1401;
    pub const UNSIGNED_SHORT: u32 = 0x1403;
    pub const UNSIGNED_INT: u32 = 0x1405;
    pub const FLOAT: u32 = 0x1406;
    pub const HALF_FLOAT: u32 = 0x140B;
    pub const INT: u32 = 0x1404;

    pub const NEVER: u32 = 0x0200;
    pub const LESS: u32 = 0x0201;
    pub const EQUAL: u32 = 0x0202;
    pub const LEQUAL: u32 = 0x0203;
    pub const GREATER: u32 = 0x0204;
    pub const NOTEQUAL: u32 = 0x0205;
    pub const GEQUAL: u32 = 0x0206;
    pub const ALWAYS: u32 = 0x0207;

    pub const CLAMP_TO_EDGE: u32 = 0x812F;
    pub const REPEAT: u32 = 0x2901;
    pub const MIRRORED_REPEAT: u32 = 0x8370;
    pub const NEAREST: u32 = 0x2600;
    pub const LINEAR: u32 = 0x2601;

    pub const TEXTURE_MAG_FILTER: u32 = 0x2800;
    pub const TEXTURE_MIN_FILTER: u32 = 0x2801;
    pub const TEXTURE_WRAP_S: u32 = 0x2802;
    pub const TEXTURE_WRAP_T: u32 = 0x2803;
    pub const TEXTURE_WRAP_R: u32 = 0x8072;
    pub const TEXTURE_COMPARE_MODE: u32 = 0x884C;
    pub const TEXTURE_COMPARE_FUNC: u32 = 0x884D;
    pub const COMPARE_REF_TO_TEXTURE: u32 = 0x884E;

    pub const ZERO: u32 = 0;
    pub const ONE: u32 = 1;
    pub const SRC_COLOR: u32 = 0x0300;
    pub const ONE_MINUS_SRC_COLOR: u32 = 0x0301;
    pub const SRC_ALPHA: u32 = 0x0302;
    pub const ONE_MINUS_SRC_ALPHA: u32 = 0x0303;
    pub const DST_ALPHA: u32 = 0x0304;
    pub const ONE_MINUS_DST_ALPHA: u32 = 0x0305;
    pub const DST_COLOR: u32 = 0x0306;
    pub const ONE_MINUS_DST_COLOR: u32 = 0x0307;

    pub const FUNC_ADD: u32 = 0x8006;
    pub const MIN: u32 = 0x8007;
    pub const MAX: u32 = 0x8008;
    pub const FUNC_SUBTRACT: u32 = 0x800A;
    pub const FUNC_REVERSE_SUBTRACT: u32 = 0x800B;

    pub const POINTS: u32 = 0x0000;
    pub const LINES: u32 = 0x0001;
    pub const LINE_STRIP: u32 = 0x0003;
    pub const TRIANGLES: u32 = 0x0004;
    pub const TRIANGLE_STRIP: u32 = 0x0005;

    pub const FRONT: u32 = 0x0404;
    pub const BACK: u32 = 0x0405;
    pub const CW: u32 = 0x0900;
    pub const CCW: u32 = 0x0901;

    pub const CULL_FACE: u32 = 0x0B44;
    pub const DEPTH_TEST: u32 = 0x0B71;
    pub const BLEND: u32 = 0x0BE2;

    pub const VERTEX_SHADER: u32 = 0x8B31;
    pub const FRAGMENT_SHADER: u32 = 0x8B30;

    pub const COLOR_BUFFER_BIT: u32 = 0x4000;
    pub const DEPTH_BUFFER_BIT: u32 = 0x0100;

    pub const ALREADY_SIGNALED: u32 = 0x911A;
    pub const TIMEOUT_EXPIRED: u32 = 0x911B;
    pub const CONDITION_SATISFIED: u32 = 0x911C;
    pub const WAIT_FAILED: u32 = 0x911D;
}

macro_rules! gl_object {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);
    };
}

gl_object!(GlBuffer);
gl_object!(GlTexture);
gl_object!(GlSampler);
gl_object!(GlShader);
gl_object!(GlProgram);
gl_object!(GlFramebuffer);
gl_object!(GlFence);

pub trait GlContext {
    // Buffers.
    fn create_buffer(&mut self) -> GlBuffer;
    fn bind_buffer(&mut self, target: u32, buffer: Option<GlBuffer>);
    fn bound_buffer(&self, target: u32) -> Option<GlBuffer>;
    fn buffer_data_size(&mut self, target: u32, size: u64);
    fn buffer_sub_data(&mut self, target: u32, offset: u64, data: &[u8]);
    /// Binds to the indexed slot and, per GL semantics, also rebinds the
    /// generic `target` binding point.
    fn bind_buffer_range(
        &mut self,
        target: u32,
        index: u32,
        buffer: Option<GlBuffer>,
        offset: u64,
        size: u64,
    );
    fn bound_buffer_range(&self, target: u32, index: u32) -> Option<GlBuffer>;

    // Textures.
    fn create_texture(&mut self) -> GlTexture;
    fn active_texture(&mut self, unit: u32);
    /// Returns the selected unit as the same `TEXTURE0 + n` enum
    /// [`active_texture`](Self::active_texture) takes.
    fn active_texture_unit(&self) -> u32;
    fn bind_texture(&mut self, target: u32, texture: Option<GlTexture>);
    fn bound_texture(&self, unit: u32, target: u32) -> Option<GlTexture>;
    fn tex_storage_2d(&mut self, target: u32, levels: u32, internal_format: u32, w: u32, h: u32);
    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image_2d(
        &mut self,
        target: u32,
        level: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        format: u32,
        ty: u32,
        data: &[u8],
    );

    // Samplers.
    fn create_sampler(&mut self) -> GlSampler;
    fn sampler_parameter_u32(&mut self, sampler: GlSampler, pname: u32, value: u32);
    fn bind_sampler(&mut self, unit: u32, sampler: Option<GlSampler>);

    // Shaders and programs.
    fn create_shader(&mut self, ty: u32) -> GlShader;
    fn shader_source(&mut self, shader: GlShader, source: &str);
    fn compile_shader(&mut self, shader: GlShader) -> bool;
    fn shader_info_log(&self, shader: GlShader) -> String;
    fn create_program(&mut self) -> GlProgram;
    fn attach_shader(&mut self, program: GlProgram, shader: GlShader);
    fn link_program(&mut self, program: GlProgram) -> bool;
    fn program_info_log(&self, program: GlProgram) -> String;
    fn use_program(&mut self, program: Option<GlProgram>);
    fn current_program(&self) -> Option<GlProgram>;

    // Framebuffers.
    fn create_framebuffer(&mut self) -> GlFramebuffer;
    fn delete_framebuffer(&mut self, framebuffer: GlFramebuffer);
    fn bind_framebuffer(&mut self, target: u32, framebuffer: Option<GlFramebuffer>);
    fn bound_framebuffer(&self, target: u32) -> Option<GlFramebuffer>;
    fn framebuffer_texture_2d(
        &mut self,
        target: u32,
        attachment: u32,
        textarget: u32,
        texture: Option<GlTexture>,
        level: u32,
    );

    // Fixed-function state.
    fn enable(&mut self, cap: u32);
    fn disable(&mut self, cap: u32);
    fn depth_func(&mut self, func: u32);
    fn depth_mask(&mut self, enabled: bool);
    fn blend_func(&mut self, src: u32, dst: u32);
    fn blend_equation(&mut self, mode: u32);
    fn cull_face(&mut self, mode: u32);
    fn front_face(&mut self, mode: u32);
    fn color_mask(&mut self, r: bool, g: bool, b: bool, a: bool);
    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32);
    fn clear_depth(&mut self, depth: f32);
    fn clear(&mut self, mask: u32);
    fn viewport(&mut self, x: i32, y: i32, w: i32, h: i32);

    // Vertex input.
    #[allow(clippy::too_many_arguments)]
    fn vertex_attrib_pointer(
        &mut self,
        location: u32,
        size: u32,
        ty: u32,
        normalized: bool,
        stride: u32,
        offset: u64,
    );
    fn enable_vertex_attrib_array(&mut self, location: u32);
    fn disable_vertex_attrib_array(&mut self, location: u32);
    fn vertex_attrib_divisor(&mut self, location: u32, divisor: u32);

    // Draws.
    fn draw_arrays(&mut self, mode: u32, first: u32, count: u32);
    fn draw_elements(&mut self, mode: u32, count: u32, ty: u32, offset: u64);
    fn draw_arrays_instanced(&mut self, mode: u32, first: u32, count: u32, instances: u32);
    fn draw_elements_instanced(&mut self, mode: u32, count: u32, ty: u32, offset: u64, instances: u32);

    // Fences.
    fn fence_sync(&mut self) -> GlFence;
    /// Non-blocking when `timeout_ns` is zero; returns one of
    /// `ALREADY_SIGNALED`, `TIMEOUT_EXPIRED`, `CONDITION_SATISFIED`,
    /// `WAIT_FAILED`.
    fn client_wait_sync(&mut self, fence: GlFence, timeout_ns: u64) -> u32;
    fn delete_sync(&mut self, fence: GlFence);

    fn flush(&mut self);
}
