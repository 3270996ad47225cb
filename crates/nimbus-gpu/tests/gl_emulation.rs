//! GL emulation backend tests against the in-memory context.
//!
//! The context double records binding state, so these tests pin down the
//! bind-use-restore contract: whatever the backend touches is back to its
//! prior value once the call or pass completes.

use nimbus_gpu::backend::gl::context::consts;
use nimbus_gpu::backend::gl::{GlBackend, GlContext, SoftGl};
use nimbus_gpu::{
    BindGroupDesc, BindGroupEntry, BindGroupLayoutDesc, BindGroupLayoutEntry, BindingResource,
    BindingType, BufferDesc, BufferUsages, Color, ColorTargetState, ColorWrites,
    ComputePipelineDesc, Device, Extent3d, FragmentState, GfxError, ImageCopyTexture,
    ImageDataLayout, LoadOp, MultisampleState, Operations, Origin3d, PipelineLayoutKind,
    PrimitiveState, RenderPassColorAttachment, RenderPassDesc, RenderPipelineDesc,
    ShaderModuleDesc, ShaderStages, StoreOp, TextureDesc, TextureFormat, TextureUsages,
    TextureView, TextureViewDesc, VertexAttribute, VertexBufferLayout, VertexFormat, VertexState,
    VertexStepMode,
};

fn gl_device() -> (Device, SoftGl) {
    let gl = SoftGl::new();
    (Device::with_backend(GlBackend::new(gl.clone())), gl)
}

fn color_view(device: &Device) -> TextureView {
    let texture = device
        .create_texture(&TextureDesc::new_2d(
            TextureFormat::Rgba8Unorm,
            64,
            64,
            TextureUsages::RENDER_ATTACHMENT,
        ))
        .unwrap();
    device
        .create_texture_view(&texture, &TextureViewDesc::default())
        .unwrap()
}

fn clear_pass_desc(view: &TextureView) -> RenderPassDesc {
    RenderPassDesc {
        label: None,
        color_attachments: vec![RenderPassColorAttachment {
            view: view.clone(),
            ops: Operations {
                load: LoadOp::Clear(Color::TRANSPARENT_BLACK),
                store: StoreOp::Store,
            },
        }],
        depth_stencil_attachment: None,
    }
}

fn render_pipeline(
    device: &Device,
    buffers: Vec<VertexBufferLayout>,
) -> nimbus_gpu::RenderPipeline {
    let vs = device
        .create_shader_module(&ShaderModuleDesc {
            label: None,
            source: "void main() { gl_Position = vec4(0.0); }".into(),
        })
        .unwrap();
    let fs = device
        .create_shader_module(&ShaderModuleDesc {
            label: None,
            source: "void main() {}".into(),
        })
        .unwrap();
    device
        .create_render_pipeline(&RenderPipelineDesc {
            label: None,
            layout: PipelineLayoutKind::Auto,
            vertex: VertexState {
                module: vs,
                entry_point: "main".into(),
                constants: Vec::new(),
                buffers,
            },
            fragment: Some(FragmentState {
                module: fs,
                entry_point: "main".into(),
                constants: Vec::new(),
                targets: vec![Some(ColorTargetState {
                    format: TextureFormat::Rgba8Unorm,
                    blend: None,
                    write_mask: ColorWrites::default(),
                })],
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
        })
        .unwrap()
}

#[test]
fn write_buffer_restores_an_unbound_target() {
    let (device, gl) = gl_device();
    let buffer = device
        .create_buffer(&BufferDesc {
            label: None,
            size: 64,
            usage: BufferUsages::UNIFORM,
        })
        .unwrap();

    device.queue().write_buffer(&buffer, 0, &[1u8; 64]).unwrap();
    assert_eq!(gl.bound_buffer(consts::UNIFORM_BUFFER), None);
}

#[test]
fn write_buffer_restores_a_prior_binding() {
    let (device, gl) = gl_device();
    let buffer = device
        .create_buffer(&BufferDesc {
            label: None,
            size: 64,
            usage: BufferUsages::UNIFORM,
        })
        .unwrap();

    // A binding the host owns, outside the kernel.
    let mut raw = gl.clone();
    let host_buffer = raw.create_buffer();
    raw.bind_buffer(consts::UNIFORM_BUFFER, Some(host_buffer));

    device.queue().write_buffer(&buffer, 0, &[1u8; 64]).unwrap();
    assert_eq!(gl.bound_buffer(consts::UNIFORM_BUFFER), Some(host_buffer));
}

#[test]
fn render_pass_restores_everything_it_touched() {
    let (device, gl) = gl_device();
    let view = color_view(&device);
    let pipeline = render_pipeline(&device, Vec::new());

    let layout = device
        .create_bind_group_layout(&BindGroupLayoutDesc {
            label: None,
            entries: vec![BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::UniformBuffer {
                    dynamic: false,
                    min_size: None,
                },
            }],
        })
        .unwrap();
    let uniforms = device
        .create_buffer(&BufferDesc {
            label: None,
            size: 256,
            usage: BufferUsages::UNIFORM,
        })
        .unwrap();
    let bind_group = device
        .create_bind_group(&BindGroupDesc {
            label: None,
            layout,
            entries: vec![BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer {
                    buffer: uniforms,
                    offset: 0,
                    size: None,
                },
            }],
        })
        .unwrap();

    let encoder = device.create_command_encoder(None);
    let mut pass = encoder.begin_render_pass(&clear_pass_desc(&view)).unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.set_bind_group(1, &bind_group, &[]).unwrap();

    // Immediate model: the context reflects the pass mid-encode. Group 1,
    // binding 0 flattens to indexed slot 16.
    assert!(gl.current_program().is_some());
    assert!(gl.bound_framebuffer(consts::FRAMEBUFFER).is_some());
    assert!(gl
        .bound_buffer_range(consts::UNIFORM_BUFFER, 16)
        .is_some());

    pass.draw(0..3, 0..1).unwrap();
    pass.end().unwrap();

    assert_eq!(gl.draw_calls(), 1);
    assert_eq!(gl.current_program(), None);
    assert_eq!(gl.bound_framebuffer(consts::FRAMEBUFFER), None);
    assert_eq!(gl.bound_buffer_range(consts::UNIFORM_BUFFER, 16), None);
    assert_eq!(gl.bound_buffer(consts::ARRAY_BUFFER), None);
    assert_eq!(gl.bound_buffer(consts::ELEMENT_ARRAY_BUFFER), None);
    assert!(gl.enabled_attribs().is_empty());
}

#[test]
fn vertex_attribs_are_enabled_for_the_draw_and_disabled_after() {
    let (device, gl) = gl_device();
    let view = color_view(&device);
    let pipeline = render_pipeline(
        &device,
        vec![VertexBufferLayout {
            array_stride: 16,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![VertexAttribute {
                format: VertexFormat::Float32x4,
                offset: 0,
                shader_location: 0,
            }],
        }],
    );
    let vertices = device
        .create_buffer(&BufferDesc {
            label: None,
            size: 48,
            usage: BufferUsages::VERTEX,
        })
        .unwrap();

    let encoder = device.create_command_encoder(None);
    let mut pass = encoder.begin_render_pass(&clear_pass_desc(&view)).unwrap();
    pass.set_pipeline(&pipeline).unwrap();

    // Drawing before any vertex buffer is bound is a state error.
    assert!(matches!(pass.draw(0..3, 0..1), Err(GfxError::State(_))));

    pass.set_vertex_buffer(0, &vertices, 0).unwrap();
    pass.draw(0..3, 0..1).unwrap();
    assert_eq!(gl.enabled_attribs(), vec![0]);

    pass.end().unwrap();
    assert!(gl.enabled_attribs().is_empty());
}

#[test]
fn a_failed_pass_begin_leaves_the_caller_bindings_alone() {
    let (device_a, _) = gl_device();
    let (device_b, gl_b) = gl_device();
    let foreign_view = color_view(&device_a);

    // A framebuffer the host owns on device B's context.
    let mut raw = gl_b.clone();
    let host_framebuffer = raw.create_framebuffer();
    raw.bind_framebuffer(consts::FRAMEBUFFER, Some(host_framebuffer));
    let framebuffers_before = gl_b.live_framebuffers();

    // The view belongs to another device, so begin must fail before any
    // context state changes.
    let encoder = device_b.create_command_encoder(None);
    assert!(encoder
        .begin_render_pass(&clear_pass_desc(&foreign_view))
        .is_err());

    assert_eq!(
        gl_b.bound_framebuffer(consts::FRAMEBUFFER),
        Some(host_framebuffer)
    );
    assert_eq!(gl_b.live_framebuffers(), framebuffers_before);

    // The encoder is still usable for a valid pass.
    let view = color_view(&device_b);
    let mut pass = encoder.begin_render_pass(&clear_pass_desc(&view)).unwrap();
    pass.end().unwrap();
}

#[test]
fn render_passes_release_their_framebuffers() {
    let (device, gl) = gl_device();
    let view = color_view(&device);

    for _ in 0..2 {
        let encoder = device.create_command_encoder(None);
        let mut pass = encoder.begin_render_pass(&clear_pass_desc(&view)).unwrap();
        pass.end().unwrap();
    }
    assert_eq!(gl.live_framebuffers(), 0);
}

#[test]
fn texture_uploads_restore_the_active_unit() {
    let (device, gl) = gl_device();
    let mut raw = gl.clone();
    raw.active_texture(consts::TEXTURE0 + 3);

    let texture = device
        .create_texture(&TextureDesc::new_2d(
            TextureFormat::Rgba8Unorm,
            8,
            8,
            TextureUsages::COPY_DST,
        ))
        .unwrap();
    assert_eq!(gl.active_texture_unit(), consts::TEXTURE0 + 3);

    device
        .queue()
        .write_texture(
            &ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
            },
            &[0u8; 8 * 8 * 4],
            &ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(32),
                rows_per_image: None,
            },
            Extent3d {
                width: 8,
                height: 8,
                depth_or_array_layers: 1,
            },
        )
        .unwrap();
    assert_eq!(gl.active_texture_unit(), consts::TEXTURE0 + 3);
}

#[test]
fn render_passes_restore_the_active_unit() {
    let (device, gl) = gl_device();
    let view = color_view(&device);
    let pipeline = render_pipeline(&device, Vec::new());

    let layout = device
        .create_bind_group_layout(&BindGroupLayoutDesc {
            label: None,
            entries: vec![BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Texture { filterable: true },
            }],
        })
        .unwrap();
    let sampled = device
        .create_texture(&TextureDesc::new_2d(
            TextureFormat::Rgba8Unorm,
            8,
            8,
            TextureUsages::TEXTURE_BINDING,
        ))
        .unwrap();
    let sampled_view = device
        .create_texture_view(&sampled, &TextureViewDesc::default())
        .unwrap();
    let bind_group = device
        .create_bind_group(&BindGroupDesc {
            label: None,
            layout,
            entries: vec![BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(sampled_view),
            }],
        })
        .unwrap();

    let mut raw = gl.clone();
    raw.active_texture(consts::TEXTURE0 + 2);

    let encoder = device.create_command_encoder(None);
    let mut pass = encoder.begin_render_pass(&clear_pass_desc(&view)).unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.set_bind_group(0, &bind_group, &[]).unwrap();
    pass.draw(0..3, 0..1).unwrap();
    pass.end().unwrap();

    assert_eq!(gl.active_texture_unit(), consts::TEXTURE0 + 2);
}

#[test]
fn submit_is_a_flush_on_the_immediate_model() {
    let (device, gl) = gl_device();
    let view = color_view(&device);

    let mut encoder = device.create_command_encoder(None);
    let mut pass = encoder.begin_render_pass(&clear_pass_desc(&view)).unwrap();
    pass.end().unwrap();
    let buffer = encoder.finish().unwrap();

    let flushes_before = gl.flush_count();
    device.queue().submit(vec![buffer]).unwrap();
    assert_eq!(gl.flush_count(), flushes_before + 1);
}

#[test]
fn compute_is_rejected_up_front() {
    let (device, _) = gl_device();
    assert!(!device.capabilities().supports_compute);

    let module = device
        .create_shader_module(&ShaderModuleDesc {
            label: None,
            source: "void main() {}".into(),
        })
        .unwrap();
    let err = device
        .create_compute_pipeline(&ComputePipelineDesc {
            label: None,
            layout: PipelineLayoutKind::Auto,
            module,
            entry_point: "main".into(),
            constants: Vec::new(),
        })
        .unwrap_err();
    assert_eq!(err, GfxError::UnsupportedFeature("compute-pipelines"));
}

#[test]
fn bgra_is_not_a_supported_format() {
    let (device, _) = gl_device();
    let err = device
        .create_texture(&TextureDesc::new_2d(
            TextureFormat::Bgra8Unorm,
            16,
            16,
            TextureUsages::TEXTURE_BINDING,
        ))
        .unwrap_err();
    assert!(matches!(err, GfxError::UnsupportedFormat(_)));
}

#[test]
fn draw_indexed_base_vertex_is_unsupported() {
    let (device, _) = gl_device();
    let view = color_view(&device);
    let pipeline = render_pipeline(&device, Vec::new());
    let indices = device
        .create_buffer(&BufferDesc {
            label: None,
            size: 64,
            usage: BufferUsages::INDEX,
        })
        .unwrap();

    let encoder = device.create_command_encoder(None);
    let mut pass = encoder.begin_render_pass(&clear_pass_desc(&view)).unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.set_index_buffer(&indices, nimbus_gpu::IndexFormat::Uint16, 0)
        .unwrap();
    let err = pass.draw_indexed(0..3, 4, 0..1).unwrap_err();
    assert_eq!(err, GfxError::UnsupportedFeature("draw-indexed-base-vertex"));
}

#[test]
fn shader_compile_errors_reject_the_deferred_pipeline() {
    let (device, _) = gl_device();
    let vs = device
        .create_shader_module(&ShaderModuleDesc {
            label: None,
            source: "#error unsupported platform".into(),
        })
        .unwrap();

    let deferred = device.create_render_pipeline_async(&RenderPipelineDesc {
        label: None,
        layout: PipelineLayoutKind::Auto,
        vertex: VertexState {
            module: vs,
            entry_point: "main".into(),
            constants: Vec::new(),
            buffers: Vec::new(),
        },
        fragment: None,
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState::default(),
    });

    match deferred.ready() {
        Some(Err(GfxError::Compilation(log))) => assert!(log.contains("#error"), "got {log}"),
        other => panic!("expected a compilation error, got {other:?}"),
    }
}

#[test]
fn fences_resolve_only_after_the_work_completes() {
    let (device, gl) = gl_device();
    let queue = device.queue();

    let done = queue.on_submitted_work_done();
    assert!(done.is_pending());

    device.poll();
    assert!(done.is_pending());

    gl.complete_work();
    device.poll();
    assert_eq!(done.ready(), Some(Ok(())));
}

#[test]
fn a_failed_fence_wait_still_resolves() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (device, gl) = gl_device();
    let queue = device.queue();

    let done = queue.on_submitted_work_done();
    gl.fail_next_fence_wait();
    device.poll();
    assert_eq!(done.ready(), Some(Ok(())));
}
