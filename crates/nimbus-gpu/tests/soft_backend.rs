//! Front-end behavior tests on the deterministic software backend.

use nimbus_gpu::backend::SoftBackend;
use nimbus_gpu::cmd::GpuCmd;
use nimbus_gpu::{
    BindGroupDesc, BindGroupEntry, BindGroupLayoutDesc, BindGroupLayoutEntry, BindingResource,
    BindingType, BufferDesc, BufferUsages, Color, ColorTargetState, ColorWrites, ComputePassDesc,
    ComputePipelineDesc, Device, Extent3d, FragmentState, GfxError, ImageCopyTexture,
    ImageDataLayout, LoadOp, MultisampleState, Operations, Origin3d, PipelineLayoutKind,
    PrimitiveState, RenderPassColorAttachment, RenderPassDesc, RenderPipelineDesc, SamplerDesc,
    ShaderModuleDesc, ShaderStages, StoreOp, TextureDesc, TextureFormat, TextureUsages,
    TextureView, TextureViewDesc, VertexState,
};

fn soft_device() -> (Device, SoftBackend) {
    let backend = SoftBackend::new();
    (Device::with_backend(backend.clone()), backend)
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

fn render_pass_desc(view: &TextureView) -> RenderPassDesc {
    RenderPassDesc {
        label: Some("main pass".into()),
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

fn simple_render_pipeline(device: &Device) -> nimbus_gpu::RenderPipeline {
    let module = device
        .create_shader_module(&ShaderModuleDesc {
            label: None,
            source: "fn vs_main() {} fn fs_main() {}".into(),
        })
        .unwrap();
    device
        .create_render_pipeline(&RenderPipelineDesc {
            label: Some("triangle".into()),
            layout: PipelineLayoutKind::Auto,
            vertex: VertexState {
                module: module.clone(),
                entry_point: "vs_main".into(),
                constants: Vec::new(),
                buffers: Vec::new(),
            },
            fragment: Some(FragmentState {
                module,
                entry_point: "fs_main".into(),
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
fn labels_round_trip() {
    let (device, _) = soft_device();
    let buffer = device
        .create_buffer(&BufferDesc {
            label: Some("staging".into()),
            size: 64,
            usage: BufferUsages::COPY_DST,
        })
        .unwrap();
    assert_eq!(buffer.label(), Some("staging"));

    let texture = device
        .create_texture(&TextureDesc {
            label: Some("atlas".into()),
            ..TextureDesc::new_2d(TextureFormat::Rgba8Unorm, 16, 16, TextureUsages::COPY_DST)
        })
        .unwrap();
    assert_eq!(texture.label(), Some("atlas"));

    let sampler = device
        .create_sampler(&SamplerDesc {
            label: Some("bilinear".into()),
            ..SamplerDesc::default()
        })
        .unwrap();
    assert_eq!(sampler.label(), Some("bilinear"));

    let pipeline = simple_render_pipeline(&device);
    assert_eq!(pipeline.label(), Some("triangle"));

    let mut encoder = device.create_command_encoder(Some("frame"));
    assert_eq!(encoder.label(), Some("frame"));
    let command_buffer = encoder.finish().unwrap();
    assert_eq!(command_buffer.label(), Some("frame"));
}

#[test]
fn submit_executes_buffers_in_array_order() {
    let (device, backend) = soft_device();
    let queue = device.queue();
    let view = color_view(&device);
    let pipeline = simple_render_pipeline(&device);

    let mut encoder_a = device.create_command_encoder(Some("a"));
    let mut pass = encoder_a.begin_render_pass(&render_pass_desc(&view)).unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.draw(0..3, 0..1).unwrap();
    pass.end().unwrap();
    let a = encoder_a.finish().unwrap();

    let mut encoder_b = device.create_command_encoder(Some("b"));
    let mut pass = encoder_b.begin_render_pass(&render_pass_desc(&view)).unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.draw(0..6, 0..1).unwrap();
    pass.end().unwrap();
    let b = encoder_b.finish().unwrap();

    // Deferred model: nothing ran at encode time.
    assert!(backend.executed().is_empty());

    queue.submit(vec![a, b]).unwrap();

    let draws: Vec<u32> = backend
        .executed()
        .iter()
        .filter_map(|cmd| match cmd {
            GpuCmd::Draw { vertex_count, .. } => Some(*vertex_count),
            _ => None,
        })
        .collect();
    assert_eq!(draws, vec![3, 6]);
}

#[test]
fn compute_pass_records_dispatches() {
    let (device, backend) = soft_device();
    let module = device
        .create_shader_module(&ShaderModuleDesc {
            label: None,
            source: "fn cs_main() {}".into(),
        })
        .unwrap();
    let pipeline = device
        .create_compute_pipeline(&ComputePipelineDesc {
            label: None,
            layout: PipelineLayoutKind::Auto,
            module,
            entry_point: "cs_main".into(),
            constants: Vec::new(),
        })
        .unwrap();

    let mut encoder = device.create_command_encoder(None);
    let mut pass = encoder.begin_compute_pass(&ComputePassDesc::default()).unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.dispatch_workgroups(8, 4, 1).unwrap();
    pass.end().unwrap();
    let buffer = encoder.finish().unwrap();
    device.queue().submit(vec![buffer]).unwrap();

    assert!(backend
        .executed()
        .contains(&GpuCmd::Dispatch { x: 8, y: 4, z: 1 }));
}

#[test]
fn write_buffer_enforces_bounds() {
    let (device, backend) = soft_device();
    let queue = device.queue();
    let buffer = device
        .create_buffer(&BufferDesc {
            label: None,
            size: 16,
            usage: BufferUsages::COPY_DST,
        })
        .unwrap();

    queue.write_buffer(&buffer, 0, &[7u8; 16]).unwrap();
    assert_eq!(backend.buffer_contents(&buffer), Some(vec![7u8; 16]));

    let err = queue.write_buffer(&buffer, 0, &[0u8; 17]).unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)), "got {err:?}");

    let err = queue.write_buffer(&buffer, 8, &[0u8; 9]).unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));

    let err = queue.write_buffer(&buffer, u64::MAX, &[0u8; 4]).unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));
}

#[test]
fn encoder_state_machine_rejects_misuse() {
    let (device, _) = soft_device();
    let view = color_view(&device);

    // finish() twice.
    let mut encoder = device.create_command_encoder(None);
    encoder.finish().unwrap();
    assert!(matches!(encoder.finish(), Err(GfxError::State(_))));

    // Second pass while one is open.
    let encoder = device.create_command_encoder(None);
    let _pass = encoder.begin_render_pass(&render_pass_desc(&view)).unwrap();
    assert!(matches!(
        encoder.begin_render_pass(&render_pass_desc(&view)),
        Err(GfxError::State(_))
    ));

    // finish() with an open pass.
    let mut encoder = device.create_command_encoder(None);
    let _pass = encoder.begin_render_pass(&render_pass_desc(&view)).unwrap();
    assert!(matches!(encoder.finish(), Err(GfxError::State(_))));

    // Pass encoder calls after end().
    let mut encoder = device.create_command_encoder(None);
    let mut pass = encoder.begin_render_pass(&render_pass_desc(&view)).unwrap();
    pass.end().unwrap();
    assert!(matches!(pass.draw(0..3, 0..1), Err(GfxError::State(_))));
    assert!(matches!(pass.end(), Err(GfxError::State(_))));

    // Begin on a finished encoder.
    let mut encoder = device.create_command_encoder(None);
    encoder.finish().unwrap();
    assert!(matches!(
        encoder.begin_render_pass(&render_pass_desc(&view)),
        Err(GfxError::State(_))
    ));

    // A render pass needs at least one attachment.
    let encoder = device.create_command_encoder(None);
    assert!(matches!(
        encoder.begin_render_pass(&RenderPassDesc::default()),
        Err(GfxError::Validation(_))
    ));
}

#[test]
fn auto_layout_pipelines_expose_derived_layouts() {
    let (device, _) = soft_device();
    let pipeline = simple_render_pipeline(&device);
    let derived = pipeline.get_bind_group_layout(0).unwrap();

    // A bind group built against a derived layout skips slot validation.
    let buffer = device
        .create_buffer(&BufferDesc {
            label: None,
            size: 256,
            usage: BufferUsages::UNIFORM,
        })
        .unwrap();
    device
        .create_bind_group(&BindGroupDesc {
            label: None,
            layout: derived,
            entries: vec![BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer {
                    buffer,
                    offset: 0,
                    size: None,
                },
            }],
        })
        .unwrap();
}

#[test]
fn explicit_layout_pipelines_refuse_get_bind_group_layout() {
    let (device, _) = soft_device();
    let module = device
        .create_shader_module(&ShaderModuleDesc {
            label: None,
            source: "fn vs_main() {}".into(),
        })
        .unwrap();
    let bgl = device
        .create_bind_group_layout(&BindGroupLayoutDesc::default())
        .unwrap();
    let layout = device
        .create_pipeline_layout(&nimbus_gpu::PipelineLayoutDesc {
            label: None,
            bind_group_layouts: vec![bgl],
        })
        .unwrap();
    let pipeline = device
        .create_render_pipeline(&RenderPipelineDesc {
            label: None,
            layout: PipelineLayoutKind::Explicit(layout),
            vertex: VertexState {
                module,
                entry_point: "vs_main".into(),
                constants: Vec::new(),
                buffers: Vec::new(),
            },
            fragment: None,
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
        })
        .unwrap();

    assert!(matches!(
        pipeline.get_bind_group_layout(0),
        Err(GfxError::State(_))
    ));
}

#[test]
fn bind_groups_must_match_their_layout() {
    let (device, _) = soft_device();
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

    // Wrong resource kind for the declared slot.
    let buffer = device
        .create_buffer(&BufferDesc {
            label: None,
            size: 64,
            usage: BufferUsages::UNIFORM,
        })
        .unwrap();
    let err = device
        .create_bind_group(&BindGroupDesc {
            label: None,
            layout: layout.clone(),
            entries: vec![BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer {
                    buffer: buffer.clone(),
                    offset: 0,
                    size: None,
                },
            }],
        })
        .unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));

    // Entry count mismatch.
    let err = device
        .create_bind_group(&BindGroupDesc {
            label: None,
            layout,
            entries: Vec::new(),
        })
        .unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));

    // Buffer binding range past the end of the buffer.
    let uniform_layout = device
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
    let err = device
        .create_bind_group(&BindGroupDesc {
            label: None,
            layout: uniform_layout,
            entries: vec![BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer {
                    buffer,
                    offset: 32,
                    size: Some(64),
                },
            }],
        })
        .unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));
}

#[test]
fn unsupported_formats_name_the_format() {
    let (device, _) = soft_device();
    let err = device
        .create_texture(&TextureDesc::new_2d(
            TextureFormat::Astc12x12Unorm,
            48,
            48,
            TextureUsages::TEXTURE_BINDING,
        ))
        .unwrap_err();
    match err {
        GfxError::UnsupportedFormat(name) => assert!(name.contains("astc-12x12"), "got {name}"),
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
}

#[test]
fn texture_creation_validates_descriptors() {
    let (device, _) = soft_device();

    let err = device
        .create_texture(&TextureDesc::new_2d(
            TextureFormat::Rgba8Unorm,
            0,
            16,
            TextureUsages::COPY_DST,
        ))
        .unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));

    let err = device
        .create_texture(&TextureDesc {
            mip_level_count: 12,
            ..TextureDesc::new_2d(TextureFormat::Rgba8Unorm, 16, 16, TextureUsages::COPY_DST)
        })
        .unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));

    let err = device
        .create_texture(&TextureDesc::new_2d(
            TextureFormat::Rgba8Unorm,
            16384,
            16,
            TextureUsages::COPY_DST,
        ))
        .unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));
}

#[test]
fn write_texture_validates_region_and_layout() {
    let (device, _) = soft_device();
    let queue = device.queue();
    let texture = device
        .create_texture(&TextureDesc::new_2d(
            TextureFormat::Rgba8Unorm,
            8,
            8,
            TextureUsages::COPY_DST,
        ))
        .unwrap();
    let dst = ImageCopyTexture {
        texture: texture.clone(),
        mip_level: 0,
        origin: Origin3d::ZERO,
    };
    let full = Extent3d {
        width: 8,
        height: 8,
        depth_or_array_layers: 1,
    };

    queue
        .write_texture(
            &dst,
            &[0u8; 8 * 8 * 4],
            &ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(32),
                rows_per_image: None,
            },
            full,
        )
        .unwrap();

    // Region exceeds the mip dimensions.
    let err = queue
        .write_texture(
            &dst,
            &[0u8; 16 * 16 * 4],
            &ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(64),
                rows_per_image: None,
            },
            Extent3d {
                width: 16,
                height: 16,
                depth_or_array_layers: 1,
            },
        )
        .unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));

    // Multi-row upload without bytes_per_row.
    let err = queue
        .write_texture(
            &dst,
            &[0u8; 8 * 8 * 4],
            &ImageDataLayout::default(),
            full,
        )
        .unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));

    // Data shorter than the layout demands.
    let err = queue
        .write_texture(
            &dst,
            &[0u8; 16],
            &ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(32),
                rows_per_image: None,
            },
            full,
        )
        .unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));

    // Mip level out of range.
    let err = queue
        .write_texture(
            &ImageCopyTexture {
                texture,
                mip_level: 3,
                origin: Origin3d::ZERO,
            },
            &[0u8; 4],
            &ImageDataLayout::default(),
            Extent3d::default(),
        )
        .unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)));
}

#[test]
fn work_done_resolves_on_poll() {
    let (device, _) = soft_device();
    let queue = device.queue();
    queue.submit(Vec::new()).unwrap();

    let done = queue.on_submitted_work_done();
    assert!(done.is_pending());
    device.poll();
    assert_eq!(done.ready(), Some(Ok(())));
}
