//! Smoke test against the native wgpu backend.
//!
//! Skips when no adapter is available (headless CI), matching the behavior of
//! the other GPU-dependent suites.

use std::time::{Duration, Instant};

use nimbus_gpu::backend::WgpuBackend;
use nimbus_gpu::{
    BufferDesc, BufferUsages, Color, Device, GfxError, LoadOp, Operations,
    RenderPassColorAttachment, RenderPassDesc, StoreOp, TextureDesc, TextureFormat, TextureUsages,
    TextureViewDesc,
};

#[test]
fn clear_pass_submits_and_completes() {
    let backend = match pollster::block_on(WgpuBackend::new_headless()) {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("skipping wgpu smoke test: no usable adapter ({err})");
            return;
        }
    };
    let device = Device::with_backend(backend);
    let queue = device.queue();

    let buffer = device
        .create_buffer(&BufferDesc {
            label: Some("uniforms".into()),
            size: 256,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        })
        .unwrap();
    queue.write_buffer(&buffer, 0, &[0u8; 256]).unwrap();

    let texture = device
        .create_texture(&TextureDesc::new_2d(
            TextureFormat::Rgba8Unorm,
            64,
            64,
            TextureUsages::RENDER_ATTACHMENT,
        ))
        .unwrap();
    let view = device
        .create_texture_view(&texture, &TextureViewDesc::default())
        .unwrap();

    let mut encoder = device.create_command_encoder(Some("smoke"));
    let mut pass = encoder
        .begin_render_pass(&RenderPassDesc {
            label: Some("clear".into()),
            color_attachments: vec![RenderPassColorAttachment {
                view,
                ops: Operations {
                    load: LoadOp::Clear(Color {
                        r: 0.0,
                        g: 0.5,
                        b: 1.0,
                        a: 1.0,
                    }),
                    store: StoreOp::Store,
                },
            }],
            depth_stencil_attachment: None,
        })
        .unwrap();
    pass.end().unwrap();
    let command_buffer = encoder.finish().unwrap();
    queue.submit(vec![command_buffer]).unwrap();

    let done = queue.on_submitted_work_done();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        device.poll();
        match done.ready() {
            Some(result) => {
                result.unwrap();
                break;
            }
            None if Instant::now() > deadline => panic!("submission never completed"),
            None => std::thread::sleep(Duration::from_millis(5)),
        }
    }
}

#[test]
fn misaligned_buffer_writes_are_validation_errors() {
    let backend = match pollster::block_on(WgpuBackend::new_headless()) {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("skipping wgpu smoke test: no usable adapter ({err})");
            return;
        }
    };
    let device = Device::with_backend(backend);
    let queue = device.queue();

    let buffer = device
        .create_buffer(&BufferDesc {
            label: None,
            size: 256,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        })
        .unwrap();

    let err = queue.write_buffer(&buffer, 2, &[0u8; 4]).unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)), "got {err:?}");
    let err = queue.write_buffer(&buffer, 0, &[0u8; 3]).unwrap_err();
    assert!(matches!(err, GfxError::Validation(_)), "got {err:?}");
}
