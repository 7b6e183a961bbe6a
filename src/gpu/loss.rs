//! Per-pixel loss gradient stage (L1 + L2 + DSSIM).

use wgpu::{BindGroupLayout, BufferUsages, CommandEncoder, ComputePipeline, Device, TextureFormat, TextureSampleType, TextureView};

use crate::config::LossWeights;
use crate::gpu::buffers::create_buffer_init;
use crate::gpu::{
    compute_pipeline, dispatch_size, pipeline_layout, shaders, storage_texture_entry, texture_entry,
    uniform_entry,
};

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct LossParams {
    lambda_l1: f32,
    lambda_l2: f32,
    lambda_dssim: f32,
    c1: f32,
    c2: f32,
    _pad0: f32,
    viewport: [u32; 2],
}

pub struct LossPass {
    layout: BindGroupLayout,
    pipeline: ComputePipeline,
}

impl LossPass {
    pub fn new(device: &Device) -> Self {
        let module = shaders::create_module_standalone(device, "loss", shaders::LOSS);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("loss layout"),
            entries: &[
                uniform_entry(0),
                texture_entry(1, TextureSampleType::Float { filterable: false }),
                texture_entry(2, TextureSampleType::Float { filterable: false }),
                storage_texture_entry(3, TextureFormat::Rgba32Float),
            ],
        });
        let pl = pipeline_layout(device, "loss pl", &[&layout]);
        Self {
            pipeline: compute_pipeline(device, "loss grad", &pl, &module, "loss_grad"),
            layout,
        }
    }

    pub fn record(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        weights: &LossWeights,
        prediction: &TextureView,
        target: &TextureView,
        grad_out: &TextureView,
        viewport: (u32, u32),
    ) {
        let params = LossParams {
            lambda_l1: weights.l1,
            lambda_l2: weights.l2,
            lambda_dssim: weights.dssim,
            c1: weights.c1,
            c2: weights.c2,
            _pad0: 0.0,
            viewport: [viewport.0, viewport.1],
        };
        let params_buf = create_buffer_init(device, "loss params", &[params], BufferUsages::UNIFORM);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("loss bind group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(prediction),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(target),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(grad_out),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("loss gradient"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(
            dispatch_size(viewport.0, 16),
            dispatch_size(viewport.1, 16),
            1,
        );
    }
}
