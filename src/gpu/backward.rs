//! Backward tile rasterizer stage: per-pixel loss gradients into
//! per-Gaussian 2D gradient lanes via fixed-point i32 atomics.

use wgpu::{BindGroupLayout, Buffer, CommandEncoder, ComputePipeline, Device, TextureSampleType, TextureView};

use crate::gpu::{
    compute_pipeline, pipeline_layout, shaders, storage_entry, texture_entry, uniform_entry,
};

pub struct BackwardRasterizer {
    layout: BindGroupLayout,
    pipeline: ComputePipeline,
}

impl BackwardRasterizer {
    pub fn new(device: &Device) -> Self {
        let module = shaders::create_module(device, "backward rasterize", shaders::BACKWARD_RASTERIZE);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("backward rasterize layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
                texture_entry(5, TextureSampleType::Float { filterable: false }),
                texture_entry(6, TextureSampleType::Float { filterable: false }),
                texture_entry(7, TextureSampleType::Uint),
            ],
        });
        let pl = pipeline_layout(device, "backward rasterize pl", &[&layout]);
        Self {
            pipeline: compute_pipeline(
                device,
                "backward rasterize",
                &pl,
                &module,
                "backward_rasterize",
            ),
            layout,
        }
    }

    /// Clears the gradient lanes, then walks every tile in reverse.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        uniforms: &Buffer,
        splats: &Buffer,
        sorted_values: &Buffer,
        tile_offsets: &Buffer,
        grad_accum: &Buffer,
        loss_grad: &TextureView,
        transmittance: &TextureView,
        contrib: &TextureView,
        tile_bounds: (u32, u32),
    ) {
        encoder.clear_buffer(grad_accum, 0, None);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("backward rasterize bind group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: splats.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: sorted_values.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: tile_offsets.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: grad_accum.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(loss_grad),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::TextureView(transmittance),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: wgpu::BindingResource::TextureView(contrib),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("backward rasterize"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(tile_bounds.0, tile_bounds.1, 1);
    }
}
