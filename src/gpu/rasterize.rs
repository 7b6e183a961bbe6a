//! Forward tile rasterizer stage.

use wgpu::{BindGroupLayout, Buffer, CommandEncoder, ComputePipeline, Device, TextureFormat, TextureView};

use crate::gpu::{
    compute_pipeline, pipeline_layout, shaders, storage_entry, storage_texture_entry, uniform_entry,
};

pub struct Rasterizer {
    layout: BindGroupLayout,
    pipeline: ComputePipeline,
}

impl Rasterizer {
    pub fn new(device: &Device) -> Self {
        let module = shaders::create_module(device, "rasterize", shaders::RASTERIZE);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rasterize layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_texture_entry(4, TextureFormat::Rgba8Unorm),
                storage_texture_entry(5, TextureFormat::R32Float),
                storage_texture_entry(6, TextureFormat::R32Uint),
            ],
        });
        let pl = pipeline_layout(device, "rasterize pl", &[&layout]);
        Self {
            pipeline: compute_pipeline(device, "rasterize", &pl, &module, "rasterize"),
            layout,
        }
    }

    /// One workgroup per tile.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        uniforms: &Buffer,
        splats: &Buffer,
        sorted_values: &Buffer,
        tile_offsets: &Buffer,
        color: &TextureView,
        transmittance: &TextureView,
        contrib: &TextureView,
        tile_bounds: (u32, u32),
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("rasterize bind group"),
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
                    resource: wgpu::BindingResource::TextureView(color),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(transmittance),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::TextureView(contrib),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("rasterize"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(tile_bounds.0, tile_bounds.1, 1);
    }
}
