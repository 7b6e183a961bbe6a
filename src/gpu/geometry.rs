//! Geometry backward stage: fixed-point 2D gradients into packed 3D
//! gradient records, recomputing the forward projection per Gaussian.

use wgpu::{BindGroupLayout, Buffer, CommandEncoder, ComputePipeline, Device};

use crate::gpu::{compute_pipeline, dispatch_size, pipeline_layout, shaders, storage_entry, uniform_entry};

pub struct GeometryBackward {
    layout: BindGroupLayout,
    pipeline: ComputePipeline,
}

impl GeometryBackward {
    pub fn new(device: &Device) -> Self {
        let module = shaders::create_module(device, "backward geometry", shaders::BACKWARD_GEOMETRY);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("backward geometry layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
            ],
        });
        let pl = pipeline_layout(device, "backward geometry pl", &[&layout]);
        Self {
            pipeline: compute_pipeline(
                device,
                "backward geometry",
                &pl,
                &module,
                "backward_geometry",
            ),
            layout,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        uniforms: &Buffer,
        gaussians: &Buffer,
        grad_accum: &Buffer,
        tile_counts: &Buffer,
        grads_out: &Buffer,
        num_gaussians: u32,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("backward geometry bind group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: gaussians.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: grad_accum.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: tile_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: grads_out.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("backward geometry"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(dispatch_size(num_gaussians, 64), 1, 1);
    }
}
