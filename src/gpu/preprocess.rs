//! Forward preprocess: projection, culling, conic construction, SH
//! evaluation, tile counting, and — once the counts are scanned — key
//! emission plus the sort bookkeeping epilogue.

use nalgebra::Vector3;
use wgpu::{BindGroupLayout, Buffer, BufferUsages, CommandEncoder, ComputePipeline, Device};

use crate::core::Camera;
use crate::gpu::scene::GpuScene;
use crate::gpu::sort::RadixSorter;
use crate::gpu::{compute_pipeline, dispatch_size, pipeline_layout, shaders, storage_entry, uniform_entry};

/// Per-view uniforms shared by every projection-adjacent kernel. Matrices
/// upload column-major, matching WGSL's layout.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RenderUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub cam_pos: [f32; 4],
    pub focal: [f32; 2],
    pub viewport: [f32; 2],
    pub tile_bounds: [u32; 2],
    pub sh_degree: u32,
    pub num_gaussians: u32,
    pub background: [f32; 4],
    pub seed: u32,
    pub max_radius_px: f32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl RenderUniforms {
    pub fn new(
        camera: &Camera,
        num_gaussians: u32,
        sh_degree: u32,
        background: Vector3<f32>,
        seed: u32,
        max_radius_px: f32,
    ) -> Self {
        let (tx, ty) = camera.tile_bounds(16);
        let center = camera.camera_center();
        Self {
            view: matrix_columns(&camera.view),
            proj: matrix_columns(&camera.proj),
            cam_pos: [center.x, center.y, center.z, 1.0],
            focal: [camera.fx, camera.fy],
            viewport: [camera.width as f32, camera.height as f32],
            tile_bounds: [tx, ty],
            sh_degree,
            num_gaussians,
            background: [background.x, background.y, background.z, 1.0],
            seed,
            max_radius_px,
            _pad0: 0,
            _pad1: 0,
        }
    }

    pub fn num_tiles(&self) -> u32 {
        self.tile_bounds[0] * self.tile_bounds[1]
    }
}

fn matrix_columns(m: &nalgebra::Matrix4<f32>) -> [[f32; 4]; 4] {
    let mut out = [[0.0f32; 4]; 4];
    for (c, col) in m.column_iter().enumerate() {
        for r in 0..4 {
            out[c][r] = col[r];
        }
    }
    out
}

/// Host mirror of the preprocess stats block.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameStats {
    pub visible: u32,
}

pub struct Preprocessor {
    preprocess_layout: BindGroupLayout,
    preprocess_pipeline: ComputePipeline,
    keys_layout: BindGroupLayout,
    emit_pipeline: ComputePipeline,
    prepare_pipeline: ComputePipeline,
}

impl Preprocessor {
    pub fn new(device: &Device) -> Self {
        let module = shaders::create_module(device, "preprocess", shaders::PREPROCESS);
        let preprocess_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("preprocess layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
                storage_entry(4, false),
                storage_entry(5, false),
                storage_entry(6, false),
            ],
        });
        let preprocess_pl = pipeline_layout(device, "preprocess pl", &[&preprocess_layout]);
        let preprocess_pipeline =
            compute_pipeline(device, "preprocess", &preprocess_pl, &module, "preprocess");

        let keys_module = shaders::create_module(device, "keys", shaders::KEYS);
        let keys_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("keys layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, false),
                storage_entry(6, false),
                storage_entry(7, false),
                storage_entry(8, false),
            ],
        });
        let keys_pl = pipeline_layout(device, "keys pl", &[&keys_layout]);

        Self {
            preprocess_pipeline,
            preprocess_layout,
            emit_pipeline: compute_pipeline(device, "emit keys", &keys_pl, &keys_module, "emit_keys"),
            prepare_pipeline: compute_pipeline(
                device,
                "prepare sort",
                &keys_pl,
                &keys_module,
                "prepare_sort",
            ),
            keys_layout,
        }
    }

    /// Record projection/culling for the whole scene.
    #[allow(clippy::too_many_arguments)]
    pub fn record_preprocess(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        uniforms: &Buffer,
        scene: &GpuScene,
        splats: &Buffer,
        tile_counts: &Buffer,
        depths: &Buffer,
        stats: &Buffer,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("preprocess bind group"),
            layout: &self.preprocess_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: scene.gaussians.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: scene.sh.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: splats.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: tile_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: depths.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: stats.as_entire_binding(),
                },
            ],
        });

        encoder.clear_buffer(stats, 0, None);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("preprocess"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.preprocess_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(dispatch_size(scene.num_points, 256), 1, 1);
    }

    /// Record key emission at the scanned offsets plus the sort-preparation
    /// epilogue. Clears the key/value buffers first so the padded tail
    /// decodes as "no tile".
    #[allow(clippy::too_many_arguments)]
    pub fn record_emit_keys(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        uniforms: &Buffer,
        tile_counts: &Buffer,
        offsets: &Buffer,
        depths: &Buffer,
        splats: &Buffer,
        sorter: &RadixSorter,
        sort_info: &Buffer,
        sort_dispatch: &Buffer,
        num_gaussians: u32,
    ) {
        // Seed the capacity field the epilogue clamps against.
        let info_init = crate::gpu::sort::SortInfo {
            num_keys: 0,
            padded_size: 0,
            num_blocks: 0,
            capacity: sorter.max_entries(),
        };
        let info_staging = crate::gpu::buffers::create_buffer_init(
            device,
            "sort info init",
            &[info_init],
            BufferUsages::COPY_SRC,
        );
        encoder.copy_buffer_to_buffer(&info_staging, 0, sort_info, 0, 16);
        encoder.clear_buffer(sorter.input_keys(), 0, None);
        encoder.clear_buffer(sorter.input_values(), 0, None);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("keys bind group"),
            layout: &self.keys_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: tile_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: offsets.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: depths.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: splats.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: sorter.input_keys().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: sorter.input_values().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: sort_info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 8,
                    resource: sort_dispatch.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("emit keys"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_pipeline(&self.emit_pipeline);
        pass.dispatch_workgroups(dispatch_size(num_gaussians, 256), 1, 1);
        pass.set_pipeline(&self.prepare_pipeline);
        pass.dispatch_workgroups(1, 1, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    #[test]
    fn test_uniforms_layout() {
        // The WGSL struct is 208 bytes; keep the host mirror in lockstep.
        assert_eq!(std::mem::size_of::<RenderUniforms>(), 208);
    }

    #[test]
    fn test_uniform_tile_bounds() {
        let cam = Camera::from_intrinsics(
            100.0,
            100.0,
            64,
            48,
            Matrix3::identity(),
            Vector3::zeros(),
            0.1,
            100.0,
        );
        let u = RenderUniforms::new(&cam, 10, 0, Vector3::zeros(), 0, 0.0);
        assert_eq!(u.tile_bounds, [4, 3]);
        assert_eq!(u.num_tiles(), 12);
        assert_eq!(u.viewport, [64.0, 48.0]);
    }
}
