//! Per-parameter-group Adam stage and the f16 repack.
//!
//! Five group dispatches (position, rotation, scale, opacity, SH color)
//! step the f32 optimizer state; the repack dispatch then writes the
//! parameters back into the packed store. Bias correction is deliberately
//! absent: the update is the raw m/(√v + ε) step of the gradient source
//! this engine reproduces, not textbook Adam.

use wgpu::{BindGroup, BindGroupLayout, Buffer, BufferUsages, CommandEncoder, ComputePipeline, Device};

use crate::config::{AdamParams as AdamConfig, LearningRates};
use crate::gpu::buffers::create_buffer_init;
use crate::gpu::scene::GpuScene;
use crate::gpu::{compute_pipeline, dispatch_size, pipeline_layout, shaders, storage_entry, uniform_entry};

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct AdamUniforms {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    count: u32,
    mode: u32,
    sh_degree: u32,
    _pad: u32,
    cam_pos: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct RepackUniforms {
    count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

const MODE_POSITION: u32 = 0;
const MODE_ROTATION: u32 = 1;
const MODE_SCALE: u32 = 2;

pub struct AdamOptimizer {
    vec_layout: BindGroupLayout,
    vec_pipeline: ComputePipeline,
    opacity_layout: BindGroupLayout,
    opacity_pipeline: ComputePipeline,
    sh_layout: BindGroupLayout,
    sh_gaussians_layout: BindGroupLayout,
    sh_pipeline: ComputePipeline,
    repack_layout: BindGroupLayout,
    repack_pipeline: ComputePipeline,
}

impl AdamOptimizer {
    pub fn new(device: &Device) -> Self {
        let module = shaders::create_module(device, "adam", shaders::ADAM);

        let vec_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("adam vec layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });
        let vec_pl = pipeline_layout(device, "adam vec pl", &[&vec_layout]);

        let opacity_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("adam opacity layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(4, false),
            ],
        });
        let opacity_pl = pipeline_layout(device, "adam opacity pl", &[&opacity_layout]);

        let sh_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("adam sh layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(5, false),
                storage_entry(6, false),
                storage_entry(7, false),
            ],
        });
        let sh_gaussians_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("adam sh gaussians layout"),
            entries: &[storage_entry(0, true)],
        });
        let sh_pl = pipeline_layout(device, "adam sh pl", &[&sh_layout, &sh_gaussians_layout]);

        let repack_module = shaders::create_module(device, "repack", shaders::REPACK);
        let repack_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("repack layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, false),
            ],
        });
        let repack_pl = pipeline_layout(device, "repack pl", &[&repack_layout]);

        Self {
            vec_pipeline: compute_pipeline(device, "adam vec", &vec_pl, &module, "adam_vec"),
            vec_layout,
            opacity_pipeline: compute_pipeline(device, "adam opacity", &opacity_pl, &module, "adam_opacity"),
            opacity_layout,
            sh_pipeline: compute_pipeline(device, "adam sh", &sh_pl, &module, "adam_sh"),
            sh_layout,
            sh_gaussians_layout,
            repack_pipeline: compute_pipeline(device, "repack", &repack_pl, &repack_module, "repack"),
            repack_layout,
        }
    }

    fn uniforms(
        &self,
        device: &Device,
        lr: f32,
        adam: &AdamConfig,
        count: u32,
        mode: u32,
        sh_degree: u32,
        cam_pos: [f32; 4],
    ) -> Buffer {
        create_buffer_init(
            device,
            "adam uniforms",
            &[AdamUniforms {
                lr,
                beta1: adam.beta1,
                beta2: adam.beta2,
                eps: adam.eps,
                count,
                mode,
                sh_degree,
                _pad: 0,
                cam_pos,
            }],
            BufferUsages::UNIFORM,
        )
    }

    fn vec_group(
        &self,
        device: &Device,
        uniforms: &Buffer,
        grads: &Buffer,
        tile_counts: &Buffer,
        opt: &Buffer,
    ) -> BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("adam vec bind group"),
            layout: &self.vec_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: grads.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: tile_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: opt.as_entire_binding(),
                },
            ],
        })
    }

    /// Record the five group steps followed by the repack.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        scene: &GpuScene,
        grads: &Buffer,
        tile_counts: &Buffer,
        rates: &LearningRates,
        adam: &AdamConfig,
        cam_pos: [f32; 4],
    ) {
        let n = scene.num_points;
        let groups = dispatch_size(n, 256);

        let vec_dispatches = [
            (rates.position, MODE_POSITION, &scene.opt_pos),
            (rates.rotation, MODE_ROTATION, &scene.opt_rot),
            (rates.scale, MODE_SCALE, &scene.opt_scale),
        ];

        for (lr, mode, opt) in vec_dispatches {
            let uniforms = self.uniforms(device, lr, adam, n, mode, scene.sh_degree, cam_pos);
            let group = self.vec_group(device, &uniforms, grads, tile_counts, opt);
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("adam vec"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.vec_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }

        {
            let uniforms =
                self.uniforms(device, rates.opacity, adam, n, 0, scene.sh_degree, cam_pos);
            let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("adam opacity bind group"),
                layout: &self.opacity_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: grads.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: tile_counts.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: scene.opt_opacity.as_entire_binding(),
                    },
                ],
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("adam opacity"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.opacity_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }

        {
            let uniforms = self.uniforms(device, rates.color, adam, n, 0, scene.sh_degree, cam_pos);
            let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("adam sh bind group"),
                layout: &self.sh_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: grads.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: tile_counts.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: scene.sh_param.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: scene.sh_state.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: scene.sh.as_entire_binding(),
                    },
                ],
            });
            let gaussians_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("adam sh gaussians group"),
                layout: &self.sh_gaussians_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: scene.gaussians.as_entire_binding(),
                }],
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("adam sh"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.sh_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.set_bind_group(1, &gaussians_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }

        {
            let uniforms = create_buffer_init(
                device,
                "repack uniforms",
                &[RepackUniforms {
                    count: n,
                    _pad0: 0,
                    _pad1: 0,
                    _pad2: 0,
                }],
                BufferUsages::UNIFORM,
            );
            let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("repack bind group"),
                layout: &self.repack_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: scene.opt_pos.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: scene.opt_rot.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: scene.opt_scale.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: scene.opt_opacity.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: scene.gaussians.as_entire_binding(),
                    },
                ],
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("repack"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.repack_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
    }
}
