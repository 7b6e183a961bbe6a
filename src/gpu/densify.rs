//! Densify/prune compactor: decide → scan → cap → scan → scatter.
//!
//! The decision, cap, and scans run on the current scene; the host reads
//! back only the final output count, allocates fresh scene buffers, and the
//! scatter dispatches rebuild the packed store and every optimizer group
//! into them. The orchestrator swaps the fresh allocation in at an
//! iteration boundary once the queue has drained.

use wgpu::{BindGroup, BindGroupLayout, Buffer, BufferUsages, CommandEncoder, ComputePipeline, Device, Queue};

use crate::config::TrainerConfig;
use crate::error::TrainError;
use crate::gpu::buffers::{create_buffer, create_buffer_init, read_buffer_blocking};
use crate::gpu::scan::PrefixScanner;
use crate::gpu::scene::GpuScene;
use crate::gpu::{compute_pipeline, dispatch_size, pipeline_layout, shaders, storage_entry, uniform_entry};

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DensifyParams {
    count: u32,
    max_out: u32,
    clone_threshold: u32,
    reset_new_state: u32,
    prune_opacity: f32,
    split_scale: f32,
    seed: u32,
    mode: u32,
}

const MODE_POSITION: u32 = 0;
const MODE_ROTATION: u32 = 1;
const MODE_SCALE: u32 = 2;

pub struct DensifyPass {
    decide_layout: BindGroupLayout,
    decide_pipeline: ComputePipeline,
    cap_pipeline: ComputePipeline,
    total_pipeline: ComputePipeline,

    // Group-0 layouts of the scatter kernels, from the full packed-store
    // set down to the decision-only subset, plus per-group layouts for the
    // optimizer source/destination pairs. Kept tight so every pipeline
    // stays inside the baseline storage-buffer limit.
    store_layout: BindGroupLayout,
    jitter_layout: BindGroupLayout,
    base_layout: BindGroupLayout,
    opt_vec_layout: BindGroupLayout,
    opt_opacity_layout: BindGroupLayout,
    opt_sh_layout: BindGroupLayout,

    scatter_gaussians: ComputePipeline,
    scatter_opt_vec: ComputePipeline,
    scatter_opt_opacity: ComputePipeline,
    scatter_opt_sh: ComputePipeline,

    out_count: Buffer,
    out_action: Buffer,
    offsets: Buffer,
    total: Buffer,
}

impl DensifyPass {
    pub fn new(device: &Device, max_points: u32) -> Self {
        let decide_module = shaders::create_module(device, "densify", shaders::DENSIFY);
        let decide_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("densify decide layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
                storage_entry(5, false),
                storage_entry(6, false),
            ],
        });
        let decide_pl = pipeline_layout(device, "densify decide pl", &[&decide_layout]);

        let scatter_module =
            shaders::create_module(device, "densify scatter", shaders::DENSIFY_SCATTER);
        let store_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scatter store layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, true),
                storage_entry(6, false),
                storage_entry(7, false),
            ],
        });
        // Optimizer position scatter recomputes the jitter and so still
        // reads the packed store.
        let jitter_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scatter jitter layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
            ],
        });
        let base_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scatter base layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
            ],
        });
        let opt_vec_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scatter opt vec layout"),
            entries: &[storage_entry(0, true), storage_entry(1, false)],
        });
        let opt_opacity_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scatter opt opacity layout"),
            entries: &[storage_entry(2, true), storage_entry(3, false)],
        });
        let opt_sh_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scatter opt sh layout"),
            entries: &[
                storage_entry(4, true),
                storage_entry(5, false),
                storage_entry(6, true),
                storage_entry(7, false),
            ],
        });

        let store_pl = pipeline_layout(device, "scatter store pl", &[&store_layout]);
        let vec_pl = pipeline_layout(device, "scatter vec pl", &[&jitter_layout, &opt_vec_layout]);
        let opacity_pl = pipeline_layout(
            device,
            "scatter opacity pl",
            &[&base_layout, &opt_opacity_layout],
        );
        let sh_pl = pipeline_layout(device, "scatter sh pl", &[&base_layout, &opt_sh_layout]);

        let usage = BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC;
        let n = max_points.max(1) as u64;

        Self {
            decide_pipeline: compute_pipeline(device, "densify decide", &decide_pl, &decide_module, "densify_decide"),
            cap_pipeline: compute_pipeline(device, "densify cap", &decide_pl, &decide_module, "densify_cap"),
            total_pipeline: compute_pipeline(device, "densify total", &decide_pl, &decide_module, "densify_total"),
            decide_layout,
            scatter_gaussians: compute_pipeline(device, "scatter gaussians", &store_pl, &scatter_module, "scatter_gaussians"),
            scatter_opt_vec: compute_pipeline(device, "scatter opt vec", &vec_pl, &scatter_module, "scatter_opt_vec"),
            scatter_opt_opacity: compute_pipeline(device, "scatter opt opacity", &opacity_pl, &scatter_module, "scatter_opt_opacity"),
            scatter_opt_sh: compute_pipeline(device, "scatter opt sh", &sh_pl, &scatter_module, "scatter_opt_sh"),
            store_layout,
            jitter_layout,
            base_layout,
            opt_vec_layout,
            opt_opacity_layout,
            opt_sh_layout,
            out_count: create_buffer(device, "densify counts", n * 4, usage),
            out_action: create_buffer(device, "densify actions", n * 4, usage),
            offsets: create_buffer(device, "densify offsets", n * 4, usage),
            total: create_buffer(device, "densify total", 4, usage),
        }
    }

    fn params(&self, device: &Device, config: &TrainerConfig, count: u32, mode: u32) -> Buffer {
        let max_out = config
            .max_points()
            .min(count as u64 + config.max_new_points_per_step as u64)
            as u32;
        create_buffer_init(
            device,
            "densify params",
            &[DensifyParams {
                count,
                max_out,
                clone_threshold: config.clone_threshold_count,
                reset_new_state: 1,
                prune_opacity: config.prune_opacity,
                split_scale: config.split_scale_threshold,
                seed: config.seed as u32,
                mode,
            }],
            BufferUsages::UNIFORM,
        )
    }

    /// Record decide → scan → cap → scan → total for the current scene.
    pub fn record_decide(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        scanner: &PrefixScanner,
        scene: &GpuScene,
        metric_counts: &Buffer,
        config: &TrainerConfig,
    ) -> Result<(), TrainError> {
        let n = scene.num_points;
        let params = self.params(device, config, n, 0);

        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("densify decide bind group"),
            layout: &self.decide_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: scene.gaussians.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: metric_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.offsets.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.out_count.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: self.out_action.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: self.total.as_entire_binding(),
                },
            ],
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("densify decide"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.decide_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(dispatch_size(n, 256), 1, 1);
        }

        // Tentative offsets, then the capacity cap, then final offsets.
        scanner.record(device, encoder, &self.out_count, &self.offsets, n)?;
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("densify cap"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.cap_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(dispatch_size(n, 256), 1, 1);
        }
        scanner.record(device, encoder, &self.out_count, &self.offsets, n)?;
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("densify total"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.total_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }
        Ok(())
    }

    /// Read back the output count decided by the GPU. Suspends on the
    /// buffer map; the cap guarantees the value fits the byte budget.
    pub fn read_total(&self, device: &Device, queue: &Queue) -> Result<u32, TrainError> {
        let total: Vec<u32> = read_buffer_blocking(device, queue, &self.total, 1)?;
        Ok(total[0])
    }

    fn decision_entries<'a>(
        &'a self,
        params: &'a Buffer,
        src: &'a GpuScene,
        with_gaussians: bool,
    ) -> Vec<wgpu::BindGroupEntry<'a>> {
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: self.offsets.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: self.out_count.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: self.out_action.as_entire_binding(),
            },
        ];
        if with_gaussians {
            entries.push(wgpu::BindGroupEntry {
                binding: 4,
                resource: src.gaussians.as_entire_binding(),
            });
        }
        entries
    }

    fn pair_group(
        &self,
        device: &Device,
        layout: &BindGroupLayout,
        first_binding: u32,
        src: &Buffer,
        dst: &Buffer,
    ) -> BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("densify scatter pair group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: first_binding,
                    resource: src.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: first_binding + 1,
                    resource: dst.as_entire_binding(),
                },
            ],
        })
    }

    /// Record the scatter passes from `src` into `dst`: the packed store
    /// plus SH, then position/rotation/scale/opacity/SH optimizer state.
    pub fn record_scatter(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        src: &GpuScene,
        dst: &GpuScene,
        config: &TrainerConfig,
    ) {
        let n = src.num_points;
        let groups = dispatch_size(n, 256);
        let dispatch = |encoder: &mut CommandEncoder,
                        label: &str,
                        pipeline: &ComputePipeline,
                        bind_groups: &[&BindGroup]| {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            for (i, group) in bind_groups.iter().enumerate() {
                pass.set_bind_group(i as u32, group, &[]);
            }
            pass.dispatch_workgroups(groups, 1, 1);
        };

        // Packed store + SH.
        {
            let params = self.params(device, config, n, 0);
            let mut entries = self.decision_entries(&params, src, true);
            entries.push(wgpu::BindGroupEntry {
                binding: 5,
                resource: src.sh.as_entire_binding(),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: 6,
                resource: dst.gaussians.as_entire_binding(),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: 7,
                resource: dst.sh.as_entire_binding(),
            });
            let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("scatter store bind group"),
                layout: &self.store_layout,
                entries: &entries,
            });
            dispatch(encoder, "scatter gaussians", &self.scatter_gaussians, &[&group]);
        }

        // Optimizer vec groups: position (with jitter recompute), rotation,
        // scale.
        let vec_modes = [
            (MODE_POSITION, &src.opt_pos, &dst.opt_pos),
            (MODE_ROTATION, &src.opt_rot, &dst.opt_rot),
            (MODE_SCALE, &src.opt_scale, &dst.opt_scale),
        ];
        for (mode, src_vec, dst_vec) in vec_modes {
            let params = self.params(device, config, n, mode);
            let group0 = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("scatter jitter bind group"),
                layout: &self.jitter_layout,
                entries: &self.decision_entries(&params, src, true),
            });
            let group1 = self.pair_group(device, &self.opt_vec_layout, 0, src_vec, dst_vec);
            dispatch(encoder, "scatter opt vec", &self.scatter_opt_vec, &[&group0, &group1]);
        }

        // Opacity, then SH parameters and moments.
        let params = self.params(device, config, n, 0);
        let group0 = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scatter base bind group"),
            layout: &self.base_layout,
            entries: &self.decision_entries(&params, src, false),
        });
        let opacity_group = self.pair_group(
            device,
            &self.opt_opacity_layout,
            2,
            &src.opt_opacity,
            &dst.opt_opacity,
        );
        dispatch(
            encoder,
            "scatter opt opacity",
            &self.scatter_opt_opacity,
            &[&group0, &opacity_group],
        );

        let sh_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scatter sh bind group"),
            layout: &self.opt_sh_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: src.sh_param.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: dst.sh_param.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: src.sh_state.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: dst.sh_state.as_entire_binding(),
                },
            ],
        });
        dispatch(
            encoder,
            "scatter opt sh",
            &self.scatter_opt_sh,
            &[&group0, &sh_group],
        );
    }
}
