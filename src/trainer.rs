//! Training orchestration.
//!
//! The trainer is a sequential state machine: each call to `step` records
//! one iteration's full pass chain into a single command buffer (the radix
//! sort dispatches indirectly over GPU-computed sizes, so nothing needs an
//! intermediate readback) and pushes it through the queue gate. On the
//! densification schedule it accumulates the error metric over several
//! random views, compacts the scene into fresh buffers, waits for the
//! queue to drain, and swaps.

use std::time::Instant;

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wgpu::{Buffer, BufferUsages, Texture, TextureView};

use crate::config::TrainerConfig;
use crate::core::pack::{PackedGradient, UnpackedGradient};
use crate::core::Camera;
use crate::error::TrainError;
use crate::gpu::adam::AdamOptimizer;
use crate::gpu::backward::BackwardRasterizer;
use crate::gpu::buffers::{create_buffer, create_buffer_init};
use crate::gpu::densify::DensifyPass;
use crate::gpu::frame::{upload_target_image, RenderTargets};
use crate::gpu::geometry::GeometryBackward;
use crate::gpu::loss::LossPass;
use crate::gpu::metric::MetricPass;
use crate::gpu::preprocess::{FrameStats, Preprocessor, RenderUniforms};
use crate::gpu::rasterize::Rasterizer;
use crate::gpu::scan::{PrefixScanner, MAX_ELEMENTS};
use crate::gpu::scene::GpuScene;
use crate::gpu::sort::RadixSorter;
use crate::gpu::tiles::TileRangeBuilder;
use crate::gpu::{GpuContext, QueueGate, GRAD_LANES};
use crate::SceneInit;

/// One reference view: a camera pose and its photograph.
pub struct TrainView {
    pub camera: Camera,
    pub target: Texture,
    target_view: TextureView,
}

impl TrainView {
    /// Wrap a decoded rgba8 image whose dimensions match the camera.
    pub fn from_rgba(
        ctx: &GpuContext,
        camera: Camera,
        rgba: &[u8],
    ) -> Result<Self, TrainError> {
        if rgba.len() != (camera.width * camera.height * 4) as usize {
            return Err(TrainError::invalid(format!(
                "image bytes ({}) do not match the {}x{} viewport",
                rgba.len(),
                camera.width,
                camera.height
            )));
        }
        let target = upload_target_image(&ctx.device, &ctx.queue, rgba, camera.width, camera.height);
        Ok(Self {
            target_view: target.create_view(&Default::default()),
            target,
            camera,
        })
    }
}

/// Progress snapshot reported on request.
#[derive(Clone, Copy, Debug)]
pub struct TrainStatus {
    pub iteration: u32,
    pub iters_per_sec: f32,
    pub num_points: u32,
    pub next_densify: Option<u32>,
}

/// A standalone render of one view, with the forward stats.
pub struct RenderedView {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub visible_gaussians: u32,
}

pub struct Trainer {
    ctx: GpuContext,
    config: TrainerConfig,
    views: Vec<TrainView>,
    scene: GpuScene,

    preprocessor: Preprocessor,
    rasterizer: Rasterizer,
    loss_pass: LossPass,
    backward: BackwardRasterizer,
    geometry: GeometryBackward,
    adam: AdamOptimizer,
    metric: MetricPass,
    densify: DensifyPass,
    sorter: RadixSorter,
    scanner: PrefixScanner,
    tiles: TileRangeBuilder,
    targets: RenderTargets,

    // Per-iteration transients, sized to the point budget.
    splats: Buffer,
    tile_counts: Buffer,
    depths: Buffer,
    offsets: Buffer,
    stats: Buffer,
    sort_info: Buffer,
    sort_dispatch: Buffer,
    grad_accum: Buffer,
    grad_records: Buffer,

    gate: QueueGate,
    rng: StdRng,
    iteration: u32,
    ema_iters_per_sec: f32,
    last_step: Option<Instant>,
}

/// Smoothing constant for the iterations-per-second EMA.
const EMA_ALPHA: f32 = 0.05;

/// In-flight submission cap; bounds latency and transient memory.
const GATE_CAPACITY: u32 = 2;

impl Trainer {
    pub fn new(
        ctx: GpuContext,
        init: SceneInit,
        views: Vec<TrainView>,
        config: TrainerConfig,
    ) -> Result<Self, TrainError> {
        if views.is_empty() {
            return Err(TrainError::invalid("no training views"));
        }
        if init.sh_degree != config.sh_degree {
            return Err(TrainError::invalid(format!(
                "scene SH degree {} does not match configured degree {}",
                init.sh_degree, config.sh_degree
            )));
        }
        let max_points = config.max_points().min(MAX_ELEMENTS as u64) as u32;
        if init.len() as u64 > max_points as u64 {
            return Err(TrainError::Capacity {
                what: "initial scene",
                required: init.len() as u64 * TrainerConfig::BYTES_PER_POINT,
                budget: config.max_buffer_bytes,
            });
        }
        let weight_sum = config.loss.sum();
        if (weight_sum - 1.0).abs() > 1e-3 {
            eprintln!("warning: loss weights sum to {weight_sum:.3}, not 1.0");
        }

        let device = &ctx.device;
        let (max_w, max_h) = views.iter().fold((1u32, 1u32), |(w, h), v| {
            (w.max(v.camera.width), h.max(v.camera.height))
        });
        let max_tiles = max_w.div_ceil(16) * max_h.div_ceil(16);

        // Worst-case per-view key budget: every splat touching a generous
        // number of tiles, clamped to what one scan pass can cover.
        let max_tile_entries =
            (max_points as u64 * 32).clamp(1 << 20, MAX_ELEMENTS as u64) as u32;

        let scene = GpuScene::upload(device, &init)?;
        let storage = BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC;
        let n64 = max_points as u64;

        let trainer = Self {
            preprocessor: Preprocessor::new(device),
            rasterizer: Rasterizer::new(device),
            loss_pass: LossPass::new(device),
            backward: BackwardRasterizer::new(device),
            geometry: GeometryBackward::new(device),
            adam: AdamOptimizer::new(device),
            metric: MetricPass::new(device, max_w * max_h, max_points),
            densify: DensifyPass::new(device, max_points),
            sorter: RadixSorter::new(device, max_tile_entries)?,
            scanner: PrefixScanner::new(device, max_points)?,
            tiles: TileRangeBuilder::new(device, max_tiles),
            targets: RenderTargets::new(device, max_w, max_h),
            splats: create_buffer(device, "splats", n64 * 24, storage),
            tile_counts: create_buffer(device, "tile counts", n64 * 4, storage),
            depths: create_buffer(device, "depths", n64 * 4, storage),
            offsets: create_buffer(device, "key offsets", n64 * 4, storage),
            stats: create_buffer(device, "frame stats", 16, storage),
            sort_info: create_buffer(device, "sort info", 16, storage),
            sort_dispatch: create_buffer(
                device,
                "sort dispatch",
                12,
                BufferUsages::STORAGE | BufferUsages::INDIRECT,
            ),
            grad_accum: create_buffer(device, "grad accum", n64 * GRAD_LANES * 4, storage),
            grad_records: create_buffer(device, "grad records", n64 * 32, storage),
            gate: QueueGate::new(GATE_CAPACITY),
            rng: StdRng::seed_from_u64(config.seed),
            iteration: 0,
            ema_iters_per_sec: 0.0,
            last_step: None,
            ctx,
            config,
            views,
            scene,
        };
        Ok(trainer)
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn num_points(&self) -> u32 {
        self.scene.num_points
    }

    pub fn status(&self) -> TrainStatus {
        TrainStatus {
            iteration: self.iteration,
            iters_per_sec: self.ema_iters_per_sec,
            num_points: self.scene.num_points,
            next_densify: self.config.densify.next_after(self.iteration),
        }
    }

    /// Download the packed store and SH buffers (the persistable state).
    pub fn download_packed(&self) -> Result<SceneInit, TrainError> {
        self.ctx.check_alive()?;
        self.scene.download_packed(&self.ctx.device, &self.ctx.queue)
    }

    /// Download the most recent per-Gaussian gradient records (debugging
    /// aid; waits for the queue).
    pub fn download_gradients(&self) -> Result<Vec<UnpackedGradient>, TrainError> {
        self.ctx.check_alive()?;
        self.gate.wait_idle(&self.ctx.device);
        let records: Vec<PackedGradient> = crate::gpu::buffers::read_buffer_blocking(
            &self.ctx.device,
            &self.ctx.queue,
            &self.grad_records,
            self.scene.num_points as usize,
        )?;
        Ok(records.iter().map(PackedGradient::unpack).collect())
    }

    fn view_uniforms(&self, camera: &Camera) -> (RenderUniforms, Buffer) {
        let uniforms = RenderUniforms::new(
            camera,
            self.scene.num_points,
            self.config.sh_degree,
            Vector3::from(self.config.background),
            self.config.seed as u32 ^ self.iteration,
            self.config.max_radius_px,
        );
        let buffer = create_buffer_init(
            &self.ctx.device,
            "view uniforms",
            &[uniforms],
            BufferUsages::UNIFORM,
        );
        (uniforms, buffer)
    }

    /// Record projection → sort → tile ranges → rasterization for one view.
    fn record_forward(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        uniforms: &RenderUniforms,
        uniforms_buf: &Buffer,
    ) -> Result<(), TrainError> {
        let device = &self.ctx.device;
        let n = self.scene.num_points;

        self.preprocessor.record_preprocess(
            device,
            encoder,
            uniforms_buf,
            &self.scene,
            &self.splats,
            &self.tile_counts,
            &self.depths,
            &self.stats,
        );
        self.scanner
            .record(device, encoder, &self.tile_counts, &self.offsets, n)?;
        self.preprocessor.record_emit_keys(
            device,
            encoder,
            uniforms_buf,
            &self.tile_counts,
            &self.offsets,
            &self.depths,
            &self.splats,
            &self.sorter,
            &self.sort_info,
            &self.sort_dispatch,
            n,
        );
        self.sorter
            .record(device, encoder, &self.sort_info, &self.sort_dispatch)?;
        self.tiles.record(
            device,
            encoder,
            uniforms_buf,
            &self.sort_info,
            self.sorter.sorted_keys(),
            uniforms.num_tiles(),
            &self.sort_dispatch,
        );
        self.rasterizer.record(
            device,
            encoder,
            uniforms_buf,
            &self.splats,
            self.sorter.sorted_values(),
            self.tiles.tile_offsets(),
            &self.targets.color_view,
            &self.targets.transmittance_view,
            &self.targets.contrib_view,
            (uniforms.tile_bounds[0], uniforms.tile_bounds[1]),
        );
        Ok(())
    }

    /// Run one training iteration: forward, loss, backward, Adam.
    pub fn step(&mut self) -> Result<(), TrainError> {
        self.ctx.check_alive()?;

        // Advisory: the optimizer's clock moves even if the submission
        // later fails; everything else stays unchanged in that case.
        self.iteration += 1;

        let view_idx = self.rng.gen_range(0..self.views.len());
        let camera = self.views[view_idx].camera.clone();
        let (uniforms, uniforms_buf) = self.view_uniforms(&camera);

        let device = &self.ctx.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("train iteration"),
        });

        self.record_forward(&mut encoder, &uniforms, &uniforms_buf)?;
        self.loss_pass.record(
            device,
            &mut encoder,
            &self.config.loss,
            &self.targets.color_view,
            &self.views[view_idx].target_view,
            &self.targets.loss_grad_view,
            (camera.width, camera.height),
        );
        self.backward.record(
            device,
            &mut encoder,
            &uniforms_buf,
            &self.splats,
            self.sorter.sorted_values(),
            self.tiles.tile_offsets(),
            &self.grad_accum,
            &self.targets.loss_grad_view,
            &self.targets.transmittance_view,
            &self.targets.contrib_view,
            (uniforms.tile_bounds[0], uniforms.tile_bounds[1]),
        );
        self.geometry.record(
            device,
            &mut encoder,
            &uniforms_buf,
            &self.scene.gaussians,
            &self.grad_accum,
            &self.tile_counts,
            &self.grad_records,
            self.scene.num_points,
        );
        self.adam.record(
            device,
            &mut encoder,
            &self.scene,
            &self.grad_records,
            &self.tile_counts,
            &self.config.learning_rates,
            &self.config.adam,
            uniforms.cam_pos,
        );

        self.gate.submit(device, &self.ctx.queue, encoder.finish());
        self.ctx.check_alive()?;

        // Smoothed throughput.
        let now = Instant::now();
        if let Some(last) = self.last_step {
            let dt = now.duration_since(last).as_secs_f32().max(1e-6);
            let inst = 1.0 / dt;
            self.ema_iters_per_sec = if self.ema_iters_per_sec == 0.0 {
                inst
            } else {
                self.ema_iters_per_sec * (1.0 - EMA_ALPHA) + inst * EMA_ALPHA
            };
        }
        self.last_step = Some(now);

        if self.config.densify.is_due(self.iteration) {
            self.run_densify()?;
        }
        Ok(())
    }

    /// Run the training loop to the configured iteration count. Stopping
    /// between iterations is the only cancellation point; an in-flight
    /// iteration always runs to completion.
    pub fn train(&mut self) -> Result<(), TrainError> {
        while self.iteration < self.config.max_iterations {
            self.step()?;
            if self.iteration % 100 == 0 {
                let s = self.status();
                eprintln!(
                    "iter {:6}  {:6.1} it/s  points={}  next_densify={:?}",
                    s.iteration, s.iters_per_sec, s.num_points, s.next_densify
                );
            }
        }
        self.gate.wait_idle(&self.ctx.device);
        self.ctx.check_alive()
    }

    /// Densification cycle: score K random views, compact, swap.
    fn run_densify(&mut self) -> Result<(), TrainError> {
        let device = &self.ctx.device;
        let k = self.config.metric.views.max(1).min(self.views.len() as u32);

        // Accumulate the influence metric over K random views.
        for view_round in 0..k {
            let view_idx = if (self.views.len() as u32) == k {
                view_round as usize
            } else {
                self.rng.gen_range(0..self.views.len())
            };
            let camera = self.views[view_idx]
                .camera
                .downscaled(self.config.metric.downscale);
            let (uniforms, uniforms_buf) = self.view_uniforms(&camera);

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("densify metric view"),
            });
            if view_round == 0 {
                self.metric.record_reset(&mut encoder);
            }
            self.record_forward(&mut encoder, &uniforms, &uniforms_buf)?;
            self.metric.record_mask(
                device,
                &mut encoder,
                &self.targets.color_view,
                &self.views[view_idx].target_view,
                &self.targets.metric_mask_view,
                (camera.width, camera.height),
                self.config.metric.threshold,
                1.0 / self.config.metric.downscale.max(1e-6),
            );
            self.metric.record_count(
                device,
                &mut encoder,
                &uniforms_buf,
                &self.splats,
                self.sorter.sorted_values(),
                self.tiles.tile_offsets(),
                &self.targets.contrib_view,
                &self.targets.metric_mask_view,
                (uniforms.tile_bounds[0], uniforms.tile_bounds[1]),
            );
            if view_round + 1 == k {
                self.metric.record_divide(
                    device,
                    &mut encoder,
                    &self.targets.color_view,
                    &self.views[view_idx].target_view,
                    &self.targets.metric_mask_view,
                    k,
                    self.scene.num_points,
                );
            }
            self.gate.submit(device, &self.ctx.queue, encoder.finish());
        }

        // Decide, cap, and read back the output size.
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("densify decide"),
        });
        self.densify.record_decide(
            device,
            &mut encoder,
            &self.scanner,
            &self.scene,
            self.metric.metric_counts(),
            &self.config,
        )?;
        self.gate.submit(device, &self.ctx.queue, encoder.finish());

        let total = self.densify.read_total(device, &self.ctx.queue)?;
        self.ctx.check_alive()?;
        if total == 0 {
            return Err(TrainError::invalid(
                "densification pruned every Gaussian; scene is empty",
            ));
        }
        // The GPU-side cap already bounds the scatter; a larger readback
        // means the decision buffers are corrupt, not merely full.
        let cap = self
            .config
            .max_points()
            .min(self.scene.num_points as u64 + self.config.max_new_points_per_step as u64)
            as u32;
        if total > cap {
            return Err(TrainError::Capacity {
                what: "densify output",
                required: total as u64 * TrainerConfig::BYTES_PER_POINT,
                budget: cap as u64 * TrainerConfig::BYTES_PER_POINT,
            });
        }

        // Scatter into fresh allocations.
        let fresh = GpuScene::allocate(device, total, self.scene.sh_degree);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("densify scatter"),
        });
        self.densify
            .record_scatter(device, &mut encoder, &self.scene, &fresh, &self.config);
        self.gate.submit(device, &self.ctx.queue, encoder.finish());

        // Publish only once nothing in flight references the old storage.
        self.gate.wait_idle(device);
        self.ctx.check_alive()?;
        let old_points = self.scene.num_points;
        self.scene = fresh;
        eprintln!(
            "densify @ iter {}: {} -> {} points",
            self.iteration, old_points, total
        );
        Ok(())
    }

    /// Render one view standalone (for display or inspection) and read the
    /// color buffer back. Waits for the queue, so this is not a hot path.
    pub fn render_view(&mut self, camera: &Camera) -> Result<RenderedView, TrainError> {
        self.ctx.check_alive()?;
        if camera.width > self.targets.width || camera.height > self.targets.height {
            return Err(TrainError::invalid(format!(
                "viewport {}x{} exceeds the allocated {}x{} targets",
                camera.width, camera.height, self.targets.width, self.targets.height
            )));
        }
        let (uniforms, uniforms_buf) = self.view_uniforms(camera);
        let device = &self.ctx.device;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("render view"),
        });
        self.record_forward(&mut encoder, &uniforms, &uniforms_buf)?;

        // rgba8 rows padded to the required 256-byte alignment.
        let bytes_per_row = (camera.width * 4).div_ceil(256) * 256;
        let readback = create_buffer(
            device,
            "render readback",
            bytes_per_row as u64 * camera.height as u64,
            BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
        );
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.targets.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(camera.height),
                },
            },
            wgpu::Extent3d {
                width: camera.width,
                height: camera.height,
                depth_or_array_layers: 1,
            },
        );

        self.gate.submit(device, &self.ctx.queue, encoder.finish());
        self.gate.wait_idle(device);

        let stats: Vec<FrameStats> =
            crate::gpu::buffers::read_buffer_blocking(device, &self.ctx.queue, &self.stats, 1)?;

        let padded: Vec<u8> =
            crate::gpu::buffers::read_buffer_blocking(device, &self.ctx.queue, &readback, (bytes_per_row * camera.height) as usize)?;
        let mut rgba = Vec::with_capacity((camera.width * camera.height * 4) as usize);
        for row in 0..camera.height {
            let start = (row * bytes_per_row) as usize;
            rgba.extend_from_slice(&padded[start..start + (camera.width * 4) as usize]);
        }

        Ok(RenderedView {
            rgba,
            width: camera.width,
            height: camera.height,
            visible_gaussians: stats[0].visible,
        })
    }
}
