//! Densification metric stage: per-view error masks reduced to
//! per-Gaussian influence counts.
//!
//! Per view, four passes: quantized L1 error, a min/max tree reduction,
//! the normalized threshold mask, and the per-tile contributor count. The
//! counts accumulate across the cycle's views and are averaged at the end.

use wgpu::{BindGroup, BindGroupLayout, Buffer, BufferUsages, CommandEncoder, ComputePipeline, Device, TextureSampleType, TextureView};

use crate::gpu::buffers::{create_buffer, create_buffer_init};
use crate::gpu::{
    compute_pipeline, dispatch_size, pipeline_layout, shaders, storage_entry,
    storage_texture_entry, texture_entry, uniform_entry,
};

/// Quantization scale: a per-pixel L1 error of 1.0 maps to this integer.
const ERR_QUANT_SCALE: f32 = 1.0e6;

const REDUCE_BLOCK: u32 = 512;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct MetricParams {
    viewport: [u32; 2],
    threshold: f32,
    err_scale: f32,
    reduce_n: u32,
    views: u32,
    count: u32,
    inv_downscale: f32,
}

pub struct MetricPass {
    image_layout: BindGroupLayout,
    error_pipeline: ComputePipeline,
    reduce_pipeline: ComputePipeline,
    threshold_pipeline: ComputePipeline,
    divide_pipeline: ComputePipeline,
    count_layout: BindGroupLayout,
    count_pipeline: ComputePipeline,

    err_quant: Buffer,
    pairs: [Buffer; 2],
    metric_counts: Buffer,
    max_pixels: u32,
}

impl MetricPass {
    pub fn new(device: &Device, max_pixels: u32, max_points: u32) -> Self {
        let image_module =
            shaders::create_module_standalone(device, "metric image", shaders::METRIC_IMAGE);
        let image_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("metric image layout"),
            entries: &[
                uniform_entry(0),
                texture_entry(1, TextureSampleType::Float { filterable: false }),
                texture_entry(2, TextureSampleType::Float { filterable: false }),
                storage_entry(3, true),
                storage_entry(4, false),
                storage_entry(5, false),
                storage_texture_entry(6, wgpu::TextureFormat::R32Uint),
                storage_entry(7, false),
            ],
        });
        let image_pl = pipeline_layout(device, "metric image pl", &[&image_layout]);

        let count_module = shaders::create_module(device, "metric count", shaders::METRIC_COUNT);
        let count_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("metric count layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                texture_entry(4, TextureSampleType::Uint),
                texture_entry(5, TextureSampleType::Uint),
                storage_entry(6, false),
            ],
        });
        let count_pl = pipeline_layout(device, "metric count pl", &[&count_layout]);

        let usage = BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC;
        let pairs_len = max_pixels.max(1) as u64 * 8;
        Self {
            error_pipeline: compute_pipeline(device, "metric error", &image_pl, &image_module, "metric_error"),
            reduce_pipeline: compute_pipeline(device, "metric reduce", &image_pl, &image_module, "metric_reduce"),
            threshold_pipeline: compute_pipeline(device, "metric threshold", &image_pl, &image_module, "metric_threshold"),
            divide_pipeline: compute_pipeline(device, "metric divide", &image_pl, &image_module, "metric_divide"),
            image_layout,
            count_pipeline: compute_pipeline(device, "metric count", &count_pl, &count_module, "metric_count"),
            count_layout,
            err_quant: create_buffer(device, "metric err", max_pixels.max(1) as u64 * 4, usage),
            pairs: [
                create_buffer(device, "metric pairs 0", pairs_len, usage),
                create_buffer(device, "metric pairs 1", pairs_len, usage),
            ],
            metric_counts: create_buffer(device, "metric counts", max_points.max(1) as u64 * 4, usage),
            max_pixels,
        }
    }

    pub fn metric_counts(&self) -> &Buffer {
        &self.metric_counts
    }

    /// Zero the influence counters at the start of a densify cycle.
    pub fn record_reset(&self, encoder: &mut CommandEncoder) {
        encoder.clear_buffer(&self.metric_counts, 0, None);
    }

    fn image_group(
        &self,
        device: &Device,
        params: &Buffer,
        pred: &TextureView,
        target: &TextureView,
        pairs_in: &Buffer,
        pairs_out: &Buffer,
        mask: &TextureView,
    ) -> BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("metric image bind group"),
            layout: &self.image_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(pred),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(target),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: pairs_in.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: pairs_out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: self.err_quant.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::TextureView(mask),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: self.metric_counts.as_entire_binding(),
                },
            ],
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn params(
        &self,
        device: &Device,
        viewport: (u32, u32),
        threshold: f32,
        reduce_n: u32,
        views: u32,
        count: u32,
        inv_downscale: f32,
    ) -> Buffer {
        create_buffer_init(
            device,
            "metric params",
            &[MetricParams {
                viewport: [viewport.0, viewport.1],
                threshold,
                err_scale: ERR_QUANT_SCALE,
                reduce_n,
                views,
                count,
                inv_downscale,
            }],
            BufferUsages::UNIFORM,
        )
    }

    /// Record the image-space passes for one view: error, min/max
    /// reduction, threshold mask.
    #[allow(clippy::too_many_arguments)]
    pub fn record_mask(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        prediction: &TextureView,
        target: &TextureView,
        mask: &TextureView,
        viewport: (u32, u32),
        threshold: f32,
        inv_downscale: f32,
    ) {
        let num_pixels = viewport.0 * viewport.1;
        debug_assert!(num_pixels <= self.max_pixels);

        // Error pass writes the quantized image and its (v, v) pairs.
        {
            let params = self.params(device, viewport, threshold, 0, 0, 0, inv_downscale);
            let group = self.image_group(
                device,
                &params,
                prediction,
                target,
                &self.pairs[1],
                &self.pairs[0],
                mask,
            );
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("metric error"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.error_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(
                dispatch_size(viewport.0, 16),
                dispatch_size(viewport.1, 16),
                1,
            );
        }

        // Tree reduction, ping-ponging between the pair buffers.
        let mut n = num_pixels;
        let mut src = 0usize;
        while n > 1 {
            let out = 1 - src;
            let blocks = n.div_ceil(REDUCE_BLOCK);
            let params = self.params(device, viewport, threshold, n, 0, 0, inv_downscale);
            let group = self.image_group(
                device,
                &params,
                prediction,
                target,
                &self.pairs[src],
                &self.pairs[out],
                mask,
            );
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("metric reduce"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.reduce_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(blocks, 1, 1);
            n = blocks;
            src = out;
        }

        // Threshold mask reads the final (min, max) from the last output.
        {
            let params = self.params(device, viewport, threshold, 0, 0, 0, inv_downscale);
            let group = self.image_group(
                device,
                &params,
                prediction,
                target,
                &self.pairs[src],
                &self.pairs[1 - src],
                mask,
            );
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("metric threshold"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.threshold_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(
                dispatch_size(viewport.0, 16),
                dispatch_size(viewport.1, 16),
                1,
            );
        }
    }

    /// Record the per-tile influence count for one view.
    #[allow(clippy::too_many_arguments)]
    pub fn record_count(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        uniforms: &Buffer,
        splats: &Buffer,
        sorted_values: &Buffer,
        tile_offsets: &Buffer,
        contrib: &TextureView,
        mask: &TextureView,
        tile_bounds: (u32, u32),
    ) {
        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("metric count bind group"),
            layout: &self.count_layout,
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
                    resource: wgpu::BindingResource::TextureView(contrib),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(mask),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: self.metric_counts.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("metric count"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.count_pipeline);
        pass.set_bind_group(0, &group, &[]);
        pass.dispatch_workgroups(tile_bounds.0, tile_bounds.1, 1);
    }

    /// Record the end-of-cycle average over the K sampled views.
    pub fn record_divide(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        dummy_pred: &TextureView,
        dummy_target: &TextureView,
        dummy_mask: &TextureView,
        views: u32,
        count: u32,
    ) {
        let params = self.params(device, (1, 1), 0.0, 0, views, count, 1.0);
        let group = self.image_group(
            device,
            &params,
            dummy_pred,
            dummy_target,
            &self.pairs[0],
            &self.pairs[1],
            dummy_mask,
        );
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("metric divide"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.divide_pipeline);
        pass.set_bind_group(0, &group, &[]);
        pass.dispatch_workgroups(dispatch_size(count, 256), 1, 1);
    }
}
