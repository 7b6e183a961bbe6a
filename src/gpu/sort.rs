//! GPU radix sort for the per-tile key stream.
//!
//! Stable key/value sort of u32 keys in four 8-bit passes over ping-pong
//! buffer pairs. Histogram and scatter dispatch indirectly over the block
//! count computed on the GPU by the key-emission epilogue, so the whole
//! sort stays inside one command encoder even though the key count is only
//! known on the GPU. Padding keys are zero, which decodes to "no tile" and
//! is dropped by the tile-range builder.

use wgpu::{BindGroupLayout, Buffer, BufferUsages, CommandEncoder, ComputePipeline, Device};

use crate::error::TrainError;
use crate::gpu::buffers::create_buffer;
use crate::gpu::scan::PrefixScanner;
use crate::gpu::{compute_pipeline, pipeline_layout, shaders, storage_entry, uniform_entry};

/// Keys handled per histogram/scatter block.
pub const SORT_BLOCK: u32 = 256;

const RADIX: u32 = 256;
const PASSES: u32 = 4;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SortPassParams {
    shift: u32,
    max_blocks: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Host mirror of the GPU-side sort bookkeeping (key count, padded size,
/// block count, buffer capacity).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SortInfo {
    pub num_keys: u32,
    pub padded_size: u32,
    pub num_blocks: u32,
    pub capacity: u32,
}

pub struct RadixSorter {
    layout: BindGroupLayout,
    histogram_pipeline: ComputePipeline,
    scatter_pipeline: ComputePipeline,
    scanner: PrefixScanner,
    histograms: Buffer,
    histograms_scanned: Buffer,
    keys: [Buffer; 2],
    values: [Buffer; 2],
    max_entries: u32,
    max_blocks: u32,
}

impl RadixSorter {
    /// `max_entries` is rounded up to a whole sort block; both ping-pong
    /// pairs are allocated at that capacity.
    pub fn new(device: &Device, max_entries: u32) -> Result<Self, TrainError> {
        let max_entries = max_entries.div_ceil(SORT_BLOCK).max(1) * SORT_BLOCK;
        let max_blocks = max_entries / SORT_BLOCK;

        let module = shaders::create_module_standalone(device, "radix sort", shaders::RADIX_SORT);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("radix sort layout"),
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
        let pl = pipeline_layout(device, "radix sort pipeline layout", &[&layout]);
        let histogram_pipeline =
            compute_pipeline(device, "sort histogram", &pl, &module, "sort_histogram");
        let scatter_pipeline =
            compute_pipeline(device, "sort scatter", &pl, &module, "sort_scatter");

        let hist_len = (RADIX * max_blocks) as u64 * 4;
        let usage = BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC;
        let pair = |label: &str| {
            [
                create_buffer(device, &format!("{label} 0"), max_entries as u64 * 4, usage),
                create_buffer(device, &format!("{label} 1"), max_entries as u64 * 4, usage),
            ]
        };

        Ok(Self {
            histogram_pipeline,
            scatter_pipeline,
            layout,
            scanner: PrefixScanner::new(device, RADIX * max_blocks)?,
            histograms: create_buffer(device, "sort histograms", hist_len, usage),
            histograms_scanned: create_buffer(device, "sort histograms scanned", hist_len, usage),
            keys: pair("sort keys"),
            values: pair("sort values"),
            max_entries,
            max_blocks,
        })
    }

    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }

    /// The buffers key emission writes into. They must be cleared first so
    /// the padding tail decodes as "no tile".
    pub fn input_keys(&self) -> &Buffer {
        &self.keys[0]
    }

    pub fn input_values(&self) -> &Buffer {
        &self.values[0]
    }

    /// Where the sorted stream lands after all four passes (an even number
    /// of ping-pongs returns to the input pair).
    pub fn sorted_keys(&self) -> &Buffer {
        &self.keys[0]
    }

    pub fn sorted_values(&self) -> &Buffer {
        &self.values[0]
    }

    /// Record the full four-pass sort. `sort_info` and `dispatch` are the
    /// buffers the key-emission epilogue populated; `dispatch` holds the
    /// indirect workgroup counts for the histogram and scatter passes.
    pub fn record(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        sort_info: &Buffer,
        dispatch: &Buffer,
    ) -> Result<(), TrainError> {
        for pass_idx in 0..PASSES {
            let src = (pass_idx % 2) as usize;
            let dst = 1 - src;

            let params = SortPassParams {
                shift: pass_idx * 8,
                max_blocks: self.max_blocks,
                _pad0: 0,
                _pad1: 0,
            };
            let params_buf = crate::gpu::buffers::create_buffer_init(
                device,
                "sort pass params",
                &[params],
                BufferUsages::UNIFORM,
            );

            // Stale counts from larger earlier frames must not survive into
            // the scan, so the histogram buffer is cleared every pass.
            encoder.clear_buffer(&self.histograms, 0, None);

            let make_group = |hist: &Buffer| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("radix sort bind group"),
                    layout: &self.layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: params_buf.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: sort_info.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: self.keys[src].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: self.values[src].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: self.keys[dst].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 5,
                            resource: self.values[dst].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 6,
                            resource: hist.as_entire_binding(),
                        },
                    ],
                })
            };
            let hist_group = make_group(&self.histograms);
            let scatter_group = make_group(&self.histograms_scanned);

            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("sort histogram"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.histogram_pipeline);
                pass.set_bind_group(0, &hist_group, &[]);
                pass.dispatch_workgroups_indirect(dispatch, 0);
            }

            self.scanner.record(
                device,
                encoder,
                &self.histograms,
                &self.histograms_scanned,
                RADIX * self.max_blocks,
            )?;

            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("sort scatter"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.scatter_pipeline);
                pass.set_bind_group(0, &scatter_group, &[]);
                pass.dispatch_workgroups_indirect(dispatch, 0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_block() {
        // Rounding logic mirrored on the host.
        let cap = 1000u32.div_ceil(SORT_BLOCK) * SORT_BLOCK;
        assert_eq!(cap, 1024);
    }
}
