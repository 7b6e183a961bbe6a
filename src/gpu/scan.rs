//! Blelloch exclusive prefix scan over u32 arrays.
//!
//! Three dispatches: per-block shared-memory scan, a single-workgroup scan
//! of the block totals, and a block-offset add. The middle phase folds 32
//! totals per thread, so one scanner instance covers up to
//! 2·256·(256·32) = 4 194 304 elements. The caller recovers the grand
//! total as `scan[n-1] + input[n-1]`.

use wgpu::{BindGroupLayout, Buffer, BufferUsages, CommandEncoder, ComputePipeline, Device};

use crate::error::TrainError;
use crate::gpu::buffers::create_buffer;
use crate::gpu::{compute_pipeline, dispatch_size, pipeline_layout, shaders, storage_entry, uniform_entry};

/// Elements scanned per workgroup in the block phase.
pub const SCAN_BLOCK: u32 = 512;

/// Block totals folded per thread in the totals phase.
const TOTALS_PER_THREAD: u32 = 32;

/// Hard limit of a single scanner instance.
pub const MAX_ELEMENTS: u32 = SCAN_BLOCK * 256 * TOTALS_PER_THREAD;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ScanParams {
    n: u32,
    num_blocks: u32,
    _pad0: u32,
    _pad1: u32,
}

pub struct PrefixScanner {
    layout: BindGroupLayout,
    scan_blocks: ComputePipeline,
    scan_totals: ComputePipeline,
    scan_add: ComputePipeline,
    block_sums: Buffer,
    max_elements: u32,
}

impl PrefixScanner {
    pub fn new(device: &Device, max_elements: u32) -> Result<Self, TrainError> {
        if max_elements > MAX_ELEMENTS {
            return Err(TrainError::Capacity {
                what: "prefix scan",
                required: max_elements as u64,
                budget: MAX_ELEMENTS as u64,
            });
        }

        let module = shaders::create_module_standalone(device, "scan shader", shaders::SCAN);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scan bind group layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, false),
                storage_entry(3, false),
            ],
        });
        let pl = pipeline_layout(device, "scan pipeline layout", &[&layout]);

        let max_blocks = max_elements.div_ceil(SCAN_BLOCK).max(1);
        let block_sums = create_buffer(
            device,
            "scan block sums",
            max_blocks as u64 * 4,
            BufferUsages::STORAGE | BufferUsages::COPY_DST,
        );

        Ok(Self {
            scan_blocks: compute_pipeline(device, "scan blocks", &pl, &module, "scan_blocks"),
            scan_totals: compute_pipeline(device, "scan totals", &pl, &module, "scan_totals"),
            scan_add: compute_pipeline(device, "scan add", &pl, &module, "scan_add"),
            layout,
            block_sums,
            max_elements,
        })
    }

    /// Record an exclusive scan of `input[0..n]` into `output`.
    pub fn record(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        input: &Buffer,
        output: &Buffer,
        n: u32,
    ) -> Result<(), TrainError> {
        if n == 0 {
            return Ok(());
        }
        if n > self.max_elements {
            return Err(TrainError::Capacity {
                what: "prefix scan",
                required: n as u64,
                budget: self.max_elements as u64,
            });
        }
        let num_blocks = n.div_ceil(SCAN_BLOCK);
        let params = ScanParams {
            n,
            num_blocks,
            _pad0: 0,
            _pad1: 0,
        };
        let params_buf = crate::gpu::buffers::create_buffer_init(
            device,
            "scan params",
            &[params],
            BufferUsages::UNIFORM,
        );

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scan bind group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.block_sums.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("prefix scan"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_pipeline(&self.scan_blocks);
        pass.dispatch_workgroups(num_blocks, 1, 1);
        pass.set_pipeline(&self.scan_totals);
        pass.dispatch_workgroups(1, 1, 1);
        pass.set_pipeline(&self.scan_add);
        pass.dispatch_workgroups(dispatch_size(n, SCAN_BLOCK), 1, 1);
        drop(pass);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_elements_constant() {
        assert_eq!(MAX_ELEMENTS, 4_194_304);
    }

    /// CPU reference for the scan contract.
    fn exclusive_scan_reference(input: &[u32]) -> (Vec<u32>, u32) {
        let mut out = Vec::with_capacity(input.len());
        let mut acc = 0u32;
        for &v in input {
            out.push(acc);
            acc += v;
        }
        (out, acc)
    }

    #[test]
    fn test_reference_scan() {
        let (scan, total) = exclusive_scan_reference(&[3, 0, 4, 1, 5, 9, 2, 6]);
        assert_eq!(scan, vec![0, 3, 3, 7, 8, 13, 22, 24]);
        assert_eq!(total, 30);
    }
}
