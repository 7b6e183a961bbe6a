//! Tile-range builder: per-tile [start, end) windows into the sorted key
//! stream. Sentinel-initialized offsets take an atomicMin of every key's
//! sorted position, then empty tiles forward-fill from their right
//! neighbor; the extra terminator slot closes the last run.

use wgpu::{BindGroupLayout, Buffer, BufferUsages, CommandEncoder, ComputePipeline, Device};

use crate::gpu::buffers::create_buffer;
use crate::gpu::{compute_pipeline, dispatch_size, pipeline_layout, shaders, storage_entry, uniform_entry};

pub struct TileRangeBuilder {
    layout: BindGroupLayout,
    init_pipeline: ComputePipeline,
    min_pipeline: ComputePipeline,
    fill_pipeline: ComputePipeline,
    tile_offsets: Buffer,
    max_tiles: u32,
}

impl TileRangeBuilder {
    pub fn new(device: &Device, max_tiles: u32) -> Self {
        let module = shaders::create_module(device, "tile ranges", shaders::TILE_RANGES);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile ranges layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });
        let pl = pipeline_layout(device, "tile ranges pipeline layout", &[&layout]);

        Self {
            init_pipeline: compute_pipeline(device, "ranges init", &pl, &module, "ranges_init"),
            min_pipeline: compute_pipeline(device, "ranges min", &pl, &module, "ranges_min"),
            fill_pipeline: compute_pipeline(device, "ranges fill", &pl, &module, "ranges_fill"),
            layout,
            tile_offsets: create_buffer(
                device,
                "tile offsets",
                (max_tiles as u64 + 1) * 4,
                BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            ),
            max_tiles,
        }
    }

    pub fn tile_offsets(&self) -> &Buffer {
        &self.tile_offsets
    }

    /// Record range building for `num_tiles` tiles. The min pass dispatches
    /// indirectly over the sort's block count so it covers exactly the
    /// padded key stream.
    pub fn record(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        uniforms: &Buffer,
        sort_info: &Buffer,
        sorted_keys: &Buffer,
        num_tiles: u32,
        sort_dispatch: &Buffer,
    ) {
        debug_assert!(num_tiles <= self.max_tiles);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tile ranges bind group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: sort_info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: sorted_keys.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.tile_offsets.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("tile ranges"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_pipeline(&self.init_pipeline);
        pass.dispatch_workgroups(dispatch_size(num_tiles + 1, 256), 1, 1);
        pass.set_pipeline(&self.min_pipeline);
        pass.dispatch_workgroups_indirect(sort_dispatch, 0);
        pass.set_pipeline(&self.fill_pipeline);
        pass.dispatch_workgroups(dispatch_size(num_tiles, 256), 1, 1);
    }
}
