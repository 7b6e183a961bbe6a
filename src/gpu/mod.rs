//! GPU subsystems: every stage of the training pipeline as wgpu compute
//! dispatches, plus the buffer/scan/sort plumbing they share.

pub mod adam;
pub mod backward;
pub mod buffers;
pub mod context;
pub mod densify;
pub mod frame;
pub mod gate;
pub mod geometry;
pub mod loss;
pub mod metric;
pub mod preprocess;
pub mod rasterize;
pub mod scan;
pub mod scene;
pub mod shaders;
pub mod sort;
pub mod tiles;

pub use context::GpuContext;
pub use gate::QueueGate;

use wgpu::{
    BindGroupLayoutEntry, BindingType, BufferBindingType, Device, PipelineLayout, ShaderStages,
    StorageTextureAccess, TextureFormat, TextureSampleType, TextureViewDimension,
};

/// Number of fixed-point gradient lanes per Gaussian accumulated by the
/// backward rasterizer (color ×3, opacity, mean ×2, conic ×3).
pub const GRAD_LANES: u64 = 9;

pub(crate) fn uniform_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn storage_entry(binding: u32, read_only: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn texture_entry(binding: u32, sample_type: TextureSampleType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Texture {
            sample_type,
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

pub(crate) fn storage_texture_entry(binding: u32, format: TextureFormat) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::StorageTexture {
            access: StorageTextureAccess::WriteOnly,
            format,
            view_dimension: TextureViewDimension::D2,
        },
        count: None,
    }
}

pub(crate) fn pipeline_layout(
    device: &Device,
    label: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
) -> PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    })
}

pub(crate) fn compute_pipeline(
    device: &Device,
    label: &str,
    layout: &PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point,
    })
}

/// Workgroup count for a 1D dispatch of `n` items at `wg` threads each.
pub(crate) fn dispatch_size(n: u32, wg: u32) -> u32 {
    n.div_ceil(wg).max(1)
}
