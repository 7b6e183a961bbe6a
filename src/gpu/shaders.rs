//! WGSL shader sources and composition.
//!
//! Kernels that share the packed layouts, splat accessors, or the hash RNG
//! are compiled with a common helpers prelude prepended; self-contained
//! kernels (scan, radix sort, image-space metric, loss) compile alone.

use wgpu::{Device, ShaderModule};

/// Shared structs/constants/functions prepended to most kernels.
pub const HELPERS: &str = include_str!("shaders/helpers.wgsl");

pub const PREPROCESS: &str = include_str!("shaders/preprocess.wgsl");
pub const KEYS: &str = include_str!("shaders/keys.wgsl");
pub const SCAN: &str = include_str!("shaders/scan.wgsl");
pub const RADIX_SORT: &str = include_str!("shaders/radix_sort.wgsl");
pub const TILE_RANGES: &str = include_str!("shaders/tile_ranges.wgsl");
pub const RASTERIZE: &str = include_str!("shaders/rasterize.wgsl");
pub const LOSS: &str = include_str!("shaders/loss.wgsl");
pub const BACKWARD_RASTERIZE: &str = include_str!("shaders/backward_rasterize.wgsl");
pub const BACKWARD_GEOMETRY: &str = include_str!("shaders/backward_geometry.wgsl");
pub const ADAM: &str = include_str!("shaders/adam.wgsl");
pub const REPACK: &str = include_str!("shaders/repack.wgsl");
pub const METRIC_IMAGE: &str = include_str!("shaders/metric_image.wgsl");
pub const METRIC_COUNT: &str = include_str!("shaders/metric_count.wgsl");
pub const DENSIFY: &str = include_str!("shaders/densify.wgsl");
pub const DENSIFY_SCATTER: &str = include_str!("shaders/densify_scatter.wgsl");

/// Compile a kernel with the helpers prelude.
pub fn create_module(device: &Device, label: &str, source: &str) -> ShaderModule {
    let composed = format!("{HELPERS}\n{source}");
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(composed.into()),
    })
}

/// Compile a self-contained kernel as-is.
pub fn create_module_standalone(device: &Device, label: &str, source: &str) -> ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}
