//! Render targets for one training view: forward color, final
//! transmittance, contributor counts, per-pixel loss gradient, and the
//! densification error mask. Allocated once at the largest viewport and
//! addressed through a sub-viewport by every kernel.

use wgpu::{Device, Extent3d, Queue, Texture, TextureFormat, TextureUsages, TextureView};

pub struct RenderTargets {
    pub color: Texture,
    pub color_view: TextureView,
    pub transmittance: Texture,
    pub transmittance_view: TextureView,
    pub contrib: Texture,
    pub contrib_view: TextureView,
    pub loss_grad: Texture,
    pub loss_grad_view: TextureView,
    pub metric_mask: Texture,
    pub metric_mask_view: TextureView,
    pub width: u32,
    pub height: u32,
}

fn make_target(device: &Device, label: &str, w: u32, h: u32, format: TextureFormat) -> Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: Extent3d {
            width: w,
            height: h,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: TextureUsages::STORAGE_BINDING
            | TextureUsages::TEXTURE_BINDING
            | TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

impl RenderTargets {
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let color = make_target(device, "color target", width, height, TextureFormat::Rgba8Unorm);
        let transmittance = make_target(
            device,
            "transmittance target",
            width,
            height,
            TextureFormat::R32Float,
        );
        let contrib = make_target(device, "contrib target", width, height, TextureFormat::R32Uint);
        let loss_grad = make_target(
            device,
            "loss gradient target",
            width,
            height,
            TextureFormat::Rgba32Float,
        );
        let metric_mask =
            make_target(device, "metric mask", width, height, TextureFormat::R32Uint);

        Self {
            color_view: color.create_view(&Default::default()),
            transmittance_view: transmittance.create_view(&Default::default()),
            contrib_view: contrib.create_view(&Default::default()),
            loss_grad_view: loss_grad.create_view(&Default::default()),
            metric_mask_view: metric_mask.create_view(&Default::default()),
            color,
            transmittance,
            contrib,
            loss_grad,
            metric_mask,
            width,
            height,
        }
    }
}

/// Upload an rgba8 reference image as a texture usable as a loss target.
pub fn upload_target_image(
    device: &Device,
    queue: &Queue,
    rgba: &[u8],
    width: u32,
    height: u32,
) -> Texture {
    assert_eq!(
        rgba.len(),
        (width * height * 4) as usize,
        "rgba byte length must match dimensions"
    );
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("reference image"),
        size: Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TextureFormat::Rgba8Unorm,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        rgba,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    texture
}
