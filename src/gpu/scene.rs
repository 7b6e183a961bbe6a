//! The co-owned GPU scene state: the f16 packed store, the packed SH
//! block, and all f32 optimizer state, kept at identical length at all
//! times. Created on scene load, mutated in place only by the Adam repack,
//! and replaced wholesale by the densify scatter into a fresh allocation
//! that the orchestrator swaps in at an iteration boundary.

use wgpu::{Buffer, BufferUsages, Device, Queue};

use crate::core::pack::{PackedGaussian, PackedSh, SH_WORDS};
use crate::core::SceneInit;
use crate::error::TrainError;
use crate::gpu::buffers::{create_buffer, create_buffer_init, read_buffer_blocking};

/// One optimizer slot for a vec-valued parameter group: parameter and both
/// Adam moments.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OptVec4 {
    pub param: [f32; 4],
    pub m: [f32; 4],
    pub v: [f32; 4],
}

/// One optimizer slot for the scalar opacity group.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OptScalar {
    pub param: f32,
    pub m: f32,
    pub v: f32,
}

pub struct GpuScene {
    pub num_points: u32,
    pub sh_degree: u32,

    /// 24-byte packed Gaussians; the renderer's interchange format.
    pub gaussians: Buffer,
    /// 24 words of packed SH per Gaussian.
    pub sh: Buffer,

    pub opt_pos: Buffer,
    pub opt_rot: Buffer,
    pub opt_scale: Buffer,
    pub opt_opacity: Buffer,
    /// 48 f32 SH coefficients per Gaussian.
    pub sh_param: Buffer,
    /// 48 (m, v) pairs per Gaussian.
    pub sh_state: Buffer,
}

const STORE_USAGE: wgpu::BufferUsages = BufferUsages::STORAGE
    .union(BufferUsages::COPY_SRC)
    .union(BufferUsages::COPY_DST);

impl GpuScene {
    /// Upload an initial scene: packs land verbatim, the optimizer mirrors
    /// the unpacked values with zeroed moments.
    pub fn upload(device: &Device, init: &SceneInit) -> Result<Self, TrainError> {
        let n = init.len();
        if n == 0 {
            return Err(TrainError::invalid("scene has no Gaussians"));
        }

        let mut pos = Vec::with_capacity(n);
        let mut rot = Vec::with_capacity(n);
        let mut scale = Vec::with_capacity(n);
        let mut opacity = Vec::with_capacity(n);
        let mut sh_param = Vec::with_capacity(n * 48);
        for i in 0..n {
            let g = init.unpack(i);
            let q = g.rotation.quaternion();
            pos.push(OptVec4 {
                param: [g.position.x, g.position.y, g.position.z, 0.0],
                ..Default::default()
            });
            rot.push(OptVec4 {
                param: [q.w, q.i, q.j, q.k],
                ..Default::default()
            });
            scale.push(OptVec4 {
                param: [g.log_scale.x, g.log_scale.y, g.log_scale.z, 0.0],
                ..Default::default()
            });
            opacity.push(OptScalar {
                param: g.opacity_logit,
                ..Default::default()
            });
            for coeff in g.sh_coeffs.iter() {
                sh_param.extend_from_slice(coeff);
            }
        }

        Ok(Self {
            num_points: n as u32,
            sh_degree: init.sh_degree,
            gaussians: create_buffer_init(device, "packed gaussians", &init.gaussians, STORE_USAGE),
            sh: create_buffer_init(device, "packed sh", &init.sh, STORE_USAGE),
            opt_pos: create_buffer_init(device, "opt pos", &pos, STORE_USAGE),
            opt_rot: create_buffer_init(device, "opt rot", &rot, STORE_USAGE),
            opt_scale: create_buffer_init(device, "opt scale", &scale, STORE_USAGE),
            opt_opacity: create_buffer_init(device, "opt opacity", &opacity, STORE_USAGE),
            sh_param: create_buffer_init(device, "sh param", &sh_param, STORE_USAGE),
            sh_state: create_buffer_zeroed_state(device, n),
        })
    }

    /// Allocate an uninitialized scene of `num_points` as the destination
    /// of a densify scatter.
    pub fn allocate(device: &Device, num_points: u32, sh_degree: u32) -> Self {
        let n = num_points as u64;
        Self {
            num_points,
            sh_degree,
            gaussians: create_buffer(device, "packed gaussians", n * 24, STORE_USAGE),
            sh: create_buffer(device, "packed sh", n * (SH_WORDS as u64) * 4, STORE_USAGE),
            opt_pos: create_buffer(device, "opt pos", n * 48, STORE_USAGE),
            opt_rot: create_buffer(device, "opt rot", n * 48, STORE_USAGE),
            opt_scale: create_buffer(device, "opt scale", n * 48, STORE_USAGE),
            opt_opacity: create_buffer(device, "opt opacity", n * 12, STORE_USAGE),
            sh_param: create_buffer(device, "sh param", n * 48 * 4, STORE_USAGE),
            sh_state: create_buffer(device, "sh state", n * 48 * 8, STORE_USAGE),
        }
    }

    /// Download the persistable artifacts. Round-trips byte-identically
    /// with `SceneInit::from_packed_bytes` while N is unchanged.
    pub fn download_packed(
        &self,
        device: &Device,
        queue: &Queue,
    ) -> Result<SceneInit, TrainError> {
        let gaussians: Vec<PackedGaussian> =
            read_buffer_blocking(device, queue, &self.gaussians, self.num_points as usize)?;
        let sh: Vec<PackedSh> =
            read_buffer_blocking(device, queue, &self.sh, self.num_points as usize)?;
        Ok(SceneInit {
            sh_degree: self.sh_degree,
            gaussians,
            sh,
        })
    }
}

fn create_buffer_zeroed_state(device: &Device, n: usize) -> Buffer {
    crate::gpu::buffers::create_buffer_zeroed(device, "sh state", n as u64 * 48 * 8, STORE_USAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opt_slot_sizes() {
        assert_eq!(std::mem::size_of::<OptVec4>(), 48);
        assert_eq!(std::mem::size_of::<OptScalar>(), 12);
    }
}
