//! f16-packed GPU layouts and their host-side mirrors.
//!
//! The renderer consumes Gaussians in a 24-byte f16 format and SH
//! coefficients as interleaved f16 halves; optimizer state stays f32. These
//! types are the single source of truth for both sides: the WGSL kernels
//! pack and unpack with `pack2x16float`/`unpack2x16float`, the host with the
//! `half` crate, and the bit layouts below must agree word for word.
//!
//! Reading always goes unpack → transform → clamp: halves come out of the
//! words, opacity gets its sigmoid and scale its exp on read, and the
//! log-scale is clamped to [-10, 10] before the exp.

use half::f16;
use nalgebra::{UnitQuaternion, Vector3};

use crate::core::gaussian::Gaussian;

/// Clamp bounds for the stored log-scale.
pub const LOG_SCALE_MIN: f32 = -10.0;
pub const LOG_SCALE_MAX: f32 = 10.0;

/// Largest opacity-logit a freshly split or cloned Gaussian may carry;
/// sigmoid(1.386294) ≈ 0.8.
pub const OPACITY_LOGIT_SPLIT_MAX: f32 = 1.386_294_4;

/// Fixed-point scale shared by the backward rasterizer (encode) and the
/// geometry backward pass (decode) for float-gradient accumulation through
/// i32 atomics. Mirrored in the WGSL helpers prelude.
pub const GRAD_FIXED_SCALE: f32 = 16384.0;

/// Number of u32 words of packed SH per Gaussian: 48 f16 halves laid out
/// channel-major as (r0,g0,b0, r1,g1,b1, ...).
pub const SH_WORDS: usize = 24;

fn pack_half2(a: f32, b: f32) -> u32 {
    let lo = f16::from_f32(a).to_bits() as u32;
    let hi = f16::from_f32(b).to_bits() as u32;
    lo | (hi << 16)
}

fn unpack_half2(word: u32) -> (f32, f32) {
    let lo = f16::from_bits((word & 0xffff) as u16).to_f32();
    let hi = f16::from_bits((word >> 16) as u16).to_f32();
    (lo, hi)
}

/// A Gaussian in the 24-byte renderer layout.
///
/// Each word holds two f16 halves:
/// - `pos_opacity[0]` = (mean.x, mean.y)
/// - `pos_opacity[1]` = (mean.z, opacity-logit)
/// - `rot[0]` = (q.w, q.x), `rot[1]` = (q.y, q.z)
/// - `scale[0]` = (log_s.x, log_s.y), `scale[1]` = (log_s.z, unused)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedGaussian {
    pub pos_opacity: [u32; 2],
    pub rot: [u32; 2],
    pub scale: [u32; 2],
}

impl PackedGaussian {
    /// Pack an unpacked Gaussian. Values outside the representable f16
    /// range are clamped before packing so the stored halves stay finite.
    pub fn pack(g: &Gaussian) -> Self {
        let clamp16 = |v: f32| v.clamp(-65504.0, 65504.0);
        let q = g.rotation.quaternion();
        let ls = Vector3::new(
            g.log_scale.x.clamp(LOG_SCALE_MIN, LOG_SCALE_MAX),
            g.log_scale.y.clamp(LOG_SCALE_MIN, LOG_SCALE_MAX),
            g.log_scale.z.clamp(LOG_SCALE_MIN, LOG_SCALE_MAX),
        );
        Self {
            pos_opacity: [
                pack_half2(clamp16(g.position.x), clamp16(g.position.y)),
                pack_half2(clamp16(g.position.z), clamp16(g.opacity_logit)),
            ],
            rot: [pack_half2(q.w, q.i), pack_half2(q.j, q.k)],
            scale: [pack_half2(ls.x, ls.y), pack_half2(ls.z, 0.0)],
        }
    }

    /// Unpack to host representation, applying the read-side clamps.
    pub fn unpack(&self) -> Gaussian {
        let (px, py) = unpack_half2(self.pos_opacity[0]);
        let (pz, opacity_logit) = unpack_half2(self.pos_opacity[1]);
        let (qw, qx) = unpack_half2(self.rot[0]);
        let (qy, qz) = unpack_half2(self.rot[1]);
        let (sx, sy) = unpack_half2(self.scale[0]);
        let (sz, _) = unpack_half2(self.scale[1]);

        Gaussian {
            position: Vector3::new(px, py, pz),
            rotation: UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(qw, qx, qy, qz)),
            log_scale: Vector3::new(
                sx.clamp(LOG_SCALE_MIN, LOG_SCALE_MAX),
                sy.clamp(LOG_SCALE_MIN, LOG_SCALE_MAX),
                sz.clamp(LOG_SCALE_MIN, LOG_SCALE_MAX),
            ),
            opacity_logit,
            sh_coeffs: [[0.0; 3]; 16],
        }
    }
}

/// Packed SH block for one Gaussian: 16 coefficients × 3 channels as f16
/// halves, channel-major interleaved. Coefficient 0 is the DC term; the
/// renderer adds the 0.5 color offset after evaluation, so the stored DC is
/// `(color - 0.5) / Y_0^0` for a view-independent color.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedSh {
    pub words: [u32; SH_WORDS],
}

impl PackedSh {
    pub fn pack(coeffs: &[[f32; 3]; 16]) -> Self {
        let mut halves = [0.0f32; 48];
        for (i, rgb) in coeffs.iter().enumerate() {
            halves[i * 3] = rgb[0];
            halves[i * 3 + 1] = rgb[1];
            halves[i * 3 + 2] = rgb[2];
        }
        let mut words = [0u32; SH_WORDS];
        for (w, pair) in words.iter_mut().zip(halves.chunks_exact(2)) {
            *w = pack_half2(pair[0], pair[1]);
        }
        Self { words }
    }

    pub fn unpack(&self) -> [[f32; 3]; 16] {
        let mut halves = [0.0f32; 48];
        for (i, w) in self.words.iter().enumerate() {
            let (a, b) = unpack_half2(*w);
            halves[i * 2] = a;
            halves[i * 2 + 1] = b;
        }
        let mut coeffs = [[0.0f32; 3]; 16];
        for (i, rgb) in coeffs.iter_mut().enumerate() {
            rgb[0] = halves[i * 3];
            rgb[1] = halves[i * 3 + 1];
            rgb[2] = halves[i * 3 + 2];
        }
        coeffs
    }
}

/// The 24-byte projected-splat record produced by the forward preprocess,
/// six f16 pairs: ndc position, screen half-extents in pixels (binning
/// margin included), conic (xx, xy), conic yy, color (r, g), color b +
/// opacity after sigmoid. Host code never builds these; the mirror exists
/// for size checks and test readback.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedSplat {
    pub ndc: u32,
    pub extent: u32,
    pub conic_xy: u32,
    pub conic_z: u32,
    pub color_rg: u32,
    pub color_b_opacity: u32,
}

impl PackedSplat {
    pub fn ndc_xy(&self) -> (f32, f32) {
        unpack_half2(self.ndc)
    }

    pub fn color_opacity(&self) -> ([f32; 3], f32) {
        let (r, g) = unpack_half2(self.color_rg);
        let (b, o) = unpack_half2(self.color_b_opacity);
        ([r, g, b], o)
    }
}

/// The 32-byte packed gradient record written by the geometry backward pass,
/// sixteen f16 halves: dμ.xyz, d opacity-logit, dq.xyzw, d log-scale.xyz,
/// pad, d color.rgb, pad.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedGradient {
    pub words: [u32; 8],
}

impl PackedGradient {
    pub fn unpack(&self) -> UnpackedGradient {
        let (mx, my) = unpack_half2(self.words[0]);
        let (mz, opacity) = unpack_half2(self.words[1]);
        let (qx, qy) = unpack_half2(self.words[2]);
        let (qz, qw) = unpack_half2(self.words[3]);
        let (sx, sy) = unpack_half2(self.words[4]);
        let (sz, _) = unpack_half2(self.words[5]);
        let (cr, cg) = unpack_half2(self.words[6]);
        let (cb, _) = unpack_half2(self.words[7]);
        UnpackedGradient {
            d_position: Vector3::new(mx, my, mz),
            d_opacity_logit: opacity,
            d_rotation: [qw, qx, qy, qz],
            d_log_scale: Vector3::new(sx, sy, sz),
            d_color: Vector3::new(cr, cg, cb),
        }
    }
}

/// Decoded gradient record (test/debug readback).
#[derive(Clone, Debug)]
pub struct UnpackedGradient {
    pub d_position: Vector3<f32>,
    pub d_opacity_logit: f32,
    /// (w, x, y, z), matching the parameter layout.
    pub d_rotation: [f32; 4],
    pub d_log_scale: Vector3<f32>,
    pub d_color: Vector3<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<PackedGaussian>(), 24);
        assert_eq!(std::mem::size_of::<PackedSh>(), 96);
        assert_eq!(std::mem::size_of::<PackedSplat>(), 24);
        assert_eq!(std::mem::size_of::<PackedGradient>(), 32);
    }

    #[test]
    fn test_half2_roundtrip() {
        let w = pack_half2(1.5, -0.25);
        let (a, b) = unpack_half2(w);
        assert_eq!(a, 1.5);
        assert_eq!(b, -0.25);
    }

    #[test]
    fn test_gaussian_pack_roundtrip() {
        let g = Gaussian {
            position: Vector3::new(0.5, -1.25, 2.0),
            rotation: UnitQuaternion::identity(),
            log_scale: Vector3::new(-1.0, -2.0, 0.5),
            opacity_logit: 2.0,
            sh_coeffs: [[0.0; 3]; 16],
        };
        let packed = PackedGaussian::pack(&g);
        let back = packed.unpack();

        // Values chosen exactly representable in f16 round-trip bit-exact.
        assert_eq!(back.position, g.position);
        assert_eq!(back.log_scale, g.log_scale);
        assert_eq!(back.opacity_logit, g.opacity_logit);
        assert_eq!(back.rotation.quaternion().w, 1.0);
    }

    #[test]
    fn test_gaussian_pack_roundtrip_ulp() {
        // Arbitrary values round-trip within f16 precision (~2^-11 relative).
        let g = Gaussian {
            position: Vector3::new(0.333, -7.77, 123.456),
            rotation: UnitQuaternion::from_euler_angles(0.2, 0.3, -0.1),
            log_scale: Vector3::new(-4.321, 1.234, -0.001),
            opacity_logit: -3.21,
            sh_coeffs: [[0.0; 3]; 16],
        };
        let back = PackedGaussian::pack(&g).unpack();
        for i in 0..3 {
            assert_relative_eq!(back.position[i], g.position[i], max_relative = 1e-3);
            assert_relative_eq!(back.log_scale[i], g.log_scale[i], max_relative = 1e-3);
        }
        assert_relative_eq!(back.opacity_logit, g.opacity_logit, max_relative = 1e-3);
    }

    #[test]
    fn test_log_scale_clamped_on_read() {
        let g = Gaussian {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            log_scale: Vector3::new(-40.0, 40.0, 0.0),
            opacity_logit: 0.0,
            sh_coeffs: [[0.0; 3]; 16],
        };
        let back = PackedGaussian::pack(&g).unpack();
        assert_eq!(back.log_scale.x, LOG_SCALE_MIN);
        assert_eq!(back.log_scale.y, LOG_SCALE_MAX);
    }

    #[test]
    fn test_f16_range_clamped_on_pack() {
        let g = Gaussian {
            position: Vector3::new(1.0e9, 0.0, 0.0),
            rotation: UnitQuaternion::identity(),
            log_scale: Vector3::zeros(),
            opacity_logit: 0.0,
            sh_coeffs: [[0.0; 3]; 16],
        };
        let back = PackedGaussian::pack(&g).unpack();
        assert!(back.position.x.is_finite());
        assert_eq!(back.position.x, 65504.0);
    }

    #[test]
    fn test_sh_pack_roundtrip() {
        let mut coeffs = [[0.0f32; 3]; 16];
        for (i, c) in coeffs.iter_mut().enumerate() {
            c[0] = i as f32 * 0.125;
            c[1] = -(i as f32) * 0.25;
            c[2] = 0.5;
        }
        let packed = PackedSh::pack(&coeffs);
        let back = packed.unpack();
        assert_eq!(back, coeffs);
    }

    #[test]
    fn test_sh_channel_major_interleave() {
        // Coefficient k channel c sits at half index 3k + c.
        let mut coeffs = [[0.0f32; 3]; 16];
        coeffs[1][2] = 1.0; // half index 5 → word 2, high half
        let packed = PackedSh::pack(&coeffs);
        let (lo, hi) = unpack_half2(packed.words[2]);
        assert_eq!(lo, 0.0);
        assert_eq!(hi, 1.0);
    }

    #[test]
    fn test_split_opacity_bound() {
        assert_relative_eq!(
            crate::core::sigmoid(OPACITY_LOGIT_SPLIT_MAX),
            0.8,
            epsilon = 1e-6
        );
    }
}
