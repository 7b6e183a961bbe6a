//! Gaussian representation and scene initialization.
//!
//! A Gaussian is parameterized by:
//! - Position (mean μ)
//! - Rotation (unit quaternion)
//! - Scale (log-space: exp(log_scale) gives actual extent per axis)
//! - Opacity (logit-space: sigmoid(opacity_logit) gives actual opacity)
//! - Spherical harmonics coefficients (view-dependent color)

use nalgebra::{UnitQuaternion, Vector3};

use crate::core::pack::{PackedGaussian, PackedSh};
use crate::core::sh::SH_C0;
use crate::error::TrainError;

/// A 3D Gaussian primitive in host (unpacked) form.
///
/// Covariance is stored factorized as rotation + log-scale for numerical
/// stability: Σ = R · S · S^T · R^T where S = diag(exp(log_scale)).
#[derive(Clone, Debug)]
pub struct Gaussian {
    /// Position (mean μ) in world units
    pub position: Vector3<f32>,

    /// Rotation as unit quaternion
    pub rotation: UnitQuaternion<f32>,

    /// Log-space scale (actual extent = exp(log_scale))
    pub log_scale: Vector3<f32>,

    /// Opacity in logit-space (actual opacity = sigmoid(opacity_logit))
    pub opacity_logit: f32,

    /// Spherical harmonics coefficients, [16 coefficients × RGB].
    /// Index 0 is the DC component.
    pub sh_coeffs: [[f32; 3]; 16],
}

/// Initial scene state ready for GPU upload: packed Gaussians, packed SH,
/// and the active SH degree.
#[derive(Clone, Debug)]
pub struct SceneInit {
    pub sh_degree: u32,
    pub gaussians: Vec<PackedGaussian>,
    pub sh: Vec<PackedSh>,
}

impl SceneInit {
    /// Build from fully specified Gaussians.
    pub fn from_gaussians(gaussians: &[Gaussian], sh_degree: u32) -> Result<Self, TrainError> {
        if gaussians.is_empty() {
            return Err(TrainError::invalid("scene has no Gaussians"));
        }
        if sh_degree > 3 {
            return Err(TrainError::invalid(format!(
                "sh_degree {sh_degree} out of range 0..=3"
            )));
        }
        Ok(Self {
            sh_degree,
            gaussians: gaussians.iter().map(PackedGaussian::pack).collect(),
            sh: gaussians.iter().map(|g| PackedSh::pack(&g.sh_coeffs)).collect(),
        })
    }

    /// Build from a minimal point cloud (positions + RGB colors in [0, 1])
    /// that carries no orientation information.
    ///
    /// Defaults: opacity-logit 1, identity rotation, log-scale (−5,−5,−5),
    /// and the SH DC term seeded from the color via (c − 0.5) / Y_0^0 so
    /// that degree-0 evaluation reproduces the input color.
    pub fn from_point_cloud(
        positions: &[Vector3<f32>],
        colors: &[Vector3<f32>],
        sh_degree: u32,
    ) -> Result<Self, TrainError> {
        if positions.len() != colors.len() {
            return Err(TrainError::invalid(format!(
                "positions ({}) and colors ({}) disagree",
                positions.len(),
                colors.len()
            )));
        }
        let gaussians: Vec<Gaussian> = positions
            .iter()
            .zip(colors)
            .map(|(p, c)| {
                let mut sh_coeffs = [[0.0f32; 3]; 16];
                sh_coeffs[0] = [
                    (c.x - 0.5) / SH_C0,
                    (c.y - 0.5) / SH_C0,
                    (c.z - 0.5) / SH_C0,
                ];
                Gaussian {
                    position: *p,
                    rotation: UnitQuaternion::identity(),
                    log_scale: Vector3::new(-5.0, -5.0, -5.0),
                    opacity_logit: 1.0,
                    sh_coeffs,
                }
            })
            .collect();
        Self::from_gaussians(&gaussians, sh_degree)
    }

    /// Rehydrate from previously downloaded packed bytes. The byte images
    /// must round-trip unchanged, so no re-packing happens here.
    pub fn from_packed_bytes(
        gaussian_bytes: &[u8],
        sh_bytes: &[u8],
        sh_degree: u32,
    ) -> Result<Self, TrainError> {
        let g_stride = std::mem::size_of::<PackedGaussian>();
        let s_stride = std::mem::size_of::<PackedSh>();
        if gaussian_bytes.len() % g_stride != 0 || sh_bytes.len() % s_stride != 0 {
            return Err(TrainError::invalid("packed byte length not a whole stride"));
        }
        let n = gaussian_bytes.len() / g_stride;
        if sh_bytes.len() / s_stride != n {
            return Err(TrainError::invalid(
                "Gaussian and SH byte images describe different counts",
            ));
        }
        if n == 0 {
            return Err(TrainError::invalid("scene has no Gaussians"));
        }
        Ok(Self {
            sh_degree,
            gaussians: bytemuck::pod_collect_to_vec(gaussian_bytes),
            sh: bytemuck::pod_collect_to_vec(sh_bytes),
        })
    }

    pub fn len(&self) -> usize {
        self.gaussians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaussians.is_empty()
    }

    /// The packed store as raw bytes (the persistable artifact).
    pub fn gaussian_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.gaussians)
    }

    pub fn sh_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.sh)
    }

    /// Unpack Gaussian `i` (SH coefficients included) for host inspection.
    pub fn unpack(&self, i: usize) -> Gaussian {
        let mut g = self.gaussians[i].unpack();
        g.sh_coeffs = self.sh[i].unpack();
        g
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{evaluate_sh, sigmoid};
    use approx::assert_relative_eq;

    #[test]
    fn test_point_cloud_defaults() {
        let init = SceneInit::from_point_cloud(
            &[Vector3::new(1.0, 2.0, 3.0)],
            &[Vector3::new(1.0, 0.25, 0.5)],
            0,
        )
        .unwrap();
        let g = init.unpack(0);

        assert_eq!(g.position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(g.opacity_logit, 1.0);
        assert_eq!(g.log_scale, Vector3::new(-5.0, -5.0, -5.0));
        assert_eq!(g.rotation, UnitQuaternion::identity());

        // Degree-0 SH evaluation must reproduce the seeded color.
        let color = evaluate_sh(&g.sh_coeffs, &Vector3::new(0.0, 0.0, 1.0), 0);
        assert_relative_eq!(color.x, 1.0, epsilon = 2e-3);
        assert_relative_eq!(color.y, 0.25, epsilon = 2e-3);
        assert_relative_eq!(color.z, 0.5, epsilon = 2e-3);

        // Default opacity after sigmoid.
        assert_relative_eq!(sigmoid(g.opacity_logit), 0.731, epsilon = 1e-3);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let err = SceneInit::from_point_cloud(&[Vector3::zeros()], &[], 0);
        assert!(err.is_err());
    }

    #[test]
    fn test_empty_scene_rejected() {
        assert!(SceneInit::from_point_cloud(&[], &[], 0).is_err());
    }

    #[test]
    fn test_packed_bytes_roundtrip() {
        let init = SceneInit::from_point_cloud(
            &[Vector3::new(0.0, 0.0, 2.0), Vector3::new(1.0, 1.0, 4.0)],
            &[Vector3::new(0.9, 0.1, 0.1), Vector3::new(0.1, 0.9, 0.1)],
            2,
        )
        .unwrap();

        let g_bytes = init.gaussian_bytes().to_vec();
        let s_bytes = init.sh_bytes().to_vec();
        let back = SceneInit::from_packed_bytes(&g_bytes, &s_bytes, 2).unwrap();

        assert_eq!(back.len(), 2);
        assert_eq!(back.gaussian_bytes(), &g_bytes[..], "byte-identical store");
        assert_eq!(back.sh_bytes(), &s_bytes[..]);
    }
}
