//! Camera model: pinhole intrinsics plus full 4×4 view/projection matrices.
//!
//! External loaders hand the engine a view matrix, a projection matrix, the
//! focal lengths, and the viewport. The convenience constructor builds both
//! matrices from intrinsics and a world-to-camera pose for callers (and
//! tests) that start from COLMAP-style parameters.

use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

/// A camera as consumed by the GPU pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Camera {
    /// World-to-view transform.
    pub view: Matrix4<f32>,

    /// View-to-clip transform with depth mapped to [0, 1].
    pub proj: Matrix4<f32>,

    /// Focal length in X (pixels); used by the covariance Jacobian.
    pub fx: f32,

    /// Focal length in Y (pixels).
    pub fy: f32,

    /// Viewport width (pixels).
    pub width: u32,

    /// Viewport height (pixels).
    pub height: u32,
}

impl Camera {
    /// Wrap loader-provided matrices directly.
    pub fn from_matrices(
        view: Matrix4<f32>,
        proj: Matrix4<f32>,
        fx: f32,
        fy: f32,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            view,
            proj,
            fx,
            fy,
            width,
            height,
        }
    }

    /// Build a camera from pinhole intrinsics and a world-to-camera pose.
    ///
    /// The projection maps view space (+z forward) to clip space with
    /// ndc.x = 2·fx·x / (w·z), ndc.y = 2·fy·y / (h·z), and depth to [0, 1]
    /// over [near, far]. The principal point is assumed centered; loaders
    /// with off-center principal points supply their own matrix.
    pub fn from_intrinsics(
        fx: f32,
        fy: f32,
        width: u32,
        height: u32,
        rotation: Matrix3<f32>,
        translation: Vector3<f32>,
        near: f32,
        far: f32,
    ) -> Self {
        let mut view = Matrix4::identity();
        view.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        view.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);

        let w = width as f32;
        let h = height as f32;
        let mut proj = Matrix4::zeros();
        proj[(0, 0)] = 2.0 * fx / w;
        proj[(1, 1)] = 2.0 * fy / h;
        proj[(2, 2)] = far / (far - near);
        proj[(2, 3)] = -far * near / (far - near);
        proj[(3, 2)] = 1.0;

        Self {
            view,
            proj,
            fx,
            fy,
            width,
            height,
        }
    }

    /// Transform a world-space point into view space.
    pub fn world_to_view(&self, point_world: &Vector3<f32>) -> Vector3<f32> {
        (self.view * point_world.push(1.0)).xyz()
    }

    /// The camera center in world coordinates (C = -R^T · t).
    pub fn camera_center(&self) -> Vector3<f32> {
        let r = self.view.fixed_view::<3, 3>(0, 0);
        let t = self.view.fixed_view::<3, 1>(0, 3);
        -(r.transpose() * t)
    }

    /// Tile grid dimensions for a given tile width.
    pub fn tile_bounds(&self, tile: u32) -> (u32, u32) {
        (self.width.div_ceil(tile), self.height.div_ceil(tile))
    }

    /// A copy of this camera rendering at `factor` of its resolution, with
    /// intrinsics scaled to match. Used by the densify metric's downscale.
    pub fn downscaled(&self, factor: f32) -> Self {
        if (factor - 1.0).abs() < 1e-6 {
            return self.clone();
        }
        let width = ((self.width as f32) * factor).round().max(1.0) as u32;
        let height = ((self.height as f32) * factor).round().max(1.0) as u32;
        // ndc is resolution-independent; only focal and viewport change.
        Self {
            view: self.view,
            proj: self.proj,
            fx: self.fx * factor,
            fy: self.fy * factor,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_camera() -> Camera {
        Camera::from_intrinsics(
            100.0,
            100.0,
            64,
            64,
            Matrix3::identity(),
            Vector3::zeros(),
            0.1,
            100.0,
        )
    }

    #[test]
    fn test_projection_center() {
        let cam = test_camera();
        // A point on the optical axis projects to ndc (0, 0) with z in (0,1).
        let clip = cam.proj * Vector3::new(0.0, 0.0, 2.0).push(1.0);
        let ndc = clip / clip.w;
        assert_relative_eq!(ndc.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(ndc.y, 0.0, epsilon = 1e-6);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_projection_to_pixels() {
        let cam = test_camera();
        // ndc → pixel: px = (ndc*0.5 + 0.5) * viewport. A point at x = z·w/(2fx)
        // lands on the right edge.
        let x = 2.0 * 64.0 / (2.0 * 100.0);
        let clip = cam.proj * Vector3::new(x, 0.0, 2.0).push(1.0);
        let ndc = clip / clip.w;
        assert_relative_eq!(ndc.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_camera_center_roundtrip() {
        let rot = nalgebra::Rotation3::from_euler_angles(0.2, -0.1, 0.4).into_inner();
        let t = Vector3::new(1.0, -2.0, 3.0);
        let cam = Camera::from_intrinsics(100.0, 100.0, 64, 64, rot, t, 0.1, 100.0);
        let center = cam.camera_center();
        // The camera center must map to the view-space origin.
        let back = cam.world_to_view(&center);
        assert_relative_eq!(back.norm(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_tile_bounds() {
        let cam = test_camera();
        assert_eq!(cam.tile_bounds(16), (4, 4));
        let cam2 = Camera::from_intrinsics(
            100.0,
            100.0,
            65,
            31,
            Matrix3::identity(),
            Vector3::zeros(),
            0.1,
            100.0,
        );
        assert_eq!(cam2.tile_bounds(16), (5, 2));
    }

    #[test]
    fn test_downscale_halves_focal() {
        let cam = test_camera().downscaled(0.5);
        assert_eq!(cam.width, 32);
        assert_relative_eq!(cam.fx, 50.0, epsilon = 1e-6);
    }
}
