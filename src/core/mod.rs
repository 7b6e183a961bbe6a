//! Host-side data model: Gaussians, cameras, packing, and math utilities.

pub mod camera;
pub mod gaussian;
pub mod math;
pub mod pack;
pub mod sh;

pub use camera::Camera;
pub use gaussian::{Gaussian, SceneInit};
pub use math::{inverse_sigmoid, ordered_depth_bits, quaternion_to_matrix, sigmoid, tile_sort_key};
pub use pack::{PackedGaussian, PackedSh};
pub use sh::{evaluate_sh, sh_basis, sh_coeff_count, SH_C0};
