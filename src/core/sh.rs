//! Spherical harmonics evaluation for view-dependent color.
//!
//! Gaussians store color as spherical harmonics coefficients rather than a
//! single RGB value, which allows view-dependent effects. Degree-3 SH uses
//! 16 coefficients per color channel; lower active degrees use a prefix.

use nalgebra::Vector3;

/// Y_0^0, the DC basis value. Point-cloud ingest divides by this constant to
/// seed the DC coefficient from a plain RGB color.
pub const SH_C0: f32 = 0.282_094_791_773_878_14;

/// Number of active coefficients per channel for a given SH degree.
pub fn sh_coeff_count(degree: u32) -> usize {
    ((degree + 1) * (degree + 1)) as usize
}

/// Evaluate spherical harmonics basis functions up to degree 3 (real SH).
///
/// `direction` must be normalized.
///
/// Ordering matches common splatting implementations:
/// - Degree 0:  Y_0^0
/// - Degree 1:  Y_1^{-1}, Y_1^0, Y_1^1
/// - Degree 2:  Y_2^{-2}, Y_2^{-1}, Y_2^0, Y_2^1, Y_2^2
/// - Degree 3:  Y_3^{-3}, Y_3^{-2}, Y_3^{-1}, Y_3^0, Y_3^1, Y_3^2, Y_3^3
pub fn sh_basis(direction: &Vector3<f32>) -> [f32; 16] {
    let x = direction.x;
    let y = direction.y;
    let z = direction.z;

    const C1: f32 = 0.488_602_511_902_919_9;
    const C2_0: f32 = 1.092_548_430_592_079_2;
    const C2_1: f32 = 0.315_391_565_252_520_05;
    const C2_2: f32 = 0.546_274_215_296_039_6;
    const C3_0: f32 = 0.590_043_589_926_643_5;
    const C3_1: f32 = 2.890_611_442_640_554;
    const C3_2: f32 = 0.457_045_799_464_465_8;
    const C3_3: f32 = 0.373_176_332_590_115_4;
    const C3_4: f32 = 1.445_305_721_320_277;
    const C3_5: f32 = 0.590_043_589_926_643_5;

    let mut basis = [0.0f32; 16];

    // l = 0
    basis[0] = SH_C0;

    // l = 1
    basis[1] = C1 * y;
    basis[2] = C1 * z;
    basis[3] = C1 * x;

    let x2 = x * x;
    let y2 = y * y;
    let z2 = z * z;
    let xy = x * y;
    let yz = y * z;
    let xz = x * z;

    // l = 2
    basis[4] = C2_0 * xy;
    basis[5] = C2_0 * yz;
    basis[6] = C2_1 * (3.0 * z2 - 1.0);
    basis[7] = C2_0 * xz;
    basis[8] = C2_2 * (x2 - y2);

    // l = 3
    basis[9] = C3_0 * y * (3.0 * x2 - y2);
    basis[10] = C3_1 * xy * z;
    basis[11] = C3_2 * y * (5.0 * z2 - 1.0);
    basis[12] = C3_3 * z * (5.0 * z2 - 3.0);
    basis[13] = C3_2 * x * (5.0 * z2 - 1.0);
    basis[14] = C3_4 * z * (x2 - y2);
    basis[15] = C3_5 * x * (x2 - 3.0 * y2);

    basis
}

/// Evaluate view-dependent color from SH coefficients.
///
/// The renderer adds a 0.5 offset after the basis contraction and clamps the
/// result to non-negative values; this mirror does the same so host-side
/// checks agree with the kernels.
pub fn evaluate_sh(
    sh_coeffs: &[[f32; 3]; 16],
    direction: &Vector3<f32>,
    degree: u32,
) -> Vector3<f32> {
    let dir = direction.normalize();
    let basis = sh_basis(&dir);

    let mut color = Vector3::<f32>::zeros();
    for i in 0..sh_coeff_count(degree) {
        color.x += basis[i] * sh_coeffs[i][0];
        color.y += basis[i] * sh_coeffs[i][1];
        color.z += basis[i] * sh_coeffs[i][2];
    }

    Vector3::new(
        (color.x + 0.5).max(0.0),
        (color.y + 0.5).max(0.0),
        (color.z + 0.5).max(0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sh_basis_dc_component() {
        // DC component should be constant regardless of direction
        let dir1 = Vector3::new(1.0, 0.0, 0.0);
        let dir2 = Vector3::new(0.0, 1.0, 0.0);

        let basis1 = sh_basis(&dir1.normalize());
        let basis2 = sh_basis(&dir2.normalize());

        approx::assert_relative_eq!(basis1[0], basis2[0], epsilon = 1e-6);
        approx::assert_relative_eq!(basis1[0], 0.282_094_8, epsilon = 1e-6);
    }

    #[test]
    fn test_coeff_counts() {
        assert_eq!(sh_coeff_count(0), 1);
        assert_eq!(sh_coeff_count(1), 4);
        assert_eq!(sh_coeff_count(2), 9);
        assert_eq!(sh_coeff_count(3), 16);
    }

    #[test]
    fn test_evaluate_sh_dc_only() {
        // With only DC coefficients set, color should be view-independent.
        let mut sh_coeffs = [[0.0f32; 3]; 16];
        sh_coeffs[0] = [1.0, 0.5, 0.2];

        let dir1 = Vector3::new(1.0, 0.0, 0.0);
        let dir2 = Vector3::new(0.0, 0.0, 1.0);

        let color1 = evaluate_sh(&sh_coeffs, &dir1, 3);
        let color2 = evaluate_sh(&sh_coeffs, &dir2, 3);

        approx::assert_relative_eq!(color1, color2, epsilon = 1e-5);
    }

    #[test]
    fn test_evaluate_sh_degree_prefix() {
        // Degree-0 evaluation must ignore higher-band coefficients.
        let mut sh_coeffs = [[0.0f32; 3]; 16];
        sh_coeffs[0] = [0.9, 0.0, 0.0];
        sh_coeffs[5] = [100.0, 100.0, 100.0];

        let dir = Vector3::new(0.3, -0.4, 0.866).normalize();
        let c0 = evaluate_sh(&sh_coeffs, &dir, 0);
        approx::assert_relative_eq!(c0.x, 0.9 * SH_C0 + 0.5, epsilon = 1e-5);
        approx::assert_relative_eq!(c0.y, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_evaluate_sh_clamps_negative() {
        let mut sh_coeffs = [[0.0f32; 3]; 16];
        sh_coeffs[0] = [-10.0, 0.0, 0.0];
        let color = evaluate_sh(&sh_coeffs, &Vector3::new(0.0, 0.0, 1.0), 0);
        assert_eq!(color.x, 0.0);
    }
}
