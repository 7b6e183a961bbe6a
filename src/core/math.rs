//! Mathematical utilities (quaternions, activation functions, depth bits).

use nalgebra::{Matrix2x3, Matrix3, UnitQuaternion, Vector3};

/// Convert a unit quaternion to a 3×3 rotation matrix.
///
/// Formula (from quaternion q = w + xi + yj + zk):
/// R = | 1-2(y²+z²)   2(xy-wz)    2(xz+wy)  |
///     | 2(xy+wz)     1-2(x²+z²)  2(yz-wx)  |
///     | 2(xz-wy)     2(yz+wx)    1-2(x²+y²)|
pub fn quaternion_to_matrix(q: &UnitQuaternion<f32>) -> Matrix3<f32> {
    q.to_rotation_matrix().into_inner()
}

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
///
/// Maps R → (0, 1). Used for opacity (converts unbounded optimization to a
/// valid alpha).
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse sigmoid (logit): logit(p) = log(p / (1-p))
///
/// Maps (0, 1) → R. Used to convert initial opacity values to optimization
/// space.
pub fn inverse_sigmoid(p: f32) -> f32 {
    // Clamp to avoid log(0) or division by zero
    let p_clamped = p.clamp(1e-6, 1.0 - 1e-6);
    (p_clamped / (1.0 - p_clamped)).ln()
}

/// Re-encode an f32 depth so that unsigned integer comparison matches float
/// ordering.
///
/// Positive floats keep their bit pattern with the sign bit set; negative
/// floats are wholly inverted. Increasing depth then maps to increasing u32,
/// which is what the radix sort needs for front-to-back tile ordering.
pub fn ordered_depth_bits(depth: f32) -> u32 {
    let bits = depth.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

/// Sort key for one (tile, splat) pair: tile id plus one in the high 16
/// bits (zero is reserved for "no tile" and sort padding), the high bits of
/// the order-preserving depth below. Ascending u32 order then groups by
/// tile and runs front-to-back within each tile.
pub fn tile_sort_key(tile_id: u32, depth: f32) -> u32 {
    ((tile_id + 1) << 16) | (ordered_depth_bits(depth) >> 16)
}

/// Compute the Jacobian of perspective projection.
///
/// For a point p_view = [x, y, z] in view space the projected point is
/// [u, v] = [fx*x/z, fy*y/z] (up to the principal-point offset, which drops
/// out of the derivative):
///
/// J = | fx/z    0      -fx*x/z² |
///     |  0     fy/z    -fy*y/z² |
pub fn perspective_jacobian(point_view: &Vector3<f32>, fx: f32, fy: f32) -> Matrix2x3<f32> {
    let x = point_view.x;
    let y = point_view.y;
    let z = point_view.z;

    let z_inv = 1.0 / z;
    let z_inv_sq = z_inv * z_inv;

    Matrix2x3::new(
        fx * z_inv,
        0.0,
        -fx * x * z_inv_sq,
        0.0,
        fy * z_inv,
        -fy * y * z_inv_sq,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sigmoid() {
        assert_relative_eq!(sigmoid(0.0), 0.5, epsilon = 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_sigmoid_inverse_roundtrip() {
        let p = 0.7;
        let x = inverse_sigmoid(p);
        let p_recovered = sigmoid(x);
        assert_relative_eq!(p, p_recovered, epsilon = 1e-6);
    }

    #[test]
    fn test_quaternion_to_matrix_identity() {
        let q = UnitQuaternion::identity();
        let r = quaternion_to_matrix(&q);
        assert_relative_eq!(r, Matrix3::identity(), epsilon = 1e-6);
    }

    #[test]
    fn test_quaternion_to_matrix_orthogonal() {
        // Any rotation matrix should be orthogonal: R * R^T = I
        let q = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let r = quaternion_to_matrix(&q);
        let product = r * r.transpose();
        assert_relative_eq!(product, Matrix3::identity(), epsilon = 1e-5);
    }

    #[test]
    fn test_depth_bits_monotonic() {
        let depths = [
            -1.0e6f32, -3.5, -1.0, -0.25, -0.0, 0.0, 1e-20, 0.5, 1.0, 2.0, 1024.0, 3.4e38,
        ];
        for pair in depths.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a < b {
                assert!(
                    ordered_depth_bits(a) < ordered_depth_bits(b),
                    "ordering broken for {a} < {b}"
                );
            }
        }
    }

    #[test]
    fn test_depth_bits_zero_signs() {
        // -0.0 and 0.0 compare equal as floats; the encoding may order them
        // but must not invert strict inequalities around them.
        assert!(ordered_depth_bits(-f32::MIN_POSITIVE) < ordered_depth_bits(0.0));
        assert!(ordered_depth_bits(0.0) < ordered_depth_bits(f32::MIN_POSITIVE));
    }

    #[test]
    fn test_tile_key_orders_by_tile_then_depth() {
        let mut keys = vec![
            tile_sort_key(1, 4.0),
            tile_sort_key(0, 9.0),
            tile_sort_key(1, 2.0),
            tile_sort_key(0, 1.0),
        ];
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                tile_sort_key(0, 1.0),
                tile_sort_key(0, 9.0),
                tile_sort_key(1, 2.0),
                tile_sort_key(1, 4.0),
            ]
        );
        // Zero is never a real key: every tile id maps above it.
        assert!(tile_sort_key(0, -1.0e30) > 0);
    }

    #[test]
    fn test_perspective_jacobian_entries() {
        let j = perspective_jacobian(&Vector3::new(1.0, 2.0, 4.0), 100.0, 50.0);
        assert_relative_eq!(j[(0, 0)], 25.0, epsilon = 1e-5);
        assert_relative_eq!(j[(0, 2)], -100.0 * 1.0 / 16.0, epsilon = 1e-5);
        assert_relative_eq!(j[(1, 1)], 12.5, epsilon = 1e-5);
        assert_relative_eq!(j[(1, 2)], -50.0 * 2.0 / 16.0, epsilon = 1e-5);
    }
}
