//! Host/backend convention translation. Every value crossing the
//! [`crate::compositor`] boundary goes through here.

use crate::compositor::{RawMatrix, RawPose, RawQuaternion, RawVector3};
use crate::math::{Mat4, Pose, Quat, Vec3};

pub fn vector_to_host(v: RawVector3) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn vector_to_backend(v: Vec3) -> RawVector3 {
    RawVector3 {
        x: v.x,
        y: v.y,
        z: v.z,
    }
}

pub fn quaternion_to_host(q: RawQuaternion) -> Quat {
    Quat::new(q.x, q.y, q.z, q.w)
}

pub fn quaternion_to_backend(q: Quat) -> RawQuaternion {
    RawQuaternion {
        x: q.x,
        y: q.y,
        z: q.z,
        w: q.w,
    }
}

pub fn pose_to_host(p: RawPose) -> Pose {
    Pose {
        position: vector_to_host(p.position),
        orientation: quaternion_to_host(p.orientation),
    }
}

pub fn pose_to_backend(p: Pose) -> RawPose {
    RawPose {
        position: vector_to_backend(p.position),
        orientation: quaternion_to_backend(p.orientation),
    }
}

// rows[r][c] lands at cols[c][r]; the transform it denotes is unchanged.
pub fn matrix_to_host(m: &RawMatrix) -> Mat4 {
    let mut cols = [[0.0f32; 4]; 4];
    for (r, row) in m.rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            cols[c][r] = *value;
        }
    }
    Mat4 { cols }
}

pub fn matrix_to_backend(m: &Mat4) -> RawMatrix {
    let mut rows = [[0.0f32; 4]; 4];
    for (c, col) in m.cols.iter().enumerate() {
        for (r, value) in col.iter().enumerate() {
            rows[r][c] = *value;
        }
    }
    RawMatrix { rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TOLERANCE: f32 = 1e-4;

    fn finite() -> impl Strategy<Value = f32> {
        -1000.0f32..1000.0f32
    }

    fn raw_vector() -> impl Strategy<Value = RawVector3> {
        (finite(), finite(), finite()).prop_map(|(x, y, z)| RawVector3 { x, y, z })
    }

    fn raw_quaternion() -> impl Strategy<Value = RawQuaternion> {
        (-1.0f32..1.0, -1.0f32..1.0, -1.0f32..1.0, -1.0f32..1.0)
            .prop_map(|(x, y, z, w)| RawQuaternion { x, y, z, w })
    }

    fn raw_matrix() -> impl Strategy<Value = RawMatrix> {
        proptest::array::uniform4(proptest::array::uniform4(finite()))
            .prop_map(|rows| RawMatrix { rows })
    }

    proptest! {
        #[test]
        fn vector_round_trip(v in raw_vector()) {
            let back = vector_to_backend(vector_to_host(v));
            prop_assert!((back.x - v.x).abs() <= TOLERANCE);
            prop_assert!((back.y - v.y).abs() <= TOLERANCE);
            prop_assert!((back.z - v.z).abs() <= TOLERANCE);
        }

        #[test]
        fn quaternion_round_trip(q in raw_quaternion()) {
            let back = quaternion_to_backend(quaternion_to_host(q));
            prop_assert!((back.x - q.x).abs() <= TOLERANCE);
            prop_assert!((back.y - q.y).abs() <= TOLERANCE);
            prop_assert!((back.z - q.z).abs() <= TOLERANCE);
            prop_assert!((back.w - q.w).abs() <= TOLERANCE);
        }

        #[test]
        fn matrix_round_trip(m in raw_matrix()) {
            let back = matrix_to_backend(&matrix_to_host(&m));
            for r in 0..4 {
                for c in 0..4 {
                    prop_assert!((back.rows[r][c] - m.rows[r][c]).abs() <= TOLERANCE);
                }
            }
        }

        /// The converted matrix must denote the same transform: applying the
        /// host matrix to a point matches the backend's row-vector product.
        #[test]
        fn matrix_conversion_preserves_the_transform(m in raw_matrix(), v in raw_vector()) {
            let host = matrix_to_host(&m);
            let through_host = host.transform_point(vector_to_host(v));
            let rows = m.rows;
            let expected = [
                rows[0][0] * v.x + rows[0][1] * v.y + rows[0][2] * v.z + rows[0][3],
                rows[1][0] * v.x + rows[1][1] * v.y + rows[1][2] * v.z + rows[1][3],
            ];
            // Loose tolerance: products of values up to 1e3 lose low bits.
            prop_assert!((through_host.x - expected[0]).abs() <= 1e-1_f32.max(expected[0].abs() * 1e-4));
            prop_assert!((through_host.y - expected[1]).abs() <= 1e-1_f32.max(expected[1].abs() * 1e-4));
        }
    }

    #[test]
    fn pose_round_trip_is_exact() {
        let pose = RawPose {
            position: RawVector3 {
                x: 0.1,
                y: 1.6,
                z: -0.4,
            },
            orientation: RawQuaternion {
                x: 0.0,
                y: 0.707,
                z: 0.0,
                w: 0.707,
            },
        };
        assert_eq!(pose_to_backend(pose_to_host(pose)), pose);
    }
}
