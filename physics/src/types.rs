/*!
Core math aliases shared by the physics submodules.

This module intentionally contains no algorithms. It defines the vector,
rotation and pose types exchanged between:
- the shape builder and geom records
- broad/narrow phase (parry3d queries)
- the rigid-body state and the impulse solver
- the stepper and its snapshots
*/

use nalgebra as na;

/// Common math aliases for clarity and consistency.
pub type Vec3 = na::Vector3<f32>;
pub type Quat = na::UnitQuaternion<f32>;
pub type Iso = na::Isometry3<f32>;
pub type Mat3 = na::Matrix3<f32>;

/// Build a world pose from a translation and rotation, for parry3d queries.
#[inline]
pub fn pose(translation: Vec3, rotation: Quat) -> Iso {
    Iso::from_parts(
        na::Translation3::new(translation.x, translation.y, translation.z),
        rotation,
    )
}

/// True when every component of the vector is finite.
#[inline]
pub fn vec_finite(v: &Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}
