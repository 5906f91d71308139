/*!
Prim shape descriptors and the shape-classification rules.

A prim's collision geometry is chosen from its profile descriptor:
- plain box profiles and uniform half-circle extrusions map to procedural
  primitives (box, sphere),
- anything cut, twisted, sheared, hollowed or scaled along the path needs a
  triangle mesh from the [`Mesher`](crate::mesher::Mesher) collaborator.

Mass is derived from the descriptor and size, never stored.
*/

use crate::settings::MATERIAL_DENSITY;
use crate::types::Vec3;

/// Cross-section profile family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileShape {
    Square,
    Circle,
    HalfCircle,
    EquilateralTriangle,
}

/// Shape of the hollowed-out interior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HollowShape {
    /// Interior follows the outer profile.
    Same,
    Square,
    Circle,
    Triangle,
}

/// Extrusion curve along the path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathCurve {
    Straight,
    Curve1,
}

/// Prim profile descriptor. Defaults describe a solid unit box profile.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimShape {
    pub profile: ProfileShape,
    pub hollow_shape: HollowShape,
    /// Hollow interior fraction, `0..1`. Zero means solid.
    pub hollow: f32,
    /// Fraction of the profile cut away from the start, `0..1`.
    pub profile_begin: f32,
    /// Fraction of the profile cut away from the end, `0..1`.
    pub profile_end: f32,
    /// Twist along the path, degrees, at the far end.
    pub path_twist: f32,
    /// Twist along the path, degrees, at the near end.
    pub path_twist_begin: f32,
    /// Path taper scale per axis; 1 means no taper.
    pub path_scale_x: f32,
    pub path_scale_y: f32,
    /// Path shear per axis; 0 means no shear.
    pub path_shear_x: f32,
    pub path_shear_y: f32,
    pub path_curve: PathCurve,
}

impl Default for PrimShape {
    fn default() -> Self {
        Self {
            profile: ProfileShape::Square,
            hollow_shape: HollowShape::Same,
            hollow: 0.0,
            profile_begin: 0.0,
            profile_end: 0.0,
            path_twist: 0.0,
            path_twist_begin: 0.0,
            path_scale_x: 1.0,
            path_scale_y: 1.0,
            path_shear_x: 0.0,
            path_shear_y: 0.0,
            path_curve: PathCurve::Straight,
        }
    }
}

impl PrimShape {
    /// Descriptor for a procedural sphere (uniform half-circle extrusion).
    pub fn sphere() -> Self {
        Self {
            profile: ProfileShape::HalfCircle,
            path_curve: PathCurve::Curve1,
            ..Self::default()
        }
    }
}

/// True when the descriptor cannot be represented by a procedural
/// primitive and must go through the mesher.
pub fn needs_meshing(shape: &PrimShape, size: Vec3) -> bool {
    if shape.hollow != 0.0 {
        return true;
    }
    if shape.path_twist != 0.0 || shape.path_twist_begin != 0.0 {
        return true;
    }
    if shape.profile_begin != 0.0 || shape.profile_end != 0.0 {
        return true;
    }
    if shape.path_scale_x != 1.0 || shape.path_scale_y != 1.0 {
        return true;
    }
    if shape.path_shear_x != 0.0 || shape.path_shear_y != 0.0 {
        return true;
    }
    match (shape.profile, shape.path_curve) {
        // A circle profile extruded straight is a cylinder; no primitive.
        (ProfileShape::Circle, PathCurve::Straight) => true,
        // A half-circle curve is a sphere only when uniform.
        (ProfileShape::HalfCircle, PathCurve::Curve1) => !is_sphere(shape, size),
        (ProfileShape::EquilateralTriangle, _) => true,
        _ => false,
    }
}

/// True when the descriptor + size describe a procedural sphere.
pub fn is_sphere(shape: &PrimShape, size: Vec3) -> bool {
    shape.profile == ProfileShape::HalfCircle
        && shape.path_curve == PathCurve::Curve1
        && size.x == size.y
        && size.y == size.z
        && size.x > 0.0
}

/// Interior volume of the descriptor at the given size (m^3).
///
/// The outer volume is the bounding prism; the hollow interior and the
/// profile cut are subtracted. The cut fraction is clamped to 0.99 so a
/// fully-cut prim keeps a sliver of mass.
pub fn volume_for(shape: &PrimShape, size: Vec3) -> f32 {
    let outer = size.x * size.y * size.z;

    let hollow = shape.hollow.clamp(0.0, 1.0);
    let hollowed = if hollow > 0.0 {
        let removed = match shape.hollow_shape {
            HollowShape::Same | HollowShape::Square => outer * hollow * hollow * hollow,
            HollowShape::Circle => {
                std::f32::consts::PI * (size.x * 0.5) * (size.x * 0.5) * size.z * hollow
            }
            HollowShape::Triangle => 0.5 * size.x * size.y * size.z * hollow,
        };
        (outer - removed).max(0.0)
    } else {
        outer
    };

    let cut = (shape.profile_begin + shape.profile_end).clamp(0.0, 0.99);
    hollowed * (1.0 - cut)
}

/// Derived total mass (kg): material density times interior volume.
pub fn mass_for(shape: &PrimShape, size: Vec3) -> f32 {
    MATERIAL_DENSITY * volume_for(shape, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> Vec3 {
        Vec3::new(1.0, 1.0, 1.0)
    }

    #[test]
    fn plain_box_and_sphere_skip_the_mesher() {
        assert!(!needs_meshing(&PrimShape::default(), unit()));
        assert!(!needs_meshing(&PrimShape::sphere(), unit()));
    }

    #[test]
    fn cut_twist_shear_and_hollow_force_meshing() {
        let size = unit();
        let mut s = PrimShape::default();
        s.hollow = 0.5;
        assert!(needs_meshing(&s, size));

        let mut s = PrimShape::default();
        s.path_twist = 45.0;
        assert!(needs_meshing(&s, size));

        let mut s = PrimShape::default();
        s.profile_begin = 0.25;
        assert!(needs_meshing(&s, size));

        let mut s = PrimShape::default();
        s.path_shear_x = 0.1;
        assert!(needs_meshing(&s, size));

        let mut s = PrimShape::default();
        s.path_scale_x = 0.5;
        assert!(needs_meshing(&s, size));
    }

    #[test]
    fn non_uniform_half_circle_is_not_a_sphere() {
        let s = PrimShape::sphere();
        assert!(is_sphere(&s, unit()));
        assert!(!is_sphere(&s, Vec3::new(1.0, 1.0, 2.0)));
        assert!(needs_meshing(&s, Vec3::new(1.0, 1.0, 2.0)));
    }

    #[test]
    fn cylinder_and_triangle_profiles_need_meshing() {
        let mut s = PrimShape::default();
        s.profile = ProfileShape::Circle;
        assert!(needs_meshing(&s, unit()));

        let mut s = PrimShape::default();
        s.profile = ProfileShape::EquilateralTriangle;
        assert!(needs_meshing(&s, unit()));
    }

    #[test]
    fn hollowing_strictly_reduces_mass() {
        // More hollow, less mass, for every hollow shape.
        let size = Vec3::new(2.0, 2.0, 2.0);
        for hollow_shape in [
            HollowShape::Same,
            HollowShape::Square,
            HollowShape::Circle,
            HollowShape::Triangle,
        ] {
            let mut prev = f32::MAX;
            for hollow in [0.0, 0.25, 0.5, 0.75] {
                let s = PrimShape {
                    hollow_shape,
                    hollow,
                    ..PrimShape::default()
                };
                let m = mass_for(&s, size);
                assert!(m > 0.0);
                assert!(m < prev, "hollow {hollow} did not reduce mass");
                prev = m;
            }
        }
    }

    #[test]
    fn profile_cut_is_clamped_below_one() {
        // A fully-cut prim keeps a sliver of mass rather than reaching zero.
        let s = PrimShape {
            profile_begin: 0.6,
            profile_end: 0.6,
            ..PrimShape::default()
        };
        let m = mass_for(&s, unit());
        assert!(m > 0.0);
        let expected = MATERIAL_DENSITY * 0.01;
        assert!((m - expected).abs() < 1.0e-4);
    }

    #[test]
    fn solid_unit_box_mass_is_the_density() {
        let m = mass_for(&PrimShape::default(), unit());
        assert!((m - MATERIAL_DENSITY).abs() < 1.0e-5);
    }
}
