/*!
Collision geometry records.

A `Geom` couples a collision shape with its world pose, category/mask
bitfields, its owning actor, an optional dynamics body and its broad-phase
slot. Shape-shape narrow phase goes through parry3d; the terrain variant is
sampled directly by the resolver instead.
*/

use log::warn;
use nalgebra::Point3;
use parry3d::bounding_volume::Aabb;
use parry3d::shape::{Ball, Capsule, Cuboid, SharedShape, Shape, TriMesh};

use crate::arena::Handle;
use crate::body::RigidBody;
use crate::character::CharacterActor;
use crate::flags::CollisionBits;
use crate::mesher::Mesher;
use crate::prim::PrimActor;
use crate::settings::REGION_SIZE;
use crate::shape::{self, PrimShape};
use crate::types::{Iso, Vec3};

pub type GeomHandle = Handle<Geom>;
pub type BodyHandle = Handle<RigidBody>;
pub type PrimHandle = Handle<PrimActor>;
pub type CharacterHandle = Handle<CharacterActor>;

/// Collision shape carried by a geom.
#[derive(Clone)]
pub enum GeomShape {
    Box {
        /// Full extents per axis.
        size: Vec3,
    },
    Sphere {
        radius: f32,
    },
    /// Capsule along local Z (the region up axis).
    Capsule {
        radius: f32,
        half_height: f32,
    },
    /// Triangle mesh (shared, cheap to clone).
    Mesh {
        shape: SharedShape,
    },
    /// The region heightfield; resolved by direct sampling, not parry.
    Terrain,
}

/// The actor a geom reports collisions for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeomOwner {
    Prim(PrimHandle),
    Character(CharacterHandle),
    Terrain,
}

/// Broad-phase placement of a geom.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpaceSlot {
    /// Root space: terrain, character shells, dynamic prim geoms.
    Root,
    /// One static-prim grid cell.
    Cell(usize, usize),
}

pub struct Geom {
    /// Owning actor's name, for log attribution.
    pub name: String,
    pub shape: GeomShape,
    pub pose: Iso,
    pub categories: CollisionBits,
    pub collide_mask: CollisionBits,
    pub owner: GeomOwner,
    pub body: Option<BodyHandle>,
    pub slot: SpaceSlot,
}

impl Geom {
    /// Runs `f` with the parry view of this shape. `None` for terrain,
    /// which has no parry representation.
    pub fn with_parry<R>(&self, f: impl FnOnce(&dyn Shape) -> R) -> Option<R> {
        match &self.shape {
            GeomShape::Box { size } => Some(f(&Cuboid::new(*size * 0.5))),
            GeomShape::Sphere { radius } => Some(f(&Ball::new(*radius))),
            GeomShape::Capsule {
                radius,
                half_height,
            } => Some(f(&Capsule::new_z(*half_height, *radius))),
            GeomShape::Mesh { shape } => Some(f(shape.as_ref())),
            GeomShape::Terrain => None,
        }
    }

    /// World-space bounds. Terrain claims the whole region column so it is
    /// never pruned away.
    pub fn aabb(&self) -> Aabb {
        match self.with_parry(|s| s.compute_aabb(&self.pose)) {
            Some(aabb) => aabb,
            None => Aabb::new(
                Point3::new(-REGION_SIZE, -REGION_SIZE, -1.0e4),
                Point3::new(2.0 * REGION_SIZE, 2.0 * REGION_SIZE, 1.0e4),
            ),
        }
    }

    /// Full extents of the shape's local bounding box. Drives the contact
    /// offset used by the anti-stuck heuristics.
    pub fn extents(&self) -> Vec3 {
        match &self.shape {
            GeomShape::Box { size } => *size,
            GeomShape::Sphere { radius } => Vec3::repeat(radius * 2.0),
            GeomShape::Capsule {
                radius,
                half_height,
            } => Vec3::new(
                radius * 2.0,
                radius * 2.0,
                2.0 * (half_height + radius),
            ),
            GeomShape::Mesh { shape } => {
                let aabb = shape.compute_local_aabb();
                aabb.maxs - aabb.mins
            }
            GeomShape::Terrain => Vec3::new(REGION_SIZE, REGION_SIZE, 0.0),
        }
    }
}

/// Chooses the collision shape for a prim descriptor.
///
/// Procedural primitives are used where the descriptor allows; everything
/// else goes through the mesher, and any mesher or mesh-build failure falls
/// back to the prim's bounding box so the stepper never sees the failure.
pub fn shape_for_prim(
    mesher: &dyn Mesher,
    name: &str,
    shape: &PrimShape,
    size: Vec3,
) -> GeomShape {
    if !shape::needs_meshing(shape, size) {
        if shape::is_sphere(shape, size) {
            return GeomShape::Sphere {
                radius: size.x * 0.5,
            };
        }
        return GeomShape::Box { size };
    }

    let data = match mesher.create_mesh(name, shape, size) {
        Ok(data) => data,
        Err(err) => {
            warn!("prim '{name}': mesher failed ({err}); using bounding box");
            return GeomShape::Box { size };
        }
    };
    if data.is_degenerate() {
        warn!("prim '{name}': mesher produced a degenerate mesh; using bounding box");
        return GeomShape::Box { size };
    }

    let vertices: Vec<Point3<f32>> = data
        .vertices
        .iter()
        .map(|v| Point3::new(v[0], v[1], v[2]))
        .collect();
    match TriMesh::new(vertices, data.indices) {
        Ok(mesh) => GeomShape::Mesh {
            shape: SharedShape::new(mesh),
        },
        Err(err) => {
            warn!("prim '{name}': trimesh build failed ({err}); using bounding box");
            GeomShape::Box { size }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesher::BoxMesher;
    use crate::shape::ProfileShape;
    use crate::types::pose;
    use nalgebra::UnitQuaternion;

    #[test]
    fn plain_descriptors_become_procedural_primitives() {
        let box_shape = shape_for_prim(
            &BoxMesher,
            "b",
            &PrimShape::default(),
            Vec3::new(1.0, 2.0, 3.0),
        );
        assert!(matches!(box_shape, GeomShape::Box { .. }));

        let sphere = shape_for_prim(&BoxMesher, "s", &PrimShape::sphere(), Vec3::repeat(2.0));
        match sphere {
            GeomShape::Sphere { radius } => assert!((radius - 1.0).abs() < 1.0e-6),
            other => panic!("expected sphere, got {:?}", std::mem::discriminant(&other)),
        }
    }

    #[test]
    fn hollow_box_goes_through_the_mesher() {
        let shape = PrimShape {
            hollow: 0.5,
            ..PrimShape::default()
        };
        let built = shape_for_prim(&BoxMesher, "tube", &shape, Vec3::repeat(1.0));
        assert!(matches!(built, GeomShape::Mesh { .. }));
    }

    #[test]
    fn unsupported_mesh_profiles_fall_back_to_the_bounding_box() {
        let shape = PrimShape {
            profile: ProfileShape::Circle,
            ..PrimShape::default()
        };
        let built = shape_for_prim(&BoxMesher, "cyl", &shape, Vec3::new(1.0, 1.0, 2.0));
        match built {
            GeomShape::Box { size } => assert_eq!(size, Vec3::new(1.0, 1.0, 2.0)),
            _ => panic!("expected bounding-box fallback"),
        }
    }

    #[test]
    fn aabb_tracks_the_world_pose() {
        let geom = Geom {
            name: "b".into(),
            shape: GeomShape::Box {
                size: Vec3::new(2.0, 2.0, 2.0),
            },
            pose: pose(Vec3::new(10.0, 20.0, 30.0), UnitQuaternion::identity()),
            categories: CollisionBits::empty(),
            collide_mask: CollisionBits::empty(),
            owner: GeomOwner::Terrain,
            body: None,
            slot: SpaceSlot::Root,
        };
        let aabb = geom.aabb();
        assert!((aabb.mins.x - 9.0).abs() < 1.0e-5);
        assert!((aabb.maxs.z - 31.0).abs() < 1.0e-5);
    }
}
