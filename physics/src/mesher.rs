/*!
Triangle-mesh generation seam.

Prims whose descriptors cannot be expressed as procedural primitives get a
triangle mesh from a [`Mesher`] collaborator supplied by the host. The crate
ships [`BoxMesher`], a minimal built-in covering plain and square-hollowed
box profiles; hosts with a full profile mesher plug it in here.

Mesher failure is never fatal: the shape builder logs and falls back to the
prim's bounding box.
*/

use thiserror::Error;

use crate::shape::PrimShape;
use crate::types::Vec3;

/// Raw triangle mesh: vertex positions plus CCW index triples.
#[derive(Clone, Debug, Default)]
pub struct TriMeshData {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
}

impl TriMeshData {
    /// A mesh the narrow phase cannot use (no triangles, or an index past
    /// the vertex table).
    pub fn is_degenerate(&self) -> bool {
        if self.indices.is_empty() || self.vertices.len() < 3 {
            return true;
        }
        let n = self.vertices.len() as u32;
        self.indices
            .iter()
            .any(|tri| tri.iter().any(|&i| i >= n))
    }
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("unsupported prim profile for this mesher: {0}")]
    Unsupported(&'static str),
    #[error("degenerate mesh: {0}")]
    Degenerate(&'static str),
}

/// Host-supplied triangle mesh generator.
///
/// `name` is the owning prim's name, for log attribution only.
pub trait Mesher: Send {
    fn create_mesh(
        &self,
        name: &str,
        shape: &PrimShape,
        size: Vec3,
    ) -> Result<TriMeshData, MeshError>;
}

/// Built-in mesher for box-profile prims: a plain box shell, or an outer +
/// inner shell pair when square-hollowed. Everything else is unsupported
/// and falls back to the bounding box upstream.
pub struct BoxMesher;

impl Mesher for BoxMesher {
    fn create_mesh(
        &self,
        _name: &str,
        shape: &PrimShape,
        size: Vec3,
    ) -> Result<TriMeshData, MeshError> {
        use crate::shape::{HollowShape, PathCurve, ProfileShape};

        if shape.profile != ProfileShape::Square || shape.path_curve != PathCurve::Straight {
            return Err(MeshError::Unsupported("non-box profile"));
        }
        if shape.path_twist != 0.0
            || shape.path_twist_begin != 0.0
            || shape.profile_begin != 0.0
            || shape.profile_end != 0.0
            || shape.path_shear_x != 0.0
            || shape.path_shear_y != 0.0
            || shape.path_scale_x != 1.0
            || shape.path_scale_y != 1.0
        {
            return Err(MeshError::Unsupported("cut/twist/shear/taper box"));
        }
        if size.x <= 0.0 || size.y <= 0.0 || size.z <= 0.0 {
            return Err(MeshError::Degenerate("non-positive size"));
        }

        let half = size * 0.5;
        let mut mesh = TriMeshData::default();
        append_box(&mut mesh, half, false);

        if shape.hollow > 0.0 {
            match shape.hollow_shape {
                HollowShape::Same | HollowShape::Square => {
                    // Inner shell with flipped winding approximates the tube.
                    let h = shape.hollow.clamp(0.0, 0.95);
                    let inner = Vec3::new(half.x * h, half.y * h, half.z);
                    if inner.x > 0.0 && inner.y > 0.0 {
                        append_box(&mut mesh, inner, true);
                    }
                }
                _ => return Err(MeshError::Unsupported("non-square hollow")),
            }
        }

        if mesh.is_degenerate() {
            return Err(MeshError::Degenerate("empty box mesh"));
        }
        Ok(mesh)
    }
}

/// Appends an axis-aligned box centered on the origin. `flip` reverses the
/// winding for interior (hollow) shells.
fn append_box(mesh: &mut TriMeshData, half: Vec3, flip: bool) {
    let base = mesh.vertices.len() as u32;
    for &sz in &[-1.0f32, 1.0] {
        for &sy in &[-1.0f32, 1.0] {
            for &sx in &[-1.0f32, 1.0] {
                mesh.vertices.push([half.x * sx, half.y * sy, half.z * sz]);
            }
        }
    }
    // Vertex order: x fastest, then y, then z.
    const FACES: [[u32; 4]; 6] = [
        [0, 2, 3, 1], // -z
        [4, 5, 7, 6], // +z
        [0, 1, 5, 4], // -y
        [2, 6, 7, 3], // +y
        [0, 4, 6, 2], // -x
        [1, 3, 7, 5], // +x
    ];
    for face in FACES {
        let [a, b, c, d] = face.map(|i| base + i);
        if flip {
            mesh.indices.push([a, c, b]);
            mesh.indices.push([a, d, c]);
        } else {
            mesh.indices.push([a, b, c]);
            mesh.indices.push([a, c, d]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{HollowShape, ProfileShape};

    #[test]
    fn plain_box_mesh_is_a_closed_shell() {
        let mesh = BoxMesher
            .create_mesh("box", &PrimShape::default(), Vec3::new(1.0, 2.0, 3.0))
            .unwrap();
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.indices.len(), 12);
        assert!(!mesh.is_degenerate());
    }

    #[test]
    fn square_hollow_adds_an_inner_shell() {
        let shape = PrimShape {
            hollow: 0.5,
            hollow_shape: HollowShape::Square,
            ..PrimShape::default()
        };
        let mesh = BoxMesher
            .create_mesh("tube", &shape, Vec3::new(1.0, 1.0, 1.0))
            .unwrap();
        assert_eq!(mesh.vertices.len(), 16);
        assert_eq!(mesh.indices.len(), 24);
    }

    #[test]
    fn unsupported_profiles_are_reported_not_panicked() {
        let shape = PrimShape {
            profile: ProfileShape::Circle,
            ..PrimShape::default()
        };
        let err = BoxMesher
            .create_mesh("cyl", &shape, Vec3::new(1.0, 1.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, MeshError::Unsupported(_)));
    }

    #[test]
    fn degenerate_sizes_are_rejected() {
        let err = BoxMesher
            .create_mesh("flat", &PrimShape::default(), Vec3::new(1.0, 0.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, MeshError::Degenerate(_)));
    }

    #[test]
    fn mesh_vertices_respect_the_half_extents() {
        let size = Vec3::new(2.0, 4.0, 6.0);
        let mesh = BoxMesher
            .create_mesh("box", &PrimShape::default(), size)
            .unwrap();
        for v in &mesh.vertices {
            assert!(v[0].abs() <= size.x * 0.5 + 1.0e-6);
            assert!(v[1].abs() <= size.y * 0.5 + 1.0e-6);
            assert!(v[2].abs() <= size.z * 0.5 + 1.0e-6);
        }
    }
}
