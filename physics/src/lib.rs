/*!
Rigid-body physics and collision layer for a multi-user 3D region simulator.

The [`scene::Scene`] owns all simulation state: prim and character actors,
their collision geometry in a gridded broad phase, the terrain heightfield,
and the transient contact joints solved each fixed sub-step. Hosts mutate
actors through deferred property setters and observe the world through
per-frame snapshots and drained events.
*/

pub mod arena;
pub mod body;
pub mod character;
pub mod collide;
pub mod flags;
pub mod geom;
pub mod mesher;
pub mod prim;
pub mod scene;
pub mod settings;
pub mod shape;
pub mod solver;
pub mod spaces;
pub mod terrain;
pub mod types;

pub use arena::{Arena, Handle};
pub use geom::{CharacterHandle, PrimHandle};
pub use mesher::{BoxMesher, MeshError, Mesher, TriMeshData};
pub use scene::{ActorId, CharacterState, PrimState, Scene, SceneEvent};
pub use shape::{HollowShape, PathCurve, PrimShape, ProfileShape};
pub use terrain::TerrainError;
pub use types::{Iso, Quat, Vec3};
