/*!
Character (avatar) actor record.

Unlike prims, characters always own a capsule shell and a rotation-locked
body in the root space for their whole lifetime; they are moved by blending
body velocity toward a host-set target velocity each sub-step, with gravity
applied unless flying. Collision flags are reset at the start of every
sub-step and re-derived by the resolver.
*/

use crate::geom::{BodyHandle, GeomHandle};
use crate::types::Vec3;

/// Default avatar capsule radius (meters) when the host size is degenerate.
pub const DEFAULT_CAPSULE_RADIUS: f32 = 0.22;

pub struct CharacterActor {
    pub name: String,
    pub position: Vec3,
    pub velocity: Vec3,
    /// Host-requested velocity; the mover blends toward it.
    pub target_velocity: Vec3,
    pub flying: bool,
    /// Full avatar height (capsule tip to tip).
    pub height: f32,
    pub radius: f32,
    pub geom: GeomHandle,
    pub body: BodyHandle,

    pub is_colliding: bool,
    pub colliding_ground: bool,
    pub colliding_obj: bool,

    pub last_position: Vec3,
    pub out_of_bounds: bool,
}

impl CharacterActor {
    pub fn reset_collision_flags(&mut self) {
        self.is_colliding = false;
        self.colliding_ground = false;
        self.colliding_obj = false;
    }
}

/// Pending property changes for one character; merged last-write-wins and
/// drained once per frame.
#[derive(Default)]
pub struct CharacterTaints {
    pub remove: bool,
    pub position: Option<Vec3>,
    pub target_velocity: Option<Vec3>,
    pub flying: Option<bool>,
}
