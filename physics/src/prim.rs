/*!
Prim (rigid object) actor record and its pending-change set.

Host-facing property setters never touch native state directly: they merge
into a [`PrimTaints`] pending-change struct (last write wins), and the
stepper drains the taints once per frame under the simulation lock, in a
fixed order. Geometry and body handles on the record are only ever created
or destroyed inside that drain.
*/

use crate::flags::CollisionBits;
use crate::geom::{BodyHandle, GeomHandle};
use crate::shape::PrimShape;
use crate::types::{Quat, Vec3};

/// Clamp range for prim spawn X/Y (meters): slightly past the region edge.
const SPAWN_CLAMP_MAX: f32 = 257.0;

pub struct PrimActor {
    pub name: String,
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
    pub rotational_velocity: Vec3,
    pub acceleration: Vec3,
    pub size: Vec3,
    pub shape: PrimShape,
    pub is_physical: bool,
    pub is_selected: bool,
    /// Soft-disabled by the host; the body sleeps until re-enabled.
    pub disabled: bool,
    pub geom: Option<GeomHandle>,
    pub body: Option<BodyHandle>,
    pub categories: CollisionBits,
    pub collide_mask: CollisionBits,

    // Collision accounting for host diagnostics.
    pub is_colliding: bool,
    pub colliding_ground: bool,
    pub colliding_obj: bool,
    pub collision_score: u32,
    pub interpenetration_count: u32,

    // Snapshot policy state.
    pub last_position: Vec3,
    pub last_velocity: Vec3,
    pub resting: bool,
    pub low_motion_frames: u32,
    pub throttle_updates: bool,
    pub throttle_counter: u32,
    pub last_update_sent: bool,
    pub out_of_bounds: bool,
}

impl PrimActor {
    /// New record with the spawn clamps applied: X/Y into `[0, 257]`, and
    /// `physical` refused for spawn positions below ground level.
    pub fn new(
        name: String,
        position: Vec3,
        size: Vec3,
        orientation: Quat,
        shape: PrimShape,
        is_physical: bool,
    ) -> Self {
        let clamped = Vec3::new(
            position.x.clamp(0.0, SPAWN_CLAMP_MAX),
            position.y.clamp(0.0, SPAWN_CLAMP_MAX),
            position.z,
        );
        let is_physical = is_physical && clamped.z >= 0.0;
        Self {
            name,
            position: clamped,
            orientation,
            velocity: Vec3::zeros(),
            rotational_velocity: Vec3::zeros(),
            acceleration: Vec3::zeros(),
            size,
            shape,
            is_physical,
            is_selected: false,
            disabled: false,
            geom: None,
            body: None,
            categories: CollisionBits::empty(),
            collide_mask: CollisionBits::empty(),
            is_colliding: false,
            colliding_ground: false,
            colliding_obj: false,
            collision_score: 0,
            interpenetration_count: 0,
            last_position: clamped,
            last_velocity: Vec3::zeros(),
            resting: true,
            low_motion_frames: 0,
            throttle_updates: false,
            throttle_counter: 0,
            last_update_sent: false,
            out_of_bounds: false,
        }
    }
}

/// Pending property changes for one prim, merged last-write-wins by the
/// setters and drained once per frame in declaration order (add first,
/// velocity last). `remove` trumps everything else.
#[derive(Default)]
pub struct PrimTaints {
    pub add: bool,
    pub remove: bool,
    pub position: Option<Vec3>,
    pub orientation: Option<Quat>,
    pub physical: Option<bool>,
    pub size: Option<Vec3>,
    pub shape: Option<PrimShape>,
    /// Forces accumulate rather than replace; the drain applies the sum.
    pub forces: Vec<Vec3>,
    pub disable: bool,
    pub selected: Option<bool>,
    pub velocity: Option<Vec3>,
}

impl PrimTaints {
    pub fn is_empty(&self) -> bool {
        !self.add
            && !self.remove
            && self.position.is_none()
            && self.orientation.is_none()
            && self.physical.is_none()
            && self.size.is_none()
            && self.shape.is_none()
            && self.forces.is_empty()
            && !self.disable
            && self.selected.is_none()
            && self.velocity.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(pos: Vec3, physical: bool) -> PrimActor {
        PrimActor::new(
            "p".into(),
            pos,
            Vec3::repeat(1.0),
            Quat::identity(),
            PrimShape::default(),
            physical,
        )
    }

    #[test]
    fn spawn_position_is_clamped_into_the_region_margin() {
        let p = actor(Vec3::new(-10.0, 300.0, 5.0), false);
        assert_eq!(p.position.x, 0.0);
        assert_eq!(p.position.y, SPAWN_CLAMP_MAX);
        assert_eq!(p.position.z, 5.0);
    }

    #[test]
    fn physical_is_refused_below_ground_level() {
        let below = actor(Vec3::new(10.0, 10.0, -1.0), true);
        assert!(!below.is_physical);
        let above = actor(Vec3::new(10.0, 10.0, 1.0), true);
        assert!(above.is_physical);
    }

    #[test]
    fn taint_setters_are_last_write_wins_except_forces() {
        let mut t = PrimTaints::default();
        assert!(t.is_empty());
        t.position = Some(Vec3::new(1.0, 0.0, 0.0));
        t.position = Some(Vec3::new(2.0, 0.0, 0.0));
        t.forces.push(Vec3::new(0.0, 0.0, 1.0));
        t.forces.push(Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(t.position.unwrap().x, 2.0);
        assert_eq!(t.forces.len(), 2);
        assert!(!t.is_empty());
    }
}
