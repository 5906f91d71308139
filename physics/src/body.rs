/*!
Rigid-body state.

Bodies are created lazily, only while an actor is physical. Mass is set as
a box total from the actor's derived mass and extents; characters lock
rotation by zeroing their inverse inertia.
*/

use crate::settings::{BODY_AUTO_DISABLE_STEPS, BODY_SLEEP_SPEED_SQ};
use crate::types::{Mat3, Quat, Vec3, vec_finite};

pub struct RigidBody {
    pub position: Vec3,
    pub orientation: Quat,
    pub linvel: Vec3,
    pub angvel: Vec3,
    /// Accumulated force/torque; cleared once consumed by a sub-step.
    pub force: Vec3,
    pub torque: Vec3,
    pub mass: f32,
    pub inv_mass: f32,
    /// Inverse of the diagonal local inertia tensor; all zero locks rotation.
    inv_inertia_local: Vec3,
    /// Gravity opt-out (flying characters).
    pub ignore_gravity: bool,
    pub enabled: bool,
    /// Bodies with auto-disable go to sleep after enough low-motion steps.
    pub auto_disable: bool,
    low_motion_steps: u32,
}

impl RigidBody {
    /// Body with the inertia of a solid box of the given total mass and
    /// full extents.
    pub fn new_box_total(mass: f32, extents: Vec3, position: Vec3, orientation: Quat) -> Self {
        let (inv_mass, inv_inertia_local) = if mass > 0.0 {
            let c = mass / 12.0;
            let ix = c * (extents.y * extents.y + extents.z * extents.z);
            let iy = c * (extents.x * extents.x + extents.z * extents.z);
            let iz = c * (extents.x * extents.x + extents.y * extents.y);
            (
                1.0 / mass,
                Vec3::new(1.0 / ix.max(1.0e-9), 1.0 / iy.max(1.0e-9), 1.0 / iz.max(1.0e-9)),
            )
        } else {
            (0.0, Vec3::zeros())
        };
        Self {
            position,
            orientation,
            linvel: Vec3::zeros(),
            angvel: Vec3::zeros(),
            force: Vec3::zeros(),
            torque: Vec3::zeros(),
            mass,
            inv_mass,
            inv_inertia_local,
            ignore_gravity: false,
            enabled: true,
            auto_disable: true,
            low_motion_steps: 0,
        }
    }

    /// Prevents any rotation: character shells stay upright.
    pub fn lock_rotation(&mut self) {
        self.inv_inertia_local = Vec3::zeros();
        self.angvel = Vec3::zeros();
    }

    /// World-frame inverse inertia tensor: R * I_local^-1 * R^T.
    pub fn inv_inertia_world(&self) -> Mat3 {
        let r = self.orientation.to_rotation_matrix();
        let d = Mat3::from_diagonal(&self.inv_inertia_local);
        r.matrix() * d * r.matrix().transpose()
    }

    /// Velocity of the material point at world position `point`.
    pub fn velocity_at(&self, point: Vec3) -> Vec3 {
        self.linvel + self.angvel.cross(&(point - self.position))
    }

    /// Applies an instantaneous impulse at a world point.
    pub fn apply_impulse(&mut self, impulse: Vec3, point: Vec3) {
        self.linvel += impulse * self.inv_mass;
        let r = point - self.position;
        self.angvel += self.inv_inertia_world() * r.cross(&impulse);
    }

    /// Semi-implicit Euler position update from current velocities.
    pub fn integrate(&mut self, dt: f32) {
        self.position += self.linvel * dt;
        let w = self.angvel;
        if w.norm_squared() > 0.0 {
            let dq = Quat::from_scaled_axis(w * dt);
            self.orientation = dq * self.orientation;
        }
    }

    pub fn wake(&mut self) {
        self.enabled = true;
        self.low_motion_steps = 0;
    }

    /// Auto-disable bookkeeping for one sub-step; returns true when the
    /// body just went to sleep.
    pub fn note_motion(&mut self) -> bool {
        if !self.auto_disable || !self.enabled {
            return false;
        }
        let speed_sq = self.linvel.norm_squared() + self.angvel.norm_squared();
        if speed_sq < BODY_SLEEP_SPEED_SQ {
            self.low_motion_steps += 1;
            if self.low_motion_steps > BODY_AUTO_DISABLE_STEPS {
                self.enabled = false;
                self.linvel = Vec3::zeros();
                self.angvel = Vec3::zeros();
                return true;
            }
        } else {
            self.low_motion_steps = 0;
        }
        false
    }

    /// True when position, orientation and velocities are all finite.
    pub fn is_finite(&self) -> bool {
        vec_finite(&self.position)
            && vec_finite(&self.linvel)
            && vec_finite(&self.angvel)
            && self.orientation.coords.iter().all(|c| c.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_inertia_scales_with_mass_and_extents() {
        let a = RigidBody::new_box_total(12.0, Vec3::repeat(1.0), Vec3::zeros(), Quat::identity());
        // Solid unit cube of mass 12: I = 12/12 * (1 + 1) = 2 per axis.
        let inv = a.inv_inertia_world();
        assert!((inv[(0, 0)] - 0.5).abs() < 1.0e-5);
        assert!((inv[(1, 1)] - 0.5).abs() < 1.0e-5);
        assert!((inv[(2, 2)] - 0.5).abs() < 1.0e-5);
    }

    #[test]
    fn central_impulse_changes_only_linear_velocity() {
        let mut b =
            RigidBody::new_box_total(2.0, Vec3::repeat(1.0), Vec3::zeros(), Quat::identity());
        b.apply_impulse(Vec3::new(4.0, 0.0, 0.0), Vec3::zeros());
        assert!((b.linvel.x - 2.0).abs() < 1.0e-5);
        assert!(b.angvel.norm() < 1.0e-6);
    }

    #[test]
    fn offset_impulse_induces_spin_unless_rotation_is_locked() {
        let mut b =
            RigidBody::new_box_total(2.0, Vec3::repeat(1.0), Vec3::zeros(), Quat::identity());
        b.apply_impulse(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.5, 0.0, 0.0));
        assert!(b.angvel.norm() > 0.0);

        let mut locked =
            RigidBody::new_box_total(2.0, Vec3::repeat(1.0), Vec3::zeros(), Quat::identity());
        locked.lock_rotation();
        locked.apply_impulse(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.5, 0.0, 0.0));
        assert!(locked.angvel.norm() < 1.0e-6);
    }

    #[test]
    fn sustained_low_motion_puts_the_body_to_sleep() {
        let mut b =
            RigidBody::new_box_total(1.0, Vec3::repeat(1.0), Vec3::zeros(), Quat::identity());
        b.linvel = Vec3::new(0.001, 0.0, 0.0);
        let mut slept = false;
        for _ in 0..=BODY_AUTO_DISABLE_STEPS {
            slept = b.note_motion() || slept;
        }
        assert!(slept);
        assert!(!b.enabled);
        assert!(b.linvel.norm() < 1.0e-6);
    }

    #[test]
    fn waking_resets_the_low_motion_counter() {
        let mut b =
            RigidBody::new_box_total(1.0, Vec3::repeat(1.0), Vec3::zeros(), Quat::identity());
        for _ in 0..BODY_AUTO_DISABLE_STEPS {
            b.note_motion();
        }
        b.wake();
        assert!(b.enabled);
        assert!(!b.note_motion());
    }
}
