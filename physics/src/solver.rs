/*!
Contact joints and the sub-step impulse solver.

Every surviving contact becomes a transient joint for exactly one sub-step;
the group is rebuilt from scratch by the resolver each time. The solver is
a sequential-impulse relaxation:

- gravity and accumulated forces are applied first,
- a fixed number of passes clamp the accumulated normal impulse to be
  non-negative, add a Baumgarte position bias (capped so corrections never
  inject more than a bounded velocity), apply restitution above a minimum
  approach speed, and clamp Coulomb friction to the friction cone,
- bodies integrate semi-implicit Euler and run auto-disable bookkeeping,
- a final scan rejects non-finite state so corruption is detected at the
  step that produced it.
*/

use std::collections::HashSet;

use crate::arena::Arena;
use crate::body::RigidBody;
use crate::geom::BodyHandle;
use crate::settings::{
    BOUNCE_VELOCITY_THRESHOLD, CONTACT_SURFACE_LAYER, GRAVITY, MAX_CORRECTING_VELOCITY,
};
use crate::types::{Mat3, Vec3};

/// Per-contact surface response parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceParams {
    /// Coulomb friction coefficient.
    pub mu: f32,
    /// Restitution, `0..1`.
    pub bounce: f32,
    /// Position-correction strength for this surface.
    pub soft_erp: f32,
}

/// One transient contact constraint.
pub struct ContactJoint {
    pub body_a: Option<BodyHandle>,
    pub body_b: Option<BodyHandle>,
    /// World contact position.
    pub position: Vec3,
    /// Unit normal pushing `body_a` away from `body_b`.
    pub normal: Vec3,
    pub depth: f32,
    pub surface: SurfaceParams,
    // Accumulated impulses and precomputed frame, solver-internal.
    impulse_n: f32,
    impulse_t: [f32; 2],
    tangents: [Vec3; 2],
    bounce_vel: f32,
}

impl ContactJoint {
    pub fn new(
        body_a: Option<BodyHandle>,
        body_b: Option<BodyHandle>,
        position: Vec3,
        normal: Vec3,
        depth: f32,
        surface: SurfaceParams,
    ) -> Self {
        Self {
            body_a,
            body_b,
            position,
            normal,
            depth,
            surface,
            impulse_n: 0.0,
            impulse_t: [0.0; 2],
            tangents: [Vec3::zeros(); 2],
            bounce_vel: 0.0,
        }
    }
}

/// The per-sub-step joint group, with the body-pair index used to skip
/// pairs that already hold a joint this sub-step.
#[derive(Default)]
pub struct JointGroup {
    joints: Vec<ContactJoint>,
    connected: HashSet<(u32, u32)>,
}

impl JointGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, joint: ContactJoint) {
        if let (Some(a), Some(b)) = (joint.body_a, joint.body_b) {
            self.connected.insert(pair_key(a, b));
        }
        self.joints.push(joint);
    }

    /// True when the two bodies already share a joint this sub-step.
    pub fn connected(&self, a: BodyHandle, b: BodyHandle) -> bool {
        self.connected.contains(&pair_key(a, b))
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Empties the group after the sub-step.
    pub fn clear(&mut self) {
        self.joints.clear();
        self.connected.clear();
    }
}

fn pair_key(a: BodyHandle, b: BodyHandle) -> (u32, u32) {
    let (x, y) = (a.index(), b.index());
    if x <= y { (x, y) } else { (y, x) }
}

/// Effective per-side constraint state; zeros for static or sleeping sides.
#[derive(Clone, Copy)]
struct Side {
    inv_mass: f32,
    inv_inertia: Mat3,
    vel: Vec3,
    r: Vec3,
}

impl Side {
    fn fixed() -> Self {
        Self {
            inv_mass: 0.0,
            inv_inertia: Mat3::zeros(),
            vel: Vec3::zeros(),
            r: Vec3::zeros(),
        }
    }
}

fn side_state(bodies: &Arena<RigidBody>, handle: Option<BodyHandle>, at: Vec3) -> Side {
    match handle.and_then(|h| bodies.get(h)) {
        Some(body) if body.enabled => Side {
            inv_mass: body.inv_mass,
            inv_inertia: body.inv_inertia_world(),
            vel: body.velocity_at(at),
            r: at - body.position,
        },
        _ => Side::fixed(),
    }
}

fn angular_term(side: &Side, dir: Vec3) -> f32 {
    let rxd = side.r.cross(&dir);
    dir.dot(&(side.inv_inertia * rxd).cross(&side.r))
}

fn apply_pair(
    bodies: &mut Arena<RigidBody>,
    joint: &ContactJoint,
    impulse: Vec3,
) {
    if let Some(h) = joint.body_a
        && let Some(body) = bodies.get_mut(h)
        && body.enabled
    {
        body.apply_impulse(impulse, joint.position);
    }
    if let Some(h) = joint.body_b
        && let Some(body) = bodies.get_mut(h)
        && body.enabled
    {
        body.apply_impulse(-impulse, joint.position);
    }
}

/// Orthonormal basis completing a unit normal.
fn tangent_basis(n: Vec3) -> [Vec3; 2] {
    let helper = if n.x.abs() < 0.7 {
        Vec3::new(1.0, 0.0, 0.0)
    } else {
        Vec3::new(0.0, 1.0, 0.0)
    };
    let t1 = n.cross(&helper).normalize();
    let t2 = n.cross(&t1);
    [t1, t2]
}

/// Advances all bodies by one fixed sub-step against the given joints.
///
/// Returns false when any body ends the step with non-finite state; the
/// caller treats that as fatal corruption.
pub fn quick_step(
    bodies: &mut Arena<RigidBody>,
    group: &mut JointGroup,
    dt: f32,
    iterations: u32,
) -> bool {
    // Forces and gravity.
    for (_, body) in bodies.iter_mut() {
        if body.enabled && body.inv_mass > 0.0 {
            let mut accel = body.force * body.inv_mass;
            if !body.ignore_gravity {
                accel += GRAVITY;
            }
            body.linvel += accel * dt;
            let ang = body.inv_inertia_world() * body.torque;
            body.angvel += ang * dt;
        }
        body.force = Vec3::zeros();
        body.torque = Vec3::zeros();
    }

    // Precompute contact frames, restitution targets and sleep waking.
    let inv_dt = 1.0 / dt;
    for joint in group.joints.iter_mut() {
        joint.tangents = tangent_basis(joint.normal);
        let a = side_state(bodies, joint.body_a, joint.position);
        let b = side_state(bodies, joint.body_b, joint.position);
        let vn = joint.normal.dot(&(a.vel - b.vel));
        joint.bounce_vel = if -vn > BOUNCE_VELOCITY_THRESHOLD {
            -vn * joint.surface.bounce
        } else {
            0.0
        };
        // A sleeping body hit by a moving one wakes for this step.
        wake_sleeping_side(bodies, joint.body_a, joint.body_b);
    }

    for _ in 0..iterations {
        for joint in group.joints.iter_mut() {
            solve_normal(bodies, joint, inv_dt);
            solve_friction(bodies, joint);
        }
    }

    for (_, body) in bodies.iter_mut() {
        if body.enabled && body.inv_mass > 0.0 {
            body.integrate(dt);
            body.note_motion();
        }
    }

    bodies.iter().all(|(_, body)| body.is_finite())
}

fn wake_sleeping_side(
    bodies: &mut Arena<RigidBody>,
    a: Option<BodyHandle>,
    b: Option<BodyHandle>,
) {
    let speed = |h: Option<BodyHandle>| {
        h.and_then(|h| bodies.get(h))
            .filter(|b| b.enabled)
            .map(|b| b.linvel.norm_squared())
            .unwrap_or(0.0)
    };
    let (speed_a, speed_b) = (speed(a), speed(b));
    const WAKE_SPEED_SQ: f32 = 0.25;
    if speed_a > WAKE_SPEED_SQ
        && let Some(h) = b
        && let Some(body) = bodies.get_mut(h)
        && !body.enabled
    {
        body.wake();
    }
    if speed_b > WAKE_SPEED_SQ
        && let Some(h) = a
        && let Some(body) = bodies.get_mut(h)
        && !body.enabled
    {
        body.wake();
    }
}

fn solve_normal(bodies: &mut Arena<RigidBody>, joint: &mut ContactJoint, inv_dt: f32) {
    let a = side_state(bodies, joint.body_a, joint.position);
    let b = side_state(bodies, joint.body_b, joint.position);
    let n = joint.normal;

    let k = a.inv_mass + b.inv_mass + angular_term(&a, n) + angular_term(&b, n);
    if k <= 0.0 {
        return;
    }

    let vn = n.dot(&(a.vel - b.vel));
    let pen = (joint.depth - CONTACT_SURFACE_LAYER).max(0.0);
    let bias = (joint.surface.soft_erp * pen * inv_dt).min(MAX_CORRECTING_VELOCITY);
    let target = bias.max(joint.bounce_vel);

    let lambda = (target - vn) / k;
    let accumulated = (joint.impulse_n + lambda).max(0.0);
    let delta = accumulated - joint.impulse_n;
    joint.impulse_n = accumulated;

    apply_pair(bodies, joint, n * delta);
}

fn solve_friction(bodies: &mut Arena<RigidBody>, joint: &mut ContactJoint) {
    let limit = joint.surface.mu * joint.impulse_n;
    if limit <= 0.0 {
        return;
    }
    for i in 0..2 {
        let t = joint.tangents[i];
        let a = side_state(bodies, joint.body_a, joint.position);
        let b = side_state(bodies, joint.body_b, joint.position);
        let k = a.inv_mass + b.inv_mass + angular_term(&a, t) + angular_term(&b, t);
        if k <= 0.0 {
            continue;
        }
        let vt = t.dot(&(a.vel - b.vel));
        let lambda = -vt / k;
        let accumulated = (joint.impulse_t[i] + lambda).clamp(-limit, limit);
        let delta = accumulated - joint.impulse_t[i];
        joint.impulse_t[i] = accumulated;
        apply_pair(bodies, joint, t * delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{SOLVER_ITERATIONS, WORLD_STEP};
    use crate::types::Quat;

    const SURFACE: SurfaceParams = SurfaceParams {
        mu: 250.0,
        bounce: 0.0,
        soft_erp: 0.2,
    };

    fn drop_body(bodies: &mut Arena<RigidBody>, z: f32) -> BodyHandle {
        bodies.insert(RigidBody::new_box_total(
            10.0,
            Vec3::repeat(1.0),
            Vec3::new(0.0, 0.0, z),
            Quat::identity(),
        ))
    }

    #[test]
    fn free_fall_matches_gravity() {
        let mut bodies = Arena::new();
        let h = drop_body(&mut bodies, 10.0);
        let mut group = JointGroup::new();
        for _ in 0..250 {
            assert!(quick_step(&mut bodies, &mut group, WORLD_STEP, SOLVER_ITERATIONS));
        }
        let body = bodies.get(h).unwrap();
        // One second of fall: v = -9.8, z ~= 10 - 4.9 (semi-implicit drifts
        // slightly low).
        assert!((body.linvel.z + 9.8).abs() < 1.0e-3);
        assert!((body.position.z - 5.1).abs() < 0.1);
    }

    #[test]
    fn ground_contact_stops_a_falling_body() {
        let mut bodies = Arena::new();
        let h = drop_body(&mut bodies, 0.5);
        bodies.get_mut(h).unwrap().linvel = Vec3::new(0.0, 0.0, -2.0);

        for _ in 0..50 {
            let mut group = JointGroup::new();
            let z = bodies.get(h).unwrap().position.z;
            let depth = 0.5 - z;
            if depth > -0.01 {
                group.attach(ContactJoint::new(
                    Some(h),
                    None,
                    Vec3::new(0.0, 0.0, z - 0.5),
                    Vec3::new(0.0, 0.0, 1.0),
                    depth.max(0.0),
                    SURFACE,
                ));
            }
            assert!(quick_step(&mut bodies, &mut group, WORLD_STEP, SOLVER_ITERATIONS));
        }
        let body = bodies.get(h).unwrap();
        assert!(body.linvel.z.abs() < 0.1);
        assert!((body.position.z - 0.5).abs() < 0.05);
    }

    #[test]
    fn bias_correction_velocity_is_capped() {
        // A deeply penetrating contact must not fire the body out.
        let mut bodies = Arena::new();
        let h = drop_body(&mut bodies, 0.0);
        let mut group = JointGroup::new();
        group.attach(ContactJoint::new(
            Some(h),
            None,
            Vec3::zeros(),
            Vec3::new(0.0, 0.0, 1.0),
            5.0,
            SURFACE,
        ));
        assert!(quick_step(&mut bodies, &mut group, WORLD_STEP, SOLVER_ITERATIONS));
        let body = bodies.get(h).unwrap();
        assert!(body.linvel.z <= MAX_CORRECTING_VELOCITY + 1.0e-3);
    }

    #[test]
    fn friction_arrests_sliding() {
        // Rotation-locked slider so the single pinned contact cannot roll.
        let mut bodies = Arena::new();
        let h = drop_body(&mut bodies, 0.5);
        {
            let body = bodies.get_mut(h).unwrap();
            body.lock_rotation();
            body.linvel = Vec3::new(1.0, 0.0, 0.0);
        }
        for _ in 0..100 {
            let mut group = JointGroup::new();
            group.attach(ContactJoint::new(
                Some(h),
                None,
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
                0.0,
                SURFACE,
            ));
            assert!(quick_step(&mut bodies, &mut group, WORLD_STEP, SOLVER_ITERATIONS));
        }
        let body = bodies.get(h).unwrap();
        assert!(body.linvel.x.abs() < 0.05);
    }

    #[test]
    fn non_finite_state_is_reported() {
        let mut bodies = Arena::new();
        let h = drop_body(&mut bodies, 1.0);
        bodies.get_mut(h).unwrap().linvel = Vec3::new(f32::NAN, 0.0, 0.0);
        let mut group = JointGroup::new();
        assert!(!quick_step(&mut bodies, &mut group, WORLD_STEP, SOLVER_ITERATIONS));
    }

    #[test]
    fn connected_pairs_are_indexed() {
        let mut bodies = Arena::new();
        let a = drop_body(&mut bodies, 1.0);
        let b = drop_body(&mut bodies, 3.0);
        let mut group = JointGroup::new();
        assert!(!group.connected(a, b));
        group.attach(ContactJoint::new(
            Some(a),
            Some(b),
            Vec3::zeros(),
            Vec3::new(0.0, 0.0, 1.0),
            0.0,
            SURFACE,
        ));
        assert!(group.connected(a, b));
        assert!(group.connected(b, a));
        group.clear();
        assert!(!group.connected(a, b));
        assert!(group.is_empty());
    }
}
