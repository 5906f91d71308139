/*!
Broad-phase traversal and the contact resolver.

Each sub-step, every mover (character shell or active prim geom) is tested
against the root space and against every grid sub-space its AABB touches.
Surviving leaf pairs go through the near callback: self-pair and
already-jointed-pair exclusion, category/mask filtering on both orderings,
narrow phase, actor classification and collision-flag accounting, the
anti-stuck interpenetration heuristics, surface preset selection and joint
creation.

Shape-shape pairs use `parry3d::query::contact`; pairs against the terrain
sample the heightfield at the partner's support points instead.

Notes
- Contact normals follow one convention throughout: the stored normal
  pushes the pair's first geom away from the second.
- An actor of unknown kind is classified as ground; it is the lenient
  default for anything that is not an avatar or a live prim.
*/

use nalgebra::Point3;
use parry3d::bounding_volume::{Aabb, BoundingVolume};
use parry3d::query::{self, PointQuery};
use parry3d::shape::Cuboid;

use crate::geom::{Geom, GeomHandle, GeomOwner, GeomShape, PrimHandle};
use crate::scene::SceneInner;
use crate::settings::{
    AVATAR_MOVING_SPEED, CHARACTER_NUDGE_DEPTH, CHARACTER_NUDGE_VELOCITY, CONTACT_SURFACE_LAYER,
    DEEP_GROUND_DEPTH, DEEP_GROUND_THRESHOLD, DEEP_GROUND_VELOCITY, DEFAULT_ERP, GRID_SIDE,
    INTERPENETRATION_DEPTH, MAX_CONTACTS_PER_PAIR, METERS_IN_SPACE, THROTTLE_CONTACT_COUNT,
};
use crate::solver::{ContactJoint, SurfaceParams};
use crate::types::{Iso, Vec3};

/// Default prim-on-prim contact surface.
pub const SURFACE_PRIM: SurfaceParams = SurfaceParams {
    mu: 250.0,
    bounce: 0.2,
    soft_erp: DEFAULT_ERP,
};

/// Anything resting on or hitting the terrain.
pub const SURFACE_TERRAIN: SurfaceParams = SurfaceParams {
    mu: 255.0,
    bounce: 0.1,
    soft_erp: 0.1025,
};

/// A walking avatar against a prim: low friction so movement does not snag.
pub const SURFACE_AVATAR_PRIM: SurfaceParams = SurfaceParams {
    mu: 75.0,
    bounce: 0.1,
    soft_erp: DEFAULT_ERP,
};

/// A walking avatar against the terrain.
pub const SURFACE_AVATAR_TERRAIN: SurfaceParams = SurfaceParams {
    mu: 75.0,
    bounce: 0.05,
    soft_erp: 0.05025,
};

/// One narrow-phase contact, normal pushing the first geom of the pair.
#[derive(Clone, Copy, Debug)]
pub struct ContactPoint {
    pub position: Vec3,
    pub normal: Vec3,
    pub depth: f32,
}

/// What a geom's owner is, for contact classification.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ActorKind {
    Character(crate::geom::CharacterHandle),
    Prim(PrimHandle),
    Ground,
}

/// World bounds of one grid cell (full height column).
fn cell_aabb(cell: (usize, usize)) -> Aabb {
    let x0 = cell.0 as f32 * METERS_IN_SPACE;
    let y0 = cell.1 as f32 * METERS_IN_SPACE;
    Aabb::new(
        Point3::new(x0, y0, -1.0e4),
        Point3::new(x0 + METERS_IN_SPACE, y0 + METERS_IN_SPACE, 1.0e4),
    )
}

impl SceneInner {
    /// One full collision pass: reset character flags, gather candidate
    /// pairs, run the near callback on each.
    pub(crate) fn collision_phase(&mut self) {
        for (_, character) in self.characters.iter_mut() {
            character.reset_collision_flags();
        }
        let pairs = self.gather_candidate_pairs();
        for (g1, g2) in pairs {
            self.near(g1, g2);
        }
    }

    /// Candidate leaf pairs: each mover against the root space and against
    /// every sub-space its AABB touches, AABB-pruned per leaf. Pairs where
    /// both sides are movers are deduplicated by geom index order.
    fn gather_candidate_pairs(&self) -> Vec<(GeomHandle, GeomHandle)> {
        let mut movers: Vec<GeomHandle> = Vec::new();
        for (_, character) in self.characters.iter() {
            movers.push(character.geom);
        }
        for &prim in &self.active_prims {
            if let Some(p) = self.prims.get(prim)
                && let Some(g) = p.geom
            {
                movers.push(g);
            }
        }

        let mut out = Vec::new();
        for &mover in &movers {
            let Some(mg) = self.geoms.get(mover) else {
                continue;
            };
            let mover_aabb = mg.aabb();

            for &other in self.grid.root_geoms() {
                if other == mover {
                    continue;
                }
                let Some(og) = self.geoms.get(other) else {
                    continue;
                };
                // Mover-vs-mover shows up from both sides; keep one order.
                if og.body.is_some() && mover.index() > other.index() {
                    continue;
                }
                if mover_aabb.intersects(&og.aabb()) {
                    out.push((mover, other));
                }
            }

            for (cell, geoms) in self.grid.occupied() {
                debug_assert!(cell.0 < GRID_SIDE && cell.1 < GRID_SIDE);
                if !mover_aabb.intersects(&cell_aabb(cell)) {
                    continue;
                }
                for &other in geoms {
                    let Some(og) = self.geoms.get(other) else {
                        continue;
                    };
                    if mover_aabb.intersects(&og.aabb()) {
                        out.push((mover, other));
                    }
                }
            }
        }
        out
    }

    /// The near callback for one leaf pair.
    fn near(&mut self, g1: GeomHandle, g2: GeomHandle) {
        if g1 == g2 {
            return;
        }
        let (Some(ga), Some(gb)) = (self.geoms.get(g1), self.geoms.get(g2)) else {
            return;
        };
        if !(ga.collide_mask.intersects(&gb.categories)
            || gb.collide_mask.intersects(&ga.categories))
        {
            return;
        }
        let (body_a, body_b) = (ga.body, gb.body);
        if let (Some(a), Some(b)) = (body_a, body_b)
            && self.joints.connected(a, b)
        {
            return;
        }

        let kind_a = self.actor_kind(ga.owner);
        let kind_b = self.actor_kind(gb.owner);
        let terrain_pair = matches!(ga.shape, GeomShape::Terrain)
            || matches!(gb.shape, GeomShape::Terrain);
        let extents_a = ga.extents();
        let extents_b = gb.extents();

        let mut contacts = self.contacts_for_pair(g1, g2);
        contacts.truncate(MAX_CONTACTS_PER_PAIR);
        if contacts.is_empty() {
            return;
        }

        self.note_collision(kind_a, kind_b);
        self.note_collision(kind_b, kind_a);

        let moving_avatar = self.moving_avatar(kind_a) || self.moving_avatar(kind_b);
        let surface = match (terrain_pair, moving_avatar) {
            (true, true) => SURFACE_AVATAR_TERRAIN,
            (true, false) => SURFACE_TERRAIN,
            (false, true) => SURFACE_AVATAR_PRIM,
            (false, false) => SURFACE_PRIM,
        };

        let mut attached = 0usize;
        for contact in &contacts {
            let mut contact = *contact;

            if contact.depth >= INTERPENETRATION_DEPTH {
                match (kind_a, kind_b) {
                    (ActorKind::Character(c), ActorKind::Prim(_))
                    | (ActorKind::Prim(_), ActorKind::Character(c)) => {
                        // Stuck inside a prim: shrink the correction, lift
                        // the contact to the prim surface and pop the
                        // character upward.
                        let prim_extents = if matches!(kind_a, ActorKind::Prim(_)) {
                            extents_a
                        } else {
                            extents_b
                        };
                        contact.depth = CHARACTER_NUDGE_DEPTH;
                        contact.position.z += prim_extents.z * 0.5;
                        self.nudge_character(c, CHARACTER_NUDGE_VELOCITY);
                    }
                    (ActorKind::Prim(pa), ActorKind::Prim(pb)) => {
                        // Deeply overlapping prims: drop the contact so the
                        // solver never sees the huge correction.
                        self.note_interpenetration(pa);
                        self.note_interpenetration(pb);
                        continue;
                    }
                    (ActorKind::Character(c), ActorKind::Ground)
                    | (ActorKind::Ground, ActorKind::Character(c))
                        if contact.depth >= DEEP_GROUND_THRESHOLD =>
                    {
                        let char_extents = if matches!(kind_a, ActorKind::Character(_)) {
                            extents_a
                        } else {
                            extents_b
                        };
                        contact.depth = DEEP_GROUND_DEPTH;
                        contact.position.z += char_extents.z * 0.5;
                        self.nudge_character(c, DEEP_GROUND_VELOCITY);
                    }
                    _ => {}
                }
            }

            self.joints.attach(ContactJoint::new(
                body_a,
                body_b,
                contact.position,
                contact.normal,
                contact.depth,
                surface,
            ));
            attached += 1;
        }

        if attached > THROTTLE_CONTACT_COUNT {
            self.throttle_prim_side(kind_a);
            self.throttle_prim_side(kind_b);
        }
        self.score_prim_side(kind_a, attached as u32);
        self.score_prim_side(kind_b, attached as u32);
    }

    fn actor_kind(&self, owner: GeomOwner) -> ActorKind {
        match owner {
            GeomOwner::Character(c) if self.characters.contains(c) => ActorKind::Character(c),
            GeomOwner::Prim(p) if self.prims.contains(p) => ActorKind::Prim(p),
            _ => ActorKind::Ground,
        }
    }

    fn moving_avatar(&self, kind: ActorKind) -> bool {
        let ActorKind::Character(c) = kind else {
            return false;
        };
        let Some(character) = self.characters.get(c) else {
            return false;
        };
        let Some(body) = self.bodies.get(character.body) else {
            return false;
        };
        body.linvel.x.abs() > AVATAR_MOVING_SPEED || body.linvel.y.abs() > AVATAR_MOVING_SPEED
    }

    /// Collision-flag accounting on `me` for a contact with `other`.
    fn note_collision(&mut self, me: ActorKind, other: ActorKind) {
        let other_is_live_prim = match other {
            ActorKind::Prim(p) => self
                .prims
                .get(p)
                .and_then(|prim| prim.body)
                .and_then(|b| self.bodies.get(b))
                .map(|b| b.enabled)
                .unwrap_or(false),
            _ => false,
        };
        let (colliding_obj, colliding_ground) = match other {
            ActorKind::Character(_) => (true, false),
            ActorKind::Prim(_) if other_is_live_prim => (true, false),
            // Static prims and the ground both count as ground support.
            _ => (false, true),
        };
        match me {
            ActorKind::Character(c) => {
                if let Some(character) = self.characters.get_mut(c) {
                    character.is_colliding = true;
                    character.colliding_ground |= colliding_ground;
                    character.colliding_obj |= colliding_obj;
                }
            }
            ActorKind::Prim(p) => {
                if let Some(prim) = self.prims.get_mut(p) {
                    prim.is_colliding = true;
                    prim.colliding_ground |= colliding_ground;
                    prim.colliding_obj |= colliding_obj;
                }
            }
            ActorKind::Ground => {}
        }
    }

    fn note_interpenetration(&mut self, prim: PrimHandle) {
        if let Some(p) = self.prims.get_mut(prim) {
            p.interpenetration_count = p.interpenetration_count.saturating_add(1);
        }
    }

    fn nudge_character(&mut self, character: crate::geom::CharacterHandle, upward: f32) {
        if let Some(c) = self.characters.get(character)
            && let Some(body) = self.bodies.get_mut(c.body)
        {
            body.linvel.z += upward;
            body.wake();
        }
    }

    fn throttle_prim_side(&mut self, kind: ActorKind) {
        if let ActorKind::Prim(p) = kind
            && let Some(prim) = self.prims.get_mut(p)
        {
            prim.throttle_updates = true;
        }
    }

    fn score_prim_side(&mut self, kind: ActorKind, contacts: u32) {
        if let ActorKind::Prim(p) = kind
            && let Some(prim) = self.prims.get_mut(p)
        {
            prim.collision_score = prim.collision_score.saturating_add(contacts);
        }
    }

    /// Narrow phase for one pair, normals pushing `g1` away from `g2`.
    fn contacts_for_pair(&self, g1: GeomHandle, g2: GeomHandle) -> Vec<ContactPoint> {
        let (Some(ga), Some(gb)) = (self.geoms.get(g1), self.geoms.get(g2)) else {
            return Vec::new();
        };
        match (&ga.shape, &gb.shape) {
            (GeomShape::Terrain, GeomShape::Terrain) => Vec::new(),
            (GeomShape::Terrain, _) => {
                // Terrain first: flip so the normal pushes the terrain side.
                let mut contacts = self.terrain_contacts(g2);
                for c in &mut contacts {
                    c.normal = -c.normal;
                }
                contacts
            }
            (_, GeomShape::Terrain) => self.terrain_contacts(g1),
            (GeomShape::Box { .. }, GeomShape::Box { .. }) => {
                // Box pairs stack, so they get a multi-point manifold;
                // grazing pairs with no contained corner fall back to the
                // deepest-point query.
                let manifold = box_box_contacts(ga, gb);
                if !manifold.is_empty() {
                    return manifold;
                }
                deepest_contact(ga, gb)
            }
            _ => deepest_contact(ga, gb),
        }
    }

    /// Heightfield contacts for a mover geom: support points against the
    /// interpolated height, normals pushing the mover off the surface.
    fn terrain_contacts(&self, geom: GeomHandle) -> Vec<ContactPoint> {
        let Some(entry) = self.terrain.as_ref() else {
            return Vec::new();
        };
        let Some(g) = self.geoms.get(geom) else {
            return Vec::new();
        };

        let mut samples: Vec<Vec3> = Vec::new();
        let center: Vec3 = g.pose.translation.vector;
        match &g.shape {
            GeomShape::Box { size } => {
                let h = *size * 0.5;
                for &sx in &[-1.0f32, 1.0] {
                    for &sy in &[-1.0f32, 1.0] {
                        let local = nalgebra::Point3::new(h.x * sx, h.y * sy, -h.z);
                        samples.push(g.pose.transform_point(&local).coords);
                    }
                }
                samples.push(g.pose.transform_point(&nalgebra::Point3::new(0.0, 0.0, -h.z)).coords);
            }
            GeomShape::Sphere { radius } => {
                samples.push(center - Vec3::new(0.0, 0.0, *radius));
            }
            GeomShape::Capsule {
                radius,
                half_height,
            } => {
                samples.push(center - Vec3::new(0.0, 0.0, half_height + radius));
            }
            GeomShape::Mesh { .. } => {
                let aabb = g.aabb();
                for &(x, y) in &[
                    (aabb.mins.x, aabb.mins.y),
                    (aabb.mins.x, aabb.maxs.y),
                    (aabb.maxs.x, aabb.mins.y),
                    (aabb.maxs.x, aabb.maxs.y),
                ] {
                    samples.push(Vec3::new(x, y, aabb.mins.z));
                }
                samples.push(Vec3::new(center.x, center.y, aabb.mins.z));
            }
            GeomShape::Terrain => return Vec::new(),
        }

        let mut contacts = Vec::new();
        for p in samples {
            let ground = entry.field.height_at(p.x, p.y);
            let depth = ground - p.z;
            if depth > 0.0 {
                contacts.push(ContactPoint {
                    position: Vec3::new(p.x, p.y, ground),
                    normal: entry.field.normal_at(p.x, p.y),
                    depth,
                });
            }
        }
        contacts
    }
}

/// The single deepest contact from parry, normal pushing `ga` away from `gb`.
fn deepest_contact(ga: &Geom, gb: &Geom) -> Vec<ContactPoint> {
    let hit = ga.with_parry(|sa| {
        gb.with_parry(|sb| query::contact(&ga.pose, sa, &gb.pose, sb, CONTACT_SURFACE_LAYER))
    });
    match hit.flatten().and_then(|r| r.ok()).flatten() {
        Some(contact) if contact.dist < 0.0 => vec![ContactPoint {
            position: Vec3::new(contact.point1.x, contact.point1.y, contact.point1.z),
            // parry's normal1 points out of the first shape, toward the
            // second; separation is the opposite way.
            normal: -contact.normal1.into_inner(),
            depth: -contact.dist,
        }],
        _ => Vec::new(),
    }
}

/// Corner-containment manifold for a box pair: every corner of one box
/// strictly inside the other becomes a contact at that corner, normal and
/// depth from the boundary projection. Stacked boxes rest on their shared
/// face's corners instead of rocking on a single deepest point.
fn box_box_contacts(ga: &Geom, gb: &Geom) -> Vec<ContactPoint> {
    let (GeomShape::Box { size: size_a }, GeomShape::Box { size: size_b }) =
        (&ga.shape, &gb.shape)
    else {
        return Vec::new();
    };
    let mut contacts = Vec::new();
    corner_contacts(*size_a, &ga.pose, *size_b, &gb.pose, false, &mut contacts);
    corner_contacts(*size_b, &gb.pose, *size_a, &ga.pose, true, &mut contacts);
    contacts
}

/// Contacts for every corner of the first box inside the second. `flip`
/// reverses the stored normal for the swapped ordering so it keeps pushing
/// the pair's first geom.
fn corner_contacts(
    size1: Vec3,
    pose1: &Iso,
    size2: Vec3,
    pose2: &Iso,
    flip: bool,
    out: &mut Vec<ContactPoint>,
) {
    let half = size1 * 0.5;
    let other = Cuboid::new(size2 * 0.5);
    for &sz in &[-1.0f32, 1.0] {
        for &sy in &[-1.0f32, 1.0] {
            for &sx in &[-1.0f32, 1.0] {
                let corner = pose1
                    .transform_point(&Point3::new(half.x * sx, half.y * sy, half.z * sz));
                let proj = other.project_point(pose2, &corner, false);
                if !proj.is_inside {
                    continue;
                }
                let away = proj.point - corner;
                let depth = away.norm();
                if depth <= 0.0 {
                    continue;
                }
                // Shortest way out of the containing box.
                let normal = away / depth;
                out.push(ContactPoint {
                    position: corner.coords,
                    normal: if flip { -normal } else { normal },
                    depth,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::CollisionBits;
    use crate::geom::SpaceSlot;
    use crate::types::{Quat, pose};

    fn box_geom(center: Vec3, size: Vec3) -> Geom {
        Geom {
            name: "b".into(),
            shape: GeomShape::Box { size },
            pose: pose(center, Quat::identity()),
            categories: CollisionBits::empty(),
            collide_mask: CollisionBits::empty(),
            owner: GeomOwner::Terrain,
            body: None,
            slot: SpaceSlot::Root,
        }
    }

    #[test]
    fn stacked_boxes_rest_on_a_corner_manifold() {
        // A 0.8 m cube sunk 0.01 m into the top of a unit cube: all four
        // lower corners make contact, pushing the upper box up.
        let lower = box_geom(Vec3::new(0.0, 0.0, 0.5), Vec3::repeat(1.0));
        let upper = box_geom(Vec3::new(0.0, 0.0, 1.39), Vec3::repeat(0.8));
        let contacts = box_box_contacts(&upper, &lower);
        assert_eq!(contacts.len(), 4);
        for c in &contacts {
            assert!(c.normal.z > 0.99, "normal {:?}", c.normal);
            assert!((c.depth - 0.01).abs() < 1.0e-4, "depth {}", c.depth);
        }
    }

    #[test]
    fn swapped_ordering_flips_the_manifold_normals() {
        let lower = box_geom(Vec3::new(0.0, 0.0, 0.5), Vec3::repeat(1.0));
        let upper = box_geom(Vec3::new(0.0, 0.0, 1.39), Vec3::repeat(0.8));
        let contacts = box_box_contacts(&lower, &upper);
        assert_eq!(contacts.len(), 4);
        for c in &contacts {
            assert!(c.normal.z < -0.99);
        }
    }

    #[test]
    fn separated_boxes_produce_no_corner_contacts() {
        let a = box_geom(Vec3::new(0.0, 0.0, 0.5), Vec3::repeat(1.0));
        let b = box_geom(Vec3::new(0.0, 0.0, 2.0), Vec3::repeat(1.0));
        assert!(box_box_contacts(&a, &b).is_empty());
    }
}
