/*!
The simulation scene: world state, the fixed-step loop and the public API.

Concurrency model
- All world state (arenas, grid, terrain, joint group) sits behind one
  mutex, the simulation lock. `simulate`, structural operations (actor
  creation, terrain swap) and state getters take it.
- Per-frame property setters touch only a second, lock-light mutex holding
  the taint board. They never block on a sub-step in flight.
- Taints are merged last-write-wins per actor and drained exactly once per
  `simulate` call, after the sub-step loop, in a fixed order.

Events (terse updates, out-of-bounds, restart requests) queue on the scene
and are drained by the host via `drain_events`.
*/

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{error, warn};

use crate::arena::Arena;
use crate::body::RigidBody;
use crate::character::{CharacterActor, CharacterTaints, DEFAULT_CAPSULE_RADIUS};
use crate::flags::{CollisionBits, CollisionCategory};
use crate::geom::{
    CharacterHandle, Geom, GeomHandle, GeomOwner, GeomShape, PrimHandle, SpaceSlot, shape_for_prim,
};
use crate::mesher::Mesher;
use crate::prim::{PrimActor, PrimTaints};
use crate::settings::{
    ACTIVE_UPDATE_BUDGET, CHARACTER_MASS, CHARACTER_VELOCITY_GAIN, LAG_THRESHOLD, MOTION_EPSILON,
    OUT_OF_BOUNDS_EDGE, RESTING_FRAMES, SOLVER_ITERATIONS, SOLVER_ITERATIONS_DEGRADED,
    THROTTLE_UPDATE_FRAMES, WORLD_STEP,
};
use crate::shape::{self, PrimShape};
use crate::solver::{JointGroup, quick_step};
use crate::spaces::{SpaceGrid, cell_for_position};
use crate::terrain::{Terrain, TerrainError};
use crate::types::{Quat, Vec3, pose};

/// Identifies the actor an event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActorId {
    Prim(PrimHandle),
    Character(CharacterHandle),
}

/// Events queued by the stepper for the host.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SceneEvent {
    /// The actor moved enough that the host should resend its state.
    TerseUpdate(ActorId),
    /// The actor crossed the region boundary; one event per crossing.
    OutOfBounds(ActorId, Vec3),
    /// Simulation state went non-finite; the host should restart the region.
    RestartRequested,
}

/// Host-visible prim state snapshot.
#[derive(Clone, Copy, Debug)]
pub struct PrimState {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
    pub rotational_velocity: Vec3,
    pub acceleration: Vec3,
    pub size: Vec3,
    pub mass: f32,
    pub is_physical: bool,
    pub resting: bool,
    pub is_colliding: bool,
    pub colliding_ground: bool,
    pub colliding_obj: bool,
    pub collision_score: u32,
    /// Contacts discarded because this prim was deeply inside another.
    pub interpenetration_count: u32,
    pub out_of_bounds: bool,
}

/// Host-visible character state snapshot.
#[derive(Clone, Copy, Debug)]
pub struct CharacterState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub flying: bool,
    pub is_colliding: bool,
    pub colliding_ground: bool,
    pub colliding_obj: bool,
    pub out_of_bounds: bool,
}

pub(crate) struct TerrainEntry {
    pub(crate) geom: GeomHandle,
    pub(crate) field: Terrain,
}

/// Pending property changes for all actors, keyed by handle.
#[derive(Default)]
pub(crate) struct TaintBoard {
    pub(crate) prims: HashMap<PrimHandle, PrimTaints>,
    pub(crate) characters: HashMap<CharacterHandle, CharacterTaints>,
}

pub(crate) struct SceneInner {
    pub(crate) geoms: Arena<Geom>,
    pub(crate) bodies: Arena<RigidBody>,
    pub(crate) prims: Arena<PrimActor>,
    pub(crate) characters: Arena<CharacterActor>,
    pub(crate) grid: SpaceGrid,
    pub(crate) terrain: Option<TerrainEntry>,
    pub(crate) active_prims: Vec<PrimHandle>,
    pub(crate) joints: JointGroup,
    pub(crate) mesher: Box<dyn Mesher>,
    pub(crate) events: Vec<SceneEvent>,
    step_remainder: f32,
    last_substeps: u32,
    restart_raised: bool,
}

pub struct Scene {
    inner: Mutex<SceneInner>,
    taints: Mutex<TaintBoard>,
}

impl Scene {
    pub fn new(mesher: Box<dyn Mesher>) -> Self {
        Self {
            inner: Mutex::new(SceneInner {
                geoms: Arena::new(),
                bodies: Arena::new(),
                prims: Arena::new(),
                characters: Arena::new(),
                grid: SpaceGrid::new(),
                terrain: None,
                active_prims: Vec::new(),
                joints: JointGroup::new(),
                mesher,
                events: Vec::new(),
                step_remainder: 0.0,
                last_substeps: 0,
                restart_raised: false,
            }),
            taints: Mutex::new(TaintBoard::default()),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, SceneInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_taints(&self) -> MutexGuard<'_, TaintBoard> {
        self.taints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- Structural operations (simulation lock) ----

    /// Creates an avatar: capsule shell plus rotation-locked body in the
    /// root space, live immediately.
    pub fn add_avatar(&self, name: &str, position: Vec3, size: Vec3) -> CharacterHandle {
        let mut w = self.lock_inner();

        let radius = if size.x > 0.0 && size.y > 0.0 {
            size.x.max(size.y) * 0.5
        } else {
            DEFAULT_CAPSULE_RADIUS
        };
        let height = if size.z > 0.0 { size.z } else { 1.8 };
        let half_height = ((height * 0.5) - radius).max(0.01);

        let mut body = RigidBody::new_box_total(
            CHARACTER_MASS,
            Vec3::new(radius * 2.0, radius * 2.0, height),
            position,
            Quat::identity(),
        );
        body.lock_rotation();
        body.auto_disable = false;
        let body_h = w.bodies.insert(body);

        // The owner back-reference needs the character handle; insert the
        // geom first and patch the owner right after.
        let geom_h = w.geoms.insert(Geom {
            name: name.to_owned(),
            shape: GeomShape::Capsule {
                radius,
                half_height,
            },
            pose: pose(position, Quat::identity()),
            categories: CollisionBits::with(&[
                CollisionCategory::Geom,
                CollisionCategory::Character,
            ]),
            collide_mask: CollisionBits::with(&[
                CollisionCategory::Geom,
                CollisionCategory::Land,
                CollisionCategory::Character,
            ]),
            owner: GeomOwner::Terrain,
            body: Some(body_h),
            slot: SpaceSlot::Root,
        });

        let handle = w.characters.insert(CharacterActor {
            name: name.to_owned(),
            position,
            velocity: Vec3::zeros(),
            target_velocity: Vec3::zeros(),
            flying: false,
            height,
            radius,
            geom: geom_h,
            body: body_h,
            is_colliding: false,
            colliding_ground: false,
            colliding_obj: false,
            last_position: position,
            out_of_bounds: false,
        });
        if let Some(g) = w.geoms.get_mut(geom_h) {
            g.owner = GeomOwner::Character(handle);
        }
        w.grid.insert_root(geom_h);
        handle
    }

    /// Removal is taint-driven: the shell and body go away in the next
    /// drain, never mid-collision-iteration.
    pub fn remove_avatar(&self, handle: CharacterHandle) {
        self.lock_taints()
            .characters
            .entry(handle)
            .or_default()
            .remove = true;
    }

    /// Registers a prim record; its geometry materializes at the next
    /// taint drain.
    pub fn add_prim_shape(
        &self,
        name: &str,
        shape: PrimShape,
        position: Vec3,
        size: Vec3,
        rotation: Quat,
        is_physical: bool,
    ) -> PrimHandle {
        let handle = {
            let mut w = self.lock_inner();
            w.prims.insert(PrimActor::new(
                name.to_owned(),
                position,
                size,
                rotation,
                shape,
                is_physical,
            ))
        };
        self.lock_taints().prims.entry(handle).or_default().add = true;
        handle
    }

    pub fn remove_prim(&self, handle: PrimHandle) {
        self.lock_taints().prims.entry(handle).or_default().remove = true;
    }

    /// Replaces the region heightfield wholesale.
    pub fn set_terrain(&self, heights: &[f32]) -> Result<(), TerrainError> {
        let field = Terrain::build(heights)?;
        let mut w = self.lock_inner();
        w.remove_terrain_geom();
        let geom_h = w.geoms.insert(Geom {
            name: "terrain".to_owned(),
            shape: GeomShape::Terrain,
            pose: pose(Vec3::zeros(), Quat::identity()),
            categories: CollisionBits::with(&[CollisionCategory::Land]),
            collide_mask: CollisionBits::empty(),
            owner: GeomOwner::Terrain,
            body: None,
            slot: SpaceSlot::Root,
        });
        w.grid.insert_root(geom_h);
        w.terrain = Some(TerrainEntry {
            geom: geom_h,
            field,
        });
        Ok(())
    }

    pub fn delete_terrain(&self) {
        self.lock_inner().remove_terrain_geom();
    }

    // ---- Deferred property setters (taint lock only) ----

    pub fn set_prim_position(&self, handle: PrimHandle, position: Vec3) {
        self.lock_taints().prims.entry(handle).or_default().position = Some(position);
    }

    pub fn set_prim_rotation(&self, handle: PrimHandle, rotation: Quat) {
        self.lock_taints()
            .prims
            .entry(handle)
            .or_default()
            .orientation = Some(rotation);
    }

    pub fn set_prim_physical(&self, handle: PrimHandle, is_physical: bool) {
        self.lock_taints().prims.entry(handle).or_default().physical = Some(is_physical);
    }

    pub fn set_prim_size(&self, handle: PrimHandle, size: Vec3) {
        self.lock_taints().prims.entry(handle).or_default().size = Some(size);
    }

    pub fn set_prim_shape(&self, handle: PrimHandle, shape: PrimShape) {
        self.lock_taints().prims.entry(handle).or_default().shape = Some(shape);
    }

    pub fn set_prim_velocity(&self, handle: PrimHandle, velocity: Vec3) {
        self.lock_taints().prims.entry(handle).or_default().velocity = Some(velocity);
    }

    pub fn set_prim_selected(&self, handle: PrimHandle, selected: bool) {
        self.lock_taints().prims.entry(handle).or_default().selected = Some(selected);
    }

    pub fn disable_prim(&self, handle: PrimHandle) {
        self.lock_taints().prims.entry(handle).or_default().disable = true;
    }

    /// Forces accumulate across calls; the next drain applies the sum.
    pub fn add_force(&self, handle: PrimHandle, force: Vec3) {
        self.lock_taints()
            .prims
            .entry(handle)
            .or_default()
            .forces
            .push(force);
    }

    pub fn set_character_position(&self, handle: CharacterHandle, position: Vec3) {
        self.lock_taints()
            .characters
            .entry(handle)
            .or_default()
            .position = Some(position);
    }

    pub fn set_character_target_velocity(&self, handle: CharacterHandle, velocity: Vec3) {
        self.lock_taints()
            .characters
            .entry(handle)
            .or_default()
            .target_velocity = Some(velocity);
    }

    pub fn set_character_flying(&self, handle: CharacterHandle, flying: bool) {
        self.lock_taints().characters.entry(handle).or_default().flying = Some(flying);
    }

    // ---- Stepping and observation ----

    /// Advances the world by `elapsed` wall-clock seconds in fixed
    /// sub-steps, then drains the taint board and refreshes snapshots.
    /// Returns an estimated simulation frames-per-second diagnostic.
    pub fn simulate(&self, elapsed: f32) -> f32 {
        let board = std::mem::take(&mut *self.lock_taints());
        self.lock_inner().step(elapsed, board)
    }

    pub fn drain_events(&self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.lock_inner().events)
    }

    pub fn prim_state(&self, handle: PrimHandle) -> Option<PrimState> {
        let w = self.lock_inner();
        let p = w.prims.get(handle)?;
        Some(PrimState {
            position: p.position,
            orientation: p.orientation,
            velocity: p.velocity,
            rotational_velocity: p.rotational_velocity,
            acceleration: p.acceleration,
            size: p.size,
            mass: shape::mass_for(&p.shape, p.size),
            is_physical: p.is_physical,
            resting: p.resting,
            is_colliding: p.is_colliding,
            colliding_ground: p.colliding_ground,
            colliding_obj: p.colliding_obj,
            collision_score: p.collision_score,
            interpenetration_count: p.interpenetration_count,
            out_of_bounds: p.out_of_bounds,
        })
    }

    pub fn character_state(&self, handle: CharacterHandle) -> Option<CharacterState> {
        let w = self.lock_inner();
        let c = w.characters.get(handle)?;
        Some(CharacterState {
            position: c.position,
            velocity: c.velocity,
            flying: c.flying,
            is_colliding: c.is_colliding,
            colliding_ground: c.colliding_ground,
            colliding_obj: c.colliding_obj,
            out_of_bounds: c.out_of_bounds,
        })
    }

    pub fn prim_count(&self) -> usize {
        self.lock_inner().prims.live()
    }

    pub fn active_prim_count(&self) -> usize {
        self.lock_inner().active_prims.len()
    }

    pub fn occupied_subspace_count(&self) -> usize {
        self.lock_inner().grid.occupied_cells()
    }

    /// Sub-steps taken by the most recent `simulate` call.
    pub fn last_substep_count(&self) -> u32 {
        self.lock_inner().last_substeps
    }
}

impl SceneInner {
    fn step(&mut self, elapsed: f32, board: TaintBoard) -> f32 {
        let elapsed = elapsed.max(0.0);
        self.step_remainder += elapsed;

        let iterations = if self.step_remainder >= LAG_THRESHOLD {
            // Too far behind wall clock: shed the backlog and degrade the
            // solver for this frame instead of stalling the region.
            warn!(
                "simulation {:.2}s behind; degrading to a single sub-step",
                self.step_remainder
            );
            self.step_remainder = WORLD_STEP;
            SOLVER_ITERATIONS_DEGRADED
        } else {
            SOLVER_ITERATIONS
        };

        let mut substeps = 0u32;
        while self.step_remainder >= WORLD_STEP {
            self.move_characters(WORLD_STEP);
            self.collision_phase();
            let ok = quick_step(&mut self.bodies, &mut self.joints, WORLD_STEP, iterations);
            self.joints.clear();
            self.sync_geom_poses();
            if !ok {
                self.raise_restart();
            }
            self.step_remainder -= WORLD_STEP;
            substeps += 1;
        }
        self.last_substeps = substeps;

        self.apply_taints(board);
        self.refresh_character_snapshots();
        if elapsed < ACTIVE_UPDATE_BUDGET {
            self.refresh_prim_snapshots(elapsed);
        }

        substeps as f32 / elapsed.max(WORLD_STEP)
    }

    /// Blends character body velocity toward the host target. Gravity is
    /// the solver's job; flying characters opt out of it.
    fn move_characters(&mut self, dt: f32) {
        let blend = (CHARACTER_VELOCITY_GAIN * dt).min(1.0);
        for handle in self.characters.handles() {
            let Some(c) = self.characters.get(handle) else {
                continue;
            };
            let (body_h, target, flying) = (c.body, c.target_velocity, c.flying);
            let Some(body) = self.bodies.get_mut(body_h) else {
                continue;
            };
            body.ignore_gravity = flying;
            body.linvel.x += (target.x - body.linvel.x) * blend;
            body.linvel.y += (target.y - body.linvel.y) * blend;
            if flying {
                body.linvel.z += (target.z - body.linvel.z) * blend;
            }
        }
    }

    /// Copies body poses back onto their geoms after integration.
    fn sync_geom_poses(&mut self) {
        for handle in self.geoms.handles() {
            let Some(g) = self.geoms.get(handle) else {
                continue;
            };
            let Some(body_h) = g.body else {
                continue;
            };
            let Some(body) = self.bodies.get(body_h) else {
                continue;
            };
            let new_pose = pose(body.position, body.orientation);
            if let Some(g) = self.geoms.get_mut(handle) {
                g.pose = new_pose;
            }
        }
    }

    fn raise_restart(&mut self) {
        if !self.restart_raised {
            error!("non-finite simulation state detected; requesting region restart");
            self.events.push(SceneEvent::RestartRequested);
            self.restart_raised = true;
        }
    }

    // ---- Taint drain ----

    fn apply_taints(&mut self, board: TaintBoard) {
        for (handle, taints) in board.characters {
            if taints.remove {
                self.remove_character_now(handle);
                continue;
            }
            self.process_character_taints(handle, taints);
        }
        for (handle, taints) in board.prims {
            if taints.remove {
                self.remove_prim_now(handle);
                continue;
            }
            self.process_prim_taints(handle, taints);
        }
    }

    fn process_character_taints(&mut self, handle: CharacterHandle, taints: CharacterTaints) {
        let Some(c) = self.characters.get_mut(handle) else {
            return;
        };
        if let Some(v) = taints.target_velocity {
            c.target_velocity = v;
        }
        if let Some(f) = taints.flying {
            c.flying = f;
        }
        let body_h = c.body;
        let geom_h = c.geom;
        if let Some(p) = taints.position {
            c.position = p;
            if let Some(body) = self.bodies.get_mut(body_h) {
                body.position = p;
                body.linvel = Vec3::zeros();
            }
            if let Some(g) = self.geoms.get_mut(geom_h) {
                g.pose = pose(p, Quat::identity());
            }
        }
    }

    /// Fixed application order: add, position, rotation, physical, size,
    /// shape, forces, disable, selection, velocity.
    fn process_prim_taints(&mut self, handle: PrimHandle, taints: PrimTaints) {
        if !self.prims.contains(handle) {
            return;
        }
        if taints.add {
            self.build_prim_geometry(handle);
        }
        if let Some(p) = taints.position {
            self.change_prim_position(handle, p);
        }
        if let Some(r) = taints.orientation {
            self.change_prim_rotation(handle, r);
        }
        if let Some(physical) = taints.physical {
            self.change_prim_physical(handle, physical);
        }
        if let Some(size) = taints.size {
            if let Some(prim) = self.prims.get_mut(handle) {
                prim.size = size;
            }
            self.rebuild_prim_geometry(handle);
        }
        if let Some(shape) = taints.shape {
            if let Some(prim) = self.prims.get_mut(handle) {
                prim.shape = shape;
            }
            self.rebuild_prim_geometry(handle);
        }
        if !taints.forces.is_empty() {
            let total = taints
                .forces
                .iter()
                .fold(Vec3::zeros(), |acc, f| acc + f);
            if let Some(body_h) = self.prims.get(handle).and_then(|p| p.body)
                && let Some(body) = self.bodies.get_mut(body_h)
            {
                // Host force units are small; the legacy 100x scale keeps
                // scripted pushes perceptible.
                body.force += total * 100.0;
                body.wake();
            }
        }
        if taints.disable {
            self.change_prim_disabled(handle);
        }
        if let Some(selected) = taints.selected {
            self.change_prim_selected(handle, selected);
        }
        if let Some(velocity) = taints.velocity {
            self.change_prim_velocity(handle, velocity);
        }
    }

    /// Materializes the collision geometry for a prim record, idempotently.
    fn build_prim_geometry(&mut self, handle: PrimHandle) {
        let Some(p) = self.prims.get(handle) else {
            return;
        };
        if p.geom.is_some() {
            return;
        }
        let (name, position, orientation, size, prim_shape, is_physical, is_selected) = (
            p.name.clone(),
            p.position,
            p.orientation,
            p.size,
            p.shape.clone(),
            p.is_physical,
            p.is_selected,
        );

        let geom_shape = shape_for_prim(self.mesher.as_ref(), &name, &prim_shape, size);
        let cell = cell_for_position(position);
        let geom_h = self.geoms.insert(Geom {
            name,
            shape: geom_shape,
            pose: pose(position, orientation),
            categories: CollisionBits::with(&[CollisionCategory::Geom]),
            collide_mask: CollisionBits::with(&[
                CollisionCategory::Geom,
                CollisionCategory::Space,
            ]),
            owner: GeomOwner::Prim(handle),
            body: None,
            slot: SpaceSlot::Cell(cell.0, cell.1),
        });
        self.grid.insert_static(cell, geom_h);
        if let Some(prim) = self.prims.get_mut(handle) {
            prim.geom = Some(geom_h);
            prim.categories = CollisionBits::with(&[CollisionCategory::Geom]);
            prim.collide_mask =
                CollisionBits::with(&[CollisionCategory::Geom, CollisionCategory::Space]);
        }

        if is_physical {
            self.enable_prim_body(handle);
        }
        if is_selected {
            self.change_prim_selected(handle, true);
        }
    }

    /// Destroys a prim's geom, detaching it from whichever space holds it.
    fn destroy_prim_geom(&mut self, handle: PrimHandle) {
        let Some(geom_h) = self.prims.get(handle).and_then(|p| p.geom) else {
            return;
        };
        self.detach_geom(geom_h);
        self.geoms.remove(geom_h);
        if let Some(prim) = self.prims.get_mut(handle) {
            prim.geom = None;
        }
    }

    fn detach_geom(&mut self, geom_h: GeomHandle) {
        let Some(g) = self.geoms.get(geom_h) else {
            return;
        };
        match g.slot {
            SpaceSlot::Root => self.grid.remove_root(geom_h),
            SpaceSlot::Cell(x, y) => self.grid.remove_static((x, y), geom_h),
        }
    }

    /// Builds the dynamics body for a physical prim and registers it in
    /// the active list; its geom moves from its grid cell to the root space.
    fn enable_prim_body(&mut self, handle: PrimHandle) {
        let Some(p) = self.prims.get(handle) else {
            return;
        };
        if p.body.is_some() {
            return;
        }
        let Some(geom_h) = p.geom else {
            return;
        };
        let mass = shape::mass_for(&p.shape, p.size);
        let (position, orientation, size) = (p.position, p.orientation, p.size);

        let body = RigidBody::new_box_total(mass, size, position, orientation);
        let body_h = self.bodies.insert(body);

        if let Some(g) = self.geoms.get_mut(geom_h) {
            g.body = Some(body_h);
            g.categories.add(CollisionCategory::Body);
            g.collide_mask.add(CollisionCategory::Land);
            g.collide_mask.add(CollisionCategory::Wind);
            if let SpaceSlot::Cell(x, y) = g.slot {
                g.slot = SpaceSlot::Root;
                self.grid.remove_static((x, y), geom_h);
                self.grid.insert_root(geom_h);
            }
        }
        if let Some(prim) = self.prims.get_mut(handle) {
            prim.body = Some(body_h);
            prim.categories.add(CollisionCategory::Body);
            prim.collide_mask.add(CollisionCategory::Land);
            prim.collide_mask.add(CollisionCategory::Wind);
        }
        if !self.active_prims.contains(&handle) {
            self.active_prims.push(handle);
        }
    }

    /// Destroys the dynamics body; the geom returns to its grid cell.
    fn disable_prim_body(&mut self, handle: PrimHandle) {
        let Some(p) = self.prims.get(handle) else {
            return;
        };
        let Some(body_h) = p.body else {
            return;
        };
        let Some(geom_h) = p.geom else {
            self.bodies.remove(body_h);
            self.active_prims.retain(|h| *h != handle);
            if let Some(prim) = self.prims.get_mut(handle) {
                prim.body = None;
            }
            return;
        };
        let position = self
            .bodies
            .get(body_h)
            .map(|b| b.position)
            .unwrap_or(p.position);
        self.bodies.remove(body_h);
        self.active_prims.retain(|h| *h != handle);

        if let Some(g) = self.geoms.get_mut(geom_h) {
            g.body = None;
            g.categories.remove(CollisionCategory::Body);
            g.collide_mask.remove(CollisionCategory::Land);
            g.collide_mask.remove(CollisionCategory::Wind);
            if g.slot == SpaceSlot::Root {
                let cell = cell_for_position(position);
                g.slot = SpaceSlot::Cell(cell.0, cell.1);
                self.grid.remove_root(geom_h);
                self.grid.insert_static(cell, geom_h);
            }
        }
        if let Some(prim) = self.prims.get_mut(handle) {
            prim.body = None;
            prim.position = position;
            prim.categories.remove(CollisionCategory::Body);
            prim.collide_mask.remove(CollisionCategory::Land);
            prim.collide_mask.remove(CollisionCategory::Wind);
        }
    }

    fn change_prim_position(&mut self, handle: PrimHandle, position: Vec3) {
        let Some(p) = self.prims.get_mut(handle) else {
            return;
        };
        p.position = position;
        p.last_position = position;
        let (geom_h, body_h, orientation) = (p.geom, p.body, p.orientation);

        if let Some(body_h) = body_h
            && let Some(body) = self.bodies.get_mut(body_h)
        {
            body.position = position;
            body.wake();
        }
        if let Some(geom_h) = geom_h {
            let new_pose = pose(position, orientation);
            let old_slot = self.geoms.get(geom_h).map(|g| g.slot);
            if let Some(g) = self.geoms.get_mut(geom_h) {
                g.pose = new_pose;
            }
            // Static geoms may change grid cell.
            if let Some(SpaceSlot::Cell(x, y)) = old_slot {
                let cell = cell_for_position(position);
                if cell != (x, y) {
                    self.grid.remove_static((x, y), geom_h);
                    self.grid.insert_static(cell, geom_h);
                    if let Some(g) = self.geoms.get_mut(geom_h) {
                        g.slot = SpaceSlot::Cell(cell.0, cell.1);
                    }
                }
            }
        }
    }

    fn change_prim_rotation(&mut self, handle: PrimHandle, rotation: Quat) {
        let Some(p) = self.prims.get_mut(handle) else {
            return;
        };
        p.orientation = rotation;
        let (geom_h, body_h, position) = (p.geom, p.body, p.position);
        if let Some(body_h) = body_h
            && let Some(body) = self.bodies.get_mut(body_h)
        {
            body.orientation = rotation;
            body.wake();
        }
        if let Some(geom_h) = geom_h
            && let Some(g) = self.geoms.get_mut(geom_h)
        {
            g.pose = pose(position, rotation);
        }
    }

    fn change_prim_physical(&mut self, handle: PrimHandle, is_physical: bool) {
        let Some(p) = self.prims.get_mut(handle) else {
            return;
        };
        if p.is_physical == is_physical {
            return;
        }
        p.is_physical = is_physical;
        if is_physical {
            self.enable_prim_body(handle);
        } else {
            self.disable_prim_body(handle);
        }
    }

    /// Full geometry rebuild after a size or shape change; a physical prim
    /// gets its body torn down and rebuilt so mass and extents stay true.
    fn rebuild_prim_geometry(&mut self, handle: PrimHandle) {
        let Some(p) = self.prims.get(handle) else {
            return;
        };
        if p.geom.is_none() {
            // Not materialized yet; the pending add will pick up the new
            // size/shape.
            return;
        }
        let had_body = p.body.is_some();
        if had_body {
            self.disable_prim_body(handle);
        }
        self.destroy_prim_geom(handle);
        self.build_prim_geometry(handle);
        if had_body
            && let Some(p) = self.prims.get(handle)
            && p.is_physical
            && p.body.is_none()
        {
            self.enable_prim_body(handle);
        }
    }

    /// Host-driven soft disable: the body sleeps until something wakes it.
    fn change_prim_disabled(&mut self, handle: PrimHandle) {
        let Some(p) = self.prims.get_mut(handle) else {
            return;
        };
        p.disabled = true;
        if let Some(body_h) = p.body
            && let Some(body) = self.bodies.get_mut(body_h)
        {
            body.enabled = false;
            body.linvel = Vec3::zeros();
            body.angvel = Vec3::zeros();
        }
    }

    /// Selection overlays a sensor-only category/mask and soft-disables
    /// the body; deselection restores defaults.
    fn change_prim_selected(&mut self, handle: PrimHandle, selected: bool) {
        let Some(p) = self.prims.get_mut(handle) else {
            return;
        };
        p.is_selected = selected;
        let (geom_h, body_h, has_body) = (p.geom, p.body, p.body.is_some());

        let (categories, collide_mask) = if selected {
            (
                CollisionBits::with(&[CollisionCategory::Selected]),
                CollisionBits::with(&[CollisionCategory::Sensor, CollisionCategory::Space]),
            )
        } else {
            let mut categories = CollisionBits::with(&[CollisionCategory::Geom]);
            let mut collide_mask =
                CollisionBits::with(&[CollisionCategory::Geom, CollisionCategory::Space]);
            if has_body {
                categories.add(CollisionCategory::Body);
                collide_mask.add(CollisionCategory::Land);
                collide_mask.add(CollisionCategory::Wind);
            }
            (categories, collide_mask)
        };

        p.categories = categories;
        p.collide_mask = collide_mask;
        if let Some(geom_h) = geom_h
            && let Some(g) = self.geoms.get_mut(geom_h)
        {
            g.categories = categories;
            g.collide_mask = collide_mask;
        }
        if let Some(body_h) = body_h
            && let Some(body) = self.bodies.get_mut(body_h)
        {
            if selected {
                body.enabled = false;
                body.linvel = Vec3::zeros();
                body.angvel = Vec3::zeros();
            } else {
                body.wake();
            }
        }
    }

    fn change_prim_velocity(&mut self, handle: PrimHandle, velocity: Vec3) {
        let Some(p) = self.prims.get_mut(handle) else {
            return;
        };
        p.velocity = velocity;
        if p.is_selected {
            return;
        }
        if let Some(body_h) = p.body
            && let Some(body) = self.bodies.get_mut(body_h)
        {
            body.linvel = velocity;
            body.wake();
        }
    }

    fn remove_prim_now(&mut self, handle: PrimHandle) {
        if !self.prims.contains(handle) {
            return;
        }
        self.disable_prim_body(handle);
        self.destroy_prim_geom(handle);
        self.prims.remove(handle);
        self.active_prims.retain(|h| *h != handle);
    }

    fn remove_character_now(&mut self, handle: CharacterHandle) {
        let Some(c) = self.characters.get(handle) else {
            return;
        };
        let (geom_h, body_h) = (c.geom, c.body);
        self.grid.remove_root(geom_h);
        self.geoms.remove(geom_h);
        self.bodies.remove(body_h);
        self.characters.remove(handle);
    }

    fn remove_terrain_geom(&mut self) {
        if let Some(entry) = self.terrain.take() {
            self.grid.remove_root(entry.geom);
            self.geoms.remove(entry.geom);
        }
    }

    // ---- Snapshots ----

    fn refresh_character_snapshots(&mut self) {
        let mut queued: Vec<SceneEvent> = Vec::new();
        for (handle, c) in self.characters.iter_mut() {
            let Some(body) = self.bodies.get(c.body) else {
                continue;
            };
            let pos = body.position;
            c.position = pos;
            c.velocity = body.linvel;

            let oob = pos.x < 0.0
                || pos.x > OUT_OF_BOUNDS_EDGE
                || pos.y < 0.0
                || pos.y > OUT_OF_BOUNDS_EDGE;
            if oob {
                if !c.out_of_bounds {
                    c.out_of_bounds = true;
                    queued.push(SceneEvent::OutOfBounds(ActorId::Character(handle), pos));
                }
            } else {
                c.out_of_bounds = false;
            }

            let moved = (pos - c.last_position).norm() > MOTION_EPSILON;
            if moved {
                queued.push(SceneEvent::TerseUpdate(ActorId::Character(handle)));
                c.last_position = pos;
            }
        }
        self.events.extend(queued);
    }

    fn refresh_prim_snapshots(&mut self, elapsed: f32) {
        let mut queued: Vec<SceneEvent> = Vec::new();
        let active = self.active_prims.clone();
        for handle in active {
            let Some(p) = self.prims.get(handle) else {
                continue;
            };
            let Some(body_h) = p.body else {
                continue;
            };
            let Some(body) = self.bodies.get(body_h) else {
                continue;
            };
            let (pos, vel, avel, orient) = (
                body.position,
                body.linvel,
                body.angvel,
                body.orientation,
            );

            let oob_xy = pos.x < 0.0
                || pos.x > OUT_OF_BOUNDS_EDGE
                || pos.y < 0.0
                || pos.y > OUT_OF_BOUNDS_EDGE;
            let below_ground = pos.z < 0.0;

            if below_ground {
                // A prim under the world is stopped where it is and
                // reported once; the host decides what to do with it.
                if let Some(body) = self.bodies.get_mut(body_h) {
                    body.linvel = Vec3::zeros();
                    body.angvel = Vec3::zeros();
                }
            }

            let Some(p) = self.prims.get_mut(handle) else {
                continue;
            };
            if oob_xy || below_ground {
                if !p.out_of_bounds {
                    p.out_of_bounds = true;
                    queued.push(SceneEvent::OutOfBounds(ActorId::Prim(handle), pos));
                }
            } else {
                p.out_of_bounds = false;
            }
            if below_ground {
                p.position = pos;
                p.velocity = Vec3::zeros();
                p.rotational_velocity = Vec3::zeros();
                p.resting = true;
                p.throttle_updates = false;
                p.throttle_counter = 0;
                if !p.last_update_sent {
                    p.last_update_sent = true;
                    queued.push(SceneEvent::TerseUpdate(ActorId::Prim(handle)));
                }
                p.last_position = pos;
                p.last_velocity = Vec3::zeros();
                p.collision_score = 0;
                continue;
            }

            let delta = pos - p.last_position;
            let low_motion = delta.x.abs() < MOTION_EPSILON
                && delta.y.abs() < MOTION_EPSILON
                && delta.z.abs() < MOTION_EPSILON;
            if low_motion {
                p.low_motion_frames += 1;
            } else {
                p.low_motion_frames = 0;
            }
            p.resting = p.low_motion_frames >= RESTING_FRAMES;

            if p.resting {
                // Settled: report a zeroed state once, then go quiet. The
                // throttle hint ends here so re-awakened motion reports at
                // full rate again.
                p.position = pos;
                p.velocity = Vec3::zeros();
                p.rotational_velocity = Vec3::zeros();
                p.acceleration = Vec3::zeros();
                p.throttle_updates = false;
                p.throttle_counter = 0;
                if !p.last_update_sent {
                    p.last_update_sent = true;
                    queued.push(SceneEvent::TerseUpdate(ActorId::Prim(handle)));
                }
            } else {
                p.position = pos;
                p.orientation = orient;
                p.acceleration = (vel - p.last_velocity) / elapsed.max(WORLD_STEP);
                p.velocity = vel;
                p.rotational_velocity = avel;
                p.last_update_sent = false;
                if p.throttle_updates {
                    p.throttle_counter += 1;
                    if p.throttle_counter > THROTTLE_UPDATE_FRAMES {
                        p.throttle_counter = 0;
                        queued.push(SceneEvent::TerseUpdate(ActorId::Prim(handle)));
                    }
                } else {
                    queued.push(SceneEvent::TerseUpdate(ActorId::Prim(handle)));
                }
            }
            p.last_position = pos;
            p.last_velocity = vel;
            // The score accumulates over this frame's sub-steps; the next
            // frame starts it clean.
            p.collision_score = 0;
        }
        self.events.extend(queued);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesher::BoxMesher;

    #[test]
    fn body_teardown_without_a_geom_clears_the_back_reference() {
        // Tearing down the body of a geom-less prim must still drop it from
        // the active list and null the handle on the record.
        let s = Scene::new(Box::new(BoxMesher));
        let h = s.add_prim_shape(
            "p",
            PrimShape::default(),
            Vec3::new(10.0, 10.0, 5.0),
            Vec3::new(1.0, 1.0, 1.0),
            Quat::identity(),
            true,
        );
        s.simulate(0.0); // materialize geometry and body

        let mut w = s.lock_inner();
        let geom_h = w.prims.get(h).unwrap().geom.unwrap();
        w.detach_geom(geom_h);
        w.geoms.remove(geom_h);
        w.prims.get_mut(h).unwrap().geom = None;

        w.disable_prim_body(h);
        assert!(w.prims.get(h).unwrap().body.is_none());
        assert!(!w.active_prims.contains(&h));
        assert_eq!(w.bodies.live(), 0);
    }
}
