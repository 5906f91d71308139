/*!
Broad-phase space partition.

Static prim geometry is tiled into a bounded 2D grid of sub-spaces over the
region plane; the root space directly holds only the terrain, character
shells and dynamic prim geoms. Sub-spaces are created lazily on first
insertion and destroyed when their last geometry leaves.

# Mapping
Grid coordinates come from integer division by the cell edge, clamped into
the valid range. The clamp is deliberately lenient: positions up to one cell
past the region border (and anything beyond, including NaN-free garbage)
still land in the nearest edge cell instead of being rejected.
*/

use crate::geom::GeomHandle;
use crate::settings::{GRID_CLAMP_EXTENT, GRID_SIDE, METERS_IN_SPACE};
use crate::types::Vec3;

/// Largest valid grid coordinate under the lenient clamp.
const CELL_MAX: usize = (GRID_CLAMP_EXTENT / METERS_IN_SPACE) as usize;

/// One lazily created broad-phase cell.
#[derive(Default)]
struct SubSpace {
    geoms: Vec<GeomHandle>,
}

/// The grid of sub-spaces plus the root space membership list.
pub struct SpaceGrid {
    cells: Vec<Option<SubSpace>>,
    root: Vec<GeomHandle>,
}

/// Maps a world position to its grid cell, clamping out-of-range
/// coordinates to the nearest edge cell.
pub fn cell_for_position(pos: Vec3) -> (usize, usize) {
    let clamp = |v: f32| -> usize {
        if !(v > 0.0) {
            // Negative, zero and NaN all map to the low edge.
            return 0;
        }
        let cell = (v / METERS_IN_SPACE) as usize;
        cell.min(CELL_MAX)
    };
    (clamp(pos.x), clamp(pos.y))
}

impl SpaceGrid {
    pub fn new() -> Self {
        let mut cells = Vec::new();
        cells.resize_with(GRID_SIDE * GRID_SIDE, || None);
        Self {
            cells,
            root: Vec::new(),
        }
    }

    fn slot(&mut self, cell: (usize, usize)) -> &mut Option<SubSpace> {
        &mut self.cells[cell.0 * GRID_SIDE + cell.1]
    }

    /// Inserts a static geom into its cell, creating the sub-space on
    /// first use.
    pub fn insert_static(&mut self, cell: (usize, usize), geom: GeomHandle) {
        let slot = self.slot(cell);
        let space = slot.get_or_insert_with(SubSpace::default);
        if !space.geoms.contains(&geom) {
            space.geoms.push(geom);
        }
    }

    /// Removes a static geom from its cell; destroys the sub-space when it
    /// empties. Removing a geom that is not present is a no-op, so
    /// reparenting is idempotent.
    pub fn remove_static(&mut self, cell: (usize, usize), geom: GeomHandle) {
        let slot = self.slot(cell);
        if let Some(space) = slot {
            space.geoms.retain(|g| *g != geom);
            if space.geoms.is_empty() {
                *slot = None;
            }
        }
    }

    pub fn insert_root(&mut self, geom: GeomHandle) {
        if !self.root.contains(&geom) {
            self.root.push(geom);
        }
    }

    pub fn remove_root(&mut self, geom: GeomHandle) {
        self.root.retain(|g| *g != geom);
    }

    pub fn root_geoms(&self) -> &[GeomHandle] {
        &self.root
    }

    pub fn cell_geoms(&self, cell: (usize, usize)) -> &[GeomHandle] {
        match &self.cells[cell.0 * GRID_SIDE + cell.1] {
            Some(space) => &space.geoms,
            None => &[],
        }
    }

    /// Number of currently live sub-spaces.
    pub fn occupied_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Iterates every occupied cell.
    pub fn occupied(&self) -> impl Iterator<Item = ((usize, usize), &[GeomHandle])> {
        self.cells.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref()
                .map(|s| ((i / GRID_SIDE, i % GRID_SIDE), s.geoms.as_slice()))
        })
    }
}

impl Default for SpaceGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::geom::Geom;

    fn handles(n: usize) -> Vec<GeomHandle> {
        // Handles are arbitrary for grid tests; mint them from a scratch arena.
        let mut arena: Arena<Geom> = Arena::new();
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(arena.insert(scratch_geom()));
        }
        out
    }

    fn scratch_geom() -> Geom {
        use crate::flags::CollisionBits;
        use crate::geom::{GeomOwner, GeomShape, SpaceSlot};
        use crate::types::pose;
        Geom {
            name: "t".into(),
            shape: GeomShape::Box {
                size: Vec3::repeat(1.0),
            },
            pose: pose(Vec3::zeros(), crate::types::Quat::identity()),
            categories: CollisionBits::empty(),
            collide_mask: CollisionBits::empty(),
            owner: GeomOwner::Terrain,
            body: None,
            slot: SpaceSlot::Root,
        }
    }

    #[test]
    fn cell_mapping_is_pure_and_stable() {
        // Same input, same cell, every time.
        let p = Vec3::new(100.0, 200.0, 23.0);
        assert_eq!(cell_for_position(p), cell_for_position(p));
        assert_eq!(cell_for_position(p), (3, 6));
    }

    #[test]
    fn out_of_range_positions_clamp_to_edge_cells() {
        // The documented lenient policy: never reject, snap to the border.
        assert_eq!(cell_for_position(Vec3::new(-50.0, -1.0, 0.0)), (0, 0));
        assert_eq!(
            cell_for_position(Vec3::new(1.0e6, 1.0e6, 0.0)),
            (CELL_MAX, CELL_MAX)
        );
        // One cell of head-room past the border before the clamp bites.
        assert_eq!(cell_for_position(Vec3::new(258.0, 10.0, 0.0)).0, CELL_MAX);
    }

    #[test]
    fn clamp_ceiling_stays_inside_the_grid() {
        assert!(CELL_MAX < GRID_SIDE);
    }

    #[test]
    fn subspaces_are_created_lazily_and_destroyed_when_empty() {
        let mut grid = SpaceGrid::new();
        let h = handles(1)[0];
        assert_eq!(grid.occupied_cells(), 0);
        grid.insert_static((2, 3), h);
        assert_eq!(grid.occupied_cells(), 1);
        assert_eq!(grid.cell_geoms((2, 3)), &[h]);
        grid.remove_static((2, 3), h);
        assert_eq!(grid.occupied_cells(), 0);
    }

    #[test]
    fn removing_a_geom_not_in_the_cell_is_a_no_op() {
        let mut grid = SpaceGrid::new();
        let hs = handles(2);
        grid.insert_static((1, 1), hs[0]);
        grid.remove_static((1, 1), hs[1]);
        grid.remove_static((4, 4), hs[0]);
        assert_eq!(grid.cell_geoms((1, 1)), &[hs[0]]);
        assert_eq!(grid.occupied_cells(), 1);
    }

    #[test]
    fn double_insert_does_not_duplicate_membership() {
        let mut grid = SpaceGrid::new();
        let h = handles(1)[0];
        grid.insert_static((0, 0), h);
        grid.insert_static((0, 0), h);
        assert_eq!(grid.cell_geoms((0, 0)).len(), 1);
        grid.insert_root(h);
        grid.insert_root(h);
        assert_eq!(grid.root_geoms().len(), 1);
    }
}
