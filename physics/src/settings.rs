/*!
World tuning constants.

These centralize the parameters used by the stepper, the broad-phase grid,
the contact resolver and the snapshot policy. Keeping them together makes
tuning easier and helps ensure deterministic behavior across platforms.

Notes
- Distances are in meters, time in seconds, mass in kilograms.
- Several values are deliberately odd-looking (29.9, 10.000006836, 255.95);
  they are load-bearing region conventions, not rounding accidents.
*/

use crate::types::Vec3;

/// Fixed simulation sub-step (seconds). Wall-clock time is consumed in
/// whole multiples of this; the remainder carries over to the next frame.
pub const WORLD_STEP: f32 = 0.004;

/// Wall-clock backlog at which the stepper stops trying to catch up:
/// the backlog collapses to a single sub-step and the solver runs with
/// [`SOLVER_ITERATIONS_DEGRADED`] iterations for that frame.
pub const LAG_THRESHOLD: f32 = 0.4;

/// Solver relaxation passes per sub-step under normal load.
pub const SOLVER_ITERATIONS: u32 = 10;

/// Solver relaxation passes per sub-step while shedding lag.
pub const SOLVER_ITERATIONS_DEGRADED: u32 = 5;

/// Gravity acceleration (m/s^2), region frame, Z up.
pub const GRAVITY: Vec3 = Vec3::new(0.0, 0.0, -9.8);

/// Region plane extent per axis (meters). Positions live in [0, 256)^2.
pub const REGION_SIZE: f32 = 256.0;

/// Edge length of one broad-phase grid cell (meters).
pub const METERS_IN_SPACE: f32 = 29.9;

/// Grid clamp ceiling: positions are clamped as if the region were 259 m
/// wide, leaving one cell of head-room past the border before snapping to
/// the edge cell. Out-of-range geometry still lands in a valid cell.
pub const GRID_CLAMP_EXTENT: f32 = 259.0;

/// Number of grid cells per axis.
pub const GRID_SIDE: usize = 10;

/// Upper bound on contacts generated for a single geometry pair.
pub const MAX_CONTACTS_PER_PAIR: usize = 30;

/// Penetration depth (meters) beyond which a pair is treated as badly
/// interpenetrated and the anti-stuck heuristics kick in.
pub const INTERPENETRATION_DEPTH: f32 = 0.08;

/// Replacement contact depth for a badly interpenetrated character-vs-prim
/// pair, paired with an upward velocity nudge of [`CHARACTER_NUDGE_VELOCITY`].
pub const CHARACTER_NUDGE_DEPTH: f32 = 0.003;

/// Upward velocity (m/s) added to a character stuck inside a prim.
pub const CHARACTER_NUDGE_VELOCITY: f32 = 2.5;

/// Depth at which a character-vs-ground contact is considered pathological:
/// the depth collapses to [`DEEP_GROUND_DEPTH`] and the character gets a
/// +[`DEEP_GROUND_VELOCITY`] m/s upward push.
pub const DEEP_GROUND_THRESHOLD: f32 = 1.0;
pub const DEEP_GROUND_DEPTH: f32 = 3.0e-8;
pub const DEEP_GROUND_VELOCITY: f32 = 0.5;

/// Contact surface layer (meters): penetrations shallower than this are
/// not corrected, which keeps resting stacks from jittering.
pub const CONTACT_SURFACE_LAYER: f32 = 0.001;

/// Cap on the velocity (m/s) the position-correction bias may inject.
pub const MAX_CORRECTING_VELOCITY: f32 = 1.0;

/// Default position-correction strength for presets that do not override it.
pub const DEFAULT_ERP: f32 = 0.2;

/// Minimum approach speed (m/s) below which restitution is suppressed.
pub const BOUNCE_VELOCITY_THRESHOLD: f32 = 0.1;

/// Material density used for derived prim mass (kg per m^3 / 1000);
/// corresponds to aluminium at g/cm^3.
pub const MATERIAL_DENSITY: f32 = 10.000006836;

/// Per-axis displacement (meters) under which a frame counts as low-motion
/// for resting-state detection.
pub const MOTION_EPSILON: f32 = 0.02;

/// Consecutive low-motion frames before an actor enters the resting state.
pub const RESTING_FRAMES: u32 = 3;

/// X/Y coordinate past which an actor is out of bounds (meters). Slightly
/// inside the true region edge so the event fires before the geometry leaves.
pub const OUT_OF_BOUNDS_EDGE: f32 = 255.95;

/// Frames a throttled actor skips between terse updates.
pub const THROTTLE_UPDATE_FRAMES: u32 = 15;

/// Contact count per pair above which an actor's updates get throttled.
pub const THROTTLE_CONTACT_COUNT: usize = 3;

/// Low-motion sub-steps before an auto-disable body goes to sleep.
pub const BODY_AUTO_DISABLE_STEPS: u32 = 20;

/// Squared speed (m/s)^2 under which a body counts as low-motion for
/// auto-disable purposes.
pub const BODY_SLEEP_SPEED_SQ: f32 = 0.01 * 0.01;

/// Avatar body mass (kg), independent of capsule size.
pub const CHARACTER_MASS: f32 = 80.0;

/// Gain used when blending character velocity toward its target each
/// sub-step (1/s). Full convergence in roughly a tenth of a second.
pub const CHARACTER_VELOCITY_GAIN: f32 = 10.0;

/// Horizontal speed (m/s) above which an avatar counts as "moving" for
/// contact-surface preset selection.
pub const AVATAR_MOVING_SPEED: f32 = 0.01;

/// Wall-clock frame budget (seconds) above which active-prim snapshot
/// refresh is skipped for the frame.
pub const ACTIVE_UPDATE_BUDGET: f32 = 0.2;
