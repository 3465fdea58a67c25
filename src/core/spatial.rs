//! Arena geometry, poses and grid-cell quantization.
//!
//! Coordinates are meters with the arena centered on the origin. Headings are
//! degrees; 0° points along +y and positive rotation is clockwise, so the unit
//! heading vector is `(sin θ, cos θ)`.

use hashbrown::HashSet;

use crate::config::{ArenaConfig, MotionConfig};
use crate::input::InputState;

// Relative pull-in applied when projecting onto the rim, well above f32 rounding.
const RIM_MARGIN: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn norm(self) -> f32 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn scale(self, k: f32) -> Vec2 {
        Vec2::new(self.x * k, self.y * k)
    }

    pub fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Unit vector for a heading in degrees.
    pub fn from_heading(heading_deg: f32) -> Vec2 {
        let rad = heading_deg.to_radians();
        Vec2::new(rad.sin(), rad.cos())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: Vec2,
    pub heading: f32,
}

impl Pose {
    pub fn centered() -> Self {
        Self::default()
    }

    /// The point `offset` meters ahead along the heading.
    pub fn leading_point(&self, offset: f32) -> Vec2 {
        self.position
            .add(Vec2::from_heading(self.heading).scale(offset))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arena {
    radius: f32,
    border_threshold: f32,
}

impl Arena {
    pub fn new(radius: f32, border_threshold: f32) -> Self {
        Self {
            radius,
            border_threshold,
        }
    }

    pub fn from_config(cfg: &ArenaConfig) -> Self {
        Self::new(cfg.radius, cfg.border_threshold)
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.is_finite() && p.norm() <= self.radius
    }

    /// True when a disc of `r` centered on `p` lies entirely inside.
    pub fn contains_disc(&self, p: Vec2, r: f32) -> bool {
        p.is_finite() && p.norm() + r <= self.radius
    }

    pub fn is_near_border(&self, p: Vec2) -> bool {
        p.norm() >= self.radius - self.border_threshold
    }

    /// Resolve a candidate step from `from` to `to` so the result stays in
    /// bounds: out-of-bounds candidates are projected onto the rim, and if the
    /// projection still rounds outside, the step is dropped.
    pub fn clamp_step(&self, from: Vec2, to: Vec2) -> Vec2 {
        if self.contains(to) {
            return to;
        }
        if !to.is_finite() {
            return from;
        }
        let n = to.norm();
        let projected = to.scale(self.radius / n * (1.0 - RIM_MARGIN));
        if self.contains(projected) {
            projected
        } else {
            from
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub ix: i32,
    pub iy: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGrid {
    cell_size: f32,
}

impl CellGrid {
    pub fn new(cell_size: f32) -> Self {
        Self { cell_size }
    }

    pub fn cell_of(&self, p: Vec2) -> GridCell {
        GridCell {
            ix: (p.x / self.cell_size).floor() as i32,
            iy: (p.y / self.cell_size).floor() as i32,
        }
    }
}

/// Cells the leading point has entered this trial. Insert-only.
#[derive(Debug, Clone, Default)]
pub struct VisitedSet {
    cells: HashSet<GridCell>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, cell: &GridCell) -> bool {
        self.cells.contains(cell)
    }

    /// Returns true if the cell was not present before.
    pub fn insert(&mut self, cell: GridCell) -> bool {
        self.cells.insert(cell)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.iter()
    }
}

/// What the movement model did on one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionStep {
    /// A translate key was held.
    pub translating: bool,
    /// Forward specifically was held.
    pub forward: bool,
    pub rotating: bool,
    /// Meters actually travelled after clamping.
    pub travelled: f32,
}

/// Integrate one frame of directional input into `pose`.
///
/// Rotation is applied before translation, matching the key handling order of
/// the recorded sessions.
pub fn integrate(
    pose: &mut Pose,
    input: &InputState,
    dt: f32,
    motion: &MotionConfig,
    arena: &Arena,
) -> MotionStep {
    let mut step = MotionStep {
        translating: input.forward || input.backward,
        forward: input.forward,
        rotating: input.rotate_left || input.rotate_right,
        travelled: 0.0,
    };
    if dt <= 0.0 || !dt.is_finite() {
        return step;
    }

    if input.rotate_left {
        pose.heading -= motion.rotate_speed * dt;
    }
    if input.rotate_right {
        pose.heading += motion.rotate_speed * dt;
    }
    pose.heading = pose.heading.rem_euclid(360.0);

    let dir = Vec2::from_heading(pose.heading);
    let mut delta = 0.0f32;
    if input.forward {
        delta += motion.move_speed * dt;
    }
    if input.backward {
        delta -= motion.move_speed * dt;
    }
    if delta != 0.0 {
        let from = pose.position;
        let to = from.add(dir.scale(delta));
        pose.position = arena.clamp_step(from, to);
        step.travelled = from.distance(pose.position);
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(forward: bool, right: bool) -> InputState {
        InputState {
            forward,
            rotate_right: right,
            ..InputState::default()
        }
    }

    #[test]
    fn heading_zero_points_up() {
        let p = Pose::centered().leading_point(0.15);
        assert!(p.x.abs() < 1e-6);
        assert!((p.y - 0.15).abs() < 1e-6);

        let east = Pose {
            position: Vec2::ZERO,
            heading: 90.0,
        };
        let q = east.leading_point(1.0);
        assert!((q.x - 1.0).abs() < 1e-6);
        assert!(q.y.abs() < 1e-6);
    }

    #[test]
    fn grid_cells_floor_negative_coordinates() {
        let g = CellGrid::new(0.05);
        assert_eq!(g.cell_of(Vec2::new(0.01, 0.01)), GridCell { ix: 0, iy: 0 });
        assert_eq!(g.cell_of(Vec2::new(-0.01, 0.01)), GridCell { ix: -1, iy: 0 });
        assert_eq!(g.cell_of(Vec2::new(0.12, -0.051)), GridCell { ix: 2, iy: -2 });
    }

    #[test]
    fn border_band() {
        let a = Arena::new(1.65, 0.1);
        assert!(!a.is_near_border(Vec2::new(1.5, 0.0)));
        assert!(a.is_near_border(Vec2::new(0.0, 1.56)));
        assert!(a.contains(Vec2::new(0.0, 1.65)));
        assert!(!a.contains(Vec2::new(1.2, 1.2)));
    }

    #[test]
    fn integration_never_leaves_arena() {
        let arena = Arena::new(1.65, 0.1);
        let motion = MotionConfig::default();
        let mut pose = Pose::centered();
        // Walk and turn for two simulated minutes, hitting the wall repeatedly.
        for frame in 0..7_200 {
            let input = held(true, frame % 90 < 20);
            integrate(&mut pose, &input, 1.0 / 60.0, &motion, &arena);
            assert!(
                pose.position.norm() <= arena.radius(),
                "frame {frame}: {:?}",
                pose.position
            );
        }
    }

    #[test]
    fn huge_step_is_clamped_onto_rim() {
        let arena = Arena::new(1.65, 0.1);
        let motion = MotionConfig::default();
        let mut pose = Pose::centered();
        let step = integrate(&mut pose, &held(true, false), 10.0, &motion, &arena);
        assert!(pose.position.norm() <= 1.65);
        assert!(pose.position.norm() > 1.64);
        assert!(step.translating && step.forward);
        assert!((step.travelled - pose.position.norm()).abs() < 1e-4);
    }

    #[test]
    fn forward_and_backward_cancel() {
        let arena = Arena::new(1.65, 0.1);
        let motion = MotionConfig::default();
        let mut pose = Pose::centered();
        let input = InputState {
            forward: true,
            backward: true,
            ..InputState::default()
        };
        let step = integrate(&mut pose, &input, 0.5, &motion, &arena);
        assert_eq!(pose.position, Vec2::ZERO);
        assert!(step.translating);
        assert_eq!(step.travelled, 0.0);
    }

    #[test]
    fn rotation_wraps_heading() {
        let arena = Arena::new(1.65, 0.1);
        let motion = MotionConfig::default();
        let mut pose = Pose::centered();
        let left = InputState {
            rotate_left: true,
            ..InputState::default()
        };
        integrate(&mut pose, &left, 0.5, &motion, &arena);
        assert!((pose.heading - 330.0).abs() < 1e-3);
    }

    #[test]
    fn visited_set_only_grows() {
        let mut v = VisitedSet::new();
        let c = GridCell { ix: 1, iy: 2 };
        assert!(v.insert(c));
        assert!(!v.insert(c));
        assert_eq!(v.len(), 1);
        assert!(v.contains(&c));
    }
}
