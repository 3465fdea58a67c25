//! Dynamic target placement.
//!
//! Evaluated once per exploration frame. The gate order is fixed: existing
//! target, delay, control exposure, straight-line movement, radial band, cell
//! novelty, then candidate geometry. The first failing check is reported so
//! callers and tests can see exactly what held placement back.

use crate::config::{
    EngineConfig, GateVariant, PlacementConfig, StraightLineRule, TranslationRequirement,
};
use crate::prng::Prng;
use crate::spatial::{Arena, GridCell, Vec2, VisitedSet};

/// Draw a trial's placement delay: whole seconds from the configured range.
pub fn draw_placement_delay(cfg: &PlacementConfig, rng: &mut Prng) -> f64 {
    rng.gen_range_inclusive(cfg.delay_min_s, cfg.delay_max_s) as f64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub center: Vec2,
    pub radius: f32,
    /// Trial time of placement, seconds.
    pub placed_at: f64,
}

impl Target {
    pub fn contains(&self, p: Vec2) -> bool {
        p.distance(self.center) <= self.radius
    }
}

/// Per-frame facts the gate needs. Assembled by the state machine.
#[derive(Debug, Clone, Copy)]
pub struct PlacementContext<'a> {
    /// Seconds since the first movement input; `None` before any movement.
    pub movement_elapsed: Option<f64>,
    pub has_moved_forward_ever: bool,
    pub has_translated_ever: bool,
    pub has_rotated_ever: bool,
    pub translating_now: bool,
    pub rotating_now: bool,
    /// Meters travelled since the last rotation input.
    pub straight_run_m: f32,
    pub leading_point: Vec2,
    pub heading: f32,
    pub leading_cell: GridCell,
    /// The leading point moved into `leading_cell` on this frame.
    pub entered_new_cell: bool,
    /// Cells visited before this frame's transition was recorded.
    pub visited: &'a VisitedSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateBlock {
    AlreadyPlaced,
    DelayPending,
    ControlsNotExercised,
    NotStraightLine,
    OutsideBand,
    CellNotNovel,
    InvalidCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlacementDecision {
    Place { center: Vec2 },
    Blocked(GateBlock),
}

#[derive(Debug, Clone)]
pub struct PlacementPolicy {
    arena: Arena,
    placement_delay: f64,
    min_radius: f32,
    max_radius: f32,
    target_radius: f32,
    novelty_waiver_after_s: Option<f64>,
    gate: GateVariant,
}

impl PlacementPolicy {
    pub fn new(cfg: &EngineConfig, placement_delay: f64) -> Self {
        let p = &cfg.placement;
        Self {
            arena: Arena::from_config(&cfg.arena),
            placement_delay,
            min_radius: p.min_radius,
            max_radius: p.max_radius(&cfg.arena),
            target_radius: p.target_radius,
            novelty_waiver_after_s: p.novelty_waiver_after_s,
            gate: p.gate,
        }
    }

    pub fn placement_delay(&self) -> f64 {
        self.placement_delay
    }

    pub fn target_radius(&self) -> f32 {
        self.target_radius
    }

    pub fn evaluate(&self, existing: Option<&Target>, ctx: &PlacementContext) -> PlacementDecision {
        use PlacementDecision::Blocked;

        if existing.is_some() {
            return Blocked(GateBlock::AlreadyPlaced);
        }

        let elapsed = match ctx.movement_elapsed {
            Some(t) if t >= self.placement_delay => t,
            _ => return Blocked(GateBlock::DelayPending),
        };

        let translated = match self.gate.translation {
            TranslationRequirement::Forward => ctx.has_moved_forward_ever,
            TranslationRequirement::Any => ctx.has_translated_ever,
        };
        if !(translated && ctx.has_rotated_ever) {
            return Blocked(GateBlock::ControlsNotExercised);
        }

        let straight = ctx.translating_now && !ctx.rotating_now;
        let straight = match self.gate.straight_line {
            StraightLineRule::CurrentFrame => straight,
            StraightLineRule::SinceLastTurn { min_run_m } => {
                straight && ctx.straight_run_m >= min_run_m
            }
        };
        if !straight {
            return Blocked(GateBlock::NotStraightLine);
        }

        let r = ctx.leading_point.norm();
        if !(r >= self.min_radius && r <= self.max_radius) {
            return Blocked(GateBlock::OutsideBand);
        }

        let waived = self
            .novelty_waiver_after_s
            .is_some_and(|limit| elapsed >= limit);
        let novel = ctx.entered_new_cell && !ctx.visited.contains(&ctx.leading_cell);
        if !(novel || waived) {
            return Blocked(GateBlock::CellNotNovel);
        }

        // Back the center off so the target's rim touches the leading point.
        let back = Vec2::from_heading(ctx.heading).scale(-self.target_radius);
        let center = ctx.leading_point.add(back);
        if !self.arena.contains_disc(center, self.target_radius) {
            return Blocked(GateBlock::InvalidCandidate);
        }

        PlacementDecision::Place { center }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::CellGrid;

    fn policy(delay: f64) -> PlacementPolicy {
        let cfg = EngineConfig::default().with_novelty_waiver(None);
        PlacementPolicy::new(&cfg, delay)
    }

    fn ready<'a>(visited: &'a VisitedSet, lead: Vec2) -> PlacementContext<'a> {
        PlacementContext {
            movement_elapsed: Some(10.0),
            has_moved_forward_ever: true,
            has_translated_ever: true,
            has_rotated_ever: true,
            translating_now: true,
            rotating_now: false,
            straight_run_m: 0.3,
            leading_point: lead,
            heading: 0.0,
            leading_cell: CellGrid::new(0.05).cell_of(lead),
            entered_new_cell: true,
            visited,
        }
    }

    #[test]
    fn places_with_rim_on_leading_point() {
        let visited = VisitedSet::new();
        let lead = Vec2::new(0.0, 1.0);
        match policy(8.0).evaluate(None, &ready(&visited, lead)) {
            PlacementDecision::Place { center } => {
                assert!(center.x.abs() < 1e-6);
                assert!((center.y - 0.9).abs() < 1e-6);
                assert!((center.distance(lead) - 0.1).abs() < 1e-6);
            }
            other => panic!("expected placement, got {other:?}"),
        }
    }

    #[test]
    fn gate_order_reports_first_failure() {
        let visited = VisitedSet::new();
        let p = policy(8.0);
        let base = ready(&visited, Vec2::new(0.0, 1.0));

        let placed = Target {
            center: Vec2::ZERO,
            radius: 0.1,
            placed_at: 1.0,
        };
        assert_eq!(
            p.evaluate(Some(&placed), &base),
            PlacementDecision::Blocked(GateBlock::AlreadyPlaced)
        );

        let early = PlacementContext {
            movement_elapsed: Some(7.9),
            has_rotated_ever: false,
            ..base
        };
        assert_eq!(
            p.evaluate(None, &early),
            PlacementDecision::Blocked(GateBlock::DelayPending)
        );

        let no_turn = PlacementContext {
            has_rotated_ever: false,
            ..base
        };
        assert_eq!(
            p.evaluate(None, &no_turn),
            PlacementDecision::Blocked(GateBlock::ControlsNotExercised)
        );

        let turning = PlacementContext {
            rotating_now: true,
            ..base
        };
        assert_eq!(
            p.evaluate(None, &turning),
            PlacementDecision::Blocked(GateBlock::NotStraightLine)
        );

        let central = ready(&visited, Vec2::new(0.0, 0.3));
        assert_eq!(
            p.evaluate(None, &central),
            PlacementDecision::Blocked(GateBlock::OutsideBand)
        );

        let near_wall = ready(&visited, Vec2::new(0.0, 1.5));
        assert_eq!(
            p.evaluate(None, &near_wall),
            PlacementDecision::Blocked(GateBlock::OutsideBand)
        );
    }

    #[test]
    fn never_places_without_translation() {
        let visited = VisitedSet::new();
        let p = policy(8.0);
        for i in 0..500 {
            let ctx = PlacementContext {
                movement_elapsed: Some(i as f64),
                has_moved_forward_ever: false,
                has_translated_ever: false,
                ..ready(&visited, Vec2::new(0.0, 1.0))
            };
            assert!(matches!(p.evaluate(None, &ctx), PlacementDecision::Blocked(_)));
        }
    }

    #[test]
    fn backward_only_counts_when_any_translation_allowed() {
        let visited = VisitedSet::new();
        let ctx = PlacementContext {
            has_moved_forward_ever: false,
            ..ready(&visited, Vec2::new(0.0, 1.0))
        };
        assert_eq!(
            policy(8.0).evaluate(None, &ctx),
            PlacementDecision::Blocked(GateBlock::ControlsNotExercised)
        );

        let cfg = EngineConfig::default().with_gate(GateVariant {
            translation: TranslationRequirement::Any,
            straight_line: StraightLineRule::CurrentFrame,
        });
        let any = PlacementPolicy::new(&cfg, 8.0);
        assert!(matches!(any.evaluate(None, &ctx), PlacementDecision::Place { .. }));
    }

    #[test]
    fn visited_or_stale_cell_blocks() {
        let lead = Vec2::new(0.0, 1.0);
        let mut visited = VisitedSet::new();
        visited.insert(CellGrid::new(0.05).cell_of(lead));
        assert_eq!(
            policy(8.0).evaluate(None, &ready(&visited, lead)),
            PlacementDecision::Blocked(GateBlock::CellNotNovel)
        );

        let empty = VisitedSet::new();
        let stale = PlacementContext {
            entered_new_cell: false,
            ..ready(&empty, lead)
        };
        assert_eq!(
            policy(8.0).evaluate(None, &stale),
            PlacementDecision::Blocked(GateBlock::CellNotNovel)
        );
    }

    #[test]
    fn waiver_lifts_novelty_after_limit() {
        let lead = Vec2::new(0.0, 1.0);
        let mut visited = VisitedSet::new();
        visited.insert(CellGrid::new(0.05).cell_of(lead));
        let cfg = EngineConfig::default().with_novelty_waiver(Some(20.0));
        let p = PlacementPolicy::new(&cfg, 8.0);

        let before = ready(&visited, lead);
        assert_eq!(
            p.evaluate(None, &before),
            PlacementDecision::Blocked(GateBlock::CellNotNovel)
        );
        let after = PlacementContext {
            movement_elapsed: Some(20.0),
            entered_new_cell: false,
            ..before
        };
        assert!(matches!(p.evaluate(None, &after), PlacementDecision::Place { .. }));
    }

    #[test]
    fn straight_run_variant_needs_distance_since_turn() {
        let cfg = EngineConfig::default().with_gate(GateVariant {
            translation: TranslationRequirement::Forward,
            straight_line: StraightLineRule::SinceLastTurn { min_run_m: 0.5 },
        });
        let p = PlacementPolicy::new(&cfg, 8.0);
        let visited = VisitedSet::new();
        let short = ready(&visited, Vec2::new(0.0, 1.0));
        assert_eq!(
            p.evaluate(None, &short),
            PlacementDecision::Blocked(GateBlock::NotStraightLine)
        );
        let long = PlacementContext {
            straight_run_m: 0.6,
            ..short
        };
        assert!(matches!(p.evaluate(None, &long), PlacementDecision::Place { .. }));
    }

    #[test]
    fn drawn_delays_stay_in_range() {
        let cfg = PlacementConfig::default();
        let mut rng = Prng::for_trial(7, 1);
        let mut seen = [false; 6];
        for _ in 0..600 {
            let d = draw_placement_delay(&cfg, &mut rng);
            assert!((8.0..=13.0).contains(&d));
            assert_eq!(d.fract(), 0.0);
            seen[(d as usize) - 8] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn candidate_outside_arena_is_rejected() {
        // With no border band and a large target, a leading point inside the
        // band can still back the center off toward the wall.
        let mut cfg = EngineConfig::default().with_novelty_waiver(None);
        cfg.arena.border_threshold = 0.0;
        cfg.placement.target_radius = 0.3;
        let p = PlacementPolicy::new(&cfg, 0.0);
        let visited = VisitedSet::new();
        let lead = Vec2::new(0.0, 1.3);
        let ctx = PlacementContext {
            heading: 180.0,
            ..ready(&visited, lead)
        };
        // Facing -y, the center moves out to y = 1.6 and the disc crosses the wall.
        assert_eq!(
            p.evaluate(None, &ctx),
            PlacementDecision::Blocked(GateBlock::InvalidCandidate)
        );
    }
}
