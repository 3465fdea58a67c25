//! Immutable run configuration.
//!
//! Everything the engine reads is passed in through [`EngineConfig`] and
//! [`SessionConfig`] at construction; nothing is looked up from globals.
//! Defaults reproduce the one-target fMRI protocol (3.3 m arena, TR = 2.01 s).

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("arena radius must be positive (got {0})")]
    ArenaRadius(f32),
    #[error("border threshold must be in [0, radius) (got {0})")]
    BorderThreshold(f32),
    #[error("speeds must be positive and finite")]
    Speed,
    #[error("grid cell size must be positive (got {0})")]
    CellSize(f32),
    #[error("placement delay range is empty ({min}..={max})")]
    DelayRange { min: u32, max: u32 },
    #[error("placement band is empty: min radius {min} exceeds max radius {max}")]
    PlacementBand { min: f32, max: f32 },
    #[error("TR must be positive (got {0})")]
    Tr(f64),
    #[error("predetermined target at ({x}, {y}) does not fit inside the arena")]
    PredeterminedTarget { x: f32, y: f32 },
    #[error("predetermined target source lists no arenas")]
    NoArenas,
    #[error("arena {0:?} has no predetermined targets")]
    NoTargets(String),
    #[error("arena {0:?} is not in the predetermined target table")]
    UnknownArena(String),
    #[error("trial index {index} is outside 1..={total}")]
    TrialIndex { index: u32, total: u32 },
    #[error("participant id must not be empty")]
    Participant,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ArenaConfig {
    /// Meters.
    pub radius: f32,
    /// Width of the near-border band, meters.
    pub border_threshold: f32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            radius: 3.3 / 2.0,
            border_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MotionConfig {
    /// Meters per second.
    pub move_speed: f32,
    /// Degrees per second.
    pub rotate_speed: f32,
    /// Distance of the leading point ahead of the pose, meters.
    pub leading_offset: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            move_speed: 1.0,
            rotate_speed: 60.0,
            // 30 px at 200 px/m.
            leading_offset: 0.15,
        }
    }
}

/// Which translation input counts toward "has translated" in the placement gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TranslationRequirement {
    Forward,
    Any,
}

/// How the "mid straight-line movement" gate is evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case", tag = "rule"))]
pub enum StraightLineRule {
    /// Translating and not rotating on this frame.
    CurrentFrame,
    /// As `CurrentFrame`, and at least `min_run_m` travelled since the last turn.
    SinceLastTurn { min_run_m: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GateVariant {
    pub translation: TranslationRequirement,
    pub straight_line: StraightLineRule,
}

impl Default for GateVariant {
    fn default() -> Self {
        Self {
            translation: TranslationRequirement::Forward,
            straight_line: StraightLineRule::CurrentFrame,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlacementConfig {
    /// Whole seconds, drawn uniformly from `delay_min_s..=delay_max_s` per trial.
    pub delay_min_s: u32,
    pub delay_max_s: u32,
    /// Leading point must be at least this far from the center.
    pub min_radius: f32,
    pub target_radius: f32,
    pub cell_size: f32,
    /// After this much movement time the novel-cell requirement is waived.
    /// `None` keeps the strict gate (a participant circling in one cell never
    /// gets a target).
    pub novelty_waiver_after_s: Option<f64>,
    pub gate: GateVariant,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            delay_min_s: 8,
            delay_max_s: 13,
            min_radius: 0.5,
            target_radius: 0.1,
            cell_size: 0.05,
            novelty_waiver_after_s: Some(25.0),
            gate: GateVariant::default(),
        }
    }
}

impl PlacementConfig {
    /// Outer edge of the band where the leading point may trigger placement.
    pub fn max_radius(&self, arena: &ArenaConfig) -> f32 {
        arena.radius - self.target_radius - arena.border_threshold
    }
}

/// One named goal in a predetermined arena.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NamedTarget {
    pub name: String,
    pub x: f32,
    pub y: f32,
}

impl NamedTarget {
    pub fn new(name: &str, x: f32, y: f32) -> Self {
        Self {
            name: name.to_string(),
            x,
            y,
        }
    }
}

/// The goals of one arena, handed out one per trial in listed order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArenaTargets {
    pub arena: String,
    pub targets: Vec<NamedTarget>,
}

/// Where a trial's target comes from.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case", tag = "kind"))]
pub enum TargetSource {
    #[default]
    Dynamic,
    /// Per-arena target tables; the session's `arena_id` picks the table.
    Predetermined { arenas: Vec<ArenaTargets> },
}

impl TargetSource {
    /// Target for trial `trial_id` (1-based) of `arena_id`. Trials walk the
    /// arena's list in order and wrap around. `None` for dynamic placement.
    pub fn predetermined_for(
        &self,
        arena_id: &str,
        trial_id: u32,
    ) -> Result<Option<&NamedTarget>, ConfigError> {
        let TargetSource::Predetermined { arenas } = self else {
            return Ok(None);
        };
        let table = arenas
            .iter()
            .find(|a| a.arena == arena_id)
            .ok_or_else(|| ConfigError::UnknownArena(arena_id.to_string()))?;
        if table.targets.is_empty() {
            return Err(ConfigError::NoTargets(table.arena.clone()));
        }
        let slot = trial_id.saturating_sub(1) as usize % table.targets.len();
        Ok(Some(&table.targets[slot]))
    }
}

/// Phase limits, expressed in TRs so they stay scanner-aligned when TR changes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PhaseTimeouts {
    pub exploration_trs: Option<u32>,
    pub annotation_trs: Option<u32>,
    /// Go straight from annotation to done, without the feedback screen.
    pub skip_feedback: bool,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            exploration_trs: None,
            annotation_trs: Some(10),
            skip_feedback: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrPlan {
    /// Seconds.
    pub tr_s: f64,
    /// Lead-in fixation on the first trial of a run (scanner start-up).
    pub first_lead_in_trs: u32,
    pub lead_in_trs: u32,
    pub closing_trs: u32,
}

impl Default for TrPlan {
    fn default() -> Self {
        Self {
            tr_s: 2.01,
            first_lead_in_trs: 8,
            lead_in_trs: 4,
            closing_trs: 4,
        }
    }
}

impl TrPlan {
    pub fn trs(&self, n: u32) -> f64 {
        n as f64 * self.tr_s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Visibility {
    #[default]
    Full,
    /// Avatar shown before the first movement and near the border.
    Limited,
    /// Avatar shown only before the first movement.
    #[cfg_attr(feature = "serde", serde(rename = "none"))]
    Hidden,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Full => "full",
            Visibility::Limited => "limited",
            Visibility::Hidden => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    pub arena: ArenaConfig,
    pub motion: MotionConfig,
    pub placement: PlacementConfig,
    pub timeouts: PhaseTimeouts,
    pub tr: TrPlan,
    pub target_source: TargetSource,
    pub visibility: Visibility,
    /// Minimum spacing of trajectory rows; `None` logs every frame.
    pub sample_interval_s: Option<f64>,
    pub frame_rate_hz: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            arena: ArenaConfig::default(),
            motion: MotionConfig::default(),
            placement: PlacementConfig::default(),
            timeouts: PhaseTimeouts::default(),
            tr: TrPlan::default(),
            target_source: TargetSource::Dynamic,
            visibility: Visibility::Full,
            sample_interval_s: None,
            frame_rate_hz: 60,
        }
    }
}

impl EngineConfig {
    /// Multi-target style design: fixed goal, exploration capped at 60 TRs.
    pub fn predetermined(arenas: Vec<ArenaTargets>) -> Self {
        Self {
            target_source: TargetSource::Predetermined { arenas },
            timeouts: PhaseTimeouts {
                exploration_trs: Some(60),
                annotation_trs: Some(30),
                skip_feedback: false,
            },
            ..Self::default()
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_tr(mut self, tr_s: f64) -> Self {
        self.tr.tr_s = tr_s;
        self
    }

    pub fn with_gate(mut self, gate: GateVariant) -> Self {
        self.placement.gate = gate;
        self
    }

    pub fn with_novelty_waiver(mut self, after_s: Option<f64>) -> Self {
        self.placement.novelty_waiver_after_s = after_s;
        self
    }

    pub fn with_skip_feedback(mut self, skip: bool) -> Self {
        self.timeouts.skip_feedback = skip;
        self
    }

    pub fn exploration_timeout_s(&self) -> Option<f64> {
        self.timeouts.exploration_trs.map(|n| self.tr.trs(n))
    }

    pub fn annotation_timeout_s(&self) -> Option<f64> {
        self.timeouts.annotation_trs.map(|n| self.tr.trs(n))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.arena;
        if !(a.radius.is_finite() && a.radius > 0.0) {
            return Err(ConfigError::ArenaRadius(a.radius));
        }
        if !(a.border_threshold >= 0.0 && a.border_threshold < a.radius) {
            return Err(ConfigError::BorderThreshold(a.border_threshold));
        }

        let m = &self.motion;
        let speeds_ok = [m.move_speed, m.rotate_speed, m.leading_offset]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
            && m.move_speed > 0.0
            && m.rotate_speed > 0.0;
        if !speeds_ok {
            return Err(ConfigError::Speed);
        }

        let p = &self.placement;
        if !(p.cell_size.is_finite() && p.cell_size > 0.0) {
            return Err(ConfigError::CellSize(p.cell_size));
        }
        if p.delay_min_s > p.delay_max_s {
            return Err(ConfigError::DelayRange {
                min: p.delay_min_s,
                max: p.delay_max_s,
            });
        }
        let max_r = p.max_radius(a);
        if p.min_radius > max_r || p.target_radius <= 0.0 {
            return Err(ConfigError::PlacementBand {
                min: p.min_radius,
                max: max_r,
            });
        }

        if !(self.tr.tr_s.is_finite() && self.tr.tr_s > 0.0) {
            return Err(ConfigError::Tr(self.tr.tr_s));
        }

        if let TargetSource::Predetermined { arenas } = &self.target_source {
            if arenas.is_empty() {
                return Err(ConfigError::NoArenas);
            }
            for table in arenas {
                if table.targets.is_empty() {
                    return Err(ConfigError::NoTargets(table.arena.clone()));
                }
                for &NamedTarget { x, y, .. } in &table.targets {
                    let fits =
                        x.is_finite() && y.is_finite() && x.hypot(y) + p.target_radius <= a.radius;
                    if !fits {
                        return Err(ConfigError::PredeterminedTarget { x, y });
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RunMode {
    /// Outside the magnet: no lead-in or closing fixation, one log file per run.
    #[default]
    Practice,
    /// Inside the magnet: fixation padding, one log file per trial.
    Scan,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Practice => "practice",
            RunMode::Scan => "scan",
        }
    }
}

/// Per-invocation identity, normally assembled by the launcher.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    pub participant_id: String,
    pub experiment: String,
    /// 1-based index of the first trial run by this invocation.
    pub trial_index: u32,
    pub total_trials: u32,
    /// Trials run by this invocation, starting at `trial_index`.
    pub trials_in_run: u32,
    pub mode: RunMode,
    pub condition: String,
    pub arena_id: String,
    pub seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            participant_id: "TEST".to_string(),
            experiment: "one_target".to_string(),
            trial_index: 1,
            total_trials: 1,
            trials_in_run: 1,
            mode: RunMode::Practice,
            condition: "test".to_string(),
            arena_id: "arena1".to_string(),
            seed: 0x5EED_2025,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.participant_id.trim().is_empty() {
            return Err(ConfigError::Participant);
        }
        let last = self
            .trial_index
            .saturating_add(self.trials_in_run.max(1))
            .saturating_sub(1);
        if self.trial_index == 0 || last > self.total_trials {
            return Err(ConfigError::TrialIndex {
                index: self.trial_index,
                total: self.total_trials,
            });
        }
        Ok(())
    }

    /// Trial ids (1-based) covered by this invocation.
    pub fn trial_ids(&self) -> std::ops::RangeInclusive<u32> {
        let n = self.trials_in_run.max(1);
        self.trial_index..=self.trial_index + n - 1
    }

    pub fn is_final_trial(&self, trial_id: u32) -> bool {
        trial_id >= self.total_trials
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
        assert_eq!(SessionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn annotation_timeout_follows_tr() {
        let cfg = EngineConfig::default().with_tr(2.0);
        assert_eq!(cfg.annotation_timeout_s(), Some(20.0));
        assert_eq!(cfg.exploration_timeout_s(), None);
    }

    #[test]
    fn rejects_empty_placement_band() {
        let mut cfg = EngineConfig::default();
        cfg.placement.min_radius = 1.6;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::PlacementBand { .. })
        ));
    }

    fn arena(name: &str, targets: &[(&str, f32, f32)]) -> ArenaTargets {
        ArenaTargets {
            arena: name.to_string(),
            targets: targets
                .iter()
                .map(|&(n, x, y)| NamedTarget::new(n, x, y))
                .collect(),
        }
    }

    #[test]
    fn rejects_target_outside_arena() {
        let cfg = EngineConfig::predetermined(vec![arena(
            "garden",
            &[("bench", 0.3, 0.3), ("well", 1.62, 0.0)],
        )]);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::PredeterminedTarget { x: 1.62, y: 0.0 })
        );
    }

    #[test]
    fn rejects_empty_target_tables() {
        assert_eq!(
            EngineConfig::predetermined(Vec::new()).validate(),
            Err(ConfigError::NoArenas)
        );
        let cfg = EngineConfig::predetermined(vec![
            arena("garden", &[("bench", 0.3, 0.3)]),
            arena("desert", &[]),
        ]);
        assert_eq!(cfg.validate(), Err(ConfigError::NoTargets("desert".into())));
    }

    #[test]
    fn trials_walk_the_arena_table() {
        let source = EngineConfig::predetermined(vec![
            arena("garden", &[("bench", 0.3, 0.3), ("well", -0.5, 0.2)]),
            arena("desert", &[("cactus", 0.0, -0.8)]),
        ])
        .target_source;
        let name = |arena: &str, trial| {
            source
                .predetermined_for(arena, trial)
                .unwrap()
                .map(|t| t.name.clone())
        };
        assert_eq!(name("garden", 1).as_deref(), Some("bench"));
        assert_eq!(name("garden", 2).as_deref(), Some("well"));
        assert_eq!(name("garden", 3).as_deref(), Some("bench"));
        assert_eq!(name("desert", 2).as_deref(), Some("cactus"));
        assert_eq!(
            source.predetermined_for("forest", 1),
            Err(ConfigError::UnknownArena("forest".into()))
        );
        assert_eq!(TargetSource::Dynamic.predetermined_for("garden", 1), Ok(None));
    }

    #[test]
    fn trial_range_must_fit_total() {
        let s = SessionConfig {
            trial_index: 3,
            trials_in_run: 2,
            total_trials: 3,
            ..SessionConfig::default()
        };
        assert!(s.validate().is_err());

        let s = SessionConfig {
            trial_index: 2,
            trials_in_run: 2,
            total_trials: 3,
            ..SessionConfig::default()
        };
        assert_eq!(s.trial_ids().collect::<Vec<_>>(), vec![2, 3]);
        assert!(s.is_final_trial(3));
        assert!(!s.is_final_trial(2));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{ "tr": { "tr_s": 1.5 }, "visibility": "none",
                 "target_source": { "kind": "predetermined", "arenas": [
                     { "arena": "arena1", "targets": [ { "name": "lamp", "x": 0.5, "y": -0.25 } ] } ] } }"#,
        )
        .unwrap();
        assert_eq!(cfg.tr.tr_s, 1.5);
        assert_eq!(cfg.tr.first_lead_in_trs, 8);
        assert_eq!(cfg.visibility, Visibility::Hidden);
        let lamp = cfg.target_source.predetermined_for("arena1", 1).unwrap();
        assert_eq!(lamp, Some(&NamedTarget::new("lamp", 0.5, -0.25)));
        assert_eq!(cfg.arena, ArenaConfig::default());
    }
}
