//! Trial phase state machine.
//!
//! One [`TrialEngine`] owns the live state of one trial: the active pose
//! (avatar during exploration, marker afterwards), the target, the visited
//! cells and the current phase. The driver calls [`TrialEngine::tick`] once
//! per frame with the polled input and the frame time; every row the tick
//! produces goes straight to the supplied [`RecordSink`].
//!
//! At most one phase transition happens per tick, so a confirm press can
//! never skip a phase.

use tracing::{debug, info};

use crate::config::{
    ConfigError, EngineConfig, MotionConfig, SessionConfig, TargetSource, Visibility,
};
use crate::events::{
    ContinuousRecord, DiscreteRecord, RecordPhase, TrialEvent, TrialOutcome, TrialPhase,
};
use crate::input::InputState;
use crate::intents::{AudioIntent, AvatarStyle, Channel, DrawIntent, SoundId};
use crate::logger::{
    append_continuous_or_report, append_discrete_or_report, flush_or_report, RecordSink,
};
use crate::placement::{GateBlock, PlacementContext, PlacementDecision, PlacementPolicy, Target};
use crate::spatial::{integrate, Arena, CellGrid, GridCell, Pose, Vec2, VisitedSet};

/// Clock readings for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTime {
    /// Unix seconds.
    pub wall_clock: f64,
    /// Monotonic seconds since the trial started.
    pub trial_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Running,
    Done,
    Aborted,
}

impl TickStatus {
    pub fn is_finished(self) -> bool {
        self != TickStatus::Running
    }
}

/// Everything a tick hands back to the driver besides log rows.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub status: TickStatus,
    pub phase: TrialPhase,
    pub draw: Vec<DrawIntent>,
    pub audio: Vec<AudioIntent>,
    pub events: Vec<TrialEvent>,
    pub near_border: bool,
}

pub struct TrialEngine {
    motion: MotionConfig,
    arena: Arena,
    grid: CellGrid,
    /// `None` when the target is predetermined.
    policy: Option<PlacementPolicy>,
    preset_target: Option<Target>,
    exploration_timeout: Option<f64>,
    annotation_timeout: Option<f64>,
    skip_feedback: bool,
    visibility: Visibility,
    sample_interval: Option<f64>,

    trial_id: u32,
    total_trials: u32,
    condition: String,

    phase: TrialPhase,
    started: bool,
    pose: Pose,
    last_time: f64,
    phase_started_at: f64,
    target: Option<Target>,
    visited: VisitedSet,
    last_leading_cell: Option<GridCell>,
    first_move_at: Option<f64>,
    moved_forward: bool,
    translated: bool,
    rotated: bool,
    straight_run_m: f32,
    near_border: bool,
    inside_target: bool,
    found_count: u32,
    exploration_duration: Option<f64>,
    annotation_duration: Option<f64>,
    annotation: Option<Vec2>,
    last_sample_at: Option<f64>,
    debug_overlay: bool,
    outcome: Option<TrialOutcome>,
    discrete: Option<DiscreteRecord>,

    tick_events: Vec<TrialEvent>,
    tick_audio: Vec<AudioIntent>,
}

impl TrialEngine {
    /// `placement_delay` is ignored for predetermined targets, which are
    /// taken from the table of `session.arena_id` by trial id.
    pub fn new(
        cfg: &EngineConfig,
        session: &SessionConfig,
        trial_id: u32,
        placement_delay: f64,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let (policy, preset_target) = match &cfg.target_source {
            TargetSource::Dynamic => (Some(PlacementPolicy::new(cfg, placement_delay)), None),
            source @ TargetSource::Predetermined { .. } => {
                let named = source
                    .predetermined_for(&session.arena_id, trial_id)?
                    .ok_or_else(|| ConfigError::UnknownArena(session.arena_id.clone()))?;
                debug!(
                    trial = trial_id,
                    "arena {} target {:?} at ({:.2}, {:.2})",
                    session.arena_id,
                    named.name,
                    named.x,
                    named.y
                );
                let target = Target {
                    center: Vec2::new(named.x, named.y),
                    radius: cfg.placement.target_radius,
                    placed_at: 0.0,
                };
                (None, Some(target))
            }
        };

        Ok(Self {
            motion: cfg.motion.clone(),
            arena: Arena::from_config(&cfg.arena),
            grid: CellGrid::new(cfg.placement.cell_size),
            policy,
            preset_target,
            exploration_timeout: cfg.exploration_timeout_s(),
            annotation_timeout: cfg.annotation_timeout_s(),
            skip_feedback: cfg.timeouts.skip_feedback,
            visibility: cfg.visibility,
            sample_interval: cfg.sample_interval_s,

            trial_id,
            total_trials: session.total_trials,
            condition: session.condition.clone(),

            phase: TrialPhase::Exploration,
            started: false,
            pose: Pose::centered(),
            last_time: 0.0,
            phase_started_at: 0.0,
            target: None,
            visited: VisitedSet::new(),
            last_leading_cell: None,
            first_move_at: None,
            moved_forward: false,
            translated: false,
            rotated: false,
            straight_run_m: 0.0,
            near_border: false,
            inside_target: false,
            found_count: 0,
            exploration_duration: None,
            annotation_duration: None,
            annotation: None,
            last_sample_at: None,
            debug_overlay: false,
            outcome: None,
            discrete: None,

            tick_events: Vec::new(),
            tick_audio: Vec::new(),
        })
    }

    pub fn trial_id(&self) -> u32 {
        self.trial_id
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    /// The active actor's pose.
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }

    pub fn placement_delay(&self) -> Option<f64> {
        self.policy.as_ref().map(|p| p.placement_delay())
    }

    pub fn found_count(&self) -> u32 {
        self.found_count
    }

    pub fn outcome(&self) -> Option<TrialOutcome> {
        self.outcome
    }

    /// The summary row, once the trial has ended.
    pub fn discrete(&self) -> Option<&DiscreteRecord> {
        self.discrete.as_ref()
    }

    pub fn status(&self) -> TickStatus {
        match self.outcome {
            None => TickStatus::Running,
            Some(TrialOutcome::Completed) => TickStatus::Done,
            Some(TrialOutcome::Aborted) => TickStatus::Aborted,
        }
    }

    /// Advance one frame.
    pub fn tick<S: RecordSink + ?Sized>(
        &mut self,
        input: &InputState,
        now: FrameTime,
        sink: &mut S,
    ) -> TickOutput {
        if self.outcome.is_some() {
            return self.output(Vec::new());
        }
        self.tick_events.clear();
        self.tick_audio.clear();

        if !self.started {
            self.begin(now, sink);
        }
        let dt = (now.trial_time - self.last_time).max(0.0) as f32;
        self.last_time = now.trial_time.max(self.last_time);

        if input.debug_toggle {
            self.debug_overlay = !self.debug_overlay;
            debug!(trial = self.trial_id, "debug overlay {}", self.debug_overlay);
        }

        if input.abort {
            self.abort(now, sink);
        } else {
            match self.phase {
                TrialPhase::Exploration => self.explore(input, dt, now, sink),
                TrialPhase::Annotation => self.annotate(input, dt, now, sink),
                TrialPhase::Feedback => self.feedback(input, now, sink),
                TrialPhase::Done => {}
            }
        }

        let frame = self.frame();
        self.output(frame)
    }

    fn output(&mut self, draw: Vec<DrawIntent>) -> TickOutput {
        TickOutput {
            status: self.status(),
            phase: self.phase,
            draw,
            audio: std::mem::take(&mut self.tick_audio),
            events: std::mem::take(&mut self.tick_events),
            near_border: self.near_border,
        }
    }

    fn begin<S: RecordSink + ?Sized>(&mut self, now: FrameTime, sink: &mut S) {
        self.started = true;
        self.last_time = now.trial_time;
        self.phase_started_at = now.trial_time;
        info!(
            trial = self.trial_id,
            "trial {}/{} started ({})",
            self.trial_id,
            self.total_trials,
            self.placement_delay()
                .map(|d| format!("placement delay {d:.0}s"))
                .unwrap_or_else(|| "predetermined target".to_string())
        );
        self.emit(sink, now, TrialEvent::TrialStart);

        if let Some(target) = self.preset_target {
            self.target = Some(target);
            self.inside_target = target.contains(self.pose.position);
            self.emit(sink, now, TrialEvent::TargetPlaced);
        }
    }

    fn explore<S: RecordSink + ?Sized>(
        &mut self,
        input: &InputState,
        dt: f32,
        now: FrameTime,
        sink: &mut S,
    ) {
        let t = now.trial_time;
        let step = integrate(&mut self.pose, input, dt, &self.motion, &self.arena);
        self.sample(sink, now);

        if (step.translating || step.rotating) && self.first_move_at.is_none() {
            self.first_move_at = Some(t);
            self.emit(sink, now, TrialEvent::StartedMoving);
        }
        self.moved_forward |= step.forward;
        self.translated |= step.translating;
        self.rotated |= step.rotating;
        if step.rotating {
            self.straight_run_m = 0.0;
        } else {
            self.straight_run_m += step.travelled;
        }

        let leading = self.pose.leading_point(self.motion.leading_offset);
        let cell = self.grid.cell_of(leading);
        let entered_new_cell = self.last_leading_cell != Some(cell);

        let decision = self.policy.as_ref().map(|policy| {
            let ctx = PlacementContext {
                movement_elapsed: self.first_move_at.map(|m| t - m),
                has_moved_forward_ever: self.moved_forward,
                has_translated_ever: self.translated,
                has_rotated_ever: self.rotated,
                translating_now: step.translating,
                rotating_now: step.rotating,
                straight_run_m: self.straight_run_m,
                leading_point: leading,
                heading: self.pose.heading,
                leading_cell: cell,
                entered_new_cell,
                visited: &self.visited,
            };
            (policy.evaluate(self.target.as_ref(), &ctx), policy.target_radius())
        });
        match decision {
            Some((PlacementDecision::Place { center }, radius)) => {
                let target = Target {
                    center,
                    radius,
                    placed_at: t,
                };
                self.target = Some(target);
                self.inside_target = target.contains(self.pose.position);
                info!(
                    trial = self.trial_id,
                    "target placed at ({:.2}, {:.2}), t={t:.2}s",
                    center.x,
                    center.y
                );
                self.play(SoundId::TargetChime, Channel::Target, false);
                self.emit(sink, now, TrialEvent::TargetPlaced);
            }
            Some((PlacementDecision::Blocked(GateBlock::InvalidCandidate), _)) => {
                debug!(trial = self.trial_id, "placement candidate rejected, retrying");
            }
            _ => {}
        }

        if entered_new_cell {
            self.visited.insert(cell);
            self.last_leading_cell = Some(cell);
        }

        let near = self.arena.is_near_border(self.pose.position);
        if near != self.near_border {
            self.near_border = near;
            if near {
                self.play(SoundId::BorderBeep, Channel::Border, true);
                self.emit(sink, now, TrialEvent::BorderReached);
            } else {
                self.tick_audio.push(AudioIntent::Stop(Channel::Border));
                self.emit(sink, now, TrialEvent::BorderLeft);
            }
        }

        if let Some(target) = self.target {
            let inside = target.contains(self.pose.position);
            if inside && !self.inside_target {
                self.found_count += 1;
                self.play(SoundId::TargetChime, Channel::Target, false);
                self.emit(sink, now, TrialEvent::FoundTarget);
            }
            self.inside_target = inside;
        }

        if input.confirm {
            if self.target.is_some() {
                self.begin_annotation(now, sink);
                return;
            }
            debug!(trial = self.trial_id, "confirm ignored, no target yet");
        }

        if let Some(limit) = self.exploration_timeout {
            if t - self.phase_started_at >= limit {
                info!(trial = self.trial_id, "exploration timed out after {limit:.1}s");
                self.emit(sink, now, TrialEvent::ExplorationTimeout);
                self.begin_annotation(now, sink);
            }
        }
    }

    fn begin_annotation<S: RecordSink + ?Sized>(&mut self, now: FrameTime, sink: &mut S) {
        let t = now.trial_time;
        let explored = t - self.phase_started_at;
        self.exploration_duration = Some(explored);
        self.silence();

        self.pose = Pose::centered();
        self.straight_run_m = 0.0;
        self.phase = TrialPhase::Annotation;
        self.phase_started_at = t;
        info!(
            trial = self.trial_id,
            "annotation started after {explored:.2}s of exploration"
        );
        self.emit(sink, now, TrialEvent::AnnotationStart);
    }

    fn annotate<S: RecordSink + ?Sized>(
        &mut self,
        input: &InputState,
        dt: f32,
        now: FrameTime,
        sink: &mut S,
    ) {
        integrate(&mut self.pose, input, dt, &self.motion, &self.arena);
        self.sample(sink, now);

        let elapsed = now.trial_time - self.phase_started_at;
        let ended_by = if input.confirm && !input.text_entry_active {
            Some(TrialEvent::TargetAnnotated)
        } else if self.annotation_timeout.is_some_and(|limit| elapsed >= limit) {
            Some(TrialEvent::AnnotationTimeout)
        } else {
            None
        };
        let Some(event) = ended_by else {
            return;
        };

        self.annotation = Some(self.pose.position);
        self.annotation_duration = Some(elapsed);
        info!(
            trial = self.trial_id,
            "{} at ({:.2}, {:.2}) after {elapsed:.2}s",
            event.as_str(),
            self.pose.position.x,
            self.pose.position.y
        );
        self.emit(sink, now, event);

        if self.skip_feedback {
            self.emit(sink, now, TrialEvent::FeedbackSkipped);
            self.finish(now, TrialOutcome::Completed, sink);
        } else {
            self.phase = TrialPhase::Feedback;
            self.phase_started_at = now.trial_time;
            self.emit(sink, now, TrialEvent::FeedbackStart);
        }
    }

    fn feedback<S: RecordSink + ?Sized>(
        &mut self,
        input: &InputState,
        now: FrameTime,
        sink: &mut S,
    ) {
        self.sample(sink, now);
        if input.confirm {
            self.finish(now, TrialOutcome::Completed, sink);
        }
    }

    fn abort<S: RecordSink + ?Sized>(&mut self, now: FrameTime, sink: &mut S) {
        let t = now.trial_time;
        match self.phase {
            TrialPhase::Exploration => {
                self.exploration_duration = Some(t - self.phase_started_at);
            }
            TrialPhase::Annotation => {
                self.annotation_duration = Some(t - self.phase_started_at);
            }
            TrialPhase::Feedback | TrialPhase::Done => {}
        }
        self.silence();
        info!(trial = self.trial_id, "operator abort at t={t:.2}s");
        self.emit(sink, now, TrialEvent::Quit);
        self.finish(now, TrialOutcome::Aborted, sink);
    }

    fn finish<S: RecordSink + ?Sized>(
        &mut self,
        now: FrameTime,
        outcome: TrialOutcome,
        sink: &mut S,
    ) {
        self.phase = TrialPhase::Done;
        if outcome == TrialOutcome::Completed {
            self.emit(sink, now, TrialEvent::TrialEnd);
        }

        let record = DiscreteRecord::new(
            self.trial_id,
            self.condition.clone(),
            self.placement_delay(),
            self.first_move_at,
            self.policy
                .as_ref()
                .and(self.target.as_ref())
                .map(|t| t.placed_at),
            self.exploration_duration.unwrap_or(0.0),
            self.annotation_duration,
            self.target.map(|t| t.center),
            self.annotation,
            outcome,
        );
        append_discrete_or_report(sink, &record);
        flush_or_report(sink);

        match record.error_distance() {
            Some(err) => info!(
                trial = self.trial_id,
                "trial {} {}, error {err:.2} m",
                self.trial_id,
                outcome.as_str()
            ),
            None => info!(
                trial = self.trial_id,
                "trial {} {}, no target",
                self.trial_id,
                outcome.as_str()
            ),
        }
        self.discrete = Some(record);
        self.outcome = Some(outcome);
    }

    /// Stop every cue that may still be sounding.
    fn silence(&mut self) {
        if self.near_border {
            self.tick_audio.push(AudioIntent::Stop(Channel::Border));
            self.near_border = false;
        }
        if self.target.is_some() {
            self.tick_audio.push(AudioIntent::Stop(Channel::Target));
        }
    }

    fn play(&mut self, sound: SoundId, channel: Channel, looped: bool) {
        self.tick_audio.push(AudioIntent::Play {
            sound,
            channel,
            looped,
        });
    }

    fn emit<S: RecordSink + ?Sized>(&mut self, sink: &mut S, now: FrameTime, event: TrialEvent) {
        self.write_row(sink, now, Some(event));
        self.tick_events.push(event);
    }

    /// Trajectory row for this frame, throttled by the sample interval.
    fn sample<S: RecordSink + ?Sized>(&mut self, sink: &mut S, now: FrameTime) {
        let due = match (self.sample_interval, self.last_sample_at) {
            (Some(interval), Some(last)) => now.trial_time - last >= interval,
            _ => true,
        };
        if due {
            self.last_sample_at = Some(now.trial_time);
            self.write_row(sink, now, None);
        }
    }

    fn write_row<S: RecordSink + ?Sized>(
        &mut self,
        sink: &mut S,
        now: FrameTime,
        event: Option<TrialEvent>,
    ) {
        let row = ContinuousRecord::at_pose(
            now.wall_clock,
            self.trial_id,
            now.trial_time,
            RecordPhase::Trial(self.phase),
            event,
            &self.pose,
        );
        append_continuous_or_report(sink, &row);
    }

    fn avatar_visible(&self) -> bool {
        let before_first_move = self.first_move_at.is_none();
        match self.visibility {
            Visibility::Full => true,
            Visibility::Limited => before_first_move || self.near_border,
            Visibility::Hidden => before_first_move,
        }
    }

    fn frame(&self) -> Vec<DrawIntent> {
        let mut out = Vec::new();
        let arena = DrawIntent::Arena {
            radius: self.arena.radius(),
        };
        match self.phase {
            TrialPhase::Exploration => {
                if self.avatar_visible() {
                    out.push(arena);
                    out.push(DrawIntent::Avatar {
                        pose: self.pose,
                        style: AvatarStyle::Player,
                    });
                }
            }
            TrialPhase::Annotation => {
                out.push(arena);
                out.push(DrawIntent::Avatar {
                    pose: self.pose,
                    style: AvatarStyle::Marker,
                });
            }
            TrialPhase::Feedback => {
                out.push(arena);
                if let Some(t) = &self.target {
                    out.push(DrawIntent::Target {
                        center: t.center,
                        radius: t.radius,
                    });
                }
                out.push(DrawIntent::Avatar {
                    pose: self.pose,
                    style: AvatarStyle::Marker,
                });
            }
            TrialPhase::Done => return out,
        }

        out.push(DrawIntent::Hud {
            text: format!("{}/{}", self.trial_id, self.total_trials),
        });
        if self.debug_overlay {
            out.push(DrawIntent::Hud {
                text: format!(
                    "{} t={:.1}s cells={} delay={} target={}",
                    self.phase.as_str(),
                    self.last_time,
                    self.visited.len(),
                    self.placement_delay()
                        .map(|d| format!("{d:.0}s"))
                        .unwrap_or_else(|| "-".to_string()),
                    self.target
                        .map(|t| format!("({:.2}, {:.2})", t.center.x, t.center.y))
                        .unwrap_or_else(|| "none".to_string()),
                ),
            });
        }
        out
    }
}
