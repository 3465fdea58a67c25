//! Typed events and the two record shapes written by the logger.
//!
//! Event names are produced only from [`TrialEvent::as_str`], so a row can
//! never carry a misspelled event.

use crate::spatial::{Pose, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    Exploration,
    Annotation,
    Feedback,
    Done,
}

impl TrialPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TrialPhase::Exploration => "exploration",
            TrialPhase::Annotation => "annotation",
            TrialPhase::Feedback => "feedback",
            TrialPhase::Done => "done",
        }
    }
}

/// Phase column of a continuous row: either a trial phase or a
/// scheduler-owned interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPhase {
    Trial(TrialPhase),
    Fixation,
    Trigger,
}

impl RecordPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordPhase::Trial(p) => p.as_str(),
            RecordPhase::Fixation => "fixation",
            RecordPhase::Trigger => "trigger",
        }
    }
}

/// Which scheduler wait a fixation row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixationKind {
    /// Fixed padding before the first trial of an invocation.
    LeadIn,
    /// Pad to the next TR boundary after a trial.
    Alignment,
    /// Fixed padding after the final trial.
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixationEdge {
    Start,
    End,
    /// Cut short by an operator abort.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialEvent {
    TriggerReceived,
    Fixation(FixationKind, FixationEdge),
    TrialStart,
    StartedMoving,
    TargetPlaced,
    FoundTarget,
    BorderReached,
    BorderLeft,
    ExplorationTimeout,
    AnnotationStart,
    TargetAnnotated,
    AnnotationTimeout,
    FeedbackStart,
    FeedbackSkipped,
    TrialEnd,
    Quit,
}

impl TrialEvent {
    pub fn as_str(self) -> &'static str {
        use FixationEdge::*;
        use FixationKind::*;
        match self {
            TrialEvent::TriggerReceived => "trigger_received",
            TrialEvent::Fixation(_, Skipped) => "fixation_skipped",
            TrialEvent::Fixation(LeadIn, Start) => "fixation_start",
            TrialEvent::Fixation(LeadIn, End) => "fixation_end",
            TrialEvent::Fixation(Alignment, Start) => "tr_alignment_fixation_start",
            TrialEvent::Fixation(Alignment, End) => "tr_alignment_fixation_end",
            TrialEvent::Fixation(Closing, Start) => "final_fixation_start",
            TrialEvent::Fixation(Closing, End) => "final_fixation_end",
            TrialEvent::TrialStart => "trial_start",
            TrialEvent::StartedMoving => "started_moving",
            TrialEvent::TargetPlaced => "target_placed",
            TrialEvent::FoundTarget => "found_target",
            TrialEvent::BorderReached => "border_reached",
            TrialEvent::BorderLeft => "border_left",
            TrialEvent::ExplorationTimeout => "exploration_timeout",
            TrialEvent::AnnotationStart => "annotation_start",
            TrialEvent::TargetAnnotated => "target_annotated",
            TrialEvent::AnnotationTimeout => "annotation_timeout",
            TrialEvent::FeedbackStart => "feedback_start",
            TrialEvent::FeedbackSkipped => "feedback_skipped",
            TrialEvent::TrialEnd => "trial_end",
            TrialEvent::Quit => "quit",
        }
    }
}

/// One trajectory sample or discrete sub-event.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousRecord {
    /// Unix seconds.
    pub wall_clock_time: f64,
    pub trial: u32,
    /// Seconds since trial start (or since the scheduler interval started).
    pub trial_time: f64,
    pub phase: RecordPhase,
    pub event: Option<TrialEvent>,
    pub x: f32,
    pub y: f32,
    pub heading: f32,
}

impl ContinuousRecord {
    pub fn at_pose(
        wall_clock_time: f64,
        trial: u32,
        trial_time: f64,
        phase: RecordPhase,
        event: Option<TrialEvent>,
        pose: &Pose,
    ) -> Self {
        Self {
            wall_clock_time,
            trial,
            trial_time,
            phase,
            event,
            x: pose.position.x,
            y: pose.position.y,
            heading: pose.heading,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    Completed,
    Aborted,
}

impl TrialOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TrialOutcome::Completed => "completed",
            TrialOutcome::Aborted => "aborted",
        }
    }
}

/// One row per trial.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteRecord {
    pub trial_id: u32,
    pub condition: String,
    /// Seconds; `None` when the target was predetermined.
    pub assigned_delay: Option<f64>,
    pub time_to_first_move: Option<f64>,
    pub time_to_placement: Option<f64>,
    pub exploration_duration: f64,
    pub annotation_duration: Option<f64>,
    pub target: Option<Vec2>,
    pub annotation: Option<Vec2>,
    error_distance: Option<f32>,
    pub outcome: TrialOutcome,
}

impl DiscreteRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trial_id: u32,
        condition: String,
        assigned_delay: Option<f64>,
        time_to_first_move: Option<f64>,
        time_to_placement: Option<f64>,
        exploration_duration: f64,
        annotation_duration: Option<f64>,
        target: Option<Vec2>,
        annotation: Option<Vec2>,
        outcome: TrialOutcome,
    ) -> Self {
        let error_distance = match (target, annotation) {
            (Some(t), Some(a)) => Some(t.distance(a)),
            _ => None,
        };
        Self {
            trial_id,
            condition,
            assigned_delay,
            time_to_first_move,
            time_to_placement,
            exploration_duration,
            annotation_duration,
            target,
            annotation,
            error_distance,
            outcome,
        }
    }

    /// Euclidean target-to-annotation distance; `None` unless both exist.
    pub fn error_distance(&self) -> Option<f32> {
        self.error_distance
    }
}
