//! Run driver: trigger row, lead-in fixation, trials, TR alignment and the
//! closing fixation, in that order.
//!
//! The engine does the per-frame work; this module owns the clocks, the
//! cooperative waits and the log files.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use navtrial::config::RunMode;
use navtrial::events::{ContinuousRecord, FixationEdge, RecordPhase, TrialEvent};
use navtrial::input::{poll_or_idle, InputSource};
use navtrial::intents::{AudioIntent, AudioSink, DrawIntent, RenderSurface};
use navtrial::logger::{
    append_continuous_or_report, flush_or_report, Destinations, DualStreamLogger, OpenMode,
    RecordSink,
};
use navtrial::placement::draw_placement_delay;
use navtrial::prng::Prng;
use navtrial::schedule::{TrScheduler, WaitPlan};
use navtrial::spatial::Pose;
use navtrial::trial::{FrameTime, TickStatus, TrialEngine};
use tokio::time::{self, Instant};
use tracing::{info, trace, warn};

use crate::error::RunError;
use crate::settings::RunSettings;

/// Longest single sleep inside a fixation; the abort flag is checked between
/// slices.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Operator abort, raised from the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Unix-time clock advanced by the monotonic tokio clock, so waits and
/// timestamps agree even if the system clock is adjusted mid-run.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall0: f64,
    mono0: Instant,
}

impl Clock {
    pub fn start() -> Self {
        let wall0 = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            wall0,
            mono0: Instant::now(),
        }
    }

    pub fn wall(&self) -> f64 {
        self.wall0 + self.mono0.elapsed().as_secs_f64()
    }
}

/// Render collaborator for runs without a display.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    frames: u64,
}

impl RenderSurface for HeadlessSurface {
    fn present(&mut self, frame: &[DrawIntent]) {
        self.frames += 1;
        trace!(frame = self.frames, "draw {frame:?}");
    }
}

#[derive(Debug, Default)]
pub struct HeadlessAudio {
    cues: u64,
}

impl AudioSink for HeadlessAudio {
    fn apply(&mut self, intent: AudioIntent) {
        self.cues += 1;
        trace!(cue = self.cues, "audio {intent:?}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Elapsed,
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub trials_completed: u32,
    pub aborted: bool,
    pub failed_rows: u64,
    /// Every log file written, continuous then discrete per logger.
    pub files: Vec<PathBuf>,
}

impl RunSummary {
    fn retire(&mut self, log: &DualStreamLogger) {
        self.failed_rows += log.failed_rows();
        self.files.push(log.continuous().path().to_path_buf());
        self.files.push(log.discrete().path().to_path_buf());
    }
}

pub struct Runner<I, R, A> {
    input: I,
    surface: R,
    audio: A,
    clock: Clock,
    abort: AbortFlag,
}

impl<I, R, A> Runner<I, R, A>
where
    I: InputSource,
    R: RenderSurface,
    A: AudioSink,
{
    pub fn new(input: I, surface: R, audio: A, clock: Clock, abort: AbortFlag) -> Self {
        Self {
            input,
            surface,
            audio,
            clock,
            abort,
        }
    }

    pub async fn run(
        &mut self,
        settings: &RunSettings,
        dest: &Destinations,
    ) -> Result<RunSummary, RunError> {
        settings.validate()?;
        let engine_cfg = &settings.engine;
        let session = &settings.session;
        let ids = session.trial_ids();
        let first = *ids.start();
        let scheduler = TrScheduler::new(
            engine_cfg.tr.clone(),
            settings.reference_time,
            session.mode,
        );
        if settings.reference_time.is_none() {
            warn!("no scanner reference time; running without TR alignment");
        }

        let mut log = DualStreamLogger::open(dest, session, first, open_mode(session.mode))?;
        let mut summary = RunSummary::default();
        let mut last_pose = Pose::centered();

        if let Some(reference) = settings.reference_time {
            let row = ContinuousRecord::at_pose(
                reference,
                first,
                0.0,
                RecordPhase::Trigger,
                Some(TrialEvent::TriggerReceived),
                &last_pose,
            );
            append_continuous_or_report(&mut log, &row);
        }

        let lead_in = scheduler.lead_in(self.clock.wall(), first);
        summary.aborted = self.hold_planned(lead_in, first, &last_pose, &mut log).await;

        for trial_id in ids {
            if summary.aborted {
                break;
            }
            if session.mode == RunMode::Scan && trial_id != first {
                let next = DualStreamLogger::open(dest, session, trial_id, OpenMode::Append)?;
                let done = std::mem::replace(&mut log, next);
                summary.retire(&done);
            }

            let mut rng = Prng::for_trial(session.seed, trial_id);
            let delay = draw_placement_delay(&engine_cfg.placement, &mut rng);
            let mut engine = TrialEngine::new(engine_cfg, session, trial_id, delay)?;
            let status = self
                .run_trial(&mut engine, engine_cfg.frame_rate_hz, &mut log)
                .await;
            last_pose = *engine.pose();
            if status == TickStatus::Aborted {
                summary.aborted = true;
                break;
            }
            summary.trials_completed += 1;

            let align = scheduler.after_trial(self.clock.wall());
            summary.aborted = self
                .hold_planned(align, trial_id, &last_pose, &mut log)
                .await;
            if !summary.aborted && session.is_final_trial(trial_id) {
                let closing = scheduler.closing(self.clock.wall());
                summary.aborted = self
                    .hold_planned(closing, trial_id, &last_pose, &mut log)
                    .await;
            }
        }

        flush_or_report(&mut log);
        summary.retire(&log);
        if summary.aborted {
            warn!(
                "run aborted after {} completed trial(s)",
                summary.trials_completed
            );
        } else {
            info!(
                "run finished: {} trial(s), {} failed row(s)",
                summary.trials_completed, summary.failed_rows
            );
        }
        Ok(summary)
    }

    /// Hold `plan` if there is one. Returns true when the operator aborted.
    async fn hold_planned<S: RecordSink + ?Sized>(
        &mut self,
        plan: Option<WaitPlan>,
        trial_id: u32,
        pose: &Pose,
        sink: &mut S,
    ) -> bool {
        match plan {
            Some(plan) => {
                self.hold_fixation(plan, trial_id, pose, sink).await == WaitOutcome::Aborted
            }
            None => false,
        }
    }

    async fn run_trial<S: RecordSink + ?Sized>(
        &mut self,
        engine: &mut TrialEngine,
        frame_rate_hz: u32,
        sink: &mut S,
    ) -> TickStatus {
        self.input.reset();
        let frame = Duration::from_secs_f64(1.0 / frame_rate_hz.max(1) as f64);
        let start = Instant::now();
        loop {
            let trial_time = start.elapsed().as_secs_f64();
            let mut input = poll_or_idle(&mut self.input, trial_time);
            if self.abort.is_raised() {
                input.abort = true;
            }
            let now = FrameTime {
                wall_clock: self.clock.wall(),
                trial_time,
            };
            let out = engine.tick(&input, now, sink);
            self.surface.present(&out.draw);
            for cue in out.audio {
                self.audio.apply(cue);
            }
            if out.status.is_finished() {
                return out.status;
            }
            time::sleep(frame).await;
        }
    }

    /// Show the fixation cross until `plan.until`, sleeping in short slices.
    async fn hold_fixation<S: RecordSink + ?Sized>(
        &mut self,
        plan: WaitPlan,
        trial_id: u32,
        pose: &Pose,
        sink: &mut S,
    ) -> WaitOutcome {
        let started = self.clock.wall();
        let row = |wall: f64, edge: FixationEdge| {
            ContinuousRecord::at_pose(
                wall,
                trial_id,
                wall - started,
                RecordPhase::Fixation,
                Some(TrialEvent::Fixation(plan.kind, edge)),
                pose,
            )
        };
        append_continuous_or_report(sink, &row(started, FixationEdge::Start));
        info!("{:?} fixation for {:.2}s", plan.kind, plan.duration());

        loop {
            self.surface.present(&[DrawIntent::Fixation]);
            let now = self.clock.wall();
            if self.abort.is_raised() {
                warn!("abort during {:?} fixation", plan.kind);
                append_continuous_or_report(sink, &row(now, FixationEdge::Skipped));
                flush_or_report(sink);
                return WaitOutcome::Aborted;
            }
            let remaining = plan.until - now;
            if remaining <= 0.0 {
                append_continuous_or_report(sink, &row(now, FixationEdge::End));
                return WaitOutcome::Elapsed;
            }
            time::sleep(Duration::from_secs_f64(remaining).min(WAIT_SLICE)).await;
        }
    }
}

fn open_mode(mode: RunMode) -> OpenMode {
    match mode {
        RunMode::Practice => OpenMode::Truncate,
        RunMode::Scan => OpenMode::Append,
    }
}
