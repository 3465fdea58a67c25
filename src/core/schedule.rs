//! TR-aligned scheduling.
//!
//! Only the timing math lives here. Everything is a pure function of `now`,
//! the reference pulse time and TR (all seconds on the same clock); the
//! driver owns the actual waiting, rendering a fixation cross and polling for
//! an abort while it sleeps.
//!
//! A trial that overruns its slot is never cut short. The run simply drifts,
//! and the absolute timestamps on every row let analysis re-bucket by TR.

use crate::config::{RunMode, TrPlan};
use crate::events::FixationKind;

/// Within this distance of a boundary, `now` counts as aligned.
pub const ALIGNMENT_EPSILON: f64 = 1e-3;

/// `reference + (floor((now - reference) / tr) + 1) * tr`.
pub fn next_boundary(now: f64, reference: f64, tr: f64) -> f64 {
    let elapsed_trs = ((now - reference) / tr).floor();
    reference + (elapsed_trs + 1.0) * tr
}

/// Seconds to wait from `now` until the next TR boundary; zero when `now`
/// already sits on one. Calling again right after the wait returns zero.
pub fn alignment_wait(now: f64, reference: f64, tr: f64) -> f64 {
    if !(tr > 0.0) || !now.is_finite() || !reference.is_finite() {
        return 0.0;
    }
    let since = now - reference;
    let into_tr = since - (since / tr).floor() * tr;
    if into_tr <= ALIGNMENT_EPSILON || tr - into_tr <= ALIGNMENT_EPSILON {
        return 0.0;
    }
    (next_boundary(now, reference, tr) - now).max(0.0)
}

/// One scheduled fixation interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPlan {
    pub kind: FixationKind,
    pub start: f64,
    pub until: f64,
}

impl WaitPlan {
    pub fn duration(&self) -> f64 {
        (self.until - self.start).max(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct TrScheduler {
    plan: TrPlan,
    /// Unix time of a known scanner pulse; `None` runs unsynchronized.
    reference: Option<f64>,
    mode: RunMode,
}

impl TrScheduler {
    pub fn new(plan: TrPlan, reference: Option<f64>, mode: RunMode) -> Self {
        Self {
            plan,
            reference,
            mode,
        }
    }

    /// Fixed fixation before the first trial of this invocation. Longer when
    /// it is trial 1 of the run, to absorb scanner start-up.
    pub fn lead_in(&self, now: f64, first_trial_id: u32) -> Option<WaitPlan> {
        if self.mode != RunMode::Scan {
            return None;
        }
        let trs = if first_trial_id <= 1 {
            self.plan.first_lead_in_trs
        } else {
            self.plan.lead_in_trs
        };
        fixed(FixationKind::LeadIn, now, self.plan.trs(trs))
    }

    /// Pad from the end of a trial to the next TR boundary.
    pub fn after_trial(&self, now: f64) -> Option<WaitPlan> {
        let reference = self.reference?;
        let wait = alignment_wait(now, reference, self.plan.tr_s);
        if wait <= 0.0 {
            return None;
        }
        Some(WaitPlan {
            kind: FixationKind::Alignment,
            start: now,
            until: now + wait,
        })
    }

    /// Fixed fixation after the final trial, before any end-of-run screen.
    pub fn closing(&self, now: f64) -> Option<WaitPlan> {
        if self.mode != RunMode::Scan {
            return None;
        }
        fixed(FixationKind::Closing, now, self.plan.trs(self.plan.closing_trs))
    }
}

fn fixed(kind: FixationKind, now: f64, seconds: f64) -> Option<WaitPlan> {
    (seconds > 0.0).then_some(WaitPlan {
        kind,
        start: now,
        until: now + seconds,
    })
}
