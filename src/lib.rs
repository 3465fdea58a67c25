//! Real-time engine for scanner-synchronized spatial navigation trials.
//!
//! The engine is synchronous and clock-agnostic: callers feed it input and
//! frame times, and it hands back draw/audio intents while streaming log rows
//! to a [`logger::RecordSink`]. Waiting, devices and file locations belong to
//! the driver.

#[path = "core/config.rs"]
pub mod config;

#[path = "core/events.rs"]
pub mod events;

#[path = "core/input.rs"]
pub mod input;

#[path = "core/intents.rs"]
pub mod intents;

#[path = "core/logger.rs"]
pub mod logger;

#[path = "core/placement.rs"]
pub mod placement;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/schedule.rs"]
pub mod schedule;

#[path = "core/spatial.rs"]
pub mod spatial;

#[path = "core/trial.rs"]
pub mod trial;

pub use config::{EngineConfig, RunMode, SessionConfig};
pub use logger::{DualStreamLogger, RecordSink};
pub use schedule::TrScheduler;
pub use trial::{FrameTime, TickStatus, TrialEngine};
