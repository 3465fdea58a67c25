//! Dual-stream data logging.
//!
//! Continuous rows (trajectory samples and sub-events) and discrete rows (one
//! per trial) go to two independent CSV files. Every row is written and
//! flushed as soon as it is produced, so killing the process loses at most the
//! row being written. Each stream picks its destination once, at open time:
//! the primary directory if it can be created and opened, otherwise the
//! fallback directory. A stream is never re-opened afterwards.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{RunMode, SessionConfig};
use crate::events::{ContinuousRecord, DiscreteRecord};
use crate::spatial::Vec2;

pub const CONTINUOUS_COLUMNS: [&str; 8] = [
    "wall_clock_time",
    "trial",
    "trial_time",
    "phase",
    "event",
    "x",
    "y",
    "heading",
];

pub const DISCRETE_COLUMNS: [&str; 11] = [
    "trial_id",
    "condition",
    "assigned_delay",
    "time_to_first_move",
    "time_to_placement",
    "exploration_duration",
    "annotation_duration",
    "target_xy",
    "annotation_xy",
    "error_distance",
    "outcome",
];

#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("neither {primary} nor {fallback} is writable")]
    NoDestination { primary: PathBuf, fallback: PathBuf },
}

/// Receiver for log rows. Implementations must not batch past one row.
pub trait RecordSink {
    fn append_continuous(&mut self, row: &ContinuousRecord) -> Result<(), LogError>;
    fn append_discrete(&mut self, row: &DiscreteRecord) -> Result<(), LogError>;
    fn flush(&mut self) -> Result<(), LogError>;
}

/// Append a continuous row, reporting instead of propagating a failure.
/// Returns whether the row landed.
pub fn append_continuous_or_report<S: RecordSink + ?Sized>(
    sink: &mut S,
    row: &ContinuousRecord,
) -> bool {
    match sink.append_continuous(row) {
        Ok(()) => true,
        Err(e) => {
            warn!("continuous row at t={:.3}s not written: {e}", row.trial_time);
            false
        }
    }
}

pub fn append_discrete_or_report<S: RecordSink + ?Sized>(
    sink: &mut S,
    row: &DiscreteRecord,
) -> bool {
    match sink.append_discrete(row) {
        Ok(()) => true,
        Err(e) => {
            warn!("discrete row for trial {} not written: {e}", row.trial_id);
            false
        }
    }
}

pub fn flush_or_report<S: RecordSink + ?Sized>(sink: &mut S) {
    if let Err(e) = sink.flush() {
        warn!("log flush failed: {e}");
    }
}

/// Keeps rows in memory. Used by tests and by callers that only need the
/// rows handed back.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub continuous: Vec<ContinuousRecord>,
    pub discrete: Vec<DiscreteRecord>,
    pub flushes: u32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> impl Iterator<Item = crate::events::TrialEvent> + '_ {
        self.continuous.iter().filter_map(|r| r.event)
    }
}

impl RecordSink for MemorySink {
    fn append_continuous(&mut self, row: &ContinuousRecord) -> Result<(), LogError> {
        self.continuous.push(row.clone());
        Ok(())
    }

    fn append_discrete(&mut self, row: &DiscreteRecord) -> Result<(), LogError> {
        self.discrete.push(row.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LogError> {
        self.flushes += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Continuous,
    Discrete,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Continuous => "continuous",
            StreamKind::Discrete => "discrete",
        }
    }

    fn columns(self) -> &'static [&'static str] {
        match self {
            StreamKind::Continuous => &CONTINUOUS_COLUMNS,
            StreamKind::Discrete => &DISCRETE_COLUMNS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLocation {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Append,
    /// Start the file over (practice runs replace the previous attempt).
    Truncate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    pub primary: PathBuf,
    pub fallback: PathBuf,
}

/// File name for a stream. Scan runs get one file per trial, practice runs
/// one per run.
pub fn stream_file_name(session: &SessionConfig, trial_id: u32, kind: StreamKind) -> String {
    match session.mode {
        RunMode::Scan => format!(
            "{}_{}_trial{}_{}.csv",
            session.participant_id,
            session.experiment,
            trial_id,
            kind.as_str()
        ),
        RunMode::Practice => format!(
            "{}_{}_practice_{}.csv",
            session.participant_id,
            session.experiment,
            kind.as_str()
        ),
    }
}

/// One append-only CSV file.
pub struct CsvStream {
    path: PathBuf,
    location: StreamLocation,
    file: File,
    rows: u64,
    failures: u64,
}

impl CsvStream {
    /// Open (or create) the stream, writing the header into an empty file.
    /// Any failure in the primary directory, including the header write,
    /// moves the whole attempt to the fallback directory.
    pub fn open(
        dest: &Destinations,
        file_name: &str,
        kind: StreamKind,
        mode: OpenMode,
    ) -> Result<Self, LogError> {
        let (path, file, location) = match prepare(&dest.primary, file_name, kind, mode) {
            Ok((path, file)) => (path, file, StreamLocation::Primary),
            Err(primary_err) => {
                warn!(
                    "{} log: primary location unavailable ({primary_err}); using fallback {}",
                    kind.as_str(),
                    dest.fallback.display()
                );
                match prepare(&dest.fallback, file_name, kind, mode) {
                    Ok((path, file)) => (path, file, StreamLocation::Fallback),
                    Err(fallback_err) => {
                        warn!("{} log: fallback failed too: {fallback_err}", kind.as_str());
                        return Err(LogError::NoDestination {
                            primary: dest.primary.join(file_name),
                            fallback: dest.fallback.join(file_name),
                        });
                    }
                }
            }
        };

        info!(
            "{} log -> {} ({:?})",
            kind.as_str(),
            path.display(),
            location
        );
        Ok(Self {
            path,
            location,
            file,
            rows: 0,
            failures: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn location(&self) -> StreamLocation {
        self.location
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn append(&mut self, fields: Vec<String>) -> Result<(), LogError> {
        if let Err(source) = write_row(&mut self.file, fields) {
            self.failures += 1;
            return Err(LogError::Csv {
                path: self.path.clone(),
                source,
            });
        }
        self.rows += 1;
        Ok(())
    }
}

fn prepare(
    dir: &Path,
    file_name: &str,
    kind: StreamKind,
    mode: OpenMode,
) -> Result<(PathBuf, File), LogError> {
    let (path, mut file) = open_in(dir, file_name, mode).map_err(|source| LogError::Io {
        path: dir.join(file_name),
        source,
    })?;
    let empty = file
        .metadata()
        .map(|m| m.len() == 0)
        .map_err(|source| LogError::Io {
            path: path.clone(),
            source,
        })?;
    if empty {
        if let Err(source) = write_row(&mut file, kind.columns()) {
            return Err(LogError::Csv { path, source });
        }
    }
    Ok((path, file))
}

/// Encode one record on its own and hand it to `out` in a single
/// `write_all`. Nothing is buffered between rows, so a row that fails is
/// dropped once and never resent with the next one.
fn write_row<W, I, T>(out: &mut W, fields: I) -> Result<(), csv::Error>
where
    W: Write,
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut encoder = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(128));
    encoder.write_record(fields)?;
    let bytes = encoder
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    out.write_all(&bytes)?;
    out.flush()?;
    Ok(())
}

fn open_in(dir: &Path, file_name: &str, mode: OpenMode) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let mut opts = OpenOptions::new();
    match mode {
        OpenMode::Append => opts.create(true).append(true),
        OpenMode::Truncate => opts.create(true).write(true).truncate(true),
    };
    let file = opts.open(&path)?;
    Ok((path, file))
}

/// The two file-backed streams of one trial (scan) or one run (practice).
pub struct DualStreamLogger {
    continuous: CsvStream,
    discrete: CsvStream,
}

impl DualStreamLogger {
    pub fn open(
        dest: &Destinations,
        session: &SessionConfig,
        trial_id: u32,
        mode: OpenMode,
    ) -> Result<Self, LogError> {
        let c_name = stream_file_name(session, trial_id, StreamKind::Continuous);
        let d_name = stream_file_name(session, trial_id, StreamKind::Discrete);
        Ok(Self {
            continuous: CsvStream::open(dest, &c_name, StreamKind::Continuous, mode)?,
            discrete: CsvStream::open(dest, &d_name, StreamKind::Discrete, mode)?,
        })
    }

    pub fn continuous(&self) -> &CsvStream {
        &self.continuous
    }

    pub fn discrete(&self) -> &CsvStream {
        &self.discrete
    }

    pub fn failed_rows(&self) -> u64 {
        self.continuous.failures() + self.discrete.failures()
    }
}

impl RecordSink for DualStreamLogger {
    fn append_continuous(&mut self, row: &ContinuousRecord) -> Result<(), LogError> {
        self.continuous.append(continuous_fields(row))
    }

    fn append_discrete(&mut self, row: &DiscreteRecord) -> Result<(), LogError> {
        self.discrete.append(discrete_fields(row))
    }

    fn flush(&mut self) -> Result<(), LogError> {
        for s in [&mut self.continuous, &mut self.discrete] {
            s.file.flush().map_err(|source| LogError::Io {
                path: s.path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

fn continuous_fields(row: &ContinuousRecord) -> Vec<String> {
    vec![
        format!("{:.3}", row.wall_clock_time),
        row.trial.to_string(),
        format!("{:.3}", row.trial_time),
        row.phase.as_str().to_string(),
        row.event.map(|e| e.as_str()).unwrap_or("").to_string(),
        format!("{:.3}", row.x),
        format!("{:.3}", row.y),
        format!("{:.3}", row.heading),
    ]
}

fn discrete_fields(row: &DiscreteRecord) -> Vec<String> {
    vec![
        row.trial_id.to_string(),
        row.condition.clone(),
        opt_secs(row.assigned_delay),
        opt_secs(row.time_to_first_move),
        opt_secs(row.time_to_placement),
        format!("{:.2}", row.exploration_duration),
        opt_secs(row.annotation_duration),
        opt_xy(row.target),
        opt_xy(row.annotation),
        row.error_distance()
            .map(|d| format!("{d:.2}"))
            .unwrap_or_default(),
        row.outcome.as_str().to_string(),
    ]
}

fn opt_secs(v: Option<f64>) -> String {
    v.map(|s| format!("{s:.2}")).unwrap_or_default()
}

/// `[x, y]` as a JSON pair rounded to centimeters; empty when absent.
fn opt_xy(v: Option<Vec2>) -> String {
    let round = |c: f32| (c as f64 * 100.0).round() / 100.0;
    v.and_then(|p| serde_json::to_string(&[round(p.x), round(p.y)]).ok())
        .unwrap_or_default()
}
