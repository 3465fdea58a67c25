//! Run settings: a JSON file overlaid with the process environment.

use std::fs;
use std::path::{Path, PathBuf};

use navtrial::config::{EngineConfig, SessionConfig};
use navtrial::logger::Destinations;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RunError;
use crate::paths::AppPaths;

/// Unix time of the scanner pulse the run is aligned to.
pub const TRIGGER_TIME_VAR: &str = "TRIGGER_RECEIVED_TIME";
/// Shared results root; per-participant folders are created below it.
pub const RESULTS_DIR_VAR: &str = "CENTRALIZED_RESULTS_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub engine: EngineConfig,
    pub session: SessionConfig,
    /// Primary results root.
    pub results_dir: Option<PathBuf>,
    /// Input script; the built-in demo runs when absent.
    pub script: Option<PathBuf>,
    pub reference_time: Option<f64>,
}

impl RunSettings {
    /// Read `path`, or the config file in the data dir when present, or
    /// fall back to defaults.
    pub fn load(path: Option<&Path>, paths: &AppPaths) -> Result<Self, RunError> {
        let default_file = paths.config_file();
        let path = match path {
            Some(p) => p,
            None if default_file.exists() => default_file.as_path(),
            None => {
                info!("no config file, using defaults");
                return Ok(Self::default());
            }
        };
        let text = fs::read_to_string(path).map_err(|source| RunError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&text).map_err(|source| RunError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        info!("loaded run settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Overlay environment variables. `lookup` is `std::env::var` in
    /// production.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(TRIGGER_TIME_VAR) {
            match raw.trim().parse::<f64>() {
                Ok(t) if t.is_finite() => self.reference_time = Some(t),
                _ => warn!("ignoring {TRIGGER_TIME_VAR}={raw:?}: not a timestamp"),
            }
        }
        if let Some(dir) = lookup(RESULTS_DIR_VAR).filter(|d| !d.trim().is_empty()) {
            self.results_dir = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn validate(&self) -> Result<(), RunError> {
        self.engine.validate()?;
        self.session.validate()?;
        Ok(())
    }

    pub fn destinations(&self, paths: &AppPaths) -> Destinations {
        let participant = &self.session.participant_id;
        let local = paths.fallback_results_dir(participant);
        match &self.results_dir {
            Some(root) => Destinations {
                primary: root.join(participant),
                fallback: local,
            },
            None => Destinations {
                primary: local,
                fallback: std::env::temp_dir().join("navtrial").join(participant),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navtrial::config::{RunMode, Visibility};

    #[test]
    fn partial_file_keeps_defaults() {
        let s = RunSettings::from_json(
            r#"{ "session": { "participant_id": "TS263", "mode": "scan", "total_trials": 3 },
                 "engine": { "visibility": "limited" } }"#,
        )
        .unwrap();
        assert_eq!(s.session.participant_id, "TS263");
        assert_eq!(s.session.mode, RunMode::Scan);
        assert_eq!(s.session.trial_index, 1);
        assert_eq!(s.engine.visibility, Visibility::Limited);
        assert_eq!(s.engine.tr.tr_s, 2.01);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn environment_overrides_file() {
        let s = RunSettings {
            results_dir: Some(PathBuf::from("/from/file")),
            ..RunSettings::default()
        }
        .with_env(|k| match k {
            TRIGGER_TIME_VAR => Some("1700000000.25".to_string()),
            RESULTS_DIR_VAR => Some("/shared/results".to_string()),
            _ => None,
        });
        assert_eq!(s.reference_time, Some(1_700_000_000.25));
        assert_eq!(s.results_dir, Some(PathBuf::from("/shared/results")));
    }

    #[test]
    fn malformed_trigger_is_ignored() {
        let s = RunSettings::default().with_env(|k| {
            (k == TRIGGER_TIME_VAR).then(|| "soon".to_string())
        });
        assert_eq!(s.reference_time, None);
    }

    #[test]
    fn destinations_prefer_shared_root() {
        let paths = AppPaths::at(PathBuf::from("/data/navtrial"));
        let mut s = RunSettings::default();
        let local = s.destinations(&paths);
        assert_eq!(local.primary, PathBuf::from("/data/navtrial/results/TEST"));

        s.results_dir = Some(PathBuf::from("/shared"));
        let shared = s.destinations(&paths);
        assert_eq!(shared.primary, PathBuf::from("/shared/TEST"));
        assert_eq!(shared.fallback, local.primary);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let paths = AppPaths::at(std::env::temp_dir().join("navrun-settings-none"));
        let err = RunSettings::load(Some(Path::new("/definitely/not/here.json")), &paths);
        assert!(matches!(err, Err(RunError::Io { .. })));
    }
}
