//! Cross-platform application paths

use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, String> {
        let data_dir = Self::get_data_dir()?;

        fs::create_dir_all(&data_dir)
            .map_err(|e| format!("Failed to create data directory: {}", e))?;

        Ok(Self { data_dir })
    }

    /// Rooted somewhere other than the OS data dir (tests, portable installs).
    pub fn at(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn get_data_dir() -> Result<PathBuf, String> {
        let base = dirs::data_dir().ok_or("Could not determine data directory")?;
        Ok(base.join("navtrial"))
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Local results directory, used when the shared results root is
    /// unset or unwritable.
    pub fn fallback_results_dir(&self, participant: &str) -> PathBuf {
        self.data_dir.join("results").join(participant)
    }
}
