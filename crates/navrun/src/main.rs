//! navrun - headless runner for the navigation trial engine
//!
//! Runs one invocation (a practice run, or a block of scan trials) from a
//! JSON settings file and an input script, writing the continuous and
//! discrete CSV logs.
//!
//! Usage: `navrun [settings.json]`. Without an argument the settings file in
//! the data dir is used when present, otherwise the defaults.
//!
//! Environment:
//! - `TRIGGER_RECEIVED_TIME`: unix time of the scanner pulse to align to
//! - `CENTRALIZED_RESULTS_DIR`: shared results root
//! - `RUST_LOG`: log filter (default `info`)

use std::path::PathBuf;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod error;
mod paths;
mod script;
mod session;
mod settings;

use paths::AppPaths;
use script::{InputScript, ScriptedInput};
use session::{AbortFlag, Clock, HeadlessAudio, HeadlessSurface, Runner};
use settings::RunSettings;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let paths = AppPaths::new()?;
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = RunSettings::load(config_path.as_deref(), &paths)?
        .with_env(|key| std::env::var(key).ok());
    settings.validate()?;

    let script = match &settings.script {
        Some(path) => InputScript::load(path)?,
        None => {
            info!("no input script configured, running the demo walk");
            InputScript::demo()
        }
    };
    let input = ScriptedInput::new(script)?;
    info!("input script {:?}: {} segment(s)", input.name(), input.len());

    let dest = settings.destinations(&paths);
    info!(
        "{} run for {}: trials {:?}, {} visibility, results in {}",
        settings.session.mode.as_str(),
        settings.session.participant_id,
        settings.session.trial_ids(),
        settings.engine.visibility.as_str(),
        dest.primary.display()
    );

    // Ctrl-C stops the run cooperatively so the partial rows still get written.
    let abort = AbortFlag::new();
    {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C: aborting run");
                abort.raise();
            }
        });
    }

    let mut runner = Runner::new(
        input,
        HeadlessSurface::default(),
        HeadlessAudio::default(),
        Clock::start(),
        abort,
    );
    let summary = match runner.run(&settings, &dest).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("run failed: {e}");
            return Err(e.into());
        }
    };

    for file in &summary.files {
        info!("wrote {}", file.display());
    }
    if summary.failed_rows > 0 {
        warn!("{} row(s) could not be written", summary.failed_rows);
    }
    if summary.aborted {
        warn!("stopped early after {} trial(s)", summary.trials_completed);
    }
    Ok(())
}
