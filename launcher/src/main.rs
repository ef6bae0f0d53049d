use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use common::bootstrap;
use common::launch::{Orchestrator, ProcessSpawner, ShellCommand};
use common::readiness::{self, ConsoleProgress, LogProgress, ProgressReporter, ReadinessOptions};
use common::shell::{LoadTarget, ShellMode};

/// Built UI bundle, relative to the working directory
const DIST_DIR: &str = "frontend/dist";

#[tokio::main]
async fn main() -> Result<()> {
    let config = bootstrap::init_launcher_settings()?;

    let probes = readiness::http_probes(&config).context("Failed to build readiness probes")?;
    let options = ReadinessOptions::from(&config);

    let mode = ShellMode::from_env_value(Some(config.shell_mode.as_str()));
    let dist_dir = std::env::current_dir()
        .context("Failed to resolve working directory")?
        .join(Path::new(DIST_DIR));
    let target = LoadTarget::for_mode(mode, &dist_dir);
    let mut command = ShellCommand::from_config(&config);
    if let Some(url) = target.url() {
        command = command.with_env("APP_LOAD_URL", url.as_str());
    }
    tracing::info!(mode = ?mode, target = ?target, "Resolved shell load target");

    let progress: Arc<dyn ProgressReporter> = if std::io::stdout().is_terminal() {
        Arc::new(ConsoleProgress)
    } else {
        Arc::new(LogProgress)
    };

    let orchestrator = Orchestrator::new(
        probes,
        options,
        command,
        Arc::new(ProcessSpawner),
        progress,
    );

    match orchestrator.run().await {
        Ok(code) => {
            tracing::info!(exit_code = code, "Desktop shell finished");
            std::process::exit(code);
        }
        Err(e) => {
            tracing::error!(error = %e, "Launcher failed");
            eprintln!("❌ Failed to start. Make sure backend and frontend servers are running.");
            std::process::exit(e.exit_code());
        }
    }
}
