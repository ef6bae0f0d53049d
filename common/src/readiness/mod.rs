// Readiness gate: poll service endpoints until all answer or the deadline passes

pub mod gate;
pub mod probe;
pub mod progress;

pub use gate::{ProbeResult, ReadinessGate, ReadinessState};
pub use probe::{HttpProbe, Probe};
pub use progress::{ConsoleProgress, LogProgress, ProgressReporter};

use crate::config::LauncherConfig;
use crate::errors::ReadinessError;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Timing of the readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOptions {
    /// Overall budget measured from entering WAITING
    pub deadline: Duration,
    /// Delay between the end of one tick and the start of the next
    pub interval: Duration,
    /// Upper bound for each individual probe
    pub probe_timeout: Duration,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60),
            interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&LauncherConfig> for ReadinessOptions {
    fn from(config: &LauncherConfig) -> Self {
        Self {
            deadline: config.max_wait(),
            interval: config.check_interval(),
            probe_timeout: config.probe_timeout(),
        }
    }
}

/// HTTP probes for the UI dev server and the backend health endpoint
pub fn http_probes(config: &LauncherConfig) -> Result<Vec<Arc<dyn Probe>>, ReadinessError> {
    let timeout = config.probe_timeout();
    Ok(vec![
        Arc::new(HttpProbe::new("frontend", &config.frontend_url, timeout)?) as Arc<dyn Probe>,
        Arc::new(HttpProbe::new("backend", &config.backend_url, timeout)?) as Arc<dyn Probe>,
    ])
}

/// Run every probe concurrently; a probe that overruns `timeout` counts as failed
pub async fn run_tick(probes: &[Arc<dyn Probe>], timeout: Duration) -> Vec<ProbeResult> {
    join_all(probes.iter().map(|probe| async move {
        let ready = tokio::time::timeout(timeout, probe.check())
            .await
            .unwrap_or(false);
        ProbeResult {
            name: probe.name().to_string(),
            url: probe.target().to_string(),
            ready,
        }
    }))
    .await
}

/// Poll `probes` until all succeed in the same tick or the deadline passes
///
/// Returns the time spent waiting on success.
#[tracing::instrument(skip(probes, progress), fields(probes = probes.len()))]
pub async fn wait_until_ready(
    probes: &[Arc<dyn Probe>],
    options: &ReadinessOptions,
    progress: &dyn ProgressReporter,
) -> Result<Duration, ReadinessError> {
    let started = Instant::now();
    let mut gate = ReadinessGate::new(options.deadline);
    progress.started();

    loop {
        if gate.expire(started.elapsed()) == ReadinessState::TimedOut {
            return Err(timed_out(&gate, started.elapsed(), progress));
        }

        let results = run_tick(probes, options.probe_timeout).await;
        let elapsed = started.elapsed();

        match gate.observe(elapsed, results) {
            ReadinessState::Ready => {
                tracing::info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    ticks = gate.ticks(),
                    "All endpoints ready"
                );
                progress.ready(elapsed);
                return Ok(elapsed);
            }
            ReadinessState::TimedOut => {
                return Err(timed_out(&gate, elapsed, progress));
            }
            ReadinessState::Waiting => {
                progress.waiting(&gate.pending());
            }
        }

        let remaining = options.deadline.saturating_sub(started.elapsed());
        tokio::time::sleep(options.interval.min(remaining)).await;
    }
}

fn timed_out(
    gate: &ReadinessGate,
    elapsed: Duration,
    progress: &dyn ProgressReporter,
) -> ReadinessError {
    let pending = gate.pending_names();
    tracing::error!(
        elapsed_ms = elapsed.as_millis() as u64,
        pending = ?pending,
        "Timed out waiting for endpoints"
    );
    progress.timed_out(elapsed, &gate.pending());
    ReadinessError::TimedOut { elapsed, pending }
}
