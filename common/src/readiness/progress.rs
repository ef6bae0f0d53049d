// Progress presentation for the readiness wait, kept apart from the state machine

use crate::readiness::gate::ProbeResult;
use std::io::Write;
use std::time::Duration;

/// Receives state-machine milestones for display
pub trait ProgressReporter: Send + Sync {
    fn started(&self) {}

    /// Called after every tick that left the gate WAITING
    fn waiting(&self, pending: &[&ProbeResult]);

    fn ready(&self, elapsed: Duration);

    fn timed_out(&self, elapsed: Duration, pending: &[&ProbeResult]);
}

/// Single rewritten status line on stdout, final verdicts on their own line
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgress;

impl ProgressReporter for ConsoleProgress {
    fn started(&self) {
        println!("⏳ Waiting for servers to be ready...");
    }

    fn waiting(&self, pending: &[&ProbeResult]) {
        let waiting_for: Vec<String> = pending
            .iter()
            .map(|p| format!("{} ({})", p.name, p.url))
            .collect();

        let mut stdout = std::io::stdout().lock();
        // Progress output is best-effort
        let _ = write!(stdout, "\r⏳ Waiting for {}...", waiting_for.join(", "));
        let _ = stdout.flush();
    }

    fn ready(&self, elapsed: Duration) {
        println!("\n✅ Both servers are ready! ({:.1}s)", elapsed.as_secs_f64());
    }

    fn timed_out(&self, elapsed: Duration, pending: &[&ProbeResult]) {
        eprintln!(
            "\n❌ Timeout after {}s waiting for servers",
            elapsed.as_secs()
        );
        for probe in pending {
            eprintln!("   - {} did not become ready: {}", probe.name, probe.url);
        }
    }
}

/// Progress through `tracing` only, for non-interactive runs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn waiting(&self, pending: &[&ProbeResult]) {
        for probe in pending {
            tracing::info!(probe = %probe.name, url = %probe.url, "Waiting for endpoint");
        }
    }

    fn ready(&self, elapsed: Duration) {
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "All endpoints ready");
    }

    fn timed_out(&self, elapsed: Duration, pending: &[&ProbeResult]) {
        for probe in pending {
            tracing::error!(
                probe = %probe.name,
                url = %probe.url,
                elapsed_ms = elapsed.as_millis() as u64,
                "Endpoint did not become ready"
            );
        }
    }
}
