// Readiness-gated launch of the desktop shell process

use crate::config::LauncherConfig;
use crate::errors::{LaunchError, ReadinessError};
use crate::readiness::{wait_until_ready, Probe, ProgressReporter, ReadinessOptions};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;

/// Exit status reported when the shell ends without a code (killed by a signal)
pub const SIGNALLED_EXIT_CODE: i32 = 1;

/// Process to start once every endpoint is ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl ShellCommand {
    pub fn from_config(config: &LauncherConfig) -> Self {
        Self {
            program: config.shell_program.clone(),
            args: config.shell_args(),
            env: vec![("NODE_ENV".to_string(), config.shell_mode.clone())],
            current_dir: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Starts the shell and waits for it to exit
#[async_trait]
pub trait ShellSpawner: Send + Sync {
    /// Run `command` to completion and return its exit code
    async fn run(&self, command: &ShellCommand) -> Result<i32, LaunchError>;
}

/// Spawns a real child process sharing this process's stdio
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSpawner;

#[async_trait]
impl ShellSpawner for ProcessSpawner {
    #[tracing::instrument(skip(self), fields(program = %command.program))]
    async fn run(&self, command: &ShellCommand) -> Result<i32, LaunchError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        tracing::info!(pid = child.id(), "Shell process started");

        let status = child.wait().await.map_err(LaunchError::Wait)?;
        let code = status.code().unwrap_or(SIGNALLED_EXIT_CODE);
        tracing::info!(exit_code = code, "Shell process exited");
        Ok(code)
    }
}

/// Why the orchestrator did not hand off to the shell
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl OrchestratorError {
    /// Exit status for the orchestrator process
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Waits for the probes, then runs the shell exactly once
pub struct Orchestrator {
    probes: Vec<Arc<dyn Probe>>,
    options: ReadinessOptions,
    command: ShellCommand,
    spawner: Arc<dyn ShellSpawner>,
    progress: Arc<dyn ProgressReporter>,
}

impl Orchestrator {
    pub fn new(
        probes: Vec<Arc<dyn Probe>>,
        options: ReadinessOptions,
        command: ShellCommand,
        spawner: Arc<dyn ShellSpawner>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            probes,
            options,
            command,
            spawner,
            progress,
        }
    }

    /// Returns the shell's exit code; no process is started on timeout
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<i32, OrchestratorError> {
        wait_until_ready(&self.probes, &self.options, self.progress.as_ref()).await?;

        tracing::info!(
            program = %self.command.program,
            args = ?self.command.args,
            "Launching desktop shell"
        );
        let code = self.spawner.run(&self.command).await?;
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::ProbeResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedProbe {
        name: &'static str,
        ready: bool,
    }

    #[async_trait]
    impl Probe for FixedProbe {
        fn name(&self) -> &str {
            self.name
        }

        fn target(&self) -> &str {
            "test://fixed"
        }

        async fn check(&self) -> bool {
            self.ready
        }
    }

    #[derive(Default)]
    struct CountingSpawner {
        launches: AtomicUsize,
        exit_code: i32,
    }

    #[async_trait]
    impl ShellSpawner for CountingSpawner {
        async fn run(&self, _command: &ShellCommand) -> Result<i32, LaunchError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(self.exit_code)
        }
    }

    struct QuietProgress;

    impl ProgressReporter for QuietProgress {
        fn waiting(&self, _pending: &[&ProbeResult]) {}
        fn ready(&self, _elapsed: Duration) {}
        fn timed_out(&self, _elapsed: Duration, _pending: &[&ProbeResult]) {}
    }

    fn orchestrator(
        frontend_ready: bool,
        backend_ready: bool,
        spawner: Arc<CountingSpawner>,
    ) -> Orchestrator {
        Orchestrator::new(
            vec![
                Arc::new(FixedProbe {
                    name: "frontend",
                    ready: frontend_ready,
                }) as Arc<dyn Probe>,
                Arc::new(FixedProbe {
                    name: "backend",
                    ready: backend_ready,
                }) as Arc<dyn Probe>,
            ],
            ReadinessOptions {
                deadline: Duration::from_secs(5),
                interval: Duration::from_secs(2),
                probe_timeout: Duration::from_secs(2),
            },
            ShellCommand::from_config(&LauncherConfig::default()),
            spawner,
            Arc::new(QuietProgress),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawns_exactly_once_when_ready() {
        let spawner = Arc::new(CountingSpawner {
            exit_code: 7,
            ..Default::default()
        });

        let code = orchestrator(true, true, spawner.clone()).run().await.unwrap();

        assert_eq!(code, 7);
        assert_eq!(spawner.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_spawns_on_timeout() {
        let spawner = Arc::new(CountingSpawner::default());

        let err = orchestrator(true, false, spawner.clone())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Readiness(ReadinessError::TimedOut { .. })
        ));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(spawner.launches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shell_command_from_config() {
        let command = ShellCommand::from_config(&LauncherConfig::default())
            .with_env("APP_LOAD_URL", "http://localhost:5173");
        assert_eq!(command.program, "electron");
        assert_eq!(command.args, vec![".".to_string()]);
        assert!(command
            .env
            .contains(&("NODE_ENV".to_string(), "development".to_string())));
        assert_eq!(command.env.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let command = ShellCommand {
            program: "definitely-not-a-real-shell-binary".to_string(),
            args: vec![],
            env: vec![],
            current_dir: None,
        };

        let err = ProcessSpawner.run(&command).await.unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_propagated() {
        let command = ShellCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "exit 3".to_string()],
            env: vec![],
            current_dir: None,
        };

        assert_eq!(ProcessSpawner.run(&command).await.unwrap(), 3);
    }
}
