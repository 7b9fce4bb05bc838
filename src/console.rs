use crate::config::ConsoleConfig;
use crate::error::{PowerError, Result};
use crate::waiter::Target;
use async_trait::async_trait;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Starts and stops console capture for a set of hosts.
#[async_trait]
pub trait ConsoleLogControl: Send + Sync {
    async fn start(&self, targets: &[Target]) -> Result<()>;
    async fn stop(&self, targets: &[Target]) -> Result<()>;
}

/// Runs the configured start/stop scripts with the hostnames as arguments.
pub struct ScriptConsoleLogger {
    start_command: String,
    stop_command: String,
}

impl ScriptConsoleLogger {
    pub fn new(config: &ConsoleConfig) -> Self {
        Self {
            start_command: config.start_command.clone(),
            stop_command: config.stop_command.clone(),
        }
    }

    async fn invoke(&self, program: &str, targets: &[Target]) -> Result<()> {
        debug!("Running `{}` for {} host(s)", program, targets.len());
        let output = Command::new(program)
            .args(targets.iter().map(|t| t.as_str()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PowerError::ToolNotFound {
                program: program.to_string(),
                source: e,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(PowerError::CommandFailed {
                program: program.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl ConsoleLogControl for ScriptConsoleLogger {
    async fn start(&self, targets: &[Target]) -> Result<()> {
        self.invoke(&self.start_command, targets).await
    }

    async fn stop(&self, targets: &[Target]) -> Result<()> {
        self.invoke(&self.stop_command, targets).await
    }
}

/// Console logging kept open across a stage.
pub struct ConsoleLogSession {
    control: Arc<dyn ConsoleLogControl>,
    targets: Vec<Target>,
}

impl ConsoleLogSession {
    pub fn new(control: Arc<dyn ConsoleLogControl>, targets: Vec<Target>) -> Self {
        Self { control, targets }
    }

    /// Open the session, run `body`, and close the session on every exit
    /// path. Console capture is auxiliary: failing to open it only warns.
    pub async fn run<F, T>(&self, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        info!(hosts = self.targets.len(), "Starting console logging");
        let opened = match self.control.start(&self.targets).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Unable to start console logging, continuing without it: {}", e);
                false
            }
        };

        let outcome = body.await;

        if opened {
            info!(hosts = self.targets.len(), "Stopping console logging");
            if let Err(e) = self.control.stop(&self.targets).await {
                error!("Failed to stop console logging: {}", e);
            }
        }

        outcome
    }
}
