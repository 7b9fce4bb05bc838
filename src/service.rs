//! Transient service activation scoped to one stage.

use crate::config::ServiceConfig;
use crate::error::{PowerError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn is_active(&self, service: &str) -> Result<bool>;
    async fn start(&self, service: &str) -> Result<()>;
    async fn stop(&self, service: &str) -> Result<()>;
}

/// `systemctl` backed service control.
pub struct SystemctlService {
    program: String,
}

impl SystemctlService {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            program: config.systemctl.clone(),
        }
    }

    async fn systemctl(&self, verb: &str, service: &str) -> Result<std::process::Output> {
        debug!("Running `{} {} {}`", self.program, verb, service);
        Command::new(&self.program)
            .args([verb, service])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PowerError::ToolNotFound {
                program: self.program.clone(),
                source: e,
            })
    }

    async fn checked(&self, verb: &str, service: &str) -> Result<()> {
        let output = self.systemctl(verb, service).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(PowerError::service(
                service,
                format!(
                    "systemctl {} failed: {}",
                    verb,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ))
        }
    }
}

#[async_trait]
impl ServiceControl for SystemctlService {
    async fn is_active(&self, service: &str) -> Result<bool> {
        // `is-active` exits non-zero for inactive units
        Ok(self.systemctl("is-active", service).await?.status.success())
    }

    async fn start(&self, service: &str) -> Result<()> {
        self.checked("start", service).await
    }

    async fn stop(&self, service: &str) -> Result<()> {
        self.checked("stop", service).await
    }
}

/// Keeps a service running for the duration of a stage.
///
/// A service that was already active beforehand is left running.
pub struct RunningService {
    control: Arc<dyn ServiceControl>,
    name: String,
    settle_delay: Duration,
}

impl RunningService {
    pub fn new<S: Into<String>>(
        control: Arc<dyn ServiceControl>,
        name: S,
        settle_delay: Duration,
    ) -> Self {
        Self {
            control,
            name: name.into(),
            settle_delay,
        }
    }

    pub fn from_config(control: Arc<dyn ServiceControl>, config: &ServiceConfig) -> Self {
        Self::new(
            control,
            config.name.clone(),
            Duration::from_secs(config.settle_delay_secs),
        )
    }

    /// Start the service, run `body`, then stop the service again whatever
    /// `body` returned.
    pub async fn run<F, T>(&self, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let was_active = match self.control.is_active(&self.name).await {
            Ok(active) => active,
            Err(e) => {
                debug!(service = %self.name, "Unable to query service state: {}", e);
                false
            }
        };

        if was_active {
            info!(service = %self.name, "Service {} already running", self.name);
        } else {
            info!(service = %self.name, "Starting service {}", self.name);
            self.control.start(&self.name).await?;
            tokio::time::sleep(self.settle_delay).await;
        }

        let outcome = body.await;

        if !was_active {
            info!(service = %self.name, "Stopping service {}", self.name);
            if let Err(e) = self.control.stop(&self.name).await {
                error!(service = %self.name, "Failed to stop service {}: {}", self.name, e);
            }
        }

        outcome
    }
}
