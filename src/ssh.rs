//! In-band remote execution.
//!
//! [`RemoteShell`] opens sessions to hosts through their running OS.
//! [`OpenSshClient`] drives the system `ssh` binary in batch mode, so host
//! keys and agent/key-based auth follow the operator's normal SSH setup.

use crate::config::SshConfig;
use crate::error::{PowerError, Result};
use crate::waiter::Target;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Open a channel to the host. Fails on socket, host key or auth errors.
    async fn connect(&self, target: &Target) -> Result<Box<dyn RemoteSession>>;
}

#[async_trait]
pub trait RemoteSession: Send {
    /// Start a command on the remote host without waiting for it to finish.
    async fn execute(&mut self, command: &str) -> Result<()>;

    /// Close any open command channels.
    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct OpenSshClient {
    program: String,
    user: Option<String>,
    connect_timeout: Duration,
    known_hosts_file: Option<String>,
}

impl OpenSshClient {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            program: config.program.clone(),
            user: config.user.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            known_hosts_file: config.known_hosts_file.clone(),
        }
    }

    fn base_args(&self, target: &Target) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
        ];
        if let Some(known_hosts) = &self.known_hosts_file {
            args.push("-o".to_string());
            args.push(format!("UserKnownHostsFile={}", known_hosts));
        }
        if let Some(user) = &self.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        args.push(target.to_string());
        args
    }

    fn spawn_error(&self, e: std::io::Error) -> PowerError {
        if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) {
            PowerError::ToolNotFound {
                program: self.program.clone(),
                source: e,
            }
        } else {
            PowerError::Io(e)
        }
    }
}

#[async_trait]
impl RemoteShell for OpenSshClient {
    async fn connect(&self, target: &Target) -> Result<Box<dyn RemoteSession>> {
        let mut args = self.base_args(target);
        args.push("true".to_string());

        let probe = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        // ConnectTimeout only bounds the TCP connect; leave room for auth.
        let limit = self.connect_timeout * 2;
        let output = tokio::time::timeout(limit, probe)
            .await
            .map_err(|_| PowerError::ssh(target.as_str(), "connection attempt timed out"))?
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(PowerError::ssh(
                target.as_str(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(Box::new(OpenSshSession {
            client: self.clone(),
            target: target.clone(),
            children: Vec::new(),
        }))
    }
}

pub struct OpenSshSession {
    client: OpenSshClient,
    target: Target,
    children: Vec<Child>,
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn execute(&mut self, command: &str) -> Result<()> {
        let mut args = self.client.base_args(&self.target);
        args.push(command.to_string());

        let child = Command::new(&self.client.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.client.spawn_error(e))?;

        self.children.push(child);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        for mut child in self.children.drain(..) {
            match tokio::time::timeout(self.client.connect_timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(host = %self.target, "Remote command channel closed: {}", status);
                }
                Ok(Err(e)) => {
                    warn!(host = %self.target, "Error waiting for remote command: {}", e);
                }
                Err(_) => {
                    // A host going down can leave the channel hanging
                    debug!(host = %self.target, "Remote command still running, closing channel");
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }
}
