//! Out-of-band power control.
//!
//! [`OutOfBandPower`] is the capability the waiters consume;
//! [`IpmitoolClient`] implements it by shelling out to `ipmitool` against
//! each host's BMC.

use crate::config::IpmiConfig;
use crate::credentials::Credentials;
use crate::error::{PowerError, Result};
use crate::waiter::{PowerState, Target};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

/// Variable ipmitool reads the password from when given `-E`.
const PASSWORD_ENV: &str = "IPMI_PASSWORD";

#[async_trait]
pub trait OutOfBandPower: Send + Sync {
    async fn query_power_state(&self, target: &Target, credentials: &Credentials)
        -> Result<PowerState>;

    async fn send_power_command(
        &self,
        target: &Target,
        credentials: &Credentials,
        state: PowerState,
    ) -> Result<()>;
}

pub struct IpmitoolClient {
    program: String,
    interface: String,
    host_suffix: String,
    command_timeout: Duration,
}

impl IpmitoolClient {
    pub fn new(config: &IpmiConfig) -> Self {
        Self {
            program: config.program.clone(),
            interface: config.interface.clone(),
            host_suffix: config.host_suffix.clone(),
            command_timeout: config.command_timeout(),
        }
    }

    /// BMC address for a host.
    pub fn bmc_host(&self, target: &Target) -> String {
        format!("{}{}", target, self.host_suffix)
    }

    /// Arguments for one ipmitool call. The password travels in
    /// `IPMI_PASSWORD` (`-E`) so it never shows up in the process list.
    fn command_args(&self, target: &Target, credentials: &Credentials, command: &[&str]) -> Vec<String> {
        let mut args = vec![
            "-I".to_string(),
            self.interface.clone(),
            "-U".to_string(),
            credentials.username().to_string(),
            "-E".to_string(),
            "-H".to_string(),
            self.bmc_host(target),
        ];
        args.extend(command.iter().map(|s| s.to_string()));
        args
    }

    async fn run(&self, target: &Target, credentials: &Credentials, command: &[&str]) -> Result<String> {
        let args = self.command_args(target, credentials, command);
        debug!(host = %target, "Running `{} {}`", self.program, args.join(" "));

        let child = Command::new(&self.program)
            .args(&args)
            .env(PASSWORD_ENV, credentials.password())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.command_timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                return Err(PowerError::ToolNotFound {
                    program: self.program.clone(),
                    source: e,
                });
            }
            Ok(Err(e)) => return Err(PowerError::Io(e)),
            Err(_) => {
                return Err(PowerError::CommandTimeout {
                    program: self.program.clone(),
                    seconds: self.command_timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(PowerError::CommandFailed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        trace!(host = %target, stdout = %stdout, "ipmitool output");
        Ok(stdout)
    }
}

/// Parse `chassis power status` output, e.g. `Chassis Power is on`.
///
/// The state is whichever of the words `on` / `off` the output contains.
/// Output naming neither, or both, is an error.
pub fn parse_power_status(stdout: &str) -> Result<PowerState> {
    let lower = stdout.to_ascii_lowercase();
    let has_word = |word: &str| {
        lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|w| w == word)
    };

    match (has_word("on"), has_word("off")) {
        (true, false) => Ok(PowerState::On),
        (false, true) => Ok(PowerState::Off),
        _ => Err(PowerError::system(format!(
            "Unexpected power status output: '{}'",
            stdout.trim()
        ))),
    }
}

#[async_trait]
impl OutOfBandPower for IpmitoolClient {
    async fn query_power_state(
        &self,
        target: &Target,
        credentials: &Credentials,
    ) -> Result<PowerState> {
        let stdout = self
            .run(target, credentials, &["chassis", "power", "status"])
            .await?;
        parse_power_status(&stdout)
    }

    async fn send_power_command(
        &self,
        target: &Target,
        credentials: &Credentials,
        state: PowerState,
    ) -> Result<()> {
        self.run(target, credentials, &["chassis", "power", state.as_str()])
            .await?;
        Ok(())
    }
}
