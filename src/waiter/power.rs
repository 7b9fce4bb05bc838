use super::{Condition, GroupWaiter, PreWaitAction, Target};
use crate::credentials::Credentials;
use crate::error::{PowerError, Result};
use crate::ipmi::OutOfBandPower;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Chassis power state as reported out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "on",
            PowerState::Off => "off",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(PowerState::On),
            "off" => Ok(PowerState::Off),
            other => Err(PowerError::system(format!("Unknown power state '{}'", other))),
        }
    }
}

/// Satisfied once the out-of-band status query reports the requested state.
pub struct PowerStateCondition {
    power: Arc<dyn OutOfBandPower>,
    state: PowerState,
    credentials: Credentials,
}

impl PowerStateCondition {
    pub fn new(power: Arc<dyn OutOfBandPower>, state: PowerState, credentials: Credentials) -> Self {
        Self {
            power,
            state,
            credentials,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }
}

#[async_trait]
impl Condition for PowerStateCondition {
    fn name(&self) -> String {
        format!("IPMI power {}", self.state)
    }

    async fn is_satisfied(&self, target: &Target) -> Result<bool> {
        let current = self
            .power
            .query_power_state(target, &self.credentials)
            .await?;
        Ok(current == self.state)
    }
}

/// Sends the power command for the requested state to every member.
pub struct PowerCommandAction {
    power: Arc<dyn OutOfBandPower>,
    state: PowerState,
    credentials: Credentials,
}

impl PowerCommandAction {
    pub fn new(power: Arc<dyn OutOfBandPower>, state: PowerState, credentials: Credentials) -> Self {
        Self {
            power,
            state,
            credentials,
        }
    }
}

#[async_trait]
impl PreWaitAction for PowerCommandAction {
    async fn run(&self, members: &BTreeSet<Target>) -> Result<()> {
        let mut failed = Vec::new();

        for member in members {
            info!(host = %member, "Sending IPMI power {} command to host {}", self.state, member);
            if let Err(e) = self
                .power
                .send_power_command(member, &self.credentials, self.state)
                .await
            {
                error!(host = %member, "IPMI power {} command failed: {}", self.state, e);
                failed.push(member.as_str());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(PowerError::system(format!(
                "IPMI power {} command failed for: {}",
                self.state,
                failed.join(", ")
            )))
        }
    }
}

/// Waits for all members to reach an IPMI power state, optionally sending
/// the matching power command first.
pub struct PowerStateWaiter {
    inner: GroupWaiter<PowerStateCondition>,
}

impl PowerStateWaiter {
    pub fn new(
        power: Arc<dyn OutOfBandPower>,
        state: PowerState,
        credentials: Credentials,
        timeout: Duration,
        poll_interval: Duration,
        send_command: bool,
    ) -> Self {
        let condition = PowerStateCondition::new(Arc::clone(&power), state, credentials.clone());
        let mut inner = GroupWaiter::new(condition, timeout, poll_interval);

        if send_command {
            inner = inner.with_pre_wait_action(Arc::new(PowerCommandAction::new(
                power,
                state,
                credentials,
            )));
        }

        Self { inner }
    }

    pub fn state(&self) -> PowerState {
        self.inner.condition().state()
    }

    pub async fn wait_for_completion<I>(&self, members: I) -> BTreeSet<Target>
    where
        I: IntoIterator<Item = Target>,
    {
        self.inner.wait_for_completion(members).await
    }
}
