use super::{Condition, GroupWaiter, Target};
use crate::error::Result;
use crate::ssh::RemoteShell;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Satisfied once an SSH connection to the target opens. No command is run.
pub struct SshAvailableCondition {
    shell: Arc<dyn RemoteShell>,
}

impl SshAvailableCondition {
    pub fn new(shell: Arc<dyn RemoteShell>) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl Condition for SshAvailableCondition {
    fn name(&self) -> String {
        "Hosts accessible via SSH".to_string()
    }

    async fn is_satisfied(&self, target: &Target) -> Result<bool> {
        let mut session = self.shell.connect(target).await?;
        if let Err(e) = session.close().await {
            debug!(host = %target, "Error closing probe session: {}", e);
        }
        Ok(true)
    }
}

/// Waits for all members to accept SSH connections. The same shell client
/// is shared by every probe of the run.
pub struct SshAvailableWaiter {
    inner: GroupWaiter<SshAvailableCondition>,
}

impl SshAvailableWaiter {
    pub fn new(shell: Arc<dyn RemoteShell>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            inner: GroupWaiter::new(SshAvailableCondition::new(shell), timeout, poll_interval),
        }
    }

    pub async fn wait_for_completion<I>(&self, members: I) -> BTreeSet<Target>
    where
        I: IntoIterator<Item = Target>,
    {
        self.inner.wait_for_completion(members).await
    }
}
