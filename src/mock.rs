//! In-memory collaborators for testing and dry runs without real hardware.
//!
//! Every mock can share a [`CallJournal`] so a test can assert the order in
//! which the orchestrator touched different collaborators.

use crate::console::ConsoleLogControl;
use crate::credentials::Credentials;
use crate::error::{PowerError, Result};
use crate::hosts::NameResolution;
use crate::ipmi::OutOfBandPower;
use crate::service::ServiceControl;
use crate::ssh::{RemoteSession, RemoteShell};
use crate::waiter::{PowerState, Target};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Ordered record of calls shared between mocks.
pub type CallJournal = Arc<Mutex<Vec<String>>>;

pub fn new_journal() -> CallJournal {
    Arc::new(Mutex::new(Vec::new()))
}

#[derive(Default)]
struct PowerInner {
    states: HashMap<Target, PowerState>,
    /// State that shows up after the given number of further status queries
    scheduled: HashMap<Target, (PowerState, u32)>,
    lag: HashMap<Target, u32>,
    stuck: HashSet<Target>,
    fail_commands: HashSet<Target>,
    fail_queries: HashSet<Target>,
    commands: Vec<(Target, PowerState)>,
    queries: HashMap<Target, u32>,
}

impl PowerInner {
    fn schedule(&mut self, target: Target, state: PowerState, after_queries: u32) {
        if after_queries == 0 {
            self.scheduled.remove(&target);
            self.states.insert(target, state);
        } else {
            self.scheduled.insert(target, (state, after_queries));
        }
    }
}

/// Simulated BMCs.
pub struct MockPower {
    inner: Mutex<PowerInner>,
    journal: CallJournal,
}

impl MockPower {
    pub fn new() -> Self {
        Self::with_journal(new_journal())
    }

    pub fn with_journal(journal: CallJournal) -> Self {
        Self {
            inner: Mutex::new(PowerInner::default()),
            journal,
        }
    }

    pub fn set_state(&self, host: &str, state: PowerState) {
        self.inner.lock().states.insert(Target::from(host), state);
    }

    /// Change state on its own once `after_queries` more status queries land.
    pub fn schedule_state(&self, host: &str, state: PowerState, after_queries: u32) {
        self.inner
            .lock()
            .schedule(Target::from(host), state, after_queries);
    }

    /// Delay, in status queries, before a power command takes effect.
    pub fn set_lag(&self, host: &str, queries: u32) {
        self.inner.lock().lag.insert(Target::from(host), queries);
    }

    /// Accept power commands for `host` but never change its state.
    pub fn ignore_commands(&self, host: &str) {
        self.inner.lock().stuck.insert(Target::from(host));
    }

    pub fn fail_commands(&self, host: &str) {
        self.inner.lock().fail_commands.insert(Target::from(host));
    }

    pub fn fail_queries(&self, host: &str) {
        self.inner.lock().fail_queries.insert(Target::from(host));
    }

    pub fn state(&self, host: &str) -> Option<PowerState> {
        self.inner.lock().states.get(&Target::from(host)).copied()
    }

    pub fn commands(&self) -> Vec<(Target, PowerState)> {
        self.inner.lock().commands.clone()
    }

    pub fn commands_for(&self, host: &str) -> Vec<PowerState> {
        let target = Target::from(host);
        self.inner
            .lock()
            .commands
            .iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn status_queries(&self, host: &str) -> u32 {
        self.inner
            .lock()
            .queries
            .get(&Target::from(host))
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MockPower {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutOfBandPower for MockPower {
    async fn query_power_state(
        &self,
        target: &Target,
        _credentials: &Credentials,
    ) -> Result<PowerState> {
        let mut inner = self.inner.lock();
        *inner.queries.entry(target.clone()).or_insert(0) += 1;

        if inner.fail_queries.contains(target) {
            return Err(PowerError::CommandFailed {
                program: "mock-ipmi".to_string(),
                code: Some(1),
                stderr: "Unable to establish IPMI v2 / RMCP+ session".to_string(),
            });
        }

        let due = match inner.scheduled.get_mut(target) {
            Some((state, remaining)) if *remaining <= 1 => Some(*state),
            Some((_, remaining)) => {
                *remaining -= 1;
                None
            }
            None => None,
        };
        if let Some(state) = due {
            inner.scheduled.remove(target);
            inner.states.insert(target.clone(), state);
        }

        inner
            .states
            .get(target)
            .copied()
            .ok_or_else(|| PowerError::system(format!("Unknown host {}", target)))
    }

    async fn send_power_command(
        &self,
        target: &Target,
        _credentials: &Credentials,
        state: PowerState,
    ) -> Result<()> {
        self.journal
            .lock()
            .push(format!("power {} {}", state, target));

        let mut inner = self.inner.lock();
        inner.commands.push((target.clone(), state));

        if inner.fail_commands.contains(target) {
            return Err(PowerError::CommandFailed {
                program: "mock-ipmi".to_string(),
                code: Some(1),
                stderr: "Set Chassis Power Control failed".to_string(),
            });
        }

        if !inner.stuck.contains(target) {
            let lag = inner.lag.get(target).copied().unwrap_or(0);
            inner.schedule(target.clone(), state, lag);
        }

        Ok(())
    }
}

#[derive(Default)]
struct ShellInner {
    reachable_after: HashMap<Target, u32>,
    attempts: HashMap<Target, u32>,
    executed: Vec<(Target, String)>,
    fail_exec: HashSet<Target>,
    hang_on_shutdown: HashSet<Target>,
    power: Option<(Arc<MockPower>, u32)>,
}

/// Simulated remote shell. Unknown hosts are never reachable.
#[derive(Clone)]
pub struct MockShell {
    inner: Arc<Mutex<ShellInner>>,
    journal: CallJournal,
}

impl MockShell {
    pub fn new() -> Self {
        Self::with_journal(new_journal())
    }

    pub fn with_journal(journal: CallJournal) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ShellInner::default())),
            journal,
        }
    }

    /// Connections to `host` succeed from the `attempt`-th try onwards.
    pub fn reachable_after(&self, host: &str, attempt: u32) {
        self.inner
            .lock()
            .reachable_after
            .insert(Target::from(host), attempt.max(1));
    }

    pub fn fail_exec(&self, host: &str) {
        self.inner.lock().fail_exec.insert(Target::from(host));
    }

    /// Executed commands power the host off through `power` after
    /// `after_queries` status queries.
    pub fn powering_off(self, power: Arc<MockPower>, after_queries: u32) -> Self {
        self.inner.lock().power = Some((power, after_queries));
        self
    }

    /// Accept the shutdown command for `host` but leave it running.
    pub fn hang_on_shutdown(&self, host: &str) {
        self.inner.lock().hang_on_shutdown.insert(Target::from(host));
    }

    pub fn connect_attempts(&self, host: &str) -> u32 {
        self.inner
            .lock()
            .attempts
            .get(&Target::from(host))
            .copied()
            .unwrap_or(0)
    }

    pub fn executed(&self) -> Vec<(Target, String)> {
        self.inner.lock().executed.clone()
    }
}

impl Default for MockShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn connect(&self, target: &Target) -> Result<Box<dyn RemoteSession>> {
        self.journal.lock().push(format!("connect {}", target));

        let mut inner = self.inner.lock();
        let attempt = {
            let count = inner.attempts.entry(target.clone()).or_insert(0);
            *count += 1;
            *count
        };

        match inner.reachable_after.get(target) {
            Some(needed) if attempt >= *needed => Ok(Box::new(MockSession {
                shell: self.clone(),
                target: target.clone(),
            })),
            _ => Err(PowerError::ssh(target.as_str(), "Connection refused")),
        }
    }
}

struct MockSession {
    shell: MockShell,
    target: Target,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn execute(&mut self, command: &str) -> Result<()> {
        self.shell
            .journal
            .lock()
            .push(format!("exec {} {}", self.target, command));

        let mut inner = self.shell.inner.lock();
        if inner.fail_exec.contains(&self.target) {
            return Err(PowerError::ssh(self.target.as_str(), "Channel open failed"));
        }
        inner.executed.push((self.target.clone(), command.to_string()));

        if !inner.hang_on_shutdown.contains(&self.target) {
            if let Some((power, after)) = &inner.power {
                power.schedule_state(self.target.as_str(), PowerState::Off, *after);
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct ServiceInner {
    running: HashSet<String>,
    fail_start: HashSet<String>,
    calls: Vec<String>,
}

pub struct MockServiceControl {
    inner: Mutex<ServiceInner>,
    journal: CallJournal,
}

impl MockServiceControl {
    pub fn new() -> Self {
        Self::with_journal(new_journal())
    }

    pub fn with_journal(journal: CallJournal) -> Self {
        Self {
            inner: Mutex::new(ServiceInner::default()),
            journal,
        }
    }

    pub fn set_running(&self, service: &str) {
        self.inner.lock().running.insert(service.to_string());
    }

    pub fn fail_start(&self, service: &str) {
        self.inner.lock().fail_start.insert(service.to_string());
    }

    pub fn is_running(&self, service: &str) -> bool {
        self.inner.lock().running.contains(service)
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }
}

impl Default for MockServiceControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceControl for MockServiceControl {
    async fn is_active(&self, service: &str) -> Result<bool> {
        Ok(self.is_running(service))
    }

    async fn start(&self, service: &str) -> Result<()> {
        let call = format!("start {}", service);
        self.journal.lock().push(call.clone());

        let mut inner = self.inner.lock();
        inner.calls.push(call);
        if inner.fail_start.contains(service) {
            return Err(PowerError::service(service, "Job failed"));
        }
        inner.running.insert(service.to_string());
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<()> {
        let call = format!("stop {}", service);
        self.journal.lock().push(call.clone());

        let mut inner = self.inner.lock();
        inner.calls.push(call);
        inner.running.remove(service);
        Ok(())
    }
}

#[derive(Default)]
struct ConsoleInner {
    open: bool,
    fail_start: bool,
    sessions: Vec<Vec<Target>>,
    stop_calls: usize,
}

pub struct MockConsoleLog {
    inner: Mutex<ConsoleInner>,
    journal: CallJournal,
}

impl MockConsoleLog {
    pub fn new() -> Self {
        Self::with_journal(new_journal())
    }

    pub fn with_journal(journal: CallJournal) -> Self {
        Self {
            inner: Mutex::new(ConsoleInner::default()),
            journal,
        }
    }

    pub fn fail_start(&self) {
        self.inner.lock().fail_start = true;
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Host sets of every session opened so far
    pub fn sessions(&self) -> Vec<Vec<Target>> {
        self.inner.lock().sessions.clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.inner.lock().stop_calls
    }
}

impl Default for MockConsoleLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsoleLogControl for MockConsoleLog {
    async fn start(&self, targets: &[Target]) -> Result<()> {
        self.journal.lock().push("console start".to_string());

        let mut inner = self.inner.lock();
        if inner.fail_start {
            return Err(PowerError::system("console logging unavailable"));
        }
        inner.open = true;
        inner.sessions.push(targets.to_vec());
        Ok(())
    }

    async fn stop(&self, _targets: &[Target]) -> Result<()> {
        self.journal.lock().push("console stop".to_string());

        let mut inner = self.inner.lock();
        inner.open = false;
        inner.stop_calls += 1;
        Ok(())
    }
}

pub struct MockNameResolution {
    enabled: Mutex<bool>,
    journal: CallJournal,
}

impl MockNameResolution {
    pub fn new() -> Self {
        Self::with_journal(new_journal())
    }

    pub fn with_journal(journal: CallJournal) -> Self {
        Self {
            enabled: Mutex::new(false),
            journal,
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock()
    }
}

impl Default for MockNameResolution {
    fn default() -> Self {
        Self::new()
    }
}

impl NameResolution for MockNameResolution {
    fn enable_entries(&self) -> Result<()> {
        self.journal.lock().push("hosts enable".to_string());
        *self.enabled.lock() = true;
        Ok(())
    }

    fn disable_entries(&self) -> Result<()> {
        self.journal.lock().push("hosts disable".to_string());
        *self.enabled.lock() = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_power_scheduled_transition() {
        let power = MockPower::new();
        let creds = Credentials::new("u", "p");
        let host = Target::from("h1");
        power.set_state("h1", PowerState::On);
        power.schedule_state("h1", PowerState::Off, 2);

        assert_eq!(power.query_power_state(&host, &creds).await.unwrap(), PowerState::On);
        assert_eq!(power.query_power_state(&host, &creds).await.unwrap(), PowerState::Off);
        assert_eq!(power.status_queries("h1"), 2);
    }

    #[tokio::test]
    async fn test_mock_shell_session_powers_off_host() {
        let power = Arc::new(MockPower::new());
        power.set_state("h1", PowerState::On);
        let shell = MockShell::new().powering_off(power.clone(), 0);
        shell.reachable_after("h1", 1);

        let mut session = shell.connect(&Target::from("h1")).await.unwrap();
        session.execute("shutdown -h now").await.unwrap();

        assert_eq!(power.state("h1"), Some(PowerState::Off));
        assert_eq!(shell.executed().len(), 1);
    }
}
