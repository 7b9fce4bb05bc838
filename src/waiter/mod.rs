//! Group waiting: poll a set of independent targets until every one of them
//! satisfies a condition or a wall-clock deadline passes.
//!
//! [`GroupWaiter`] owns the polling loop. What is awaited is supplied by a
//! [`Condition`], and an optional [`PreWaitAction`] fires once before the
//! first poll. The concrete waiters live in [`power`] and [`reachability`].

mod power;
mod reachability;

pub use power::{PowerCommandAction, PowerState, PowerStateCondition, PowerStateWaiter};
pub use reachability::{SshAvailableCondition, SshAvailableWaiter};

use crate::error::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// One host under power or reachability management.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target(String);

impl Target {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for Target {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Per-target predicate a waiter polls for.
#[async_trait]
pub trait Condition: Send + Sync {
    /// Human-readable description used in log lines.
    fn name(&self) -> String;

    /// `Ok(true)` once the target has converged. An `Err` means the check
    /// itself failed; the waiter treats it as not yet satisfied.
    async fn is_satisfied(&self, target: &Target) -> Result<bool>;
}

/// Side effect fired once before polling starts.
#[async_trait]
pub trait PreWaitAction: Send + Sync {
    /// Run against every member. Failures are reported per target and must
    /// not stop dispatch to the remaining targets.
    async fn run(&self, members: &BTreeSet<Target>) -> Result<()>;
}

/// Generic poll-until-converged engine.
pub struct GroupWaiter<C> {
    condition: C,
    pre_wait: Option<Arc<dyn PreWaitAction>>,
    timeout: Duration,
    poll_interval: Duration,
}

impl<C: Condition> GroupWaiter<C> {
    pub fn new(condition: C, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            condition,
            pre_wait: None,
            timeout,
            poll_interval,
        }
    }

    pub fn with_pre_wait_action(mut self, action: Arc<dyn PreWaitAction>) -> Self {
        self.pre_wait = Some(action);
        self
    }

    pub fn condition(&self) -> &C {
        &self.condition
    }

    /// Wait for every member to satisfy the condition.
    ///
    /// Returns the members still pending when the deadline passed; an empty
    /// set means every member converged. A timeout of zero polls exactly
    /// once. Timing out is not an error.
    pub async fn wait_for_completion<I>(&self, members: I) -> BTreeSet<Target>
    where
        I: IntoIterator<Item = Target>,
    {
        let mut pending: BTreeSet<Target> = members.into_iter().collect();
        let condition_name = self.condition.name();

        if pending.is_empty() {
            debug!(condition = %condition_name, "No members to wait for");
            return pending;
        }

        if let Some(action) = &self.pre_wait {
            info!(
                condition = %condition_name,
                members = pending.len(),
                "Running pre-wait action"
            );
            if let Err(e) = action.run(&pending).await {
                error!(condition = %condition_name, "Pre-wait action failed: {}", e);
            }
        }

        info!(
            condition = %condition_name,
            timeout_secs = self.timeout.as_secs(),
            "Waiting for condition \"{}\" on {} member(s)",
            condition_name,
            pending.len()
        );

        let start = Instant::now();
        let mut round: u32 = 0;

        loop {
            round += 1;
            let completed = self.poll_round(&pending).await;
            for target in &completed {
                pending.remove(target);
            }

            debug!(
                condition = %condition_name,
                round,
                completed = completed.len(),
                pending = pending.len(),
                "Poll round finished"
            );

            if pending.is_empty() || start.elapsed() >= self.timeout {
                break;
            }

            sleep(self.poll_interval).await;
        }

        if pending.is_empty() {
            info!(
                condition = %condition_name,
                elapsed_secs = start.elapsed().as_secs(),
                "All members reached condition \"{}\"",
                condition_name
            );
        } else {
            warn!(
                condition = %condition_name,
                elapsed_secs = start.elapsed().as_secs(),
                "Waiting for condition \"{}\" timed out after {}s; pending: {}",
                condition_name,
                self.timeout.as_secs(),
                crate::error::join_hosts(&pending)
            );
        }

        pending
    }

    /// Evaluate every pending target once and return those that converged.
    /// All evaluations land before the round ends.
    async fn poll_round(&self, pending: &BTreeSet<Target>) -> Vec<Target> {
        let checks = pending.iter().map(|target| async move {
            match self.condition.is_satisfied(target).await {
                Ok(done) => done.then(|| target.clone()),
                Err(e) => {
                    error!(host = %target, "Failed to check condition: {}", e);
                    None
                }
            }
        });

        join_all(checks).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PowerError;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Completes each target after a scripted number of polls; `None` never completes.
    struct ScriptedCondition {
        polls_needed: HashMap<Target, Option<u32>>,
        failing: BTreeSet<Target>,
        polls: Mutex<HashMap<Target, u32>>,
    }

    impl ScriptedCondition {
        fn new(script: &[(&str, Option<u32>)]) -> Self {
            Self {
                polls_needed: script.iter().map(|(h, n)| (Target::from(*h), *n)).collect(),
                failing: BTreeSet::new(),
                polls: Mutex::new(HashMap::new()),
            }
        }

        fn failing(mut self, host: &str) -> Self {
            self.failing.insert(Target::from(host));
            self
        }

        fn poll_count(&self, host: &str) -> u32 {
            self.polls.lock().get(&Target::from(host)).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Condition for ScriptedCondition {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        async fn is_satisfied(&self, target: &Target) -> Result<bool> {
            let count = {
                let mut polls = self.polls.lock();
                let count = polls.entry(target.clone()).or_insert(0);
                *count += 1;
                *count
            };

            if self.failing.contains(target) {
                return Err(PowerError::system("check exploded"));
            }

            Ok(match self.polls_needed.get(target).copied().flatten() {
                Some(needed) => count >= needed,
                None => false,
            })
        }
    }

    struct CountingAction {
        calls: Mutex<Vec<BTreeSet<Target>>>,
        fail: bool,
    }

    #[async_trait]
    impl PreWaitAction for CountingAction {
        async fn run(&self, members: &BTreeSet<Target>) -> Result<()> {
            self.calls.lock().push(members.clone());
            if self.fail {
                Err(PowerError::system("pre-wait failed"))
            } else {
                Ok(())
            }
        }
    }

    fn targets(names: &[&str]) -> Vec<Target> {
        names.iter().map(|n| Target::from(*n)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_members_return_immediately() {
        let action = Arc::new(CountingAction {
            calls: Mutex::new(Vec::new()),
            fail: false,
        });
        let waiter = GroupWaiter::new(
            ScriptedCondition::new(&[]),
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .with_pre_wait_action(action.clone());

        let start = Instant::now();
        let pending = waiter.wait_for_completion(Vec::new()).await;

        assert!(pending.is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(action.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_members_converge() {
        let waiter = GroupWaiter::new(
            ScriptedCondition::new(&[("h1", Some(1)), ("h2", Some(3))]),
            Duration::from_secs(30),
            Duration::from_secs(1),
        );

        let pending = waiter.wait_for_completion(targets(&["h1", "h2"])).await;

        assert!(pending.is_empty());
        // h1 is dropped after its first poll and never re-evaluated
        assert_eq!(waiter.condition().poll_count("h1"), 1);
        assert_eq!(waiter.condition().poll_count("h2"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_stragglers() {
        let waiter = GroupWaiter::new(
            ScriptedCondition::new(&[("h1", Some(1)), ("h2", Some(1)), ("h3", None)]),
            Duration::from_secs(2),
            Duration::from_secs(1),
        );

        let start = Instant::now();
        let pending = waiter.wait_for_completion(targets(&["h1", "h2", "h3"])).await;

        assert_eq!(pending, targets(&["h3"]).into_iter().collect());
        assert_eq!(waiter.condition().poll_count("h1"), 1);
        assert_eq!(waiter.condition().poll_count("h2"), 1);
        assert_eq!(waiter.condition().poll_count("h3"), 3);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() <= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_satisfied_returns_full_set_within_deadline() {
        let waiter = GroupWaiter::new(
            ScriptedCondition::new(&[("a", None), ("b", None)]),
            Duration::from_secs(5),
            Duration::from_secs(2),
        );

        let start = Instant::now();
        let pending = waiter.wait_for_completion(targets(&["a", "b"])).await;

        assert_eq!(pending.len(), 2);
        assert!(start.elapsed() <= Duration::from_secs(5) + Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_polls_exactly_once() {
        let waiter = GroupWaiter::new(
            ScriptedCondition::new(&[("h1", Some(2))]),
            Duration::ZERO,
            Duration::from_secs(1),
        );

        let pending = waiter.wait_for_completion(targets(&["h1"])).await;

        assert_eq!(pending.len(), 1);
        assert_eq!(waiter.condition().poll_count("h1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_errors_keep_target_pending() {
        let waiter = GroupWaiter::new(
            ScriptedCondition::new(&[("ok", Some(1)), ("broken", Some(1))]).failing("broken"),
            Duration::from_secs(2),
            Duration::from_secs(1),
        );

        let pending = waiter.wait_for_completion(targets(&["ok", "broken"])).await;

        assert_eq!(pending, targets(&["broken"]).into_iter().collect());
        assert!(waiter.condition().poll_count("broken") > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_wait_runs_once_even_when_it_fails() {
        let action = Arc::new(CountingAction {
            calls: Mutex::new(Vec::new()),
            fail: true,
        });
        let waiter = GroupWaiter::new(
            ScriptedCondition::new(&[("h1", Some(3)), ("h2", None)]),
            Duration::from_secs(4),
            Duration::from_secs(1),
        )
        .with_pre_wait_action(action.clone());

        let pending = waiter.wait_for_completion(targets(&["h1", "h2"])).await;

        assert_eq!(pending, targets(&["h2"]).into_iter().collect());
        let calls = action.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], targets(&["h1", "h2"]).into_iter().collect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_is_subset_of_input() {
        let waiter = GroupWaiter::new(
            ScriptedCondition::new(&[("x", None), ("y", Some(2)), ("z", None)]),
            Duration::from_secs(3),
            Duration::from_secs(1),
        );
        let input: BTreeSet<Target> = targets(&["x", "y", "z"]).into_iter().collect();

        let pending = waiter.wait_for_completion(input.clone()).await;

        assert!(pending.is_subset(&input));
        assert!(!pending.contains(&Target::from("y")));
    }

    #[test]
    fn test_target_display_and_ordering() {
        let mut hosts = vec![Target::from("ncn-w001"), Target::from("ncn-m001")];
        hosts.sort();
        assert_eq!(hosts[0].to_string(), "ncn-m001");
        assert_eq!(hosts[1].as_str(), "ncn-w001");
    }
}
