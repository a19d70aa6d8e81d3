//! Reachability prober.
//!
//! Three checks, each on its own schedule:
//!
//! - **private**: every node in the membership set, at its private address
//! - **dmz**: this node's own public URL, routed in from outside
//! - **nat**: an external URL, reached out through the NAT gateway
//!
//! Every probe writes `<check>:src:<self>:dest:<dest>` with a pass or fail
//! value. Destinations are node ids for the private check and URLs for the
//! other two.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::keys;
use crate::probe::{CheckType, Probe};
use crate::registry::Registry;
use crate::schedule::{CheckSchedule, TaskHandle, spawn_scheduled};

/// Runs the private, DMZ and NAT checks for one node.
#[derive(Clone)]
pub struct ReachabilityProber {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Settings,
    registry: Arc<dyn Registry>,
    probe: Arc<dyn Probe>,
}

/// The three running check schedules.
#[derive(Debug)]
pub struct ProberTasks {
    pub private: TaskHandle,
    pub dmz: TaskHandle,
    pub nat: TaskHandle,
}

impl ProberTasks {
    /// Stop all three schedules.
    pub async fn stop(self) {
        self.private.stop().await;
        self.dmz.stop().await;
        self.nat.stop().await;
    }
}

impl ReachabilityProber {
    pub fn new(settings: Settings, registry: Arc<dyn Registry>, probe: Arc<dyn Probe>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                registry,
                probe,
            }),
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.inner.settings.node_id
    }

    fn schedule(&self, check: CheckType) -> &CheckSchedule {
        let settings = &self.inner.settings;
        match check {
            CheckType::Private => &settings.private_schedule,
            CheckType::Dmz => &settings.dmz_schedule,
            CheckType::Nat => &settings.nat_schedule,
        }
    }

    /// Per-probe deadline for `check`.
    #[must_use]
    pub fn deadline(&self, check: CheckType) -> Duration {
        self.schedule(check)
            .probe_deadline(self.inner.settings.probe_timeout)
    }

    /// Start every check on its configured schedule. The checks keep
    /// running if the returned handles are dropped; only
    /// [`ProberTasks::stop`] ends them.
    pub fn start(&self) -> ProberTasks {
        ProberTasks {
            private: self.start_check(CheckType::Private),
            dmz: self.start_check(CheckType::Dmz),
            nat: self.start_check(CheckType::Nat),
        }
    }

    /// Start a single check on its configured schedule.
    pub fn start_check(&self, check: CheckType) -> TaskHandle {
        let schedule = self.schedule(check).clone();
        info!(check = %check, schedule = schedule.expr(), "Starting check schedule");

        let name = match check {
            CheckType::Private => "private-check",
            CheckType::Dmz => "dmz-check",
            CheckType::Nat => "nat-check",
        };
        let prober = self.clone();
        spawn_scheduled(name, schedule, move || {
            let prober = prober.clone();
            async move { prober.run_check(check).await }
        })
    }

    /// Run one cycle of `check` with its scheduled deadline.
    pub async fn run_check(&self, check: CheckType) {
        let deadline = self.deadline(check);
        match check {
            CheckType::Private => self.check_private(deadline).await,
            CheckType::Dmz => self.check_dmz(deadline).await,
            CheckType::Nat => self.check_nat(deadline).await,
        }
    }

    /// Probe every known node's private listener.
    ///
    /// Stale members are probed too; their failures are the signal. If the
    /// membership set cannot be read, this cycle does nothing.
    pub async fn check_private(&self, deadline: Duration) {
        let nodes = match self.inner.registry.set_members(keys::MEMBERSHIP_SET).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Unable to fetch nodes from registry");
                return;
            }
        };

        let probes = nodes.iter().map(|node| {
            let url = self.inner.settings.private_url(node);
            async move {
                self.check_url(CheckType::Private, &url, node, deadline)
                    .await
            }
        });
        join_all(probes).await;
    }

    /// Probe this node's public URL.
    pub async fn check_dmz(&self, deadline: Duration) {
        let url = self.inner.settings.dmz_url();
        self.check_url(CheckType::Dmz, &url, &url, deadline).await;
    }

    /// Probe the outbound NAT target. Skipped when the override cannot be read.
    pub async fn check_nat(&self, deadline: Duration) {
        let Some(url) = self.nat_url().await else {
            return;
        };
        self.check_url(CheckType::Nat, &url, &url, deadline).await;
    }

    /// Resolve the NAT target: the registry override when set, otherwise
    /// the configured default. `None` when the override lookup fails.
    pub async fn nat_url(&self) -> Option<String> {
        match self.inner.registry.get(keys::NAT_CHECK_URL_SETTING).await {
            Ok(Some(url)) if !url.trim().is_empty() => Some(url.trim().to_string()),
            Ok(_) => {
                debug!("No NATCheckURL set, using default");
                Some(self.inner.settings.nat_check_default_url.clone())
            }
            Err(e) => {
                error!(error = %e, "Unable to fetch NATCheckURL from registry");
                None
            }
        }
    }

    /// Probe `url`, record the outcome under `dest`, and return the stored value.
    pub async fn check_url(
        &self,
        check: CheckType,
        url: &str,
        dest: &str,
        deadline: Duration,
    ) -> String {
        debug!(%url, check = %check, "Checking url");

        let result = self.inner.probe.probe(url, deadline).await;
        info!(%url, check = %check, %result, "Check finished");

        let key = keys::result_key(check, self.node_id(), dest);
        if let Err(e) = self
            .inner
            .registry
            .set(&key, &result, self.inner.settings.result_ttl)
            .await
        {
            error!(%url, check = %check, error = %e, "Unable to set check result");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Args, Settings};
    use crate::probe::{ProbeOutcome, fail_value, pass_value};
    use crate::registry::MemoryRegistry;
    use async_trait::async_trait;
    use clap::Parser;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Passes every URL except those listed as unreachable, and remembers calls.
    #[derive(Default)]
    struct StubProbe {
        unreachable: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Probe for StubProbe {
        async fn probe(&self, url: &str, _deadline: Duration) -> String {
            self.calls.lock().expect("lock").push(url.to_string());
            if self.unreachable.contains(url) {
                fail_value("connection refused")
            } else {
                pass_value()
            }
        }
    }

    fn settings() -> Settings {
        let args = Args::try_parse_from([
            "ps-network-test",
            "--memory-registry",
            "--node-id",
            "web.3",
            "--app-name",
            "space-app",
            "--private-port",
            "7777",
            "--nat-check-default-url",
            "https://www.google.com",
            "--result-ttl-secs",
            "600",
        ])
        .expect("args");
        Settings::from_args(&args, None).expect("settings")
    }

    fn prober(registry: Arc<MemoryRegistry>, probe: Arc<StubProbe>) -> ReachabilityProber {
        ReachabilityProber::new(settings(), registry, probe)
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_check_records_each_target() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.set_add("dynos", "web.1").await.expect("sadd");
        registry.set_add("dynos", "web.2").await.expect("sadd");
        let probe = Arc::new(StubProbe {
            unreachable: HashSet::from(["http://web.2:7777/private".to_string()]),
            ..Default::default()
        });

        prober(registry.clone(), probe.clone())
            .check_private(Duration::from_secs(1))
            .await;

        let ok = registry
            .get("private:src:web.3:dest:web.1")
            .await
            .expect("get")
            .expect("present");
        assert!(ProbeOutcome::parse(&ok).passed());

        let bad = registry
            .get("private:src:web.3:dest:web.2")
            .await
            .expect("get")
            .expect("present");
        assert!(matches!(
            ProbeOutcome::parse(&bad),
            ProbeOutcome::Fail { ref detail, .. } if detail == "connection refused"
        ));
        assert_eq!(probe.calls.lock().expect("lock").len(), 2);
        assert_eq!(
            registry.ttl("private:src:web.3:dest:web.1"),
            Some(Duration::from_secs(600))
        );
    }

    #[tokio::test]
    async fn test_private_check_noop_on_store_error() {
        let registry = Arc::new(MemoryRegistry::new());
        // Wrong type makes SMEMBERS fail.
        registry.set("dynos", "not a set", None).await.expect("set");
        let probe = Arc::new(StubProbe::default());

        prober(registry.clone(), probe.clone())
            .check_private(Duration::from_secs(1))
            .await;

        assert!(probe.calls.lock().expect("lock").is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_dmz_check_targets_own_app() {
        let registry = Arc::new(MemoryRegistry::new());
        let probe = Arc::new(StubProbe::default());

        prober(registry.clone(), probe.clone())
            .check_dmz(Duration::from_secs(1))
            .await;

        let key = "dmz:src:web.3:dest:https://space-app.herokuapp.com/dmz";
        assert!(registry.get(key).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_nat_falls_back_to_default() {
        let registry = Arc::new(MemoryRegistry::new());
        let probe = Arc::new(StubProbe::default());
        let prober = prober(registry.clone(), probe.clone());

        assert_eq!(prober.nat_url().await.as_deref(), Some("https://www.google.com"));

        registry
            .set("settings:NATCheckURL", "", None)
            .await
            .expect("set");
        assert_eq!(prober.nat_url().await.as_deref(), Some("https://www.google.com"));

        registry
            .set("settings:NATCheckURL", "https://example.com/ping", None)
            .await
            .expect("set");
        prober.check_nat(Duration::from_secs(1)).await;
        let key = "nat:src:web.3:dest:https://example.com/ping";
        assert!(registry.get(key).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_nat_skipped_when_override_unreadable() {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .set_add("settings:NATCheckURL", "oops")
            .await
            .expect("sadd");
        let probe = Arc::new(StubProbe::default());

        prober(registry.clone(), probe.clone())
            .check_nat(Duration::from_secs(1))
            .await;
        assert!(probe.calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_result_overwrites_previous() {
        let registry = Arc::new(MemoryRegistry::new());
        let probe = Arc::new(StubProbe {
            unreachable: HashSet::from(["https://www.google.com".to_string()]),
            ..Default::default()
        });
        let first = prober(registry.clone(), probe)
            .check_url(CheckType::Nat, "https://www.google.com", "https://www.google.com", Duration::from_secs(1))
            .await;
        let second = prober(registry.clone(), Arc::new(StubProbe::default()))
            .check_url(CheckType::Nat, "https://www.google.com", "https://www.google.com", Duration::from_secs(1))
            .await;

        let stored = registry
            .get("nat:src:web.3:dest:https://www.google.com")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(stored, second);
        assert!(!ProbeOutcome::parse(&first).passed());
        let (a, b) = (
            ProbeOutcome::parse(&first).timestamp().expect("ts"),
            ProbeOutcome::parse(&second).timestamp().expect("ts"),
        );
        assert!(b >= a);
    }
}
