//! Wiring of one fleet node.

use std::sync::Arc;

use axum::Router;

use crate::config::Settings;
use crate::heartbeat::HeartbeatPublisher;
use crate::probe::Probe;
use crate::prober::{ProberTasks, ReachabilityProber};
use crate::registry::Registry;
use crate::report::{FleetReport, ReportAggregator};
use crate::schedule::TaskHandle;
use crate::self_report::SelfReporter;
use crate::server::{self, AppState};

/// A node's heartbeat publisher, prober, report aggregator and self-reporter,
/// all sharing one registry.
#[derive(Clone)]
pub struct FleetNode {
    heartbeat: HeartbeatPublisher,
    prober: ReachabilityProber,
    aggregator: ReportAggregator,
    reporter: SelfReporter,
}

impl FleetNode {
    pub fn new(settings: Settings, registry: Arc<dyn Registry>, probe: Arc<dyn Probe>) -> Self {
        let heartbeat = HeartbeatPublisher::new(
            settings.node_id.clone(),
            registry.clone(),
            settings.liveness_interval,
            settings.liveness_ttl,
        );
        let aggregator = ReportAggregator::new(registry.clone());
        let reporter = SelfReporter::new(settings.node_id.clone(), registry.clone());
        let prober = ReachabilityProber::new(settings, registry, probe);
        Self {
            heartbeat,
            prober,
            aggregator,
            reporter,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        self.prober.node_id()
    }

    #[must_use]
    pub fn heartbeat(&self) -> &HeartbeatPublisher {
        &self.heartbeat
    }

    #[must_use]
    pub fn prober(&self) -> &ReachabilityProber {
        &self.prober
    }

    /// Start publishing heartbeats. Call once.
    pub fn start_heartbeat(&self) -> TaskHandle {
        self.heartbeat.start()
    }

    /// Start the three check schedules. Call once.
    pub fn start_prober(&self) -> ProberTasks {
        self.prober.start()
    }

    pub async fn build_report(&self) -> FleetReport {
        self.aggregator.build_report().await
    }

    /// HTTP routes serving the self-report endpoints and the report.
    pub fn router(&self) -> Router {
        server::router(AppState {
            reporter: self.reporter.clone(),
            aggregator: self.aggregator.clone(),
        })
    }
}
