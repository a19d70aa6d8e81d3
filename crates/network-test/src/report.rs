//! Fleet report aggregation.
//!
//! Rebuilds a per-node view of the fleet from the registry alone: the
//! membership set gives the nodes, `dmz:<node>` gives each node's inbound
//! DMZ self-report, and a cursor scan over `<check>:src:<node>:dest:*`
//! gives every private and NAT result the node recorded.
//!
//! The report is a diagnostic snapshot. Ordering follows the store's
//! enumeration order, and any lookup that fails only blanks the part of
//! the report it feeds.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, warn};

use crate::keys;
use crate::probe::{CheckType, ProbeOutcome};
use crate::registry::{Registry, RegistryResult, TERMINAL_CURSOR};

/// Keys requested per scan page.
pub const SCAN_PAGE_SIZE: usize = 10;

/// One stored outcome, keyed by what was probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Destination node id or URL. Empty for self-reports.
    pub dest: String,
    pub result: ProbeOutcome,
}

impl CheckReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.result.passed()
    }
}

/// Everything known about one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub node: String,
    /// Current liveness; `Unknown` once the liveness record has expired.
    pub liveness: ProbeOutcome,
    pub dmz: Vec<CheckReport>,
    pub nat: Vec<CheckReport>,
    pub private: Vec<CheckReport>,
}

impl NodeReport {
    /// Whether the node still has a fresh liveness record.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.liveness.passed()
    }
}

/// Point-in-time reachability snapshot of the whole fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetReport {
    pub nodes: Vec<NodeReport>,
}

impl FleetReport {
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node == id)
    }
}

/// Reads the registry and assembles [`FleetReport`]s.
#[derive(Clone)]
pub struct ReportAggregator {
    registry: Arc<dyn Registry>,
    page_size: usize,
}

impl ReportAggregator {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            page_size: SCAN_PAGE_SIZE,
        }
    }

    /// Override the scan page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Build the report. Never fails; missing pieces are reported as empty.
    pub async fn build_report(&self) -> FleetReport {
        let nodes = match self.registry.set_members(keys::MEMBERSHIP_SET).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Unable to fetch nodes from registry");
                Vec::new()
            }
        };

        let mut reports = Vec::with_capacity(nodes.len());
        for node in nodes {
            reports.push(self.node_report(node).await);
        }
        FleetReport { nodes: reports }
    }

    async fn node_report(&self, node: String) -> NodeReport {
        NodeReport {
            liveness: self.liveness(&node).await,
            dmz: self.dmz_report(&node).await,
            nat: self.check_reports(&node, CheckType::Nat).await,
            private: self.check_reports(&node, CheckType::Private).await,
            node,
        }
    }

    async fn liveness(&self, node: &str) -> ProbeOutcome {
        match self.registry.get(&keys::liveness_key(node)).await {
            Ok(value) => ProbeOutcome::from_stored(value.as_deref()),
            Err(e) => {
                warn!(node, error = %e, "Unable to get liveness record");
                ProbeOutcome::Unknown
            }
        }
    }

    /// The node's own DMZ self-report, as a single entry when present.
    async fn dmz_report(&self, node: &str) -> Vec<CheckReport> {
        match self.registry.get(&keys::dmz_self_report_key(node)).await {
            Ok(Some(value)) => vec![CheckReport {
                dest: String::new(),
                result: ProbeOutcome::parse(&value),
            }],
            Ok(None) => Vec::new(),
            Err(e) => {
                error!(node, error = %e, "Unable to get dmz check report");
                Vec::new()
            }
        }
    }

    /// Every `check` result recorded by `node`. A failing page stops the
    /// collection for this node and keeps what was gathered so far.
    async fn check_reports(&self, node: &str, check: CheckType) -> Vec<CheckReport> {
        let mut reports = Vec::new();
        if let Err(e) = self.collect(node, check, &mut reports).await {
            warn!(node, check = %check, error = %e, "Unable to fetch results from registry");
        }
        reports
    }

    async fn collect(
        &self,
        node: &str,
        check: CheckType,
        reports: &mut Vec<CheckReport>,
    ) -> RegistryResult<()> {
        let pattern = keys::result_pattern(check, node);
        let mut cursor = TERMINAL_CURSOR;
        loop {
            let page = self.registry.scan(cursor, &pattern, self.page_size).await?;
            if !page.keys.is_empty() {
                let values = self.registry.multi_get(&page.keys).await?;
                for (key, value) in page.keys.iter().zip(values) {
                    reports.push(CheckReport {
                        dest: keys::destination_of(key, check, node).to_string(),
                        result: ProbeOutcome::from_stored(value.as_deref()),
                    });
                }
            }

            // Only the terminal cursor ends the scan; empty pages do not.
            if page.is_last() {
                return Ok(());
            }
            cursor = page.next_cursor;
        }
    }
}
