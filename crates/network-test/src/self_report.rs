//! Self-reports written when inbound probes reach this node.

use std::sync::Arc;

use tracing::error;

use crate::keys;
use crate::registry::Registry;

/// Records that a peer's private probe or an external DMZ probe arrived.
///
/// Records carry no TTL; the embedded timestamp shows how fresh they are.
#[derive(Clone)]
pub struct SelfReporter {
    node_id: String,
    registry: Arc<dyn Registry>,
}

impl SelfReporter {
    pub fn new(node_id: impl Into<String>, registry: Arc<dyn Registry>) -> Self {
        Self {
            node_id: node_id.into(),
            registry,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Write `private:<node> = healthy:<ts>`.
    pub async fn report_private(&self) {
        let key = keys::private_self_report_key(&self.node_id);
        if let Err(e) = self.registry.set(&key, &keys::healthy_value(), None).await {
            error!(node = %self.node_id, error = %e, "Unable to report private health");
        }
    }

    /// Write `dmz:<node> = healthy:<ts>`.
    pub async fn report_dmz(&self) {
        let key = keys::dmz_self_report_key(&self.node_id);
        if let Err(e) = self.registry.set(&key, &keys::healthy_value(), None).await {
            error!(node = %self.node_id, error = %e, "Unable to report DMZ health");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeOutcome;
    use crate::registry::MemoryRegistry;

    #[tokio::test]
    async fn test_reports_are_healthy_and_unbounded() {
        let registry = Arc::new(MemoryRegistry::new());
        let reporter = SelfReporter::new("web.1", registry.clone());

        reporter.report_private().await;
        reporter.report_dmz().await;

        for key in ["private:web.1", "dmz:web.1"] {
            let value = registry.get(key).await.expect("get").expect("present");
            assert!(value.starts_with("healthy:"));
            assert!(ProbeOutcome::parse(&value).passed());
            assert_eq!(registry.ttl(key), None);
        }
    }
}
