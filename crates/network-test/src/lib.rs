//! Private-Space Network Test
//!
//! Every node in a fleet keeps itself visible in a shared registry and
//! periodically probes three network paths, recording what worked:
//!
//! - **Private**: node to node over the private network
//! - **DMZ**: outside world to node through the public router
//! - **NAT**: node to the internet through the NAT gateway
//!
//! An operator then loads `/report` on any node to see the whole fleet.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── Node ────────────────────────┐
//! │                                                      │
//! │  HeartbeatPublisher ──► liveness:<id>, sadd dynos    │
//! │                                                      │
//! │  ReachabilityProber                                  │
//! │    private (cron) ──► GET http://<peer>:7777/private │
//! │    dmz     (cron) ──► GET https://<app>/dmz          │
//! │    nat     (cron) ──► GET <settings:NATCheckURL>     │
//! │          └──► <check>:src:<id>:dest:<dest>           │
//! │                                                      │
//! │  HTTP: /private /dmz ──► private:<id>, dmz:<id>      │
//! │        /report       ◄── ReportAggregator            │
//! └──────────────────────────┬───────────────────────────┘
//!                            │
//!                    ┌───────▼────────┐
//!                    │ Shared Registry│ (Redis)
//!                    └────────────────┘
//! ```
//!
//! Nodes never talk to each other except through probes; the registry is
//! the only coordination point.

pub mod config;
pub mod heartbeat;
pub mod keys;
pub mod logging;
pub mod node;
pub mod probe;
pub mod prober;
pub mod registry;
pub mod report;
pub mod schedule;
pub mod self_report;
pub mod server;

pub use config::{Args, ConfigError, Settings};
pub use heartbeat::{HeartbeatPublisher, HeartbeatStats};
pub use node::FleetNode;
pub use probe::{CheckType, HttpProbe, Probe, ProbeOutcome};
pub use prober::{ProberTasks, ReachabilityProber};
pub use registry::{
    MemoryRegistry, RedisRegistry, Registry, RegistryError, RegistryResult, ScanPage,
    TERMINAL_CURSOR,
};
pub use report::{CheckReport, FleetReport, NodeReport, ReportAggregator};
pub use schedule::{CheckSchedule, TaskHandle};
pub use self_report::SelfReporter;
