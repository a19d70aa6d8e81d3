//! Runtime configuration.
//!
//! [`Args`] is the command-line / environment surface; every flag can also
//! be supplied through the environment variable named beside it. It is
//! validated once into [`Settings`], which is what the rest of the crate
//! consumes.

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

use crate::schedule::CheckSchedule;

/// Fallback node id when the platform provides none.
pub const DEFAULT_NODE_ID: &str = "local.1";

/// Default outbound target for the NAT check.
pub const DEFAULT_NAT_CHECK_URL: &str = "https://www.google.com";

/// Configuration errors. All of them are fatal at start-up.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name} cron expression {expr:?}: {reason}")]
    InvalidCron {
        name: &'static str,
        expr: String,
        reason: String,
    },
    #[error("invalid {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Command-line arguments for a fleet node.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ps-network-test",
    about = "Heartbeat and reachability prober for private-space fleets",
    version
)]
pub struct Args {
    /// HTTP port for the public listener
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Node identifier (falls back to $DYNO, then local.1)
    #[arg(long, env = "HEROKU_DNS_DYNO_NAME")]
    pub node_id: Option<String>,

    /// Registry URL (redis:// or rediss://)
    #[arg(long, env = "REDIS_URL", required_unless_present = "memory_registry")]
    pub redis_url: Option<String>,

    /// Use a process-local registry instead of Redis (single node only)
    #[arg(long)]
    pub memory_registry: bool,

    /// Heartbeat interval in milliseconds
    #[arg(long, env = "LIVENESS_INTERVAL_MS", default_value_t = 10_000)]
    pub liveness_interval_ms: u64,

    /// Liveness record TTL in milliseconds
    #[arg(long, env = "LIVENESS_TIMEOUT_MS", default_value_t = 60_000)]
    pub liveness_timeout_ms: u64,

    /// Application name used to build the DMZ self-test URL
    #[arg(long, env = "HEROKU_DNS_APP_NAME")]
    pub app_name: Option<String>,

    /// Schedule for the private-path check
    #[arg(long, env = "PRIVATE_CHECK_CRON", default_value = "0 * * * * *")]
    pub private_check_cron: String,

    /// Schedule for the DMZ check
    #[arg(long, env = "DMZ_CHECK_CRON", default_value = "0/15 * * * * *")]
    pub dmz_check_cron: String,

    /// Schedule for the NAT check
    #[arg(long, env = "NAT_CHECK_CRON", default_value = "0/15 * * * * *")]
    pub nat_check_cron: String,

    /// Private IP to bind the private listener on
    #[arg(long, env = "HEROKU_PRIVATE_IP")]
    pub private_ip: Option<IpAddr>,

    /// Port peers probe on the private network
    #[arg(long, env = "PRIVATE_PORT", default_value_t = 7777)]
    pub private_port: u16,

    /// Upper bound on any single probe, in milliseconds
    #[arg(long, env = "PROBE_TIMEOUT_MS", default_value_t = 10_000)]
    pub probe_timeout_ms: u64,

    /// TTL for probe results in seconds (0 keeps them forever)
    #[arg(long, env = "RESULT_TTL_SECS", default_value_t = 600)]
    pub result_ttl_secs: u64,

    /// NAT check target used when settings:NATCheckURL is unset
    #[arg(long, env = "NAT_CHECK_DEFAULT_URL", default_value = DEFAULT_NAT_CHECK_URL)]
    pub nat_check_default_url: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Validated settings consumed by the heartbeat publisher and the prober.
#[derive(Debug, Clone)]
pub struct Settings {
    pub node_id: String,
    pub app_name: String,
    pub port: u16,
    pub private_ip: Option<IpAddr>,
    pub private_port: u16,
    pub liveness_interval: Duration,
    pub liveness_ttl: Duration,
    pub private_schedule: CheckSchedule,
    pub dmz_schedule: CheckSchedule,
    pub nat_schedule: CheckSchedule,
    pub probe_timeout: Duration,
    pub result_ttl: Option<Duration>,
    pub nat_check_default_url: String,
}

impl Settings {
    /// Validate raw arguments. `dyno` is the platform's secondary node id.
    pub fn from_args(args: &Args, dyno: Option<String>) -> Result<Self, ConfigError> {
        if args.liveness_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "LIVENESS_INTERVAL_MS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if args.liveness_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "LIVENESS_TIMEOUT_MS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if args.probe_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PROBE_TIMEOUT_MS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let node_id = [args.node_id.clone(), dyno]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
            .unwrap_or_else(|| DEFAULT_NODE_ID.to_string());

        let app_name = args
            .app_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("localhost:{}", args.port));

        Ok(Self {
            node_id,
            app_name,
            port: args.port,
            private_ip: args.private_ip,
            private_port: args.private_port,
            liveness_interval: Duration::from_millis(args.liveness_interval_ms),
            liveness_ttl: Duration::from_millis(args.liveness_timeout_ms),
            private_schedule: CheckSchedule::parse("PRIVATE_CHECK_CRON", &args.private_check_cron)?,
            dmz_schedule: CheckSchedule::parse("DMZ_CHECK_CRON", &args.dmz_check_cron)?,
            nat_schedule: CheckSchedule::parse("NAT_CHECK_CRON", &args.nat_check_cron)?,
            probe_timeout: Duration::from_millis(args.probe_timeout_ms),
            result_ttl: (args.result_ttl_secs > 0)
                .then(|| Duration::from_secs(args.result_ttl_secs)),
            nat_check_default_url: args.nat_check_default_url.clone(),
        })
    }

    /// URL a peer's private listener answers on.
    #[must_use]
    pub fn private_url(&self, node: &str) -> String {
        format!("http://{node}:{}/private", self.private_port)
    }

    /// This node's externally routable self-test URL.
    ///
    /// A `host:port` app name (local runs) is addressed directly over plain
    /// HTTP; anything else is treated as a platform app name.
    #[must_use]
    pub fn dmz_url(&self) -> String {
        if self.app_name.contains(':') {
            format!("http://{}/dmz", self.app_name)
        } else {
            format!("https://{}.herokuapp.com/dmz", self.app_name)
        }
    }
}
