//! Outbound HTTP probes and the outcome values they record.
//!
//! A probe is a single `GET` against one destination. Any completed HTTP
//! exchange counts as a pass (the status code is not inspected); transport
//! errors and deadline expiry are failures. Outcomes are stored as
//! `pass:<ts>` or `fail:<detail>:<ts>` and parsed back into [`ProbeOutcome`]
//! when the report is assembled.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::keys::{self, HEALTHY_TAG};

/// Error detail recorded when a probe exceeds its deadline.
pub const TIMEOUT_DETAIL: &str = "timeout";

/// Placeholder shown for records that are absent.
pub const NO_DATA: &str = "<no data>";

/// The three network paths under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    /// Node to node over the private network.
    Private,
    /// Outside world to node through the public router.
    Dmz,
    /// Node to the internet through the NAT gateway.
    Nat,
}

impl CheckType {
    /// All check types in display order.
    pub const ALL: [CheckType; 3] = [CheckType::Private, CheckType::Dmz, CheckType::Nat];

    /// Namespace used in result keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Dmz => "dmz",
            Self::Nat => "nat",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed form of a stored probe result or self-report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The probe completed, or the node reported itself healthy.
    Pass { timestamp: DateTime<FixedOffset> },
    /// The probe failed with a transport error or timeout.
    Fail {
        detail: String,
        timestamp: DateTime<FixedOffset>,
    },
    /// The record is missing or empty.
    Unknown,
    /// A record is present but does not follow the value format.
    Unreadable { raw: String },
}

impl ProbeOutcome {
    /// Parse a stored value. An empty value is [`ProbeOutcome::Unknown`];
    /// anything else unrecognised is kept verbatim as
    /// [`ProbeOutcome::Unreadable`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::Unknown;
        }

        if let Some(ts) = raw
            .strip_prefix("pass:")
            .or_else(|| raw.strip_prefix(HEALTHY_TAG).and_then(|r| r.strip_prefix(':')))
        {
            if let Ok(timestamp) = DateTime::parse_from_rfc3339(ts) {
                return Self::Pass { timestamp };
            }
            return Self::unreadable(raw);
        }

        if let Some(rest) = raw.strip_prefix("fail:") {
            // The detail may itself contain colons, and so does the timestamp.
            // The leftmost split whose suffix is a full RFC 3339 timestamp wins.
            for (idx, _) in rest.match_indices(':') {
                if let Ok(timestamp) = DateTime::parse_from_rfc3339(&rest[idx + 1..]) {
                    return Self::Fail {
                        detail: rest[..idx].to_string(),
                        timestamp,
                    };
                }
            }
        }

        Self::unreadable(raw)
    }

    fn unreadable(raw: &str) -> Self {
        Self::Unreadable {
            raw: raw.to_string(),
        }
    }

    /// Parse an optional value, treating absence as [`ProbeOutcome::Unknown`].
    #[must_use]
    pub fn from_stored(raw: Option<&str>) -> Self {
        match raw {
            Some(value) if !value.is_empty() => Self::parse(value),
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    /// Time of the attempt, if known.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::Pass { timestamp } | Self::Fail { timestamp, .. } => Some(*timestamp),
            Self::Unknown | Self::Unreadable { .. } => None,
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass { timestamp } => write!(f, "pass:{}", time_text(timestamp)),
            Self::Fail { detail, timestamp } => {
                write!(f, "fail:{detail}:{}", time_text(timestamp))
            }
            Self::Unknown => f.write_str(NO_DATA),
            Self::Unreadable { raw } => f.write_str(raw),
        }
    }
}

/// Same shape as the stored tag: `Z` for UTC, fractional seconds only when present.
fn time_text(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl Serialize for ProbeOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Value written for a completed probe.
#[must_use]
pub fn pass_value() -> String {
    format!("pass:{}", keys::time_tag())
}

/// Value written for a failed probe.
#[must_use]
pub fn fail_value(detail: &str) -> String {
    format!("fail:{detail}:{}", keys::time_tag())
}

/// Something that can test reachability of a URL.
///
/// The prober is generic over this so check routines can be exercised
/// without real network paths.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Probe `url`, giving up after `deadline`. Returns the value to store.
    async fn probe(&self, url: &str, deadline: Duration) -> String;
}

/// Plain HTTP `GET` probe.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ps-network-test/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str, deadline: Duration) -> String {
        let request = self.client.get(url).send();
        match tokio::time::timeout(deadline, request).await {
            Ok(Ok(resp)) => {
                debug!(%url, status = %resp.status(), "probe completed");
                pass_value()
            }
            Ok(Err(e)) => {
                debug!(%url, error = %e, "probe failed");
                fail_value(&error_detail(&e))
            }
            Err(_) => {
                debug!(%url, ?deadline, "probe timed out");
                fail_value(TIMEOUT_DETAIL)
            }
        }
    }
}

/// Flatten a reqwest error and its sources into one line.
fn error_detail(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return TIMEOUT_DETAIL.to_string();
    }
    let mut detail = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail.replace('\n', " ")
}
