//! Key naming and value tagging for records in the shared registry.
//!
//! Every record this crate reads or writes is addressed through one of the
//! builders below, so the key layout lives in exactly one place:
//!
//! | Key | Value |
//! |-----|-------|
//! | `liveness:<node>` | `healthy:<ts>` |
//! | `dynos` | set of node ids |
//! | `private:<node>` / `dmz:<node>` | `healthy:<ts>` |
//! | `<check>:src:<node>:dest:<dest>` | `pass:<ts>` or `fail:<err>:<ts>` |
//! | `settings:NATCheckURL` | URL |

use chrono::{DateTime, SecondsFormat, Utc};

use crate::probe::CheckType;

/// Membership set of every node id ever seen alive.
pub const MEMBERSHIP_SET: &str = "dynos";

/// Operator-controlled override for the NAT check target.
pub const NAT_CHECK_URL_SETTING: &str = "settings:NATCheckURL";

/// Status tag written into liveness and self-report records.
pub const HEALTHY_TAG: &str = "healthy";

/// `liveness:<node>`
#[must_use]
pub fn liveness_key(node: &str) -> String {
    format!("liveness:{node}")
}

/// `private:<node>`, written when a peer's private probe reaches this node.
#[must_use]
pub fn private_self_report_key(node: &str) -> String {
    format!("private:{node}")
}

/// `dmz:<node>`, written when an external DMZ probe reaches this node.
#[must_use]
pub fn dmz_self_report_key(node: &str) -> String {
    format!("dmz:{node}")
}

/// `<check>:src:<node>:dest:`, the prefix shared by every result a node records.
#[must_use]
pub fn result_prefix(check: CheckType, source: &str) -> String {
    format!("{}:src:{source}:dest:", check.as_str())
}

/// `<check>:src:<source>:dest:<dest>`
#[must_use]
pub fn result_key(check: CheckType, source: &str, dest: &str) -> String {
    format!("{}{dest}", result_prefix(check, source))
}

/// Scan pattern matching every result recorded by `source` for `check`.
#[must_use]
pub fn result_pattern(check: CheckType, source: &str) -> String {
    format!("{}*", result_prefix(check, source))
}

/// Recover the destination identifier from a result key.
///
/// Returns the key unchanged when it does not carry the expected prefix.
#[must_use]
pub fn destination_of<'a>(key: &'a str, check: CheckType, source: &str) -> &'a str {
    let prefix = result_prefix(check, source);
    key.strip_prefix(prefix.as_str()).unwrap_or(key)
}

/// Current time as an RFC 3339 tag, e.g. `2024-01-01T00:00:00Z`.
#[must_use]
pub fn time_tag() -> String {
    format_time_tag(Utc::now())
}

/// Format an instant the way every stored value embeds it.
#[must_use]
pub fn format_time_tag(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `healthy:<ts>`
#[must_use]
pub fn healthy_value() -> String {
    format!("{HEALTHY_TAG}:{}", time_tag())
}
