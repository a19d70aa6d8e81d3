//! Shared Registry Module
//!
//! The registry is the only coordination medium between nodes. Every node
//! writes its own liveness record, membership entry and probe results into
//! it; the report is assembled by reading it back.
//!
//! # Architecture
//!
//! ```text
//!    ┌─────────┐            ┌─────────┐            ┌─────────┐
//!    │ Node A  │            │ Node B  │            │ Node C  │
//!    └────┬────┘            └────┬────┘            └────┬────┘
//!         │ set / sadd           │                      │
//!         ▼                      ▼                      ▼
//!    ┌──────────────────────────────────────────────────────┐
//!    │                   Shared Registry                    │
//!    │  liveness:*   dynos   private:*   dmz:*   nat:*      │
//!    └──────────────────────────────────────────────────────┘
//!                                ▲
//!                                │ smembers / scan / mget
//!                         ┌──────┴──────┐
//!                         │   Report    │
//!                         └─────────────┘
//! ```
//!
//! Two backends are provided: [`RedisRegistry`] for real fleets and
//! [`MemoryRegistry`] for tests and single-process local runs.

mod memory;
mod redis;

pub use self::memory::MemoryRegistry;
pub use self::redis::RedisRegistry;

use std::time::Duration;

use async_trait::async_trait;

/// Cursor value that starts a scan and marks its end.
pub const TERMINAL_CURSOR: u64 = 0;

/// Errors raised by registry backends.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid registry url: {0}")]
    InvalidUrl(String),
    #[error("registry connection failed: {0}")]
    Connection(String),
    #[error("registry command {command} failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
    #[error("key {0} holds the wrong kind of value")]
    WrongType(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Keys matched in this page. May be empty even when more pages follow.
    pub keys: Vec<String>,
    /// Cursor for the next call; [`TERMINAL_CURSOR`] when the scan is done.
    pub next_cursor: u64,
}

impl ScanPage {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next_cursor == TERMINAL_CURSOR
    }
}

/// Minimum key-value operations the fleet needs from its shared store.
///
/// All operations are expected to be atomic per key on the store side; no
/// client-side locking is performed.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Read a string value. `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> RegistryResult<Option<String>>;

    /// Write a string value, replacing any previous one. `ttl` of `None`
    /// keeps the record until it is overwritten or removed externally.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RegistryResult<()>;

    /// Add `member` to the set stored at `set_key`.
    async fn set_add(&self, set_key: &str, member: &str) -> RegistryResult<()>;

    /// All members of the set stored at `set_key`, empty when absent.
    async fn set_members(&self, set_key: &str) -> RegistryResult<Vec<String>>;

    /// Return one page of keys matching the glob `pattern`, starting at `cursor`.
    async fn scan(&self, cursor: u64, pattern: &str, page_size: usize) -> RegistryResult<ScanPage>;

    /// Read many string values at once, in the order of `keys`.
    async fn multi_get(&self, keys: &[String]) -> RegistryResult<Vec<Option<String>>>;
}

/// Match `text` against a glob pattern supporting `*` and `?`.
///
/// This is the subset of Redis `MATCH` syntax the fleet uses.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
