//! In-process registry backend.
//!
//! Keeps records in a [`DashMap`] with optional expiry. Expiry is checked
//! lazily on read against the tokio clock, so paused-time tests can move
//! records past their TTL deterministically.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{Registry, RegistryError, RegistryResult, ScanPage, TERMINAL_CURSOR, glob_match};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Registry held entirely in memory.
///
/// `scan` walks the sorted keyspace in windows of `page_size` keys and
/// returns only the matching ones, so a page can be empty while the cursor
/// still points further into the keyspace, as with Redis `SCAN`.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: DashMap<String, Entry>,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of a key, `None` when absent or unbounded.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.entries.get(key).map(|e| e.value().clone())?;
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }

    fn sorted_live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_live(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get(&self, key: &str) -> RegistryResult<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(RegistryError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RegistryResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_add(&self, set_key: &str, member: &str) -> RegistryResult<()> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(set_key.to_string())
            .or_insert_with(|| Entry {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            });
        if !entry.is_live(now) {
            *entry = Entry {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            };
        }
        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            Value::Str(_) => Err(RegistryError::WrongType(set_key.to_string())),
        }
    }

    async fn set_members(&self, set_key: &str) -> RegistryResult<Vec<String>> {
        match self.live(set_key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.into_iter().collect()),
            Some(_) => Err(RegistryError::WrongType(set_key.to_string())),
        }
    }

    async fn scan(&self, cursor: u64, pattern: &str, page_size: usize) -> RegistryResult<ScanPage> {
        let keys = self.sorted_live_keys();
        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(keys.len());
        let end = start.saturating_add(page_size.max(1)).min(keys.len());

        let matched = keys[start..end]
            .iter()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        let next_cursor = if end >= keys.len() {
            TERMINAL_CURSOR
        } else {
            end as u64
        };

        Ok(ScanPage {
            keys: matched,
            next_cursor,
        })
    }

    async fn multi_get(&self, keys: &[String]) -> RegistryResult<Vec<Option<String>>> {
        // MGET yields nil for non-string values rather than failing.
        Ok(keys
            .iter()
            .map(|key| match self.live(key) {
                Some(Entry {
                    value: Value::Str(s),
                    ..
                }) => Some(s),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let registry = MemoryRegistry::new();
        assert_eq!(registry.get("missing").await.expect("get"), None);

        registry.set("a", "1", None).await.expect("set");
        registry.set("a", "2", None).await.expect("set");
        assert_eq!(registry.get("a").await.expect("get"), Some("2".to_string()));
        assert_eq!(registry.ttl("a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let registry = MemoryRegistry::new();
        registry
            .set("liveness:web.1", "healthy", Some(Duration::from_secs(60)))
            .await
            .expect("set");

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(registry.get("liveness:web.1").await.expect("get").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.get("liveness:web.1").await.expect("get").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_set_members_dedup() {
        let registry = MemoryRegistry::new();
        registry.set_add("dynos", "web.2").await.expect("sadd");
        registry.set_add("dynos", "web.1").await.expect("sadd");
        registry.set_add("dynos", "web.1").await.expect("sadd");

        let members = registry.set_members("dynos").await.expect("smembers");
        assert_eq!(members, vec!["web.1".to_string(), "web.2".to_string()]);
        assert!(registry.set_members("nothing").await.expect("smembers").is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let registry = MemoryRegistry::new();
        registry.set("dynos", "oops", None).await.expect("set");
        assert!(matches!(
            registry.set_add("dynos", "web.1").await,
            Err(RegistryError::WrongType(_))
        ));
        registry.set_add("members", "web.1").await.expect("sadd");
        assert!(registry.get("members").await.is_err());
        let values = registry
            .multi_get(&["members".to_string(), "dynos".to_string()])
            .await
            .expect("mget");
        assert_eq!(values, vec![None, Some("oops".to_string())]);
    }

    #[tokio::test]
    async fn test_scan_yields_empty_intermediate_pages() {
        let registry = MemoryRegistry::new();
        for i in 0..5 {
            registry.set(&format!("a:{i}"), "x", None).await.expect("set");
        }
        for i in 0..5 {
            registry.set(&format!("z:{i}"), "x", None).await.expect("set");
        }

        // First window only holds a:* keys, none match.
        let first = registry.scan(TERMINAL_CURSOR, "z:*", 5).await.expect("scan");
        assert!(first.keys.is_empty());
        assert!(!first.is_last());

        let second = registry.scan(first.next_cursor, "z:*", 5).await.expect("scan");
        assert_eq!(second.keys.len(), 5);
        assert!(second.is_last());
    }
}
