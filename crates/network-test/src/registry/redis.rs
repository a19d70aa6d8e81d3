//! Redis registry backend.

use std::time::Duration;

use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use tracing::info;

use super::{Registry, RegistryError, RegistryResult, ScanPage};

/// Registry backed by a Redis server, shared by every task in the process.
///
/// The connection manager multiplexes commands over one connection and
/// reconnects on its own, so cloning it per command is cheap.
#[derive(Clone)]
pub struct RedisRegistry {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRegistry").finish_non_exhaustive()
    }
}

impl RedisRegistry {
    /// Connect to `url`.
    ///
    /// `rediss://` URLs are accepted without certificate verification; managed
    /// Redis add-ons present self-signed certificates.
    pub async fn connect(url: &str) -> RegistryResult<Self> {
        let url = insecure_tls_url(url);
        let client = ::redis::Client::open(url.as_str())
            .map_err(|e| RegistryError::InvalidUrl(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RegistryError::Connection(e.to_string()))?;
        info!("Connected to redis registry");
        Ok(Self { conn })
    }
}

/// Append the `#insecure` marker to TLS URLs that do not carry a fragment.
fn insecure_tls_url(url: &str) -> String {
    if url.starts_with("rediss://") && !url.contains('#') {
        format!("{url}#insecure")
    } else {
        url.to_string()
    }
}

fn command_error(command: &'static str) -> impl FnOnce(::redis::RedisError) -> RegistryError {
    move |e| RegistryError::Command {
        command,
        message: e.to_string(),
    }
}

#[async_trait]
impl Registry for RedisRegistry {
    async fn get(&self, key: &str) -> RegistryResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("GET"))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RegistryResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(command_error("SET"))?;
        Ok(())
    }

    async fn set_add(&self, set_key: &str, member: &str) -> RegistryResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = ::redis::cmd("SADD")
            .arg(set_key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(command_error("SADD"))?;
        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> RegistryResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = ::redis::cmd("SMEMBERS")
            .arg(set_key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("SMEMBERS"))?;
        Ok(members)
    }

    async fn scan(&self, cursor: u64, pattern: &str, page_size: usize) -> RegistryResult<ScanPage> {
        let mut conn = self.conn.clone();
        let (next_cursor, keys): (u64, Vec<String>) = ::redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(page_size)
            .query_async(&mut conn)
            .await
            .map_err(command_error("SCAN"))?;
        Ok(ScanPage { keys, next_cursor })
    }

    async fn multi_get(&self, keys: &[String]) -> RegistryResult<Vec<Option<String>>> {
        // MGET with no keys is a protocol error.
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = ::redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(command_error("MGET"))?;
        Ok(values)
    }
}
