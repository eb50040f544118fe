//! Key listing and pagination.
//!
//! Keys are listed with a single `KEYS` call when the database is small and
//! with a `SCAN` cursor loop when it is large or when the server refuses
//! `KEYS`. The full listing is materialized and then sliced into pages.

use std::future::Future;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::RedisResult;
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionDescriptor;
use crate::error::{is_rejection, LensError};

pub const MATCH_ALL: &str = "*";

/// Above this many keys, `*` listings go straight to SCAN.
pub const DEFAULT_SCAN_THRESHOLD: u64 = 10_000;

/// COUNT hint passed with every SCAN call.
pub const DEFAULT_SCAN_BATCH: u32 = 1_000;

pub const DEFAULT_PER_PAGE: usize = 50;

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub scan_threshold: u64,
    pub scan_batch: u32,
    pub connect_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            scan_threshold: DEFAULT_SCAN_THRESHOLD,
            scan_batch: DEFAULT_SCAN_BATCH,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// The three keyspace primitives the catalog needs from a Redis connection.
pub trait KeySource {
    /// DBSIZE
    fn approximate_key_count(&mut self) -> impl Future<Output = RedisResult<u64>> + Send;

    /// KEYS pattern
    fn match_keys(
        &mut self,
        pattern: &str,
    ) -> impl Future<Output = RedisResult<Vec<String>>> + Send;

    /// SCAN cursor MATCH pattern COUNT count
    fn scan_batch(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: u32,
    ) -> impl Future<Output = RedisResult<(u64, Vec<String>)>> + Send;
}

impl KeySource for MultiplexedConnection {
    async fn approximate_key_count(&mut self) -> RedisResult<u64> {
        redis::cmd("DBSIZE").query_async(self).await
    }

    async fn match_keys(&mut self, pattern: &str) -> RedisResult<Vec<String>> {
        redis::cmd("KEYS").arg(pattern).query_async(self).await
    }

    async fn scan_batch(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: u32,
    ) -> RedisResult<(u64, Vec<String>)> {
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(self)
            .await
    }
}

/// List every key matching `pattern`.
///
/// The result is in server order and may contain duplicates when SCAN was
/// used; callers must tolerate both.
pub async fn list_keys<S: KeySource>(
    source: &mut S,
    pattern: &str,
    config: &CatalogConfig,
) -> Result<Vec<String>, LensError> {
    if pattern == MATCH_ALL {
        match source.approximate_key_count().await {
            Ok(key_count) if key_count > config.scan_threshold => {
                tracing::info!(
                    key_count,
                    threshold = config.scan_threshold,
                    "Large database detected, using SCAN instead of KEYS"
                );
                return scan_keys(source, pattern, config.scan_batch).await;
            }
            Ok(_) => {}
            Err(e) if is_rejection(&e) => {
                tracing::warn!(
                    error = %e,
                    "DBSIZE unavailable, trying KEYS without a size estimate"
                );
            }
            Err(e) => return Err(LensError::from_listing(e)),
        }
    }

    match source.match_keys(pattern).await {
        Ok(keys) => Ok(keys),
        Err(e) if is_rejection(&e) => {
            tracing::warn!(error = %e, "KEYS command failed, falling back to SCAN");
            scan_keys(source, pattern, config.scan_batch).await
        }
        Err(e) => {
            tracing::error!(error = %e, pattern, "Error getting keys");
            Err(LensError::from_listing(e))
        }
    }
}

/// Walk the full SCAN cursor, starting and ending at cursor 0.
pub async fn scan_keys<S: KeySource>(
    source: &mut S,
    pattern: &str,
    batch: u32,
) -> Result<Vec<String>, LensError> {
    let mut keys: Vec<String> = Vec::new();
    let mut cursor: u64 = 0;
    let mut iterations = 0usize;

    loop {
        let (next_cursor, found) = source
            .scan_batch(cursor, pattern, batch)
            .await
            .map_err(LensError::from_listing)?;

        keys.extend(found);
        cursor = next_cursor;
        iterations += 1;

        if cursor == 0 {
            break;
        }
    }

    tracing::debug!(iterations, keys = keys.len(), pattern, "SCAN complete");
    Ok(keys)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: usize,

    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    DEFAULT_PER_PAGE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PageRequest {
    pub fn new(page: usize, per_page: usize) -> Result<Self, LensError> {
        let req = Self { page, per_page };
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<(), LensError> {
        if self.page < 1 {
            return Err(LensError::InvalidRequest("page must be at least 1".to_string()));
        }
        if self.per_page < 1 {
            return Err(LensError::InvalidRequest(
                "per_page must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyPage {
    pub keys: Vec<String>,
    pub count: usize,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// Slice one page out of a full listing. Pages past the end come back empty.
pub fn paginate(all_keys: Vec<String>, request: PageRequest) -> KeyPage {
    let PageRequest { page, per_page } = request;
    let total = all_keys.len();
    // per_page is validated upstream; zero still must not panic here
    let total_pages = if per_page == 0 { 0 } else { total.div_ceil(per_page) };

    let start = page.saturating_sub(1).saturating_mul(per_page);
    let end = start.saturating_add(per_page).min(total);

    let keys: Vec<String> = if start >= total {
        Vec::new()
    } else {
        all_keys.into_iter().skip(start).take(end - start).collect()
    };

    KeyPage {
        count: keys.len(),
        keys,
        total,
        page,
        per_page,
        total_pages,
    }
}

/// Connect, list, and paginate in one go.
pub async fn get_keys_page(
    descriptor: &ConnectionDescriptor,
    pattern: &str,
    request: PageRequest,
    config: &CatalogConfig,
) -> Result<KeyPage, LensError> {
    request.validate()?;
    let mut conn = descriptor.open(config.connect_timeout).await?;
    let all_keys = list_keys(&mut conn, pattern, config).await?;
    Ok(paginate(all_keys, request))
}
