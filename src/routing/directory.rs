//! Routing directory client — asks the metadata authority where an entity
//! lives.
//!
//! Lookups are bounded by a timeout and never fail loudly: anything short of
//! an available, well-formed record comes back as `Unresolved` and the
//! selector moves on to the next rule. Successful lookups are cached per
//! `(kind, id)` with a TTL and can be invalidated eagerly after a failed
//! dispatch.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::{Client as HttpClient, Url};
use serde::Deserialize;

use super::errors::RoutingError;
use super::types::{is_well_formed_url, CacheKey, ContextKind, RoutingTarget};
use crate::config::RoutingConfig;

// ─── Lookup Result ───────────────────────────────────────────────────────────

/// Why a directory lookup produced no usable target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    Timeout,
    ConnectionFailed(String),
    HttpStatus(u16),
    NotFound,
    MalformedRecord(String),
    Unavailable,
}

/// Outcome of a directory lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryLookup {
    Resolved(RoutingTarget),
    Unresolved(UnresolvedReason),
}

impl DirectoryLookup {
    pub fn target(&self) -> Option<&RoutingTarget> {
        match self {
            DirectoryLookup::Resolved(t) => Some(t),
            DirectoryLookup::Unresolved(_) => None,
        }
    }

    pub fn into_target(self) -> Option<RoutingTarget> {
        match self {
            DirectoryLookup::Resolved(t) => Some(t),
            DirectoryLookup::Unresolved(_) => None,
        }
    }
}

/// Record shape served by the metadata authority.
#[derive(Debug, Deserialize)]
struct DirectoryRecord {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    dns_name: Option<String>,
    #[serde(default)]
    health_url: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    input_modes: Vec<String>,
    #[serde(default)]
    output_modes: Vec<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    available: bool,
}

struct CachedTarget {
    target: RoutingTarget,
    expires_at: Instant,
}

// ─── RoutingDirectoryClient ──────────────────────────────────────────────────

/// Client for the external metadata authority, with a shared TTL cache.
///
/// Safe to share across sessions behind an `Arc`; the cache supports
/// concurrent readers.
pub struct RoutingDirectoryClient {
    http: HttpClient,
    base_url: String,
    timeout: Duration,
    ttl: Duration,
    cache: RwLock<HashMap<CacheKey, CachedTarget>>,
}

impl RoutingDirectoryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, ttl: Duration) -> Result<Self, RoutingError> {
        let http = HttpClient::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| RoutingError::ClientBuild {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            ttl,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &RoutingConfig) -> Result<Self, RoutingError> {
        Self::new(
            config.directory_url.clone(),
            config.directory_timeout(),
            config.cache_ttl(),
        )
    }

    /// Resolve the declared routing endpoint for `(kind, id)`.
    ///
    /// Serves from cache when a live entry exists. Never returns an error.
    pub async fn resolve(&self, kind: ContextKind, id: &str) -> DirectoryLookup {
        let key = CacheKey::new(kind, id);
        if let Some(target) = self.cached(&key) {
            tracing::debug!(kind = %kind, id, "routing directory cache hit");
            return DirectoryLookup::Resolved(target);
        }

        let lookup = self.fetch(kind, id).await;
        match &lookup {
            DirectoryLookup::Resolved(target) => {
                tracing::info!(kind = %kind, id, url = %target.url, "routing directory resolved");
                self.store(key, target.clone());
            }
            DirectoryLookup::Unresolved(reason) => {
                tracing::warn!(kind = %kind, id, reason = ?reason, "routing directory unresolved");
            }
        }
        lookup
    }

    /// Drop a cache entry, typically after a dispatch using it failed.
    pub fn invalidate(&self, key: &CacheKey) {
        let removed = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            tracing::info!(kind = %key.kind, id = %key.id, "invalidated routing cache entry");
        }
    }

    /// Number of live (unexpired) cache entries.
    pub fn cached_entries(&self) -> usize {
        let now = Instant::now();
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    fn cached(&self, key: &CacheKey) -> Option<RoutingTarget> {
        let now = Instant::now();
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            match cache.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.target.clone()),
                Some(_) => {} // expired, evict below
                None => return None,
            }
        }
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, e| e.expires_at > now);
        None
    }

    fn store(&self, key: CacheKey, target: RoutingTarget) {
        let entry = CachedTarget {
            target,
            expires_at: Instant::now() + self.ttl,
        };
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    async fn fetch(&self, kind: ContextKind, id: &str) -> DirectoryLookup {
        let url = match self.registry_url(kind, id) {
            Some(url) => url,
            None => {
                return DirectoryLookup::Unresolved(UnresolvedReason::ConnectionFailed(format!(
                    "directory URL '{}' cannot carry a path",
                    self.base_url
                )))
            }
        };

        let request = self.http.get(url).header("Accept", "application/json").send();
        let response = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => return DirectoryLookup::Unresolved(UnresolvedReason::Timeout),
            Ok(Err(e)) if e.is_timeout() => {
                return DirectoryLookup::Unresolved(UnresolvedReason::Timeout)
            }
            Ok(Err(e)) => {
                return DirectoryLookup::Unresolved(UnresolvedReason::ConnectionFailed(e.to_string()))
            }
            Ok(Ok(resp)) => resp,
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return DirectoryLookup::Unresolved(UnresolvedReason::NotFound);
        }
        if !status.is_success() {
            return DirectoryLookup::Unresolved(UnresolvedReason::HttpStatus(status.as_u16()));
        }

        let record: DirectoryRecord = match response.json().await {
            Ok(r) => r,
            Err(e) => {
                return DirectoryLookup::Unresolved(UnresolvedReason::MalformedRecord(e.to_string()))
            }
        };

        record_to_lookup(kind, record)
    }
}

impl RoutingDirectoryClient {
    /// `{base}/registry/{kind}/{id}` with `id` percent-encoded as one segment.
    fn registry_url(&self, kind: ContextKind, id: &str) -> Option<Url> {
        let mut url = Url::parse(&self.base_url).ok()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["registry", kind.as_str(), id]);
        Some(url)
    }
}

/// Turn a raw authority record into a lookup result.
///
/// The record's `url` wins; a bare `dns_name` is composed with the kind's
/// fixed scheme. Unavailable records are never resolved.
fn record_to_lookup(kind: ContextKind, record: DirectoryRecord) -> DirectoryLookup {
    if !record.available {
        tracing::debug!(status = ?record.status, "directory record marked unavailable");
        return DirectoryLookup::Unresolved(UnresolvedReason::Unavailable);
    }

    let url = record
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| is_well_formed_url(u))
        .map(str::to_string)
        .or_else(|| {
            record
                .dns_name
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(|host| {
                    let (scheme, path) = kind.canonical_scheme();
                    format!("{scheme}://{host}{path}")
                })
                .filter(|u| is_well_formed_url(u))
        });

    match url {
        Some(url) => DirectoryLookup::Resolved(RoutingTarget {
            url,
            capabilities: record.capabilities,
            input_modes: record.input_modes,
            output_modes: record.output_modes,
            health_url: record.health_url,
            available: true,
            cached_at: Utc::now(),
        }),
        None => DirectoryLookup::Unresolved(UnresolvedReason::MalformedRecord(
            "record has no usable url or dns_name".into(),
        )),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
