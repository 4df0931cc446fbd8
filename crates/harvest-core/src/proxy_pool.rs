//! Rotating egress-proxy pool.
//!
//! Every fetch goes out through the proxy at the current index (or directly
//! when the pool is empty). Failures are counted per proxy; once the current
//! proxy reaches the failure threshold the pool rotates to the next one.
//!
//! ```text
//! [a:0] [b:0] [c:0]    current = a
//!   fail, fail, fail   -> a:3 (unhealthy), rotate
//! [a:3] [b:0] [c:0]    current = b
//!   success            -> b:0
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::AppError;
use crate::traits::Transport;

/// Consecutive failures after which a proxy is rotated away from.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Endpoint requested by health checks. Echoes the caller's origin IP as JSON.
pub const DEFAULT_HEALTH_CHECK_URL: &str = "https://httpbin.org/ip";

/// Interval between background health checks.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// Configuration for proxy rotation and health probing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub failure_threshold: u32,
    pub health_check_url: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            health_check_url: DEFAULT_HEALTH_CHECK_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct ProxyEntry {
    address: String,
    consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct PoolInner {
    entries: Vec<ProxyEntry>,
    current: usize,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
}

impl PoolInner {
    fn position(&self, address: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.address == address)
    }

    fn current_address(&self) -> Option<String> {
        self.entries.get(self.current).map(|e| e.address.clone())
    }
}

/// Health snapshot of one proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    pub address: String,
    pub consecutive_failures: u32,
    pub healthy: bool,
}

/// Usage statistics for monitoring.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyPoolStats {
    pub total_proxies: usize,
    pub current_proxy: Option<String>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage of requests that succeeded, 0.0 when nothing was sent yet.
    pub success_rate: f64,
    pub proxies: Vec<ProxyStatus>,
}

/// Outcome of probing one proxy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyHealthReport {
    pub address: String,
    pub working: bool,
    /// Origin IP reported by the health check endpoint.
    pub origin: Option<String>,
    pub error: Option<String>,
}

/// Thread-safe rotating proxy pool. Cloning shares the same pool.
#[derive(Clone)]
pub struct ProxyPool {
    config: PoolConfig,
    inner: Arc<Mutex<PoolInner>>,
    /// Serialises health checks so at most one check request is in flight.
    check_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl ProxyPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(PoolInner::default())),
            check_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Create a pool with default configuration and the given proxies.
    pub fn with_proxies<I, S>(proxies: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pool = Self::default();
        pool.set_proxies(proxies)?;
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy pool mutex");
            poisoned.into_inner()
        })
    }

    /// Replace the pool. Every failure counter and the current index reset to 0.
    ///
    /// The whole list is rejected if any entry is not a valid proxy URI.
    pub fn set_proxies<I, S>(&self, proxies: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = proxies
            .into_iter()
            .map(|p| {
                let address = p.into().trim().to_string();
                validate_proxy_uri(&address)?;
                Ok(ProxyEntry {
                    address,
                    consecutive_failures: 0,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let mut inner = self.lock_inner();
        tracing::info!(count = entries.len(), "Proxy pool updated");
        inner.entries = entries;
        inner.current = 0;
        Ok(())
    }

    /// The proxy to use for the next request, or `None` for a direct connection.
    pub fn current(&self) -> Option<String> {
        self.lock_inner().current_address()
    }

    pub fn current_index(&self) -> usize {
        self.lock_inner().current
    }

    /// Restore a persisted rotation index. Out-of-range values reset to 0.
    pub fn set_current_index(&self, index: usize) {
        let mut inner = self.lock_inner();
        if index < inner.entries.len() {
            inner.current = index;
        } else {
            if !inner.entries.is_empty() {
                tracing::warn!(index, "Invalid proxy index, reset to 0");
            }
            inner.current = 0;
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.lock_inner()
            .entries
            .iter()
            .map(|e| e.address.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_inner().entries.is_empty()
    }

    /// Count one logical request (independent of how many attempts it takes).
    pub fn record_request(&self) {
        self.lock_inner().total_requests += 1;
    }

    /// The current proxy worked: its failure streak is over.
    pub fn mark_success(&self) {
        let mut inner = self.lock_inner();
        if !inner.entries.is_empty() {
            let current = inner.current;
            Self::record_success_at(&mut inner, current);
        }
    }

    /// `address` served a request. Only that proxy's streak is cleared, even
    /// if the pool has rotated away from it since the request went out.
    pub fn mark_success_for(&self, address: &str) {
        let mut inner = self.lock_inner();
        if let Some(index) = inner.position(address) {
            Self::record_success_at(&mut inner, index);
        }
    }

    /// The current proxy failed. Rotates once it reaches the failure threshold.
    ///
    /// Returns `true` if this call rotated the pool.
    pub fn mark_failure(&self) -> bool {
        let mut inner = self.lock_inner();
        if inner.entries.is_empty() {
            return false;
        }
        let current = inner.current;
        self.record_failure_at(&mut inner, current)
    }

    /// A request through `address` failed.
    ///
    /// Rotates at the threshold only while `address` is still the current
    /// proxy. Returns `true` if this call rotated the pool.
    pub fn mark_failure_for(&self, address: &str) -> bool {
        let mut inner = self.lock_inner();
        match inner.position(address) {
            Some(index) => self.record_failure_at(&mut inner, index),
            None => false,
        }
    }

    fn record_success_at(inner: &mut PoolInner, index: usize) {
        inner.entries[index].consecutive_failures = 0;
        inner.successful_requests += 1;
    }

    fn record_failure_at(&self, inner: &mut PoolInner, index: usize) -> bool {
        let entry = &mut inner.entries[index];
        entry.consecutive_failures += 1;
        let failures = entry.consecutive_failures;
        tracing::warn!(proxy = %entry.address, failures, "Proxy request failed");
        inner.failed_requests += 1;

        if failures >= self.config.failure_threshold && index == inner.current {
            self.rotate_locked(inner, true);
            true
        } else {
            false
        }
    }

    /// Advance to the next proxy if `forced` or the current one is over the threshold.
    ///
    /// Returns the (possibly unchanged) current proxy.
    pub fn rotate(&self, forced: bool) -> Option<String> {
        let mut inner = self.lock_inner();
        self.rotate_locked(&mut inner, forced);
        inner.current_address()
    }

    /// Rotate away from `address` if it is still the current proxy.
    ///
    /// Concurrent callers that failed on the same proxy advance the pool once.
    pub fn rotate_past(&self, address: &str) -> Option<String> {
        let mut inner = self.lock_inner();
        if inner.current_address().as_deref() == Some(address) {
            self.rotate_locked(&mut inner, true);
        }
        inner.current_address()
    }

    fn rotate_locked(&self, inner: &mut PoolInner, forced: bool) {
        let len = inner.entries.len();
        if len == 0 {
            return;
        }
        let over_threshold =
            inner.entries[inner.current].consecutive_failures >= self.config.failure_threshold;
        if forced || over_threshold {
            inner.current = (inner.current + 1) % len;
            tracing::info!(
                proxy = %inner.entries[inner.current].address,
                index = inner.current,
                "Rotated proxy"
            );
        }
    }

    pub fn stats(&self) -> ProxyPoolStats {
        let inner = self.lock_inner();
        let threshold = self.config.failure_threshold;

        let success_rate = if inner.total_requests > 0 {
            inner.successful_requests as f64 / inner.total_requests as f64 * 100.0
        } else {
            0.0
        };

        ProxyPoolStats {
            total_proxies: inner.entries.len(),
            current_proxy: inner.current_address(),
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            success_rate,
            proxies: inner
                .entries
                .iter()
                .map(|e| ProxyStatus {
                    address: e.address.clone(),
                    consecutive_failures: e.consecutive_failures,
                    healthy: e.consecutive_failures < threshold,
                })
                .collect(),
        }
    }

    /// Check every proxy, one at a time, against the configured endpoint.
    ///
    /// A working proxy has its failure streak cleared; a failing one gets one
    /// more failure but is neither removed nor rotated away from. The current
    /// index is left untouched. Concurrent callers queue behind each other.
    pub async fn health_check_all<T: Transport>(&self, transport: &T) -> Vec<ProxyHealthReport> {
        let _check_guard = self.check_lock.lock().await;

        let addresses = self.addresses();
        if addresses.is_empty() {
            tracing::info!("No proxies configured for health check");
            return Vec::new();
        }

        tracing::info!(count = addresses.len(), "Running proxy health check");

        let mut reports = Vec::with_capacity(addresses.len());
        for (index, address) in addresses.into_iter().enumerate() {
            let report = match transport.get(&self.config.health_check_url, Some(&address)).await {
                Ok(response) if response.is_success() => {
                    let origin = serde_json::from_str::<serde_json::Value>(&response.body)
                        .ok()
                        .and_then(|v| v.get("origin")?.as_str().map(str::to_string));
                    tracing::info!(proxy = %address, ?origin, "Proxy is working");
                    ProxyHealthReport {
                        address,
                        working: true,
                        origin,
                        error: None,
                    }
                }
                Ok(response) => {
                    tracing::warn!(proxy = %address, status = response.status, "Proxy health check failed");
                    ProxyHealthReport {
                        address,
                        working: false,
                        origin: None,
                        error: Some(format!("Status: {}", response.status)),
                    }
                }
                Err(e) => {
                    tracing::warn!(proxy = %address, error = %e, "Proxy health check error");
                    ProxyHealthReport {
                        address,
                        working: false,
                        origin: None,
                        error: Some(e.to_string()),
                    }
                }
            };

            self.record_check(index, &report);
            reports.push(report);
        }

        reports
    }

    fn record_check(&self, index: usize, report: &ProxyHealthReport) {
        let mut inner = self.lock_inner();
        // The pool may have been replaced while the check was in flight.
        let Some(entry) = inner
            .entries
            .get_mut(index)
            .filter(|e| e.address == report.address)
        else {
            return;
        };
        if report.working {
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures += 1;
        }
    }

    /// Run [`health_check_all`](Self::health_check_all) every `interval` until cancelled.
    pub fn spawn_health_checks<T>(
        &self,
        transport: T,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()>
    where
        T: Transport + 'static,
    {
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        pool.health_check_all(&transport).await;
                    }
                    () = cancel_token.cancelled() => break,
                }
            }
            tracing::debug!("Proxy health checks stopped");
        })
    }
}

/// Check that `uri` is `scheme://[user:pass@]host:port` with a supported scheme.
pub fn validate_proxy_uri(uri: &str) -> Result<(), AppError> {
    let invalid = |reason: &str| AppError::InvalidProxy {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;

    if !SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
        return Err(invalid(&format!(
            "scheme '{}' is not supported (expected one of {})",
            parsed.scheme(),
            SUPPORTED_SCHEMES.join(", ")
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    if parsed.port_or_known_default().is_none() {
        return Err(invalid("missing port"));
    }
    Ok(())
}
