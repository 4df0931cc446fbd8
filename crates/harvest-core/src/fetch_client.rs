use std::time::Duration;

use crate::error::AppError;
use crate::models::WorkItem;
use crate::proxy_pool::ProxyPool;
use crate::traits::{DocumentFetcher, HttpResponse, Transport};

/// Snapshot page of the carrier lookup service, keyed by MC/MX number.
pub const DEFAULT_URL_TEMPLATE: &str = "https://safer.fmcsa.dot.gov/query.asp?query_type=queryCarrierSnapshot&query_param=MC_MX&query_string={id}";

pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for document fetching.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// URL with an `{id}` placeholder for the work item.
    pub url_template: String,
    /// Extra attempts after the first, each through the next proxy.
    pub max_retries: u32,
    /// Upper bound on a single attempt; an attempt that runs over fails
    /// with [`AppError::Timeout`] and is retried like any transient failure.
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl FetchConfig {
    pub fn url_for(&self, id: WorkItem) -> String {
        self.url_template.replace("{id}", &id.to_string())
    }
}

/// Fetches documents through the proxy pool and classifies the outcome.
///
/// - 2xx: success, the used proxy's failure streak is cleared.
/// - 403 / 429 / connection failure: [`AppError::HardBlock`].
/// - attempt over `timeout`: [`AppError::Timeout`].
/// - anything else: [`AppError::TransientFetch`].
///
/// Failed attempts are retried through the next proxy up to `max_retries` times.
#[derive(Clone)]
pub struct FetchClient<T: Transport> {
    transport: T,
    pool: ProxyPool,
    config: FetchConfig,
}

impl<T: Transport> FetchClient<T> {
    pub fn new(transport: T, pool: ProxyPool, config: FetchConfig) -> Self {
        Self {
            transport,
            pool,
            config,
        }
    }

    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch `url`, retrying failed attempts through a rotated proxy.
    ///
    /// Outcomes are recorded against the proxy the attempt actually used,
    /// even if a concurrent fetch has rotated the pool in the meantime.
    pub async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.pool.record_request();

        let mut attempt = 0;
        loop {
            let proxy = self.pool.current();
            let outcome = self.attempt(url, proxy.as_deref()).await;

            let error = match classify(outcome) {
                Ok(body) => {
                    if let Some(address) = &proxy {
                        self.pool.mark_success_for(address);
                    }
                    return Ok(body);
                }
                Err(e) => e,
            };

            let rotated = proxy
                .as_deref()
                .is_some_and(|address| self.pool.mark_failure_for(address));
            if !error.is_retryable() || attempt >= self.config.max_retries {
                tracing::warn!(%url, attempts = attempt + 1, error = %error, "Giving up on fetch");
                return Err(error);
            }
            attempt += 1;

            if let (Some(address), false) = (&proxy, rotated) {
                self.pool.rotate_past(address);
            }
            tracing::debug!(
                %url,
                proxy = proxy.as_deref().unwrap_or("direct"),
                attempt,
                error = %error,
                "Retrying fetch"
            );
        }
    }

    async fn attempt(&self, url: &str, proxy: Option<&str>) -> Result<HttpResponse, AppError> {
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.transport.get(url, proxy)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::Timeout(timeout.as_secs())),
        }
    }
}

impl<T: Transport> DocumentFetcher for FetchClient<T> {
    async fn fetch_document(&self, id: WorkItem) -> Result<String, AppError> {
        let url = self.config.url_for(id);
        self.fetch(&url).await
    }
}

/// Map a raw transport outcome onto the fetch error taxonomy.
pub fn classify(outcome: Result<HttpResponse, AppError>) -> Result<String, AppError> {
    match outcome {
        Ok(response) if response.is_success() => Ok(response.body),
        Ok(HttpResponse { status, .. }) if status == 403 || status == 429 => {
            Err(AppError::HardBlock {
                status: Some(status),
                message: format!("HTTP {status}: possible geo-restriction or IP block"),
            })
        }
        Ok(HttpResponse { status, .. }) => Err(AppError::TransientFetch(format!("HTTP {status}"))),
        Err(AppError::NetworkError(message)) => Err(AppError::HardBlock {
            status: None,
            message,
        }),
        Err(AppError::Timeout(secs)) => Err(AppError::Timeout(secs)),
        Err(e) => Err(AppError::TransientFetch(e.to_string())),
    }
}
