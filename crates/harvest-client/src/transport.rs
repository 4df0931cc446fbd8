use std::sync::Arc;
use std::time::Duration;

use harvest_core::error::AppError;
use harvest_core::traits::{HttpResponse, Transport};
use moka::future::Cache;
use reqwest::{Client, Proxy};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; Harvest/0.1)";

/// Idle proxy clients are dropped after this long.
const CLIENT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

const MAX_CACHED_CLIENTS: u64 = 512;

/// HTTP transport using reqwest.
///
/// One `Client` per egress proxy, built on first use and cached, so
/// connections through the same proxy are pooled. Direct requests share a
/// single client. Non-2xx statuses are returned as responses.
#[derive(Clone)]
pub struct ReqwestTransport {
    direct: Client,
    proxied: Cache<String, Client>,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let direct = base_builder(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        let proxied = Cache::builder()
            .max_capacity(MAX_CACHED_CLIENTS)
            .time_to_idle(CLIENT_IDLE_TTL)
            .build();

        Ok(Self {
            direct,
            proxied,
            timeout,
        })
    }

    async fn client_for(&self, proxy: &str) -> Result<Client, AppError> {
        let timeout = self.timeout;
        self.proxied
            .try_get_with(proxy.to_string(), async move {
                let route = Proxy::all(proxy).map_err(|e| AppError::InvalidProxy {
                    uri: proxy.to_string(),
                    reason: e.to_string(),
                })?;
                tracing::debug!(%proxy, "Building proxied HTTP client");
                base_builder(timeout)
                    .proxy(route)
                    .build()
                    .map_err(|e| AppError::HttpError(e.to_string()))
            })
            .await
            .map_err(|e: Arc<AppError>| {
                Arc::try_unwrap(e).unwrap_or_else(|shared| AppError::HttpError(shared.to_string()))
            })
    }

    /// Number of proxy clients currently cached.
    pub async fn cached_clients(&self) -> u64 {
        self.proxied.run_pending_tasks().await;
        self.proxied.entry_count()
    }

    fn map_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout.as_secs())
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

fn base_builder(timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder().user_agent(USER_AGENT).timeout(timeout)
}

impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, proxy: Option<&str>) -> Result<HttpResponse, AppError> {
        let client = match proxy {
            Some(proxy) => self.client_for(proxy).await?,
            None => self.direct.clone(),
        };

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout.as_secs())
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_returns_body_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query.asp"))
            .and(query_param("query_string", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let url = format!("{}/query.asp?query_string=42", server.uri());
        let response = transport.get(&url, None).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport.get(&server.uri(), None).await.unwrap();

        assert_eq!(response.status, 403);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::with_timeout(Duration::from_millis(200)).unwrap();
        let err = transport.get(&server.uri(), None).await.unwrap_err();

        assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        // Bind then release a port so nothing is listening on it.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .get(&format!("http://127.0.0.1:{port}/"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NetworkError(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_requests_go_through_proxy_and_reuse_client() {
        // The mock server plays the forward proxy: plain-HTTP requests are
        // sent to it in absolute form.
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("via proxy"))
            .expect(2)
            .mount(&proxy)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        for _ in 0..2 {
            let response = transport
                .get("http://carrier-lookup.invalid/snapshot", Some(&proxy.uri()))
                .await
                .unwrap();
            assert_eq!(response.body, "via proxy");
        }

        assert_eq!(transport.cached_clients().await, 1);
    }
}
