//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::models::{AUTHORITY_STATUS_FIELD, FieldMap, WorkItem};
use crate::traits::{DocumentFetcher, Extractor, HttpResponse, Transport};

/// Tracks how many calls are in flight at once.
#[derive(Clone, Default)]
struct InFlight {
    current: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// A canned transport outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 200 with the given body.
    Body(String),
    /// Given status with an empty body.
    Status(u16),
    ConnectError,
    Timeout,
}

impl MockReply {
    fn into_result(self) -> Result<HttpResponse, AppError> {
        match self {
            MockReply::Body(body) => Ok(HttpResponse::new(200, body)),
            MockReply::Status(status) => Ok(HttpResponse::new(status, "")),
            MockReply::ConnectError => Err(AppError::NetworkError("Connection failed: refused".into())),
            MockReply::Timeout => Err(AppError::Timeout(30)),
        }
    }
}

/// Mock transport with scripted replies.
///
/// Replies fixed for a proxy take precedence; otherwise the queue is popped;
/// once empty every call gets a 200 with a default body.
#[derive(Clone, Default)]
pub struct MockTransport {
    queue: Arc<Mutex<VecDeque<MockReply>>>,
    per_proxy: Arc<Mutex<HashMap<String, MockReply>>>,
    calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
    delay: Duration,
    proxy_delays: Arc<Mutex<HashMap<String, Duration>>>,
    in_flight: InFlight,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(replies.into())),
            ..Self::default()
        }
    }

    pub fn for_proxy(self, proxy: &str, reply: MockReply) -> Self {
        self.per_proxy
            .lock()
            .unwrap()
            .insert(proxy.to_string(), reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests through `proxy` wait `delay` instead of the global delay.
    pub fn with_proxy_delay(self, proxy: &str, delay: Duration) -> Self {
        self.proxy_delays
            .lock()
            .unwrap()
            .insert(proxy.to_string(), delay);
        self
    }

    /// Recorded `(url, proxy)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.in_flight.max()
    }
}

impl Transport for MockTransport {
    async fn get(&self, url: &str, proxy: Option<&str>) -> Result<HttpResponse, AppError> {
        self.in_flight.enter();
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), proxy.map(str::to_string)));

        let delay = proxy
            .and_then(|p| self.proxy_delays.lock().unwrap().get(p).copied())
            .unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let fixed = proxy.and_then(|p| self.per_proxy.lock().unwrap().get(p).cloned());
        let reply = fixed
            .or_else(|| self.queue.lock().unwrap().pop_front())
            .unwrap_or_else(|| MockReply::Body("<html><body>default</body></html>".into()));

        self.in_flight.exit();
        reply.into_result()
    }
}

// ---------------------------------------------------------------------------
// MockDocumentFetcher
// ---------------------------------------------------------------------------

/// Canned outcome for one work item.
#[derive(Debug, Clone)]
pub enum MockDocument {
    /// A document; [`MockExtractor`] uses the text as the authority status.
    Text(String),
    HardBlock,
    Transient,
}

type FetchHook = Arc<dyn Fn() + Send + Sync>;

/// Mock document fetcher keyed by work item.
///
/// Items without a scripted outcome return `"AUTHORIZED FOR Property"`.
#[derive(Clone, Default)]
pub struct MockDocumentFetcher {
    outcomes: Arc<Mutex<HashMap<WorkItem, MockDocument>>>,
    hooks: Arc<Mutex<HashMap<WorkItem, FetchHook>>>,
    fetched: Arc<Mutex<Vec<WorkItem>>>,
    delay: Duration,
    in_flight: InFlight,
}

impl MockDocumentFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, id: WorkItem, outcome: MockDocument) -> Self {
        self.outcomes.lock().unwrap().insert(id, outcome);
        self
    }

    pub fn with_many(self, ids: impl IntoIterator<Item = WorkItem>, outcome: MockDocument) -> Self {
        {
            let mut outcomes = self.outcomes.lock().unwrap();
            for id in ids {
                outcomes.insert(id, outcome.clone());
            }
        }
        self
    }

    /// Run `hook` when `id` is fetched (before the outcome is returned).
    pub fn on_fetch(self, id: WorkItem, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.lock().unwrap().insert(id, Arc::new(hook));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetched(&self) -> Vec<WorkItem> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.in_flight.max()
    }
}

impl DocumentFetcher for MockDocumentFetcher {
    async fn fetch_document(&self, id: WorkItem) -> Result<String, AppError> {
        self.in_flight.enter();
        self.fetched.lock().unwrap().push(id);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let hook = self.hooks.lock().unwrap().get(&id).cloned();
        if let Some(hook) = hook {
            hook();
        }

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| MockDocument::Text("AUTHORIZED FOR Property".into()));

        self.in_flight.exit();
        match outcome {
            MockDocument::Text(text) => Ok(text),
            MockDocument::HardBlock => Err(AppError::HardBlock {
                status: Some(403),
                message: format!("HTTP 403 for item {id}"),
            }),
            MockDocument::Transient => Err(AppError::TransientFetch(format!("HTTP 500 for item {id}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor that treats the whole document as the authority status.
///
/// Documents equal to `"NOT FOUND"` yield no record, `"BROKEN"` yields an error.
#[derive(Clone, Default)]
pub struct MockExtractor;

impl MockExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for MockExtractor {
    fn extract(&self, document: &str) -> Result<Option<FieldMap>, AppError> {
        match document {
            "NOT FOUND" => Ok(None),
            "BROKEN" => Err(AppError::ExtractionError("malformed table".into())),
            status => {
                let mut fields = FieldMap::new();
                fields.insert(AUTHORITY_STATUS_FIELD.to_string(), status.to_string());
                Ok(Some(fields))
            }
        }
    }
}
