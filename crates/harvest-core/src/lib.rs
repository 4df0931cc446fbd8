pub mod cancellation;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod fetch_client;
pub mod job;
pub mod models;
pub mod proxy_pool;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use cancellation::{CancellationRegistry, JobHandle};
pub use dispatcher::Dispatcher;
pub use error::AppError;
pub use events::{ProgressEmitter, ProgressEvent};
pub use fetch_client::{FetchClient, FetchConfig};
pub use job::{DispatchConfig, JobReport, JobStatus, ScrapeJob, TerminationReason};
pub use models::{FieldMap, Record, WorkItem};
pub use proxy_pool::{PoolConfig, ProxyPool, ProxyPoolStats};
pub use traits::{DocumentFetcher, Extractor, HttpResponse, Transport};
