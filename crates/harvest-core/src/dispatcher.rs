//! Batch dispatcher: runs a [`ScrapeJob`] to completion.
//!
//! Items are processed in contiguous batches of at most `concurrency_limit`.
//! All items of a batch run concurrently and the whole batch is awaited before
//! the next one starts, so no more than `concurrency_limit` fetches are ever
//! in flight for one job. Stop requests and the hard-block abort only take
//! effect between batches.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::cancellation::{CancellationRegistry, JobHandle};
use crate::error::AppError;
use crate::events::{ProgressEmitter, ProgressEvent};
use crate::job::{DispatchConfig, JobReport, JobStatus, ScrapeJob, TerminationReason};
use crate::models::{Record, WorkItem};
use crate::proxy_pool::ProxyPool;
use crate::traits::{DocumentFetcher, Extractor};

/// Running counters of one job, shared by the concurrent items of a batch.
#[derive(Debug, Default)]
struct JobProgress {
    processed: AtomicUsize,
    successful: AtomicUsize,
    consecutive_blocks: AtomicU32,
    abort: AtomicBool,
}

impl JobProgress {
    fn reset_blocks(&self) {
        self.consecutive_blocks.store(0, Ordering::SeqCst);
    }

    /// Count one hard block. Returns the new streak length.
    fn add_block(&self) -> u32 {
        self.consecutive_blocks.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

/// Removes a job's stop registration when the run ends, however it ends.
struct RegistrationGuard<'a> {
    registry: &'a CancellationRegistry,
    handle: JobHandle,
    id: u64,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        self.registry.deregister_registration(&self.handle, self.id);
    }
}

/// Orchestrates fetch → extract → classify for every item of a job.
///
/// Generic over the fetch and extraction capabilities so tests can run jobs
/// without any network.
pub struct Dispatcher<F, E>
where
    F: DocumentFetcher,
    E: Extractor,
{
    fetcher: F,
    extractor: E,
    registry: CancellationRegistry,
    pool: Option<ProxyPool>,
    config: DispatchConfig,
}

impl<F, E> Dispatcher<F, E>
where
    F: DocumentFetcher,
    E: Extractor,
{
    pub fn new(fetcher: F, extractor: E, registry: CancellationRegistry) -> Self {
        Self {
            fetcher,
            extractor,
            registry,
            pool: None,
            config: DispatchConfig::default(),
        }
    }

    /// Attach the pool that receives a job's proxy list at job start.
    pub fn with_proxy_pool(mut self, pool: ProxyPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// Run `job` and return whatever records were collected.
    ///
    /// Fails only when the job itself is invalid (zero concurrency, malformed
    /// proxy list); fetch and extraction failures are reported as events.
    pub async fn run(
        &self,
        job: ScrapeJob,
        emitter: &ProgressEmitter,
    ) -> Result<JobReport, AppError> {
        job.validate()?;
        if let Some(proxies) = &job.proxies {
            let pool = self.pool.as_ref().ok_or_else(|| {
                AppError::ConfigError("job carries proxies but no proxy pool is attached".into())
            })?;
            pool.set_proxies(proxies.iter().cloned())?;
        }

        let cancel_token = CancellationToken::new();
        let registration = job.handle.clone().map(|handle| {
            let token = cancel_token.clone();
            let id = self.registry.register(handle.clone(), move || token.cancel());
            RegistrationGuard {
                registry: &self.registry,
                handle,
                id,
            }
        });

        let start = Instant::now();
        let total = job.items.len();
        let total_batches = job.batch_count();
        let progress = JobProgress::default();
        let mut records = Vec::new();
        let mut status = JobStatus::Pending;
        let mut termination = TerminationReason::Normal;

        emitter
            .emit(ProgressEvent::Init {
                total_records: total,
                total_batches,
            })
            .await;

        for (index, batch) in job.batches().enumerate() {
            let batch_number = index + 1;

            if cancel_token.is_cancelled() {
                emitter
                    .emit(ProgressEvent::ManualStop {
                        batch_number,
                        message: "Scraping stopped by user request".into(),
                    })
                    .await;
                termination = TerminationReason::ManualStop;
                emitter
                    .emit(ProgressEvent::EarlyStopped {
                        reason: termination,
                        message: format!(
                            "Scraping stopped manually before batch {batch_number} of {total_batches}."
                        ),
                    })
                    .await;
                break;
            }

            if status == JobStatus::Pending {
                status = JobStatus::Running;
                tracing::debug!(handle = ?job.handle, %status, "Job running");
            }

            emitter
                .emit(ProgressEvent::BatchStart {
                    batch_number,
                    total_batches,
                })
                .await;

            let results = join_all(batch.iter().map(|&id| {
                self.process_item(id, total, job.include_not_authorized, &progress, emitter)
            }))
            .await;
            records.extend(results.into_iter().flatten());

            emitter
                .emit(ProgressEvent::BatchComplete {
                    batch_number,
                    total_batches,
                    batch_size: batch.len(),
                })
                .await;

            if progress.aborted() && batch_number < total_batches {
                termination = TerminationReason::BlockAbort;
                emitter
                    .emit(ProgressEvent::EarlyStopped {
                        reason: termination,
                        message: "Scraping stopped early due to multiple geo-restriction errors."
                            .into(),
                    })
                    .await;
                break;
            }
        }

        drop(registration);
        status = termination.status();

        let execution_time = start.elapsed();
        let processed = progress.processed.load(Ordering::SeqCst);
        let successful = progress.successful.load(Ordering::SeqCst);

        emitter
            .emit(ProgressEvent::Complete {
                total_records: total,
                processed_records: processed,
                successful_records: successful,
                execution_time: execution_time.as_secs_f64(),
                early_stopped: termination != TerminationReason::Normal,
                termination,
            })
            .await;

        Ok(JobReport {
            records,
            processed,
            successful,
            total_batches,
            execution_time,
            termination,
            status,
        })
    }

    /// Fetch, extract and classify one item. Returns the record if it is kept.
    async fn process_item(
        &self,
        id: WorkItem,
        total: usize,
        include_not_authorized: bool,
        progress: &JobProgress,
        emitter: &ProgressEmitter,
    ) -> Option<Record> {
        let processed = progress.processed.fetch_add(1, Ordering::SeqCst) + 1;
        emitter
            .emit(ProgressEvent::ItemStart {
                id,
                processed,
                total,
            })
            .await;

        let document = match self.fetcher.fetch_document(id).await {
            Ok(document) => {
                progress.reset_blocks();
                document
            }
            Err(e) if e.is_hard_block() => {
                self.record_hard_block(id, &e, progress, emitter).await;
                return None;
            }
            Err(e) => {
                // Not evidence of blocking.
                progress.reset_blocks();
                emitter
                    .emit(ProgressEvent::ItemError {
                        id,
                        error: e.to_string(),
                    })
                    .await;
                return None;
            }
        };

        match self.extractor.extract(&document) {
            Ok(Some(fields)) => {
                progress.successful.fetch_add(1, Ordering::SeqCst);
                let record = Record::classify(id, fields);
                let kept = record.is_kept(include_not_authorized);
                emitter
                    .emit(ProgressEvent::ItemSuccess {
                        id,
                        record: record.clone(),
                        kept,
                    })
                    .await;
                kept.then_some(record)
            }
            Ok(None) => {
                emitter
                    .emit(ProgressEvent::ItemError {
                        id,
                        error: AppError::ItemNotFound(id).to_string(),
                    })
                    .await;
                None
            }
            Err(e) => {
                emitter
                    .emit(ProgressEvent::ItemError {
                        id,
                        error: e.to_string(),
                    })
                    .await;
                None
            }
        }
    }

    async fn record_hard_block(
        &self,
        id: WorkItem,
        error: &AppError,
        progress: &JobProgress,
        emitter: &ProgressEmitter,
    ) {
        let threshold = self.config.block_threshold;
        let consecutive = progress.add_block();

        emitter
            .emit(ProgressEvent::AccessForbidden {
                id,
                error: format!("{error} ({consecutive}/{threshold})"),
                consecutive,
                threshold,
            })
            .await;

        if consecutive >= threshold && !progress.abort.swap(true, Ordering::SeqCst) {
            emitter
                .emit(ProgressEvent::GeoRestrictionLimit {
                    consecutive,
                    message: format!(
                        "Detected {threshold} consecutive access errors. Stopping scraping to prevent wasted resources."
                    ),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::models::{NOT_AUTHORIZED_MARKER, OUT_OF_SERVICE_MARKER};
    use crate::testutil::{MockDocument, MockDocumentFetcher, MockExtractor};

    fn recorder() -> (ProgressEmitter, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let emitter = ProgressEmitter::from_fn(move |e| sink.lock().unwrap().push(e.clone()));
        (emitter, events)
    }

    fn kinds(events: &Arc<Mutex<Vec<ProgressEvent>>>) -> Vec<&'static str> {
        events.lock().unwrap().iter().map(ProgressEvent::kind).collect()
    }

    fn count(kinds: &[&str], kind: &str) -> usize {
        kinds.iter().filter(|k| **k == kind).count()
    }

    fn dispatcher(fetcher: MockDocumentFetcher) -> Dispatcher<MockDocumentFetcher, MockExtractor> {
        Dispatcher::new(fetcher, MockExtractor::new(), CancellationRegistry::new())
    }

    fn assert_complete_last(kinds: &[&str]) {
        assert_eq!(kinds.last(), Some(&"complete"));
        assert_eq!(count(kinds, "complete"), 1);
    }

    #[tokio::test]
    async fn empty_job_emits_init_then_complete() {
        let fetcher = MockDocumentFetcher::new();
        let (emitter, events) = recorder();

        let report = dispatcher(fetcher.clone())
            .run(ScrapeJob::new(vec![], 5), &emitter)
            .await
            .unwrap();

        assert_eq!(kinds(&events), ["init", "complete"]);
        assert!(report.records.is_empty());
        assert_eq!(report.total_batches, 0);
        assert_eq!(report.processed, 0);
        assert_eq!(report.termination, TerminationReason::Normal);
        assert_eq!(report.status, JobStatus::Completed);
        assert!(fetcher.fetched().is_empty());
        assert!(matches!(
            events.lock().unwrap()[0],
            ProgressEvent::Init {
                total_records: 0,
                total_batches: 0
            }
        ));
    }

    #[tokio::test]
    async fn happy_path_collects_records_in_item_order() {
        let (emitter, events) = recorder();

        let report = dispatcher(MockDocumentFetcher::new())
            .run(ScrapeJob::range(1, 7, 3).unwrap(), &emitter)
            .await
            .unwrap();

        let ids: Vec<_> = report.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, [1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(report.processed, 7);
        assert_eq!(report.successful, 7);
        assert_eq!(report.total_batches, 3);

        let kinds = kinds(&events);
        assert_eq!(kinds[0], "init");
        assert_eq!(count(&kinds, "batchStart"), 3);
        assert_eq!(count(&kinds, "batchComplete"), 3);
        assert_eq!(count(&kinds, "itemStart"), 7);
        assert_eq!(count(&kinds, "itemSuccess"), 7);
        assert_eq!(count(&kinds, "earlyStopped"), 0);
        assert_complete_last(&kinds);
    }

    #[tokio::test]
    async fn batch_events_are_monotonic() {
        let (emitter, events) = recorder();

        dispatcher(MockDocumentFetcher::new())
            .run(ScrapeJob::range(1, 10, 4).unwrap(), &emitter)
            .await
            .unwrap();

        let mut expected = 1;
        let mut open = false;
        for event in events.lock().unwrap().iter() {
            match event {
                ProgressEvent::BatchStart { batch_number, .. } => {
                    assert!(!open);
                    assert_eq!(*batch_number, expected);
                    open = true;
                }
                ProgressEvent::ItemStart { .. } | ProgressEvent::ItemSuccess { .. } => assert!(open),
                ProgressEvent::BatchComplete {
                    batch_number,
                    batch_size,
                    ..
                } => {
                    assert_eq!(*batch_number, expected);
                    assert_eq!(*batch_size, if expected == 3 { 2 } else { 4 });
                    open = false;
                    expected += 1;
                }
                _ => {}
            }
        }
        assert_eq!(expected, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_limit_in_flight() {
        let fetcher = MockDocumentFetcher::new().with_delay(Duration::from_millis(50));

        let report = dispatcher(fetcher.clone())
            .run(ScrapeJob::range(1, 23, 5).unwrap(), &ProgressEmitter::silent())
            .await
            .unwrap();

        assert_eq!(report.processed, 23);
        assert_eq!(fetcher.max_in_flight(), 5);
    }

    #[tokio::test]
    async fn success_in_the_middle_resets_block_streak() {
        let fetcher = MockDocumentFetcher::new()
            .with_many([1, 2, 3, 4, 6, 7, 8, 9, 10], MockDocument::HardBlock);
        let (emitter, events) = recorder();

        let report = dispatcher(fetcher.clone())
            .run(ScrapeJob::range(1, 10, 5).unwrap(), &emitter)
            .await
            .unwrap();

        assert_eq!(report.processed, 10);
        assert_eq!(report.successful, 1);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].id, 5);
        assert_eq!(report.termination, TerminationReason::Normal);
        assert_eq!(fetcher.fetched().len(), 10);

        let kinds = kinds(&events);
        assert_eq!(count(&kinds, "accessForbidden"), 9);
        assert_eq!(count(&kinds, "earlyStopped"), 0);
        assert_complete_last(&kinds);
    }

    #[tokio::test]
    async fn five_consecutive_blocks_abort_remaining_batches() {
        let fetcher = MockDocumentFetcher::new().with_many(1..=5, MockDocument::HardBlock);
        let (emitter, events) = recorder();

        let report = dispatcher(fetcher.clone())
            .run(ScrapeJob::range(1, 10, 5).unwrap(), &emitter)
            .await
            .unwrap();

        assert_eq!(fetcher.fetched(), [1, 2, 3, 4, 5]);
        assert_eq!(report.processed, 5);
        assert!(report.records.is_empty());
        assert_eq!(report.termination, TerminationReason::BlockAbort);
        assert_eq!(report.status, JobStatus::EarlyStopped);
        assert!(report.early_stopped());

        let kinds = kinds(&events);
        assert_eq!(count(&kinds, "accessForbidden"), 5);
        assert_eq!(count(&kinds, "geoRestrictionLimit"), 1);
        assert_eq!(count(&kinds, "batchStart"), 1);
        let stop_at = kinds.iter().position(|k| *k == "earlyStopped").unwrap();
        assert_eq!(kinds[stop_at - 1], "batchComplete");
        assert_complete_last(&kinds);

        let events = events.lock().unwrap();
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Complete {
                early_stopped: true,
                termination: TerminationReason::BlockAbort,
                processed_records: 5,
                ..
            })
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::AccessForbidden { id: 5, consecutive: 5, threshold: 5, .. }
        )));
    }

    #[tokio::test]
    async fn transient_failure_resets_block_streak() {
        let fetcher = MockDocumentFetcher::new()
            .with_many([1, 2, 3, 4, 6, 7, 8, 9], MockDocument::HardBlock)
            .with(5, MockDocument::Transient);
        let (emitter, events) = recorder();

        let report = dispatcher(fetcher)
            .run(ScrapeJob::range(1, 12, 10).unwrap(), &emitter)
            .await
            .unwrap();

        assert_eq!(report.termination, TerminationReason::Normal);
        assert_eq!(report.processed, 12);
        let kinds = kinds(&events);
        assert_eq!(count(&kinds, "geoRestrictionLimit"), 0);
        assert_eq!(count(&kinds, "itemError"), 1);
    }

    #[tokio::test]
    async fn custom_block_threshold() {
        let fetcher = MockDocumentFetcher::new().with_many(1..=2, MockDocument::HardBlock);

        let report = dispatcher(fetcher)
            .with_config(DispatchConfig { block_threshold: 2 })
            .run(ScrapeJob::range(1, 6, 2).unwrap(), &ProgressEmitter::silent())
            .await
            .unwrap();

        assert_eq!(report.termination, TerminationReason::BlockAbort);
        assert_eq!(report.processed, 2);
    }

    #[tokio::test]
    async fn stop_request_skips_next_batch() {
        let registry = CancellationRegistry::new();
        let stopper = registry.clone();
        let fetcher = MockDocumentFetcher::new().on_fetch(3, move || {
            assert!(stopper.request_stop("job-1"));
        });
        let (emitter, events) = recorder();

        let dispatcher = Dispatcher::new(fetcher.clone(), MockExtractor::new(), registry.clone());
        let report = dispatcher
            .run(ScrapeJob::range(1, 15, 5).unwrap().with_handle("job-1"), &emitter)
            .await
            .unwrap();

        // The batch in flight when the stop arrived still ran to completion.
        assert_eq!(fetcher.fetched(), [1, 2, 3, 4, 5]);
        assert_eq!(report.processed, 5);
        assert_eq!(report.records.len(), 5);
        assert_eq!(report.termination, TerminationReason::ManualStop);
        assert_eq!(report.status, JobStatus::ManuallyStopped);

        let kinds = kinds(&events);
        assert_eq!(
            &kinds[kinds.len() - 4..],
            ["batchComplete", "manualStop", "earlyStopped", "complete"]
        );
        assert!(matches!(
            events.lock().unwrap().iter().find(|e| e.kind() == "manualStop"),
            Some(ProgressEvent::ManualStop { batch_number: 2, .. })
        ));

        assert!(!registry.is_registered("job-1"));
        assert!(!registry.request_stop("job-1"));
    }

    #[tokio::test]
    async fn stop_for_other_handle_has_no_effect() {
        let registry = CancellationRegistry::new();
        let stopper = registry.clone();
        let fetcher = MockDocumentFetcher::new().on_fetch(1, move || {
            assert!(!stopper.request_stop("someone-else"));
        });

        let report = Dispatcher::new(fetcher, MockExtractor::new(), registry)
            .run(ScrapeJob::range(1, 6, 2).unwrap().with_handle("job-1"), &ProgressEmitter::silent())
            .await
            .unwrap();

        assert_eq!(report.termination, TerminationReason::Normal);
        assert_eq!(report.processed, 6);
    }

    #[tokio::test]
    async fn handle_is_registered_only_while_running() {
        let registry = CancellationRegistry::new();
        let observer = registry.clone();
        let seen = Arc::new(Mutex::new(None));
        let seen_in_hook = Arc::clone(&seen);
        let fetcher = MockDocumentFetcher::new().on_fetch(1, move || {
            *seen_in_hook.lock().unwrap() = Some(observer.is_registered("job-7"));
        });

        Dispatcher::new(fetcher, MockExtractor::new(), registry.clone())
            .run(
                ScrapeJob::range(1, 1, 1).unwrap().with_handle("job-7"),
                &ProgressEmitter::silent(),
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(true));
        assert!(!registry.is_registered("job-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_run_deregisters_its_handle() {
        let registry = CancellationRegistry::new();
        let fetcher = MockDocumentFetcher::new().with_delay(Duration::from_secs(60));
        let dispatcher = Dispatcher::new(fetcher, MockExtractor::new(), registry.clone());
        let emitter = ProgressEmitter::silent();

        let mut run = Box::pin(
            dispatcher.run(ScrapeJob::range(1, 4, 2).unwrap().with_handle("job-8"), &emitter),
        );
        let stalled = tokio::time::timeout(Duration::from_secs(1), &mut run).await;
        assert!(stalled.is_err());
        assert!(registry.is_registered("job-8"));

        drop(run);

        assert!(!registry.is_registered("job-8"));
        assert!(!registry.request_stop("job-8"));
    }

    #[tokio::test]
    async fn not_authorized_records_follow_inclusion_flag() {
        let not_authorized = format!("AUTHORIZED FOR HHG {NOT_AUTHORIZED_MARKER}");
        let out_of_service = format!("AUTHORIZED FOR Property {OUT_OF_SERVICE_MARKER}");
        let fetcher = || {
            MockDocumentFetcher::new()
                .with(1, MockDocument::Text(not_authorized.clone()))
                .with(2, MockDocument::Text(out_of_service.clone()))
        };

        let excluded = dispatcher(fetcher())
            .run(ScrapeJob::range(1, 3, 3).unwrap(), &ProgressEmitter::silent())
            .await
            .unwrap();
        let ids: Vec<_> = excluded.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, [2, 3]);
        assert!(excluded.records[0].out_of_service);
        // Excluded records still count as successful scrapes.
        assert_eq!(excluded.successful, 3);

        let included = dispatcher(fetcher())
            .run(
                ScrapeJob::range(1, 3, 3).unwrap().include_not_authorized(true),
                &ProgressEmitter::silent(),
            )
            .await
            .unwrap();
        let ids: Vec<_> = included.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, [1, 2, 3]);
        assert!(included.records[0].not_authorized);
    }

    #[tokio::test]
    async fn not_found_and_extraction_errors_are_item_errors() {
        let fetcher = MockDocumentFetcher::new()
            .with(1, MockDocument::Text("NOT FOUND".into()))
            .with(2, MockDocument::Text("BROKEN".into()));
        let (emitter, events) = recorder();

        let report = dispatcher(fetcher)
            .run(ScrapeJob::range(1, 3, 3).unwrap(), &emitter)
            .await
            .unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.successful, 1);
        assert_eq!(report.records.len(), 1);

        let events = events.lock().unwrap();
        let errors: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::ItemError { id, error } => Some((*id, error.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].0, 1);
        assert!(errors[0].1.contains("not found"));
        assert!(errors[1].1.contains("malformed"));
    }

    #[tokio::test]
    async fn job_proxies_are_loaded_into_pool() {
        let pool = ProxyPool::default();
        let report = dispatcher(MockDocumentFetcher::new())
            .with_proxy_pool(pool.clone())
            .run(
                ScrapeJob::range(1, 2, 2).unwrap()
                    .with_proxies(vec!["http://10.0.0.1:8080".into(), "socks5://10.0.0.2:1080".into()]),
                &ProgressEmitter::silent(),
            )
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(pool.addresses(), ["http://10.0.0.1:8080", "socks5://10.0.0.2:1080"]);
    }

    #[tokio::test]
    async fn invalid_job_fails_before_any_event() {
        let (emitter, events) = recorder();
        let d = dispatcher(MockDocumentFetcher::new()).with_proxy_pool(ProxyPool::default());

        let err = d.run(ScrapeJob::range(1, 2, 0).unwrap(), &emitter).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));

        let err = d
            .run(
                ScrapeJob::range(1, 2, 2).unwrap().with_proxies(vec!["not a proxy".into()]),
                &emitter,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidProxy { .. }));

        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn events_stream_through_bounded_channel() {
        let (emitter, mut rx) = ProgressEmitter::channel(2);
        let d = dispatcher(MockDocumentFetcher::new());

        let consumer = tokio::spawn(async move {
            let mut kinds = Vec::new();
            while let Some(event) = rx.recv().await {
                kinds.push(event.kind());
            }
            kinds
        });

        let report = d.run(ScrapeJob::range(1, 4, 2).unwrap(), &emitter).await.unwrap();
        drop(emitter);

        let kinds = consumer.await.unwrap();
        assert_eq!(report.processed, 4);
        assert_eq!(kinds.first(), Some(&"init"));
        assert_complete_last(&kinds);
    }
}
