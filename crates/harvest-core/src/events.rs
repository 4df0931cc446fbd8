use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::job::TerminationReason;
use crate::models::{Record, WorkItem};

/// One lifecycle occurrence of a scrape job.
///
/// Serialized flat with a `type` tag, e.g. `{"type":"batchStart","batchNumber":1,"totalBatches":4}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    /// Emitted once, before any fetch.
    Init {
        total_records: usize,
        total_batches: usize,
    },
    BatchStart {
        batch_number: usize,
        total_batches: usize,
    },
    ItemStart {
        id: WorkItem,
        processed: usize,
        total: usize,
    },
    ItemSuccess {
        id: WorkItem,
        record: Record,
        /// False when the record is excluded from the output.
        kept: bool,
    },
    ItemError {
        id: WorkItem,
        error: String,
    },
    /// A fetch surfaced a hard block.
    AccessForbidden {
        id: WorkItem,
        error: String,
        consecutive: u32,
        threshold: u32,
    },
    /// The consecutive hard-block threshold was reached.
    GeoRestrictionLimit {
        consecutive: u32,
        message: String,
    },
    /// A stop request was honoured before `batch_number` started.
    ManualStop {
        batch_number: usize,
        message: String,
    },
    BatchComplete {
        batch_number: usize,
        total_batches: usize,
        batch_size: usize,
    },
    EarlyStopped {
        reason: TerminationReason,
        message: String,
    },
    /// Always the last event of a job.
    Complete {
        total_records: usize,
        processed_records: usize,
        successful_records: usize,
        /// Seconds.
        execution_time: f64,
        early_stopped: bool,
        termination: TerminationReason,
    },
}

impl ProgressEvent {
    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Init { .. } => "init",
            ProgressEvent::BatchStart { .. } => "batchStart",
            ProgressEvent::ItemStart { .. } => "itemStart",
            ProgressEvent::ItemSuccess { .. } => "itemSuccess",
            ProgressEvent::ItemError { .. } => "itemError",
            ProgressEvent::AccessForbidden { .. } => "accessForbidden",
            ProgressEvent::GeoRestrictionLimit { .. } => "geoRestrictionLimit",
            ProgressEvent::ManualStop { .. } => "manualStop",
            ProgressEvent::BatchComplete { .. } => "batchComplete",
            ProgressEvent::EarlyStopped { .. } => "earlyStopped",
            ProgressEvent::Complete { .. } => "complete",
        }
    }
}

type Callback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Clone)]
enum Sink {
    None,
    Channel(mpsc::Sender<ProgressEvent>),
    Callback(Callback),
}

/// Delivers progress events to whatever sink the caller attached.
///
/// No buffering beyond the channel capacity, no replay. Every event is also
/// logged through `tracing`.
#[derive(Clone)]
pub struct ProgressEmitter {
    sink: Sink,
}

impl Default for ProgressEmitter {
    fn default() -> Self {
        Self::silent()
    }
}

impl ProgressEmitter {
    /// Log events only.
    pub fn silent() -> Self {
        Self { sink: Sink::None }
    }

    /// Bounded channel sink. `emit` waits for capacity, so a slow consumer
    /// slows the job down instead of growing a queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::from_sender(tx), rx)
    }

    pub fn from_sender(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            sink: Sink::Channel(tx),
        }
    }

    /// Synchronous callback sink.
    pub fn from_fn(f: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> Self {
        Self {
            sink: Sink::Callback(Arc::new(f)),
        }
    }

    pub async fn emit(&self, event: ProgressEvent) {
        log_event(&event);
        match &self.sink {
            Sink::None => {}
            Sink::Callback(f) => f(&event),
            Sink::Channel(tx) => {
                if tx.send(event).await.is_err() {
                    tracing::debug!("Progress receiver dropped, event discarded");
                }
            }
        }
    }
}

fn log_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Init {
            total_records,
            total_batches,
        } => {
            tracing::info!(%total_records, %total_batches, "Scrape started");
        }
        ProgressEvent::BatchStart {
            batch_number,
            total_batches,
        } => {
            tracing::info!(%batch_number, %total_batches, "Starting batch");
        }
        ProgressEvent::ItemStart {
            id,
            processed,
            total,
        } => {
            tracing::debug!(%id, %processed, %total, "Scraping item");
        }
        ProgressEvent::ItemSuccess { id, kept, .. } => {
            tracing::info!(%id, %kept, "Item scraped");
        }
        ProgressEvent::ItemError { id, error } => {
            tracing::warn!(%id, %error, "Item failed");
        }
        ProgressEvent::AccessForbidden {
            id,
            consecutive,
            threshold,
            ..
        } => {
            tracing::warn!(%id, %consecutive, %threshold, "Access forbidden");
        }
        ProgressEvent::GeoRestrictionLimit { message, .. } => {
            tracing::error!("{message}");
        }
        ProgressEvent::ManualStop { batch_number, .. } => {
            tracing::info!(%batch_number, "Scrape stopped by request");
        }
        ProgressEvent::BatchComplete {
            batch_number,
            batch_size,
            ..
        } => {
            tracing::info!(%batch_number, %batch_size, "Batch complete");
        }
        ProgressEvent::EarlyStopped { reason, .. } => {
            tracing::warn!(%reason, "Scrape stopped early");
        }
        ProgressEvent::Complete {
            processed_records,
            successful_records,
            execution_time,
            termination,
            ..
        } => {
            tracing::info!(
                %processed_records,
                %successful_records,
                execution_time_secs = %execution_time,
                %termination,
                "Scrape finished"
            );
        }
    }
}
