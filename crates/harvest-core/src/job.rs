use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancellation::JobHandle;
use crate::error::AppError;
use crate::models::{Record, WorkItem};

/// Consecutive hard blocks after which a job stops scheduling batches.
pub const DEFAULT_BLOCK_THRESHOLD: u32 = 5;

/// Lifecycle of a scrape job.
///
/// `Pending → Running → {Completed | EarlyStopped | ManuallyStopped}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Stopped by the consecutive hard-block threshold.
    EarlyStopped,
    ManuallyStopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::EarlyStopped => "early_stopped",
            JobStatus::ManuallyStopped => "manually_stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::EarlyStopped | JobStatus::ManuallyStopped
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "early_stopped" => Ok(JobStatus::EarlyStopped),
            "manually_stopped" => Ok(JobStatus::ManuallyStopped),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Why a job stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminationReason {
    /// Every batch was dispatched.
    Normal,
    ManualStop,
    BlockAbort,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Normal => "normal",
            TerminationReason::ManualStop => "manualStop",
            TerminationReason::BlockAbort => "blockAbort",
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            TerminationReason::Normal => JobStatus::Completed,
            TerminationReason::ManualStop => JobStatus::ManuallyStopped,
            TerminationReason::BlockAbort => JobStatus::EarlyStopped,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatcher-wide settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub block_threshold: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
        }
    }
}

/// Everything needed to run one job, captured at job start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeJob {
    pub handle: Option<JobHandle>,
    pub items: Vec<WorkItem>,
    pub concurrency_limit: usize,
    /// Keep records whose authority status is NOT AUTHORIZED.
    pub include_not_authorized: bool,
    /// Replaces the proxy pool for this run when present.
    pub proxies: Option<Vec<String>>,
}

impl ScrapeJob {
    pub fn new(items: Vec<WorkItem>, concurrency_limit: usize) -> Self {
        Self {
            handle: None,
            items,
            concurrency_limit,
            include_not_authorized: false,
            proxies: None,
        }
    }

    /// `count` consecutive identifiers starting at `start`.
    pub fn range(start: WorkItem, count: u64, concurrency_limit: usize) -> Result<Self, AppError> {
        let end = start.checked_add(count).ok_or_else(|| {
            AppError::ConfigError(format!(
                "range of {count} identifiers starting at {start} exceeds the identifier space"
            ))
        })?;
        Ok(Self::new((start..end).collect(), concurrency_limit))
    }

    pub fn with_handle(mut self, handle: impl Into<JobHandle>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn include_not_authorized(mut self, include: bool) -> Self {
        self.include_not_authorized = include;
        self
    }

    pub fn with_proxies(mut self, proxies: Vec<String>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency_limit == 0 {
            return Err(AppError::ConfigError(
                "concurrency limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn batch_count(&self) -> usize {
        batch_count(self.items.len(), self.concurrency_limit)
    }

    /// Contiguous batches of at most `concurrency_limit` items, in submission order.
    pub fn batches(&self) -> std::slice::Chunks<'_, WorkItem> {
        self.items.chunks(self.concurrency_limit.max(1))
    }
}

/// `ceil(items / limit)`; zero items means zero batches.
pub fn batch_count(items: usize, limit: usize) -> usize {
    items.div_ceil(limit.max(1))
}

/// Result of a finished job. Partial results are always included.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub records: Vec<Record>,
    pub processed: usize,
    pub successful: usize,
    pub total_batches: usize,
    pub execution_time: Duration,
    pub termination: TerminationReason,
    pub status: JobStatus,
}

impl JobReport {
    pub fn early_stopped(&self) -> bool {
        self.termination != TerminationReason::Normal
    }
}
