#![forbid(unsafe_code)]

use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, trace};
use rayon::prelude::*;

pub const DEFAULT_MIN_ROWS_PER_TASK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Worker count; `None` uses every available hardware thread. Requests
    /// above the hardware limit are clamped down to it.
    pub num_threads: Option<usize>,
    /// Below `2 * min_rows_per_task` rows the work runs on the caller.
    pub min_rows_per_task: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            min_rows_per_task: DEFAULT_MIN_ROWS_PER_TASK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed building worker pool: {0}")]
    PoolBuild(String),
    #[error("row length must be > 0")]
    ZeroRowLength,
    #[error("buffer of {len} elements is not a whole number of {row_len}-element rows")]
    RaggedBuffer { len: usize, row_len: usize },
}

impl SchedulerError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::PoolBuild(_) => "scheduler_pool_build_failed",
            Self::ZeroRowLength => "scheduler_zero_row_length",
            Self::RaggedBuffer { .. } => "scheduler_ragged_buffer",
        }
    }
}

/// One `for_each_partition` call as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionEvent {
    pub ts_millis: u128,
    pub label: String,
    pub rows: usize,
    pub partitions: usize,
    pub threads: usize,
    pub elapsed_micros: u128,
}

#[derive(Debug, Default, Clone)]
pub struct ExecutionLedger {
    events: Vec<ExecutionEvent>,
}

impl ExecutionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: ExecutionEvent) {
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[ExecutionEvent] {
        &self.events
    }

    #[must_use]
    pub fn last(&self) -> Option<&ExecutionEvent> {
        self.events.last()
    }

    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.events.iter().map(|event| event.rows).sum()
    }

    #[must_use]
    pub fn parallel_runs(&self) -> usize {
        self.events
            .iter()
            .filter(|event| event.partitions > 1)
            .count()
    }
}

/// Bounded worker pool splitting row-major buffers into disjoint row bands.
#[derive(Debug)]
pub struct Scheduler {
    pool: rayon::ThreadPool,
    threads: usize,
    min_rows_per_task: usize,
}

static GLOBAL_SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let available = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let threads = config
            .num_threads
            .map_or(available, |requested| requested.clamp(1, available));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("tk-worker-{idx}"))
            .build()
            .map_err(|err| SchedulerError::PoolBuild(err.to_string()))?;
        debug!("scheduler ready: threads={threads} min_rows_per_task={}", config.min_rows_per_task);
        Ok(Self {
            pool,
            threads,
            min_rows_per_task: config.min_rows_per_task.max(1),
        })
    }

    /// Process-wide scheduler with the default configuration.
    pub fn global() -> Result<&'static Self, SchedulerError> {
        if let Some(scheduler) = GLOBAL_SCHEDULER.get() {
            return Ok(scheduler);
        }
        let scheduler = Self::new(SchedulerConfig::default())?;
        Ok(GLOBAL_SCHEDULER.get_or_init(|| scheduler))
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.threads
    }

    #[must_use]
    pub fn min_rows_per_task(&self) -> usize {
        self.min_rows_per_task
    }

    /// Number of bands `rows` rows are split into.
    #[must_use]
    pub fn partitions_for(&self, rows: usize) -> usize {
        if self.threads <= 1 || rows < 2 * self.min_rows_per_task {
            return usize::from(rows > 0);
        }
        (rows / self.min_rows_per_task).min(self.threads)
    }

    /// Splits `data` into `row_len`-element rows, groups them into
    /// contiguous bands and calls `f(row_range, band)` once per band.
    ///
    /// Bands never overlap, so `f` gets exclusive access to its rows.
    pub fn for_each_partition<T, F>(
        &self,
        label: &str,
        data: &mut [T],
        row_len: usize,
        f: F,
    ) -> Result<ExecutionEvent, SchedulerError>
    where
        T: Send,
        F: Fn(Range<usize>, &mut [T]) + Sync,
    {
        if row_len == 0 {
            return Err(SchedulerError::ZeroRowLength);
        }
        if data.len() % row_len != 0 {
            return Err(SchedulerError::RaggedBuffer {
                len: data.len(),
                row_len,
            });
        }
        let rows = data.len() / row_len;
        let parts = self.partitions_for(rows);
        let started = Instant::now();

        if parts <= 1 {
            if rows > 0 {
                f(0..rows, data);
            }
        } else {
            let mut bands = Vec::with_capacity(parts);
            let mut rest = data;
            for range in tk_iter::partition(rows, parts) {
                let (band, tail) = std::mem::take(&mut rest).split_at_mut(range.len() * row_len);
                bands.push((range, band));
                rest = tail;
            }
            self.pool.install(|| {
                bands.into_par_iter().for_each(|(range, band)| {
                    trace!("{label}: rows {}..{}", range.start, range.end);
                    f(range, band);
                });
            });
        }

        let ts_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let event = ExecutionEvent {
            ts_millis,
            label: label.to_string(),
            rows,
            partitions: parts,
            threads: if parts > 1 { self.threads } else { 1 },
            elapsed_micros: started.elapsed().as_micros(),
        };
        debug!(
            "{label}: rows={rows} partitions={parts} threads={}",
            event.threads
        );
        Ok(event)
    }
}
