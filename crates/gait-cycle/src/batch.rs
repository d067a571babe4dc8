//! Concurrent subject passes.
//!
//! Subjects share nothing but the read-only configuration and the table
//! store, so each pass runs on the blocking pool. The batch returns once
//! every pass has finished, in input order.

use std::sync::Arc;

use tokio::sync::Semaphore;

use gait_core::{Error, Result, SubjectConfig, SubjectKey};
use gait_io::TableStore;

use crate::subject::{run_subject, SubjectReport};

/// Batch execution settings
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Subject passes running at the same time
    pub max_parallel: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_parallel: std::thread::available_parallelism().map_or(4, |n| n.get()),
        }
    }
}

impl BatchOptions {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }
}

/// Outcome of every subject of a batch
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<(SubjectKey, Result<SubjectReport>)>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> impl Iterator<Item = &SubjectReport> {
        self.results.iter().filter_map(|(_, r)| r.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&SubjectKey, &Error)> {
        self.results
            .iter()
            .filter_map(|(k, r)| r.as_ref().err().map(|e| (k, e)))
    }
}

/// Run one subject pass per key
pub async fn run_batch(
    config: Arc<SubjectConfig>,
    subjects: Vec<SubjectKey>,
    store: Arc<dyn TableStore>,
    options: BatchOptions,
) -> Result<BatchOutcome> {
    config.check()?;
    let permits = Arc::new(Semaphore::new(options.max_parallel.max(1)));

    let mut handles = Vec::with_capacity(subjects.len());
    for key in subjects {
        let permit = Arc::clone(&permits)
            .acquire_owned()
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let config = Arc::clone(&config);
        let store = Arc::clone(&store);
        let task_key = key.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run_subject(&config, &task_key, store.as_ref())
        });
        handles.push((key, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (key, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(join) => Err(Error::Io(std::io::Error::other(format!(
                "subject pass for {key} aborted: {join}"
            )))),
        };
        if let Err(err) = &result {
            tracing::warn!(subject = %key, error = %err, "Subject pass failed");
        }
        results.push((key, result));
    }

    let outcome = BatchOutcome { results };
    tracing::info!(
        succeeded = outcome.succeeded().count(),
        failed = outcome.failed().count(),
        "Batch finished"
    );
    Ok(outcome)
}
