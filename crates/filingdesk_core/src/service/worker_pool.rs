//! Thread pool for per-company jobs.
//!
//! # Responsibility
//! - Run one job per company over a fixed number of worker threads.
//! - Give every worker its own SQLite connection to the same database file.
//!
//! # Invariants
//! - Every submitted job yields exactly one outcome, in submission order.
//! - A failing or panicking job never affects the other jobs.

use crate::db::open_db;
use crate::service::{ServiceError, ServiceResult};
use log::{error, info, warn};
use rusqlite::Connection;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;

/// Why a job produced no result.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// No worker could open the database.
    #[error("no worker connection available: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Job(#[from] ServiceError),
    #[error("job panicked: {0}")]
    Panicked(String),
}

/// One job together with its result.
#[derive(Debug)]
pub struct JobOutcome<J, T> {
    pub job: J,
    pub result: Result<T, WorkerError>,
}

/// Fixed-size pool over one SQLite database file.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    db_path: PathBuf,
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(db_path: impl Into<PathBuf>, worker_count: usize) -> Self {
        Self {
            db_path: db_path.into(),
            worker_count: worker_count.max(1),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Runs `job_fn` for every job and returns the outcomes in job order.
    pub fn run<J, T, F>(&self, jobs: Vec<J>, job_fn: F) -> Vec<JobOutcome<J, T>>
    where
        J: Send,
        T: Send,
        F: Fn(&Connection, &J) -> ServiceResult<T> + Sync,
    {
        if jobs.is_empty() {
            return Vec::new();
        }

        let started_at = Instant::now();
        let job_count = jobs.len();
        let workers = self.worker_count.min(job_count);
        let queue = Mutex::new(jobs.into_iter().enumerate().collect::<VecDeque<_>>());
        let results = Mutex::new(Vec::with_capacity(job_count));
        let open_error = Mutex::new(None::<String>);

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let queue = &queue;
                let results = &results;
                let open_error = &open_error;
                let job_fn = &job_fn;
                scope.spawn(move || {
                    let conn = match open_db(&self.db_path) {
                        Ok(conn) => conn,
                        Err(err) => {
                            error!(
                                "event=worker_start module=worker status=error worker={} error={}",
                                worker, err
                            );
                            *open_error.lock().unwrap_or_else(PoisonError::into_inner) =
                                Some(err.to_string());
                            return;
                        }
                    };

                    loop {
                        let next = queue
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .pop_front();
                        let Some((index, job)) = next else {
                            break;
                        };
                        let result = match catch_unwind(AssertUnwindSafe(|| job_fn(&conn, &job)))
                        {
                            Ok(result) => result.map_err(WorkerError::from),
                            Err(payload) => {
                                let message = panic_message(payload.as_ref());
                                warn!(
                                    "event=worker_job module=worker status=panicked worker={} job={} payload={}",
                                    worker, index, message
                                );
                                Err(WorkerError::Panicked(message))
                            }
                        };
                        results
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((index, JobOutcome { job, result }));
                    }
                });
            }
        });

        let mut outcomes = results
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let leftover = queue.into_inner().unwrap_or_else(PoisonError::into_inner);
        if !leftover.is_empty() {
            let reason = open_error
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .unwrap_or_else(|| "worker exited early".to_string());
            outcomes.extend(leftover.into_iter().map(|(index, job)| {
                (
                    index,
                    JobOutcome {
                        job,
                        result: Err(WorkerError::Unavailable(reason.clone())),
                    },
                )
            }));
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let failed = outcomes
            .iter()
            .filter(|(_, outcome)| outcome.result.is_err())
            .count();
        info!(
            "event=worker_pool module=worker status=ok workers={} jobs={} failed={} duration_ms={}",
            workers,
            job_count,
            failed,
            started_at.elapsed().as_millis()
        );
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
