//! At most one running search per user, run out-of-band.
//!
//! `submit` claims the user's slot in the job store atomically, then spawns the
//! search. When it concludes the coordinator reports the outcome to the
//! [`JobListener`], drops the job entry and asks the conversation side to clear
//! the user's session, in that order.

use crate::errors::{DriverError, FailureKind};
use crate::features::session_store::{KeyedStore, MemoryStore};
use crate::types::{ListingRecord, SearchCriteria};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Something that turns criteria into listings (the remote site driver, or a mock).
#[async_trait]
pub trait ListingSearch: Send + Sync {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ListingRecord>, DriverError>;
}

/// Receives exactly one terminal outcome per job.
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn on_complete(&self, job: &AutomationJob, outcome: &JobOutcome);
}

/// Clears a user's conversation session once their job has concluded.
#[async_trait]
pub trait SessionCloser: Send + Sync {
    async fn close_session(&self, user_id: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed(FailureKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationJob {
    pub id: Uuid,
    pub user_id: String,
    pub criteria: SearchCriteria,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
}

/// Terminal result handed to the delivery layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Listings(Vec<ListingRecord>),
    /// The search ran fine and matched nothing.
    NoResults,
    Failed(FailureKind),
}

impl JobOutcome {
    fn from_result(result: &Result<Vec<ListingRecord>, DriverError>) -> Self {
        match result {
            Ok(records) if records.is_empty() => JobOutcome::NoResults,
            Ok(records) => JobOutcome::Listings(records.clone()),
            Err(e) => JobOutcome::Failed(e.kind()),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Failed(kind) => JobStatus::Failed(*kind),
            _ => JobStatus::Succeeded,
        }
    }
}

/// Handle to a started job. Dropping it detaches the job.
#[derive(Debug)]
pub struct JobTicket {
    pub id: Uuid,
    handle: JoinHandle<()>,
}

impl JobTicket {
    /// Wait until the job has been fully wound down (outcome delivered, session cleared).
    pub async fn finished(self) {
        if let Err(e) = self.handle.await {
            warn!("job {}: completion task ended abnormally: {}", self.id, e);
        }
    }
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Started(JobTicket),
    AlreadyRunning,
}

impl SubmitOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, SubmitOutcome::Started(_))
    }
}

#[derive(Clone)]
pub struct JobCoordinator {
    jobs: Arc<dyn KeyedStore<AutomationJob>>,
    search: Arc<dyn ListingSearch>,
    listener: Arc<dyn JobListener>,
    sessions: Arc<dyn SessionCloser>,
    hard_timeout: Duration,
}

impl JobCoordinator {
    pub fn new(
        search: Arc<dyn ListingSearch>,
        listener: Arc<dyn JobListener>,
        sessions: Arc<dyn SessionCloser>,
        hard_timeout: Duration,
    ) -> Self {
        Self {
            jobs: Arc::new(MemoryStore::new()),
            search,
            listener,
            sessions,
            hard_timeout,
        }
    }

    pub fn with_job_store(mut self, jobs: Arc<dyn KeyedStore<AutomationJob>>) -> Self {
        self.jobs = jobs;
        self
    }

    pub async fn is_running(&self, user_id: &str) -> bool {
        matches!(
            self.jobs.get(user_id).await,
            Some(AutomationJob {
                status: JobStatus::Running,
                ..
            })
        )
    }

    pub async fn submit(&self, user_id: &str, criteria: SearchCriteria) -> SubmitOutcome {
        let job = AutomationJob {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            criteria,
            status: JobStatus::Running,
            started_at: Utc::now(),
        };
        if !self.jobs.insert_if_absent(user_id, job.clone()).await {
            warn!("job: {} already has a running search, not starting another", user_id);
            return SubmitOutcome::AlreadyRunning;
        }
        info!(
            "job {}: started for {} at {}",
            job.id,
            user_id,
            job.started_at.to_rfc3339()
        );

        let id = job.id;
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(job).await });
        SubmitOutcome::Started(JobTicket { id, handle })
    }

    async fn run(self, mut job: AutomationJob) {
        let start = Instant::now();
        let result = self.search_bounded(&job).await;
        let outcome = JobOutcome::from_result(&result);
        job.status = outcome.status();

        match &result {
            Ok(records) => info!(
                "job {}: finished with {} record(s) in {}ms",
                job.id,
                records.len(),
                start.elapsed().as_millis()
            ),
            Err(e) => error!(
                "job {}: failed after {}ms: {}",
                job.id,
                start.elapsed().as_millis(),
                e
            ),
        }

        self.jobs.set(&job.user_id, job.clone()).await;
        self.listener.on_complete(&job, &outcome).await;
        self.jobs.delete(&job.user_id).await;
        self.sessions.close_session(&job.user_id).await;
    }

    /// Runs the search on its own task so a panic or a hung page cannot
    /// outlive the hard timeout.
    async fn search_bounded(&self, job: &AutomationJob) -> Result<Vec<ListingRecord>, DriverError> {
        let search = self.search.clone();
        let criteria = job.criteria.clone();
        let mut worker = tokio::spawn(async move { search.search(&criteria).await });

        match tokio::time::timeout(self.hard_timeout, &mut worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(DriverError::Unknown("search task panicked".to_string()))
            }
            Ok(Err(join_err)) => Err(DriverError::Unknown(join_err.to_string())),
            Err(_) => {
                worker.abort();
                Err(DriverError::timeout(
                    "job",
                    format!("exceeded hard limit of {}s", self.hard_timeout.as_secs()),
                ))
            }
        }
    }
}
