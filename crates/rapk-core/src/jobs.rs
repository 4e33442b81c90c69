use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use rapk_build::{
    display_name_for, BuildError, ProgressSink, RebuildPipeline, RebuildRequest, Strategy,
};
use rapk_util::{now_millis, remove_path_quietly};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    artifacts::{ArtifactRecord, ArtifactStore},
    history::JobHistory,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: String,
    pub message: String,
}

impl From<&BuildError> for JobFailure {
    fn from(err: &BuildError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Point-in-time view of a job. Progress never decreases and a terminal
/// status never changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub strategy: Strategy,
    pub url: String,
    pub display_name: String,
    pub artifact_name: String,
    pub status: JobStatus,
    pub progress: u32,
    pub phase: String,
    pub artifact: Option<ArtifactRecord>,
    pub error: Option<JobFailure>,
    pub created_at_unix_millis: i64,
    pub started_at_unix_millis: Option<i64>,
    pub finished_at_unix_millis: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildParams {
    pub url: String,
    pub name: String,
    /// Falls back to the coordinator's default strategy.
    pub strategy: Option<Strategy>,
}

impl BuildParams {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("job {0} not found")]
    NotFound(String),
    #[error("no pipeline for strategy {0}")]
    StrategyUnavailable(Strategy),
}

type JobRecord = Arc<Mutex<JobSnapshot>>;

/// Finished jobs kept in memory for polling; older ones live on in the
/// history file only.
const MAX_FINISHED_JOBS: usize = 200;

fn lock(record: &Mutex<JobSnapshot>) -> MutexGuard<'_, JobSnapshot> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
struct JobStore {
    inner: Arc<Mutex<HashMap<String, JobRecord>>>,
}

impl JobStore {
    fn insert(&self, job_id: &str, snapshot: JobSnapshot) -> JobRecord {
        let record = Arc::new(Mutex::new(snapshot));
        let mut jobs = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(job_id.to_string(), record.clone());
        evict_finished(&mut jobs, MAX_FINISHED_JOBS);
        record
    }

    fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    fn all(&self) -> Vec<JobRecord> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Drops the oldest finished jobs beyond `keep`. Pending and running jobs
/// are never evicted.
fn evict_finished(jobs: &mut HashMap<String, JobRecord>, keep: usize) {
    let mut finished: Vec<(i64, String)> = jobs
        .iter()
        .filter_map(|(job_id, record)| {
            let job = lock(record);
            job.status.is_terminal().then(|| {
                let at = job
                    .finished_at_unix_millis
                    .unwrap_or(job.created_at_unix_millis);
                (at, job_id.clone())
            })
        })
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, job_id) in finished.into_iter().take(excess) {
        jobs.remove(&job_id);
    }
}

/// Feeds pipeline progress into a job record.
struct JobProgress {
    record: JobRecord,
}

impl ProgressSink for JobProgress {
    fn report(&self, percent: u32, phase: &str) {
        let mut job = lock(&self.record);
        if job.status != JobStatus::Running {
            return;
        }
        job.progress = job.progress.max(percent.min(100));
        job.phase = phase.to_string();
    }
}

/// Accepts build requests, runs each as its own task, and answers polls.
/// Polling never waits on a running build.
#[derive(Clone)]
pub struct JobCoordinator {
    store: JobStore,
    pipelines: Arc<HashMap<Strategy, Arc<dyn RebuildPipeline>>>,
    default_strategy: Strategy,
    artifacts: Arc<ArtifactStore>,
    history: Option<Arc<JobHistory>>,
}

impl JobCoordinator {
    pub fn new(
        pipelines: Vec<Arc<dyn RebuildPipeline>>,
        default_strategy: Strategy,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        let pipelines: HashMap<_, _> = pipelines
            .into_iter()
            .map(|pipeline| (pipeline.strategy(), pipeline))
            .collect();
        Self {
            store: JobStore::default(),
            pipelines: Arc::new(pipelines),
            default_strategy,
            artifacts,
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<JobHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn default_strategy(&self) -> Strategy {
        self.default_strategy
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Registers a job and starts it in the background. Returns the job id
    /// immediately. Must be called from within a Tokio runtime.
    pub fn submit(&self, params: BuildParams) -> Result<String, JobError> {
        // the url is written as submitted; trimming only decides emptiness
        if params.url.trim().is_empty() {
            return Err(JobError::InvalidRequest("url is required".into()));
        }
        if display_name_for(&params.name).is_empty() {
            return Err(JobError::InvalidRequest("name is required".into()));
        }
        let strategy = params.strategy.unwrap_or(self.default_strategy);
        let pipeline = self
            .pipelines
            .get(&strategy)
            .cloned()
            .ok_or(JobError::StrategyUnavailable(strategy))?;

        let job_id = Uuid::new_v4().to_string();
        let request = RebuildRequest::new(&job_id, params.url.as_str(), &params.name);
        let record = self.store.insert(
            &job_id,
            JobSnapshot {
                job_id: job_id.clone(),
                strategy,
                url: request.url.clone(),
                display_name: request.display_name.clone(),
                artifact_name: request.artifact_name.clone(),
                status: JobStatus::Pending,
                progress: 0,
                phase: "queued".into(),
                artifact: None,
                error: None,
                created_at_unix_millis: now_millis(),
                started_at_unix_millis: None,
                finished_at_unix_millis: None,
            },
        );
        info!(
            "job {job_id}: {strategy} build of {:?} for {}",
            request.display_name, request.url
        );

        tokio::spawn(self.clone().run_job(record, pipeline, request));
        Ok(job_id)
    }

    pub fn poll(&self, job_id: &str) -> Result<JobSnapshot, JobError> {
        let record = self
            .store
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let snapshot = lock(&record).clone();
        Ok(snapshot)
    }

    /// Polls every `interval` until the job reaches a terminal status.
    pub async fn wait(&self, job_id: &str, interval: Duration) -> Result<JobSnapshot, JobError> {
        loop {
            let snapshot = self.poll(job_id)?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Jobs known to this process, oldest first.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self
            .store
            .all()
            .iter()
            .map(|record| lock(record).clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at_unix_millis);
        jobs
    }

    async fn run_job(
        self,
        record: JobRecord,
        pipeline: Arc<dyn RebuildPipeline>,
        request: RebuildRequest,
    ) {
        let job_id = request.job_id.clone();
        {
            let mut job = lock(&record);
            job.status = JobStatus::Running;
            job.phase = "running".into();
            job.started_at_unix_millis = Some(now_millis());
        }

        let progress = Arc::new(JobProgress {
            record: record.clone(),
        });
        // own task, so a panicking pipeline still ends in a terminal state
        let worker = {
            let progress = progress.clone();
            tokio::spawn(async move { pipeline.rebuild(&request, &*progress).await })
        };
        let outcome = match worker.await {
            Ok(Ok(path)) => self.artifacts.publish(&path).map_err(|err| {
                remove_path_quietly(&path);
                JobFailure {
                    kind: "artifact".into(),
                    message: err.to_string(),
                }
            }),
            Ok(Err(err)) => Err(JobFailure::from(&err)),
            Err(err) => Err(JobFailure {
                kind: "worker".into(),
                message: err.to_string(),
            }),
        };

        let snapshot = finish(&record, outcome);
        match &snapshot.error {
            None => info!("job {job_id}: completed"),
            Some(failure) => warn!("job {job_id}: failed: {}", failure.message),
        }
        if let Some(history) = &self.history {
            history.record(&snapshot);
        }
    }
}

fn finish(record: &JobRecord, outcome: Result<ArtifactRecord, JobFailure>) -> JobSnapshot {
    let mut job = lock(record);
    if job.status.is_terminal() {
        return job.clone();
    }
    match outcome {
        Ok(artifact) => {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.phase = "completed".into();
            job.artifact = Some(artifact);
        }
        Err(failure) => {
            job.status = JobStatus::Failed;
            job.phase = "failed".into();
            job.error = Some(failure);
        }
    }
    job.finished_at_unix_millis = Some(now_millis());
    job.clone()
}
