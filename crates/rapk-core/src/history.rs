use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use rapk_util::{state_file_path, write_json_atomic};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::jobs::JobSnapshot;

const HISTORY_FILE: &str = "rapk-jobs.json";
const MAX_RECORDS: usize = 200;

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryState {
    jobs: Vec<JobSnapshot>,
}

/// Finished jobs, newest first, persisted best-effort.
#[derive(Debug)]
pub struct JobHistory {
    path: PathBuf,
    state: Mutex<HistoryState>,
}

impl JobHistory {
    pub fn default_path() -> PathBuf {
        state_file_path(HISTORY_FILE)
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = load_state(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, snapshot: &JobSnapshot) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.jobs.retain(|job| job.job_id != snapshot.job_id);
        state.jobs.insert(0, snapshot.clone());
        state.jobs.truncate(MAX_RECORDS);
        if let Err(err) = write_json_atomic(&self.path, &*state) {
            warn!("Failed to persist job history: {}", err);
        }
    }

    pub fn recent(&self) -> Vec<JobSnapshot> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .clone()
    }
}

fn load_state(path: &Path) -> HistoryState {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str::<HistoryState>(&data) {
            Ok(state) => state,
            Err(err) => {
                warn!("Failed to parse {}: {}", path.display(), err);
                HistoryState::default()
            }
        },
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), err);
            }
            HistoryState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobSnapshot, JobStatus};
    use rapk_build::Strategy;

    fn snapshot(job_id: &str, status: JobStatus) -> JobSnapshot {
        JobSnapshot {
            job_id: job_id.to_string(),
            strategy: Strategy::BinaryPatch,
            url: "https://example.com".into(),
            display_name: "MyApp".into(),
            artifact_name: "MyApp.apk".into(),
            status,
            progress: 100,
            phase: "signed".into(),
            artifact: None,
            error: None,
            created_at_unix_millis: 1,
            started_at_unix_millis: Some(2),
            finished_at_unix_millis: Some(3),
        }
    }

    #[test]
    fn records_survive_reopen_newest_first() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state/rapk-jobs.json");

        let history = JobHistory::open(&path);
        history.record(&snapshot("a", JobStatus::Completed));
        history.record(&snapshot("b", JobStatus::Failed));
        history.record(&snapshot("a", JobStatus::Completed));

        let reopened = JobHistory::open(&path);
        let ids: Vec<_> = reopened.recent().into_iter().map(|job| job.job_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn history_is_capped() {
        let temp = tempfile::tempdir().unwrap();
        let history = JobHistory::open(temp.path().join("jobs.json"));
        for i in 0..(MAX_RECORDS + 5) {
            history.record(&snapshot(&i.to_string(), JobStatus::Completed));
        }

        let recent = history.recent();
        assert_eq!(recent.len(), MAX_RECORDS);
        assert_eq!(recent[0].job_id, (MAX_RECORDS + 4).to_string());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("jobs.json");
        fs::write(&path, "{ nope").unwrap();

        assert!(JobHistory::open(&path).recent().is_empty());
    }
}
