use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use rapk_toolchain::hashing::sha256_file;
use rapk_util::{now_millis, remove_path_quietly};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact {0} not found")]
    NotFound(String),
    #[error("invalid artifact name {0:?}")]
    InvalidName(String),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
    pub published_at_unix_millis: i64,
}

/// An open artifact handed to a caller. The file is removed once the grace
/// period after retrieval has passed; `deletion` resolves when it is gone.
#[derive(Debug)]
pub struct Retrieved {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub file: tokio::fs::File,
    pub deletion: JoinHandle<()>,
}

/// Published artifacts in the output directory.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    grace: Duration,
    records: Arc<Mutex<Records>>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, grace: Duration) -> Self {
        Self {
            dir: dir.into(),
            grace,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    /// Records a finished artifact. Publishing the same name again replaces
    /// the previous record.
    pub fn publish(&self, path: &Path) -> Result<ArtifactRecord, ArtifactError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| ArtifactError::InvalidName(path.display().to_string()))?;
        let io_err = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        let meta = std::fs::metadata(path).map_err(io_err)?;
        if !meta.is_file() {
            return Err(ArtifactError::NotFound(name));
        }
        let sha256 = sha256_file(path).map_err(io_err)?;

        let record = ArtifactRecord {
            name: name.clone(),
            path: path.to_path_buf(),
            size_bytes: meta.len(),
            sha256,
            published_at_unix_millis: now_millis(),
        };
        lock(&self.records).insert(name, record.clone());
        info!("artifact {} ({} bytes)", record.name, record.size_bytes);
        Ok(record)
    }

    pub fn get(&self, name: &str) -> Option<ArtifactRecord> {
        lock(&self.records).get(name).cloned()
    }

    /// Where `name` lives in the output directory, if it exists there.
    pub fn locate(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        validate_name(name)?;
        let path = self.dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ArtifactError::NotFound(name.to_string()))
        }
    }

    /// Opens `name` for reading and schedules its removal after the grace
    /// period. Must be called from within a Tokio runtime.
    pub async fn retrieve(&self, name: &str) -> Result<Retrieved, ArtifactError> {
        let path = self.locate(name)?;
        let file = tokio::fs::File::open(&path).await.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ArtifactError::NotFound(name.to_string())
            } else {
                ArtifactError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        let size_bytes = file
            .metadata()
            .await
            .map(|meta| meta.len())
            .unwrap_or_default();
        let deletion = self.schedule_deletion(name, path.clone());
        Ok(Retrieved {
            name: name.to_string(),
            path,
            size_bytes,
            file,
            deletion,
        })
    }

    fn schedule_deletion(&self, name: &str, path: PathBuf) -> JoinHandle<()> {
        let grace = self.grace;
        let records = self.records.clone();
        let name = name.to_string();
        let published_at = self.get(&name).map(|record| record.published_at_unix_millis);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            {
                let mut records = lock(&records);
                let current = records
                    .get(&name)
                    .map(|record| record.published_at_unix_millis);
                if current != published_at {
                    debug!("{name} was republished after retrieval; keeping it");
                    return;
                }
                records.remove(&name);
            }
            remove_path_quietly(&path);
        })
    }
}

type Records = HashMap<String, ArtifactRecord>;

fn lock(records: &Mutex<Records>) -> MutexGuard<'_, Records> {
    records.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_name(name: &str) -> Result<(), ArtifactError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        Err(ArtifactError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}
