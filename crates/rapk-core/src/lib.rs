//! Job coordination and artifact handling on top of `rapk-build`.

pub mod artifacts;
pub mod config;
pub mod history;
pub mod jobs;

use std::sync::Arc;

use rapk_build::{pipelines_for, BuildContext, BuildError, Strategy, TemplateHandle};

pub use artifacts::{ArtifactError, ArtifactRecord, ArtifactStore, Retrieved};
pub use config::ForgeConfig;
pub use history::JobHistory;
pub use jobs::{BuildParams, JobCoordinator, JobError, JobFailure, JobSnapshot, JobStatus};

/// The assembled service: build context, artifact store, and coordinator
/// wired from one `ForgeConfig`.
pub struct Forge {
    config: ForgeConfig,
    context: Arc<BuildContext>,
    artifacts: Arc<ArtifactStore>,
    coordinator: JobCoordinator,
}

impl Forge {
    pub fn new(config: ForgeConfig) -> Self {
        let context =
            Arc::new(BuildContext::new(config.layout()).with_verification(config.verify_output));
        let artifacts = Arc::new(ArtifactStore::new(
            &config.output_dir,
            config.delete_delay(),
        ));
        let mut coordinator =
            JobCoordinator::new(pipelines_for(context.clone()), config.strategy, artifacts.clone());
        if config.record_history {
            coordinator =
                coordinator.with_history(Arc::new(JobHistory::open(JobHistory::default_path())));
        }
        Self {
            config,
            context,
            artifacts,
            coordinator,
        }
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<BuildContext> {
        &self.context
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn coordinator(&self) -> &JobCoordinator {
        &self.coordinator
    }

    /// Makes sure the template `strategy` consumes exists, cold-building it
    /// if needed. The script strategy has no template.
    pub async fn prepare(&self, strategy: Strategy) -> Result<Option<TemplateHandle>, BuildError> {
        match strategy.template_kind() {
            Some(kind) => self.context.templates().ensure(kind).await.map(Some),
            None => Ok(None),
        }
    }
}
