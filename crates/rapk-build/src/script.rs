use std::{path::PathBuf, sync::Arc};

use futures_util::{future::BoxFuture, FutureExt};
use rapk_toolchain::ToolCommand;
use rapk_util::remove_path_quietly;
use tracing::{debug, info};

use crate::{
    context::BuildContext,
    error::BuildError,
    pipeline::{verify_artifact, RebuildPipeline, RebuildRequest},
    progress::ProgressSink,
    strategy::Strategy,
};

const PROGRESS_PREFIX: &str = "PROGRESS:";

/// Parses the build script's `PROGRESS: <n>` lines.
pub fn parse_progress_line(line: &str) -> Option<u32> {
    let value = line.trim().strip_prefix(PROGRESS_PREFIX)?.trim();
    value.parse::<u32>().ok().map(|percent| percent.min(100))
}

/// Runs the full cold-build script for every job. Slowest, but needs no
/// template and no edits by this process.
pub struct ScriptPipeline {
    ctx: Arc<BuildContext>,
}

impl ScriptPipeline {
    pub fn new(ctx: Arc<BuildContext>) -> Self {
        Self { ctx }
    }

    async fn run(
        &self,
        request: &RebuildRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf, BuildError> {
        let layout = self.ctx.layout();
        let script = layout.unix_build_script();
        if !script.is_file() {
            return Err(BuildError::ToolUnavailable {
                tool: "build script".into(),
                detail: format!("{} does not exist", script.display()),
            });
        }
        progress.report(5, "starting build script");

        let dest = layout.output_path(&request.artifact_name);
        let job_id = request.job_id.as_str();
        ToolCommand::new(&script)
            .arg("--name")
            .arg(&request.artifact_name)
            .arg("--url")
            .arg(&request.url)
            .arg("--id")
            .arg(job_id)
            .current_dir(layout.project_dir())
            .run_streaming(|line| {
                debug!("job {job_id} script {}: {}", line.stream, line.line);
                if let Some(percent) = parse_progress_line(&line.line) {
                    progress.report(percent, "building");
                }
            })
            .await
            .map_err(|err| BuildError::ExternalToolFailure {
                step: "build script".into(),
                detail: err.to_string(),
            })?;

        if !dest.is_file() {
            return Err(BuildError::ExternalToolFailure {
                step: "build script".into(),
                detail: format!("finished without producing {}", dest.display()),
            });
        }
        if self.ctx.verify_output() {
            if let Err(err) = verify_artifact(&self.ctx, &dest).await {
                remove_path_quietly(&dest);
                return Err(err);
            }
        }
        info!("published {}", dest.display());
        progress.report(100, "done");
        Ok(dest)
    }
}

impl RebuildPipeline for ScriptPipeline {
    fn strategy(&self) -> Strategy {
        Strategy::Script
    }

    fn rebuild<'a>(
        &'a self,
        request: &'a RebuildRequest,
        progress: &'a dyn ProgressSink,
    ) -> BoxFuture<'a, Result<PathBuf, BuildError>> {
        self.run(request, progress).boxed()
    }
}
