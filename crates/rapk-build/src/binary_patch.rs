use std::{path::PathBuf, sync::Arc};

use futures_util::{future::BoxFuture, FutureExt};
use rapk_toolchain::android;
use tracing::{info, warn};

use crate::{
    archive::rewrite_template,
    context::BuildContext,
    error::BuildError,
    manifest::{PatchOutcome, APP_NAME_SENTINEL},
    pipeline::{sign_and_publish, RebuildPipeline, RebuildRequest},
    progress::ProgressSink,
    scratch::Scratch,
    strategy::{Strategy, TemplateKind},
    templates::TemplateHandle,
};

/// Patch the prebuilt template archive directly: no decompiler, no JVM
/// beyond the signer. Requires the sentinel-labelled template.
pub struct BinaryPatchPipeline {
    ctx: Arc<BuildContext>,
}

impl BinaryPatchPipeline {
    pub fn new(ctx: Arc<BuildContext>) -> Self {
        Self { ctx }
    }

    async fn run(
        &self,
        request: &RebuildRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf, BuildError> {
        let ctx = &*self.ctx;
        let layout = ctx.layout();
        progress.report(10, "preparing template");

        let template = match ctx.templates().ensure(TemplateKind::Prebuilt).await? {
            TemplateHandle::Prebuilt { apk } => apk,
            TemplateHandle::Decompiled { tree } => {
                return Err(BuildError::MissingInput(format!(
                    "expected a template archive, got {}",
                    tree.display()
                )))
            }
        };
        ctx.check_signing_inputs()?;

        let mut scratch = Scratch::new();
        let copy = scratch.track(layout.job_file("temp", &request.job_id));
        if let Some(parent) = copy.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BuildError::io(parent))?;
        }
        tokio::fs::copy(&template, &copy)
            .await
            .map_err(BuildError::io(&copy))?;
        progress.report(30, "template copied");

        let unsigned = scratch.track(layout.job_file("unsigned", &request.job_id));
        let report = {
            let src = copy.clone();
            let dst = unsigned.clone();
            let url = request.url.clone();
            let name = request.display_name.clone();
            tokio::task::spawn_blocking(move || {
                rewrite_template(&src, &dst, &url, &name, APP_NAME_SENTINEL)
            })
            .await??
        };
        match report.manifest {
            Some(PatchOutcome::Patched {
                occurrences,
                truncated,
            }) => {
                info!(
                    "job {}: patched {occurrences} label occurrence(s)",
                    request.job_id
                );
                if truncated {
                    warn!(
                        "job {}: app name {:?} truncated to fit the template label",
                        request.job_id, request.display_name
                    );
                }
            }
            Some(PatchOutcome::SentinelMissing) => warn!(
                "job {}: label sentinel not found in manifest; keeping template label",
                request.job_id
            ),
            None => warn!("job {}: template has no manifest entry", request.job_id),
        }
        progress.report(60, "archive rewritten");

        let aligned = scratch.track(layout.job_file("aligned", &request.job_id));
        android::zipalign(ctx.locator(), &unsigned, &aligned).await?;
        progress.report(80, "aligned");

        let artifact = sign_and_publish(ctx, &mut scratch, request, &aligned).await?;
        progress.report(100, "signed");
        Ok(artifact)
    }
}

impl RebuildPipeline for BinaryPatchPipeline {
    fn strategy(&self) -> Strategy {
        Strategy::BinaryPatch
    }

    fn rebuild<'a>(
        &'a self,
        request: &'a RebuildRequest,
        progress: &'a dyn ProgressSink,
    ) -> BoxFuture<'a, Result<PathBuf, BuildError>> {
        self.run(request, progress).boxed()
    }
}
