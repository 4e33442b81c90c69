use std::{fs, path::PathBuf, sync::Arc};

use futures_util::{future::BoxFuture, FutureExt};
use rapk_toolchain::android;
use rapk_util::copy_dir_all;
use tracing::{info, warn};

use crate::{
    archive::{config_contents, CONFIG_ENTRY},
    context::BuildContext,
    error::BuildError,
    pipeline::{sign_and_publish, RebuildPipeline, RebuildRequest},
    progress::ProgressSink,
    resources::{set_app_name, ResourceEdit},
    scratch::Scratch,
    strategy::{Strategy, TemplateKind},
    templates::TemplateHandle,
};

/// Copy the decoded template, edit its sources, recompile, align, sign.
/// Works with any template but pays for a full apktool round trip per job.
pub struct DecompilePipeline {
    ctx: Arc<BuildContext>,
}

impl DecompilePipeline {
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

        let template = match ctx.templates().ensure(TemplateKind::Decompiled).await? {
            TemplateHandle::Decompiled { tree } => tree,
            TemplateHandle::Prebuilt { apk } => {
                return Err(BuildError::MissingInput(format!(
                    "expected a decoded tree, got {}",
                    apk.display()
                )))
            }
        };
        let apktool = layout.apktool_jar();
        if !apktool.is_file() {
            return Err(BuildError::ToolUnavailable {
                tool: "apktool".into(),
                detail: format!("{} does not exist", apktool.display()),
            });
        }
        ctx.check_signing_inputs()?;

        let mut scratch = Scratch::new();
        let tree = scratch.track(layout.job_tree(&request.job_id));
        {
            let src = template.clone();
            let dest = tree.clone();
            let copied = tokio::task::spawn_blocking(move || copy_dir_all(&src, &dest))
                .await?
                .map_err(BuildError::io(&tree))?;
            info!("job {}: cloned template ({copied} files)", request.job_id);
        }
        progress.report(30, "template cloned");

        let config = tree.join(CONFIG_ENTRY);
        if let Some(parent) = config.parent() {
            fs::create_dir_all(parent).map_err(BuildError::io(parent))?;
        }
        fs::write(&config, config_contents(&request.url)).map_err(BuildError::io(&config))?;
        match set_app_name(&tree, &request.display_name)? {
            ResourceEdit::Updated(path) => {
                info!("job {}: app name set in {}", request.job_id, path.display())
            }
            ResourceEdit::ElementMissing => warn!(
                "job {}: template has no app_name string; keeping its label",
                request.job_id
            ),
        }
        progress.report(50, "sources edited");

        let unsigned = scratch.track(layout.job_file("unsigned", &request.job_id));
        android::apktool_build(ctx.locator(), &apktool, &tree, &unsigned).await?;
        progress.report(70, "recompiled");

        let aligned = scratch.track(layout.job_file("aligned", &request.job_id));
        android::zipalign(ctx.locator(), &unsigned, &aligned).await?;
        progress.report(80, "aligned");

        let artifact = sign_and_publish(ctx, &mut scratch, request, &aligned).await?;
        progress.report(100, "signed");
        Ok(artifact)
    }
}

impl RebuildPipeline for DecompilePipeline {
    fn strategy(&self) -> Strategy {
        Strategy::Decompile
    }

    fn rebuild<'a>(
        &'a self,
        request: &'a RebuildRequest,
        progress: &'a dyn ProgressSink,
    ) -> BoxFuture<'a, Result<PathBuf, BuildError>> {
        self.run(request, progress).boxed()
    }
}
