use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures_util::future::BoxFuture;
use rapk_toolchain::android;
use tracing::info;

use crate::{
    binary_patch::BinaryPatchPipeline, context::BuildContext, decompile::DecompilePipeline,
    error::BuildError, progress::ProgressSink, scratch::Scratch, script::ScriptPipeline,
    strategy::Strategy,
};

/// One rebuild: a redirect URL and the names derived from the requested app name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebuildRequest {
    pub job_id: String,
    pub url: String,
    /// Shown under the launcher icon.
    pub display_name: String,
    /// File name of the published artifact, always ending in `.apk`.
    pub artifact_name: String,
}

impl RebuildRequest {
    pub fn new(job_id: impl Into<String>, url: impl Into<String>, requested_name: &str) -> Self {
        let display_name = display_name_for(requested_name);
        let artifact_name = artifact_file_name(&display_name);
        Self {
            job_id: job_id.into(),
            url: url.into(),
            display_name,
            artifact_name,
        }
    }
}

/// `"MyApp.apk"` and `"MyApp"` both display as `MyApp`.
pub fn display_name_for(requested: &str) -> String {
    let trimmed = requested.trim();
    trimmed.strip_suffix(".apk").unwrap_or(trimmed).to_string()
}

/// Output file name for a display name. Path separators and control
/// characters never reach the file system.
pub fn artifact_file_name(display_name: &str) -> String {
    let safe: String = display_name
        .chars()
        .map(|c| {
            if matches!(c, '/' | '\\' | ':') || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("{safe}.apk")
}

pub trait RebuildPipeline: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Produces the signed artifact for `request` and returns its path in the
    /// output directory. Job-private files are gone by the time this resolves,
    /// on success and on failure.
    fn rebuild<'a>(
        &'a self,
        request: &'a RebuildRequest,
        progress: &'a dyn ProgressSink,
    ) -> BoxFuture<'a, Result<PathBuf, BuildError>>;
}

pub fn pipelines_for(ctx: Arc<BuildContext>) -> Vec<Arc<dyn RebuildPipeline>> {
    vec![
        Arc::new(DecompilePipeline::new(ctx.clone())),
        Arc::new(BinaryPatchPipeline::new(ctx.clone())),
        Arc::new(ScriptPipeline::new(ctx)),
    ]
}

/// Shared tail of the template pipelines: sign the aligned archive, optionally
/// verify it, then move it into the output directory under its final name.
pub(crate) async fn sign_and_publish(
    ctx: &BuildContext,
    scratch: &mut Scratch,
    request: &RebuildRequest,
    aligned: &Path,
) -> Result<PathBuf, BuildError> {
    let layout = ctx.layout();
    let signed = scratch.track(layout.job_file("signed", &request.job_id));
    android::sign(ctx.locator(), ctx.signing_key(), aligned, &signed).await?;
    if ctx.verify_output() {
        verify_artifact(ctx, &signed).await?;
    }

    let dest = layout.output_path(&request.artifact_name);
    publish_into(&signed, &dest).map_err(BuildError::io(&dest))?;
    info!("published {}", dest.display());
    Ok(dest)
}

pub(crate) async fn verify_artifact(ctx: &BuildContext, apk: &Path) -> Result<(), BuildError> {
    android::check_alignment(ctx.locator(), apk).await?;
    android::verify_signature(ctx.locator(), apk).await?;
    Ok(())
}

/// Moves a finished file into place so readers never observe a partial one.
fn publish_into(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    let file_name = dest
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let staging = dest.with_file_name(format!(".{file_name}.partial"));
    fs::copy(src, &staging)?;
    fs::rename(&staging, dest)
}
