use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use rapk_toolchain::{android, HostPlatform, ToolCommand, ToolLocator};
use rapk_util::remove_path_quietly;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::BuildError, layout::ForgeLayout, manifest::APP_NAME_SENTINEL, strategy::TemplateKind,
};

/// Redirect URL baked into every template; replaced per job.
pub const TEMPLATE_URL: &str = "TEMPLATE_URL";
/// App name used for the cold build whose output gets decoded.
const DECOMPILE_COLD_BUILD_NAME: &str = "Template";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateHandle {
    Decompiled { tree: PathBuf },
    Prebuilt { apk: PathBuf },
}

impl TemplateHandle {
    pub fn path(&self) -> &Path {
        match self {
            TemplateHandle::Decompiled { tree } => tree,
            TemplateHandle::Prebuilt { apk } => apk,
        }
    }
}

/// Per-kind cold build bookkeeping. `settled` counts finished cold builds;
/// `last_failure` holds the most recent one if it failed.
#[derive(Debug, Default)]
struct TemplateSlot {
    last_failure: Mutex<Option<ColdBuildFailure>>,
    settled: AtomicUsize,
}

#[derive(Clone, Debug)]
struct ColdBuildFailure {
    /// Value of `settled` once this build finished.
    generation: usize,
    reason: String,
}

/// Owns the two template forms. `ensure` is safe to call from many jobs at
/// once: per kind, at most one cold build runs and everyone else waits for
/// it. Callers that were already waiting when a cold build failed get that
/// failure instead of starting another one.
#[derive(Debug)]
pub struct TemplateStore {
    layout: ForgeLayout,
    locator: ToolLocator,
    decompiled: TemplateSlot,
    prebuilt: TemplateSlot,
    cold_builds: AtomicUsize,
}

impl TemplateStore {
    pub fn new(layout: ForgeLayout) -> Self {
        let locator = layout.locator();
        Self {
            layout,
            locator,
            decompiled: TemplateSlot::default(),
            prebuilt: TemplateSlot::default(),
            cold_builds: AtomicUsize::new(0),
        }
    }

    pub fn layout(&self) -> &ForgeLayout {
        &self.layout
    }

    /// Cold builds started by this store since it was created.
    pub fn cold_build_count(&self) -> usize {
        self.cold_builds.load(Ordering::SeqCst)
    }

    pub fn template_path(&self, kind: TemplateKind) -> PathBuf {
        match kind {
            TemplateKind::Decompiled => self.layout.decompiled_template(),
            TemplateKind::Prebuilt => self.layout.prebuilt_template(),
        }
    }

    /// A template is only usable together with the toolchain the cold build
    /// installs, so a missing `zipalign` counts as "not ready" as well.
    pub fn is_ready(&self, kind: TemplateKind) -> bool {
        let path = self.template_path(kind);
        let present = match kind {
            TemplateKind::Decompiled => path.is_dir(),
            TemplateKind::Prebuilt => path.is_file(),
        };
        present && self.locator.build_tool(android::ZIPALIGN).is_some()
    }

    pub async fn ensure(&self, kind: TemplateKind) -> Result<TemplateHandle, BuildError> {
        let slot = match kind {
            TemplateKind::Decompiled => &self.decompiled,
            TemplateKind::Prebuilt => &self.prebuilt,
        };
        let seen = slot.settled.load(Ordering::SeqCst);
        let mut last_failure = slot.last_failure.lock().await;

        if !self.is_ready(kind) {
            if let Some(failure) = last_failure.as_ref() {
                if failure.generation > seen {
                    debug!("{kind} template: reusing failure of the cold build we waited on");
                    return Err(BuildError::TemplateUnavailable {
                        kind,
                        reason: failure.reason.clone(),
                    });
                }
            }

            info!("{kind} template missing; running cold build");
            self.cold_builds.fetch_add(1, Ordering::SeqCst);
            let outcome = self.cold_build_checked(kind).await;
            let generation = slot.settled.fetch_add(1, Ordering::SeqCst) + 1;
            match outcome {
                Ok(()) => *last_failure = None,
                Err(err) => {
                    let reason = match &err {
                        BuildError::TemplateUnavailable { reason, .. } => reason.clone(),
                        other => other.to_string(),
                    };
                    *last_failure = Some(ColdBuildFailure { generation, reason });
                    return Err(err);
                }
            }
        }

        let path = self.template_path(kind);
        Ok(match kind {
            TemplateKind::Decompiled => TemplateHandle::Decompiled { tree: path },
            TemplateKind::Prebuilt => TemplateHandle::Prebuilt { apk: path },
        })
    }

    async fn cold_build_checked(&self, kind: TemplateKind) -> Result<(), BuildError> {
        self.cold_build(kind).await?;
        if self.is_ready(kind) {
            return Ok(());
        }
        Err(BuildError::TemplateUnavailable {
            kind,
            reason: format!(
                "cold build finished but {} or {} under {} is still missing",
                self.template_path(kind).display(),
                android::ZIPALIGN,
                self.locator.build_tools_root().display()
            ),
        })
    }

    async fn cold_build(&self, kind: TemplateKind) -> Result<(), BuildError> {
        let unavailable = |reason: String| BuildError::TemplateUnavailable { kind, reason };

        let file_name = match kind {
            TemplateKind::Decompiled => format!("{DECOMPILE_COLD_BUILD_NAME}.apk"),
            TemplateKind::Prebuilt => format!("{APP_NAME_SENTINEL}.apk"),
        };
        self.run_cold_build_script(&file_name)
            .await
            .map_err(|err| unavailable(err.to_string()))?;

        let built = self.layout.output_path(&file_name);
        if !built.is_file() {
            return Err(unavailable(format!(
                "build script finished without producing {}",
                built.display()
            )));
        }

        match kind {
            TemplateKind::Decompiled => {
                let tree = self.layout.decompiled_template();
                remove_path_quietly(&tree);
                let decoded = android::apktool_decode(
                    &self.locator,
                    &self.layout.apktool_jar(),
                    &built,
                    &tree,
                )
                .await;
                // the intermediate package is never a deliverable
                remove_path_quietly(&built);
                if let Err(err) = decoded {
                    remove_path_quietly(&tree);
                    return Err(unavailable(err.to_string()));
                }
            }
            TemplateKind::Prebuilt => {
                let target = self.layout.prebuilt_template();
                move_file(&built, &target)
                    .map_err(|err| unavailable(format!("{}: {err}", target.display())))?;
            }
        }
        info!("{kind} template ready at {}", self.template_path(kind).display());
        Ok(())
    }

    async fn run_cold_build_script(&self, file_name: &str) -> Result<(), BuildError> {
        let script = self.layout.cold_build_script();
        if !script.is_file() {
            return Err(BuildError::ToolUnavailable {
                tool: "cold build script".into(),
                detail: format!("{} does not exist", script.display()),
            });
        }

        let command = match self.layout.platform() {
            HostPlatform::Unix => {
                make_executable(&script);
                ToolCommand::new(&script)
                    .args(["--url", TEMPLATE_URL, "--name", file_name, "--no-cleanup"])
            }
            HostPlatform::Windows => ToolCommand::new("powershell.exe")
                .args(["-ExecutionPolicy", "Bypass", "-File"])
                .arg(&script)
                .arg("-NoCleanup"),
        };
        let command = command.current_dir(self.layout.project_dir());

        // the Windows script only reads its inputs from the settings file
        let _settings = match self.layout.platform() {
            HostPlatform::Windows => Some(
                SettingsOverride::apply(
                    &self.layout.windows_settings_file(),
                    &format!("redirect_to_url: \"{TEMPLATE_URL}\"\napk_name: \"{file_name}\""),
                )
                .map_err(BuildError::io(self.layout.windows_settings_file()))?,
            ),
            HostPlatform::Unix => None,
        };

        command
            .run_streaming(|line| debug!("cold build {}: {}", line.stream, line.line))
            .await
            .map_err(|err| BuildError::ExternalToolFailure {
                step: "cold build".into(),
                detail: err.to_string(),
            })?;
        Ok(())
    }
}

/// Temporarily replaces a settings file; the previous contents (or absence)
/// are restored on drop.
struct SettingsOverride {
    path: PathBuf,
    original: Option<String>,
}

impl SettingsOverride {
    fn apply(path: &Path, contents: &str) -> io::Result<Self> {
        let original = match fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };
        fs::write(path, contents)?;
        Ok(Self {
            path: path.to_path_buf(),
            original,
        })
    }
}

impl Drop for SettingsOverride {
    fn drop(&mut self) {
        let restored = match &self.original {
            Some(text) => fs::write(&self.path, text),
            None => fs::remove_file(&self.path),
        };
        if let Err(err) = restored {
            warn!("failed to restore {}: {err}", self.path.display());
        }
    }
}

fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    // crossing filesystems
    fs::copy(src, dest)?;
    fs::remove_file(src)
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o755)) {
        warn!("failed to mark {} executable: {err}", path.display());
    }
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}
