use std::path::{Path, PathBuf};

use rapk_toolchain::{HostPlatform, SigningKey, ToolLocator};

pub const APKTOOL_JAR: &str = "apktool.jar";
pub const DEBUG_KEYSTORE: &str = "debug.keystore";
pub const DECOMPILED_TEMPLATE_DIR: &str = "apk_template";
pub const PREBUILT_TEMPLATE_DIR: &str = "apk_template_ultra";
pub const PREBUILT_TEMPLATE_APK: &str = "TemplateUltra.apk";
pub const UNIX_BUILD_SCRIPT: &str = "linux_mac_build_apk.sh";
pub const WINDOWS_BUILD_SCRIPT: &str = "windows_build_apk.ps1";
pub const WINDOWS_SETTINGS_FILE: &str = "settings.yaml";

/// Where everything lives on disk.
///
/// ```text
/// <core>/apktool.jar, debug.keystore, build scripts
/// <core>/apk_template/                         decoded template
/// <core>/apk_template_ultra/TemplateUltra.apk  prebuilt template
/// <work>/sdk, <work>/jdk                       cached toolchain
/// <work>/jobs/                                 job-private scratch
/// <output>/<name>.apk                          published artifacts
/// ```
#[derive(Clone, Debug)]
pub struct ForgeLayout {
    core_dir: PathBuf,
    work_dir: PathBuf,
    output_dir: PathBuf,
    platform: HostPlatform,
}

impl ForgeLayout {
    pub fn new(
        core_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            core_dir: core_dir.into(),
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
            platform: HostPlatform::current(),
        }
    }

    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn platform(&self) -> HostPlatform {
        self.platform
    }

    pub fn core_dir(&self) -> &Path {
        &self.core_dir
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn sdk_dir(&self) -> PathBuf {
        self.work_dir.join("sdk")
    }

    pub fn jdk_dir(&self) -> PathBuf {
        self.work_dir.join("jdk")
    }

    pub fn locator(&self) -> ToolLocator {
        ToolLocator::new(self.sdk_dir(), self.jdk_dir()).with_platform(self.platform)
    }

    pub fn apktool_jar(&self) -> PathBuf {
        self.core_dir.join(APKTOOL_JAR)
    }

    pub fn keystore(&self) -> PathBuf {
        self.core_dir.join(DEBUG_KEYSTORE)
    }

    pub fn signing_key(&self) -> SigningKey {
        SigningKey::debug(self.keystore())
    }

    pub fn decompiled_template(&self) -> PathBuf {
        self.core_dir.join(DECOMPILED_TEMPLATE_DIR)
    }

    pub fn prebuilt_template(&self) -> PathBuf {
        self.core_dir
            .join(PREBUILT_TEMPLATE_DIR)
            .join(PREBUILT_TEMPLATE_APK)
    }

    pub fn unix_build_script(&self) -> PathBuf {
        self.core_dir.join(UNIX_BUILD_SCRIPT)
    }

    pub fn windows_build_script(&self) -> PathBuf {
        self.core_dir.join(WINDOWS_BUILD_SCRIPT)
    }

    /// Cold-build script for the host platform.
    pub fn cold_build_script(&self) -> PathBuf {
        match self.platform {
            HostPlatform::Windows => self.windows_build_script(),
            HostPlatform::Unix => self.unix_build_script(),
        }
    }

    /// The Windows script reads its inputs from a settings file next to the core dir.
    pub fn windows_settings_file(&self) -> PathBuf {
        self.project_dir().join(WINDOWS_SETTINGS_FILE)
    }

    /// Directory the build scripts are run from.
    pub fn project_dir(&self) -> PathBuf {
        self.core_dir
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.work_dir.join("jobs")
    }

    pub fn job_tree(&self, job_id: &str) -> PathBuf {
        self.jobs_dir().join(format!("job_{job_id}"))
    }

    /// Intermediate archive for one job, e.g. `jobs/unsigned_<id>.apk`.
    pub fn job_file(&self, stage: &str, job_id: &str) -> PathBuf {
        self.jobs_dir().join(format!("{stage}_{job_id}.apk"))
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_paths_embed_the_job_id() {
        let layout = ForgeLayout::new("/srv/rapk/CORE", "/tmp/android_build_env", "/srv/out");

        assert_eq!(
            layout.job_tree("abc"),
            PathBuf::from("/tmp/android_build_env/jobs/job_abc")
        );
        assert_eq!(
            layout.job_file("unsigned", "abc"),
            PathBuf::from("/tmp/android_build_env/jobs/unsigned_abc.apk")
        );
        assert_ne!(layout.job_file("aligned", "a"), layout.job_file("aligned", "b"));
    }

    #[test]
    fn template_and_tool_locations() {
        let layout = ForgeLayout::new("/srv/rapk/CORE", "/work", "/out");

        assert_eq!(
            layout.prebuilt_template(),
            PathBuf::from("/srv/rapk/CORE/apk_template_ultra/TemplateUltra.apk")
        );
        assert_eq!(
            layout.decompiled_template(),
            PathBuf::from("/srv/rapk/CORE/apk_template")
        );
        assert_eq!(layout.sdk_dir(), PathBuf::from("/work/sdk"));
        assert_eq!(layout.signing_key().store_password, "android");
        assert_eq!(
            layout.windows_settings_file(),
            PathBuf::from("/srv/rapk/settings.yaml")
        );
    }

    #[test]
    fn script_follows_platform() {
        let unix = ForgeLayout::new("/c", "/w", "/o").with_platform(HostPlatform::Unix);
        let windows = ForgeLayout::new("/c", "/w", "/o").with_platform(HostPlatform::Windows);

        assert!(unix.cold_build_script().ends_with(UNIX_BUILD_SCRIPT));
        assert!(windows.cold_build_script().ends_with(WINDOWS_BUILD_SCRIPT));
    }

    #[test]
    fn relative_core_dir_runs_scripts_from_cwd() {
        let layout = ForgeLayout::new("CORE", "/w", "/o");
        assert_eq!(layout.project_dir(), PathBuf::from("."));
    }
}
