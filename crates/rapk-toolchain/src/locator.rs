use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostPlatform {
    Unix,
    Windows,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(windows) {
            HostPlatform::Windows
        } else {
            HostPlatform::Unix
        }
    }

    /// Suffixes tried, in order, when resolving an executable by bare name.
    fn executable_suffixes(self) -> &'static [&'static str] {
        match self {
            HostPlatform::Windows => &[".exe", ".bat", ""],
            HostPlatform::Unix => &[""],
        }
    }

    fn candidate_names(self, tool: &str) -> Vec<String> {
        let lower = tool.to_ascii_lowercase();
        let has_suffix = self
            .executable_suffixes()
            .iter()
            .any(|suffix| !suffix.is_empty() && lower.ends_with(suffix));
        if has_suffix {
            return vec![tool.to_string()];
        }
        self.executable_suffixes()
            .iter()
            .map(|suffix| format!("{tool}{suffix}"))
            .collect()
    }
}

/// Read-only view over a cached Android toolchain:
/// `<sdk>/build-tools/<version>/{zipalign,apksigner}` and `<jdk>/bin/{java,keytool}`.
#[derive(Clone, Debug)]
pub struct ToolLocator {
    sdk_dir: PathBuf,
    jdk_dir: PathBuf,
    platform: HostPlatform,
}

impl ToolLocator {
    pub fn new(sdk_dir: impl Into<PathBuf>, jdk_dir: impl Into<PathBuf>) -> Self {
        Self {
            sdk_dir: sdk_dir.into(),
            jdk_dir: jdk_dir.into(),
            platform: HostPlatform::current(),
        }
    }

    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn sdk_dir(&self) -> &Path {
        &self.sdk_dir
    }

    pub fn jdk_dir(&self) -> &Path {
        &self.jdk_dir
    }

    pub fn build_tools_root(&self) -> PathBuf {
        self.sdk_dir.join("build-tools")
    }

    /// Newest installed build-tools directory. Versions are compared as plain
    /// strings, so `9.0.0` sorts after `34.0.0`.
    pub fn latest_build_tools_dir(&self) -> Option<PathBuf> {
        let entries = fs::read_dir(self.build_tools_root()).ok()?;
        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name())
            .max()
            .map(|name| self.build_tools_root().join(name))
    }

    pub fn build_tool(&self, tool: &str) -> Option<PathBuf> {
        let dir = self.latest_build_tools_dir()?;
        self.find_in(&dir, tool)
    }

    pub fn runtime_bin_dir(&self) -> Option<PathBuf> {
        let dir = self.jdk_dir.join("bin");
        dir.is_dir().then_some(dir)
    }

    pub fn runtime_tool(&self, tool: &str) -> Option<PathBuf> {
        let dir = self.runtime_bin_dir()?;
        self.find_in(&dir, tool)
    }

    /// Any known tool: build-tools first, then the cached runtime's `bin/`.
    pub fn resolve(&self, tool: &str) -> Option<PathBuf> {
        self.build_tool(tool).or_else(|| self.runtime_tool(tool))
    }

    /// The cached JDK's `java`, or `java` from `PATH` when the cache has none.
    pub fn java(&self) -> PathBuf {
        self.runtime_tool("java")
            .unwrap_or_else(|| PathBuf::from("java"))
    }

    fn find_in(&self, dir: &Path, tool: &str) -> Option<PathBuf> {
        self.platform
            .candidate_names(tool)
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"#!/bin/sh\n").unwrap();
    }

    #[test]
    fn picks_lexicographically_greatest_version() {
        let temp = tempfile::tempdir().unwrap();
        let sdk = temp.path().join("sdk");
        touch(&sdk.join("build-tools/33.0.2/zipalign"));
        touch(&sdk.join("build-tools/34.0.0/zipalign"));
        fs::write(sdk.join("build-tools/README"), b"not a version").unwrap();

        let locator = ToolLocator::new(&sdk, temp.path().join("jdk"))
            .with_platform(HostPlatform::Unix);

        assert_eq!(
            locator.build_tool("zipalign"),
            Some(sdk.join("build-tools/34.0.0/zipalign"))
        );
    }

    #[test]
    fn only_newest_version_is_searched() {
        let temp = tempfile::tempdir().unwrap();
        let sdk = temp.path().join("sdk");
        touch(&sdk.join("build-tools/33.0.2/apksigner"));
        fs::create_dir_all(sdk.join("build-tools/34.0.0")).unwrap();

        let locator = ToolLocator::new(&sdk, temp.path().join("jdk"))
            .with_platform(HostPlatform::Unix);

        assert_eq!(locator.build_tool("apksigner"), None);
    }

    #[test]
    fn string_ordering_is_not_semantic() {
        let temp = tempfile::tempdir().unwrap();
        let sdk = temp.path().join("sdk");
        touch(&sdk.join("build-tools/34.0.0/zipalign"));
        touch(&sdk.join("build-tools/9.0.0/zipalign"));

        let locator = ToolLocator::new(&sdk, temp.path().join("jdk"))
            .with_platform(HostPlatform::Unix);

        assert_eq!(
            locator.latest_build_tools_dir(),
            Some(sdk.join("build-tools/9.0.0"))
        );
    }

    #[test]
    fn windows_prefers_exe_then_bat() {
        let temp = tempfile::tempdir().unwrap();
        let sdk = temp.path().join("sdk");
        touch(&sdk.join("build-tools/34.0.0/apksigner.bat"));
        touch(&sdk.join("build-tools/34.0.0/apksigner"));
        touch(&sdk.join("build-tools/34.0.0/zipalign.exe"));
        touch(&sdk.join("build-tools/34.0.0/zipalign.bat"));

        let locator = ToolLocator::new(&sdk, temp.path().join("jdk"))
            .with_platform(HostPlatform::Windows);

        assert_eq!(
            locator.build_tool("apksigner"),
            Some(sdk.join("build-tools/34.0.0/apksigner.bat"))
        );
        assert_eq!(
            locator.build_tool("zipalign"),
            Some(sdk.join("build-tools/34.0.0/zipalign.exe"))
        );
        assert_eq!(
            locator.build_tool("apksigner.bat"),
            Some(sdk.join("build-tools/34.0.0/apksigner.bat"))
        );
    }

    #[test]
    fn missing_toolchain_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let locator = ToolLocator::new(temp.path().join("sdk"), temp.path().join("jdk"));

        assert_eq!(locator.latest_build_tools_dir(), None);
        assert_eq!(locator.build_tool("zipalign"), None);
        assert_eq!(locator.runtime_tool("keytool"), None);
        assert_eq!(locator.java(), PathBuf::from("java"));
    }

    #[test]
    fn resolve_checks_build_tools_then_runtime() {
        let temp = tempfile::tempdir().unwrap();
        let sdk = temp.path().join("sdk");
        let jdk = temp.path().join("jdk");
        touch(&sdk.join("build-tools/34.0.0/apksigner"));
        touch(&jdk.join("bin/keytool"));

        let locator = ToolLocator::new(&sdk, &jdk).with_platform(HostPlatform::Unix);

        assert_eq!(
            locator.resolve("apksigner"),
            Some(sdk.join("build-tools/34.0.0/apksigner"))
        );
        assert_eq!(locator.resolve("keytool"), Some(jdk.join("bin/keytool")));
        assert_eq!(locator.resolve("aapt2"), None);
    }

    #[test]
    fn java_comes_from_cached_runtime_when_present() {
        let temp = tempfile::tempdir().unwrap();
        let jdk = temp.path().join("jdk");
        touch(&jdk.join("bin/java"));

        let locator = ToolLocator::new(temp.path().join("sdk"), &jdk)
            .with_platform(HostPlatform::Unix);

        assert_eq!(locator.java(), jdk.join("bin/java"));
    }
}
