use std::path::{Path, PathBuf};

use tracing::info;

use crate::exec::{ToolCommand, ToolFailure, ToolOutput};
use crate::locator::ToolLocator;

pub const ZIPALIGN: &str = "zipalign";
pub const APKSIGNER: &str = "apksigner";
pub const ZIP_ALIGNMENT: &str = "4";
pub const DEBUG_KEY_PASSWORD: &str = "android";

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{tool} not found under {}", searched.display())]
    Unavailable { tool: String, searched: PathBuf },
    #[error("{tool} failed: {source}")]
    Failed {
        tool: String,
        #[source]
        source: ToolFailure,
    },
}

impl ToolError {
    fn failed(tool: &str, source: ToolFailure) -> Self {
        ToolError::Failed {
            tool: tool.to_string(),
            source,
        }
    }
}

/// Keystore shared by every generated package.
#[derive(Clone, Debug)]
pub struct SigningKey {
    pub keystore: PathBuf,
    pub store_password: String,
}

impl SigningKey {
    pub fn debug(keystore: impl Into<PathBuf>) -> Self {
        Self {
            keystore: keystore.into(),
            store_password: DEBUG_KEY_PASSWORD.to_string(),
        }
    }
}

impl ToolLocator {
    pub fn require_build_tool(&self, tool: &str) -> Result<PathBuf, ToolError> {
        self.build_tool(tool).ok_or_else(|| ToolError::Unavailable {
            tool: tool.to_string(),
            searched: self.build_tools_root(),
        })
    }

    /// Points `JAVA_HOME` and `PATH` at the cached runtime when one exists,
    /// so wrapper scripts such as `apksigner` pick it up.
    fn with_runtime_env(&self, cmd: ToolCommand) -> ToolCommand {
        let Some(bin_dir) = self.runtime_bin_dir() else {
            return cmd;
        };
        let mut paths = vec![bin_dir];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        let cmd = cmd.env("JAVA_HOME", self.jdk_dir());
        match std::env::join_paths(paths) {
            Ok(joined) => cmd.env("PATH", joined),
            Err(_) => cmd,
        }
    }
}

pub async fn zipalign(locator: &ToolLocator, input: &Path, output: &Path) -> Result<(), ToolError> {
    let tool = locator.require_build_tool(ZIPALIGN)?;
    ToolCommand::new(tool)
        .args(["-f", ZIP_ALIGNMENT])
        .arg(input)
        .arg(output)
        .run()
        .await
        .map_err(|err| ToolError::failed(ZIPALIGN, err))?;
    Ok(())
}

pub async fn check_alignment(locator: &ToolLocator, apk: &Path) -> Result<(), ToolError> {
    let tool = locator.require_build_tool(ZIPALIGN)?;
    ToolCommand::new(tool)
        .args(["-c", ZIP_ALIGNMENT])
        .arg(apk)
        .run()
        .await
        .map_err(|err| ToolError::failed(ZIPALIGN, err))?;
    Ok(())
}

pub async fn sign(
    locator: &ToolLocator,
    key: &SigningKey,
    input: &Path,
    output: &Path,
) -> Result<(), ToolError> {
    let tool = locator.require_build_tool(APKSIGNER)?;
    let cmd = ToolCommand::new(tool)
        .arg("sign")
        .arg("--ks")
        .arg(&key.keystore)
        .arg("--ks-pass")
        .arg(format!("pass:{}", key.store_password))
        .arg("--out")
        .arg(output)
        .arg(input);
    locator
        .with_runtime_env(cmd)
        .run()
        .await
        .map_err(|err| ToolError::failed(APKSIGNER, err))?;
    info!("signed {}", output.display());
    Ok(())
}

pub async fn verify_signature(locator: &ToolLocator, apk: &Path) -> Result<ToolOutput, ToolError> {
    let tool = locator.require_build_tool(APKSIGNER)?;
    let cmd = ToolCommand::new(tool).arg("verify").arg(apk);
    locator
        .with_runtime_env(cmd)
        .run()
        .await
        .map_err(|err| ToolError::failed(APKSIGNER, err))
}

/// `apktool d`: decode an archive into an editable tree.
pub async fn apktool_decode(
    locator: &ToolLocator,
    apktool_jar: &Path,
    apk: &Path,
    out_dir: &Path,
) -> Result<(), ToolError> {
    ToolCommand::new(locator.java())
        .arg("-jar")
        .arg(apktool_jar)
        .args(["d", "-f", "-o"])
        .arg(out_dir)
        .arg(apk)
        .run()
        .await
        .map_err(|err| ToolError::failed("apktool", err))?;
    Ok(())
}

/// `apktool b`: recompile a decoded tree into an unsigned archive.
pub async fn apktool_build(
    locator: &ToolLocator,
    apktool_jar: &Path,
    tree: &Path,
    out_apk: &Path,
) -> Result<(), ToolError> {
    ToolCommand::new(locator.java())
        .arg("-jar")
        .arg(apktool_jar)
        .arg("b")
        .arg(tree)
        .arg("-o")
        .arg(out_apk)
        .run()
        .await
        .map_err(|err| ToolError::failed("apktool", err))?;
    Ok(())
}
